use clap::Parser;
use spendlens::args::{Args, Command};
use spendlens::{commands, Config, Mode, Result};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// The conventional exit status for a process stopped by SIGINT.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl-C, finishing the work in flight and stopping");
                on_signal.cancel();
            }
            Err(e) => error!("Unable to listen for Ctrl-C: {e}"),
        }
    });

    match main_inner(args, cancel).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) if e.is_interrupted() => {
            info!("Interrupted, everything completed so far has been saved");
            ExitCode::from(INTERRUPTED)
        }
        Err(e) => {
            error!("Exiting with error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args, cancel: CancellationToken) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    // When SPENDLENS_IN_TEST_MODE is set and non-empty the mode is Mode::Test and no provider is
    // contacted, otherwise it is Mode::Live.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init => commands::init(home).await?.print(),

        Command::Import(import_args) => {
            let config = Config::load(home).await?;
            commands::import(config, mode, import_args.clone(), cancel)
                .await?
                .print()
        }

        Command::Search(search_args) => {
            let config = Config::load(home).await?;
            commands::search(config, mode, search_args.clone())
                .await?
                .print()
        }

        Command::Embed(embed_args) => {
            let config = Config::load(home).await?;
            commands::embed(config, mode, embed_args.clone(), cancel)
                .await?
                .print()
        }

        Command::Update(update_args) => {
            let config = Config::load(home).await?;
            commands::update(config, update_args.clone()).await?.print()
        }

        Command::Show(show_args) => {
            let config = Config::load(home).await?;
            commands::show(config, show_args.clone()).await?.print()
        }

        Command::Mcp(_mcp_args) => commands::mcp(Config::load(home).await?, mode)
            .await?
            .print(),
    };
    Ok(())
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "{}={},{}={}",
                env!("CARGO_CRATE_NAME"),
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
