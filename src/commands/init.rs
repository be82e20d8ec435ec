use crate::commands::Out;
use crate::error::{ErrorType, IntoResult};
use crate::{Config, Result};
use anyhow::Context;
use std::path::Path;

/// Creates the data directory with a default `config.json` and an initialized SQLite database.
///
/// # Arguments
/// - `home` - The directory that will be the root of data directory, e.g. `$HOME/spendlens`
///
/// # Errors
/// - Returns an error if the directory already holds a `config.json` or if any file or database
///   operation fails.
pub async fn init(home: &Path) -> Result<Out<()>> {
    let config = Config::create(home)
        .await
        .context("Unable to create the data directory and configs")
        .pub_result(ErrorType::Config)?;
    Ok(format!(
        "Successfully created the spendlens directory at '{}'. Edit '{}' to choose your model \
         providers.",
        config.root().display(),
        config.config_path().display()
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_twice_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("home");
        let out = init(&home).await.unwrap();
        assert!(out.message().contains("Successfully created"));
        assert!(home.join("config.json").is_file());

        let err = init(&home).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Config);
    }
}
