pub mod api;
pub mod args;
pub mod classify;
pub mod commands;
mod config;
mod db;
pub mod embed;
pub mod enrich;
mod error;
pub mod identity;
mod mcp;
pub mod model;
pub mod search;
pub mod statement;
pub mod store;
mod utils;

#[cfg(test)]
mod test;

pub use api::Mode;
pub use config::Config;
pub use error::Error;
pub use error::ErrorType;
pub use error::Result;
