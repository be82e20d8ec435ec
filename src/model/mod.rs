//! Types that represent the core data model, such as `Transaction` and `TransactionDetails`.
mod amount;
mod details;
mod search;
mod transaction;

pub use amount::{Amount, AmountError};
pub use details::{
    Category, DetailsUpdate, ForeignAmount, TransactionDetails, TransactionType, TransferDetails,
    ValidationError,
};
pub use search::{
    OrderBy, SearchMode, SearchOptions, SearchResult, SearchResults, SearchScore, DEFAULT_LIMIT,
};
pub use transaction::{Record, Transaction};
