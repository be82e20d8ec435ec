//! Deterministic transaction fingerprints and content hashes.
//!
//! A `TransactionId` is the first 8 hex characters of a SHA-256 digest over
//! `payee|amount|date|bank`. It is the join key between the transaction table, the embeddings
//! table and de-duplication, so the input format here must never change.

use crate::model::Amount;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters kept from the digest.
const ID_LEN: usize = 8;

/// Content fingerprint of a raw transaction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("'{0}' is not a transaction ID: expected 8 hex characters")]
pub struct InvalidTransactionId(String);

impl FromStr for TransactionId {
    type Err = InvalidTransactionId;

    /// Parses user input such as a CLI argument. Uppercase hex is accepted and normalized.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() == ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s))
        } else {
            Err(InvalidTransactionId(s))
        }
    }
}

/// Computes the fingerprint of a `(payee, amount, date, bank)` tuple.
pub fn fingerprint(payee: &str, amount: &Amount, date: NaiveDate, bank: &str) -> TransactionId {
    let input = format!("{payee}|{amount}|{}|{bank}", date.format("%Y-%m-%d"));
    let digest = Sha256::digest(input.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ID_LEN);
    TransactionId(id)
}

/// Hash of text that was (or will be) embedded. Used to decide whether a stored vector is stale.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
