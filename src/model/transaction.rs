use crate::identity::{self, TransactionId};
use crate::model::{Amount, TransactionDetails};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A raw line from a bank statement. Immutable once parsed: its fields determine its
/// `TransactionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    date: NaiveDate,
    amount: Amount,
    payee: String,
    bank: String,
}

impl Transaction {
    pub fn new(
        date: NaiveDate,
        amount: Amount,
        payee: impl Into<String>,
        bank: impl Into<String>,
    ) -> Self {
        Self {
            date,
            amount,
            payee: payee.into(),
            bank: bank.into(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn payee(&self) -> &str {
        &self.payee
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    /// The content fingerprint of this transaction.
    pub fn id(&self) -> TransactionId {
        identity::fingerprint(&self.payee, &self.amount, self.date, &self.bank)
    }
}

/// A stored transaction together with its classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: TransactionId,
    pub transaction: Transaction,
    pub details: TransactionDetails,
}

impl Record {
    pub fn new(transaction: Transaction, details: TransactionDetails) -> Self {
        Self {
            id: transaction.id(),
            transaction,
            details,
        }
    }
}
