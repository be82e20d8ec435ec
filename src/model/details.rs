//! The structured classification attached to every stored transaction.

use crate::model::{Amount, Transaction};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

const MAX_TAGS: usize = 10;
const MAX_MERCHANT_LEN: usize = 120;

/// What kind of movement of money a transaction represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Transfer,
    Fee,
    Deposit,
    Withdrawal,
    Refund,
    Interest,
    Credit,
    Other,
}

serde_plain::derive_display_from_serialize!(TransactionType);
serde_plain::derive_fromstr_from_deserialize!(TransactionType);

impl TransactionType {
    pub const ALL: [TransactionType; 9] = [
        TransactionType::Purchase,
        TransactionType::Transfer,
        TransactionType::Fee,
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::Refund,
        TransactionType::Interest,
        TransactionType::Credit,
        TransactionType::Other,
    ];
}

/// Spending category. The set is closed so that reports and searches can rely on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Groceries,
    Dining,
    Transport,
    Fuel,
    Shopping,
    Utilities,
    Housing,
    Health,
    Entertainment,
    Travel,
    Subscriptions,
    Insurance,
    Education,
    PersonalCare,
    GiftsDonations,
    FeesCharges,
    Income,
    Transfers,
    Cash,
    Other,
}

serde_plain::derive_display_from_serialize!(Category);
serde_plain::derive_fromstr_from_deserialize!(Category);

impl Category {
    pub const ALL: [Category; 20] = [
        Category::Groceries,
        Category::Dining,
        Category::Transport,
        Category::Fuel,
        Category::Shopping,
        Category::Utilities,
        Category::Housing,
        Category::Health,
        Category::Entertainment,
        Category::Travel,
        Category::Subscriptions,
        Category::Insurance,
        Category::Education,
        Category::PersonalCare,
        Category::GiftsDonations,
        Category::FeesCharges,
        Category::Income,
        Category::Transfers,
        Category::Cash,
        Category::Other,
    ];
}

/// The original amount of a transaction made in another currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForeignAmount {
    pub amount: Amount,
    /// ISO 4217 code, e.g. "EUR".
    pub currency: String,
}

/// Parties and reference of a transfer between accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransferDetails {
    #[serde(default)]
    pub to_account: String,
    #[serde(default)]
    pub from_account: String,
    #[serde(default)]
    pub reference: String,
}

/// Classification output for a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransactionDetails {
    #[serde(rename = "type")]
    pub r#type: TransactionType,

    /// Clean merchant or counterparty name, e.g. "Starbucks" for "STARBUCKS #1234 SEATTLE".
    pub merchant: String,

    /// City or place, when the statement line includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub category: Category,

    /// One short sentence describing the transaction.
    pub description: String,

    /// Masked card number, when the statement line includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,

    /// Text indexed for search. Always derived locally from the other fields.
    #[serde(default)]
    #[schemars(skip)]
    pub search_body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_amount: Option<ForeignAmount>,

    /// Only for transactions of type `transfer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_details: Option<TransferDetails>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A classification that parsed but whose values are not acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError(Vec<String>);

impl ValidationError {
    pub fn problems(&self) -> &[String] {
        &self.0
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

impl TransactionDetails {
    /// Normalizes and validates the model output, then derives `search_body` from `transaction`.
    pub fn finalize(mut self, transaction: &Transaction) -> Result<Self, ValidationError> {
        self.normalize();
        self.validate()?;
        self.search_body = self.derive_search_body(transaction);
        Ok(self)
    }

    /// Trims strings, turns blank optionals into `None`, and lowercases and de-duplicates tags.
    fn normalize(&mut self) {
        self.merchant = self.merchant.trim().to_string();
        self.description = self.description.trim().to_string();
        self.location = non_blank(self.location.take());
        self.card_number = non_blank(self.card_number.take());
        if let Some(foreign) = self.foreign_amount.as_mut() {
            foreign.currency = foreign.currency.trim().to_ascii_uppercase();
        }
        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags.drain(..) {
            let tag = tag.trim().to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        self.tags = tags;
    }

    /// Checks values that the JSON shape alone cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        if self.merchant.is_empty() {
            problems.push("merchant must not be empty".to_string());
        } else if self.merchant.chars().count() > MAX_MERCHANT_LEN {
            problems.push(format!(
                "merchant must be at most {MAX_MERCHANT_LEN} characters"
            ));
        }
        if self.description.is_empty() {
            problems.push("description must not be empty".to_string());
        }
        if let Some(card) = &self.card_number {
            let allowed = card
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '*' | 'x' | 'X' | ' ' | '-'));
            if !allowed || !(4..=23).contains(&card.len()) {
                problems.push(format!(
                    "card_number '{card}' must be a masked card number such as '****1234'"
                ));
            }
        }
        if let Some(foreign) = &self.foreign_amount {
            let currency = &foreign.currency;
            if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
                problems.push(format!(
                    "foreign_amount.currency '{currency}' must be a three letter ISO 4217 code"
                ));
            }
            if foreign.amount.is_zero() {
                problems.push("foreign_amount.amount must not be zero".to_string());
            }
        }
        if self.transfer_details.is_some() && self.r#type != TransactionType::Transfer {
            problems.push(format!(
                "transfer_details is only allowed when type is 'transfer', not '{}'",
                self.r#type
            ));
        }
        if self.tags.len() > MAX_TAGS {
            problems.push(format!("at most {MAX_TAGS} tags are allowed"));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError(problems))
        }
    }

    /// Concatenates everything a person might search for into one string.
    pub(crate) fn derive_search_body(&self, transaction: &Transaction) -> String {
        let mut parts: Vec<String> = vec![
            transaction.payee().to_string(),
            self.merchant.clone(),
            self.description.clone(),
            self.r#type.to_string(),
            self.category.to_string().replace('_', " "),
        ];
        parts.extend(self.location.clone());
        parts.extend(self.tags.iter().cloned());
        if let Some(transfer) = &self.transfer_details {
            parts.extend(
                [&transfer.to_account, &transfer.from_account, &transfer.reference]
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .cloned(),
            );
        }
        if let Some(foreign) = &self.foreign_amount {
            parts.push(foreign.currency.clone());
        }
        parts.push(transaction.bank().to_string());
        parts.retain(|s| !s.trim().is_empty());
        parts.join(" ")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A correction to a stored classification. Fields that are `None` are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DetailsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<TransactionType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    /// Replaces all tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl DetailsUpdate {
    pub fn is_empty(&self) -> bool {
        self.merchant.is_none()
            && self.r#type.is_none()
            && self.category.is_none()
            && self.tags.is_none()
    }

    /// Applies the update and re-derives `search_body`. The result is validated like fresh model
    /// output.
    pub fn apply(
        &self,
        details: &TransactionDetails,
        transaction: &Transaction,
    ) -> Result<TransactionDetails, ValidationError> {
        let mut updated = details.clone();
        if let Some(merchant) = &self.merchant {
            updated.merchant = merchant.clone();
        }
        if let Some(t) = self.r#type {
            updated.r#type = t;
        }
        if updated.r#type != TransactionType::Transfer {
            updated.transfer_details = None;
        }
        if let Some(category) = self.category {
            updated.category = category;
        }
        if let Some(tags) = &self.tags {
            updated.tags = tags.clone();
        }
        updated.finalize(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn transaction() -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            Amount::from_str("-4.50").unwrap(),
            "STARBUCKS #1234 SEATTLE",
            "chase",
        )
    }

    fn details() -> TransactionDetails {
        serde_json::from_value(serde_json::json!({
            "type": "purchase",
            "merchant": " Starbucks ",
            "location": "",
            "category": "dining",
            "description": "Coffee",
            "tags": ["Coffee", "coffee", " morning "],
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_from_model_json() {
        let d = details();
        assert_eq!(d.r#type, TransactionType::Purchase);
        assert_eq!(d.category, Category::Dining);
        assert_eq!(d.search_body, "");
    }

    #[test]
    fn test_unknown_category_does_not_parse() {
        let result: Result<TransactionDetails, _> = serde_json::from_value(serde_json::json!({
            "type": "purchase",
            "merchant": "X",
            "category": "coffee",
            "description": "d",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_finalize_normalizes_and_derives_search_body() {
        let d = details().finalize(&transaction()).unwrap();
        assert_eq!(d.merchant, "Starbucks");
        assert_eq!(d.location, None);
        assert_eq!(d.tags, vec!["coffee".to_string(), "morning".to_string()]);
        assert!(d.search_body.contains("STARBUCKS #1234 SEATTLE"));
        assert!(d.search_body.contains("Starbucks"));
        assert!(d.search_body.contains("dining"));
        assert!(d.search_body.contains("chase"));
    }

    #[test]
    fn test_search_body_replaces_model_value() {
        let mut d = details();
        d.search_body = "whatever the model said".to_string();
        let d = d.finalize(&transaction()).unwrap();
        assert!(!d.search_body.contains("whatever"));
    }

    #[test]
    fn test_validation_collects_problems() {
        let mut d = details();
        d.merchant = "  ".to_string();
        d.card_number = Some("1234-abcd".to_string());
        d.foreign_amount = Some(ForeignAmount {
            amount: Amount::from_str("10").unwrap(),
            currency: "euro".to_string(),
        });
        d.transfer_details = Some(TransferDetails::default());
        let err = d.finalize(&transaction()).unwrap_err();
        assert_eq!(err.problems().len(), 4, "{err}");
        assert!(err.to_string().contains("merchant must not be empty"));
        assert!(err.to_string().contains("transfer_details"));
    }

    #[test]
    fn test_currency_is_uppercased_before_validation() {
        let mut d = details();
        d.foreign_amount = Some(ForeignAmount {
            amount: Amount::from_str("-3.20").unwrap(),
            currency: "eur".to_string(),
        });
        let d = d.finalize(&transaction()).unwrap();
        assert_eq!(d.foreign_amount.unwrap().currency, "EUR");
    }

    #[test]
    fn test_update_applies_and_revalidates() {
        let original = details().finalize(&transaction()).unwrap();
        let update = DetailsUpdate {
            merchant: Some("Starbucks Reserve".to_string()),
            category: Some(Category::Groceries),
            ..Default::default()
        };
        let updated = update.apply(&original, &transaction()).unwrap();
        assert_eq!(updated.merchant, "Starbucks Reserve");
        assert_eq!(updated.category, Category::Groceries);
        assert_eq!(updated.r#type, TransactionType::Purchase);
        assert_ne!(updated.search_body, original.search_body);

        let bad = DetailsUpdate {
            merchant: Some(String::new()),
            ..Default::default()
        };
        assert!(bad.apply(&original, &transaction()).is_err());
    }

    #[test]
    fn test_update_away_from_transfer_drops_transfer_details() {
        let mut original = details();
        original.r#type = TransactionType::Transfer;
        original.category = Category::Transfers;
        original.transfer_details = Some(TransferDetails {
            to_account: "savings".to_string(),
            ..Default::default()
        });
        let original = original.finalize(&transaction()).unwrap();
        assert!(original.transfer_details.is_some());

        let update = DetailsUpdate {
            r#type: Some(TransactionType::Purchase),
            category: Some(Category::Dining),
            ..Default::default()
        };
        let updated = update.apply(&original, &transaction()).unwrap();
        assert_eq!(updated.r#type, TransactionType::Purchase);
        assert_eq!(updated.transfer_details, None);

        let retag = DetailsUpdate {
            tags: Some(vec!["savings".to_string()]),
            ..Default::default()
        };
        let kept = retag.apply(&original, &transaction()).unwrap();
        assert_eq!(kept.transfer_details, original.transfer_details);
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!(Category::PersonalCare.to_string(), "personal_care");
        assert_eq!(Category::from_str("fees_charges").unwrap(), Category::FeesCharges);
        assert_eq!(TransactionType::from_str("refund").unwrap(), TransactionType::Refund);
        assert!(TransactionType::from_str("gift").is_err());
    }

    #[test]
    fn test_schema_omits_search_body() {
        let schema = serde_json::to_value(schemars::schema_for!(TransactionDetails)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("type"));
        assert!(properties.contains_key("merchant"));
        assert!(!properties.contains_key("search_body"));
    }
}
