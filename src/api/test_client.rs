//! Deterministic offline providers.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the
//! whole app, top-to-bottom, without a model server. Set `SPENDLENS_IN_TEST_MODE` to use them.

use crate::api::{ChatModel, ChatRequest, ChatResponse, Embedder, Role, ToolCall};
use crate::error::ProviderError;
use crate::model::{Amount, Category, TransactionType};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

const TEST_MODEL: &str = "test-model";
const TEST_EMBEDDER: &str = "test-embedder";
pub const TEST_DIMENSIONS: usize = 256;

/// Payee keywords and the category they imply. The first match wins.
const KEYWORDS: &[(&[&str], Category)] = &[
    (&["refund", "return"], Category::Shopping),
    (&["payroll", "salary", "direct dep"], Category::Income),
    (&["transfer", "zelle", "venmo"], Category::Transfers),
    (&["atm", "cash withdrawal"], Category::Cash),
    (&["starbucks", "coffee", "cafe", "restaurant", "pizza", "mcdonald", "chipotle"], Category::Dining),
    (&["whole foods", "grocery", "safeway", "trader joe", "kroger", "market"], Category::Groceries),
    (&["shell", "chevron", "exxon", "fuel", "gas station"], Category::Fuel),
    (&["uber", "lyft", "transit", "metro", "parking"], Category::Transport),
    (&["netflix", "spotify", "hulu", "subscription"], Category::Subscriptions),
    (&["amazon", "target", "walmart", "costco"], Category::Shopping),
    (&["electric", "water", "comcast", "verizon", "utility"], Category::Utilities),
    (&["rent", "mortgage"], Category::Housing),
    (&["pharmacy", "cvs", "walgreens", "clinic"], Category::Health),
    (&["airline", "hotel", "airbnb", "delta", "united"], Category::Travel),
    (&["cinema", "theater", "steam"], Category::Entertainment),
    (&["insurance", "geico"], Category::Insurance),
    (&["fee", "charge", "interest"], Category::FeesCharges),
];

/// A classifier that inspects the payee with a keyword table. It reads the transaction from the
/// JSON object embedded in the first user message and answers with a tool call when tools are
/// offered, otherwise with JSON content.
#[derive(Debug, Default, Clone)]
pub struct TestModel;

#[derive(Deserialize)]
struct PromptTransaction {
    payee: String,
    amount: Amount,
}

#[async_trait::async_trait]
impl ChatModel for TestModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let transaction = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .and_then(|m| embedded_json(&m.content));
        let Some(transaction) = transaction else {
            return Ok(ChatResponse {
                content: Some("I could not find a transaction to classify.".to_string()),
                tool_calls: Vec::new(),
            });
        };
        let details = classify(&transaction);
        match request.tools.first() {
            Some(tool) => Ok(ChatResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_0".to_string(),
                    name: tool.name.clone(),
                    arguments: details,
                }],
            }),
            None => Ok(ChatResponse {
                content: Some(details.to_string()),
                tool_calls: Vec::new(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        TEST_MODEL
    }
}

fn embedded_json(content: &str) -> Option<PromptTransaction> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    serde_json::from_str(content.get(start..=end)?).ok()
}

fn classify(transaction: &PromptTransaction) -> serde_json::Value {
    let payee = transaction.payee.to_lowercase();
    let category = KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|w| payee.contains(w)))
        .map(|(_, c)| *c)
        .unwrap_or(Category::Other);
    let r#type = if payee.contains("refund") || payee.contains("return") {
        TransactionType::Refund
    } else if payee.contains("interest") {
        TransactionType::Interest
    } else {
        match category {
            Category::Transfers => TransactionType::Transfer,
            Category::FeesCharges => TransactionType::Fee,
            Category::Cash => TransactionType::Withdrawal,
            Category::Income => TransactionType::Deposit,
            _ if transaction.amount.is_negative() => TransactionType::Purchase,
            _ => TransactionType::Credit,
        }
    };
    let merchant = merchant_name(&transaction.payee);
    json!({
        "type": r#type,
        "merchant": merchant,
        "category": category,
        "description": format!("{} at {}", r#type, merchant),
    })
}

/// "STARBUCKS #1234 SEATTLE WA" becomes "Starbucks".
fn merchant_name(payee: &str) -> String {
    let words: Vec<String> = payee
        .split_whitespace()
        .take_while(|w| !w.starts_with('#') && !w.chars().any(|c| c.is_ascii_digit()))
        .take(2)
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        payee.trim().to_string()
    } else {
        words.join(" ")
    }
}

/// Hashed bag-of-words embeddings. Texts that share words have positive cosine similarity.
#[derive(Debug, Default, Clone)]
pub struct TestEmbedder;

#[async_trait::async_trait]
impl Embedder for TestEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(bag_of_words(text))
    }

    fn model_name(&self) -> &str {
        TEST_EMBEDDER
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; TEST_DIMENSIONS];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let index = u16::from_be_bytes([digest[0], digest[1]]) as usize % TEST_DIMENSIONS;
        vector[index] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}
