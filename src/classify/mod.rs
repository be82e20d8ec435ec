//! Turns a raw `Transaction` into validated `TransactionDetails` using a `ChatModel`.
//!
//! Two strategies are available. `Strategy::Json` asks for a JSON object in one completion per
//! attempt. `Strategy::Agent` offers a tool whose arguments are the details and lets the model
//! correct itself when validation fails.

pub mod agent;
pub mod retry;

use crate::api::{ChatModel, ChatRequest, Message, ToolCall, ToolSchema};
use crate::config::{ClassifierConfig, StrategyKind};
use crate::error::ProviderError;
use crate::model::{Category, Transaction, TransactionDetails, TransactionType};
use retry::RetryPolicy;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const TOOL_NAME: &str = "record_classification";
const TOOL_DESCRIPTION: &str = "Record the classification of the bank transaction.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Json,
    Agent { max_iterations: usize },
}

pub struct Classifier {
    model: Arc<dyn ChatModel>,
    strategy: Strategy,
    retry: RetryPolicy,
    tool: ToolSchema,
}

impl Classifier {
    pub fn new(model: Arc<dyn ChatModel>, strategy: Strategy) -> Self {
        Self {
            model,
            strategy,
            retry: RetryPolicy::default(),
            tool: ToolSchema::for_type::<TransactionDetails>(TOOL_NAME, TOOL_DESCRIPTION),
        }
    }

    pub fn from_config(model: Arc<dyn ChatModel>, config: &ClassifierConfig) -> Self {
        let strategy = match config.strategy {
            StrategyKind::Json => Strategy::Json,
            StrategyKind::Agent => Strategy::Agent {
                max_iterations: config.max_iterations,
            },
        };
        Self::new(model, strategy)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Classifies one transaction.
    ///
    /// # Errors
    /// - `Validation` if the model produced well-formed but unacceptable details (JSON strategy).
    /// - `RetriesExhausted` if transient failures or unparseable responses used up all attempts.
    /// - `IterationsExhausted` if the agent never produced acceptable details.
    /// - `Cancelled` if `cancel` fired.
    pub async fn classify(
        &self,
        transaction: &Transaction,
        cancel: &CancellationToken,
    ) -> Result<TransactionDetails, ProviderError> {
        let messages = vec![
            Message::system(system_prompt()),
            Message::user(user_prompt(transaction)),
        ];
        match self.strategy {
            Strategy::Json => self.classify_json(transaction, messages, cancel).await,
            Strategy::Agent { max_iterations } => {
                agent::run_loop(
                    self.model.as_ref(),
                    messages,
                    std::slice::from_ref(&self.tool),
                    |call: &ToolCall| validate_call(call, transaction),
                    |_| true,
                    max_iterations,
                    cancel,
                    &self.retry,
                )
                .await
            }
        }
    }

    async fn classify_json(
        &self,
        transaction: &Transaction,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<TransactionDetails, ProviderError> {
        let request = ChatRequest {
            messages,
            tools: Vec::new(),
            json_mode: true,
        };
        let id = transaction.id();
        let details = retry::run(&self.retry, "classify", cancel, |_| async {
            let response = self.model.complete(&request).await?;
            let content = response
                .content
                .ok_or_else(|| ProviderError::Malformed("the response was empty".to_string()))?;
            parse_details(&content)
        })
        .await?;
        tracing::trace!(id = %id, "classification parsed");
        details
            .finalize(transaction)
            .map_err(|e| ProviderError::Validation(e.to_string()))
    }
}

/// Parses model output into details. Code fences and text around the JSON object are ignored.
fn parse_details(content: &str) -> Result<TransactionDetails, ProviderError> {
    let json = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    };
    serde_json::from_str(json).map_err(|e| ProviderError::Malformed(e.to_string()))
}

fn validate_call(call: &ToolCall, transaction: &Transaction) -> Result<TransactionDetails, String> {
    let details: TransactionDetails =
        serde_json::from_value(call.arguments.clone()).map_err(|e| e.to_string())?;
    details.finalize(transaction).map_err(|e| e.to_string())
}

fn system_prompt() -> String {
    let types: Vec<String> = TransactionType::ALL.iter().map(|t| t.to_string()).collect();
    let categories: Vec<String> = Category::ALL.iter().map(|c| c.to_string()).collect();
    format!(
        "You classify bank statement lines. Answer with a JSON object with the fields \
         type, merchant, location, category, description, card_number, foreign_amount, \
         transfer_details and tags.\n\
         type must be one of: {}.\n\
         category must be one of: {}.\n\
         merchant is the clean business or counterparty name. description is one short \
         sentence. Omit optional fields that do not apply.",
        types.join(", "),
        categories.join(", "),
    )
}

fn user_prompt(transaction: &Transaction) -> String {
    let value = json!({
        "date": transaction.date().format("%Y-%m-%d").to_string(),
        "amount": transaction.amount(),
        "payee": transaction.payee(),
        "bank": transaction.bank(),
    });
    format!("Classify this transaction:\n{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatResponse, TestModel};
    use crate::model::Amount;
    use crate::test::ScriptedModel;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn transaction() -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
            Amount::from_str("-52.10").unwrap(),
            "SHELL OIL 5744 AUSTIN TX",
            "chase",
        )
    }

    fn content(value: serde_json::Value) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: Some(value.to_string()),
            tool_calls: Vec::new(),
        })
    }

    fn valid() -> serde_json::Value {
        json!({
            "type": "purchase",
            "merchant": "Shell",
            "category": "fuel",
            "description": "Fuel at Shell",
            "search_body": "ignored",
        })
    }

    fn classifier(model: Arc<dyn ChatModel>, strategy: Strategy) -> Classifier {
        Classifier::new(model, strategy).with_retry(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_json_strategy_with_test_model() {
        let c = classifier(Arc::new(TestModel), Strategy::Json);
        let details = c
            .classify(&transaction(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(details.category, Category::Fuel);
        assert_eq!(details.r#type, TransactionType::Purchase);
        assert!(details.search_body.contains("SHELL OIL"));
    }

    #[tokio::test]
    async fn test_agent_strategy_with_test_model() {
        let c = classifier(Arc::new(TestModel), Strategy::Agent { max_iterations: 3 });
        let details = c
            .classify(&transaction(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(details.merchant, "Shell Oil");
    }

    #[tokio::test]
    async fn test_malformed_then_valid_is_retried() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(ChatResponse {
                content: Some("Sure! Here you go".to_string()),
                tool_calls: Vec::new(),
            }),
            content(valid()),
        ]));
        let c = classifier(model.clone(), Strategy::Json);
        let details = c
            .classify(&transaction(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(details.merchant, "Shell");
        assert_ne!(details.search_body, "ignored");
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_is_terminal() {
        let mut invalid = valid();
        invalid["merchant"] = json!("");
        let model = Arc::new(ScriptedModel::new(vec![content(invalid), content(valid())]));
        let c = classifier(model.clone(), Strategy::Json);
        let err = c
            .classify(&transaction(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)), "{err}");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_agent_corrects_invalid_category() {
        let bad = ChatResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "c1".to_string(),
                name: TOOL_NAME.to_string(),
                arguments: json!({
                    "type": "purchase",
                    "merchant": "Shell",
                    "category": "gasoline",
                    "description": "Fuel",
                }),
            }],
        };
        let model = Arc::new(ScriptedModel::new(vec![Ok(bad)]));
        let c = classifier(model.clone(), Strategy::Agent { max_iterations: 2 });
        let details = c
            .classify(&transaction(), &CancellationToken::new())
            .await
            .unwrap();
        // The script is exhausted after the bad call, so the correction is answered by TestModel.
        assert_eq!(details.category, Category::Fuel);
        let correction = &model.requests()[1].messages[4].content;
        assert!(correction.contains("gasoline"), "{correction}");
    }

    #[test]
    fn test_parse_details_ignores_fences() {
        let wrapped = format!("```json\n{}\n```", valid());
        assert!(parse_details(&wrapped).is_ok());
        assert!(matches!(
            parse_details("no json here"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompts_list_allowed_values_and_transaction() {
        let system = system_prompt();
        assert!(system.contains("personal_care"));
        assert!(system.contains("withdrawal"));
        let user = user_prompt(&transaction());
        assert!(user.contains("\"payee\":\"SHELL OIL 5744 AUSTIN TX\""));
        assert!(user.contains("\"amount\":\"-52.10\""));
    }
}
