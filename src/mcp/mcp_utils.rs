//! Converts command results into MCP tool results.
//!
//! A failed command becomes a tool error whose text starts with the error type, e.g.
//! `request: There is no transaction with ID 00000000`, so that an agent can tell a bad argument
//! from a provider or database failure.

use crate::commands::Out;
use crate::Error;
use rmcp::model::{CallToolResult, Content};
use rmcp::ErrorData;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{error, warn};

/// The human readable message first, then the structure as JSON when there is one.
fn success_content<T>(out: Out<T>) -> Vec<Content>
where
    T: Debug + Clone + Serialize,
{
    let mut content = vec![Content::text(out.message())];
    if let Some(structure) = out.structure() {
        match Content::json(structure) {
            Ok(json) => content.push(json),
            Err(e) => error!("Unable to serialize the tool result as JSON: {e}"),
        }
    }
    content
}

fn error_text(e: &Error) -> String {
    format!("{}: {e}", e.error_type())
}

pub(super) fn tool_result<T>(result: crate::Result<Out<T>>) -> Result<CallToolResult, ErrorData>
where
    T: Debug + Clone + Serialize,
{
    Ok(match result {
        Ok(out) => CallToolResult::success(success_content(out)),
        Err(e) => {
            warn!(error_type = %e.error_type(), "MCP tool failed: {e}");
            CallToolResult::error(vec![Content::text(error_text(&e))])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;

    fn texts(result: &CallToolResult) -> Vec<String> {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[test]
    fn test_error_text_is_tagged_with_error_type() {
        let result: crate::Result<Out<String>> = Err(Error::new(
            ErrorType::Provider,
            anyhow::anyhow!("the embedding endpoint timed out"),
        ));
        let result = tool_result(result).unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            texts(&result),
            vec!["provider: the embedding endpoint timed out".to_string()]
        );
    }

    #[test]
    fn test_success_carries_message_and_structure() {
        let out = Out::new("Found 1 transaction", vec!["3fa94c1e".to_string()]);
        let result = tool_result(Ok(out)).unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.content.len(), 2);
        assert_eq!(texts(&result)[0], "Found 1 transaction");
    }
}
