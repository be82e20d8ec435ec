//! A tool-calling conversation that feeds validation errors back to the model until it produces an
//! acceptable answer.

use crate::api::{ChatModel, ChatRequest, Message, ToolCall, ToolSchema};
use crate::classify::retry::{self, RetryPolicy};
use crate::error::ProviderError;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drives the conversation in `messages` until `validate` accepts a tool call for which
/// `should_stop` returns true.
///
/// Each iteration asks for one completion constrained to `tools`. Transient provider failures
/// inside an iteration are retried according to `retry` and do not use up an iteration. After a
/// rejected call the conversation gets the call, an error result, and a user message quoting the
/// rejected arguments verbatim along with the reason. After an accepted call that is not final the
/// conversation gets the call and the accepted value as its result.
///
/// # Errors
/// - `ProviderError::Cancelled` as soon as `cancel` fires.
/// - `ProviderError::IterationsExhausted` wrapping the last problem if no acceptable final call
///   arrives within `max_iterations`.
/// - Any terminal provider error, or `RetriesExhausted`, from a completion.
#[allow(clippy::too_many_arguments)]
pub async fn run_loop<T, V, S>(
    model: &dyn ChatModel,
    mut messages: Vec<Message>,
    tools: &[ToolSchema],
    validate: V,
    should_stop: S,
    max_iterations: usize,
    cancel: &CancellationToken,
    retry: &RetryPolicy,
) -> Result<T, ProviderError>
where
    T: Serialize,
    V: Fn(&ToolCall) -> Result<T, String>,
    S: Fn(&T) -> bool,
{
    let max_iterations = max_iterations.max(1);
    let mut last_problem: Option<ProviderError> = None;

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let request = ChatRequest {
            messages: messages.clone(),
            tools: tools.to_vec(),
            json_mode: false,
        };
        let response = retry::run(retry, "agent completion", cancel, |_| {
            model.complete(&request)
        })
        .await?;

        let Some(call) = response.tool_calls.into_iter().next() else {
            debug!(iteration, "response contained no tool call");
            if let Some(content) = response.content {
                messages.push(Message::assistant(content));
            }
            messages.push(Message::user(missing_call_correction(tools)));
            last_problem = Some(ProviderError::Malformed(
                "the response contained no tool call".to_string(),
            ));
            continue;
        };

        let outcome = if tools.iter().any(|t| t.name == call.name) {
            validate(&call)
        } else {
            Err(format!("there is no tool named '{}'", call.name))
        };

        match outcome {
            Ok(value) if should_stop(&value) => {
                debug!(iteration, "tool call accepted");
                return Ok(value);
            }
            Ok(value) => {
                let result = serde_json::to_string(&value)
                    .map_err(|e| ProviderError::Malformed(e.to_string()))?;
                messages.push(Message::assistant_tool_call(call.clone()));
                messages.push(Message::tool_result(call.id, result));
            }
            Err(problem) => {
                warn!(iteration, tool = %call.name, "tool call rejected: {problem}");
                let correction = correction(&call, &problem);
                messages.push(Message::assistant_tool_call(call.clone()));
                messages.push(Message::tool_result(call.id, format!("Error: {problem}")));
                messages.push(Message::user(correction));
                last_problem = Some(ProviderError::Validation(problem));
            }
        }
    }

    Err(ProviderError::IterationsExhausted {
        iterations: max_iterations,
        source: Box::new(last_problem.unwrap_or_else(|| {
            ProviderError::Malformed("the conversation did not reach a final answer".to_string())
        })),
    })
}

/// The arguments exactly as the model sent them.
fn verbatim(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

fn correction(call: &ToolCall, problem: &str) -> String {
    format!(
        "Your previous call to `{name}` used these arguments:\n{args}\n\n\
         It was rejected: {problem}\n\n\
         Call `{name}` again and use only the allowed values.",
        name = call.name,
        args = verbatim(&call.arguments),
    )
}

fn missing_call_correction(tools: &[ToolSchema]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "You must answer by calling one of these tools: {}.",
        names.join(", ")
    )
}
