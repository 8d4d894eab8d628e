use std::sync::Arc;

use boilerbrain_agent::llm::{HttpLlmClient, LlmClient, ResilientLlmClient, RetryPolicy};
use boilerbrain_agent::runtime::ConversationOrchestrator;
use boilerbrain_core::domain::request::DiagnosticRequest;
use boilerbrain_core::errors::DiagnosticError;
use boilerbrain_db::{DiagnosticStore, SqlDiagnosticStore};
use serde_json::json;
use uuid::Uuid;

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

/// Runs one diagnostic turn against the configured store and reasoning model.
pub fn run(session_id: &str, question: &str, show_history: bool) -> CommandResult {
    let correlation_id = Uuid::new_v4().to_string();

    let request = match DiagnosticRequest::new(Some(question), Some(session_id)) {
        Ok(request) => request,
        Err(error) => return failure(&error),
    };
    let config = match load_config("ask") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("ask") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let store: Arc<dyn DiagnosticStore> = Arc::new(SqlDiagnosticStore::new(pool.clone()));

        let llm = HttpLlmClient::from_config(&config.llm)
            .map_err(|error| ("reasoning_unavailable", error.to_string(), 10u8))?;
        let llm: Arc<dyn LlmClient> =
            Arc::new(ResilientLlmClient::new(llm, RetryPolicy::from_config(&config.llm)));

        let outcome = async {
            let orchestrator =
                ConversationOrchestrator::from_config(Arc::clone(&store), llm, &config.diagnostics)?;
            let reply = orchestrator.handle(&request, &correlation_id).await?;
            let history = if show_history {
                store
                    .history(&request.session_id)
                    .await
                    .map_err(|error| DiagnosticError::Store(error.to_string()))?
            } else {
                None
            };
            Ok::<_, DiagnosticError>((reply, history))
        }
        .await;

        pool.close().await;
        outcome.map_err(|error| -> StepFailure {
            (error.error_class(), error.to_string(), exit_code(&error))
        })
    });

    match result {
        Ok((reply, history)) => {
            let message = reply.response.clone();
            let mut data = json!({ "correlation_id": correlation_id, "reply": reply });
            if let Some(history) = history {
                data["history"] = json!(history.turns());
            }
            CommandResult::success_with_data("ask", message, Some(data))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}

fn failure(error: &DiagnosticError) -> CommandResult {
    CommandResult::failure("ask", error.error_class(), error.to_string(), exit_code(error))
}

fn exit_code(error: &DiagnosticError) -> u8 {
    match error.error_class() {
        "validation" => 2,
        "store_unavailable" => 4,
        "decode" => 7,
        "query_rejected" => 8,
        "query_execution" => 9,
        "reasoning_unavailable" => 10,
        "reasoning_timeout" => 11,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use boilerbrain_core::errors::DiagnosticError;

    use super::exit_code;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(exit_code(&DiagnosticError::Validation("x".to_string())), 2);
        assert_eq!(
            exit_code(&DiagnosticError::Decode {
                message: "bad".to_string(),
                raw_output: "raw".to_string()
            }),
            7
        );
        assert_eq!(exit_code(&DiagnosticError::EmptyQuery), 8);
        assert_eq!(exit_code(&DiagnosticError::ReasoningTimeout { timeout_secs: 5 }), 11);
        assert_eq!(exit_code(&DiagnosticError::Store("locked".to_string())), 4);
    }
}
