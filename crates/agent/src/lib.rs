//! Reasoning side of BoilerBrain.
//!
//! One diagnostic turn flows through these pieces in order:
//! 1. **Prompt** (`prompt`) - history, context and schema description rendered
//!    into the diagnostic workflow template
//! 2. **Reasoning** (`llm`) - the configured model, behind timeout and retry
//! 3. **Decision** (`decision`) - the model's reply decoded into a
//!    `WorkflowDecision`
//! 4. **Query guard** (`guardrails`) - generated SQL checked before it runs
//! 5. **Orchestration** (`runtime`) - acting on the decision and persisting the
//!    turn atomically
//!
//! # Safety Principle
//!
//! The model only proposes. Generated SQL is guarded before it runs read-only
//! against allow-listed tables, and anything the model returns that is not a
//! decision object is reported, never guessed at.

pub mod decision;
pub mod guardrails;
pub mod llm;
pub mod prompt;
pub mod runtime;

pub use decision::DecisionParser;
pub use guardrails::{GuardrailDecision, QueryGuard};
pub use llm::{HttpLlmClient, LlmClient, LlmError, ResilientLlmClient, RetryPolicy, ScriptedLlmClient};
pub use prompt::{PromptBuilder, PromptError, PromptInput};
pub use runtime::{ConversationOrchestrator, OrchestratorSettings};
