//! The diagnostic turn, end to end.
//!
//! A turn runs in two phases. The read phase snapshots the session history
//! and the schema description without holding a transaction, so the slow
//! reasoning call never keeps the store locked. The write phase opens one
//! transaction for session creation, the knowledge query and the history
//! write, and commits only when every step succeeded. Turns for the same
//! session are serialized, which keeps the snapshot equal to what the write
//! phase loads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Map;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use boilerbrain_core::config::DiagnosticsConfig;
use boilerbrain_core::domain::decision::WorkflowDecision;
use boilerbrain_core::domain::request::{DiagnosticReply, DiagnosticRequest, NO_QUERY_SENTINEL};
use boilerbrain_core::domain::session::{SessionId, Turn};
use boilerbrain_core::errors::DiagnosticError;
use boilerbrain_core::flows::{RequestAction, RequestEvent, RequestFlow, RequestState};
use boilerbrain_core::format::{
    References, ResponseFormatter, CLARIFY_REPLY, NO_MATCH_REPLY, NO_QUERY_REPLY,
};
use boilerbrain_core::rewrite::QueryRewriter;
use boilerbrain_db::{DiagnosticStore, QueryError, StoreTransaction};

use crate::decision::DecisionParser;
use crate::guardrails::QueryGuard;
use crate::llm::LlmClient;
use crate::prompt::{PromptBuilder, PromptInput};

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub included_tables: Vec<String>,
    pub sample_rows: usize,
    pub query_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &DiagnosticsConfig) -> Self {
        Self {
            included_tables: config.included_tables.clone(),
            sample_rows: config.sample_rows_in_table_info as usize,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        }
    }
}

/// One async mutex per session id. Idle entries are pruned on the next
/// lookup.
#[derive(Default)]
struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    fn lock_for(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(session_id.as_str().to_string()).or_default())
    }
}

/// Reply text plus the query that produced it, if any ran.
struct ActOutcome {
    response: String,
    sql_query: Option<String>,
}

pub struct ConversationOrchestrator {
    store: Arc<dyn DiagnosticStore>,
    llm: Arc<dyn LlmClient>,
    prompts: PromptBuilder,
    parser: DecisionParser,
    rewriter: QueryRewriter,
    guard: QueryGuard,
    formatter: ResponseFormatter,
    flow: RequestFlow,
    settings: OrchestratorSettings,
    session_locks: SessionLocks,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn DiagnosticStore>,
        llm: Arc<dyn LlmClient>,
        prompts: PromptBuilder,
        rewriter: QueryRewriter,
        settings: OrchestratorSettings,
    ) -> Self {
        let guard = QueryGuard::new(&settings.included_tables);
        Self {
            store,
            llm,
            prompts,
            parser: DecisionParser,
            rewriter,
            guard,
            formatter: ResponseFormatter,
            flow: RequestFlow,
            settings,
            session_locks: SessionLocks::default(),
        }
    }

    pub fn from_config(
        store: Arc<dyn DiagnosticStore>,
        llm: Arc<dyn LlmClient>,
        config: &DiagnosticsConfig,
    ) -> Result<Self, DiagnosticError> {
        let rewriter =
            QueryRewriter::new(config.rewrite_rules.clone()).map_err(DiagnosticError::Validation)?;
        let prompts = PromptBuilder::new()?;
        Ok(Self::new(store, llm, prompts, rewriter, OrchestratorSettings::from_config(config)))
    }

    /// Allow-listed tables that exist in the store.
    pub async fn table_names(&self) -> Result<Vec<String>, DiagnosticError> {
        Ok(self.store.table_names(&self.settings.included_tables).await?)
    }

    /// Runs one diagnostic turn. On any failure nothing is persisted and the
    /// session history is exactly what it was before the call.
    pub async fn handle(
        &self,
        request: &DiagnosticRequest,
        correlation_id: &str,
    ) -> Result<DiagnosticReply, DiagnosticError> {
        let session_id = request.session_id.as_str();
        let lock = self.session_locks.lock_for(&request.session_id);
        let _turn = lock.lock().await;

        info!(
            event_name = "diagnostic.request.received",
            correlation_id,
            session_id,
            "diagnostic request received"
        );

        let mut state = self.flow.initial_state();
        match self.run(request, correlation_id, &mut state).await {
            Ok(reply) => {
                info!(
                    event_name = "diagnostic.request.persisted",
                    correlation_id,
                    session_id,
                    action = %reply.action,
                    ran_query = reply.ran_query(),
                    "diagnostic turn persisted"
                );
                Ok(reply)
            }
            Err(error) => {
                let stage_failed =
                    RequestEvent::StageFailed { stage: error.error_class().to_string() };
                if let Ok(outcome) = self.flow.apply(&state, &stage_failed) {
                    state = outcome.to;
                }
                warn!(
                    event_name = "diagnostic.request.failed",
                    correlation_id,
                    session_id,
                    error_class = error.error_class(),
                    state = ?state,
                    error = %error,
                    "diagnostic turn failed"
                );
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &DiagnosticRequest,
        correlation_id: &str,
        state: &mut RequestState,
    ) -> Result<DiagnosticReply, DiagnosticError> {
        let session_id = &request.session_id;
        let user_turn = Turn::user(request.question.as_str());

        let mut prompt_history = self.store.history(session_id).await?.unwrap_or_default();
        prompt_history.push(user_turn.clone());
        let table_info =
            self.store.table_info(&self.settings.included_tables, self.settings.sample_rows).await?;

        let prompt = self.prompts.build(PromptInput {
            history: &prompt_history,
            context: &Map::new(),
            table_info: &table_info,
            question: &request.question,
        })?;

        let raw_output = self.llm.complete(&prompt).await?;
        debug!(
            event_name = "diagnostic.reasoning.completed",
            correlation_id,
            raw_output = %raw_output,
            "reasoning output received"
        );

        let decision = match self.parser.parse(&raw_output) {
            Ok(decision) => decision,
            Err(error) => {
                warn!(
                    event_name = "diagnostic.decision.undecodable",
                    correlation_id,
                    raw_output = %raw_output,
                    "reasoning output is not a decision object"
                );
                return Err(error);
            }
        };

        let acting = self
            .flow
            .apply(state, &RequestEvent::DecisionParsed { action: decision.action.clone() })?;
        *state = acting.to.clone();
        info!(
            event_name = "diagnostic.decision.parsed",
            correlation_id,
            session_id = session_id.as_str(),
            action = decision.action.as_str(),
            context_keys = decision.context_update.len(),
            "decision parsed"
        );

        let mut tx = self.store.begin().await?;
        let written = self
            .write_phase(tx.as_mut(), session_id, user_turn, &decision, &acting.actions, correlation_id)
            .await;
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(
                        event_name = "diagnostic.request.rollback_failed",
                        correlation_id,
                        error = %rollback_error,
                        "rollback failed"
                    );
                }
                return Err(error);
            }
        };
        tx.commit().await?;

        let persisted = self.flow.apply(state, &RequestEvent::ReplyCommitted)?;
        *state = persisted.to;

        Ok(DiagnosticReply {
            response: outcome.response,
            sql_query: outcome.sql_query.unwrap_or_else(|| NO_QUERY_SENTINEL.to_string()),
            session_id: session_id.as_str().to_string(),
            manual_link: decision.manual_link,
            regulation_ref: decision.regulation_ref,
            action: decision.action.as_str().to_string(),
        })
    }

    /// Loads first so the session row exists and the write lock is taken
    /// before the knowledge query runs.
    async fn write_phase(
        &self,
        tx: &mut dyn StoreTransaction,
        session_id: &SessionId,
        user_turn: Turn,
        decision: &WorkflowDecision,
        actions: &[RequestAction],
        correlation_id: &str,
    ) -> Result<ActOutcome, DiagnosticError> {
        let history_before = tx.load(session_id).await?;
        let outcome = self.act(tx, decision, actions, correlation_id).await?;
        tx.append_and_save(
            session_id,
            history_before,
            vec![user_turn, Turn::assistant(outcome.response.as_str())],
        )
        .await?;
        Ok(outcome)
    }

    async fn act(
        &self,
        tx: &mut dyn StoreTransaction,
        decision: &WorkflowDecision,
        actions: &[RequestAction],
        correlation_id: &str,
    ) -> Result<ActOutcome, DiagnosticError> {
        let references = References {
            manual_link: &decision.manual_link,
            regulation_ref: &decision.regulation_ref,
        };

        let response = match actions {
            [RequestAction::ReplyVerbatim] => decision.response.clone(),
            [RequestAction::RewriteAndExecuteQuery] => {
                return self.execute_query(tx, decision, references, correlation_id).await;
            }
            [RequestAction::AnnotateReasoning] => {
                self.formatter.format_reasoning(&decision.response, references)
            }
            _ if decision.response.is_empty() => CLARIFY_REPLY.to_string(),
            _ => decision.response.clone(),
        };
        Ok(ActOutcome { response, sql_query: None })
    }

    async fn execute_query(
        &self,
        tx: &mut dyn StoreTransaction,
        decision: &WorkflowDecision,
        references: References<'_>,
        correlation_id: &str,
    ) -> Result<ActOutcome, DiagnosticError> {
        let Some(generated) = decision.query_text() else {
            return Ok(ActOutcome { response: NO_QUERY_REPLY.to_string(), sql_query: None });
        };

        let sql = self.rewriter.rewrite(generated);
        self.guard.check(&sql)?;

        let row = match tx.first_row(&sql, self.settings.query_timeout).await {
            Ok(row) => row,
            Err(QueryError::Empty) => {
                return Ok(ActOutcome { response: NO_QUERY_REPLY.to_string(), sql_query: None });
            }
            Err(error) => return Err(error.into()),
        };
        info!(
            event_name = "diagnostic.query.executed",
            correlation_id,
            matched = row.is_some(),
            rewritten = sql != generated,
            "knowledge query executed"
        );

        let response = match row {
            Some(row) => self.formatter.format_finding(&row, references),
            None if decision.response.is_empty() => NO_MATCH_REPLY.to_string(),
            None => decision.response.clone(),
        };
        Ok(ActOutcome { response, sql_query: Some(sql) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use boilerbrain_core::config::AppConfig;
    use boilerbrain_core::domain::finding::QueryResultRow;
    use boilerbrain_core::domain::request::DiagnosticRequest;
    use boilerbrain_core::domain::session::{Role, SessionId};
    use boilerbrain_core::errors::DiagnosticError;
    use boilerbrain_core::format::{CLARIFY_REPLY, NO_MATCH_REPLY, NO_QUERY_REPLY};
    use boilerbrain_db::{DiagnosticStore, FailurePoint, InMemoryDiagnosticStore, MemoryTable};

    use super::ConversationOrchestrator;
    use crate::llm::{LlmClient, LlmError, ScriptedLlmClient};

    const HIT_QUERY: &str = "SELECT bf.description, bf.solutions FROM boiler_fault_codes bf WHERE bf.model = 'Logic Combi 30' AND bf.fault_code = 'F1'";

    fn orchestrator(
        store: &InMemoryDiagnosticStore,
        llm: Arc<ScriptedLlmClient>,
    ) -> ConversationOrchestrator {
        let store: Arc<dyn DiagnosticStore> = Arc::new(store.clone());
        let llm: Arc<dyn LlmClient> = llm;
        ConversationOrchestrator::from_config(store, llm, &AppConfig::default().diagnostics)
            .expect("default diagnostics config is valid")
    }

    fn request(session: &str, question: &str) -> DiagnosticRequest {
        DiagnosticRequest::new(Some(question), Some(session)).expect("valid request")
    }

    fn pump_fault() -> QueryResultRow {
        let fields: BTreeMap<String, Value> = [
            ("description".to_string(), json!("Pump fault")),
            ("solutions".to_string(), json!(["Check pump", "Check pressure"])),
        ]
        .into_iter()
        .collect();
        QueryResultRow::from_fields(fields)
    }

    fn decision(value: Value) -> String {
        value.to_string()
    }

    async fn history_of(store: &InMemoryDiagnosticStore, session: &str) -> Vec<(Role, String)> {
        let id = SessionId::parse(session).expect("session id");
        store
            .history(&id)
            .await
            .expect("history")
            .map(|history| {
                history.turns().iter().map(|turn| (turn.role, turn.content.clone())).collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn ask_replies_verbatim_and_persists_both_turns() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::replying([decision(json!({
            "action": "ask",
            "response": "What type of heating system?",
            "context_update": {},
            "sql_query": "",
            "manual_link": "",
            "regulation_ref": ""
        }))]));
        let orchestrator = orchestrator(&store, Arc::clone(&llm));

        let reply = orchestrator
            .handle(&request("s1", "Boiler not heating"), "corr-1")
            .await
            .expect("ask turn");

        assert_eq!(reply.response, "What type of heating system?");
        assert_eq!(reply.sql_query, "N/A");
        assert_eq!(reply.action, "ask");
        assert_eq!(reply.session_id, "s1");
        assert!(store.executed_queries().await.is_empty());
        assert_eq!(
            history_of(&store, "s1").await,
            vec![
                (Role::User, "Boiler not heating".to_string()),
                (Role::Assistant, "What type of heating system?".to_string()),
            ]
        );

        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Boiler not heating"));
    }

    #[tokio::test]
    async fn query_hit_is_formatted_with_the_manual_annotation() {
        let store = InMemoryDiagnosticStore::default();
        store.push_query_result(Some(pump_fault())).await;
        let llm = Arc::new(ScriptedLlmClient::replying([format!(
            "```json\n{}\n```",
            decision(json!({
                "action": "query",
                "response": "",
                "sql_query": HIT_QUERY,
                "manual_link": "http://x/manual.pdf"
            }))
        )]));
        let orchestrator = orchestrator(&store, llm);

        let reply =
            orchestrator.handle(&request("s2", "Ideal Logic F1"), "corr-2").await.expect("query turn");

        assert_eq!(
            reply.response,
            "Pump fault\n\nRecommended steps:\n- Check pump\n- Check pressure\n\n\u{1f4d6} Manual: http://x/manual.pdf"
        );
        let rewritten = HIT_QUERY.replace(".model =", ".model_name =");
        assert_eq!(reply.sql_query, rewritten);
        assert_eq!(store.executed_queries().await, vec![rewritten]);
        assert_eq!(reply.manual_link, "http://x/manual.pdf");
        assert_eq!(history_of(&store, "s2").await[1].1, reply.response);
    }

    #[tokio::test]
    async fn query_without_rows_falls_back_to_the_model_or_a_default() {
        let store = InMemoryDiagnosticStore::default();
        store.push_query_result(None).await;
        store.push_query_result(None).await;
        let llm = Arc::new(ScriptedLlmClient::replying([
            decision(json!({"action": "query", "response": "", "sql_query": HIT_QUERY})),
            decision(json!({
                "action": "query",
                "response": "Likely a seized pump.",
                "sql_query": HIT_QUERY
            })),
        ]));
        let orchestrator = orchestrator(&store, llm);

        let first = orchestrator.handle(&request("s3", "F1"), "corr-3a").await.expect("no rows");
        assert_eq!(first.response, NO_MATCH_REPLY);
        assert!(first.ran_query());

        let second = orchestrator.handle(&request("s3", "F1 again"), "corr-3b").await.expect("no rows");
        assert_eq!(second.response, "Likely a seized pump.");
    }

    #[tokio::test]
    async fn query_without_text_is_answered_not_failed() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::replying([decision(
            json!({"action": "query", "response": "", "sql_query": "   "}),
        )]));
        let orchestrator = orchestrator(&store, llm);

        let reply = orchestrator.handle(&request("s4", "F1"), "corr-4").await.expect("empty query");
        assert_eq!(reply.response, NO_QUERY_REPLY);
        assert_eq!(reply.sql_query, "N/A");
        assert!(store.executed_queries().await.is_empty());
        assert_eq!(history_of(&store, "s4").await.len(), 2);
    }

    #[tokio::test]
    async fn fallback_reasoning_gets_annotations_only() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::replying([decision(json!({
            "action": "fallback_reasoning",
            "response": "Check the condensate trap.",
            "regulation_ref": "GSIUR Reg 26(9)"
        }))]));
        let orchestrator = orchestrator(&store, llm);

        let reply = orchestrator.handle(&request("s5", "flue smells"), "corr-5").await.expect("reasoning");
        assert_eq!(
            reply.response,
            "Check the condensate trap.\n\n\u{26a0}\u{fe0f} Gas Safety Regulation: GSIUR Reg 26(9)"
        );
        assert_eq!(reply.action, "fallback_reasoning");
    }

    #[tokio::test]
    async fn unknown_action_with_empty_response_asks_for_clarification() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::replying([
            decision(json!({"action": "escalate", "response": ""})),
            decision(json!({"action": "escalate", "response": "Call the manufacturer."})),
        ]));
        let orchestrator = orchestrator(&store, llm);

        let first = orchestrator.handle(&request("s6", "help"), "corr-6a").await.expect("unknown");
        assert_eq!(first.response, CLARIFY_REPLY);
        assert_eq!(first.action, "escalate");

        let second = orchestrator.handle(&request("s6", "help"), "corr-6b").await.expect("unknown");
        assert_eq!(second.response, "Call the manufacturer.");
    }

    #[tokio::test]
    async fn undecodable_output_fails_with_the_raw_text_and_persists_nothing() {
        let store = InMemoryDiagnosticStore::default();
        let raw = "I think it's the pump, honestly.";
        let llm = Arc::new(ScriptedLlmClient::replying([raw]));
        let orchestrator = orchestrator(&store, llm);

        let error = orchestrator.handle(&request("s7", "F1"), "corr-7").await.expect_err("decode");
        assert!(matches!(
            error,
            DiagnosticError::Decode { ref raw_output, .. } if raw_output == raw
        ));
        assert_eq!(store.session_count().await, 0);
        assert_eq!(store.commits().await, 0);
    }

    #[tokio::test]
    async fn query_failure_rolls_back_the_whole_turn() {
        let store = InMemoryDiagnosticStore::default();
        store.fail_at(FailurePoint::Query).await;
        let llm = Arc::new(ScriptedLlmClient::replying([decision(
            json!({"action": "query", "response": "", "sql_query": HIT_QUERY}),
        )]));
        let orchestrator = orchestrator(&store, llm);

        let error = orchestrator.handle(&request("s8", "F1"), "corr-8").await.expect_err("query");
        assert_eq!(error.error_class(), "query_execution");
        assert!(history_of(&store, "s8").await.is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn rejected_queries_never_reach_the_store() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::replying([decision(json!({
            "action": "query",
            "sql_query": "SELECT history FROM chat_sessions"
        }))]));
        let orchestrator = orchestrator(&store, llm);

        let error = orchestrator.handle(&request("s9", "F1"), "corr-9").await.expect_err("guard");
        assert!(matches!(error, DiagnosticError::QueryRejected { .. }));
        assert!(store.executed_queries().await.is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn reasoning_failure_leaves_history_untouched() {
        let store = InMemoryDiagnosticStore::default();
        let llm = Arc::new(ScriptedLlmClient::new([
            Ok(decision(json!({"action": "ask", "response": "Which model?"}))),
            Err(LlmError::Timeout { timeout_secs: 30 }),
        ]));
        let orchestrator = orchestrator(&store, llm);

        orchestrator.handle(&request("s10", "no heat"), "corr-10a").await.expect("first turn");
        let error =
            orchestrator.handle(&request("s10", "Logic Combi"), "corr-10b").await.expect_err("timeout");
        assert_eq!(error.error_class(), "reasoning_timeout");
        assert_eq!(history_of(&store, "s10").await.len(), 2);
    }

    #[tokio::test]
    async fn store_failure_on_save_discards_the_turn() {
        let store = InMemoryDiagnosticStore::default();
        store.fail_at(FailurePoint::Save).await;
        let llm = Arc::new(ScriptedLlmClient::replying([decision(
            json!({"action": "ask", "response": "Which model?"}),
        )]));
        let orchestrator = orchestrator(&store, llm);

        let error = orchestrator.handle(&request("s11", "no heat"), "corr-11").await.expect_err("save");
        assert_eq!(error.error_class(), "store_unavailable");
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn store_failure_reading_history_skips_the_reasoning_call() {
        let store = InMemoryDiagnosticStore::default();
        store.fail_at(FailurePoint::Read).await;
        let llm = Arc::new(ScriptedLlmClient::replying([decision(
            json!({"action": "ask", "response": "Which model?"}),
        )]));
        let orchestrator = orchestrator(&store, Arc::clone(&llm));

        let error = orchestrator
            .handle(&request("s-read", "no heat"), "corr-read")
            .await
            .expect_err("history read fails");
        assert_eq!(error.error_class(), "store_unavailable");
        assert!(llm.prompts().is_empty());
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn store_failure_opening_the_write_phase_keeps_prior_history() {
        for (point, session) in [(FailurePoint::Begin, "s-begin"), (FailurePoint::Load, "s-load")] {
            let store = InMemoryDiagnosticStore::default();
            let llm = Arc::new(ScriptedLlmClient::replying([
                decision(json!({"action": "ask", "response": "Which model?"})),
                decision(json!({"action": "query", "response": "", "sql_query": HIT_QUERY})),
            ]));
            let orchestrator = orchestrator(&store, Arc::clone(&llm));
            orchestrator.handle(&request(session, "no heat"), "corr-first").await.expect("first");

            store.fail_at(point).await;
            let error = orchestrator
                .handle(&request(session, "Ideal Logic F1"), "corr-second")
                .await
                .expect_err("write phase unavailable");

            assert_eq!(error.error_class(), "store_unavailable", "{point:?}");
            assert_eq!(llm.prompts().len(), 2, "{point:?}");
            assert!(store.executed_queries().await.is_empty(), "{point:?}");
            assert_eq!(
                history_of(&store, session).await,
                vec![
                    (Role::User, "no heat".to_string()),
                    (Role::Assistant, "Which model?".to_string()),
                ],
                "{point:?}"
            );
        }
    }

    #[tokio::test]
    async fn history_grows_by_two_turns_in_order() {
        let store = InMemoryDiagnosticStore::default();
        let replies = (0..3)
            .map(|turn| decision(json!({"action": "ask", "response": format!("answer {turn}")})))
            .collect::<Vec<_>>();
        let llm = Arc::new(ScriptedLlmClient::replying(replies));
        let orchestrator = orchestrator(&store, Arc::clone(&llm));

        for turn in 0..3 {
            orchestrator
                .handle(&request("s12", &format!("question {turn}")), "corr-12")
                .await
                .expect("turn");
        }

        let history = history_of(&store, "s12").await;
        assert_eq!(history.len(), 6);
        for (turn, pair) in history.chunks(2).enumerate() {
            assert_eq!(pair[0], (Role::User, format!("question {turn}")));
            assert_eq!(pair[1], (Role::Assistant, format!("answer {turn}")));
        }

        // Each prompt sees every earlier turn plus the new question.
        let last_prompt = llm.prompts().pop().expect("three prompts");
        assert!(last_prompt.contains("answer 1"));
        assert!(last_prompt.contains("question 2"));
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_are_serialized() {
        let store = InMemoryDiagnosticStore::default();
        let replies = (0..8)
            .map(|_| decision(json!({"action": "ask", "response": "ok"})))
            .collect::<Vec<_>>();
        let orchestrator =
            Arc::new(orchestrator(&store, Arc::new(ScriptedLlmClient::replying(replies))));

        let mut handles = Vec::new();
        for turn in 0..8 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                orchestrator.handle(&request("shared", &format!("q{turn}")), "corr-13").await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("turn");
        }

        let history = history_of(&store, "shared").await;
        assert_eq!(history.len(), 16);
        assert!(history.chunks(2).all(|pair| pair[0].0 == Role::User && pair[1].0 == Role::Assistant));
    }

    #[tokio::test]
    async fn table_names_follow_the_allow_list() {
        let store = InMemoryDiagnosticStore::default();
        store.add_table("boiler_fault_codes", MemoryTable::default()).await;
        store.add_table("chat_sessions", MemoryTable::default()).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedLlmClient::default()));

        assert_eq!(orchestrator.table_names().await.expect("tables"), vec!["boiler_fault_codes"]);
    }
}
