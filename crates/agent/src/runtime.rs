use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use shopper_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
use shopper_core::collaborators::{IntentClassifier, TextGenerator};
use shopper_core::conversation::{ConversationState, TurnRecord};
use shopper_core::domain::capability::CapabilityRequest;
use shopper_core::domain::result::CapabilityResult;
use shopper_core::errors::{ErrorSeverity, OrchestrationError};
use shopper_core::merger::{merge, MergedResponse, StepOutput};
use shopper_core::router::{committed_search, DelegationRouter};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::prompts;
use crate::tools::CapabilityExecutor;

const FALLBACK_CLARIFICATION: &str = "Could you tell me a bit more about what you need?";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    Answered,
    Clarified,
    /// A capability failed; the conversation state is unchanged.
    Aborted,
    /// Registry or routing defect; escalated and the state is unchanged.
    Defect,
}

#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub response: String,
    pub status: TurnStatus,
    pub merged: Option<MergedResponse>,
}

/// Runs one conversational turn end to end: route, execute, merge, phrase, commit.
///
/// The incoming state is only replaced by a committed one. A failed turn hands the
/// caller back exactly the state it passed in.
pub struct AgentRuntime {
    router: DelegationRouter,
    classifier: Arc<dyn IntentClassifier>,
    executor: CapabilityExecutor,
    responder: Option<Arc<dyn TextGenerator>>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        router: DelegationRouter,
        classifier: Arc<dyn IntentClassifier>,
        executor: CapabilityExecutor,
    ) -> Self {
        Self { router, classifier, executor, responder: None, audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_responder(mut self, responder: Arc<dyn TextGenerator>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn router(&self) -> &DelegationRouter {
        &self.router
    }

    pub async fn handle_turn(&self, state: ConversationState, text: &str) -> TurnOutcome {
        let turn_id = Uuid::new_v4().to_string();

        let requests = match self.router.route(text, &state, self.classifier.as_ref()).await {
            Ok(requests) => requests,
            Err(failure) => return self.fail(state, &turn_id, failure),
        };

        if let Some(clarification) = requests.iter().find(|request| request.is_clarification()) {
            return self.clarify(state, &turn_id, text, clarification);
        }

        let capabilities: Vec<&str> =
            requests.iter().map(|request| request.capability.as_str()).collect();
        info!(
            event_name = "turn.routed",
            session_id = state.session_id(),
            turn_id = %turn_id,
            steps = requests.len(),
            capabilities = ?capabilities,
            "turn routed"
        );
        self.audit.emit(
            AuditEvent::new(
                state.session_id(),
                &turn_id,
                "turn.routed",
                AuditCategory::Routing,
                AuditOutcome::Success,
            )
            .with_metadata("capabilities", capabilities.join(",")),
        );

        let outputs = match self.execute(&requests).await {
            Ok(outputs) => outputs,
            Err(failure) => return self.fail(state, &turn_id, failure),
        };

        let merged = merge(outputs);
        let response = self.phrase(text, &merged).await;

        let mut state = state;
        state.update(
            TurnRecord::new(text, merged.headlines().join("; ")),
            merged.salient.clone(),
            committed_search(&requests),
        );
        info!(
            event_name = "turn.committed",
            session_id = state.session_id(),
            turn_id = %turn_id,
            sections = merged.sections.len(),
            "turn committed"
        );
        self.audit.emit(
            AuditEvent::new(
                state.session_id(),
                &turn_id,
                "turn.committed",
                AuditCategory::Conversation,
                AuditOutcome::Success,
            )
            .with_metadata("turn_count", state.turn_count().to_string()),
        );

        TurnOutcome { state, response, status: TurnStatus::Answered, merged: Some(merged) }
    }

    /// Runs requests in dependency waves. Requests within a wave run concurrently.
    async fn execute(
        &self,
        requests: &[CapabilityRequest],
    ) -> Result<Vec<StepOutput>, OrchestrationError> {
        let mut completed: BTreeMap<usize, CapabilityResult> = BTreeMap::new();
        let mut pending: Vec<&CapabilityRequest> = requests.iter().collect();

        while !pending.is_empty() {
            let (ready, waiting): (Vec<&CapabilityRequest>, Vec<&CapabilityRequest>) =
                pending.into_iter().partition(|request| {
                    request.depends_on().all(|step| completed.contains_key(&step))
                });
            if ready.is_empty() {
                return Err(OrchestrationError::UnroutableTurn(
                    "requests depend on steps that never run".to_string(),
                ));
            }

            let results =
                join_all(ready.iter().map(|request| self.executor.execute(request, &completed)))
                    .await;
            for (request, result) in ready.iter().zip(results) {
                completed.insert(request.step, result?);
            }
            pending = waiting;
        }

        Ok(requests
            .iter()
            .filter_map(|request| {
                let result = completed.remove(&request.step)?;
                Some(StepOutput {
                    step: request.step,
                    capability: request.capability,
                    query: request.query.clone(),
                    derived_from: request.depends_on().collect(),
                    result,
                })
            })
            .collect())
    }

    async fn phrase(&self, text: &str, merged: &MergedResponse) -> String {
        let Some(responder) = &self.responder else {
            return merged.rendering.clone();
        };
        match responder.generate_text(&prompts::response_prompt(text, &merged.rendering)).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) => merged.rendering.clone(),
            Err(failure) => {
                warn!(event_name = "response.fallback", error = %failure, "phrasing failed");
                merged.rendering.clone()
            }
        }
    }

    fn clarify(
        &self,
        mut state: ConversationState,
        turn_id: &str,
        text: &str,
        request: &CapabilityRequest,
    ) -> TurnOutcome {
        let question = request.query.clone().unwrap_or_else(|| FALLBACK_CLARIFICATION.to_string());
        info!(
            event_name = "turn.routed",
            session_id = state.session_id(),
            turn_id,
            capabilities = "clarify",
            "turn needs clarification"
        );
        self.audit.emit(AuditEvent::new(
            state.session_id(),
            turn_id,
            "turn.routed",
            AuditCategory::Routing,
            AuditOutcome::Clarified,
        ));
        state.update(TurnRecord::new(text, question.as_str()), None, None);
        TurnOutcome { state, response: question, status: TurnStatus::Clarified, merged: None }
    }

    fn fail(&self, state: ConversationState, turn_id: &str, failure: OrchestrationError) -> TurnOutcome {
        let structural = failure.severity() == ErrorSeverity::Structural;
        let (event_type, category, outcome, status) = if structural {
            error!(
                event_name = "defect.escalated",
                session_id = state.session_id(),
                turn_id,
                error = %failure,
                "structural defect while handling turn"
            );
            ("defect.escalated", AuditCategory::Defect, AuditOutcome::Failed, TurnStatus::Defect)
        } else {
            warn!(
                event_name = "turn.aborted",
                session_id = state.session_id(),
                turn_id,
                error = %failure,
                "turn aborted"
            );
            ("turn.aborted", AuditCategory::Invocation, AuditOutcome::Aborted, TurnStatus::Aborted)
        };

        let mut event =
            AuditEvent::new(state.session_id(), turn_id, event_type, category, outcome)
                .with_metadata("error", failure.to_string());
        if let OrchestrationError::CapabilityInvocationFailure { capability, attempts, .. } = &failure {
            event = event
                .with_metadata("capability", capability.as_str())
                .with_metadata("attempts", attempts.to_string());
        }
        self.audit.emit(event);

        TurnOutcome { state, response: failure.user_message().to_string(), status, merged: None }
    }
}
