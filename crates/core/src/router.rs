//! Delegation Router: turns a classified user turn into ordered capability requests.
//!
//! Classification itself is delegated to an [`IntentClassifier`]; the router structures
//! the request, validates the response shape and resolves everything that depends on
//! conversation state (refinement, references, implicit subjects).

use std::sync::Arc;

use tracing::debug;

use crate::collaborators::{
    Classification, ClassificationRequest, ClassifiedStep, ConversationDigest, IntentClassifier,
};
use crate::conversation::{ActiveSearch, ConversationState};
use crate::domain::capability::{CapabilityId, CapabilityRequest, ContextRef};
use crate::domain::filter::FilterSet;
use crate::domain::result::{CapabilityResult, EntityId};
use crate::errors::{CollaboratorError, ConstraintError, OrchestrationError};
use crate::filters;
use crate::registry::{CapabilityDescriptor, CapabilityRegistry};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
pub const CLASSIFIER_NAME: &str = "intent_classifier";

const DEFAULT_CLARIFICATION: &str =
    "Could you tell me a bit more about what you're shopping for?";
const REFINEMENT_WORDS: &[&str] =
    &["instead", "only", "cheaper", "narrow", "refine", "those", "them", "also", "but"];
const REFINEMENT_PHRASES: &[&str] = &["that one", "these ones", "those ones"];
const DIGEST_TURNS: usize = 4;
const DIGEST_ENTITIES: usize = 10;

#[derive(Clone, Debug)]
pub struct DelegationRouter {
    registry: Arc<CapabilityRegistry>,
    confidence_threshold: f64,
}

impl DelegationRouter {
    pub fn new(registry: Arc<CapabilityRegistry>, confidence_threshold: f64) -> Self {
        Self { registry, confidence_threshold }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Routes one turn. Recoverable problems come back as a single clarification
    /// request; structural ones and classifier failures come back as errors.
    pub async fn route(
        &self,
        turn: &str,
        state: &ConversationState,
        classifier: &dyn IntentClassifier,
    ) -> Result<Vec<CapabilityRequest>, OrchestrationError> {
        let request = ClassificationRequest {
            text: turn,
            registry: &self.registry,
            context: digest(state),
        };
        let classification = classifier
            .classify_intent(&request)
            .await
            .map_err(|error| OrchestrationError::invocation(CLASSIFIER_NAME, 1, error))?;

        self.plan(turn, state, &classification)
    }

    /// Validates a classification against the registry and conversation state.
    pub fn plan(
        &self,
        turn: &str,
        state: &ConversationState,
        classification: &Classification,
    ) -> Result<Vec<CapabilityRequest>, OrchestrationError> {
        let proposed = classification
            .clarification
            .as_deref()
            .map(str::trim)
            .filter(|question| !question.is_empty());

        if classification.steps.is_empty() || classification.confidence < self.confidence_threshold
        {
            debug!(
                event_name = "router.low_confidence",
                confidence = classification.confidence,
                steps = classification.steps.len(),
                "turn needs clarification"
            );
            return self.clarify(proposed.unwrap_or(DEFAULT_CLARIFICATION));
        }

        if let Some(step) = classification
            .steps
            .iter()
            .find(|step| step.capability.parse::<CapabilityId>() == Ok(CapabilityId::Clarify))
        {
            let question = step.query.as_deref().or(proposed).unwrap_or(DEFAULT_CLARIFICATION);
            return self.clarify(question);
        }

        match self.build_requests(turn, state, classification) {
            Ok(requests) => Ok(requests),
            Err(error) if error.is_recoverable() => {
                debug!(event_name = "router.recoverable", error = %error, "asking for clarification");
                self.clarify(&clarification_for(&error))
            }
            Err(error) => Err(error),
        }
    }

    fn clarify(&self, question: &str) -> Result<Vec<CapabilityRequest>, OrchestrationError> {
        if !self.registry.has_clarification() {
            return Err(OrchestrationError::UnroutableTurn(
                "no capability matched and clarification is not registered".to_string(),
            ));
        }
        Ok(vec![CapabilityRequest::clarification(question)])
    }

    fn build_requests(
        &self,
        turn: &str,
        state: &ConversationState,
        classification: &Classification,
    ) -> Result<Vec<CapabilityRequest>, OrchestrationError> {
        let refinement_requested = classification.refinement || has_refinement_cue(turn);
        let mut requests = Vec::with_capacity(classification.steps.len());

        for (index, step) in classification.steps.iter().enumerate() {
            let descriptor = self.registry.lookup(&step.capability)?;
            requests.push(self.build_request(
                index,
                step,
                descriptor,
                state,
                refinement_requested,
            )?);
        }

        Ok(requests)
    }

    fn build_request(
        &self,
        index: usize,
        step: &ClassifiedStep,
        descriptor: &CapabilityDescriptor,
        state: &ConversationState,
        refinement_requested: bool,
    ) -> Result<CapabilityRequest, OrchestrationError> {
        let capability = descriptor.id;
        let schema = &descriptor.schema;
        let mut request = CapabilityRequest::new(index, capability);

        for &prior in &step.depends_on {
            if prior >= index {
                return Err(OrchestrationError::invocation(
                    CLASSIFIER_NAME,
                    1,
                    CollaboratorError::Malformed(format!(
                        "step {index} depends on step {prior}, which does not precede it"
                    )),
                ));
            }
            request = request.with_ref(ContextRef::PriorStep(prior));
        }

        let mut filters = filters::compile(&step.constraints)?;
        if let Some(field) = filters.fields().into_iter().find(|field| !schema.allows(*field)) {
            return Err(ConstraintError::FieldNotApplicable { field, capability }.into());
        }
        let refines_active = capability.is_search()
            && refinement_requested
            && state.active_capability() == Some(capability);
        if refines_active {
            filters = state.active_filters().merge_refinement(&filters)?;
            debug!(
                event_name = "router.refinement_merged",
                capability = %capability,
                constraints = filters.len(),
                "merged refinement into active filters"
            );
        }
        request = request.with_filters(filters);

        let mut subject = match step.reference.as_deref().map(str::trim) {
            Some(mention) if !mention.is_empty() => Some(state.resolve_reference(mention)?),
            _ => None,
        };
        if subject.is_none() && refines_active {
            subject = state.active_subject().cloned();
        }
        if subject.is_none() && step.depends_on.is_empty() && schema.defaults_subject() {
            subject = implicit_subject(state);
        }
        if schema.requires_subject() && subject.is_none() && step.depends_on.is_empty() {
            return Err(OrchestrationError::MissingParameter { capability, parameter: "subject" });
        }

        let query = step
            .query
            .as_deref()
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .map(str::to_string)
            .or_else(|| {
                let last = state.last_result()?;
                subject.as_ref().and_then(|id| last.entity_label(id))
            })
            .or_else(|| refines_active.then(|| state.active_query().map(str::to_string)).flatten())
            .or_else(|| schema.default_query.map(str::to_string));
        match query {
            Some(query) => request = request.with_query(query),
            None if schema.requires_query && step.depends_on.is_empty() => {
                return Err(OrchestrationError::MissingParameter { capability, parameter: "query" });
            }
            None => {}
        }

        if let Some(entity) = subject {
            request = request.with_ref(ContextRef::Entity(entity));
        }
        Ok(request)
    }
}

/// Search state to keep after a committed turn: the last search capability used, with
/// the constraints every request to it shared and the item it was scoped to.
pub fn committed_search(requests: &[CapabilityRequest]) -> Option<ActiveSearch> {
    let capability = requests.iter().rev().find(|request| request.capability.is_search())?.capability;
    let mut same = requests.iter().filter(|request| request.capability == capability);
    let first = same.next()?;
    let others: Vec<&CapabilityRequest> = same.collect();
    let shared = first
        .filters
        .iter()
        .filter(|constraint| others.iter().all(|other| other.filters.iter().any(|c| c == *constraint)))
        .cloned()
        .collect();
    let filters = FilterSet::try_from_constraints(shared).unwrap_or_default();
    let last = others.last().copied().unwrap_or(first);
    let query = last.query.clone();
    let subject = last.subject().cloned();
    Some(ActiveSearch { capability, filters, query, subject })
}

fn clarification_for(error: &OrchestrationError) -> String {
    match error {
        OrchestrationError::InvalidConstraint(problem) => {
            format!("I couldn't use that filter: {problem}. Could you adjust it?")
        }
        other => other.user_message().to_string(),
    }
}

fn has_refinement_cue(turn: &str) -> bool {
    let lowered = turn.to_ascii_lowercase();
    let words: Vec<&str> = lowered
        .split(|character: char| !character.is_ascii_alphanumeric() && character != '\'')
        .filter(|word| !word.is_empty())
        .collect();
    REFINEMENT_WORDS.iter().any(|cue| words.contains(cue))
        || REFINEMENT_PHRASES.iter().any(|cue| lowered.contains(cue))
}

fn implicit_subject(state: &ConversationState) -> Option<EntityId> {
    match state.last_result()? {
        CapabilityResult::ReviewList(reviews) => {
            let first = reviews.first()?;
            reviews
                .iter()
                .all(|review| review.item_id == first.item_id)
                .then(|| first.item_id.clone())
        }
        CapabilityResult::IdeaList(_) => None,
        other => match other.entity_ids().as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        },
    }
}

fn digest(state: &ConversationState) -> ConversationDigest {
    let history = state.turn_history();
    let recent_turns = history
        .iter()
        .skip(history.len().saturating_sub(DIGEST_TURNS))
        .map(|turn| format!("user: {} | assistant: {}", turn.user_text, turn.response_summary))
        .collect();
    let (last_result_kind, entities) = match state.last_result() {
        Some(result) => (
            Some(result.kind().to_string()),
            result
                .entity_ids()
                .iter()
                .take(DIGEST_ENTITIES)
                .enumerate()
                .map(|(index, id)| {
                    (index + 1, result.entity_label(id).unwrap_or_else(|| format!("entry {}", index + 1)))
                })
                .collect(),
        ),
        None => (None, Vec::new()),
    };
    ConversationDigest {
        recent_turns,
        last_result_kind,
        entities,
        active_capability: state.active_capability().map(|id| id.to_string()),
        active_query: state.active_query().map(str::to_string),
        active_filters: state
            .active_filters()
            .iter()
            .map(|constraint| format!("{} {} {:?}", constraint.field, constraint.operator, constraint.value))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{committed_search, DelegationRouter, DEFAULT_CONFIDENCE_THRESHOLD};
    use crate::collaborators::{
        Classification, ClassificationRequest, ClassifiedStep, IntentClassifier,
    };
    use crate::conversation::{ActiveSearch, ConversationState, TurnRecord};
    use crate::domain::capability::{CapabilityId, ContextRef};
    use crate::domain::filter::{Constraint, Field, FilterSet, FilterValue, Operator};
    use crate::domain::result::{CapabilityResult, EntityId, Item};
    use crate::errors::{CollaboratorError, OrchestrationError};
    use crate::filters::{RawConstraint, RawValue};
    use crate::registry::CapabilityRegistry;

    struct Scripted {
        reply: Result<Classification, CollaboratorError>,
        seen: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(classification: Classification) -> Self {
            Self { reply: Ok(classification), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl IntentClassifier for Scripted {
        async fn classify_intent(
            &self,
            request: &ClassificationRequest<'_>,
        ) -> Result<Classification, CollaboratorError> {
            self.seen.lock().expect("lock").push(request.text.to_string());
            self.reply.clone()
        }
    }

    fn router() -> DelegationRouter {
        DelegationRouter::new(Arc::new(CapabilityRegistry::standard()), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    fn confident(steps: Vec<ClassifiedStep>) -> Classification {
        Classification { steps, confidence: 0.9, ..Classification::default() }
    }

    fn state_with_items(ids: &[&str]) -> ConversationState {
        let mut state = ConversationState::new();
        let items = ids
            .iter()
            .map(|id| Item { id: EntityId::new(*id), title: format!("Item {id}"), ..Item::default() })
            .collect();
        state.update(TurnRecord::new("find", "found"), Some(CapabilityResult::ItemList(items)), None);
        state
    }

    #[tokio::test]
    async fn swimsuit_and_sandals_become_two_independent_searches() {
        let classifier = Scripted::new(confident(vec![
            ClassifiedStep::new("search_items")
                .query("swimsuit")
                .constraint(RawConstraint::new("price", "under", 50.0.into()))
                .constraint(RawConstraint::new("category", "is", "Swimwear".into())),
            ClassifiedStep::new("search_items")
                .query("sandals")
                .constraint(RawConstraint::new("price", "under", 50.0.into()))
                .constraint(RawConstraint::new("category", "is", "Sandals".into())),
        ]));

        let requests = router()
            .route("find a swimsuit and sandals under $50 each", &ConversationState::new(), &classifier)
            .await
            .expect("routes");

        assert_eq!(requests.len(), 2);
        for (index, request) in requests.iter().enumerate() {
            assert_eq!(request.step, index);
            assert_eq!(request.capability, CapabilityId::SearchItems);
            assert_eq!(request.depends_on().count(), 0);
            assert_eq!(request.filters.constraints()[0], Constraint::number(Field::Price, Operator::Lt, 50.0));
            assert_eq!(request.filters.constraints_on(Field::Category).count(), 1);
        }
        assert_eq!(classifier.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn low_star_reviews_point_at_the_previous_item() {
        let state = state_with_items(&["B0SANDAL"]);
        let classifier = Scripted::new(confident(vec![ClassifiedStep::new("search_reviews")
            .constraint(RawConstraint::new(
                "rating",
                "in",
                RawValue::List(vec![1.0.into(), 2.0.into()]),
            ))]));

        let requests =
            router().route("show me only 1-2 star reviews", &state, &classifier).await.expect("routes");

        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.capability, CapabilityId::SearchReviews);
        assert_eq!(
            request.filters.constraints(),
            &[Constraint::new(Field::Rating, Operator::In, FilterValue::NumberSet(vec![1.0, 2.0]))]
        );
        assert_eq!(request.context_refs, vec![ContextRef::Entity(EntityId::new("B0SANDAL"))]);
    }

    #[tokio::test]
    async fn chained_summary_refers_to_the_earlier_step() {
        let classifier = Scripted::new(confident(vec![
            ClassifiedStep::new("search_items").query("running shoes"),
            ClassifiedStep::new("summarize_reviews").after(0),
        ]));

        let requests = router()
            .route("find running shoes, then summarize the reviews", &ConversationState::new(), &classifier)
            .await
            .expect("routes");

        assert_eq!(requests[1].context_refs, vec![ContextRef::PriorStep(0)]);
    }

    #[test]
    fn refinement_overrides_same_field_and_is_idempotent() {
        let mut state = ConversationState::new();
        let prior = FilterSet::try_from_constraints(vec![
            Constraint::number(Field::Price, Operator::Lt, 50.0),
            Constraint::number(Field::Rating, Operator::Gte, 4.5),
        ])
        .expect("valid");
        state.update(
            TurnRecord::new("sandals under $50", "Found 4"),
            None,
            Some(ActiveSearch {
                capability: CapabilityId::SearchItems,
                filters: prior,
                query: Some("sandals".to_string()),
                subject: None,
            }),
        );
        let classification = confident(vec![ClassifiedStep::new("search_items")
            .query("sandals")
            .constraint(RawConstraint::new("price", "under", 75.0.into()))]);

        let router = router();
        let first = router.plan("under $75 instead", &state, &classification).expect("routes");
        let expected = vec![
            Constraint::number(Field::Rating, Operator::Gte, 4.5),
            Constraint::number(Field::Price, Operator::Lt, 75.0),
        ];
        assert_eq!(first[0].filters.constraints(), expected.as_slice());

        let committed = committed_search(&first).expect("search committed");
        state.update(TurnRecord::new("under $75 instead", "Found 6"), None, Some(committed));
        let second = router.plan("under $75 instead", &state, &classification).expect("routes");
        assert_eq!(second[0].filters, first[0].filters);
    }

    #[test]
    fn new_search_without_cue_starts_fresh() {
        let mut state = ConversationState::new();
        let prior =
            FilterSet::try_from_constraints(vec![Constraint::number(Field::Price, Operator::Lt, 50.0)])
                .expect("valid");
        state.update(
            TurnRecord::new("sandals under $50", "Found 4"),
            None,
            Some(ActiveSearch {
                capability: CapabilityId::SearchItems,
                filters: prior,
                query: Some("sandals".to_string()),
                subject: None,
            }),
        );
        let classification = confident(vec![ClassifiedStep::new("search_items").query("umbrella")]);

        let requests = router().plan("find an umbrella", &state, &classification).expect("routes");
        assert!(requests[0].filters.is_empty());
    }

    #[test]
    fn low_confidence_yields_clarification() {
        let classification = Classification {
            steps: vec![ClassifiedStep::new("search_items").query("something")],
            confidence: 0.3,
            clarification: Some("Are you shopping for yourself or a gift?".to_string()),
            ..Classification::default()
        };

        let requests = router().plan("hmm", &ConversationState::new(), &classification).expect("routes");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_clarification());
        assert_eq!(requests[0].query.as_deref(), Some("Are you shopping for yourself or a gift?"));
    }

    #[test]
    fn unresolved_reference_yields_clarification() {
        let state = state_with_items(&["A", "B", "C"]);
        let classification =
            confident(vec![ClassifiedStep::new("summarize_reviews").reference("the fifth one")]);

        let requests = router().plan("summarize the fifth one", &state, &classification).expect("routes");
        assert!(requests[0].is_clarification());
    }

    #[test]
    fn contradictory_filters_yield_clarification_naming_the_field() {
        let classification = confident(vec![ClassifiedStep::new("search_items")
            .query("jackets")
            .constraint(RawConstraint::new("price", "gte", 100.0.into()))
            .constraint(RawConstraint::new("price", "lt", 50.0.into()))]);

        let requests =
            router().plan("jackets", &ConversationState::new(), &classification).expect("routes");
        assert!(requests[0].is_clarification());
        assert!(requests[0].query.as_deref().is_some_and(|text| text.contains("price")));
    }

    #[test]
    fn review_field_on_item_search_is_not_applicable() {
        let classification = confident(vec![ClassifiedStep::new("search_items")
            .query("kettle")
            .constraint(RawConstraint::new("helpful_votes", "gte", 3.0.into()))]);

        let requests =
            router().plan("kettle", &ConversationState::new(), &classification).expect("routes");
        assert!(requests[0].is_clarification());
    }

    #[test]
    fn summarize_without_subject_asks_which_item() {
        let state = state_with_items(&["A", "B"]);
        let classification = confident(vec![ClassifiedStep::new("summarize_reviews")]);

        let requests = router().plan("summarize reviews", &state, &classification).expect("routes");
        assert!(requests[0].is_clarification());

        let single = state_with_items(&["A"]);
        let requests = router().plan("summarize reviews", &single, &classification).expect("routes");
        assert_eq!(requests[0].subject(), Some(&EntityId::new("A")));
    }

    #[test]
    fn unknown_capability_is_structural() {
        let classification = confident(vec![ClassifiedStep::new("book_flight")]);
        let error = router()
            .plan("book me a flight", &ConversationState::new(), &classification)
            .expect_err("fatal");
        assert_eq!(error, OrchestrationError::UnknownCapability("book_flight".to_string()));
    }

    #[test]
    fn forward_dependency_is_a_malformed_classification() {
        let classification = confident(vec![
            ClassifiedStep::new("summarize_reviews").after(1),
            ClassifiedStep::new("search_items").query("boots"),
        ]);
        let error = router()
            .plan("boots", &ConversationState::new(), &classification)
            .expect_err("malformed");
        assert!(matches!(
            error,
            OrchestrationError::CapabilityInvocationFailure {
                source: CollaboratorError::Malformed(_),
                ..
            }
        ));
    }

    #[test]
    fn missing_clarification_capability_makes_turn_unroutable() {
        let router = DelegationRouter::new(
            Arc::new(CapabilityRegistry::without(&[CapabilityId::Clarify])),
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        let error = router
            .plan("???", &ConversationState::new(), &Classification::default())
            .expect_err("unroutable");
        assert!(matches!(error, OrchestrationError::UnroutableTurn(_)));
    }

    #[tokio::test]
    async fn classifier_failure_is_an_invocation_failure() {
        let classifier = Scripted {
            reply: Err(CollaboratorError::Unavailable("connection refused".to_string())),
            seen: Mutex::new(Vec::new()),
        };
        let error = router()
            .route("shoes", &ConversationState::new(), &classifier)
            .await
            .expect_err("fails");
        assert!(matches!(error, OrchestrationError::CapabilityInvocationFailure { .. }));
    }

    #[test]
    fn committed_search_keeps_constraints_shared_by_every_request() {
        let classification = confident(vec![
            ClassifiedStep::new("search_items")
                .query("swimsuit")
                .constraint(RawConstraint::new("price", "under", 50.0.into()))
                .constraint(RawConstraint::new("category", "is", "Swimwear".into())),
            ClassifiedStep::new("search_items")
                .query("sandals")
                .constraint(RawConstraint::new("price", "under", 50.0.into()))
                .constraint(RawConstraint::new("category", "is", "Sandals".into())),
        ]);
        let requests =
            router().plan("swimsuit and sandals", &ConversationState::new(), &classification).expect("routes");

        let committed = committed_search(&requests).expect("search");
        assert_eq!(committed.capability, CapabilityId::SearchItems);
        assert_eq!(
            committed.filters.constraints(),
            &[Constraint::number(Field::Price, Operator::Lt, 50.0)]
        );
    }

    #[test]
    fn refined_review_search_keeps_the_scoped_item() {
        let mut state = ConversationState::new();
        let positive =
            FilterSet::try_from_constraints(vec![Constraint::number(Field::Rating, Operator::Gte, 4.0)])
                .expect("valid");
        state.update(
            TurnRecord::new("positive reviews for the first one", "Found 0 reviews"),
            Some(CapabilityResult::ReviewList(Vec::new())),
            Some(ActiveSearch {
                capability: CapabilityId::SearchReviews,
                filters: positive,
                query: Some("Leather Strap Sandals".to_string()),
                subject: Some(EntityId::new("D2")),
            }),
        );
        let classification = Classification {
            refinement: true,
            ..confident(vec![ClassifiedStep::new("search_reviews")
                .constraint(RawConstraint::new("rating", "eq", 5.0.into()))])
        };

        let requests = router().plan("only 5 star reviews instead", &state, &classification).expect("routes");
        assert_eq!(requests[0].subject(), Some(&EntityId::new("D2")));
        assert_eq!(requests[0].query.as_deref(), Some("Leather Strap Sandals"));
        assert_eq!(
            requests[0].filters.constraints(),
            &[Constraint::number(Field::Rating, Operator::Eq, 5.0)]
        );

        let committed = committed_search(&requests).expect("search");
        assert_eq!(committed.subject, Some(EntityId::new("D2")));
    }

    #[test]
    fn refinement_without_query_reuses_the_active_search_query() {
        let mut state = ConversationState::new();
        state.update(
            TurnRecord::new("sandals under $50", "Found 4"),
            None,
            Some(ActiveSearch {
                capability: CapabilityId::SearchItems,
                filters: FilterSet::empty(),
                query: Some("sandals".to_string()),
                subject: None,
            }),
        );
        let classification = confident(vec![ClassifiedStep::new("search_items")
            .constraint(RawConstraint::new("rating", "at least", 4.5.into()))]);

        let requests = router().plan("only the well rated ones", &state, &classification).expect("routes");
        assert_eq!(requests[0].capability, CapabilityId::SearchItems);
        assert_eq!(requests[0].query.as_deref(), Some("sandals"));
    }
}
