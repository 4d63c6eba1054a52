use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shopper_agent::{AgentRuntime, CapabilityExecutor, ExecutorSettings, RuleBasedClassifier, TurnStatus};
use shopper_core::audit::InMemoryAuditSink;
use shopper_core::{
    CapabilityId, CapabilityRegistry, CapabilityResult, Collection, CollaboratorError, Constraint,
    ConversationState, DelegationRouter, EntityId, Field, FilterSet, Item, Operator, Review,
    SearchBackend, SearchHits, Summarizer, SummaryDraft,
};
use shopper_search::InMemorySearchBackend;

/// Keeps every item search the runtime sends to the catalog.
struct RecordingSearch {
    inner: InMemorySearchBackend,
    item_searches: Mutex<Vec<(String, FilterSet)>>,
}

#[async_trait]
impl SearchBackend for RecordingSearch {
    async fn search(
        &self,
        collection: Collection,
        filters: &FilterSet,
        query: &str,
        max_results: usize,
    ) -> Result<SearchHits, CollaboratorError> {
        if collection == Collection::Items {
            if let Ok(mut searches) = self.item_searches.lock() {
                searches.push((query.to_string(), filters.clone()));
            }
        }
        self.inner.search(collection, filters, query, max_results).await
    }
}

#[derive(Default)]
struct CountingSummarizer {
    batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(&self, review_texts: &[String]) -> Result<SummaryDraft, CollaboratorError> {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(review_texts.to_vec());
        }
        Ok(SummaryDraft {
            pros: vec!["comfortable".to_string()],
            cons: vec!["thin sole".to_string()],
            overall: format!("Based on {} reviews, shoppers like them.", review_texts.len()),
        })
    }
}

fn item(id: &str, title: &str, category: &str, price: f64, rating: f64, count: u64) -> Item {
    Item {
        id: EntityId::new(id),
        title: title.to_string(),
        price: Some(price),
        average_rating: Some(rating),
        rating_count: Some(count),
        category: Some(category.to_string()),
        ..Item::default()
    }
}

fn review(id: &str, item: &str, rating: f64, helpful: u64, title: &str) -> Review {
    Review {
        id: EntityId::new(id),
        item_id: EntityId::new(item),
        rating,
        title: title.to_string(),
        text: format!("{title} after a month of wear."),
        helpful_votes: helpful,
        verified_purchase: true,
        ..Review::default()
    }
}

fn catalog() -> Arc<RecordingSearch> {
    Arc::new(RecordingSearch {
        inner: InMemorySearchBackend::new(
            vec![
                item("S1", "Striped Swimsuit", "Swimwear", 45.0, 4.4, 120),
                item("S2", "Halter Swimsuit", "Swimwear", 65.0, 4.6, 95),
                item("D1", "Slide Sandals", "Shoes", 25.0, 4.1, 300),
                item("D2", "Leather Strap Sandals", "Shoes", 48.0, 4.7, 80),
                item("D3", "Platform Sandals", "Shoes", 70.0, 4.8, 40),
            ],
            vec![
                review("R1", "D1", 5.0, 3, "Comfy"),
                review("R2", "D1", 4.0, 10, "Great for the pool"),
                review("R3", "D2", 1.0, 7, "Strap broke"),
            ],
        ),
        item_searches: Mutex::new(Vec::new()),
    })
}

fn runtime(summarizer: Arc<CountingSummarizer>, audit: InMemoryAuditSink) -> AgentRuntime {
    runtime_over(catalog(), summarizer, audit)
}

fn runtime_over(
    search: Arc<RecordingSearch>,
    summarizer: Arc<CountingSummarizer>,
    audit: InMemoryAuditSink,
) -> AgentRuntime {
    let registry = Arc::new(CapabilityRegistry::standard());
    let executor = CapabilityExecutor::new(registry.clone(), search, ExecutorSettings::default())
        .with_summarizer(summarizer);
    AgentRuntime::new(
        DelegationRouter::new(registry, 0.6),
        Arc::new(RuleBasedClassifier::new()),
        executor,
    )
    .with_audit_sink(Arc::new(audit))
}

fn ids(result: Option<&CapabilityResult>) -> Vec<String> {
    result
        .map(|result| result.entity_ids().into_iter().map(|id| id.0).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn search_summarize_refine_and_clarify_across_turns() {
    let summarizer = Arc::new(CountingSummarizer::default());
    let audit = InMemoryAuditSink::default();
    let search = catalog();
    let runtime = runtime_over(search.clone(), summarizer.clone(), audit.clone());

    let first = runtime
        .handle_turn(ConversationState::new(), "Find a swimsuit and sandals under $50 each")
        .await;
    assert_eq!(first.status, TurnStatus::Answered);
    assert_eq!(ids(first.state.last_result()), vec!["S1", "D2", "D1"]);
    let mut sent = search.item_searches.lock().expect("lock").clone();
    sent.sort_by(|left, right| right.0.cmp(&left.0));
    let sent: Vec<(&str, Vec<Constraint>)> = sent
        .iter()
        .map(|(query, filters)| (query.as_str(), filters.constraints().to_vec()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (
                "swimsuit",
                vec![
                    Constraint::number(Field::Price, Operator::Lt, 50.0),
                    Constraint::text_eq(Field::Category, "Swimwear"),
                ]
            ),
            (
                "sandals",
                vec![
                    Constraint::number(Field::Price, Operator::Lt, 50.0),
                    Constraint::text_eq(Field::Category, "Shoes"),
                ]
            ),
        ]
    );
    assert_eq!(first.state.active_capability(), Some(CapabilityId::SearchItems));
    assert_eq!(first.state.active_query(), Some("sandals"));
    let under_fifty = FilterSet::try_from_constraints(vec![Constraint::number(
        Field::Price,
        Operator::Lt,
        50.0,
    )])
    .expect("valid");
    assert_eq!(first.state.active_filters(), &under_fifty);

    let second =
        runtime.handle_turn(first.state, "what do people say about the slide sandal").await;
    assert_eq!(second.status, TurnStatus::Answered);
    let Some(CapabilityResult::Summary(summary)) = second.state.last_result() else {
        panic!("expected a summary, got {:?}", second.state.last_result());
    };
    assert_eq!(summary.subject, Some(EntityId::new("D1")));
    assert_eq!(summary.review_count, 2);
    assert_eq!(summary.overall, "Based on 2 reviews, shoppers like them.");
    let batches = summarizer.batches.lock().expect("lock").clone();
    assert_eq!(batches.len(), 1);
    assert!(batches[0][0].starts_with("Great for the pool"));
    assert_eq!(second.state.active_filters(), &under_fifty);

    let third = runtime.handle_turn(second.state, "only ones under $30").await;
    assert_eq!(third.status, TurnStatus::Answered);
    assert_eq!(ids(third.state.last_result()), vec!["D1"]);
    let under_thirty = FilterSet::try_from_constraints(vec![Constraint::number(
        Field::Price,
        Operator::Lt,
        30.0,
    )])
    .expect("valid");
    assert_eq!(third.state.active_filters(), &under_thirty);
    assert_eq!(third.state.active_query(), Some("sandals"));

    let fourth = runtime.handle_turn(third.state.clone(), "hello").await;
    assert_eq!(fourth.status, TurnStatus::Clarified);
    assert_eq!(fourth.state.last_result(), third.state.last_result());
    assert_eq!(fourth.state.turn_count(), 4);

    assert_eq!(
        audit.event_types(),
        vec![
            "turn.routed",
            "turn.committed",
            "turn.routed",
            "turn.committed",
            "turn.routed",
            "turn.committed",
            "turn.routed",
        ]
    );
}

#[tokio::test]
async fn negative_reviews_for_an_ordinal_item() {
    let runtime = runtime(Arc::new(CountingSummarizer::default()), InMemoryAuditSink::default());

    let listed = runtime.handle_turn(ConversationState::new(), "find sandals under $50").await;
    assert_eq!(ids(listed.state.last_result()), vec!["D2", "D1"]);

    let reviews = runtime.handle_turn(listed.state, "any negative reviews for the first one?").await;
    assert_eq!(reviews.status, TurnStatus::Answered);
    assert_eq!(ids(reviews.state.last_result()), vec!["R3"]);
    assert_eq!(reviews.state.active_capability(), Some(CapabilityId::SearchReviews));
}

#[tokio::test]
async fn refining_a_scoped_review_search_stays_on_the_same_item() {
    let runtime = runtime(Arc::new(CountingSummarizer::default()), InMemoryAuditSink::default());

    let listed = runtime.handle_turn(ConversationState::new(), "find leather sandals").await;
    assert_eq!(ids(listed.state.last_result()).first().map(String::as_str), Some("D2"));

    let positive = runtime.handle_turn(listed.state, "any positive reviews for the first one?").await;
    assert_eq!(positive.status, TurnStatus::Answered);
    assert!(ids(positive.state.last_result()).is_empty());
    assert_eq!(positive.state.active_subject(), Some(&EntityId::new("D2")));

    let refined = runtime.handle_turn(positive.state, "only 5 star reviews instead").await;
    assert_eq!(refined.status, TurnStatus::Answered);
    assert_eq!(refined.state.active_capability(), Some(CapabilityId::SearchReviews));
    assert_eq!(refined.state.active_subject(), Some(&EntityId::new("D2")));
    assert!(
        ids(refined.state.last_result()).is_empty(),
        "reviews of other items leaked in: {:?}",
        refined.state.last_result()
    );
}
