//! Capability execution: dispatches routed requests to their collaborators.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use shopper_core::collaborators::{
    AnalyticalDatabase, Researcher, SearchBackend, SearchHits, SqlTranslator, Summarizer,
};
use shopper_core::config::AppConfig;
use shopper_core::domain::capability::{CapabilityRequest, DelegationTarget};
use shopper_core::domain::filter::{Collection, Constraint, Field, FilterSet};
use shopper_core::domain::result::{CapabilityResult, EntityId, Idea, Item, Review, ReviewSummary};
use shopper_core::errors::{CollaboratorError, OrchestrationError};
use shopper_core::registry::CapabilityRegistry;
use tracing::{info, warn};

use crate::guardrails::{GuardrailDecision, SqlGuardrailPolicy};

pub const SUMMARY_REVIEW_LIMIT: usize = 20;
const DEFAULT_REVIEW_QUERY: &str = "reviews";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one, for transient failures only.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250 }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_results: usize,
    pub retry: RetryPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self { max_results: 10, retry: RetryPolicy::default() }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_results: config.search.max_results,
            retry: RetryPolicy {
                max_retries: config.routing.max_invocation_retries,
                base_delay_ms: config.routing.retry_backoff_ms,
            },
        }
    }
}

/// Runs one [`CapabilityRequest`] against the collaborator its descriptor targets.
/// Collaborators that are not configured fail the invocation rather than the build.
pub struct CapabilityExecutor {
    registry: Arc<CapabilityRegistry>,
    search: Arc<dyn SearchBackend>,
    analytics: Option<Arc<dyn AnalyticalDatabase>>,
    translator: Option<Arc<dyn SqlTranslator>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    researcher: Option<Arc<dyn Researcher>>,
    guardrails: SqlGuardrailPolicy,
    settings: ExecutorSettings,
}

impl CapabilityExecutor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        search: Arc<dyn SearchBackend>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            search,
            analytics: None,
            translator: None,
            summarizer: None,
            researcher: None,
            guardrails: SqlGuardrailPolicy::default(),
            settings,
        }
    }

    pub fn with_analytics(
        mut self,
        database: Arc<dyn AnalyticalDatabase>,
        translator: Arc<dyn SqlTranslator>,
        guardrails: SqlGuardrailPolicy,
    ) -> Self {
        self.analytics = Some(database);
        self.translator = Some(translator);
        self.guardrails = guardrails;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_researcher(mut self, researcher: Arc<dyn Researcher>) -> Self {
        self.researcher = Some(researcher);
        self
    }

    /// Executes `request`, retrying transient failures. `prior` holds the results of
    /// earlier steps of the same turn, keyed by step index.
    pub async fn execute(
        &self,
        request: &CapabilityRequest,
        prior: &BTreeMap<usize, CapabilityResult>,
    ) -> Result<CapabilityResult, OrchestrationError> {
        let target = self
            .registry
            .get(request.capability)
            .map(|descriptor| descriptor.target)
            .ok_or_else(|| OrchestrationError::UnknownCapability(request.capability.to_string()))?;
        let inputs: Vec<&CapabilityResult> =
            request.depends_on().filter_map(|step| prior.get(&step)).collect();

        let mut attempt = 1;
        loop {
            match self.attempt(target, request, &inputs).await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_transient() && attempt <= self.settings.retry.max_retries => {
                    warn!(
                        event_name = "capability.retry",
                        capability = %request.capability,
                        step = request.step,
                        attempt,
                        error = %error,
                        "transient capability failure"
                    );
                    let delay = self.settings.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    return Err(OrchestrationError::invocation(
                        request.capability.as_str(),
                        attempt,
                        error,
                    ))
                }
            }
        }
    }

    async fn attempt(
        &self,
        target: DelegationTarget,
        request: &CapabilityRequest,
        inputs: &[&CapabilityResult],
    ) -> Result<CapabilityResult, CollaboratorError> {
        match target {
            DelegationTarget::SearchItems => self.search_items(request, inputs).await,
            DelegationTarget::SearchReviews => self.search_reviews(request, inputs).await,
            DelegationTarget::Summarize => self.summarize(request, inputs).await,
            DelegationTarget::AnalyticalQuery => self.analytical_query(request).await,
            DelegationTarget::Research => self.research(request).await,
            DelegationTarget::Clarification => Err(CollaboratorError::Rejected(
                "clarification requests are answered without a collaborator".to_string(),
            )),
        }
    }

    async fn search_items(
        &self,
        request: &CapabilityRequest,
        inputs: &[&CapabilityResult],
    ) -> Result<CapabilityResult, CollaboratorError> {
        let ideas: Vec<&Idea> = inputs
            .iter()
            .filter_map(|input| match input {
                CapabilityResult::IdeaList(ideas) => Some(ideas.iter()),
                _ => None,
            })
            .flatten()
            .collect();

        if ideas.is_empty() {
            let query = request
                .query
                .as_deref()
                .ok_or_else(|| CollaboratorError::Malformed("item search without a query".to_string()))?;
            let hits = self
                .search
                .search(Collection::Items, &request.filters, query, self.settings.max_results)
                .await?;
            return Ok(CapabilityResult::ItemList(expect_items(hits)?));
        }

        // One search per idea, a few results each.
        let per_idea = (self.settings.max_results / ideas.len()).max(3);
        let searches = ideas.iter().map(|idea| {
            self.search.search(Collection::Items, &request.filters, &idea.query, per_idea)
        });
        let mut combined = CapabilityResult::ItemList(Vec::new());
        for hits in join_all(searches).await {
            let items = CapabilityResult::ItemList(expect_items(hits?)?);
            combined.concat(items).map_err(|_| {
                CollaboratorError::Malformed("idea search returned mixed results".to_string())
            })?;
        }
        Ok(combined)
    }

    async fn search_reviews(
        &self,
        request: &CapabilityRequest,
        inputs: &[&CapabilityResult],
    ) -> Result<CapabilityResult, CollaboratorError> {
        let subject = request.subject().cloned().or_else(|| subject_from(inputs));
        let filters = scoped(&request.filters, subject.as_ref())?;
        let query = request.query.as_deref().unwrap_or(DEFAULT_REVIEW_QUERY);
        let hits = self
            .search
            .search(Collection::Reviews, &filters, query, self.settings.max_results)
            .await?;
        Ok(CapabilityResult::ReviewList(expect_reviews(hits)?))
    }

    async fn summarize(
        &self,
        request: &CapabilityRequest,
        inputs: &[&CapabilityResult],
    ) -> Result<CapabilityResult, CollaboratorError> {
        let Some(subject) = request.subject().cloned().or_else(|| subject_from(inputs)) else {
            return Ok(CapabilityResult::Summary(ReviewSummary::no_reviews(None)));
        };
        let summarizer = self
            .summarizer
            .as_ref()
            .ok_or_else(|| CollaboratorError::Unavailable("no summarizer configured".to_string()))?;

        let filters = scoped(&FilterSet::empty(), Some(&subject))?;
        let hits = self
            .search
            .search(Collection::Reviews, &filters, DEFAULT_REVIEW_QUERY, SUMMARY_REVIEW_LIMIT)
            .await?;
        let mut reviews = expect_reviews(hits)?;
        reviews.sort_by(most_helpful_first);
        reviews.truncate(SUMMARY_REVIEW_LIMIT);
        if reviews.is_empty() {
            return Ok(CapabilityResult::Summary(ReviewSummary::no_reviews(Some(subject))));
        }

        let review_count = reviews.len();
        let texts = CapabilityResult::ReviewList(reviews).review_texts();
        let draft = summarizer.summarize(&texts).await?;
        Ok(CapabilityResult::Summary(ReviewSummary {
            subject: Some(subject),
            review_count,
            pros: draft.pros,
            cons: draft.cons,
            overall: draft.overall,
        }))
    }

    async fn analytical_query(
        &self,
        request: &CapabilityRequest,
    ) -> Result<CapabilityResult, CollaboratorError> {
        let (Some(database), Some(translator)) = (&self.analytics, &self.translator) else {
            return Err(CollaboratorError::Unavailable("no analytical database configured".to_string()));
        };
        let question = request
            .query
            .as_deref()
            .ok_or_else(|| CollaboratorError::Malformed("analytical query without a question".to_string()))?;

        let schema = database.schema_context().await?;
        let sql = translator.translate(question, &schema).await?;
        let statement = match self.guardrails.evaluate(&sql) {
            GuardrailDecision::Allow { statement } => statement,
            GuardrailDecision::Degrade { statement, reason_code } => {
                info!(event_name = "guardrail.degraded", reason_code, "adjusted generated SQL");
                statement
            }
            GuardrailDecision::Deny { reason_code, user_message } => {
                warn!(event_name = "guardrail.denied", reason_code, "refused generated SQL");
                return Err(CollaboratorError::Rejected(format!("{reason_code}: {user_message}")));
            }
        };
        Ok(CapabilityResult::TableRows(database.execute_query(&statement).await?))
    }

    async fn research(&self, request: &CapabilityRequest) -> Result<CapabilityResult, CollaboratorError> {
        let researcher = self
            .researcher
            .as_ref()
            .ok_or_else(|| CollaboratorError::Unavailable("no researcher configured".to_string()))?;
        let intent = request
            .query
            .as_deref()
            .ok_or_else(|| CollaboratorError::Malformed("research without an intent".to_string()))?;
        let queries = researcher.research(intent).await?;
        Ok(CapabilityResult::IdeaList(Idea::numbered(queries)))
    }
}

fn expect_items(hits: SearchHits) -> Result<Vec<Item>, CollaboratorError> {
    match hits {
        SearchHits::Items(items) => Ok(items),
        SearchHits::Reviews(_) => {
            Err(CollaboratorError::Malformed("item search returned reviews".to_string()))
        }
    }
}

fn expect_reviews(hits: SearchHits) -> Result<Vec<Review>, CollaboratorError> {
    match hits {
        SearchHits::Reviews(reviews) => Ok(reviews),
        SearchHits::Items(_) => {
            Err(CollaboratorError::Malformed("review search returned items".to_string()))
        }
    }
}

/// Item a step's input points at: the best-rated item of a list, or the single subject
/// of anything else.
fn subject_from(inputs: &[&CapabilityResult]) -> Option<EntityId> {
    inputs.iter().find_map(|input| match input {
        CapabilityResult::ItemList(items) => {
            items.iter().max_by(|left, right| best_rated(left, right)).map(|item| item.id.clone())
        }
        CapabilityResult::ReviewList(reviews) => reviews.first().map(|review| review.item_id.clone()),
        CapabilityResult::Summary(summary) => summary.subject.clone(),
        other => other.entity_ids().into_iter().next(),
    })
}

/// Ties keep the earlier item.
fn best_rated(left: &Item, right: &Item) -> Ordering {
    let rating = |item: &Item| item.average_rating.unwrap_or(0.0);
    rating(left)
        .total_cmp(&rating(right))
        .then_with(|| left.rating_count.unwrap_or(0).cmp(&right.rating_count.unwrap_or(0)))
        .then(Ordering::Greater)
}

fn most_helpful_first(left: &Review, right: &Review) -> Ordering {
    right
        .helpful_votes
        .cmp(&left.helpful_votes)
        .then_with(|| right.timestamp.cmp(&left.timestamp))
}

/// Adds a `parent_asin` constraint for `subject` unless the filters already pin one.
fn scoped(filters: &FilterSet, subject: Option<&EntityId>) -> Result<FilterSet, CollaboratorError> {
    let Some(subject) = subject else {
        return Ok(filters.clone());
    };
    if filters.constraints_on(Field::ParentAsin).next().is_some() {
        return Ok(filters.clone());
    }
    let mut constraints = filters.constraints().to_vec();
    constraints.push(Constraint::text_eq(Field::ParentAsin, subject.as_str()));
    FilterSet::try_from_constraints(constraints)
        .map_err(|error| CollaboratorError::Rejected(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use shopper_core::collaborators::{
        AnalyticalDatabase, Researcher, SearchBackend, SearchHits, SqlTranslator, Summarizer,
        SummaryDraft,
    };
    use shopper_core::domain::capability::{CapabilityId, CapabilityRequest, ContextRef};
    use shopper_core::domain::filter::{Collection, FilterSet};
    use shopper_core::domain::result::{CapabilityResult, EntityId, Idea, Item, Review, TableRows};
    use shopper_core::errors::{CollaboratorError, OrchestrationError};
    use shopper_core::registry::CapabilityRegistry;
    use shopper_search::InMemorySearchBackend;

    use super::{CapabilityExecutor, ExecutorSettings, RetryPolicy};
    use crate::guardrails::SqlGuardrailPolicy;

    fn item(id: &str, title: &str, rating: f64) -> Item {
        Item {
            id: EntityId::new(id),
            title: title.to_string(),
            price: Some(30.0),
            average_rating: Some(rating),
            rating_count: Some(10),
            ..Item::default()
        }
    }

    fn review(id: &str, item: &str, helpful: u64, day: u32) -> Review {
        Review {
            id: EntityId::new(id),
            item_id: EntityId::new(item),
            rating: 4.0,
            title: format!("title {id}"),
            text: format!("text {id}"),
            helpful_votes: helpful,
            timestamp: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).single(),
            verified_purchase: true,
        }
    }

    fn backend() -> Arc<InMemorySearchBackend> {
        Arc::new(InMemorySearchBackend::new(
            vec![item("A", "Slide Sandal", 4.1), item("B", "Leather Sandal", 4.7)],
            vec![
                review("r1", "A", 3, 1),
                review("r2", "B", 1, 2),
                review("r3", "B", 9, 3),
                review("r4", "B", 9, 4),
            ],
        ))
    }

    fn settings() -> ExecutorSettings {
        ExecutorSettings { max_results: 10, retry: RetryPolicy { max_retries: 2, base_delay_ms: 0 } }
    }

    fn executor(search: Arc<dyn SearchBackend>) -> CapabilityExecutor {
        CapabilityExecutor::new(Arc::new(CapabilityRegistry::standard()), search, settings())
    }

    #[derive(Default)]
    struct RecordingSummarizer {
        seen: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(&self, review_texts: &[String]) -> Result<SummaryDraft, CollaboratorError> {
            self.seen.lock().expect("lock").push(review_texts.to_vec());
            Ok(SummaryDraft {
                pros: vec!["comfortable".to_string()],
                cons: Vec::new(),
                overall: format!("Based on {} reviews, liked.", review_texts.len()),
            })
        }
    }

    #[tokio::test]
    async fn summary_after_search_uses_the_best_rated_item_and_most_helpful_reviews() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let executor = executor(backend()).with_summarizer(summarizer.clone());
        let mut prior = BTreeMap::new();
        prior.insert(
            0,
            CapabilityResult::ItemList(vec![item("A", "Slide Sandal", 4.1), item("B", "Leather Sandal", 4.7)]),
        );
        let request = CapabilityRequest::new(1, CapabilityId::SummarizeReviews).with_ref(ContextRef::PriorStep(0));

        let result = executor.execute(&request, &prior).await.expect("summarized");
        let CapabilityResult::Summary(summary) = result else {
            panic!("expected summary");
        };
        assert_eq!(summary.subject, Some(EntityId::new("B")));
        assert_eq!(summary.review_count, 3);
        let seen = summarizer.seen.lock().expect("lock");
        assert_eq!(seen[0], vec!["title r4: text r4", "title r3: text r3", "title r2: text r2"]);
    }

    #[tokio::test]
    async fn summary_without_reviews_skips_the_summarizer() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let executor = executor(backend()).with_summarizer(summarizer.clone());
        let request = CapabilityRequest::new(0, CapabilityId::SummarizeReviews)
            .with_ref(ContextRef::Entity(EntityId::new("Z")));

        let result = executor.execute(&request, &BTreeMap::new()).await.expect("summarized");
        let CapabilityResult::Summary(summary) = result else {
            panic!("expected summary");
        };
        assert_eq!(summary.review_count, 0);
        assert!(summarizer.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn review_search_is_scoped_to_the_subject() {
        let request = CapabilityRequest::new(0, CapabilityId::SearchReviews)
            .with_query("reviews")
            .with_ref(ContextRef::Entity(EntityId::new("A")));

        let result = executor(backend()).execute(&request, &BTreeMap::new()).await.expect("searched");
        assert_eq!(result.entity_ids(), vec![EntityId::new("r1")]);
    }

    struct Ideas;

    #[async_trait]
    impl Researcher for Ideas {
        async fn research(&self, _intent: &str) -> Result<Vec<String>, CollaboratorError> {
            Ok(vec!["slide".to_string(), "leather".to_string()])
        }
    }

    #[tokio::test]
    async fn item_search_over_ideas_runs_one_search_per_idea() {
        let executor = executor(backend()).with_researcher(Arc::new(Ideas));
        let ideas = executor
            .execute(
                &CapabilityRequest::new(0, CapabilityId::ResearchIdeas).with_query("sandal gift"),
                &BTreeMap::new(),
            )
            .await
            .expect("ideas");
        assert_eq!(ideas, CapabilityResult::IdeaList(Idea::numbered(vec!["slide".into(), "leather".into()])));

        let mut prior = BTreeMap::new();
        prior.insert(0, ideas);
        let request =
            CapabilityRequest::new(1, CapabilityId::SearchItems).with_ref(ContextRef::PriorStep(0));
        let result = executor.execute(&request, &prior).await.expect("searched");
        assert_eq!(result.entity_ids(), vec![EntityId::new("A"), EntityId::new("B")]);
    }

    struct Flaky {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchBackend for Flaky {
        async fn search(
            &self,
            _collection: Collection,
            _filters: &FilterSet,
            _query: &str,
            _max_results: usize,
        ) -> Result<SearchHits, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(CollaboratorError::Unavailable("503".to_string()));
            }
            self.failures.store(0, Ordering::SeqCst);
            Ok(SearchHits::Items(vec![item("A", "Slide Sandal", 4.1)]))
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_a_bounded_number_of_times() {
        let request = CapabilityRequest::new(0, CapabilityId::SearchItems).with_query("sandal");

        let recovering = Arc::new(Flaky { failures: AtomicU32::new(2), calls: AtomicU32::new(0) });
        let result = executor(recovering.clone()).execute(&request, &BTreeMap::new()).await;
        assert!(result.is_ok());
        assert_eq!(recovering.calls.load(Ordering::SeqCst), 3);

        let down = Arc::new(Flaky { failures: AtomicU32::new(100), calls: AtomicU32::new(0) });
        let error = executor(down.clone()).execute(&request, &BTreeMap::new()).await.expect_err("fails");
        assert_eq!(down.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            error,
            OrchestrationError::CapabilityInvocationFailure { attempts: 3, .. }
        ));
    }

    struct Catalog {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnalyticalDatabase for Catalog {
        async fn execute_query(&self, sql: &str) -> Result<TableRows, CollaboratorError> {
            self.executed.lock().expect("lock").push(sql.to_string());
            Ok(TableRows { sql: sql.to_string(), columns: vec!["n".to_string()], rows: Vec::new() })
        }

        async fn schema_context(&self) -> Result<String, CollaboratorError> {
            Ok("{\"items\":{}}".to_string())
        }
    }

    struct Translator(&'static str);

    #[async_trait]
    impl SqlTranslator for Translator {
        async fn translate(&self, _question: &str, _schema: &str) -> Result<String, CollaboratorError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn analytical_sql_passes_through_the_guardrail() {
        let request =
            CapabilityRequest::new(0, CapabilityId::AnalyticalQuery).with_query("how many items?");

        let database = Arc::new(Catalog { executed: Mutex::new(Vec::new()) });
        let executor = executor(backend()).with_analytics(
            database.clone(),
            Arc::new(Translator("SELECT COUNT(*) AS n FROM items")),
            SqlGuardrailPolicy::new(5),
        );
        executor.execute(&request, &BTreeMap::new()).await.expect("ran");
        assert_eq!(
            database.executed.lock().expect("lock").as_slice(),
            &["SELECT COUNT(*) AS n FROM items LIMIT 5".to_string()]
        );

        let refusing = self::executor(backend()).with_analytics(
            database.clone(),
            Arc::new(Translator("DROP TABLE items")),
            SqlGuardrailPolicy::default(),
        );
        let error = refusing.execute(&request, &BTreeMap::new()).await.expect_err("denied");
        assert!(matches!(
            error,
            OrchestrationError::CapabilityInvocationFailure {
                attempts: 1,
                source: CollaboratorError::Rejected(_),
                ..
            }
        ));
        assert_eq!(database.executed.lock().expect("lock").len(), 1);
    }
}
