//! Builds an [`AgentRuntime`] from configuration.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use shopper_agent::{
    AgentRuntime, CapabilityExecutor, ExecutorSettings, HttpLlmClient, LlmClient,
    LlmIntentClassifier, LlmResearcher, LlmSqlTranslator, LlmSummarizer, LlmTextGenerator,
    RuleBasedClassifier, SqlGuardrailPolicy,
};
use shopper_core::collaborators::{IntentClassifier, SearchBackend};
use shopper_core::config::{AppConfig, ClassifierMode, SearchProvider};
use shopper_core::registry::CapabilityRegistry;
use shopper_core::router::DelegationRouter;
use shopper_db::{
    connect_from_config, migrations, CatalogRepository, DbPool, SqlCatalogRepository,
    SqliteAnalytics,
};
use shopper_search::{DiscoveryEngineClient, InMemorySearchBackend};
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WiringOptions {
    /// Run without a language model: rule-based routing and no model-backed capabilities.
    pub offline: bool,
}

pub async fn build_runtime(config: &AppConfig, options: WiringOptions) -> Result<AgentRuntime> {
    let registry = Arc::new(CapabilityRegistry::standard());
    let pool = connect_from_config(&config.analytics)
        .await
        .with_context(|| format!("connecting to analytics database `{}`", config.analytics.url))?;
    migrations::run_pending(&pool).await.context("applying migrations")?;

    let search = search_backend(config, &pool).await?;
    let mut executor =
        CapabilityExecutor::new(registry.clone(), search, ExecutorSettings::from_config(config));

    let client: Option<Arc<dyn LlmClient>> = if options.offline {
        None
    } else {
        Some(Arc::new(HttpLlmClient::from_config(&config.llm).context("configuring the llm client")?))
    };

    let classifier: Arc<dyn IntentClassifier> = match (config.routing.classifier, &client) {
        (ClassifierMode::Rules, _) => Arc::new(RuleBasedClassifier::new()),
        (ClassifierMode::Llm, Some(client)) => Arc::new(LlmIntentClassifier::new(client.clone())),
        (ClassifierMode::Llm, None) => {
            bail!("routing.classifier = \"llm\" needs a language model; run without --offline")
        }
    };

    if let Some(client) = &client {
        let row_limit = config.analytics.row_limit;
        executor = executor
            .with_analytics(
                Arc::new(SqliteAnalytics::new(pool)),
                Arc::new(LlmSqlTranslator::new(client.clone(), row_limit)),
                SqlGuardrailPolicy::new(row_limit),
            )
            .with_summarizer(Arc::new(LlmSummarizer::new(client.clone())))
            .with_researcher(Arc::new(LlmResearcher::new(client.clone())));
    }

    let router = DelegationRouter::new(registry, config.routing.confidence_threshold);
    let mut runtime = AgentRuntime::new(router, classifier, executor);
    if let Some(client) = client {
        runtime = runtime.with_responder(Arc::new(LlmTextGenerator::new(client)));
    }

    info!(
        event_name = "cli.runtime_ready",
        search_provider = ?config.search.provider,
        classifier = ?config.routing.classifier,
        offline = options.offline,
        "concierge runtime assembled"
    );
    Ok(runtime)
}

async fn search_backend(config: &AppConfig, pool: &DbPool) -> Result<Arc<dyn SearchBackend>> {
    match config.search.provider {
        SearchProvider::Local => {
            let repository = SqlCatalogRepository::new(pool.clone());
            let items = repository.list_items().await.context("loading catalog items")?;
            let reviews = repository.list_reviews().await.context("loading catalog reviews")?;
            info!(
                event_name = "cli.local_catalog",
                items = items.len(),
                reviews = reviews.len(),
                "local catalog loaded"
            );
            Ok(Arc::new(InMemorySearchBackend::new(items, reviews)))
        }
        SearchProvider::DiscoveryEngine => Ok(Arc::new(
            DiscoveryEngineClient::from_config(&config.search)
                .context("configuring the discovery engine client")?,
        )),
    }
}
