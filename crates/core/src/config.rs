use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub analytics: AnalyticsConfig,
    pub llm: LlmConfig,
    pub routing: RoutingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    pub endpoint: String,
    pub project_id: Option<String>,
    pub location: String,
    pub items_datastore: Option<String>,
    pub reviews_datastore: Option<String>,
    pub access_token: Option<SecretString>,
    pub max_results: usize,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AnalyticsConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub row_limit: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub classifier: ClassifierMode,
    pub confidence_threshold: f64,
    pub max_invocation_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_turn_history: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchProvider {
    /// In-process index over the analytics catalog.
    Local,
    DiscoveryEngine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    Llm,
    Rules,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub analytics_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub search_provider: Option<SearchProvider>,
    pub classifier: Option<ClassifierMode>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

const SEARCH_LOCATIONS: &[&str] = &["global", "us", "eu"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig {
                provider: SearchProvider::Local,
                endpoint: "https://discoveryengine.googleapis.com".to_string(),
                project_id: None,
                location: "global".to_string(),
                items_datastore: None,
                reviews_datastore: None,
                access_token: None,
                max_results: 10,
                timeout_secs: 30,
            },
            analytics: AnalyticsConfig {
                url: "sqlite://shopper.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                row_limit: 10,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            routing: RoutingConfig {
                classifier: ClassifierMode::Rules,
                confidence_threshold: 0.6,
                max_invocation_retries: 2,
                retry_backoff_ms: 250,
                max_turn_history: 50,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for SearchProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local" => Ok(Self::Local),
            "discovery_engine" | "vertex" => Ok(Self::DiscoveryEngine),
            other => Err(ConfigError::Validation(format!(
                "unsupported search provider `{other}` (expected local|discovery_engine)"
            ))),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ClassifierMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "rules" => Ok(Self::Rules),
            other => Err(ConfigError::Validation(format!(
                "unsupported classifier `{other}` (expected llm|rules)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shopper.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(search) = patch.search {
            if let Some(provider) = search.provider {
                self.search.provider = provider;
            }
            if let Some(endpoint) = search.endpoint {
                self.search.endpoint = endpoint;
            }
            if let Some(project_id) = search.project_id {
                self.search.project_id = Some(project_id);
            }
            if let Some(location) = search.location {
                self.search.location = location;
            }
            if let Some(items_datastore) = search.items_datastore {
                self.search.items_datastore = Some(items_datastore);
            }
            if let Some(reviews_datastore) = search.reviews_datastore {
                self.search.reviews_datastore = Some(reviews_datastore);
            }
            if let Some(access_token) = search.access_token {
                self.search.access_token = Some(secret_value(access_token));
            }
            if let Some(max_results) = search.max_results {
                self.search.max_results = max_results;
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
        }

        if let Some(analytics) = patch.analytics {
            if let Some(url) = analytics.url {
                self.analytics.url = url;
            }
            if let Some(max_connections) = analytics.max_connections {
                self.analytics.max_connections = max_connections;
            }
            if let Some(timeout_secs) = analytics.timeout_secs {
                self.analytics.timeout_secs = timeout_secs;
            }
            if let Some(row_limit) = analytics.row_limit {
                self.analytics.row_limit = row_limit;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(classifier) = routing.classifier {
                self.routing.classifier = classifier;
            }
            if let Some(confidence_threshold) = routing.confidence_threshold {
                self.routing.confidence_threshold = confidence_threshold;
            }
            if let Some(max_invocation_retries) = routing.max_invocation_retries {
                self.routing.max_invocation_retries = max_invocation_retries;
            }
            if let Some(retry_backoff_ms) = routing.retry_backoff_ms {
                self.routing.retry_backoff_ms = retry_backoff_ms;
            }
            if let Some(max_turn_history) = routing.max_turn_history {
                self.routing.max_turn_history = max_turn_history;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHOPPER_SEARCH_PROVIDER") {
            self.search.provider = value.parse()?;
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_ENDPOINT") {
            self.search.endpoint = value;
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_PROJECT_ID") {
            self.search.project_id = Some(value);
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_LOCATION") {
            self.search.location = value;
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_ITEMS_DATASTORE") {
            self.search.items_datastore = Some(value);
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_REVIEWS_DATASTORE") {
            self.search.reviews_datastore = Some(value);
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_ACCESS_TOKEN") {
            self.search.access_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("SHOPPER_SEARCH_MAX_RESULTS") {
            self.search.max_results = parse_usize("SHOPPER_SEARCH_MAX_RESULTS", &value)?;
        }

        if let Some(value) = read_env("SHOPPER_ANALYTICS_URL") {
            self.analytics.url = value;
        }
        if let Some(value) = read_env("SHOPPER_ANALYTICS_MAX_CONNECTIONS") {
            self.analytics.max_connections =
                parse_u32("SHOPPER_ANALYTICS_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHOPPER_ANALYTICS_ROW_LIMIT") {
            self.analytics.row_limit = parse_u32("SHOPPER_ANALYTICS_ROW_LIMIT", &value)?;
        }

        if let Some(value) = read_env("SHOPPER_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("SHOPPER_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SHOPPER_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SHOPPER_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SHOPPER_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SHOPPER_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SHOPPER_ROUTING_CLASSIFIER") {
            self.routing.classifier = value.parse()?;
        }
        if let Some(value) = read_env("SHOPPER_ROUTING_CONFIDENCE_THRESHOLD") {
            self.routing.confidence_threshold =
                parse_f64("SHOPPER_ROUTING_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("SHOPPER_ROUTING_MAX_INVOCATION_RETRIES") {
            self.routing.max_invocation_retries =
                parse_u32("SHOPPER_ROUTING_MAX_INVOCATION_RETRIES", &value)?;
        }

        let log_level =
            read_env("SHOPPER_LOGGING_LEVEL").or_else(|| read_env("SHOPPER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHOPPER_LOGGING_FORMAT").or_else(|| read_env("SHOPPER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(analytics_url) = overrides.analytics_url {
            self.analytics.url = analytics_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(search_provider) = overrides.search_provider {
            self.search.provider = search_provider;
        }
        if let Some(classifier) = overrides.classifier {
            self.routing.classifier = classifier;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_search(&self.search)?;
        validate_analytics(&self.analytics)?;
        validate_llm(&self.llm)?;
        validate_routing(&self.routing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shopper.toml"), PathBuf::from("config/shopper.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if !SEARCH_LOCATIONS.contains(&search.location.trim()) {
        return Err(ConfigError::Validation(format!(
            "search.location must be one of {}",
            SEARCH_LOCATIONS.join("|")
        )));
    }

    if search.max_results == 0 || search.max_results > 100 {
        return Err(ConfigError::Validation(
            "search.max_results must be in range 1..=100".to_string(),
        ));
    }

    if search.provider == SearchProvider::DiscoveryEngine {
        let blank = |value: &Option<String>| value.as_deref().map(str::trim).unwrap_or("").is_empty();
        if blank(&search.project_id) {
            return Err(ConfigError::Validation(
                "search.project_id is required for the discovery_engine provider".to_string(),
            ));
        }
        if blank(&search.items_datastore) || blank(&search.reviews_datastore) {
            return Err(ConfigError::Validation(
                "search.items_datastore and search.reviews_datastore are required for the discovery_engine provider"
                    .to_string(),
            ));
        }
        let missing_token = search
            .access_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "search.access_token is required for the discovery_engine provider".to_string(),
            ));
        }
        if !search.endpoint.starts_with("http://") && !search.endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "search.endpoint must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_analytics(analytics: &AnalyticsConfig) -> Result<(), ConfigError> {
    let url = analytics.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "analytics.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if analytics.max_connections == 0 {
        return Err(ConfigError::Validation(
            "analytics.max_connections must be greater than zero".to_string(),
        ));
    }

    if analytics.timeout_secs == 0 || analytics.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "analytics.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if analytics.row_limit == 0 || analytics.row_limit > 1000 {
        return Err(ConfigError::Validation(
            "analytics.row_limit must be in range 1..=1000".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::Gemini | LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for gemini/openai providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&routing.confidence_threshold) {
        return Err(ConfigError::Validation(
            "routing.confidence_threshold must be in range 0.0..=1.0".to_string(),
        ));
    }

    if routing.max_invocation_retries > 5 {
        return Err(ConfigError::Validation(
            "routing.max_invocation_retries must be at most 5".to_string(),
        ));
    }

    if routing.retry_backoff_ms > 10_000 {
        return Err(ConfigError::Validation(
            "routing.retry_backoff_ms must be at most 10000".to_string(),
        ));
    }

    if routing.max_turn_history == 0 {
        return Err(ConfigError::Validation(
            "routing.max_turn_history must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    search: Option<SearchPatch>,
    analytics: Option<AnalyticsPatch>,
    llm: Option<LlmPatch>,
    routing: Option<RoutingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    provider: Option<SearchProvider>,
    endpoint: Option<String>,
    project_id: Option<String>,
    location: Option<String>,
    items_datastore: Option<String>,
    reviews_datastore: Option<String>,
    access_token: Option<String>,
    max_results: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsPatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    row_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    classifier: Option<ClassifierMode>,
    confidence_threshold: Option<f64>,
    max_invocation_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    max_turn_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
