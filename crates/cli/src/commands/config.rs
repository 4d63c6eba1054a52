use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use shopper_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<(&str, String, Option<&str>)> = vec![
        ("search.provider", format!("{:?}", config.search.provider), Some("SHOPPER_SEARCH_PROVIDER")),
        ("search.endpoint", config.search.endpoint.clone(), Some("SHOPPER_SEARCH_ENDPOINT")),
        (
            "search.project_id",
            config.search.project_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SHOPPER_SEARCH_PROJECT_ID"),
        ),
        ("search.location", config.search.location.clone(), Some("SHOPPER_SEARCH_LOCATION")),
        (
            "search.items_datastore",
            config.search.items_datastore.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SHOPPER_SEARCH_ITEMS_DATASTORE"),
        ),
        (
            "search.reviews_datastore",
            config.search.reviews_datastore.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SHOPPER_SEARCH_REVIEWS_DATASTORE"),
        ),
        (
            "search.access_token",
            redact_secret(config.search.access_token.as_ref()),
            Some("SHOPPER_SEARCH_ACCESS_TOKEN"),
        ),
        (
            "search.max_results",
            config.search.max_results.to_string(),
            Some("SHOPPER_SEARCH_MAX_RESULTS"),
        ),
        ("analytics.url", config.analytics.url.clone(), Some("SHOPPER_ANALYTICS_URL")),
        (
            "analytics.max_connections",
            config.analytics.max_connections.to_string(),
            Some("SHOPPER_ANALYTICS_MAX_CONNECTIONS"),
        ),
        (
            "analytics.row_limit",
            config.analytics.row_limit.to_string(),
            Some("SHOPPER_ANALYTICS_ROW_LIMIT"),
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), Some("SHOPPER_LLM_PROVIDER")),
        ("llm.model", config.llm.model.clone(), Some("SHOPPER_LLM_MODEL")),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("SHOPPER_LLM_BASE_URL"),
        ),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref()), Some("SHOPPER_LLM_API_KEY")),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), Some("SHOPPER_LLM_TIMEOUT_SECS")),
        (
            "routing.classifier",
            format!("{:?}", config.routing.classifier),
            Some("SHOPPER_ROUTING_CLASSIFIER"),
        ),
        (
            "routing.confidence_threshold",
            config.routing.confidence_threshold.to_string(),
            Some("SHOPPER_ROUTING_CONFIDENCE_THRESHOLD"),
        ),
        (
            "routing.max_invocation_retries",
            config.routing.max_invocation_retries.to_string(),
            Some("SHOPPER_ROUTING_MAX_INVOCATION_RETRIES"),
        ),
        ("routing.retry_backoff_ms", config.routing.retry_backoff_ms.to_string(), None),
        ("routing.max_turn_history", config.routing.max_turn_history.to_string(), None),
        ("logging.level", config.logging.level.clone(), Some("SHOPPER_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("SHOPPER_LOGGING_FORMAT")),
    ];

    let mut lines =
        vec!["effective config (source precedence: overrides > env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }
    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("shopper.toml"), PathBuf::from("config/shopper.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
