use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use shopper_cli::commands::{chat, doctor, migrate, seed};
use shopper_core::config::LoadOptions;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_fresh_database() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("SHOPPER_ANALYTICS_URL", &database_url(&dir))], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("SHOPPER_ANALYTICS_URL", &database_url(&dir))], || {
        let first = seed::run(&LoadOptions::default());
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["message"], "demo catalog loaded: 7 items, 9 reviews");

        let second = seed::run(&LoadOptions::default());
        assert_eq!(second.exit_code, 0, "expected second seed success");
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn invalid_env_override_is_a_config_failure() {
    with_env(&[("SHOPPER_ANALYTICS_ROW_LIMIT", "ten")], || {
        let result = seed::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn offline_chat_runs_scripted_turns_against_the_seeded_catalog() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("SHOPPER_ANALYTICS_URL", &database_url(&dir))], || {
        assert_eq!(seed::run(&LoadOptions::default()).exit_code, 0);

        let result = chat::run(
            &LoadOptions::default(),
            vec![
                "find sandals under $30".to_string(),
                "any negative reviews for the first one?".to_string(),
                "hi".to_string(),
            ],
            true,
        );
        assert_eq!(result.exit_code, 0, "chat failed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        let turns = payload["turns"].as_array().expect("turns");
        assert_eq!(turns.len(), 3);

        assert_eq!(turns[0]["status"], "answered");
        let listing = turns[0]["response"].as_str().unwrap_or_default();
        assert!(listing.contains("1. Women's Cushioned Slide Sandal"), "{listing}");
        assert!(listing.contains("Kids Sport Sandals"), "{listing}");
        assert!(!listing.contains("Leather Strappy Sandals"), "{listing}");

        assert_eq!(turns[1]["status"], "answered");
        let reviews = turns[1]["response"].as_str().unwrap_or_default();
        assert!(reviews.contains("Strap tore"), "{reviews}");
        assert!(!reviews.contains("So comfy"), "{reviews}");

        assert_eq!(turns[2]["status"], "clarified");
    });
}

#[test]
fn doctor_flags_an_empty_catalog() {
    let dir = TempDir::new().expect("tempdir");
    with_env(&[("SHOPPER_ANALYTICS_URL", &database_url(&dir))], || {
        let report: Value =
            serde_json::from_str(&doctor::run(&LoadOptions::default(), true)).expect("json");
        assert_eq!(report["overall_status"], "fail");
        let catalog = report["checks"]
            .as_array()
            .and_then(|checks| checks.iter().find(|check| check["name"] == "catalog_readiness"))
            .expect("catalog check");
        assert_eq!(catalog["status"], "fail");

        assert_eq!(seed::run(&LoadOptions::default()).exit_code, 0);
        let report: Value =
            serde_json::from_str(&doctor::run(&LoadOptions::default(), true)).expect("json");
        assert_eq!(report["overall_status"], "pass");
    });
}

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("shopper.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SHOPPER_SEARCH_PROVIDER",
        "SHOPPER_SEARCH_PROJECT_ID",
        "SHOPPER_ANALYTICS_URL",
        "SHOPPER_ANALYTICS_MAX_CONNECTIONS",
        "SHOPPER_ANALYTICS_ROW_LIMIT",
        "SHOPPER_LLM_PROVIDER",
        "SHOPPER_LLM_API_KEY",
        "SHOPPER_LLM_BASE_URL",
        "SHOPPER_LLM_MODEL",
        "SHOPPER_ROUTING_CLASSIFIER",
        "SHOPPER_ROUTING_CONFIDENCE_THRESHOLD",
        "SHOPPER_LOGGING_LEVEL",
        "SHOPPER_LOGGING_FORMAT",
        "SHOPPER_LOG_LEVEL",
        "SHOPPER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
