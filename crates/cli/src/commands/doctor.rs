use serde::Serialize;
use shopper_agent::HttpLlmClient;
use shopper_core::config::{AppConfig, ClassifierMode, LoadOptions, SearchProvider};
use shopper_db::{connect_from_config, migrations, CatalogRepository, SqlCatalogRepository};
use shopper_search::DiscoveryEngineClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: &LoadOptions, json_output: bool) -> String {
    let report = build_report(options);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_catalog(&config));
            checks.push(check_search(&config));
            checks.push(check_llm(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["catalog_readiness", "search_readiness", "llm_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_catalog(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "catalog_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.analytics)
            .await
            .map_err(|error| format!("failed to connect to analytics database: {error}"))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| format!("failed to apply migrations: {error}"))?;
        let items = SqlCatalogRepository::new(pool.clone())
            .list_items()
            .await
            .map_err(|error| format!("failed to read catalog: {error}"))?;
        pool.close().await;
        Ok::<usize, String>(items.len())
    });

    match result {
        Ok(0) => DoctorCheck {
            name: "catalog_readiness",
            status: CheckStatus::Fail,
            details: format!("`{}` has no items; run `shopper seed`", config.analytics.url),
        },
        Ok(count) => DoctorCheck {
            name: "catalog_readiness",
            status: CheckStatus::Pass,
            details: format!("{count} items in `{}`", config.analytics.url),
        },
        Err(error) => {
            DoctorCheck { name: "catalog_readiness", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_search(config: &AppConfig) -> DoctorCheck {
    match config.search.provider {
        SearchProvider::Local => DoctorCheck {
            name: "search_readiness",
            status: CheckStatus::Pass,
            details: "local search over the analytics catalog".to_string(),
        },
        SearchProvider::DiscoveryEngine => match DiscoveryEngineClient::from_config(&config.search) {
            Ok(client) => DoctorCheck {
                name: "search_readiness",
                status: CheckStatus::Pass,
                details: format!("discovery engine at {}", client.search_url(shopper_core::Collection::Items)),
            },
            Err(error) => DoctorCheck {
                name: "search_readiness",
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        },
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Pass,
            details: format!("{:?} model `{}` at {}", client.provider(), client.model(), client.endpoint()),
        },
        Err(error) if config.routing.classifier == ClassifierMode::Rules => DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Skipped,
            details: format!("{error}; rule-based routing still works with `chat --offline`"),
        },
        Err(error) => DoctorCheck {
            name: "llm_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
