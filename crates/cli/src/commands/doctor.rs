use maimai_core::config::{AppConfig, LoadOptions};
use maimai_core::storage::{KnowledgeLog, UserRecordStore};
use maimai_core::FastPathClassifier;
use maimai_db::{connect_from_config, migrations, JsonKnowledgeLog, JsonUserStore};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report(AppConfig::load(LoadOptions::default()));

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\
                 \"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

pub fn build_report<E: std::fmt::Display>(loaded: Result<AppConfig, E>) -> DoctorReport {
    let mut checks = Vec::new();

    match loaded {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_inference_settings(&config));
            checks.push(check_fast_path_rules());
            checks.push(check_storage(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["inference_settings", "fast_path_rules", "storage", "profile_database"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_ok = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_ok { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_ok {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_inference_settings(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    let secondary_fields = [
        llm.secondary_api_key.is_some(),
        llm.secondary_base_url.is_some(),
        llm.secondary_model.is_some(),
    ];
    let configured = secondary_fields.iter().filter(|set| **set).count();

    if configured != 0 && !llm.has_secondary() {
        return DoctorCheck {
            name: "inference_settings",
            status: CheckStatus::Fail,
            details: "secondary model needs api_key, base_url and model together".to_string(),
        };
    }

    let generation = llm.generation_model();
    DoctorCheck {
        name: "inference_settings",
        status: CheckStatus::Pass,
        details: format!(
            "primary `{}` at {}, generation `{generation}`, timeout {}s, {} retries",
            llm.model, llm.base_url, llm.timeout_secs, llm.max_retries
        ),
    }
}

fn check_fast_path_rules() -> DoctorCheck {
    match FastPathClassifier::new() {
        Ok(_) => DoctorCheck {
            name: "fast_path_rules",
            status: CheckStatus::Pass,
            details: "classifier patterns compiled".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "fast_path_rules",
            status: CheckStatus::Fail,
            details: format!("classifier pattern failed to compile: {error}"),
        },
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map(|runtime| runtime.block_on(future))
        .map_err(|error| format!("failed to initialize async runtime: {error}"))
}

fn check_storage(config: &AppConfig) -> DoctorCheck {
    let users_path = config.storage.users_path();
    let knowledge_path = config.storage.knowledge_path();

    let result = block_on(async {
        let users = JsonUserStore::new(&users_path)
            .load_all()
            .await
            .map_err(|error| error.to_string())?;
        let facts = JsonKnowledgeLog::open(&knowledge_path)
            .await
            .map_err(|error| error.to_string())?
            .all()
            .await
            .map_err(|error| error.to_string())?;
        Ok::<(usize, usize), String>((users.len(), facts.len()))
    })
    .and_then(|loaded| loaded);

    match result {
        Ok((users, facts)) => DoctorCheck {
            name: "storage",
            status: CheckStatus::Pass,
            details: format!(
                "{users} user records in {}, {facts} facts in {}",
                users_path.display(),
                knowledge_path.display()
            ),
        },
        Err(error) => DoctorCheck { name: "storage", status: CheckStatus::Fail, details: error },
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    if !config.database.enabled {
        return DoctorCheck {
            name: "profile_database",
            status: CheckStatus::Skipped,
            details: "profile database disabled; profiles stay in memory".to_string(),
        };
    }

    let result = block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let migrated = migrations::run_pending(&pool)
            .await
            .map_err(|error| format!("failed to apply migrations: {error}"));
        pool.close().await;
        migrated
    })
    .and_then(|connected| connected);

    match result {
        Ok(()) => DoctorCheck {
            name: "profile_database",
            status: CheckStatus::Pass,
            details: format!("connected and migrated `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "profile_database", status: CheckStatus::Fail, details: error }
        }
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
