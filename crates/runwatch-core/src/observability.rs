use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::parse_bool_env;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_FILE: &str = "runwatch.logs.jsonl";

#[derive(Debug, PartialEq, Eq)]
enum LogTarget {
    Disabled,
    Console,
    Json { dir: PathBuf, file_name: String },
}

fn resolve_log_target(lookup: impl Fn(&str) -> Option<String>) -> LogTarget {
    if let Some(value) = lookup("RUNWATCH_OBSERVABILITY_ENABLED")
        && parse_bool_env(&value) == Some(false)
    {
        return LogTarget::Disabled;
    }
    let Some(raw) = lookup("RUNWATCH_JSON_LOG_PATH").filter(|p| !p.trim().is_empty()) else {
        return LogTarget::Console;
    };
    let path = PathBuf::from(raw);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_FILE)
        .to_string();
    LogTarget::Json { dir, file_name }
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("RUNWATCH_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `RUNWATCH_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `RUNWATCH_LOG_LEVEL`: optional level/filter override (`info`, `runwatch_core=debug`, ...).
/// - `RUNWATCH_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format.
/// - `RUST_LOG`: filter used when `RUNWATCH_LOG_LEVEL` is unset.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let env_filter = resolve_env_filter();
        match resolve_log_target(|key| std::env::var(key).ok()) {
            LogTarget::Disabled => {}
            LogTarget::Json { dir, file_name } => {
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            LogTarget::Console => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_is_the_default() {
        assert_eq!(resolve_log_target(|_| None), LogTarget::Console);
    }

    #[test]
    fn explicit_disable_wins() {
        let target = resolve_log_target(|key| match key {
            "RUNWATCH_OBSERVABILITY_ENABLED" => Some("off".into()),
            "RUNWATCH_JSON_LOG_PATH" => Some("logs/out.jsonl".into()),
            _ => None,
        });
        assert_eq!(target, LogTarget::Disabled);
    }

    #[test]
    fn json_path_is_split_into_dir_and_file() {
        let target = resolve_log_target(|key| {
            (key == "RUNWATCH_JSON_LOG_PATH").then(|| "logs/out.jsonl".to_string())
        });
        assert_eq!(
            target,
            LogTarget::Json {
                dir: PathBuf::from("logs"),
                file_name: "out.jsonl".into()
            }
        );

        let bare = resolve_log_target(|key| {
            (key == "RUNWATCH_JSON_LOG_PATH").then(|| "out.jsonl".to_string())
        });
        assert_eq!(
            bare,
            LogTarget::Json {
                dir: PathBuf::from("."),
                file_name: "out.jsonl".into()
            }
        );
    }
}
