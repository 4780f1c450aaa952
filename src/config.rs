use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::audit::{AuditRequest, DEFAULT_CANCELLATION_TAGS};
use crate::store::AwsTables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "missing required environment variable {var}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Run settings, read from `SLOTAUDIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    pub profile: String,
    pub calendars_table: String,
    pub results_table: String,
    pub category: String,
    /// Empty means discover from the ledger.
    pub survey_ids: BTreeSet<String>,
    pub cancellation_tags: Vec<String>,
    pub log_name: String,
    pub log_dir: PathBuf,
    pub fetch_concurrency: usize,
    pub metrics_port: Option<u16>,
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| get(key).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(key));

        let cancellation_tags: Vec<String> = match get("SLOTAUDIT_CANCEL_TAGS") {
            Some(raw) => split_list(&raw).collect(),
            None => DEFAULT_CANCELLATION_TAGS.iter().map(|t| t.to_string()).collect(),
        };

        Ok(Self {
            profile: get("SLOTAUDIT_PROFILE").unwrap_or_else(|| "default".into()),
            calendars_table: required("SLOTAUDIT_CALENDARS_TABLE")?,
            results_table: required("SLOTAUDIT_RESULTS_TABLE")?,
            category: required("SLOTAUDIT_CATEGORY_ID")?,
            survey_ids: get("SLOTAUDIT_SURVEY_IDS")
                .map(|raw| split_list(&raw).collect())
                .unwrap_or_default(),
            cancellation_tags,
            log_name: get("SLOTAUDIT_LOG").unwrap_or_else(|| "diff_calendar.log".into()),
            log_dir: get("SLOTAUDIT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            fetch_concurrency: get("SLOTAUDIT_FETCH_CONCURRENCY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(4usize)
                .max(1),
            metrics_port: get("SLOTAUDIT_METRICS_PORT").and_then(|s| s.parse().ok()),
        })
    }

    pub fn tables(&self) -> AwsTables {
        AwsTables {
            calendars: self.calendars_table.clone(),
            results: self.results_table.clone(),
        }
    }

    pub fn request(&self) -> AuditRequest {
        AuditRequest {
            category: self.category.clone(),
            ledger_keys: self.survey_ids.clone(),
            cancellation_tags: self.cancellation_tags.clone(),
            fetch_concurrency: self.fetch_concurrency,
        }
    }

    /// `<profile>_<category>_<log name>` under `log_dir`, with path
    /// separators stripped from the file name.
    pub fn log_path(&self) -> PathBuf {
        let name = format!("{}_{}_{}", self.profile, self.category, self.log_name);
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '#' | '.'))
            .collect();
        self.log_dir.join(safe_name)
    }
}
