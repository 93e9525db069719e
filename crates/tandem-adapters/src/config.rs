//! Environment-driven configuration for a monitoring run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tandem_types::RawTask;

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// How a platform's task rows are partitioned into monitored process groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingRule {
    /// A task belongs to a group when any of its tags contains the group key
    /// (console platform: tags like `FIN_BILLING_DAILY`).
    TagContains,
    /// A task belongs to a group when its name starts with the group key
    /// (publisher platform: names like `h. Executive Dashboard`).
    NamePrefix,
}

impl GroupingRule {
    pub fn matches(&self, task: &RawTask, key: &str) -> bool {
        match self {
            GroupingRule::TagContains => task.tags.iter().any(|tag| tag.contains(key)),
            GroupingRule::NamePrefix => task.name.starts_with(key),
        }
    }
}

/// One monitored process group: the matching key plus the display alias used
/// in reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredGroup {
    pub key: String,
    pub alias: String,
}

/// Parse a `key=alias` comma list, e.g.
/// `FIN_BILLING_DAILY=Billing,FIN_RISK_DAILY=Risk`. An entry without `=`
/// uses the key as its own alias.
pub fn parse_group_table(raw: &str) -> Vec<MonitoredGroup> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, alias)) => MonitoredGroup {
                key: key.trim().to_string(),
                alias: alias.trim().to_string(),
            },
            None => MonitoredGroup {
                key: entry.to_string(),
                alias: entry.to_string(),
            },
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub monitored: Vec<MonitoredGroup>,
    pub grouping: GroupingRule,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub console: PlatformConfig,
    pub publisher: PlatformConfig,
    pub classifier: ClassifierConfig,
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub artifact_dir: PathBuf,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl MonitorConfig {
    /// Load configuration from the environment. Missing values are filled
    /// with defaults; call [`validate`](Self::validate) to find out which
    /// required variables are absent.
    pub fn from_env() -> Self {
        let timeout_ms = env_parse("TIMEOUT_MS", 60_000u64);
        Self {
            console: PlatformConfig {
                base_url: env_or("CONSOLE_URL", ""),
                username: env_or("CONSOLE_USERNAME", ""),
                password: env_or("CONSOLE_PASSWORD", ""),
                monitored: parse_group_table(&env_or("CONSOLE_MONITORED", "")),
                grouping: GroupingRule::TagContains,
            },
            publisher: PlatformConfig {
                base_url: env_or("PUBLISHER_URL", ""),
                username: env_or("PUBLISHER_EMAIL", ""),
                password: env_or("PUBLISHER_PASSWORD", ""),
                monitored: parse_group_table(&env_or("PUBLISHER_MONITORED", "")),
                grouping: GroupingRule::NamePrefix,
            },
            classifier: ClassifierConfig {
                endpoint: env_or("CLASSIFIER_ENDPOINT", "https://api.groq.com/openai/v1"),
                api_key: env_or("CLASSIFIER_API_KEY", ""),
                model: env_or("CLASSIFIER_MODEL", "llama-3.3-70b-versatile"),
                timeout_ms,
            },
            max_retries: env_parse("MAX_RETRIES", 3u32),
            timeout_ms,
            artifact_dir: PathBuf::from(env_or("ARTIFACT_DIR", "reports")),
        }
    }

    /// Names of required environment variables that are missing or empty.
    pub fn validate(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.console.username.is_empty() {
            missing.push("CONSOLE_USERNAME");
        }
        if self.console.password.is_empty() {
            missing.push("CONSOLE_PASSWORD");
        }
        if self.publisher.username.is_empty() {
            missing.push("PUBLISHER_EMAIL");
        }
        if self.publisher.password.is_empty() {
            missing.push("PUBLISHER_PASSWORD");
        }
        if self.classifier.api_key.is_empty() {
            missing.push("CLASSIFIER_API_KEY");
        }
        missing
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, tags: &[&str]) -> RawTask {
        RawTask {
            name: name.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status_text: "Success".into(),
            last_execution: None,
            enabled: true,
        }
    }

    #[test]
    fn parse_group_table_key_alias_pairs() {
        let groups = parse_group_table("FIN_BILLING_DAILY=Billing, FIN_RISK_DAILY=Risk");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "FIN_BILLING_DAILY");
        assert_eq!(groups[0].alias, "Billing");
        assert_eq!(groups[1].alias, "Risk");
    }

    #[test]
    fn parse_group_table_key_only_uses_key_as_alias() {
        let groups = parse_group_table("h.,q1.=Portfolio Quality");
        assert_eq!(groups[0].key, "h.");
        assert_eq!(groups[0].alias, "h.");
        assert_eq!(groups[1].alias, "Portfolio Quality");
    }

    #[test]
    fn parse_group_table_empty_and_whitespace() {
        assert!(parse_group_table("").is_empty());
        assert!(parse_group_table(" , ,").is_empty());
    }

    #[test]
    fn tag_contains_matches_substring_of_any_tag() {
        let rule = GroupingRule::TagContains;
        let t = task("Reload Sales", &["FIN_BILLING_DAILY", "NIGHTLY"]);
        assert!(rule.matches(&t, "FIN_BILLING"));
        assert!(rule.matches(&t, "NIGHTLY"));
        assert!(!rule.matches(&t, "FIN_RISK"));
    }

    #[test]
    fn name_prefix_matches_start_of_name() {
        let rule = GroupingRule::NamePrefix;
        let t = task("h. Executive Dashboard", &[]);
        assert!(rule.matches(&t, "h."));
        assert!(!rule.matches(&t, "q1."));
    }

    #[test]
    fn validate_reports_missing_required_vars() {
        let config = MonitorConfig {
            console: PlatformConfig {
                base_url: String::new(),
                username: "svc-monitor".into(),
                password: String::new(),
                monitored: vec![],
                grouping: GroupingRule::TagContains,
            },
            publisher: PlatformConfig {
                base_url: String::new(),
                username: String::new(),
                password: "hunter2".into(),
                monitored: vec![],
                grouping: GroupingRule::NamePrefix,
            },
            classifier: ClassifierConfig {
                endpoint: "https://api.example/openai/v1".into(),
                api_key: String::new(),
                model: "m".into(),
                timeout_ms: 1000,
            },
            max_retries: 3,
            timeout_ms: 1000,
            artifact_dir: PathBuf::from("reports"),
        };
        let missing = config.validate();
        assert_eq!(
            missing,
            vec!["CONSOLE_PASSWORD", "PUBLISHER_EMAIL", "CLASSIFIER_API_KEY"]
        );
    }

    #[test]
    fn from_env_applies_defaults() {
        // Only defaults are asserted; the required vars are validated separately.
        let config = MonitorConfig::from_env();
        assert_eq!(config.console.grouping, GroupingRule::TagContains);
        assert_eq!(config.publisher.grouping, GroupingRule::NamePrefix);
        assert!(config.max_retries >= 1);
        assert!(config.classifier.endpoint.starts_with("http"));
    }
}
