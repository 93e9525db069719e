//! Status classification: the trait, the hosted-model client, and the
//! deterministic rule-based fallback.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;

use tandem_types::{Error, GroupReport, GroupStatus, RawTask, Result, TaskState};

use crate::config::ClassifierConfig;

// ---------------------------------------------------------------------------
// Classifier trait
// ---------------------------------------------------------------------------

/// Per-task verdict inside a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskVerdict {
    pub name: String,
    pub state: TaskState,
}

/// What a classifier returns for one process group: either task-level states
/// (folded into a group status by the engine's priority rule) or a
/// pre-aggregated report taken as-is.
#[derive(Debug, Clone)]
pub enum GroupVerdict {
    TaskStates(Vec<TaskVerdict>),
    Aggregated(GroupReport),
}

/// Classifies one process group's task rows into a status verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, group: &str, tasks: &[RawTask]) -> Result<GroupVerdict>;
}

// ---------------------------------------------------------------------------
// RuleClassifier — deterministic status-text mapping
// ---------------------------------------------------------------------------

/// Maps raw status text to a task state with a fixed keyword table. Used for
/// offline runs and as the deterministic test fixture in place of the hosted
/// model.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

/// Status vocabulary across both platforms. Anything unrecognized is treated
/// as a failure so that a novel platform state surfaces in the report instead
/// of being silently ignored.
pub fn map_status_text(status_text: &str) -> TaskState {
    match status_text.trim().to_ascii_lowercase().as_str() {
        "success" | "completed" => TaskState::Success,
        "started" | "triggered" | "retrying" | "aborting" | "running" => TaskState::Running,
        "queued" | "waiting" => TaskState::Pending,
        "failed" | "error" | "aborted" | "skipped" | "never started" | "reset" => {
            TaskState::Failed
        }
        _ => TaskState::Failed,
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, _group: &str, tasks: &[RawTask]) -> Result<GroupVerdict> {
        let verdicts = tasks
            .iter()
            .map(|task| TaskVerdict {
                name: task.name.clone(),
                state: map_status_text(&task.status_text),
            })
            .collect();
        Ok(GroupVerdict::TaskStates(verdicts))
    }
}

// ---------------------------------------------------------------------------
// LlmClassifier — hosted-model classification over an OpenAI-compatible API
// ---------------------------------------------------------------------------

pub struct LlmClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl LlmClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn build_prompt(&self, group: &str, tasks: &[RawTask]) -> String {
        // Token economy: the model only needs name + status + last execution.
        let simplified: Vec<serde_json::Value> = tasks
            .iter()
            .map(|t| {
                json!({
                    "Name": t.name,
                    "Status": t.status_text,
                    "Last execution": t.last_execution,
                })
            })
            .collect();
        format!(
            "Act as a process monitoring analyst. Analyze the following list of tasks for \
             the process '{group}'.\n\
             \n\
             Context:\n\
             - These tasks ran TODAY and all of them matter for the process.\n\
             \n\
             STRICT status hierarchy (top priority wins):\n\
             1. \"Failed\": if ANY task is 'Failed', 'Error', 'Aborted', 'Skipped', \
             'Never started', or 'Reset'. This overrides everything else.\n\
             2. \"Running\": if NO failures, but ANY task is 'Started', 'Triggered', \
             'Retrying', 'Aborting', or 'Running'.\n\
             3. \"Pending\": if NO failures and NO active execution, but tasks are \
             'Queued' or 'Waiting'.\n\
             4. \"Success\": if and ONLY IF ALL tasks are 'Success' or 'Completed'.\n\
             \n\
             Tasks:\n{tasks_json}\n\
             \n\
             Output format (JSON only):\n\
             {{\n\
                 \"status\": \"Success\" | \"Running\" | \"Failed\" | \"Pending\",\n\
                 \"summary\": \"Brief explanation (max 1 sentence)\",\n\
                 \"failed_tasks\": [\"List of task names that failed or were skipped\"]\n\
             }}",
            tasks_json = serde_json::to_string_pretty(&simplified).unwrap_or_default(),
        )
    }

    fn parse_completion(&self, content: &str, task_count: usize) -> Result<GroupReport> {
        let stripped = strip_code_fences(content);
        let value: serde_json::Value =
            serde_json::from_str(stripped.trim()).map_err(|e| Error::MalformedResponse {
                service: "classifier".into(),
                message: format!("completion is not valid JSON: {e}"),
            })?;

        let status_text =
            value["status"]
                .as_str()
                .ok_or_else(|| Error::MalformedResponse {
                    service: "classifier".into(),
                    message: "completion JSON has no 'status' string".into(),
                })?;
        let status = parse_group_status(status_text).ok_or_else(|| Error::MalformedResponse {
            service: "classifier".into(),
            message: format!("unrecognized status '{status_text}' in completion"),
        })?;

        let summary = value["summary"].as_str().unwrap_or("").to_string();
        let failed_task_names: BTreeSet<String> = value["failed_tasks"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(GroupReport {
            status,
            summary,
            failed_task_names,
            task_count,
        })
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, group: &str, tasks: &[RawTask]) -> Result<GroupVerdict> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": self.build_prompt(group, tasks) }],
        });

        let url = format!("{}/chat/completions", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(&url, self.timeout_ms, e))?;

        let status = resp.status();
        let response_body = resp
            .text()
            .await
            .map_err(|e| map_send_error(&url, self.timeout_ms, e))?;

        if !status.is_success() {
            return Err(map_http_error(status, &response_body));
        }

        let value: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| Error::MalformedResponse {
                service: "classifier".into(),
                message: format!("failed to parse response JSON: {e}"),
            })?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::MalformedResponse {
                service: "classifier".into(),
                message: "response has no completion content".into(),
            })?;

        let report = self.parse_completion(content, tasks.len())?;
        Ok(GroupVerdict::Aggregated(report))
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Models wrap JSON in markdown fences often enough that stripping them is
/// part of the contract.
pub fn strip_code_fences(content: &str) -> &str {
    if let Some(rest) = content.split("```json").nth(1) {
        return rest.split("```").next().unwrap_or(rest);
    }
    if let Some(rest) = content.split("```").nth(1) {
        return rest;
    }
    content
}

fn parse_group_status(text: &str) -> Option<GroupStatus> {
    match text.trim().to_ascii_lowercase().as_str() {
        "failed" => Some(GroupStatus::Failed),
        "running" => Some(GroupStatus::Running),
        "pending" => Some(GroupStatus::Pending),
        "success" => Some(GroupStatus::Success),
        "no run" | "no_run" | "no data" => Some(GroupStatus::NoRun),
        _ => None,
    }
}

fn map_send_error(url: &str, timeout_ms: u64, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            endpoint: url.to_string(),
            timeout_ms,
        }
    } else {
        Error::Network {
            endpoint: url.to_string(),
            message: e.to_string(),
        }
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> Error {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            Error::RateLimited {
                service: "classifier".into(),
                retry_after_ms: retry_ms,
            }
        }
        500 | 502 | 503 => Error::Upstream {
            service: "classifier".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => Error::Upstream {
            service: "classifier".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, status_text: &str) -> RawTask {
        RawTask {
            name: name.into(),
            tags: vec![],
            status_text: status_text.into(),
            last_execution: None,
            enabled: true,
        }
    }

    // --- map_status_text ---

    #[test]
    fn status_text_success_vocabulary() {
        assert_eq!(map_status_text("Success"), TaskState::Success);
        assert_eq!(map_status_text("Completed"), TaskState::Success);
        assert_eq!(map_status_text("  completed "), TaskState::Success);
    }

    #[test]
    fn status_text_running_vocabulary() {
        for s in ["Started", "Triggered", "Retrying", "Aborting", "Running"] {
            assert_eq!(map_status_text(s), TaskState::Running, "{s}");
        }
    }

    #[test]
    fn status_text_pending_vocabulary() {
        assert_eq!(map_status_text("Queued"), TaskState::Pending);
        assert_eq!(map_status_text("Waiting"), TaskState::Pending);
    }

    #[test]
    fn status_text_failed_vocabulary() {
        for s in ["Failed", "Error", "Aborted", "Skipped", "Never started", "Reset"] {
            assert_eq!(map_status_text(s), TaskState::Failed, "{s}");
        }
    }

    #[test]
    fn status_text_unknown_is_failed() {
        assert_eq!(map_status_text("Quantum flux"), TaskState::Failed);
    }

    // --- RuleClassifier ---

    #[tokio::test]
    async fn rule_classifier_maps_each_task() {
        let tasks = vec![
            task("Load Sales", "Success"),
            task("Load Stock", "Aborted"),
            task("Publish KPIs", "Running"),
        ];
        let verdict = RuleClassifier.classify("Billing", &tasks).await.unwrap();
        match verdict {
            GroupVerdict::TaskStates(states) => {
                assert_eq!(states.len(), 3);
                assert_eq!(states[0].state, TaskState::Success);
                assert_eq!(states[1].state, TaskState::Failed);
                assert_eq!(states[1].name, "Load Stock");
                assert_eq!(states[2].state, TaskState::Running);
            }
            other => panic!("expected task states, got {other:?}"),
        }
    }

    // --- strip_code_fences ---

    #[test]
    fn strips_json_fence() {
        let content = "Here you go:\n```json\n{\"status\": \"Success\"}\n```\nDone.";
        assert_eq!(strip_code_fences(content).trim(), "{\"status\": \"Success\"}");
    }

    #[test]
    fn strips_bare_fence() {
        let content = "```\n{\"status\": \"Failed\"}\n```";
        assert_eq!(strip_code_fences(content).trim(), "{\"status\": \"Failed\"}");
    }

    #[test]
    fn leaves_unfenced_content_alone() {
        let content = "{\"status\": \"Pending\"}";
        assert_eq!(strip_code_fences(content), content);
    }

    // --- parse_completion ---

    fn classifier() -> LlmClassifier {
        LlmClassifier::new(&ClassifierConfig {
            endpoint: "https://api.example/openai/v1".into(),
            api_key: "test-key".into(),
            model: "test-model".into(),
            timeout_ms: 1000,
        })
        .unwrap()
    }

    #[test]
    fn parse_completion_full_report() {
        let content = r#"```json
        {
            "status": "Failed",
            "summary": "1 task failed out of 4.",
            "failed_tasks": ["Load Stock"]
        }
        ```"#;
        let report = classifier().parse_completion(content, 4).unwrap();
        assert_eq!(report.status, GroupStatus::Failed);
        assert_eq!(report.summary, "1 task failed out of 4.");
        assert!(report.failed_task_names.contains("Load Stock"));
        assert_eq!(report.task_count, 4);
    }

    #[test]
    fn parse_completion_rejects_non_json() {
        let err = classifier()
            .parse_completion("the process looks healthy to me", 2)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn parse_completion_rejects_unknown_status() {
        let err = classifier()
            .parse_completion(r#"{"status": "Sideways", "summary": ""}"#, 2)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(err.to_string().contains("Sideways"));
    }

    #[test]
    fn parse_completion_accepts_case_insensitive_status() {
        let report = classifier()
            .parse_completion(r#"{"status": "success", "summary": "all good"}"#, 3)
            .unwrap();
        assert_eq!(report.status, GroupStatus::Success);
    }

    // --- HTTP error mapping ---

    #[test]
    fn http_429_maps_to_rate_limited() {
        let err = map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"retry_after": 2.5}}"#,
        );
        match err {
            Error::RateLimited { retry_after_ms, .. } => assert_eq!(retry_after_ms, 2500),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(Error::RateLimited {
            service: "classifier".into(),
            retry_after_ms: 2500
        }
        .is_transient());
    }

    #[test]
    fn http_503_is_retryable_upstream() {
        let err = map_http_error(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error": {"message": "overloaded"}}"#,
        );
        assert!(err.is_transient());
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn http_401_is_not_retryable() {
        let err = map_http_error(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!err.is_transient());
    }
}
