//! The per-platform branch pipeline: authenticate → extract → classify.
//!
//! Both monitored platforms run the same pipeline, parameterized by a
//! [`BranchConfig`]; there is no per-platform control flow anywhere in this
//! module. Failures never escape [`BranchPipeline::run`]: they are recorded
//! in the run state so the aggregator and error handler can decide from data.

use std::collections::BTreeSet;
use std::sync::Arc;

use tandem_adapters::{
    AuthAdapter, Classifier, ExtractAdapter, ExtractScope, GroupVerdict, GroupingRule,
    MonitoredGroup, PageCursor,
};
use tandem_types::{
    BranchStatus, Credentials, Error, GroupReport, GroupStatus, Platform, RawTask, Result,
    RunState, TaskState,
};

use crate::aggregate::fold_task_states;
use crate::events::{EventEmitter, RunEvent};
use crate::retry::{run_with_retry, run_with_retry_if, BackoffPolicy};

// ---------------------------------------------------------------------------
// BranchConfig
// ---------------------------------------------------------------------------

/// Everything that makes one platform's branch different from the other:
/// the adapter set, the grouping rule, and the monitored-group table.
pub struct BranchConfig {
    pub platform: Platform,
    pub grouping: GroupingRule,
    pub monitored: Vec<MonitoredGroup>,
    pub auth: Arc<dyn AuthAdapter>,
    pub extract: Arc<dyn ExtractAdapter>,
    pub classifier: Arc<dyn Classifier>,
    pub backoff: BackoffPolicy,
}

// ---------------------------------------------------------------------------
// BranchPipeline
// ---------------------------------------------------------------------------

pub struct BranchPipeline {
    config: BranchConfig,
    events: EventEmitter,
}

impl BranchPipeline {
    pub fn new(config: BranchConfig) -> Self {
        Self {
            config,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn platform(&self) -> Platform {
        self.config.platform
    }

    /// Drive the branch to a terminal state. Never returns an error: the
    /// outcome lands in the branch's slot of the run state.
    pub async fn run(&self, state: &RunState) {
        let platform = self.config.platform;
        if state.branch_status(platform).await.is_terminal() {
            // Terminal states are sticky; nothing may write after them.
            return;
        }

        self.events.emit(RunEvent::BranchStarted { platform });
        state.log(Some(platform), "branch started");

        match self.drive(state).await {
            Ok(()) => {
                let mut guard = state.branch(platform).write().await;
                guard.status.advance(BranchStatus::Succeeded);
                guard.error = None;
                drop(guard);
                state.log(Some(platform), "branch succeeded");
                self.events.emit(RunEvent::BranchCompleted {
                    platform,
                    status: BranchStatus::Succeeded,
                });
            }
            Err(e) => {
                let mut guard = state.branch(platform).write().await;
                guard.error = Some(e.to_string());
                guard.status.advance(BranchStatus::Failed);
                drop(guard);
                state.log(Some(platform), format!("branch failed: {e}"));
                self.events.emit(RunEvent::BranchCompleted {
                    platform,
                    status: BranchStatus::Failed,
                });
            }
        }
    }

    async fn drive(&self, state: &RunState) -> Result<()> {
        let credentials = self.authenticate(state).await?;
        let tasks = self.extract_phase(state, credentials).await?;
        self.classify_phase(state, tasks).await
    }

    // -- authenticate -------------------------------------------------------

    async fn authenticate(&self, state: &RunState) -> Result<Credentials> {
        let platform = self.config.platform;
        self.events.emit(RunEvent::StepStarted {
            platform,
            step: "authenticate".into(),
        });

        let credentials = run_with_retry(
            state,
            platform,
            "authenticate",
            &self.config.backoff,
            || self.config.auth.login(),
        )
        .await?;

        let mut guard = state.branch(platform).write().await;
        guard.credentials = Some(credentials.clone());
        guard.status.advance(BranchStatus::Running);
        drop(guard);

        state.log(Some(platform), "authenticated");
        self.events.emit(RunEvent::StepCompleted {
            platform,
            step: "authenticate".into(),
        });
        Ok(credentials)
    }

    // -- extract ------------------------------------------------------------

    async fn extract_phase(
        &self,
        state: &RunState,
        mut credentials: Credentials,
    ) -> Result<Vec<RawTask>> {
        let platform = self.config.platform;
        self.events.emit(RunEvent::StepStarted {
            platform,
            step: "extract".into(),
        });

        let tasks = loop {
            // Session expiry is excluded from the step-local retry: it has to
            // escalate back to a fresh authenticate pass first.
            let attempt = run_with_retry_if(
                state,
                platform,
                "extract",
                &self.config.backoff,
                |e| e.is_transient() && !matches!(e, Error::SessionExpired { .. }),
                || self.fetch_all_pages(&credentials),
            )
            .await;

            match attempt {
                Ok(tasks) => break tasks,
                Err(Error::SessionExpired { .. }) => {
                    let exhausted = {
                        let mut guard = state.branch(platform).write().await;
                        if guard.retry_count >= state.max_retries {
                            true
                        } else {
                            guard.retry_count += 1;
                            false
                        }
                    };
                    if exhausted {
                        state.log(
                            Some(platform),
                            "session expired and retry budget exhausted",
                        );
                        return Err(Error::SessionExpired { platform });
                    }
                    state.log(
                        Some(platform),
                        "session expired during extraction, re-authenticating",
                    );
                    credentials = self.authenticate(state).await?;
                }
                Err(e) => return Err(e),
            }
        };

        state.log(
            Some(platform),
            format!("extracted {} task row(s) for today", tasks.len()),
        );
        state.branch(platform).write().await.raw_extract = Some(tasks.clone());
        self.events.emit(RunEvent::StepCompleted {
            platform,
            step: "extract".into(),
        });
        Ok(tasks)
    }

    async fn fetch_all_pages(&self, credentials: &Credentials) -> Result<Vec<RawTask>> {
        let mut tasks = Vec::new();
        let mut cursor = PageCursor::first();
        loop {
            let page = self
                .config
                .extract
                .fetch_page(credentials, ExtractScope::Today, cursor)
                .await?;
            tasks.extend(page.tasks);
            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(tasks)
    }

    // -- classify -----------------------------------------------------------

    async fn classify_phase(&self, state: &RunState, tasks: Vec<RawTask>) -> Result<()> {
        let platform = self.config.platform;
        self.events.emit(RunEvent::StepStarted {
            platform,
            step: "classify".into(),
        });

        for group in &self.config.monitored {
            let rows: Vec<RawTask> = tasks
                .iter()
                .filter(|task| self.config.grouping.matches(task, &group.key))
                .cloned()
                .collect();

            let report = if rows.is_empty() {
                GroupReport::no_run("No execution records found for today.")
            } else {
                // Disabled tasks do not affect the process status.
                let enabled: Vec<RawTask> = rows.into_iter().filter(|t| t.enabled).collect();
                if enabled.is_empty() {
                    GroupReport::no_run("No enabled tasks in scope today.")
                } else {
                    let verdict = run_with_retry_if(
                        state,
                        platform,
                        "classify",
                        &self.config.backoff,
                        |e| e.is_transient() || matches!(e, Error::MalformedResponse { .. }),
                        || self.config.classifier.classify(&group.alias, &enabled),
                    )
                    .await?;
                    report_from_verdict(verdict, enabled.len())
                }
            };

            state.log(
                Some(platform),
                format!("group '{}' classified as {}", group.alias, report.status),
            );
            // Written immediately so a later classification failure keeps the
            // groups already classified.
            state
                .branch(platform)
                .write()
                .await
                .process_reports
                .insert(group.alias.clone(), report);
        }

        self.events.emit(RunEvent::StepCompleted {
            platform,
            step: "classify".into(),
        });
        Ok(())
    }
}

/// Turn a classifier verdict into a group report, folding task-level states
/// through the priority rule when the classifier did not pre-aggregate.
fn report_from_verdict(verdict: GroupVerdict, task_count: usize) -> GroupReport {
    match verdict {
        GroupVerdict::Aggregated(report) => report,
        GroupVerdict::TaskStates(states) => {
            let status = fold_task_states(states.iter().map(|v| v.state));
            let failed_task_names: BTreeSet<String> = states
                .iter()
                .filter(|v| v.state == TaskState::Failed)
                .map(|v| v.name.clone())
                .collect();
            let running = states
                .iter()
                .filter(|v| v.state == TaskState::Running)
                .count();
            let summary = match status {
                GroupStatus::Failed => format!(
                    "{} of {} task(s) failed.",
                    failed_task_names.len(),
                    states.len()
                ),
                GroupStatus::Running => {
                    format!("{} of {} task(s) still running.", running, states.len())
                }
                GroupStatus::Pending => format!("{} task(s) queued.", states.len()),
                GroupStatus::Success => {
                    format!("All {} task(s) completed successfully.", states.len())
                }
                GroupStatus::NoRun => "No execution records found for today.".to_string(),
            };
            GroupReport {
                status,
                summary,
                failed_task_names,
                task_count,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
