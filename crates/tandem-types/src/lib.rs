//! Shared types, errors, run state, and reports for the Tandem monitoring workflow.
//!
//! This crate provides the foundational types used across all other Tandem crates:
//! - `Error` — unified error taxonomy with transient/fatal classification
//! - `RunState` — the single mutable record threaded through both branch pipelines
//! - `Journal` — append-only, concurrency-safe run log
//! - `GroupReport` / `CombinedReport` — per-group and run-level status reports
//! - `RunSnapshot` — serializable audit dump of a finished run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Unified error type for all Tandem subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Platform session errors ===
    #[error("{platform} login rejected: {message}")]
    AuthRejected { platform: Platform, message: String },

    #[error("{platform} session expired")]
    SessionExpired { platform: Platform },

    // === Remote I/O errors ===
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("network error talking to {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    #[error("rate limited by {service}, retry after {retry_after_ms}ms")]
    RateLimited {
        service: String,
        retry_after_ms: u64,
    },

    #[error("{service} returned HTTP {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    // === Data errors ===
    #[error("malformed response from {service}: {message}")]
    MalformedResponse { service: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    // === Run bookkeeping ===
    #[error("combined report already recorded for this run")]
    ReportAlreadySet,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns `true` if the error is transient and the step may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::Network { .. }
                | Error::RateLimited { .. }
                | Error::SessionExpired { .. }
                | Error::Upstream {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error is fatal for its branch and retrying will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AuthRejected { .. } | Error::MalformedResponse { .. } | Error::Config(_)
        )
    }
}

/// A convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Platform — the two monitored systems
// ---------------------------------------------------------------------------

/// One of the two monitored reporting platforms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// The task-console system (process scheduler UI).
    Console,
    /// The report-publishing system (distribution executions).
    Publisher,
}

impl Platform {
    /// The fixed branch registry; both pipelines iterate this.
    pub const ALL: [Platform; 2] = [Platform::Console, Platform::Publisher];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Console => "console",
            Platform::Publisher => "publisher",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BranchStatus — per-branch lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of one branch pipeline. Transitions are monotone:
/// `Pending -> Running -> {Succeeded | Failed}`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl BranchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BranchStatus::Succeeded | BranchStatus::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            BranchStatus::Pending => 0,
            BranchStatus::Running => 1,
            BranchStatus::Succeeded | BranchStatus::Failed => 2,
        }
    }

    /// Advance to `next` if it is a forward transition. Returns whether the
    /// transition was applied; regressions and writes past a terminal state
    /// are ignored.
    pub fn advance(&mut self, next: BranchStatus) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        *self = next;
        true
    }
}

// ---------------------------------------------------------------------------
// Task- and group-level statuses
// ---------------------------------------------------------------------------

/// Status of a single task execution. There is no `NoRun` at task
/// granularity; a task row only exists because something ran or was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Failed,
    Running,
    Pending,
    Success,
}

/// Status of a process group, and of the whole run once aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Failed,
    Running,
    Pending,
    Success,
    NoRun,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Failed => "failed",
            GroupStatus::Running => "running",
            GroupStatus::Pending => "pending",
            GroupStatus::Success => "success",
            GroupStatus::NoRun => "no_run",
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GroupReport — classification result for one process group
// ---------------------------------------------------------------------------

/// Classification result for one process group. Immutable once written into
/// the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub status: GroupStatus,
    pub summary: String,
    #[serde(default)]
    pub failed_task_names: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub task_count: usize,
}

impl GroupReport {
    /// Report for a group with no execution records in scope.
    pub fn no_run(summary: impl Into<String>) -> Self {
        Self {
            status: GroupStatus::NoRun,
            summary: summary.into(),
            failed_task_names: Default::default(),
            task_count: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// RawTask — one extracted execution record
// ---------------------------------------------------------------------------

/// One unprocessed task row scraped from a platform, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTask {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Raw status text as the platform displays it ("Success", "Aborted", ...).
    pub status_text: String,
    #[serde(default)]
    pub last_execution: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Credentials — opaque authenticated session
// ---------------------------------------------------------------------------

/// Opaque authenticated session for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub session_token: String,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub issued_at: chrono::DateTime<chrono::Utc>,
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            session_token: token.into(),
            cookies: BTreeMap::new(),
            issued_at: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// CombinedReport — the aggregated run verdict
// ---------------------------------------------------------------------------

/// Group counts per status, for the per-platform report sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub success: usize,
    pub no_run: usize,
}

impl StatusCounts {
    pub fn tally<'a>(reports: impl IntoIterator<Item = &'a GroupReport>) -> Self {
        let mut counts = Self::default();
        for report in reports {
            match report.status {
                GroupStatus::Failed => counts.failed += 1,
                GroupStatus::Running => counts.running += 1,
                GroupStatus::Pending => counts.pending += 1,
                GroupStatus::Success => counts.success += 1,
                GroupStatus::NoRun => counts.no_run += 1,
            }
        }
        counts
    }
}

/// Per-platform section of the combined report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSection {
    pub branch_status: BranchStatus,
    pub total_groups: usize,
    pub status_counts: StatusCounts,
    pub reports: BTreeMap<String, GroupReport>,
}

/// The single aggregated verdict for a run, written exactly once after the
/// barrier releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedReport {
    pub overall_status: GroupStatus,
    pub combined_summary: String,
    pub platforms: BTreeMap<Platform, PlatformSection>,
    pub excluded_platforms: Vec<Platform>,
    /// True when at least one branch failed and the verdict rests on the
    /// other platform's data alone.
    pub partial: bool,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------------
// Journal — append-only run log
// ---------------------------------------------------------------------------

/// One timestamped journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: chrono::DateTime<chrono::Utc>,
    pub platform: Option<Platform>,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.platform {
            Some(p) => write!(f, "{} [{}] {}", self.at.to_rfc3339(), p, self.message),
            None => write!(f, "{} {}", self.at.to_rfc3339(), self.message),
        }
    }
}

/// Append-only run log. Both branch tasks append concurrently; the mutex
/// guarantees no entry is lost, while ordering between branches is
/// unspecified. Entries are never removed.
#[derive(Clone, Default)]
pub struct Journal {
    inner: std::sync::Arc<std::sync::Mutex<Vec<LogEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, platform: Option<Platform>, message: impl Into<String>) {
        let entry = LogEntry {
            at: chrono::Utc::now(),
            platform,
            message: message.into(),
        };
        self.inner
            .lock()
            .expect("journal mutex poisoned")
            .push(entry);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().expect("journal mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("journal mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// RunState — the shared record threaded through both branches
// ---------------------------------------------------------------------------

/// Mutable per-branch slot of the run state. Written only by the owning
/// branch task while the run is in flight; read by the aggregator after the
/// barrier releases.
#[derive(Debug)]
pub struct BranchState {
    pub status: BranchStatus,
    pub credentials: Option<Credentials>,
    pub raw_extract: Option<Vec<RawTask>>,
    pub process_reports: BTreeMap<String, GroupReport>,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl Default for BranchState {
    fn default() -> Self {
        Self {
            status: BranchStatus::Pending,
            credentials: None,
            raw_extract: None,
            process_reports: BTreeMap::new(),
            retry_count: 0,
            error: None,
        }
    }
}

/// The shared state for one run. Created once with zeroed counters and empty
/// maps, threaded through both branch pipelines by `Arc`, read by the
/// aggregator, then discarded (or persisted via [`RunState::snapshot`]).
///
/// Concurrency contract: each platform slot is written only by its own branch
/// task, so the per-slot lock is uncontended during the run; the journal is
/// the only field both branches append to concurrently.
pub struct RunState {
    pub run_id: uuid::Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub max_retries: u32,
    console: tokio::sync::RwLock<BranchState>,
    publisher: tokio::sync::RwLock<BranchState>,
    overall: std::sync::OnceLock<CombinedReport>,
    journal: Journal,
}

impl RunState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            started_at: chrono::Utc::now(),
            max_retries,
            console: tokio::sync::RwLock::new(BranchState::default()),
            publisher: tokio::sync::RwLock::new(BranchState::default()),
            overall: std::sync::OnceLock::new(),
            journal: Journal::new(),
        }
    }

    /// The state slot owned by `platform`'s branch task.
    pub fn branch(&self, platform: Platform) -> &tokio::sync::RwLock<BranchState> {
        match platform {
            Platform::Console => &self.console,
            Platform::Publisher => &self.publisher,
        }
    }

    pub async fn branch_status(&self, platform: Platform) -> BranchStatus {
        self.branch(platform).read().await.status
    }

    /// Append a journal entry, mirroring it to tracing.
    pub fn log(&self, platform: Option<Platform>, message: impl Into<String>) {
        let message = message.into();
        match platform {
            Some(p) => tracing::info!(run = %self.run_id, platform = %p, "{message}"),
            None => tracing::info!(run = %self.run_id, "{message}"),
        }
        self.journal.append(platform, message);
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Record the combined report. Exactly one write per run is allowed; a
    /// second write reports a bug in the caller.
    pub fn set_overall(&self, report: CombinedReport) -> Result<()> {
        self.overall
            .set(report)
            .map_err(|_| Error::ReportAlreadySet)
    }

    pub fn overall(&self) -> Option<&CombinedReport> {
        self.overall.get()
    }

    /// Serializable audit dump of the current state.
    pub async fn snapshot(&self) -> RunSnapshot {
        let mut branches = BTreeMap::new();
        for platform in Platform::ALL {
            let guard = self.branch(platform).read().await;
            branches.insert(
                platform,
                BranchSnapshot {
                    status: guard.status,
                    authenticated: guard.credentials.is_some(),
                    extracted_tasks: guard.raw_extract.as_ref().map(Vec::len),
                    process_reports: guard.process_reports.clone(),
                    retry_count: guard.retry_count,
                    error: guard.error.clone(),
                },
            );
        }
        RunSnapshot {
            run_id: self.run_id,
            started_at: self.started_at,
            max_retries: self.max_retries,
            branches,
            overall: self.overall.get().cloned(),
            journal: self.journal.entries(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunSnapshot — serializable audit dump
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSnapshot {
    pub status: BranchStatus,
    pub authenticated: bool,
    pub extracted_tasks: Option<usize>,
    pub process_reports: BTreeMap<String, GroupReport>,
    pub retry_count: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: uuid::Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub max_retries: u32,
    pub branches: BTreeMap<Platform, BranchSnapshot>,
    pub overall: Option<CombinedReport>,
    pub journal: Vec<LogEntry>,
}

impl RunSnapshot {
    /// Serialize this snapshot to JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a snapshot from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&data)?;
        Ok(snapshot)
    }
}
