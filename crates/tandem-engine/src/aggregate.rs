//! Deterministic status aggregation.
//!
//! The same strict priority rule is applied at two levels: first over the
//! task states inside one group, then over all group reports across both
//! platforms. Aggregation runs exactly once per run, strictly after the
//! barrier releases.

use tandem_types::{
    BranchStatus, CombinedReport, GroupStatus, Platform, PlatformSection, RunState, StatusCounts,
    TaskState,
};

// ---------------------------------------------------------------------------
// Priority folds
// ---------------------------------------------------------------------------

/// Fold task states into a group status: Failed > Running > Pending >
/// Success. An empty input means no executions were recorded for the group.
pub fn fold_task_states(states: impl IntoIterator<Item = TaskState>) -> GroupStatus {
    let mut saw_any = false;
    let mut saw_failed = false;
    let mut saw_running = false;
    let mut saw_pending = false;
    for state in states {
        saw_any = true;
        match state {
            TaskState::Failed => saw_failed = true,
            TaskState::Running => saw_running = true,
            TaskState::Pending => saw_pending = true,
            TaskState::Success => {}
        }
    }
    if saw_failed {
        GroupStatus::Failed
    } else if saw_running {
        GroupStatus::Running
    } else if saw_pending {
        GroupStatus::Pending
    } else if saw_any {
        GroupStatus::Success
    } else {
        GroupStatus::NoRun
    }
}

/// Fold group statuses into the overall verdict: Failed > Running > Pending >
/// Success > NoRun. A group that did not run never downgrades an otherwise
/// green run; NoRun surfaces only when nothing at all ran.
pub fn fold_group_statuses(statuses: impl IntoIterator<Item = GroupStatus>) -> GroupStatus {
    let mut saw_failed = false;
    let mut saw_running = false;
    let mut saw_pending = false;
    let mut saw_success = false;
    for status in statuses {
        match status {
            GroupStatus::Failed => saw_failed = true,
            GroupStatus::Running => saw_running = true,
            GroupStatus::Pending => saw_pending = true,
            GroupStatus::Success => saw_success = true,
            GroupStatus::NoRun => {}
        }
    }
    if saw_failed {
        GroupStatus::Failed
    } else if saw_running {
        GroupStatus::Running
    } else if saw_pending {
        GroupStatus::Pending
    } else if saw_success {
        GroupStatus::Success
    } else {
        GroupStatus::NoRun
    }
}

// ---------------------------------------------------------------------------
// Run-level aggregation
// ---------------------------------------------------------------------------

/// Build the combined report from both terminal branches. Group reports from
/// a failed branch are not trusted; the branch is excluded from the scan and
/// named in the combined summary instead.
pub async fn aggregate(state: &RunState) -> CombinedReport {
    let mut platforms = std::collections::BTreeMap::new();
    let mut excluded = Vec::new();
    let mut scanned_statuses = Vec::new();
    let mut failed_groups: Vec<String> = Vec::new();
    let mut group_total = 0usize;

    for platform in Platform::ALL {
        let guard = state.branch(platform).read().await;
        debug_assert!(
            guard.status.is_terminal(),
            "aggregate called before branch {platform} reached a terminal state"
        );
        let section = PlatformSection {
            branch_status: guard.status,
            total_groups: guard.process_reports.len(),
            status_counts: StatusCounts::tally(guard.process_reports.values()),
            reports: guard.process_reports.clone(),
        };
        if guard.status == BranchStatus::Succeeded {
            group_total += guard.process_reports.len();
            for (alias, report) in &guard.process_reports {
                scanned_statuses.push(report.status);
                if report.status == GroupStatus::Failed {
                    failed_groups.push(alias.clone());
                }
            }
        } else {
            excluded.push(platform);
        }
        platforms.insert(platform, section);
    }

    let both_failed = excluded.len() == Platform::ALL.len();
    let overall_status = if both_failed {
        GroupStatus::Failed
    } else {
        fold_group_statuses(scanned_statuses)
    };
    let partial = !excluded.is_empty() && !both_failed;

    let combined_summary = build_summary(
        overall_status,
        group_total,
        &failed_groups,
        &excluded,
        both_failed,
    );

    CombinedReport {
        overall_status,
        combined_summary,
        platforms,
        excluded_platforms: excluded,
        partial,
        generated_at: chrono::Utc::now(),
    }
}

fn build_summary(
    overall_status: GroupStatus,
    group_total: usize,
    failed_groups: &[String],
    excluded: &[Platform],
    both_failed: bool,
) -> String {
    if both_failed {
        return "No data available from either platform; both branches failed.".to_string();
    }

    let mut summary = match overall_status {
        GroupStatus::Failed => {
            let shown: Vec<&str> = failed_groups.iter().take(3).map(String::as_str).collect();
            let ellipsis = if failed_groups.len() > 3 { "..." } else { "" };
            format!(
                "CRITICAL: {} group(s) failed: {}{}",
                failed_groups.len(),
                shown.join(", "),
                ellipsis
            )
        }
        GroupStatus::Running => {
            format!("Executions still in progress across {group_total} monitored group(s).")
        }
        GroupStatus::Pending => {
            format!("Executions queued and waiting across {group_total} monitored group(s).")
        }
        GroupStatus::Success => {
            format!("All {group_total} monitored group(s) completed successfully.")
        }
        GroupStatus::NoRun => "No executions recorded for today's scope.".to_string(),
    };

    for platform in excluded {
        summary.push_str(&format!(" No data from {platform} (branch failed)."));
    }
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
