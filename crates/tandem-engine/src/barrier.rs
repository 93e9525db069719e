//! Synchronization barrier over the two branch pipelines.

use std::sync::Arc;

use tandem_types::{BranchStatus, RunState};

use crate::branch::BranchPipeline;

/// Run every branch pipeline as an independent task and release only when
/// all of them are terminal.
///
/// A branch that fails fast satisfies the barrier exactly like one that
/// succeeds; the join imposes no ordering between the branches' internal
/// steps. A panicking branch task is force-completed as `Failed` so the
/// barrier can never deadlock on a lost task.
pub async fn await_both(state: Arc<RunState>, pipelines: Vec<Arc<BranchPipeline>>) {
    let mut handles = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let state = Arc::clone(&state);
        let platform = pipeline.platform();
        handles.push((
            platform,
            tokio::spawn(async move { pipeline.run(&state).await }),
        ));
    }

    for (platform, handle) in handles {
        if let Err(join_err) = handle.await {
            let mut guard = state.branch(platform).write().await;
            guard.error = Some(format!("branch task aborted: {join_err}"));
            guard.status.advance(BranchStatus::Failed);
            drop(guard);
            state.log(
                Some(platform),
                "branch task aborted before reaching a terminal state",
            );
        }
    }
}
