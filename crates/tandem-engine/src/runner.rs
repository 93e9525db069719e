//! Top-level workflow runner: spawn both branches, hold at the barrier,
//! aggregate once, emit once.

use std::path::PathBuf;
use std::sync::Arc;

use tandem_adapters::ReportRenderer;
use tandem_types::{CombinedReport, Platform, RunSnapshot, RunState};

use crate::aggregate::aggregate;
use crate::barrier::await_both;
use crate::branch::{BranchConfig, BranchPipeline};
use crate::events::{EventEmitter, RunEvent};

/// What a finished run produced. `failed` is the process-level failure
/// marker: both branches failed, or the report emitter did.
pub struct RunOutcome {
    pub report: CombinedReport,
    pub artifact: Option<PathBuf>,
    pub snapshot: RunSnapshot,
    pub failed: bool,
}

pub struct WorkflowRunner {
    pipelines: Vec<Arc<BranchPipeline>>,
    renderer: Arc<dyn ReportRenderer>,
    events: EventEmitter,
}

impl WorkflowRunner {
    pub fn new(
        console: BranchConfig,
        publisher: BranchConfig,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let events = EventEmitter::default();
        let pipelines = vec![
            Arc::new(BranchPipeline::new(console).with_events(events.clone())),
            Arc::new(BranchPipeline::new(publisher).with_events(events.clone())),
        ];
        Self {
            pipelines,
            renderer,
            events,
        }
    }

    /// Subscribe to run progress events.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Execute one full monitoring run against the given state.
    ///
    /// The renderer is invoked at most once, strictly after aggregation, and
    /// never when both branches failed.
    pub async fn run(&self, state: Arc<RunState>) -> RunOutcome {
        state.log(None, "run started");
        self.events.emit(RunEvent::RunStarted {
            run_id: state.run_id,
            platforms: self.pipelines.iter().map(|p| p.platform()).collect(),
        });

        await_both(Arc::clone(&state), self.pipelines.clone()).await;
        self.events.emit(RunEvent::BarrierReleased);
        state.log(None, "both branches terminal, aggregating");

        let report = aggregate(&state).await;
        if let Err(e) = state.set_overall(report.clone()) {
            // A verdict is already recorded, so the emitter has already had
            // its one invocation for this run.
            return self.fail_run(&state, report, &e.to_string()).await;
        }
        self.events.emit(RunEvent::ReportAggregated {
            overall_status: report.overall_status,
            partial: report.partial,
        });

        let both_failed = report.excluded_platforms.len() == Platform::ALL.len();
        if both_failed {
            return self
                .fail_run(&state, report, "both branches failed, nothing to report")
                .await;
        }

        match self.renderer.render(&report).await {
            Ok(path) => {
                state.log(
                    None,
                    format!("report artifact published at {}", path.display()),
                );
                self.events.emit(RunEvent::ArtifactRendered { path: path.clone() });
                RunOutcome {
                    report,
                    artifact: Some(path),
                    snapshot: state.snapshot().await,
                    failed: false,
                }
            }
            Err(e) => {
                self.fail_run(&state, report, &format!("report emitter failed: {e}"))
                    .await
            }
        }
    }

    /// Terminal sink for a run that cannot end with a published artifact:
    /// one final journal entry, the failure marker, and no further retries.
    /// The journal and state snapshot are preserved for diagnosis.
    async fn fail_run(
        &self,
        state: &RunState,
        report: CombinedReport,
        reason: &str,
    ) -> RunOutcome {
        state.log(None, format!("run failed: {reason}"));
        self.events.emit(RunEvent::RunFailed {
            reason: reason.to_string(),
        });
        RunOutcome {
            report,
            artifact: None,
            snapshot: state.snapshot().await,
            failed: true,
        }
    }
}
