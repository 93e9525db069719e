//! Collaborator interfaces consumed by the Tandem workflow engine, plus the
//! shippable implementations: the hosted-model classifier, the deterministic
//! rule classifier, snapshot-replay platform adapters, and the JSON report
//! renderer.
//!
//! Browser automation against the live consoles is deliberately absent; it
//! lives behind [`AuthAdapter`] and [`ExtractAdapter`] so deployments can plug
//! in their own scrapers.

pub mod adapter;
pub mod classify;
pub mod config;
pub mod render;
pub mod snapshot;

pub use adapter::{AuthAdapter, ExtractAdapter, ExtractPage, ExtractScope, PageCursor};
pub use classify::{Classifier, GroupVerdict, LlmClassifier, RuleClassifier, TaskVerdict};
pub use config::{
    ClassifierConfig, GroupingRule, MonitorConfig, MonitoredGroup, PlatformConfig,
};
pub use render::{JsonReportRenderer, ReportRenderer};
pub use snapshot::SnapshotPlatform;
