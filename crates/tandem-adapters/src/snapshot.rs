//! Snapshot-replay adapters: drive the workflow from a captured JSON extract
//! instead of a live browser session.
//!
//! The dump is expected to already be scoped to the current day; scoping is
//! the capturing scraper's job.

use async_trait::async_trait;
use std::path::PathBuf;

use tandem_types::{Credentials, Error, Platform, RawTask, Result};

use crate::adapter::{AuthAdapter, ExtractAdapter, ExtractPage, ExtractScope, PageCursor};

const DEFAULT_PAGE_SIZE: usize = 100;

/// Implements both the auth and extraction adapters over a JSON file
/// containing an array of task rows.
pub struct SnapshotPlatform {
    platform: Platform,
    path: PathBuf,
    page_size: usize,
}

impl SnapshotPlatform {
    pub fn new(platform: Platform, path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn load(&self) -> Result<Vec<RawTask>> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&data).map_err(|e| Error::MalformedResponse {
            service: format!("{} snapshot", self.platform),
            message: format!("{}: {e}", self.path.display()),
        })
    }
}

#[async_trait]
impl AuthAdapter for SnapshotPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn login(&self) -> Result<Credentials> {
        // The file standing in for the platform must at least exist.
        if !self.path.exists() {
            return Err(Error::AuthRejected {
                platform: self.platform,
                message: format!("snapshot file not found: {}", self.path.display()),
            });
        }
        Ok(Credentials::bearer(format!("snapshot-{}", self.platform)))
    }
}

#[async_trait]
impl ExtractAdapter for SnapshotPlatform {
    async fn fetch_page(
        &self,
        _credentials: &Credentials,
        _scope: ExtractScope,
        cursor: PageCursor,
    ) -> Result<ExtractPage> {
        let all = self.load().await?;
        let start = (cursor.0 as usize) * self.page_size;
        let end = (start + self.page_size).min(all.len());
        let tasks = if start < all.len() {
            all[start..end].to_vec()
        } else {
            Vec::new()
        };
        let next = if end < all.len() {
            Some(PageCursor(cursor.0 + 1))
        } else {
            None
        };
        Ok(ExtractPage { tasks, next })
    }
}
