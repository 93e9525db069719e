//! Session and extraction adapter traits.

use async_trait::async_trait;

use tandem_types::{Credentials, Platform, RawTask, Result};

// ---------------------------------------------------------------------------
// Extraction scope and pagination
// ---------------------------------------------------------------------------

/// Time window the extraction is filtered to. The workflow only monitors the
/// current day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractScope {
    Today,
}

/// Opaque page position for the extraction adapter. Page numbering starts at
/// zero; the adapter decides what a page means (a "show more" click, an HTTP
/// offset, a file slice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor(pub u32);

impl PageCursor {
    pub fn first() -> Self {
        PageCursor(0)
    }
}

/// One page of extracted task rows. `next` is `None` when the adapter reports
/// no further pages, which terminates pagination.
#[derive(Debug, Clone)]
pub struct ExtractPage {
    pub tasks: Vec<RawTask>,
    pub next: Option<PageCursor>,
}

// ---------------------------------------------------------------------------
// Adapter traits
// ---------------------------------------------------------------------------

/// Acquires an authenticated session for one platform.
///
/// Implementations bound every remote call by the configured timeout and
/// surface it as [`tandem_types::Error::Timeout`], which the engine treats
/// as transient.
#[async_trait]
pub trait AuthAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn login(&self) -> Result<Credentials>;
}

/// Pulls raw task rows out of a platform, page by page. Implementations must
/// return [`tandem_types::Error::SessionExpired`] when the platform rejects
/// the supplied credentials mid-extraction, so the branch can escalate back
/// to a fresh login.
#[async_trait]
pub trait ExtractAdapter: Send + Sync {
    async fn fetch_page(
        &self,
        credentials: &Credentials,
        scope: ExtractScope,
        cursor: PageCursor,
    ) -> Result<ExtractPage>;
}
