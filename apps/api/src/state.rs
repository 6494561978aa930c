use std::sync::Arc;

use crate::config::Config;
use crate::documents::FsDocumentStore;
use crate::queue::JobQueue;
use crate::store::JobStore;

/// Shared application state injected into all route handlers via Axum
/// extractors. The worker tasks carry their own context; handlers only
/// need the store, the queue, and the upload store.
#[derive(Clone)]
pub struct AppState {
    /// Kept for handlers that need runtime limits later; workers carry
    /// their own copy of the relevant knobs.
    #[allow(dead_code)]
    pub config: Config,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub documents: Arc<FsDocumentStore>,
}
