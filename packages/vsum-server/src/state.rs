use std::sync::Arc;

use vsum_core::cache::bundle::BundleManager;
use vsum_core::cache::key::NoopExtractor;
use vsum_core::cache::service::CacheService;
use vsum_core::job::JobQueue;
use vsum_core::store::SqliteStore;
use vsum_core::upload::UploadStorage;
use vsum_core::Config;

use crate::http::rate_limit::RateLimiter;

/// Everything an HTTP handler needs, injected via `axum::extract::State`.
/// Cheap to clone: every field is already an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub cache: Arc<CacheService<SqliteStore>>,
    pub bundles: Arc<BundleManager>,
    pub uploads: Arc<UploadStorage<SqliteStore>>,
    pub queue: Arc<JobQueue>,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub extractor: Arc<NoopExtractor>,
    pub version: &'static str,
}
