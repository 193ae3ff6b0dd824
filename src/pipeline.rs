//! Pipeline orchestration: validate, guard, fetch, resize
//!
//! [`ImagePipeline`] is the facade callers use: one URL in, resized JPEG
//! artifacts (or structured errors) out. Each invocation is independent
//! and side-effect-free aside from the single outbound fetch; there is no
//! shared mutable state and no retrying.

use thiserror::Error;

use crate::fetch::{FetchConfig, FetchError, FetchResult, RemoteFetcher};
use crate::resize::{self, FitPolicy, ImageMetadata, ResizeError, ResizedImage, TargetSize};

/// Errors surfaced by whole-pipeline calls.
///
/// In batch mode resize failures are scoped to individual
/// [`ResizedImage`] records instead and never surface here.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Resize(#[from] ResizeError),
}

/// The fetch-and-resize pipeline.
///
/// Construct once per process and share by reference or clone; the
/// pipeline holds only configuration.
#[derive(Debug, Clone, Default)]
pub struct ImagePipeline {
    fetcher: RemoteFetcher,
}

impl ImagePipeline {
    /// Create a pipeline with default limits (50 MiB, 10 s, 5 hops).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipeline with custom fetch configuration.
    pub fn with_config(config: FetchConfig) -> Self {
        Self {
            fetcher: RemoteFetcher::with_config(config),
        }
    }

    /// Fetch a remote image without transforming it.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.fetcher.fetch(url).await
    }

    /// Fetch a remote image and produce a single resized JPEG.
    pub async fn fetch_and_resize(
        &self,
        url: &str,
        width: u32,
        height: u32,
        fit: FitPolicy,
    ) -> Result<Vec<u8>, PipelineError> {
        let fetched = self.fetcher.fetch(url).await?;
        let bytes = run_blocking(move || resize::resize(&fetched.bytes, width, height, fit))
            .await??;
        Ok(bytes)
    }

    /// Fetch a remote image and resize it for every requested target size.
    ///
    /// Output order matches `sizes` order, one record per entry; per-size
    /// failures are carried in the records, so a successful fetch always
    /// yields a full-length batch.
    pub async fn fetch_for_sizes(
        &self,
        url: &str,
        sizes: Vec<TargetSize>,
        fit: FitPolicy,
    ) -> Result<Vec<ResizedImage>, PipelineError> {
        let fetched = self.fetcher.fetch(url).await?;
        let records =
            run_blocking(move || resize::process_for_sizes(&fetched.bytes, &sizes, fit)).await?;
        Ok(records)
    }

    /// Fetch a remote image and report its intrinsic metadata.
    pub async fn inspect(&self, url: &str) -> Result<ImageMetadata, PipelineError> {
        let fetched = self.fetcher.fetch(url).await?;
        let meta = run_blocking(move || resize::metadata(&fetched.bytes)).await??;
        Ok(meta)
    }
}

/// Run CPU-bound image work off the async pool so pipeline callers are not
/// stalled behind a decode.
async fn run_blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Resize(ResizeError::Decode(format!("resize task failed: {e}"))))
}
