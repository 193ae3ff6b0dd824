//! imagepipe library
//!
//! An SSRF-safe remote image acquisition and resizing pipeline: fetch
//! attacker-controlled URLs with DNS-rebinding-aware validation, enforce
//! size and time bounds, and produce resized JPEG outputs for multiple
//! target dimensions.
//!
//! Flow: caller → URL validation ([`ssrf`]) → resolution guard + bounded
//! fetch ([`fetch`]) → raster transform ([`resize`]), wired together by
//! [`pipeline::ImagePipeline`].
//!
//! ```no_run
//! use imagepipe::pipeline::ImagePipeline;
//! use imagepipe::resize::{FitPolicy, TargetSize};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = ImagePipeline::new();
//! let sizes = vec![TargetSize {
//!     name: "leaderboard".into(),
//!     width: 728,
//!     height: 90,
//!     aspect_ratio: "728:90".into(),
//! }];
//! let records = pipeline
//!     .fetch_for_sizes("https://cdn.example.com/logo.png", sizes, FitPolicy::Cover)
//!     .await?;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod fetch;
pub mod logging;
pub mod pipeline;
pub mod resize;
pub mod ssrf;

pub use fetch::{FetchConfig, FetchError, FetchResult, RemoteFetcher};
pub use pipeline::{ImagePipeline, PipelineError};
pub use resize::{FitPolicy, ImageMetadata, ResizeError, ResizedImage, TargetSize};
pub use ssrf::{SsrfError, SsrfPolicy};
