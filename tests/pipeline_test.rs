//! End-to-end pipeline tests against a local origin
//!
//! Spins up an axum server on a loopback port acting as the remote image
//! host: it serves a real PNG, redirects toward private addresses,
//! produces unbounded redirect chains, oversized bodies, error statuses,
//! and stalled responses. The pipeline runs with `allow_loopback` so the
//! test origin itself is reachable; everything else behaves as production.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use imagepipe::fetch::{FetchConfig, FetchError};
use imagepipe::pipeline::{ImagePipeline, PipelineError};
use imagepipe::resize::{self, FitPolicy, TargetSize};
use imagepipe::ssrf::SsrfError;

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 60, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn target(name: &str, width: u32, height: u32) -> TargetSize {
    TargetSize {
        name: name.to_string(),
        width,
        height,
        aspect_ratio: format!("{width}:{height}"),
    }
}

/// Origin routes used across the tests.
fn origin_app() -> Router {
    let logo = png_bytes(1000, 1000);

    Router::new()
        .route(
            "/logo.png",
            get(move || {
                let bytes = logo.clone();
                async move { ([(header::CONTENT_TYPE, "image/png")], bytes) }
            }),
        )
        .route(
            "/redirect-once",
            get(|| async { Redirect::temporary("/logo.png") }),
        )
        .route(
            "/redirect-private",
            get(|| async {
                Redirect::temporary("http://169.254.169.254/latest/meta-data/")
            }),
        )
        .route("/loop", get(|| async { Redirect::temporary("/loop") }))
        .route(
            "/big",
            get(|| async {
                // 4 MiB with Content-Length, tripping the precheck
                vec![0u8; 4 * 1024 * 1024]
            }),
        )
        .route(
            "/big-chunked",
            get(|| async {
                // 16 MiB in 1 MiB chunks, no Content-Length; only the
                // streaming ceiling can stop this one
                let chunks = (0..16).map(|_| Ok::<Vec<u8>, std::io::Error>(vec![0u8; 1024 * 1024]));
                Body::from_stream(futures_util::stream::iter(chunks)).into_response()
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "too late"
            }),
        )
}

async fn spawn_origin() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, origin_app()).await.unwrap();
    });
    addr
}

fn test_pipeline() -> ImagePipeline {
    ImagePipeline::with_config(
        FetchConfig::default()
            .allow_loopback()
            .with_max_size(2 * 1024 * 1024)
            .with_timeout_ms(3_000),
    )
}

// ============== Happy Path ==============

#[tokio::test]
async fn test_fetch_for_three_ad_sizes_all_succeed() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let sizes = vec![
        target("medium-rectangle", 300, 250),
        target("leaderboard", 728, 90),
        target("wide-skyscraper", 160, 600),
    ];

    let records = pipeline
        .fetch_for_sizes(&format!("http://{addr}/logo.png"), sizes, FitPolicy::Cover)
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    for record in &records {
        assert!(record.error.is_none(), "{:?}", record.error);
        assert!(record.byte_size > 0);

        // Every output decodes as a JPEG of exactly the requested shape
        let meta = resize::metadata(&record.data).unwrap();
        assert_eq!(meta.format, "jpeg");
        assert_eq!((meta.width, meta.height), (record.width, record.height));
    }
}

#[tokio::test]
async fn test_fetch_preserves_bytes_and_content_type() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline
        .fetch(&format!("http://{addr}/logo.png"))
        .await
        .unwrap();

    assert_eq!(result.content_type.as_deref(), Some("image/png"));
    assert_eq!(result.size, result.bytes.len() as u64);

    let meta = resize::metadata(&result.bytes).unwrap();
    assert_eq!((meta.width, meta.height), (1000, 1000));
    assert_eq!(meta.format, "png");
}

#[tokio::test]
async fn test_inspect_reports_intrinsic_metadata() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let meta = pipeline
        .inspect(&format!("http://{addr}/logo.png"))
        .await
        .unwrap();

    assert_eq!((meta.width, meta.height), (1000, 1000));
    assert_eq!(meta.format, "png");
    assert!((meta.aspect_ratio - 1.0).abs() < 1e-9);
}

// ============== Redirect Handling ==============

#[tokio::test]
async fn test_redirect_is_followed_after_revalidation() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline
        .fetch(&format!("http://{addr}/redirect-once"))
        .await
        .unwrap();

    let meta = resize::metadata(&result.bytes).unwrap();
    assert_eq!((meta.width, meta.height), (1000, 1000));
}

#[tokio::test]
async fn test_redirect_to_private_address_is_blocked() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline
        .fetch(&format!("http://{addr}/redirect-private"))
        .await;

    assert!(matches!(
        result,
        Err(FetchError::Ssrf(SsrfError::Blocked(_)))
    ));
}

#[tokio::test]
async fn test_redirect_chain_exceeds_hop_limit() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline.fetch(&format!("http://{addr}/loop")).await;
    assert!(matches!(result, Err(FetchError::TooManyRedirects(_))));
}

// ============== Bounds Enforcement ==============

#[tokio::test]
async fn test_oversized_content_length_rejected_before_streaming() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline.fetch(&format!("http://{addr}/big")).await;
    assert!(matches!(result, Err(FetchError::TooLarge { .. })));
}

#[tokio::test]
async fn test_oversized_stream_aborts_mid_flight() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline.fetch(&format!("http://{addr}/big-chunked")).await;
    match result {
        Err(FetchError::TooLarge { size, max }) => {
            assert_eq!(max, 2 * 1024 * 1024);
            // Aborted within one chunk of the ceiling, nowhere near the
            // 16 MiB the server wanted to send
            assert!(size <= 3 * 1024 * 1024, "buffered {size} bytes");
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stalled_response_times_out() {
    let addr = spawn_origin().await;
    let pipeline = ImagePipeline::with_config(
        FetchConfig::default()
            .allow_loopback()
            .with_timeout_ms(300),
    );

    let result = pipeline.fetch(&format!("http://{addr}/slow")).await;
    assert!(matches!(result, Err(FetchError::Timeout(_))));
}

// ============== Error Statuses and Policy ==============

#[tokio::test]
async fn test_http_error_status_is_surfaced() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let result = pipeline.fetch(&format!("http://{addr}/missing.png")).await;
    assert!(matches!(result, Err(FetchError::HttpStatus(404))));
}

#[tokio::test]
async fn test_loopback_origin_blocked_without_policy_override() {
    let addr = spawn_origin().await;
    // Default policy: the test origin is a private address like any other
    let pipeline = ImagePipeline::new();

    let result = pipeline.fetch(&format!("http://{addr}/logo.png")).await;
    assert!(matches!(
        result,
        Err(FetchError::Ssrf(SsrfError::Blocked(_)))
    ));
}

// ============== Batch Semantics End to End ==============

#[tokio::test]
async fn test_batch_partial_failure_end_to_end() {
    let addr = spawn_origin().await;
    let pipeline = test_pipeline();

    let sizes = vec![
        target("good-a", 300, 250),
        target("broken", 0, 0),
        target("good-b", 160, 600),
    ];

    let records = pipeline
        .fetch_for_sizes(&format!("http://{addr}/logo.png"), sizes, FitPolicy::Cover)
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    assert!(records[0].error.is_none());
    assert!(records[1].error.is_some());
    assert!(records[1].data.is_empty());
    assert!(records[2].error.is_none());
}

#[tokio::test]
async fn test_non_image_body_fails_single_resize() {
    let addr = spawn_origin().await;
    // Ceiling raised so /big (4 MiB of zeros, not a raster image) fetches
    // fully and fails at the decode stage instead
    let pipeline = ImagePipeline::with_config(
        FetchConfig::default()
            .allow_loopback()
            .with_max_size(8 * 1024 * 1024),
    );

    let result = pipeline
        .fetch_and_resize(&format!("http://{addr}/big"), 300, 250, FitPolicy::Cover)
        .await;

    assert!(matches!(result, Err(PipelineError::Resize(_))));
}
