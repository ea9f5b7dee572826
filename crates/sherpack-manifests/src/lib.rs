//! Sherpack Manifests - Desired-state artifacts for the Sherpack agent
//!
//! This crate provides:
//! - **Fetching**: Authenticated tarball download with digest pinning and extraction
//! - **Rendering**: Marker-file renderer selection, sub-path fan-out and a raw renderer
//! - **Manifest Cache**: Per-service artifact directories with TTL and jitter

pub mod cache;
pub mod error;
pub mod fetch;
pub mod raw;
pub mod render;

pub use cache::ManifestCache;
pub use error::{ManifestError, Result};
pub use fetch::{ArtifactFetcher, HttpArtifactFetcher, compute_digest, digest_matches};
pub use raw::RawRenderer;
pub use render::{Renderer, RendererSet, dedupe_keep_last, detect_renderer};
