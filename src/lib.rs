#![doc(html_root_url = "https://docs.rs/imagesim/0.1.0")]
#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # imagesim
//!
//! Batch near-duplicate detection for image-curation pipelines: every image in a
//! folder is encoded with a pretrained visual-language model into a unit-length
//! feature vector, and all pairs are ranked by cosine similarity.
//!
//! ## Features
//!
//! - **Image Source**: Flat directory scan by extension, RGB decoding, optional resize, metadata
//! - **Embeddings**: Pluggable [`ImageEmbedder`] trait; TorchScript CLIP backend behind the `embeddings` feature
//! - **Similarity**: Pairwise cosine similarity scaled to [-100, 100], sorted descending
//! - **Reports**: Text table, CSV or JSON output with per-image failure details
//!
//! The pairwise step is quadratic in the number of images.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "embeddings")]
//! # fn main() -> imagesim::Result<()> {
//! use imagesim::{rank_folder, Config, EmbeddingEngine, TorchEmbedder};
//!
//! let config = Config::from_env()?;
//! let engine = EmbeddingEngine::from_config(TorchEmbedder::load(&config.model)?, &config);
//! let report = rank_folder(&engine, &config.folder)?;
//! for pair in report.pairs.iter().take(10) {
//!     println!("{} ~ {}: {:.2}", pair.name1, pair.name2, pair.similarity);
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "embeddings"))]
//! # fn main() {}
//! ```

use std::path::Path;

pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
/// Runtime configuration and engine lifecycle states.
pub mod state;
mod utils;

// Public API exports
pub use crate::{
    core::device::DevicePreference,
    core::embeddings::{EmbeddingEngine, EncodeReport, FeatureVector, ImageEmbedder},
    core::similarity::{compute_pairwise_similarity, cosine_similarity, SimilarityRecord},
    core::source::{list_image_paths, ImageMetadata, ImageRecord, ImageSource, ItemFailure},
    error::{AppError, Result, ResultExt},
    models::report::SimilarityReport,
    state::{Config, EngineState, ModelConfig, OutputFormat},
};

#[cfg(feature = "embeddings")]
pub use crate::core::{device::resolve_device, embeddings::TorchEmbedder};

/// Initialize logging with default settings
///
/// Honours `RUST_LOG`, defaulting to `info`. Call once, early in startup.
///
/// # Errors
///
/// Returns an error if a global logger is already installed.
pub fn init() -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| AppError::Internal(format!("Failed to initialize logging: {}", e)))?;

    log::debug!("Logging initialized");
    Ok(())
}

/// Encode every image in `folder` and rank all pairs by similarity
///
/// Per-image failures end up in [`SimilarityReport::failures`]; only folder-level
/// problems (missing folder, duplicate identities, cancellation) are errors.
pub fn rank_folder<E, P>(engine: &EmbeddingEngine<E>, folder: P) -> Result<SimilarityReport>
where
    E: ImageEmbedder,
    P: AsRef<Path>,
{
    let folder = folder.as_ref();
    log::info!("Ranking images in {}", folder.display());

    let encoded = engine.encode_images(folder)?;
    let pairs = compute_pairwise_similarity(&encoded.features)?;

    Ok(SimilarityReport::new(
        folder,
        engine.embedder().name(),
        &encoded,
        pairs,
    ))
}
