//! Image discovery and decoding.
//!
//! Scans a single directory (non-recursively) for files with an allowed
//! extension, decodes them into RGB buffers and keeps per-image metadata.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::io::Reader;
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::{file_stem_identity, has_allowed_extension, normalize_extensions, DEFAULT_EXTENSIONS};

/// Number of color channels in every decoded buffer
pub const CHANNELS: u32 = 3;

/// A decoded image and where it came from
#[derive(Clone, Debug)]
pub struct ImageRecord {
    /// File name without extension
    pub identity: String,
    /// Source file
    pub path: PathBuf,
    /// Decoded pixels in RGB order
    pub image: RgbImage,
}

impl ImageRecord {
    /// `(height, width, channels)` of the stored buffer
    pub fn shape(&self) -> (u32, u32, u32) {
        (self.image.height(), self.image.width(), CHANNELS)
    }

    /// Metadata entry for this record
    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            path: self.path.clone(),
            shape: self.shape(),
        }
    }
}

/// Per-image metadata: source path and `(height, width, channels)` after any resize
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Source file
    pub path: PathBuf,
    /// `(height, width, channels)`
    pub shape: (u32, u32, u32),
}

/// Stage at which an image was dropped from a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The file could not be decoded as an image
    Decode,
    /// The model could not produce a feature vector
    Encode,
}

/// An image skipped during a batch, with the reason
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Identity of the skipped image
    pub identity: String,
    /// Source file
    pub path: PathBuf,
    /// Where the batch gave up on it
    pub stage: FailureStage,
    /// Underlying cause
    pub reason: String,
}

/// Result of decoding a list of paths
#[derive(Debug, Default)]
pub struct LoadOutcome {
    /// Successfully decoded images, in input order
    pub records: Vec<ImageRecord>,
    /// Files that could not be decoded, in input order
    pub failures: Vec<ItemFailure>,
}

/// List image files in `folder` whose extension is in `allowed_extensions`, sorted by path.
///
/// Only the folder itself is scanned. An empty result is not an error.
pub fn list_image_paths<P: AsRef<Path>, S: AsRef<str>>(
    folder: P,
    allowed_extensions: &[S],
) -> Result<Vec<PathBuf>> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(AppError::DirectoryNotFound(folder.to_path_buf()));
    }

    let allowed = normalize_extensions(allowed_extensions);
    let mut paths = Vec::new();

    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && has_allowed_extension(&path, &allowed) {
            paths.push(path);
        }
    }

    paths.sort();
    log::debug!("Found {} image(s) in {}", paths.len(), folder.display());

    Ok(paths)
}

/// Identity of the image at `path` (its file stem)
pub fn image_identity(path: &Path) -> Option<String> {
    file_stem_identity(path)
}

/// Reject path lists in which two files share an identity, e.g. `cat.jpg` and `cat.png`
pub fn check_unique_identities(paths: &[PathBuf]) -> Result<()> {
    let mut by_identity: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for path in paths {
        let identity = image_identity(path)
            .ok_or_else(|| AppError::InvalidInput(format!("no file name in {}", path.display())))?;
        by_identity.entry(identity).or_default().push(path.clone());
    }

    match by_identity.into_iter().find(|(_, paths)| paths.len() > 1) {
        Some((identity, paths)) => Err(AppError::DuplicateIdentity { identity, paths }),
        None => Ok(()),
    }
}

/// Decode every path into an RGB buffer, optionally resized to exactly `(width, height)`.
///
/// Files that fail to decode are logged and reported in [`LoadOutcome::failures`];
/// the rest of the batch is unaffected. Output order follows input order.
pub fn load_images(paths: &[PathBuf], resize: Option<(u32, u32)>) -> LoadOutcome {
    let decoded: Vec<std::result::Result<ImageRecord, ItemFailure>> = paths
        .par_iter()
        .map(|path| decode_image(path, resize))
        .collect();

    let mut outcome = LoadOutcome::default();
    for item in decoded {
        match item {
            Ok(record) => outcome.records.push(record),
            Err(failure) => {
                log::warn!("Skipping {}: {}", failure.path.display(), failure.reason);
                outcome.failures.push(failure);
            }
        }
    }
    outcome
}

fn decode_image(path: &Path, resize: Option<(u32, u32)>) -> std::result::Result<ImageRecord, ItemFailure> {
    let identity = image_identity(path).unwrap_or_else(|| path.display().to_string());

    let failure = |reason: String| ItemFailure {
        identity: identity.clone(),
        path: path.to_path_buf(),
        stage: FailureStage::Decode,
        reason,
    };

    // Format comes from the content; the extension only decides discovery
    let img = Reader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| failure(e.to_string()))?
        .decode()
        .map_err(|e| failure(e.to_string()))?;

    let img = match resize {
        Some((width, height)) => img.resize_exact(width, height, FilterType::Triangle),
        None => img,
    };

    Ok(ImageRecord {
        identity,
        path: path.to_path_buf(),
        image: img.to_rgb8(),
    })
}

/// The images of one folder: discovered paths, decoded buffers and their metadata
#[derive(Debug)]
pub struct ImageSource {
    folder: PathBuf,
    extensions: Vec<String>,
    paths: Vec<PathBuf>,
    records: Vec<ImageRecord>,
    failures: Vec<ItemFailure>,
}

impl ImageSource {
    /// Scan `folder` for images with one of `extensions`.
    ///
    /// Fails if the folder is missing or two files share an identity.
    pub fn open<P: AsRef<Path>, S: AsRef<str>>(folder: P, extensions: &[S]) -> Result<Self> {
        let folder = folder.as_ref().to_path_buf();
        let extensions = normalize_extensions(extensions);
        let paths = list_image_paths(&folder, &extensions)?;
        check_unique_identities(&paths)?;

        Ok(Self {
            folder,
            extensions,
            paths,
            records: Vec::new(),
            failures: Vec::new(),
        })
    }

    /// Scan `folder` for `.jpg`, `.jpeg` and `.png` files
    pub fn with_default_extensions<P: AsRef<Path>>(folder: P) -> Result<Self> {
        Self::open(folder, &DEFAULT_EXTENSIONS)
    }

    /// Folder this source was opened on
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Allowed extensions, normalized
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Discovered paths, sorted
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Identities of the discovered paths, in path order
    pub fn identities(&self) -> Vec<String> {
        self.paths.iter().filter_map(|p| image_identity(p)).collect()
    }

    /// Decode all discovered images, replacing any previously loaded set
    pub fn load_images(&mut self, resize: Option<(u32, u32)>) -> &[ImageRecord] {
        let outcome = load_images(&self.paths, resize);
        self.records = outcome.records;
        self.failures = outcome.failures;
        &self.records
    }

    /// Loaded images
    pub fn images(&self) -> &[ImageRecord] {
        &self.records
    }

    /// Metadata of the loaded images, in the same order
    pub fn metadata(&self) -> Vec<ImageMetadata> {
        self.records.iter().map(ImageRecord::metadata).collect()
    }

    /// Files that failed to decode during the last load
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// Release the loaded images together with the decode failures
    pub fn into_parts(self) -> (Vec<ImageRecord>, Vec<ItemFailure>) {
        (self.records, self.failures)
    }
}
