use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail};
use image::RgbImage;
use ndarray::Array1;
use tokio_util::sync::CancellationToken;

use crate::core::source::{
    check_unique_identities, list_image_paths, load_images, FailureStage, ImageRecord, ItemFailure,
};
use crate::error::{AppError, Result};
use crate::state::{Config, EngineState};
use crate::utils::{normalize_extensions, DEFAULT_EXTENSIONS};

#[cfg(feature = "embeddings")]
pub use self::torch::TorchEmbedder;

/// A model that maps an RGB image to a fixed-length feature vector
pub trait ImageEmbedder {
    /// Model input produced by [`ImageEmbedder::transform`]
    type Input;

    /// Human-readable model identifier
    fn name(&self) -> &str;

    /// Current lifecycle state; encoding requires [`EngineState::Ready`]
    fn state(&self) -> EngineState {
        EngineState::Ready
    }

    /// Resize, crop and normalize an image into the model's input layout
    fn transform(&self, image: &RgbImage) -> anyhow::Result<Self::Input>;

    /// Run inference on a transformed image, without gradient tracking
    fn forward(&self, input: Self::Input) -> anyhow::Result<Vec<f32>>;
}

/// A unit-length embedding of one image
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    identity: String,
    values: Array1<f32>,
}

impl FeatureVector {
    /// L2-normalize `raw` into a feature vector.
    ///
    /// Fails when the vector is empty or its norm is zero or not finite.
    pub fn new(identity: impl Into<String>, raw: Vec<f32>) -> anyhow::Result<Self> {
        if raw.is_empty() {
            bail!("model returned an empty vector");
        }

        let values = Array1::from(raw);
        let norm = values.dot(&values).sqrt();
        if !norm.is_finite() || norm <= 0.0 {
            bail!("cannot normalize vector with norm {}", norm);
        }

        Ok(Self {
            identity: identity.into(),
            values: values / norm,
        })
    }

    /// Identity of the source image
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The normalized values
    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }

    /// Vector length
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2 norm (1 up to rounding)
    pub fn norm(&self) -> f32 {
        self.values.dot(&self.values).sqrt()
    }
}

/// Outcome of encoding one folder
#[derive(Debug, Default)]
pub struct EncodeReport {
    /// Feature vectors keyed by image identity
    pub features: BTreeMap<String, FeatureVector>,
    /// Images that were skipped, with the reason
    pub failures: Vec<ItemFailure>,
}

impl EncodeReport {
    /// Number of encoded images
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether no image was encoded
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Drop the failure list and keep the vectors
    pub fn into_features(self) -> BTreeMap<String, FeatureVector> {
        self.features
    }
}

/// Encodes folders of images with an [`ImageEmbedder`]
#[derive(Debug)]
pub struct EmbeddingEngine<E> {
    embedder: E,
    extensions: Vec<String>,
    resize: Option<(u32, u32)>,
}

impl<E: ImageEmbedder> EmbeddingEngine<E> {
    /// Wrap a ready embedder, scanning for `.jpg`, `.jpeg` and `.png` files
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            extensions: normalize_extensions(&DEFAULT_EXTENSIONS),
            resize: None,
        }
    }

    /// Wrap an embedder using the extensions and resize settings from `config`
    pub fn from_config(embedder: E, config: &Config) -> Self {
        Self::new(embedder)
            .with_extensions(&config.allowed_extensions)
            .with_resize(config.resize)
    }

    /// Override the allowed extensions
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.extensions = normalize_extensions(extensions);
        self
    }

    /// Resize every image to exactly `(width, height)` when it is loaded
    pub fn with_resize(mut self, resize: Option<(u32, u32)>) -> Self {
        self.resize = resize;
        self
    }

    /// The wrapped model
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Encode a single decoded image
    pub fn encode_image(&self, identity: &str, image: &RgbImage) -> anyhow::Result<FeatureVector> {
        let input = self.embedder.transform(image)?;
        let raw = self.embedder.forward(input)?;
        FeatureVector::new(identity, raw)
    }

    /// Encode every image in `folder`.
    ///
    /// Undecodable files and images the model fails on are skipped and listed in
    /// [`EncodeReport::failures`]. A missing folder is an error; a folder without
    /// images yields an empty report.
    pub fn encode_images<P: AsRef<Path>>(&self, folder: P) -> Result<EncodeReport> {
        self.encode_images_with_cancel(folder, &CancellationToken::new())
    }

    /// Like [`EmbeddingEngine::encode_images`], checking `token` before each image
    pub fn encode_images_with_cancel<P: AsRef<Path>>(
        &self,
        folder: P,
        token: &CancellationToken,
    ) -> Result<EncodeReport> {
        let folder = folder.as_ref();
        self.ensure_ready()?;

        let paths = list_image_paths(folder, &self.extensions)?;
        if paths.is_empty() {
            log::warn!("No images found in {}", folder.display());
            return Ok(EncodeReport::default());
        }
        check_unique_identities(&paths)?;

        let loaded = load_images(&paths, self.resize);
        let mut report = EncodeReport {
            features: BTreeMap::new(),
            failures: loaded.failures,
        };

        for record in &loaded.records {
            if token.is_cancelled() {
                log::info!("Encoding of {} cancelled", folder.display());
                return Err(AppError::Cancelled);
            }

            match self.encode_image(&record.identity, &record.image) {
                Ok(vector) => {
                    report.features.insert(record.identity.clone(), vector);
                }
                Err(e) => {
                    log::warn!("Error processing {}: {:#}", record.identity, e);
                    report.failures.push(encode_failure(record, e));
                }
            }
        }

        log::info!(
            "Encoded {} image(s) from {} with {} ({} skipped)",
            report.len(),
            folder.display(),
            self.embedder.name(),
            report.failures.len()
        );

        Ok(report)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.embedder.state() {
            EngineState::Ready => Ok(()),
            state => Err(AppError::Model(format!(
                "{} is not ready for inference (state: {:?})",
                self.embedder.name(),
                state
            ))),
        }
    }
}

fn encode_failure(record: &ImageRecord, err: anyhow::Error) -> ItemFailure {
    ItemFailure {
        identity: record.identity.clone(),
        path: record.path.clone(),
        stage: FailureStage::Encode,
        reason: format!("{:#}", err),
    }
}

/// Convert an RGB image into a CHW buffer scaled to [0, 1] and normalized per channel
pub fn to_normalized_chw(image: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> anyhow::Result<Vec<f32>> {
    if std.iter().any(|&s| s == 0.0) {
        return Err(anyhow!("normalization std must be non-zero"));
    }

    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    Ok(data)
}

#[cfg(feature = "embeddings")]
mod torch {
    use anyhow::{anyhow, Context};
    use image::imageops::{self, FilterType};
    use image::RgbImage;
    use tch::{CModule, Device, Kind, Tensor};

    use super::{to_normalized_chw, ImageEmbedder};
    use crate::core::device::resolve_device;
    use crate::error::{AppError, Result};
    use crate::state::{EngineState, ModelConfig};

    /// CLIP-style visual encoder exported as TorchScript, run through libtorch
    pub struct TorchEmbedder {
        module: CModule,
        device: Device,
        config: ModelConfig,
        label: String,
        state: EngineState,
    }

    impl TorchEmbedder {
        /// Resolve the device, load the weights onto it and switch to inference mode
        pub fn load(config: &ModelConfig) -> Result<Self> {
            if config.input_size == 0 {
                return Err(AppError::Config("model input size must be positive".to_string()));
            }
            if !config.weights.is_file() {
                return Err(AppError::Model(format!(
                    "weights not found at {}",
                    config.weights.display()
                )));
            }

            let mut state = EngineState::Uninitialized;
            let device = resolve_device(&config.devices);
            log::info!("Loading {} on {:?}", config.label(), device);

            let module = CModule::load_on_device(&config.weights, device)?;
            state = state.advance();
            let mut embedder = Self {
                module,
                device,
                config: config.clone(),
                label: config.label(),
                state,
            };

            embedder.module.set_eval();
            embedder.state = embedder.state.advance();
            log::debug!("{} {:?}", embedder.label, embedder.state);

            Ok(embedder)
        }

        /// Device the weights live on
        pub fn device(&self) -> Device {
            self.device
        }
    }

    impl std::fmt::Debug for TorchEmbedder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TorchEmbedder")
                .field("model", &self.label)
                .field("device", &self.device)
                .field("state", &self.state)
                .finish()
        }
    }

    impl ImageEmbedder for TorchEmbedder {
        type Input = Tensor;

        fn name(&self) -> &str {
            &self.label
        }

        fn state(&self) -> EngineState {
            self.state
        }

        fn transform(&self, image: &RgbImage) -> anyhow::Result<Tensor> {
            let size = self.config.input_size;
            let (width, height) = image.dimensions();
            if width == 0 || height == 0 {
                return Err(anyhow!("image has no pixels"));
            }

            // Shorter side to `size`, then center crop
            let scale = size as f32 / width.min(height) as f32;
            let scaled_w = ((width as f32 * scale).round() as u32).max(size);
            let scaled_h = ((height as f32 * scale).round() as u32).max(size);
            let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::CatmullRom);
            let left = (scaled_w - size) / 2;
            let top = (scaled_h - size) / 2;
            let cropped = imageops::crop_imm(&resized, left, top, size, size).to_image();

            let data = to_normalized_chw(&cropped, self.config.mean, self.config.std)?;
            let tensor = Tensor::of_slice(&data)
                .reshape(&[1, 3, size as i64, size as i64])
                .to_kind(Kind::Float)
                .to(self.device);

            Ok(tensor)
        }

        fn forward(&self, input: Tensor) -> anyhow::Result<Vec<f32>> {
            let output = tch::no_grad(|| self.module.forward_ts(&[input]))
                .context("forward pass failed")?;

            let output = output
                .to_kind(Kind::Float)
                .to(Device::Cpu)
                .flatten(0, -1);

            Ok(Vec::<f32>::try_from(output)?)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{imageops, Rgb};
    use std::cell::Cell;
    use tempfile::tempdir;

    /// Downsamples to 4x4 and uses the raw pixel values as the embedding
    struct ThumbnailEmbedder {
        calls: Cell<usize>,
    }

    impl ThumbnailEmbedder {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl ImageEmbedder for ThumbnailEmbedder {
        type Input = RgbImage;

        fn name(&self) -> &str {
            "thumbnail-4x4"
        }

        fn transform(&self, image: &RgbImage) -> anyhow::Result<RgbImage> {
            Ok(imageops::thumbnail(image, 4, 4))
        }

        fn forward(&self, input: RgbImage) -> anyhow::Result<Vec<f32>> {
            self.calls.set(self.calls.get() + 1);
            Ok(input.into_raw().into_iter().map(|v| v as f32).collect())
        }
    }

    struct NotReady;

    impl ImageEmbedder for NotReady {
        type Input = ();

        fn name(&self) -> &str {
            "not-ready"
        }

        fn state(&self) -> EngineState {
            EngineState::ModelLoaded
        }

        fn transform(&self, _image: &RgbImage) -> anyhow::Result<()> {
            Ok(())
        }

        fn forward(&self, _input: ()) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_feature_vector_is_normalized() {
        let vector = FeatureVector::new("a", vec![3.0, 4.0]).unwrap();
        assert_eq!(vector.identity(), "a");
        assert_eq!(vector.dim(), 2);
        assert!((vector.values()[0] - 0.6).abs() < 1e-6);
        assert!((vector.values()[1] - 0.8).abs() < 1e-6);
        assert!((vector.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_feature_vector_rejects_degenerate_input() {
        assert!(FeatureVector::new("zero", vec![0.0; 4]).is_err());
        assert!(FeatureVector::new("empty", Vec::new()).is_err());
        assert!(FeatureVector::new("nan", vec![f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_to_normalized_chw_layout() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 51]));

        let data = to_normalized_chw(&img, [0.0; 3], [1.0; 3]).unwrap();
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.2]);
        assert!(to_normalized_chw(&img, [0.0; 3], [1.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_encode_images_skips_zero_vectors() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "black.png", [0, 0, 0]);
        write_png(dir.path(), "white.png", [255, 255, 255]);

        let engine = EmbeddingEngine::new(ThumbnailEmbedder::new());
        let report = engine.encode_images(dir.path()).unwrap();

        assert_eq!(report.features.keys().collect::<Vec<_>>(), vec!["white"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identity, "black");
        assert_eq!(report.failures[0].stage, FailureStage::Encode);
        assert!(report.failures[0].reason.contains("norm"));
    }

    #[test]
    fn test_encode_images_empty_folder() {
        let dir = tempdir().unwrap();
        let engine = EmbeddingEngine::new(ThumbnailEmbedder::new());
        let report = engine.encode_images(dir.path()).unwrap();
        assert!(report.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(engine.embedder().calls.get(), 0);
    }

    #[test]
    fn test_encode_images_requires_ready_model() {
        let dir = tempdir().unwrap();
        let engine = EmbeddingEngine::new(NotReady);
        assert!(matches!(engine.encode_images(dir.path()), Err(AppError::Model(_))));
    }

    #[test]
    fn test_encode_images_honours_cancellation() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "one.png", [10, 20, 30]);

        let token = CancellationToken::new();
        token.cancel();

        let engine = EmbeddingEngine::new(ThumbnailEmbedder::new());
        let result = engine.encode_images_with_cancel(dir.path(), &token);
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(engine.embedder().calls.get(), 0);
    }

    #[test]
    fn test_custom_extensions() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "kept.png", [1, 2, 3]);
        RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]))
            .save(dir.path().join("ignored.jpg"))
            .unwrap();

        let engine = EmbeddingEngine::new(ThumbnailEmbedder::new()).with_extensions(&["PNG"]);
        let report = engine.encode_images(dir.path()).unwrap();
        assert_eq!(report.features.keys().collect::<Vec<_>>(), vec!["kept"]);
    }
}
