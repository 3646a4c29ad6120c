use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::device::DevicePreference;
use crate::error::{AppError, Result};
use crate::utils::{normalize_extensions, DEFAULT_EXTENSIONS};

const ENV_FOLDER: &str = "IMAGESIM_FOLDER";
const ENV_EXTENSIONS: &str = "IMAGESIM_EXTENSIONS";
const ENV_RESIZE: &str = "IMAGESIM_RESIZE";
const ENV_MODEL: &str = "IMAGESIM_MODEL";
const ENV_MODEL_NAME: &str = "IMAGESIM_MODEL_NAME";
const ENV_PRETRAINED: &str = "IMAGESIM_PRETRAINED";
const ENV_INPUT_SIZE: &str = "IMAGESIM_INPUT_SIZE";
const ENV_DEVICES: &str = "IMAGESIM_DEVICES";
const ENV_FORMAT: &str = "IMAGESIM_FORMAT";

/// Lifecycle of an embedding backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing has been loaded yet
    Uninitialized,
    /// Weights are on the device but the model is not in inference mode
    ModelLoaded,
    /// Inference mode; encoding is permitted
    Ready,
}

impl EngineState {
    /// The state after the next load step; `Ready` stays `Ready`
    pub fn advance(self) -> Self {
        match self {
            Self::Uninitialized => Self::ModelLoaded,
            Self::ModelLoaded | Self::Ready => Self::Ready,
        }
    }
}

/// Output representation of the similarity table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned plain-text table
    #[default]
    Table,
    /// `Image1,Image2,Similarity` rows
    Csv,
    /// Full report as pretty-printed JSON
    Json,
}

impl FromStr for OutputFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "table" | "text" => Ok(Self::Table),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(AppError::Config(format!("unknown output format: {}", other))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Table => "table",
            Self::Csv => "csv",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// Embedding model configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    /// Path to the TorchScript export of the visual encoder
    pub weights: PathBuf,
    /// Architecture name, reported alongside results
    pub name: String,
    /// Pretrained weight tag, reported alongside results
    pub pretrained: String,
    /// Square input resolution expected by the encoder
    pub input_size: u32,
    /// Per-channel normalization mean (RGB)
    pub mean: [f32; 3],
    /// Per-channel normalization standard deviation (RGB)
    pub std: [f32; 3],
    /// Devices to try, in order
    pub devices: Vec<DevicePreference>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("models/ViT-B-16-plus-240.pt"),
            name: String::from("ViT-B-16-plus-240"),
            pretrained: String::from("laion400m_e32"),
            input_size: 240,
            // OpenAI CLIP statistics
            mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
            std: [0.268_629_54, 0.261_302_58, 0.275_777_1],
            devices: DevicePreference::default_chain(),
        }
    }
}

impl ModelConfig {
    /// Identifier used in reports, e.g. `ViT-B-16-plus-240/laion400m_e32`
    pub fn label(&self) -> String {
        format!("{}/{}", self.name, self.pretrained)
    }
}

/// Configuration for the application
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Folder scanned for images
    pub folder: PathBuf,
    /// Allowed file extensions, lowercase without the leading dot
    pub allowed_extensions: Vec<String>,
    /// Optional exact (width, height) applied when images are loaded
    pub resize: Option<(u32, u32)>,
    /// Embedding model configuration
    pub model: ModelConfig,
    /// How the similarity table is written
    pub output_format: OutputFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("media").join("input"),
            allowed_extensions: normalize_extensions(&DEFAULT_EXTENSIONS),
            resize: None,
            model: ModelConfig::default(),
            output_format: OutputFormat::default(),
        }
    }
}

impl Config {
    /// Build a configuration from `IMAGESIM_*` environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Some(folder) = read_var(ENV_FOLDER) {
            config.folder = PathBuf::from(folder);
        }
        if let Some(extensions) = read_var(ENV_EXTENSIONS) {
            config.allowed_extensions = parse_extensions(&extensions)?;
        }
        if let Some(resize) = read_var(ENV_RESIZE) {
            config.resize = Some(parse_size(&resize)?);
        }
        if let Some(weights) = read_var(ENV_MODEL) {
            config.model.weights = PathBuf::from(weights);
        }
        if let Some(name) = read_var(ENV_MODEL_NAME) {
            config.model.name = name;
        }
        if let Some(pretrained) = read_var(ENV_PRETRAINED) {
            config.model.pretrained = pretrained;
        }
        if let Some(size) = read_var(ENV_INPUT_SIZE) {
            config.model.input_size = size
                .parse()
                .ok()
                .filter(|&s: &u32| s > 0)
                .ok_or_else(|| AppError::Config(format!("{} must be a positive integer, got '{}'", ENV_INPUT_SIZE, size)))?;
        }
        if let Some(devices) = read_var(ENV_DEVICES) {
            config.model.devices = DevicePreference::parse_list(&devices)?;
        }
        if let Some(format) = read_var(ENV_FORMAT) {
            config.output_format = format.parse()?;
        }

        Ok(config)
    }
}

fn read_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a comma-separated extension list such as `".jpg,png"`
pub fn parse_extensions(list: &str) -> Result<Vec<String>> {
    let parts: Vec<&str> = list.split(',').collect();
    let extensions = normalize_extensions(&parts);
    if extensions.is_empty() {
        return Err(AppError::Config("extension list is empty".to_string()));
    }
    Ok(extensions)
}

/// Parse a `WIDTHxHEIGHT` size such as `"640x480"`
pub fn parse_size(size: &str) -> Result<(u32, u32)> {
    let invalid = || AppError::Config(format!("invalid size '{}', expected WIDTHxHEIGHT", size));

    let (w, h) = size
        .trim()
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;

    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}
