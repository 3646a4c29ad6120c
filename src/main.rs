use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use imagesim::{
    init, rank_folder, state, Config, DevicePreference, EmbeddingEngine, OutputFormat, Result,
    ResultExt, TorchEmbedder,
};

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn long_version() -> String {
    format!(
        "{} ({}, features: {}, built {})",
        built_info::PKG_VERSION,
        built_info::RUSTC_VERSION,
        built_info::FEATURES_LOWERCASE_STR,
        built_info::BUILT_TIME_UTC,
    )
}

/// Rank every pair of images in a folder by embedding similarity
#[derive(Debug, Parser)]
#[command(name = "imagesim", version, long_version = long_version())]
struct Args {
    /// Folder to scan (defaults to IMAGESIM_FOLDER or media/input)
    folder: Option<PathBuf>,

    /// TorchScript export of the visual encoder
    #[arg(long)]
    model: Option<PathBuf>,

    /// Device preference list, e.g. "cuda:0,cpu"
    #[arg(long, value_parser = DevicePreference::parse_list)]
    devices: Option<::std::vec::Vec<DevicePreference>>,

    /// Square input resolution of the model
    #[arg(long)]
    input_size: Option<u32>,

    /// Allowed extensions, e.g. "jpg,png"
    #[arg(long, value_parser = state::parse_extensions)]
    extensions: Option<::std::vec::Vec<String>>,

    /// Resize images to exactly WIDTHxHEIGHT when loading
    #[arg(long, value_parser = state::parse_size)]
    resize: Option<(u32, u32)>,

    /// Output format: table, csv or json
    #[arg(long, short)]
    format: Option<OutputFormat>,

    /// Write the report to a file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl Args {
    fn apply(self, mut config: Config) -> (Config, Option<PathBuf>) {
        if let Some(folder) = self.folder {
            config.folder = folder;
        }
        if let Some(model) = self.model {
            config.model.weights = model;
        }
        if let Some(devices) = self.devices {
            config.model.devices = devices;
        }
        if let Some(size) = self.input_size {
            config.model.input_size = size;
        }
        if let Some(extensions) = self.extensions {
            config.allowed_extensions = extensions;
        }
        if self.resize.is_some() {
            config.resize = self.resize;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        (config, self.output)
    }
}

fn run(args: Args) -> Result<()> {
    let (config, output) = args.apply(Config::from_env()?);
    log::debug!("Configuration: {:?}", config);

    let embedder = TorchEmbedder::load(&config.model)?;
    let engine = EmbeddingEngine::from_config(embedder, &config);
    let report = rank_folder(&engine, &config.folder)?;

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            report.write(config.output_format, &mut writer)?;
            writer.flush()?;
            log::info!("Wrote {} pair(s) to {}", report.pairs.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            report.write(config.output_format, stdout.lock())?;
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init() {
        eprintln!("{}", e);
    }

    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(if e.is_user_error() { 2 } else { 1 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
        assert!(Args::command().render_long_version().contains(built_info::PKG_VERSION));
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "imagesim", "photos", "--devices", "cuda:1,cpu", "--resize", "8x4", "--format", "csv",
        ])
        .unwrap();
        let (config, output) = args.apply(Config::default());

        assert_eq!(config.folder, PathBuf::from("photos"));
        assert_eq!(config.model.devices, vec![DevicePreference::Cuda(1), DevicePreference::Cpu]);
        assert_eq!(config.resize, Some((8, 4)));
        assert_eq!(config.output_format, OutputFormat::Csv);
        assert!(output.is_none());
    }
}
