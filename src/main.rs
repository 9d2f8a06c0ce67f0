use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use photo_tagger::config::{self, Config};
use photo_tagger::{image_processor, UploadClient, UploadOutcome};

/// Upload photos to an image tagging service
#[derive(Parser, Debug)]
#[command(name = "photo-tagger")]
#[command(about = "Upload a photo to an image tagging API", long_about = None)]
struct Args {
    /// Config file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode an image as JPEG and upload it
    Upload {
        /// Image file to upload
        image: PathBuf,
    },
    /// Print the active configuration with the secret masked
    ShowConfig,
    /// Write the default configuration if none exists
    InitConfig,
    /// Reset the configuration to defaults, keeping a backup
    ResetConfig,
}

fn load(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    config.context("Failed to load configuration")
}

fn init_logging(log_level: &str) {
    let level = log::LevelFilter::from_str(log_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

async fn upload(config: &Config, image_path: &Path) -> Result<()> {
    let path = image_path.to_string_lossy();

    let (width, height, size) = image_processor::get_image_info(&path)
        .with_context(|| format!("Cannot read image {}", path))?;
    log::info!("Selected {} ({}x{}, {} bytes)", path, width, height, size);

    let image = image_processor::load_image(&path, config.max_dimension)
        .with_context(|| format!("Cannot decode image {}", path))?;

    let client = UploadClient::new(config).context("Failed to create upload client")?;

    let outcome = client
        .upload_and_wait(&image, |fraction| {
            eprint!("\rUploading... {:>3}%", (fraction * 100.0).round() as u32);
            let _ = std::io::stderr().flush();
        })
        .await;
    eprintln!();

    match outcome {
        UploadOutcome::Success(ids) => {
            for id in ids {
                println!("{}", id);
            }
            Ok(())
        }
        UploadOutcome::Failure(e) => {
            if e.is_local() {
                log::info!("Nothing was sent to {}", config.endpoint);
            }
            bail!("Upload failed: {}", e)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Command::InitConfig => {
            init_logging("info");
            let config = load(&args)?;
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Command::ResetConfig => {
            init_logging("info");
            match &args.config {
                Some(path) => config::reset_config_at(path)?,
                None => config::reset_config()?,
            }
        }
        Command::ShowConfig => {
            let config = load(&args)?;
            init_logging(&config.log_level);
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Command::Upload { image } => {
            let config = load(&args)?;
            init_logging(&config.log_level);
            log::info!("Starting Photo Tagger upload");
            upload(&config, image).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_upload() {
        let args = Args::parse_from(["photo-tagger", "upload", "photo.jpg"]);
        assert!(args.config.is_none());
        match args.command {
            Command::Upload { image } => assert_eq!(image, PathBuf::from("photo.jpg")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_args_custom_config() {
        let args = Args::parse_from(["photo-tagger", "-c", "/custom/config.json", "show-config"]);
        assert_eq!(args.config, Some(PathBuf::from("/custom/config.json")));
        assert!(matches!(args.command, Command::ShowConfig));
    }

    #[test]
    fn test_args_require_subcommand() {
        assert!(Args::try_parse_from(["photo-tagger"]).is_err());
    }
}
