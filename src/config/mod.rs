use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::TranscriptFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Caption fetch settings
    pub fetch: FetchConfig,

    /// Batch run settings
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Default caption language code
    pub language: String,

    /// Fall back to auto-translated captions when the language is missing
    pub translate: bool,

    /// Optional Netscape-format cookies file for yt-dlp
    pub cookies: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory for transcripts, the progress store, and logs
    pub output_dir: PathBuf,

    /// Default transcript format (txt, json, srt, vtt)
    pub format: String,

    /// Retries after the first attempt
    pub retries: u32,

    /// Base delay in seconds for retry backoff
    pub base_delay_secs: u64,

    /// Minimum gap in seconds between lookup requests (0 disables pacing)
    pub throttle_secs: u64,

    /// Concurrent workers
    pub workers: usize,

    /// Continue past failed videos instead of halting the run
    pub skip_failed: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch: FetchConfig {
                language: "en".to_string(),
                translate: false,
                cookies: None,
            },
            batch: BatchConfig {
                output_dir: PathBuf::from("extracted-transcripts"),
                format: "txt".to_string(),
                retries: 2,
                base_delay_secs: 15,
                throttle_secs: 0,
                workers: 1,
                skip_failed: false,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(&config_path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("caption-harvester").join("config.yaml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.fetch.language.is_empty() {
            anyhow::bail!("Caption language must not be empty");
        }

        if self.batch.workers == 0 {
            anyhow::bail!("Worker count must be at least 1");
        }

        if TranscriptFormat::from_name(&self.batch.format).is_none() {
            anyhow::bail!("Unknown transcript format: {}", self.batch.format);
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Language: {}", self.fetch.language);
        println!("  Translate fallback: {}", self.fetch.translate);
        if let Some(cookies) = &self.fetch.cookies {
            println!("  Cookies: {}", cookies.display());
        }
        println!("  Output Directory: {}", self.batch.output_dir.display());
        println!("  Format: {}", self.batch.format);
        println!("  Retries: {}", self.batch.retries);
        println!("  Base Delay: {}s", self.batch.base_delay_secs);
        println!("  Throttle: {}s", self.batch.throttle_secs);
        println!("  Workers: {}", self.batch.workers);
        println!("  Skip Failed: {}", self.batch.skip_failed);
    }

    /// Print the path the configuration is loaded from
    pub fn display_path() -> Result<()> {
        println!("Configuration file:");
        println!("  {}", Self::config_path()?.display());
        Ok(())
    }
}

/// Resolved per-run settings handed to the batch driver.
///
/// CLI arguments override the config file; flags only override when present.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub format: TranscriptFormat,
    pub language: String,
    pub translate: bool,
    pub cookies: Option<PathBuf>,
    pub retries: u32,
    pub base_delay: Duration,
    pub throttle: Duration,
    pub workers: usize,
    pub skip_failed: bool,
    pub retry_failed: bool,
}

impl RunConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        config: &Config,
        output: Option<PathBuf>,
        format: Option<TranscriptFormat>,
        language: Option<String>,
        translate: bool,
        retries: Option<u32>,
        base_delay: Option<u64>,
        throttle: Option<u64>,
        workers: Option<usize>,
        skip_failed: bool,
        retry_failed: bool,
        cookies: Option<PathBuf>,
    ) -> Result<Self> {
        let format = match format {
            Some(f) => f,
            None => TranscriptFormat::from_name(&config.batch.format)
                .context("Invalid default format in config file")?,
        };

        Ok(Self {
            output_dir: output.unwrap_or_else(|| config.batch.output_dir.clone()),
            format,
            language: language.unwrap_or_else(|| config.fetch.language.clone()),
            translate: translate || config.fetch.translate,
            cookies: cookies.or_else(|| config.fetch.cookies.clone()),
            retries: retries.unwrap_or(config.batch.retries),
            base_delay: Duration::from_secs(base_delay.unwrap_or(config.batch.base_delay_secs)),
            throttle: Duration::from_secs(throttle.unwrap_or(config.batch.throttle_secs)),
            workers: workers.unwrap_or(config.batch.workers).max(1),
            skip_failed: skip_failed || config.batch.skip_failed,
            retry_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_format() {
        let mut config = Config::default();
        config.batch.format = "docx".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_cli_overrides() {
        let config = Config::default();
        let run = RunConfig::resolve(
            &config,
            Some(PathBuf::from("out")),
            Some(TranscriptFormat::Srt),
            Some("ar".to_string()),
            false,
            Some(5),
            Some(2),
            None,
            Some(4),
            true,
            false,
            None,
        )
        .unwrap();

        assert_eq!(run.output_dir, PathBuf::from("out"));
        assert_eq!(run.format, TranscriptFormat::Srt);
        assert_eq!(run.language, "ar");
        assert_eq!(run.retries, 5);
        assert_eq!(run.base_delay, Duration::from_secs(2));
        assert_eq!(run.workers, 4);
        assert!(run.skip_failed);
    }

    #[test]
    fn test_resolve_falls_back_to_config() {
        let config = Config::default();
        let run = RunConfig::resolve(
            &config, None, None, None, false, None, None, None, None, false, false, None,
        )
        .unwrap();

        assert_eq!(run.language, "en");
        assert_eq!(run.format, TranscriptFormat::Txt);
        assert_eq!(run.retries, 2);
        assert!(!run.skip_failed);
    }
}
