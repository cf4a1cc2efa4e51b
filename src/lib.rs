//! Caption Harvester - batch retrieval of YouTube caption tracks
//!
//! This library drives a list of video identifiers through an external caption
//! lookup (yt-dlp plus an HTTP download), with bounded retries, exponential
//! backoff on rate limits, and a persisted progress store so interrupted runs
//! resume where they left off.

pub mod cli;
pub mod config;
pub mod driver;
pub mod fetch;
pub mod output;
pub mod progress;
pub mod retry;
pub mod utils;

pub use cli::{Cli, Commands, TranscriptFormat};
pub use config::{Config, RunConfig};
pub use driver::{BatchDriver, RunSummary, VideoTask};
pub use fetch::{FetchError, Transcript, TranscriptFetcher, TranscriptLine, TranscriptRequest};
pub use progress::{ProgressStore, Status};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
