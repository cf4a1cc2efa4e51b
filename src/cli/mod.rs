use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "harvester",
    about = "Caption Harvester - Batch-fetch YouTube caption tracks with resumable progress",
    version,
    long_about = "A CLI tool that walks a list of YouTube URLs or video IDs, fetches the caption track for each via yt-dlp, and writes one transcript file per video. Completed and failed videos are recorded in a progress store so interrupted runs can be resumed safely."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a list of videos, fetching a caption track for each
    Run {
        /// Input file with one YouTube URL or 11-character video ID per line
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output directory for transcripts, progress store, and logs
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Output format for transcript files
        #[arg(short, long, value_enum)]
        format: Option<TranscriptFormat>,

        /// Caption language code (e.g. en, ar, de)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,

        /// Fall back to an auto-translated caption track when the language is missing
        #[arg(long)]
        translate: bool,

        /// Number of retries after the first attempt
        #[arg(short, long, value_name = "COUNT")]
        retries: Option<u32>,

        /// Base delay in seconds for retry backoff
        #[arg(long, value_name = "SECS")]
        base_delay: Option<u64>,

        /// Minimum gap in seconds between lookup requests (0 disables pacing)
        #[arg(long, value_name = "SECS")]
        throttle: Option<u64>,

        /// Number of concurrent workers
        #[arg(short, long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Continue with the next video after a failure instead of halting
        #[arg(long)]
        skip_failed: bool,

        /// Re-attempt videos the progress store has marked as failed
        #[arg(long)]
        retry_failed: bool,

        /// Netscape-format cookies file passed through to yt-dlp
        #[arg(long, value_name = "FILE")]
        cookies: Option<PathBuf>,
    },

    /// Build a new input file from videos that are still missing and worth retrying
    Retry {
        /// The original input file the previous runs were fed from
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output directory holding the transcripts and logs to analyze
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Show completion counts from the progress store
    Status {
        /// Output directory holding the progress store
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscriptFormat {
    /// Plain text with [H:MM:SS] line prefixes
    Txt,
    /// JSON with start/duration per line
    Json,
    /// SRT subtitle format
    Srt,
    /// WebVTT format
    Vtt,
}

impl TranscriptFormat {
    /// File extension used for transcript files in this format
    pub fn extension(&self) -> &'static str {
        match self {
            TranscriptFormat::Txt => "txt",
            TranscriptFormat::Json => "json",
            TranscriptFormat::Srt => "srt",
            TranscriptFormat::Vtt => "vtt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "txt" | "text" => Some(TranscriptFormat::Txt),
            "json" => Some(TranscriptFormat::Json),
            "srt" => Some(TranscriptFormat::Srt),
            "vtt" => Some(TranscriptFormat::Vtt),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}
