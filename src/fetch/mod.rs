use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod captions;
pub mod ytdlp;

/// One caption line with its timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// Caption text
    pub text: String,

    /// Start time in seconds
    pub start: f64,

    /// Duration in seconds
    pub duration: f64,
}

/// A fetched caption track for one video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// The video's 11-character identifier
    pub video_id: String,

    /// Video title if the lookup reported one
    pub title: Option<String>,

    /// Language code of the returned track
    pub language: String,

    /// Caption lines in playback order
    pub lines: Vec<TranscriptLine>,
}

/// What to ask the lookup for
#[derive(Debug, Clone)]
pub struct TranscriptRequest {
    /// Preferred caption language code
    pub language: String,

    /// Fall back to an auto-translated track when the language is missing
    pub translate: bool,
}

/// Classified failure of a single lookup attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by the remote service")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    #[error("video is unavailable")]
    Unavailable,

    #[error("transcripts are disabled for this video")]
    TranscriptsDisabled,

    #[error("invalid video identifier: {0}")]
    InvalidId(String),

    #[error("{0}")]
    Unknown(String),
}

/// How the driver should react to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry after an exponentially growing delay
    Backoff,

    /// Retry immediately
    Immediate,

    /// Retry after a linearly growing delay
    Linear,

    /// Do not retry
    Never,
}

impl FetchError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            FetchError::RateLimited => RetryClass::Backoff,
            FetchError::Network(_) => RetryClass::Immediate,
            FetchError::Unknown(_) => RetryClass::Linear,
            FetchError::Unavailable
            | FetchError::TranscriptsDisabled
            | FetchError::InvalidId(_) => RetryClass::Never,
        }
    }

    /// Whether another attempt can change the outcome
    pub fn is_transient(&self) -> bool {
        self.retry_class() != RetryClass::Never
    }
}

/// The lookup collaborator: resolves a video ID to a caption track or a
/// classified failure. The production implementation shells out to yt-dlp;
/// tests substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn fetch(
        &self,
        video_id: &str,
        request: &TranscriptRequest,
    ) -> Result<Transcript, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert_eq!(FetchError::RateLimited.retry_class(), RetryClass::Backoff);
        assert_eq!(
            FetchError::Network("connection reset".into()).retry_class(),
            RetryClass::Immediate
        );
        assert_eq!(
            FetchError::Unknown("something else".into()).retry_class(),
            RetryClass::Linear
        );
        assert_eq!(FetchError::Unavailable.retry_class(), RetryClass::Never);
        assert_eq!(FetchError::TranscriptsDisabled.retry_class(), RetryClass::Never);
        assert_eq!(
            FetchError::InvalidId("xyz".into()).retry_class(),
            RetryClass::Never
        );
    }

    #[test]
    fn test_transient_flags() {
        assert!(FetchError::RateLimited.is_transient());
        assert!(FetchError::Network("timeout".into()).is_transient());
        assert!(!FetchError::TranscriptsDisabled.is_transient());
    }
}
