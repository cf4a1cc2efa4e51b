use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::process::Command;
use url::Url;

use super::{captions, FetchError, Transcript, TranscriptFetcher, TranscriptRequest};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15",
];

/// Metadata dump from yt-dlp, reduced to the fields the lookup needs
#[derive(Debug, Deserialize)]
struct VideoMetadata {
    title: Option<String>,

    #[serde(default)]
    subtitles: HashMap<String, Vec<CaptionTrack>>,

    #[serde(default)]
    automatic_captions: HashMap<String, Vec<CaptionTrack>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CaptionTrack {
    url: Option<String>,
}

/// Caption lookup backed by yt-dlp metadata dumps plus an HTTP download of
/// the selected track
pub struct YtDlpFetcher {
    yt_dlp_path: String,
    client: reqwest::Client,
    cookies: Option<PathBuf>,
    agent_index: AtomicUsize,
}

impl YtDlpFetcher {
    pub fn new(cookies: Option<PathBuf>) -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            client: reqwest::Client::new(),
            cookies,
            agent_index: AtomicUsize::new(0),
        }
    }

    /// Check if yt-dlp is available
    pub async fn check_availability(&self) -> bool {
        Command::new(&self.yt_dlp_path)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn next_agent(&self) -> &'static str {
        let index = self.agent_index.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[index % USER_AGENTS.len()]
    }

    /// Dump video metadata via yt-dlp
    async fn dump_metadata(
        &self,
        video_id: &str,
        use_cookies: bool,
    ) -> Result<VideoMetadata, FetchError> {
        let url = format!("https://www.youtube.com/watch?v={}", video_id);
        tracing::debug!("Dumping metadata for: {}", url);

        let mut command = Command::new(&self.yt_dlp_path);
        command.args([
            "--dump-json",
            "--skip-download",
            "--no-playlist",
            "--no-warnings",
            "--retries",
            "1",
        ]);

        if use_cookies {
            if let Some(cookies) = &self.cookies {
                command.arg("--cookies").arg(cookies);
            }
        }

        let output = command
            .arg(&url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| FetchError::Unknown(format!("failed to run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_ytdlp_stderr(&stderr));
        }

        let json = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&json)
            .map_err(|e| FetchError::Unknown(format!("invalid yt-dlp metadata: {}", e)))
    }

    /// Pick a caption track URL for the requested language. Manual subtitles
    /// win over auto captions; the last listed format is taken, matching the
    /// payload shapes the parser understands.
    fn select_track(
        &self,
        metadata: &VideoMetadata,
        request: &TranscriptRequest,
    ) -> Result<String, FetchError> {
        let lang = &request.language;

        if let Some(url) = last_track_url(&metadata.subtitles, lang) {
            return Ok(url);
        }

        if let Some(url) = last_track_url(&metadata.automatic_captions, lang) {
            return Ok(url);
        }

        if request.translate {
            // Any auto track can serve a translated rendering via tlang
            let mut keys: Vec<&String> = metadata.automatic_captions.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(url) = last_track_url(&metadata.automatic_captions, key) {
                    return with_translation(&url, lang);
                }
            }
        }

        Err(FetchError::TranscriptsDisabled)
    }

    /// Download the selected caption track
    async fn download_track(&self, track_url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(track_url)
            .header(USER_AGENT, self.next_agent())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if status.is_client_error() {
            return Err(FetchError::Unavailable);
        }
        if status.is_server_error() {
            return Err(FetchError::Network(format!("HTTP {}", status)));
        }

        response.text().await.map_err(classify_reqwest_error)
    }
}

#[async_trait]
impl TranscriptFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        video_id: &str,
        request: &TranscriptRequest,
    ) -> Result<Transcript, FetchError> {
        if video_id.len() != 11
            || !video_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FetchError::InvalidId(video_id.to_string()));
        }

        let mut use_cookies = self.cookies.is_some();
        let metadata = loop {
            match self.dump_metadata(video_id, use_cookies).await {
                Ok(metadata) => break metadata,
                // A bot-check interstitial with cookies configured usually
                // means the cookies went stale; retry the dump without them
                // before surfacing the failure.
                Err(FetchError::RateLimited) if use_cookies => {
                    tracing::warn!("[{}] Lookup blocked with cookies, retrying without", video_id);
                    use_cookies = false;
                }
                Err(e) => return Err(e),
            }
        };

        let track_url = self.select_track(&metadata, request)?;
        let payload = self.download_track(&track_url).await?;
        let lines = captions::parse_captions(&payload)?;

        Ok(Transcript {
            video_id: video_id.to_string(),
            title: metadata.title,
            language: request.language.clone(),
            lines,
        })
    }
}

fn last_track_url(tracks: &HashMap<String, Vec<CaptionTrack>>, lang: &str) -> Option<String> {
    tracks
        .get(lang)?
        .iter()
        .rev()
        .find_map(|track| track.url.clone())
}

fn with_translation(track_url: &str, lang: &str) -> Result<String, FetchError> {
    let mut url = Url::parse(track_url)
        .map_err(|e| FetchError::Unknown(format!("invalid caption track url: {}", e)))?;
    url.query_pairs_mut().append_pair("tlang", lang);
    Ok(url.to_string())
}

fn classify_ytdlp_stderr(stderr: &str) -> FetchError {
    let lowered = stderr.to_lowercase();

    if lowered.contains("429")
        || lowered.contains("too many requests")
        || lowered.contains("sign in to confirm")
    {
        return FetchError::RateLimited;
    }

    if lowered.contains("video unavailable")
        || lowered.contains("private video")
        || lowered.contains("has been removed")
        || lowered.contains("is not available")
    {
        return FetchError::Unavailable;
    }

    if lowered.contains("unable to download")
        || lowered.contains("timed out")
        || lowered.contains("connection")
        || lowered.contains("network")
    {
        return FetchError::Network(first_line(stderr));
    }

    FetchError::Unknown(first_line(stderr))
}

fn classify_reqwest_error(error: reqwest::Error) -> FetchError {
    FetchError::Network(error.to_string())
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown error")
        .to_string()
}
