use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::TranscriptFormat;
use crate::fetch::Transcript;

pub mod formatters;

pub use formatters::*;

/// Write a transcript into the output directory as `<video_id>.<ext>`,
/// returning the path written
pub fn save_transcript(
    transcript: &Transcript,
    output_dir: &Path,
    format: TranscriptFormat,
) -> Result<PathBuf> {
    let content = match format {
        TranscriptFormat::Txt => format_as_text(transcript),
        TranscriptFormat::Json => format_as_json(transcript)?,
        TranscriptFormat::Srt => format_as_srt(transcript),
        TranscriptFormat::Vtt => format_as_vtt(transcript),
    };

    let path = output_dir.join(format!("{}.{}", transcript.video_id, format.extension()));
    fs_err::write(&path, content)?;
    Ok(path)
}
