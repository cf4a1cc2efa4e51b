use anyhow::Result;

use crate::fetch::Transcript;
use crate::utils::format_timestamp;

/// Plain text: one `[H:MM:SS] text` line per caption, collapsing consecutive
/// duplicate texts (rolling auto captions repeat the same line as it scrolls)
pub fn format_as_text(transcript: &Transcript) -> String {
    let mut out = String::new();
    let mut previous: Option<&str> = None;

    for line in &transcript.lines {
        let text = line.text.trim();
        if previous == Some(text) {
            continue;
        }
        out.push_str(&format!("[{}] {}\n", format_timestamp(line.start), text));
        previous = Some(text);
    }

    out
}

/// JSON: the full transcript struct, pretty-printed
pub fn format_as_json(transcript: &Transcript) -> Result<String> {
    Ok(serde_json::to_string_pretty(transcript)?)
}

/// SRT: numbered cues with comma-millisecond timestamps
pub fn format_as_srt(transcript: &Transcript) -> String {
    let mut out = String::new();

    for (index, line) in transcript.lines.iter().enumerate() {
        let end = line.start + line.duration;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            srt_timestamp(line.start),
            srt_timestamp(end),
            line.text
        ));
    }

    out
}

/// WebVTT: header plus dot-millisecond cue timestamps
pub fn format_as_vtt(transcript: &Transcript) -> String {
    let mut out = String::from("WEBVTT\n\n");

    for line in &transcript.lines {
        let end = line.start + line.duration;
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            vtt_timestamp(line.start),
            vtt_timestamp(end),
            line.text
        ));
    }

    out
}

fn split_timestamp(seconds: f64) -> (u64, u64, u64, u64) {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let secs = (millis % 60_000) / 1000;
    (hours, minutes, secs, millis % 1000)
}

fn srt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_timestamp(seconds);
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn vtt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_timestamp(seconds);
    format!("{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::TranscriptLine;

    fn transcript(lines: Vec<(&str, f64, f64)>) -> Transcript {
        Transcript {
            video_id: "dQw4w9WgXcQ".to_string(),
            title: None,
            language: "en".to_string(),
            lines: lines
                .into_iter()
                .map(|(text, start, duration)| TranscriptLine {
                    text: text.to_string(),
                    start,
                    duration,
                })
                .collect(),
        }
    }

    #[test]
    fn test_text_collapses_consecutive_duplicates() {
        let t = transcript(vec![
            ("same line", 0.0, 1.0),
            ("same line", 1.0, 1.0),
            ("new line", 2.0, 1.0),
            ("same line", 3.0, 1.0),
        ]);

        let out = format_as_text(&t);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[0:00:00] same line");
        assert_eq!(lines[1], "[0:00:02] new line");
        assert_eq!(lines[2], "[0:00:03] same line");
    }

    #[test]
    fn test_srt_format() {
        let t = transcript(vec![("hello", 1.0, 2.5)]);
        let out = format_as_srt(&t);
        assert_eq!(out, "1\n00:00:01,000 --> 00:00:03,500\nhello\n\n");
    }

    #[test]
    fn test_vtt_format() {
        let t = transcript(vec![("hello", 61.25, 1.0)]);
        let out = format_as_vtt(&t);
        assert!(out.starts_with("WEBVTT\n\n"));
        assert!(out.contains("00:01:01.250 --> 00:01:02.250\nhello\n"));
    }

    #[test]
    fn test_json_round_trips() {
        let t = transcript(vec![("hello", 0.0, 1.0)]);
        let out = format_as_json(&t).unwrap();
        let parsed: Transcript = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed.video_id, "dQw4w9WgXcQ");
        assert_eq!(parsed.lines.len(), 1);
    }
}
