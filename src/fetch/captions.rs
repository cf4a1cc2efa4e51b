//! Caption payload parsing.
//!
//! YouTube caption URLs return one of three shapes depending on the track:
//! json3 (`events`/`segs`), timedtext XML (`<text start=...>`), or SRT/VTT
//! cue blocks. The shape is sniffed from the payload itself rather than
//! trusting the track's declared extension.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::{FetchError, TranscriptLine};

#[derive(Debug, Deserialize)]
struct Json3Payload {
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs")]
    start_ms: Option<f64>,

    #[serde(rename = "dDurationMs")]
    duration_ms: Option<f64>,

    segs: Option<Vec<Json3Seg>>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    utf8: Option<String>,
}

/// Parse a downloaded caption payload into timed lines.
///
/// Empty cues are dropped and repeated `(start, text)` pairs are collapsed,
/// since auto-generated tracks frequently duplicate rolling captions.
pub fn parse_captions(data: &str) -> Result<Vec<TranscriptLine>, FetchError> {
    let lines = if looks_like_json3(data) {
        parse_json3(data)?
    } else if data.contains("<text start=") {
        parse_timedtext_xml(data)
    } else if data.contains("-->") {
        parse_cue_blocks(data)
    } else {
        Vec::new()
    };

    let deduped = dedupe_lines(lines);
    if deduped.is_empty() {
        return Err(FetchError::Unknown(
            "no caption cues found in payload".to_string(),
        ));
    }

    Ok(deduped)
}

fn looks_like_json3(data: &str) -> bool {
    data.trim_start().starts_with('{') && data.contains("\"events\"")
}

fn parse_json3(data: &str) -> Result<Vec<TranscriptLine>, FetchError> {
    let payload: Json3Payload = serde_json::from_str(data)
        .map_err(|e| FetchError::Unknown(format!("invalid json3 caption payload: {}", e)))?;

    let mut lines = Vec::new();
    for event in payload.events {
        let Some(segs) = event.segs else { continue };

        let text = segs
            .iter()
            .filter_map(|seg| seg.utf8.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        let text = normalize_whitespace(&text);
        if text.is_empty() {
            continue;
        }

        lines.push(TranscriptLine {
            text,
            start: event.start_ms.unwrap_or(0.0) / 1000.0,
            duration: event.duration_ms.unwrap_or(0.0) / 1000.0,
        });
    }

    Ok(lines)
}

fn parse_timedtext_xml(data: &str) -> Vec<TranscriptLine> {
    static CUE: OnceLock<Regex> = OnceLock::new();
    let cue = CUE.get_or_init(|| {
        Regex::new(r#"(?s)<text start="([0-9.]+)"(?:\s+dur="([0-9.]+)")?[^>]*>(.*?)</text>"#)
            .unwrap()
    });

    let mut lines = Vec::new();
    for caps in cue.captures_iter(data) {
        let Ok(start) = caps[1].parse::<f64>() else { continue };
        let duration = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);
        let text = normalize_whitespace(&unescape_entities(&caps[3]));
        if text.is_empty() {
            continue;
        }

        lines.push(TranscriptLine { text, start, duration });
    }

    lines
}

/// SRT and VTT both mark cues with `-->` timing lines; the text is the
/// following line. VTT headers and SRT index lines fall through harmlessly.
fn parse_cue_blocks(data: &str) -> Vec<TranscriptLine> {
    let stripped: Vec<&str> = data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut lines = Vec::new();
    let mut i = 0;
    while i < stripped.len() {
        if stripped[i].contains("-->") {
            let mut times = stripped[i].splitn(2, "-->");
            let start = cue_time_to_seconds(times.next().unwrap_or(""));
            // VTT appends cue settings after the end time
            let end_part = times.next().unwrap_or("");
            let end = cue_time_to_seconds(end_part.split_whitespace().next().unwrap_or(""));
            let duration = (end - start).max(0.0);

            if i + 1 < stripped.len() && !stripped[i + 1].contains("-->") {
                let text = normalize_whitespace(stripped[i + 1]);
                if !text.is_empty() {
                    lines.push(TranscriptLine { text, start, duration });
                }
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    lines
}

/// Convert an SRT/VTT cue time to seconds. Accepts `HH:MM:SS`, `MM:SS`, or
/// bare seconds, with `,` or `.` millisecond separators. Unparseable input
/// maps to 0 rather than discarding the cue.
pub fn cue_time_to_seconds(time_str: &str) -> f64 {
    let time_str = time_str.trim();

    let (time_part, ms) = if let Some((t, ms_part)) = time_str.split_once(',') {
        (t, ms_part.parse::<f64>().unwrap_or(0.0))
    } else if let Some((t, ms_part)) = time_str.rsplit_once('.') {
        (t, ms_part.parse::<f64>().unwrap_or(0.0))
    } else {
        (time_str, 0.0)
    };

    let parts: Vec<f64> = time_part
        .split(':')
        .map(|p| p.parse::<f64>().unwrap_or(0.0))
        .collect();

    let seconds = match parts.as_slice() {
        [h, m, s] => h * 3600.0 + m * 60.0 + s,
        [m, s] => m * 60.0 + s,
        [s] => *s,
        _ => 0.0,
    };

    seconds + ms / 1000.0
}

fn dedupe_lines(lines: Vec<TranscriptLine>) -> Vec<TranscriptLine> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(((line.start * 1000.0) as i64, line.text.clone())))
        .collect()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
