//! Retry planning: turn a previous run's logs into the next input file.
//!
//! Videos that failed on transient errors (rate limits, network trouble)
//! are worth another pass once the remote service cools down; videos with
//! no captions or that no longer exist are not. This module walks the
//! output directory and error log, splits the missing videos accordingly,
//! and writes a fresh iteration file plus a JSON report.

use anyhow::{Context, Result};
use console::style;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::cli::TranscriptFormat;
use crate::progress::{ERROR_LOG_FILE, FAILED_FILE};
use crate::utils::extract_video_id;

/// Error-log categories used to decide what is worth retrying
#[derive(Debug, Default)]
struct ErrorCategories {
    no_subtitles: HashSet<String>,
    rate_limited: HashSet<String>,
    unavailable: HashSet<String>,
    other: HashSet<String>,
}

/// Summary of one planning pass, also written as JSON next to the transcripts
#[derive(Debug, Serialize)]
pub struct IterationReport {
    pub date: String,
    pub iteration: u32,
    pub original_video_count: usize,
    pub downloaded_count: usize,
    pub missing_count: usize,
    pub retrying_count: usize,
    pub skipped_no_subtitles: usize,
    pub skipped_unavailable: usize,
    pub skipped_failed: usize,
    pub new_file: PathBuf,
}

/// Build the next iteration file from the original input and a run's output
/// directory. Returns the report; the iteration file lands beside the input,
/// the report JSON inside the output directory.
pub fn plan_iteration(input: &Path, output_dir: &Path) -> Result<IterationReport> {
    let sources = read_sources(input)?;
    let original: HashSet<String> = sources.keys().cloned().collect();
    let downloaded = downloaded_videos(output_dir)?;
    let failed = failed_videos(output_dir)?;
    let categories = analyze_errors(output_dir)?;

    let missing: HashSet<String> = original.difference(&downloaded).cloned().collect();

    // Only permanent conditions are excluded; rate-limited and unclassified
    // failures stay in the retry set.
    let skip: HashSet<String> = categories
        .no_subtitles
        .union(&categories.unavailable)
        .cloned()
        .collect();
    let mut retrying: Vec<&String> = missing.difference(&skip).collect();
    retrying.sort();

    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let iteration = next_iteration(parent);
    let new_file = parent.join(format!("yt_iteration_{}.txt", iteration));

    let mut content = String::new();
    for id in &retrying {
        if let Some(source) = sources.get(*id) {
            content.push_str(source);
            content.push('\n');
        }
    }
    fs_err::write(&new_file, content).context("Failed to write iteration file")?;

    let report = IterationReport {
        date: chrono::Utc::now().to_rfc3339(),
        iteration,
        original_video_count: original.len(),
        downloaded_count: downloaded.len(),
        missing_count: missing.len(),
        retrying_count: retrying.len(),
        skipped_no_subtitles: categories.no_subtitles.len(),
        skipped_unavailable: categories.unavailable.len(),
        skipped_failed: failed.len(),
        new_file,
    };

    let report_path = output_dir.join(format!("iteration_{}_report.json", iteration));
    fs_err::write(&report_path, serde_json::to_string_pretty(&report)?)
        .context("Failed to write iteration report")?;

    Ok(report)
}

/// Print the report in the same shape the run summary uses
pub fn print_report(report: &IterationReport) {
    println!("{}", style("Retry Planning Report").bold());
    println!("  Original videos:        {}", report.original_video_count);
    println!("  Downloaded:             {}", style(report.downloaded_count).green());
    println!("  Missing:                {}", report.missing_count);
    println!("  Will retry:             {}", style(report.retrying_count).cyan());
    println!("  Skipped (no captions):  {}", report.skipped_no_subtitles);
    println!("  Skipped (unavailable):  {}", report.skipped_unavailable);
    println!("  In failure list:        {}", report.skipped_failed);
    println!();
    println!("New input file: {}", report.new_file.display());
    println!("Run it with: harvester run --input {} --retry-failed", report.new_file.display());
}

/// Map every video ID in the input to its source line (last occurrence wins)
fn read_sources(input: &Path) -> Result<HashMap<String, String>> {
    let content = fs_err::read_to_string(input).context("Failed to read input file")?;

    let mut sources = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(id) = extract_video_id(line) {
            sources.insert(id, line.to_string());
        }
    }

    Ok(sources)
}

/// IDs with a transcript file already on disk, any known format
fn downloaded_videos(output_dir: &Path) -> Result<HashSet<String>> {
    let mut downloaded = HashSet::new();
    if !output_dir.exists() {
        return Ok(downloaded);
    }

    for entry in fs_err::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();

        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if TranscriptFormat::from_name(extension).is_none() {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if stem.len() == 11 {
                downloaded.insert(stem.to_string());
            }
        }
    }

    Ok(downloaded)
}

fn failed_videos(output_dir: &Path) -> Result<HashSet<String>> {
    let path = output_dir.join(FAILED_FILE);
    if !path.exists() {
        return Ok(HashSet::new());
    }

    let content = fs_err::read_to_string(&path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| line.len() == 11)
        .map(str::to_string)
        .collect())
}

/// Categorize error-log lines by the classification text the driver wrote
fn analyze_errors(output_dir: &Path) -> Result<ErrorCategories> {
    let mut categories = ErrorCategories::default();

    let path = output_dir.join(ERROR_LOG_FILE);
    if !path.exists() {
        return Ok(categories);
    }

    let id_pattern = Regex::new(r"\[([a-zA-Z0-9_-]{11})\]").unwrap();
    let content = fs_err::read_to_string(&path)?;

    for line in content.lines() {
        let Some(caps) = id_pattern.captures(line) else {
            continue;
        };
        let video_id = caps[1].to_string();
        let lowered = line.to_lowercase();

        if lowered.contains("transcripts are disabled") || lowered.contains("no caption") {
            categories.no_subtitles.insert(video_id);
        } else if lowered.contains("rate limited")
            || lowered.contains("429")
            || lowered.contains("too many requests")
        {
            categories.rate_limited.insert(video_id);
        } else if lowered.contains("unavailable") || lowered.contains("private") {
            categories.unavailable.insert(video_id);
        } else {
            categories.other.insert(video_id);
        }
    }

    Ok(categories)
}

fn next_iteration(dir: &Path) -> u32 {
    let mut iteration = 1;
    while dir.join(format!("yt_iteration_{}.txt", iteration)).exists() {
        iteration += 1;
    }
    iteration
}
