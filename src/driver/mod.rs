//! The batch driver: walks a list of video tasks, invokes the caption
//! lookup with bounded retries, classifies outcomes, and records progress.

use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::RunConfig;
use crate::fetch::{FetchError, RetryClass, Transcript, TranscriptFetcher, TranscriptRequest};
use crate::output;
use crate::progress::{ErrorLog, FailureLog, ProgressStore, Status};
use crate::utils::extract_video_id;

/// Waits never grow past this, however deep the retry budget goes
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Exponent cap for the backoff shift, so `base * 2^attempt` cannot overflow
const MAX_BACKOFF_SHIFT: u32 = 6;

/// One unit of work: a single video lookup
#[derive(Debug, Clone)]
pub struct VideoTask {
    /// The 11-character video identifier
    pub id: String,

    /// The input line the identifier came from (kept for retry planning)
    pub source_line: String,

    /// Lookup attempts made so far
    pub attempts: u32,
}

impl VideoTask {
    pub fn new(id: impl Into<String>, source_line: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_line: source_line.into(),
            attempts: 0,
        }
    }
}

/// Terminal result of driving one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Completed,
    Failed,
    SkippedCompleted,
    SkippedFailed,
    Halted,
}

/// Final tally of a batch run
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped_completed: usize,
    pub skipped_failed: usize,
    pub halted: bool,
    pub elapsed: Duration,
}

/// Delay before the retry following failure number `attempt` (0-based) of a
/// rate-limited lookup: `base * 2^attempt`, bounded
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Delay before the retry following an unclassified failure: `base * (attempt+1)`
pub fn linear_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.saturating_add(1)).min(MAX_BACKOFF)
}

/// Serializes lookup start times so requests are at least `gap` apart across
/// all workers. Retry backoff happens outside the pacer, so a task sleeping
/// off a rate limit never blocks the others.
struct Pacer {
    gap: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(gap: Duration) -> Self {
        Self {
            gap,
            last: tokio::sync::Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.gap.is_zero() {
            return;
        }

        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let due = previous + self.gap;
            let now = Instant::now();
            if due > now {
                tracing::debug!("Rate limiting: waiting {:?}", due - now);
                sleep(due - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Drives a sequence of video tasks to completion against a caption fetcher
pub struct BatchDriver {
    fetcher: Arc<dyn TranscriptFetcher>,
    store: ProgressStore,
    error_log: ErrorLog,
    failure_log: FailureLog,
    config: RunConfig,
    pacer: Pacer,
    halt: AtomicBool,
    quiet: bool,
}

impl BatchDriver {
    pub fn new(
        fetcher: Arc<dyn TranscriptFetcher>,
        store: ProgressStore,
        config: RunConfig,
        quiet: bool,
    ) -> Self {
        let error_log = ErrorLog::new(&config.output_dir);
        let failure_log = FailureLog::new(&config.output_dir);
        let pacer = Pacer::new(config.throttle);

        Self {
            fetcher,
            store,
            error_log,
            failure_log,
            config,
            pacer,
            halt: AtomicBool::new(false),
            quiet,
        }
    }

    /// Read video tasks from an input file, one URL or ID per line.
    /// Invalid lines are logged and counted; duplicates keep their first
    /// occurrence. Returns the tasks and the invalid-line count.
    pub fn load_tasks(&self, input: &Path) -> Result<(Vec<VideoTask>, usize)> {
        let content = fs_err::read_to_string(input)?;

        let mut seen = HashSet::new();
        let mut tasks = Vec::new();
        let mut invalid = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match extract_video_id(line) {
                Some(id) => {
                    if seen.insert(id.clone()) {
                        tasks.push(VideoTask::new(id, line));
                    }
                }
                None => {
                    invalid += 1;
                    self.log_error(&format!("[invalid-input] {}", line));
                }
            }
        }

        Ok((tasks, invalid))
    }

    /// Process every task, honoring resume state, retry budget, and the
    /// halt-on-failure setting. Always returns a summary.
    pub async fn run(&self, tasks: Vec<VideoTask>) -> Result<RunSummary> {
        let start = std::time::Instant::now();

        if self.config.retry_failed {
            let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
            self.store.forget_failed(&ids)?;
        }

        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(tasks.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap(),
            );
            bar
        };

        let outcomes: Vec<TaskOutcome> = stream::iter(tasks)
            .map(|task| {
                let bar = bar.clone();
                async move {
                    bar.set_message(task.id.clone());
                    let outcome = self.process_task(task).await;
                    bar.inc(1);
                    outcome
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        bar.finish_and_clear();

        let mut summary = RunSummary {
            elapsed: start.elapsed(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed => summary.completed += 1,
                TaskOutcome::Failed => summary.failed += 1,
                TaskOutcome::SkippedCompleted => summary.skipped_completed += 1,
                TaskOutcome::SkippedFailed => summary.skipped_failed += 1,
                TaskOutcome::Halted => {}
            }
        }
        summary.halted = self.halt.load(Ordering::Relaxed);

        Ok(summary)
    }

    async fn process_task(&self, mut task: VideoTask) -> TaskOutcome {
        if self.halt.load(Ordering::Relaxed) {
            return TaskOutcome::Halted;
        }

        match self.store.status(&task.id) {
            Some(Status::Completed) => {
                tracing::debug!("[{}] Already completed, skipping", task.id);
                return TaskOutcome::SkippedCompleted;
            }
            Some(Status::Failed) => {
                tracing::debug!("[{}] Previously failed, skipping", task.id);
                return TaskOutcome::SkippedFailed;
            }
            _ => {}
        }

        if let Err(e) = self.store.mark_pending(&task.id) {
            tracing::error!("[{}] Progress store write failed: {}", task.id, e);
            self.halt.store(true, Ordering::Relaxed);
            return TaskOutcome::Failed;
        }

        match self.fetch_with_retry(&mut task).await {
            Ok(transcript) => self.complete_task(&task, &transcript),
            Err(err) => self.fail_task(&task, &err),
        }
    }

    fn complete_task(&self, task: &VideoTask, transcript: &Transcript) -> TaskOutcome {
        match output::save_transcript(transcript, &self.config.output_dir, self.config.format) {
            Ok(path) => {
                if let Err(e) = self.store.mark_completed(&task.id) {
                    tracing::error!("[{}] Progress store write failed: {}", task.id, e);
                }
                tracing::info!("[{}] Transcript saved to {}", task.id, path.display());
                TaskOutcome::Completed
            }
            Err(e) => {
                // Output writes failing is a local problem, not a lookup
                // problem; surface it as a failure and halt regardless of
                // the skip-failed setting.
                self.log_error(&format!("[{}] failed to write output: {}", task.id, e));
                let _ = self.store.mark_failed(&task.id, &e.to_string());
                self.halt.store(true, Ordering::Relaxed);
                TaskOutcome::Failed
            }
        }
    }

    fn fail_task(&self, task: &VideoTask, err: &FetchError) -> TaskOutcome {
        tracing::warn!("[{}] Failed: {}", task.id, err);
        if let Err(e) = self.store.mark_failed(&task.id, &err.to_string()) {
            tracing::error!("[{}] Progress store write failed: {}", task.id, e);
        }
        if let Err(e) = self.failure_log.append(&task.id) {
            tracing::error!("[{}] Failure log write failed: {}", task.id, e);
        }
        if !self.config.skip_failed {
            self.halt.store(true, Ordering::Relaxed);
        }
        TaskOutcome::Failed
    }

    /// Attempt the lookup up to `retries + 1` times. Rate limits back off
    /// exponentially, network errors retry immediately, unclassified errors
    /// wait linearly, and permanent errors return after a single attempt.
    async fn fetch_with_retry(&self, task: &mut VideoTask) -> Result<Transcript, FetchError> {
        let request = TranscriptRequest {
            language: self.config.language.clone(),
            translate: self.config.translate,
        };
        let max_attempts = self.config.retries + 1;

        loop {
            let attempt = task.attempts;
            task.attempts += 1;

            self.pacer.wait().await;

            let err = match self.fetcher.fetch(&task.id, &request).await {
                Ok(transcript) => return Ok(transcript),
                Err(err) => err,
            };

            self.log_error(&format!(
                "[{}] attempt {}/{} failed: {}",
                task.id,
                attempt + 1,
                max_attempts,
                err
            ));

            let class = err.retry_class();
            if class == RetryClass::Never || task.attempts >= max_attempts {
                return Err(err);
            }

            match class {
                RetryClass::Backoff => {
                    let delay = backoff_delay(self.config.base_delay, attempt);
                    tracing::info!("[{}] Rate limited, backing off {:?}", task.id, delay);
                    sleep(delay).await;
                }
                RetryClass::Linear => {
                    sleep(linear_delay(self.config.base_delay, attempt)).await;
                }
                RetryClass::Immediate | RetryClass::Never => {}
            }
        }
    }

    fn log_error(&self, message: &str) {
        if let Err(e) = self.error_log.append(message) {
            tracing::warn!("Failed to write error log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::TranscriptFormat;
    use crate::fetch::{MockTranscriptFetcher, TranscriptLine};
    use crate::progress::FAILED_FILE;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{tempdir, TempDir};

    const ID_A: &str = "AAAAAAAAAAA";
    const ID_B: &str = "BBBBBBBBBBB";
    const ID_C: &str = "CCCCCCCCCCC";

    fn transcript(video_id: &str) -> Transcript {
        Transcript {
            video_id: video_id.to_string(),
            title: None,
            language: "en".to_string(),
            lines: vec![TranscriptLine {
                text: "hello".to_string(),
                start: 0.0,
                duration: 1.0,
            }],
        }
    }

    fn run_config(output_dir: PathBuf, retries: u32, skip_failed: bool) -> RunConfig {
        RunConfig {
            output_dir,
            format: TranscriptFormat::Txt,
            language: "en".to_string(),
            translate: false,
            cookies: None,
            retries,
            base_delay: Duration::from_millis(1),
            throttle: Duration::ZERO,
            workers: 1,
            skip_failed,
            retry_failed: false,
        }
    }

    fn driver(
        dir: &TempDir,
        mock: MockTranscriptFetcher,
        retries: u32,
        skip_failed: bool,
    ) -> BatchDriver {
        let store = ProgressStore::open(dir.path()).unwrap();
        BatchDriver::new(
            Arc::new(mock),
            store,
            run_config(dir.path().to_path_buf(), retries, skip_failed),
            true,
        )
    }

    #[tokio::test]
    async fn test_all_success_writes_one_file_per_task() {
        let dir = tempdir().unwrap();
        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch()
            .times(2)
            .returning(|id, _| Ok(transcript(id)));

        let driver = driver(&dir, mock, 2, true);
        let summary = driver
            .run(vec![VideoTask::new(ID_A, ID_A), VideoTask::new(ID_B, ID_B)])
            .await
            .unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert!(dir.path().join(format!("{}.txt", ID_A)).exists());
        assert!(dir.path().join(format!("{}.txt", ID_B)).exists());
        assert_eq!(driver.store.status(ID_A), Some(Status::Completed));
        assert_eq!(driver.store.status(ID_B), Some(Status::Completed));
    }

    #[tokio::test]
    async fn test_disabled_transcripts_get_exactly_one_attempt() {
        let dir = tempdir().unwrap();
        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch()
            .times(1)
            .returning(|_, _| Err(FetchError::TranscriptsDisabled));

        let driver = driver(&dir, mock, 3, true);
        let summary = driver.run(vec![VideoTask::new(ID_B, ID_B)]).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(driver.store.status(ID_B), Some(Status::Failed));
    }

    #[tokio::test]
    async fn test_rate_limited_then_success_uses_full_budget() {
        let dir = tempdir().unwrap();
        let mut mock = MockTranscriptFetcher::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_fetch()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(FetchError::RateLimited));
        mock.expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id, _| Ok(transcript(id)));

        let driver = driver(&dir, mock, 3, true);
        let summary = driver.run(vec![VideoTask::new(ID_C, ID_C)]).await.unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(driver.store.status(ID_C), Some(Status::Completed));
    }

    #[tokio::test]
    async fn test_exhausted_retry_budget_marks_failed() {
        let dir = tempdir().unwrap();
        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch()
            .times(3)
            .returning(|_, _| Err(FetchError::RateLimited));

        let driver = driver(&dir, mock, 2, true);
        let summary = driver.run(vec![VideoTask::new(ID_A, ID_A)]).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(driver.store.status(ID_A), Some(Status::Failed));
    }

    #[tokio::test]
    async fn test_completed_videos_are_not_refetched() {
        let dir = tempdir().unwrap();
        {
            let store = ProgressStore::open(dir.path()).unwrap();
            store.mark_completed(ID_A).unwrap();
        }

        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch().times(0);

        let driver = driver(&dir, mock, 2, true);
        let summary = driver.run(vec![VideoTask::new(ID_A, ID_A)]).await.unwrap();

        assert_eq!(summary.skipped_completed, 1);
        assert_eq!(summary.completed, 0);
    }

    #[tokio::test]
    async fn test_failed_videos_skipped_unless_retry_requested() {
        let dir = tempdir().unwrap();
        {
            let store = ProgressStore::open(dir.path()).unwrap();
            store.mark_failed(ID_A, "rate limited").unwrap();
        }

        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch().times(0);
        let driver = driver(&dir, mock, 2, true);
        let summary = driver.run(vec![VideoTask::new(ID_A, ID_A)]).await.unwrap();
        assert_eq!(summary.skipped_failed, 1);

        // With retry_failed the record is forgotten and the lookup runs again
        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch().times(1).returning(|id, _| Ok(transcript(id)));
        let store = ProgressStore::open(dir.path()).unwrap();
        let mut config = run_config(dir.path().to_path_buf(), 2, true);
        config.retry_failed = true;
        let driver = BatchDriver::new(Arc::new(mock), store, config, true);
        let summary = driver.run(vec![VideoTask::new(ID_A, ID_A)]).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(driver.store.status(ID_A), Some(Status::Completed));
    }

    #[tokio::test]
    async fn test_mixed_scenario() {
        let dir = tempdir().unwrap();
        let c_calls = Arc::new(AtomicUsize::new(0));
        let c_calls_in_mock = c_calls.clone();

        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch().returning(move |id, _| match id {
            ID_A => Ok(transcript(id)),
            ID_B => Err(FetchError::TranscriptsDisabled),
            ID_C => {
                if c_calls_in_mock.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::RateLimited)
                } else {
                    Ok(transcript(id))
                }
            }
            other => panic!("unexpected id {}", other),
        });

        let driver = driver(&dir, mock, 3, true);
        let summary = driver
            .run(vec![
                VideoTask::new(ID_A, ID_A),
                VideoTask::new(ID_B, ID_B),
                VideoTask::new(ID_C, ID_C),
            ])
            .await
            .unwrap();

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(driver.store.status(ID_A), Some(Status::Completed));
        assert_eq!(driver.store.status(ID_B), Some(Status::Failed));
        assert_eq!(driver.store.status(ID_C), Some(Status::Completed));
        assert_eq!(c_calls.load(Ordering::SeqCst), 3);

        // Failure list holds exactly the one permanent failure
        let failures = fs_err::read_to_string(dir.path().join(FAILED_FILE)).unwrap();
        assert_eq!(failures, format!("{}\n", ID_B));
    }

    #[tokio::test]
    async fn test_halts_after_failure_without_skip_failed() {
        let dir = tempdir().unwrap();
        let mut mock = MockTranscriptFetcher::new();
        mock.expect_fetch()
            .times(1)
            .returning(|_, _| Err(FetchError::Unavailable));

        let driver = driver(&dir, mock, 2, false);
        let summary = driver
            .run(vec![VideoTask::new(ID_B, ID_B), VideoTask::new(ID_A, ID_A)])
            .await
            .unwrap();

        assert!(summary.halted);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 0);
        // The second task was never attempted or recorded
        assert_eq!(driver.store.status(ID_A), None);
    }

    #[test]
    fn test_backoff_delays_are_non_decreasing_and_bounded() {
        let base = Duration::from_secs(2);
        let mut previous = Duration::ZERO;
        for attempt in 0..20 {
            let delay = backoff_delay(base, attempt);
            assert!(delay >= previous);
            assert!(delay <= MAX_BACKOFF);
            previous = delay;
        }
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(8));
    }

    #[test]
    fn test_linear_delays() {
        let base = Duration::from_secs(3);
        assert_eq!(linear_delay(base, 0), Duration::from_secs(3));
        assert_eq!(linear_delay(base, 1), Duration::from_secs(6));
        assert!(linear_delay(base, 1000) <= MAX_BACKOFF);
    }

    #[test]
    fn test_pacer_spaces_request_starts() {
        tokio_test::block_on(async {
            let pacer = Pacer::new(Duration::from_millis(20));
            let start = std::time::Instant::now();
            pacer.wait().await;
            pacer.wait().await;
            assert!(start.elapsed() >= Duration::from_millis(20));
        });
    }

    #[tokio::test]
    async fn test_load_tasks_dedupes_and_counts_invalid() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("yt.txt");
        fs_err::write(
            &input,
            "https://www.youtube.com/watch?v=AAAAAAAAAAA\n\nAAAAAAAAAAA\nnot a video\nBBBBBBBBBBB\n",
        )
        .unwrap();

        let mock = MockTranscriptFetcher::new();
        let driver = driver(&dir, mock, 0, true);
        let (tasks, invalid) = driver.load_tasks(&input).unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, ID_A);
        assert_eq!(tasks[1].id, ID_B);
        assert_eq!(invalid, 1);
    }
}
