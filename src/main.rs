use anyhow::Result;
use clap::Parser;
use console::style;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod driver;
mod fetch;
mod output;
mod progress;
mod retry;
mod utils;

use cli::{Cli, Commands};
use config::{Config, RunConfig};
use driver::{BatchDriver, RunSummary};
use fetch::ytdlp::YtDlpFetcher;
use progress::{ProgressStore, ERROR_LOG_FILE, FAILED_FILE};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "caption_harvester=debug,harvester=debug"
    } else {
        "caption_harvester=info,harvester=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run {
            input,
            output,
            format,
            language,
            translate,
            retries,
            base_delay,
            throttle,
            workers,
            skip_failed,
            retry_failed,
            cookies,
        } => {
            let missing_deps = utils::check_dependencies().await;
            if !missing_deps.is_empty() {
                eprintln!("Dependency check warnings:");
                for dep in missing_deps {
                    eprintln!("  - {}", dep);
                }
            }

            let config = Config::load().await?;
            let run_config = RunConfig::resolve(
                &config,
                output,
                format,
                language,
                translate,
                retries,
                base_delay,
                throttle,
                workers,
                skip_failed,
                retry_failed,
                cookies,
            )?;

            let store = ProgressStore::open(&run_config.output_dir)?;
            let fetcher = Arc::new(YtDlpFetcher::new(run_config.cookies.clone()));
            let output_dir = run_config.output_dir.clone();
            let halt_on_failure = !run_config.skip_failed;
            let driver = BatchDriver::new(fetcher, store, run_config, cli.quiet);

            let (tasks, invalid) = driver.load_tasks(&input)?;
            if tasks.is_empty() {
                println!("No valid video URLs or IDs found in {}", input.display());
                return Ok(());
            }

            tracing::info!("Found {} videos to process", tasks.len());
            let summary = driver.run(tasks).await?;
            print_summary(&summary, invalid, &output_dir);

            if summary.halted && halt_on_failure {
                anyhow::bail!("Run halted after a failure (pass --skip-failed to continue past failures)");
            }
        }
        Commands::Retry { input, output } => {
            let config = Config::load().await?;
            let output_dir = output.unwrap_or_else(|| config.batch.output_dir.clone());

            let report = retry::plan_iteration(&input, &output_dir)?;
            retry::print_report(&report);
        }
        Commands::Status { output } => {
            let config = Config::load().await?;
            let output_dir = output.unwrap_or_else(|| config.batch.output_dir.clone());

            let store = ProgressStore::open(&output_dir)?;
            let counts = store.counts();
            println!("Progress in {}:", output_dir.display());
            println!("  Completed: {}", style(counts.completed).green());
            println!("  Failed:    {}", style(counts.failed).red());
            println!("  Pending:   {}", counts.pending);
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                Config::display_path()?;
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, invalid: usize, output_dir: &std::path::Path) {
    println!();
    println!("{}", style("Processing complete!").bold());
    println!("  Completed:          {}", style(summary.completed).green());
    println!("  Failed:             {}", style(summary.failed).red());
    if summary.skipped_completed > 0 {
        println!("  Skipped (done):     {}", summary.skipped_completed);
    }
    if summary.skipped_failed > 0 {
        println!("  Skipped (failed):   {}", summary.skipped_failed);
    }
    if invalid > 0 {
        println!("  Invalid input lines: {}", invalid);
    }
    println!("  Elapsed:            {}", utils::format_duration(summary.elapsed.as_secs_f64()));
    println!();
    println!("Transcripts saved in: {}", output_dir.display());
    println!("Failed videos logged in: {}", output_dir.join(FAILED_FILE).display());
    println!("Error log saved in: {}", output_dir.join(ERROR_LOG_FILE).display());
}
