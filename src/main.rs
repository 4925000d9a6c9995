use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use animecix_downloader::utils::logging::init_tracing_with_level;
use animecix_downloader::{AnimeService, AppConfig, TaskStatusReport, TitleDetail};

const USAGE: &str = "Usage:
  animecix-downloader search <query>
  animecix-downloader details <title-url>
  animecix-downloader download <title-url>";

/// Interval between status polls while a download runs
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let config = AppConfig::load_or_default();
    init_tracing_with_level(&config.advanced.log_level);

    if let Err(error) = run(config, &args).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig, args: &[String]) -> Result<()> {
    let (command, rest) = match args.split_first() {
        Some((command, rest)) if !rest.is_empty() => (command.as_str(), rest.join(" ")),
        _ => bail!("{USAGE}"),
    };

    let service = AnimeService::new(config).context("Failed to start service")?;
    info!("{} v{}", animecix_downloader::NAME, animecix_downloader::VERSION);

    match command {
        "search" => {
            let results = service.search(&rest).await?;
            if results.is_empty() {
                println!("No titles found for '{rest}'");
            }
            for (index, result) in results.iter().enumerate() {
                println!("{:>3}. {}\n     {}", index + 1, result.title, result.url);
            }
        }
        "details" => {
            let detail = service.details(&rest).await?;
            print_details(&detail);
        }
        "download" => {
            let submitted = service.submit_download(&rest)?;
            println!("{} (task {})", submitted.message, submitted.task_id);
            let report = poll_until_done(&service, &submitted.task_id).await?;
            print_report(&report);
            service.shutdown();
        }
        other => bail!("Unknown command '{other}'\n{USAGE}"),
    }
    Ok(())
}

async fn poll_until_done(service: &AnimeService, task_id: &str) -> Result<TaskStatusReport> {
    let mut last_processed = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelling...");
                service.cancel_download(task_id)?;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let report = service.get_status(task_id).await?;
        if report.status.is_terminal() {
            return Ok(report);
        }
        if last_processed != Some(report.processed) {
            match report.total_episodes {
                Some(total) => println!(
                    "{:?}: {}/{} episodes",
                    report.status, report.processed, total
                ),
                None => println!("{:?}: enumerating episodes", report.status),
            }
            last_processed = Some(report.processed);
        }
    }
}

fn print_details(detail: &TitleDetail) {
    println!("{}\n{}", detail.title, detail.url);
    for season in &detail.seasons {
        println!("Season {} ({} episodes)", season.season_number, season.episodes.len());
        for episode in &season.episodes {
            println!("  E{:<4} {}", episode.number, episode.url);
        }
    }
}

fn print_report(report: &TaskStatusReport) {
    println!("Task {}: {:?}", report.task_id, report.status);
    if let Some(error) = &report.error {
        println!("Error: {error}");
    }
    if let Some(summary) = report.summary {
        println!(
            "Episodes: {} total, {} succeeded, {} failed",
            summary.total, summary.succeeded, summary.failed
        );
    }
    for result in report.results.iter().flatten() {
        match (&result.file_path, &result.error) {
            (Some(path), _) => println!("  S{}E{} -> {}", result.season, result.number, path),
            (None, error) => println!(
                "  S{}E{} failed: {}",
                result.season,
                result.number,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
