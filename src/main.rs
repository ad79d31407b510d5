use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ratecrawl::config::ConfigLoader;
use ratecrawl::crawler::CrawlerEngine;
use ratecrawl::fetcher::HttpFetcher;
use ratecrawl::limiter::{DomainRateLimiter, RateConfig};
use ratecrawl::metrics::report::RunStatistics;
use ratecrawl::metrics::snapshot::MetricsSnapshot;
use ratecrawl::output::{ResultSink, console::ConsoleSink, csv::CsvSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ratecrawl")]
#[command(version)]
#[command(about = "Concurrent page fetcher with per-origin rate limiting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crawl from a config file
    Run {
        /// Path to the configuration file (JSON/YAML/TOML)
        #[arg(short, long)]
        config: PathBuf,

        /// Show progress bars (stderr)
        #[arg(short, long)]
        progress: bool,
    },
    /// Validate a configuration file
    Check {
        /// Path to the configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fetch a list of URLs given on the command line
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,

        /// Number of concurrent workers
        #[arg(short, long, default_value_t = 4)]
        workers: usize,

        /// Sustained requests per second allowed per origin
        #[arg(long, default_value_t = 2.0)]
        rps: f64,

        /// Burst capacity per origin
        #[arg(long, default_value_t = 5)]
        burst: u32,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Write results to this CSV file instead of the console
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Show progress bars (stderr)
        #[arg(short, long)]
        progress: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    let cli = Cli::parse();
    let logger = env_logger::Builder::from_default_env().build();
    let level = logger.filter();
    let multi = Arc::new(MultiProgress::new());

    let progress = match &cli.command {
        Commands::Run { progress, .. } | Commands::Fetch { progress, .. } => *progress,
        Commands::Check { .. } => false,
    };
    if progress {
        indicatif_log_bridge::LogWrapper::new((*multi).clone(), logger)
            .try_init()
            .context("installing logger")?;
    } else {
        log::set_boxed_logger(Box::new(logger)).context("installing logger")?;
    }
    log::set_max_level(level);
    let multi = progress.then_some(multi);

    match cli.command {
        Commands::Run { config, .. } => {
            log::info!("Loading config from {:?}", config);
            let config_data = ConfigLoader::load(&config)?;
            log::info!("Loaded crawl: {}", config_data.name);

            let engine = ConfigLoader::create_engine(&config_data)?;
            let sink = ConfigLoader::create_sink(&config_data, multi.clone());
            crawl(engine, config_data.urls, sink, multi).await?;
        }
        Commands::Check { config } => match ConfigLoader::load(&config) {
            Ok(cfg) => {
                println!("✅ Config is valid:");
                println!("   Name: {}", cfg.name);
                println!("   URLs: {}", cfg.urls.len());
                println!("   Workers: {}", cfg.workers);
                println!(
                    "   Rate: {} req/s, burst {} per origin",
                    cfg.rate.requests_per_second, cfg.rate.burst
                );
            }
            Err(e) => {
                eprintln!("❌ Config error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Fetch {
            urls,
            workers,
            rps,
            burst,
            timeout_ms,
            csv,
            ..
        } => {
            let limiter = DomainRateLimiter::new(RateConfig::new(rps, burst))?;
            let fetcher = HttpFetcher::new(Duration::from_millis(timeout_ms))?;
            let engine = CrawlerEngine::new(workers, limiter, Arc::new(fetcher))?;
            let sink: Box<dyn ResultSink> = match csv {
                Some(path) => Box::new(CsvSink::new(path)),
                None => Box::new(ConsoleSink::new(multi.clone())),
            };
            crawl(engine, urls, sink, multi).await?;
        }
    }

    Ok(())
}

async fn crawl(
    engine: CrawlerEngine,
    urls: Vec<String>,
    mut sink: Box<dyn ResultSink>,
    multi: Option<Arc<MultiProgress>>,
) -> anyhow::Result<()> {
    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling outstanding jobs...");
            cancel.cancel();
        }
    });

    let mut progress_bar: Option<ProgressBar> = None;
    let mut progress_task = None;
    if let Some(multi) = &multi {
        let pb = multi.add(ProgressBar::new(urls.len() as u64));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                .progress_chars("#>-"),
        );

        let mut metrics_rx = engine.watch_metrics();
        let pb_clone = pb.clone();
        progress_bar = Some(pb);
        progress_task = Some(tokio::spawn(async move {
            while metrics_rx.changed().await.is_ok() {
                let snapshot: MetricsSnapshot = metrics_rx.borrow().clone();
                pb_clone.set_position(snapshot.jobs_completed);
                pb_clone.set_message(format!(
                    "Active: {} | Waiting: {} | Success: {:.1}% | RPS: {:.2}",
                    snapshot.active_workers,
                    snapshot.awaiting_permit,
                    snapshot.success_rate,
                    snapshot.requests_per_second
                ));
            }
        }));
    }

    log::info!("Starting crawl...");
    let report = engine.run(urls).await;

    if let Some(task) = progress_task {
        task.abort();
    }
    if let Some(pb) = progress_bar {
        let final_metrics = engine.get_metrics();
        pb.set_style(
            ProgressStyle::default_bar()
                .template("✅ [{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_position(final_metrics.jobs_completed);
        pb.finish_with_message(format!(
            "Success: {:.1}% | RPS: {:.2} - Completed",
            final_metrics.success_rate, final_metrics.requests_per_second
        ));
    }

    let exported = sink.export(&report.results).await;
    print_summary(&report.stats, engine.workers(), engine.limiter().len());
    exported.context("exporting results")?;
    Ok(())
}

fn print_summary(stats: &RunStatistics, workers: usize, origins: usize) {
    println!("\n✅ Crawl Completed:");
    println!("   Started: {}", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   URLs Processed: {}", stats.total_jobs);
    println!("   Origins: {}", origins);
    println!("   Workers: {}", workers);
    println!("   Successes: {}", stats.success_count);
    println!("   Errors: {}", stats.error_count);
    println!("   Average Duration: {}ms", stats.average_duration.as_millis());
    println!("   Total Time: {:.1}s", stats.elapsed.as_secs_f64());
}
