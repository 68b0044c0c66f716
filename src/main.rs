mod dedup;
mod download;
mod driver;
mod locator;
mod pipeline;
mod popup;
mod store;
mod techniques;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "eyecandy_scraper",
    about = "Popup-modal scraper and video downloader for eyecannndy.com technique pages"
)]
struct Cli {
    /// Directory for per-technique record files and the extraction checkpoint
    #[arg(long, default_value = "technique_files")]
    data_dir: PathBuf,

    /// Directory for downloaded media, bucketed by technique
    #[arg(long, default_value = "videos")]
    videos_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape technique pages, opening each video's popup modal
    Scrape {
        /// Only these technique slugs (default: the full catalogue)
        #[arg(short, long)]
        technique: Vec<String>,
        /// Max videos to process per technique
        #[arg(short = 'n', long)]
        max_videos: Option<usize>,
        /// Re-scrape even techniques the checkpoint marks complete
        #[arg(long)]
        force: bool,
        /// Only techniques whose unit file holds zero videos (implies --force)
        #[arg(long)]
        empty_only: bool,
    },
    /// Collapse duplicate video URLs within each technique file
    Dedup,
    /// Download referenced media into technique folders
    Download {
        /// Max downloads this run
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Scrape + dedup + download in one pipeline
    Run {
        /// Max videos to process per technique
        #[arg(short = 'n', long)]
        max_videos: Option<usize>,
    },
    /// Show checkpoint and output statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scrape {
            technique,
            max_videos,
            force,
            empty_only,
        } => {
            let mut units = selected_units(&technique);
            if empty_only {
                let empty = store::zero_video_units(&cli.data_dir)?;
                units.retain(|u| empty.contains(u));
                println!("Selected {} zero-video techniques for re-scraping", units.len());
            }
            let stats = scrape(&cli.data_dir, &units, max_videos, force || empty_only)?;
            stats.print();
            Ok(())
        }
        Commands::Dedup => {
            let stats = dedup::dedup_dir(&cli.data_dir)?;
            println!(
                "Deduplicated {} techniques, removed {} duplicate URLs.",
                stats.units_processed, stats.duplicates_removed
            );
            println!("Videos appearing in multiple techniques are preserved.");
            Ok(())
        }
        Commands::Download { limit } => {
            let entries = download::collect_entries(&cli.data_dir, limit)?;
            if entries.is_empty() {
                println!("No videos to download. Run 'scrape' first.");
                return Ok(());
            }
            let stats = download::download_all(entries, &cli.videos_dir).await?;
            stats.print();
            Ok(())
        }
        Commands::Run { max_videos } => {
            let units = selected_units(&[]);
            println!("Pipeline: scraping {} techniques...", units.len());
            let stats = scrape(&cli.data_dir, &units, max_videos, false)?;
            stats.print();

            let dd = dedup::dedup_dir(&cli.data_dir)?;
            println!("Removed {} duplicate URLs.", dd.duplicates_removed);

            let entries = download::collect_entries(&cli.data_dir, None)?;
            if entries.is_empty() {
                println!("Nothing to download (no records extracted).");
                return Ok(());
            }
            let ds = download::download_all(entries, &cli.videos_dir).await?;
            ds.print();
            Ok(())
        }
        Commands::Stats => print_stats(&cli.data_dir, &cli.videos_dir),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn selected_units(filter: &[String]) -> Vec<String> {
    if filter.is_empty() {
        techniques::TECHNIQUES.iter().map(|s| s.to_string()).collect()
    } else {
        filter.to_vec()
    }
}

/// Launch the browser and run the extraction pipeline over `units`. The
/// browser is torn down when the driver drops, error paths included.
fn scrape(
    data_dir: &Path,
    units: &[String],
    max_videos: Option<usize>,
    force: bool,
) -> Result<pipeline::RunStats> {
    let driver = driver::chrome::ChromeDriver::launch()?;
    let mut opts = pipeline::RunOptions::new(data_dir.to_path_buf());
    opts.max_videos = max_videos;
    opts.force = force;
    pipeline::run(&driver, units, &opts)
}

fn print_stats(data_dir: &Path, videos_dir: &Path) -> Result<()> {
    let checkpoint =
        store::ScrapeCheckpoint::load(&data_dir.join(store::SCRAPE_CHECKPOINT_FILE));
    let downloads =
        store::DownloadCheckpoint::load(&videos_dir.join(store::DOWNLOAD_CHECKPOINT_FILE));

    let mut unit_count = 0usize;
    let mut video_count = 0usize;
    if data_dir.is_dir() {
        for slug in store::list_units(data_dir)? {
            unit_count += 1;
            video_count += store::load_unit(data_dir, &slug)?.videos.len();
        }
    }

    println!("Techniques known:     {}", techniques::TECHNIQUES.len());
    println!("Techniques completed: {}", checkpoint.completed_techniques.len());
    if let Some(active) = &checkpoint.current_technique {
        println!(
            "Active technique:     {} (cursor {})",
            active, checkpoint.current_video_index
        );
    }
    println!("Unit files on disk:   {unit_count}");
    println!("Videos extracted:     {video_count}");
    println!("Videos downloaded:    {}", downloads.downloaded_urls.len());
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
