use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::driver::Driver;
use crate::locator::{self, Media};
use crate::popup::{Extraction, PopupExtractor, Timing};
use crate::store::{self, ScrapeCheckpoint, UnitFile, UnitStatus, VideoRecord};
use crate::techniques;

/// Save the extraction checkpoint every this many media references.
pub const CHECKPOINT_INTERVAL: usize = 5;
const PAGE_LOAD_ATTEMPTS: usize = 3;
/// Retries on unexpected extraction errors, on top of the extractor's own
/// quality-gate attempts.
const EXTRA_EXTRACT_ATTEMPTS: usize = 2;

pub struct RunOptions {
    pub data_dir: PathBuf,
    /// Cap on media references per technique; None processes everything.
    pub max_videos: Option<usize>,
    /// Re-scrape the requested units even when the checkpoint marks them
    /// complete.
    pub force: bool,
    pub timing: Timing,
    pub page_retry_delay: Duration,
    pub video_retry_delay: Duration,
    pub video_delay: Duration,
    pub unit_delay: Duration,
}

impl RunOptions {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            max_videos: None,
            force: false,
            timing: Timing::default(),
            page_retry_delay: Duration::from_secs(2),
            video_retry_delay: Duration::from_secs(1),
            video_delay: Duration::from_millis(100),
            unit_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunStats {
    pub units_completed: usize,
    pub units_skipped: usize,
    pub units_failed: usize,
    pub records: usize,
    pub videos_skipped: usize,
    pub videos_failed: usize,
}

impl RunStats {
    pub fn print(&self) {
        println!(
            "Techniques: {} completed, {} skipped, {} failed. Videos: {} extracted, {} skipped, {} failed.",
            self.units_completed,
            self.units_skipped,
            self.units_failed,
            self.records,
            self.videos_skipped,
            self.videos_failed,
        );
    }
}

/// Scrape `units` in order, resuming from the extraction checkpoint. A unit's
/// total failure yields zero records and the run moves on; only output-file
/// write failures abort a unit early.
pub fn run(driver: &dyn Driver, units: &[String], opts: &RunOptions) -> Result<RunStats> {
    fs::create_dir_all(&opts.data_dir)?;
    let cp_path = opts.data_dir.join(store::SCRAPE_CHECKPOINT_FILE);
    let mut checkpoint = ScrapeCheckpoint::load(&cp_path);
    if opts.force {
        for unit in units {
            checkpoint.mark_incomplete(unit);
        }
        checkpoint.save(&cp_path);
        info!("Force mode: cleared completion for {} techniques", units.len());
    }
    let mut stats = RunStats::default();

    let pb = ProgressBar::new(units.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    for (i, unit) in units.iter().enumerate() {
        pb.set_message(unit.clone());
        if checkpoint.is_complete(unit) {
            info!("Skipping already completed technique: {unit}");
            stats.units_skipped += 1;
            pb.inc(1);
            continue;
        }

        info!("Processing technique {}/{}: {unit}", i + 1, units.len());
        match scrape_unit(driver, unit, &mut checkpoint, opts, &mut stats) {
            Ok(Some(count)) => {
                stats.units_completed += 1;
                stats.records += count;
            }
            Ok(None) => stats.units_failed += 1,
            Err(e) => {
                error!("Technique {unit} failed: {e:#}");
                stats.units_failed += 1;
            }
        }
        pb.inc(1);
        std::thread::sleep(opts.unit_delay);
    }

    pb.finish_and_clear();
    Ok(stats)
}

/// One technique page: navigate, locate media, extract each reference,
/// persisting a consistent snapshot after every accepted record. Returns
/// Ok(None) when the page never loaded.
fn scrape_unit(
    driver: &dyn Driver,
    technique: &str,
    checkpoint: &mut ScrapeCheckpoint,
    opts: &RunOptions,
    stats: &mut RunStats,
) -> Result<Option<usize>> {
    let url = techniques::page_url(technique);
    let cp_path = opts.data_dir.join(store::SCRAPE_CHECKPOINT_FILE);
    let resume = checkpoint.resume_index(technique);
    if resume > 0 {
        info!("Resuming technique {technique} from video {}", resume + 1);
    }

    if !navigate_with_retry(driver, &url, opts) {
        warn!("Giving up on {technique}: page never loaded");
        return Ok(None);
    }

    let media = locator::find_media(driver, &url);
    info!("Found {} unique video elements for {technique}", media.len());

    let limit = opts.max_videos.unwrap_or(media.len()).min(media.len());

    // When resuming mid-unit, start from the snapshot already on disk so the
    // final file still covers [0, resume).
    let mut records: Vec<VideoRecord> = if resume > 0 {
        store::load_unit(&opts.data_dir, technique)
            .map(|u| u.videos)
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let extractor = PopupExtractor::new(driver, opts.timing.clone());

    for idx in resume..limit {
        if (idx - resume) % CHECKPOINT_INTERVAL == 0 {
            checkpoint.mark_progress(technique, idx);
            checkpoint.save(&cp_path);
        }
        info!("Processing video {}/{} for {technique}", idx + 1, limit);

        match extract_with_retry(&extractor, &media[idx], &url, opts) {
            Ok(Extraction::Accepted(record)) => {
                records.push(record);
                let unit = UnitFile::new(technique, UnitStatus::InProgress, records);
                store::save_unit(&opts.data_dir, &unit)
                    .with_context(|| format!("writing output for {technique}"))?;
                records = unit.videos;
            }
            Ok(Extraction::Rejected) => stats.videos_skipped += 1,
            Err(e) => {
                error!("Skipping video {} after repeated errors: {e:#}", idx + 1);
                stats.videos_failed += 1;
            }
        }
        std::thread::sleep(opts.video_delay);
    }

    let count = records.len();
    store::save_unit(
        &opts.data_dir,
        &UnitFile::new(technique, UnitStatus::Completed, records),
    )
    .with_context(|| format!("writing final output for {technique}"))?;
    checkpoint.mark_complete(technique);
    checkpoint.save(&cp_path);

    info!("Completed technique {technique}: extracted data from {count} videos");
    Ok(Some(count))
}

fn navigate_with_retry(driver: &dyn Driver, url: &str, opts: &RunOptions) -> bool {
    for attempt in 1..=PAGE_LOAD_ATTEMPTS {
        if driver.navigate(url) {
            return true;
        }
        if attempt < PAGE_LOAD_ATTEMPTS {
            warn!("Failed to load {url}, retrying ({attempt}/{PAGE_LOAD_ATTEMPTS})");
            std::thread::sleep(opts.page_retry_delay);
        }
    }
    false
}

fn extract_with_retry(
    extractor: &PopupExtractor,
    media: &Media,
    page_url: &str,
    opts: &RunOptions,
) -> Result<Extraction> {
    for attempt in 1..=EXTRA_EXTRACT_ATTEMPTS {
        match extractor.extract(media, page_url) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!(
                    "Extraction error for {} (attempt {attempt}/{}): {e:#}",
                    media.source_url,
                    EXTRA_EXTRACT_ATTEMPTS + 1
                );
                std::thread::sleep(opts.video_retry_delay);
            }
        }
    }
    extractor.extract(media, page_url)
}

// ── Tests ──
