use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SCRAPE_CHECKPOINT_FILE: &str = "scrape_progress.json";
pub const DOWNLOAD_CHECKPOINT_FILE: &str = ".download_progress.json";
pub const SUMMARY_FILE: &str = "_summary.json";

/// Serialize to pretty JSON and replace `path` via a temp-file rename, so a
/// crash mid-write never leaves a half-written artifact behind.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        f.flush()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn load_json_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Corrupt {} ({}); starting fresh", path.display(), e);
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

// ── Extraction checkpoint ──

/// Progress marker for the technique pipeline. Missing or corrupt files read
/// as "nothing completed yet": the worst case is redundant work, never loss.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScrapeCheckpoint {
    pub completed_techniques: Vec<String>,
    pub current_technique: Option<String>,
    pub current_video_index: usize,
}

impl ScrapeCheckpoint {
    pub fn load(path: &Path) -> Self {
        let cp: Self = load_json_or_default(path);
        if !cp.completed_techniques.is_empty() {
            info!(
                "Loaded progress: {} techniques completed",
                cp.completed_techniques.len()
            );
        }
        cp
    }

    pub fn save(&self, path: &Path) {
        if let Err(e) = atomic_write_json(path, self) {
            warn!("Could not save progress: {e:#}");
        }
    }

    pub fn is_complete(&self, technique: &str) -> bool {
        self.completed_techniques.iter().any(|t| t == technique)
    }

    /// Index to resume from within `technique`, 0 unless it is the active unit.
    pub fn resume_index(&self, technique: &str) -> usize {
        if self.current_technique.as_deref() == Some(technique) && !self.is_complete(technique) {
            self.current_video_index
        } else {
            0
        }
    }

    pub fn mark_progress(&mut self, technique: &str, video_index: usize) {
        self.current_technique = Some(technique.to_string());
        self.current_video_index = video_index;
    }

    pub fn mark_complete(&mut self, technique: &str) {
        if !self.is_complete(technique) {
            self.completed_techniques.push(technique.to_string());
        }
        self.current_technique = None;
        self.current_video_index = 0;
    }

    /// Forget completion for `technique` so the next run re-scrapes it from
    /// the start.
    pub fn mark_incomplete(&mut self, technique: &str) {
        self.completed_techniques.retain(|t| t != technique);
        if self.current_technique.as_deref() == Some(technique) {
            self.current_technique = None;
            self.current_video_index = 0;
        }
    }
}

// ── Download checkpoint ──

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DownloadCheckpoint {
    pub downloaded_urls: HashSet<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl DownloadCheckpoint {
    pub fn load(path: &Path) -> Self {
        load_json_or_default(path)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.downloaded_urls.contains(url)
    }

    /// Record a verified download and persist immediately, so an interruption
    /// loses at most the in-flight file.
    pub fn record(&mut self, url: &str, path: &Path) {
        self.downloaded_urls.insert(url.to_string());
        self.last_updated = Some(Utc::now());
        if let Err(e) = atomic_write_json(path, self) {
            warn!("Could not save download progress: {e:#}");
        }
    }
}

// ── Per-technique record files ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credits {
    pub director: String,
    pub photography: String,
    pub colorist: String,
}

/// One extracted video, keyed by `media_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub media_url: String,
    pub display_text: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub technique_tags: Vec<String>,
    pub credits: Credits,
    pub extra_text: String,
    pub extracted_at: DateTime<Utc>,
    pub source_page: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFile {
    pub technique: String,
    pub status: UnitStatus,
    pub scraped_at: DateTime<Utc>,
    pub video_count: usize,
    pub videos: Vec<VideoRecord>,
}

impl UnitFile {
    pub fn new(technique: &str, status: UnitStatus, videos: Vec<VideoRecord>) -> Self {
        Self {
            technique: technique.to_string(),
            status,
            scraped_at: Utc::now(),
            video_count: videos.len(),
            videos,
        }
    }
}

pub fn unit_path(dir: &Path, technique: &str) -> PathBuf {
    dir.join(format!("{technique}.json"))
}

fn urls_path(dir: &Path, technique: &str) -> PathBuf {
    dir.join(format!("{technique}.urls.txt"))
}

/// Write a unit snapshot plus its companion flat URL list. The two are always
/// regenerated together so they cannot disagree.
pub fn save_unit(dir: &Path, unit: &UnitFile) -> Result<()> {
    fs::create_dir_all(dir)?;
    atomic_write_json(&unit_path(dir, &unit.technique), unit)?;

    let mut urls = String::new();
    for video in &unit.videos {
        urls.push_str(&video.media_url);
        urls.push('\n');
    }
    let path = urls_path(dir, &unit.technique);
    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, urls)?;
    fs::rename(&tmp, &path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub fn load_unit(dir: &Path, technique: &str) -> Result<UnitFile> {
    let path = unit_path(dir, technique);
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Technique slugs with a unit file in `dir`, sorted. The summary
/// (underscore-prefixed) and the checkpoint are not units.
pub fn list_units(dir: &Path) -> Result<Vec<String>> {
    let mut units = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == SCRAPE_CHECKPOINT_FILE {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".json") {
            if !stem.starts_with('_') {
                units.push(stem.to_string());
            }
        }
    }
    units.sort();
    Ok(units)
}

/// Techniques whose unit file holds no videos, candidates for a forced
/// re-scrape.
pub fn zero_video_units(dir: &Path) -> Result<Vec<String>> {
    let mut empty = Vec::new();
    if !dir.is_dir() {
        return Ok(empty);
    }
    for slug in list_units(dir)? {
        if load_unit(dir, &slug)?.videos.is_empty() {
            empty.push(slug);
        }
    }
    Ok(empty)
}

// ── Run summary ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechniqueSummary {
    pub video_count: usize,
    pub status: UnitStatus,
    pub source_page: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub total_videos: usize,
    pub techniques: BTreeMap<String, TechniqueSummary>,
}

/// Rebuild `_summary.json` strictly from the unit files currently on disk.
/// Counts are projections of the record sets, never patched in place.
pub fn write_summary(dir: &Path) -> Result<Summary> {
    let mut techniques = BTreeMap::new();
    let mut total_videos = 0;

    for slug in list_units(dir)? {
        let unit = load_unit(dir, &slug)?;
        total_videos += unit.videos.len();
        techniques.insert(
            slug.clone(),
            TechniqueSummary {
                video_count: unit.videos.len(),
                status: unit.status,
                source_page: crate::techniques::page_url(&slug),
            },
        );
    }

    let summary = Summary {
        generated_at: Utc::now(),
        total_videos,
        techniques,
    };
    atomic_write_json(&dir.join(SUMMARY_FILE), &summary)?;
    Ok(summary)
}

// ── Tests ──

/// Minimal record for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_record(url: &str, description: &str) -> VideoRecord {
    VideoRecord {
        media_url: url.to_string(),
        display_text: String::new(),
        title: String::new(),
        description: description.to_string(),
        tags: vec![],
        technique_tags: vec![],
        credits: Credits::default(),
        extra_text: String::new(),
        extracted_at: Utc::now(),
        source_page: "https://eyecannndy.com/technique/pan".to_string(),
    }
}
