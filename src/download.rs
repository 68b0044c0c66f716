use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use url::Url;

use crate::store::{self, DownloadCheckpoint};
use crate::techniques;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Polite pause after each successful fetch.
const REQUEST_DELAY: Duration = Duration::from_millis(500);
const MAX_FILENAME_LEN: usize = 200;
const MEDIA_EXT: &str = ".webp";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One flattened download task, bucketed by technique folder.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub media_url: String,
    pub title: String,
    pub technique: String,
}

#[derive(Debug, Default)]
pub struct DownloadStats {
    pub total: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadStats {
    pub fn print(&self) {
        println!(
            "Downloads: {} total, {} downloaded, {} skipped, {} failed.",
            self.total, self.downloaded, self.skipped, self.failed
        );
    }
}

/// Flatten the per-technique record files into download entries, in unit
/// order, optionally capped at `limit`.
pub fn collect_entries(data_dir: &Path, limit: Option<usize>) -> Result<Vec<DownloadEntry>> {
    let mut entries = Vec::new();
    for slug in store::list_units(data_dir)? {
        let unit = store::load_unit(data_dir, &slug)?;
        for video in unit.videos {
            entries.push(DownloadEntry {
                technique: techniques::technique_from_page_url(&video.source_page),
                media_url: video.media_url,
                title: video.title,
            });
        }
    }
    if let Some(limit) = limit {
        entries.truncate(limit);
        info!("Limited to {limit} videos");
    }
    Ok(entries)
}

/// Fetch every entry into `<videos_dir>/<technique>/`, sequentially, with
/// URL-level checkpointing independent from the extraction checkpoint.
/// Individual failures are counted, never raised.
pub async fn download_all(entries: Vec<DownloadEntry>, videos_dir: &Path) -> Result<DownloadStats> {
    std::fs::create_dir_all(videos_dir)?;
    let cp_path = videos_dir.join(store::DOWNLOAD_CHECKPOINT_FILE);
    let mut checkpoint = DownloadCheckpoint::load(&cp_path);
    if !checkpoint.downloaded_urls.is_empty() {
        info!(
            "Resume mode: {} previously downloaded videos",
            checkpoint.downloaded_urls.len()
        );
    }

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let mut stats = DownloadStats {
        total: entries.len(),
        ..Default::default()
    };

    let mut groups: BTreeMap<String, Vec<DownloadEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.technique.clone()).or_default().push(entry);
    }
    info!("Found videos for {} techniques", groups.len());

    let pb = ProgressBar::new(stats.total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for (technique, group) in groups {
        info!("Processing technique: {technique} ({} videos)", group.len());
        let technique_dir = videos_dir.join(&technique);
        std::fs::create_dir_all(&technique_dir)?;

        for entry in group {
            match download_one(&client, &entry, &technique_dir, &mut checkpoint, &cp_path).await {
                Outcome::Downloaded => stats.downloaded += 1,
                Outcome::Skipped => stats.skipped += 1,
                Outcome::Failed => stats.failed += 1,
            }
            pb.inc(1);
        }
    }

    pb.finish_and_clear();
    Ok(stats)
}

enum Outcome {
    Downloaded,
    Skipped,
    Failed,
}

async fn download_one(
    client: &reqwest::Client,
    entry: &DownloadEntry,
    technique_dir: &Path,
    checkpoint: &mut DownloadCheckpoint,
    cp_path: &Path,
) -> Outcome {
    let filename = derive_filename(&entry.media_url, &entry.title);
    let dest = technique_dir.join(&filename);

    if resume_skip(checkpoint, cp_path, &entry.media_url, &dest) {
        return Outcome::Skipped;
    }

    let tmp = technique_dir.join(format!("{filename}.tmp"));
    if tmp.exists() {
        info!("Cleaning up incomplete download: {}", tmp.display());
        let _ = std::fs::remove_file(&tmp);
    }

    for attempt in 1..=MAX_RETRIES {
        info!(
            "Downloading (attempt {attempt}/{MAX_RETRIES}): {} -> {}",
            entry.media_url,
            dest.display()
        );
        match try_download(client, &entry.media_url, &tmp, &dest).await {
            Ok(bytes) => {
                checkpoint.record(&entry.media_url, cp_path);
                info!("Downloaded {} ({bytes} bytes)", dest.display());
                tokio::time::sleep(REQUEST_DELAY).await;
                return Outcome::Downloaded;
            }
            Err(e) => {
                warn!("Attempt {attempt} failed for {}: {e:#}", entry.media_url);
                let _ = std::fs::remove_file(&tmp);
                if attempt == MAX_RETRIES {
                    error!(
                        "Failed to download after {MAX_RETRIES} attempts: {}",
                        entry.media_url
                    );
                    return Outcome::Failed;
                }
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Outcome::Failed
}

/// Cheap resume checks, run before any network traffic: checkpoint
/// membership first, then an existing non-empty destination (which is
/// backfilled into the checkpoint for the fast path next time).
fn resume_skip(
    checkpoint: &mut DownloadCheckpoint,
    cp_path: &Path,
    url: &str,
    dest: &Path,
) -> bool {
    if checkpoint.contains(url) {
        info!("Skipping previously downloaded: {url}");
        return true;
    }
    let non_empty = dest.exists()
        && std::fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false);
    if non_empty {
        info!("Skipping existing file: {}", dest.display());
        checkpoint.record(url, cp_path);
        return true;
    }
    false
}

/// Stream the resource to `tmp`, verify the declared size when the server
/// reports one, then rename into place. The destination only ever exists
/// complete.
async fn try_download(
    client: &reqwest::Client,
    url: &str,
    tmp: &Path,
    dest: &Path,
) -> Result<u64> {
    let mut response = client.get(url).send().await?.error_for_status()?;
    let expected = response.content_length();

    let mut file = tokio::fs::File::create(tmp).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    if let Some(expected) = expected {
        if written != expected {
            bail!("incomplete download: {written}/{expected} bytes");
        }
    }

    tokio::fs::rename(tmp, dest).await?;
    Ok(written)
}

/// Destination filename: URL basename when it already carries the media
/// extension, else the sanitized title, else a stable hash of the URL.
pub fn derive_filename(media_url: &str, title: &str) -> String {
    let basename: Option<String> = Url::parse(media_url)
        .ok()
        .and_then(|u| u.path_segments()?.last().map(str::to_string));

    if let Some(name) = basename {
        if name.len() > MEDIA_EXT.len() && name.ends_with(MEDIA_EXT) {
            return sanitize_filename(&name);
        }
    }

    let title = title.trim();
    if !title.is_empty() {
        return format!("{}{MEDIA_EXT}", sanitize_filename(title));
    }
    format!("video_{:016x}{MEDIA_EXT}", fnv1a(media_url))
}

/// Strip characters unsafe on common filesystems and cap the length.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();
    cleaned.trim().chars().take(MAX_FILENAME_LEN).collect()
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::store::{test_record, UnitFile, UnitStatus};

    /// Serves responses whose body is shorter than the declared
    /// Content-Length, counting connections.
    fn truncating_server(hits: Arc<AtomicUsize>) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().take(MAX_RETRIES as usize) {
                let Ok(mut stream) = stream else { break };
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\ntruncated",
                );
            }
        });
        format!("http://{addr}/clip.webp")
    }

    #[tokio::test]
    async fn truncated_body_is_retried_and_never_kept() {
        let dir = tempfile::tempdir().unwrap();
        let cp_path = dir.path().join(store::DOWNLOAD_CHECKPOINT_FILE);
        let mut cp = DownloadCheckpoint::default();

        let hits = Arc::new(AtomicUsize::new(0));
        let url = truncating_server(hits.clone());
        let client = reqwest::Client::new();
        let entry = DownloadEntry {
            media_url: url.clone(),
            title: String::new(),
            technique: "pan".to_string(),
        };

        let outcome = download_one(&client, &entry, dir.path(), &mut cp, &cp_path).await;

        assert!(matches!(outcome, Outcome::Failed));
        assert_eq!(hits.load(Ordering::SeqCst), MAX_RETRIES as usize);
        assert!(
            !dir.path().join("clip.webp").exists(),
            "destination must never exist with truncated content"
        );
        assert!(!dir.path().join("clip.webp.tmp").exists());
        assert!(!cp.contains(&url));
    }

    #[test]
    fn filename_prefers_url_basename() {
        let name = derive_filename(
            "https://cdn.example/clips/dusk-flight.webp?token=abc",
            "Some Title",
        );
        assert_eq!(name, "dusk-flight.webp");
    }

    #[test]
    fn filename_falls_back_to_sanitized_title() {
        let name = derive_filename("https://cdn.example/clip/813", "Dusk: Flight / Take 2");
        assert_eq!(name, "Dusk_ Flight _ Take 2.webp");
    }

    #[test]
    fn filename_hash_fallback_is_stable() {
        let a = derive_filename("https://cdn.example/clip/813", "");
        let b = derive_filename("https://cdn.example/clip/813", "  ");
        assert_eq!(a, b);
        assert!(a.starts_with("video_"));
        assert!(a.ends_with(MEDIA_EXT));
    }

    #[test]
    fn filename_length_is_capped() {
        let long_title = "x".repeat(500);
        let name = derive_filename("https://cdn.example/clip/813", &long_title);
        assert_eq!(name.len(), MAX_FILENAME_LEN + MEDIA_EXT.len());
    }

    #[test]
    fn checkpoint_membership_skips_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cp_path = dir.path().join(store::DOWNLOAD_CHECKPOINT_FILE);
        let mut cp = DownloadCheckpoint::default();
        cp.record("https://cdn.example/v1.webp", &cp_path);

        let dest = dir.path().join("v1.webp");
        assert!(resume_skip(&mut cp, &cp_path, "https://cdn.example/v1.webp", &dest));
        assert!(!dest.exists());
    }

    #[test]
    fn existing_file_skips_and_backfills_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cp_path = dir.path().join(store::DOWNLOAD_CHECKPOINT_FILE);
        let mut cp = DownloadCheckpoint::default();

        let dest = dir.path().join("v1.webp");
        std::fs::write(&dest, b"content").unwrap();

        assert!(resume_skip(&mut cp, &cp_path, "https://cdn.example/v1.webp", &dest));
        assert!(cp.contains("https://cdn.example/v1.webp"));

        // Backfill was persisted for the fast path on the next run.
        let reloaded = DownloadCheckpoint::load(&cp_path);
        assert!(reloaded.contains("https://cdn.example/v1.webp"));
    }

    #[test]
    fn empty_file_is_not_treated_as_complete() {
        let dir = tempfile::tempdir().unwrap();
        let cp_path = dir.path().join(store::DOWNLOAD_CHECKPOINT_FILE);
        let mut cp = DownloadCheckpoint::default();

        let dest = dir.path().join("v1.webp");
        std::fs::write(&dest, b"").unwrap();

        assert!(!resume_skip(&mut cp, &cp_path, "https://cdn.example/v1.webp", &dest));
    }

    #[test]
    fn entries_flatten_by_technique_and_respect_limit() {
        let dir = tempfile::tempdir().unwrap();
        store::save_unit(
            dir.path(),
            &UnitFile::new(
                "aerial",
                UnitStatus::Completed,
                vec![{
                    let mut r = test_record("https://cdn.example/a.webp", "d");
                    r.source_page = "https://eyecannndy.com/technique/aerial".to_string();
                    r
                }],
            ),
        )
        .unwrap();
        store::save_unit(
            dir.path(),
            &UnitFile::new(
                "pan",
                UnitStatus::Completed,
                vec![
                    test_record("https://cdn.example/b.webp", "d"),
                    test_record("https://cdn.example/c.webp", "d"),
                ],
            ),
        )
        .unwrap();

        let all = collect_entries(dir.path(), None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].technique, "aerial");
        assert_eq!(all[1].technique, "pan");

        let capped = collect_entries(dir.path(), Some(2)).unwrap();
        assert_eq!(capped.len(), 2);
    }
}
