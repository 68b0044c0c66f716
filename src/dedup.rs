use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::store::{self, UnitFile};

#[derive(Debug, Default)]
pub struct DedupStats {
    pub units_processed: usize,
    pub duplicates_removed: usize,
}

/// Collapse repeated media URLs within one unit to their first occurrence,
/// order-preserving, and recompute the derived count. Never looks across
/// units: the same URL under two techniques is valid data.
pub fn dedup_unit(unit: &mut UnitFile) -> usize {
    let before = unit.videos.len();
    let mut seen: HashSet<String> = HashSet::new();
    unit.videos.retain(|v| seen.insert(v.media_url.clone()));
    unit.video_count = unit.videos.len();
    before - unit.videos.len()
}

/// Deduplicate every unit file in `dir` independently, rewrite the ones that
/// changed, and regenerate the summary so counts cannot drift.
pub fn dedup_dir(dir: &Path) -> Result<DedupStats> {
    let mut stats = DedupStats::default();

    for slug in store::list_units(dir)? {
        let mut unit = store::load_unit(dir, &slug)?;
        let removed = dedup_unit(&mut unit);
        if removed > 0 {
            store::save_unit(dir, &unit)?;
            info!(
                "{slug}: removed {removed} duplicates, {} videos remain",
                unit.videos.len()
            );
        }
        stats.units_processed += 1;
        stats.duplicates_removed += removed;
    }

    store::write_summary(dir)?;
    Ok(stats)
}

// ── Tests ──
