//! Line-oriented classification of overlay text into structured fields.
//! Pure functions over the text, so the parsing policy is testable without a
//! browser in the loop.

use crate::store::Credits;

/// Minimum line length for a description candidate.
const MIN_DESCRIPTION_LINE: usize = 30;
/// Tag lines are short all-caps fragments.
const MAX_TAG_WORDS: usize = 5;
/// Raw diagnostic text is capped at this many characters.
const EXTRA_TEXT_CAP: usize = 1000;

/// Lines containing any of these (case-insensitive) are structural, never
/// description candidates.
const FIELD_KEYWORDS: &[&str] = &[
    "director", "dop", "colorist", "technique", "editor", "original source",
    "submit", "login", "signup", "search",
];

/// Site chrome that must never be collected as a tag.
const NAV_TERMS: &[&str] = &[
    "EYECANDY", "SUBMIT", "TERMS", "BADGE", "RESOURCES", "LEADERBOARD",
    "SEARCH", "LOGIN", "SIGNUP",
];

/// Narrower denylist for fallback description candidates. Prose legitimately
/// mentions words like "terms" or "resources", so only unambiguous chrome
/// disqualifies a candidate.
const FALLBACK_NAV_TERMS: &[&str] = &["EYECANDY", "SUBMIT", "LOGIN", "SIGNUP", "SEARCH"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayFields {
    pub description: String,
    pub tags: Vec<String>,
    pub technique_tags: Vec<String>,
    pub credits: Credits,
    pub extra_text: String,
}

/// Classify overlay text line by line. Precedence per line: labelled credit
/// fields, technique tags, description candidates (longest wins, first-seen
/// on ties), then all-caps tag lines.
pub fn parse_overlay_text(text: &str) -> OverlayFields {
    let mut fields = OverlayFields {
        extra_text: text.chars().take(EXTRA_TEXT_CAP).collect(),
        ..Default::default()
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // "Editor" doubles as a director credit; the site labels some clips
        // that way.
        if let Some(v) = labelled(line, "director").or_else(|| labelled(line, "editor")) {
            fields.credits.director = v;
        } else if let Some(v) = labelled(line, "dop") {
            fields.credits.photography = v;
        } else if let Some(v) = labelled(line, "colorist") {
            fields.credits.colorist = v;
        } else if let Some(v) = labelled(line, "technique") {
            fields.technique_tags = v
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        } else if is_description_candidate(line) {
            if char_len(line) > char_len(&fields.description) {
                fields.description = line.to_string();
            }
        } else if is_tag_line(line) {
            fields.tags.push(line.to_string());
        }
    }

    fields
}

/// Value of a labelled line in either delimiter form: `Label - value` (the
/// label may appear mid-line) or a leading `Label: value`. Case-insensitive.
fn labelled(line: &str, label: &str) -> Option<String> {
    let lower = line.to_lowercase();
    if lower.contains(&format!("{label} -")) {
        return line.splitn(2, '-').nth(1).map(|v| v.trim().to_string());
    }
    if lower.starts_with(&format!("{label}:")) {
        return line.splitn(2, ':').nth(1).map(|v| v.trim().to_string());
    }
    None
}

pub fn is_description_candidate(line: &str) -> bool {
    if char_len(line) <= MIN_DESCRIPTION_LINE {
        return false;
    }
    let lower = line.to_lowercase();
    !FIELD_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn is_tag_line(line: &str) -> bool {
    is_all_caps(line)
        && line.split_whitespace().count() <= MAX_TAG_WORDS
        && !NAV_TERMS.contains(&line)
}

/// True when the line has cased characters and none of them are lowercase.
pub fn is_all_caps(text: &str) -> bool {
    let mut has_cased = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_cased = true;
        }
    }
    has_cased
}

/// True when `text` mentions chrome that disqualifies a fallback description.
pub fn contains_fallback_nav_term(text: &str) -> bool {
    let upper = text.to_uppercase();
    FALLBACK_NAV_TERMS.iter().any(|t| upper.contains(t))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ── Tests ──
