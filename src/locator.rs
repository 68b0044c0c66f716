use std::collections::HashSet;

use tracing::debug;
use url::Url;

use crate::driver::{Driver, ElementRef};

/// Lookup strategies in priority order; a later strategy only contributes
/// elements whose media URL hasn't been seen by an earlier one.
const MEDIA_SELECTORS: &[&str] = &[
    "img[src*='.webp']",
    ".lazy-img",
    "[data-video-url]",
    "img[data-src*='.webp']",
    ".video-thumbnail",
    ".clip-item img",
];

/// A candidate media element before its overlay has been opened.
#[derive(Debug, Clone)]
pub struct Media {
    pub element: ElementRef,
    pub source_url: String,
    pub display_text: String,
}

/// Enumerate candidate media on the current page, deduplicated by source URL
/// in first-seen order. An empty result is a valid terminal state for a page.
pub fn find_media(driver: &dyn Driver, page_url: &str) -> Vec<Media> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut media = Vec::new();

    for selector in MEDIA_SELECTORS {
        for element in driver.locate_all(selector) {
            let raw = driver
                .read_attribute(&element, "src")
                .or_else(|| driver.read_attribute(&element, "data-src"))
                .or_else(|| driver.read_attribute(&element, "data-video-url"));
            let Some(raw) = raw else { continue };
            let Some(source_url) = normalize_url(&raw, page_url) else {
                debug!("Skipping unparseable media URL: {raw}");
                continue;
            };
            if !seen.insert(source_url.clone()) {
                continue;
            }
            let display_text = driver.read_attribute(&element, "alt").unwrap_or_default();
            media.push(Media {
                element,
                source_url,
                display_text,
            });
        }
    }

    media
}

/// Absolute, scheme-qualified form of a possibly relative media URL.
pub fn normalize_url(raw: &str, page_url: &str) -> Option<String> {
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(page_url)
            .ok()?
            .join(raw)
            .ok()
            .map(|u| u.to_string()),
        Err(_) => None,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDriver, FakeThumb};

    const PAGE: &str = "https://eyecannndy.com/technique/pan";

    #[test]
    fn dedups_across_strategies_in_first_seen_order() {
        let thumbs = vec![
            FakeThumb::with_src("https://cdn.example/a.webp", "first", "text"),
            FakeThumb {
                // Same URL reachable via the data-src strategy; must not recur.
                data_src: Some("https://cdn.example/a.webp".to_string()),
                alt: "dupe".to_string(),
                ..Default::default()
            },
            FakeThumb {
                data_src: Some("https://cdn.example/b.webp".to_string()),
                alt: "second".to_string(),
                ..Default::default()
            },
        ];
        let driver = FakeDriver::single_page(PAGE, thumbs);
        assert!(driver.navigate(PAGE));

        let media = find_media(&driver, PAGE);
        let urls: Vec<&str> = media.iter().map(|m| m.source_url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://cdn.example/a.webp", "https://cdn.example/b.webp"]
        );
        assert_eq!(media[0].display_text, "first");
    }

    #[test]
    fn relative_urls_are_made_absolute() {
        let driver = FakeDriver::single_page(
            PAGE,
            vec![FakeThumb {
                data_src: Some("/clips/c.webp".to_string()),
                ..Default::default()
            }],
        );
        assert!(driver.navigate(PAGE));

        let media = find_media(&driver, PAGE);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].source_url, "https://eyecannndy.com/clips/c.webp");
    }

    #[test]
    fn empty_page_yields_empty_sequence() {
        let driver = FakeDriver::single_page(PAGE, vec![]);
        assert!(driver.navigate(PAGE));
        assert!(find_media(&driver, PAGE).is_empty());
    }
}
