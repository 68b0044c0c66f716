pub mod text;

use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::driver::{Driver, ElementRef};
use crate::locator::Media;
use crate::store::VideoRecord;
use text::{contains_fallback_nav_term, is_all_caps, parse_overlay_text, OverlayFields};

/// A record is only accepted with a description longer than this.
pub const MIN_DESCRIPTION_LEN: usize = 20;
/// Quality-gate attempts per media reference.
pub const MAX_GATE_ATTEMPTS: usize = 3;

/// Overlay locators in priority order; the first visible match wins.
const OVERLAY_SELECTORS: &[&str] = &[
    ".grid-popup", ".grid-popup.active", ".popup_click",
    ".info-popup", ".video-info", ".overlay", "#popup", "#modal",
    ".popup", ".modal", "[role='dialog']", ".video-details",
    ".modal-content", ".popup-content", ".dialog-content",
    ".video-popup", ".clip-popup", ".technique-popup",
];

const SPINNER_SELECTOR: &str = ".htmx-indicator";

const TITLE_SELECTORS: &[&str] = &[".title.mt-2", ".title", "h1", "h2", "h3", ".video-title"];

const CLOSE_SELECTORS: &[&str] = &[
    ".close-popup", "#close_me", ".close", ".close-btn", "[aria-label='Close']",
    ".modal-close", "button[type='button']", ".overlay", "#popup", ".popup",
    ".modal-backdrop", "[data-dismiss='modal']", ".fa-times", ".fa-close",
    ".fa-x", "button[title='Close']", ".btn-close", ".close-modal",
    ".close-overlay",
];

/// Checked after closing; a visible match means the overlay is stuck.
const VERIFY_SELECTORS: &[&str] = &[
    ".info-popup", ".video-info", ".overlay", "#popup", "#modal",
    ".popup", ".modal", "[role='dialog']", ".video-details",
];

/// Description fallback selectors, scoped under the overlay.
const DESCRIPTION_SELECTORS: &[&str] = &[
    ".description", ".video-description", ".content", ".info", "p", ".text",
    ".details", ".summary", ".about", "[class*='desc']", "[class*='info']",
    "[class*='content']",
];

const PRIMARY_FALLBACK_MIN: usize = 30;
const DEEP_FALLBACK_MIN: usize = 40;
const DEEP_FALLBACK_MIN_SPACES: usize = 5;

/// Waits and delays for the extraction state machine. Defaults are tuned for
/// the live site; tests zero them out.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Post-click delay, scaled linearly by attempt number.
    pub activation_delay: Duration,
    pub overlay_timeout: Duration,
    pub poll_interval: Duration,
    pub content_timeout: Duration,
    /// Extra settle time after the loading indicator disappears.
    pub settle_delay: Duration,
    /// Wait used when the content timeout expires.
    pub fallback_delay: Duration,
    pub close_delay: Duration,
    /// Pause between quality-gate attempts.
    pub retry_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            activation_delay: Duration::from_millis(500),
            overlay_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            content_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
            fallback_delay: Duration::from_secs(3),
            close_delay: Duration::from_millis(200),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl Timing {
    /// All-zero timing, for tests driving a fake page.
    pub fn instant() -> Self {
        Self {
            activation_delay: Duration::ZERO,
            overlay_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
            content_timeout: Duration::ZERO,
            settle_delay: Duration::ZERO,
            fallback_delay: Duration::ZERO,
            close_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Outcome of one media reference.
#[derive(Debug)]
pub enum Extraction {
    Accepted(VideoRecord),
    /// Quality gate failed after all attempts; the reference is skipped for
    /// this run. Not an error.
    Rejected,
}

pub struct PopupExtractor<'d> {
    driver: &'d dyn Driver,
    timing: Timing,
}

impl<'d> PopupExtractor<'d> {
    pub fn new(driver: &'d dyn Driver, timing: Timing) -> Self {
        Self { driver, timing }
    }

    /// Open the media reference's overlay, parse it, and close it again,
    /// retrying with growing delays until a meaningful description comes out.
    /// Unexpected driver failures close the overlay best-effort and bubble up.
    pub fn extract(&self, media: &Media, source_page: &str) -> Result<Extraction> {
        for attempt in 1..=MAX_GATE_ATTEMPTS {
            let (title, fields) = match self.attempt(media, attempt) {
                Ok(result) => result,
                Err(e) => {
                    self.close_overlay();
                    return Err(e);
                }
            };
            self.close_overlay();

            if passes_gate(&fields.description) {
                if attempt > 1 {
                    info!("Got description on attempt {attempt} for {}", media.source_url);
                }
                return Ok(Extraction::Accepted(VideoRecord {
                    media_url: media.source_url.clone(),
                    display_text: media.display_text.clone(),
                    title,
                    description: fields.description,
                    tags: fields.tags,
                    technique_tags: fields.technique_tags,
                    credits: fields.credits,
                    extra_text: fields.extra_text,
                    extracted_at: Utc::now(),
                    source_page: source_page.to_string(),
                }));
            }

            if attempt < MAX_GATE_ATTEMPTS {
                warn!(
                    "No meaningful description on attempt {attempt} for {}, retrying",
                    media.source_url
                );
                std::thread::sleep(self.timing.retry_delay);
            }
        }

        warn!(
            "Quality gate failed after {MAX_GATE_ATTEMPTS} attempts: {}",
            media.source_url
        );
        Ok(Extraction::Rejected)
    }

    /// One pass through the state machine: click, wait, parse. Does not close.
    fn attempt(&self, media: &Media, attempt: usize) -> Result<(String, OverlayFields)> {
        self.driver.scroll_into_view(&media.element)?;
        self.driver.click(&media.element)?;
        // Linear backoff against overlays that render late.
        std::thread::sleep(self.timing.activation_delay * attempt as u32);

        let Some(overlay) = self.wait_for_overlay() else {
            warn!("No overlay found for {}", media.source_url);
            return Ok((String::new(), OverlayFields::default()));
        };
        self.wait_for_content();

        let title = self.extract_title(&overlay);
        let full_text = self.driver.read_text(&overlay).unwrap_or_default();
        let mut fields = parse_overlay_text(&full_text);
        if fields.description.is_empty() {
            if let Some(desc) = self.description_fallback(&overlay, &full_text) {
                fields.description = desc;
            }
        }
        Ok((title, fields))
    }

    /// Poll the overlay locator list until one yields a visible element. A
    /// timeout is a valid outcome, handled by the caller as empty fields.
    fn wait_for_overlay(&self) -> Option<ElementRef> {
        let deadline = Instant::now() + self.timing.overlay_timeout;
        loop {
            for selector in OVERLAY_SELECTORS {
                for el in self.driver.locate_all(selector) {
                    if self.driver.is_visible(&el) {
                        debug!("Found overlay with selector: {selector}");
                        return Some(el);
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(self.timing.poll_interval);
        }
    }

    /// Wait for the loading indicator to disappear; on timeout, proceed after
    /// a fallback delay rather than blocking.
    fn wait_for_content(&self) {
        let deadline = Instant::now() + self.timing.content_timeout;
        loop {
            let spinning = self
                .driver
                .locate_all(SPINNER_SELECTOR)
                .iter()
                .any(|s| self.driver.is_visible(s));
            if !spinning {
                std::thread::sleep(self.timing.settle_delay);
                return;
            }
            if Instant::now() >= deadline {
                warn!("Timeout waiting for overlay content to load");
                std::thread::sleep(self.timing.fallback_delay);
                return;
            }
            std::thread::sleep(self.timing.poll_interval);
        }
    }

    fn extract_title(&self, overlay: &ElementRef) -> String {
        for selector in TITLE_SELECTORS {
            let scoped = overlay.descendant(selector);
            if let Some(el) = self.driver.locate_all(&scoped).into_iter().next() {
                if let Ok(title) = self.driver.read_text(&el) {
                    let title = title.trim();
                    if !title.is_empty() {
                        return title.to_string();
                    }
                }
            }
        }
        String::new()
    }

    /// Two-stage fallback when line parsing found no description: scoped
    /// description-ish selectors first, then a deep scan of all descendants
    /// for text the overlay text itself doesn't already contain.
    fn description_fallback(&self, overlay: &ElementRef, full_text: &str) -> Option<String> {
        for selector in DESCRIPTION_SELECTORS {
            let scoped = overlay.descendant(selector);
            for el in self.driver.locate_all(&scoped) {
                if let Ok(text) = self.driver.read_text(&el) {
                    let text = text.trim();
                    if primary_fallback_accepts(text) {
                        info!("Found description with selector {selector}");
                        return Some(text.to_string());
                    }
                }
            }
        }

        for el in self.driver.locate_all(&overlay.descendant("*")) {
            if let Ok(text) = self.driver.read_text(&el) {
                let text = text.trim();
                if deep_fallback_accepts(text, full_text) {
                    return Some(text.to_string());
                }
            }
        }
        None
    }

    /// Dismiss the overlay: close controls, then Escape, then a background
    /// click, then verify and nudge once more. Logs on failure, never raises.
    fn close_overlay(&self) {
        let mut closed = false;
        'outer: for selector in CLOSE_SELECTORS {
            for el in self.driver.locate_all(selector) {
                if self.driver.is_visible(&el) && self.driver.click(&el).is_ok() {
                    debug!("Closed overlay using selector: {selector}");
                    std::thread::sleep(self.timing.close_delay);
                    closed = true;
                    break 'outer;
                }
            }
        }

        if !closed {
            let _ = self.driver.send_cancel_key();
            std::thread::sleep(self.timing.close_delay);
            let _ = self.driver.click_background();
            std::thread::sleep(self.timing.close_delay);
        }

        for selector in VERIFY_SELECTORS {
            let stuck = self
                .driver
                .locate_all(selector)
                .iter()
                .any(|el| self.driver.is_visible(el));
            if stuck {
                warn!("Overlay still visible with selector: {selector}");
                let _ = self.driver.send_cancel_key();
                std::thread::sleep(self.timing.close_delay);
                break;
            }
        }
    }
}

pub fn passes_gate(description: &str) -> bool {
    description.trim().chars().count() > MIN_DESCRIPTION_LEN
}

fn primary_fallback_accepts(text: &str) -> bool {
    text.chars().count() > PRIMARY_FALLBACK_MIN
        && !contains_fallback_nav_term(text)
        && !is_all_caps(text)
}

fn deep_fallback_accepts(text: &str, full_text: &str) -> bool {
    text.chars().count() > DEEP_FALLBACK_MIN
        && !full_text.contains(text)
        && !contains_fallback_nav_term(text)
        && !is_all_caps(text)
        && text.matches(' ').count() > DEEP_FALLBACK_MIN_SPACES
}

// ── Tests ──
