//! Scripted in-memory driver for tests: a page is a list of thumbnails, each
//! with per-attempt overlay text so flaky popups can be simulated.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::{Driver, ElementRef};

#[derive(Debug, Clone, Default)]
pub struct FakeThumb {
    pub src: Option<String>,
    pub data_src: Option<String>,
    pub alt: String,
    pub title: String,
    /// Overlay text per click attempt; the last entry repeats. Empty means
    /// clicking never opens an overlay.
    pub overlay_texts: Vec<String>,
    /// Texts returned for descendant scans inside the overlay.
    pub descendant_texts: Vec<String>,
}

impl FakeThumb {
    pub fn with_src(src: &str, alt: &str, overlay_text: &str) -> Self {
        Self {
            src: Some(src.to_string()),
            alt: alt.to_string(),
            overlay_texts: vec![overlay_text.to_string()],
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct State {
    current: Option<String>,
    open: Option<usize>,
    clicks: Vec<usize>,
}

pub struct FakeDriver {
    pages: HashMap<String, Vec<FakeThumb>>,
    state: RefCell<State>,
    pub close_button_works: bool,
    /// Fail this many navigations before succeeding, for retry tests.
    pub fail_navigations: Cell<usize>,
}

impl FakeDriver {
    pub fn new(pages: HashMap<String, Vec<FakeThumb>>) -> Self {
        Self {
            pages,
            state: RefCell::new(State::default()),
            close_button_works: true,
            fail_navigations: Cell::new(0),
        }
    }

    pub fn single_page(url: &str, thumbs: Vec<FakeThumb>) -> Self {
        let mut pages = HashMap::new();
        pages.insert(url.to_string(), thumbs);
        Self::new(pages)
    }

    fn thumbs(&self) -> Vec<FakeThumb> {
        let state = self.state.borrow();
        state
            .current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .cloned()
            .unwrap_or_default()
    }

    /// Map a thumbnail ElementRef back to its index in the page's thumb list.
    fn thumb_index(&self, el: &ElementRef) -> Option<usize> {
        let thumbs = self.thumbs();
        let matching: Vec<usize> = match el.selector.as_str() {
            "img[src*='.webp']" => (0..thumbs.len()).filter(|&i| thumbs[i].src.is_some()).collect(),
            "img[data-src*='.webp']" => (0..thumbs.len())
                .filter(|&i| thumbs[i].data_src.is_some())
                .collect(),
            _ => return None,
        };
        matching.get(el.index).copied()
    }

    fn open_thumb(&self) -> Option<(usize, FakeThumb)> {
        let idx = self.state.borrow().open?;
        self.thumbs().get(idx).cloned().map(|t| (idx, t))
    }

    fn overlay_text(&self) -> Option<String> {
        let (idx, thumb) = self.open_thumb()?;
        let clicks = self.state.borrow().clicks.get(idx).copied().unwrap_or(1);
        let attempt = clicks.saturating_sub(1).min(thumb.overlay_texts.len().saturating_sub(1));
        thumb.overlay_texts.get(attempt).cloned()
    }

    fn is_overlay_selector(selector: &str) -> bool {
        selector == ".grid-popup" || selector == ".popup"
    }

    pub fn overlay_open(&self) -> bool {
        self.state.borrow().open.is_some()
    }

    /// Times the thumbnail at `idx` has been clicked on the current page.
    pub fn click_count(&self, idx: usize) -> usize {
        self.state.borrow().clicks.get(idx).copied().unwrap_or(0)
    }
}

impl Driver for FakeDriver {
    fn navigate(&self, url: &str) -> bool {
        if self.fail_navigations.get() > 0 {
            self.fail_navigations.set(self.fail_navigations.get() - 1);
            return false;
        }
        let known = self.pages.contains_key(url);
        let mut state = self.state.borrow_mut();
        state.current = known.then(|| url.to_string());
        state.open = None;
        state.clicks = self
            .pages
            .get(url)
            .map(|t| vec![0; t.len()])
            .unwrap_or_default();
        known
    }

    fn locate_all(&self, selector: &str) -> Vec<ElementRef> {
        let thumbs = self.thumbs();
        let open = self.state.borrow().open;

        let count = match selector {
            "img[src*='.webp']" => thumbs.iter().filter(|t| t.src.is_some()).count(),
            "img[data-src*='.webp']" => thumbs.iter().filter(|t| t.data_src.is_some()).count(),
            _ if Self::is_overlay_selector(selector) => usize::from(open.is_some()),
            ".close-popup" => usize::from(open.is_some()),
            _ if selector.starts_with(".grid-popup ") && open.is_some() => {
                let scoped = selector.trim_start_matches(".grid-popup ").trim();
                let (_, thumb) = match self.open_thumb() {
                    Some(pair) => pair,
                    None => return vec![],
                };
                if scoped.contains(".title") {
                    usize::from(!thumb.title.is_empty())
                } else if scoped == "*" || scoped == "p" {
                    thumb.descendant_texts.len()
                } else {
                    0
                }
            }
            _ => 0,
        };
        (0..count).map(|i| ElementRef::new(selector, i)).collect()
    }

    fn click(&self, el: &ElementRef) -> Result<()> {
        if let Some(idx) = self.thumb_index(el) {
            let thumbs = self.thumbs();
            let mut state = self.state.borrow_mut();
            if let Some(c) = state.clicks.get_mut(idx) {
                *c += 1;
            }
            if !thumbs[idx].overlay_texts.is_empty() {
                state.open = Some(idx);
            }
            return Ok(());
        }
        if el.selector == ".close-popup" {
            if self.close_button_works {
                self.state.borrow_mut().open = None;
            }
            return Ok(());
        }
        Err(anyhow!("unclickable element {}", el.selector))
    }

    fn scroll_into_view(&self, _el: &ElementRef) -> Result<()> {
        Ok(())
    }

    fn read_text(&self, el: &ElementRef) -> Result<String> {
        if Self::is_overlay_selector(&el.selector) {
            return self
                .overlay_text()
                .ok_or_else(|| anyhow!("no overlay open"));
        }
        if el.selector.starts_with(".grid-popup ") {
            let scoped = el.selector.trim_start_matches(".grid-popup ").trim();
            let (_, thumb) = self.open_thumb().ok_or_else(|| anyhow!("no overlay open"))?;
            if scoped.contains(".title") {
                return Ok(thumb.title.clone());
            }
            return thumb
                .descendant_texts
                .get(el.index)
                .cloned()
                .ok_or_else(|| anyhow!("no such descendant"));
        }
        Err(anyhow!("unreadable element {}", el.selector))
    }

    fn read_attribute(&self, el: &ElementRef, name: &str) -> Option<String> {
        let idx = self.thumb_index(el)?;
        let thumbs = self.thumbs();
        let thumb = thumbs.get(idx)?;
        match name {
            "src" => thumb.src.clone(),
            "data-src" => thumb.data_src.clone(),
            "alt" => Some(thumb.alt.clone()),
            _ => None,
        }
    }

    fn is_visible(&self, el: &ElementRef) -> bool {
        !self.locate_all(&el.selector).is_empty()
    }

    fn send_cancel_key(&self) -> Result<()> {
        self.state.borrow_mut().open = None;
        Ok(())
    }

    fn click_background(&self) -> Result<()> {
        self.state.borrow_mut().open = None;
        Ok(())
    }
}
