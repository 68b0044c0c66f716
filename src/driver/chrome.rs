use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use tracing::{debug, warn};

use super::{Driver, ElementRef};

const PAGE_SETTLE: Duration = Duration::from_secs(3);

/// Headless Chrome implementation of the rendering collaborator. One browser,
/// one tab, owned for the lifetime of a run; the browser process is shut down
/// on drop.
pub struct ChromeDriver {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeDriver {
    pub fn launch() -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .map_err(|e| anyhow!("building launch options: {e}"))?;
        let browser = Browser::new(options).context("launching headless Chrome")?;
        let tab = browser.new_tab().context("opening tab")?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn resolve(&self, el: &ElementRef) -> Result<Element<'_>> {
        let mut found = self
            .tab
            .find_elements(&el.selector)
            .unwrap_or_default();
        if el.index < found.len() {
            Ok(found.swap_remove(el.index))
        } else {
            Err(anyhow!(
                "element {}[{}] no longer present",
                el.selector,
                el.index
            ))
        }
    }
}

impl Driver for ChromeDriver {
    fn navigate(&self, url: &str) -> bool {
        let loaded = self
            .tab
            .navigate_to(url)
            .and_then(|t| t.wait_until_navigated());
        match loaded {
            Ok(_) => {
                // Lazy-loaded grids keep mutating after the navigation event.
                std::thread::sleep(PAGE_SETTLE);
                true
            }
            Err(e) => {
                warn!("Error loading page {url}: {e:#}");
                false
            }
        }
    }

    fn locate_all(&self, selector: &str) -> Vec<ElementRef> {
        let count = self
            .tab
            .find_elements(selector)
            .map(|els| els.len())
            .unwrap_or(0);
        (0..count).map(|i| ElementRef::new(selector, i)).collect()
    }

    fn click(&self, el: &ElementRef) -> Result<()> {
        self.resolve(el)?.click()?;
        Ok(())
    }

    fn scroll_into_view(&self, el: &ElementRef) -> Result<()> {
        self.resolve(el)?.scroll_into_view()?;
        Ok(())
    }

    fn read_text(&self, el: &ElementRef) -> Result<String> {
        Ok(self.resolve(el)?.get_inner_text()?)
    }

    fn read_attribute(&self, el: &ElementRef, name: &str) -> Option<String> {
        let element = self.resolve(el).ok()?;
        let result = element.call_js_fn(
            "function(name) { return this.getAttribute(name); }",
            vec![serde_json::Value::String(name.to_string())],
            false,
        );
        match result {
            Ok(remote) => remote.value.and_then(|v| v.as_str().map(str::to_string)),
            Err(e) => {
                debug!("Attribute read failed for {}: {e:#}", el.selector);
                None
            }
        }
    }

    fn is_visible(&self, el: &ElementRef) -> bool {
        // Elements with display:none have no box model.
        self.resolve(el)
            .and_then(|element| Ok(element.get_box_model()?))
            .is_ok()
    }

    fn send_cancel_key(&self) -> Result<()> {
        self.tab.press_key("Escape")?;
        Ok(())
    }

    fn click_background(&self) -> Result<()> {
        self.tab.evaluate("document.body.click()", false)?;
        Ok(())
    }
}
