pub mod chrome;

#[cfg(test)]
pub mod fake;

use anyhow::Result;

/// Handle to a located element. Selectors are re-resolved on every use, so a
/// handle stays valid across overlay open/close churn as long as the page
/// keeps the same structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub selector: String,
    pub index: usize,
}

impl ElementRef {
    pub fn new(selector: &str, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
        }
    }

    /// Handle scoped to a descendant of this element.
    pub fn descendant(&self, selector: &str) -> String {
        format!("{} {}", self.selector, selector)
    }
}

/// Narrow interface onto the rendering layer. Locator fallthrough is
/// expressed as "empty result if none", never as an error.
pub trait Driver {
    /// Navigate to `url`; false means the page never loaded.
    fn navigate(&self, url: &str) -> bool;

    /// All elements currently matching a CSS selector, in document order.
    fn locate_all(&self, selector: &str) -> Vec<ElementRef>;

    fn click(&self, el: &ElementRef) -> Result<()>;

    fn scroll_into_view(&self, el: &ElementRef) -> Result<()>;

    /// Visible text of the element and its descendants.
    fn read_text(&self, el: &ElementRef) -> Result<String>;

    fn read_attribute(&self, el: &ElementRef, name: &str) -> Option<String>;

    fn is_visible(&self, el: &ElementRef) -> bool;

    /// Escape keypress against the page, used to dismiss stuck overlays.
    fn send_cancel_key(&self) -> Result<()>;

    /// Click the page background, the close fallback of last resort.
    fn click_background(&self) -> Result<()>;
}
