//! In-memory driver for exercising the engine without a browser.
//!
//! Pages are plain HTML documents keyed by name. An `<iframe data-doc="key">`
//! embeds the document `key`, so arbitrarily nested frame trees can be
//! described in a few lines. Locators are CSS selectors, plus the XPath
//! shapes `//tag` and `//tag[@attr='value']`.

use crate::core::{DriverTrait, FrameRef};
use crate::errors::{LocatorError, Result};
use crate::types::ElementSnapshot;
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

const FRAME_SELECTOR: &str = "iframe, frame";
const DOC_ATTRIBUTE: &str = "data-doc";

/// Builder for a [`FixtureDriver`].
#[derive(Debug, Clone)]
pub struct FixturePage {
    documents: HashMap<String, String>,
    windows: Vec<(String, String)>,
    routes: HashMap<String, String>,
}

impl FixturePage {
    /// A page with one window, `w1`, showing the document `top_key`.
    pub fn new(top_key: &str, html: &str) -> Self {
        let mut documents = HashMap::new();
        documents.insert(top_key.to_string(), html.to_string());
        Self {
            documents,
            windows: vec![("w1".to_string(), top_key.to_string())],
            routes: HashMap::new(),
        }
    }

    pub fn document(mut self, key: &str, html: &str) -> Self {
        self.documents.insert(key.to_string(), html.to_string());
        self
    }

    pub fn window(mut self, handle: &str, top_key: &str) -> Self {
        self.windows.push((handle.to_string(), top_key.to_string()));
        self
    }

    /// Make `navigate(url)` load the document `key`.
    pub fn route(mut self, url: &str, key: &str) -> Self {
        self.routes.insert(url.to_string(), key.to_string());
        self
    }

    pub fn into_driver(self) -> FixtureDriver {
        let current = self.windows.first().map(|(handle, _)| handle.clone());
        FixtureDriver {
            documents: self.documents,
            windows: self
                .windows
                .into_iter()
                .map(|(handle, top)| FixtureWindow {
                    handle,
                    url: format!("fixture://{}", top),
                    top,
                })
                .collect(),
            routes: self.routes,
            current,
            stack: Vec::new(),
            vanishing: HashSet::new(),
            broken_parent: false,
            running: true,
            counters: Counters::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct FixtureWindow {
    handle: String,
    top: String,
    url: String,
}

/// Element handle: the document it lives in and its position in that
/// document's element order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureElement {
    pub doc: String,
    pub ordinal: usize,
}

/// Number of driver calls by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// `find_one` and `find_all`
    pub lookups: usize,
    /// `find_frames`
    pub frame_enumerations: usize,
    pub switches: usize,
    pub window_queries: usize,
    pub reads: usize,
}

impl DriverStats {
    pub fn total(&self) -> usize {
        self.lookups + self.frame_enumerations + self.switches + self.window_queries + self.reads
    }
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicUsize,
    frame_enumerations: AtomicUsize,
    switches: AtomicUsize,
    window_queries: AtomicUsize,
    reads: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        for counter in [
            &self.lookups,
            &self.frame_enumerations,
            &self.switches,
            &self.window_queries,
            &self.reads,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub struct FixtureDriver {
    documents: HashMap<String, String>,
    windows: Vec<FixtureWindow>,
    routes: HashMap<String, String>,
    current: Option<String>,
    stack: Vec<String>,
    vanishing: HashSet<String>,
    broken_parent: bool,
    running: bool,
    counters: Counters,
}

impl FixtureDriver {
    pub fn stats(&self) -> DriverStats {
        DriverStats {
            lookups: self.counters.lookups.load(Ordering::SeqCst),
            frame_enumerations: self.counters.frame_enumerations.load(Ordering::SeqCst),
            switches: self.counters.switches.load(Ordering::SeqCst),
            window_queries: self.counters.window_queries.load(Ordering::SeqCst),
            reads: self.counters.reads.load(Ordering::SeqCst),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Document keys of the entered frames, outermost first.
    pub fn active_frame_path(&self) -> Vec<String> {
        self.stack.clone()
    }

    pub fn active_window(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Replace a document's markup, as a page script would.
    pub fn set_document(&mut self, key: &str, html: &str) {
        self.documents.insert(key.to_string(), html.to_string());
    }

    /// Entering any frame that embeds `key` fails as a stale reference.
    pub fn vanish_frame(&mut self, key: &str) {
        self.vanishing.insert(key.to_string());
    }

    /// Make every parent-frame switch fail.
    pub fn break_parent_switch(&mut self) {
        self.broken_parent = true;
    }

    /// Close a window. Closing the selected one leaves the selection dangling.
    pub fn close_window(&mut self, handle: &str) {
        self.windows.retain(|w| w.handle != handle);
    }

    pub fn shut_down(&mut self) {
        self.running = false;
    }

    fn current_window(&self) -> Result<&FixtureWindow> {
        let handle = self
            .current
            .as_deref()
            .ok_or_else(|| LocatorError::WindowLost("no window selected".to_string()))?;
        self.windows
            .iter()
            .find(|w| w.handle == handle)
            .ok_or_else(|| LocatorError::WindowLost(handle.to_string()))
    }

    fn current_doc_key(&self) -> Result<String> {
        let window = self.current_window()?;
        Ok(self.stack.last().cloned().unwrap_or_else(|| window.top.clone()))
    }

    fn parse_doc(&self, key: &str) -> Result<Html> {
        let raw = self
            .documents
            .get(key)
            .ok_or_else(|| LocatorError::FrameVanished(format!("document {} is gone", key)))?;
        Ok(Html::parse_document(raw))
    }

    fn matches(&self, locator: &str) -> Result<Vec<FixtureElement>> {
        let key = self.current_doc_key()?;
        let html = self.parse_doc(&key)?;
        let selector = parse_selector(&locator_to_css(locator)?)?;
        let all = parse_selector("*")?;

        Ok(html
            .select(&selector)
            .filter_map(|el| ordinal_of(&html, &all, el))
            .map(|ordinal| FixtureElement {
                doc: key.clone(),
                ordinal,
            })
            .collect())
    }

    /// Document embedded by a frame element, if the element is a frame.
    fn embedded_doc(el: ElementRef<'_>) -> Option<String> {
        let tag = el.value().name();
        if tag != "iframe" && tag != "frame" {
            return None;
        }
        el.value().attr(DOC_ATTRIBUTE).map(|d| d.to_string())
    }

    fn enter(&mut self, doc: String) -> Result<()> {
        if self.vanishing.contains(&doc) {
            return Err(LocatorError::FrameVanished(format!(
                "frame element for {} is stale",
                doc
            )));
        }
        if !self.documents.contains_key(&doc) {
            return Err(LocatorError::FrameUnreachable(format!(
                "frame document {} is not loaded",
                doc
            )));
        }
        self.stack.push(doc);
        Ok(())
    }
}

#[async_trait]
impl DriverTrait for FixtureDriver {
    type Element = FixtureElement;

    async fn window_handles(&self) -> Result<Vec<String>> {
        Counters::bump(&self.counters.window_queries);
        Ok(self.windows.iter().map(|w| w.handle.clone()).collect())
    }

    async fn current_window_handle(&self) -> Result<String> {
        Counters::bump(&self.counters.window_queries);
        Ok(self.current_window()?.handle.clone())
    }

    async fn switch_to_window(&mut self, handle: &str) -> Result<()> {
        Counters::bump(&self.counters.switches);
        if !self.windows.iter().any(|w| w.handle == handle) {
            return Err(LocatorError::WindowLost(handle.to_string()));
        }
        self.current = Some(handle.to_string());
        self.stack.clear();
        Ok(())
    }

    async fn switch_to_top_level(&mut self) -> Result<()> {
        Counters::bump(&self.counters.switches);
        self.current_window()?;
        self.stack.clear();
        Ok(())
    }

    async fn switch_to_frame(&mut self, frame: FrameRef<'_, Self::Element>) -> Result<()> {
        Counters::bump(&self.counters.switches);
        let key = self.current_doc_key()?;
        let html = self.parse_doc(&key)?;
        let frames = parse_selector(FRAME_SELECTOR)?;

        let target = match frame {
            FrameRef::Named(name) => html
                .select(&frames)
                .find(|el| el.value().id() == Some(name) || el.value().attr("name") == Some(name))
                .and_then(Self::embedded_doc)
                .ok_or_else(|| LocatorError::FrameUnreachable(format!("no such frame: {}", name)))?,
            FrameRef::Element(element) => {
                if element.doc != key {
                    return Err(LocatorError::FrameVanished(
                        "frame element belongs to another document".to_string(),
                    ));
                }
                let all = parse_selector("*")?;
                html.select(&all)
                    .nth(element.ordinal)
                    .and_then(Self::embedded_doc)
                    .ok_or_else(|| {
                        LocatorError::FrameVanished("frame element is stale".to_string())
                    })?
            }
        };

        self.enter(target)
    }

    async fn switch_to_parent_frame(&mut self) -> Result<()> {
        Counters::bump(&self.counters.switches);
        if self.broken_parent {
            return Err(LocatorError::Driver("parent frame switch failed".to_string()));
        }
        if self.stack.pop().is_none() {
            return Err(LocatorError::Driver("no parent frame".to_string()));
        }
        Ok(())
    }

    async fn find_one(&self, locator: &str) -> Result<Option<Self::Element>> {
        Counters::bump(&self.counters.lookups);
        Ok(self.matches(locator)?.into_iter().next())
    }

    async fn find_all(&self, locator: &str) -> Result<Vec<Self::Element>> {
        Counters::bump(&self.counters.lookups);
        self.matches(locator)
    }

    async fn find_frames(&self) -> Result<Vec<Self::Element>> {
        Counters::bump(&self.counters.frame_enumerations);
        let key = self.current_doc_key()?;
        let html = self.parse_doc(&key)?;
        let frames = parse_selector(FRAME_SELECTOR)?;
        let all = parse_selector("*")?;

        Ok(html
            .select(&frames)
            .filter_map(|el| ordinal_of(&html, &all, el))
            .map(|ordinal| FixtureElement {
                doc: key.clone(),
                ordinal,
            })
            .collect())
    }

    async fn read_element(&self, element: &Self::Element) -> Result<ElementSnapshot> {
        Counters::bump(&self.counters.reads);
        let html = self.parse_doc(&element.doc)?;
        let all = parse_selector("*")?;
        let el = html
            .select(&all)
            .nth(element.ordinal)
            .ok_or_else(|| LocatorError::FrameVanished("element is stale".to_string()))?;

        Ok(ElementSnapshot {
            tag_name: el.value().name().to_string(),
            text: el.text().collect::<String>().trim().to_string(),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let handle = self.current_window()?.handle.clone();
        let key = match self.routes.get(url) {
            Some(key) => key.clone(),
            None => {
                let key = format!("blank:{}", url);
                self.documents.insert(key.clone(), "<html><body></body></html>".to_string());
                key
            }
        };
        if let Some(window) = self.windows.iter_mut().find(|w| w.handle == handle) {
            window.top = key;
            window.url = url.to_string();
        }
        self.stack.clear();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.current_window()?.url.clone())
    }

    async fn title(&self) -> Result<String> {
        let top = self.current_window()?.top.clone();
        let html = self.parse_doc(&top)?;
        let title = parse_selector("title")?;
        Ok(html
            .select(&title)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_default())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn close(&mut self) -> Result<()> {
        self.running = false;
        self.windows.clear();
        self.current = None;
        Ok(())
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| LocatorError::InvalidLocator(format!("{}: {:?}", css, e)))
}

fn ordinal_of(html: &Html, all: &Selector, target: ElementRef<'_>) -> Option<usize> {
    html.select(all).position(|el| el.id() == target.id())
}

fn xpath_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"^//([A-Za-z][\w-]*|\*)(?:\[@([\w-]+)=['"]([^'"]*)['"]\])?$"#).ok()
        })
        .as_ref()
        .ok_or_else(|| LocatorError::InvalidLocator("xpath pattern unavailable".to_string()))
}

/// Translate the supported XPath shapes to CSS; anything else is taken as CSS.
pub fn locator_to_css(locator: &str) -> Result<String> {
    let locator = locator.trim();
    if !locator.starts_with('/') {
        return Ok(locator.to_string());
    }

    let caps = xpath_pattern()?.captures(locator).ok_or_else(|| {
        LocatorError::InvalidLocator(format!("unsupported fixture xpath: {}", locator))
    })?;
    let tag = &caps[1];
    Ok(match (caps.get(2), caps.get(3)) {
        (Some(attr), Some(value)) => format!("{}[{}=\"{}\"]", tag, attr.as_str(), value.as_str()),
        _ => tag.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_translation() {
        assert_eq!(locator_to_css("//ok").unwrap(), "ok");
        assert_eq!(
            locator_to_css("//button[@id='buy']").unwrap(),
            "button[id=\"buy\"]"
        );
        assert_eq!(locator_to_css("#seat .free").unwrap(), "#seat .free");
        assert!(locator_to_css("//div/span[2]").is_err());
    }

    #[tokio::test]
    async fn test_find_in_entered_frame_only() {
        let mut driver = FixturePage::new("top", r#"<iframe id="f1" data-doc="f1"></iframe>"#)
            .document("f1", "<ok>hello</ok>")
            .into_driver();

        assert!(driver.find_one("//ok").await.unwrap().is_none());
        driver.switch_to_frame(FrameRef::Named("f1")).await.unwrap();
        let el = driver.find_one("//ok").await.unwrap().unwrap();
        let snapshot = driver.read_element(&el).await.unwrap();
        assert_eq!(snapshot.tag_name, "ok");
        assert_eq!(snapshot.text, "hello");
        assert_eq!(driver.stats().lookups, 2);
    }

    #[tokio::test]
    async fn test_parent_switch_at_top_fails() {
        let mut driver = FixturePage::new("top", "<p></p>").into_driver();
        assert!(driver.switch_to_parent_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_window_reports_window_lost() {
        let mut driver = FixturePage::new("top", "<p></p>").into_driver();
        driver.close_window("w1");
        let err = driver.current_window_handle().await.unwrap_err();
        assert!(matches!(err, LocatorError::WindowLost(_)));
    }
}
