use crate::core::{DriverConfig, DriverTrait, FrameRef};
use crate::errors::{LocatorError, Result};
use crate::types::ElementSnapshot;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const FRAME_SELECTOR: &str = "iframe, frame";

/// Helpers shared by every injected script. Frames are entered through
/// `contentDocument`, so only same-origin frames are reachable.
const PRELUDE: &str = r#"
function __frameError(m) { var e = new Error(m); e.name = 'FrameError'; return e; }
function __enter(doc, idx) {
  var f = doc.querySelectorAll('iframe, frame')[idx];
  if (!f) throw __frameError('frame not found');
  var d = null;
  try { d = f.contentDocument; } catch (e) {}
  if (!d) throw __frameError('cannot access frame document');
  return d;
}
function __find(doc, loc) {
  var c = loc.charAt(0);
  if (c === '/' || c === '(') {
    var r = doc.evaluate(loc, doc, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    var out = [];
    for (var i = 0; i < r.snapshotLength; i++) {
      var n = r.snapshotItem(i);
      if (n.nodeType === 1) out.push(n);
    }
    return out;
  }
  return Array.prototype.slice.call(doc.querySelectorAll(loc));
}
"#;

/// Element handle: the frame stack it was found in, the locator and its
/// position among the matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromeElement {
    frames: Vec<usize>,
    locator: String,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    ok: Option<Value>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ElementReply {
    tag: String,
    text: String,
    attributes: std::collections::HashMap<String, String>,
}

/// Chrome over the DevTools protocol. Windows are tabs, identified by
/// target id; the selected frame is a stack of frame indices replayed in
/// every injected script.
pub struct ChromeDriver {
    browser: Option<Browser>,
    current: Option<Arc<Tab>>,
    frame_stack: Vec<usize>,
    timeout: Duration,
}

impl ChromeDriver {
    pub async fn launch(config: &DriverConfig) -> Result<Self> {
        let args = launch_args(config);
        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args.iter().map(OsStr::new).collect())
            .build()
            .map_err(|e| LocatorError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| LocatorError::LaunchFailed(e.to_string()))?;

        let timeout = Duration::from_millis(config.timeout_ms);
        let tab = browser
            .new_tab()
            .map_err(|e| LocatorError::LaunchFailed(e.to_string()))?;
        tab.set_default_timeout(timeout);

        info!("Chrome launched (headless: {})", config.headless);
        Ok(Self {
            browser: Some(browser),
            current: Some(tab),
            frame_stack: Vec::new(),
            timeout,
        })
    }

    fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| LocatorError::Disconnected("browser is not running".to_string()))
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser()?
            .get_tabs()
            .lock()
            .map_err(|e| LocatorError::Driver(format!("tab list unavailable: {}", e)))?;
        Ok(tabs.clone())
    }

    fn tab(&self) -> Result<Arc<Tab>> {
        self.current
            .clone()
            .ok_or_else(|| LocatorError::WindowLost("no window selected".to_string()))
    }

    /// Run `body` inside the document reached through `frames`.
    fn eval(&self, frames: &[usize], body: &str) -> Result<Value> {
        let tab = self.tab()?;
        let remote = tab
            .evaluate(&build_script(frames, body), false)
            .map_err(|e| LocatorError::JavaScriptFailed(e.to_string()))?;

        let raw = remote
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| LocatorError::JavaScriptFailed("script returned no result".to_string()))?
            .to_string();

        let reply: ScriptReply = serde_json::from_str(&raw)?;
        match reply.error.as_deref() {
            None => Ok(reply.ok.unwrap_or(Value::Null)),
            Some(kind) => {
                let message = reply.message.unwrap_or_default();
                Err(match kind {
                    "FrameError" => LocatorError::FrameVanished(message),
                    "SyntaxError" => LocatorError::InvalidLocator(message),
                    _ => LocatorError::JavaScriptFailed(format!("{}: {}", kind, message)),
                })
            }
        }
    }

    fn count(&self, locator: &str) -> Result<usize> {
        let body = format!("return __find(__doc, {}).length;", js_string(locator)?);
        let value = self.eval(&self.frame_stack, &body)?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    fn handles(&self, locator: &str, count: usize) -> Vec<ChromeElement> {
        (0..count)
            .map(|index| ChromeElement {
                frames: self.frame_stack.clone(),
                locator: locator.to_string(),
                index,
            })
            .collect()
    }

    fn enter(&mut self, body: String) -> Result<()> {
        let value = self.eval(&self.frame_stack, &body)?;
        match value.as_i64() {
            Some(index) if index >= 0 => {
                self.frame_stack.push(index as usize);
                Ok(())
            }
            _ => Err(LocatorError::FrameUnreachable("no such frame".to_string())),
        }
    }
}

#[async_trait]
impl DriverTrait for ChromeDriver {
    type Element = ChromeElement;

    async fn window_handles(&self) -> Result<Vec<String>> {
        Ok(self
            .tabs()?
            .iter()
            .map(|t| t.get_target_id().to_string())
            .collect())
    }

    async fn current_window_handle(&self) -> Result<String> {
        let current = self.tab()?;
        let id = current.get_target_id().to_string();
        if self.tabs()?.iter().any(|t| *t.get_target_id() == id) {
            Ok(id)
        } else {
            Err(LocatorError::WindowLost(id))
        }
    }

    async fn switch_to_window(&mut self, handle: &str) -> Result<()> {
        let tab = self
            .tabs()?
            .into_iter()
            .find(|t| t.get_target_id() == handle)
            .ok_or_else(|| LocatorError::WindowLost(handle.to_string()))?;
        tab.activate()
            .map_err(|e| LocatorError::Driver(e.to_string()))?;
        tab.set_default_timeout(self.timeout);
        self.current = Some(tab);
        self.frame_stack.clear();
        Ok(())
    }

    async fn switch_to_top_level(&mut self) -> Result<()> {
        self.tab()?;
        self.frame_stack.clear();
        Ok(())
    }

    async fn switch_to_frame(&mut self, frame: FrameRef<'_, Self::Element>) -> Result<()> {
        let body = match frame {
            FrameRef::Named(name) => {
                let name = js_string(name)?;
                format!(
                    "var list = __doc.querySelectorAll('{sel}');\
                     for (var i = 0; i < list.length; i++) {{\
                       if (list[i].id === {name} || list[i].getAttribute('name') === {name}) {{\
                         __enter(__doc, i); return i;\
                       }}\
                     }}\
                     return -1;",
                    sel = FRAME_SELECTOR,
                    name = name
                )
            }
            FrameRef::Element(element) => {
                if element.frames != self.frame_stack {
                    return Err(LocatorError::FrameVanished(
                        "frame element belongs to another document".to_string(),
                    ));
                }
                format!(
                    "var el = __find(__doc, {loc})[{idx}];\
                     if (!el) throw __frameError('frame element is stale');\
                     var i = Array.prototype.indexOf.call(__doc.querySelectorAll('{sel}'), el);\
                     if (i < 0) return -1;\
                     __enter(__doc, i); return i;",
                    loc = js_string(&element.locator)?,
                    idx = element.index,
                    sel = FRAME_SELECTOR
                )
            }
        };
        self.enter(body)
    }

    async fn switch_to_parent_frame(&mut self) -> Result<()> {
        self.frame_stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| LocatorError::Driver("no parent frame".to_string()))
    }

    async fn find_one(&self, locator: &str) -> Result<Option<Self::Element>> {
        let count = self.count(locator)?;
        Ok(self.handles(locator, count.min(1)).into_iter().next())
    }

    async fn find_all(&self, locator: &str) -> Result<Vec<Self::Element>> {
        let count = self.count(locator)?;
        Ok(self.handles(locator, count))
    }

    async fn find_frames(&self) -> Result<Vec<Self::Element>> {
        let count = self.count(FRAME_SELECTOR)?;
        Ok(self.handles(FRAME_SELECTOR, count))
    }

    async fn read_element(&self, element: &Self::Element) -> Result<ElementSnapshot> {
        let body = format!(
            "var el = __find(__doc, {loc})[{idx}];\
             if (!el) throw __frameError('element is stale');\
             var attrs = {{}};\
             for (var i = 0; i < el.attributes.length; i++) {{\
               attrs[el.attributes[i].name] = el.attributes[i].value;\
             }}\
             return {{ tag: el.tagName.toLowerCase(),\
                       text: (el.innerText || el.textContent || '').trim(),\
                       attributes: attrs }};",
            loc = js_string(&element.locator)?,
            idx = element.index
        );
        let value = self.eval(&element.frames, &body)?;
        let reply: ElementReply = serde_json::from_value(value)?;
        Ok(ElementSnapshot {
            tag_name: reply.tag,
            text: reply.text,
            attributes: reply.attributes,
        })
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .map_err(|e| LocatorError::NavigationFailed(e.to_string()))?;

        tab.wait_until_navigated()
            .map_err(|e| LocatorError::NavigationFailed(e.to_string()))?;

        self.frame_stack.clear();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.tab()?.get_url())
    }

    async fn title(&self) -> Result<String> {
        let result = self.eval(&[], "return document.title;")?;
        Ok(result.as_str().unwrap_or("").to_string())
    }

    fn is_running(&self) -> bool {
        self.browser.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing Chrome");
        self.current = None;
        self.frame_stack.clear();
        self.browser = None;
        Ok(())
    }
}

/// Chrome switches for `config`; custom `args` come last so they can
/// override the defaults.
fn launch_args(config: &DriverConfig) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];
    args.extend(config.user_agent.iter().map(|ua| format!("--user-agent={}", ua)));
    if config.disable_images {
        args.push("--blink-settings=imagesEnabled=false".to_string());
    }
    args.extend(config.args.iter().cloned());
    args
}

fn js_string(raw: &str) -> Result<String> {
    Ok(serde_json::to_string(raw)?)
}

/// Wrap `body` so it runs against `__doc`, the document at `frames`, and
/// returns `{ok}` or `{error, message}` as a JSON string.
fn build_script(frames: &[usize], body: &str) -> String {
    let mut js = String::from("(function(){");
    js.push_str(PRELUDE);
    js.push_str("try{var __doc=document;");
    for index in frames {
        js.push_str(&format!("__doc=__enter(__doc,{});", index));
    }
    js.push_str("return JSON.stringify({ok:(function(){");
    js.push_str(body);
    js.push_str(
        "})()});}catch(e){return JSON.stringify({error:e.name,message:String(e.message)});}})()",
    );
    js
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_replays_frame_stack() {
        let js = build_script(&[2, 0], "return 1;");
        let first = js.find("__doc=__enter(__doc,2);").unwrap();
        let second = js.find("__doc=__enter(__doc,0);").unwrap();
        assert!(first < second);
        assert!(js.ends_with("})()"));
    }

    #[test]
    fn test_top_level_script_has_no_frame_hops() {
        let js = build_script(&[], "return 1;");
        assert!(!js.contains("__doc=__enter("));
    }

    #[test]
    fn test_launch_args_follow_config() {
        let config = DriverConfig {
            user_agent: Some("locator-bot".to_string()),
            disable_images: true,
            args: vec!["--lang=ko".to_string()],
            ..DriverConfig::default()
        };
        let args = launch_args(&config);
        assert!(args.contains(&"--window-size=1280,720".to_string()));
        assert!(args.contains(&"--user-agent=locator-bot".to_string()));
        assert!(args.contains(&"--blink-settings=imagesEnabled=false".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--lang=ko"));
    }

    #[test]
    fn test_locators_are_quoted_for_js() {
        assert_eq!(
            js_string("//a[@id='x\"y']").unwrap(),
            r#""//a[@id='x\"y']""#
        );
    }
}
