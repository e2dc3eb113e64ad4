use crate::frames::FramePath;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Properties read from a live element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag_name: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
}

impl ElementSnapshot {
    /// Attribute value, treating an empty string as absent.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: String,
    pub title: String,
    pub url: String,
    pub current: bool,
}

/// Outcome of `LocatorEngine::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub found: bool,
    pub count: usize,
    pub tag: Option<String>,
    pub text: Option<String>,
    pub frame_path: Option<FramePath>,
    pub message: String,
}

impl Validation {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            found: false,
            count: 0,
            tag: None,
            text: None,
            frame_path: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDetails {
    pub tag: String,
    pub id: String,
    pub name: String,
    pub class: String,
    pub text: String,
    pub attributes: HashMap<String, String>,
    pub count: usize,
}

/// A named locator, as stored in a saved configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorItem {
    pub name: String,
    pub locator: String,
}

impl LocatorItem {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
