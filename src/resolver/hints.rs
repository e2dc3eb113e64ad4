use crate::frames::FramePath;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Locator → frame hints for lookups made without a session. Entries expire
/// after `ttl` and are evicted when read.
#[derive(Debug)]
pub struct HintCache {
    ttl: Duration,
    entries: HashMap<String, (FramePath, Instant)>,
}

impl HintCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, locator: &str) -> Option<FramePath> {
        let (path, recorded_at) = self.entries.get(locator)?;
        if recorded_at.elapsed() > self.ttl {
            self.entries.remove(locator);
            return None;
        }
        Some(path.clone())
    }

    pub fn set(&mut self, locator: &str, path: &FramePath) {
        if locator.is_empty() {
            return;
        }
        self.entries
            .insert(locator.to_string(), (path.clone(), Instant::now()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
