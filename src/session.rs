use crate::frames::FramePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Lookup memo for one logical batch of resolutions.
///
/// Created by `LocatorEngine::begin_session`, passed by `&mut` into every
/// lookup of the batch and consumed by `LocatorEngine::end_session`. A
/// session is tied to the page generation it was last used on; when the
/// browser navigates, the next lookup finds the generation changed and drops
/// all hints and misses.
#[derive(Debug)]
pub struct ValidationSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    epoch: u64,
    hints: HashMap<String, FramePath>,
    misses: HashSet<String>,
    frames_seen: Vec<FramePath>,
    lookups: usize,
}

impl ValidationSession {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            epoch,
            hints: HashMap::new(),
            misses: HashSet::new(),
            frames_seen: vec![FramePath::main()],
            lookups: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn hint(&self, locator: &str) -> Option<&FramePath> {
        self.hints.get(locator)
    }

    pub fn hints(&self) -> &HashMap<String, FramePath> {
        &self.hints
    }

    pub fn is_miss(&self, locator: &str) -> bool {
        self.misses.contains(locator)
    }

    /// Advisory: frames that produced a hit, `main` first.
    pub fn frames_seen(&self) -> &[FramePath] {
        &self.frames_seen
    }

    pub fn lookups(&self) -> usize {
        self.lookups
    }

    /// Drop everything learned on an older page generation.
    pub(crate) fn sync_epoch(&mut self, epoch: u64) -> bool {
        if self.epoch == epoch {
            return false;
        }
        self.epoch = epoch;
        self.hints.clear();
        self.misses.clear();
        self.frames_seen = vec![FramePath::main()];
        true
    }

    pub(crate) fn record_lookup(&mut self) {
        self.lookups += 1;
    }

    pub(crate) fn record_hit(&mut self, locator: &str, path: &FramePath) {
        self.misses.remove(locator);
        self.hints.insert(locator.to_string(), path.clone());
        if !self.frames_seen.contains(path) {
            self.frames_seen.push(path.clone());
        }
    }

    pub(crate) fn record_miss(&mut self, locator: &str) {
        self.misses.insert(locator.to_string());
    }

    pub(crate) fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            started_at: self.started_at,
            ended_at: Utc::now(),
            lookups: self.lookups,
            hints: self.hints.len(),
            misses: self.misses.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub lookups: usize,
    pub hints: usize,
    pub misses: usize,
}

/// Count of sessions opened and closed over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLedger {
    pub begun: usize,
    pub ended: usize,
}

impl SessionLedger {
    pub fn open(&self) -> usize {
        self.begun.saturating_sub(self.ended)
    }
}
