use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Renders an undirected link as `"min - max"` under lexicographic order.
pub fn canonical_key(a: &str, b: &str) -> String {
    let (first, second) = if b < a { (b, a) } else { (a, b) };
    format!("{} - {}", first, second)
}

/// Link category, read from the first letter of the canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkCategory {
    Home,
    Neighborhood,
    Lateral,
    Feeder,
    Other,
}

impl LinkCategory {
    pub fn of(key: &str) -> Self {
        match key.chars().next() {
            Some('H') => Self::Home,
            Some('N') => Self::Neighborhood,
            Some('L') => Self::Lateral,
            Some('F') => Self::Feeder,
            _ => Self::Other,
        }
    }

    pub fn prefix(&self) -> char {
        match self {
            Self::Home => 'H',
            Self::Neighborhood => 'N',
            Self::Lateral => 'L',
            Self::Feeder => 'F',
            Self::Other => '?',
        }
    }

    /// Category used for agents at a given depth of a hierarchy.
    pub fn for_level(level: usize) -> Self {
        match level {
            0 => Self::Home,
            1 => Self::Neighborhood,
            2 => Self::Lateral,
            _ => Self::Feeder,
        }
    }
}

/// Deduplicated set of established links for one simulation run.
#[derive(Debug, Default)]
pub struct ConnectionGraph {
    links: RwLock<BTreeSet<String>>,
    expected: AtomicUsize,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the link between `a` and `b`. Returns false if it was already known.
    pub fn insert(&self, a: &str, b: &str) -> bool {
        let key = canonical_key(a, b);
        let inserted = self.links.write().insert(key.clone());
        if inserted {
            info!("UPDATE: connection established: {}", key);
        } else {
            debug!("Connection {} already recorded", key);
        }
        inserted
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.contains_key(&canonical_key(a, b))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.links.read().contains(key)
    }

    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }

    /// Sorted copy of every key.
    pub fn keys(&self) -> Vec<String> {
        self.links.read().iter().cloned().collect()
    }

    pub fn count(&self, category: LinkCategory) -> usize {
        self.links
            .read()
            .iter()
            .filter(|key| LinkCategory::of(key) == category)
            .count()
    }

    pub fn set_expected(&self, expected: usize) {
        self.expected.store(expected, Ordering::Release);
    }

    pub fn expected(&self) -> usize {
        self.expected.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        let expected = self.expected();
        expected > 0 && self.len() >= expected
    }

    pub fn summary(&self) -> String {
        let links = self.links.read();
        let num = links.len();
        let expected = self.expected();
        let mut counts = [0usize; 4];
        for key in links.iter() {
            match LinkCategory::of(key) {
                LinkCategory::Home => counts[0] += 1,
                LinkCategory::Neighborhood => counts[1] += 1,
                LinkCategory::Lateral => counts[2] += 1,
                LinkCategory::Feeder => counts[3] += 1,
                LinkCategory::Other => {}
            }
        }

        format!(
            "{} of {} connections established. Missing {}. H/N/L/F={}-{}-{}-{}",
            num,
            expected,
            expected.saturating_sub(num),
            counts[0],
            counts[1],
            counts[2],
            counts[3]
        )
    }
}
