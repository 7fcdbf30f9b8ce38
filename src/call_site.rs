//! Call-site identity and periodic classification
//!
//! Call sites are discovered at runtime, so identity is interned: the
//! registry hands out a small `Copy` id per `scope::name` pair and keeps the
//! name for reporting. Whether a site is a periodic tick (and may therefore
//! root a burst) is decided once, at intern time, from configurable name
//! patterns.

use anyhow::{Context, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fnv::FnvBuildHasher;
use regex::RegexSet;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Name patterns that mark a call site as a periodic tick
pub const DEFAULT_PERIODIC_PATTERNS: &[&str] =
    &["(?i)(daily|hourly|weekly|monthly|quarterly|yearly)"];

/// Opaque, stable identifier of an instrumented call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId {
    index: u32,
    periodic: bool,
}

impl CallSiteId {
    /// Whether this site belongs to the periodic tick family
    #[inline]
    pub fn is_periodic(self) -> bool {
        self.periodic
    }

    /// Dense index, unique within the owning registry
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl Serialize for CallSiteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.index)
    }
}

/// Classifies call-site names into the periodic family
#[derive(Debug, Clone)]
pub struct PeriodicClassifier {
    patterns: RegexSet,
}

impl PeriodicClassifier {
    /// Compile a classifier from regex patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns =
            RegexSet::new(patterns).context("Failed to compile periodic call-site patterns")?;
        Ok(Self { patterns })
    }

    /// Classifier that never matches
    pub fn none() -> Self {
        Self {
            patterns: RegexSet::empty(),
        }
    }

    pub fn is_periodic(&self, qualified_name: &str) -> bool {
        self.patterns.is_match(qualified_name)
    }
}

impl Default for PeriodicClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PERIODIC_PATTERNS).unwrap_or_else(|_| Self::none())
    }
}

/// Interns `scope::name` pairs into [`CallSiteId`]s
#[derive(Debug)]
pub struct CallSiteRegistry {
    by_name: DashMap<Arc<str>, CallSiteId, FnvBuildHasher>,
    names: RwLock<Vec<Arc<str>>>,
    classifier: PeriodicClassifier,
}

impl CallSiteRegistry {
    pub fn new(classifier: PeriodicClassifier) -> Self {
        Self {
            by_name: DashMap::with_hasher(FnvBuildHasher::default()),
            names: RwLock::new(Vec::new()),
            classifier,
        }
    }

    /// Get or create the id for `scope::name`
    ///
    /// # Example
    ///
    /// ```
    /// use regulador::call_site::CallSiteRegistry;
    ///
    /// let registry = CallSiteRegistry::default();
    /// let tick = registry.intern("Economy", "daily_tick");
    /// assert!(tick.is_periodic());
    /// assert_eq!(registry.intern("Economy", "daily_tick"), tick);
    /// assert_eq!(registry.name(tick).as_deref(), Some("Economy::daily_tick"));
    /// ```
    pub fn intern(&self, scope: &str, name: &str) -> CallSiteId {
        let qualified = qualify(scope, name);
        if let Some(id) = self.by_name.get(qualified.as_str()) {
            return *id;
        }

        match self.by_name.entry(Arc::from(qualified)) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
                let id = CallSiteId {
                    index: names.len() as u32,
                    periodic: self.classifier.is_periodic(&key),
                };
                names.push(key);
                entry.insert(id);
                id
            }
        }
    }

    /// Look up an already interned site
    pub fn lookup(&self, scope: &str, name: &str) -> Option<CallSiteId> {
        self.by_name
            .get(qualify(scope, name).as_str())
            .map(|id| *id)
    }

    /// Qualified name of a site, for reports
    pub fn name(&self, id: CallSiteId) -> Option<Arc<str>> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.index as usize)
            .cloned()
    }

    /// Name for display, falling back to the raw id
    pub fn display_name(&self, id: CallSiteId) -> String {
        self.name(id)
            .map(|n| n.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallSiteRegistry {
    fn default() -> Self {
        Self::new(PeriodicClassifier::default())
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}::{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_is_idempotent() {
        let registry = CallSiteRegistry::default();
        let a = registry.intern("World", "update");
        let b = registry.intern("World", "update");
        let c = registry.intern("World", "render");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_periodic_classification() {
        let registry = CallSiteRegistry::default();
        assert!(registry.intern("Economy", "on_daily_tick").is_periodic());
        assert!(registry.intern("Calendar", "HourlyTick").is_periodic());
        assert!(registry.intern("Campaign", "weekly_update").is_periodic());
        assert!(!registry.intern("Market", "update_prices").is_periodic());
    }

    #[test]
    fn test_custom_classifier() {
        let classifier = PeriodicClassifier::new(["^Sim::step$"]).unwrap();
        let registry = CallSiteRegistry::new(classifier);
        assert!(registry.intern("Sim", "step").is_periodic());
        assert!(!registry.intern("Economy", "daily_tick").is_periodic());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(PeriodicClassifier::new(["(unclosed"]).is_err());
    }

    #[test]
    fn test_lookup_and_names() {
        let registry = CallSiteRegistry::default();
        assert!(registry.lookup("A", "b").is_none());
        let id = registry.intern("A", "b");
        assert_eq!(registry.lookup("A", "b"), Some(id));
        assert_eq!(registry.display_name(id), "A::b");
        assert_eq!(registry.intern("", "free_fn").index(), 1);
        assert_eq!(registry.display_name(registry.intern("", "free_fn")), "free_fn");
    }

    #[test]
    fn test_concurrent_intern_yields_one_id() {
        let registry = Arc::new(CallSiteRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.intern("Shared", "site"))
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }
}
