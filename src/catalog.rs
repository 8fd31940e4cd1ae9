//! Message-type keyed catalogs with wildcard fallback.
//!
//! Every configuration kind in the pipeline (transformations, filters and
//! conversions) is looked up the same way: an exact entry for the message
//! type wins, otherwise the entry registered for `XXX_*`, where `XXX` is the
//! message group. Catalogs are built once, validated at build time and then
//! only read; [`CatalogHandle`] swaps a whole new set in atomically.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Message type a catalog entry applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageTypePattern {
    /// A concrete type such as `ADT_A01`
    Exact(String),
    /// Every type of a message group; holds the group, e.g. `ADT` for `ADT_*`
    Wildcard(String),
}

impl MessageTypePattern {
    /// Parse `ADT_A01` or `ADT_*`.
    ///
    /// # Example
    ///
    /// ```
    /// use hl7_transform::MessageTypePattern;
    ///
    /// let pattern = MessageTypePattern::parse("ORU_*").unwrap();
    /// assert!(pattern.matches("ORU_R01"));
    /// assert!(!pattern.matches("ORM_O01"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, CatalogError> {
        let invalid = || CatalogError::InvalidPattern(pattern.to_string());
        let pattern = pattern.trim();

        if let Some(group) = pattern.strip_suffix("_*") {
            return if is_group_code(group) {
                Ok(MessageTypePattern::Wildcard(group.to_string()))
            } else {
                Err(invalid())
            };
        }

        let valid = !pattern.is_empty()
            && pattern
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(MessageTypePattern::Exact(pattern.to_string()))
        } else {
            Err(invalid())
        }
    }

    pub fn matches(&self, message_type: &str) -> bool {
        match self {
            MessageTypePattern::Exact(exact) => exact == message_type,
            MessageTypePattern::Wildcard(group) => message_group(message_type) == Some(group.as_str()),
        }
    }
}

fn is_group_code(group: &str) -> bool {
    group.len() == 3
        && group
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Message group of a type: its first three characters.
pub fn message_group(message_type: &str) -> Option<&str> {
    message_type.get(..3).filter(|group| is_group_code(group))
}

impl fmt::Display for MessageTypePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageTypePattern::Exact(exact) => write!(f, "{exact}"),
            MessageTypePattern::Wildcard(group) => write!(f, "{group}_*"),
        }
    }
}

impl FromStr for MessageTypePattern {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MessageTypePattern {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MessageTypePattern> for String {
    fn from(pattern: MessageTypePattern) -> Self {
        pattern.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid message type pattern '{0}': expected a type like ADT_A01 or a group wildcard like ADT_*")]
    InvalidPattern(String),

    #[error("'{duplicate}' and '{existing}' are both registered for {pattern} ({key})")]
    Ambiguous {
        pattern: String,
        key: String,
        existing: String,
        duplicate: String,
    },
}

/// How an entry was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Exact,
    Wildcard,
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct Resolved<T: ?Sized> {
    pub name: String,
    pub matched: Match,
    pub value: Arc<T>,
}

#[derive(Debug)]
struct Entry<T: ?Sized> {
    name: String,
    value: Arc<T>,
}

/// Immutable lookup table from `(message type, key)` to an entry.
///
/// `K` distinguishes entries that share a message type, such as the
/// direction of a transformation or the phase of a filter.
#[derive(Debug)]
pub struct Catalog<K, T: ?Sized> {
    exact: HashMap<(String, K), Entry<T>>,
    wildcard: HashMap<(String, K), Entry<T>>,
}

impl<K, T: ?Sized> Default for Catalog<K, T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard: HashMap::new(),
        }
    }
}

impl<K, T> Catalog<K, T>
where
    K: Copy + Eq + Hash + fmt::Debug,
    T: ?Sized,
{
    pub fn builder() -> CatalogBuilder<K, T> {
        CatalogBuilder {
            catalog: Catalog::default(),
        }
    }

    /// Entry for `message_type`: the exact one, else the group wildcard.
    pub fn resolve(&self, message_type: &str, key: K) -> Option<Arc<T>> {
        self.resolve_entry(message_type, key).map(|resolved| resolved.value)
    }

    pub fn resolve_entry(&self, message_type: &str, key: K) -> Option<Resolved<T>> {
        if let Some(entry) = self.exact.get(&(message_type.to_string(), key)) {
            return Some(Resolved {
                name: entry.name.clone(),
                matched: Match::Exact,
                value: Arc::clone(&entry.value),
            });
        }

        let group = message_group(message_type)?;
        self.wildcard
            .get(&(group.to_string(), key))
            .map(|entry| Resolved {
                name: entry.name.clone(),
                matched: Match::Wildcard,
                value: Arc::clone(&entry.value),
            })
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered `(pattern, key, entry name)` triples, sorted for display.
    pub fn entries(&self) -> Vec<(MessageTypePattern, K, &str)> {
        let exact = self.exact.iter().map(|((message_type, key), entry)| {
            (MessageTypePattern::Exact(message_type.clone()), *key, entry.name.as_str())
        });
        let wildcard = self.wildcard.iter().map(|((group, key), entry)| {
            (MessageTypePattern::Wildcard(group.clone()), *key, entry.name.as_str())
        });

        let mut entries: Vec<_> = exact.chain(wildcard).collect();
        entries.sort_by_key(|(pattern, key, _)| (pattern.to_string(), format!("{key:?}")));
        entries
    }
}

/// Collects entries and rejects duplicates as they are registered.
#[derive(Debug)]
pub struct CatalogBuilder<K, T: ?Sized> {
    catalog: Catalog<K, T>,
}

impl<K, T> CatalogBuilder<K, T>
where
    K: Copy + Eq + Hash + fmt::Debug,
    T: ?Sized,
{
    /// Register `value` under every pattern for `key`.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Ambiguous`] when a pattern already has an entry for
    /// `key`; the builder is left unchanged for that pattern.
    pub fn register(
        &mut self,
        patterns: &[MessageTypePattern],
        key: K,
        name: impl Into<String>,
        value: Arc<T>,
    ) -> Result<&mut Self, CatalogError> {
        let name = name.into();

        for pattern in patterns {
            let (table, id) = match pattern {
                MessageTypePattern::Exact(exact) => (&mut self.catalog.exact, exact),
                MessageTypePattern::Wildcard(group) => (&mut self.catalog.wildcard, group),
            };

            if let Some(existing) = table.get(&(id.clone(), key)) {
                return Err(CatalogError::Ambiguous {
                    pattern: pattern.to_string(),
                    key: format!("{key:?}"),
                    existing: existing.name.clone(),
                    duplicate: name,
                });
            }

            table.insert(
                (id.clone(), key),
                Entry {
                    name: name.clone(),
                    value: Arc::clone(&value),
                },
            );
        }

        Ok(self)
    }

    pub fn build(self) -> Catalog<K, T> {
        self.catalog
    }
}

/// Shared, swappable pointer to the active catalogs.
///
/// Readers take a snapshot with [`current`](Self::current) and keep using it
/// for the whole message, so a concurrent [`publish`](Self::publish) never
/// mixes two catalog generations within one transformation.
#[derive(Debug)]
pub struct CatalogHandle<C> {
    current: RwLock<Arc<C>>,
}

impl<C> CatalogHandle<C> {
    pub fn new(catalogs: C) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalogs)),
        }
    }

    pub fn current(&self) -> Arc<C> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn publish(&self, catalogs: C) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(catalogs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(raw: &[&str]) -> Vec<MessageTypePattern> {
        raw.iter().map(|p| MessageTypePattern::parse(p).unwrap()).collect()
    }

    #[test]
    fn test_pattern_parsing() {
        assert_eq!(
            MessageTypePattern::parse("ADT_A01").unwrap(),
            MessageTypePattern::Exact("ADT_A01".to_string())
        );
        assert_eq!(
            MessageTypePattern::parse("ADT_*").unwrap(),
            MessageTypePattern::Wildcard("ADT".to_string())
        );
        assert_eq!(MessageTypePattern::parse("ACK").unwrap().to_string(), "ACK");

        for bad in ["", "*", "AD_*", "adt_*", "ADT*", "ADT_A*", "ADT A01"] {
            assert!(MessageTypePattern::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let mut builder = Catalog::<(), str>::builder();
        builder
            .register(&patterns(&["ADT_*"]), (), "group", Arc::from("group"))
            .unwrap()
            .register(&patterns(&["ADT_A08"]), (), "exact", Arc::from("exact"))
            .unwrap();
        let catalog = builder.build();

        assert_eq!(catalog.resolve("ADT_A08", ()).as_deref(), Some("exact"));
        assert_eq!(catalog.resolve("ADT_A01", ()).as_deref(), Some("group"));
        assert_eq!(catalog.resolve_entry("ADT_A01", ()).unwrap().matched, Match::Wildcard);
        assert!(catalog.resolve("ORU_R01", ()).is_none());
        assert!(catalog.resolve("AD", ()).is_none());
    }

    #[test]
    fn test_keys_are_independent() {
        let mut builder = Catalog::<u8, u32>::builder();
        builder.register(&patterns(&["ORU_R01"]), 1, "one", Arc::new(1)).unwrap();
        builder.register(&patterns(&["ORU_R01"]), 2, "two", Arc::new(2)).unwrap();
        let catalog = builder.build();

        assert_eq!(catalog.resolve("ORU_R01", 1).as_deref(), Some(&1));
        assert_eq!(catalog.resolve("ORU_R01", 2).as_deref(), Some(&2));
        assert!(catalog.resolve("ORU_R01", 3).is_none());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut builder = Catalog::<(), u32>::builder();
        builder.register(&patterns(&["ADT_A01", "ADT_*"]), (), "first", Arc::new(1)).unwrap();

        let exact = builder.register(&patterns(&["ADT_A01"]), (), "second", Arc::new(2));
        assert!(matches!(exact, Err(CatalogError::Ambiguous { .. })));

        let wildcard = builder.register(&patterns(&["ADT_*"]), (), "third", Arc::new(3));
        let Err(CatalogError::Ambiguous { existing, duplicate, .. }) = wildcard else {
            panic!("expected an ambiguity error");
        };
        assert_eq!(existing, "first");
        assert_eq!(duplicate, "third");
    }

    #[test]
    fn test_handle_publishes_new_generation() {
        let handle = CatalogHandle::new(1);
        let snapshot = handle.current();

        handle.publish(2);

        assert_eq!(*snapshot, 1);
        assert_eq!(*handle.current(), 2);
    }

    #[test]
    fn test_entries_listing() {
        let mut builder = Catalog::<(), u32>::builder();
        builder.register(&patterns(&["ORU_R01", "ADT_*"]), (), "lab", Arc::new(1)).unwrap();
        let catalog = builder.build();

        let listed: Vec<String> = catalog
            .entries()
            .into_iter()
            .map(|(pattern, _, name)| format!("{pattern} {name}"))
            .collect();
        assert_eq!(listed, vec!["ADT_* lab", "ORU_R01 lab"]);
    }
}
