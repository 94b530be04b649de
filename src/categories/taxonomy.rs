//! Three-level category taxonomy for nerforge.
//!
//! A hierarchy is loaded once from a JSON file of the form
//!
//! ```json
//! {
//!   "first-level": "location, person",
//!   "second-level": {"location": "city, country"},
//!   "third-level": {"city": "capital, port city"}
//! }
//! ```
//!
//! and is immutable afterwards. Every second- and third-level name must be
//! unique across the whole taxonomy, which makes parent lookup unambiguous and
//! rules out cycles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::error::HierarchyError;
use crate::utils::match_key;

/// Depth of a category inside the taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    First,
    Second,
    Third,
}

impl Level {
    /// Returns the ordinal word used in categorization prompts.
    pub fn ordinal(&self) -> &'static str {
        match self {
            Level::First => "first",
            Level::Second => "second",
            Level::Third => "third",
        }
    }

    /// Returns the next deeper level, if any.
    pub fn deeper(&self) -> Option<Level> {
        match self {
            Level::First => Some(Level::Second),
            Level::Second => Some(Level::Third),
            Level::Third => None,
        }
    }
}

/// On-disk shape of a hierarchy file. Multi-value fields are comma-joined strings.
#[derive(Debug, Deserialize)]
struct RawHierarchy {
    #[serde(rename = "first-level")]
    first_level: String,
    #[serde(rename = "second-level", default)]
    second_level: BTreeMap<String, String>,
    #[serde(rename = "third-level", default)]
    third_level: BTreeMap<String, String>,
}

/// Splits a comma-joined category string, dropping empty entries.
fn split_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Immutable category taxonomy with parent, child and sibling indices.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    first_level: Vec<String>,
    children: HashMap<String, Vec<String>>,
    parents: HashMap<String, String>,
    levels: HashMap<String, Level>,
    normalized: HashMap<String, String>,
}

impl Hierarchy {
    /// Loads a hierarchy from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `HierarchyError` if the file cannot be read, is not valid JSON,
    /// lacks `first-level`, or names a category twice.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HierarchyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| HierarchyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let hierarchy = Self::from_json_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            categories = hierarchy.len(),
            "Loaded category hierarchy"
        );
        Ok(hierarchy)
    }

    /// Parses a hierarchy from its JSON text.
    pub fn from_json_str(content: &str) -> Result<Self, HierarchyError> {
        let raw: RawHierarchy = serde_json::from_str(content)?;
        Self::build(raw)
    }

    fn build(raw: RawHierarchy) -> Result<Self, HierarchyError> {
        let first_level = split_names(&raw.first_level);
        if first_level.is_empty() {
            return Err(HierarchyError::EmptyFirstLevel);
        }

        let mut hierarchy = Self::default();
        for name in &first_level {
            hierarchy.register(name, None, Level::First)?;
        }
        hierarchy.first_level = first_level;

        // Walk second-level groups in first-level order, then any stray keys.
        let mut second_keys: Vec<&String> = hierarchy
            .first_level
            .iter()
            .filter(|name| raw.second_level.contains_key(*name))
            .collect();
        let first_set: HashSet<&String> = hierarchy.first_level.iter().collect();
        for key in raw.second_level.keys() {
            if !first_set.contains(key) {
                tracing::warn!(
                    group = %key,
                    "Second-level group is keyed by a name missing from first-level"
                );
                second_keys.push(key);
            }
        }
        let second_keys: Vec<String> = second_keys.into_iter().cloned().collect();

        for parent in &second_keys {
            let names = split_names(&raw.second_level[parent]);
            for name in &names {
                hierarchy.register(name, Some(parent), Level::Second)?;
            }
            hierarchy.children.insert(parent.clone(), names);
        }

        for (parent, value) in &raw.third_level {
            if hierarchy.levels.get(parent) != Some(&Level::Second) {
                tracing::warn!(
                    group = %parent,
                    "Ignoring third-level group keyed by a name that is not second-level"
                );
                continue;
            }
            let names = split_names(value);
            for name in &names {
                hierarchy.register(name, Some(parent), Level::Third)?;
            }
            hierarchy.children.insert(parent.clone(), names);
        }

        Ok(hierarchy)
    }

    fn register(
        &mut self,
        name: &str,
        parent: Option<&str>,
        level: Level,
    ) -> Result<(), HierarchyError> {
        if self.levels.contains_key(name) {
            let existing = self
                .parents
                .get(name)
                .cloned()
                .unwrap_or_else(|| "first-level".to_string());
            return Err(HierarchyError::DuplicateCategory {
                name: name.to_string(),
                first: existing,
                second: parent.unwrap_or("first-level").to_string(),
            });
        }
        self.levels.insert(name.to_string(), level);
        if let Some(parent) = parent {
            self.parents.insert(name.to_string(), parent.to_string());
        }
        let key = match_key(name);
        if !key.is_empty() {
            self.normalized
                .entry(key)
                .or_insert_with(|| name.to_string());
        }
        Ok(())
    }

    /// Returns the ordered first-level categories.
    pub fn first_level(&self) -> &[String] {
        &self.first_level
    }

    /// Returns the number of categories across all levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if the hierarchy holds no categories.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Returns true if the category is named anywhere in the taxonomy.
    pub fn contains(&self, category: &str) -> bool {
        self.levels.contains_key(category)
    }

    /// Returns the level of a known category.
    pub fn level_of(&self, category: &str) -> Option<Level> {
        self.levels.get(category).copied()
    }

    /// Returns the immediate parent, or the category itself when it is
    /// first-level or unknown.
    pub fn parent_of<'a>(&'a self, category: &'a str) -> &'a str {
        self.parents
            .get(category)
            .map(String::as_str)
            .unwrap_or(category)
    }

    /// Returns the ordered children of a category (empty for leaves).
    pub fn children_of(&self, category: &str) -> &[String] {
        self.children
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the second-level names under a first-level category.
    pub fn second_level_of(&self, first: &str) -> &[String] {
        match self.level_of(first) {
            Some(Level::First) => self.children_of(first),
            _ => &[],
        }
    }

    /// Returns the third-level names under a second-level category.
    pub fn third_level_of(&self, second: &str) -> &[String] {
        match self.level_of(second) {
            Some(Level::Second) => self.children_of(second),
            _ => &[],
        }
    }

    /// Returns all first-level names for top-level or unknown categories,
    /// otherwise every child of the category's parent (the category included).
    pub fn siblings_of(&self, category: &str) -> &[String] {
        let parent = self.parent_of(category);
        if parent == category {
            return &self.first_level;
        }
        self.children_of(parent)
    }

    /// Returns the sibling group a category belongs to, keyed by its parent.
    ///
    /// Only second- and third-level categories belong to a group.
    pub fn sibling_group(&self, category: &str) -> Option<&str> {
        self.parents.get(category).map(String::as_str)
    }

    /// Returns the chain of ancestors from the immediate parent upwards.
    pub fn ancestors_of<'a>(&'a self, category: &'a str) -> Vec<&'a str> {
        let mut ancestors = Vec::new();
        let mut current = category;
        while let Some(parent) = self.parents.get(current) {
            ancestors.push(parent.as_str());
            current = parent;
        }
        ancestors
    }

    /// Returns true if `ancestor` lies strictly above `descendant`.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.ancestors_of(descendant).contains(&ancestor)
    }

    /// Returns true if one category is an ancestor of the other.
    pub fn related_by_ancestry(&self, a: &str, b: &str) -> bool {
        a != b && (self.is_ancestor(a, b) || self.is_ancestor(b, a))
    }

    /// Returns the categories taxonomically close to `category`: its siblings,
    /// its parent and its children.
    pub fn related_to<'a>(&'a self, category: &'a str) -> HashSet<&'a str> {
        let mut related: HashSet<&str> = self.siblings_of(category).iter().map(String::as_str).collect();
        let parent = self.parent_of(category);
        if parent != category {
            related.insert(parent);
        }
        related.extend(self.children_of(category).iter().map(String::as_str));
        related
    }

    /// Resolves a free-text label to a hierarchy entry, ignoring case and accents.
    pub fn resolve(&self, label: &str) -> Option<&str> {
        if let Some((name, _)) = self.levels.get_key_value(label) {
            return Some(name.as_str());
        }
        let key = match_key(label);
        if key.is_empty() {
            return None;
        }
        self.normalized.get(&key).map(String::as_str)
    }
}
