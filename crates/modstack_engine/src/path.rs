//! Logical file identities.

use crate::utils::normalize_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A logical file targeted by a mod: a path inside a location.
///
/// The location is either the installation root (empty `location`) or an archive
/// file, given by its path relative to the installation root. `location_id`
/// selects the archive codec that owns the location.
///
/// Equality and hashing go through [`PathKey`], so `Data\Foo.txt` and
/// `data/foo.txt` are the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModFilePath {
    /// Path relative to the location.
    pub file_path: String,
    /// Archive path relative to the installation root, or empty for the root itself.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    /// Archive codec identifier, empty for the root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location_id: String,
}

/// Normalized identity of a [`ModFilePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    location: String,
    file: String,
}

impl PathKey {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn file(&self) -> &str {
        &self.file
    }
}

impl ModFilePath {
    /// A file directly inside the installation root.
    pub fn physical(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            location: String::new(),
            location_id: String::new(),
        }
    }

    /// An entry inside the archive at `location`.
    pub fn in_archive(
        location: impl Into<String>,
        location_id: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            location: location.into(),
            location_id: location_id.into(),
        }
    }

    pub fn key(&self) -> PathKey {
        PathKey {
            location: self.location_key(),
            file: normalize_path(&self.file_path),
        }
    }

    /// Normalized location, used to group records by location.
    pub fn location_key(&self) -> String {
        normalize_path(&self.location)
    }

    pub fn is_physical(&self) -> bool {
        self.location_key().is_empty()
    }
}

impl PartialEq for ModFilePath {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ModFilePath {}

impl Hash for ModFilePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for ModFilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            f.write_str(&self.file_path)
        } else {
            write!(f, "{}::{}", self.location, self.file_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_is_normalized() {
        let a = ModFilePath::physical("Data\\Foo.txt");
        let b = ModFilePath::physical("data/foo.txt");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_location_distinguishes() {
        let a = ModFilePath::physical("icons/a.png");
        let b = ModFilePath::in_archive("data/UI.zip", "zip", "icons/a.png");
        let c = ModFilePath::in_archive("data\\ui.zip", "zip", "Icons/A.png");
        assert_ne!(a, b);
        assert_eq!(b, c);
        assert!(a.is_physical());
        assert!(!b.is_physical());
    }

    #[test]
    fn test_display() {
        assert_eq!(ModFilePath::physical("a.txt").to_string(), "a.txt");
        assert_eq!(
            ModFilePath::in_archive("data/ui.zip", "zip", "a.png").to_string(),
            "data/ui.zip::a.png"
        );
    }

    #[test]
    fn test_serialization_format() {
        let json = serde_json::to_string(&ModFilePath::physical("a.txt")).unwrap();
        assert_eq!(json, r#"{"filePath":"a.txt"}"#);

        let json =
            serde_json::to_string(&ModFilePath::in_archive("x.zip", "zip", "a.txt")).unwrap();
        assert!(json.contains("\"location\":\"x.zip\""));
        assert!(json.contains("\"locationId\":\"zip\""));
    }
}
