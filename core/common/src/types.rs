//! Common types used throughout PhotoPush.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An absolute path inside the remote store.
///
/// Always rooted at `/` and separated by `/`, independent of the local
/// platform. Components keep the case reported by the store; comparisons
/// that must ignore case go through [`RemotePath::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a RemotePath.
    ///
    /// Uses '/' as separator. Leading, trailing and repeated separators are
    /// ignored, so `photos`, `/photos` and `/photos/` are the same path.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let components = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        Self::from_components(components)
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "Path component cannot contain separators: {comp}"
            )));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the file/folder name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Join this path with a `/`-separated relative path.
    pub fn join_relative(&self, relative: &str) -> crate::Result<Self> {
        let mut components = self.components.clone();
        for comp in relative.split('/').filter(|c| !c.is_empty()) {
            Self::check_component(comp)?;
            components.push(comp.to_string());
        }
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Path of `self` relative to `root`, `/`-separated, in original case.
    ///
    /// Prefix matching ignores case because the store does. Returns `None`
    /// when `self` is not strictly below `root`.
    pub fn relative_to(&self, root: &RemotePath) -> Option<String> {
        if self.components.len() <= root.components.len() {
            return None;
        }
        let under_root = root
            .components
            .iter()
            .zip(&self.components)
            .all(|(a, b)| a.to_lowercase() == b.to_lowercase());
        if !under_root {
            return None;
        }
        Some(self.components[root.components.len()..].join("/"))
    }

    /// Lowercased string form used for case-insensitive lookups.
    pub fn normalized(&self) -> String {
        self.to_string_path().to_lowercase()
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

impl TryFrom<String> for RemotePath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.to_string_path()
    }
}
