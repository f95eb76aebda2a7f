//! Core package identity type.

use std::fmt;

/// Identity of a device package.
///
/// The qualified name is globally unique (for example `org.example.app`) and
/// is the key for every store table. The display name is only for humans.
///
/// # Example
///
/// ```
/// use fleetup::package::PackageRef;
///
/// let package = PackageRef::new("org.example.app", "Example");
///
/// assert_eq!(package.qualified_name, "org.example.app");
/// assert_eq!(package.to_string(), "Example (org.example.app)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
    /// Globally unique package name.
    pub qualified_name: String,

    /// Human-readable name.
    pub display_name: String,
}

impl PackageRef {
    /// Create a new package reference.
    pub fn new(qualified_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            display_name: display_name.into(),
        }
    }

    /// Whether this package is the given one by qualified name.
    pub fn is(&self, qualified_name: &str) -> bool {
        self.qualified_name == qualified_name
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() || self.display_name == self.qualified_name {
            write!(f, "{}", self.qualified_name)
        } else {
            write!(f, "{} ({})", self.display_name, self.qualified_name)
        }
    }
}
