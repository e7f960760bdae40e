use std::fmt;

use uuid::Uuid;

/// Opaque identifier of a build, unique across all live builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildToken(String);

impl BuildToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        BuildToken(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BuildToken {
    fn from(s: &str) -> Self {
        BuildToken(s.to_string())
    }
}

impl From<String> for BuildToken {
    fn from(s: String) -> Self {
        BuildToken(s)
    }
}

/// Identifier of a tracked change (e.g. a pull request number).
pub type ChangeNumber = u64;
