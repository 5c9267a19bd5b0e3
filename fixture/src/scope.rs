//! Scope vocabulary shared with test code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity at which a fixture instance is shared.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Call,
    Function,
    Module,
    Session
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Function => "function",
            Self::Module => "module",
            Self::Session => "session"
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(Self::Call),
            "function" => Ok(Self::Function),
            "module" => Ok(Self::Module),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown scope kind: {other}"))
        }
    }
}

/// Identity of one shared fixture instance: `kind:name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    pub kind: ScopeKind,
    pub name: String
}

impl ScopeKey {
    pub fn new(kind: ScopeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into()
        }
    }

    pub fn call(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Call, name)
    }

    pub fn function(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Function, name)
    }

    pub fn module(name: impl Into<String>) -> Self {
        Self::new(ScopeKind::Module, name)
    }

    /// The session scope has a single instance per process.
    pub fn session() -> Self {
        Self::new(ScopeKind::Session, "session")
    }

    /// Container-name friendly form.
    pub fn slug(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
            .collect();
        format!("{}-{}", self.kind, name.trim_matches('-'))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

impl FromStr for ScopeKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once(':')
            .ok_or_else(|| format!("scope key {s:?} is not kind:name"))?;
        Ok(Self::new(kind.parse()?, name))
    }
}
