use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorKind {
    /// Hierarchical node paths (XPath style).
    #[serde(alias = "xpath")]
    StructuralPath,
    /// Tag/class/attribute queries (CSS style).
    #[serde(alias = "css")]
    DeclarativeQuery,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuralPath => "structural-path",
            Self::DeclarativeQuery => "declarative-query",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structural-path" | "xpath" => Ok(Self::StructuralPath),
            "declarative-query" | "css" => Ok(Self::DeclarativeQuery),
            other => Err(ModelError::UnknownSelectorKind(other.to_string())),
        }
    }
}

/// A selector always carries a non-empty expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSelector {
    kind: SelectorKind,
    expression: String,
}

impl TargetSelector {
    pub fn new(kind: SelectorKind, expression: impl Into<String>) -> Result<Self, ModelError> {
        let expression = expression.into().trim().to_string();
        if expression.is_empty() {
            return Err(ModelError::EmptySelector);
        }
        Ok(Self { kind, expression })
    }

    pub fn declarative(expression: impl Into<String>) -> Result<Self, ModelError> {
        Self::new(SelectorKind::DeclarativeQuery, expression)
    }

    pub fn structural(expression: impl Into<String>) -> Result<Self, ModelError> {
        Self::new(SelectorKind::StructuralPath, expression)
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: i64,
    pub url: String,
    pub selector: Option<TargetSelector>,
    pub name: Option<String>,
}

impl Target {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            selector: None,
            name: None,
        }
    }

    pub fn with_selector(mut self, selector: TargetSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}
