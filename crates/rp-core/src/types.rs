//! Core type definitions with validation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid offset source value.
    #[error("invalid offset source: {value}")]
    InvalidOffsetSource { value: String },
}

/// Provenance of an applied offset.
///
/// The live session reports `manual`, `auto` or `none`; batch exports
/// report `calculated` or `default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OffsetSource {
    /// Set explicitly by the operator.
    Manual,
    /// Derived from the first recording file seen after the session started.
    Auto,
    /// No offset known; zero is applied.
    #[default]
    None,
    /// Recorder timestamp minus segment start, computed during a batch export.
    Calculated,
    /// Batch export fallback when either timestamp is unknown.
    Default,
}

impl OffsetSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::None => "none",
            Self::Calculated => "calculated",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for OffsetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OffsetSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            "none" => Ok(Self::None),
            "calculated" => Ok(Self::Calculated),
            "default" => Ok(Self::Default),
            _ => Err(ValidationError::InvalidOffsetSource {
                value: s.to_string(),
            }),
        }
    }
}

/// An offset in seconds together with where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AppliedOffset {
    pub seconds: f64,
    pub source: OffsetSource,
}

impl AppliedOffset {
    pub const fn new(seconds: f64, source: OffsetSource) -> Self {
        Self { seconds, source }
    }
}

/// Generates a validated, trimmed string label newtype.
macro_rules! define_label {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new label after trimming and validation.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the label as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(label: $name) -> Self {
                label.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_label!(
    /// A validated recording group identifier (e.g. a pair number).
    GroupId, "groupId"
);

define_label!(
    /// A validated session label within a group.
    SessionLabel, "session"
);

/// Identifies one recorded conversation: `(group, session)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub group_id: GroupId,
    pub session_label: SessionLabel,
}

impl SessionKey {
    /// Validates both halves of the key.
    pub fn new(
        group_id: impl Into<String>,
        session_label: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            group_id: GroupId::new(group_id)?,
            session_label: SessionLabel::new(session_label)?,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.session_label)
    }
}

static UNSAFE_COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_-]+").unwrap());

/// Makes a label safe to embed in a file or directory name.
///
/// Runs of characters outside `[0-9A-Za-z_-]` collapse to `_`; an empty
/// result becomes `NA`.
pub fn sanitize_component(value: &str) -> String {
    let cleaned = UNSAFE_COMPONENT_RE.replace_all(value.trim(), "_");
    if cleaned.is_empty() {
        "NA".to_string()
    } else {
        cleaned.into_owned()
    }
}
