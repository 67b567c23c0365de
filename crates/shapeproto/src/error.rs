// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy and error paths.
//!
//! Structural errors are raised at the failing leaf with an empty path and
//! gain one [`PathSegment`] per enclosing container while they unwind, so the
//! error surfaced to the caller names the exact location inside nested input.

use crate::config::ConfigError;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// One step of an [`ErrorPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Record field (declared name, not the wire rename).
    Field(String),
    /// Sequence or tuple position.
    Index(usize),
    /// Mapping key, rendered from the raw key.
    Key(String),
}

/// Location of a failure inside a nested value, outermost segment first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ErrorPath(VecDeque<PathSegment>);

impl ErrorPath {
    /// Empty path (the failure is at the root value).
    pub fn root() -> Self {
        Self::default()
    }

    /// Path holding a single field segment.
    pub fn field(name: impl Into<String>) -> Self {
        Self(VecDeque::from([PathSegment::Field(name.into())]))
    }

    /// Segments, outermost first.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &PathSegment> + '_ {
        self.0.iter()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Prepend an enclosing segment.
    pub fn push_front(&mut self, segment: PathSegment) {
        self.0.push_front(segment);
    }
}

impl fmt::Display for ErrorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::Key(key) => write!(f, "[{:?}]", key)?,
            }
        }
        Ok(())
    }
}

/// Errors produced while resolving, compiling or running a protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced shape (or generic parameter) could not be located.
    #[error("unresolved type `{name}` at {path}")]
    UnresolvedType { name: String, path: ErrorPath },

    /// A value could not be coerced into the declared shape.
    ///
    /// For unions, `candidates` holds every member's failure in declaration order.
    #[error("cannot coerce value at {path}: {reason}")]
    Coercion {
        path: ErrorPath,
        reason: String,
        candidates: Vec<Error>,
    },

    /// A required record field is absent from the input.
    #[error("missing required field `{field}` at {path}")]
    MissingField { path: ErrorPath, field: String },

    /// A value does not conform to the declared shape.
    #[error("invalid value at {path}: {reason}")]
    Validation { path: ErrorPath, reason: String },

    /// A declaration cannot be turned into a descriptor or protocol.
    #[error("invalid shape `{name}`: {reason}")]
    InvalidShape { name: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Error::UnresolvedType {
            name: name.into(),
            path: ErrorPath::root(),
        }
    }

    pub fn coercion(reason: impl Into<String>) -> Self {
        Error::Coercion {
            path: ErrorPath::root(),
            reason: reason.into(),
            candidates: Vec::new(),
        }
    }

    /// Union failure carrying each candidate's error.
    pub fn no_candidate(reason: impl Into<String>, candidates: Vec<Error>) -> Self {
        Error::Coercion {
            path: ErrorPath::root(),
            reason: reason.into(),
            candidates,
        }
    }

    /// Missing field; the path already points at the field itself.
    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Error::MissingField {
            path: ErrorPath::field(field.clone()),
            field,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            path: ErrorPath::root(),
            reason: reason.into(),
        }
    }

    pub fn invalid_shape(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidShape {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Location of the failure, if this error is positional.
    pub fn path(&self) -> Option<&ErrorPath> {
        match self {
            Error::UnresolvedType { path, .. }
            | Error::Coercion { path, .. }
            | Error::MissingField { path, .. }
            | Error::Validation { path, .. } => Some(path),
            Error::InvalidShape { .. } | Error::Config(_) => None,
        }
    }

    /// Union candidates' failures (empty for every other error).
    pub fn candidates(&self) -> &[Error] {
        match self {
            Error::Coercion { candidates, .. } => candidates,
            _ => &[],
        }
    }

    /// Attach the enclosing location while unwinding out of a container.
    pub fn at(mut self, segment: PathSegment) -> Self {
        if let Some(path) = self.path_mut() {
            path.push_front(segment);
        }
        self
    }

    pub(crate) fn at_field(self, name: &str) -> Self {
        self.at(PathSegment::Field(name.to_string()))
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        self.at(PathSegment::Index(index))
    }

    pub(crate) fn at_key(self, key: impl Into<String>) -> Self {
        self.at(PathSegment::Key(key.into()))
    }

    fn path_mut(&mut self) -> Option<&mut ErrorPath> {
        match self {
            Error::UnresolvedType { path, .. }
            | Error::Coercion { path, .. }
            | Error::MissingField { path, .. }
            | Error::Validation { path, .. } => Some(path),
            Error::InvalidShape { .. } | Error::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_accumulates_outermost_first() {
        let err = Error::missing_field("field")
            .at_field("middle")
            .at_field("outer");
        assert_eq!(err.path().map(ToString::to_string).as_deref(), Some("outer.middle.field"));
    }

    #[test]
    fn test_path_renders_indices_and_keys() {
        let err = Error::coercion("bad")
            .at_key("k")
            .at_index(3)
            .at_field("items");
        assert_eq!(err.path().map(ToString::to_string).as_deref(), Some("items[3][\"k\"]"));
    }

    #[test]
    fn test_root_path_display() {
        let err = Error::validation("nope");
        assert_eq!(err.to_string(), "invalid value at <root>: nope");
    }

    #[test]
    fn test_invalid_shape_has_no_path() {
        let err = Error::invalid_shape("X", "bad").at_field("ignored");
        assert!(err.path().is_none());
    }

    #[test]
    fn test_deep_path_keeps_order() {
        let depth = 10_000;
        let err = (0..depth).fold(Error::coercion("leaf"), |e, i| e.at_index(i));
        let path = err.path().unwrap();
        assert_eq!(path.segments().count(), depth);
        assert_eq!(path.segments().next(), Some(&PathSegment::Index(depth - 1)));
        assert_eq!(path.segments().last(), Some(&PathSegment::Index(0)));
    }
}
