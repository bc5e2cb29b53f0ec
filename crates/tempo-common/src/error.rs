use std::fmt;

use serde::Serialize;

/// An error raised by a variable scope.
///
/// Scopes are owned by the expression walker; the walker decides where the
/// error is reported, so no location is stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeError {
    pub kind: ScopeErrorKind,
    pub name: String,
}

impl ScopeError {
    pub fn new(kind: ScopeErrorKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn conflict(name: impl Into<String>) -> Self {
        Self::new(ScopeErrorKind::NameConflict, name)
    }

    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(ScopeErrorKind::UnknownVariable, name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeErrorKind {
    /// A name was registered twice in the same scope.
    NameConflict,
    /// A variable reference that no enclosing scope defines.
    UnknownVariable,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScopeErrorKind::NameConflict => write!(f, "'{}' has already been defined!", self.name),
            ScopeErrorKind::UnknownVariable => {
                write!(f, "The variable '{}' is unknown!", self.name)
            }
        }
    }
}

impl std::error::Error for ScopeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message() {
        assert_eq!(
            ScopeError::conflict("x").to_string(),
            "'x' has already been defined!"
        );
    }

    #[test]
    fn unknown_message() {
        assert_eq!(
            ScopeError::unknown("p").to_string(),
            "The variable 'p' is unknown!"
        );
    }
}
