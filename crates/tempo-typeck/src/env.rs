//! Variable scopes.
//!
//! A stack of frames mapping variable names to their type. Function
//! parameters live in the outermost frame; every lambda body pushes a frame
//! for its parameters and its `let` bindings. Lookups search from the
//! innermost frame outward.

use rustc_hash::FxHashMap;
use tempo_common::error::ScopeError;

use crate::graph::ExprId;
use crate::ty::{Multiplicity, TypeDescriptor};

/// What a variable name is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableValue {
    pub ty: TypeDescriptor,
    pub mul: Multiplicity,
    /// The expression that defined the variable, for `let` bindings.
    pub source: Option<ExprId>,
}

impl VariableValue {
    pub fn new(ty: TypeDescriptor, mul: Multiplicity) -> Self {
        Self {
            ty,
            mul,
            source: None,
        }
    }

    pub fn defined_by(ty: TypeDescriptor, mul: Multiplicity, source: ExprId) -> Self {
        Self {
            ty,
            mul,
            source: Some(source),
        }
    }
}

pub struct VariableScope {
    frames: Vec<FxHashMap<String, VariableValue>>,
}

impl VariableScope {
    pub fn new() -> Self {
        VariableScope {
            frames: vec![FxHashMap::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    /// Pop the innermost frame. The outermost frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `name` in the innermost frame. Fails if that frame already
    /// binds it; shadowing an outer frame is allowed.
    pub fn register_value(&mut self, name: &str, value: VariableValue) -> Result<(), ScopeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        if frame.contains_key(name) {
            return Err(ScopeError::conflict(name));
        }
        frame.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_value(&self, name: &str) -> Option<&VariableValue> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn get_or_unknown(&self, name: &str) -> Result<&VariableValue, ScopeError> {
        self.get_value(name).ok_or_else(|| ScopeError::unknown(name))
    }
}

impl Default for VariableScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_common::error::ScopeErrorKind;

    fn int() -> VariableValue {
        VariableValue::new(TypeDescriptor::concrete("Integer"), Multiplicity::one())
    }

    fn string() -> VariableValue {
        VariableValue::new(TypeDescriptor::concrete("String"), Multiplicity::one())
    }

    #[test]
    fn lookup_searches_outward() {
        let mut scope = VariableScope::new();
        scope.register_value("x", int()).unwrap();
        scope.push();
        assert_eq!(scope.get_value("x"), Some(&int()));
        assert!(scope.get_value("y").is_none());
    }

    #[test]
    fn shadowing_in_inner_frame() {
        let mut scope = VariableScope::new();
        scope.register_value("x", int()).unwrap();
        scope.push();
        scope.register_value("x", string()).unwrap();
        assert_eq!(scope.get_value("x"), Some(&string()));
        scope.pop();
        assert_eq!(scope.get_value("x"), Some(&int()));
    }

    #[test]
    fn collision_in_same_frame() {
        let mut scope = VariableScope::new();
        scope.register_value("x", int()).unwrap();
        let err = scope.register_value("x", string()).unwrap_err();
        assert_eq!(err.kind, ScopeErrorKind::NameConflict);
        assert_eq!(err.to_string(), "'x' has already been defined!");
    }

    #[test]
    fn outermost_frame_survives_pop() {
        let mut scope = VariableScope::new();
        scope.pop();
        assert_eq!(scope.depth(), 1);
        assert_eq!(
            scope.get_or_unknown("p").unwrap_err().to_string(),
            "The variable 'p' is unknown!"
        );
    }
}
