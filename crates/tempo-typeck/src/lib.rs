//! Tempo type checker: call resolution and type inference for a
//! model-driven expression language.
//!
//! Expressions are resolved bottom-up against a [`Model`](model::Model) of
//! classes, properties and functions. Resolution picks an overload for
//! every call, infers the types of lambda parameters and relation columns
//! from the function templates they are passed to, and completes
//! milestoned property calls with the dates of their context.
//!
//! # Architecture
//!
//! - [`ty`]: Type descriptors and multiplicities
//! - [`model`]: Classes, properties and function signatures
//! - [`graph`]: The expression arena resolution mutates
//! - [`unify`]: Frame-scoped type and multiplicity parameter bindings
//! - [`env`]: Lexical variable scopes
//! - [`candidates`]: Candidate lookup, specificity and suggestions
//! - [`infer`]: The call resolution driver
//! - [`lambda`]: Lambda parameter inference
//! - [`milestoning`]: Generated milestoned properties and date propagation
//! - [`builtins`]: The core function library and its signature notation
//! - [`error`] and [`diagnostics`]: Errors and their rendering
//! - [`trace`]: Opt-in record of resolution steps

pub mod builtins;
pub mod candidates;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod graph;
pub mod infer;
pub mod lambda;
pub mod milestoning;
pub mod model;
pub mod trace;
pub mod ty;
pub mod unify;

use rustc_hash::FxHashMap;
use tempo_common::package::ImportGroup;

use crate::diagnostics::{render_diagnostic, DiagnosticOptions};
use crate::env::VariableValue;
use crate::error::TypeError;
use crate::graph::{ExprGraph, ExprId};
use crate::infer::Checker;
use crate::model::{Model, Param};
use crate::trace::InferenceTrace;
use crate::ty::{Multiplicity, TypeDescriptor};

/// Knobs for a resolution run.
#[derive(Clone, Debug)]
pub struct InferenceOptions {
    /// Record every resolution step in [`TypeckResult::trace`].
    pub trace: bool,
    /// Above this many same-named functions, a failed call lists none.
    pub suggestion_limit: usize,
    /// Infer missing milestoning dates from the enclosing context.
    pub milestoning_propagation: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        InferenceOptions {
            trace: false,
            suggestion_limit: 20,
            milestoning_propagation: true,
        }
    }
}

/// The result of resolving an expression or function body.
pub struct TypeckResult {
    /// Every expression that received a type, with its multiplicity.
    pub types: FxHashMap<ExprId, (TypeDescriptor, Multiplicity)>,
    /// Resolution stops at the first error, so this holds at most one.
    pub errors: Vec<TypeError>,
    /// The type of the last expression. `None` if resolution failed.
    pub result_type: Option<TypeDescriptor>,
    pub result_mul: Option<Multiplicity>,
    /// Present when [`InferenceOptions::trace`] was set.
    pub trace: Option<InferenceTrace>,
}

impl TypeckResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Render every error as a diagnostic.
    pub fn render_errors(&self, source: &str, filename: &str, options: &DiagnosticOptions) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| render_diagnostic(e, source, filename, options))
            .collect()
    }
}

/// A function body: its declared parameters and its expressions, in order.
#[derive(Clone, Debug, Default)]
pub struct FunctionBody {
    pub params: Vec<Param>,
    pub body: Vec<ExprId>,
}

/// Resolve a single top-level expression.
pub fn check_expression(
    model: &mut Model,
    graph: &mut ExprGraph,
    root: ExprId,
    imports: &ImportGroup,
    options: &InferenceOptions,
) -> TypeckResult {
    let function = FunctionBody {
        params: Vec::new(),
        body: vec![root],
    };
    check_function(model, graph, &function, imports, options)
}

/// Resolve a function body. Type and multiplicity parameters occurring in
/// the declared parameters stay abstract and are accepted as settled.
pub fn check_function(
    model: &mut Model,
    graph: &mut ExprGraph,
    function: &FunctionBody,
    imports: &ImportGroup,
    options: &InferenceOptions,
) -> TypeckResult {
    let mut type_params = Vec::new();
    for param in &function.params {
        param.ty.collect_type_parameters(&mut type_params);
    }
    type_params.sort();
    type_params.dedup();
    let mut mul_params: Vec<String> = function
        .params
        .iter()
        .filter_map(|p| p.mul.parameter_name().map(str::to_string))
        .collect();
    mul_params.sort();
    mul_params.dedup();

    let mut checker = Checker::new(model, graph, imports, options, &type_params, &mul_params);
    let outcome = run(&mut checker, function);
    let trace = checker.trace.take();
    drop(checker);

    let types = graph
        .nodes()
        .filter_map(|(id, node)| Some((id, (node.ty.clone()?, node.mul.clone()?))))
        .collect();
    let last = function.body.last().and_then(|id| {
        let node = graph.get(*id);
        Some((node.ty.clone()?, node.mul.clone()?))
    });
    match outcome {
        Ok(()) => TypeckResult {
            types,
            errors: Vec::new(),
            result_type: last.as_ref().map(|(ty, _)| ty.clone()),
            result_mul: last.map(|(_, mul)| mul),
            trace,
        },
        Err(error) => {
            log::debug!("resolution failed: {error}");
            TypeckResult {
                types,
                errors: vec![error],
                result_type: None,
                result_mul: None,
                trace,
            }
        }
    }
}

fn run(checker: &mut Checker<'_>, function: &FunctionBody) -> Result<(), TypeError> {
    for param in &function.params {
        checker
            .scope
            .register_value(&param.name, VariableValue::new(param.ty.clone(), param.mul.clone()))
            .map_err(TypeError::from)?;
    }
    for &expr in &function.body {
        checker.check_root(expr)?;
    }
    Ok(())
}
