//! Call resolution driver.
//!
//! Resolves call expressions bottom-up. For each call:
//!
//! 1. First pass: process every argument, recording the positions that could
//!    not be typed on their own (lambdas with undeclared parameters, relation
//!    placeholders with untyped columns, nested calls that need their
//!    caller's templates).
//! 2. Look up candidates, rewriting property calls where needed (automap,
//!    enumeration access, milestoning dates).
//! 3. Per candidate: register the typed arguments, then type the failed ones
//!    against the candidate's templates, and compute the return type. A
//!    rejected candidate rolls the inference context back and the arguments
//!    are processed again for the next one.
//! 4. Finalize the accepted candidate on the call node.

use rowan::TextRange;
use tempo_common::package::ImportGroup;

use crate::builtins;
use crate::candidates::{self, ArgumentShape, BestMatch, PropertyLookup};
use crate::env::{VariableScope, VariableValue};
use crate::error::TypeError;
use crate::graph::{CallStyle, ExprGraph, ExprId, ExprKind, LambdaParam, Usage};
use crate::milestoning::catalog::GeneratedVariant;
use crate::milestoning::propagate::{self, DateContextStack, MilestoningDates};
use crate::model::{FunctionId, Model, Param, Signature, TypeKind, NIL};
use crate::trace::{InferenceTrace, TraceStep};
use crate::ty::{Column, Multiplicity, TypeDescriptor};
use crate::unify::{InferenceContext, Target};
use crate::InferenceOptions;

/// Parameter of the lambda an automapped property call is wrapped in.
pub const AUTOMAP_VARIABLE: &str = "v_automap";

const THIS: &str = "this";

/// Whether processing an expression produced a type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Typed,
    /// Not typeable yet; the enclosing call may retry it with more context.
    Deferred,
}

enum Lookup {
    Candidates(Vec<FunctionId>),
    /// The call was rewritten and must go through the first pass again.
    Rewritten,
    Deferred,
}

pub(crate) struct Checker<'a> {
    pub(crate) model: &'a mut Model,
    pub(crate) graph: &'a mut ExprGraph,
    pub(crate) imports: &'a ImportGroup,
    pub(crate) options: &'a InferenceOptions,
    pub(crate) ctx: InferenceContext,
    pub(crate) scope: VariableScope,
    pub(crate) dates: DateContextStack,
    pub(crate) trace: Option<InferenceTrace>,
    /// The innermost error behind a deferred call, reported if the
    /// deferral reaches the root.
    deferred: Option<TypeError>,
}

impl<'a> Checker<'a> {
    pub(crate) fn new(
        model: &'a mut Model,
        graph: &'a mut ExprGraph,
        imports: &'a ImportGroup,
        options: &'a InferenceOptions,
        type_params: &[String],
        mul_params: &[String],
    ) -> Self {
        Checker {
            model,
            graph,
            imports,
            options,
            ctx: InferenceContext::new(type_params, mul_params),
            scope: VariableScope::new(),
            dates: DateContextStack::new(),
            trace: options.trace.then(InferenceTrace::new),
            deferred: None,
        }
    }

    /// Resolve a top-level expression. Deferral at the root is an error.
    pub(crate) fn check_root(&mut self, id: ExprId) -> Result<(), TypeError> {
        match self.process(id)? {
            Outcome::Typed => {
                self.deferred = None;
                Ok(())
            }
            Outcome::Deferred => Err(self.deferred.take().unwrap_or_else(|| TypeError::TypeNotInferred {
                ty: TypeDescriptor::Unresolved.to_string(),
                property: self.describe(id),
                span: self.graph.range(id),
            })),
        }
    }

    fn describe(&self, id: ExprId) -> String {
        match &self.graph.get(id).kind {
            ExprKind::Lambda(lambda) => lambda
                .params
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            ExprKind::Call(call) => call.display_name().to_string(),
            ExprKind::Variable(name) | ExprKind::ClassRef(name) | ExprKind::EnumRef(name) => name.clone(),
            _ => String::new(),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    pub(crate) fn record(&mut self, step: impl FnOnce() -> TraceStep) {
        if let Some(trace) = &mut self.trace {
            trace.push(step());
        }
    }

    pub(crate) fn typed(&self, id: ExprId) -> Option<(TypeDescriptor, Multiplicity)> {
        let node = self.graph.get(id);
        Some((node.ty.clone()?, node.mul.clone()?))
    }

    fn shape(&self, id: ExprId) -> ArgumentShape {
        let node = self.graph.get(id);
        ArgumentShape::new(node.ty.clone(), node.mul.clone())
    }

    /// Record a type on `id` and mark it processed.
    pub(crate) fn settle(&mut self, id: ExprId, ty: TypeDescriptor, mul: Multiplicity) -> Outcome {
        self.graph.set_type(id, ty, mul);
        self.graph.get_mut(id).processed = true;
        Outcome::Typed
    }

    fn params_of(&self, id: ExprId) -> Vec<ExprId> {
        self.graph.call(id).map(|c| c.params.clone()).unwrap_or_default()
    }

    fn call_name(&self, id: ExprId) -> String {
        self.graph
            .call(id)
            .map(|c| c.display_name().to_string())
            .unwrap_or_default()
    }

    // ── Expressions ──────────────────────────────────────────────────

    pub(crate) fn process(&mut self, id: ExprId) -> Result<Outcome, TypeError> {
        let node = self.graph.get(id);
        if node.processed && node.ty.is_some() {
            return Ok(Outcome::Typed);
        }
        let range = node.range;
        match node.kind.clone() {
            ExprKind::Literal { ty, .. } => Ok(self.settle(id, ty, Multiplicity::one())),
            ExprKind::Variable(name) => {
                let value = self
                    .scope
                    .get_or_unknown(&name)
                    .map_err(|e| TypeError::from(e).with_span(range))?;
                let (ty, mul) = (value.ty.clone(), value.mul.clone());
                Ok(self.settle(id, ty, mul))
            }
            ExprKind::ClassRef(name) => {
                let class = self
                    .model
                    .type_id(&name)
                    .ok_or(TypeError::UnknownType { name, span: range })?;
                let ty = TypeDescriptor::class_of(self.model.type_descriptor(class));
                Ok(self.settle(id, ty, Multiplicity::one()))
            }
            ExprKind::EnumRef(name) => {
                let known = self
                    .model
                    .type_id(&name)
                    .is_some_and(|t| self.model.ty(t).is_enumeration());
                if !known {
                    return Err(TypeError::UnknownType { name, span: range });
                }
                let ty = TypeDescriptor::generic("Enumeration", vec![TypeDescriptor::concrete(name)]);
                Ok(self.settle(id, ty, Multiplicity::one()))
            }
            ExprKind::Collection(items) => self.process_collection(id, &items),
            ExprKind::KeyValue { value, .. } => match self.process(value)? {
                Outcome::Typed => Ok(self.settle(id, TypeDescriptor::concrete("KeyExpression"), Multiplicity::one())),
                Outcome::Deferred => Ok(Outcome::Deferred),
            },
            ExprKind::RelationLiteral(columns) => {
                let ty = TypeDescriptor::relation(columns.clone());
                if columns.iter().any(Column::is_empty) {
                    self.graph.set_type(id, ty, Multiplicity::one());
                    Ok(Outcome::Deferred)
                } else {
                    Ok(self.settle(id, ty, Multiplicity::one()))
                }
            }
            ExprKind::Lambda(_) => self.process_lambda(id, None, None),
            ExprKind::Call(_) => self.resolve_call(id),
        }
    }

    fn process_collection(&mut self, id: ExprId, items: &[ExprId]) -> Result<Outcome, TypeError> {
        let mut deferred = false;
        for &item in items {
            if self.process(item)? == Outcome::Deferred {
                deferred = true;
            }
        }
        if deferred {
            return Ok(Outcome::Deferred);
        }
        let mut common: Option<TypeDescriptor> = None;
        let mut lower = 0u32;
        let mut upper = Some(0u32);
        for &item in items {
            let Some((ty, mul)) = self.typed(item) else {
                continue;
            };
            common = Some(match common {
                None => ty,
                Some(previous) => self.model.best_common_type(&previous, &ty),
            });
            match mul {
                Multiplicity::Bounds { lower: l, upper: u } => {
                    lower += l;
                    upper = upper.zip(u).map(|(a, b)| a + b);
                }
                Multiplicity::Parameter(_) => upper = None,
            }
        }
        let ty = common.unwrap_or_else(|| TypeDescriptor::concrete(NIL));
        Ok(self.settle(id, ty, Multiplicity::new(lower, upper)))
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn resolve_call(&mut self, id: ExprId) -> Result<Outcome, TypeError> {
        let entered = self.ctx.enter(None);
        let result = self.resolve_call_in_frame(id);
        self.ctx.leave(entered);
        match result {
            Ok(Outcome::Deferred) if self.deferred.is_none() => self.deferred = Some(self.no_match(id)),
            Ok(Outcome::Typed) => self.deferred = None,
            _ => {}
        }
        result
    }

    fn resolve_call_in_frame(&mut self, id: ExprId) -> Result<Outcome, TypeError> {
        loop {
            let failed = self.first_pass(id)?;
            match self.lookup(id, &failed)? {
                Lookup::Rewritten => continue,
                Lookup::Deferred => return Ok(Outcome::Deferred),
                Lookup::Candidates(candidates) => return self.match_candidates(id, candidates, failed),
            }
        }
    }

    /// Process every argument of `call`, returning the positions that
    /// could not be typed.
    fn first_pass(&mut self, call: ExprId) -> Result<Vec<usize>, TypeError> {
        let params = self.params_of(call);
        let name = self.call_name(call);
        let mut failed = Vec::new();
        for (offset, &arg) in params.iter().enumerate() {
            self.graph.get_mut(arg).usage = Some(Usage { owner: call, offset });
            let outcome = if self.graph.is_lambda(arg) {
                let dates = self.lambda_dates(&name, &params);
                self.process_lambda(arg, None, dates)?
            } else {
                self.process(arg)?
            };
            if outcome == Outcome::Deferred {
                failed.push(offset);
            }
        }
        log::trace!("first pass of '{name}': failed {failed:?}");
        self.record(|| TraceStep::FirstPass {
            call,
            name,
            failed: failed.clone(),
        });
        Ok(failed)
    }

    /// The date context flowing into the lambdas passed to `function`.
    fn lambda_dates(&self, function: &str, params: &[ExprId]) -> Option<MilestoningDates> {
        if !self.options.milestoning_propagation || !propagate::supports_lambda_propagation(function) {
            return None;
        }
        let source = *params.first()?;
        propagate::dates_of(self.graph, self.model, &self.dates, source)
    }

    fn lookup(&mut self, id: ExprId, failed: &[usize]) -> Result<Lookup, TypeError> {
        let Some(call) = self.graph.call(id) else {
            return Ok(Lookup::Candidates(Vec::new()));
        };
        if let Some(target) = call.target {
            return Ok(Lookup::Candidates(vec![target]));
        }
        let name = call.display_name().to_string();
        let arity = call.params.len();
        let style = call.style;
        match style {
            CallStyle::Function => {
                let found = candidates::functions_by_name(self.model, &name, arity, self.imports);
                log::debug!("{} candidate(s) for '{name}'", found.len());
                self.record(|| TraceStep::CandidatesFound {
                    call: id,
                    name,
                    count: found.len(),
                });
                Ok(Lookup::Candidates(found))
            }
            CallStyle::Property => self.lookup_property(id, &name, failed),
        }
    }

    fn lookup_property(&mut self, id: ExprId, name: &str, failed: &[usize]) -> Result<Lookup, TypeError> {
        let params = self.params_of(id);
        let range = self.graph.range(id);
        let Some(&receiver) = params.first() else {
            return Ok(Lookup::Candidates(Vec::new()));
        };
        if failed.contains(&0) {
            return Ok(Lookup::Deferred);
        }
        if let ExprKind::EnumRef(enumeration) = &self.graph.get(receiver).kind {
            let enumeration = enumeration.clone();
            self.rewrite_enum_access(id, &enumeration, name)?;
            return Ok(Lookup::Rewritten);
        }
        let Some((ty, mul)) = self.typed(receiver) else {
            return Ok(Lookup::Deferred);
        };
        // Properties take `$this` as [1], so optional receivers are mapped too.
        if !mul.is_to_one(true) {
            self.automap(id, name);
            return Ok(Lookup::Rewritten);
        }
        match &ty {
            TypeDescriptor::Relation(columns) => {
                let Some(column) = columns.iter().find(|c| c.name == name).cloned() else {
                    return Err(TypeError::ColumnNotFound {
                        column: name.to_string(),
                        relation: ty.to_string(),
                        span: range,
                    });
                };
                if column.is_empty() {
                    return Err(TypeError::TypeNotInferred {
                        ty: ty.to_string(),
                        property: name.to_string(),
                        span: range,
                    });
                }
                let accessor = self.model.column_accessor(&ty, &column);
                Ok(Lookup::Candidates(vec![accessor]))
            }
            TypeDescriptor::Concrete(class, _) if self.model.type_id(class).is_some() => {
                self.lookup_class_property(id, receiver, class, name, params.len())
            }
            other => Err(TypeError::TypeNotInferred {
                ty: other.to_string(),
                property: name.to_string(),
                span: range,
            }),
        }
    }

    fn lookup_class_property(
        &mut self,
        id: ExprId,
        receiver: ExprId,
        class: &str,
        name: &str,
        arity: usize,
    ) -> Result<Lookup, TypeError> {
        let span = self.graph.range(id);
        match candidates::property_candidates(self.model, class, name, arity) {
            PropertyLookup::Property(p) => Ok(Lookup::Candidates(vec![p])),
            PropertyLookup::Qualified(qualified) => Ok(Lookup::Candidates(qualified)),
            PropertyLookup::RequiresParameters(qualified) if qualified.len() == 1 => {
                Err(TypeError::PropertyRequiresParameters {
                    property: name.to_string(),
                    span,
                })
            }
            PropertyLookup::RequiresParameters(qualified) => Err(TypeError::AmbiguousPropertyParameters {
                property: name.to_string(),
                count: qualified.len(),
                span,
            }),
            PropertyLookup::Milestoned(stereotype) => {
                let dated = if self.options.milestoning_propagation {
                    propagate::dates_of(self.graph, self.model, &self.dates, receiver).and_then(|source| {
                        propagate::get_milestoning_qualified_property_with_all_dates_supplied(
                            self.graph, self.model, id, class, stereotype, None, &source,
                        )
                    })
                } else {
                    None
                };
                match dated {
                    Some(_) => {
                        self.record_rewrite(id, name);
                        Ok(Lookup::Rewritten)
                    }
                    None => Err(TypeError::MilestonedPropertyRequiresDates {
                        property: name.to_string(),
                        stereotype,
                        span,
                    }),
                }
            }
            PropertyLookup::NotFound => Err(TypeError::PropertyNotFound {
                property: name.to_string(),
                class: class.to_string(),
                span,
            }),
        }
    }

    fn record_rewrite(&mut self, id: ExprId, property: &str) {
        let dates = self.params_of(id).len().saturating_sub(1);
        self.record(|| TraceStep::MilestoningRewrite {
            call: id,
            property: property.to_string(),
            dates,
        });
    }

    /// `$xs.p(args)` on a to-many receiver becomes
    /// `$xs->map(v_automap | $v_automap.p(args))`.
    fn automap(&mut self, id: ExprId, property: &str) {
        let Some(mut original) = self.graph.call(id).cloned() else {
            return;
        };
        let receiver = original.params[0];
        let lambda = match original.generated.as_slice() {
            [lambda] => *lambda,
            _ => {
                let range = self.graph.range(id);
                let rest = original.params[1..].to_vec();
                let variable = self.graph.variable(AUTOMAP_VARIABLE);
                let inner = self.graph.property(variable, property, rest);
                let lambda = self.graph.new_lambda(vec![LambdaParam::untyped(AUTOMAP_VARIABLE)], vec![inner]);
                for node in [variable, inner, lambda] {
                    self.graph.set_range(node, range);
                }
                if let Some(l) = self.graph.lambda_mut(lambda) {
                    l.generated = true;
                }
                original.generated = vec![lambda];
                lambda
            }
        };
        if let Some(call) = self.graph.call_mut(id) {
            call.style = CallStyle::Function;
            call.name = Some(builtins::MAP.to_string());
            call.params = vec![receiver, lambda];
            call.rewritten_from = Some(Box::new(original));
        }
        log::debug!("automap of '{property}'");
        self.record(|| TraceStep::Automap {
            call: id,
            property: property.to_string(),
        });
    }

    /// `Color.RED` becomes `extractEnumValue(Color, 'RED')`.
    fn rewrite_enum_access(&mut self, id: ExprId, enumeration: &str, value: &str) -> Result<(), TypeError> {
        let range = self.graph.range(id);
        let known = self
            .model
            .type_id(enumeration)
            .map(|t| &self.model.ty(t).kind)
            .is_some_and(|kind| matches!(kind, TypeKind::Enumeration(values) if values.iter().any(|v| v == value)));
        if !known {
            return Err(TypeError::PropertyNotFound {
                property: value.to_string(),
                class: enumeration.to_string(),
                span: range,
            });
        }
        let Some(mut original) = self.graph.call(id).cloned() else {
            return Ok(());
        };
        let literal = match original.generated.as_slice() {
            [literal] => *literal,
            _ => {
                let literal = self.graph.string(value);
                self.graph.set_range(literal, range);
                original.generated = vec![literal];
                literal
            }
        };
        if let Some(call) = self.graph.call_mut(id) {
            call.style = CallStyle::Function;
            call.name = Some(builtins::EXTRACT_ENUM_VALUE.to_string());
            call.params = vec![original.params[0], literal];
            call.rewritten_from = Some(Box::new(original));
        }
        Ok(())
    }

    // ── Candidates ───────────────────────────────────────────────────

    fn match_candidates(
        &mut self,
        id: ExprId,
        candidates: Vec<FunctionId>,
        mut failed: Vec<usize>,
    ) -> Result<Outcome, TypeError> {
        if candidates.is_empty() {
            return Err(self.no_match(id));
        }
        for (index, &candidate) in candidates.iter().enumerate() {
            let snapshot = self.ctx.snapshot();
            self.ctx.set_scope(candidate);
            if let Some((ty, mul)) = self.attempt(id, candidate, &failed)? {
                if self.accepts(id, candidate, &candidates)? {
                    self.ctx.commit(snapshot);
                    let target = self.complete_milestoning(id, candidate)?;
                    self.finalize(id, target, ty, mul)?;
                    return Ok(Outcome::Typed);
                }
            }
            self.ctx.rollback_to(snapshot);
            let function = self.model.function(candidate).name.clone();
            log::debug!("candidate '{function}' rejected");
            self.record(|| TraceStep::RolledBack { call: id, function });
            if index + 1 < candidates.len() {
                for arg in self.params_of(id) {
                    self.graph.unbind(arg);
                }
                failed = self.first_pass(id)?;
            }
        }
        if failed.is_empty() {
            Err(self.no_match(id))
        } else {
            Ok(Outcome::Deferred)
        }
    }

    /// Type the arguments of `id` against `candidate`. Returns the return
    /// type, or `None` when the candidate does not fit.
    fn attempt(
        &mut self,
        id: ExprId,
        candidate: FunctionId,
        failed: &[usize],
    ) -> Result<Option<(TypeDescriptor, Multiplicity)>, TypeError> {
        let def = self.model.function(candidate);
        let signature = def.signature.clone();
        let function = def.name.clone();
        let kind = def.kind_label();
        let params = self.params_of(id);
        if params.len() != signature.params.len() {
            return Ok(None);
        }
        let magic_slot = builtins::magic_column_slot(&function);
        let dates = self.lambda_dates(&function, &params);

        for (offset, (&arg, param)) in params.iter().zip(&signature.params).enumerate() {
            if failed.contains(&offset) {
                continue;
            }
            let Some((ty, mul)) = self.typed(arg) else {
                continue;
            };
            if !self.model.is_subtype(&ty, &param.ty) || !param.mul.subsumes(&mul) {
                return Ok(None);
            }
            self.register_argument(id, offset, param, &ty, &mul);
        }

        let mut unresolved = false;
        for &offset in failed {
            if magic_slot == Some(offset) {
                continue;
            }
            if !self.reprocess_argument(id, offset, params[offset], &signature.params[offset], dates)? {
                unresolved = true;
            }
        }
        if unresolved {
            return Ok(None);
        }
        if let Some(slot) = magic_slot {
            if !self.bind_magic_columns(&function, &params, slot, &signature.params[slot]) {
                return Ok(None);
            }
        }

        let (mut ret, mut ret_mul) = self.concrete_return(&signature);
        if !self.is_settled(&ret, &ret_mul) && failed.is_empty() {
            for (offset, (&arg, param)) in params.iter().zip(&signature.params).enumerate() {
                let nested_unsettled = self.graph.call(arg).is_some()
                    && self.typed(arg).is_some_and(|(ty, mul)| !self.is_settled(&ty, &mul));
                if nested_unsettled {
                    self.reprocess_call_argument(id, offset, arg, param)?;
                }
            }
            (ret, ret_mul) = self.concrete_return(&signature);
        }
        // An open return multiplicity is accepted as is.
        if !self.ctx.is_settled(&ret) {
            return Err(TypeError::UnresolvedReturnType {
                function,
                kind,
                ty: format!("{ret}{ret_mul}"),
                span: self.graph.range(id),
            });
        }
        Ok(Some((ret, ret_mul)))
    }

    fn is_settled(&self, ty: &TypeDescriptor, mul: &Multiplicity) -> bool {
        self.ctx.is_settled(ty) && self.ctx.is_mul_settled(mul)
    }

    fn concrete_return(&mut self, signature: &Signature) -> (TypeDescriptor, Multiplicity) {
        let ret = self.ctx.make_as_concrete(&signature.ret, self.model);
        let ret_mul = self.ctx.make_mul_concrete(&signature.ret_mul);
        (ret, ret_mul)
    }

    pub(crate) fn register_argument(
        &mut self,
        call: ExprId,
        offset: usize,
        param: &Param,
        ty: &TypeDescriptor,
        mul: &Multiplicity,
    ) {
        self.ctx.register(&param.ty, ty, Target::Top);
        self.ctx.register_mul(&param.mul, mul, Target::Top);
        self.record(|| TraceStep::Registered {
            call,
            offset,
            template: format!("{}{}", param.ty, param.mul),
            actual: format!("{ty}{mul}"),
        });
    }

    /// Type an argument the first pass could not, using its template.
    fn reprocess_argument(
        &mut self,
        call: ExprId,
        offset: usize,
        arg: ExprId,
        param: &Param,
        dates: Option<MilestoningDates>,
    ) -> Result<bool, TypeError> {
        let outcome = match self.graph.get(arg).kind.clone() {
            ExprKind::Lambda(_) => self.process_lambda(arg, Some(&param.ty), dates)?,
            ExprKind::RelationLiteral(columns) => self.infer_columns(arg, &columns, param)?,
            ExprKind::Call(_) => return self.reprocess_call_argument(call, offset, arg, param),
            ExprKind::Collection(items) => {
                let element = Param::new(param.name.clone(), param.ty.clone(), Multiplicity::one());
                for item in items {
                    let pending = self.graph.call(item).is_some() && !self.graph.get(item).processed;
                    if pending && !self.reprocess_call_argument(call, offset, item, &element)? {
                        return Ok(false);
                    }
                }
                self.process(arg)?
            }
            _ => self.process(arg)?,
        };
        if outcome == Outcome::Deferred {
            return Ok(false);
        }
        match self.typed(arg) {
            Some((ty, mul)) => {
                self.register_argument(call, offset, param, &ty, &mul);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolve a nested call again with its slot's template bound ahead
    /// of time, so its own inference starts from what its caller expects.
    fn reprocess_call_argument(
        &mut self,
        call: ExprId,
        offset: usize,
        arg: ExprId,
        param: &Param,
    ) -> Result<bool, TypeError> {
        let template = self.ctx.make_as_concrete(&param.ty, self.model);
        let template_mul = self.ctx.make_mul_concrete(&param.mul);
        let nested = self.single_candidate(arg);
        self.record(|| TraceStep::ReverseMatch { call, offset });

        self.graph.unbind(arg);
        self.ctx.push_ahead();
        if let Some(nested) = nested {
            let signature = &self.model.function(nested).signature;
            let (ret, ret_mul) = (signature.ret.clone(), signature.ret_mul.clone());
            self.ctx.register(&ret, &template, Target::Parent);
            self.ctx.register_mul(&ret_mul, &template_mul, Target::Parent);
        }
        let outcome = self.process(arg);
        self.ctx.pop();
        if outcome? == Outcome::Deferred {
            return Ok(false);
        }
        match self.typed(arg) {
            Some((ty, mul)) => {
                self.register_argument(call, offset, param, &ty, &mul);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The only function a nested call can resolve to, when that is known
    /// before resolving it.
    fn single_candidate(&self, id: ExprId) -> Option<FunctionId> {
        let call = self.graph.call(id)?;
        if let Some(target) = call.target {
            return Some(target);
        }
        if call.style != CallStyle::Function {
            return None;
        }
        match candidates::functions_by_name(self.model, call.name.as_deref()?, call.params.len(), self.imports)
            .as_slice()
        {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Type the empty columns of a relation placeholder from the relation
    /// its template refers to.
    fn infer_columns(&mut self, arg: ExprId, columns: &[Column], param: &Param) -> Result<Outcome, TypeError> {
        let template = self.ctx.make_as_concrete(&param.ty, self.model);
        let Some(reference) = reference_columns(&template) else {
            return Ok(Outcome::Deferred);
        };
        let mut filled = Vec::with_capacity(columns.len());
        for column in columns {
            if !column.is_empty() {
                filled.push(column.clone());
                continue;
            }
            match reference.iter().find(|r| r.name == column.name) {
                Some(found) if !found.is_empty() => filled.push(found.clone()),
                Some(_) => return Ok(Outcome::Deferred),
                None => {
                    return Err(TypeError::ColumnNotFound {
                        column: column.name.clone(),
                        relation: TypeDescriptor::relation(reference.to_vec()).to_string(),
                        span: self.graph.range(arg),
                    })
                }
            }
        }
        Ok(self.settle(arg, TypeDescriptor::relation(filled), Multiplicity::one()))
    }

    /// Bind the relation placeholder of a column builder to columns typed
    /// by its lambdas.
    fn bind_magic_columns(&mut self, function: &str, params: &[ExprId], slot: usize, param: &Param) -> bool {
        let ExprKind::RelationLiteral(placeholder) = self.graph.get(params[slot]).kind.clone() else {
            return false;
        };
        let columns = match function {
            builtins::FUNC_COL_SPEC | builtins::AGG_COL_SPEC => {
                let lambda = if function == builtins::FUNC_COL_SPEC { params[0] } else { params[1] };
                let Some((ty, _)) = self.typed(lambda) else {
                    return false;
                };
                let Some(ft) = ty.function_type() else {
                    return false;
                };
                let [column] = placeholder.as_slice() else {
                    return false;
                };
                vec![Column {
                    name: column.name.clone(),
                    ty: ft.ret.clone(),
                    mul: ft.ret_mul.clone(),
                }]
            }
            _ => {
                let ExprKind::Collection(items) = self.graph.get(params[0]).kind.clone() else {
                    return false;
                };
                let mut columns = Vec::new();
                for item in items {
                    let Some((spec, _)) = self.typed(item) else {
                        return false;
                    };
                    match spec.type_arguments().last().and_then(TypeDescriptor::relation_columns) {
                        Some(found) => columns.extend_from_slice(found),
                        None => return false,
                    }
                }
                columns
            }
        };
        if columns.iter().any(|c| !self.ctx.is_settled(&c.ty)) {
            return false;
        }
        let ty = TypeDescriptor::relation(columns);
        self.settle(params[slot], ty.clone(), Multiplicity::one());
        self.ctx.register(&param.ty, &ty, Target::Top);
        true
    }

    /// Accept `candidate` if no other candidate fits the typed arguments
    /// better. Calls bound at construction are always accepted.
    fn accepts(&self, id: ExprId, candidate: FunctionId, all: &[FunctionId]) -> Result<bool, TypeError> {
        let Some(call) = self.graph.call(id) else {
            return Ok(false);
        };
        let Some(name) = &call.name else {
            return Ok(true);
        };
        let shapes: Vec<ArgumentShape> = call.params.iter().map(|p| self.shape(*p)).collect();
        match candidates::best_match(self.model, all, &shapes) {
            BestMatch::Tied(tied) if tied.contains(&candidate) && candidates::all_known(&shapes) => {
                Err(TypeError::AmbiguousCall {
                    function: name.clone(),
                    candidates: tied
                        .iter()
                        .map(|f| {
                            let def = self.model.function(*f);
                            let package = self.model.packages().path(def.package);
                            tempo_common::package::user_path(package, &def.display_signature())
                        })
                        .collect(),
                    span: self.graph.range(id),
                })
            }
            best => Ok(best.admits(candidate)),
        }
    }

    /// Supply milestoning dates to a generated property matched without
    /// them. Returns the final target.
    fn complete_milestoning(&mut self, id: ExprId, candidate: FunctionId) -> Result<FunctionId, TypeError> {
        let def = self.model.function(candidate);
        if !def.is_generated_with_missing_dates() {
            return Ok(candidate);
        }
        let Some(generated) = def.generated.clone() else {
            return Ok(candidate);
        };
        let property = def.name.clone();
        let params = self.params_of(id);
        let Some(&receiver) = params.first() else {
            return Ok(candidate);
        };
        let owner = self
            .typed(receiver)
            .and_then(|(ty, _)| ty.raw_name().map(str::to_string))
            .unwrap_or_default();

        if self.options.milestoning_propagation {
            if let Some(source) = propagate::dates_of(self.graph, self.model, &self.dates, receiver) {
                let dated = propagate::get_milestoning_qualified_property_with_all_dates_supplied(
                    self.graph,
                    self.model,
                    id,
                    &owner,
                    generated.target,
                    Some(candidate),
                    &source,
                );
                if let Some(dated) = dated {
                    self.record_rewrite(id, &property);
                    return Ok(dated);
                }
            }
        }
        let on_this = matches!(&self.graph.get(receiver).kind, ExprKind::Variable(name) if name == THIS);
        if on_this || generated.variant != GeneratedVariant::NoArg {
            return Ok(candidate);
        }
        Err(TypeError::NoArgMilestonedProperty {
            property,
            stereotype: generated.target,
            span: self.graph.range(id),
        })
    }

    // ── Finalize ─────────────────────────────────────────────────────

    fn finalize(&mut self, id: ExprId, target: FunctionId, ty: TypeDescriptor, mul: Multiplicity) -> Result<(), TypeError> {
        let def = self.model.function(target);
        let name = def.name.clone();
        let (type_params, mul_params) = (def.signature.type_params.clone(), def.signature.mul_params.clone());
        let resolved_types = self.ctx.resolved_type_params(&type_params, self.model);
        let resolved_muls = self.ctx.resolved_mul_params(&mul_params);
        if let Some(call) = self.graph.call_mut(id) {
            call.target = Some(target);
            call.resolved_type_params = resolved_types;
            call.resolved_mul_params = resolved_muls;
        }
        let display = format!("{ty}{mul}");
        self.settle(id, ty, mul);
        self.model.record_application(target, id);

        match name.as_str() {
            builtins::NEW | builtins::COPY => self.trace_key_values(id)?,
            builtins::LET => self.register_let(id)?,
            builtins::GET_ALL => self.check_get_all(id)?,
            _ => {}
        }
        log::debug!("'{name}' resolved to {display}");
        self.record(|| TraceStep::Finalized {
            call: id,
            function: name,
            ty: display,
        });
        Ok(())
    }

    /// Point every key-value of a `new` or `copy` at the call, and check
    /// that each key is a property of the instantiated class.
    fn trace_key_values(&mut self, id: ExprId) -> Result<(), TypeError> {
        let params = self.params_of(id);
        let (Some(&source), Some(&values)) = (params.first(), params.get(2)) else {
            return Ok(());
        };
        let class = self.typed(source).and_then(|(ty, _)| {
            let instance = if ty.raw_name() == Some("Class") {
                ty.type_arguments().first().cloned()?
            } else {
                ty
            };
            instance.raw_name().map(str::to_string)
        });
        let entries = match &self.graph.get(values).kind {
            ExprKind::Collection(items) => items.clone(),
            _ => vec![values],
        };
        for entry in entries {
            let ExprKind::KeyValue { key, .. } = &self.graph.get(entry).kind else {
                continue;
            };
            let key = key.clone();
            if let Some(class) = &class {
                if !self.has_property(class, &key) {
                    return Err(TypeError::PropertyNotFound {
                        property: key,
                        class: class.clone(),
                        span: self.graph.range(entry),
                    });
                }
            }
            self.graph.get_mut(entry).usage = Some(Usage { owner: id, offset: 2 });
        }
        Ok(())
    }

    fn has_property(&self, class: &str, name: &str) -> bool {
        if self.model.find_property(class, name).is_some() {
            return true;
        }
        self.model.ancestors(class).iter().any(|ancestor| {
            self.model.type_id(ancestor).is_some_and(|t| {
                self.model
                    .ty(t)
                    .original_milestoned_properties
                    .iter()
                    .any(|p| self.model.function(*p).name == name)
            })
        })
    }

    /// `letFunction('x', value)` binds `x` in the innermost variable scope.
    fn register_let(&mut self, id: ExprId) -> Result<(), TypeError> {
        let params = self.params_of(id);
        let (Some(&name), Some(&value)) = (params.first(), params.get(1)) else {
            return Ok(());
        };
        let ExprKind::Literal { value: literal, .. } = &self.graph.get(name).kind else {
            return Ok(());
        };
        let variable = literal.trim_matches('\'').to_string();
        let Some((ty, mul)) = self.typed(value) else {
            return Ok(());
        };
        self.scope
            .register_value(&variable, VariableValue::defined_by(ty, mul, value))
            .map_err(|e| TypeError::from(e).with_span(self.graph.range(id)))
    }

    fn check_get_all(&self, id: ExprId) -> Result<(), TypeError> {
        let params = self.params_of(id);
        let Some(&class_ref) = params.first() else {
            return Ok(());
        };
        let ExprKind::ClassRef(class) = &self.graph.get(class_ref).kind else {
            return Ok(());
        };
        match self.model.milestoning(class) {
            Some(stereotype) if params.len() - 1 != stereotype.date_count() => Err(TypeError::GetAllDates {
                class: class.clone(),
                stereotype,
                span: self.graph.range(id),
            }),
            _ => Ok(()),
        }
    }

    // ── Errors ───────────────────────────────────────────────────────

    fn no_match(&self, id: ExprId) -> TypeError {
        let span: TextRange = self.graph.range(id);
        let Some(call) = self.graph.call(id) else {
            return TypeError::NoMatch {
                call: String::new(),
                suggestions: None,
                span,
            };
        };
        let name = call.display_name();
        let shapes: Vec<ArgumentShape> = call.params.iter().map(|p| self.shape(*p)).collect();
        let suggestions = match call.style {
            CallStyle::Function => {
                candidates::suggestions(self.model, name, self.imports, self.options.suggestion_limit)
            }
            CallStyle::Property => None,
        };
        TypeError::NoMatch {
            call: candidates::display_call(name, &shapes),
            suggestions,
            span,
        }
    }
}

/// The columns a relation template refers to: `(a:T)`, `Relation<(a:T)>`
/// or the right side of `Z⊆(a:T)`.
fn reference_columns(template: &TypeDescriptor) -> Option<&[Column]> {
    match template {
        TypeDescriptor::Relation(columns) if !columns.iter().all(Column::is_empty) => Some(columns.as_slice()),
        TypeDescriptor::Operation(_, _, right) => reference_columns(right),
        TypeDescriptor::Concrete(_, args) if args.len() == 1 => reference_columns(&args[0]),
        _ => None,
    }
}
