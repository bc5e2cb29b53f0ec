//! Scoped unification of type and multiplicity parameters.
//!
//! Each call being resolved gets a frame mapping the type parameters of the
//! candidate's signature to inference variables in an `ena` table. Frames
//! form a stack: the outermost frame belongs to the function whose body is
//! checked, and binds that function's own type parameters to themselves
//! (they are the "top" parameters and never resolve further). Lookups walk
//! from a starting frame towards the top.
//!
//! Conflicting bindings do not fail: they are recorded as an `Equal`
//! operation and settled to the best common supertype when read back.

use ena::unify::{InPlace, InPlaceUnificationTable, NoError, Snapshot, UnifyKey, UnifyValue};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::model::{FunctionId, Model, ANY};
use crate::ty::{Column, FunctionType, Multiplicity, OperationKind, ParamType, TypeDescriptor};

/// Upper bound on how deep concretization follows bindings, guarding
/// against self-referential values.
const MAX_DEPTH: u32 = 64;

/// A type inference variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InferVar(pub u32);

impl UnifyKey for InferVar {
    type Value = Option<TypeDescriptor>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        InferVar(u)
    }

    fn tag() -> &'static str {
        "InferVar"
    }
}

/// A multiplicity inference variable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MulVar(pub u32);

impl UnifyKey for MulVar {
    type Value = Option<Multiplicity>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        MulVar(u)
    }

    fn tag() -> &'static str {
        "MulVar"
    }
}

impl UnifyValue for TypeDescriptor {
    type Error = NoError;

    fn unify_values(a: &Self, b: &Self) -> Result<Self, NoError> {
        Ok(merge_bindings(a, b))
    }
}

impl UnifyValue for Multiplicity {
    type Error = NoError;

    fn unify_values(a: &Self, b: &Self) -> Result<Self, NoError> {
        Ok(a.min_subsuming(b))
    }
}

/// Combine two values bound to the same variable. The more informative
/// one wins; a real conflict is kept as `a=b`.
fn merge_bindings(a: &TypeDescriptor, b: &TypeDescriptor) -> TypeDescriptor {
    use TypeDescriptor as T;
    if a == b {
        return a.clone();
    }
    match (a, b) {
        (T::Unresolved, _) => b.clone(),
        (_, T::Unresolved) => a.clone(),
        _ if a.raw_name() == Some(ANY) => b.clone(),
        _ if b.raw_name() == Some(ANY) => a.clone(),
        // Top parameters are terminal.
        (T::TypeParameter(_), _) => a.clone(),
        (_, T::TypeParameter(_)) => b.clone(),
        _ if a.is_empty_column_relation() => b.clone(),
        _ if b.is_empty_column_relation() => a.clone(),
        (T::Operation(OperationKind::Equal, l, r), _) if **l == *b || **r == *b => a.clone(),
        (T::Concrete(a_name, a_args), T::Concrete(b_name, b_args))
            if a_name == b_name && !a_args.is_empty() && a_args.len() == b_args.len() =>
        {
            T::Concrete(
                a_name.clone(),
                a_args.iter().zip(b_args).map(|(x, y)| merge_bindings(x, y)).collect(),
            )
        }
        (T::Function(fa), T::Function(fb)) if fa.params.len() == fb.params.len() => {
            let params = fa
                .params
                .iter()
                .zip(&fb.params)
                .map(|(x, y)| ParamType::new(merge_bindings(&x.ty, &y.ty), narrower(&x.mul, &y.mul)))
                .collect();
            T::function(params, merge_bindings(&fa.ret, &fb.ret), narrower(&fa.ret_mul, &fb.ret_mul))
        }
        _ => T::equal(a.clone(), b.clone()),
    }
}

fn narrower(a: &Multiplicity, b: &Multiplicity) -> Multiplicity {
    if a.subsumes(b) {
        b.clone()
    } else if b.subsumes(a) {
        a.clone()
    } else {
        a.min_subsuming(b)
    }
}

/// Where parameters occurring in an *actual* type are looked up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// The function-defining frame only.
    Top,
    /// The innermost frame and its ancestors.
    Current,
    /// The frame enclosing the innermost one and its ancestors.
    Parent,
}

/// How [`InferenceContext::enter`] obtained its frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Entered {
    Pushed,
    /// An ahead frame prepared by the caller was taken over.
    Adopted,
}

#[derive(Clone, Debug, Default)]
struct Frame {
    scope: Option<FunctionId>,
    types: FxHashMap<String, InferVar>,
    muls: FxHashMap<String, MulVar>,
    ahead: bool,
    adopted: bool,
}

struct Saved {
    types: Snapshot<InPlace<InferVar>>,
    muls: Snapshot<InPlace<MulVar>>,
    type_names: usize,
    mul_names: usize,
    frames: Vec<Frame>,
}

/// A point [`InferenceContext::rollback_to`] can return to.
#[derive(Debug)]
#[must_use]
pub struct ContextSnapshot {
    depth: usize,
}

pub struct InferenceContext {
    types: InPlaceUnificationTable<InferVar>,
    muls: InPlaceUnificationTable<MulVar>,
    /// The parameter name each variable was created for, indexed by var.
    type_names: Vec<String>,
    mul_names: Vec<String>,
    frames: Vec<Frame>,
    top_types: FxHashSet<String>,
    top_muls: FxHashSet<String>,
    saved: Vec<Saved>,
}

impl InferenceContext {
    /// A context whose top frame holds the given type and multiplicity
    /// parameters of the function being checked.
    pub fn new(type_params: &[String], mul_params: &[String]) -> Self {
        let mut ctx = InferenceContext {
            types: InPlaceUnificationTable::new(),
            muls: InPlaceUnificationTable::new(),
            type_names: Vec::new(),
            mul_names: Vec::new(),
            frames: vec![Frame::default()],
            top_types: type_params.iter().cloned().collect(),
            top_muls: mul_params.iter().cloned().collect(),
            saved: Vec::new(),
        };
        for name in type_params {
            let var = ctx.fresh_type_var(name, Some(TypeDescriptor::param(name.clone())));
            ctx.frames[0].types.insert(name.clone(), var);
        }
        for name in mul_params {
            let var = ctx.fresh_mul_var(name, Some(Multiplicity::param(name.clone())));
            ctx.frames[0].muls.insert(name.clone(), var);
        }
        ctx
    }

    fn fresh_type_var(&mut self, name: &str, value: Option<TypeDescriptor>) -> InferVar {
        let var = self.types.new_key(value);
        self.type_names.push(name.to_string());
        var
    }

    fn fresh_mul_var(&mut self, name: &str, value: Option<Multiplicity>) -> MulVar {
        let var = self.muls.new_key(value);
        self.mul_names.push(name.to_string());
        var
    }

    // ── Frames ───────────────────────────────────────────────────────

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Start resolving a call. Takes over a pending ahead frame if the
    /// caller prepared one, otherwise pushes a fresh frame.
    pub fn enter(&mut self, scope: Option<FunctionId>) -> Entered {
        if let Some(frame) = self.frames.last_mut() {
            if frame.ahead && !frame.adopted {
                frame.adopted = true;
                frame.scope = scope;
                return Entered::Adopted;
            }
        }
        self.frames.push(Frame {
            scope,
            ..Frame::default()
        });
        Entered::Pushed
    }

    /// Finish resolving a call. Adopted frames belong to whoever pushed them.
    pub fn leave(&mut self, entered: Entered) {
        if entered == Entered::Pushed {
            self.pop();
        }
    }

    /// Push a frame that the next [`enter`](Self::enter) adopts.
    pub fn push_ahead(&mut self) {
        self.frames.push(Frame {
            ahead: true,
            ..Frame::default()
        });
    }

    /// Pop the innermost frame. The top frame stays.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn scope(&self) -> Option<FunctionId> {
        self.frames.last().and_then(|f| f.scope)
    }

    pub fn set_scope(&mut self, scope: FunctionId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scope = Some(scope);
        }
    }

    /// Whether `name` is a type parameter of the function being checked.
    pub fn is_top(&self, name: &str) -> bool {
        self.top_types.contains(name)
    }

    pub fn is_top_mul(&self, name: &str) -> bool {
        self.top_muls.contains(name)
    }

    /// Whether a resolved type is good enough to hand back to a caller:
    /// fully concrete, or a top parameter.
    pub fn is_settled(&self, ty: &TypeDescriptor) -> bool {
        match ty {
            TypeDescriptor::TypeParameter(name) => self.is_top(name),
            TypeDescriptor::Concrete(_, args) => args.iter().all(|a| self.is_settled(a)),
            TypeDescriptor::Function(ft) => {
                ft.params.iter().all(|p| self.is_settled(&p.ty) && self.is_mul_settled(&p.mul))
                    && self.is_settled(&ft.ret)
                    && self.is_mul_settled(&ft.ret_mul)
            }
            TypeDescriptor::Relation(cols) => cols.iter().all(|c| self.is_settled(&c.ty)),
            _ => false,
        }
    }

    pub fn is_mul_settled(&self, mul: &Multiplicity) -> bool {
        match mul {
            Multiplicity::Parameter(name) => self.is_top_mul(name),
            Multiplicity::Bounds { .. } => true,
        }
    }

    fn start_index(&self, target: Target) -> Option<usize> {
        let last = self.frames.len() - 1;
        match target {
            Target::Top => Some(0),
            Target::Current => Some(last),
            Target::Parent => last.checked_sub(1),
        }
    }

    fn lookup_type(&self, name: &str, target: Target) -> Option<InferVar> {
        let start = self.start_index(target)?;
        let range = if target == Target::Top { 0..=0 } else { 0..=start };
        range.rev().find_map(|i| self.frames[i].types.get(name).copied())
    }

    fn lookup_mul(&self, name: &str, target: Target) -> Option<MulVar> {
        let start = self.start_index(target)?;
        let range = if target == Target::Top { 0..=0 } else { 0..=start };
        range.rev().find_map(|i| self.frames[i].muls.get(name).copied())
    }

    fn local_type_var(&mut self, name: &str) -> InferVar {
        let last = self.frames.len() - 1;
        if let Some(&var) = self.frames[last].types.get(name) {
            return var;
        }
        let var = self.fresh_type_var(name, None);
        self.frames[last].types.insert(name.to_string(), var);
        var
    }

    fn local_mul_var(&mut self, name: &str) -> MulVar {
        let last = self.frames.len() - 1;
        if let Some(&var) = self.frames[last].muls.get(name) {
            return var;
        }
        let var = self.fresh_mul_var(name, None);
        self.frames[last].muls.insert(name.to_string(), var);
        var
    }

    fn target_type_var(&mut self, name: &str, target: Target) -> InferVar {
        if let Some(var) = self.lookup_type(name, target) {
            return var;
        }
        let index = self.start_index(target).unwrap_or(0);
        let var = self.fresh_type_var(name, None);
        self.frames[index].types.insert(name.to_string(), var);
        var
    }

    fn target_mul_var(&mut self, name: &str, target: Target) -> MulVar {
        if let Some(var) = self.lookup_mul(name, target) {
            return var;
        }
        let index = self.start_index(target).unwrap_or(0);
        let var = self.fresh_mul_var(name, None);
        self.frames[index].muls.insert(name.to_string(), var);
        var
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Replace the parameters of an actual type with the variables they
    /// denote in the `target` frame chain.
    fn internalize(&mut self, actual: &TypeDescriptor, target: Target) -> TypeDescriptor {
        use TypeDescriptor as T;
        match actual {
            T::TypeParameter(name) => T::Var(self.target_type_var(name, target)),
            T::Concrete(name, args) => T::Concrete(
                name.clone(),
                args.iter().map(|a| self.internalize(a, target)).collect(),
            ),
            T::Operation(kind, l, r) => T::Operation(
                *kind,
                Box::new(self.internalize(l, target)),
                Box::new(self.internalize(r, target)),
            ),
            T::Function(ft) => {
                let params = ft
                    .params
                    .iter()
                    .map(|p| ParamType::new(self.internalize(&p.ty, target), p.mul.clone()))
                    .collect();
                let ret = self.internalize(&ft.ret, target);
                T::function(params, ret, ft.ret_mul.clone())
            }
            T::Relation(cols) => T::Relation(
                cols.iter()
                    .map(|c| Column {
                        name: c.name.clone(),
                        ty: self.internalize(&c.ty, target),
                        mul: c.mul.clone(),
                    })
                    .collect(),
            ),
            T::Var(_) | T::Unresolved => actual.clone(),
        }
    }

    /// Bind every type parameter of `template` (in the innermost frame) to
    /// the matching part of `actual`. Parameters occurring in `actual` are
    /// resolved in `target`.
    pub fn register(&mut self, template: &TypeDescriptor, actual: &TypeDescriptor, target: Target) {
        use TypeDescriptor as T;
        match (template, actual) {
            (_, T::Unresolved) => {}
            (T::TypeParameter(name), _) => {
                let var = self.local_type_var(name);
                match self.internalize(actual, target) {
                    T::Var(other) => self.types.union(var, other),
                    value => self.types.union_value(var, Some(value)),
                }
                log::trace!("register {name} := {actual}");
            }
            (T::Operation(OperationKind::Subset, left, _), _) => {
                self.register(left, actual, target);
            }
            (T::Concrete(_, t_args), T::Concrete(_, a_args)) if t_args.len() == a_args.len() => {
                for (t, a) in t_args.iter().zip(a_args) {
                    self.register(t, a, target);
                }
            }
            (T::Function(t_ft), T::Function(a_ft)) => self.register_function(t_ft, a_ft, target),
            (T::Relation(t_cols), T::Relation(a_cols)) => {
                for t in t_cols {
                    if let Some(a) = a_cols.iter().find(|a| a.name == t.name) {
                        self.register(&t.ty, &a.ty, target);
                    }
                }
            }
            _ => {}
        }
    }

    fn register_function(&mut self, template: &FunctionType, actual: &FunctionType, target: Target) {
        for (t, a) in template.params.iter().zip(&actual.params) {
            self.register(&t.ty, &a.ty, target);
            self.register_mul(&t.mul, &a.mul, target);
        }
        self.register(&template.ret, &actual.ret, target);
        self.register_mul(&template.ret_mul, &actual.ret_mul, target);
    }

    /// Multiplicity analogue of [`register`](Self::register). Conflicts
    /// merge to the narrowest multiplicity subsuming both.
    pub fn register_mul(&mut self, template: &Multiplicity, actual: &Multiplicity, target: Target) {
        let Multiplicity::Parameter(name) = template else {
            return;
        };
        let var = self.local_mul_var(name);
        match actual {
            Multiplicity::Parameter(other) => {
                let other = self.target_mul_var(other, target);
                self.muls.union(var, other);
            }
            bounds => self.muls.union_value(var, Some(bounds.clone())),
        }
    }

    // ── Reading back ─────────────────────────────────────────────────

    /// Substitute every bound parameter of `template`, looking parameters
    /// up from the innermost frame. Unbound parameters stay as they are.
    pub fn make_as_concrete(&mut self, template: &TypeDescriptor, model: &Model) -> TypeDescriptor {
        self.make_as_concrete_from(template, model, Target::Current)
    }

    pub fn make_as_concrete_from(
        &mut self,
        template: &TypeDescriptor,
        model: &Model,
        target: Target,
    ) -> TypeDescriptor {
        self.concretize(template, model, target, 0)
    }

    fn concretize(&mut self, ty: &TypeDescriptor, model: &Model, target: Target, depth: u32) -> TypeDescriptor {
        use TypeDescriptor as T;
        if depth > MAX_DEPTH {
            return ty.clone();
        }
        match ty {
            T::TypeParameter(name) => match self.lookup_type(name, target) {
                Some(var) => match self.types.probe_value(var) {
                    Some(value) => self.resolve_value(&value, model, depth + 1),
                    None => ty.clone(),
                },
                None => ty.clone(),
            },
            T::Var(_) => self.resolve_value(ty, model, depth + 1),
            T::Concrete(name, args) => T::Concrete(
                name.clone(),
                args.iter().map(|a| self.concretize(a, model, target, depth + 1)).collect(),
            ),
            T::Operation(OperationKind::Equal, l, r) => {
                let l = self.concretize(l, model, target, depth + 1);
                let r = self.concretize(r, model, target, depth + 1);
                settle(l, r, model)
            }
            T::Operation(kind, l, r) => T::Operation(
                *kind,
                Box::new(self.concretize(l, model, target, depth + 1)),
                Box::new(self.concretize(r, model, target, depth + 1)),
            ),
            T::Function(ft) => {
                let params = ft
                    .params
                    .iter()
                    .map(|p| {
                        ParamType::new(
                            self.concretize(&p.ty, model, target, depth + 1),
                            self.make_mul_concrete_from(&p.mul, target),
                        )
                    })
                    .collect();
                let ret = self.concretize(&ft.ret, model, target, depth + 1);
                let ret_mul = self.make_mul_concrete_from(&ft.ret_mul, target);
                T::function(params, ret, ret_mul)
            }
            T::Relation(cols) => T::Relation(
                cols.iter()
                    .map(|c| Column {
                        name: c.name.clone(),
                        ty: self.concretize(&c.ty, model, target, depth + 1),
                        mul: c.mul.clone(),
                    })
                    .collect(),
            ),
            T::Unresolved => T::Unresolved,
        }
    }

    /// Resolve a value stored in the table. Variables are followed; named
    /// parameters in values are top parameters and are left alone.
    fn resolve_value(&mut self, value: &TypeDescriptor, model: &Model, depth: u32) -> TypeDescriptor {
        use TypeDescriptor as T;
        if depth > MAX_DEPTH {
            return value.clone();
        }
        match value {
            T::Var(var) => match self.types.probe_value(*var) {
                Some(inner) => self.resolve_value(&inner, model, depth + 1),
                None => {
                    let root = self.types.find(*var);
                    T::param(self.type_names[root.0 as usize].clone())
                }
            },
            T::TypeParameter(_) | T::Unresolved => value.clone(),
            T::Concrete(name, args) => T::Concrete(
                name.clone(),
                args.iter().map(|a| self.resolve_value(a, model, depth + 1)).collect(),
            ),
            T::Operation(OperationKind::Equal, l, r) => {
                let l = self.resolve_value(l, model, depth + 1);
                let r = self.resolve_value(r, model, depth + 1);
                settle(l, r, model)
            }
            T::Operation(kind, l, r) => T::Operation(
                *kind,
                Box::new(self.resolve_value(l, model, depth + 1)),
                Box::new(self.resolve_value(r, model, depth + 1)),
            ),
            T::Function(ft) => {
                let params = ft
                    .params
                    .iter()
                    .map(|p| ParamType::new(self.resolve_value(&p.ty, model, depth + 1), p.mul.clone()))
                    .collect();
                let ret = self.resolve_value(&ft.ret, model, depth + 1);
                T::function(params, ret, ft.ret_mul.clone())
            }
            T::Relation(cols) => T::Relation(
                cols.iter()
                    .map(|c| Column {
                        name: c.name.clone(),
                        ty: self.resolve_value(&c.ty, model, depth + 1),
                        mul: c.mul.clone(),
                    })
                    .collect(),
            ),
        }
    }

    pub fn make_mul_concrete(&mut self, template: &Multiplicity) -> Multiplicity {
        self.make_mul_concrete_from(template, Target::Current)
    }

    pub fn make_mul_concrete_from(&mut self, template: &Multiplicity, target: Target) -> Multiplicity {
        let Multiplicity::Parameter(name) = template else {
            return template.clone();
        };
        match self.lookup_mul(name, target) {
            Some(var) => self.muls.probe_value(var).unwrap_or_else(|| template.clone()),
            None => template.clone(),
        }
    }

    /// The current values of `names` in the innermost frame.
    pub fn resolved_type_params(&mut self, names: &[String], model: &Model) -> Vec<(String, TypeDescriptor)> {
        names
            .iter()
            .map(|n| (n.clone(), self.make_as_concrete(&TypeDescriptor::param(n.clone()), model)))
            .collect()
    }

    pub fn resolved_mul_params(&mut self, names: &[String]) -> Vec<(String, Multiplicity)> {
        names
            .iter()
            .map(|n| (n.clone(), self.make_mul_concrete(&Multiplicity::param(n.clone()))))
            .collect()
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn snapshot(&mut self) -> ContextSnapshot {
        self.saved.push(Saved {
            types: self.types.snapshot(),
            muls: self.muls.snapshot(),
            type_names: self.type_names.len(),
            mul_names: self.mul_names.len(),
            frames: self.frames.clone(),
        });
        ContextSnapshot {
            depth: self.saved.len() - 1,
        }
    }

    /// Undo every binding, variable and frame change made since `snapshot`.
    pub fn rollback_to(&mut self, snapshot: ContextSnapshot) {
        self.commit_above(snapshot.depth);
        if let Some(saved) = self.saved.pop() {
            self.types.rollback_to(saved.types);
            self.muls.rollback_to(saved.muls);
            self.type_names.truncate(saved.type_names);
            self.mul_names.truncate(saved.mul_names);
            self.frames = saved.frames;
            log::debug!("inference context rolled back to depth {}", self.frames.len());
        }
    }

    /// Keep everything done since `snapshot`.
    pub fn commit(&mut self, snapshot: ContextSnapshot) {
        self.commit_above(snapshot.depth);
        if let Some(saved) = self.saved.pop() {
            self.types.commit(saved.types);
            self.muls.commit(saved.muls);
        }
    }

    fn commit_above(&mut self, depth: usize) {
        while self.saved.len() > depth + 1 {
            if let Some(inner) = self.saved.pop() {
                self.types.commit(inner.types);
                self.muls.commit(inner.muls);
            }
        }
    }
}

/// Settle a recorded conflict between two bindings.
fn settle(l: TypeDescriptor, r: TypeDescriptor, model: &Model) -> TypeDescriptor {
    if l == r {
        return l;
    }
    match (l.is_fully_concrete(), r.is_fully_concrete()) {
        (true, false) => l,
        (false, true) => r,
        _ => model.best_common_type(&l, &r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(name: &str) -> TypeDescriptor {
        TypeDescriptor::param(name)
    }

    fn c(name: &str) -> TypeDescriptor {
        TypeDescriptor::concrete(name)
    }

    fn list(arg: TypeDescriptor) -> TypeDescriptor {
        TypeDescriptor::generic("List", vec![arg])
    }

    #[test]
    fn registers_nested_parameters() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.register(&list(t("T")), &list(c("String")), Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("String"));
        assert_eq!(ctx.make_as_concrete(&list(t("T")), &model), list(c("String")));
        assert_eq!(ctx.make_as_concrete(&t("V"), &model), t("V"));
    }

    #[test]
    fn conflicting_bindings_settle_to_common_supertype() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.register(&t("T"), &c("Integer"), Target::Top);
        ctx.register(&t("T"), &c("Float"), Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("Number"));
    }

    #[test]
    fn concretization_is_idempotent() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.register(&t("T"), &c("Integer"), Target::Top);
        let once = ctx.make_as_concrete(&list(t("T")), &model);
        let twice = ctx.make_as_concrete(&once, &model);
        assert_eq!(once, twice);
    }

    #[test]
    fn top_parameters_are_terminal() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&["T".to_string()], &["m".to_string()]);
        ctx.enter(None);
        // map<T,V> called inside f<T>: the callee's T binds to the caller's T.
        ctx.register(&t("T"), &t("T"), Target::Top);
        ctx.register_mul(&Multiplicity::param("n"), &Multiplicity::param("m"), Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), t("T"));
        assert!(ctx.is_top("T"));
        assert!(ctx.is_settled(&t("T")));
        assert!(!ctx.is_settled(&t("V")));
        assert_eq!(ctx.make_mul_concrete(&Multiplicity::param("n")), Multiplicity::param("m"));
    }

    #[test]
    fn multiplicities_merge_to_min_subsuming() {
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        let m = Multiplicity::param("m");
        ctx.register_mul(&m, &Multiplicity::one(), Target::Top);
        ctx.register_mul(&m, &Multiplicity::zero_one(), Target::Top);
        assert_eq!(ctx.make_mul_concrete(&m), Multiplicity::zero_one());
    }

    #[test]
    fn function_types_register_params_and_return() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        let template = TypeDescriptor::function_of(
            vec![ParamType::new(t("T"), Multiplicity::one())],
            t("V"),
            Multiplicity::param("n"),
        );
        let actual = TypeDescriptor::lambda_of(FunctionType {
            params: vec![ParamType::new(c("Integer"), Multiplicity::one())],
            ret: c("String"),
            ret_mul: Multiplicity::many(),
        });
        ctx.register(&template, &actual, Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("V"), &model), c("String"));
        assert_eq!(ctx.make_mul_concrete(&Multiplicity::param("n")), Multiplicity::many());
    }

    #[test]
    fn frames_are_consulted_child_to_parent() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.register(&t("T"), &c("String"), Target::Top);
        let entered = ctx.enter(None);
        assert_eq!(entered, Entered::Pushed);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("String"));
        ctx.register(&t("T"), &c("Integer"), Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("Integer"));
        ctx.leave(entered);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("String"));
    }

    #[test]
    fn parent_target_links_to_enclosing_frame() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.enter(None);
        // A nested frame binds its own V to the enclosing frame's U.
        ctx.register(&t("V"), &t("U"), Target::Parent);
        ctx.register(&t("V"), &c("Integer"), Target::Current);
        ctx.pop();
        assert_eq!(ctx.make_as_concrete(&t("U"), &model), c("Integer"));
    }

    #[test]
    fn ahead_frame_is_adopted_once() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.push_ahead();
        ctx.register(&t("V"), &c("String"), Target::Top);
        let depth = ctx.depth();
        assert_eq!(ctx.enter(None), Entered::Adopted);
        assert_eq!(ctx.depth(), depth);
        assert_eq!(ctx.make_as_concrete(&t("V"), &model), c("String"));
        assert_eq!(ctx.enter(None), Entered::Pushed);
    }

    #[test]
    fn rollback_discards_bindings_and_frames() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        ctx.register(&t("T"), &c("String"), Target::Top);
        let snapshot = ctx.snapshot();
        ctx.register(&t("V"), &c("Integer"), Target::Top);
        ctx.enter(None);
        ctx.rollback_to(snapshot);
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.make_as_concrete(&t("T"), &model), c("String"));
        assert_eq!(ctx.make_as_concrete(&t("V"), &model), t("V"));
    }

    #[test]
    fn function_bindings_merge_towards_the_specific_side() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        let param = vec![ParamType::new(c("String"), Multiplicity::one())];
        let expected = TypeDescriptor::function(param.clone(), c(ANY), Multiplicity::many());
        let actual = TypeDescriptor::function(param.clone(), c("Integer"), Multiplicity::one());
        ctx.register(&t("U"), &expected, Target::Top);
        ctx.register(&t("U"), &actual, Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("U"), &model), actual);
    }

    #[test]
    fn empty_columns_yield_to_typed_relation() {
        let model = Model::new();
        let mut ctx = InferenceContext::new(&[], &[]);
        ctx.enter(None);
        let empty = TypeDescriptor::relation(vec![Column::empty("a")]);
        let typed = TypeDescriptor::relation(vec![Column::new("a", c("Integer"))]);
        ctx.register(&t("Z"), &empty, Target::Top);
        ctx.register(&t("Z"), &typed, Target::Top);
        assert_eq!(ctx.make_as_concrete(&t("Z"), &model), typed);
    }
}
