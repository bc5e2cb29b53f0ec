//! Expression graph.
//!
//! Nodes live in an arena and are addressed by [`ExprId`]. Resolution
//! mutates nodes in place: it binds call targets, records resolved types and
//! multiplicities, and rewrites calls (automap, enumeration access,
//! milestoning dates). [`ExprGraph::unbind`] reverses all of that for a
//! subtree so it can be resolved again.

use rowan::TextRange;
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::model::FunctionId;
use crate::ty::{Column, Multiplicity, TypeDescriptor};

/// A stable handle to a node in an [`ExprGraph`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExprId(pub u32);

/// The call that consumes an expression, and at which argument position.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Usage {
    pub owner: ExprId,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LambdaParam {
    pub name: String,
    /// `None` until specialized from the parameter slot's template.
    pub ty: Option<TypeDescriptor>,
    pub mul: Option<Multiplicity>,
    /// The type was specialized from a parameter slot, not declared.
    pub inferred: bool,
}

impl LambdaParam {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            mul: None,
            inferred: false,
        }
    }

    pub fn typed(name: impl Into<String>, ty: TypeDescriptor, mul: Multiplicity) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
            mul: Some(mul),
            inferred: false,
        }
    }

    /// Give an undeclared parameter the type its slot expects.
    pub fn specialize(&mut self, ty: TypeDescriptor, mul: Multiplicity) {
        self.ty = Some(ty);
        self.mul = Some(mul);
        self.inferred = true;
    }

    pub fn is_typed(&self) -> bool {
        self.ty.is_some() && self.mul.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lambda {
    pub params: Vec<LambdaParam>,
    pub body: Vec<ExprId>,
    /// Set by the automap rewrite.
    pub generated: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CallStyle {
    /// `f(a, b)`
    Function,
    /// `$a.p` or `$a.p(b)`: the receiver is the first parameter.
    Property,
}

/// What a milestoning date rewrite replaced, kept for undo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MilestoningRewrite {
    /// `None` when the call had no candidate of its own arity.
    pub original_target: Option<FunctionId>,
    pub original_params: Vec<ExprId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallExpr {
    pub style: CallStyle,
    /// The name used at the call site. `None` for a call whose target was
    /// bound when the graph was built.
    pub name: Option<String>,
    pub target: Option<FunctionId>,
    pub params: Vec<ExprId>,
    pub resolved_type_params: Vec<(String, TypeDescriptor)>,
    pub resolved_mul_params: Vec<(String, Multiplicity)>,
    pub milestoning: Option<MilestoningRewrite>,
    /// The property call an automap or enumeration rewrite replaced.
    pub rewritten_from: Option<Box<CallExpr>>,
    /// Nodes an earlier rewrite of this call allocated. Repeating the
    /// rewrite after [`ExprGraph::unbind`] reuses them.
    pub generated: Vec<ExprId>,
}

impl CallExpr {
    pub fn new(style: CallStyle, name: Option<String>, params: Vec<ExprId>) -> Self {
        Self {
            style,
            name,
            target: None,
            params,
            resolved_type_params: Vec::new(),
            resolved_mul_params: Vec::new(),
            milestoning: None,
            rewritten_from: None,
            generated: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<bound>")
    }

    /// Restore the target and parameters a milestoning rewrite replaced.
    /// Returns false when the call was not rewritten.
    pub fn undo_milestoning(&mut self) -> bool {
        match self.milestoning.take() {
            Some(rewrite) => {
                self.target = rewrite.original_target;
                self.params = rewrite.original_params;
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
    /// A literal with its declared type, such as `1`, `'a'` or `%2015`.
    Literal { value: String, ty: TypeDescriptor },
    Variable(String),
    /// A class used as a value: `Product` in `Product.all()`.
    ClassRef(String),
    /// An enumeration used as a value: `Side` in `Side.Buy`.
    EnumRef(String),
    Collection(Vec<ExprId>),
    /// `key = value` inside `new`/`copy`.
    KeyValue { key: String, value: ExprId },
    /// A relation placeholder such as `@(a:?, b:?)` whose column types are
    /// inferred from the call it is passed to.
    RelationLiteral(Vec<Column>),
    Lambda(Lambda),
    Call(CallExpr),
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: TextRange,
    pub ty: Option<TypeDescriptor>,
    pub mul: Option<Multiplicity>,
    pub processed: bool,
    pub usage: Option<Usage>,
}

#[derive(Clone, Debug, Default)]
pub struct ExprGraph {
    nodes: Vec<Expr>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ExprKind) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(Expr {
            kind,
            range: TextRange::default(),
            ty: None,
            mul: None,
            processed: false,
            usage: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node with its id, in allocation order.
    pub fn nodes(&self) -> impl Iterator<Item = (ExprId, &Expr)> {
        self.nodes.iter().enumerate().map(|(i, n)| (ExprId(i as u32), n))
    }

    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.0 as usize]
    }

    pub fn call(&self, id: ExprId) -> Option<&CallExpr> {
        match &self.get(id).kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn call_mut(&mut self, id: ExprId) -> Option<&mut CallExpr> {
        match &mut self.get_mut(id).kind {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn lambda(&self, id: ExprId) -> Option<&Lambda> {
        match &self.get(id).kind {
            ExprKind::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    pub fn lambda_mut(&mut self, id: ExprId) -> Option<&mut Lambda> {
        match &mut self.get_mut(id).kind {
            ExprKind::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    pub fn is_lambda(&self, id: ExprId) -> bool {
        self.lambda(id).is_some()
    }

    pub fn range(&self, id: ExprId) -> TextRange {
        self.get(id).range
    }

    pub fn set_range(&mut self, id: ExprId, range: TextRange) {
        self.get_mut(id).range = range;
    }

    pub fn set_type(&mut self, id: ExprId, ty: TypeDescriptor, mul: Multiplicity) {
        let node = self.get_mut(id);
        node.ty = Some(ty);
        node.mul = Some(mul);
    }

    /// Direct children in evaluation order.
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match &self.get(id).kind {
            ExprKind::Call(call) => call.params.clone(),
            ExprKind::Lambda(lambda) => lambda.body.clone(),
            ExprKind::Collection(items) => items.clone(),
            ExprKind::KeyValue { value, .. } => vec![*value],
            ExprKind::Literal { .. }
            | ExprKind::Variable(_)
            | ExprKind::ClassRef(_)
            | ExprKind::EnumRef(_)
            | ExprKind::RelationLiteral(_) => Vec::new(),
        }
    }

    /// Clear everything resolution recorded on `id` and its descendants,
    /// undoing call rewrites. Returns every node visited.
    pub fn unbind(&mut self, id: ExprId) -> Vec<ExprId> {
        let mut seen = FxHashSet::default();
        let mut visited = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            visited.push(current);
            let node = self.get_mut(current);
            node.processed = false;
            match &mut node.kind {
                ExprKind::Call(call) => {
                    if let Some(original) = call.rewritten_from.take() {
                        let rewritten = std::mem::replace(call, *original);
                        // Generated nodes are unbound too so the rewrite can reuse them.
                        stack.extend(rewritten.params);
                    }
                    call.undo_milestoning();
                    if call.name.is_some() {
                        call.target = None;
                    }
                    call.resolved_type_params.clear();
                    call.resolved_mul_params.clear();
                    node.ty = None;
                    node.mul = None;
                }
                ExprKind::Lambda(lambda) => {
                    for param in lambda.params.iter_mut().filter(|p| p.inferred) {
                        *param = LambdaParam::untyped(param.name.clone());
                    }
                    if !lambda.params.iter().all(LambdaParam::is_typed) {
                        node.ty = None;
                        node.mul = None;
                    }
                }
                ExprKind::RelationLiteral(columns) => {
                    node.ty = Some(TypeDescriptor::relation(columns.clone()));
                }
                _ => {
                    node.ty = None;
                    node.mul = None;
                }
            }
            stack.extend(self.children(current));
        }
        visited
    }

    /// Mark `id` and its descendants for reprocessing without touching
    /// their bindings.
    pub fn mark_not_processed(&mut self, id: ExprId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            self.get_mut(current).processed = false;
            stack.extend(self.children(current));
        }
    }

    // ── Building ─────────────────────────────────────────────────────

    pub fn literal(&mut self, value: impl Into<String>, ty: TypeDescriptor) -> ExprId {
        self.alloc(ExprKind::Literal {
            value: value.into(),
            ty,
        })
    }

    pub fn integer(&mut self, value: i64) -> ExprId {
        self.literal(value.to_string(), TypeDescriptor::concrete("Integer"))
    }

    pub fn string(&mut self, value: &str) -> ExprId {
        self.literal(format!("'{value}'"), TypeDescriptor::concrete("String"))
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.literal(value.to_string(), TypeDescriptor::concrete("Boolean"))
    }

    /// A date literal without its `%`. `2015` is a `Date`, `2017-5-26` a
    /// `StrictDate` and anything with a time a `DateTime`.
    pub fn date(&mut self, value: &str) -> ExprId {
        let ty = if value.contains('T') {
            "DateTime"
        } else if value.split('-').count() == 3 {
            "StrictDate"
        } else {
            "Date"
        };
        self.literal(format!("%{value}"), TypeDescriptor::concrete(ty))
    }

    pub fn variable(&mut self, name: &str) -> ExprId {
        self.alloc(ExprKind::Variable(name.to_string()))
    }

    pub fn class_ref(&mut self, name: &str) -> ExprId {
        self.alloc(ExprKind::ClassRef(name.to_string()))
    }

    pub fn enum_ref(&mut self, name: &str) -> ExprId {
        self.alloc(ExprKind::EnumRef(name.to_string()))
    }

    pub fn collection(&mut self, items: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::Collection(items))
    }

    pub fn key_value(&mut self, key: &str, value: ExprId) -> ExprId {
        self.alloc(ExprKind::KeyValue {
            key: key.to_string(),
            value,
        })
    }

    /// `@(a:?, b:?)`: a relation whose columns are all still untyped.
    pub fn empty_columns(&mut self, names: &[&str]) -> ExprId {
        let columns = names.iter().map(|n| Column::empty(*n)).collect();
        self.alloc(ExprKind::RelationLiteral(columns))
    }

    pub fn new_lambda(&mut self, params: Vec<LambdaParam>, body: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::Lambda(Lambda {
            params,
            body,
            generated: false,
        }))
    }

    /// `{x | body}` with an untyped parameter.
    pub fn lambda1(&mut self, param: &str, body: ExprId) -> ExprId {
        self.new_lambda(vec![LambdaParam::untyped(param)], vec![body])
    }

    pub fn new_call(&mut self, name: &str, params: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::Call(CallExpr::new(
            CallStyle::Function,
            Some(name.to_string()),
            params,
        )))
    }

    /// A call whose target is already known.
    pub fn bound_call(&mut self, target: FunctionId, params: Vec<ExprId>) -> ExprId {
        let mut call = CallExpr::new(CallStyle::Function, None, params);
        call.target = Some(target);
        self.alloc(ExprKind::Call(call))
    }

    /// `$receiver.name(args)`.
    pub fn property(&mut self, receiver: ExprId, name: &str, args: Vec<ExprId>) -> ExprId {
        let params = std::iter::once(receiver).chain(args).collect();
        self.alloc(ExprKind::Call(CallExpr::new(
            CallStyle::Property,
            Some(name.to_string()),
            params,
        )))
    }

    /// A property chain on `receiver`: `$receiver.a.b.c`.
    pub fn path(&mut self, receiver: ExprId, names: &[&str]) -> ExprId {
        names
            .iter()
            .fold(receiver, |current, name| self.property(current, name, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_follow_kind() {
        let mut g = ExprGraph::new();
        let p = g.variable("p");
        let name = g.property(p, "name", Vec::new());
        let lambda = g.lambda1("p", name);
        assert_eq!(g.children(name), vec![p]);
        assert_eq!(g.children(lambda), vec![name]);
        assert!(g.children(p).is_empty());
    }

    #[test]
    fn date_literal_types() {
        let mut g = ExprGraph::new();
        let year = g.date("2015");
        let day = g.date("2017-5-26");
        let Expr { kind, .. } = g.get(year);
        assert_eq!(
            kind,
            &ExprKind::Literal {
                value: "%2015".into(),
                ty: TypeDescriptor::concrete("Date")
            }
        );
        match &g.get(day).kind {
            ExprKind::Literal { ty, .. } => assert_eq!(ty.raw_name(), Some("StrictDate")),
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn unbind_clears_named_targets_and_types() {
        let mut g = ExprGraph::new();
        let a = g.integer(1);
        let call = g.new_call("plus", vec![a]);
        g.call_mut(call).unwrap().target = Some(FunctionId(3));
        g.set_type(call, TypeDescriptor::concrete("Integer"), Multiplicity::one());
        g.set_type(a, TypeDescriptor::concrete("Integer"), Multiplicity::one());
        g.get_mut(call).processed = true;

        let visited = g.unbind(call);
        assert_eq!(visited, vec![call, a]);
        assert_eq!(g.call(call).unwrap().target, None);
        assert_eq!(g.get(call).ty, None);
        assert_eq!(g.get(a).ty, None);
        assert!(!g.get(call).processed);
    }

    #[test]
    fn unbind_forgets_inferred_lambda_params() {
        let mut g = ExprGraph::new();
        let body = g.variable("x");
        let declared = LambdaParam::typed("y", TypeDescriptor::concrete("String"), Multiplicity::one());
        let lambda = g.new_lambda(vec![LambdaParam::untyped("x"), declared.clone()], vec![body]);
        g.lambda_mut(lambda).unwrap().params[0].specialize(TypeDescriptor::concrete("Integer"), Multiplicity::one());
        g.set_type(lambda, TypeDescriptor::concrete("LambdaFunction"), Multiplicity::one());

        g.unbind(lambda);
        let params = &g.lambda(lambda).unwrap().params;
        assert_eq!(params[0], LambdaParam::untyped("x"));
        assert_eq!(params[1], declared);
        assert_eq!(g.get(lambda).ty, None);
    }

    #[test]
    fn mark_not_processed_keeps_types() {
        let mut g = ExprGraph::new();
        let a = g.integer(1);
        let call = g.new_call("toOne", vec![a]);
        for id in [a, call] {
            g.set_type(id, TypeDescriptor::concrete("Integer"), Multiplicity::one());
            g.get_mut(id).processed = true;
        }
        g.call_mut(call).unwrap().target = Some(FunctionId(4));

        g.mark_not_processed(call);
        assert!(!g.get(call).processed);
        assert!(!g.get(a).processed);
        assert_eq!(g.get(a).ty, Some(TypeDescriptor::concrete("Integer")));
        assert_eq!(g.call(call).unwrap().target, Some(FunctionId(4)));
    }

    #[test]
    fn unbind_keeps_bound_targets() {
        let mut g = ExprGraph::new();
        let call = g.bound_call(FunctionId(7), Vec::new());
        g.unbind(call);
        assert_eq!(g.call(call).unwrap().target, Some(FunctionId(7)));
    }

    #[test]
    fn unbind_restores_rewritten_call() {
        let mut g = ExprGraph::new();
        let src = g.variable("xs");
        let call = g.property(src, "name", Vec::new());
        let original = g.call(call).unwrap().clone();
        let lambda = g.lambda1("v_automap", src);
        let node = g.call_mut(call).unwrap();
        node.style = CallStyle::Function;
        node.name = Some("map".into());
        node.params = vec![src, lambda];
        node.rewritten_from = Some(Box::new(original.clone()));

        g.unbind(call);
        assert_eq!(g.call(call).unwrap(), &original);
    }

    #[test]
    fn unbind_clears_nodes_the_rewrite_introduced() {
        let mut g = ExprGraph::new();
        let src = g.variable("xs");
        let call = g.property(src, "name", Vec::new());
        let original = g.call(call).unwrap().clone();
        let v = g.variable("v_automap");
        let inner = g.property(v, "name", Vec::new());
        let lambda = g.lambda1("v_automap", inner);
        g.set_type(inner, TypeDescriptor::concrete("String"), Multiplicity::one());
        g.get_mut(inner).processed = true;
        let node = g.call_mut(call).unwrap();
        node.name = Some("map".into());
        node.params = vec![src, lambda];
        node.rewritten_from = Some(Box::new(original));

        let visited = g.unbind(call);
        assert!(visited.contains(&inner));
        assert_eq!(visited.iter().filter(|id| **id == src).count(), 1);
        assert!(g.get(inner).ty.is_none());
        assert!(!g.get(inner).processed);
    }

    #[test]
    fn undo_milestoning_restores_params() {
        let mut call = CallExpr::new(CallStyle::Property, Some("p".into()), vec![ExprId(0), ExprId(5)]);
        call.target = Some(FunctionId(2));
        call.milestoning = Some(MilestoningRewrite {
            original_target: Some(FunctionId(1)),
            original_params: vec![ExprId(0)],
        });
        assert!(call.undo_milestoning());
        assert_eq!(call.target, Some(FunctionId(1)));
        assert_eq!(call.params, vec![ExprId(0)]);
        assert!(!call.undo_milestoning());
    }

    #[test]
    fn path_builds_nested_properties() {
        let mut g = ExprGraph::new();
        let p = g.variable("p");
        let chain = g.path(p, &["classification", "exchangeName"]);
        let outer = g.call(chain).unwrap();
        assert_eq!(outer.name.as_deref(), Some("exchangeName"));
        let inner = g.call(outer.params[0]).unwrap();
        assert_eq!(inner.name.as_deref(), Some("classification"));
        assert_eq!(inner.params, vec![p]);
    }
}
