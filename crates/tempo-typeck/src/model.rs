//! The metamodel that resolution runs against.
//!
//! Types (primitives, classes, enumerations and the built-in meta types),
//! the properties and qualified properties owned by classes, and the
//! function library. Types are addressed by their simple name, which is
//! unique within a model; the package of every element is tracked in a
//! [`PackageTree`] for visibility checks.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tempo_common::package::{split_path, PackageId, PackageTree};

use crate::graph::ExprId;
use crate::milestoning::catalog::{GeneratedProperty, MilestoningStereotype};
use crate::ty::{Column, Multiplicity, TypeDescriptor};

pub const ANY: &str = "Any";
pub const NIL: &str = "Nil";

/// A unique identifier for a type within a [`Model`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// A unique identifier for a function, property or qualified property.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Primitive,
    Class,
    Enumeration(Vec<String>),
    /// Built-in meta types such as `Class`, `Function` or `Relation`.
    Meta,
}

#[derive(Clone, Debug)]
pub struct TypeDef {
    pub id: TypeId,
    pub name: String,
    pub package: PackageId,
    pub kind: TypeKind,
    pub type_params: Vec<String>,
    /// Direct supertypes, by name.
    pub generalizations: Vec<String>,
    pub stereotypes: Vec<String>,
    pub properties: Vec<FunctionId>,
    pub qualified_properties: Vec<FunctionId>,
    /// Declared properties that milestoning replaced with generated ones.
    pub original_milestoned_properties: Vec<FunctionId>,
}

impl TypeDef {
    pub fn is_class(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn is_enumeration(&self) -> bool {
        matches!(self.kind, TypeKind::Enumeration(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeDescriptor,
    pub mul: Multiplicity,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor, mul: Multiplicity) -> Self {
        Self {
            name: name.into(),
            ty,
            mul,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub type_params: Vec<String>,
    pub mul_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: TypeDescriptor,
    pub ret_mul: Multiplicity,
}

impl Signature {
    pub fn new(params: Vec<Param>, ret: TypeDescriptor, ret_mul: Multiplicity) -> Self {
        let mut type_params = Vec::new();
        params
            .iter()
            .for_each(|p| p.ty.collect_type_parameters(&mut type_params));
        ret.collect_type_parameters(&mut type_params);
        type_params.sort();
        let mut mul_params: Vec<String> = params
            .iter()
            .map(|p| &p.mul)
            .chain(std::iter::once(&ret_mul))
            .filter_map(|m| m.parameter_name().map(str::to_string))
            .collect();
        mul_params.sort();
        mul_params.dedup();
        Self {
            type_params,
            mul_params,
            params,
            ret,
            ret_mul,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Native,
    Concrete,
    Property { owner: TypeId },
    QualifiedProperty { owner: TypeId },
    /// Column access on a relation type.
    ColumnAccessor,
}

#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub id: FunctionId,
    pub name: String,
    pub package: PackageId,
    pub kind: FunctionKind,
    pub signature: Signature,
    pub stereotypes: Vec<String>,
    /// Set on properties synthesized from a milestoned property.
    pub generated: Option<GeneratedProperty>,
    /// Every call expression finalized against this function.
    pub applications: Vec<ExprId>,
}

impl FunctionDef {
    pub fn arity(&self) -> usize {
        self.signature.params.len()
    }

    /// How the function is named in diagnostics.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            FunctionKind::Property { .. } | FunctionKind::ColumnAccessor => "property",
            FunctionKind::QualifiedProperty { .. } => "qualified property",
            FunctionKind::Native | FunctionKind::Concrete => "function",
        }
    }

    /// A generated qualified property that the call must still complete
    /// with milestoning dates.
    pub fn is_generated_with_missing_dates(&self) -> bool {
        self.generated
            .as_ref()
            .is_some_and(|g| g.is_missing_dates(self.arity()))
    }

    /// `name(T1[m1], T2[m2]):R[r]`.
    pub fn display_signature(&self) -> String {
        let params: Vec<String> = self
            .signature
            .params
            .iter()
            .map(|p| format!("{}{}", p.ty, p.mul))
            .collect();
        format!(
            "{}({}):{}{}",
            self.name,
            params.join(", "),
            self.signature.ret,
            self.signature.ret_mul
        )
    }
}

/// The types and functions visible to resolution.
#[derive(Clone, Debug)]
pub struct Model {
    packages: PackageTree,
    types: Vec<TypeDef>,
    type_by_name: FxHashMap<String, TypeId>,
    functions: Vec<FunctionDef>,
    functions_by_name: FxHashMap<String, Vec<FunctionId>>,
    column_accessors: FxHashMap<String, FunctionId>,
}

impl Model {
    /// A model holding the primitive and meta types, with no functions.
    pub fn new() -> Self {
        let mut model = Model {
            packages: PackageTree::new(),
            types: Vec::new(),
            type_by_name: FxHashMap::default(),
            functions: Vec::new(),
            functions_by_name: FxHashMap::default(),
            column_accessors: FxHashMap::default(),
        };
        model.add_type(ANY, TypeKind::Primitive, &[]);
        model.add_type(NIL, TypeKind::Primitive, &[]);
        for (name, sup) in [
            ("Boolean", ANY),
            ("String", ANY),
            ("Number", ANY),
            ("Integer", "Number"),
            ("Float", "Number"),
            ("Decimal", "Number"),
            ("Date", ANY),
            ("StrictDate", "Date"),
            ("DateTime", "Date"),
        ] {
            model.add_type(name, TypeKind::Primitive, &[sup]);
        }
        for (path, sup) in [
            ("meta::pure::metamodel::type::Class", ANY),
            ("meta::pure::metamodel::type::Enumeration", ANY),
            ("meta::pure::metamodel::type::Enum", ANY),
            ("meta::pure::metamodel::function::Function", ANY),
            ("meta::pure::metamodel::function::LambdaFunction", "Function"),
            ("meta::pure::metamodel::function::property::Property", "Function"),
            ("meta::pure::metamodel::function::property::QualifiedProperty", "Function"),
            ("meta::pure::functions::lang::KeyExpression", ANY),
            ("meta::pure::functions::collection::List", ANY),
            ("meta::pure::metamodel::relation::Relation", ANY),
            ("meta::pure::metamodel::relation::ColSpec", ANY),
            ("meta::pure::metamodel::relation::ColSpecArray", ANY),
            ("meta::pure::metamodel::relation::FuncColSpec", ANY),
            ("meta::pure::metamodel::relation::FuncColSpecArray", ANY),
            ("meta::pure::metamodel::relation::AggColSpec", ANY),
            ("meta::pure::metamodel::relation::AggColSpecArray", ANY),
        ] {
            model.add_type(path, TypeKind::Meta, &[sup]);
        }
        model
    }

    // ── Building ─────────────────────────────────────────────────────

    /// Register a type under its full path. Re-registering a name returns
    /// the existing id.
    pub fn add_type(&mut self, path: &str, kind: TypeKind, generalizations: &[&str]) -> TypeId {
        let (package, name) = split_path(path);
        if let Some(&id) = self.type_by_name.get(name) {
            return id;
        }
        let package = self.packages.ensure(package);
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDef {
            id,
            name: name.to_string(),
            package,
            kind,
            type_params: Vec::new(),
            generalizations: generalizations.iter().map(|g| g.to_string()).collect(),
            stereotypes: Vec::new(),
            properties: Vec::new(),
            qualified_properties: Vec::new(),
            original_milestoned_properties: Vec::new(),
        });
        self.type_by_name.insert(name.to_string(), id);
        id
    }

    /// Add a class extending `Any`.
    pub fn add_class(&mut self, path: &str) -> TypeId {
        self.add_type(path, TypeKind::Class, &[ANY])
    }

    /// Add an enumeration. Its values are reachable as properties of the
    /// enumeration reference.
    pub fn add_enumeration(&mut self, path: &str, values: &[&str]) -> TypeId {
        let values = values.iter().map(|v| v.to_string()).collect();
        self.add_type(path, TypeKind::Enumeration(values), &["Enum"])
    }

    pub fn add_generalization(&mut self, ty: TypeId, supertype: &str) {
        let def = &mut self.types[ty.0 as usize];
        def.generalizations.retain(|g| g != ANY);
        if !def.generalizations.iter().any(|g| g == supertype) {
            def.generalizations.push(supertype.to_string());
        }
    }

    pub fn add_stereotype(&mut self, ty: TypeId, stereotype: &str) {
        self.types[ty.0 as usize].stereotypes.push(stereotype.to_string());
    }

    /// Add a simple property `owner.name : ty[mul]`.
    pub fn add_property(
        &mut self,
        owner: TypeId,
        name: &str,
        ty: TypeDescriptor,
        mul: Multiplicity,
    ) -> FunctionId {
        let this = Param::new("this", self.type_descriptor(owner), Multiplicity::one());
        let package = self.types[owner.0 as usize].package;
        let id = self.push_function(
            name,
            package,
            FunctionKind::Property { owner },
            Signature::new(vec![this], ty, mul),
        );
        self.types[owner.0 as usize].properties.push(id);
        id
    }

    /// Add a qualified property. `params` excludes the implicit `this`.
    pub fn add_qualified_property(
        &mut self,
        owner: TypeId,
        name: &str,
        params: Vec<Param>,
        ret: TypeDescriptor,
        ret_mul: Multiplicity,
    ) -> FunctionId {
        let this = Param::new("this", self.type_descriptor(owner), Multiplicity::one());
        let package = self.types[owner.0 as usize].package;
        let all_params = std::iter::once(this).chain(params).collect();
        let id = self.push_function(
            name,
            package,
            FunctionKind::QualifiedProperty { owner },
            Signature::new(all_params, ret, ret_mul),
        );
        self.types[owner.0 as usize].qualified_properties.push(id);
        id
    }

    /// Add a library function under its full path.
    pub fn add_function(&mut self, path: &str, kind: FunctionKind, signature: Signature) -> FunctionId {
        let (package, name) = split_path(path);
        let package = self.packages.ensure(package);
        let id = self.push_function(name, package, kind, signature);
        self.functions_by_name
            .entry(name.to_string())
            .or_default()
            .push(id);
        id
    }

    fn push_function(
        &mut self,
        name: &str,
        package: PackageId,
        kind: FunctionKind,
        signature: Signature,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(FunctionDef {
            id,
            name: name.to_string(),
            package,
            kind,
            signature,
            stereotypes: Vec::new(),
            generated: None,
            applications: Vec::new(),
        });
        id
    }

    /// Move a declared property out of the owner's property list into its
    /// original-milestoned properties.
    pub fn retire_property(&mut self, owner: TypeId, property: FunctionId) {
        let def = &mut self.types[owner.0 as usize];
        def.properties.retain(|p| *p != property);
        if !def.original_milestoned_properties.contains(&property) {
            def.original_milestoned_properties.push(property);
        }
    }

    pub fn record_application(&mut self, func: FunctionId, expr: ExprId) {
        let apps = &mut self.functions[func.0 as usize].applications;
        if !apps.contains(&expr) {
            apps.push(expr);
        }
    }

    /// The accessor function for `column` on a relation type, created on
    /// first use.
    pub fn column_accessor(&mut self, relation: &TypeDescriptor, column: &Column) -> FunctionId {
        let key = format!("{relation}.{}", column.name);
        if let Some(&id) = self.column_accessors.get(&key) {
            return id;
        }
        let root = self.packages.root();
        let this = Param::new("this", relation.clone(), Multiplicity::one());
        let id = self.push_function(
            &column.name,
            root,
            FunctionKind::ColumnAccessor,
            Signature::new(vec![this], column.ty.clone(), column.mul.clone()),
        );
        self.column_accessors.insert(key, id);
        id
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn packages(&self) -> &PackageTree {
        &self.packages
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.type_by_name.get(name).copied()
    }

    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionDef {
        &mut self.functions[id.0 as usize]
    }

    /// Library functions with the given simple name, in declaration order.
    pub fn functions_named(&self, name: &str) -> &[FunctionId] {
        self.functions_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The descriptor of a type used as a value type: `Product`, or
    /// `List<T>` for a generic class.
    pub fn type_descriptor(&self, id: TypeId) -> TypeDescriptor {
        let def = self.ty(id);
        TypeDescriptor::generic(
            def.name.clone(),
            def.type_params.iter().map(TypeDescriptor::param).collect(),
        )
    }

    /// The milestoning stereotype of a class, inherited through its
    /// generalizations.
    pub fn milestoning(&self, name: &str) -> Option<MilestoningStereotype> {
        self.ancestors(name).into_iter().find_map(|ancestor| {
            let id = self.type_id(&ancestor)?;
            self.ty(id)
                .stereotypes
                .iter()
                .find_map(|s| MilestoningStereotype::from_name(s))
        })
    }

    /// `name` followed by all of its supertypes, breadth first.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(id) = self.type_id(&current) {
                queue.extend(self.ty(id).generalizations.iter().cloned());
            }
            order.push(current);
        }
        order
    }

    /// The declared or inherited property named `name`.
    pub fn find_property(&self, owner: &str, name: &str) -> Option<FunctionId> {
        self.ancestors(owner).iter().find_map(|ancestor| {
            let id = self.type_id(ancestor)?;
            self.ty(id)
                .properties
                .iter()
                .copied()
                .find(|p| self.function(*p).name == name)
        })
    }

    /// Every declared or inherited qualified property named `name`.
    pub fn find_qualified_properties(&self, owner: &str, name: &str) -> Vec<FunctionId> {
        self.ancestors(owner)
            .iter()
            .filter_map(|ancestor| self.type_id(ancestor))
            .flat_map(|id| self.ty(id).qualified_properties.iter().copied())
            .filter(|qp| self.function(*qp).name == name)
            .collect()
    }

    // ── Subtyping ────────────────────────────────────────────────────

    /// Number of generalization steps from `sub` up to `sup`.
    pub fn generalization_distance(&self, sub: &str, sup: &str) -> Option<u32> {
        if sub == sup {
            return Some(0);
        }
        if sub == NIL {
            return Some(1);
        }
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([(sub.to_string(), 0u32)]);
        while let Some((current, depth)) = queue.pop_front() {
            if current == sup {
                return Some(depth);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(id) = self.type_id(&current) {
                for g in &self.ty(id).generalizations {
                    queue.push_back((g.clone(), depth + 1));
                }
            }
        }
        (sup == ANY).then_some(u32::MAX / 2)
    }

    pub fn is_subtype_name(&self, sub: &str, sup: &str) -> bool {
        self.generalization_distance(sub, sup).is_some()
    }

    /// Structural subtyping. Parameters, unresolved types and operations
    /// are compatible with anything; inference settles them later.
    pub fn is_subtype(&self, sub: &TypeDescriptor, sup: &TypeDescriptor) -> bool {
        use TypeDescriptor as T;
        match (sub, sup) {
            (T::TypeParameter(_) | T::Unresolved | T::Var(_) | T::Operation(..), _)
            | (_, T::TypeParameter(_) | T::Unresolved | T::Var(_) | T::Operation(..)) => true,
            (_, T::Concrete(name, _)) if name == ANY => true,
            (T::Concrete(name, _), _) if name == NIL => true,
            (T::Concrete(a, a_args), T::Concrete(b, b_args)) => {
                self.is_subtype_name(a, b)
                    && (a_args.len() != b_args.len()
                        || a_args.iter().zip(b_args).all(|(x, y)| self.is_subtype(x, y)))
            }
            (T::Function(actual), T::Function(template)) => {
                actual.params.len() == template.params.len()
                    && actual
                        .params
                        .iter()
                        .zip(&template.params)
                        .all(|(a, t)| self.is_subtype(&t.ty, &a.ty))
                    && self.is_subtype(&actual.ret, &template.ret)
                    && template.ret_mul.subsumes(&actual.ret_mul)
            }
            (T::Relation(actual), T::Relation(template)) => template.iter().all(|t| {
                actual
                    .iter()
                    .find(|a| a.name == t.name)
                    .is_some_and(|a| self.is_subtype(&a.ty, &t.ty))
            }),
            _ => false,
        }
    }

    /// The most specific type both `a` and `b` conform to.
    pub fn best_common_type(&self, a: &TypeDescriptor, b: &TypeDescriptor) -> TypeDescriptor {
        if a == b || self.is_subtype(b, a) {
            return a.clone();
        }
        if self.is_subtype(a, b) {
            return b.clone();
        }
        match (a.raw_name(), b.raw_name()) {
            (Some(a_name), Some(b_name)) => self
                .ancestors(a_name)
                .into_iter()
                .find(|ancestor| self.is_subtype_name(b_name, ancestor))
                .map(TypeDescriptor::concrete)
                .unwrap_or_else(|| TypeDescriptor::concrete(ANY)),
            _ => TypeDescriptor::concrete(ANY),
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}
