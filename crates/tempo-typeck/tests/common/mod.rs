//! Shared fixture: a small trading model with temporal classes, plus a
//! few plain classes for overload and inference tests.

#![allow(dead_code)]

use tempo_common::package::ImportGroup;
use tempo_typeck::builtins;
use tempo_typeck::graph::{ExprGraph, ExprId};
use tempo_typeck::milestoning::catalog;
use tempo_typeck::model::{Model, Param};
use tempo_typeck::ty::{Column, Multiplicity, TypeDescriptor};
use tempo_typeck::{check_expression, check_function, FunctionBody, InferenceOptions, TypeckResult};

pub const PACKAGE: &str = "trading";

pub struct Fixture {
    pub model: Model,
    pub graph: ExprGraph,
    pub imports: ImportGroup,
    pub options: InferenceOptions,
}

pub fn c(name: &str) -> TypeDescriptor {
    TypeDescriptor::concrete(name)
}

fn class(model: &mut Model, name: &str, stereotype: Option<&str>) -> tempo_typeck::model::TypeId {
    let id = model.add_class(&format!("{PACKAGE}::{name}"));
    if let Some(stereotype) = stereotype {
        model.add_stereotype(id, stereotype);
    }
    id
}

/// The trading model:
///
/// - `<<businesstemporal>> Product { name: String[1]; classification: Classification[1] }`
/// - `<<businesstemporal>> Classification { exchangeName: String[1]; exchange: Exchange[1] }`
/// - `<<bitemporal>> Location { exchange: Exchange[1] }`
/// - `<<businesstemporal>> Exchange { location: Site[1] }`
/// - `<<businesstemporal>> Site { street: String[1] }`
/// - `Person { name: String[1]; age: Integer[1]; firm: Firm[0..1]; addresses: Address[*] }`
///   with `Employee extends Person`
/// - `enum Side { Buy, Sell }`
/// - `f(A[1], B[1], C[1]):Boolean[1]`
pub fn trading_model() -> Model {
    let mut model = Model::new();
    builtins::install(&mut model);

    let product = class(&mut model, "Product", Some("businesstemporal"));
    let classification = class(&mut model, "Classification", Some("businesstemporal"));
    let location = class(&mut model, "Location", Some("bitemporal"));
    let exchange = class(&mut model, "Exchange", Some("businesstemporal"));
    let site = class(&mut model, "Site", Some("businesstemporal"));
    model.add_property(product, "name", c("String"), Multiplicity::one());
    model.add_property(product, "classification", c("Classification"), Multiplicity::one());
    model.add_property(classification, "exchangeName", c("String"), Multiplicity::one());
    model.add_property(classification, "exchange", c("Exchange"), Multiplicity::one());
    model.add_property(location, "exchange", c("Exchange"), Multiplicity::one());
    model.add_property(exchange, "location", c("Site"), Multiplicity::one());
    model.add_property(site, "street", c("String"), Multiplicity::one());

    let person = class(&mut model, "Person", None);
    let firm = class(&mut model, "Firm", None);
    let address = class(&mut model, "Address", None);
    let employee = class(&mut model, "Employee", None);
    model.add_generalization(employee, "Person");
    model.add_property(person, "name", c("String"), Multiplicity::one());
    model.add_property(person, "age", c("Integer"), Multiplicity::one());
    model.add_property(person, "firm", c("Firm"), Multiplicity::zero_one());
    model.add_property(person, "addresses", c("Address"), Multiplicity::many());
    model.add_qualified_property(
        person,
        "nameWithTitle",
        vec![Param::new("title", c("String"), Multiplicity::one())],
        c("String"),
        Multiplicity::one(),
    );
    model.add_property(firm, "legalName", c("String"), Multiplicity::one());
    model.add_property(address, "street", c("String"), Multiplicity::one());
    model.add_enumeration(&format!("{PACKAGE}::Side"), &["Buy", "Sell"]);

    for name in ["A", "B", "C"] {
        class(&mut model, name, None);
    }
    builtins::declare(&mut model, PACKAGE, "f(A[1], B[1], C[1]):Boolean[1]").unwrap();

    catalog::install(&mut model);
    model
}

pub fn fixture() -> Fixture {
    Fixture {
        model: trading_model(),
        graph: ExprGraph::new(),
        imports: ImportGroup::new("test").with(PACKAGE),
        options: InferenceOptions::default(),
    }
}

impl Fixture {
    pub fn traced(mut self) -> Self {
        self.options.trace = true;
        self
    }

    pub fn check(&mut self, root: ExprId) -> TypeckResult {
        check_expression(&mut self.model, &mut self.graph, root, &self.imports, &self.options)
    }

    pub fn check_function(&mut self, params: Vec<Param>, body: Vec<ExprId>) -> TypeckResult {
        let function = FunctionBody { params, body };
        check_function(&mut self.model, &mut self.graph, &function, &self.imports, &self.options)
    }

    /// `name:ty[mul]`, for function parameters.
    pub fn param(&self, name: &str, ty: &str, mul: Multiplicity) -> Param {
        Param::new(name, c(ty), mul)
    }

    /// The declared name of the function a call was finalized against.
    pub fn target_name(&self, call: ExprId) -> String {
        let target = self.graph.call(call).and_then(|c| c.target).expect("call is unresolved");
        self.model.function(target).name.clone()
    }

    /// The lambda body a map call (written or automapped) applies.
    pub fn mapped_body(&self, map: ExprId) -> ExprId {
        let call = self.graph.call(map).expect("not a call");
        let lambda = self.graph.lambda(call.params[1]).expect("second argument is not a lambda");
        *lambda.body.last().expect("empty lambda")
    }
}

/// `ty` followed by `mul`, as in `String[*]`.
pub fn shown(result: &TypeckResult) -> String {
    match (&result.result_type, &result.result_mul) {
        (Some(ty), Some(mul)) => format!("{ty}{mul}"),
        _ => format!("<failed: {:?}>", result.errors),
    }
}

pub fn assert_no_errors(result: &TypeckResult) {
    assert!(result.errors.is_empty(), "expected no errors, got: {:?}", result.errors);
}

/// The message of the single error `result` carries.
pub fn error_message(result: &TypeckResult) -> String {
    assert_eq!(result.errors.len(), 1, "expected one error, got: {:?}", result.errors);
    result.errors[0].to_string()
}

/// `Relation<(a:Integer, b:String, c:Date)>`.
pub fn sample_relation() -> TypeDescriptor {
    TypeDescriptor::generic(
        "Relation",
        vec![TypeDescriptor::relation(vec![
            Column::new("a", c("Integer")),
            Column::new("b", c("String")),
            Column::new("c", c("Date")),
        ])],
    )
}
