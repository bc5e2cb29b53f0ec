//! Native functions and the signature notation used to declare them.
//!
//! Signatures are written the way they read in diagnostics:
//!
//! ```text
//! map<T,V|m>(T[m], Function<{T[1]->V[1]}>[1]):V[m]
//! select<T,Z>(Relation<T>[1], Z⊆T[1]):Relation<Z>[1]
//! ```
//!
//! Names declared between `<` and `|` are type parameters, names after `|`
//! multiplicity parameters. `(a:Integer, b:?)` is a relation type whose
//! column `b` is still untyped.

use std::fmt;

use tempo_common::package::split_path;

use crate::model::{FunctionId, FunctionKind, Model, Param, Signature};
use crate::ty::{Column, Multiplicity, ParamType, TypeDescriptor};

pub const MAP: &str = "map";
pub const FILTER: &str = "filter";
pub const EXISTS: &str = "exists";
pub const FOR_ALL: &str = "forAll";
pub const SORT_BY: &str = "sortBy";
pub const SUB_TYPE: &str = "subType";
pub const GET_ALL: &str = "getAll";
pub const NEW: &str = "new";
pub const COPY: &str = "copy";
pub const LET: &str = "letFunction";
pub const EXTRACT_ENUM_VALUE: &str = "extractEnumValue";
pub const FUNC_COL_SPEC: &str = "funcColSpec";
pub const FUNC_COL_SPEC_ARRAY: &str = "funcColSpecArray";
pub const AGG_COL_SPEC: &str = "aggColSpec";
pub const AGG_COL_SPEC_ARRAY: &str = "aggColSpecArray";

/// Natives whose lambda arguments receive the elements of their first
/// argument, so a milestoning date context flows into those lambdas.
pub const DATE_PROPAGATING: &[&str] = &[MAP, FILTER, EXISTS, FOR_ALL, SORT_BY];

const COLLECTION: &str = "meta::pure::functions::collection";
const LANG: &str = "meta::pure::functions::lang";
const BOOLEAN: &str = "meta::pure::functions::boolean";
const MULTIPLICITY: &str = "meta::pure::functions::multiplicity";
const RELATION: &str = "meta::pure::functions::relation";

const NATIVES: &[(&str, &str)] = &[
    (COLLECTION, "map<T,V|m>(T[m], Function<{T[1]->V[1]}>[1]):V[m]"),
    (COLLECTION, "map<T,V>(T[*], Function<{T[1]->V[*]}>[1]):V[*]"),
    (COLLECTION, "map<T,V>(T[0..1], Function<{T[1]->V[0..1]}>[1]):V[0..1]"),
    (COLLECTION, "filter<T>(T[*], Function<{T[1]->Boolean[1]}>[1]):T[*]"),
    (COLLECTION, "exists<T>(T[*], Function<{T[1]->Boolean[1]}>[1]):Boolean[1]"),
    (COLLECTION, "forAll<T>(T[*], Function<{T[1]->Boolean[1]}>[1]):Boolean[1]"),
    (COLLECTION, "sortBy<T,U|m>(T[m], Function<{T[1]->U[1]}>[1]):T[m]"),
    (COLLECTION, "getAll<T>(Class<T>[1]):T[*]"),
    (COLLECTION, "getAll<T>(Class<T>[1], Date[1]):T[*]"),
    (COLLECTION, "getAll<T>(Class<T>[1], Date[1], Date[1]):T[*]"),
    (COLLECTION, "first<T>(T[*]):T[0..1]"),
    (COLLECTION, "at<T>(T[*], Integer[1]):T[1]"),
    (COLLECTION, "size(Any[*]):Integer[1]"),
    (COLLECTION, "isEmpty(Any[*]):Boolean[1]"),
    (LANG, "new<T>(Class<T>[1], String[1], KeyExpression[*]):T[1]"),
    (LANG, "copy<T>(T[1], String[1], KeyExpression[*]):T[1]"),
    (LANG, "letFunction<T|m>(String[1], T[m]):T[m]"),
    (LANG, "extractEnumValue<T>(Enumeration<T>[1], String[1]):T[1]"),
    (LANG, "subType<T|m>(Any[m], Class<T>[1]):T[m]"),
    (BOOLEAN, "eq(Any[1], Any[1]):Boolean[1]"),
    (BOOLEAN, "and(Boolean[1], Boolean[1]):Boolean[1]"),
    (BOOLEAN, "not(Boolean[1]):Boolean[1]"),
    (MULTIPLICITY, "toOne<T>(T[*]):T[1]"),
    (RELATION, "funcColSpec<U,Z>(Function<U>[1], String[1], Z[1]):FuncColSpec<U,Z>[1]"),
    (RELATION, "funcColSpecArray<U,Z>(FuncColSpec<U,Any>[*], Z[1]):FuncColSpecArray<U,Z>[1]"),
    (RELATION, "aggColSpec<K,V,R>(Function<K>[1], Function<V>[1], String[1], R[1]):AggColSpec<K,V,R>[1]"),
    (RELATION, "aggColSpecArray<K,V,R>(AggColSpec<K,V,Any>[*], R[1]):AggColSpecArray<K,V,R>[1]"),
    (RELATION, "select<T,Z>(Relation<T>[1], Z⊆T[1]):Relation<Z>[1]"),
    (RELATION, "extend<T,Z>(Relation<T>[1], FuncColSpec<{T[1]->Any[*]},Z>[1]):Relation<Z>[1]"),
    (RELATION, "project<T,Z>(Relation<T>[1], FuncColSpecArray<{T[1]->Any[*]},Z>[1]):Relation<Z>[1]"),
];

/// Register the core library. Calling it twice registers nothing new.
pub fn install(model: &mut Model) {
    if !model.functions_named(MAP).is_empty() {
        return;
    }
    for (package, text) in NATIVES {
        match parse_signature(text) {
            Ok((name, signature)) => {
                let path = format!("{package}::{name}");
                model.add_function(&path, FunctionKind::Native, signature);
            }
            Err(err) => log::error!("invalid native signature `{text}`: {err}"),
        }
    }
}

/// Parse `text` as a signature and register it as a concrete function
/// under `package`.
pub fn declare(model: &mut Model, package: &str, text: &str) -> Result<FunctionId, NotationError> {
    let (name, signature) = parse_signature(text)?;
    let path = if package.is_empty() {
        name
    } else {
        format!("{package}::{name}")
    };
    Ok(model.add_function(&path, FunctionKind::Concrete, signature))
}

/// Index of the relation placeholder argument of a column builder.
pub fn magic_column_slot(name: &str) -> Option<usize> {
    match name {
        FUNC_COL_SPEC => Some(2),
        FUNC_COL_SPEC_ARRAY | AGG_COL_SPEC_ARRAY => Some(1),
        AGG_COL_SPEC => Some(3),
        _ => None,
    }
}

// ── Notation ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotationError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for NotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for NotationError {}

/// Parse `name<T|m>(params):Ret[mul]`.
pub fn parse_signature(text: &str) -> Result<(String, Signature), NotationError> {
    let mut parser = Parser::new(text, &[], &[]);
    let (name, signature) = parser.signature()?;
    parser.finish()?;
    Ok((name, signature))
}

/// Parse a type. `type_params` names the identifiers that denote type
/// parameters rather than types.
pub fn parse_type(text: &str, type_params: &[&str]) -> Result<TypeDescriptor, NotationError> {
    let mut parser = Parser::new(text, type_params, &[]);
    let ty = parser.ty()?;
    parser.finish()?;
    Ok(ty)
}

/// Parse `Type[mul]`.
pub fn parse_typed(
    text: &str,
    type_params: &[&str],
    mul_params: &[&str],
) -> Result<(TypeDescriptor, Multiplicity), NotationError> {
    let mut parser = Parser::new(text, type_params, mul_params);
    let typed = parser.typed()?;
    parser.finish()?;
    Ok(typed)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    type_params: Vec<String>,
    mul_params: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, type_params: &[&str], mul_params: &[&str]) -> Self {
        Parser {
            text,
            pos: 0,
            type_params: type_params.iter().map(|s| s.to_string()).collect(),
            mul_params: mul_params.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, NotationError> {
        Err(NotationError {
            offset: self.pos,
            message: message.into(),
        })
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.rest().chars().next() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), NotationError> {
        if self.eat(token) {
            Ok(())
        } else {
            self.error(format!("expected `{token}`"))
        }
    }

    fn finish(&mut self) -> Result<(), NotationError> {
        match self.peek() {
            None => Ok(()),
            Some(c) => self.error(format!("unexpected `{c}`")),
        }
    }

    /// An identifier, possibly a `::` path.
    fn ident(&mut self) -> Result<String, NotationError> {
        self.skip_ws();
        let start = self.pos;
        loop {
            let rest = self.rest();
            if rest.starts_with("::") {
                self.pos += 2;
                continue;
            }
            match rest.chars().next() {
                Some(c) if c.is_alphanumeric() || c == '_' => self.pos += c.len_utf8(),
                _ => break,
            }
        }
        if self.pos == start {
            return self.error("expected an identifier");
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn number(&mut self) -> Result<u32, NotationError> {
        self.skip_ws();
        let digits: String = self.rest().chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return self.error("expected a number");
        }
        self.pos += digits.len();
        digits.parse().or_else(|_| self.error("number out of range"))
    }

    fn signature(&mut self) -> Result<(String, Signature), NotationError> {
        let name = self.ident()?;
        if self.eat("<") {
            let mut in_muls = false;
            loop {
                if self.eat(">") {
                    break;
                }
                if self.eat("|") {
                    in_muls = true;
                    continue;
                }
                self.eat(",");
                let param = self.ident()?;
                if in_muls {
                    self.mul_params.push(param);
                } else {
                    self.type_params.push(param);
                }
            }
        }
        self.expect("(")?;
        let mut params = Vec::new();
        if !self.eat(")") {
            loop {
                params.push(self.param(params.len())?);
                if self.eat(")") {
                    break;
                }
                self.expect(",")?;
            }
        }
        self.expect(":")?;
        let (ret, ret_mul) = self.typed()?;
        let (_, simple) = split_path(&name);
        Ok((simple.to_string(), Signature::new(params, ret, ret_mul)))
    }

    fn param(&mut self, index: usize) -> Result<Param, NotationError> {
        let save = self.pos;
        let named = match self.ident() {
            Ok(name) => (self.eat(":") && !self.rest().starts_with(':')).then_some(name),
            Err(_) => None,
        };
        let name = match named {
            Some(name) => name,
            None => {
                self.pos = save;
                format!("p{index}")
            }
        };
        let (ty, mul) = self.typed()?;
        Ok(Param::new(name, ty, mul))
    }

    fn typed(&mut self) -> Result<(TypeDescriptor, Multiplicity), NotationError> {
        let ty = self.ty()?;
        let mul = self.multiplicity()?;
        Ok((ty, mul))
    }

    fn ty(&mut self) -> Result<TypeDescriptor, NotationError> {
        let base = match self.peek() {
            Some('{') => self.function_type()?,
            Some('(') => self.relation_type()?,
            _ => {
                let path = self.ident()?;
                let (_, name) = split_path(&path);
                let mut args = Vec::new();
                if self.eat("<") {
                    loop {
                        args.push(self.ty()?);
                        if self.eat(">") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                if args.is_empty() && self.type_params.iter().any(|p| p == name) {
                    TypeDescriptor::param(name)
                } else {
                    TypeDescriptor::generic(name, args)
                }
            }
        };
        if self.eat("⊆") {
            let right = self.ty()?;
            return Ok(TypeDescriptor::subset(base, right));
        }
        Ok(base)
    }

    fn function_type(&mut self) -> Result<TypeDescriptor, NotationError> {
        self.expect("{")?;
        let mut params = Vec::new();
        if !self.eat("->") {
            loop {
                let (ty, mul) = self.typed()?;
                params.push(ParamType::new(ty, mul));
                if self.eat("->") {
                    break;
                }
                self.expect(",")?;
            }
        }
        let (ret, ret_mul) = self.typed()?;
        self.expect("}")?;
        Ok(TypeDescriptor::function(params, ret, ret_mul))
    }

    fn relation_type(&mut self) -> Result<TypeDescriptor, NotationError> {
        self.expect("(")?;
        let mut columns = Vec::new();
        if !self.eat(")") {
            loop {
                let name = self.ident()?;
                self.expect(":")?;
                let column = if self.eat("?") {
                    Column::empty(name)
                } else {
                    Column::new(name, self.ty()?)
                };
                columns.push(column);
                if self.eat(")") {
                    break;
                }
                self.expect(",")?;
            }
        }
        Ok(TypeDescriptor::relation(columns))
    }

    fn multiplicity(&mut self) -> Result<Multiplicity, NotationError> {
        self.expect("[")?;
        let mul = if self.eat("*") {
            Multiplicity::many()
        } else if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let lower = self.number()?;
            if self.eat("..") {
                if self.eat("*") {
                    Multiplicity::new(lower, None)
                } else {
                    Multiplicity::new(lower, Some(self.number()?))
                }
            } else {
                Multiplicity::exactly(lower)
            }
        } else {
            let name = self.ident()?;
            if !self.mul_params.contains(&name) {
                self.mul_params.push(name.clone());
            }
            Multiplicity::param(name)
        };
        self.expect("]")?;
        Ok(mul)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_native_parses() {
        for (_, text) in NATIVES {
            let parsed = parse_signature(text);
            assert!(parsed.is_ok(), "{text}: {:?}", parsed.err());
        }
    }

    #[test]
    fn map_signature_shape() {
        let (name, sig) = parse_signature("map<T,V|m>(T[m], Function<{T[1]->V[1]}>[1]):V[m]").unwrap();
        assert_eq!(name, "map");
        assert_eq!(sig.type_params, vec!["T".to_string(), "V".to_string()]);
        assert_eq!(sig.mul_params, vec!["m".to_string()]);
        assert_eq!(sig.params[0].ty, TypeDescriptor::param("T"));
        assert_eq!(sig.params[0].mul, Multiplicity::param("m"));
        assert_eq!(sig.params[1].ty.to_string(), "Function<{T[1]->V[1]}>");
        assert_eq!(sig.ret_mul, Multiplicity::param("m"));
    }

    #[test]
    fn named_params_and_paths() {
        let (name, sig) =
            parse_signature("trading::functions::price(p:meta::x::Product[1], at:Date[0..1]):Float[*]").unwrap();
        assert_eq!(name, "price");
        assert_eq!(sig.params[0].name, "p");
        assert_eq!(sig.params[0].ty, TypeDescriptor::concrete("Product"));
        assert_eq!(sig.params[1].mul, Multiplicity::zero_one());
        assert_eq!(sig.ret_mul, Multiplicity::many());
    }

    #[test]
    fn subset_and_relation_types() {
        let (_, sig) = parse_signature("select<T,Z>(Relation<T>[1], Z⊆T[1]):Relation<Z>[1]").unwrap();
        assert_eq!(sig.params[1].ty.to_string(), "Z⊆T");
        let rel = parse_type("(a:Integer, b:?)", &[]).unwrap();
        assert_eq!(rel.to_string(), "(a:Integer, b:NULL)");
        assert!(!rel.is_empty_column_relation());
    }

    #[test]
    fn multiplicity_forms() {
        let (_, mul) = parse_typed("String[1..*]", &[], &[]).unwrap();
        assert_eq!(mul, Multiplicity::one_many());
        let (_, mul) = parse_typed("String[2]", &[], &[]).unwrap();
        assert_eq!(mul, Multiplicity::exactly(2));
    }

    #[test]
    fn errors_carry_offsets() {
        let err = parse_signature("f(Integer[1]").unwrap_err();
        assert_eq!(err.to_string(), "expected `,` at offset 12");
        let err = parse_type("Integer junk", &[]).unwrap_err();
        assert_eq!(err.message, "unexpected `j`");
    }

    #[test]
    fn install_is_idempotent() {
        let mut model = Model::new();
        install(&mut model);
        let maps = model.functions_named(MAP).len();
        install(&mut model);
        assert_eq!(maps, 3);
        assert_eq!(model.functions_named(MAP).len(), 3);
        let map = model.function(model.functions_named(MAP)[0]);
        assert!(model.packages().is_core(map.package));
    }
}
