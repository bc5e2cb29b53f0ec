//! Type descriptors and multiplicities.
//!
//! A [`TypeDescriptor`] is either a concrete generic type (`List<String>`),
//! a named type parameter (`T`), an operation used while inferring relation
//! columns (`Z⊆T`), a function type (`{T[1]->V[*]}`) or a relation type
//! (`(name:String, age:Integer)`). A [`Multiplicity`] bounds how many values
//! an expression yields.

use std::fmt;

use crate::unify::InferVar;

// ── Multiplicity ─────────────────────────────────────────────────────

/// The cardinality of an expression: `[1]`, `[0..1]`, `[*]`, or a named
/// multiplicity parameter such as `[m]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Multiplicity {
    /// `upper == None` means unbounded.
    Bounds { lower: u32, upper: Option<u32> },
    Parameter(String),
}

impl Multiplicity {
    pub fn new(lower: u32, upper: Option<u32>) -> Self {
        Multiplicity::Bounds { lower, upper }
    }

    pub fn one() -> Self {
        Self::new(1, Some(1))
    }

    pub fn zero_one() -> Self {
        Self::new(0, Some(1))
    }

    pub fn many() -> Self {
        Self::new(0, None)
    }

    pub fn one_many() -> Self {
        Self::new(1, None)
    }

    pub fn exactly(n: u32) -> Self {
        Self::new(n, Some(n))
    }

    pub fn param(name: impl Into<String>) -> Self {
        Multiplicity::Parameter(name.into())
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Multiplicity::Bounds { .. })
    }

    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Multiplicity::Parameter(name) => Some(name),
            Multiplicity::Bounds { .. } => None,
        }
    }

    /// `[1]` is to-one. `[0..1]` is to-one only when `strict` is false.
    pub fn is_to_one(&self, strict: bool) -> bool {
        match self {
            Multiplicity::Bounds {
                lower,
                upper: Some(1),
            } => *lower == 1 || (!strict && *lower == 0),
            _ => false,
        }
    }

    /// Whether every cardinality admitted by `other` is admitted by `self`.
    /// Parameters admit anything and are admitted by anything.
    pub fn subsumes(&self, other: &Multiplicity) -> bool {
        match (self, other) {
            (
                Multiplicity::Bounds {
                    lower: l1,
                    upper: u1,
                },
                Multiplicity::Bounds {
                    lower: l2,
                    upper: u2,
                },
            ) => {
                l1 <= l2
                    && match (u1, u2) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(a), Some(b)) => a >= b,
                    }
            }
            _ => true,
        }
    }

    /// The narrowest multiplicity subsuming both. A parameter on either side
    /// wins, since it cannot be widened without losing the binding.
    pub fn min_subsuming(&self, other: &Multiplicity) -> Multiplicity {
        match (self, other) {
            (
                Multiplicity::Bounds {
                    lower: l1,
                    upper: u1,
                },
                Multiplicity::Bounds {
                    lower: l2,
                    upper: u2,
                },
            ) => {
                let upper = match (u1, u2) {
                    (Some(a), Some(b)) => Some(*a.max(b)),
                    _ => None,
                };
                Multiplicity::new(*l1.min(l2), upper)
            }
            (Multiplicity::Parameter(_), _) => self.clone(),
            (_, Multiplicity::Parameter(_)) => other.clone(),
        }
    }

    /// How loose the multiplicity is, for ranking overloads. Parameters take
    /// the shape of their argument and so count as exact.
    pub fn looseness(&self) -> u32 {
        match self {
            Multiplicity::Parameter(_) => 0,
            Multiplicity::Bounds {
                lower,
                upper: Some(upper),
            } => upper - lower,
            Multiplicity::Bounds { upper: None, .. } => 64,
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Parameter(name) => write!(f, "[{name}]"),
            Multiplicity::Bounds { lower: 0, upper: None } => write!(f, "[*]"),
            Multiplicity::Bounds { lower, upper: None } => write!(f, "[{lower}..*]"),
            Multiplicity::Bounds {
                lower,
                upper: Some(upper),
            } if lower == upper => write!(f, "[{lower}]"),
            Multiplicity::Bounds {
                lower,
                upper: Some(upper),
            } => write!(f, "[{lower}..{upper}]"),
        }
    }
}

// ── Type descriptors ─────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Two bindings recorded for the same parameter, settled later to their
    /// best common supertype.
    Equal,
    /// Left is a column subset of right.
    Subset,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParamType {
    pub ty: TypeDescriptor,
    pub mul: Multiplicity,
}

impl ParamType {
    pub fn new(ty: TypeDescriptor, mul: Multiplicity) -> Self {
        Self { ty, mul }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<ParamType>,
    pub ret: TypeDescriptor,
    pub ret_mul: Multiplicity,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub ty: TypeDescriptor,
    pub mul: Multiplicity,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            mul: Multiplicity::one(),
        }
    }

    /// A column whose type is still to be inferred (`name:?`).
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, TypeDescriptor::Unresolved)
    }

    pub fn is_empty(&self) -> bool {
        self.ty == TypeDescriptor::Unresolved
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A type constructor applied to its type arguments.
    Concrete(String, Vec<TypeDescriptor>),
    TypeParameter(String),
    Operation(OperationKind, Box<TypeDescriptor>, Box<TypeDescriptor>),
    Function(Box<FunctionType>),
    Relation(Vec<Column>),
    /// An inference variable. Only stored inside the unification table,
    /// never on expression nodes.
    Var(InferVar),
    Unresolved,
}

impl TypeDescriptor {
    pub fn concrete(name: impl Into<String>) -> Self {
        TypeDescriptor::Concrete(name.into(), Vec::new())
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeDescriptor>) -> Self {
        TypeDescriptor::Concrete(name.into(), args)
    }

    pub fn param(name: impl Into<String>) -> Self {
        TypeDescriptor::TypeParameter(name.into())
    }

    /// `Class<T>`, the type of a class reference such as `Product`.
    pub fn class_of(ty: TypeDescriptor) -> Self {
        Self::generic("Class", vec![ty])
    }

    pub fn function(params: Vec<ParamType>, ret: TypeDescriptor, ret_mul: Multiplicity) -> Self {
        TypeDescriptor::Function(Box::new(FunctionType {
            params,
            ret,
            ret_mul,
        }))
    }

    /// `Function<{..}>`, a parameter slot accepting any function value.
    pub fn function_of(params: Vec<ParamType>, ret: TypeDescriptor, ret_mul: Multiplicity) -> Self {
        Self::generic("Function", vec![Self::function(params, ret, ret_mul)])
    }

    /// `LambdaFunction<{..}>`, the type of a lambda literal.
    pub fn lambda_of(ft: FunctionType) -> Self {
        Self::generic("LambdaFunction", vec![TypeDescriptor::Function(Box::new(ft))])
    }

    pub fn relation(columns: Vec<Column>) -> Self {
        TypeDescriptor::Relation(columns)
    }

    pub fn subset(left: TypeDescriptor, right: TypeDescriptor) -> Self {
        TypeDescriptor::Operation(OperationKind::Subset, Box::new(left), Box::new(right))
    }

    pub fn equal(left: TypeDescriptor, right: TypeDescriptor) -> Self {
        TypeDescriptor::Operation(OperationKind::Equal, Box::new(left), Box::new(right))
    }

    pub fn raw_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Concrete(name, _) => Some(name),
            _ => None,
        }
    }

    pub fn type_arguments(&self) -> &[TypeDescriptor] {
        match self {
            TypeDescriptor::Concrete(_, args) => args,
            _ => &[],
        }
    }

    /// Concrete at the outermost level: a constructor, function or relation.
    /// `List<T>` is concrete in this sense.
    pub fn is_concrete(&self) -> bool {
        matches!(
            self,
            TypeDescriptor::Concrete(..) | TypeDescriptor::Function(_) | TypeDescriptor::Relation(_)
        )
    }

    /// Concrete all the way down, with no parameters or empty columns left.
    pub fn is_fully_concrete(&self) -> bool {
        match self {
            TypeDescriptor::Concrete(_, args) => args.iter().all(|a| a.is_fully_concrete()),
            TypeDescriptor::Function(ft) => {
                ft.params.iter().all(|p| p.ty.is_fully_concrete() && p.mul.is_concrete())
                    && ft.ret.is_fully_concrete()
                    && ft.ret_mul.is_concrete()
            }
            TypeDescriptor::Relation(cols) => cols.iter().all(|c| c.ty.is_fully_concrete()),
            _ => false,
        }
    }

    /// A relation type whose columns all lack a type, such as `(a:?, b:?)`.
    pub fn is_empty_column_relation(&self) -> bool {
        match self {
            TypeDescriptor::Relation(cols) => !cols.is_empty() && cols.iter().all(Column::is_empty),
            _ => false,
        }
    }

    /// The function type carried by `Function<{..}>`, `LambdaFunction<{..}>`
    /// or a bare function descriptor.
    pub fn function_type(&self) -> Option<&FunctionType> {
        match self {
            TypeDescriptor::Function(ft) => Some(ft),
            TypeDescriptor::Concrete(_, args) if args.len() == 1 => match &args[0] {
                TypeDescriptor::Function(ft) => Some(ft),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn relation_columns(&self) -> Option<&[Column]> {
        match self {
            TypeDescriptor::Relation(cols) => Some(cols),
            _ => None,
        }
    }

    /// Collect the names of every type parameter occurring in `self`.
    pub fn collect_type_parameters(&self, out: &mut Vec<String>) {
        match self {
            TypeDescriptor::TypeParameter(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            TypeDescriptor::Concrete(_, args) => {
                args.iter().for_each(|a| a.collect_type_parameters(out));
            }
            TypeDescriptor::Operation(_, l, r) => {
                l.collect_type_parameters(out);
                r.collect_type_parameters(out);
            }
            TypeDescriptor::Function(ft) => {
                ft.params.iter().for_each(|p| p.ty.collect_type_parameters(out));
                ft.ret.collect_type_parameters(out);
            }
            TypeDescriptor::Relation(cols) => {
                cols.iter().for_each(|c| c.ty.collect_type_parameters(out));
            }
            TypeDescriptor::Var(_) | TypeDescriptor::Unresolved => {}
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty, self.mul)
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        write_joined(f, &self.params)?;
        write!(f, "->{}{}}}", self.ret, self.ret_mul)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)?;
        if self.mul != Multiplicity::one() {
            write!(f, "{}", self.mul)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Concrete(name, args) if args.is_empty() => write!(f, "{name}"),
            TypeDescriptor::Concrete(name, args) => {
                write!(f, "{name}<")?;
                write_joined(f, args)?;
                write!(f, ">")
            }
            TypeDescriptor::TypeParameter(name) => write!(f, "{name}"),
            TypeDescriptor::Operation(OperationKind::Equal, l, r) => write!(f, "{l}={r}"),
            TypeDescriptor::Operation(OperationKind::Subset, l, r) => write!(f, "{l}⊆{r}"),
            TypeDescriptor::Function(ft) => write!(f, "{ft}"),
            TypeDescriptor::Relation(cols) => {
                write!(f, "(")?;
                write_joined(f, cols)?;
                write!(f, ")")
            }
            TypeDescriptor::Var(v) => write!(f, "?{}", v.0),
            TypeDescriptor::Unresolved => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplicity_display() {
        assert_eq!(Multiplicity::one().to_string(), "[1]");
        assert_eq!(Multiplicity::zero_one().to_string(), "[0..1]");
        assert_eq!(Multiplicity::many().to_string(), "[*]");
        assert_eq!(Multiplicity::one_many().to_string(), "[1..*]");
        assert_eq!(Multiplicity::exactly(2).to_string(), "[2]");
        assert_eq!(Multiplicity::param("m").to_string(), "[m]");
    }

    #[test]
    fn to_one_strictness() {
        assert!(Multiplicity::one().is_to_one(true));
        assert!(!Multiplicity::zero_one().is_to_one(true));
        assert!(Multiplicity::zero_one().is_to_one(false));
        assert!(!Multiplicity::many().is_to_one(false));
        assert!(!Multiplicity::param("m").is_to_one(false));
    }

    #[test]
    fn subsumption() {
        assert!(Multiplicity::many().subsumes(&Multiplicity::one()));
        assert!(Multiplicity::zero_one().subsumes(&Multiplicity::one()));
        assert!(!Multiplicity::one().subsumes(&Multiplicity::zero_one()));
        assert!(!Multiplicity::zero_one().subsumes(&Multiplicity::many()));
        assert!(Multiplicity::param("m").subsumes(&Multiplicity::many()));
    }

    #[test]
    fn min_subsuming_widens_both_bounds() {
        let merged = Multiplicity::one().min_subsuming(&Multiplicity::zero_one());
        assert_eq!(merged, Multiplicity::zero_one());
        let merged = Multiplicity::one_many().min_subsuming(&Multiplicity::exactly(0));
        assert_eq!(merged, Multiplicity::many());
    }

    #[test]
    fn descriptor_display() {
        let list = TypeDescriptor::generic("List", vec![TypeDescriptor::concrete("String")]);
        assert_eq!(list.to_string(), "List<String>");

        let func = TypeDescriptor::function_of(
            vec![ParamType::new(TypeDescriptor::param("T"), Multiplicity::one())],
            TypeDescriptor::param("V"),
            Multiplicity::many(),
        );
        assert_eq!(func.to_string(), "Function<{T[1]->V[*]}>");

        let rel = TypeDescriptor::relation(vec![
            Column::new("a", TypeDescriptor::concrete("Integer")),
            Column::empty("b"),
        ]);
        assert_eq!(rel.to_string(), "(a:Integer, b:NULL)");

        let subset = TypeDescriptor::subset(TypeDescriptor::param("Z"), TypeDescriptor::param("T"));
        assert_eq!(subset.to_string(), "Z⊆T");
    }

    #[test]
    fn concreteness_levels() {
        let shallow = TypeDescriptor::generic("List", vec![TypeDescriptor::param("T")]);
        assert!(shallow.is_concrete());
        assert!(!shallow.is_fully_concrete());
        assert!(!TypeDescriptor::param("T").is_concrete());

        let empty = TypeDescriptor::relation(vec![Column::empty("a")]);
        assert!(empty.is_empty_column_relation());
        assert!(!empty.is_fully_concrete());
        assert!(!TypeDescriptor::relation(Vec::new()).is_empty_column_relation());
    }

    #[test]
    fn function_type_of_wrappers() {
        let lambda = TypeDescriptor::lambda_of(FunctionType {
            params: vec![ParamType::new(TypeDescriptor::concrete("Integer"), Multiplicity::one())],
            ret: TypeDescriptor::concrete("String"),
            ret_mul: Multiplicity::one(),
        });
        let ft = lambda.function_type().unwrap();
        assert_eq!(ft.params.len(), 1);
        assert_eq!(lambda.to_string(), "LambdaFunction<{Integer[1]->String[1]}>");
    }
}
