//! Finding and ranking the functions a call could resolve to.

use tempo_common::package::{user_path, ImportGroup};

use crate::error::Suggestions;
use crate::milestoning::catalog::MilestoningStereotype;
use crate::model::{FunctionId, Model};
use crate::ty::{Multiplicity, TypeDescriptor};

/// What is known about one argument when candidates are ranked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentShape {
    pub ty: Option<TypeDescriptor>,
    pub mul: Option<Multiplicity>,
}

impl ArgumentShape {
    pub fn new(ty: Option<TypeDescriptor>, mul: Option<Multiplicity>) -> Self {
        Self { ty, mul }
    }

    fn is_known(&self) -> bool {
        self.ty.as_ref().is_some_and(TypeDescriptor::is_fully_concrete) && self.mul.is_some()
    }
}

/// `f(_:A[1],_:B[1])`, the call as diagnostics print it.
pub fn display_call(name: &str, args: &[ArgumentShape]) -> String {
    let args: Vec<String> = args
        .iter()
        .map(|a| {
            let ty = a.ty.clone().unwrap_or(TypeDescriptor::Unresolved);
            match &a.mul {
                Some(mul) => format!("_:{ty}{mul}"),
                None => format!("_:{ty}"),
            }
        })
        .collect();
    format!("{name}({})", args.join(","))
}

/// Library functions named `name` with `arity` parameters that the call
/// site can see, in declaration order.
pub fn functions_by_name(model: &Model, name: &str, arity: usize, imports: &ImportGroup) -> Vec<FunctionId> {
    model
        .functions_named(name)
        .iter()
        .copied()
        .filter(|&f| {
            let def = model.function(f);
            def.arity() == arity && model.packages().is_visible(def.package, imports)
        })
        .collect()
}

/// The outcome of ranking candidates against the arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BestMatch {
    None,
    Unique(FunctionId),
    /// Equally specific candidates, in declaration order.
    Tied(Vec<FunctionId>),
}

impl BestMatch {
    /// Whether `candidate` is, or ties for, the best match.
    pub fn admits(&self, candidate: FunctionId) -> bool {
        match self {
            BestMatch::None => false,
            BestMatch::Unique(f) => *f == candidate,
            BestMatch::Tied(fs) => fs.contains(&candidate),
        }
    }
}

/// How far `candidate` is from an exact fit, or `None` when an argument
/// does not conform. Lower is more specific.
pub fn specificity(model: &Model, candidate: FunctionId, args: &[ArgumentShape]) -> Option<u32> {
    let params = &model.function(candidate).signature.params;
    if params.len() != args.len() {
        return None;
    }
    let mut score = 0u32;
    for (param, arg) in params.iter().zip(args) {
        if let Some(ty) = &arg.ty {
            if !model.is_subtype(ty, &param.ty) {
                return None;
            }
            if let (Some(sub), Some(sup)) = (ty.raw_name(), param.ty.raw_name()) {
                score = score.saturating_add(model.generalization_distance(sub, sup).unwrap_or(0));
            }
        }
        if let Some(mul) = &arg.mul {
            if !param.mul.subsumes(mul) {
                return None;
            }
        }
        score = score.saturating_add(param.mul.looseness());
    }
    Some(score)
}

/// The most specific conforming candidate.
pub fn best_match(model: &Model, candidates: &[FunctionId], args: &[ArgumentShape]) -> BestMatch {
    let scored: Vec<(FunctionId, u32)> = candidates
        .iter()
        .filter_map(|&f| specificity(model, f, args).map(|s| (f, s)))
        .collect();
    let Some(min) = scored.iter().map(|(_, s)| *s).min() else {
        return BestMatch::None;
    };
    let best: Vec<FunctionId> = scored.iter().filter(|(_, s)| *s == min).map(|(f, _)| *f).collect();
    match best.as_slice() {
        [only] => BestMatch::Unique(*only),
        _ => BestMatch::Tied(best),
    }
}

/// Whether every argument is fully typed, so that a tie is final.
pub fn all_known(args: &[ArgumentShape]) -> bool {
    args.iter().all(ArgumentShape::is_known)
}

/// Same-named functions to list under a no-match error. `None` when there
/// are none, or too many to be useful.
pub fn suggestions(model: &Model, name: &str, imports: &ImportGroup, limit: usize) -> Option<Suggestions> {
    let all = model.functions_named(name);
    if all.is_empty() || all.len() >= limit {
        return None;
    }
    let packages = model.packages();
    let mut ordered: Vec<FunctionId> = all.to_vec();
    ordered.sort_by_key(|f| !packages.is_core(model.function(*f).package));

    let mut result = Suggestions::default();
    for f in ordered {
        let def = model.function(f);
        if packages.is_visible(def.package, imports) {
            result.imported.push(def.display_signature());
        } else {
            let path = packages.path(def.package);
            result.not_imported.push(user_path(path, &def.display_signature()));
        }
    }
    Some(result)
}

/// What a property-style call on a class can resolve to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyLookup {
    Property(FunctionId),
    Qualified(Vec<FunctionId>),
    /// Qualified properties exist, none with the call's arity.
    RequiresParameters(Vec<FunctionId>),
    /// Only generated milestoned properties exist, none with the call's
    /// arity: dates must be supplied or propagated.
    Milestoned(MilestoningStereotype),
    NotFound,
}

/// Look up `name` on `owner` for a call with `arity` parameters, the
/// receiver included.
pub fn property_candidates(model: &Model, owner: &str, name: &str, arity: usize) -> PropertyLookup {
    if arity == 1 {
        if let Some(p) = model.find_property(owner, name) {
            return PropertyLookup::Property(p);
        }
    }
    let qualified = model.find_qualified_properties(owner, name);
    if qualified.is_empty() {
        return PropertyLookup::NotFound;
    }
    let matching: Vec<FunctionId> = qualified
        .iter()
        .copied()
        .filter(|q| model.function(*q).arity() == arity)
        .collect();
    if !matching.is_empty() {
        return PropertyLookup::Qualified(matching);
    }
    let milestoned = qualified
        .iter()
        .find_map(|q| model.function(*q).generated.as_ref().map(|g| g.target));
    match milestoned {
        Some(stereotype) => PropertyLookup::Milestoned(stereotype),
        None => PropertyLookup::RequiresParameters(qualified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::milestoning::catalog;
    use crate::ty::FunctionType;

    fn shape(ty: &str, mul: Multiplicity) -> ArgumentShape {
        ArgumentShape::new(Some(TypeDescriptor::concrete(ty)), Some(mul))
    }

    fn lambda(param: &str, ret: &str, ret_mul: Multiplicity) -> ArgumentShape {
        let ty = TypeDescriptor::lambda_of(FunctionType {
            params: vec![crate::ty::ParamType::new(TypeDescriptor::concrete(param), Multiplicity::one())],
            ret: TypeDescriptor::concrete(ret),
            ret_mul,
        });
        ArgumentShape::new(Some(ty), Some(Multiplicity::one()))
    }

    fn model() -> Model {
        let mut model = Model::new();
        builtins::install(&mut model);
        model
    }

    #[test]
    fn map_overloads_rank_by_multiplicity() {
        let model = model();
        let maps = model.functions_named("map").to_vec();
        let many = [shape("Integer", Multiplicity::many()), lambda("Integer", "String", Multiplicity::one())];
        assert_eq!(best_match(&model, &maps, &many), BestMatch::Unique(maps[0]));

        let to_many = [shape("Integer", Multiplicity::many()), lambda("Integer", "String", Multiplicity::many())];
        assert_eq!(best_match(&model, &maps, &to_many), BestMatch::Unique(maps[1]));

        let optional = [
            shape("Integer", Multiplicity::zero_one()),
            lambda("Integer", "String", Multiplicity::zero_one()),
        ];
        assert_eq!(best_match(&model, &maps, &optional), BestMatch::Unique(maps[2]));
    }

    #[test]
    fn subtype_distance_prefers_closer_overload() {
        let mut model = model();
        let number = builtins::declare(&mut model, "", "describe(Number[1]):String[1]").unwrap();
        let integer = builtins::declare(&mut model, "", "describe(Integer[1]):String[1]").unwrap();
        let args = [shape("Integer", Multiplicity::one())];
        assert_eq!(best_match(&model, &[number, integer], &args), BestMatch::Unique(integer));
        let args = [shape("Float", Multiplicity::one())];
        assert_eq!(best_match(&model, &[number, integer], &args), BestMatch::Unique(number));
    }

    #[test]
    fn identical_overloads_tie() {
        let mut model = model();
        let a = builtins::declare(&mut model, "a", "f(Integer[1]):String[1]").unwrap();
        let b = builtins::declare(&mut model, "b", "f(Integer[1]):Boolean[1]").unwrap();
        let args = [shape("Integer", Multiplicity::one())];
        let best = best_match(&model, &[a, b], &args);
        assert_eq!(best, BestMatch::Tied(vec![a, b]));
        assert!(best.admits(b));
        assert!(all_known(&args));
        assert!(!all_known(&[ArgumentShape::new(None, None)]));
    }

    #[test]
    fn visibility_filters_by_imports() {
        let mut model = model();
        builtins::declare(&mut model, "trading::lib", "price(Integer[1]):Float[1]").unwrap();
        let hidden = ImportGroup::new("unit");
        let visible = ImportGroup::new("unit").with("trading::lib");
        assert!(functions_by_name(&model, "price", 1, &hidden).is_empty());
        assert_eq!(functions_by_name(&model, "price", 1, &visible).len(), 1);
        assert!(functions_by_name(&model, "price", 2, &visible).is_empty());
        assert_eq!(functions_by_name(&model, "map", 2, &hidden).len(), 3);
    }

    #[test]
    fn suggestions_split_by_import() {
        let mut model = model();
        builtins::declare(&mut model, "trading::lib", "f(Integer[1], String[1], Date[1]):Boolean[1]").unwrap();
        builtins::declare(&mut model, "other::lib", "f(Integer[1]):Boolean[1]").unwrap();
        let imports = ImportGroup::new("unit").with("trading::lib");
        let found = suggestions(&model, "f", &imports, 20).unwrap();
        assert_eq!(found.imported, vec!["f(Integer[1], String[1], Date[1]):Boolean[1]".to_string()]);
        assert_eq!(found.not_imported, vec!["other::lib::f(Integer[1]):Boolean[1]".to_string()]);
        assert!(suggestions(&model, "f", &imports, 2).is_none());
        assert!(suggestions(&model, "missing", &imports, 20).is_none());
    }

    #[test]
    fn call_display() {
        let args = [shape("A", Multiplicity::one()), shape("B", Multiplicity::one())];
        assert_eq!(display_call("f", &args), "f(_:A[1],_:B[1])");
    }

    #[test]
    fn property_lookup_cases() {
        let mut model = model();
        let product = model.add_class("trading::Product");
        model.add_stereotype(product, "businesstemporal");
        let classification = model.add_class("trading::Classification");
        model.add_stereotype(classification, "businesstemporal");
        let trade = model.add_class("trading::Trade");
        model.add_property(trade, "product", TypeDescriptor::concrete("Product"), Multiplicity::one());
        model.add_property(product, "classification", TypeDescriptor::concrete("Classification"), Multiplicity::one());
        let name = model.add_property(product, "name", TypeDescriptor::concrete("String"), Multiplicity::one());
        model.add_qualified_property(
            product,
            "label",
            vec![crate::model::Param::new("lang", TypeDescriptor::concrete("String"), Multiplicity::one())],
            TypeDescriptor::concrete("String"),
            Multiplicity::one(),
        );
        catalog::install(&mut model);

        assert_eq!(property_candidates(&model, "Product", "name", 1), PropertyLookup::Property(name));
        assert_eq!(property_candidates(&model, "Product", "missing", 1), PropertyLookup::NotFound);
        assert!(matches!(
            property_candidates(&model, "Product", "label", 1),
            PropertyLookup::RequiresParameters(qps) if qps.len() == 1
        ));
        assert!(matches!(
            property_candidates(&model, "Product", "classification", 1),
            PropertyLookup::Qualified(qps) if qps.len() == 1
        ));
        assert_eq!(
            property_candidates(&model, "Trade", "product", 1),
            PropertyLookup::Milestoned(MilestoningStereotype::BusinessTemporal)
        );
    }
}
