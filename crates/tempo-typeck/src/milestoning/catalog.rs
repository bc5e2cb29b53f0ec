//! Milestoning stereotypes and the properties they generate.
//!
//! A class stereotyped `businesstemporal`, `processingtemporal` or
//! `bitemporal` is versioned by one or two dates. [`install`] gives every
//! such class its date properties, and replaces every property *pointing at*
//! such a class with an `AllVersions` edge property plus a family of
//! generated qualified properties that select the version valid at a date.

use serde::Serialize;

use crate::model::{FunctionId, Model, Param, TypeId};
use crate::ty::{Multiplicity, TypeDescriptor};

pub const PROFILE: &str = "meta::pure::profiles::milestoning";
pub const GENERATED_PROPERTY: &str = "meta::pure::profiles::milestoning.generatedmilestoningproperty";
pub const GENERATED_DATE_PROPERTY: &str =
    "meta::pure::profiles::milestoning.generatedmilestoningdateproperty";
pub const EDGE_POINT_SUFFIX: &str = "AllVersions";
pub const RANGE_SUFFIX: &str = "AllVersionsInRange";
pub const MILESTONING_PROPERTY: &str = "milestoning";
const MILESTONE_VARIABLE: &str = "v_milestone";

const BUSINESS_DATE: &str = "businessDate";
const PROCESSING_DATE: &str = "processingDate";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoningStereotype {
    BusinessTemporal,
    ProcessingTemporal,
    BiTemporal,
}

impl MilestoningStereotype {
    pub const ALL: [MilestoningStereotype; 3] = [
        MilestoningStereotype::BusinessTemporal,
        MilestoningStereotype::ProcessingTemporal,
        MilestoningStereotype::BiTemporal,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The stereotype as written in source: `<<temporal.businesstemporal>>`.
    pub fn name(self) -> &'static str {
        match self {
            MilestoningStereotype::BusinessTemporal => "businesstemporal",
            MilestoningStereotype::ProcessingTemporal => "processingtemporal",
            MilestoningStereotype::BiTemporal => "bitemporal",
        }
    }

    /// Date properties, in the order a dated call supplies them.
    pub fn date_names(self) -> &'static [&'static str] {
        match self {
            MilestoningStereotype::BusinessTemporal => &[BUSINESS_DATE],
            MilestoningStereotype::ProcessingTemporal => &[PROCESSING_DATE],
            MilestoningStereotype::BiTemporal => &[PROCESSING_DATE, BUSINESS_DATE],
        }
    }

    pub fn date_count(self) -> usize {
        self.date_names().len()
    }

    /// Properties of the milestoning class marking a version's validity.
    pub fn edge_point_names(self) -> &'static [&'static str] {
        match self {
            MilestoningStereotype::BusinessTemporal => &["from", "thru"],
            MilestoningStereotype::ProcessingTemporal => &["in", "out"],
            MilestoningStereotype::BiTemporal => &["in", "out", "from", "thru"],
        }
    }

    pub fn milestoning_class(self) -> &'static str {
        match self {
            MilestoningStereotype::BusinessTemporal => "meta::pure::milestoning::BusinessDateMilestoning",
            MilestoningStereotype::ProcessingTemporal => {
                "meta::pure::milestoning::ProcessingDateMilestoning"
            }
            MilestoningStereotype::BiTemporal => "meta::pure::milestoning::BiTemporalMilestoning",
        }
    }

    /// Index of this stereotype's date inside a bitemporal `(pd, bd)` list.
    pub fn bitemporal_position(self) -> Option<usize> {
        match self {
            MilestoningStereotype::ProcessingTemporal => Some(0),
            MilestoningStereotype::BusinessTemporal => Some(1),
            MilestoningStereotype::BiTemporal => None,
        }
    }
}

// ── Generated properties ─────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedVariant {
    /// `p()`: dates come from `$this`.
    NoArg,
    /// `p(td)`: one date, the other (if any) from `$this`.
    OneDate,
    /// `p(td)` or `p(pd, bd)`: every date of the target supplied.
    AllDates,
    /// `pAllVersionsInRange(start, end)`.
    Range,
    /// `pAllVersions`, the undated edge property.
    AllVersions,
}

/// Metadata attached to a generated property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GeneratedProperty {
    pub target: MilestoningStereotype,
    pub variant: GeneratedVariant,
    /// Name of the declared property this was generated from.
    pub original: String,
    /// Source text of the generated definition.
    pub source: String,
}

impl GeneratedProperty {
    /// Whether a qualified property with `arity` parameters (including
    /// `$this`) still needs dates supplied by the call site.
    pub fn is_missing_dates(&self, arity: usize) -> bool {
        match self.variant {
            GeneratedVariant::Range | GeneratedVariant::AllVersions => false,
            _ => arity != 1 + self.target.date_count(),
        }
    }
}

/// One qualified property to generate for a milestoned property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedPropertyPlan {
    pub name: String,
    pub date_params: Vec<&'static str>,
    pub ret_mul: Multiplicity,
    pub generated: GeneratedProperty,
}

fn multiplicity_call(mul: &Multiplicity) -> &'static str {
    if mul.is_to_one(true) {
        "->toOne()"
    } else if mul.is_to_one(false) {
        "->first()"
    } else {
        ""
    }
}

fn multiplicity_text(mul: &Multiplicity) -> String {
    let text = mul.to_string();
    text.trim_start_matches('[').trim_end_matches(']').to_string()
}

struct PlanBuilder<'a> {
    property: &'a str,
    return_type: &'a str,
    mul: &'a Multiplicity,
    target: MilestoningStereotype,
}

impl PlanBuilder<'_> {
    fn plan(
        &self,
        name: String,
        date_params: Vec<&'static str>,
        variant: GeneratedVariant,
        filter: String,
    ) -> QualifiedPropertyPlan {
        let ret_mul = if variant == GeneratedVariant::Range {
            Multiplicity::many()
        } else {
            self.mul.clone()
        };
        let call = if variant == GeneratedVariant::Range {
            ""
        } else {
            multiplicity_call(self.mul)
        };
        let params: Vec<String> = date_params.iter().map(|p| format!("{p}:Date[1]")).collect();
        let source = format!(
            "<<{GENERATED_PROPERTY}>>{name}({}){{$this.{}{EDGE_POINT_SUFFIX}->filter({MILESTONE_VARIABLE}| {filter}){call} }} : {}[{}];",
            params.join(", "),
            self.property,
            self.return_type,
            multiplicity_text(&ret_mul),
        );
        QualifiedPropertyPlan {
            name,
            date_params,
            ret_mul,
            generated: GeneratedProperty {
                target: self.target,
                variant,
                original: self.property.to_string(),
                source,
            },
        }
    }

    fn single_filter(&self, value: &str) -> String {
        let date = self.target.date_names()[0];
        format!("${MILESTONE_VARIABLE}.{date}->eq({value})")
    }

    fn bitemporal_filter(processing: &str, business: &str) -> String {
        format!(
            "${MILESTONE_VARIABLE}.{PROCESSING_DATE}->eq({processing}) && ${MILESTONE_VARIABLE}.{BUSINESS_DATE}->eq({business}) "
        )
    }
}

/// The qualified properties generated for `property` (typed
/// `return_type[mul]`, pointing at a `target` class) on an owner whose own
/// milestoning is `owner`.
pub fn qualified_property_plans(
    owner: Option<MilestoningStereotype>,
    target: MilestoningStereotype,
    property: &str,
    return_type: &str,
    mul: &Multiplicity,
) -> Vec<QualifiedPropertyPlan> {
    use GeneratedVariant::*;
    use MilestoningStereotype::*;

    let b = PlanBuilder {
        property,
        return_type,
        mul,
        target,
    };
    let name = property.to_string();
    let mut plans = Vec::new();
    match target {
        BusinessTemporal | ProcessingTemporal => {
            if owner == Some(target) || owner == Some(BiTemporal) {
                let date = target.date_names()[0];
                let filter = b.single_filter(&format!("$this.{date}"));
                plans.push(b.plan(name.clone(), Vec::new(), NoArg, filter));
            }
            plans.push(b.plan(name, vec!["td"], AllDates, b.single_filter("$td")));
            plans.push(b.plan(
                format!("{property}{RANGE_SUFFIX}"),
                vec!["start", "end"],
                Range,
                b.single_filter("$start"),
            ));
        }
        BiTemporal => {
            plans.push(b.plan(
                name.clone(),
                vec!["pd", "bd"],
                AllDates,
                PlanBuilder::bitemporal_filter("$pd", "$bd"),
            ));
            match owner {
                None => {}
                Some(BiTemporal) => {
                    plans.push(b.plan(
                        name.clone(),
                        vec!["td"],
                        OneDate,
                        PlanBuilder::bitemporal_filter("$td", "$td"),
                    ));
                    plans.push(b.plan(
                        name,
                        Vec::new(),
                        NoArg,
                        PlanBuilder::bitemporal_filter("$this.processingDate", "$this.businessDate"),
                    ));
                }
                Some(single) => {
                    let (processing, business) = if single == ProcessingTemporal {
                        ("$this.processingDate", "$td")
                    } else {
                        ("$td", "$this.businessDate")
                    };
                    plans.push(b.plan(
                        name,
                        vec!["td"],
                        OneDate,
                        PlanBuilder::bitemporal_filter(processing, business),
                    ));
                }
            }
        }
    }
    plans
}

/// Source text of the date properties a temporal class receives.
pub fn date_property_sources(stereotype: MilestoningStereotype) -> Vec<String> {
    stereotype
        .date_names()
        .iter()
        .map(|d| format!("<<{GENERATED_DATE_PROPERTY}>> {d}: Date[1];"))
        .chain(std::iter::once(format!(
            "<<{GENERATED_DATE_PROPERTY}>> {MILESTONING_PROPERTY} : {}[0..1];",
            stereotype.milestoning_class()
        )))
        .collect()
}

// ── Installation ─────────────────────────────────────────────────────

fn own_stereotype(model: &Model, id: TypeId) -> Option<MilestoningStereotype> {
    model
        .ty(id)
        .stereotypes
        .iter()
        .find_map(|s| MilestoningStereotype::from_name(s))
}

fn is_generated(model: &Model, id: FunctionId) -> bool {
    let def = model.function(id);
    def.generated.is_some() || def.stereotypes.iter().any(|s| s.starts_with(PROFILE))
}

fn install_milestoning_classes(model: &mut Model) {
    for stereotype in MilestoningStereotype::ALL {
        let class = model.add_class(stereotype.milestoning_class());
        if !model.ty(class).properties.is_empty() {
            continue;
        }
        for edge in stereotype.edge_point_names() {
            model.add_property(class, edge, TypeDescriptor::concrete("Date"), Multiplicity::one());
        }
    }
}

fn install_date_properties(model: &mut Model, class: TypeId, stereotype: MilestoningStereotype) {
    let name = model.ty(class).name.clone();
    if model.find_property(&name, stereotype.date_names()[0]).is_some() {
        return;
    }
    for date in stereotype.date_names() {
        let id = model.add_property(class, date, TypeDescriptor::concrete("Date"), Multiplicity::one());
        model.function_mut(id).stereotypes.push(GENERATED_DATE_PROPERTY.to_string());
    }
    let (_, milestoning_class) = tempo_common::package::split_path(stereotype.milestoning_class());
    let id = model.add_property(
        class,
        MILESTONING_PROPERTY,
        TypeDescriptor::concrete(milestoning_class),
        Multiplicity::zero_one(),
    );
    model.function_mut(id).stereotypes.push(GENERATED_DATE_PROPERTY.to_string());
}

fn install_milestoned_property(
    model: &mut Model,
    owner: TypeId,
    property: FunctionId,
    target: MilestoningStereotype,
) {
    let owner_name = model.ty(owner).name.clone();
    let owner_stereotype = model.milestoning(&owner_name);
    let def = model.function(property);
    let name = def.name.clone();
    let ret = def.signature.ret.clone();
    let mul = def.signature.ret_mul.clone();
    let return_type = ret.to_string();

    let edge = model.add_property(owner, &format!("{name}{EDGE_POINT_SUFFIX}"), ret.clone(), Multiplicity::many());
    let edge_def = model.function_mut(edge);
    edge_def.stereotypes.push(GENERATED_PROPERTY.to_string());
    edge_def.generated = Some(GeneratedProperty {
        target,
        variant: GeneratedVariant::AllVersions,
        original: name.clone(),
        source: format!("<<{GENERATED_PROPERTY}>> {name}{EDGE_POINT_SUFFIX} : {return_type}[*];"),
    });

    for plan in qualified_property_plans(owner_stereotype, target, &name, &return_type, &mul) {
        let params = plan
            .date_params
            .iter()
            .map(|p| Param::new(*p, TypeDescriptor::concrete("Date"), Multiplicity::one()))
            .collect();
        let qp = model.add_qualified_property(owner, &plan.name, params, ret.clone(), plan.ret_mul);
        let qp_def = model.function_mut(qp);
        qp_def.stereotypes.push(GENERATED_PROPERTY.to_string());
        qp_def.generated = Some(plan.generated);
    }
    model.retire_property(owner, property);
    log::debug!("milestoned property {owner_name}.{name} -> {}", target.name());
}

/// Generate date properties and milestoned qualified properties for every
/// class in the model. Running it twice is a no-op.
pub fn install(model: &mut Model) {
    install_milestoning_classes(model);
    let classes: Vec<TypeId> = model.types().filter(|t| t.is_class()).map(|t| t.id).collect();
    for &class in &classes {
        if let Some(stereotype) = own_stereotype(model, class) {
            install_date_properties(model, class, stereotype);
        }
    }
    for class in classes {
        let properties = model.ty(class).properties.clone();
        for property in properties {
            if is_generated(model, property) {
                continue;
            }
            let target = model
                .function(property)
                .signature
                .ret
                .raw_name()
                .and_then(|name| model.milestoning(name));
            if let Some(target) = target {
                install_milestoned_property(model, class, property, target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereotype_data() {
        use MilestoningStereotype::*;
        assert_eq!(MilestoningStereotype::from_name("bitemporal"), Some(BiTemporal));
        assert_eq!(MilestoningStereotype::from_name("temporal"), None);
        assert_eq!(BiTemporal.date_names(), ["processingDate", "businessDate"]);
        assert_eq!(BusinessTemporal.bitemporal_position(), Some(1));
        assert_eq!(ProcessingTemporal.bitemporal_position(), Some(0));
        assert_eq!(BiTemporal.bitemporal_position(), None);
    }

    #[test]
    fn single_date_plans_for_same_stereotype_owner() {
        let plans = qualified_property_plans(
            Some(MilestoningStereotype::BusinessTemporal),
            MilestoningStereotype::BusinessTemporal,
            "classification",
            "Classification",
            &Multiplicity::one(),
        );
        let names: Vec<(&str, usize)> = plans.iter().map(|p| (p.name.as_str(), p.date_params.len())).collect();
        assert_eq!(
            names,
            [
                ("classification", 0),
                ("classification", 1),
                ("classificationAllVersionsInRange", 2)
            ]
        );
        insta::assert_snapshot!(plans[1].generated.source, @"<<meta::pure::profiles::milestoning.generatedmilestoningproperty>>classification(td:Date[1]){$this.classificationAllVersions->filter(v_milestone| $v_milestone.businessDate->eq($td))->toOne() } : Classification[1];");
    }

    #[test]
    fn no_arg_plan_needs_matching_owner() {
        let plans = qualified_property_plans(
            Some(MilestoningStereotype::ProcessingTemporal),
            MilestoningStereotype::BusinessTemporal,
            "classification",
            "Classification",
            &Multiplicity::one(),
        );
        assert!(plans.iter().all(|p| p.generated.variant != GeneratedVariant::NoArg));

        let plans = qualified_property_plans(
            Some(MilestoningStereotype::BiTemporal),
            MilestoningStereotype::BusinessTemporal,
            "exchange",
            "Exchange",
            &Multiplicity::one(),
        );
        assert_eq!(plans[0].generated.variant, GeneratedVariant::NoArg);
    }

    #[test]
    fn bitemporal_target_plans_by_owner() {
        let count = |owner| {
            qualified_property_plans(owner, MilestoningStereotype::BiTemporal, "p", "T", &Multiplicity::one()).len()
        };
        assert_eq!(count(None), 1);
        assert_eq!(count(Some(MilestoningStereotype::BiTemporal)), 3);
        assert_eq!(count(Some(MilestoningStereotype::BusinessTemporal)), 2);
    }

    #[test]
    fn one_date_bitemporal_plan_reuses_owner_date() {
        let plans = qualified_property_plans(
            Some(MilestoningStereotype::BusinessTemporal),
            MilestoningStereotype::BiTemporal,
            "location",
            "Location",
            &Multiplicity::zero_one(),
        );
        insta::assert_snapshot!(plans[1].generated.source, @"<<meta::pure::profiles::milestoning.generatedmilestoningproperty>>location(td:Date[1]){$this.locationAllVersions->filter(v_milestone| $v_milestone.processingDate->eq($td) && $v_milestone.businessDate->eq($this.businessDate) )->first() } : Location[0..1];");
    }

    #[test]
    fn missing_dates() {
        let generated = |target, variant| GeneratedProperty {
            target,
            variant,
            original: "p".into(),
            source: String::new(),
        };
        let bt = generated(MilestoningStereotype::BusinessTemporal, GeneratedVariant::NoArg);
        assert!(bt.is_missing_dates(1));
        assert!(!bt.is_missing_dates(2));
        let range = generated(MilestoningStereotype::BusinessTemporal, GeneratedVariant::Range);
        assert!(!range.is_missing_dates(3));
        let bi = generated(MilestoningStereotype::BiTemporal, GeneratedVariant::OneDate);
        assert!(bi.is_missing_dates(2));
        assert!(!bi.is_missing_dates(3));
    }

    #[test]
    fn date_properties_include_milestoning() {
        let sources = date_property_sources(MilestoningStereotype::BusinessTemporal);
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[1],
            "<<meta::pure::profiles::milestoning.generatedmilestoningdateproperty>> milestoning : meta::pure::milestoning::BusinessDateMilestoning[0..1];"
        );
    }

    #[test]
    fn install_is_idempotent() {
        let mut model = Model::new();
        let product = model.add_class("trading::Product");
        model.add_stereotype(product, "businesstemporal");
        let classification = model.add_class("trading::Classification");
        model.add_stereotype(classification, "businesstemporal");
        let declared = model.add_property(
            product,
            "classification",
            TypeDescriptor::concrete("Classification"),
            Multiplicity::one(),
        );

        install(&mut model);
        let properties = model.ty(product).properties.len();
        let qualified = model.ty(product).qualified_properties.len();
        install(&mut model);

        assert_eq!(model.ty(product).properties.len(), properties);
        assert_eq!(model.ty(product).qualified_properties.len(), qualified);
        assert_eq!(model.ty(product).original_milestoned_properties, vec![declared]);
        assert!(model.find_property("Product", "classificationAllVersions").is_some());
        assert!(model.find_property("Product", "businessDate").is_some());
        assert_eq!(model.find_qualified_properties("Product", "classification").len(), 2);
    }
}
