//! Threading milestoning dates through call chains.
//!
//! A date context flows from a dated source (a `getAll` with dates, a dated
//! qualified property, a lambda parameter bound to such a source) into the
//! milestoned property calls that consume it, so `.classification` on a
//! `Product.all(%2015)` element resolves as `.classification(%2015)`.

use crate::builtins;
use crate::graph::{ExprGraph, ExprId, ExprKind, MilestoningRewrite};
use crate::model::{FunctionId, Model};

use super::catalog::{GeneratedVariant, MilestoningStereotype};

/// The dates a source is milestoned at. The expressions are shared with
/// the source, never copied.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MilestoningDates {
    pub business: Option<ExprId>,
    pub processing: Option<ExprId>,
}

impl MilestoningDates {
    /// Read dates off a dated call's date arguments, in the order the
    /// stereotype lists them.
    pub fn from_args(stereotype: MilestoningStereotype, args: &[ExprId]) -> Option<Self> {
        if args.len() != stereotype.date_count() {
            return None;
        }
        Some(match stereotype {
            MilestoningStereotype::BusinessTemporal => Self {
                business: Some(args[0]),
                processing: None,
            },
            MilestoningStereotype::ProcessingTemporal => Self {
                business: None,
                processing: Some(args[0]),
            },
            MilestoningStereotype::BiTemporal => Self {
                business: Some(args[1]),
                processing: Some(args[0]),
            },
        })
    }

    /// The stereotype these dates describe.
    pub fn stereotype(&self) -> Option<MilestoningStereotype> {
        match (self.processing, self.business) {
            (Some(_), Some(_)) => Some(MilestoningStereotype::BiTemporal),
            (Some(_), None) => Some(MilestoningStereotype::ProcessingTemporal),
            (None, Some(_)) => Some(MilestoningStereotype::BusinessTemporal),
            (None, None) => None,
        }
    }

    /// The single date of a single-date stereotype.
    pub fn get(&self, stereotype: MilestoningStereotype) -> Option<ExprId> {
        match stereotype {
            MilestoningStereotype::BusinessTemporal => self.business,
            MilestoningStereotype::ProcessingTemporal => self.processing,
            MilestoningStereotype::BiTemporal => None,
        }
    }
}

/// Date contexts of enclosing lambda parameters, innermost last.
#[derive(Debug, Default)]
pub struct DateContextStack {
    frames: Vec<(String, Option<MilestoningDates>)>,
}

impl DateContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a lambda whose parameter `name` ranges over a source with
    /// `dates`. A `None` entry still shadows outer parameters of that name.
    pub fn push(&mut self, name: impl Into<String>, dates: Option<MilestoningDates>) {
        self.frames.push((name.into(), dates));
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn lookup(&self, name: &str) -> Option<MilestoningDates> {
        self.frames
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .and_then(|(_, dates)| *dates)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Whether the lambdas passed to `function` receive elements of its first
/// argument, so the first argument's dates flow into them.
pub fn supports_lambda_propagation(function: &str) -> bool {
    builtins::DATE_PROPAGATING.contains(&function)
}

/// The dates `expr` is milestoned at, if any.
pub fn dates_of(graph: &ExprGraph, model: &Model, contexts: &DateContextStack, expr: ExprId) -> Option<MilestoningDates> {
    match &graph.get(expr).kind {
        ExprKind::Variable(name) => contexts.lookup(name),
        ExprKind::Call(call) => {
            let def = model.function(call.target?);
            if let Some(generated) = &def.generated {
                let dated = matches!(
                    generated.variant,
                    GeneratedVariant::NoArg | GeneratedVariant::OneDate | GeneratedVariant::AllDates
                );
                if dated && !def.is_generated_with_missing_dates() {
                    return MilestoningDates::from_args(generated.target, &call.params[1..]);
                }
                return None;
            }
            match def.name.as_str() {
                builtins::GET_ALL => {
                    let ExprKind::ClassRef(class) = &graph.get(*call.params.first()?).kind else {
                        return None;
                    };
                    let stereotype = model.milestoning(class)?;
                    MilestoningDates::from_args(stereotype, &call.params[1..])
                }
                builtins::MAP if call.rewritten_from.is_some() => {
                    let lambda = graph.lambda(*call.params.get(1)?)?;
                    let last = *lambda.body.last()?;
                    graph.call(last)?;
                    dates_of(graph, model, contexts, last)
                }
                builtins::FILTER | builtins::SUB_TYPE => dates_of(graph, model, contexts, *call.params.first()?),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The full date list for a `target`-milestoned property, given the source
/// context and the dates the call supplied itself.
pub fn propagated_dates(
    target: MilestoningStereotype,
    source: &MilestoningDates,
    supplied: &[ExprId],
) -> Option<Vec<ExprId>> {
    use MilestoningStereotype::*;
    match (target, supplied) {
        (BusinessTemporal | ProcessingTemporal, []) => source.get(target).map(|d| vec![d]),
        (BiTemporal, []) => Some(vec![source.processing?, source.business?]),
        (BiTemporal, [given]) => match source.stereotype()? {
            BiTemporal => Some(vec![source.processing?, *given]),
            single => {
                let position = single.bitemporal_position()?;
                let propagated = source.get(single)?;
                let mut dates = vec![*given, *given];
                dates[position] = propagated;
                Some(dates)
            }
        },
        _ => None,
    }
}

/// The generated qualified property on `owner` named `name` taking every
/// date of `target`.
pub fn all_dates_property(model: &Model, owner: &str, name: &str, target: MilestoningStereotype) -> Option<FunctionId> {
    let arity = 1 + target.date_count();
    model.find_qualified_properties(owner, name).into_iter().find(|q| {
        let def = model.function(*q);
        def.arity() == arity
            && def
                .generated
                .as_ref()
                .is_some_and(|g| g.target == target && g.variant == GeneratedVariant::AllDates)
    })
}

/// Complete the milestoned property call `call` with dates taken from
/// `source`, rewriting it to the variant that takes all of them. `matched`
/// is the candidate the call matched before the rewrite, if it had one.
///
/// Returns the new target, or `None` when the dates cannot be propagated;
/// the call is left untouched in that case.
pub fn get_milestoning_qualified_property_with_all_dates_supplied(
    graph: &mut ExprGraph,
    model: &Model,
    call: ExprId,
    owner: &str,
    target: MilestoningStereotype,
    matched: Option<FunctionId>,
    source: &MilestoningDates,
) -> Option<FunctionId> {
    let node = graph.call(call)?;
    let name = node.name.clone()?;
    let receiver = *node.params.first()?;
    let dates = propagated_dates(target, source, &node.params[1..])?;
    let dated = all_dates_property(model, owner, &name, target)?;

    let node = graph.call_mut(call)?;
    node.milestoning = Some(MilestoningRewrite {
        original_target: matched,
        original_params: node.params.clone(),
    });
    node.params = std::iter::once(receiver).chain(dates).collect();
    node.target = Some(dated);
    log::debug!("milestoning dates propagated into '{name}' ({})", target.name());
    Some(dated)
}

/// Undo the rewrite made by
/// [`get_milestoning_qualified_property_with_all_dates_supplied`]. Returns
/// false when `call` was not rewritten.
pub fn undo_auto_gen_milestoned_qualifier(graph: &mut ExprGraph, call: ExprId) -> bool {
    graph.call_mut(call).is_some_and(|c| c.undo_milestoning())
}
