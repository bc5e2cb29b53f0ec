//! Lambda typing.
//!
//! A lambda with undeclared parameters can only be typed once the call it
//! is passed to has chosen a candidate: the parameters take the types of the
//! candidate's function template, and the body is then processed in a scope
//! holding them.

use crate::env::VariableValue;
use crate::error::TypeError;
use crate::graph::{ExprId, LambdaParam};
use crate::infer::{Checker, Outcome};
use crate::milestoning::propagate::MilestoningDates;
use crate::model::NIL;
use crate::ty::{FunctionType, Multiplicity, ParamType, TypeDescriptor};

impl Checker<'_> {
    /// Type the lambda `id`. `template` is the parameter slot it is passed
    /// to, if known; `dates` is the milestoning context of its first
    /// parameter.
    pub(crate) fn process_lambda(
        &mut self,
        id: ExprId,
        template: Option<&TypeDescriptor>,
        dates: Option<MilestoningDates>,
    ) -> Result<Outcome, TypeError> {
        let node = self.graph.get(id);
        if template.is_none() && node.processed && node.ty.is_some() {
            return Ok(Outcome::Typed);
        }
        let Some(lambda) = self.graph.lambda(id).cloned() else {
            return Ok(Outcome::Deferred);
        };

        let expected = template
            .map(|t| self.ctx.make_as_concrete(t, self.model))
            .and_then(|t| t.function_type().cloned());
        let mut params = lambda.params.clone();
        for (index, param) in params.iter_mut().enumerate() {
            if param.is_typed() && !param.inferred {
                continue;
            }
            match expected.as_ref().and_then(|ft| ft.params.get(index)) {
                Some(slot) if self.ctx.is_settled(&slot.ty) && self.ctx.is_mul_settled(&slot.mul) => {
                    param.specialize(slot.ty.clone(), slot.mul.clone());
                }
                _ => return Ok(Outcome::Deferred),
            }
        }
        if let Some(l) = self.graph.lambda_mut(id) {
            l.params = params.clone();
        }

        self.scope.push();
        for (index, param) in params.iter().enumerate() {
            self.dates.push(param.name.clone(), if index == 0 { dates } else { None });
        }
        let result = self.process_body(id, &params, &lambda.body);
        for _ in &params {
            self.dates.pop();
        }
        self.scope.pop();

        let Some((ret, ret_mul)) = result? else {
            return Ok(Outcome::Deferred);
        };
        let signature = FunctionType {
            params: params
                .iter()
                .filter_map(|p| Some(ParamType::new(p.ty.clone()?, p.mul.clone()?)))
                .collect(),
            ret,
            ret_mul,
        };
        log::trace!("lambda typed as {signature}");
        Ok(self.settle(id, TypeDescriptor::lambda_of(signature), Multiplicity::one()))
    }

    /// Register the parameters and process the body in order. Returns the
    /// type of the last expression, or `None` if any expression deferred.
    fn process_body(
        &mut self,
        id: ExprId,
        params: &[LambdaParam],
        body: &[ExprId],
    ) -> Result<Option<(TypeDescriptor, Multiplicity)>, TypeError> {
        for param in params {
            let (Some(ty), Some(mul)) = (&param.ty, &param.mul) else {
                continue;
            };
            self.scope
                .register_value(&param.name, VariableValue::new(ty.clone(), mul.clone()))
                .map_err(|e| TypeError::from(e).with_span(self.graph.range(id)))?;
        }
        for &expr in body {
            if self.process(expr)? == Outcome::Deferred {
                return Ok(None);
            }
        }
        match body.last() {
            Some(&last) => Ok(self.typed(last)),
            None => Ok(Some((TypeDescriptor::concrete(NIL), Multiplicity::exactly(0)))),
        }
    }
}
