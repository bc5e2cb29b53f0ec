//! Opt-in record of the steps call resolution took.
//!
//! Enabled with [`InferenceOptions::trace`](crate::InferenceOptions). The
//! trace is plain data, exported with `serde_json` for tooling and tests.

use serde::Serialize;

use crate::graph::ExprId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TraceStep {
    /// Arguments processed; `failed` lists the positions left untyped.
    FirstPass {
        call: ExprId,
        name: String,
        failed: Vec<usize>,
    },
    CandidatesFound {
        call: ExprId,
        name: String,
        count: usize,
    },
    /// An argument type bound a candidate's template.
    Registered {
        call: ExprId,
        offset: usize,
        template: String,
        actual: String,
    },
    /// An argument was resolved again under its template.
    ReverseMatch { call: ExprId, offset: usize },
    RolledBack { call: ExprId, function: String },
    /// A property call was rewritten to a `map` over its receiver.
    Automap { call: ExprId, property: String },
    /// Milestoning dates were supplied to a generated property.
    MilestoningRewrite {
        call: ExprId,
        property: String,
        dates: usize,
    },
    Finalized {
        call: ExprId,
        function: String,
        ty: String,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InferenceTrace {
    pub steps: Vec<TraceStep>,
}

impl InferenceTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The functions calls were finalized against, in order.
    pub fn finalized(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                TraceStep::Finalized { function, .. } => Some(function.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_serialize_tagged() {
        let mut trace = InferenceTrace::new();
        trace.push(TraceStep::RolledBack {
            call: ExprId(3),
            function: "map".into(),
        });
        trace.push(TraceStep::Finalized {
            call: ExprId(3),
            function: "map".into(),
            ty: "String[*]".into(),
        });
        insta::assert_snapshot!(trace.to_json(), @r#"{"steps":[{"step":"rolled_back","call":3,"function":"map"},{"step":"finalized","call":3,"function":"map","ty":"String[*]"}]}"#);
        assert_eq!(trace.finalized(), vec!["map"]);
        assert_eq!(trace.len(), 2);
    }
}
