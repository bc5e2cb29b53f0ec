//! Resolution errors.
//!
//! Every error carries the source range of the expression it was raised
//! for. All of them are fatal for the function being checked.

use std::fmt;

use rowan::TextRange;
use tempo_common::error::{ScopeError, ScopeErrorKind};

use crate::milestoning::catalog::MilestoningStereotype;

/// Same-named functions that would match a failed call with other
/// arguments, split by whether the call site imports their package.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Suggestions {
    pub imported: Vec<String>,
    pub not_imported: Vec<String>,
}

impl Suggestions {
    pub fn is_empty(&self) -> bool {
        self.imported.is_empty() && self.not_imported.is_empty()
    }
}

impl fmt::Display for Suggestions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.imported.is_empty() {
            writeln!(f, "No functions, in packages already imported, match the function name.")?;
        } else {
            writeln!(
                f,
                "These functions, in packages already imported, would match the function call if you changed the parameters."
            )?;
            for sig in &self.imported {
                writeln!(f, "\t{sig}")?;
            }
        }
        writeln!(f)?;
        if self.not_imported.is_empty() {
            writeln!(f, "No functions, in packages not imported, match the function name.")
        } else {
            writeln!(
                f,
                "These functions, in packages not imported, match the function name. Add the package to your imports."
            )?;
            for sig in &self.not_imported {
                writeln!(f, "\t{sig}")?;
            }
            Ok(())
        }
    }
}

fn bracketed(names: &[String]) -> String {
    format!("[{}]", names.join(", "))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeError {
    /// No candidate accepted the call.
    NoMatch {
        /// `f(_:A[1],_:B[1])`
        call: String,
        suggestions: Option<Suggestions>,
        span: TextRange,
    },
    /// Several candidates fit the arguments equally well.
    AmbiguousCall {
        function: String,
        candidates: Vec<String>,
        span: TextRange,
    },
    PropertyNotFound {
        property: String,
        class: String,
        span: TextRange,
    },
    PropertyRequiresParameters { property: String, span: TextRange },
    AmbiguousPropertyParameters {
        property: String,
        count: usize,
        span: TextRange,
    },
    /// A milestoned property used without dates where none can be inferred.
    MilestonedPropertyRequiresDates {
        property: String,
        stereotype: MilestoningStereotype,
        span: TextRange,
    },
    NoArgMilestonedProperty {
        property: String,
        stereotype: MilestoningStereotype,
        span: TextRange,
    },
    /// `getAll` on a temporal class with the wrong number of dates.
    GetAllDates {
        class: String,
        stereotype: MilestoningStereotype,
        span: TextRange,
    },
    UnresolvedReturnType {
        function: String,
        kind: &'static str,
        ty: String,
        span: TextRange,
    },
    /// The receiver of a property access has no usable type yet.
    TypeNotInferred {
        ty: String,
        property: String,
        span: TextRange,
    },
    ColumnNotFound {
        column: String,
        relation: String,
        span: TextRange,
    },
    UnknownType { name: String, span: TextRange },
    Scope { error: ScopeError, span: TextRange },
}

impl TypeError {
    pub fn span(&self) -> TextRange {
        match self {
            TypeError::NoMatch { span, .. }
            | TypeError::AmbiguousCall { span, .. }
            | TypeError::PropertyNotFound { span, .. }
            | TypeError::PropertyRequiresParameters { span, .. }
            | TypeError::AmbiguousPropertyParameters { span, .. }
            | TypeError::MilestonedPropertyRequiresDates { span, .. }
            | TypeError::NoArgMilestonedProperty { span, .. }
            | TypeError::GetAllDates { span, .. }
            | TypeError::UnresolvedReturnType { span, .. }
            | TypeError::TypeNotInferred { span, .. }
            | TypeError::ColumnNotFound { span, .. }
            | TypeError::UnknownType { span, .. }
            | TypeError::Scope { span, .. } => *span,
        }
    }

    /// Attach a source range, replacing the one the error was created with.
    pub fn with_span(mut self, range: TextRange) -> Self {
        match &mut self {
            TypeError::NoMatch { span, .. }
            | TypeError::AmbiguousCall { span, .. }
            | TypeError::PropertyNotFound { span, .. }
            | TypeError::PropertyRequiresParameters { span, .. }
            | TypeError::AmbiguousPropertyParameters { span, .. }
            | TypeError::MilestonedPropertyRequiresDates { span, .. }
            | TypeError::NoArgMilestonedProperty { span, .. }
            | TypeError::GetAllDates { span, .. }
            | TypeError::UnresolvedReturnType { span, .. }
            | TypeError::TypeNotInferred { span, .. }
            | TypeError::ColumnNotFound { span, .. }
            | TypeError::UnknownType { span, .. }
            | TypeError::Scope { span, .. } => *span = range,
        }
        self
    }
}

impl From<ScopeError> for TypeError {
    fn from(error: ScopeError) -> Self {
        TypeError::Scope {
            error,
            span: TextRange::default(),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::NoMatch {
                call, suggestions, ..
            } => {
                write!(f, "The system can't find a match for the function: {call}")?;
                if let Some(suggestions) = suggestions {
                    write!(f, "\n\n{suggestions}")?;
                }
                Ok(())
            }
            TypeError::AmbiguousCall {
                function,
                candidates,
                ..
            } => write!(
                f,
                "The call to '{function}' is ambiguous. Candidates: {}",
                candidates.join(", ")
            ),
            TypeError::PropertyNotFound {
                property, class, ..
            } => write!(f, "Can't find the property '{property}' in the class {class}"),
            TypeError::PropertyRequiresParameters { property, .. } => {
                write!(f, "The property '{property}' requires some parameters.")
            }
            TypeError::AmbiguousPropertyParameters {
                property, count, ..
            } => write!(
                f,
                "There are {count} properties named '{property}' and all require additional parameters."
            ),
            TypeError::MilestonedPropertyRequiresDates {
                property,
                stereotype,
                ..
            } => write!(
                f,
                "The property '{property}' is milestoned with stereotypes: [ {} ] and requires date parameters: [ {} ]",
                stereotype.name(),
                stereotype.date_names().join(", ")
            ),
            TypeError::NoArgMilestonedProperty {
                property,
                stereotype,
                ..
            } => write!(
                f,
                "No-Arg milestoned property: '{property}' must be either called in a milestoning context or supplied with {} parameters",
                bracketed(&date_names(*stereotype))
            ),
            TypeError::GetAllDates {
                class, stereotype, ..
            } => write!(
                f,
                "The type {class} is [{}], {} should be supplied as a parameter to all()",
                stereotype.name(),
                bracketed(&date_names(*stereotype))
            ),
            TypeError::UnresolvedReturnType {
                function, kind, ty, ..
            } => write!(
                f,
                "The system is not capable of inferring the return type ({ty}) of the {kind} '{function}'. Check your signatures!"
            ),
            TypeError::TypeNotInferred { ty, property, .. } => write!(
                f,
                "The type '{ty}' can't be inferred yet. Please specify it. (Property:'{property}')"
            ),
            TypeError::ColumnNotFound {
                column, relation, ..
            } => write!(f, "The column '{column}' can't be found in the relation {relation}"),
            TypeError::UnknownType { name, .. } => write!(f, "Can't find the type '{name}'"),
            TypeError::Scope { error, .. } => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for TypeError {}

fn date_names(stereotype: MilestoningStereotype) -> Vec<String> {
    stereotype.date_names().iter().map(|d| d.to_string()).collect()
}

/// The short label diagnostics use for a scope error.
pub fn scope_label(error: &ScopeError) -> &'static str {
    match error.kind {
        ScopeErrorKind::NameConflict => "defined again here",
        ScopeErrorKind::UnknownVariable => "not defined in any enclosing scope",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> TextRange {
        TextRange::new(0.into(), 4.into())
    }

    #[test]
    fn no_match_with_suggestions() {
        let err = TypeError::NoMatch {
            call: "f(_:A[1],_:B[1])".into(),
            suggestions: Some(Suggestions {
                imported: vec!["f(A[1], B[1], C[1]):Boolean[1]".into()],
                not_imported: Vec::new(),
            }),
            span: span(),
        };
        assert_eq!(
            err.to_string(),
            "The system can't find a match for the function: f(_:A[1],_:B[1])\n\n\
             These functions, in packages already imported, would match the function call if you changed the parameters.\n\
             \tf(A[1], B[1], C[1]):Boolean[1]\n\n\
             No functions, in packages not imported, match the function name.\n"
        );
    }

    #[test]
    fn milestoning_messages() {
        let err = TypeError::GetAllDates {
            class: "Product".into(),
            stereotype: MilestoningStereotype::BusinessTemporal,
            span: span(),
        };
        assert_eq!(
            err.to_string(),
            "The type Product is [businesstemporal], [businessDate] should be supplied as a parameter to all()"
        );
        let err = TypeError::MilestonedPropertyRequiresDates {
            property: "location".into(),
            stereotype: MilestoningStereotype::BiTemporal,
            span: span(),
        };
        assert_eq!(
            err.to_string(),
            "The property 'location' is milestoned with stereotypes: [ bitemporal ] and requires date parameters: [ processingDate, businessDate ]"
        );
    }

    #[test]
    fn scope_errors_convert_and_take_span() {
        let err = TypeError::from(ScopeError::conflict("x")).with_span(span());
        assert_eq!(err.span(), span());
        assert_eq!(err.to_string(), "'x' has already been defined!");
    }
}
