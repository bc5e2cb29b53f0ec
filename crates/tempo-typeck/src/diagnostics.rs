//! Ariadne-based diagnostic rendering for resolution errors.
//!
//! Every [`TypeError`] renders as a report with an error code, the
//! error's message, a label on the offending expression and, when the
//! resolver found near misses, a help section listing them. In JSON mode
//! the same content is emitted as a single line for tooling.

use std::ops::Range;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use serde::Serialize;
use tempo_common::line_index::{LineIndex, Position};

use crate::error::{scope_label, TypeError};

/// How diagnostics are rendered.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticOptions {
    pub color: bool,
    /// One JSON object per diagnostic instead of an ariadne report.
    pub json: bool,
}

impl DiagnosticOptions {
    /// Plain text without ANSI escapes, for snapshots and logs.
    pub fn colorless() -> Self {
        DiagnosticOptions {
            color: false,
            json: false,
        }
    }

    pub fn json_mode() -> Self {
        DiagnosticOptions {
            color: false,
            json: true,
        }
    }
}

// ── Error Codes ────────────────────────────────────────────────────────

fn error_code(err: &TypeError) -> &'static str {
    match err {
        TypeError::NoMatch { .. } => "E0001",
        TypeError::AmbiguousCall { .. } => "E0002",
        TypeError::PropertyNotFound { .. } => "E0003",
        TypeError::PropertyRequiresParameters { .. } | TypeError::AmbiguousPropertyParameters { .. } => "E0004",
        TypeError::MilestonedPropertyRequiresDates { .. } => "E0005",
        TypeError::NoArgMilestonedProperty { .. } => "E0006",
        TypeError::GetAllDates { .. } => "E0007",
        TypeError::UnresolvedReturnType { .. } => "E0008",
        TypeError::TypeNotInferred { .. } => "E0009",
        TypeError::ColumnNotFound { .. } => "E0010",
        TypeError::UnknownType { .. } => "E0011",
        TypeError::Scope { .. } => "E0012",
    }
}

/// The headline message: the first line of the error's display text.
fn headline(err: &TypeError) -> String {
    let text = err.to_string();
    text.lines().next().unwrap_or_default().to_string()
}

fn label_text(err: &TypeError) -> String {
    match err {
        TypeError::NoMatch { .. } => "no candidate accepts these arguments".to_string(),
        TypeError::AmbiguousCall { candidates, .. } => format!("{} candidates fit equally well", candidates.len()),
        TypeError::PropertyNotFound { class, .. } => format!("not a property of {class}"),
        TypeError::PropertyRequiresParameters { .. } | TypeError::AmbiguousPropertyParameters { .. } => {
            "called without parameters".to_string()
        }
        TypeError::MilestonedPropertyRequiresDates { .. } | TypeError::NoArgMilestonedProperty { .. } => {
            "no milestoning context here".to_string()
        }
        TypeError::GetAllDates { stereotype, .. } => {
            format!("expected {} date(s)", stereotype.date_count())
        }
        TypeError::UnresolvedReturnType { ty, .. } => format!("returns {ty}"),
        TypeError::TypeNotInferred { .. } => "type unknown here".to_string(),
        TypeError::ColumnNotFound { relation, .. } => format!("not a column of {relation}"),
        TypeError::UnknownType { .. } => "unknown type".to_string(),
        TypeError::Scope { error, .. } => scope_label(error).to_string(),
    }
}

/// Lines for the help section, if the error carries any.
fn help_text(err: &TypeError) -> Option<String> {
    match err {
        TypeError::NoMatch {
            suggestions: Some(suggestions),
            ..
        } if !suggestions.is_empty() => Some(suggestions.to_string().trim_end().to_string()),
        TypeError::AmbiguousCall { candidates, .. } => Some(format!("candidates: {}", candidates.join(", "))),
        TypeError::MilestonedPropertyRequiresDates { stereotype, .. }
        | TypeError::NoArgMilestonedProperty { stereotype, .. } => {
            Some(format!("supply [{}]", stereotype.date_names().join(", ")))
        }
        _ => None,
    }
}

// ── Span Helpers ───────────────────────────────────────────────────────

fn text_range_to_range(range: rowan::TextRange) -> Range<usize> {
    let start: usize = range.start().into();
    let end: usize = range.end().into();
    start..end
}

/// Clamp to the source and widen empty spans to one character.
fn clamp(range: Range<usize>, source_len: usize) -> Range<usize> {
    let start = range.start.min(source_len);
    let end = range.end.min(source_len).max(start);
    if start == end {
        start..end.saturating_add(1).min(source_len)
    } else {
        start..end
    }
}

// ── JSON ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonSpan {
    start: usize,
    end: usize,
    label: String,
}

#[derive(Serialize)]
struct JsonDiagnostic<'a> {
    code: &'static str,
    severity: &'static str,
    message: String,
    file: &'a str,
    line: u32,
    column: u32,
    spans: Vec<JsonSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<String>,
}

fn render_json(error: &TypeError, source: &str, filename: &str) -> String {
    let range = clamp(text_range_to_range(error.span()), source.len());
    let Position { line, column } = LineIndex::new(source).position(range.start as u32);
    let diagnostic = JsonDiagnostic {
        code: error_code(error),
        severity: "error",
        message: error.to_string(),
        file: filename,
        line,
        column,
        spans: vec![JsonSpan {
            start: range.start,
            end: range.end,
            label: label_text(error),
        }],
        help: help_text(error),
    };
    serde_json::to_string(&diagnostic).unwrap_or_else(|_| error.to_string())
}

// ── Main Rendering Function ────────────────────────────────────────────

/// Render a resolution error as a diagnostic string.
pub fn render_diagnostic(error: &TypeError, source: &str, filename: &str, options: &DiagnosticOptions) -> String {
    if options.json {
        return render_json(error, source, filename);
    }
    let config = Config::default().with_color(options.color);
    let span = clamp(text_range_to_range(error.span()), source.len());

    let mut builder = Report::build(ReportKind::Error, span.clone())
        .with_code(error_code(error))
        .with_message(headline(error))
        .with_config(config)
        .with_label(Label::new(span).with_message(label_text(error)).with_color(Color::Red));
    if let Some(help) = help_text(error) {
        builder = builder.with_help(help);
    }

    let mut buf = Vec::new();
    if builder.finish().write(Source::from(source), &mut buf).is_err() {
        return error.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use rowan::TextRange;

    use super::*;
    use crate::error::Suggestions;

    #[test]
    fn codes_are_distinct_per_kind() {
        let span = TextRange::new(0.into(), 1.into());
        let a = TypeError::UnknownType {
            name: "Foo".into(),
            span,
        };
        let b = TypeError::ColumnNotFound {
            column: "x".into(),
            relation: "(a:Integer)".into(),
            span,
        };
        assert_ne!(error_code(&a), error_code(&b));
    }

    #[test]
    fn help_lists_suggestions() {
        let err = TypeError::NoMatch {
            call: "f(_:A[1])".into(),
            suggestions: Some(Suggestions {
                imported: vec!["f(A[1], B[1]):Boolean[1]".into()],
                not_imported: Vec::new(),
            }),
            span: TextRange::new(0.into(), 4.into()),
        };
        let help = help_text(&err).unwrap();
        assert!(help.contains("\tf(A[1], B[1]):Boolean[1]"));
        assert_eq!(headline(&err), "The system can't find a match for the function: f(_:A[1])");
    }

    #[test]
    fn empty_spans_widen() {
        assert_eq!(clamp(3..3, 10), 3..4);
        assert_eq!(clamp(12..20, 10), 10..10);
    }
}
