use tracing::debug;

use crate::{diagnostics::Diagnostic, unit::SourceUnit};

/// Line of the fragment, 1-based, at which `diag` was raised.
///
/// Parse and compile errors carry the location themselves. Runtime errors
/// take the innermost trace frame that belongs to `unit_name`, skipping
/// frames of functions defined by other fragments.
pub fn failing_line(diag: &Diagnostic, unit_name: &str) -> Option<usize> {
    if diag.is_syntax() || diag.trace.is_empty() {
        return diag.span.map(|span| span.line);
    }
    diag.trace
        .iter()
        .find(|frame| frame.unit == unit_name)
        .map(|frame| frame.line)
}

/// Numbered listing of `text` with `line` marked by an arrow.
pub fn render_listing(text: &str, line: usize, unit_name: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        lines.push("");
    }
    let marked = line.clamp(1, lines.len());

    let mut rendered = vec![format!("Error in {unit_name}:")];
    for (idx, source) in lines.iter().enumerate() {
        let number = idx + 1;
        if number == marked {
            let digits = number.to_string();
            let dashes = "-".repeat(5usize.saturating_sub(digits.len()));
            rendered.push(format!("{dashes}> {digits} {source}"));
        } else {
            rendered.push(format!("{number:7} {source}"));
        }
    }
    rendered.join("\n")
}

/// Attaches the failing location, and a source listing for textual
/// fragments, to `diag`. Kind, message, span and trace are left as raised.
pub fn annotate(mut diag: Diagnostic, unit: &SourceUnit) -> Diagnostic {
    let line = failing_line(&diag, unit.name());
    debug!(unit = unit.name(), ?line, kind = ?diag.kind, "annotating diagnostic");
    if diag.unit.is_none() {
        diag.unit = Some(unit.name().to_string());
    }
    if diag.line.is_none() {
        diag.line = line;
    }
    match (unit.text(), line) {
        (Some(text), Some(line)) => diag.with_note(render_listing(text, line, unit.name())),
        _ => diag,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::diagnostics::{DiagnosticKind, SourceSpan, TraceFrame};

    #[test]
    fn listing_marks_the_failing_line() {
        let listing = render_listing("a = 1\nb = 2\nc = (\nd", 3, "neval-x");
        assert_eq!(
            listing,
            "Error in neval-x:\n      1 a = 1\n      2 b = 2\n----> 3 c = (\n      4 d"
        );
    }

    #[test]
    fn listing_clamps_out_of_range_lines() {
        let listing = render_listing("only", 9, "u");
        assert_eq!(listing, "Error in u:\n----> 1 only");
        let wide = render_listing(&"x\n".repeat(12), 12, "u");
        assert!(wide.ends_with("---> 12 x"));
    }

    #[test]
    fn runtime_line_comes_from_the_matching_frame() {
        let diag = Diagnostic::runtime("boom")
            .with_span(SourceSpan::new(0, 1, 7))
            .with_frame(TraceFrame {
                unit: "neval-other".into(),
                line: 7,
                function: Some("helper".into()),
            })
            .with_frame(TraceFrame {
                unit: "neval-mine".into(),
                line: 2,
                function: None,
            });
        assert_eq!(failing_line(&diag, "neval-mine"), Some(2));
        assert_eq!(failing_line(&diag, "neval-absent"), None);
    }

    #[test]
    fn annotation_keeps_kind_and_message() {
        let unit = SourceUnit::new("x = 1\ny = (");
        let diag = Diagnostic::new(DiagnosticKind::Parser, "unexpected end of input")
            .with_span(SourceSpan::new(11, 11, 2));
        let annotated = annotate(diag, &unit);
        assert_eq!(annotated.kind, DiagnosticKind::Parser);
        assert_eq!(annotated.message, "unexpected end of input");
        assert_eq!(annotated.line, Some(2));
        assert_eq!(annotated.notes.len(), 1);
        assert!(annotated.notes[0].contains("----> 2 y = ("));
    }
}
