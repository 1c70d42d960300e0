//! Flattening a critique into the text handed to the generator

use std::fmt::Write;

use crate::critique::Critique;

/// Context used when there is no critique to act on
pub const NO_ISSUES_CONTEXT: &str =
    "No specific issues were identified in the previous attempt. Improve overall visual fidelity to the reference screenshot.";

/// Render `critique` as plain text for the next generation attempt.
///
/// Items keep their original order. The output depends only on the input.
pub fn build_revision_context(critique: Option<&Critique>) -> String {
    let critique = match critique {
        Some(c) if !c.items.is_empty() => c,
        _ => return NO_ISSUES_CONTEXT.to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "The previous attempt has {} issue(s) to fix. Summary: {}",
        critique.items.len(),
        critique.summary.trim()
    );
    for (idx, item) in critique.items.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. [{}] {} / {}\n   Issue: {}\n   Expected: {}\n   Actual: {}\n",
            idx + 1,
            item.priority.to_string().to_uppercase(),
            item.category,
            item.element,
            item.issue,
            item.expected,
            item.actual,
        );
    }
    out
}
