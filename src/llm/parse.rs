//! Parsers for free-form model replies

use serde::Deserialize;

use crate::collaborators::JudgeOutcome;
use crate::critique::{Critique, CritiqueItem};

/// Pull an HTML document out of a chat reply.
///
/// Prefers the first fenced block, then anything from `<!DOCTYPE` or `<html`
/// onward, then the bare reply if it looks like markup at all.
pub fn extract_markup(reply: &str) -> Option<String> {
    if let Some(start) = reply.find("```") {
        let after_fence = &reply[start + 3..];
        // skip the info string (```html)
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
        let body = &after_fence[body_start..];
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        let body = body.trim();
        if !body.is_empty() {
            return Some(body.to_string());
        }
    }

    let lower = reply.to_ascii_lowercase();
    if let Some(idx) = lower.find("<!doctype").or_else(|| lower.find("<html")) {
        return Some(reply[idx..].trim().to_string());
    }

    let trimmed = reply.trim();
    if trimmed.starts_with('<') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Slice from the first `{` to the last `}`
fn json_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

#[derive(Deserialize)]
struct RawJudge {
    score: f64,
    #[serde(default)]
    notes: String,
}

/// Parse `{"score": .., "notes": ..}`; `pass` is `score >= threshold`.
pub fn parse_judge(reply: &str, threshold: f64) -> Result<JudgeOutcome, String> {
    let obj = json_object(reply).ok_or_else(|| "no JSON object in judge reply".to_string())?;
    let raw: RawJudge =
        serde_json::from_str(obj).map_err(|e| format!("malformed judge reply: {}", e))?;
    let score = raw.score.clamp(0.0, 100.0);
    Ok(JudgeOutcome {
        pass: score >= threshold,
        score,
        notes: raw.notes,
    })
}

#[derive(Deserialize)]
struct RawCritique {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    items: Vec<CritiqueItem>,
}

/// Parse `{"summary": .., "items": [..]}`; `total_issues` is recomputed.
pub fn parse_critique(reply: &str) -> Result<Critique, String> {
    let obj = json_object(reply).ok_or_else(|| "no JSON object in critique reply".to_string())?;
    let raw: RawCritique =
        serde_json::from_str(obj).map_err(|e| format!("malformed critique reply: {}", e))?;
    Ok(Critique::new(raw.summary, raw.items))
}
