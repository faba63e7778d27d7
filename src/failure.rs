//! Display formatting for failed requests.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Error turn text when a stream ends without yielding any content.
pub const NO_CONTENT_ERROR: &str = "No content in messages object.";

/// Shown when a failure carries no usable message.
pub const GENERIC_ERROR: &str =
    "An error occurred. Please try again. If the problem persists, please contact the site administrator.";

/// Longest raw failure message shown before truncation.
pub const MAX_ERROR_DISPLAY_CHARS: usize = 500;

const INNER_ERROR_CUE: &str = "{\\'error\\': {\\'message\\': ";

fn inner_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"'innererror': (\{.*\})\}\}").expect("inner error regex must compile")
    })
}

fn python_bool_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| Regex::new(r"\b(True|False)\b").expect("bool regex must compile"))
}

fn content_filter_phrase_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)content[ _-]?filter(ed|ing)?").expect("content filter regex must compile")
    })
}

/// Turns a raw failure message into the text of a terminal error turn.
///
/// Recognized content-filter rejections are rewritten into an explanation;
/// anything else passes through, capped at [`MAX_ERROR_DISPLAY_CHARS`].
pub fn display_error_message(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return GENERIC_ERROR.to_string();
    }

    let unwrapped = unwrap_inner_error(raw);
    if let Some(explanation) = content_filter_explanation(&unwrapped) {
        return explanation;
    }

    cap_display_length(&unwrapped)
}

/// Rewrites a content-filter rejection, or `None` when the message is not one.
pub fn content_filter_explanation(message: &str) -> Option<String> {
    // A parsed filter report with nothing flagged is some other failure.
    if let Some(reasons) = inner_error_filter_reasons(message) {
        return (!reasons.is_empty()).then(|| filtered_explanation(Some(&reasons.join(", "))));
    }

    content_filter_phrase_regex()
        .is_match(message)
        .then(|| filtered_explanation(None))
}

fn filtered_explanation(reason: Option<&str>) -> String {
    let mut text =
        String::from("The prompt was filtered due to triggering the content filtering system.\n");
    if let Some(reason) = reason {
        text.push_str(&format!(
            "Reason: This prompt contains content flagged as {reason}\n"
        ));
    }
    text.push_str("\nPlease modify your prompt and retry.");
    text
}

/// Unwraps a Python-repr `{'error': {'message': ...}}` cue embedded in a raw message.
///
/// The leading status prefix (up to the first `-`) is kept.
fn unwrap_inner_error(message: &str) -> String {
    let Some(start) = message.find(INNER_ERROR_CUE) else {
        return message.to_string();
    };

    let prefix = message
        .find('-')
        .map(|dash| &message[..=dash])
        .unwrap_or_default();
    let inner = message[start..].replace("\\'", "'");
    let inner = inner.strip_suffix("'}}").unwrap_or(&inner);

    format!("{prefix} {inner}").trim().to_string()
}

/// Filter categories flagged inside an `'innererror'` payload.
fn inner_error_filter_reasons(message: &str) -> Option<Vec<String>> {
    let captured = inner_error_regex().captures(message)?.get(1)?.as_str();
    let quoted = captured.replace('\'', "\"");
    let fixed = python_bool_regex().replace_all(&quoted, |caps: &regex::Captures<'_>| {
        caps[1].to_ascii_lowercase()
    });

    let inner = match serde_json::from_str::<Value>(&fixed) {
        Ok(inner) => inner,
        Err(error) => {
            tracing::debug!(%error, "inner error payload is not JSON");
            return None;
        }
    };
    let results = inner.get("content_filter_result")?.as_object()?;

    Some(
        results
            .iter()
            .filter(|(_, result)| result.get("filtered").and_then(Value::as_bool) == Some(true))
            .map(|(category, _)| category_label(category))
            .collect(),
    )
}

fn category_label(category: &str) -> String {
    category
        .split('_')
        .filter(|word| !word.is_empty())
        .enumerate()
        .map(|(index, word)| {
            if index > 0 {
                return word.to_string();
            }
            let mut chars = word.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn cap_display_length(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_DISPLAY_CHARS {
        return message.to_string();
    }
    let mut capped = message
        .chars()
        .take(MAX_ERROR_DISPLAY_CHARS)
        .collect::<String>();
    capped.push_str("...");
    capped
}
