//! `{{key}}` substitution for text payloads.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").ok());

/// Replace every `{{key}}` token in `text` with `vars[key]`.
///
/// Whitespace inside the braces is ignored. Keys missing from `vars` render
/// as the empty string. Text without tokens is returned unchanged.
pub fn render(text: &str, vars: &HashMap<String, String>) -> String {
    let Some(regex) = PLACEHOLDER.as_ref() else {
        return text.to_owned();
    };

    regex
        .replace_all(text, |caps: &Captures<'_>| {
            caps.get(1)
                .and_then(|key| vars.get(key.as_str()))
                .cloned()
                .unwrap_or_default()
        })
        .into_owned()
}
