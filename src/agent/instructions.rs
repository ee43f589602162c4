//! System prompt assembly.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

const MARKDOWN_HINT: &str = "Use markdown to format your answers.";

/// Replace `{key}` with the value of `state[key]`.
///
/// Strings are inserted without quotes, other values as compact JSON.
/// Placeholders with no matching key are left as they are.
pub fn render_state(template: &str, state: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match state.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Inputs to the system prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub description: Option<&'a str>,
    pub instructions: &'a [String],
    pub markdown: bool,
    /// When set, placeholders are filled from this state.
    pub state: Option<&'a Map<String, Value>>,
}

/// Build the system prompt, or `None` when there is nothing to say.
pub fn build_system_prompt(parts: PromptParts<'_>) -> Option<String> {
    let render = |text: &str| match parts.state {
        Some(state) => render_state(text, state),
        None => text.to_string(),
    };

    let mut sections = Vec::new();
    if let Some(description) = parts.description.filter(|d| !d.trim().is_empty()) {
        sections.push(render(description));
    }

    let mut instructions: Vec<String> = parts.instructions.iter().map(|i| render(i)).collect();
    if parts.markdown {
        instructions.push(MARKDOWN_HINT.to_string());
    }
    match instructions.len() {
        0 => {}
        1 => sections.push(instructions.remove(0)),
        _ => sections.push(
            instructions
                .iter()
                .map(|i| format!("- {i}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}
