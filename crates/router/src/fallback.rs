use nexus_common::{kinds, Intent, Origin, Parameters};
use serde::Deserialize;

use crate::rules::is_blank;

pub const GENERIC_SYSTEM_PROMPT: &str =
    "You are the assistant of a self-hosted automation daemon. Answer the user's request directly and concisely.";

/// System prompt for model classification, listing the actions the
/// registry can serve.
pub fn classification_prompt(actions: &[String]) -> String {
    format!(
        "Classify the user's request for an automation daemon. Reply with ONLY a JSON object of the form \
{{\"type\": \"<intent kind>\", \"action\": \"<action>\", \"parameters\": {{...}}}}. \
Known actions: {}. Use action \"ask\" with type \"freeform-ask\" when nothing else fits.",
        actions.join(", ")
    )
}

#[derive(Debug, Deserialize)]
struct ModelClassification {
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default)]
    action: Option<serde_json::Value>,
    #[serde(default)]
    parameters: Option<Parameters>,
}

/// Returns the first balanced `{...}` span, honouring JSON strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model reply into an intent. `None` when the reply has no usable
/// JSON object or no action.
pub fn parse_model_intent(reply: &str, origin: Origin, raw: &str) -> Option<Intent> {
    let parsed: ModelClassification = serde_json::from_str(first_json_object(reply)?).ok()?;
    if is_blank(parsed.action.as_ref()) {
        return None;
    }
    let action = parsed.action?.as_str()?.trim().to_string();
    let kind = parsed
        .kind
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| kinds::FREEFORM_ASK.to_string());

    let mut intent = Intent::new(kind, action, origin, raw);
    intent.parameters = parsed.parameters.unwrap_or_default();
    Some(intent)
}
