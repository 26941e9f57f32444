use serde_json::Value;

const MAX_MESSAGE_CHARS: usize = 300;

/// Best-effort human-readable message from a JSON error payload.
///
/// Looks at `detail`, `message`, `error` (string or `{ "message": .. }`) and
/// `text`, in that order.
pub fn message_from_value(value: &Value) -> Option<String> {
    if let Some(text) = value.as_str() {
        return non_empty(text);
    }
    for field in ["detail", "message", "error", "text"] {
        match value.get(field) {
            Some(Value::String(text)) => {
                if let Some(message) = non_empty(text) {
                    return Some(message);
                }
            }
            Some(nested @ Value::Object(_)) => {
                if let Some(message) = message_from_value(nested) {
                    return Some(message);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort human-readable message from a raw response body.
///
/// JSON bodies are searched with [`message_from_value`]; anything else is
/// returned as trimmed text, truncated to a readable length.
pub fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = message_from_value(&value) {
            return Some(message);
        }
    }
    Some(truncate(trimmed))
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| truncate(text))
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
