use serde_json::Value;

/// Parse model-produced JSON, giving up quietly instead of failing.
///
/// Blank input parses as an empty object. Anything that is not valid JSON
/// yields `None`. Only used where the sender is a generative model: stream
/// record payloads and the architect buffer.
pub fn parse_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_str(trimmed).ok()
}
