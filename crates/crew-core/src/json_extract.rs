//! Extraction of embedded JSON from free-form agent prose (§4.5, §8 property 10,
//! §9's "dynamic JSON shapes from the planner").

use serde_json::Value;

/// Strip every fenced code block (```...```) from `text`, leaving surrounding
/// prose untouched.
fn strip_fenced_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 3..];
        if let Some(end) = after_open.find("```") {
            rest = &after_open[end + 3..];
        } else {
            // Unterminated fence: drop the remainder.
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Scan `text` left to right; at every `{`/`[` byte offset attempt to decode
/// one complete JSON value using a streaming deserializer (the Rust
/// equivalent of Python's `json.JSONDecoder().raw_decode`, which does not
/// require the remainder of the string to parse). Returns the first value
/// whose top level is an object or array.
fn scan_for_json_value(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    for (offset, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        // offset must land on a char boundary since `{`/`[` are single-byte ASCII.
        let candidate = &text[offset..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next()
            && matches!(value, Value::Object(_) | Value::Array(_))
        {
            return Some(value);
        }
    }
    None
}

/// Extract the first embedded JSON object/array from `text`: strip fenced
/// code blocks first, then scan; if nothing decodes, retry against the
/// original (un-stripped) text.
#[must_use]
pub fn parse_embedded_json(text: &str) -> Option<Value> {
    let stripped = strip_fenced_blocks(text);
    scan_for_json_value(&stripped).or_else(|| scan_for_json_value(text))
}
