//! Value text helpers for filter values and engine output.

use std::borrow::Cow;

use crate::codec::CodecError;

/// Strip a surrounding double-quote pair and unescape the literal inside.
///
/// Filter values arrive as raw JSON text: `5` is passed through as is while
/// `"a\"b"` becomes `a"b`. Anything that is not a quoted literal is returned
/// unchanged.
pub fn unquote_value(raw: &str) -> Result<Cow<'_, str>, CodecError> {
    let quoted = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
    if !quoted {
        return Ok(Cow::Borrowed(raw));
    }
    serde_json::from_str::<String>(raw)
        .map(Cow::Owned)
        .map_err(|e| CodecError::InvalidValue(format!("failed to unquote string. Error: {e}")))
}

/// Escape a string the way the engine does before writing it to a response,
/// so it can be wrapped in quotes and emitted as JSON without further work.
pub fn escape_json_string(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_owned()).to_string();
    quoted[1..quoted.len() - 1].to_owned()
}
