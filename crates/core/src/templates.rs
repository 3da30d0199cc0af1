//! Message template rendering engine.
//!
//! Step bodies and subjects use `{{variable}}` placeholders filled from lead
//! attributes at the moment a step is enqueued.

use std::collections::HashMap;

/// Render a template string, replacing every `{{name}}` placeholder with the
/// matching variable. Unknown placeholders render as empty strings so a
/// half-filled profile never leaks raw template syntax to a recipient.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                if let Some(value) = variables.get(name) {
                    result.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unclosed placeholder, emit literally.
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}
