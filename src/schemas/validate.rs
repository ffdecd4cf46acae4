//! Request validation over untrusted JSON.
//!
//! Rather than bailing on the first serde error, the validator walks the raw
//! JSON tree and collects every field violation so a caller can fix all of
//! them in one round trip. Only a clean pass constructs the typed request,
//! at which point the schema's parse-time defaults apply.

use super::chat_completions::{ChatCompletionRequest, Role};
use serde_json::Value;
use thiserror::Error;

/// One violated field constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Dotted path to the offending field, e.g. `messages[2].role`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in one request, reported together.
#[derive(Debug, Clone, Error)]
#[error("{}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }
}

/// Parse and validate an inbound chat completions body.
///
/// Returns the fully-defaulted, immutable request, or an error enumerating
/// every violated field. Pure: no state, no I/O.
pub fn validate_chat_request(value: &Value) -> Result<ChatCompletionRequest, ValidationError> {
    let Some(body) = value.as_object() else {
        return Err(ValidationError::single("$", "expected a JSON object"));
    };

    let mut violations = Vec::new();

    match body.get("model") {
        None => push(&mut violations, "model", "field is required"),
        Some(v) if !v.is_string() => push(&mut violations, "model", "must be a string"),
        _ => {}
    }

    match body.get("messages") {
        None => push(&mut violations, "messages", "field is required"),
        Some(Value::Array(messages)) => {
            for (i, message) in messages.iter().enumerate() {
                check_message(i, message, &mut violations);
            }
        }
        Some(_) => push(&mut violations, "messages", "must be an array"),
    }

    for field in [
        "temperature",
        "top_p",
        "presence_penalty",
        "frequency_penalty",
    ] {
        if let Some(v) = body.get(field)
            && !v.is_number()
        {
            push(&mut violations, field, "must be a number");
        }
    }

    for field in ["n", "max_tokens"] {
        if let Some(v) = body.get(field)
            && !v.is_u64()
        {
            push(&mut violations, field, "must be a non-negative integer");
        }
    }

    if let Some(v) = body.get("stream")
        && !v.is_boolean()
    {
        push(&mut violations, "stream", "must be a boolean");
    }

    if let Some(v) = body.get("stop") {
        let all_strings = v
            .as_array()
            .map(|items| items.iter().all(Value::is_string))
            .unwrap_or(false);
        if !v.is_string() && !all_strings {
            push(
                &mut violations,
                "stop",
                "must be a string or an array of strings",
            );
        }
    }

    if let Some(v) = body.get("logit_bias")
        && !v.is_object()
    {
        push(&mut violations, "logit_bias", "must be an object");
    }

    if let Some(v) = body.get("user")
        && !v.is_string()
    {
        push(&mut violations, "user", "must be a string");
    }

    match body.get("tools") {
        None => {}
        Some(Value::Array(tools)) => {
            for (i, tool) in tools.iter().enumerate() {
                check_tool(i, tool, &mut violations);
            }
        }
        Some(_) => push(&mut violations, "tools", "must be an array"),
    }

    if let Some(v) = body.get("tool_choice")
        && !v.is_string()
        && !v.is_object()
    {
        push(
            &mut violations,
            "tool_choice",
            "must be a string or an object",
        );
    }

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    // The walk above covers the documented constraints; serde enforces the
    // rest (and applies the defaults) when building the typed request.
    serde_json::from_value(value.clone())
        .map_err(|e| ValidationError::single("$", e.to_string()))
}

fn push(violations: &mut Vec<Violation>, field: &str, message: &str) {
    violations.push(Violation {
        field: field.to_string(),
        message: message.to_string(),
    });
}

fn check_message(index: usize, message: &Value, violations: &mut Vec<Violation>) {
    let field = |name: &str| format!("messages[{index}].{name}");

    let Some(obj) = message.as_object() else {
        violations.push(Violation {
            field: format!("messages[{index}]"),
            message: "must be an object".into(),
        });
        return;
    };

    match obj.get("role") {
        None => violations.push(Violation {
            field: field("role"),
            message: "field is required".into(),
        }),
        Some(Value::String(role)) if !Role::ALL.contains(&role.as_str()) => {
            violations.push(Violation {
                field: field("role"),
                message: format!(
                    "invalid enumeration value {role:?}, expected one of {}",
                    Role::ALL.join(", ")
                ),
            });
        }
        Some(Value::String(_)) => {}
        Some(_) => violations.push(Violation {
            field: field("role"),
            message: "must be a string".into(),
        }),
    }

    if let Some(content) = obj.get("content")
        && !content.is_string()
        && !content.is_null()
    {
        violations.push(Violation {
            field: field("content"),
            message: "must be a string".into(),
        });
    }

    if let Some(calls) = obj.get("tool_calls")
        && !calls.is_array()
    {
        violations.push(Violation {
            field: field("tool_calls"),
            message: "must be an array".into(),
        });
    }

    if let Some(id) = obj.get("tool_call_id")
        && !id.is_string()
    {
        violations.push(Violation {
            field: field("tool_call_id"),
            message: "must be a string".into(),
        });
    }
}

fn check_tool(index: usize, tool: &Value, violations: &mut Vec<Violation>) {
    let field = |name: &str| format!("tools[{index}].{name}");

    let Some(obj) = tool.as_object() else {
        violations.push(Violation {
            field: format!("tools[{index}]"),
            message: "must be an object".into(),
        });
        return;
    };

    let tool_type = match obj.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(_) => {
            violations.push(Violation {
                field: field("type"),
                message: "must be a string".into(),
            });
            return;
        }
        None => {
            violations.push(Violation {
                field: field("type"),
                message: "field is required".into(),
            });
            return;
        }
    };

    // Non-function entries are dropped by the translator; only function
    // entries need a well-formed descriptor.
    if tool_type != "function" {
        return;
    }

    match obj.get("function") {
        None => violations.push(Violation {
            field: field("function"),
            message: "field is required for function tools".into(),
        }),
        Some(Value::Object(function)) => {
            if !function.get("name").map(Value::is_string).unwrap_or(false) {
                violations.push(Violation {
                    field: field("function.name"),
                    message: "must be a string".into(),
                });
            }
        }
        Some(_) => violations.push(Violation {
            field: field("function"),
            message: "must be an object".into(),
        }),
    }
}
