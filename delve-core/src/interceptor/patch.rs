//! Repairs malformed tool-call arguments and dangling tool calls.

use super::{InterceptError, Interceptor, Next};
use crate::message::{Message, MessageStore, ToolCallRequest};
use crate::tool::{ToolContext, ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::{Map, Number, Value};

/// Coerces arguments toward the target tool's schema before execution, and
/// answers tool calls that never got a result (e.g. a run interrupted
/// mid-batch and resumed from a checkpoint).
///
/// Arguments that cannot be repaired become an
/// [`InvalidInput`](ToolError::InvalidInput) result for the model; they never
/// abort the run.
#[derive(Debug, Default)]
pub struct PatchToolCalls;

impl PatchToolCalls {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for PatchToolCalls {
    fn name(&self) -> &str {
        "patch_tool_calls"
    }

    async fn before_model(&self, messages: &mut MessageStore) -> Result<(), InterceptError> {
        let dangling: Vec<(String, String)> = messages
            .messages()
            .iter()
            .filter(|m| m.has_tool_calls())
            .flat_map(|m| m.tool_calls())
            .filter(|c| !messages.has_result_for(&c.id))
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();

        for (id, name) in dangling {
            log::info!("Patching dangling tool call {} ({})", name, id);
            let content = format!(
                "Tool call {name} with id {id} was cancelled - another message came in before it could be completed."
            );
            messages.append(Message::tool_error(id, name, content));
        }
        Ok(())
    }

    async fn around_tool(
        &self,
        mut call: ToolCallRequest,
        ctx: &ToolContext,
        next: Next<'_>,
    ) -> Result<ToolResult, ToolError> {
        if let Some(tool) = ctx.registry.get(&call.name) {
            let repaired = repair_arguments(&call.arguments, &tool.parameters_schema())
                .map_err(|reason| {
                    ToolError::InvalidInput(format!("Invalid arguments for '{}': {}", call.name, reason))
                })?;
            if repaired != call.arguments {
                log::debug!(
                    "Repaired arguments for {}: {} -> {}",
                    call.name,
                    call.arguments,
                    repaired
                );
                call.arguments = repaired;
            }
        }
        next.run(call, ctx).await
    }
}

/// Best-effort conversion of `arguments` into an object matching `schema`.
///
/// Handles JSON sent as a string (optionally inside a code fence), a bare
/// value for a single-parameter tool, scalars of the wrong JSON type, and
/// unknown keys when `additionalProperties` is `false`. Fails when required
/// properties are still missing afterwards.
pub fn repair_arguments(arguments: &Value, schema: &Value) -> Result<Value, String> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let single_key = match (required.as_slice(), properties) {
        ([only], _) => Some(only.to_string()),
        ([], Some(props)) if props.len() == 1 => props.keys().next().cloned(),
        _ => None,
    };

    let value = match arguments {
        Value::String(raw) => parse_embedded_object(raw).unwrap_or_else(|| arguments.clone()),
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };

    let mut map = match value {
        Value::Object(map) => map,
        other => match single_key {
            Some(key) => {
                let mut map = Map::new();
                map.insert(key, other);
                map
            }
            None => {
                return Err(format!(
                    "expected a JSON object, got {}",
                    json_type(&other)
                ))
            }
        },
    };

    let nulls: Vec<String> = map
        .iter()
        .filter(|(_, v)| v.is_null())
        .map(|(k, _)| k.clone())
        .collect();
    for key in nulls {
        map.remove(&key);
    }

    if let Some(props) = properties {
        for (key, prop) in props {
            if let Some(value) = map.get_mut(key) {
                coerce(value, prop);
            }
        }
        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            let unknown: Vec<String> = map
                .keys()
                .filter(|k| !props.contains_key(*k))
                .cloned()
                .collect();
            for key in unknown {
                map.remove(&key);
            }
        }
    }

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| !map.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "missing required argument(s): {}",
            missing.join(", ")
        ));
    }
    Ok(Value::Object(map))
}

fn parse_embedded_object(raw: &str) -> Option<Value> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let body = rest.split_once('\n').map_or("", |(_, body)| body);
        text = body.trim_end().strip_suffix("```").unwrap_or(body).trim();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn coerce(value: &mut Value, prop: &Value) {
    let Some(expected) = prop.get("type").and_then(Value::as_str) else {
        return;
    };
    let replacement = match (expected, &*value) {
        ("integer", Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        ("integer", Value::Number(n)) if n.as_i64().is_none() => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| Value::from(f as i64)),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        ("array", Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Array(_)) => Some(v),
            _ => Some(Value::Array(vec![value.clone()])),
        },
        ("array", v) if !v.is_array() => Some(Value::Array(vec![v.clone()])),
        ("object", Value::String(s)) => parse_embedded_object(s),
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
