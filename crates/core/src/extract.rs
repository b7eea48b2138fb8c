//! Recovers tool calls that a model wrote into its text content.
//!
//! Models served without a native tool-call parser often emit calls using
//! the textual convention they were trained on. Three such conventions are
//! recognized, tried in a fixed priority order:
//!
//! 1. `hermes`: `<tool_call>{...}</tool_call>`, one object per tag pair.
//! 2. `llama3`: `<|python_tag|>{...}`, one object, no closing delimiter.
//! 3. `mistral`: `[TOOL_CALLS][{...}, ...]`, an array of objects.
//!
//! A call object is either flat or nests the call under `function`.
//! All matches are collected. A match that fails to parse is skipped.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Deserializer, Map, Value};
use toolrelay_model::ToolCallRequest;

use crate::call_id::new_call_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    Object,
    Array,
}

#[derive(Debug)]
enum Delimiter {
    /// The first capture group holds the payload.
    Enclosed(Regex),
    /// The payload is the JSON value right after the token.
    Prefix(Regex),
}

#[derive(Debug)]
struct Convention {
    name: &'static str,
    delimiter: Delimiter,
    shape: Shape,
}

static CONVENTIONS: LazyLock<[Convention; 3]> = LazyLock::new(|| {
    [
        Convention {
            name: "hermes",
            delimiter: Delimiter::Enclosed(
                Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").unwrap(),
            ),
            shape: Shape::Object,
        },
        Convention {
            name: "llama3",
            delimiter: Delimiter::Prefix(
                Regex::new(r"<\|python_tag\|>").unwrap(),
            ),
            shape: Shape::Object,
        },
        Convention {
            name: "mistral",
            delimiter: Delimiter::Prefix(Regex::new(r"\[TOOL_CALLS\]").unwrap()),
            shape: Shape::Array,
        },
    ]
});

/// Scans `content` for embedded tool calls.
///
/// Results are ordered by convention priority, then by position in the
/// text. Every returned call carries a freshly generated id.
pub fn extract_tool_calls(content: &str) -> Vec<ToolCallRequest> {
    let mut calls = vec![];
    for convention in CONVENTIONS.iter() {
        for payload in convention.payloads(content) {
            let value = match payload {
                Ok(value) => value,
                Err(err) => {
                    warn!("skipping malformed {} tool call: {err}", convention.name);
                    continue;
                }
            };
            for object in convention.objects(value) {
                match create_request(object) {
                    Some(call) => {
                        debug!(
                            "extracted {} tool call `{}` ({})",
                            convention.name, call.name, call.id
                        );
                        calls.push(call);
                    }
                    None => warn!(
                        "skipping {} tool call without a name",
                        convention.name
                    ),
                }
            }
        }
    }
    calls
}

impl Convention {
    fn payloads(&self, content: &str) -> Vec<serde_json::Result<Value>> {
        match &self.delimiter {
            Delimiter::Enclosed(re) => re
                .captures_iter(content)
                .filter_map(|caps| caps.get(1))
                .map(|payload| serde_json::from_str(payload.as_str().trim()))
                .collect(),
            Delimiter::Prefix(re) => re
                .find_iter(content)
                .filter_map(|token| {
                    let rest = content[token.end()..].trim_start();
                    Deserializer::from_str(rest).into_iter::<Value>().next()
                })
                .collect(),
        }
    }

    fn objects(&self, value: Value) -> Vec<Map<String, Value>> {
        match (self.shape, value) {
            (_, Value::Object(object)) => vec![object],
            (Shape::Array, Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(object) => Some(object),
                    other => {
                        warn!("skipping {} item that is not an object: {other}", self.name);
                        None
                    }
                })
                .collect(),
            (_, other) => {
                warn!("skipping {} payload that is not an object: {other}", self.name);
                vec![]
            }
        }
    }
}

fn create_request(mut object: Map<String, Value>) -> Option<ToolCallRequest> {
    // Some templates nest the call as `{"function": {"name", "arguments"}}`.
    if !matches!(object.get("name"), Some(Value::String(_))) {
        match object.remove("function") {
            Some(Value::Object(function)) => object = function,
            _ => return None,
        }
    }
    let name = match object.remove("name") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => return None,
    };
    let arguments = match object
        .remove("arguments")
        .or_else(|| object.remove("parameters"))
    {
        Some(Value::String(encoded)) => encoded,
        Some(value) => value.to_string(),
        None => "{}".to_owned(),
    };
    Some(ToolCallRequest {
        id: new_call_id(),
        name,
        arguments,
    })
}
