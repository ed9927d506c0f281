use serde_json::Value;
use thiserror::Error;

use crate::llm::ModelReply;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("model reply carried neither text nor any usable tool call")]
    UnparseableResponse,
}

/// One structured invocation extracted from a model reply. Lives for a single
/// turn; the name is still whatever the model emitted.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
    pub turn_id: String,
}

/// A call the parse step gave up on. Recoverable: siblings still run, and the
/// reason is woven into the final answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DroppedCall {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedTurn {
    pub message: Option<String>,
    pub calls: Vec<ToolCallRequest>,
    pub dropped: Vec<DroppedCall>,
}

/// Turns a raw model reply into structured calls plus optional free text.
///
/// A call with malformed arguments is dropped individually rather than
/// failing the turn. Only a reply with no text and no usable call at all is
/// unparseable.
pub fn parse_reply(reply: &ModelReply, turn_id: &str) -> Result<ParsedTurn, ParseError> {
    let message = reply
        .text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let mut calls = Vec::new();
    let mut dropped = Vec::new();

    for raw in &reply.calls {
        let name = raw.name.trim();
        if name.is_empty() {
            dropped.push(DroppedCall {
                name: "(unnamed)".to_string(),
                reason: "the call carried no tool name".to_string(),
            });
            continue;
        }

        let arguments = if raw.arguments.trim().is_empty() {
            // Models routinely emit an empty string for a no-argument call.
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str::<Value>(&raw.arguments) {
                Ok(arguments) => arguments,
                Err(_) => {
                    dropped.push(DroppedCall {
                        name: name.to_string(),
                        reason: "its arguments were not valid JSON".to_string(),
                    });
                    continue;
                }
            }
        };

        calls.push(ToolCallRequest {
            name: name.to_string(),
            arguments,
            turn_id: turn_id.to_string(),
        });
    }

    if message.is_none() && calls.is_empty() {
        return Err(ParseError::UnparseableResponse);
    }

    Ok(ParsedTurn { message, calls, dropped })
}
