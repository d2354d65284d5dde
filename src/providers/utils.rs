use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};

use crate::errors::AgentError;
use crate::models::{Message, MessageContent, Role, Tool, ToolCall};

/// Convert internal messages to the OpenAI chat-completions message spec.
/// The system prompt is handled separately by the provider so it never
/// becomes part of the stored history.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        match message.role {
            Role::Tool => {
                // Each tool response becomes its own wire message
                for response in message.tool_responses() {
                    messages_spec.push(json!({
                        "role": "tool",
                        "content": response.content,
                        "tool_call_id": response.id,
                    }));
                }
            }
            role => {
                let mut converted = json!({ "role": role });
                for content in &message.content {
                    match content {
                        MessageContent::Text(text) => {
                            if !text.is_empty() {
                                converted["content"] = json!(text);
                            }
                        }
                        MessageContent::ToolRequest(request) => match &request.tool_call {
                            Ok(tool_call) => {
                                let tool_calls = converted
                                    .as_object_mut()
                                    .unwrap()
                                    .entry("tool_calls")
                                    .or_insert(json!([]));
                                tool_calls.as_array_mut().unwrap().push(json!({
                                    "id": request.id,
                                    "type": "function",
                                    "function": {
                                        "name": sanitize_function_name(&tool_call.name),
                                        "arguments": tool_call.arguments.to_string(),
                                    }
                                }));
                            }
                            // A request the engine already rejected carries
                            // no call to replay; the paired tool response
                            // tells the model what went wrong.
                            Err(_) => {}
                        },
                        MessageContent::ToolResponse(response) => {
                            messages_spec.push(json!({
                                "role": "tool",
                                "content": response.content,
                                "tool_call_id": response.id,
                            }));
                        }
                    }
                }
                if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
                    messages_spec.push(converted);
                }
            }
        }
    }

    messages_spec
}

/// Convert tool descriptors to the OpenAI function-tool spec
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow::anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert an OpenAI chat-completions response to one assistant message.
/// Malformed tool calls are preserved as Err requests so the dispatcher can
/// answer them instead of the run aborting.
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            message = message.with_text(text);
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
            } else {
                match serde_json::from_str::<Value>(&arguments) {
                    Ok(params) => {
                        message = message
                            .with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                    }
                    Err(e) => {
                        let error = AgentError::InvalidParameters(format!(
                            "Could not interpret tool use parameters for id {}: {}",
                            id, e
                        ));
                        message = message.with_tool_request(id, Err(error));
                    }
                }
            }
        }
    }

    Ok(message)
}

fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    re.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    re.is_match(name)
}
