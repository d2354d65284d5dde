use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::registry::ToolRegistry;

/// System prompt for the arithmetic demo agent.
pub const SYSTEM_PROMPT: &str = "\
As a basic arithmetic agent, I can perform the following operations:
- Addition
- Subtraction
- Multiplication
- Division
Let me know if you need help with any of these operations.";

fn binary_args(arguments: &Value) -> AgentResult<(f64, f64)> {
    let a = arguments
        .get("a")
        .and_then(Value::as_f64)
        .ok_or_else(|| AgentError::InvalidParameters("missing numeric argument 'a'".into()))?;
    let b = arguments
        .get("b")
        .and_then(Value::as_f64)
        .ok_or_else(|| AgentError::InvalidParameters("missing numeric argument 'b'".into()))?;
    Ok((a, b))
}

// Whole results render as integers ("5", not "5.0") in tool output
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.is_finite() {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn schema() -> Value {
    json!({
        "type": "object",
        "required": ["a", "b"],
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        }
    })
}

/// Registry with the four arithmetic tools.
pub fn registry() -> AgentResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_fn(
        "add",
        "Addition: Add two numbers together",
        schema(),
        |args| {
            let (a, b) = binary_args(&args)?;
            Ok(number(a + b))
        },
    )?;
    registry.register_fn(
        "sub",
        "Subtraction: Subtract one number from the other",
        schema(),
        |args| {
            let (a, b) = binary_args(&args)?;
            Ok(number(a - b))
        },
    )?;
    registry.register_fn(
        "mul",
        "Multiplication: Multiply two numbers",
        schema(),
        |args| {
            let (a, b) = binary_args(&args)?;
            Ok(number(a * b))
        },
    )?;
    registry.register_fn(
        "div",
        "Division: Divide one number by the other",
        schema(),
        |args| {
            let (a, b) = binary_args(&args)?;
            if b == 0.0 {
                return Err(AgentError::ExecutionError("division by zero".into()));
            }
            Ok(number(a / b))
        },
    )?;
    Ok(registry)
}
