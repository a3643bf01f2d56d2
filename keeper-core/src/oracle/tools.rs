//! Tools the oracle may call while resolving an action.
//!
//! Only dice so far: any hit, dodge or damage outcome is rolled here
//! rather than invented by the model.

use crate::dice::{self, RollResult};
use crate::Tool;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// A tool definition handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Implemented by `#[derive(Tool)]`.
pub trait ToolDefinition {
    fn tool_name() -> &'static str;

    fn tool_description() -> &'static str;

    fn input_schema() -> Value;

    fn spec() -> ToolSpec {
        ToolSpec {
            name: Self::tool_name().to_string(),
            description: Self::tool_description().to_string(),
            input_schema: Self::input_schema(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Result of executing a tool, fed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Roll dice for hit, dodge, skill and damage checks. Notation like "1d100", "1d6+1" or "2d6-2"
#[derive(Tool, Deserialize)]
#[tool(name = "roll_dice")]
pub struct RollDice {
    /// Dice notation: <count>d<sides> with an optional +N or -N modifier
    pub notation: String,
    /// What the roll is for, e.g. "ghoul claw damage"
    pub purpose: Option<String>,
}

/// The oracle's tool belt.
pub struct DiceTools;

impl DiceTools {
    /// Get all tool definitions.
    pub fn all() -> Vec<ToolSpec> {
        vec![RollDice::spec()]
    }

    /// Run one tool call against the dice engine.
    pub fn execute<R: Rng + ?Sized>(call: &ToolCall, rng: &mut R) -> ToolOutput {
        if call.name != RollDice::tool_name() {
            return ToolOutput::error(format!("Unknown tool: {}", call.name));
        }

        let args: RollDice = match serde_json::from_value(call.input.clone()) {
            Ok(args) => args,
            Err(e) => return ToolOutput::error(format!("Invalid roll_dice input: {e}")),
        };

        match dice::roll_with_rng(&args.notation, rng) {
            Ok(result) => {
                debug!(
                    notation = %args.notation,
                    purpose = args.purpose.as_deref().unwrap_or("general roll"),
                    result = result.final_result,
                    "oracle rolled dice"
                );
                roll_output(&result)
            }
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}

fn roll_output(result: &RollResult) -> ToolOutput {
    match serde_json::to_string(result) {
        Ok(json) => ToolOutput::success(json),
        Err(e) => ToolOutput::error(format!("Could not encode roll: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn call(input: Value) -> ToolCall {
        ToolCall {
            id: "toolu_1".to_string(),
            name: "roll_dice".to_string(),
            input,
        }
    }

    #[test]
    fn test_tool_derive() {
        assert_eq!(RollDice::tool_name(), "roll_dice");
        assert!(RollDice::tool_description().starts_with("Roll dice"));
    }

    #[test]
    fn test_tool_schema() {
        let schema = RollDice::input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["notation"]["type"], "string");
        assert_eq!(schema["properties"]["purpose"]["type"], "string");

        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "notation"));
        assert!(!required.iter().any(|v| v == "purpose"));
    }

    #[test]
    fn test_execute_roll() {
        let output = DiceTools::execute(
            &call(json!({"notation": "2d6+3", "purpose": "damage"})),
            &mut StdRng::seed_from_u64(5),
        );
        assert!(!output.is_error);

        let roll: RollResult = serde_json::from_str(&output.content).unwrap();
        assert_eq!(roll.rolls.len(), 2);
        assert_eq!(roll.final_result, roll.total + 3);
    }

    #[test]
    fn test_execute_bad_notation() {
        let output = DiceTools::execute(&call(json!({"notation": "0d6"})), &mut StdRng::seed_from_u64(5));
        assert!(output.is_error);
        assert!(output.content.contains("Invalid dice expression"));
    }

    #[test]
    fn test_execute_oversized_roll_is_error() {
        for notation in ["3d4294967295", "4294967295d6", "1d20+2147483647"] {
            let output = DiceTools::execute(&call(json!({ "notation": notation })), &mut StdRng::seed_from_u64(5));
            assert!(output.is_error, "{notation} should be refused");
        }
    }

    #[test]
    fn test_execute_unknown_tool() {
        let mut c = call(json!({}));
        c.name = "summon_shoggoth".to_string();
        let output = DiceTools::execute(&c, &mut StdRng::seed_from_u64(5));
        assert!(output.is_error);
    }
}
