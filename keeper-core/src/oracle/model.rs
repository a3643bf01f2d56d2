//! Oracle backed by a language model.
//!
//! [`ModelOracle`] renders one prompt per capability, hands it to a
//! [`LanguageModel`] together with the dice tool, and parses the reply.
//! Transport errors and unreadable replies are retried a bounded number
//! of times before the call fails.

use super::tools::{DiceTools, ToolCall, ToolOutput, ToolSpec};
use super::{ActionResolution, MonsterAction, Oracle, OracleContext, OracleError};
use crate::participant::{Participant, ParticipantId};
use crate::state::Intent;
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the model transport.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// A single completion request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: Option<String>,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub system: String,
    pub prompt: String,
    /// Tools the model may call; empty for plain text capabilities.
    pub tools: Vec<ToolSpec>,
}

/// Transport to a language model.
///
/// `complete` blocks until the model has finished. Implementations run the
/// tool-use loop themselves, calling `execute_tool` for each tool call and
/// feeding the output back, and return the model's final text.
pub trait LanguageModel {
    fn complete(
        &mut self,
        request: &ModelRequest,
        execute_tool: &mut dyn FnMut(&ToolCall) -> ToolOutput,
    ) -> Result<String, ModelError>;
}

/// Configuration for [`ModelOracle`].
#[derive(Debug, Clone)]
pub struct ModelOracleConfig {
    /// Model name; `None` leaves the choice to the transport.
    pub model: Option<String>,

    /// Maximum tokens per reply.
    pub max_tokens: usize,

    /// Sampling temperature. Kept low: rulings should be boring.
    pub temperature: Option<f32>,

    /// Attempts per capability call before giving up.
    pub max_attempts: usize,
}

impl Default for ModelOracleConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 2048,
            temperature: Some(0.1),
            max_attempts: 3,
        }
    }
}

impl ModelOracleConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// [`Oracle`] implemented by prompting a [`LanguageModel`].
pub struct ModelOracle<M, R = StdRng> {
    model: M,
    config: ModelOracleConfig,
    rng: R,
}

impl<M: LanguageModel> ModelOracle<M, StdRng> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            config: ModelOracleConfig::default(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl<M: LanguageModel, R: Rng> ModelOracle<M, R> {
    /// Use a specific random source for the dice tool.
    pub fn with_rng<R2: Rng>(self, rng: R2) -> ModelOracle<M, R2> {
        ModelOracle {
            model: self.model,
            config: self.config,
            rng,
        }
    }

    pub fn with_config(mut self, config: ModelOracleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    fn request(&self, prompt: String, with_dice: bool) -> ModelRequest {
        ModelRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: include_str!("prompts/keeper_base.txt").to_string(),
            prompt,
            tools: if with_dice { DiceTools::all() } else { Vec::new() },
        }
    }

    /// Send `request`, retrying until `parse` accepts a reply.
    fn ask<T>(
        &mut self,
        capability: &'static str,
        request: ModelRequest,
        parse: impl Fn(&str) -> Result<T, OracleError>,
    ) -> Result<T, OracleError> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = OracleError::Unavailable("no attempt made".to_string());

        for attempt in 1..=attempts {
            let rng = &mut self.rng;
            let mut execute = |call: &ToolCall| DiceTools::execute(call, &mut *rng);

            let outcome = self
                .model
                .complete(&request, &mut execute)
                .map_err(OracleError::from)
                .and_then(|reply| parse(&reply));

            match outcome {
                Ok(value) => {
                    debug!(capability, attempt, "oracle replied");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(capability, attempt, attempts, error = %e, "oracle call failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

impl<M: LanguageModel, R: Rng> Oracle for ModelOracle<M, R> {
    fn classify_intent(&mut self, ctx: &OracleContext) -> Result<Intent, OracleError> {
        let prompt = render(include_str!("prompts/classify.txt"), ctx);
        let request = self.request(prompt, false);
        self.ask("classify_intent", request, |reply| Ok(parse_intent(reply)))
    }

    fn resolve_player_action(&mut self, ctx: &OracleContext) -> Result<ActionResolution, OracleError> {
        let prompt = render(include_str!("prompts/player_action.txt"), ctx);
        let request = self.request(prompt, true);
        self.ask("resolve_player_action", request, |reply| {
            let raw: RawActionReply = parse_json(reply)?;
            Ok(ActionResolution {
                is_valid: raw.is_valid,
                description: raw.description,
                participant_deltas: raw.result,
            })
        })
    }

    fn decide_monster_action(&mut self, ctx: &OracleContext) -> Result<MonsterAction, OracleError> {
        let prompt = render(include_str!("prompts/monster.txt"), ctx);
        let request = self.request(prompt, true);
        self.ask("decide_monster_action", request, |reply| {
            let raw: RawMonsterReply = parse_json(reply)?;
            let reaction_target = match raw.temp_player_actor.as_deref() {
                Some(who) if raw.requires_player_input => resolve_investigator(ctx, who),
                _ => None,
            };
            Ok(MonsterAction {
                description: raw.description,
                participant_deltas: raw.result,
                requires_player_input: raw.requires_player_input,
                reaction_target,
            })
        })
    }

    fn answer_rules_query(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        let prompt = render(include_str!("prompts/rules.txt"), ctx);
        let request = self.request(prompt, false);
        self.ask("answer_rules_query", request, parse_text)
    }

    fn answer_ooc(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        let prompt = render(include_str!("prompts/ooc.txt"), ctx);
        let request = self.request(prompt, false);
        self.ask("answer_ooc", request, parse_text)
    }

    fn narrate(&mut self, ctx: &OracleContext) -> Result<String, OracleError> {
        let prompt = render(include_str!("prompts/narrate.txt"), ctx);
        let request = self.request(prompt, false);
        self.ask("narrate", request, parse_text)
    }
}

// ============================================================================
// Prompt rendering
// ============================================================================

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-z_]+)\}").unwrap();
}

fn render(template: &str, ctx: &OracleContext) -> String {
    let actor = ctx
        .current_actor()
        .map(|p| format!("{} ({})", p.display_name, p.id))
        .unwrap_or_else(|| "unknown".to_string());
    let actor_record = ctx.current_actor().map(to_json).unwrap_or_else(|| "{}".to_string());
    let map = if ctx.map.zones.is_empty() && ctx.map.name.is_empty() {
        "no map".to_string()
    } else {
        to_json(&ctx.map)
    };

    // One pass over the template, so substituted text is never rescanned.
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "round_number" => ctx.round_number.to_string(),
            "actor" => actor.clone(),
            "actor_record" => actor_record.clone(),
            "reaction" => if ctx.reaction { "yes" } else { "no" }.to_string(),
            "input" => ctx.player_input.clone().unwrap_or_default(),
            "log" => ctx.log_tail.join("\n"),
            "map" => map.clone(),
            "participants" => to_json(&ctx.participants),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

// ============================================================================
// Reply parsing
// ============================================================================

fn parse_intent(reply: &str) -> Intent {
    let reply = reply.trim().to_lowercase();
    if reply.contains("direct_action") {
        Intent::DirectAction
    } else if reply.contains("query") {
        Intent::Query
    } else if reply.contains("ooc") {
        Intent::Ooc
    } else {
        Intent::FuzzyIntent
    }
}

fn parse_text(reply: &str) -> Result<String, OracleError> {
    let text = reply.trim();
    if text.is_empty() {
        return Err(OracleError::OracleResponseMalformed("empty reply".to_string()));
    }
    Ok(text.to_string())
}

/// Pull the JSON object out of a reply: fenced block, bare, or embedded.
fn extract_json(reply: &str) -> &str {
    for fence in ["```json", "```"] {
        if let Some(start) = reply.find(fence) {
            let body = &reply[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }

    let trimmed = reply.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => trimmed,
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(reply: &str) -> Result<T, OracleError> {
    serde_json::from_str(extract_json(reply))
        .map_err(|e| OracleError::OracleResponseMalformed(e.to_string()))
}

/// Match a model-supplied id or display name against the investigators.
fn resolve_investigator(ctx: &OracleContext, who: &str) -> Option<ParticipantId> {
    let who = who.trim();
    ctx.participants
        .iter()
        .filter(|p| p.is_investigator())
        .find(|p| p.id.as_str() == who || p.display_name.eq_ignore_ascii_case(who))
        .map(|p| p.id.clone())
}

/// Accepts `true`, `"true"`, `"yes"` and friends; models are inconsistent.
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "1"),
    })
}

#[derive(Deserialize)]
struct RawActionReply {
    #[serde(rename = "isValid", deserialize_with = "lenient_bool")]
    is_valid: bool,
    description: String,
    #[serde(default)]
    result: Vec<Participant>,
}

#[derive(Deserialize)]
struct RawMonsterReply {
    description: String,
    #[serde(default)]
    result: Vec<Participant>,
    #[serde(rename = "requiresPlayerInput", default, deserialize_with = "lenient_bool")]
    requires_player_input: bool,
    #[serde(default)]
    temp_player_actor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Stats;
    use crate::state::{CombatMap, CombatState};
    use std::collections::VecDeque;

    /// Replays canned replies and records requests.
    struct Canned {
        replies: VecDeque<Result<String, ModelError>>,
        requests: Vec<ModelRequest>,
        tool_calls: Vec<ToolCall>,
    }

    impl Canned {
        fn new(replies: Vec<Result<&str, ModelError>>) -> Self {
            Self {
                replies: replies.into_iter().map(|r| r.map(str::to_string)).collect(),
                requests: Vec::new(),
                tool_calls: Vec::new(),
            }
        }
    }

    impl LanguageModel for Canned {
        fn complete(
            &mut self,
            request: &ModelRequest,
            execute_tool: &mut dyn FnMut(&ToolCall) -> ToolOutput,
        ) -> Result<String, ModelError> {
            self.requests.push(request.clone());
            if !request.tools.is_empty() {
                let call = ToolCall {
                    id: "toolu_1".to_string(),
                    name: "roll_dice".to_string(),
                    input: serde_json::json!({"notation": "1d100"}),
                };
                let output = execute_tool(&call);
                assert!(!output.is_error);
                self.tool_calls.push(call);
            }
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Network("no more replies".to_string())))
        }
    }

    fn context() -> OracleContext {
        let mut state = CombatState::new(
            vec![
                Participant::investigator("amelia", "Amelia Clark", Stats::new(12, 12).unwrap()),
                Participant::enemy("ghoul_1", "Ghoul A", Stats::new(13, 13).unwrap()),
            ],
            CombatMap::new("Cemetery"),
        )
        .unwrap();
        state.round_number = 1;
        state.initiative_order = vec!["amelia".into(), "ghoul_1".into()];
        state.current_actor_index = Some(0);
        state.player_input = Some("I shoot the ghoul".to_string());
        OracleContext::from_state(&state, None)
    }

    fn oracle(replies: Vec<Result<&str, ModelError>>) -> ModelOracle<Canned, StdRng> {
        ModelOracle::new(Canned::new(replies)).with_rng(StdRng::seed_from_u64(11))
    }

    #[test]
    fn test_parse_intent() {
        assert_eq!(parse_intent("direct_action"), Intent::DirectAction);
        assert_eq!(parse_intent("  QUERY\n"), Intent::Query);
        assert_eq!(parse_intent("ooc"), Intent::Ooc);
        assert_eq!(parse_intent("fuzzy_intent"), Intent::FuzzyIntent);
        assert_eq!(parse_intent("no idea"), Intent::FuzzyIntent);
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(extract_json("Here you go: {\"a\": 1} enjoy"), "{\"a\": 1}");
    }

    #[test]
    fn test_render_fills_placeholders() {
        let prompt = render(include_str!("prompts/player_action.txt"), &context());
        assert!(prompt.contains("I shoot the ghoul"));
        assert!(prompt.contains("Amelia Clark (amelia)"));
        assert!(!prompt.contains("{participants}"));
        assert!(!prompt.contains("{log}"));
    }

    #[test]
    fn test_render_leaves_player_text_alone() {
        let mut ctx = context();
        ctx.player_input = Some("I shout {participants} and {log}".to_string());

        let prompt = render("Input: {input}\nMap: {map}\nKeep {unknown}", &ctx);

        assert!(prompt.contains("Input: I shout {participants} and {log}"));
        assert!(prompt.contains("\"Cemetery\""));
        assert!(prompt.contains("Keep {unknown}"));
    }

    #[test]
    fn test_classify_uses_no_tools() {
        let mut oracle = oracle(vec![Ok("direct_action")]);
        assert_eq!(oracle.classify_intent(&context()).unwrap(), Intent::DirectAction);
        assert!(oracle.model().requests[0].tools.is_empty());
    }

    #[test]
    fn test_player_action_rolls_and_parses() {
        let reply = r#"```json
{
  "isValid": "true",
  "description": "Amelia fires: 1d100 = 23, a hit. Damage 1d10 = 6.",
  "result": [{"id": "ghoul_1", "name": "Ghoul A", "type": "enemy",
              "stats": {"HP": 7, "maxHP": 13}, "status": "active", "effects": [], "items": []}]
}
```"#;
        let mut oracle = oracle(vec![Ok(reply)]);
        let resolution = oracle.resolve_player_action(&context()).unwrap();

        assert!(resolution.is_valid);
        assert_eq!(resolution.participant_deltas.len(), 1);
        assert_eq!(resolution.participant_deltas[0].stats.hp(), 7);
        assert_eq!(oracle.model().tool_calls.len(), 1);
        assert_eq!(oracle.model().requests[0].tools[0].name, "roll_dice");
    }

    #[test]
    fn test_malformed_reply_is_retried() {
        let good = r#"{"isValid": false, "description": "You are out of ammunition."}"#;
        let mut oracle = oracle(vec![Ok("I think it hits?"), Ok(good)]);
        let resolution = oracle.resolve_player_action(&context()).unwrap();
        assert!(!resolution.is_valid);
        assert_eq!(oracle.model().requests.len(), 2);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut oracle = oracle(vec![
            Ok("nonsense"),
            Err(ModelError::Api {
                status: 529,
                message: "overloaded".to_string(),
            }),
            Ok("{\"isValid\": 3}"),
            Ok(r#"{"isValid": true, "description": "too late"}"#),
        ]);
        let err = oracle.resolve_player_action(&context()).unwrap_err();
        assert!(matches!(err, OracleError::OracleResponseMalformed(_)));
        assert_eq!(oracle.model().requests.len(), 3);
    }

    #[test]
    fn test_monster_reaction_target_by_name() {
        let reply = r#"{
            "description": "The ghoul lunges at Amelia. Dodge or fight back?",
            "result": [],
            "requiresPlayerInput": true,
            "temp_player_actor": "amelia clark"
        }"#;
        let mut oracle = oracle(vec![Ok(reply)]);
        let action = oracle.decide_monster_action(&context()).unwrap();
        assert!(action.requires_player_input);
        assert_eq!(action.reaction_target, Some(ParticipantId::from("amelia")));
    }

    #[test]
    fn test_empty_text_is_malformed() {
        let mut oracle = oracle(vec![Ok("   "), Ok(""), Ok("\n")]);
        assert!(matches!(
            oracle.narrate(&context()),
            Err(OracleError::OracleResponseMalformed(_))
        ));
    }
}
