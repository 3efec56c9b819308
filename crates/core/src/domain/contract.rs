use crate::domain::outcome::{Direction, DirectionCall};
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};

/// Direction/amount as returned by the extraction prompt, before validation.
///
/// Models answer either `{"direction": .., "amount": ..}` or the same object nested under the
/// stage id (`{"gptd": {...}}`); both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmDirectionReply {
    Flat(LlmDirectionCall),
    Nested(std::collections::BTreeMap<String, LlmDirectionCall>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDirectionCall {
    pub direction: String,
    pub amount: serde_json::Value,
}

impl LlmDirectionReply {
    pub fn validate_and_into_call(self, stage_id: &str) -> anyhow::Result<DirectionCall> {
        let call = match self {
            LlmDirectionReply::Flat(call) => call,
            LlmDirectionReply::Nested(mut by_stage) => {
                let direct = by_stage.remove(stage_id);
                // A single entry under some other name is taken as the answer.
                let only = (by_stage.len() == 1)
                    .then(|| by_stage.into_values().next())
                    .flatten();
                match direct.or(only) {
                    Some(call) => call,
                    None => bail!("extraction reply has no {stage_id:?} entry"),
                }
            }
        };
        call.validate_and_into_call()
    }
}

impl LlmDirectionCall {
    pub fn validate_and_into_call(self) -> anyhow::Result<DirectionCall> {
        let direction = match self.direction.trim().to_ascii_lowercase().as_str() {
            "rise" | "raise" | "up" | "increase" => Direction::Rise,
            "fall" | "down" | "decrease" | "decline" => Direction::Fall,
            other => bail!("direction must be rise or fall (got {other:?})"),
        };

        let amount = match self.amount {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => format!("{n}%"),
            other => bail!("amount must be a string or number (got {other})"),
        };
        ensure!(!amount.is_empty(), "amount must be non-empty");

        Ok(DirectionCall { direction, amount })
    }
}
