use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rise,
    Fall,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Rise => "rise",
            Direction::Fall => "fall",
        })
    }
}

/// A direction plus a free-text percentage, e.g. `rise` / `"0.5%"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionCall {
    pub direction: Direction,
    pub amount: String,
}

/// One row of the scoreboard: what each stage called for a day next to what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub position: i64,
    pub date: String,
    #[serde(flatten)]
    pub calls: BTreeMap<String, DirectionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DirectionCall>,
}

impl OutcomeRecord {
    pub fn new(position: i64, date: impl Into<String>) -> Self {
        Self {
            position,
            date: date.into(),
            calls: BTreeMap::new(),
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_calls_sit_between_date_and_outcome() {
        let mut record = OutcomeRecord::new(4, "4_2024-01-05");
        record.calls.insert(
            "gptd".to_string(),
            DirectionCall {
                direction: Direction::Rise,
                amount: "0.5%".to_string(),
            },
        );
        record.outcome = Some(DirectionCall {
            direction: Direction::Fall,
            amount: "-0.31%".to_string(),
        });

        let text = serde_json::to_string(&record).unwrap();
        let gptd = text.find("\"gptd\"").unwrap();
        assert!(text.find("\"date\"").unwrap() < gptd);
        assert!(gptd < text.find("\"outcome\"").unwrap());

        let back: OutcomeRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn reads_records_without_outcome() {
        let record: OutcomeRecord = serde_json::from_value(json!({
            "position": 2,
            "date": "2_2024-01-03",
            "gptc": {"direction": "fall", "amount": "1%"}
        }))
        .unwrap();
        assert!(record.outcome.is_none());
        assert_eq!(record.calls["gptc"].direction, Direction::Fall);
    }
}
