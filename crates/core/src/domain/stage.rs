use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini-2024-07-18";

/// The four chained analysis stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// A: key information and sentiment per news item.
    News,
    /// B: impact of sentiment on the day's prices, then a next-day prediction.
    Impact,
    /// C: next-day prediction from the price history alone.
    Trend,
    /// D: reconciles B and C into a final prediction.
    Integration,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::News, Stage::Impact, Stage::Trend, Stage::Integration];

    /// File-name stem of the stage's logs and datasets.
    pub fn id(self) -> &'static str {
        match self {
            Stage::News => "gpta",
            Stage::Impact => "gptb",
            Stage::Trend => "gptc",
            Stage::Integration => "gptd",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::News => "news extraction",
            Stage::Impact => "impact analysis",
            Stage::Trend => "price trend",
            Stage::Integration => "integration",
        }
    }

    /// Stages whose log records carry a next-day `prediction`.
    pub fn predicts(self) -> bool {
        !matches!(self, Stage::News)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "gpta" | "news" => Ok(Stage::News),
            "b" | "gptb" | "impact" => Ok(Stage::Impact),
            "c" | "gptc" | "trend" => Ok(Stage::Trend),
            "d" | "gptd" | "integration" => Ok(Stage::Integration),
            other => anyhow::bail!("unknown stage {other:?} (expected a, b, c or d)"),
        }
    }
}

/// Model id in use for each stage, plus the one used by evaluators.
///
/// Stage models are swapped for their fine-tuned successors between batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageModels {
    pub news: String,
    pub impact: String,
    pub trend: String,
    pub integration: String,
    pub eval: String,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            news: DEFAULT_MODEL.to_string(),
            impact: DEFAULT_MODEL.to_string(),
            trend: DEFAULT_MODEL.to_string(),
            integration: DEFAULT_MODEL.to_string(),
            eval: DEFAULT_MODEL.to_string(),
        }
    }
}

impl StageModels {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        for stage in Stage::ALL {
            let var = format!("{}_MODEL", stage.id().to_ascii_uppercase());
            if let Some(model) = env_model(&var) {
                out.set(stage, model);
            }
        }
        if let Some(model) = env_model("EVAL_MODEL") {
            out.eval = model;
        }
        out
    }

    pub fn get(&self, stage: Stage) -> &str {
        match stage {
            Stage::News => &self.news,
            Stage::Impact => &self.impact,
            Stage::Trend => &self.trend,
            Stage::Integration => &self.integration,
        }
    }

    pub fn set(&mut self, stage: Stage, model: String) {
        match stage {
            Stage::News => self.news = model,
            Stage::Impact => self.impact = model,
            Stage::Trend => self.trend = model,
            Stage::Integration => self.integration = model,
        }
    }
}

fn env_model(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stage_aliases() {
        assert_eq!("a".parse::<Stage>().unwrap(), Stage::News);
        assert_eq!("GPTB".parse::<Stage>().unwrap(), Stage::Impact);
        assert_eq!("trend".parse::<Stage>().unwrap(), Stage::Trend);
        assert_eq!(" d ".parse::<Stage>().unwrap(), Stage::Integration);
        assert!("e".parse::<Stage>().is_err());
    }

    #[test]
    fn set_replaces_only_that_stage() {
        let mut models = StageModels::default();
        models.set(Stage::Trend, "ft:gpt-4o-mini:trend".to_string());
        assert_eq!(models.get(Stage::Trend), "ft:gpt-4o-mini:trend");
        assert_eq!(models.get(Stage::News), DEFAULT_MODEL);
    }
}
