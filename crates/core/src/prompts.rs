//! Message builders, one per model call.
//!
//! Each builder takes only the values its call needs and returns the full message list: a
//! system instruction followed by a single user message carrying the data.

use crate::ingest::types::{PriceBar, SeriesKey};
use crate::llm::ChatMessage;
use serde::Serialize;
use serde_json::json;

const KEY_INFORMATION: &str = "\
Read the news articles below and extract the information that matters for the US equity market: \
the events, the companies and sectors involved, any figures quoted, and the expected timing. \
Report the facts only, as a concise list.";

const SENTIMENT_ANALYSIS: &str = "\
Assess the market sentiment of the key information below. State whether it is positive, negative \
or neutral for the S&P 500, how strong it is, and which points drive that judgement.";

const FINAL_PREDICTION: &str = "\
From the analysis below, state the most likely direction of the S&P 500 for the next trading day \
and the expected percentage change. Answer as 'Direction: rise|fall' and 'Amount: <n>%', followed \
by a short justification.";

const EXTRACT_DIRECTION: &str = "\
Extract the predicted direction and percentage from the text below. Reply with JSON only, in the \
form {\"direction\": \"rise\" | \"fall\", \"amount\": \"<n>%\"}.";

pub fn key_information(news_key: &str, digest: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(KEY_INFORMATION),
        ChatMessage::user(format!("News for {news_key}:\n\n{digest}")),
    ]
}

pub fn sentiment_analysis(key_information: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SENTIMENT_ANALYSIS),
        ChatMessage::user(key_information),
    ]
}

/// One stage A sentiment, tagged with the news key it came from.
#[derive(Debug, Clone, Serialize)]
pub struct SentimentInput<'a> {
    #[serde(rename = "currentDay")]
    pub current_day: &'a str,
    #[serde(rename = "sentimentAnalysis")]
    pub sentiment_analysis: &'a str,
}

pub fn impact_analysis(day: &str, sentiments: &[SentimentInput<'_>], bar: &PriceBar) -> Vec<ChatMessage> {
    let system = format!(
        "Analyse how the news sentiment below relates to the S&P 500 price data for {day}. \
         Cover the relevance of each sentiment to prices, whether its tone matches the observed \
         move, any causal links, and anomalies where the move contradicts the sentiment."
    );
    let user = json!({
        "sentimentAnalysis": sentiments,
        "stockPrices": bar,
    });
    vec![ChatMessage::system(system), ChatMessage::user(user.to_string())]
}

pub fn impact_prediction(analysis: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(FINAL_PREDICTION),
        ChatMessage::user(analysis),
    ]
}

pub fn trend_prediction(day: &str, window: &[(&SeriesKey, &PriceBar)]) -> Vec<ChatMessage> {
    let system = format!(
        "You are given S&P 500 daily bars up to and including {day}, oldest first. Using price \
         action alone, identify the prevailing trend, support and resistance, and momentum, then \
         predict the direction and percentage change for the next trading day. Answer with \
         'Direction: rise|fall' and 'Amount: <n>%' before your reasoning."
    );
    let history: serde_json::Map<String, serde_json::Value> = window
        .iter()
        .map(|(key, bar)| (key.raw.clone(), serde_json::Value::Object((*bar).clone())))
        .collect();
    vec![
        ChatMessage::system(system),
        ChatMessage::user(serde_json::Value::Object(history).to_string()),
    ]
}

pub fn integration(impact_prediction: &str, trend_prediction: &str) -> Vec<ChatMessage> {
    let system = "\
Two forecasts for the next trading day follow: one from news sentiment and its impact on prices, \
one from price history alone. Compare them, explain where they agree and disagree, and weigh \
which evidence is stronger.";
    let user = format!(
        "Sentiment-driven prediction:\n{impact_prediction}\n\nPrice-trend prediction:\n{trend_prediction}"
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn final_prediction(analysis: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(FINAL_PREDICTION),
        ChatMessage::user(analysis),
    ]
}

pub fn evaluate_prediction(prediction: &str, next_day: &str, actual: &PriceBar) -> Vec<ChatMessage> {
    let system = format!(
        "Compare the prediction below with the actual S&P 500 bar for {next_day}. State whether \
         the predicted direction was correct, how far the predicted amount was from the realised \
         change, and what the prediction missed."
    );
    let user = json!({
        "prediction": prediction,
        "actual": actual,
    });
    vec![ChatMessage::system(system), ChatMessage::user(user.to_string())]
}

pub fn evaluate_sentiment(
    key_information: &str,
    sentiment: &str,
    impact_prediction: &str,
    impact_evaluation: &str,
) -> Vec<ChatMessage> {
    let system = "\
A sentiment analysis fed a next-day prediction, and that prediction has since been evaluated \
against the market. Judge how much the sentiment contributed to the outcome: if the prediction \
was right, how it helped; if wrong, whether it overstated positive or negative aspects. Suggest \
how the sentiment analysis should change.";
    let user = format!(
        "Key information:\n{key_information}\n\nSentiment analysis:\n{sentiment}\n\n\
         Prediction:\n{impact_prediction}\n\nEvaluation:\n{impact_evaluation}"
    );
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn extract_direction(prediction: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACT_DIRECTION),
        ChatMessage::user(prediction),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn every_builder_is_system_then_user() {
        let bar = PriceBar::new();
        let key = SeriesKey::parse("1_2024-01-02").unwrap();
        let sets = [
            key_information("1_2024-01-01", "t\n\nb"),
            sentiment_analysis("ki"),
            impact_analysis("1_2024-01-02", &[], &bar),
            impact_prediction("a"),
            trend_prediction("1_2024-01-02", &[(&key, &bar)]),
            integration("b", "c"),
            final_prediction("a"),
            evaluate_prediction("p", "2_2024-01-03", &bar),
            evaluate_sentiment("k", "s", "p", "e"),
            extract_direction("p"),
        ];
        for messages in sets {
            let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
            assert_eq!(roles, vec![Role::System, Role::User]);
        }
    }

    #[test]
    fn impact_payload_carries_tagged_sentiments_and_bar() {
        let mut bar = PriceBar::new();
        bar.insert("4. close".to_string(), json!("470.10"));
        let sentiments = [SentimentInput {
            current_day: "1_2024-01-01",
            sentiment_analysis: "positive",
        }];
        let messages = impact_analysis("1_2024-01-02", &sentiments, &bar);
        let payload: serde_json::Value = serde_json::from_str(&messages[1].content).unwrap();
        assert_eq!(
            payload,
            json!({
                "sentimentAnalysis": [{"currentDay": "1_2024-01-01", "sentimentAnalysis": "positive"}],
                "stockPrices": {"4. close": "470.10"}
            })
        );
    }

    #[test]
    fn trend_history_keeps_window_order() {
        let a = SeriesKey::parse("2_2024-01-03").unwrap();
        let b = SeriesKey::parse("1_2024-01-02").unwrap();
        let bar = PriceBar::new();
        let messages = trend_prediction("2_2024-01-03", &[(&a, &bar), (&b, &bar)]);
        let content = &messages[1].content;
        assert!(content.find("2_2024-01-03").unwrap() < content.find("1_2024-01-02").unwrap());
    }
}
