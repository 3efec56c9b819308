use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::domain::outcome::{Direction, DirectionCall};
use crate::error::NotFound;

pub const DIRECTION_FIELD: &str = "6. direction";
pub const AMOUNT_FIELD: &str = "7. amount";

const OPEN_FIELD: &str = "1. open";
const CLOSE_FIELD: &str = "4. close";

/// Adds the realized `6. direction` / `7. amount` fields to every bar.
///
/// `rise` when close > open, otherwise `fall`; amount is the open-to-close change in percent,
/// two decimals, negative for a fall. Returns the number of bars annotated.
pub fn annotate_directions(series: &mut Map<String, Value>) -> Result<usize> {
    let mut n = 0;
    for (key, bar) in series.iter_mut() {
        let bar = bar
            .as_object_mut()
            .with_context(|| format!("bar {key:?} must be a JSON object"))?;
        let open = numeric_field(bar, OPEN_FIELD).with_context(|| format!("bar {key:?}"))?;
        let close = numeric_field(bar, CLOSE_FIELD).with_context(|| format!("bar {key:?}"))?;
        anyhow::ensure!(open != 0.0, "bar {key:?} has a zero open price");

        let rise = close > open;
        let mut amount = ((close - open) / open * 100.0 * 100.0).round() / 100.0;
        if !rise {
            amount = -amount.abs();
        }

        bar.insert(
            DIRECTION_FIELD.to_string(),
            Value::String(if rise { "rise" } else { "fall" }.to_string()),
        );
        bar.insert(AMOUNT_FIELD.to_string(), Value::String(percent_text(amount)));
        n += 1;
    }
    Ok(n)
}

/// Re-keys a date-keyed series as `"{index}_{date}"`, oldest date first, counting from `start`.
pub fn index_by_date(series: Map<String, Value>, start: i64) -> Result<Map<String, Value>> {
    let mut dated = series
        .into_iter()
        .map(|(date, bar)| {
            let day = date.split_whitespace().next().unwrap_or_default();
            let parsed = NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .with_context(|| format!("series key is not a date: {date:?}"))?;
            Ok((parsed, date, bar))
        })
        .collect::<Result<Vec<_>>>()?;
    dated.sort_by_key(|(parsed, _, _)| *parsed);

    Ok(dated
        .into_iter()
        .enumerate()
        .map(|(i, (_, date, bar))| (format!("{}_{date}", start + i as i64), bar))
        .collect())
}

/// The realized move of an annotated bar, as recorded by [`annotate_directions`].
pub fn realized_call(key: &str, bar: &Map<String, Value>) -> Result<DirectionCall> {
    let text = |field: &'static str| {
        bar.get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::Error::new(NotFound::new(field, key)))
    };
    let direction = match text(DIRECTION_FIELD)?.trim().to_ascii_lowercase().as_str() {
        "rise" => Direction::Rise,
        "fall" => Direction::Fall,
        other => anyhow::bail!("bar {key:?} has an unknown direction {other:?}"),
    };
    Ok(DirectionCall {
        direction,
        amount: text(AMOUNT_FIELD)?.trim().to_string(),
    })
}

/// `1.5%`, `-1.0%`, `-0.0%`: shortest decimal form, never without a fractional digit.
fn percent_text(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.1}%")
    } else {
        format!("{amount}%")
    }
}

fn numeric_field(bar: &Map<String, Value>, field: &str) -> Result<f64> {
    match bar.get(field) {
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .with_context(|| format!("{field} is not numeric: {s:?}")),
        Some(Value::Number(n)) => n.as_f64().with_context(|| format!("{field} out of range")),
        _ => anyhow::bail!("missing {field}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn annotates_rise_and_fall() {
        let mut series = json!({
            "1_2024-01-02": {"1. open": "100.0", "4. close": "101.5"},
            "2_2024-01-03": {"1. open": "100.0", "4. close": "99.0"},
            "3_2024-01-04": {"1. open": "100.0", "4. close": "100.0"}
        })
        .as_object()
        .cloned()
        .unwrap();

        assert_eq!(annotate_directions(&mut series).unwrap(), 3);
        assert_eq!(series["1_2024-01-02"][DIRECTION_FIELD], "rise");
        assert_eq!(series["1_2024-01-02"][AMOUNT_FIELD], "1.5%");
        assert_eq!(series["2_2024-01-03"][DIRECTION_FIELD], "fall");
        assert_eq!(series["2_2024-01-03"][AMOUNT_FIELD], "-1.0%");
        assert_eq!(series["3_2024-01-04"][DIRECTION_FIELD], "fall");
        assert_eq!(series["3_2024-01-04"][AMOUNT_FIELD], "-0.0%");
    }

    #[test]
    fn amounts_always_carry_a_decimal() {
        assert_eq!(percent_text(2.0), "2.0%");
        assert_eq!(percent_text(0.35), "0.35%");
        assert_eq!(percent_text(-12.25), "-12.25%");
    }

    #[test]
    fn indexes_oldest_first() {
        let series = json!({
            "2024-01-04": {"x": "3"},
            "2024-01-03": {"x": "2"},
            "2024-01-02": {"x": "1"}
        })
        .as_object()
        .cloned()
        .unwrap();

        let indexed = index_by_date(series, 1).unwrap();
        let keys: Vec<&String> = indexed.keys().collect();
        assert_eq!(keys, vec!["1_2024-01-02", "2_2024-01-03", "3_2024-01-04"]);
        assert_eq!(indexed["1_2024-01-02"]["x"], "1");
    }

    #[test]
    fn reads_back_the_realized_call() {
        let mut series = json!({"4_2024-01-05": {"1. open": "200.0", "4. close": "198.0"}})
            .as_object()
            .cloned()
            .unwrap();
        annotate_directions(&mut series).unwrap();
        let bar = series["4_2024-01-05"].as_object().unwrap();
        let call = realized_call("4_2024-01-05", bar).unwrap();
        assert_eq!(call.direction, Direction::Fall);
        assert_eq!(call.amount, "-1.0%");
    }

    #[test]
    fn unannotated_bar_has_no_realized_call() {
        let bar = json!({"1. open": "1.0"}).as_object().cloned().unwrap();
        let err = realized_call("1_2024-01-02", &bar).unwrap_err();
        assert!(crate::error::is_not_found(&err));
    }

    #[test]
    fn missing_prices_are_errors() {
        let mut series = json!({"1_2024-01-02": {"1. open": "1.0"}})
            .as_object()
            .cloned()
            .unwrap();
        assert!(annotate_directions(&mut series).is_err());
    }
}
