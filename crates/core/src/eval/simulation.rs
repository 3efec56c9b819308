//! Paper trading on the scoreboard: hold the index on days a stage calls a rise, sit in cash on
//! days it calls a fall.

use crate::domain::outcome::{Direction, OutcomeRecord};
use crate::eval::metrics::parse_amount;
use serde::Serialize;

pub const INITIAL_CAPITAL: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub stage: String,
    pub days: usize,
    /// Buys plus sells.
    pub trades: usize,
    pub initial_value: f64,
    pub final_value: f64,
    pub return_pct: f64,
    /// Holding through every simulated day, for comparison.
    pub buy_and_hold_value: f64,
}

/// Replays `stage`'s calls in position order starting from `initial` in cash.
///
/// On a `rise` call the whole balance is invested for that day and moves by the realized
/// amount; on a `fall` call it stays in (or moves back to) cash. Rows missing the stage's call,
/// the outcome, or a parsable outcome amount are skipped.
pub fn simulate(rows: &[OutcomeRecord], stage: &str, initial: f64) -> SimulationResult {
    let mut days: Vec<(i64, Direction, f64)> = rows
        .iter()
        .filter_map(|row| {
            let call = row.calls.get(stage)?;
            let actual = parse_amount(row.outcome.as_ref()?)?;
            Some((row.position, call.direction, actual))
        })
        .collect();
    days.sort_by_key(|(position, _, _)| *position);

    let mut value = initial;
    let mut benchmark = initial;
    let mut invested = false;
    let mut trades = 0;
    for &(_, direction, actual) in &days {
        let growth = 1.0 + actual / 100.0;
        benchmark *= growth;

        let want_in = direction == Direction::Rise;
        if want_in != invested {
            trades += 1;
            invested = want_in;
        }
        if invested {
            value *= growth;
        }
    }
    if invested {
        // Closing sale.
        trades += 1;
    }

    tracing::debug!(stage, days = days.len(), trades, final_value = value, "simulation finished");
    SimulationResult {
        stage: stage.to_string(),
        days: days.len(),
        trades,
        initial_value: initial,
        final_value: value,
        return_pct: (value / initial - 1.0) * 100.0,
        buy_and_hold_value: benchmark,
    }
}

/// [`simulate`] for each scored stage.
pub fn simulate_all(rows: &[OutcomeRecord], initial: f64) -> Vec<SimulationResult> {
    super::scoreboard::SCORED_STAGES
        .iter()
        .map(|stage| simulate(rows, stage.id(), initial))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::DirectionCall;

    fn row(position: i64, called: Direction, actual: &str) -> OutcomeRecord {
        let mut r = OutcomeRecord::new(position, format!("{position}_2024-02-0{position}"));
        r.calls.insert(
            "gptd".to_string(),
            DirectionCall {
                direction: called,
                amount: "0.5%".to_string(),
            },
        );
        let direction = if actual.starts_with('-') {
            Direction::Fall
        } else {
            Direction::Rise
        };
        r.outcome = Some(DirectionCall {
            direction,
            amount: actual.to_string(),
        });
        r
    }

    #[test]
    fn follows_the_calls_day_by_day() {
        // Out of order on purpose; replay is by position.
        let rows = vec![
            row(5, Direction::Rise, "-0.5%"),
            row(2, Direction::Rise, "1%"),
            row(3, Direction::Rise, "2%"),
            row(4, Direction::Fall, "-1%"),
        ];
        let r = simulate(&rows, "gptd", INITIAL_CAPITAL);

        // 10000 * 1.01 * 1.02, out on day 4, then * 0.995.
        assert!((r.final_value - 10_250.49).abs() < 1e-6, "{}", r.final_value);
        assert!((r.buy_and_hold_value - 10_147.9851).abs() < 1e-6);
        assert_eq!(r.days, 4);
        // Buy, sell, buy, closing sale.
        assert_eq!(r.trades, 4);
        assert!((r.return_pct - 2.5049).abs() < 1e-6);
    }

    #[test]
    fn always_fall_keeps_the_cash() {
        let rows = vec![row(2, Direction::Fall, "3%"), row(3, Direction::Fall, "-2%")];
        let r = simulate(&rows, "gptd", 500.0);
        assert_eq!(r.final_value, 500.0);
        assert_eq!(r.trades, 0);
    }

    #[test]
    fn stages_without_calls_simulate_nothing() {
        let rows = vec![row(2, Direction::Rise, "1%")];
        let results = simulate_all(&rows, INITIAL_CAPITAL);
        assert_eq!(results.len(), 3);
        let gptb = results.iter().find(|r| r.stage == "gptb").unwrap();
        assert_eq!(gptb.days, 0);
        assert_eq!(gptb.final_value, INITIAL_CAPITAL);
        let gptd = results.iter().find(|r| r.stage == "gptd").unwrap();
        assert!((gptd.final_value - 10_100.0).abs() < 1e-9);
    }
}
