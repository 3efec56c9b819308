use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// Reads a tab-separated price table.
///
/// The header row names the fields; the first column of every row is its date. Returns rows in
/// file order as `(date, fields)` where `fields` holds the remaining columns.
pub fn read_price_table(path: &Path) -> Result<Vec<(String, Map<String, Value>)>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_price_table(file).with_context(|| format!("invalid TSV in {}", path.display()))
}

pub fn parse_price_table<R: std::io::Read>(reader: R) -> Result<Vec<(String, Map<String, Value>)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("missing header row")?.clone();
    anyhow::ensure!(headers.len() >= 2, "TSV needs a date column and at least one field");

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("bad TSV row {}", line + 2))?;
        let date = record.get(0).unwrap_or_default().to_string();
        anyhow::ensure!(!date.is_empty(), "row {} has an empty date", line + 2);

        let fields = headers
            .iter()
            .zip(record.iter())
            .skip(1)
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        rows.push((date, fields));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_columns_become_field_names() {
        let tsv = "date\t1. open\t4. close\n2024-01-02\t472.16\t472.65\n2024-01-03\t470.43\t468.79\n";
        let rows = parse_price_table(tsv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "2024-01-02");
        assert_eq!(rows[0].1["1. open"], "472.16");
        assert_eq!(rows[1].1["4. close"], "468.79");
        assert!(!rows[0].1.contains_key("date"));
    }

    #[test]
    fn rejects_single_column_tables() {
        assert!(parse_price_table("date\n2024-01-02\n".as_bytes()).is_err());
    }
}
