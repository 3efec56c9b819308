use anyhow::Context;
use forecast_core::ingest::{transform, tsv};
use forecast_core::storage::write_json_pretty;
use serde_json::{Map, Value};
use std::path::Path;

async fn read_document(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&text)
        .with_context(|| format!("malformed JSON in {}", path.display()))?
    {
        Value::Object(doc) => Ok(doc),
        _ => anyhow::bail!("{} must hold a JSON object", path.display()),
    }
}

fn take_series(doc: &mut Map<String, Value>, key: &str) -> anyhow::Result<Map<String, Value>> {
    match doc.remove(key) {
        Some(Value::Object(series)) => Ok(series),
        Some(_) => anyhow::bail!("{key:?} must be a JSON object"),
        None => anyhow::bail!("document has no {key:?} series"),
    }
}

/// Adds realized direction and amount to every bar of `key`, in place.
pub async fn annotate(path: &Path, key: &str) -> anyhow::Result<usize> {
    let mut doc = read_document(path).await?;
    let mut series = take_series(&mut doc, key)?;
    let n = transform::annotate_directions(&mut series)?;
    doc.insert(key.to_string(), Value::Object(series));
    write_json_pretty(path, &doc).await?;
    tracing::info!(path = %path.display(), bars = n, "annotated series");
    Ok(n)
}

/// Re-keys the date-keyed series `key` of `input` as `{index}_{date}` into `output`.
pub async fn index(input: &Path, output: &Path, key: &str, start: i64) -> anyhow::Result<usize> {
    let mut doc = read_document(input).await?;
    let series = take_series(&mut doc, key)?;
    let indexed = transform::index_by_date(series, start)?;
    let n = indexed.len();
    doc.insert(key.to_string(), Value::Object(indexed));
    write_json_pretty(output, &doc).await?;
    tracing::info!(input = %input.display(), output = %output.display(), bars = n, "indexed series");
    Ok(n)
}

/// Converts a tab-separated price table into an indexed series document.
pub async fn import_tsv(
    input: &Path,
    output: &Path,
    key: &str,
    start: i64,
    annotate: bool,
) -> anyhow::Result<usize> {
    let rows = tsv::read_price_table(input)?;
    let by_date: Map<String, Value> = rows
        .into_iter()
        .map(|(date, fields)| (date, Value::Object(fields)))
        .collect();

    let mut indexed = transform::index_by_date(by_date, start)?;
    if annotate {
        transform::annotate_directions(&mut indexed)?;
    }
    let n = indexed.len();

    let mut doc = Map::new();
    doc.insert(key.to_string(), Value::Object(indexed));
    write_json_pretty(output, &doc).await?;
    tracing::info!(input = %input.display(), output = %output.display(), bars = n, "imported price table");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_core::ingest::series::DAILY_SERIES_KEY;
    use serde_json::json;

    fn read(path: &Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn index_rekeys_oldest_first_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.json");
        let output = dir.path().join("stock/daily_SPY.json");
        let doc = json!({
            "Meta Data": {"2. Symbol": "SPY"},
            DAILY_SERIES_KEY: {
                "2024-01-03": {"1. open": "470.43", "4. close": "468.79"},
                "2024-01-02": {"1. open": "472.16", "4. close": "472.65"}
            }
        });
        std::fs::write(&input, doc.to_string()).unwrap();

        let n = index(&input, &output, DAILY_SERIES_KEY, 1).await.unwrap();
        assert_eq!(n, 2);

        let written = read(&output);
        assert_eq!(written["Meta Data"]["2. Symbol"], "SPY");
        let keys: Vec<&String> = written[DAILY_SERIES_KEY].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["1_2024-01-02", "2_2024-01-03"]);
        assert!(!output.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn import_tsv_writes_an_annotated_series() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("spy.tsv");
        let output = dir.path().join("daily.json");
        std::fs::write(
            &input,
            "date\t1. open\t4. close\n2024-01-03\t100.0\t99.0\n2024-01-02\t100.0\t101.5\n",
        )
        .unwrap();

        let n = import_tsv(&input, &output, DAILY_SERIES_KEY, 5, true).await.unwrap();
        assert_eq!(n, 2);

        let series = read(&output)[DAILY_SERIES_KEY].clone();
        assert_eq!(series["5_2024-01-02"]["6. direction"], "rise");
        assert_eq!(series["5_2024-01-02"]["7. amount"], "1.5%");
        assert_eq!(series["6_2024-01-03"]["7. amount"], "-1.0%");
    }

    #[tokio::test]
    async fn annotate_rejects_a_document_without_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily.json");
        std::fs::write(&path, r#"{"Meta Data": {}}"#).unwrap();
        assert!(annotate(&path, DAILY_SERIES_KEY).await.is_err());
    }
}
