use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use common::{BacktestError, Bar, BarSet, Result};

const CSV_FIELDS: usize = 7;

/// Load bar sets from a long-format CSV file
///
/// Expected columns: timestamp, ticker, open, high, low, close, volume.
/// Rows sharing a timestamp are grouped into one bar set.
pub fn load_csv(path: &Path) -> Result<Vec<BarSet>> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    read_csv(BufReader::new(file))
}

/// Parse long-format CSV from any reader
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<BarSet>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut grouped: BTreeMap<DateTime<Utc>, BarSet> = BTreeMap::new();

    for (row, result) in csv_reader.records().enumerate() {
        let record = result.map_err(|e| BacktestError::CsvError(e.to_string()))?;
        let line = row + 2;

        if record.len() < CSV_FIELDS {
            return Err(BacktestError::CsvError(format!(
                "line {}: expected {} fields, got {}",
                line,
                CSV_FIELDS,
                record.len()
            )));
        }

        let timestamp = parse_timestamp(&record[0])?;
        let ticker = record[1].to_string();
        let field = |idx: usize, name: &str| -> Result<f64> {
            record[idx].parse().map_err(|_| {
                BacktestError::CsvError(format!("line {}: invalid {} '{}'", line, name, &record[idx]))
            })
        };

        let bar = Bar {
            open: field(2, "open")?,
            high: field(3, "high")?,
            low: field(4, "low")?,
            close: field(5, "close")?,
            volume: field(6, "volume")?,
        };

        let set = grouped
            .entry(timestamp)
            .or_insert_with(|| BarSet::new(timestamp));
        if set.contains(&ticker) {
            return Err(BacktestError::CsvError(format!(
                "line {}: duplicate bar for {} at {}",
                line, ticker, timestamp
            )));
        }
        set.insert(ticker, bar);
    }

    Ok(grouped.into_values().collect())
}

/// Load bar sets from a JSON array
pub fn load_json(path: &Path) -> Result<Vec<BarSet>> {
    let file = File::open(path).map_err(|e| BacktestError::DataLoadError(e.to_string()))?;
    let reader = BufReader::new(file);
    let mut bar_sets: Vec<BarSet> = serde_json::from_reader(reader)?;
    bar_sets.sort_by_key(|set| set.timestamp);
    Ok(bar_sets)
}

/// Parse timestamp from various formats
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    // Try ISO 8601 format first
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try common formats
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d",
    ];

    for fmt in &formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
        }
    }

    // Try Unix timestamp (seconds)
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(BacktestError::CsvError(format!(
        "Unable to parse timestamp: {}",
        s
    )))
}
