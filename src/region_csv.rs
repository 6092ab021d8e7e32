use csv::{ReaderBuilder, Trim};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::data::RegionDatum;

/// Parses CSV region data keyed by its `id` column.
///
/// The first record is the header. `fillKey` and `color` columns land on the
/// typed datum fields, every other column is kept as an extra field
/// (numeric cells become JSON numbers). Rows without an id are skipped.
pub fn parse(text: &str) -> BTreeMap<String, RegionDatum> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let columns = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            warn!(error = %e, "unreadable csv header");
            return BTreeMap::new();
        }
    };
    let Some(id_col) = columns.iter().position(|c| c.eq_ignore_ascii_case("id")) else {
        warn!("csv region data has no id column");
        return BTreeMap::new();
    };

    let mut rows = BTreeMap::new();
    for (line_no, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 2, error = %e, "skipping unreadable csv row");
                continue;
            }
        };
        let Some(id) = record.get(id_col).filter(|id| !id.is_empty()) else {
            warn!(line = line_no + 2, "skipping csv row without id");
            continue;
        };

        let mut datum = RegionDatum::default();
        for (i, (column, cell)) in columns.iter().zip(record.iter()).enumerate() {
            if cell.is_empty() || i == id_col {
                continue;
            }
            match column {
                "fillKey" => datum.fill_key = Some(cell.to_string()),
                "color" => datum.color = Some(cell.to_string()),
                _ => {
                    datum.extra.insert(column.to_string(), cell_value(cell));
                }
            }
        }
        rows.insert(id.to_string(), datum);
    }
    rows
}

fn cell_value(cell: &str) -> Value {
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn rows_are_keyed_by_id() {
        let rows = parse("id,fillKey,votes,party\nUS,high,538,\"blue\"\n,low,1,x\nCA,,12.5,red\n");
        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["CA", "US"]);
        assert_eq!(rows["US"].to_tag(), json!({ "fillKey": "high", "votes": 538.0, "party": "blue" }));
        assert_eq!(rows["CA"].fill_key, None);
    }

    #[test]
    fn quoted_cells_keep_their_commas() {
        let rows = parse("id,name,fillKey\nDC,\"Washington, DC\",high\n");
        assert_eq!(rows["DC"].fill_key.as_deref(), Some("high"));
        assert_eq!(rows["DC"].to_tag(), json!({ "fillKey": "high", "name": "Washington, DC" }));
    }

    #[test]
    fn missing_id_column_yields_nothing() {
        assert!(parse("name,fillKey\nUS,high\n").is_empty());
        assert!(parse("").is_empty());
    }
}
