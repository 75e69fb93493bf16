use anyhow::{Context, Result};

use crate::domain::entities::import_job::TabularData;

pub fn read_csv(bytes: &[u8]) -> Result<TabularData> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .context("failed to read headers from csv")?
        .clone();

    if headers.is_empty() || headers.iter().all(|header| header.is_empty()) {
        anyhow::bail!("csv header is required")
    }

    let columns: Vec<String> = headers.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("failed to parse csv record")?;
        if record.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(
            (0..columns.len())
                .map(|col_idx| record.get(col_idx).unwrap_or("").to_string())
                .collect(),
        );
    }

    Ok(TabularData { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_header_and_pads_short_rows() {
        let data = read_csv(b"Name,Phone,City\nAnn,555,Oslo\nBob\n,,\n")
            .expect("csv should parse");

        assert_eq!(data.columns, vec!["Name", "Phone", "City"]);
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[1], vec!["Bob", "", ""]);
    }

    #[test]
    fn missing_header_is_an_error() {
        assert!(read_csv(b"").is_err());
    }
}
