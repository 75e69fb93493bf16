use std::io::{Cursor, Read, Seek};

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsx};

use crate::domain::entities::import_job::TabularData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookFormat {
    Xls,
    Xlsx,
}

pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(v) => v.trim().to_string(),
        Data::Float(v) => v.to_string(),
        Data::Int(v) => v.to_string(),
        Data::Bool(v) => v.to_string(),
        Data::DateTime(v) => v.to_string(),
        Data::DateTimeIso(v) => v.to_string(),
        Data::DurationIso(v) => v.to_string(),
        Data::Error(v) => format!("{v:?}"),
        Data::Empty => String::new(),
    }
}

/// Reads the first worksheet; its first non-empty row is the header.
pub fn read_workbook(bytes: &[u8], format: WorkbookFormat) -> Result<TabularData> {
    let cursor = Cursor::new(bytes);
    match format {
        WorkbookFormat::Xlsx => {
            let workbook: Xlsx<_> = open_workbook_from_rs(cursor)
                .map_err(|err| anyhow!("failed to open xlsx: {err:?}"))?;
            first_sheet(workbook)
        }
        WorkbookFormat::Xls => {
            let workbook: Xls<_> = open_workbook_from_rs(cursor)
                .map_err(|err| anyhow!("failed to open xls: {err:?}"))?;
            first_sheet(workbook)
        }
    }
}

fn first_sheet<RS, R>(mut workbook: R) -> Result<TabularData>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let range = workbook
        .worksheet_range_at(0)
        .context("workbook has no sheets")?
        .map_err(|err| anyhow!("failed to read first sheet: {err:?}"))?;

    let mut rows = range
        .rows()
        .map(|r| r.iter().map(cell_to_string).collect::<Vec<String>>())
        .filter(|r| r.iter().any(|value| !value.is_empty()));

    let columns = rows.next().context("sheet header is required")?;
    let width = columns.len();
    let rows = rows
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();

    Ok(TabularData { columns, rows })
}
