pub mod csv;
pub mod xlsx;

use anyhow::Result;

use crate::domain::entities::import_job::{SourceFile, TabularData, CSV_MIME, XLSX_MIME, XLS_MIME};
use crate::infra::import::xlsx::WorkbookFormat;

pub fn parse_source(file: &SourceFile) -> Result<TabularData> {
    match file.mime_type.as_str() {
        CSV_MIME => csv::read_csv(&file.content),
        XLSX_MIME => xlsx::read_workbook(&file.content, WorkbookFormat::Xlsx),
        XLS_MIME => xlsx::read_workbook(&file.content, WorkbookFormat::Xls),
        other => anyhow::bail!("unsupported spreadsheet type: {other}"),
    }
}
