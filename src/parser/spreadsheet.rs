use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::{info, warn};

use crate::utils::{CopilotError, CopilotResult};

/// Excel 与 CSV 来源统一转换为 CSV 文本
pub struct SpreadsheetParser;

impl SpreadsheetParser {
    pub fn new() -> Self {
        Self
    }

    /// 读取全部工作表，每个工作表输出为带标记的 CSV 块
    pub fn extract_workbook(&self, file_name: &str, bytes: &[u8]) -> CopilotResult<String> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| {
            CopilotError::IngestError {
                file: file_name.to_string(),
                message: format!("无法打开工作簿: {}", e),
            }
        })?;

        let sheet_names = workbook.sheet_names().to_owned();
        info!("工作簿 {} 共 {} 个工作表", file_name, sheet_names.len());

        let mut text = String::new();
        for sheet_name in sheet_names {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(e) => {
                    warn!("读取工作表 '{}' 失败: {}", sheet_name, e);
                    continue;
                }
            };

            let rows: Vec<Vec<String>> = range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect())
                .collect();

            text.push_str(&format!("### Sheet: {} ###\n\n", sheet_name));
            text.push_str(&write_csv(file_name, &rows)?);
            text.push_str("\n\n");
        }

        Ok(text)
    }

    /// 重新规整 CSV（统一引号与换行），内容不变
    pub fn extract_csv(&self, file_name: &str, bytes: &[u8]) -> CopilotResult<String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CopilotError::IngestError {
                file: file_name.to_string(),
                message: format!("CSV解析错误: {}", e),
            })?;
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        info!("CSV {} 共 {} 行", file_name, rows.len());
        write_csv(file_name, &rows)
    }
}

impl Default for SpreadsheetParser {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn write_csv(file_name: &str, rows: &[Vec<String>]) -> CopilotResult<String> {
    let to_err = |message: String| CopilotError::IngestError {
        file: file_name.to_string(),
        message,
    };

    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).map_err(|e| to_err(format!("CSV写入错误: {}", e)))?;
    }
    let bytes = writer.into_inner().map_err(|e| to_err(format!("CSV写入错误: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| to_err(format!("CSV编码错误: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_passes_through_with_quoting_normalised() {
        let input = b"arm,n,orr\n\"Drug A\",120,45%\nPlacebo,118,12%\n";
        let text = SpreadsheetParser::new().extract_csv("orr.csv", input).unwrap();
        assert_eq!(text, "arm,n,orr\nDrug A,120,45%\nPlacebo,118,12%\n");
    }

    #[test]
    fn ragged_csv_rows_are_kept() {
        let input = b"a,b,c\n1,2\n";
        let text = SpreadsheetParser::new().extract_csv("ragged.csv", input).unwrap();
        assert_eq!(text, "a,b,c\n1,2\n");
    }

    #[test]
    fn invalid_workbook_is_an_ingest_error() {
        let err = SpreadsheetParser::new()
            .extract_workbook("broken.xlsx", b"definitely not excel")
            .unwrap_err();
        assert!(matches!(err, CopilotError::IngestError { .. }));
    }

    #[test]
    fn whole_floats_print_without_decimal_point() {
        assert_eq!(cell_to_string(&Data::Float(120.0)), "120");
        assert_eq!(cell_to_string(&Data::Float(0.5)), "0.5");
        assert_eq!(cell_to_string(&Data::String("ORR".into())), "ORR");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
