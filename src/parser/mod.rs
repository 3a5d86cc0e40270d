pub mod docx_reader;
pub mod pdf_parser;
pub mod spreadsheet;
pub mod table_parser;

pub use docx_reader::DocxReader;
pub use pdf_parser::PdfParser;
pub use spreadsheet::SpreadsheetParser;
pub use table_parser::{TableParser, NO_TABLES_SENTINEL};

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::utils::CopilotResult;

/// 支持的来源文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Pdf,
    Word,
    Text,
    Spreadsheet,
    Csv,
}

impl SourceKind {
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Word)
            }
            "text/plain" => Some(Self::Text),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => Some(Self::Spreadsheet),
            "text/csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Word),
            "txt" | "md" => Some(Self::Text),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Word => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Text => "text/plain",
            Self::Spreadsheet => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv",
        }
    }
}

/// 上传的来源文件
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// 从本地路径读取，类型由扩展名推断
    pub fn from_path(path: impl AsRef<Path>) -> CopilotResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = SourceKind::from_path(path)
            .map(|k| k.mime().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(Self::new(name, content_type, bytes))
    }

    /// MIME 优先，无法识别时退回扩展名
    pub fn kind(&self) -> Option<SourceKind> {
        SourceKind::from_mime(&self.content_type).or_else(|| SourceKind::from_path(&self.name))
    }
}

/// 被跳过的文件及原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionReport {
    pub text: String,
    pub skipped: Vec<SkippedFile>,
}

/// 来源文件合并管道
pub struct IngestionPipeline {
    pdf_parser: PdfParser,
    docx_reader: DocxReader,
    spreadsheet: SpreadsheetParser,
}

impl IngestionPipeline {
    pub fn new() -> Self {
        Self {
            pdf_parser: PdfParser::new(),
            docx_reader: DocxReader::new(),
            spreadsheet: SpreadsheetParser::new(),
        }
    }

    /// 按上传顺序拼接全部文件文本，每个文件前附文件名标记
    pub fn combine(&self, files: &[SourceFile]) -> IngestionReport {
        info!("开始合并来源文件: {} 个", files.len());
        let mut report = IngestionReport::default();

        for file in files {
            let Some(kind) = file.kind() else {
                warn!("不支持的文件类型，已跳过: {} ({})", file.name, file.content_type);
                report.skipped.push(SkippedFile {
                    name: file.name.clone(),
                    reason: format!("unsupported file type: {}", file.content_type),
                });
                continue;
            };

            match self.extract(kind, file) {
                Ok(text) => {
                    report.text.push_str(&format!("\n\n### {} ###\n\n", file.name));
                    report.text.push_str(&text);
                }
                Err(e) => {
                    warn!("文件解析失败，已跳过: {}: {}", file.name, e);
                    report.skipped.push(SkippedFile {
                        name: file.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "来源合并完成: {} 字符, 跳过 {} 个文件",
            report.text.len(),
            report.skipped.len()
        );
        report
    }

    fn extract(&self, kind: SourceKind, file: &SourceFile) -> CopilotResult<String> {
        match kind {
            SourceKind::Pdf => self.pdf_parser.extract_text(&file.name, &file.bytes),
            SourceKind::Word => self.docx_reader.extract_text(&file.name, &file.bytes),
            SourceKind::Text => Ok(String::from_utf8_lossy(&file.bytes).into_owned()),
            SourceKind::Spreadsheet => self.spreadsheet.extract_workbook(&file.name, &file.bytes),
            SourceKind::Csv => self.spreadsheet.extract_csv(&file.name, &file.bytes),
        }
    }
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mime_and_extension_detection() {
        assert_eq!(SourceKind::from_mime("application/pdf"), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::from_mime("text/plain; charset=utf-8"), Some(SourceKind::Text));
        assert_eq!(SourceKind::from_mime("image/png"), None);
        assert_eq!(SourceKind::from_path("report.XLSX"), Some(SourceKind::Spreadsheet));
        assert_eq!(SourceKind::from_path("notes.csv"), Some(SourceKind::Csv));
        assert_eq!(SourceKind::from_path("figure.png"), None);
    }

    #[test]
    fn files_are_combined_in_upload_order_with_headers() {
        let files = vec![
            SourceFile::new("protocol.txt", "text/plain", b"Protocol body".to_vec()),
            SourceFile::new("figure.png", "image/png", vec![0x89, 0x50]),
            SourceFile::new("orr.csv", "text/csv", b"arm,orr\nA,45\n".to_vec()),
        ];
        let report = IngestionPipeline::new().combine(&files);

        assert_eq!(
            report.text,
            "\n\n### protocol.txt ###\n\nProtocol body\n\n### orr.csv ###\n\narm,orr\nA,45\n"
        );
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "figure.png");
    }

    #[test]
    fn failing_extractor_skips_only_that_file() {
        let files = vec![
            SourceFile::new("broken.pdf", "application/pdf", Vec::new()),
            SourceFile::new("summary.txt", "text/plain", b"ok".to_vec()),
        ];
        let report = IngestionPipeline::new().combine(&files);
        assert!(report.text.contains("### summary.txt ###"));
        assert!(!report.text.contains("broken.pdf"));
        assert_eq!(report.skipped[0].name, "broken.pdf");
    }

    #[test]
    fn malformed_pdf_and_docx_are_skipped_without_aborting() {
        let files = vec![
            SourceFile::new(
                "tlf.pdf",
                "application/pdf",
                pdf_parser::tests::pdf_with_unknown_font(),
            ),
            SourceFile::new(
                "csr.docx",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                b"PK\x03\x04 truncated".to_vec(),
            ),
            SourceFile::new("summary.txt", "text/plain", b"Median OS 14.2 months".to_vec()),
        ];
        let report = IngestionPipeline::new().combine(&files);

        assert_eq!(report.text, "\n\n### summary.txt ###\n\nMedian OS 14.2 months");
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(skipped, vec!["tlf.pdf", "csr.docx"]);
    }

    #[test]
    fn empty_upload_list_yields_empty_text() {
        let report = IngestionPipeline::new().combine(&[]);
        assert!(report.text.is_empty());
        assert!(report.skipped.is_empty());
    }
}
