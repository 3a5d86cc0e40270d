use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::utils::{CopilotError, CopilotResult};

const DOCUMENT_PART: &str = "word/document.xml";

/// 读取 Word (.docx) 正文段落
pub struct DocxReader;

impl DocxReader {
    pub fn new() -> Self {
        Self
    }

    /// 每个段落一行，按文档顺序拼接
    pub fn extract_text(&self, file_name: &str, bytes: &[u8]) -> CopilotResult<String> {
        let ingest_err = |message: String| CopilotError::IngestError {
            file: file_name.to_string(),
            message,
        };

        let mut archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ingest_err(format!("不是有效的docx压缩包: {}", e)))?;

        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .map_err(|e| ingest_err(format!("缺少 {}: {}", DOCUMENT_PART, e)))?
            .read_to_string(&mut xml)?;

        let paragraphs = Self::paragraphs_from_xml(&xml).map_err(ingest_err)?;
        info!("Word文档 {} 提取到 {} 个段落", file_name, paragraphs.len());

        let mut text = String::new();
        for para in paragraphs {
            text.push_str(&para);
            text.push('\n');
        }
        Ok(text)
    }

    /// 文本框等位置的段落嵌套在外层段落中，内层先结束先输出
    fn paragraphs_from_xml(xml: &str) -> Result<Vec<String>, String> {
        let mut reader = Reader::from_str(xml);
        let mut buf = Vec::new();
        let mut paragraphs = Vec::new();
        let mut open: Vec<String> = Vec::new();
        let mut in_text = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.name().as_ref() {
                    b"w:p" => open.push(String::new()),
                    b"w:t" => in_text = true,
                    _ => {}
                },
                Ok(Event::Empty(e)) => match (e.name().as_ref(), open.last_mut()) {
                    (b"w:tab", Some(current)) => current.push('\t'),
                    (b"w:br", Some(current)) => current.push('\n'),
                    // 空段落
                    (b"w:p", _) => paragraphs.push(String::new()),
                    _ => {}
                },
                Ok(Event::Text(t)) if in_text => {
                    let text = t.unescape().map_err(|e| format!("XML转义错误: {}", e))?;
                    if let Some(current) = open.last_mut() {
                        current.push_str(&text);
                    }
                }
                Ok(Event::End(e)) => match e.name().as_ref() {
                    b"w:t" => in_text = false,
                    b"w:p" => {
                        if let Some(done) = open.pop() {
                            paragraphs.push(done);
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => return Err(format!("XML解析错误 (位置 {}): {}", reader.buffer_position(), e)),
                _ => {}
            }
            buf.clear();
        }

        debug!("解析段落 {} 个", paragraphs.len());
        Ok(paragraphs)
    }
}

impl Default for DocxReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file(DOCUMENT_PART, FileOptions::default()).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn paragraphs_are_joined_in_order() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Study </w:t></w:r><w:r><w:t>design</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>AE &amp; SAE rates</w:t></w:r></w:p>",
        );
        let text = DocxReader::new().extract_text("csr.docx", &bytes).unwrap();
        assert_eq!(text, "Study design\n\nAE & SAE rates\n");
    }

    #[test]
    fn text_box_paragraph_keeps_outer_text() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Figure 2 </w:t></w:r>\
             <w:r><w:pict><w:txbxContent><w:p><w:r><w:t>Boxed note</w:t></w:r></w:p></w:txbxContent></w:pict></w:r>\
             <w:r><w:t>shows PFS</w:t></w:r></w:p>",
        );
        let text = DocxReader::new().extract_text("csr.docx", &bytes).unwrap();
        assert_eq!(text, "Boxed note\nFigure 2 shows PFS\n");
    }

    #[test]
    fn missing_document_part_is_rejected() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            zip.start_file("word/styles.xml", FileOptions::default()).unwrap();
            zip.write_all(b"<w:styles/>").unwrap();
            zip.finish().unwrap();
        }
        let err = DocxReader::new()
            .extract_text("styles-only.docx", &cursor.into_inner())
            .unwrap_err();
        assert!(err.to_string().contains(DOCUMENT_PART));
    }

    #[test]
    fn non_zip_bytes_are_rejected() {
        let err = DocxReader::new().extract_text("fake.docx", b"plain text").unwrap_err();
        assert!(matches!(err, CopilotError::IngestError { .. }));
    }
}
