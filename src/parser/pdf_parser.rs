use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, info, warn};

use crate::utils::{CopilotError, CopilotResult};

pub struct PdfParser;

impl PdfParser {
    pub fn new() -> Self {
        Self
    }

    /// 逐页提取PDF文本层，页与页之间以换行分隔
    pub fn extract_text(&self, file_name: &str, bytes: &[u8]) -> CopilotResult<String> {
        info!("提取PDF文本: {} ({} 字节)", file_name, bytes.len());

        if bytes.is_empty() {
            return Err(CopilotError::IngestError {
                file: file_name.to_string(),
                message: "PDF文件为空".to_string(),
            });
        }

        let ingest_err = |message: String| CopilotError::IngestError {
            file: file_name.to_string(),
            message,
        };

        // pdf-extract 遇到损坏的字体或对象时会 panic 而不是返回错误
        let raw = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
            .map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!("PDF解析崩溃: {}: {}", file_name, message);
                ingest_err(format!("PDF解析失败: {}", message))
            })?
            .map_err(|e| ingest_err(e.to_string()))?;

        // pdf-extract 以换页符分隔页面
        let mut text = String::with_capacity(raw.len());
        for page in raw.split('\u{c}') {
            let page = page.trim_end();
            if page.trim().is_empty() {
                continue;
            }
            text.push_str(page);
            text.push('\n');
        }

        if text.is_empty() {
            warn!("PDF中未提取到文本内容: {}", file_name);
        } else {
            info!("提取文本长度: {} 字符", text.len());
        }

        Ok(text)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Default for PdfParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn empty_pdf_is_an_ingest_error() {
        let err = PdfParser::new().extract_text("empty.pdf", &[]).unwrap_err();
        assert!(matches!(err, CopilotError::IngestError { ref file, .. } if file == "empty.pdf"));
    }

    #[test]
    fn garbage_bytes_are_an_ingest_error() {
        let result = PdfParser::new().extract_text("broken.pdf", b"not a pdf at all");
        assert!(result.is_err());
    }

    /// 结构完整但引用了资源中不存在的字体
    pub(crate) fn pdf_with_unknown_font() -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F9".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal("Hazard ratio 0.62")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! {} },
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn missing_font_resource_is_an_ingest_error() {
        let bytes = pdf_with_unknown_font();
        let err = PdfParser::new().extract_text("csr.pdf", &bytes).unwrap_err();
        assert!(matches!(err, CopilotError::IngestError { ref file, .. } if file == "csr.pdf"));
    }

    #[test]
    fn truncated_pdf_is_an_ingest_error() {
        let bytes = pdf_with_unknown_font();
        let truncated = &bytes[..bytes.len() / 2];
        assert!(PdfParser::new().extract_text("cut.pdf", truncated).is_err());
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("bad font {}", 9)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad font 9");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
