//! 生成文本 → Word / PDF 文档
//!
//! Markdown 只解析一次，得到 [`Block`] 列表，再分别交给两种写出器。

pub mod docx_writer;
pub mod pdf_writer;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::charts::{strip_visualizations, RenderedChart};
use crate::config::templates::FontRole;
use crate::config::{AnalysisType, MergedTemplate, PublicationType};
use crate::utils::{CopilotError, CopilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Word,
    Pdf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Word => "docx",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Word => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Word => write!(f, "Word"),
            OutputFormat::Pdf => write!(f, "PDF"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "word" | "docx" => Ok(OutputFormat::Word),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(CopilotError::AssemblyError(format!(
                "不支持的输出格式 '{}'，可选 word 或 pdf",
                other
            ))),
        }
    }
}

/// 一段带格式的文字
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

impl Span {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }
}

/// 文档结构节点
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, spans: Vec<Span> },
    Paragraph(Vec<Span>),
    List { ordered: bool, items: Vec<Vec<Span>> },
    Table { header: Vec<String>, rows: Vec<Vec<String>> },
}

pub fn spans_text(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

pub(crate) const DEFAULT_BODY_PT: u32 = 11;

/// 正文字号（磅）
pub(crate) fn body_pt(merged: &MergedTemplate) -> u32 {
    merged.font_size(FontRole::Body).unwrap_or(DEFAULT_BODY_PT)
}

/// 标题字号按模板取，缺失时依次回退；Word 与 PDF 共用
pub(crate) fn heading_pt(merged: &MergedTemplate, level: u8) -> u32 {
    let roles: &[FontRole] = match level {
        1 => &[FontRole::Title, FontRole::Heading],
        2 => &[FontRole::Heading, FontRole::Title],
        _ => &[FontRole::Subheading, FontRole::Heading, FontRole::Title],
    };
    roles
        .iter()
        .find_map(|role| merged.font_size(*role))
        .unwrap_or(DEFAULT_BODY_PT + 3)
}

#[derive(Default)]
struct TableState {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    spans: Vec<Span>,
    bold: usize,
    italic: usize,
    heading: Option<u8>,
    lists: Vec<(bool, Vec<Vec<Span>>)>,
    table: Option<TableState>,
}

impl BlockBuilder {
    fn push_text(&mut self, text: &str) {
        let (bold, italic) = (self.bold > 0, self.italic > 0);
        match self.spans.last_mut() {
            Some(last) if last.bold == bold && last.italic == italic => last.text.push_str(text),
            _ => self.spans.push(Span {
                text: text.to_string(),
                bold,
                italic,
            }),
        }
    }

    fn take_spans(&mut self) -> Vec<Span> {
        let mut spans = std::mem::take(&mut self.spans);
        if let Some(first) = spans.first_mut() {
            first.text = first.text.trim_start().to_string();
        }
        if let Some(last) = spans.last_mut() {
            last.text = last.text.trim_end().to_string();
        }
        spans.retain(|s| !s.text.is_empty());
        spans
    }

    /// 列表项内的文字归入当前项，其余成为段落
    fn flush_paragraph(&mut self) {
        let spans = self.take_spans();
        if spans.is_empty() {
            return;
        }
        match self.lists.last_mut() {
            Some((_, items)) => items.push(spans),
            None => self.blocks.push(Block::Paragraph(spans)),
        }
    }

    fn start(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_paragraph();
                self.heading = Some(level as u8);
            }
            Tag::List(start) => {
                // 嵌套列表前先结束父项的文字
                self.flush_paragraph();
                self.lists.push((start.is_some(), Vec::new()));
            }
            Tag::Item => self.flush_paragraph(),
            Tag::Table(_) => {
                self.flush_paragraph();
                self.table = Some(TableState::default());
            }
            Tag::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.row.clear();
                }
            }
            Tag::TableCell => self.spans.clear(),
            Tag::Strong => self.bold += 1,
            Tag::Emphasis => self.italic += 1,
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                let spans = self.take_spans();
                let level = self.heading.take().unwrap_or(2);
                self.blocks.push(Block::Heading { level, spans });
            }
            TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock | TagEnd::BlockQuote => {
                self.flush_paragraph()
            }
            TagEnd::List(_) => {
                self.flush_paragraph();
                if let Some((ordered, items)) = self.lists.pop() {
                    match self.lists.last_mut() {
                        Some((_, parent)) => parent.extend(items),
                        None if !items.is_empty() => self.blocks.push(Block::List { ordered, items }),
                        None => {}
                    }
                }
            }
            TagEnd::TableCell => {
                let text = spans_text(&self.take_spans());
                if let Some(table) = self.table.as_mut() {
                    table.row.push(text);
                }
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    table.header = std::mem::take(&mut table.row);
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    self.blocks.push(Block::Table {
                        header: table.header,
                        rows: table.rows,
                    });
                }
            }
            TagEnd::Strong => self.bold = self.bold.saturating_sub(1),
            TagEnd::Emphasis => self.italic = self.italic.saturating_sub(1),
            _ => {}
        }
    }
}

/// 解析 Markdown 为结构节点，代码块等其他结构按段落处理
pub fn parse_markdown(text: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::default();

    for event in Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH) {
        match event {
            Event::Start(tag) => builder.start(tag),
            Event::End(tag) => builder.end(tag),
            Event::Text(t) | Event::Code(t) => builder.push_text(&t),
            Event::SoftBreak => builder.push_text(" "),
            Event::HardBreak => builder.push_text("\n"),
            _ => {}
        }
    }
    builder.flush_paragraph();
    builder.blocks
}

/// 去掉 Visualizations 段落后生成指定格式的文档字节
pub fn assemble(
    content: &str,
    charts: &[RenderedChart],
    merged: &MergedTemplate,
    format: OutputFormat,
) -> CopilotResult<Vec<u8>> {
    let blocks = parse_markdown(strip_visualizations(content));
    info!(
        "组装{}文档: {} 个结构块, {} 张图表",
        format,
        blocks.len(),
        charts.len()
    );

    let bytes = match format {
        OutputFormat::Word => docx_writer::write_docx(&blocks, charts, merged)?,
        OutputFormat::Pdf => pdf_writer::write_pdf(&blocks, charts, merged)?,
    };
    info!("文档大小: {} 字节", bytes.len());
    Ok(bytes)
}

fn filename_part(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// 例如 "congress_abstract_safety_analysis.docx"
pub fn artifact_filename(publication: PublicationType, analysis: AnalysisType, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        filename_part(publication.name()),
        filename_part(analysis.name()),
        extension
    )
}
