//! 基于 lopdf 的 PDF 排版：Letter 纸、1 英寸页边距、标准 14 字体
//!
//! 只做顺序流式排版：文字按词换行，表格按行分页，图表整张不跨页。

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use tracing::{debug, warn};

use super::{body_pt, heading_pt, Block, Span};
use crate::charts::RenderedChart;
use crate::config::MergedTemplate;
use crate::utils::{CopilotError, CopilotResult};

const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 72.0;
const CONTENT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;

const LEADING: f32 = 1.25;
const LIST_INDENT: f32 = 18.0;
const CELL_PADDING: f32 = 4.0;

/// 6 英寸宽，高度不超过 8 英寸
const IMAGE_WIDTH: f32 = 432.0;
const IMAGE_MAX_HEIGHT: f32 = 576.0;

const GREY: [f32; 3] = [0.5, 0.5, 0.5];
const WHITESMOKE: [f32; 3] = [0.96, 0.96, 0.96];
const BEIGE: [f32; 3] = [0.96, 0.96, 0.86];
const BLACK: [f32; 3] = [0.0, 0.0, 0.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Oblique,
    BoldOblique,
}

impl Font {
    const ALL: [Font; 4] = [Font::Regular, Font::Bold, Font::Oblique, Font::BoldOblique];

    fn of(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => Font::Regular,
            (true, false) => Font::Bold,
            (false, true) => Font::Oblique,
            (true, true) => Font::BoldOblique,
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Oblique => "F3",
            Font::BoldOblique => "F4",
        }
    }

    fn base_font(&self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
            Font::Oblique => "Helvetica-Oblique",
            Font::BoldOblique => "Helvetica-BoldOblique",
        }
    }

    fn is_bold(&self) -> bool {
        matches!(self, Font::Bold | Font::BoldOblique)
    }
}

/// Helvetica 字宽（千分之一 em），覆盖 ASCII 32..=126
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

fn char_width(c: char, font: Font) -> f32 {
    let base = match c as u32 {
        code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize],
        _ => 556,
    } as f32;
    // 粗体字宽近似放大
    if font.is_bold() {
        base * 1.06
    } else {
        base
    }
}

fn text_width(text: &str, font: Font, size: f32) -> f32 {
    text.chars().map(|c| char_width(c, font)).sum::<f32>() * size / 1000.0
}

/// Unicode → WinAnsiEncoding，无法表示的字符替换为 '?'
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '…' => 0x85,
            '€' => 0x80,
            '™' => 0x99,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}

/// 排好的一行：若干同字体片段
#[derive(Debug, Clone, Default)]
struct Line {
    pieces: Vec<(Font, String)>,
    width: f32,
}

impl Line {
    fn push(&mut self, font: Font, text: &str, width: f32) {
        match self.pieces.last_mut() {
            Some((last, piece)) if *last == font => piece.push_str(text),
            _ => self.pieces.push((font, text.to_string())),
        }
        self.width += width;
    }
}

/// 按词换行，超长单词单独占一行
fn wrap(spans: &[Span], size: f32, max_width: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut line = Line::default();

    for span in spans {
        let font = Font::of(span.bold, span.italic);
        for (i, segment) in span.text.split('\n').enumerate() {
            if i > 0 {
                lines.push(std::mem::take(&mut line));
            }
            for word in segment.split_whitespace() {
                let word_width = text_width(word, font, size);
                let space = if line.pieces.is_empty() {
                    0.0
                } else {
                    text_width(" ", font, size)
                };
                if !line.pieces.is_empty() && line.width + space + word_width > max_width {
                    lines.push(std::mem::take(&mut line));
                    line.push(font, word, word_width);
                } else {
                    if space > 0.0 {
                        line.push(font, " ", space);
                    }
                    line.push(font, word, word_width);
                }
            }
        }
    }
    if !line.pieces.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

struct PageImage {
    name: String,
    id: ObjectId,
}

/// 页面流式排版状态
struct Layout<'a> {
    doc: &'a mut Document,
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    images: Vec<PageImage>,
    y: f32,
    /// 正文字号
    body: f32,
    /// 一至三级标题字号
    headings: [f32; 3],
}

impl<'a> Layout<'a> {
    fn new(doc: &'a mut Document, merged: &MergedTemplate) -> Self {
        Self {
            doc,
            pages: Vec::new(),
            ops: Vec::new(),
            images: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
            body: body_pt(merged) as f32,
            headings: [1, 2, 3].map(|level| heading_pt(merged, level) as f32),
        }
    }

    fn new_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.pages.push(ops);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn at_page_top(&self) -> bool {
        self.y >= PAGE_HEIGHT - MARGIN
    }

    /// 剩余空间不足时换页
    fn ensure(&mut self, height: f32) {
        if self.y - height < MARGIN && !self.at_page_top() {
            self.new_page();
        }
    }

    fn space(&mut self, height: f32) {
        if !self.at_page_top() {
            self.y -= height;
        }
    }

    fn fill_color(&mut self, rgb: [f32; 3]) {
        self.ops.push(Operation::new(
            "rg",
            rgb.iter().map(|c| Object::Real(*c)).collect(),
        ));
    }

    fn line_text(&mut self, line: &Line, x: f32, baseline: f32, size: f32) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new("Td", vec![x.into(), baseline.into()]));
        for (font, text) in &line.pieces {
            self.ops
                .push(Operation::new("Tf", vec![font.resource().into(), size.into()]));
            self.ops.push(Operation::new(
                "Tj",
                vec![Object::String(win_ansi(text), StringFormat::Literal)],
            ));
        }
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn text_lines(&mut self, lines: &[Line], x: f32, size: f32) {
        let step = size * LEADING;
        for line in lines {
            self.ensure(step);
            self.y -= step;
            self.fill_color(BLACK);
            self.line_text(line, x, self.y + size * 0.25, size);
        }
    }

    fn heading(&mut self, level: u8, spans: &[Span]) {
        let size = self.headings[usize::from(level.clamp(1, 3)) - 1];
        let bold: Vec<Span> = spans
            .iter()
            .map(|s| Span {
                bold: true,
                ..s.clone()
            })
            .collect();
        let lines = wrap(&bold, size, CONTENT_WIDTH);
        // 标题不与下文分页
        self.ensure(size * LEADING * (lines.len() as f32) + size * 2.0 + self.body * LEADING * 2.0);
        self.space(size * 0.8);
        self.text_lines(&lines, MARGIN, size);
        self.y -= size * 0.4;
    }

    fn paragraph(&mut self, spans: &[Span]) {
        let lines = wrap(spans, self.body, CONTENT_WIDTH);
        self.text_lines(&lines, MARGIN, self.body);
        self.space(self.body * 0.6);
    }

    fn list(&mut self, ordered: bool, items: &[Vec<Span>]) {
        for (i, item) in items.iter().enumerate() {
            let marker = if ordered {
                format!("{}.", i + 1)
            } else {
                "•".to_string()
            };
            let lines = wrap(item, self.body, CONTENT_WIDTH - LIST_INDENT);
            let step = self.body * LEADING;
            for (n, line) in lines.iter().enumerate() {
                self.ensure(step);
                self.y -= step;
                self.fill_color(BLACK);
                let baseline = self.y + self.body * 0.25;
                if n == 0 {
                    let mut marker_line = Line::default();
                    marker_line.push(Font::Regular, &marker, 0.0);
                    self.line_text(&marker_line, MARGIN + 4.0, baseline, self.body);
                }
                self.line_text(line, MARGIN + LIST_INDENT, baseline, self.body);
            }
            self.y -= self.body * 0.2;
        }
        self.space(self.body * 0.4);
    }

    fn table(&mut self, header: &[String], rows: &[Vec<String>]) {
        let columns = header
            .len()
            .max(rows.iter().map(|r| r.len()).max().unwrap_or(0));
        if columns == 0 {
            return;
        }
        let col_width = CONTENT_WIDTH / columns as f32;
        let step = self.body * LEADING;

        let mut all_rows: Vec<(bool, &[String])> = Vec::with_capacity(rows.len() + 1);
        if !header.is_empty() {
            all_rows.push((true, header));
        }
        all_rows.extend(rows.iter().map(|r| (false, r.as_slice())));

        self.space(self.body * 0.4);
        for (is_header, cells) in all_rows {
            let font_bold = is_header;
            let wrapped: Vec<Vec<Line>> = (0..columns)
                .map(|c| {
                    let text = cells.get(c).map(String::as_str).unwrap_or("");
                    let span = Span {
                        text: text.to_string(),
                        bold: font_bold,
                        italic: false,
                    };
                    wrap(&[span], self.body, col_width - 2.0 * CELL_PADDING)
                })
                .collect();
            let line_count = wrapped.iter().map(Vec::len).max().unwrap_or(1);
            let row_height = line_count as f32 * step + 2.0 * CELL_PADDING;

            self.ensure(row_height);
            let top = self.y;
            let bottom = top - row_height;

            // 背景
            self.fill_color(if is_header { GREY } else { BEIGE });
            self.ops.push(Operation::new(
                "re",
                vec![MARGIN.into(), bottom.into(), CONTENT_WIDTH.into(), row_height.into()],
            ));
            self.ops.push(Operation::new("f", vec![]));

            // 文字居中
            for (c, lines) in wrapped.iter().enumerate() {
                let cell_left = MARGIN + c as f32 * col_width;
                for (n, line) in lines.iter().enumerate() {
                    let baseline = top - CELL_PADDING - (n as f32 + 1.0) * step + self.body * 0.25;
                    let x = cell_left + (col_width - line.width).max(0.0) / 2.0;
                    self.fill_color(if is_header { WHITESMOKE } else { BLACK });
                    self.line_text(line, x, baseline, self.body);
                }
            }

            // 网格
            self.ops.push(Operation::new("RG", vec![0.into(), 0.into(), 0.into()]));
            self.ops.push(Operation::new("w", vec![Object::Real(0.5)]));
            self.ops.push(Operation::new(
                "re",
                vec![MARGIN.into(), bottom.into(), CONTENT_WIDTH.into(), row_height.into()],
            ));
            self.ops.push(Operation::new("S", vec![]));
            for c in 1..columns {
                let x = MARGIN + c as f32 * col_width;
                self.ops.push(Operation::new("m", vec![x.into(), bottom.into()]));
                self.ops.push(Operation::new("l", vec![x.into(), top.into()]));
                self.ops.push(Operation::new("S", vec![]));
            }

            self.y = bottom;
        }
        self.space(self.body * 0.8);
    }

    fn chart(&mut self, chart: &RenderedChart) -> CopilotResult<()> {
        let decoded = image::load_from_memory(&chart.png).map_err(|e| {
            CopilotError::AssemblyError(format!("图表 '{}' 图像解码失败: {}", chart.title, e))
        })?;
        let rgb = decoded.to_rgb8();
        let (px_w, px_h) = rgb.dimensions();
        if px_w == 0 || px_h == 0 {
            return Err(CopilotError::AssemblyError(format!("图表 '{}' 图像为空", chart.title)));
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(rgb.as_raw())?;
        let compressed = encoder.finish()?;

        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_w as i64,
                "Height" => px_h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            compressed,
        )
        .with_compression(false));
        let name = format!("Im{}", self.images.len() + 1);
        self.images.push(PageImage {
            name: name.clone(),
            id: image_id,
        });

        let aspect = px_h as f32 / px_w as f32;
        let mut width = IMAGE_WIDTH;
        let mut height = width * aspect;
        if height > IMAGE_MAX_HEIGHT {
            height = IMAGE_MAX_HEIGHT;
            width = height / aspect;
        }

        self.ensure(height + 12.0 + self.body * LEADING * 2.0);
        self.space(12.0);
        let x = MARGIN + (CONTENT_WIDTH - width) / 2.0;
        self.y -= height;
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new(
            "cm",
            vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), self.y.into()],
        ));
        self.ops.push(Operation::new("Do", vec![name.as_str().into()]));
        self.ops.push(Operation::new("Q", vec![]));
        self.y -= 12.0;

        let title = wrap(&[Span { text: chart.title.clone(), bold: true, italic: false }], self.body, CONTENT_WIDTH);
        self.text_lines(&title, MARGIN, self.body);
        self.space(12.0);
        Ok(())
    }

    fn finish(mut self) -> (Vec<Vec<Operation>>, Vec<PageImage>) {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.new_page();
        }
        (self.pages, self.images)
    }
}

/// 字号取自模板字体表，与 Word 输出一致
pub fn write_pdf(
    blocks: &[Block],
    charts: &[RenderedChart],
    merged: &MergedTemplate,
) -> CopilotResult<Vec<u8>> {
    let pdf_err = |e: lopdf::Error| CopilotError::AssemblyError(format!("PDF生成失败: {}", e));

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut layout = Layout::new(&mut doc, merged);
    for block in blocks {
        match block {
            Block::Heading { level, spans } => layout.heading(*level, spans),
            Block::Paragraph(spans) => layout.paragraph(spans),
            Block::List { ordered, items } => layout.list(*ordered, items),
            Block::Table { header, rows } => layout.table(header, rows),
        }
    }

    if !charts.is_empty() {
        layout.heading(2, &[Span::plain("Visualizations")]);
        for chart in charts {
            if let Err(e) = layout.chart(chart) {
                warn!("跳过图表: {}", e);
            }
        }
    }
    let (pages, images) = layout.finish();

    let mut fonts = Dictionary::new();
    for font in Font::ALL {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => font.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(font.resource(), font_id);
    }
    let mut xobjects = Dictionary::new();
    for image in &images {
        xobjects.set(image.name.as_str(), image.id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => fonts,
        "XObject" => xobjects,
    });

    let mut kids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().map_err(pdf_err)?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let page_count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(PAGE_WIDTH),
                Object::Real(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| CopilotError::AssemblyError(format!("PDF写出失败: {}", e)))?;
    debug!("PDF {} 页, {} 字节", page_count, bytes.len());
    Ok(bytes)
}
