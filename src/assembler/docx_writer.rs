use docx_rs::{
    Docx, Paragraph, Pic, Run, Shading, Style, StyleType, Table, TableCell, TableRow,
};
use std::io::Cursor;
use tracing::{debug, warn};

use super::{body_pt, heading_pt, Block, Span};
use crate::charts::RenderedChart;
use crate::config::MergedTemplate;
use crate::utils::{CopilotError, CopilotResult};

/// 图片宽 6 英寸（EMU）
const PICTURE_WIDTH_EMU: u32 = 6 * 914_400;
const FIRST_COLUMN_FILL: &str = "D9EAD3";

/// docx 的字号单位为半磅
fn half_points(pt: u32) -> usize {
    (pt * 2) as usize
}

fn heading_style_id(level: u8) -> String {
    format!("Heading{}", level.clamp(1, 3))
}

fn span_run(span: &Span, size: usize) -> Run {
    let mut run = Run::new().add_text(span.text.as_str()).size(size);
    if span.bold {
        run = run.bold();
    }
    if span.italic {
        run = run.italic();
    }
    run
}

fn spans_paragraph(spans: &[Span], size: usize) -> Paragraph {
    marked_paragraph(None, spans, size)
}

/// 列表符号作为首个 run
fn marked_paragraph(marker: Option<&str>, spans: &[Span], size: usize) -> Paragraph {
    let start = match marker {
        Some(marker) => Paragraph::new().add_run(Run::new().add_text(marker).size(size)),
        None => Paragraph::new(),
    };
    spans.iter().fold(start, |p, span| p.add_run(span_run(span, size)))
}

fn table(header: &[String], rows: &[Vec<String>], size: usize) -> Table {
    let cell = |text: &str, column: usize, bold: bool| {
        let mut run = Run::new().add_text(text).size(size);
        if bold {
            run = run.bold();
        }
        let cell = TableCell::new().add_paragraph(Paragraph::new().add_run(run));
        if column == 0 {
            cell.shading(Shading::new().fill(FIRST_COLUMN_FILL))
        } else {
            cell
        }
    };

    let mut table_rows = Vec::with_capacity(rows.len() + 1);
    if !header.is_empty() {
        table_rows.push(TableRow::new(
            header.iter().enumerate().map(|(i, h)| cell(h, i, true)).collect(),
        ));
    }
    for row in rows {
        table_rows.push(TableRow::new(
            row.iter().enumerate().map(|(i, v)| cell(v, i, false)).collect(),
        ));
    }
    Table::new(table_rows)
}

/// 按宽 6 英寸等比缩放
fn picture(chart: &RenderedChart) -> Pic {
    let height = if chart.width == 0 {
        PICTURE_WIDTH_EMU / 2
    } else {
        (PICTURE_WIDTH_EMU as u64 * chart.height as u64 / chart.width as u64) as u32
    };
    Pic::new(&chart.png).size(PICTURE_WIDTH_EMU, height)
}

pub fn write_docx(blocks: &[Block], charts: &[RenderedChart], merged: &MergedTemplate) -> CopilotResult<Vec<u8>> {
    let body = half_points(body_pt(merged));

    let mut docx = Docx::new().default_size(body);
    for level in 1..=3u8 {
        docx = docx.add_style(
            Style::new(heading_style_id(level), StyleType::Paragraph)
                .name(format!("Heading {}", level))
                .size(half_points(heading_pt(merged, level)))
                .bold(),
        );
    }

    for block in blocks {
        docx = match block {
            Block::Heading { level, spans } => {
                let size = half_points(heading_pt(merged, *level));
                docx.add_paragraph(spans_paragraph(spans, size).style(&heading_style_id(*level)))
            }
            Block::Paragraph(spans) => docx.add_paragraph(spans_paragraph(spans, body)),
            Block::List { ordered, items } => {
                items.iter().enumerate().fold(docx, |d, (i, item)| {
                    let marker = if *ordered {
                        format!("{}. ", i + 1)
                    } else {
                        "• ".to_string()
                    };
                    d.add_paragraph(marked_paragraph(Some(&marker), item, body))
                })
            }
            Block::Table { header, rows } => docx.add_table(table(header, rows, body)),
        };
    }

    if !charts.is_empty() {
        docx = docx.add_paragraph(
            Paragraph::new()
                .add_run(Run::new().add_text("Visualizations").size(half_points(heading_pt(merged, 2))))
                .style(&heading_style_id(2)),
        );
        for chart in charts {
            if chart.png.is_empty() {
                warn!("图表 '{}' 没有图像数据，跳过", chart.title);
                continue;
            }
            docx = docx
                .add_paragraph(Paragraph::new().add_run(Run::new().add_image(picture(chart))))
                .add_paragraph(
                    Paragraph::new().add_run(Run::new().add_text(chart.title.as_str()).size(body).bold()),
                );
        }
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|e| CopilotError::AssemblyError(format!("Word文档打包失败: {}", e)))?;
    let bytes = cursor.into_inner();
    debug!("Word文档 {} 字节", bytes.len());
    Ok(bytes)
}
