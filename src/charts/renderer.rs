use image::{DynamicImage, ImageFormat, RgbImage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::io::Cursor;
use tracing::{debug, error, info};

use super::stats::{box_summary, gaussian_kde, histogram, kaplan_meier, pivot, waterfall_steps};
use super::{ChartKind, ChartSpec};
use crate::utils::{CopilotError, CopilotResult};

/// 10 x 6 英寸，100 dpi
pub const CHART_WIDTH: u32 = 1000;
pub const CHART_HEIGHT: u32 = 600;

const HISTOGRAM_BINS: usize = 10;

type Area<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type DrawResult = Result<(), Box<dyn std::error::Error>>;

/// 一张绘制完成的图表（PNG 字节）
#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub title: String,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// 单个图表的绘制结果，失败时保留原始规格供排查
#[derive(Debug, Clone)]
pub enum ChartRender {
    Rendered(RenderedChart),
    Failed {
        title: String,
        message: String,
        spec_json: String,
    },
}

impl ChartRender {
    pub fn rendered(&self) -> Option<&RenderedChart> {
        match self {
            ChartRender::Rendered(chart) => Some(chart),
            ChartRender::Failed { .. } => None,
        }
    }
}

pub struct ChartRenderer {
    width: u32,
    height: u32,
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self {
            width: CHART_WIDTH,
            height: CHART_HEIGHT,
        }
    }

    pub fn render(&self, spec: &ChartSpec) -> CopilotResult<RenderedChart> {
        debug!("绘制图表: {} ({})", spec.title, spec.kind);
        let render_err = |message: String| CopilotError::ChartRender {
            title: spec.title.clone(),
            message,
        };

        let mut buffer = vec![255u8; (self.width * self.height * 3) as usize];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            draw(&root, spec).map_err(|e| render_err(e.to_string()))?;
            root.present().map_err(|e| render_err(e.to_string()))?;
        }

        let png = encode_png(buffer, self.width, self.height).map_err(render_err)?;
        Ok(RenderedChart {
            title: spec.title.clone(),
            png,
            width: self.width,
            height: self.height,
        })
    }

    /// 逐个绘制，单个失败不影响其他图表
    pub fn render_all(&self, specs: &[ChartSpec]) -> Vec<ChartRender> {
        let results: Vec<ChartRender> = specs
            .iter()
            .map(|spec| match self.render(spec) {
                Ok(chart) => ChartRender::Rendered(chart),
                Err(e) => {
                    error!("{}", e);
                    ChartRender::Failed {
                        title: spec.title.clone(),
                        message: e.to_string(),
                        spec_json: spec.to_pretty_json(),
                    }
                }
            })
            .collect();

        let ok = results.iter().filter(|r| r.rendered().is_some()).count();
        info!("图表绘制完成: 成功 {}/{}", ok, results.len());
        results
    }
}

impl Default for ChartRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_png(buffer: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, String> {
    let image = RgbImage::from_raw(width, height, buffer).ok_or("像素缓冲区大小不匹配")?;
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("PNG编码失败: {}", e))?;
    Ok(png)
}

fn draw(root: &Area, spec: &ChartSpec) -> DrawResult {
    root.fill(&WHITE)?;
    match spec.kind {
        ChartKind::Bar => draw_bar(root, spec),
        ChartKind::Line => draw_line(root, spec),
        ChartKind::Pie => draw_pie(root, spec),
        ChartKind::Scatter => draw_scatter(root, spec),
        ChartKind::Histogram => draw_histogram(root, spec),
        ChartKind::Survival => draw_survival(root, spec),
        ChartKind::Heatmap => draw_heatmap(root, spec),
        ChartKind::Waterfall => draw_waterfall(root, spec),
        ChartKind::Box => draw_distribution(root, spec, false),
        ChartKind::Violin => draw_distribution(root, spec, true),
    }
}

fn caption_font() -> FontDesc<'static> {
    ("sans-serif", 24).into_font()
}

fn value_label_style() -> TextStyle<'static> {
    ("sans-serif", 13)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Bottom))
}

fn series_color(index: usize) -> RGBAColor {
    Palette99::pick(index).to_rgba()
}

/// 整数不带小数，其余保留两位
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e12 {
        format!("{:.0}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// 超出该量级的坐标无法生成可靠的刻度
const MAX_AXIS_MAGNITUDE: f64 = 1e15;

type AxisRange = std::ops::Range<f64>;

fn axis(lo: f64, hi: f64) -> Result<AxisRange, String> {
    let in_bounds = |v: f64| v.is_finite() && v.abs() <= MAX_AXIS_MAGNITUDE;
    if !in_bounds(lo) || !in_bounds(hi) {
        return Err(format!("axis range {}..{} is out of bounds", lo, hi));
    }
    if hi <= lo {
        return Err(format!("axis range {}..{} is empty", lo, hi));
    }
    Ok(lo..hi)
}

/// 坐标轴范围，包含 0 并留出 10% 余量
fn padded_range(values: &[f64]) -> Result<AxisRange, String> {
    let lo = values.iter().copied().fold(0.0, f64::min);
    let hi = values.iter().copied().fold(0.0, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };
    let lo = if lo < 0.0 { lo - span * 0.1 } else { lo };
    axis(lo, hi + span * 0.1)
}

/// 不强制包含 0 的范围
fn data_range(values: &[f64]) -> Result<AxisRange, String> {
    if values.is_empty() {
        return Ok(0.0..1.0);
    }
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };
    axis(lo - span * 0.1, hi + span * 0.1)
}

/// 分类轴：第 i 个分类位于整数 i
fn category_range(n: usize) -> AxisRange {
    -0.5..n as f64 - 0.5
}

/// 刻度数足够多时，整数位置必然落在刻度上
fn category_ticks(n: usize) -> usize {
    n * 2 + 1
}

fn category_label(labels: &[String], v: f64) -> String {
    let i = v.round();
    if (v - i).abs() < 1e-6 && i >= 0.0 {
        labels.get(i as usize).cloned().unwrap_or_default()
    } else {
        String::new()
    }
}

fn x_categories(spec: &ChartSpec) -> Result<Vec<String>, String> {
    if !spec.has_column(&spec.x_label) {
        return Err(format!("X-axis label '{}' not found in data columns.", spec.x_label));
    }
    spec.label_column(&spec.x_label)
}

fn series_columns(spec: &ChartSpec) -> Result<Vec<Vec<f64>>, String> {
    spec.series.iter().map(|s| spec.numeric_column(s)).collect()
}

fn draw_bar(root: &Area, spec: &ChartSpec) -> DrawResult {
    let categories = x_categories(spec)?;
    let columns = series_columns(spec)?;
    let all: Vec<f64> = columns.iter().flatten().copied().collect();
    let n = categories.len();

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(category_range(n), padded_range(&all)?)?;

    let formatter = |v: &f64| category_label(&categories, *v);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(category_ticks(n))
        .x_label_formatter(&formatter)
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    let width = 0.8 / columns.len() as f64;
    for (j, (name, values)) in spec.series.iter().zip(&columns).enumerate() {
        let color = series_color(j);
        let left = move |i: usize| i as f64 - 0.4 + j as f64 * width;
        chart
            .draw_series(values.iter().enumerate().map(|(i, v)| {
                Rectangle::new([(left(i), 0.0), (left(i) + width, *v)], color.filled())
            }))?
            .label(name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
        chart.draw_series(values.iter().enumerate().map(|(i, v)| {
            Text::new(format_value(*v), (left(i) + width / 2.0, *v), value_label_style())
        }))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn draw_line(root: &Area, spec: &ChartSpec) -> DrawResult {
    let categories = x_categories(spec)?;
    let columns = series_columns(spec)?;
    let all: Vec<f64> = columns.iter().flatten().copied().collect();
    let n = categories.len();

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(category_range(n), data_range(&all)?)?;

    let formatter = |v: &f64| category_label(&categories, *v);
    chart
        .configure_mesh()
        .x_labels(category_ticks(n))
        .x_label_formatter(&formatter)
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    for (j, (name, values)) in spec.series.iter().zip(&columns).enumerate() {
        let color = series_color(j);
        let points: Vec<(f64, f64)> = values.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect();
        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart.draw_series(points.iter().map(|p| Circle::new(*p, 4, color.filled())))?;
        chart.draw_series(
            points
                .iter()
                .map(|(x, y)| Text::new(format!("{:.2}", y), (*x, *y), value_label_style())),
        )?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

fn draw_pie(root: &Area, spec: &ChartSpec) -> DrawResult {
    let labels = x_categories(spec)?;
    let values = spec.numeric_column(&spec.series[0])?;
    if values.iter().any(|v| *v < 0.0) {
        return Err("pie values must be non-negative".into());
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Err("pie values sum to zero".into());
    }
    if !total.is_finite() {
        return Err("pie values are too large to sum".into());
    }

    let area = root.titled(&spec.title, caption_font())?;
    let (w, h) = area.dim_in_pixel();
    let center = (w as f64 / 2.0, h as f64 / 2.0);
    let radius = w.min(h) as f64 * 0.38;
    let at = |angle: f64, r: f64| {
        (
            (center.0 + r * angle.cos()).round() as i32,
            (center.1 - r * angle.sin()).round() as i32,
        )
    };

    // 从 12 点方向开始逆时针
    let mut start = std::f64::consts::FRAC_PI_2;
    for (i, (label, value)) in labels.iter().zip(&values).enumerate() {
        let sweep = value / total * std::f64::consts::TAU;
        let steps = ((sweep.to_degrees()).ceil() as usize).max(1);
        let mut outline = vec![at(0.0, 0.0)];
        outline.extend((0..=steps).map(|k| at(start + sweep * k as f64 / steps as f64, radius)));
        area.draw(&Polygon::new(outline, series_color(i).filled()))?;

        let mid = start + sweep / 2.0;
        let percent_style = ("sans-serif", 16)
            .into_font()
            .color(&WHITE)
            .pos(Pos::new(HPos::Center, VPos::Center));
        area.draw(&Text::new(
            format!("{:.1}%", value / total * 100.0),
            at(mid, radius * 0.65),
            percent_style,
        ))?;

        let hpos = if mid.cos() >= 0.0 { HPos::Left } else { HPos::Right };
        let label_style = ("sans-serif", 16)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(hpos, VPos::Center));
        area.draw(&Text::new(label.clone(), at(mid, radius * 1.08), label_style))?;

        start += sweep;
    }
    Ok(())
}

fn draw_scatter(root: &Area, spec: &ChartSpec) -> DrawResult {
    let xs = spec.numeric_column(&spec.series[0])?;
    let ys = spec.numeric_column(&spec.series[1])?;
    let labels = x_categories(spec)?;

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(data_range(&xs)?, data_range(&ys)?)?;

    chart
        .configure_mesh()
        .x_desc(spec.series[0].as_str())
        .y_desc(spec.series[1].as_str())
        .draw()?;

    let color = series_color(0);
    chart.draw_series(xs.iter().zip(&ys).map(|(x, y)| Circle::new((*x, *y), 5, color.filled())))?;
    let annotation = ("sans-serif", 13)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Bottom));
    chart.draw_series(
        xs.iter()
            .zip(&ys)
            .zip(&labels)
            .map(|((x, y), label)| Text::new(label.clone(), (*x, *y), annotation.clone())),
    )?;
    Ok(())
}

fn draw_histogram(root: &Area, spec: &ChartSpec) -> DrawResult {
    let values = spec.numeric_column(&spec.series[0])?;
    let bins = histogram(&values, HISTOGRAM_BINS);
    let (Some(first), Some(last)) = (bins.first(), bins.last()) else {
        return Err("no finite values to bin".into());
    };
    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(0) as f64;

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(axis(first.start, last.end)?, 0.0..(max_count * 1.15).max(1.0))?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    let color = series_color(0);
    chart.draw_series(bins.iter().map(|b| {
        Rectangle::new([(b.start, 0.0), (b.end, b.count as f64)], color.filled())
    }))?;
    chart.draw_series(bins.iter().map(|b| {
        Rectangle::new([(b.start, 0.0), (b.end, b.count as f64)], BLACK.stroke_width(1))
    }))?;
    chart.draw_series(bins.iter().map(|b| {
        Text::new(
            b.count.to_string(),
            ((b.start + b.end) / 2.0, b.count as f64),
            value_label_style(),
        )
    }))?;
    Ok(())
}

fn draw_survival(root: &Area, spec: &ChartSpec) -> DrawResult {
    let durations = spec.numeric_column(&spec.series[0])?;
    let events: Vec<bool> = spec
        .numeric_column(&spec.series[1])?
        .into_iter()
        .map(|v| v != 0.0)
        .collect();

    // 第三个系列为分组，没有时整体作为 "All"
    let groups: Vec<String> = match spec.series.get(2) {
        Some(group_col) => spec.label_column(group_col)?,
        None => vec!["All".to_string(); durations.len()],
    };
    let mut group_names: Vec<String> = Vec::new();
    for g in &groups {
        if !group_names.contains(g) {
            group_names.push(g.clone());
        }
    }

    let max_time = durations.iter().copied().fold(0.0, f64::max).max(1.0);
    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(axis(0.0, max_time * 1.05)?, 0.0..1.05)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label.as_str())
        .y_desc(spec.y_label.as_str())
        .draw()?;

    for (j, name) in group_names.iter().enumerate() {
        let (d, e): (Vec<f64>, Vec<bool>) = durations
            .iter()
            .zip(&events)
            .zip(&groups)
            .filter(|(_, g)| *g == name)
            .map(|((d, e), _)| (*d, *e))
            .unzip();

        let curve = kaplan_meier(&d, &e);
        let mut path: Vec<(f64, f64)> = Vec::with_capacity(curve.len() * 2);
        for (k, point) in curve.iter().enumerate() {
            if k > 0 {
                path.push((point.time, curve[k - 1].survival));
            }
            path.push((point.time, point.survival));
        }

        let color = series_color(j);
        chart
            .draw_series(LineSeries::new(path, color.stroke_width(2)))?
            .label(name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// YlOrRd 色带，t ∈ [0, 1]
fn yl_or_rd(t: f64) -> RGBColor {
    const STOPS: [(u8, u8, u8); 9] = [
        (255, 255, 204),
        (255, 237, 160),
        (254, 217, 118),
        (254, 178, 76),
        (253, 141, 60),
        (252, 78, 42),
        (227, 26, 28),
        (189, 0, 38),
        (128, 0, 38),
    ];
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let pos = t * (STOPS.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(STOPS.len() - 1);
    let f = pos - lo as f64;
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    RGBColor(
        mix(STOPS[lo].0, STOPS[hi].0),
        mix(STOPS[lo].1, STOPS[hi].1),
        mix(STOPS[lo].2, STOPS[hi].2),
    )
}

fn draw_heatmap(root: &Area, spec: &ChartSpec) -> DrawResult {
    let row_labels = spec.label_column(&spec.series[0])?;
    let col_labels = spec.label_column(&spec.series[1])?;
    let values = spec.numeric_column(&spec.series[2])?;
    let records: Vec<(String, String, f64)> = row_labels
        .into_iter()
        .zip(col_labels)
        .zip(values)
        .map(|((r, c), v)| (r, c, v))
        .collect();
    let grid = pivot(&records)?;
    let (lo, hi) = grid.value_range().unwrap_or((0.0, 1.0));
    let span = if hi > lo { hi - lo } else { 1.0 };

    let (n_cols, n_rows) = (grid.columns.len(), grid.rows.len());
    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(100)
        .build_cartesian_2d(category_range(n_cols), category_range(n_rows))?;

    // 第一行画在最上方
    let flipped_rows: Vec<String> = grid.rows.iter().rev().cloned().collect();
    let x_formatter = |v: &f64| category_label(&grid.columns, *v);
    let y_formatter = |v: &f64| category_label(&flipped_rows, *v);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(category_ticks(n_cols))
        .y_labels(category_ticks(n_rows))
        .x_label_formatter(&x_formatter)
        .y_label_formatter(&y_formatter)
        .x_desc(spec.series[1].as_str())
        .y_desc(spec.series[0].as_str())
        .draw()?;

    let cells: Vec<(f64, f64, f64)> = grid
        .cells
        .iter()
        .enumerate()
        .flat_map(|(ri, row)| {
            row.iter().enumerate().filter_map(move |(ci, v)| {
                v.map(|v| (ci as f64, (n_rows - 1 - ri) as f64, v))
            })
        })
        .collect();

    chart.draw_series(cells.iter().map(|(x, y, v)| {
        Rectangle::new(
            [(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)],
            yl_or_rd((v - lo) / span).filled(),
        )
    }))?;
    let annotation = ("sans-serif", 14)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    chart.draw_series(
        cells
            .iter()
            .map(|(x, y, v)| Text::new(format_value(*v), (*x, *y), annotation.clone())),
    )?;
    Ok(())
}

fn draw_waterfall(root: &Area, spec: &ChartSpec) -> DrawResult {
    let labels = spec.label_column(&spec.series[0])?;
    let values = spec.numeric_column(&spec.series[1])?;
    let items: Vec<(String, f64)> = labels.into_iter().zip(values).collect();
    let steps = waterfall_steps(&items);

    let ordered: Vec<String> = steps.iter().map(|s| s.label.clone()).collect();
    let bounds: Vec<f64> = steps.iter().flat_map(|s| [s.base, s.cumulative]).collect();
    let n = steps.len();

    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(80)
        .y_label_area_size(70)
        .build_cartesian_2d(category_range(n), padded_range(&bounds)?)?;

    let formatter = |v: &f64| category_label(&ordered, *v);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(category_ticks(n))
        .x_label_formatter(&formatter)
        .x_desc(spec.series[0].as_str())
        .y_desc(spec.series[1].as_str())
        .draw()?;

    let green = RGBColor(0, 128, 0);
    let red = RGBColor(255, 0, 0);
    chart.draw_series(steps.iter().enumerate().map(|(i, s)| {
        let color = if s.value >= 0.0 { green } else { red };
        let x = i as f64;
        Rectangle::new([(x - 0.4, s.base), (x + 0.4, s.cumulative)], color.filled())
    }))?;
    chart.draw_series(steps.iter().enumerate().map(|(i, s)| {
        let vpos = if s.value >= 0.0 { VPos::Bottom } else { VPos::Top };
        let style = ("sans-serif", 13)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, vpos));
        Text::new(format!("{:.1}", s.value), (i as f64, s.cumulative), style)
    }))?;
    Ok(())
}

/// 箱线图与小提琴图：第一个系列分组，第二个系列取值
fn draw_distribution(root: &Area, spec: &ChartSpec, violin: bool) -> DrawResult {
    let labels = spec.label_column(&spec.series[0])?;
    let values = spec.numeric_column(&spec.series[1])?;

    let mut categories: Vec<String> = Vec::new();
    for label in &labels {
        if !categories.contains(label) {
            categories.push(label.clone());
        }
    }
    let groups: Vec<Vec<f64>> = categories
        .iter()
        .map(|c| {
            labels
                .iter()
                .zip(&values)
                .filter(|(l, _)| *l == c)
                .map(|(_, v)| *v)
                .collect()
        })
        .collect();

    let n = categories.len();
    let mut chart = ChartBuilder::on(root)
        .caption(&spec.title, caption_font())
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(70)
        .build_cartesian_2d(category_range(n), data_range(&values)?)?;

    let formatter = |v: &f64| category_label(&categories, *v);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(category_ticks(n))
        .x_label_formatter(&formatter)
        .x_desc(spec.series[0].as_str())
        .y_desc(spec.series[1].as_str())
        .draw()?;

    for (i, group) in groups.iter().enumerate() {
        let Some(summary) = box_summary(group) else {
            continue;
        };
        let x = i as f64;
        let color = series_color(i);

        if violin {
            let lo = group.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = group.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let pad = if hi > lo { (hi - lo) * 0.1 } else { 0.5 };
            let ys: Vec<f64> = (0..=60)
                .map(|k| lo - pad + (hi - lo + 2.0 * pad) * k as f64 / 60.0)
                .collect();
            let density = gaussian_kde(group, &ys);
            let peak = density.iter().copied().fold(0.0, f64::max);
            let scale = if peak > 0.0 { 0.4 / peak } else { 0.0 };

            let mut outline: Vec<(f64, f64)> =
                ys.iter().zip(&density).map(|(y, d)| (x - d * scale, *y)).collect();
            outline.extend(ys.iter().zip(&density).rev().map(|(y, d)| (x + d * scale, *y)));
            chart.draw_series(std::iter::once(Polygon::new(outline, color.mix(0.6).filled())))?;
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(x, summary.q1), (x, summary.q3)],
                BLACK.stroke_width(4),
            )))?;
            chart.draw_series(std::iter::once(Circle::new((x, summary.median), 4, WHITE.filled())))?;
        } else {
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - 0.3, summary.q1), (x + 0.3, summary.q3)],
                color.mix(0.7).filled(),
            )))?;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - 0.3, summary.q1), (x + 0.3, summary.q3)],
                BLACK.stroke_width(1),
            )))?;
            let lines = vec![
                vec![(x - 0.3, summary.median), (x + 0.3, summary.median)],
                vec![(x, summary.q3), (x, summary.whisker_high)],
                vec![(x, summary.q1), (x, summary.whisker_low)],
                vec![(x - 0.15, summary.whisker_high), (x + 0.15, summary.whisker_high)],
                vec![(x - 0.15, summary.whisker_low), (x + 0.15, summary.whisker_low)],
            ];
            chart.draw_series(lines.into_iter().map(|l| PathElement::new(l, BLACK.stroke_width(1))))?;
            chart.draw_series(
                summary
                    .outliers
                    .iter()
                    .map(|y| Circle::new((x, *y), 3, BLACK.stroke_width(1))),
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> ChartSpec {
        crate::charts::validate(&value).unwrap()
    }

    #[test]
    fn missing_x_label_column_names_the_chart() {
        let chart = spec(json!({
            "type": "bar",
            "title": "ORR by arm",
            "x_label": "Treatment arm",
            "y_label": "ORR (%)",
            "data_series": ["ORR"],
            "data": [{"Arm": "A", "ORR": "45%"}, {"Arm": "B", "ORR": "12%"}]
        }));
        let err = ChartRenderer::new().render(&chart).unwrap_err();
        match err {
            CopilotError::ChartRender { title, message } => {
                assert_eq!(title, "ORR by arm");
                assert_eq!(message, "X-axis label 'Treatment arm' not found in data columns.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_numeric_values_fail_without_aborting_siblings() {
        let bad = spec(json!({
            "type": "histogram",
            "title": "Age distribution",
            "x_label": "Age",
            "y_label": "Count",
            "data_series": ["Age"],
            "data": [{"Age": "unknown"}]
        }));
        let duplicate = spec(json!({
            "type": "heatmap",
            "title": "Grade by cycle",
            "x_label": "Cycle",
            "y_label": "Grade",
            "data_series": ["Grade", "Cycle", "n"],
            "data": [
                {"Grade": "1", "Cycle": "C1", "n": 3},
                {"Grade": "1", "Cycle": "C1", "n": 4}
            ]
        }));

        let results = ChartRenderer::new().render_all(&[bad, duplicate]);
        assert_eq!(results.len(), 2);
        for (result, title) in results.iter().zip(["Age distribution", "Grade by cycle"]) {
            match result {
                ChartRender::Failed { title: t, spec_json, .. } => {
                    assert_eq!(t, title);
                    assert!(spec_json.contains("\"data_series\""));
                }
                ChartRender::Rendered(_) => panic!("expected failure for {title}"),
            }
        }
    }

    #[test]
    fn colour_ramp_endpoints() {
        assert_eq!(yl_or_rd(0.0), RGBColor(255, 255, 204));
        assert_eq!(yl_or_rd(1.0), RGBColor(128, 0, 38));
        assert_eq!(yl_or_rd(f64::NAN), RGBColor(255, 255, 204));
    }

    #[test]
    fn category_labels_only_on_integer_ticks() {
        let labels = vec!["A".to_string(), "B".to_string()];
        assert_eq!(category_label(&labels, 1.0), "B");
        assert_eq!(category_label(&labels, 0.5), "");
        assert_eq!(category_label(&labels, 5.0), "");
    }

    #[test]
    fn padded_range_includes_zero() {
        let r = padded_range(&[5.0, 10.0]).unwrap();
        assert_eq!(r.start, 0.0);
        assert!(r.end > 10.0);
        let r = padded_range(&[-4.0, 2.0]).unwrap();
        assert!(r.start < -4.0);
    }

    #[test]
    fn axis_ranges_reject_unplottable_bounds() {
        assert!(padded_range(&[f64::INFINITY]).is_err());
        assert!(data_range(&[1.0, f64::NAN]).is_err());
        assert!(padded_range(&[1e300]).is_err());
        assert!(data_range(&[f64::MAX, -f64::MAX]).is_err());
        assert!(axis(2.0, 2.0).is_err());
        assert_eq!(data_range(&[]).unwrap(), 0.0..1.0);
    }

    fn assert_png(chart: &RenderedChart) {
        assert!(chart.png.starts_with(b"\x89PNG"), "{} is not a PNG", chart.title);
        let decoded = image::load_from_memory(&chart.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (CHART_WIDTH, CHART_HEIGHT));
    }

    fn chart_of(kind: &str, series: serde_json::Value, data: serde_json::Value) -> ChartSpec {
        spec(json!({
            "type": kind,
            "title": format!("{} chart", kind),
            "x_label": "Arm",
            "y_label": "Value",
            "data_series": series,
            "data": data
        }))
    }

    #[test]
    fn bar_pie_and_scatter_render_to_png() {
        let renderer = ChartRenderer::new();
        let charts = [
            chart_of(
                "bar",
                json!(["ORR", "DCR"]),
                json!([
                    {"Arm": "Treatment", "ORR": "45%", "DCR": 70},
                    {"Arm": "Control", "ORR": "12%", "DCR": 40}
                ]),
            ),
            chart_of(
                "pie",
                json!(["Patients"]),
                json!([
                    {"Arm": "CR", "Patients": 4},
                    {"Arm": "PR", "Patients": 11},
                    {"Arm": "SD", "Patients": 9}
                ]),
            ),
            chart_of(
                "scatter",
                json!(["Dose", "AUC"]),
                json!([
                    {"Arm": "P1", "Dose": 10, "AUC": 120.5},
                    {"Arm": "P2", "Dose": 20, "AUC": 250.1},
                    {"Arm": "P3", "Dose": 40, "AUC": 470.8}
                ]),
            ),
        ];
        for chart in &charts {
            let rendered = renderer.render(chart).unwrap();
            assert_eq!(rendered.title, chart.title);
            assert_png(&rendered);
        }
    }

    #[test]
    fn remaining_kinds_render_to_png() {
        let renderer = ChartRenderer::new();
        let charts = [
            chart_of(
                "line",
                json!(["Mean change"]),
                json!([
                    {"Arm": "Week 0", "Mean change": 0},
                    {"Arm": "Week 4", "Mean change": -2.5},
                    {"Arm": "Week 8", "Mean change": -4.1}
                ]),
            ),
            chart_of(
                "histogram",
                json!(["Age"]),
                json!([{"Age": 34}, {"Age": 51}, {"Age": 58}, {"Age": 62}, {"Age": 67}, {"Age": 71}]),
            ),
            chart_of(
                "survival",
                json!(["Months", "Event", "Group"]),
                json!([
                    {"Months": 3, "Event": 1, "Group": "A"},
                    {"Months": 8, "Event": 0, "Group": "A"},
                    {"Months": 12, "Event": 1, "Group": "A"},
                    {"Months": 2, "Event": 1, "Group": "B"},
                    {"Months": 5, "Event": 1, "Group": "B"},
                    {"Months": 9, "Event": 0, "Group": "B"}
                ]),
            ),
            chart_of(
                "heatmap",
                json!(["Grade", "Cycle", "n"]),
                json!([
                    {"Grade": "1", "Cycle": "C1", "n": 3},
                    {"Grade": "1", "Cycle": "C2", "n": 5},
                    {"Grade": "2", "Cycle": "C1", "n": 1},
                    {"Grade": "2", "Cycle": "C2", "n": 2}
                ]),
            ),
            chart_of(
                "waterfall",
                json!(["Patient", "Change"]),
                json!([
                    {"Patient": "001", "Change": -45},
                    {"Patient": "002", "Change": 12},
                    {"Patient": "003", "Change": -30}
                ]),
            ),
            chart_of(
                "box",
                json!(["Arm", "Cmax"]),
                json!([
                    {"Arm": "A", "Cmax": 10.2}, {"Arm": "A", "Cmax": 12.8}, {"Arm": "A", "Cmax": 9.7},
                    {"Arm": "B", "Cmax": 15.1}, {"Arm": "B", "Cmax": 17.4}, {"Arm": "B", "Cmax": 14.0}
                ]),
            ),
            chart_of(
                "violin",
                json!(["Arm", "Cmax"]),
                json!([
                    {"Arm": "A", "Cmax": 10.2}, {"Arm": "A", "Cmax": 12.8}, {"Arm": "A", "Cmax": 9.7},
                    {"Arm": "B", "Cmax": 15.1}, {"Arm": "B", "Cmax": 17.4}, {"Arm": "B", "Cmax": 14.0}
                ]),
            ),
        ];
        for chart in &charts {
            match renderer.render(chart) {
                Ok(rendered) => assert_png(&rendered),
                Err(e) => panic!("{} failed: {}", chart.kind, e),
            }
        }
    }

    #[test]
    fn non_finite_and_oversized_values_fail_fast() {
        let infinite = chart_of(
            "bar",
            json!(["ORR"]),
            json!([{"Arm": "A", "ORR": "inf"}, {"Arm": "B", "ORR": 12}]),
        );
        let oversized = chart_of(
            "line",
            json!(["ORR"]),
            json!([{"Arm": "A", "ORR": "1e300"}, {"Arm": "B", "ORR": 12}]),
        );
        let overflowing = chart_of(
            "survival",
            json!(["Months", "Event"]),
            json!([{"Months": 1.7e308, "Event": 1}, {"Months": 2, "Event": 0}]),
        );
        let fine = chart_of(
            "bar",
            json!(["ORR"]),
            json!([{"Arm": "A", "ORR": 45}, {"Arm": "B", "ORR": 12}]),
        );

        let results = ChartRenderer::new().render_all(&[infinite, oversized, overflowing, fine]);
        assert_eq!(results.len(), 4);
        match &results[0] {
            ChartRender::Failed { message, .. } => assert!(message.contains("not numeric"), "{}", message),
            ChartRender::Rendered(_) => panic!("infinite value rendered"),
        }
        for result in &results[1..3] {
            match result {
                ChartRender::Failed { message, .. } => assert!(message.contains("out of bounds"), "{}", message),
                ChartRender::Rendered(chart) => panic!("{} rendered", chart.title),
            }
        }
        assert_png(results[3].rendered().unwrap());
    }
}
