use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{ChartKind, ChartSpec, ChartValidationError};

/// 行首恰好两个 '#' 的二级标题，标题行其余部分一并跳过
static VISUALIZATIONS_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^##[ \t]+Visualizations\b[^\n]*").expect("valid regex"));

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json\s*([\s\S]*?)```").expect("valid regex"));

/// 被丢弃的图表块
#[derive(Debug, Clone, Serialize)]
pub struct RejectedChart {
    /// 在 Visualizations 段中的序号，从 1 开始
    pub index: usize,
    pub reason: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChartExtraction {
    pub charts: Vec<ChartSpec>,
    pub rejected: Vec<RejectedChart>,
}

/// 取最后一个 "## Visualizations" 标题之后的全部文本
fn visualizations_section(text: &str) -> Option<(usize, &str)> {
    VISUALIZATIONS_HEADING
        .find_iter(text)
        .last()
        .map(|m| (m.start(), &text[m.end()..]))
}

pub fn extract_charts(text: &str) -> ChartExtraction {
    let mut extraction = ChartExtraction::default();

    let Some((_, section)) = visualizations_section(text) else {
        warn!("生成内容中未找到 Visualizations 段落");
        return extraction;
    };

    let blocks: Vec<&str> = JSON_FENCE
        .captures_iter(section)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();
    debug!("Visualizations 段落中找到 {} 个JSON块", blocks.len());

    for (i, raw) in blocks.into_iter().enumerate() {
        let index = i + 1;
        let reason = match serde_json::from_str::<Value>(raw) {
            Ok(value) => match validate(&value) {
                Ok(spec) => {
                    debug!("图表 {} 提取成功: {}", index, spec.title);
                    extraction.charts.push(spec);
                    continue;
                }
                Err(e) => {
                    warn!("图表 {} 校验失败: {}", index, e);
                    e.to_string()
                }
            },
            Err(e) => {
                warn!("图表 {} JSON解析失败: {}", index, e);
                format!("JSON解析失败: {}", e)
            }
        };
        extraction.rejected.push(RejectedChart {
            index,
            reason,
            raw: raw.to_string(),
        });
    }

    info!(
        "图表提取完成: 通过 {} 个, 丢弃 {} 个",
        extraction.charts.len(),
        extraction.rejected.len()
    );
    extraction
}

/// 去掉结尾的 Visualizations 段落，用于生成文档正文
pub fn strip_visualizations(text: &str) -> &str {
    match visualizations_section(text) {
        Some((start, _)) => text[..start].trim_end(),
        None => text,
    }
}

fn text_field(obj: &Map<String, Value>, field: &'static str) -> Result<String, ChartValidationError> {
    match obj.get(field) {
        None => Err(ChartValidationError::MissingField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(ChartValidationError::InvalidField {
            field,
            reason: format!("expected a string, found {}", other),
        }),
    }
}

/// 按图表类型校验一个JSON对象
pub fn validate(value: &Value) -> Result<ChartSpec, ChartValidationError> {
    let obj = value.as_object().ok_or(ChartValidationError::NotAnObject)?;

    for field in ["type", "title", "x_label", "y_label", "data_series", "data"] {
        if !obj.contains_key(field) {
            return Err(ChartValidationError::MissingField(field));
        }
    }

    let series: Vec<String> = match &obj["data_series"] {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or(ChartValidationError::InvalidField {
                field: "data_series",
                reason: "must be a list of strings".to_string(),
            })?,
        _ => {
            return Err(ChartValidationError::InvalidField {
                field: "data_series",
                reason: "must be a list of strings".to_string(),
            })
        }
    };

    let rows: Vec<Map<String, Value>> = match &obj["data"] {
        Value::Array(items) if items.is_empty() => return Err(ChartValidationError::EmptyData),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object()
                    .cloned()
                    .ok_or(ChartValidationError::RowNotObject(i + 1))
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(ChartValidationError::InvalidField {
                field: "data",
                reason: "must be a non-empty list".to_string(),
            })
        }
    };

    let kind: ChartKind = text_field(obj, "type")?.parse()?;

    let (min, max) = kind.series_bounds();
    if series.len() < min || max.is_some_and(|max| series.len() > max) {
        return Err(ChartValidationError::series_count(kind, series.len()));
    }

    for name in &series {
        for (i, row) in rows.iter().enumerate() {
            match row.get(name) {
                None => {
                    return Err(ChartValidationError::MissingValue {
                        series: name.clone(),
                        row: i + 1,
                    })
                }
                Some(Value::Number(_)) | Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(ChartValidationError::InvalidValue {
                        series: name.clone(),
                        row: i + 1,
                    })
                }
            }
        }
    }

    Ok(ChartSpec {
        kind,
        title: text_field(obj, "title")?,
        x_label: text_field(obj, "x_label")?,
        y_label: text_field(obj, "y_label")?,
        series,
        rows,
    })
}
