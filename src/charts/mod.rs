//! 图表规格：类型、校验错误与数值转换

pub mod extractor;
pub mod renderer;
pub mod stats;

pub use extractor::{extract_charts, strip_visualizations, validate, ChartExtraction, RejectedChart};
pub use renderer::{ChartRender, ChartRenderer, RenderedChart};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 图表类型，只接受固定取值及其精确别名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
    Survival,
    Heatmap,
    Waterfall,
    Box,
    Violin,
}

const KIND_ALIASES: &[(&str, ChartKind)] = &[
    ("bar chart", ChartKind::Bar),
    ("bar graph", ChartKind::Bar),
    ("grouped bar chart", ChartKind::Bar),
    ("line chart", ChartKind::Line),
    ("line graph", ChartKind::Line),
    ("pie chart", ChartKind::Pie),
    ("scatter plot", ChartKind::Scatter),
    ("scatter chart", ChartKind::Scatter),
    ("survival curve", ChartKind::Survival),
    ("kaplan-meier", ChartKind::Survival),
    ("kaplan-meier curve", ChartKind::Survival),
    ("kaplan meier curve", ChartKind::Survival),
    ("heat map", ChartKind::Heatmap),
    ("waterfall chart", ChartKind::Waterfall),
    ("waterfall plot", ChartKind::Waterfall),
    ("box plot", ChartKind::Box),
    ("boxplot", ChartKind::Box),
    ("violin plot", ChartKind::Violin),
];

impl ChartKind {
    pub const ALL: &'static [ChartKind] = &[
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Histogram,
        ChartKind::Survival,
        ChartKind::Heatmap,
        ChartKind::Waterfall,
        ChartKind::Box,
        ChartKind::Violin,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Histogram => "histogram",
            ChartKind::Survival => "survival",
            ChartKind::Heatmap => "heatmap",
            ChartKind::Waterfall => "waterfall",
            ChartKind::Box => "box",
            ChartKind::Violin => "violin",
        }
    }

    /// 允许的数据系列个数 (最少, 最多)
    pub fn series_bounds(&self) -> (usize, Option<usize>) {
        match self {
            ChartKind::Pie | ChartKind::Histogram => (1, Some(1)),
            ChartKind::Scatter => (2, Some(2)),
            ChartKind::Heatmap => (3, None),
            ChartKind::Survival | ChartKind::Waterfall | ChartKind::Box | ChartKind::Violin => {
                (2, None)
            }
            ChartKind::Bar | ChartKind::Line => (1, None),
        }
    }

    fn describe_bounds(&self) -> String {
        match self.series_bounds() {
            (min, Some(max)) if min == max => format!("exactly {}", min),
            (min, _) => format!("at least {}", min),
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ChartKind {
    type Err = ChartValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if let Some(kind) = ChartKind::ALL.iter().find(|k| k.token() == normalized) {
            return Ok(*kind);
        }
        KIND_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ChartValidationError::UnknownKind(s.to_string()))
    }
}

/// 图表规格被拒绝的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartValidationError {
    #[error("图表规格不是JSON对象")]
    NotAnObject,

    #[error("缺少必填字段 '{0}'")]
    MissingField(&'static str),

    #[error("字段 '{field}' 无效: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("不支持的图表类型 '{0}'")]
    UnknownKind(String),

    #[error("data 为空")]
    EmptyData,

    #[error("data 第 {0} 行不是对象")]
    RowNotObject(usize),

    #[error("{kind} 图需要 {expected} 个数据系列，实际 {found} 个")]
    SeriesCount {
        kind: ChartKind,
        expected: String,
        found: usize,
    },

    #[error("data 第 {row} 行缺少系列 '{series}' 的值")]
    MissingValue { series: String, row: usize },

    #[error("data 第 {row} 行系列 '{series}' 的值不是数字或字符串")]
    InvalidValue { series: String, row: usize },
}

impl ChartValidationError {
    pub(crate) fn series_count(kind: ChartKind, found: usize) -> Self {
        ChartValidationError::SeriesCount {
            kind,
            expected: kind.describe_bounds(),
            found,
        }
    }
}

/// 通过校验的图表规格，字段名与生成文本中的JSON一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    #[serde(rename = "data_series")]
    pub series: Vec<String>,
    #[serde(rename = "data")]
    pub rows: Vec<Map<String, Value>>,
}

impl ChartSpec {
    /// 指定列转为数值，"45%" 之类的字符串去掉百分号后解析
    pub fn numeric_column(&self, column: &str) -> Result<Vec<f64>, String> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.get(column)
                    .and_then(numeric_value)
                    .ok_or_else(|| format!("column '{}' row {} is not numeric", column, i + 1))
            })
            .collect()
    }

    /// 指定列作为分类标签
    pub fn label_column(&self, column: &str) -> Result<Vec<String>, String> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.get(column)
                    .map(label_value)
                    .ok_or_else(|| format!("column '{}' missing in row {}", column, i + 1))
            })
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|row| row.contains_key(column))
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<{}>", e))
    }
}

/// "inf"、"NaN"、"1e400" 之类能被解析但无法绘制的值视为非数值
pub fn numeric_value(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.replace('%', "").trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    v.filter(|v| v.is_finite())
}

pub fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_parse_from_tokens_and_exact_aliases() {
        assert_eq!("bar".parse::<ChartKind>().unwrap(), ChartKind::Bar);
        assert_eq!("Bar Chart".parse::<ChartKind>().unwrap(), ChartKind::Bar);
        assert_eq!("Kaplan-Meier Curve".parse::<ChartKind>().unwrap(), ChartKind::Survival);
        assert_eq!("  box   plot ".parse::<ChartKind>().unwrap(), ChartKind::Box);
        assert_eq!("violin".parse::<ChartKind>().unwrap(), ChartKind::Violin);
    }

    #[test]
    fn substring_matches_are_not_accepted() {
        for bad in ["stacked bar chart with error bars", "plot", "forest plot", "barplot chart"] {
            assert!(matches!(
                bad.parse::<ChartKind>(),
                Err(ChartValidationError::UnknownKind(_))
            ), "{}", bad);
        }
    }

    #[test]
    fn numeric_coercion_strips_percent() {
        assert_eq!(numeric_value(&json!(12)), Some(12.0));
        assert_eq!(numeric_value(&json!("45%")), Some(45.0));
        assert_eq!(numeric_value(&json!(" 3.5 ")), Some(3.5));
        assert_eq!(numeric_value(&json!("n/a")), None);
        assert_eq!(numeric_value(&Value::Null), None);
    }

    #[test]
    fn non_finite_strings_are_not_numeric() {
        for raw in ["inf", "-inf", "NaN", "infinity", "1e400", "-1e400%"] {
            assert_eq!(numeric_value(&json!(raw)), None, "{}", raw);
        }
        assert_eq!(numeric_value(&json!("1e300")), Some(1e300));
    }

    #[test]
    fn serialized_chart_keeps_json_field_names() {
        let spec = ChartSpec {
            kind: ChartKind::Pie,
            title: "Response".into(),
            x_label: "Category".into(),
            y_label: "Patients".into(),
            series: vec!["Patients".into()],
            rows: vec![json!({"Category": "CR", "Patients": 4}).as_object().unwrap().clone()],
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "pie");
        assert_eq!(value["data_series"][0], "Patients");
        assert_eq!(value["data"][0]["Category"], "CR");
    }
}
