//! 绘图前的统计计算，与绘图后端无关

/// 生存曲线上的一个阶梯点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurvivalPoint {
    pub time: f64,
    pub survival: f64,
}

/// Kaplan–Meier 乘积极限估计
///
/// `events[i]` 为 true 表示第 i 个受试者在 `durations[i]` 发生事件，否则为删失。
/// 返回从 (0, 1) 开始的阶梯点，最后一点延伸到最大随访时间。
pub fn kaplan_meier(durations: &[f64], events: &[bool]) -> Vec<SurvivalPoint> {
    let mut subjects: Vec<(f64, bool)> = durations
        .iter()
        .copied()
        .zip(events.iter().copied())
        .filter(|(t, _)| t.is_finite())
        .collect();
    subjects.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut points = vec![SurvivalPoint { time: 0.0, survival: 1.0 }];
    let mut at_risk = subjects.len();
    let mut survival = 1.0;
    let mut i = 0;

    while i < subjects.len() {
        let time = subjects[i].0;
        let mut deaths = 0;
        let mut leaving = 0;
        while i < subjects.len() && subjects[i].0 == time {
            if subjects[i].1 {
                deaths += 1;
            }
            leaving += 1;
            i += 1;
        }
        if deaths > 0 && at_risk > 0 {
            survival *= 1.0 - deaths as f64 / at_risk as f64;
            points.push(SurvivalPoint { time, survival });
        }
        at_risk -= leaving;
    }

    if let Some(&(last_time, _)) = subjects.last() {
        if points.last().is_some_and(|p| p.time < last_time) {
            points.push(SurvivalPoint { time: last_time, survival });
        }
    }
    points
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// 等宽分箱，最后一个箱包含右端点
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }

    let mut min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        min -= 0.5;
        max += 0.5;
    }
    let width = (max - min) / bins as f64;

    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            start: min + width * i as f64,
            end: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for v in finite {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

/// 线性插值分位数，`sorted` 必须已升序
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxSummary {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    /// 1.5 倍四分位距以内的最小值
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: Vec<f64>,
}

pub fn box_summary(values: &[f64]) -> Option<BoxSummary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let q1 = quantile(&sorted, 0.25);
    let median = quantile(&sorted, 0.5);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let (lo_fence, hi_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

    let inside: Vec<f64> = sorted
        .iter()
        .copied()
        .filter(|v| *v >= lo_fence && *v <= hi_fence)
        .collect();
    let outliers = sorted
        .iter()
        .copied()
        .filter(|v| *v < lo_fence || *v > hi_fence)
        .collect();

    Some(BoxSummary {
        q1,
        median,
        q3,
        whisker_low: inside.first().copied().unwrap_or(q1),
        whisker_high: inside.last().copied().unwrap_or(q3),
        outliers,
    })
}

/// 高斯核密度估计，带宽按 Scott 规则
pub fn gaussian_kde(values: &[f64], at: &[f64]) -> Vec<f64> {
    let data: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = data.len();
    if n == 0 {
        return vec![0.0; at.len()];
    }

    let mean = data.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    // 常数数据没有离散度，退回单位带宽
    let bandwidth = if std > 0.0 {
        std * (n as f64).powf(-0.2)
    } else {
        1.0
    };

    let norm = 1.0 / (n as f64 * bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    at.iter()
        .map(|x| {
            data.iter()
                .map(|v| (-0.5 * ((x - v) / bandwidth).powi(2)).exp())
                .sum::<f64>()
                * norm
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaterfallStep {
    pub label: String,
    pub value: f64,
    /// 柱子起点
    pub base: f64,
    /// 累计值，即柱子终点
    pub cumulative: f64,
}

/// 按值降序排列并累加
pub fn waterfall_steps(items: &[(String, f64)]) -> Vec<WaterfallStep> {
    let mut sorted: Vec<&(String, f64)> = items.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut running = 0.0;
    sorted
        .into_iter()
        .map(|(label, value)| {
            let base = running;
            running += value;
            WaterfallStep {
                label: label.clone(),
                value: *value,
                base,
                cumulative: running,
            }
        })
        .collect()
}

/// 透视表：行标签 × 列标签 → 值
#[derive(Debug, Clone, PartialEq)]
pub struct Pivot {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl Pivot {
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.cells
            .iter()
            .flatten()
            .flatten()
            .fold(None, |acc, v| match acc {
                None => Some((*v, *v)),
                Some((lo, hi)) => Some((lo.min(*v), hi.max(*v))),
            })
    }
}

/// 标签按首次出现顺序排列，同一格出现两次视为错误
pub fn pivot(records: &[(String, String, f64)]) -> Result<Pivot, String> {
    let mut rows: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    for (r, c, _) in records {
        if !rows.contains(r) {
            rows.push(r.clone());
        }
        if !columns.contains(c) {
            columns.push(c.clone());
        }
    }

    let mut cells = vec![vec![None; columns.len()]; rows.len()];
    for (r, c, v) in records {
        let ri = rows.iter().position(|x| x == r).unwrap_or_default();
        let ci = columns.iter().position(|x| x == c).unwrap_or_default();
        if cells[ri][ci].is_some() {
            return Err(format!("duplicate entry for ({}, {})", r, c));
        }
        cells[ri][ci] = Some(*v);
    }

    Ok(Pivot { rows, columns, cells })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn kaplan_meier_all_events() {
        let points = kaplan_meier(&[1.0, 2.0, 3.0, 4.0], &[true, true, true, true]);
        let survival: Vec<f64> = points.iter().map(|p| p.survival).collect();
        assert_eq!(points[0], SurvivalPoint { time: 0.0, survival: 1.0 });
        assert!(close(survival[1], 0.75));
        assert!(close(survival[2], 0.5));
        assert!(close(survival[3], 0.25));
        assert!(close(survival[4], 0.0));
    }

    #[test]
    fn kaplan_meier_with_censoring() {
        // 时间 2 处删失一例，之后风险集减少
        let points = kaplan_meier(&[1.0, 2.0, 3.0, 5.0], &[true, false, true, false]);
        assert_eq!(points.len(), 4);
        assert!(close(points[1].survival, 0.75));
        assert!(close(points[2].survival, 0.75 * 0.5));
        assert_eq!(points[3].time, 5.0);
        assert!(close(points[3].survival, 0.375));
    }

    #[test]
    fn histogram_ten_bins() {
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let bins = histogram(&values, 10);
        assert_eq!(bins.len(), 10);
        assert!(bins.iter().all(|b| b.count == 1));
        assert!(close(bins[9].end, 9.0));

        let constant = histogram(&[5.0, 5.0], 10);
        assert_eq!(constant.iter().map(|b| b.count).sum::<usize>(), 2);
    }

    #[test]
    fn box_summary_quartiles_and_outliers() {
        let summary = box_summary(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0]).unwrap();
        assert!(close(summary.median, 3.5));
        assert!(close(summary.q1, 2.25));
        assert!(close(summary.q3, 4.75));
        assert_eq!(summary.outliers, vec![100.0]);
        assert_eq!(summary.whisker_high, 5.0);
        assert!(box_summary(&[]).is_none());
    }

    #[test]
    fn kde_is_symmetric_and_peaks_at_centre() {
        let density = gaussian_kde(&[-1.0, 0.0, 1.0], &[-2.0, 0.0, 2.0]);
        assert!(close(density[0], density[2]));
        assert!(density[1] > density[0]);
    }

    #[test]
    fn waterfall_sorted_descending_with_running_total() {
        let steps = waterfall_steps(&[
            ("Pt 1".to_string(), -30.0),
            ("Pt 2".to_string(), 10.0),
            ("Pt 3".to_string(), -5.0),
        ]);
        let labels: Vec<&str> = steps.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Pt 2", "Pt 3", "Pt 1"]);
        assert_eq!(steps[1].base, 10.0);
        assert_eq!(steps[2].cumulative, -25.0);
    }

    #[test]
    fn pivot_builds_grid_and_rejects_duplicates() {
        let grid = pivot(&[
            ("G1".into(), "C1".into(), 3.0),
            ("G2".into(), "C1".into(), 1.0),
            ("G1".into(), "C2".into(), 5.0),
        ])
        .unwrap();
        assert_eq!(grid.rows, ["G1", "G2"]);
        assert_eq!(grid.columns, ["C1", "C2"]);
        assert_eq!(grid.cells[1][1], None);
        assert_eq!(grid.value_range(), Some((1.0, 5.0)));

        assert!(pivot(&[("G1".into(), "C1".into(), 1.0), ("G1".into(), "C1".into(), 2.0)]).is_err());
    }
}
