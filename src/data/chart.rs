//! SVG chart rendering for query results
//!
//! Charts use the same dark palette as the web UI.

use super::{table::display_value, DataError, Table};
use serde::{Deserialize, Serialize};

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 420.0;
const MARGIN_LEFT: f64 = 72.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 44.0;
const MARGIN_BOTTOM: f64 = 88.0;
const Y_TICKS: usize = 5;
const MAX_POINTS: usize = 2000;

const BACKGROUND: &str = "#0e1117";
const FOREGROUND: &str = "#e6e6e6";
const GRID: &str = "#2b303b";
const ACCENT: &str = "#4c9be8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
}

impl ChartKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A rendered chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    pub mime_type: String,
    pub svg: String,
}

struct Point {
    label: String,
    x: Option<f64>,
    y: f64,
}

/// Render one numeric `y` column against `x` as an SVG document
pub fn render_svg(spec: &ChartSpec, table: &Table) -> Result<Chart, DataError> {
    let x_idx = table
        .column_index(&spec.x)
        .ok_or_else(|| missing_column(&spec.x, table))?;
    let y_idx = table
        .column_index(&spec.y)
        .ok_or_else(|| missing_column(&spec.y, table))?;

    let mut points = Vec::new();
    for row in table.rows.iter().take(MAX_POINTS) {
        let y = match row.get(y_idx) {
            Some(serde_json::Value::Null) | None => continue,
            Some(v) => v.as_f64().ok_or_else(|| {
                DataError::Chart(format!(
                    "column '{}' is not numeric (found {})",
                    spec.y,
                    display_value(v)
                ))
            })?,
        };
        let x_value = row.get(x_idx).cloned().unwrap_or(serde_json::Value::Null);
        points.push(Point {
            label: display_value(&x_value),
            x: x_value.as_f64(),
            y,
        });
    }

    if points.is_empty() {
        return Err(DataError::Chart("query returned no plottable rows".to_string()));
    }
    if spec.kind == ChartKind::Scatter && points.iter().any(|p| p.x.is_none()) {
        return Err(DataError::Chart(format!(
            "scatter plots need a numeric x column, '{}' is not numeric",
            spec.x
        )));
    }

    let title = spec
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| format!("{} by {}", spec.y, spec.x));

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (y_min, y_max) = padded_range(points.iter().map(|p| p.y), spec.kind == ChartKind::Bar);
    let y_pos = |v: f64| MARGIN_TOP + plot_h - (v - y_min) / (y_max - y_min) * plot_h;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="12">"#,
        w = WIDTH,
        h = HEIGHT
    );
    svg.push_str(&format!(
        r#"<rect width="100%" height="100%" fill="{}"/>"#,
        BACKGROUND
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="26" fill="{}" font-size="16" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        FOREGROUND,
        escape(&title)
    ));

    // Y axis grid and labels
    for i in 0..=Y_TICKS {
        let v = y_min + (y_max - y_min) * i as f64 / Y_TICKS as f64;
        let y = y_pos(v);
        svg.push_str(&format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_w,
            y,
            GRID
        ));
        svg.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="end">{}</text>"#,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            FOREGROUND,
            tick_label(v)
        ));
    }

    match spec.kind {
        ChartKind::Bar | ChartKind::Line => {
            let band = plot_w / points.len() as f64;
            let center = |i: usize| MARGIN_LEFT + band * (i as f64 + 0.5);

            if spec.kind == ChartKind::Bar {
                let baseline = y_pos(0.0_f64.clamp(y_min, y_max));
                for (i, p) in points.iter().enumerate() {
                    let top = y_pos(p.y);
                    svg.push_str(&format!(
                        r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"><title>{}: {}</title></rect>"#,
                        center(i) - band * 0.4,
                        top.min(baseline),
                        band * 0.8,
                        (baseline - top).abs(),
                        ACCENT,
                        escape(&p.label),
                        tick_label(p.y)
                    ));
                }
            } else {
                let path: Vec<String> = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| format!("{:.1},{:.1}", center(i), y_pos(p.y)))
                    .collect();
                svg.push_str(&format!(
                    r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
                    path.join(" "),
                    ACCENT
                ));
            }

            // Thin out category labels so they stay legible
            let step = (points.len() / 30).max(1);
            for (i, p) in points.iter().enumerate().step_by(step) {
                let x = center(i);
                let y = MARGIN_TOP + plot_h + 14.0;
                svg.push_str(&format!(
                    r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="end" transform="rotate(-40 {:.1} {:.1})">{}</text>"#,
                    x,
                    y,
                    FOREGROUND,
                    x,
                    y,
                    escape(&truncate_label(&p.label))
                ));
            }
        }
        ChartKind::Scatter => {
            let (x_min, x_max) = padded_range(points.iter().filter_map(|p| p.x), false);
            let x_pos = |v: f64| MARGIN_LEFT + (v - x_min) / (x_max - x_min) * plot_w;
            for p in &points {
                let x = p.x.unwrap_or(x_min);
                svg.push_str(&format!(
                    r#"<circle cx="{:.1}" cy="{:.1}" r="3.5" fill="{}" fill-opacity="0.8"/>"#,
                    x_pos(x),
                    y_pos(p.y),
                    ACCENT
                ));
            }
            for i in 0..=Y_TICKS {
                let v = x_min + (x_max - x_min) * i as f64 / Y_TICKS as f64;
                svg.push_str(&format!(
                    r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="middle">{}</text>"#,
                    x_pos(v),
                    MARGIN_TOP + plot_h + 18.0,
                    FOREGROUND,
                    tick_label(v)
                ));
            }
        }
    }

    // Axes and titles
    svg.push_str(&format!(
        r#"<line x1="{l:.1}" y1="{t:.1}" x2="{l:.1}" y2="{b:.1}" stroke="{c}"/><line x1="{l:.1}" y1="{b:.1}" x2="{r:.1}" y2="{b:.1}" stroke="{c}"/>"#,
        l = MARGIN_LEFT,
        t = MARGIN_TOP,
        b = MARGIN_TOP + plot_h,
        r = MARGIN_LEFT + plot_w,
        c = FOREGROUND
    ));
    svg.push_str(&format!(
        r#"<text x="{:.1}" y="{:.1}" fill="{}" text-anchor="middle">{}</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        HEIGHT - 10.0,
        FOREGROUND,
        escape(&spec.x)
    ));
    svg.push_str(&format!(
        r#"<text x="16" y="{:.1}" fill="{}" text-anchor="middle" transform="rotate(-90 16 {:.1})">{}</text>"#,
        MARGIN_TOP + plot_h / 2.0,
        FOREGROUND,
        MARGIN_TOP + plot_h / 2.0,
        escape(&spec.y)
    ));
    svg.push_str("</svg>");

    Ok(Chart {
        title,
        mime_type: "image/svg+xml".to_string(),
        svg,
    })
}

fn missing_column(name: &str, table: &Table) -> DataError {
    DataError::Chart(format!(
        "column '{}' is not in the query result (columns: {})",
        name,
        table.columns.join(", ")
    ))
}

/// Range with headroom; bar charts always include zero
fn padded_range(values: impl Iterator<Item = f64>, include_zero: bool) -> (f64, f64) {
    let (mut lo, mut hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        let pad = if hi == 0.0 { 1.0 } else { hi.abs() * 0.1 };
        return (lo - pad, hi + pad);
    }
    let pad = (hi - lo) * 0.05;
    if include_zero {
        (if lo < 0.0 { lo - pad } else { lo }, if hi > 0.0 { hi + pad } else { hi })
    } else {
        (lo - pad, hi + pad)
    }
}

fn tick_label(v: f64) -> String {
    if v.abs() >= 1e6 || (v != 0.0 && v.abs() < 1e-3) {
        format!("{:.2e}", v)
    } else if v.fract().abs() < 1e-9 {
        format!("{:.0}", v)
    } else {
        let s = format!("{:.3}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() > 18 {
        let short: String = label.chars().take(17).collect();
        format!("{}…", short)
    } else {
        label.to_string()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn means() -> Table {
        Table {
            columns: vec!["Species".to_string(), "mean".to_string()],
            rows: vec![
                vec![json!("Iris-setosa"), json!(0.244)],
                vec![json!("Iris-versicolor"), json!(1.326)],
                vec![json!("Iris-virginica"), json!(2.026)],
            ],
        }
    }

    fn spec(kind: ChartKind, x: &str, y: &str) -> ChartSpec {
        ChartSpec {
            kind,
            x: x.to_string(),
            y: y.to_string(),
            title: None,
        }
    }

    #[test]
    fn test_bar_chart() {
        let chart = render_svg(&spec(ChartKind::Bar, "Species", "mean"), &means()).unwrap();
        assert_eq!(chart.title, "mean by Species");
        assert_eq!(chart.mime_type, "image/svg+xml");
        assert!(chart.svg.starts_with("<svg"));
        assert!(chart.svg.ends_with("</svg>"));
        assert_eq!(chart.svg.matches("<title>").count(), 3);
        assert!(chart.svg.contains("Iris-versicolor"));
    }

    #[test]
    fn test_line_chart() {
        let chart = render_svg(&spec(ChartKind::Line, "Species", "mean"), &means()).unwrap();
        assert!(chart.svg.contains("<polyline"));
    }

    #[test]
    fn test_scatter_requires_numeric_x() {
        let err = render_svg(&spec(ChartKind::Scatter, "Species", "mean"), &means()).unwrap_err();
        assert!(matches!(err, DataError::Chart(_)));

        let table = Table {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![json!(1), json!(2.0)], vec![json!(3), json!(4.5)]],
        };
        let chart = render_svg(&spec(ChartKind::Scatter, "a", "b"), &table).unwrap();
        assert_eq!(chart.svg.matches("<circle").count(), 2);
    }

    #[test]
    fn test_non_numeric_y() {
        let err = render_svg(&spec(ChartKind::Bar, "mean", "Species"), &means()).unwrap_err();
        match err {
            DataError::Chart(msg) => assert!(msg.contains("not numeric")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let err = render_svg(&spec(ChartKind::Bar, "Species", "median"), &means()).unwrap_err();
        match err {
            DataError::Chart(msg) => assert!(msg.contains("median")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_title_is_escaped() {
        let mut s = spec(ChartKind::Bar, "Species", "mean");
        s.title = Some("<b>A & B</b>".to_string());
        let chart = render_svg(&s, &means()).unwrap();
        assert!(chart.svg.contains("&lt;b&gt;A &amp; B&lt;/b&gt;"));
    }

    #[test]
    fn test_null_rows_are_skipped() {
        let table = Table {
            columns: vec!["k".to_string(), "v".to_string()],
            rows: vec![vec![json!("a"), json!(null)], vec![json!("b"), json!(2)]],
        };
        let chart = render_svg(&spec(ChartKind::Bar, "k", "v"), &table).unwrap();
        assert_eq!(chart.svg.matches("<title>").count(), 1);
    }

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range([5.0, 5.0].into_iter(), false), (4.5, 5.5));
        let (lo, hi) = padded_range([1.0, 3.0].into_iter(), true);
        assert_eq!(lo, 0.0);
        assert!(hi > 3.0);
        assert_eq!(padded_range(std::iter::empty(), true), (0.0, 1.0));
    }
}
