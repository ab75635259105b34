//! HTML report body and the battery chart embedded in it.
use super::format_phone_for_report;
use crate::model::{SurveyData, MAX_BATTERIES};
use chrono::NaiveDate;
use std::fmt::Write as _;

const CHART_WIDTH: f64 = 780.0;
const CHART_HEIGHT: f64 = 510.0;
const PLOT_LEFT: f64 = 50.0;
const PLOT_RIGHT: f64 = 50.0;
const PLOT_TOP: f64 = 80.0;
const PLOT_BOTTOM: f64 = 60.0;

const VOLTAGE_COLOR: &str = "rgba(0, 0, 255, 0.7)";
const DENSITY_COLOR: &str = "rgba(0, 128, 0, 0.7)";

/// Which page layout the report uses; the commented layout reserves space for the comment box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Standard,
    WithComments,
}

impl Layout {
    pub fn for_survey(survey: &SurveyData) -> Self {
        if survey.comment().is_some() {
            Layout::WithComments
        } else {
            Layout::Standard
        }
    }
}

struct Series<'a> {
    label: &'a str,
    color: &'a str,
    values: Vec<f64>,
}

fn parse_values(raw: &[String], count: usize) -> Vec<f64> {
    raw.iter()
        .take(count)
        .map(|v| v.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0))
        .collect()
}

/// SVG line chart of per-battery voltage and, when any value is non-zero, density.
pub fn chart_svg(voltages: &[String], densities: Option<&[String]>, count: usize) -> String {
    let count = count.min(MAX_BATTERIES);
    let mut series = vec![Series {
        label: "Tensão (V)",
        color: VOLTAGE_COLOR,
        values: parse_values(voltages, count),
    }];
    if let Some(densities) = densities {
        let values = parse_values(densities, count);
        if values.iter().any(|v| *v != 0.0) {
            series.push(Series {
                label: "Densidade (U)",
                color: DENSITY_COLOR,
                values,
            });
        }
    }

    let all: Vec<f64> = series.iter().flat_map(|s| s.values.iter().copied()).collect();
    let (mut lo, mut hi) = all
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 1.0;
    }
    if (hi - lo).abs() < f64::EPSILON {
        lo -= 1.0;
        hi += 1.0;
    }

    let plot_w = CHART_WIDTH - PLOT_LEFT - PLOT_RIGHT;
    let plot_h = CHART_HEIGHT - PLOT_TOP - PLOT_BOTTOM;
    let x_at = |i: usize| {
        if count <= 1 {
            PLOT_LEFT + plot_w / 2.0
        } else {
            PLOT_LEFT + plot_w * i as f64 / (count - 1) as f64
        }
    };
    let y_at = |v: f64| PLOT_TOP + plot_h * (1.0 - (v - lo) / (hi - lo));

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {CHART_WIDTH} {CHART_HEIGHT}" width="{CHART_WIDTH}" height="{CHART_HEIGHT}" font-family="Arial">"#
    );

    // legend
    let mut legend_x = CHART_WIDTH / 2.0 - 130.0 * series.len() as f64 / 2.0;
    for s in &series {
        let _ = write!(
            svg,
            r#"<rect x="{legend_x}" y="20" width="36" height="14" fill="{color}"/><text x="{tx}" y="33" font-size="18" fill="black">{label}</text>"#,
            color = s.color,
            tx = legend_x + 44.0,
            label = s.label,
        );
        legend_x += 200.0;
    }

    for i in 0..count {
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{y}" font-size="18" font-weight="bold" text-anchor="middle" fill="black">Bat {n}</text>"#,
            x = x_at(i),
            y = CHART_HEIGHT - 20.0,
            n = i + 1,
        );
    }

    for s in &series {
        let points: Vec<String> = s
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{:.1},{:.1}", x_at(i), y_at(*v)))
            .collect();
        let _ = write!(
            svg,
            r#"<polyline fill="none" stroke="{}" stroke-width="3" points="{}"/>"#,
            s.color,
            points.join(" ")
        );
        for (i, v) in s.values.iter().enumerate() {
            let (x, y) = (x_at(i), y_at(*v));
            let _ = write!(svg, r#"<circle cx="{x:.1}" cy="{y:.1}" r="5" fill="{}"/>"#, s.color);
            if *v != 0.0 {
                let _ = write!(
                    svg,
                    r#"<text x="{x:.1}" y="{ty:.1}" font-size="16" font-weight="bold" text-anchor="middle" fill="{}">{v}</text>"#,
                    s.color,
                    ty = y - 10.0,
                );
            }
        }
    }

    svg.push_str("</svg>");
    svg
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Labelled report fields in page order; `true` marks bold fields.
pub fn report_fields(survey: &SurveyData, today: NaiveDate) -> Vec<(&'static str, String, bool)> {
    let c = &survey.customer;
    let cart = &survey.cart;
    let check = &survey.battery_check;
    vec![
        ("Nome", c.name.clone(), true),
        ("Clube", c.club.clone(), true),
        ("E-mail", c.email().unwrap_or("").to_string(), false),
        ("Telefone", format_phone_for_report(&c.phone), false),
        ("Data", today.format("%d/%m/%Y").to_string(), false),
        ("Cidade", format!("{} - {}", c.city, c.state), false),
        ("Marca", cart.brand.clone(), false),
        ("Modelo", opt(&cart.model).to_string(), false),
        ("Número", opt(&cart.number).to_string(), false),
        ("Marca da bateria", cart.battery_brand.clone(), false),
        ("Quantidade", cart.battery_count.clone(), false),
        ("Tipo", cart.battery_type.clone(), false),
        ("Tensão", cart.battery_voltage.clone(), false),
        ("Caixa", check.case.clone(), false),
        ("Parafusos", check.screws.clone(), false),
        ("Terminais", check.terminals.clone(), false),
        ("Polos", check.poles.clone(), false),
        ("Nível", check.level.clone(), false),
    ]
}

/// Full HTML document handed to the PDF converter.
pub fn render_html(survey: &SurveyData, today: NaiveDate) -> String {
    let layout = Layout::for_survey(survey);
    let chart = chart_svg(
        &survey.voltages,
        survey.densities.as_deref(),
        survey.cart.battery_count(),
    );

    let mut rows = String::new();
    for (label, value, bold) in report_fields(survey, today) {
        let value = escape(&value);
        let value = if bold { format!("<strong>{value}</strong>") } else { value };
        let _ = write!(rows, "<tr><th>{label}</th><td>{value}</td></tr>");
    }

    let comments = match (layout, survey.comment()) {
        (Layout::WithComments, Some(comment)) => format!(
            r#"<section class="comments"><h2>Comentários</h2><p>{}</p></section>"#,
            escape(comment)
        ),
        _ => String::new(),
    };
    let layout_class = match layout {
        Layout::Standard => "standard",
        Layout::WithComments => "with-comments",
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
<meta charset="utf-8">
<title>Relatório Pit Stop Golf</title>
<style>
body {{ font-family: Helvetica, Arial, sans-serif; font-size: 12pt; margin: 0; }}
h1 {{ font-size: 20pt; margin-bottom: 8mm; }}
table {{ border-collapse: collapse; width: 100mm; float: left; }}
th {{ text-align: left; font-weight: normal; color: #555; padding: 1mm 3mm 1mm 0; }}
td {{ padding: 1mm 0; }}
.chart {{ float: right; width: 70mm; }}
.chart svg {{ width: 70mm; height: 46mm; }}
.standard .chart {{ margin-top: 60mm; }}
.with-comments .chart {{ margin-top: 10mm; }}
.comments {{ clear: both; padding-top: 6mm; }}
</style>
</head>
<body class="{layout_class}">
<h1>Relatório Pit Stop Golf</h1>
<table>{rows}</table>
<div class="chart">{chart}</div>
{comments}
</body>
</html>
"#
    )
}
