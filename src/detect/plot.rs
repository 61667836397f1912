//! PNG rendering of `total_failures` over time with anomalies overlaid.

use std::path::Path;
use std::sync::OnceLock;

use chrono::DateTime;
use plotters::prelude::*;
use plotters::style::{register_font, FontStyle};
use tracing::info;

use crate::detect::engine::AnomalyOutcome;
use crate::detect::DetectError;

pub const PLOT_SIZE: (u32, u32) = (1200, 600);
pub const PLOT_TITLE: &str = "Anomaly Detection in Prowler Scan Results";

const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// Register the bundled font with plotters once per process.
fn ensure_font() -> Result<(), DetectError> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let ok = *REGISTERED.get_or_init(|| register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES).is_ok());
    if ok {
        Ok(())
    } else {
        Err(DetectError::Plot("bundled font could not be loaded".to_string()))
    }
}

/// Unix seconds as a date tick label.
fn format_tick(x: &f64) -> String {
    DateTime::from_timestamp(*x as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// (x = unix seconds, y = total_failures) in timestamp order.
fn series(outcome: &AnomalyOutcome) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let mut all: Vec<(f64, f64, bool)> = outcome
        .rows
        .iter()
        .map(|r| {
            (
                r.record.timestamp.and_utc().timestamp() as f64,
                r.total_failures as f64,
                r.anomaly_flag,
            )
        })
        .collect();
    all.sort_by(|a, b| a.0.total_cmp(&b.0));

    let anomalies = all.iter().filter(|p| p.2).map(|p| (p.0, p.1)).collect();
    let line = all.into_iter().map(|p| (p.0, p.1)).collect();
    (line, anomalies)
}

fn padded_range(values: impl Iterator<Item = f64>, floor_zero: bool) -> std::ops::Range<f64> {
    let (mut lo, mut hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return 0.0..1.0;
    }
    if floor_zero {
        lo = lo.min(0.0);
    }
    let pad = ((hi - lo) * 0.05).max(1.0);
    if !floor_zero {
        lo -= pad;
    }
    hi += pad;
    lo..hi
}

/// Render the plot to `path`, replacing any previous image.
pub fn render(outcome: &AnomalyOutcome, path: &Path) -> Result<(), DetectError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DetectError::Plot(e.to_string()))?;
    }

    let (line, anomalies) = series(outcome);
    let x_range = padded_range(line.iter().map(|p| p.0), false);
    let y_range = padded_range(line.iter().map(|p| p.1), true);

    ensure_font()?;
    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(PLOT_TITLE, (FONT_FAMILY, 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Timestamp")
        .y_desc("Total Failures")
        .x_labels(8)
        .x_label_formatter(&format_tick)
        .label_style((FONT_FAMILY, 14))
        .axis_desc_style((FONT_FAMILY, 16))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(line.iter().copied(), &BLUE))
        .map_err(plot_err)?
        .label("Total Failures")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(line.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))
        .map_err(plot_err)?;
    chart
        .draw_series(anomalies.iter().map(|&p| Cross::new(p, 7, RED.stroke_width(2))))
        .map_err(plot_err)?
        .label("Anomaly")
        .legend(|(x, y)| Cross::new((x + 10, y), 5, RED.stroke_width(2)));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font((FONT_FAMILY, 14))
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!(path = %path.display(), points = line.len(), anomalies = anomalies.len(), "anomaly plot rendered");
    Ok(())
}

fn plot_err<E: std::fmt::Display>(e: E) -> DetectError {
    DetectError::Plot(e.to_string())
}
