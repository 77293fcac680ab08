use crate::scanner::AlertRecord;
use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table,
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_BORDERS_ONLY,
};
use rust_decimal::prelude::ToPrimitive;

const MAX_ROWS: usize = 15;

fn get_visibility_ratio(current_pct: f64, top_pct: f64) -> f64 {
    if top_pct <= 0.0 {
        1.0
    } else {
        (0.4 + 0.6 * (current_pct / top_pct)).max(0.4)
    }
}

fn format_timestamp(ts_ms: i64) -> String {
    let seconds = ts_ms.div_euclid(1000);
    let nanoseconds = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;

    DateTime::from_timestamp(seconds, nanoseconds)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

/// Table of the session's strongest alerts, best first.
pub fn render_summary(alerts: &[AlertRecord]) -> Option<String> {
    if alerts.is_empty() {
        return None;
    }

    let mut ranked: Vec<&AlertRecord> = alerts.iter().collect();
    ranked.sort_by(|a, b| b.growth.cmp(&a.growth));

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("Asset").add_attribute(Attribute::Bold),
            Cell::new("Growth (%)")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Volume")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Pushed").add_attribute(Attribute::Bold),
            Cell::new("Close (UTC)").add_attribute(Attribute::Bold),
        ]);

    let top_pct = ranked[0].growth.to_f64().unwrap_or(1.0);

    for (i, alert) in ranked.iter().take(MAX_ROWS).enumerate() {
        let ratio = get_visibility_ratio(alert.growth.to_f64().unwrap_or(0.0), top_pct);
        let cyan_val = (255.0 * ratio) as u8;
        let green_val = (255.0 * ratio) as u8;

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&alert.base).fg(Color::Rgb {
                r: 0,
                g: cyan_val,
                b: cyan_val,
            }),
            Cell::new(format!("{:.2}%", alert.growth))
                .fg(Color::Rgb {
                    r: 0,
                    g: green_val,
                    b: 0,
                })
                .set_alignment(CellAlignment::Right),
            Cell::new(alert.trading_volume.trunc()).set_alignment(CellAlignment::Right),
            Cell::new(if alert.pushed { "yes" } else { "no" }),
            Cell::new(format_timestamp(alert.close_time)).fg(Color::DarkGrey),
        ]);
    }

    let title = format!(
        "(Session alerts: {} total, showing top {})",
        alerts.len(),
        alerts.len().min(MAX_ROWS)
    );
    Some(format!("\n{}\n{}", title, table))
}
