//! Results table printed after a transfer.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use strapi_transfer::TransferResults;

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// One row per stage, one `-- ` row per aggregate, and a total.
pub fn results_table(results: &TransferResults) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Type", "Count", "Size"]);

    for (stage, result) in &results.engine {
        table.add_row(vec![
            stage.to_string(),
            result.count.to_string(),
            format_bytes(result.bytes),
        ]);
        for (key, aggregate) in &result.aggregates {
            table.add_row(vec![
                format!("-- {}", key),
                aggregate.count.to_string(),
                format_bytes(aggregate.bytes),
            ]);
        }
    }

    table.add_row(vec![
        "Total".to_string(),
        results.total_count().to_string(),
        format_bytes(results.total_bytes()),
    ]);
    table
}
