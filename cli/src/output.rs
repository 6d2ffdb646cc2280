//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a borderless table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(100 * 1048576), "100.0 MB");
        assert_eq!(format_bytes(500 * 1073741824), "500.0 GB");
    }

    #[test]
    fn test_new_table_renders_headers() {
        let mut table = new_table(&["CHUNK", "SIZE"]);
        table.add_row(["mirror_000001.tar", "1.0 KB"]);
        let rendered = table.to_string();
        assert!(rendered.contains("CHUNK"));
        assert!(rendered.contains("mirror_000001.tar"));
    }
}
