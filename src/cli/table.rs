//! Table output for stored objects, using comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::cli::output::truncate;
use crate::domain::models::quality::{BAD_LEVEL, GOOD_LEVEL, MEDIUM_LEVEL};
use crate::domain::models::{metadata_keys, Quality};
use crate::domain::ports::ObjectVersion;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// One row per object path
    pub fn format_objects(&self, objects: &[String]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Detector").add_attribute(Attribute::Bold),
            Cell::new("Kind").add_attribute(Attribute::Bold),
            Cell::new("Producer").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
        ]);

        for full_path in objects {
            let mut parts = full_path.splitn(4, '/');
            let detector = parts.next().unwrap_or("-");
            let kind = parts.next().unwrap_or("-");
            let producer = parts.next().unwrap_or("-");
            let name = parts.next().unwrap_or("-");

            let kind_cell = if self.use_colors {
                Cell::new(kind).fg(if kind == "QO" { Color::Magenta } else { Color::Cyan })
            } else {
                Cell::new(kind)
            };
            table.add_row(vec![
                Cell::new(detector),
                kind_cell,
                Cell::new(producer),
                Cell::new(truncate(name, 50)),
            ]);
        }
        table.to_string()
    }

    /// One row per stored version, newest first
    pub fn format_versions(&self, versions: &[ObjectVersion]) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Timestamp").add_attribute(Attribute::Bold),
            Cell::new("Run").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Pass").add_attribute(Attribute::Bold),
            Cell::new("Cycle").add_attribute(Attribute::Bold),
            Cell::new("Id").add_attribute(Attribute::Bold),
        ]);

        for version in versions {
            let id = version.id.to_string();
            table.add_row(vec![
                Cell::new(version.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
                Cell::new(version.activity.number),
                Cell::new(or_dash(&version.activity.run_type)),
                Cell::new(or_dash(&version.activity.pass_name)),
                Cell::new(version.metadata.get(metadata_keys::CYCLE_NUMBER).map_or("-", String::as_str)),
                Cell::new(&id[..8]),
            ]);
        }
        table.to_string()
    }

    /// A quality verdict, colored by level
    pub fn quality_cell(&self, quality: &Quality) -> Cell {
        let cell = Cell::new(quality.name());
        if !self.use_colors {
            return cell;
        }
        match quality.level() {
            GOOD_LEVEL => cell.fg(Color::Green),
            MEDIUM_LEVEL => cell.fg(Color::Yellow),
            BAD_LEVEL => cell.fg(Color::Red),
            _ => cell.fg(Color::DarkGrey),
        }
    }

    /// Rows of (check, quality, flags)
    pub fn format_qualities<'a>(&self, rows: impl IntoIterator<Item = (&'a str, &'a Quality)>) -> String {
        let mut table = self.create_base_table();
        table.set_header(vec![
            Cell::new("Check").add_attribute(Attribute::Bold),
            Cell::new("Quality").add_attribute(Attribute::Bold),
            Cell::new("Flags").add_attribute(Attribute::Bold),
        ]);
        for (check, quality) in rows {
            let flags = quality
                .flags()
                .iter()
                .map(|flag| format!("{}: {}", flag.kind, flag.reason))
                .collect::<Vec<_>>()
                .join("\n");
            table.add_row(vec![
                Cell::new(check),
                self.quality_cell(quality),
                Cell::new(if flags.is_empty() { "-".to_string() } else { flags }),
            ]);
        }
        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}
