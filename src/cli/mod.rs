//! Command-line interface of the `qc` binary.

pub mod commands;
pub mod output;
pub mod progress;
pub mod table;
pub mod types;

pub use types::{Cli, Commands, ObjectsCommands};

/// Print an error the way the selected output mode expects, then exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain.get(1..).unwrap_or_default(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
