//! Implementation of the `qc objects` commands.

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::cli::ObjectsCommands;
use crate::domain::models::{Activity, MonitorObject, QualityObject};
use crate::domain::ports::ObjectVersion;
use crate::infrastructure::database;

/// Folders and objects under a prefix
#[derive(Debug, serde::Serialize)]
pub struct ObjectListOutput {
    pub prefix: String,
    pub objects: Vec<String>,
    pub total: usize,
}

impl CommandOutput for ObjectListOutput {
    fn to_human(&self) -> String {
        if self.objects.is_empty() {
            return if self.prefix.is_empty() {
                "No objects stored.".to_string()
            } else {
                format!("No objects under '{}'.", self.prefix)
            };
        }
        format!(
            "Found {} object(s):\n{}",
            self.total,
            TableFormatter::new().format_objects(&self.objects)
        )
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredObject {
    Monitor(Box<MonitorObject>),
    Quality(Box<QualityObject>),
}

/// Latest version of an object and its history
#[derive(Debug, serde::Serialize)]
pub struct ObjectShowOutput {
    pub path: String,
    pub name: String,
    /// Decoded latest version, if any
    pub latest: Option<StoredObject>,
    /// Every stored version, oldest first
    pub versions: Vec<ObjectVersion>,
}

impl CommandOutput for ObjectShowOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let mut lines = vec![format!("Object: {}/{}", self.path, self.name)];
        match &self.latest {
            Some(StoredObject::Monitor(mo)) => {
                lines.push(format!("Type: {}", mo.payload().kind()));
                if let Some(entries) = mo.payload().entries() {
                    lines.push(format!("Entries: {entries}"));
                }
                for (check, quality) in mo.check_qualities() {
                    lines.push(format!("Checked by {check}: {quality}"));
                }
                for (key, value) in mo.metadata() {
                    lines.push(format!("  {key} = {value}"));
                }
            }
            Some(StoredObject::Quality(qo)) => {
                lines.push(formatter.format_qualities([(qo.check_name(), qo.quality())]));
                if !qo.input_mos().is_empty() {
                    lines.push(format!("Inputs: {}", qo.input_mos().join(", ")));
                }
            }
            None => lines.push("No version matches.".to_string()),
        }
        lines.push(format!("\n{} version(s):", self.versions.len()));
        lines.push(formatter.format_versions(&self.versions));
        lines.join("\n")
    }
}

pub async fn execute(command: ObjectsCommands, config_path: &Path, json_mode: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let database = database::connect(&config.qc.config.database)
        .await
        .context("Failed to open the object store")?;

    match command {
        ObjectsCommands::List { prefix } => {
            let objects = database.list_objects(&prefix).await?;
            let out = ObjectListOutput {
                total: objects.len(),
                prefix,
                objects,
            };
            output(&out, json_mode);
        }

        ObjectsCommands::Show { path, name, run } => {
            let filter = Activity {
                number: run.unwrap_or(0),
                ..Activity::any()
            };
            let latest = if path.contains("/QO/") {
                database
                    .retrieve_qo(&path, &name, None, &filter)
                    .await?
                    .map(|qo| StoredObject::Quality(Box::new(qo)))
            } else {
                database
                    .retrieve_mo(&path, &name, None, &filter)
                    .await?
                    .map(|mo| StoredObject::Monitor(Box::new(mo)))
            };
            let versions = database
                .list_versions(&path, &name)
                .await?
                .into_iter()
                .filter(|version| version.activity.matches(&filter))
                .collect();

            let out = ObjectShowOutput {
                path,
                name,
                latest,
                versions,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
