//! Implementation of the `qc validate` command.

use anyhow::Result;
use std::path::Path;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::QcConfig;
use crate::services::PluginRegistry;

/// One configured component
#[derive(Debug, serde::Serialize)]
pub struct ComponentOutput {
    /// task, check, aggregator or postprocessing
    pub kind: &'static str,
    pub name: String,
    pub class_name: String,
    pub active: bool,
    /// Whether the plugin registry knows the class
    pub class_known: bool,
}

/// Report of `qc validate`
#[derive(Debug, serde::Serialize)]
pub struct ValidateOutput {
    /// No active component names an unknown class
    pub valid: bool,
    pub path: String,
    pub activity: String,
    pub database: String,
    pub components: Vec<ComponentOutput>,
}

impl ValidateOutput {
    fn unknown_classes(&self) -> impl Iterator<Item = &ComponentOutput> {
        self.components.iter().filter(|c| c.active && !c.class_known)
    }
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Configuration {} is valid.", self.path),
            format!("Activity: {}", self.activity),
            format!("Database: {}", self.database),
            String::new(),
            format!("{:<16} {:<24} {:<28} {:<8}", "KIND", "NAME", "CLASS", "ACTIVE"),
            "-".repeat(78),
        ];
        for component in &self.components {
            lines.push(format!(
                "{:<16} {:<24} {:<28} {:<8}",
                component.kind,
                component.name,
                component.class_name,
                if component.active { "yes" } else { "no" },
            ));
        }
        let unknown: Vec<_> = self.unknown_classes().collect();
        if !unknown.is_empty() {
            lines.push(String::new());
            for component in unknown {
                lines.push(format!(
                    "warning: {} '{}' uses class '{}', which is not built in",
                    component.kind, component.name, component.class_name
                ));
            }
        }
        lines.join("\n")
    }
}

fn components(config: &QcConfig, registry: &PluginRegistry) -> Vec<ComponentOutput> {
    let qc = &config.qc;
    let mut components = Vec::new();
    for (name, task) in &qc.tasks {
        components.push(ComponentOutput {
            kind: "task",
            name: name.clone(),
            class_name: task.class_name.clone(),
            active: task.active,
            class_known: registry.has_task(&task.class_name),
        });
    }
    for (name, check) in &qc.checks {
        components.push(ComponentOutput {
            kind: "check",
            name: name.clone(),
            class_name: check.class_name.clone(),
            active: check.active,
            class_known: registry.has_check(&check.class_name),
        });
    }
    for (name, aggregator) in &qc.aggregators {
        components.push(ComponentOutput {
            kind: "aggregator",
            name: name.clone(),
            class_name: aggregator.class_name.clone(),
            active: aggregator.active,
            class_known: registry.has_aggregator(&aggregator.class_name),
        });
    }
    for (name, pp) in &qc.postprocessing {
        components.push(ComponentOutput {
            kind: "postprocessing",
            name: name.clone(),
            class_name: pp.class_name.clone(),
            active: pp.active,
            class_known: registry.has_postprocessing(&pp.class_name),
        });
    }
    components
}

pub fn execute(path: &Path, json_mode: bool) -> Result<()> {
    let config = super::load_config(path)?;
    let registry = PluginRegistry::with_builtins();
    let common = &config.qc.config;

    let out = ValidateOutput {
        valid: true,
        path: path.display().to_string(),
        activity: common.activity.to_string(),
        database: format!("{:?} {}", common.database.implementation, common.database.url).to_lowercase(),
        components: components(&config, &registry),
    };
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[test]
    fn test_unknown_classes_are_reported() {
        let config = ConfigLoader::load_from_str(
            "qc:\n  tasks:\n    A:\n      className: SkeletonTask\n    B:\n      className: ExternalTask\n",
        )
        .unwrap();
        let out = ValidateOutput {
            valid: true,
            path: "qc.yaml".to_string(),
            activity: String::new(),
            database: String::new(),
            components: components(&config, &PluginRegistry::with_builtins()),
        };
        let unknown: Vec<_> = out.unknown_classes().map(|c| c.name.as_str()).collect();
        assert_eq!(unknown, vec!["B"]);
        assert!(out.to_human().contains("ExternalTask"));
    }
}
