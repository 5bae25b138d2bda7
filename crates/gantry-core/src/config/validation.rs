//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{AppConfig, Config};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    if config.build.concurrency == 0 {
        return Err(invalid("build.concurrency", "must be at least 1"));
    }
    if config.build.command_timeout_secs == 0 {
        return Err(invalid("build.command_timeout_secs", "must be at least 1"));
    }

    let mut app_names = HashSet::new();
    for app in &config.apps {
        if app.name.is_empty() {
            return Err(invalid("apps.name", "app name cannot be empty"));
        }
        if !app_names.insert(app.name.as_str()) {
            return Err(invalid(
                "apps.name",
                &format!("duplicate app name '{}'", app.name),
            ));
        }
        validate_tasks(app)?;
    }

    debug!(apps = config.apps.len(), "configuration validation passed");
    Ok(())
}

fn validate_tasks(app: &AppConfig) -> Result<()> {
    let mut task_names = HashSet::new();
    for task in &app.tasks {
        let field = format!("apps.{}.tasks", app.name);
        if task.name.is_empty() {
            return Err(invalid(&field, "task name cannot be empty"));
        }
        if !task_names.insert(task.name.as_str()) {
            return Err(invalid(
                &field,
                &format!("duplicate task name '{}'", task.name),
            ));
        }
        if task.command.trim().is_empty() {
            return Err(invalid(
                &format!("{}.{}.command", field, task.name),
                "command cannot be empty",
            ));
        }
        if task.inputs.is_empty() && task.go_sources.is_empty() {
            return Err(invalid(
                &format!("{}.{}.inputs", field, task.name),
                "at least one input pattern or go_sources entry is required",
            ));
        }
        if task.outputs.iter().any(|o| o.destination().is_empty()) {
            return Err(invalid(
                &format!("{}.{}.outputs", field, task.name),
                "output destination cannot be empty",
            ));
        }
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> crate::error::GantryError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{OutputConfig, TaskConfig};

    fn app_with(tasks: Vec<TaskConfig>) -> Config {
        Config {
            apps: vec![AppConfig {
                name: "api".to_string(),
                dir: "services/api".into(),
                tasks,
            }],
            ..Default::default()
        }
    }

    fn build_task() -> TaskConfig {
        TaskConfig {
            name: "build".to_string(),
            command: "make".to_string(),
            inputs: vec!["**/*.go".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&app_with(vec![build_task()])).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = app_with(vec![build_task()]);
        config.build.concurrency = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_command_timeout_rejected() {
        let mut config = app_with(vec![build_task()]);
        config.build.command_timeout_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("build.command_timeout_secs"));
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let config = app_with(vec![build_task(), build_task()]);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate task name"));
    }

    #[test]
    fn test_task_without_inputs_rejected() {
        let mut task = build_task();
        task.inputs.clear();
        assert!(validate_config(&app_with(vec![task])).is_err());

        let mut task = build_task();
        task.inputs.clear();
        task.go_sources.push("cmd/api".into());
        assert!(validate_config(&app_with(vec![task])).is_ok());
    }

    #[test]
    fn test_empty_output_destination_rejected() {
        let mut task = build_task();
        task.outputs.push(OutputConfig::File {
            path: "dist/api".into(),
            destination: String::new(),
        });
        assert!(validate_config(&app_with(vec![task])).is_err());
    }
}
