//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".gantry.toml",
        ".gantry.yaml",
    ]
}

/// Configuration template written for new repositories
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# gantry configuration

[build]
concurrency = 4
history = ".gantry/history.jsonl"
artifacts = ".gantry/artifacts"
command_timeout_secs = 3600

[[apps]]
name = "example"
dir = "example"

[[apps.tasks]]
name = "build"
command = "make"
inputs = ["**/*"]
"#;
