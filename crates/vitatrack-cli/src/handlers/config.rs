//! Configuration command handlers

use crate::cli::{ConfigAction, ConfigArgs, ConfigFormat, ConfigInitArgs, ConfigShowArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use serde_json::json;

/// Handle the config command
pub async fn handle_config(args: ConfigArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    match args.action {
        ConfigAction::Show(show_args) => handle_config_show(show_args, config, output),
        ConfigAction::Init(init_args) => handle_config_init(init_args, output),
        ConfigAction::Path => handle_config_path(config, output),
    }
}

/// Render a configuration in the requested file format
pub(crate) fn render_config(config: &Config, format: ConfigFormat) -> Result<String> {
    let content = match format {
        ConfigFormat::Toml => toml::to_string_pretty(config)
            .map_err(|e| Error::config(format!("Failed to serialize as TOML: {}", e)))?,
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(content)
}

fn handle_config_show(args: ConfigShowArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let mut shown = config.clone();
    if shown.token.is_some() {
        shown.token = Some("***".to_string());
    }
    output.writeln(render_config(&shown, args.format)?.trim_end())
}

fn handle_config_init(args: ConfigInitArgs, output: &mut OutputWriter) -> Result<()> {
    let path = Config::user_config_path()
        .ok_or_else(|| Error::config("Unable to determine user config directory"))?;

    if path.exists() && !args.force {
        output.warning(&format!("Config already exists at {}", path.display()))?;
        return Ok(());
    }

    Config::default().save(&path)?;
    output.success(&format!("✓ Created config at {}", path.display()))?;
    output.info("Edit it to point `client.base_url` at your API.")
}

fn handle_config_path(config: &Config, output: &mut OutputWriter) -> Result<()> {
    let user = Config::user_config_path();
    output.data(&json!({
        "active": config.source.as_ref().map(|p| p.display().to_string()),
        "user": user.map(|p| p.display().to_string()),
        "data": config.storage_dir().display().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_formats() {
        let config = Config::default();

        let toml = render_config(&config, ConfigFormat::Toml).unwrap();
        assert!(toml.contains("[client]"));
        assert!(toml.contains("base_url = \"http://localhost:3000/api\""));

        let json = render_config(&config, ConfigFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["client"]["timeout_ms"], 30000);

        let yaml = render_config(&config, ConfigFormat::Yaml).unwrap();
        assert!(yaml.contains("client:"));
    }
}
