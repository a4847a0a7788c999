//! `batcher config`: print the effective configuration.

use anyhow::Result;
use console::style;

use crate::settings::LoadedConfig;

/// Print the configuration after file loading and overrides.
pub fn show(loaded: &LoadedConfig, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "source": loaded.path.as_ref().map(|p| p.display().to_string()),
            "config": loaded.config,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let source = match &loaded.path {
        Some(path) => path.display().to_string(),
        None => "built-in defaults".to_string(),
    };
    println!("{}", style(format!("# source: {source}")).dim());
    print!("{}", toml::to_string_pretty(&loaded.config)?);
    Ok(())
}
