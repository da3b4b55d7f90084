//! Project configuration file parsing (.entangle.toml)

use std::path::Path;

/// Optional per-root project configuration
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct EntangleConfig {
    /// Ignore patterns appended to the ones given on the command line
    pub ignore: Vec<String>,
}

/// Config file name
pub const CONFIG_FILE: &str = ".entangle.toml";

impl EntangleConfig {
    /// Load config from the sync root.
    ///
    /// Returns default config if .entangle.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
