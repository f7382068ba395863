//! Gateway configuration
//!
//! Loaded from a JSON file (usually `gateway.json` next to the library),
//! falling back to defaults when no file is given.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Current configuration format version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Prefix added to style ids that are not already URLs.
pub const DEFAULT_STYLE_BASE_URL: &str = "http://www.zotero.org/styles/";

/// Locale used when neither the caller nor the host preferences name one.
pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Configuration format version (for migrations)
    pub version: u32,

    /// Base URL that bare style names are resolved against
    pub style_base_url: String,

    /// Last-resort locale
    pub default_locale: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            style_base_url: DEFAULT_STYLE_BASE_URL.to_string(),
            default_locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: GatewayConfig =
            serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;

        if config.version > CURRENT_CONFIG_VERSION {
            return Err(Error::ConfigVersionTooNew {
                found: config.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        if config.version < CURRENT_CONFIG_VERSION {
            warn!(
                old_version = config.version,
                new_version = CURRENT_CONFIG_VERSION,
                "Gateway config predates the current format"
            );
        }

        if config.default_locale.is_empty() {
            return Err(Error::Config("defaultLocale must not be empty".to_string()));
        }

        info!(path = %path.display(), style_base_url = %config.style_base_url, "Loaded gateway config");
        Ok(config)
    }

    /// Full style URL for a bare style name or an existing URL.
    pub fn style_url(&self, style_id: &str) -> String {
        if style_id.starts_with("http:") || style_id.starts_with("https:") {
            style_id.to_string()
        } else {
            format!("{}{}", self.style_base_url, style_id)
        }
    }
}
