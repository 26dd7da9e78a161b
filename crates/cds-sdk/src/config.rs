use std::path::Path;

use cds_store::{SessionLimits, DEFAULT_COPY_CHUNK_SIZE};
use cds_types::{BackendKind, DEFAULT_MAX_NAME_LEN};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// Tag written into new containers when the caller does not supply one.
pub const DEFAULT_APP_IDENTIFICATION: &str = "application/x-cds";

/// Store-wide settings, loadable from TOML. Missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Format used for `Auto` in Write mode and for inconclusive sniffs.
    pub default_format: BackendKind,
    pub max_name_len: usize,
    pub copy_chunk_size: usize,
    pub app_identification: String,
    /// Open ZIP-family containers through the encrypted backend in
    /// `Auto` Read mode, so encrypted ones are recognized.
    pub encrypted_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_format: BackendKind::Zip,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            app_identification: DEFAULT_APP_IDENTIFICATION.to_string(),
            encrypted_fallback: cfg!(feature = "encryption"),
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.max_name_len == 0 {
            return Err(SdkError::Config("max_name_len must be positive".into()));
        }
        if self.copy_chunk_size == 0 {
            return Err(SdkError::Config("copy_chunk_size must be positive".into()));
        }
        if matches!(self.default_format, BackendKind::Auto | BackendKind::Directory) {
            return Err(SdkError::Config(format!(
                "default_format must be an archive format, got {}",
                self.default_format
            )));
        }
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_name_len: self.max_name_len,
            copy_chunk_size: self.copy_chunk_size,
        }
    }
}
