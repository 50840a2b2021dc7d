//! Process-wide configuration record, read once at startup.
//!
//! Mirrors the rest of the engine's approach to settings: a `Data` struct of all-`Option` fields
//! that (de)serializes with `serde`/`toml`, defaulted lazily by the accessor methods, plus a
//! resolved `Config` that callers actually hold on to. Changing the record after a [`Registry`]
//! has been constructed from it has no effect; it is read once at startup.
//!
//! [`Registry`]: crate::registry::Registry

use {
    crate::error::ConfigError,
    directories::ProjectDirs,
    serde::{Deserialize, Serialize},
    std::{
        env::var,
        fs::{create_dir_all, read_to_string, write},
        path::PathBuf,
    },
};

const CONFIG_FILENAME: &str = "vbuf-cache.toml";

/// `-1` as stored in the config file means "unlimited"; this is the in-memory sentinel.
pub const UNLIMITED: i64 = -1;

fn config_dir(qualifier: &str, organization: &str, application: &str) -> Option<PathBuf> {
    ProjectDirs::from(qualifier, organization, application)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct Data {
    max_ram_vertex_data: Option<i64>,
    max_compressed_vertex_data: Option<i64>,
    vertex_data_compression_level: Option<u32>,
    max_disk_vertex_data: Option<i64>,
    min_vertex_data_compress_size: Option<u64>,
    vertex_save_file_directory: Option<PathBuf>,
    vertex_save_file_prefix: Option<String>,
}

/// Typed, validated view over the vertex buffer cache's configuration record.
///
/// All fields are optional on disk; [`Config`]'s accessors apply the defaults documented in the
/// external interface section of the design: unlimited budgets, a compression level of 1, and a
/// 64-byte minimum-compress-size.
#[derive(Clone, Debug)]
pub struct Config {
    data: Data,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: Data::default(),
        }
    }
}

impl Config {
    /// Reads the configuration record from the OS-standard config directory for
    /// `(qualifier, organization, application)`, per the `directories` crate's convention.
    ///
    /// If no file exists yet, returns the all-defaults record without writing one; callers that
    /// want a file to seed (for a human to later edit) should call [`Config::write`] explicitly.
    pub fn read(qualifier: &str, organization: &str, application: &str) -> Result<Self, ConfigError> {
        let Some(dir) = config_dir(qualifier, organization, application) else {
            return Ok(Self::default());
        };

        let path = dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = read_to_string(&path)?;
        let data = toml::from_str(&text)?;

        Ok(Self { data })
    }

    /// Builds a [`Config`] from defaults, then overlays any `VBUF_CACHE_*` environment variables
    /// that are set. Useful for headless/CI runs where a config file is inconvenient.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(val) = var("VBUF_CACHE_MAX_RAM_VERTEX_DATA") {
            if let Ok(val) = val.parse() {
                config.data.max_ram_vertex_data = Some(val);
            }
        }
        if let Ok(val) = var("VBUF_CACHE_MAX_COMPRESSED_VERTEX_DATA") {
            if let Ok(val) = val.parse() {
                config.data.max_compressed_vertex_data = Some(val);
            }
        }
        if let Ok(val) = var("VBUF_CACHE_MAX_DISK_VERTEX_DATA") {
            if let Ok(val) = val.parse() {
                config.data.max_disk_vertex_data = Some(val);
            }
        }

        config
    }

    /// Writes this record to the OS-standard config directory, creating it if necessary.
    pub fn write(&self, qualifier: &str, organization: &str, application: &str) -> Result<(), ConfigError> {
        let Some(dir) = config_dir(qualifier, organization, application) else {
            return Ok(());
        };

        if !dir.exists() {
            create_dir_all(&dir)?;
        }

        let path = dir.join(CONFIG_FILENAME);
        let text = toml::to_string_pretty(&self.data)
            .map_err(|err| ConfigError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))?;

        write(path, text)?;

        Ok(())
    }

    /// RAM tier budget in bytes. `None` means unlimited. Default: unlimited.
    pub fn max_ram_vertex_data(&self) -> Option<u64> {
        signed_budget(self.data.max_ram_vertex_data)
    }

    /// Compressed tier budget in bytes. `None` means unlimited, `Some(0)` means "bypass — demote
    /// straight to disk". Default: unlimited.
    pub fn max_compressed_vertex_data(&self) -> Option<u64> {
        signed_budget(self.data.max_compressed_vertex_data)
    }

    /// Codec compression level, clamped to `[1, 9]`. Default: 1.
    pub fn vertex_data_compression_level(&self) -> u32 {
        self.data.vertex_data_compression_level.unwrap_or(1).clamp(1, 9)
    }

    /// Save file byte cap. `None` means unlimited. Default: unlimited.
    pub fn max_disk_vertex_data(&self) -> Option<u64> {
        signed_budget(self.data.max_disk_vertex_data)
    }

    /// Below this many bytes, the codec is skipped entirely. Default: 64.
    pub fn min_vertex_data_compress_size(&self) -> u64 {
        self.data.min_vertex_data_compress_size.unwrap_or(64)
    }

    /// Directory the save file lives in. Default: the OS temp directory.
    pub fn vertex_save_file_directory(&self) -> PathBuf {
        self.data
            .vertex_save_file_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Filename prefix for the save file. Default: `"vbuf-cache"`.
    pub fn vertex_save_file_prefix(&self) -> String {
        self.data
            .vertex_save_file_prefix
            .clone()
            .unwrap_or_else(|| "vbuf-cache".to_owned())
    }
}

#[cfg(test)]
impl Config {
    /// Builds a config pointing the save file at the OS temp directory under a test-chosen
    /// prefix, so parallel tests across modules don't truncate each other's scratch files.
    pub(crate) fn for_tests(prefix: &str) -> Self {
        Self {
            data: Data {
                vertex_save_file_prefix: Some(prefix.to_owned()),
                ..Default::default()
            },
        }
    }

    /// Same as [`Self::for_tests`], additionally constraining the RAM and Compressed tier
    /// budgets, for tests that exercise eviction under pressure.
    pub(crate) fn for_tests_with_budgets(prefix: &str, max_ram: i64, max_compressed: i64) -> Self {
        Self {
            data: Data {
                vertex_save_file_prefix: Some(prefix.to_owned()),
                max_ram_vertex_data: Some(max_ram),
                max_compressed_vertex_data: Some(max_compressed),
                ..Default::default()
            },
        }
    }
}

fn signed_budget(val: Option<i64>) -> Option<u64> {
    match val {
        None => None,
        Some(val) if val < 0 => None,
        Some(val) => Some(val as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlimited() {
        let config = Config::default();

        assert_eq!(config.max_ram_vertex_data(), None);
        assert_eq!(config.max_compressed_vertex_data(), None);
        assert_eq!(config.max_disk_vertex_data(), None);
        assert_eq!(config.vertex_data_compression_level(), 1);
        assert_eq!(config.min_vertex_data_compress_size(), 64);
    }

    #[test]
    fn compressed_budget_can_be_zero() {
        let config = Config {
            data: Data {
                max_compressed_vertex_data: Some(0),
                ..Default::default()
            },
        };

        assert_eq!(config.max_compressed_vertex_data(), Some(0));
    }

    #[test]
    fn compression_level_clamped() {
        let config = Config {
            data: Data {
                vertex_data_compression_level: Some(42),
                ..Default::default()
            },
        };

        assert_eq!(config.vertex_data_compression_level(), 9);
    }
}
