use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::Selection;
use crate::domain::{Compression, Layout, Resolution};
use crate::error::HicbandError;

pub const CONFIG_FILE: &str = "hicband.json";
pub const DEFAULT_WINDOW: usize = 128;
pub const MAX_WINDOW: usize = 1 << 16;
pub const DEFAULT_LAYOUT: Layout = Layout::Chromosome;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub balance: Option<bool>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default)]
    pub resolutions: Option<ResolutionsEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResolutionsEntry {
    Keyword(String),
    Single(u64),
    List(Vec<u64>),
}

/// Values given on the command line; each one wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_root: Option<Utf8PathBuf>,
    pub output_root: Option<Utf8PathBuf>,
    pub window: Option<usize>,
    pub balance: Option<bool>,
    pub layout: Option<Layout>,
    pub compression: Option<Compression>,
    pub selection: Option<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub schema_version: u32,
    pub data_root: Utf8PathBuf,
    pub output_root: Utf8PathBuf,
    pub window: usize,
    pub balance: bool,
    pub layout: Layout,
    pub compression: Compression,
    pub selection: Selection,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config file: `path` when given (it must exist), otherwise
    /// `hicband.json` in the working directory, otherwise `config.json` in the
    /// user config directory. No file at all yields the defaults.
    pub fn load(path: Option<&str>) -> Result<Config, HicbandError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match Self::discover() {
                Some(path) => path,
                None => return Ok(Config::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HicbandError::ConfigRead(config_path.display().to_string()))?;
        serde_json::from_str(&content).map_err(|err| HicbandError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, HicbandError> {
        Self::resolve_config(Self::load(path)?, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, HicbandError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(HicbandError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let data_root = overrides
            .data_root
            .or_else(|| config.data_root.map(Utf8PathBuf::from))
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        let output_root = overrides
            .output_root
            .or_else(|| config.output_root.map(Utf8PathBuf::from))
            .unwrap_or_else(|| data_root.clone());

        let window = overrides
            .window
            .or(config.window)
            .unwrap_or(DEFAULT_WINDOW);
        if window > MAX_WINDOW {
            return Err(HicbandError::InvalidConfig(format!(
                "window {window} exceeds the maximum of {MAX_WINDOW}"
            )));
        }

        let selection = match overrides.selection {
            Some(selection) => selection,
            None => match config.resolutions {
                Some(entry) => parse_resolutions(entry)?,
                None => Selection::All,
            },
        };

        Ok(RunConfig {
            schema_version,
            data_root,
            output_root,
            window,
            balance: overrides.balance.or(config.balance).unwrap_or(true),
            layout: overrides.layout.or(config.layout).unwrap_or(DEFAULT_LAYOUT),
            compression: overrides
                .compression
                .or(config.compression)
                .unwrap_or_default(),
            selection,
        })
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        ProjectDirs::from("", "", "hicband")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.is_file())
    }
}

fn parse_resolutions(entry: ResolutionsEntry) -> Result<Selection, HicbandError> {
    match entry {
        ResolutionsEntry::Keyword(value) if value.eq_ignore_ascii_case("all") => Ok(Selection::All),
        ResolutionsEntry::Keyword(value) => Ok(Selection::One(value.parse()?)),
        ResolutionsEntry::Single(bp) => Ok(Selection::One(Resolution::new(bp)?)),
        ResolutionsEntry::List(values) => {
            let resolutions = values
                .into_iter()
                .map(Resolution::new)
                .collect::<Result<Vec<_>, _>>()?;
            if resolutions.is_empty() {
                return Err(HicbandError::InvalidConfig(
                    "resolutions list is empty".to_string(),
                ));
            }
            Ok(Selection::Many(resolutions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_config() {
        let resolved =
            ConfigLoader::resolve_config(Config::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.window, DEFAULT_WINDOW);
        assert!(resolved.balance);
        assert_eq!(resolved.layout, Layout::Chromosome);
        assert_eq!(resolved.compression, Compression::Stored);
        assert_eq!(resolved.selection, Selection::All);
        assert_eq!(resolved.output_root, resolved.data_root);
    }

    #[test]
    fn keyword_resolution_entries() {
        let config: Config = serde_json::from_str(r#"{"resolutions": "5000bp"}"#).unwrap();
        let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
        assert_eq!(
            resolved.selection,
            Selection::One(Resolution::new(5000).unwrap())
        );
    }
}
