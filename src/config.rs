use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::arch::ArchTable;
use crate::index::PkgIndex;
use crate::package::FieldMask;

/// One feed list the loader reads packages from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedSource {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub gzip: bool,
}

/// One installation root with its status file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dest {
    pub name: String,
    pub status_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArchPriority {
    name: String,
    priority: u32,
}

/// Host configuration for the index and the feed loader.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    archs: Vec<ArchPriority>,
    #[serde(default)]
    feeds: Vec<FeedSource>,
    #[serde(default)]
    dests: Vec<Dest>,
    /// Prefix the real root is mounted under when managing another
    /// system's tree.
    #[serde(default)]
    offline_root: Option<String>,
    /// Control-file fields to skip while parsing, by field name.
    #[serde(default)]
    masked_fields: Vec<String>,
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = fs_err::read_to_string(path.as_ref()).map_err(ConfigError::from_io)?;
        content.parse()
    }

    pub fn feeds(&self) -> &[FeedSource] {
        &self.feeds
    }

    pub fn dests(&self) -> &[Dest] {
        &self.dests
    }

    /// The destination new installs go to when none is named.
    pub fn default_dest(&self) -> Option<&Dest> {
        self.dests.first()
    }

    pub fn offline_root(&self) -> Option<&str> {
        self.offline_root.as_deref()
    }

    /// The globally masked field set. Unknown names are reported once here
    /// rather than silently doing nothing.
    pub fn field_mask(&self) -> FieldMask {
        let mut mask = FieldMask::empty();
        for name in &self.masked_fields {
            match FieldMask::from_field_name(name) {
                Some(bit) => mask |= bit,
                None => log::error!("unknown field {name:?} in masked_fields"),
            }
        }
        mask
    }

    /// A fresh index wired up with this configuration's architecture table
    /// and offline root.
    pub fn build_index(&self) -> PkgIndex {
        let archs =
            ArchTable::from_priorities(self.archs.iter().map(|a| (a.name.as_str(), a.priority)));
        let mut index = PkgIndex::new(archs);
        index.set_offline_root(self.offline_root.clone());
        index
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(ConfigError::from_toml)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to load configuration")]
#[non_exhaustive]
pub struct ConfigError {
    pub source: ConfigErrorKind,
}

impl ConfigError {
    fn from_io(err: std::io::Error) -> Self {
        Self {
            source: ConfigErrorKind::Io(err),
        }
    }

    fn from_toml(err: toml::de::Error) -> Self {
        Self {
            source: ConfigErrorKind::Toml(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub enum ConfigErrorKind {
    Io(#[from] std::io::Error),
    Toml(#[from] toml::de::Error),
}
