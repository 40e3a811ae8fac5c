use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirError {
    #[error("Could not resolve the {0} directory")]
    DirNotFound(String),
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type DirResult<T> = Result<T, DirError>;

/// Application name used to namespace directories.
pub static APP_NAME: &str = "topicatlas";

/// Overrides every directory type with `<value>/<kind>` when set.
pub static HOME_OVERRIDE_VAR: &str = "TOPIC_ATLAS_HOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    Data,
    Config,
    Cache,
}

impl Display for DirType {
    /// Pretty-print the default directory path hint for this dir type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirType::Data => write!(f, "~/.local/share/")?,
            DirType::Config => write!(f, "~/.config/")?,
            DirType::Cache => write!(f, "~/.cache/")?,
        };
        write!(f, "{}", APP_NAME)
    }
}

impl DirType {
    fn xdg_key(&self) -> &'static str {
        match self {
            DirType::Data => "XDG_DATA_HOME",
            DirType::Config => "XDG_CONFIG_HOME",
            DirType::Cache => "XDG_CACHE_HOME",
        }
    }

    fn rel_path(&self) -> &'static str {
        match self {
            DirType::Data => ".local/share",
            DirType::Config => ".config",
            DirType::Cache => ".cache",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            DirType::Data => "data",
            DirType::Config => "config",
            DirType::Cache => "cache",
        }
    }

    /// Resolve the directory path from the override, XDG, or HOME hints.
    pub fn get_dir(&self) -> DirResult<PathBuf> {
        if let Some(root) = env::var_os(HOME_OVERRIDE_VAR) {
            Ok(PathBuf::from(root).join(self.kind()))
        } else if let Some(dir) = env::var_os(self.xdg_key()) {
            Ok(PathBuf::from(dir).join(APP_NAME))
        } else if let Ok(home) = env::var("HOME") {
            Ok(PathBuf::from(home).join(self.rel_path()).join(APP_NAME))
        } else if let Ok(userprofile) = env::var("USERPROFILE") {
            Ok(PathBuf::from(userprofile)
                .join(self.rel_path())
                .join(APP_NAME))
        } else {
            Err(DirError::DirNotFound(self.to_string()))
        }
    }

    /// Path of `name` inside this directory, without creating anything.
    pub fn file<P: AsRef<Path>>(&self, name: P) -> DirResult<PathBuf> {
        Ok(self.get_dir()?.join(name))
    }

    /// Ensure the directory exists, creating it asynchronously if needed.
    pub async fn ensure_dir_async(&self) -> DirResult<PathBuf> {
        let dir = self.get_dir()?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Ensure the directory exists, creating it if needed.
    pub fn ensure_dir(&self) -> DirResult<PathBuf> {
        let dir = self.get_dir()?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hints_include_app_name() {
        assert_eq!(DirType::Cache.to_string(), "~/.cache/topicatlas");
        assert_eq!(DirType::Config.to_string(), "~/.config/topicatlas");
    }

    #[test]
    fn file_joins_under_resolved_dir() {
        let dir = DirType::Config.get_dir().unwrap();
        let file = DirType::Config.file("config.json").unwrap();
        assert_eq!(file, dir.join("config.json"));
    }
}
