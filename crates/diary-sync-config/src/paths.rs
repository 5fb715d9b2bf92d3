use anyhow::Result;
use std::path::{Path, PathBuf};

pub const BASE_PATH_ENV: &str = "REELBOOK_BASE_PATH";

/// Every file reelbook reads or writes, under one base directory.
///
/// ```text
/// <base>/config.toml
/// <base>/credentials.toml
/// <base>/data/state.json       lock, limiter window, progress, import log
/// <base>/data/cache/           one file per cached feed or TMDB response
/// <base>/data/records.json
/// <base>/data/posters/
/// <base>/logs/reelbook.log.<date>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathManager {
    base: PathBuf,
}

impl PathManager {
    /// `$REELBOOK_BASE_PATH` when set (containers), else `<config dir>/reelbook`
    pub fn resolve() -> Result<Self> {
        if let Some(base) = std::env::var_os(BASE_PATH_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::from_base(Path::new(&base)));
        }
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(Self::from_base(&config_dir.join("reelbook")))
    }

    pub fn from_base(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn data_dir(&self) -> PathBuf {
        self.base.join("data")
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.toml")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.base.join("credentials.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir().join("state.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir().join("cache")
    }

    pub fn records_file(&self) -> PathBuf {
        self.data_dir().join("records.json")
    }

    pub fn posters_dir(&self) -> PathBuf {
        self.data_dir().join("posters")
    }

    pub fn daemon_log_file(&self) -> PathBuf {
        self.base.join("logs").join("reelbook.log")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.base.clone(), self.cache_dir(), self.posters_dir(), self.base.join("logs")] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for PathManager {
    /// Falls back to `./reelbook` when no config directory is known
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| Self::from_base(Path::new("reelbook")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_base() {
        let paths = PathManager::from_base(Path::new("/srv/reelbook"));
        assert_eq!(paths.state_file(), PathBuf::from("/srv/reelbook/data/state.json"));
        assert_eq!(paths.cache_dir(), PathBuf::from("/srv/reelbook/data/cache"));
        assert_eq!(paths.daemon_log_file(), PathBuf::from("/srv/reelbook/logs/reelbook.log"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let paths = PathManager::from_base(&dir.path().join("rb"));
        paths.ensure_directories().unwrap();
        assert!(paths.cache_dir().is_dir());
        assert!(paths.posters_dir().is_dir());
        assert!(paths.daemon_log_file().parent().unwrap().is_dir());
    }
}
