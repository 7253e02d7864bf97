//! Resolves where the session cache and the SQLite store live on disk
//! (spec.md §9: `${APPDATA or $HOME/.anidbcli}`).

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub config_dir: PathBuf,
}

impl PathsConfig {
    /// `APPDATA` wins if set (Windows); otherwise `$HOME/.anidbcli`.
    pub fn resolve() -> Self {
        let config_dir = std::env::var_os("APPDATA").map(PathBuf::from).unwrap_or_else(|| {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".anidbcli")
        });
        Self { config_dir }
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self { config_dir: config_dir.into() }
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join("session.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config_dir.join("cache.sqlite3")
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_dir_derives_expected_file_names() {
        let p = PathsConfig::with_dir("/tmp/anidbcli-test");
        assert_eq!(p.session_path(), PathBuf::from("/tmp/anidbcli-test/session.json"));
        assert_eq!(p.cache_path(), PathBuf::from("/tmp/anidbcli-test/cache.sqlite3"));
    }
}
