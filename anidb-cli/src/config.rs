//! Layered runtime configuration: built-in defaults, an optional
//! `anidbcli.toml` in the config directory, then `ANIDBCLI_*` env vars.

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub client_name: String,
    pub client_version: u32,
    pub datagram_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "api.anidb.net".to_string(),
            server_port: 9000,
            client_name: "anidbcli".to_string(),
            client_version: 1,
            datagram_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load(config_dir: &std::path::Path) -> Result<Self, figment::Error> {
        let toml_path = config_dir.join("anidbcli.toml");
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(toml_path))
            .merge(figment::providers::Env::prefixed("ANIDBCLI_"))
            .extract()
    }
}
