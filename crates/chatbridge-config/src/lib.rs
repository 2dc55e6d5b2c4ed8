//! INI configuration-file loading.
//!
//! Three sections matter to the bridge engine: `[telegram] token`,
//! `[xmpp] login`/`password`/`actors_pool_size_limit`, and
//! `[general] key`. This crate only parses and validates the file;
//! it carries none of the bridge's business logic.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::Path;

use tracing::warn;

/// Default bound on the per-user XP impersonation session pool when
/// `[xmpp] actors_pool_size_limit` is absent or unparsable.
pub const DEFAULT_ACTORS_POOL_SIZE_LIMIT: usize = 16;

/// Errors loading or validating the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read at all.
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file's contents are not valid INI.
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },

    /// A mandatory key is missing. Configuration errors of this kind
    /// are the only ones that are fatal at startup.
    #[error("missing mandatory option [{section}] {key}")]
    MissingOption { section: &'static str, key: &'static str },
}

/// Fully parsed, validated bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub telegram_token: String,
    pub xmpp_login: String,
    pub xmpp_password: String,
    pub actors_pool_size_limit: usize,
    pub handshake_key: String,
}

impl BridgeConfig {
    /// Reads and validates an INI file at `path`.
    ///
    /// `actors_pool_size_limit` is optional: a missing or unparsable
    /// value silently falls back to
    /// [`DEFAULT_ACTORS_POOL_SIZE_LIMIT`] rather than failing startup,
    /// since only *mandatory* configuration is fatal per the error
    /// taxonomy.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();

        let contents = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let parsed = ini::Ini::load_from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        let telegram_token = required(&parsed, "telegram", "token")?;
        let xmpp_login = required(&parsed, "xmpp", "login")?;
        let xmpp_password = required(&parsed, "xmpp", "password")?;
        let handshake_key = required(&parsed, "general", "key")?;

        let actors_pool_size_limit = parsed
            .get_from(Some("xmpp"), "actors_pool_size_limit")
            .and_then(|value| match value.parse::<usize>() {
                Ok(parsed) => Some(parsed),
                Err(_) => {
                    warn!(value, "invalid actors_pool_size_limit, using default");
                    None
                }
            })
            .unwrap_or(DEFAULT_ACTORS_POOL_SIZE_LIMIT);

        Ok(Self {
            telegram_token,
            xmpp_login,
            xmpp_password,
            actors_pool_size_limit,
            handshake_key,
        })
    }
}

fn required(parsed: &ini::Ini, section: &'static str, key: &'static str) -> Result<String, ConfigError> {
    parsed
        .get_from(Some(section), key)
        .map(str::to_owned)
        .ok_or(ConfigError::MissingOption { section, key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.ini"), contents).unwrap();
        dir
    }

    #[test]
    fn loads_complete_config() {
        let dir = write_config(
            "[telegram]\n\
             token = 123:abc\n\
             [xmpp]\n\
             login = bridge@example.org\n\
             password = hunter2\n\
             actors_pool_size_limit = 32\n\
             [general]\n\
             key = s3cr3t\n",
        );

        let config = BridgeConfig::load(dir.path().join("config.ini")).unwrap();
        assert_eq!(config.telegram_token, "123:abc");
        assert_eq!(config.xmpp_login, "bridge@example.org");
        assert_eq!(config.actors_pool_size_limit, 32);
        assert_eq!(config.handshake_key, "s3cr3t");
    }

    #[test]
    fn missing_actors_pool_size_limit_falls_back_to_default() {
        let dir = write_config(
            "[telegram]\ntoken = t\n[xmpp]\nlogin = l\npassword = p\n[general]\nkey = k\n",
        );

        let config = BridgeConfig::load(dir.path().join("config.ini")).unwrap();
        assert_eq!(config.actors_pool_size_limit, DEFAULT_ACTORS_POOL_SIZE_LIMIT);
    }

    #[test]
    fn unparsable_actors_pool_size_limit_falls_back_to_default() {
        let dir = write_config(
            "[telegram]\ntoken = t\n[xmpp]\nlogin = l\npassword = p\nactors_pool_size_limit = nope\n[general]\nkey = k\n",
        );

        let config = BridgeConfig::load(dir.path().join("config.ini")).unwrap();
        assert_eq!(config.actors_pool_size_limit, DEFAULT_ACTORS_POOL_SIZE_LIMIT);
    }

    #[test]
    fn missing_mandatory_key_is_an_error() {
        let dir = write_config("[telegram]\ntoken = t\n");
        let error = BridgeConfig::load(dir.path().join("config.ini")).unwrap_err();
        assert!(matches!(error, ConfigError::MissingOption { .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let error = BridgeConfig::load("/nonexistent/config.ini").unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
