use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment names used by the existing CI jobs, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("TR_USER", "platform.username"),
    ("TR_PW", "platform.password"),
    ("TR_TOKEN", "platform.token"),
    ("COL_ID", "platform.default_collection"),
    ("OKAR_XSLT_ENGINE", "transform.engine"),
    ("SAXON_CP", "transform.saxon_classpath"),
    ("SAXON_JAVA_OPTS", "transform.java_opts"),
    ("BASEROW_URL", "metadata.base_url"),
    ("BASEROW_DB_ID", "metadata.database_id"),
    ("BASEROW_USER", "metadata.username"),
    ("BASEROW_PW", "metadata.password"),
    ("BASEROW_TOKEN", "metadata.token"),
];

fn legacy_key(name: &str) -> &'static str {
    LEGACY_ENV
        .iter()
        .find(|(env, _)| env.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
        .unwrap_or("unmapped")
}

fn legacy_env() -> Env {
    let names: Vec<&str> = LEGACY_ENV.iter().map(|(env, _)| *env).collect();
    Env::raw()
        .only(&names)
        .map(|name| legacy_key(name.as_str()).into())
}

fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(legacy_env())
        .merge(Env::prefixed("OKAR_").split("__"))
}

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    figment(Some(path))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from the environment alone, reading `path` only if it exists.
///
/// Stage binaries take no required flags, so a missing default config file is
/// not an error.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    let file = path.exists().then_some(path);
    figment(file)
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
