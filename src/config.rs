use std::{
    env::{self, VarError},
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use rearch::CapsuleHandle;
use tracing::{info, instrument, warn};

pub const BASE_URL_VAR: &str = "SHORTENER_BASE_URL";
pub const TTL_SECONDS_VAR: &str = "SHORTENER_TTL_SECONDS";
pub const DEFAULT_MAX_CLICKS_VAR: &str = "SHORTENER_DEFAULT_MAX_CLICKS";
pub const CLEANUP_INTERVAL_SECONDS_VAR: &str = "SHORTENER_CLEANUP_INTERVAL_SECONDS";
pub const OWNER_FILE_VAR: &str = "SHORTENER_OWNER_FILE";
pub const OPEN_BROWSER_VAR: &str = "SHORTENER_OPEN_BROWSER";

const DEFAULT_BASE_URL: &str = "short";
const DEFAULT_TTL_SECONDS: u64 = 86_400;
const DEFAULT_MAX_CLICKS: u32 = 10;
const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 30;
const DEFAULT_OWNER_FILE: &str = ".quota-short/owner_uuid";

/// Settings read once at startup. Every field has a default, so loading never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub base_url: String,
    pub ttl_seconds: u64,
    pub default_max_clicks: u32,
    pub cleanup_interval_seconds: u64,
    pub owner_file: PathBuf,
    pub open_browser: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            default_max_clicks: DEFAULT_MAX_CLICKS,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            owner_file: resolve_owner_file(DEFAULT_OWNER_FILE, home_dir().as_deref()),
            open_browser: true,
        }
    }
}

impl AppConfig {
    /// Builds the config from the process environment.
    #[instrument]
    #[must_use]
    pub fn from_env() -> Self {
        let lookup = |name: &str| match env::var(name) {
            Ok(value) => Some(value),
            Err(VarError::NotPresent) => None,
            Err(VarError::NotUnicode(actual)) => {
                warn!(name, value = %actual.display(), "Ignoring non-unicode environment variable");
                None
            }
        };
        Self::from_lookup(lookup, home_dir().as_deref())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, home: Option<&Path>) -> Self {
        let base_url = lookup(BASE_URL_VAR)
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty())
            .unwrap_or_else(|| {
                warn!(
                    default = DEFAULT_BASE_URL,
                    "{BASE_URL_VAR} not set; defaulting to {DEFAULT_BASE_URL}"
                );
                DEFAULT_BASE_URL.to_owned()
            });

        let owner_file = lookup(OWNER_FILE_VAR)
            .filter(|raw| !raw.trim().is_empty())
            .map_or_else(
                || resolve_owner_file(DEFAULT_OWNER_FILE, home),
                |raw| resolve_owner_file(raw.trim(), home),
            );

        let config = Self {
            base_url,
            ttl_seconds: positive_setting(&lookup, TTL_SECONDS_VAR, DEFAULT_TTL_SECONDS),
            default_max_clicks: positive_setting(
                &lookup,
                DEFAULT_MAX_CLICKS_VAR,
                DEFAULT_MAX_CLICKS,
            ),
            cleanup_interval_seconds: positive_setting(
                &lookup,
                CLEANUP_INTERVAL_SECONDS_VAR,
                DEFAULT_CLEANUP_INTERVAL_SECONDS,
            ),
            owner_file,
            open_browser: setting(&lookup, OPEN_BROWSER_VAR, true, |_| true),
        };
        info!(?config, "Loaded configuration");
        config
    }
}

pub fn app_config_capsule(_: CapsuleHandle) -> AppConfig {
    AppConfig::from_env()
}

fn positive_setting<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr + Display + Default + PartialOrd + Copy,
{
    setting(lookup, name, default, |value| *value > T::default())
}

fn setting<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    is_valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Display,
{
    let Some(raw) = lookup(name) else {
        warn!(%default, "{name} not set; defaulting to {default}");
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if is_valid(&value) => value,
        _ => {
            warn!(value = %raw, %default, "{name} is invalid; defaulting to {default}");
            default
        }
    }
}

fn resolve_owner_file(raw: &str, home: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(raw);
    match home {
        Some(home) if path.is_relative() => home.join(path),
        _ => path,
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
