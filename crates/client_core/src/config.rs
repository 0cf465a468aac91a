use std::{fs, io, path::Path};

use livekit_integration::TrackSource;
use serde::Deserialize;

use crate::{error::SettingsError, session_registry::TrackFilter};

pub const DEFAULT_SETTINGS_FILE: &str = "voice_presence.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// Track sources that make a live participant visible in the sidebar.
    pub visible_sources: Vec<TrackSource>,
    pub only_subscribed: bool,
    pub log_filter: String,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            visible_sources: vec![TrackSource::Camera],
            only_subscribed: true,
            log_filter: "info".into(),
        }
    }
}

impl PresenceSettings {
    pub fn track_filter(&self) -> TrackFilter {
        TrackFilter {
            sources: self.visible_sources.clone(),
            only_subscribed: self.only_subscribed,
        }
    }
}

pub fn load_settings() -> Result<PresenceSettings, SettingsError> {
    load_settings_or_defaults(Path::new(DEFAULT_SETTINGS_FILE), |key| {
        std::env::var(key).ok()
    })
}

/// Defaults, then the TOML file at `path` if present, then environment overrides.
pub fn load_settings_or_defaults(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PresenceSettings, SettingsError> {
    let settings = read_settings_file(path)?.unwrap_or_default();
    finish_settings(settings, env)
}

/// Like [`load_settings_or_defaults`], but the file at `path` must exist.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PresenceSettings, SettingsError> {
    let settings = read_settings_file(path)?.ok_or_else(|| SettingsError::Missing {
        path: path.to_path_buf(),
    })?;
    finish_settings(settings, env)
}

fn read_settings_file(path: &Path) -> Result<Option<PresenceSettings>, SettingsError> {
    match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<PresenceSettings>(&raw)
            .map(Some)
            .map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SettingsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn finish_settings(
    mut settings: PresenceSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<PresenceSettings, SettingsError> {
    apply_env_overrides(&mut settings, env)?;

    if settings.visible_sources.is_empty() {
        return Err(SettingsError::InvalidValue {
            key: "visible_sources",
            value: String::new(),
            reason: "at least one track source is required".into(),
        });
    }

    Ok(settings)
}

fn apply_env_overrides(
    settings: &mut PresenceSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), SettingsError> {
    if let Some(v) = env("APP__VISIBLE_SOURCES") {
        settings.visible_sources = parse_sources(&v)?;
    }

    if let Some(v) = env("APP__ONLY_SUBSCRIBED") {
        settings.only_subscribed =
            v.trim()
                .parse::<bool>()
                .map_err(|err| SettingsError::InvalidValue {
                    key: "APP__ONLY_SUBSCRIBED",
                    value: v.clone(),
                    reason: err.to_string(),
                })?;
    }

    if let Some(v) = env("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    Ok(())
}

fn parse_sources(raw: &str) -> Result<Vec<TrackSource>, SettingsError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.parse::<TrackSource>()
                .map_err(|err| SettingsError::InvalidValue {
                    key: "APP__VISIBLE_SOURCES",
                    value: raw.to_string(),
                    reason: err.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
