//! Named configuration profiles.
//!
//! Profiles are embedded at compile time from `contrib/profiles/*.toml` and
//! parsed once into a read-only table.

use crate::config::{ConfigError, LivenessConfig};
use serde::Deserialize;
use std::sync::OnceLock;

pub const DEFAULT_PROFILE: &str = "default";

const PROFILE_SOURCES: [(&str, &str); 4] = [
    ("default", include_str!("../../../contrib/profiles/default.toml")),
    ("server", include_str!("../../../contrib/profiles/server.toml")),
    ("bench", include_str!("../../../contrib/profiles/bench.toml")),
    ("loose", include_str!("../../../contrib/profiles/loose.toml")),
];

static PROFILE_DB: OnceLock<Vec<Profile>> = OnceLock::new();

/// One profile file.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub profile: ProfileInfo,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// `[profile]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn profile_db() -> &'static Vec<Profile> {
    PROFILE_DB.get_or_init(|| {
        let mut db = Vec::new();
        for (file, src) in PROFILE_SOURCES {
            match toml::from_str::<Profile>(src) {
                Ok(p) => match p.liveness.validate() {
                    Ok(()) => db.push(p),
                    Err(e) => tracing::error!(file, error = %e, "invalid embedded profile"),
                },
                Err(e) => tracing::error!(file, error = %e, "bad profile TOML"),
            }
        }
        db
    })
}

/// Look up a profile by name.
pub fn lookup_profile(name: &str) -> Option<&'static Profile> {
    profile_db().iter().find(|p| p.profile.name == name)
}

/// All embedded profiles, in declaration order.
pub fn list_profiles() -> &'static [Profile] {
    profile_db()
}

/// Configuration of the named profile.
pub fn profile_config(name: &str) -> Result<LivenessConfig, ConfigError> {
    lookup_profile(name)
        .map(|p| p.liveness.clone())
        .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
}
