//! # vizmse-core
//!
//! Session and rundown layer for the Vizrt Media Sequencer Engine.
//!
//! This crate provides:
//! - [`Mse`], a session over one PepTalk connection and the HTTP command
//!   interface, with automatic reconnect
//! - [`Rundown`], a show/playlist pair with internal and external elements
//! - XML flattening for the MSE's `<entry>` trees
//! - YAML/environment configuration

pub mod config;
pub mod error;
pub mod http;
pub mod mse;
pub mod reconnect;
pub mod rundown;
pub mod xml;

pub use config::{ConfigError, SessionConfig};
pub use error::MseError;
pub use http::{CommandResult, HttpClient, MseCommand, MseHttp};
pub use mse::{create_session, Mse, Playlist, Profile, Show, VizEngine};
pub use reconnect::Reconnector;
pub use rundown::{
    ChannelMapEntry, Element, ElementRef, ExternalElement, ExternalId, InternalElement,
    NewElement, Rundown, RundownInfo, RundownOptions,
};
pub use xml::{build_xml, entry_to_xml, flatten_entry, parse_xml, FlatEntry, FlatValue, XmlElement};

/// Prefix of show paths.
pub const SHOWS: &str = "/storage/shows";

/// Prefix of playlist paths.
pub const PLAYLISTS: &str = "/storage/playlists";

/// Prefix of profile paths.
pub const PROFILES: &str = "/config/profiles";

/// Strips an optional storage path prefix and enclosing braces from a show
/// or playlist id.
pub fn normalize_id(id: &str) -> String {
    let id = id.trim();
    let id = id
        .strip_prefix(SHOWS)
        .or_else(|| id.strip_prefix(PLAYLISTS))
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(id);
    let id = id.strip_prefix('{').unwrap_or(id);
    let id = id.strip_suffix('}').unwrap_or(id);
    id.to_string()
}

/// `/storage/shows/{<show>}`
pub fn show_path(show: &str) -> String {
    format!("{}/{{{}}}", SHOWS, show)
}

/// `/storage/playlists/{<playlist>}`
pub fn playlist_path(playlist: &str) -> String {
    format!("{}/{{{}}}", PLAYLISTS, playlist)
}

/// `/config/profiles/<profile>`
pub fn profile_path(profile: &str) -> String {
    format!("{}/{}", PROFILES, profile)
}

/// Profile name from a profile path (or a bare name).
pub fn profile_name(profile: &str) -> &str {
    let profile = profile.trim();
    profile
        .strip_prefix(PROFILES)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(profile)
}
