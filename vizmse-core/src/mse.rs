//! MSE sessions.
//!
//! A session owns one PepTalk connection and one HTTP command client. It
//! watches the connection and reconnects after the configured delay when
//! the transport drops.

use crate::config::SessionConfig;
use crate::error::MseError;
use crate::http::{HttpClient, MseHttp};
use crate::reconnect::Reconnector;
use crate::rundown::{Rundown, RundownInfo, RundownOptions};
use crate::xml::{build_xml, flatten_entry, parse_xml, FlatEntry, XmlElement};
use crate::{normalize_id, playlist_path, profile_name, profile_path, show_path, PLAYLISTS};
use peptalk_client::{ConnectionEvent, PepTalkClient};
use peptalk_protocol::{Location, Response};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A show in `/storage/shows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Show {
    pub id: String,
    pub node: FlatEntry,
}

/// A playlist in `/storage/playlists`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub description: Option<String>,
    /// Profile name the playlist is bound to.
    pub profile: Option<String>,
    /// Show id from the playlist's environment.
    pub show: Option<String>,
    pub active_profile: Option<String>,
    pub node: FlatEntry,
}

impl Playlist {
    fn from_element(element: &XmlElement) -> Option<Self> {
        let id = normalize_id(element.attribute("name")?);
        let text_of = |name: &str| {
            element
                .child_named(name)
                .map(|c| c.text.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        };
        let show = element
            .child_named("environment")
            .and_then(|env| env.child_named("show"))
            .map(|show| show.text.trim())
            .filter(|s| !s.is_empty())
            .map(normalize_id);

        Some(Self {
            id,
            description: element.attribute("description").map(str::to_string),
            profile: element
                .attribute("profile")
                .filter(|p| !p.is_empty())
                .map(|p| profile_name(p).to_string()),
            show,
            active_profile: text_of("active_profile").map(|p| profile_name(&p).to_string()),
            node: flatten_entry(element),
        })
    }
}

/// A playout profile in `/config/profiles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub node: FlatEntry,
}

/// A Viz Engine handler from `/scheduler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VizEngine {
    pub name: String,
    pub node: FlatEntry,
}

/// Connects a new session.
pub async fn create_session(config: SessionConfig) -> Result<Mse, MseError> {
    Mse::connect(config).await
}

/// A session with one Media Sequencer Engine.
pub struct Mse {
    config: SessionConfig,
    pep: PepTalkClient,
    http: Arc<HttpClient>,
    reconnector: Arc<Reconnector>,
    closing: Arc<AtomicBool>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Mse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mse")
            .field("host", &self.config.host)
            .field("peptalk_port", &self.config.peptalk_port)
            .field("connected", &self.pep.is_connected())
            .finish()
    }
}

impl Mse {
    /// Builds the clients and connects.
    ///
    /// A failed first connect is logged and retried in the background; the
    /// session is returned either way.
    pub async fn connect(config: SessionConfig) -> Result<Self, MseError> {
        config.validate()?;

        let pep = PepTalkClient::new(config.connection_config());
        let http = Arc::new(
            HttpClient::with_base_url(config.rest_base_url()).with_timeout(config.request_timeout()),
        );
        let mse = Self {
            reconnector: Arc::new(Reconnector::new(config.reconnect_delay())),
            closing: Arc::new(AtomicBool::new(false)),
            watcher: parking_lot::Mutex::new(None),
            config,
            pep,
            http,
        };
        mse.start_watcher();

        mse.reconnector.record_attempt();
        let addr = mse.pep.connection().config().addr();
        match mse.pep.connect(mse.config.noevents).await {
            Ok(response) => tracing::info!("Connected to {} ({})", addr, response.body),
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", addr, e);
                mse.schedule_reconnect();
            }
        }
        Ok(mse)
    }

    fn start_watcher(&self) {
        let mut events = self.pep.subscribe();
        let pep = self.pep.clone();
        let reconnector = self.reconnector.clone();
        let closing = self.closing.clone();
        let noevents = self.config.noevents;

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Closed) => {
                        if closing.load(Ordering::SeqCst) {
                            continue;
                        }
                        tracing::info!("Connection lost, scheduling reconnect");
                        reconnect_with(&reconnector, pep.clone(), noevents);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("event watcher lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.watcher.lock() = Some(task);
    }

    fn schedule_reconnect(&self) {
        if !self.closing.load(Ordering::SeqCst) {
            reconnect_with(&self.reconnector, self.pep.clone(), self.config.noevents);
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The PepTalk client.
    pub fn peptalk(&self) -> &PepTalkClient {
        &self.pep
    }

    /// The HTTP command client.
    pub fn http(&self) -> Arc<HttpClient> {
        self.http.clone()
    }

    /// Connection lifecycle and server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.pep.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.pep.is_connected()
    }

    pub fn timeout(&self) -> Duration {
        self.pep.timeout()
    }

    /// Sets the timeout of PepTalk requests and HTTP commands.
    pub fn set_timeout(&self, timeout: Duration) -> Duration {
        self.http.set_timeout(timeout);
        self.pep.set_timeout(timeout)
    }

    pub async fn ping(&self) -> Result<Response, MseError> {
        Ok(self.pep.ping().await?)
    }

    /// Stops reconnecting and closes the connection.
    pub async fn close(&self) -> Result<(), MseError> {
        self.closing.store(true, Ordering::SeqCst);
        self.reconnector.cancel();
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        if self.pep.is_connected() {
            self.pep.close().await?;
        }
        tracing::info!("Session closed");
        Ok(())
    }

    fn rundown_options(&self) -> RundownOptions {
        RundownOptions {
            creator: self.config.creator.clone(),
            build_channel_map: self.config.build_channel_map_on_create,
        }
    }

    fn rundown(&self, info: RundownInfo) -> Rundown {
        Rundown::new(
            info,
            self.pep.clone(),
            self.http.clone() as Arc<dyn MseHttp>,
            self.rundown_options(),
        )
    }

    // =========================================================================
    // Shows, playlists, profiles, engines
    // =========================================================================

    pub async fn list_shows(&self) -> Result<Vec<Show>, MseError> {
        let response = self.pep.get(crate::SHOWS, Some(1)).await?;
        let shows = parse_xml(&response.body)?;
        Ok(shows
            .children
            .iter()
            .filter_map(|show| {
                Some(Show {
                    id: normalize_id(show.attribute("name")?),
                    node: flatten_entry(show),
                })
            })
            .collect())
    }

    /// Fetches one show, one level deep.
    pub async fn get_show(&self, show: &str) -> Result<Show, MseError> {
        let id = normalize_id(show);
        let response = match self.pep.get(&show_path(&id), Some(1)).await {
            Ok(response) => response,
            Err(e) => {
                let e = MseError::from(e);
                return Err(if e.is_inexistent() {
                    MseError::ShowNotFound(id)
                } else {
                    e
                });
            }
        };
        let node = parse_xml(&response.body)?;
        Ok(Show {
            id,
            node: flatten_entry(&node),
        })
    }

    pub async fn list_playlists(&self) -> Result<Vec<Playlist>, MseError> {
        let response = self.pep.get(PLAYLISTS, Some(3)).await?;
        let playlists = parse_xml(&response.body)?;
        Ok(playlists
            .children
            .iter()
            .filter_map(Playlist::from_element)
            .collect())
    }

    pub async fn get_playlist(&self, playlist: &str) -> Result<Playlist, MseError> {
        let id = normalize_id(playlist);
        let response = self.pep.get(&playlist_path(&id), None).await?;
        let node = parse_xml(&response.body)?;
        Playlist::from_element(&node)
            .ok_or_else(|| MseError::Xml(format!("playlist {} has no name", id)))
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>, MseError> {
        let response = self.pep.get(crate::PROFILES, Some(1)).await?;
        let profiles = parse_xml(&response.body)?;
        Ok(profiles
            .children
            .iter()
            .filter_map(|profile| {
                Some(Profile {
                    name: profile.attribute("name")?.to_string(),
                    node: flatten_entry(profile),
                })
            })
            .collect())
    }

    pub async fn get_profile(&self, profile: &str) -> Result<Profile, MseError> {
        let name = profile_name(profile).to_string();
        let response = match self.pep.get(&profile_path(&name), None).await {
            Ok(response) => response,
            Err(e) => {
                let e = MseError::from(e);
                return Err(if e.is_inexistent() {
                    MseError::ProfileNotFound(name)
                } else {
                    e
                });
            }
        };
        let node = parse_xml(&response.body)?;
        Ok(Profile {
            name,
            node: flatten_entry(&node),
        })
    }

    /// Viz Engine handlers known to the scheduler.
    pub async fn get_engines(&self) -> Result<Vec<VizEngine>, MseError> {
        let response = self.pep.get("/scheduler", None).await?;
        let scheduler = parse_xml(&response.body)?;
        Ok(scheduler
            .descendants("handler")
            .into_iter()
            .filter(|h| h.attribute("type") == Some("viz"))
            .filter_map(|h| {
                Some(VizEngine {
                    name: h.attribute("name")?.to_string(),
                    node: flatten_entry(h),
                })
            })
            .collect())
    }

    // =========================================================================
    // Rundowns
    // =========================================================================

    /// Playlists that name both a show and a profile.
    pub async fn list_rundowns(&self) -> Result<Vec<Rundown>, MseError> {
        Ok(self
            .list_playlists()
            .await?
            .into_iter()
            .filter_map(|p| {
                Some(RundownInfo {
                    show: p.show?,
                    profile: p.profile?,
                    description: p.description.unwrap_or_default(),
                    playlist: p.id,
                })
            })
            .map(|info| self.rundown(info))
            .collect())
    }

    pub async fn get_rundown(&self, playlist: &str) -> Result<Rundown, MseError> {
        let playlist = self.get_playlist(playlist).await?;
        let show = playlist
            .show
            .ok_or_else(|| MseError::ShowNotFound(format!("for playlist {}", playlist.id)))?;
        let profile = playlist
            .profile
            .ok_or_else(|| MseError::ProfileNotFound(format!("for playlist {}", playlist.id)))?;
        Ok(self.rundown(RundownInfo {
            show,
            playlist: playlist.id,
            profile,
            description: playlist.description.unwrap_or_default(),
        }))
    }

    /// Creates a playlist for `show` played out through `profile`.
    ///
    /// A playlist id is generated when none is given.
    pub async fn create_rundown(
        &self,
        show: &str,
        profile: &str,
        playlist: Option<&str>,
        description: Option<&str>,
    ) -> Result<Rundown, MseError> {
        let show = self.get_show(show).await?.id;
        let profile = self.get_profile(profile).await?.name;
        let id = match playlist {
            Some(id) => normalize_id(id),
            None => uuid::Uuid::new_v4().to_string().to_uppercase(),
        };
        let path = playlist_path(&id);

        match self.pep.get(&path, Some(0)).await {
            Ok(_) => return Err(MseError::RundownExists(id)),
            Err(e) => {
                let e = MseError::from(e);
                if !e.is_inexistent() {
                    return Err(e);
                }
            }
        }

        let description = description.unwrap_or_default().to_string();
        let node = XmlElement::new("playlist")
            .with_attribute("description", &description)
            .with_attribute("modified", chrono::Utc::now().to_rfc3339())
            .with_attribute("profile", profile_path(&profile))
            .with_attribute("name", format!("{{{}}}", id))
            .with_child(XmlElement::new("elements"))
            .with_child(
                XmlElement::new("entry")
                    .with_attribute("name", "environment")
                    .with_child(
                        XmlElement::new("entry")
                            .with_attribute("name", "show")
                            .with_text(show_path(&show)),
                    ),
            )
            .with_child(
                XmlElement::new("entry")
                    .with_attribute("name", "cursors")
                    .with_child(XmlElement::new("entry").with_attribute("name", "globals")),
            );

        self.pep
            .insert(&path, &build_xml(&node), Location::Last, None)
            .await?;
        tracing::info!("Created rundown {} for show {} on {}", id, show, profile);

        Ok(self.rundown(RundownInfo {
            show,
            playlist: id,
            profile,
            description,
        }))
    }

    /// Deactivates the rundown if it is active, then deletes its playlist.
    pub async fn delete_rundown(&self, rundown: &Rundown) -> Result<(), MseError> {
        if rundown.is_active().await? {
            rundown.deactivate().await?;
        }
        self.pep.delete(&playlist_path(rundown.playlist())).await?;
        tracing::info!("Deleted rundown {}", rundown.playlist());
        Ok(())
    }
}

impl Drop for Mse {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}

fn reconnect_with(reconnector: &Reconnector, pep: PepTalkClient, noevents: bool) {
    reconnector.schedule(move || {
        let pep = pep.clone();
        async move {
            if pep.is_connected() {
                return true;
            }
            match pep.connect(noevents).await {
                Ok(_) => {
                    tracing::info!("Reconnected");
                    true
                }
                Err(e) => {
                    tracing::warn!("Reconnect failed: {}", e);
                    false
                }
            }
        }
    });
}
