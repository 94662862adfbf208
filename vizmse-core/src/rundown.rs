//! Rundowns: a show's elements played out through a playlist.
//!
//! Internal elements live under the show and are addressed by name. External
//! elements are references in the playlist to a numeric id in an outside
//! database (optionally per channel); the name the MSE gives each reference
//! is tracked in the rundown's channel map.

use crate::error::MseError;
use crate::http::{CommandResult, MseCommand, MseHttp};
use crate::xml::{build_xml, flatten_entry, parse_xml, FlatEntry, FlatValue, XmlElement};
use crate::{normalize_id, playlist_path, show_path};
use indexmap::IndexMap;
use peptalk_client::PepTalkClient;
use peptalk_protocol::{Location, PepError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Path prefix of external element references.
pub const EXTERNAL_ELEMENTS: &str = "/external/pilotdb/elements";

/// Identity of an external element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalId {
    pub vcpid: u64,
    pub channel: Option<String>,
}

impl ExternalId {
    pub fn new(vcpid: u64, channel: Option<&str>) -> Self {
        Self {
            vcpid,
            channel: channel.map(str::to_string),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.channel {
            Some(channel) => write!(f, "{} on channel {}", self.vcpid, channel),
            None => write!(f, "{}", self.vcpid),
        }
    }
}

/// A tracked external reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapEntry {
    pub vcpid: u64,
    pub channel: Option<String>,
    /// Node name the MSE assigned to the reference. May contain `#`.
    pub reference: String,
}

/// Input to [`Rundown::create_element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewElement {
    /// A graphic fully described in the show.
    Internal {
        template: String,
        name: String,
        /// Values for the template's fields, in sorted field-name order.
        fields: Vec<String>,
        channel: Option<String>,
    },
    /// A reference to an element in the external database.
    External { vcpid: u64, channel: Option<String> },
}

/// Identifies an existing element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementRef {
    Internal(String),
    External(ExternalId),
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Internal(name) => write!(f, "'{}'", name),
            ElementRef::External(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalElement {
    pub name: String,
    /// Master template name, when the element references one.
    pub template: Option<String>,
    pub data: FlatEntry,
    pub channel: Option<String>,
    /// The complete flattened node.
    pub node: FlatEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalElement {
    pub vcpid: u64,
    pub channel: Option<String>,
    pub reference: String,
    pub attributes: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Internal(InternalElement),
    External(ExternalElement),
}

/// Identity of a rundown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RundownInfo {
    pub show: String,
    pub playlist: String,
    pub profile: String,
    pub description: String,
}

/// Per-rundown behaviour switches.
#[derive(Debug, Clone)]
pub struct RundownOptions {
    pub creator: String,
    pub build_channel_map: bool,
}

impl Default for RundownOptions {
    fn default() -> Self {
        Self {
            creator: "vizmse".to_string(),
            build_channel_map: true,
        }
    }
}

/// A show paired with a playlist and the profile that plays it out.
///
/// Cloning is cheap; clones share the channel map.
#[derive(Clone)]
pub struct Rundown {
    info: RundownInfo,
    creator: String,
    pep: PepTalkClient,
    http: Arc<dyn MseHttp>,
    // Not invalidated when other clients change the playlist.
    channel_map: Arc<parking_lot::Mutex<HashMap<ExternalId, ChannelMapEntry>>>,
}

impl fmt::Debug for Rundown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rundown").field("info", &self.info).finish()
    }
}

impl Rundown {
    /// Creates a rundown handle. Show and playlist ids may be given bare,
    /// braced, or as full storage paths.
    ///
    /// When `options.build_channel_map` is set and a tokio runtime is
    /// available, the channel map is built in the background; failures are
    /// only logged.
    pub fn new(
        info: RundownInfo,
        pep: PepTalkClient,
        http: Arc<dyn MseHttp>,
        options: RundownOptions,
    ) -> Self {
        let info = RundownInfo {
            show: normalize_id(&info.show),
            playlist: normalize_id(&info.playlist),
            ..info
        };
        let rundown = Self {
            info,
            creator: options.creator,
            pep,
            http,
            channel_map: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        };

        if options.build_channel_map {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let background = rundown.clone();
                handle.spawn(async move {
                    if let Err(e) = background.build_channel_map().await {
                        tracing::warn!(
                            "channel map build for playlist {} failed: {}",
                            background.info.playlist,
                            e
                        );
                    }
                });
            }
        }
        rundown
    }

    pub fn info(&self) -> &RundownInfo {
        &self.info
    }

    pub fn show(&self) -> &str {
        &self.info.show
    }

    pub fn playlist(&self) -> &str {
        &self.info.playlist
    }

    pub fn profile(&self) -> &str {
        &self.info.profile
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    // =========================================================================
    // Paths
    // =========================================================================

    fn show_elements_path(&self) -> String {
        format!("{}/elements", show_path(&self.info.show))
    }

    fn show_element_path(&self, name: &str) -> String {
        format!("{}/elements/{}", show_path(&self.info.show), name)
    }

    fn template_path(&self, template: &str) -> String {
        format!("{}/mastertemplates/{}", show_path(&self.info.show), template)
    }

    fn playlist_elements_path(&self) -> String {
        format!("{}/elements", playlist_path(&self.info.playlist))
    }

    fn playlist_element_path(&self, reference: &str) -> String {
        format!("{}/elements/{}", playlist_path(&self.info.playlist), reference)
    }

    // =========================================================================
    // Channel map
    // =========================================================================

    /// Rebuilds the channel map from the playlist's references.
    ///
    /// Returns the number of tracked references.
    pub async fn build_channel_map(&self) -> Result<usize, MseError> {
        let refs = self.external_refs().await?;
        let mut map = self.channel_map.lock();
        map.clear();
        for (id, element) in refs {
            map.insert(
                id,
                ChannelMapEntry {
                    vcpid: element.vcpid,
                    channel: element.channel,
                    reference: element.reference,
                },
            );
        }
        tracing::debug!(
            "channel map for playlist {} holds {} references",
            self.info.playlist,
            map.len()
        );
        Ok(map.len())
    }

    /// Snapshot of the channel map.
    pub fn channel_map(&self) -> Vec<ChannelMapEntry> {
        let mut entries: Vec<_> = self.channel_map.lock().values().cloned().collect();
        entries.sort_by(|a, b| (a.vcpid, &a.channel).cmp(&(b.vcpid, &b.channel)));
        entries
    }

    /// Looks up a reference name, rebuilding the map once on a miss.
    async fn resolve_reference(&self, id: &ExternalId) -> Result<String, MseError> {
        if let Some(entry) = self.channel_map.lock().get(id) {
            return Ok(entry.reference.clone());
        }
        self.build_channel_map().await?;
        self.channel_map
            .lock()
            .get(id)
            .map(|entry| entry.reference.clone())
            .ok_or_else(|| MseError::NotInRundown(id.to_string()))
    }

    /// Reads the playlist's references, two levels deep.
    async fn external_refs(&self) -> Result<Vec<(ExternalId, ExternalElement)>, MseError> {
        let response = self.pep.get(&self.playlist_elements_path(), Some(2)).await?;
        let elements = parse_xml(&response.body)?;

        let mut refs = Vec::new();
        for node in elements.children.iter().filter(|c| c.name == "ref") {
            let segment = node.text.trim().rsplit('/').next().unwrap_or_default();
            // Only the canonical decimal form names a vcpid: `/042` is not 42.
            let Some(vcpid) = segment
                .parse::<u64>()
                .ok()
                .filter(|vcpid| vcpid.to_string() == segment)
            else {
                tracing::debug!("skipping reference to {}", node.text);
                continue;
            };
            let channel = node
                .attribute("viz_program")
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            let reference = node.attribute("name").unwrap_or_default().to_string();
            refs.push((
                ExternalId {
                    vcpid,
                    channel: channel.clone(),
                },
                ExternalElement {
                    vcpid,
                    channel,
                    reference,
                    attributes: node.attributes.clone(),
                },
            ));
        }
        Ok(refs)
    }

    // =========================================================================
    // Elements
    // =========================================================================

    /// Creates an element and returns it as stored.
    pub async fn create_element(&self, element: NewElement) -> Result<Element, MseError> {
        match element {
            NewElement::Internal {
                template,
                name,
                fields,
                channel,
            } => self
                .create_internal(&template, &name, fields, channel)
                .await
                .map(Element::Internal),
            NewElement::External { vcpid, channel } => self
                .create_external(ExternalId { vcpid, channel })
                .await
                .map(Element::External),
        }
    }

    async fn create_internal(
        &self,
        template: &str,
        name: &str,
        fields: Vec<String>,
        channel: Option<String>,
    ) -> Result<InternalElement, MseError> {
        let path = self.show_element_path(name);
        match self.pep.get(&path, Some(0)).await {
            Ok(_) => return Err(MseError::ElementExists(format!("'{}'", name))),
            Err(e) => {
                let e = MseError::from(e);
                if !e.is_inexistent() {
                    return Err(e);
                }
            }
        }

        let mut names = self.field_names(template).await?;
        if fields.len() > names.len() {
            return Err(MseError::TooManyFields {
                template: template.to_string(),
                given: fields.len(),
                declared: names.len(),
            });
        }
        names.sort();

        let mut data = XmlElement::new("entry").with_attribute("name", "data");
        for (i, field) in names.iter().enumerate() {
            let value = fields.get(i).cloned().unwrap_or_default();
            data = data.with_child(
                XmlElement::new("entry")
                    .with_attribute("name", field)
                    .with_text(value),
            );
        }

        let mut node = XmlElement::new("element")
            .with_attribute("name", name)
            .with_attribute("guid", uuid::Uuid::new_v4().to_string())
            .with_attribute("updated", chrono::Utc::now().to_rfc3339())
            .with_attribute("creator", &self.creator)
            .with_child(
                XmlElement::new("ref")
                    .with_attribute("name", "master_template")
                    .with_text(self.template_path(template)),
            )
            .with_child(XmlElement::new("entry").with_attribute("name", "default_alternatives"))
            .with_child(data);
        if let Some(channel) = &channel {
            node = node.with_child(
                XmlElement::new("entry")
                    .with_attribute("name", "channel")
                    .with_text(channel),
            );
        }

        self.pep
            .insert(&path, &build_xml(&node), Location::Last, None)
            .await?;
        tracing::debug!("created internal element {} from {}", name, template);

        Ok(internal_element(name, &node))
    }

    /// Field names declared by a master template's `model_xml` schema.
    async fn field_names(&self, template: &str) -> Result<Vec<String>, MseError> {
        let response = self.pep.get(&self.template_path(template), None).await?;
        let node = parse_xml(&response.body)?;
        let unknown = || MseError::UnknownFieldSchema(template.to_string());

        let model = node
            .descendants("entry")
            .into_iter()
            .find(|e| e.attribute("name") == Some("model_xml"))
            .filter(|e| !e.text.trim().is_empty())
            .ok_or_else(unknown)?;
        let schema = parse_xml(&model.text).map_err(|_| unknown())?;
        let names: Vec<String> = schema
            .descendants("fielddef")
            .into_iter()
            .filter_map(|f| f.attribute("name").map(str::to_string))
            .collect();
        if names.is_empty() {
            return Err(unknown());
        }
        Ok(names)
    }

    async fn create_external(&self, id: ExternalId) -> Result<ExternalElement, MseError> {
        // A miss is confirmed against the playlist before inserting.
        if !self.channel_map.lock().contains_key(&id) {
            self.build_channel_map().await?;
        }
        if self.channel_map.lock().contains_key(&id) {
            return Err(MseError::ElementExists(id.to_string()));
        }

        let mut node = XmlElement::new("ref")
            .with_attribute("available", "0.00")
            .with_attribute("loaded", "0.00")
            .with_attribute("take_count", "0");
        if let Some(channel) = &id.channel {
            node = node.with_attribute("viz_program", channel);
        }
        node = node.with_text(format!("{}/{}", EXTERNAL_ELEMENTS, id.vcpid));

        let response = self
            .pep
            .insert(
                &format!("{}/", self.playlist_elements_path()),
                &build_xml(&node),
                Location::Last,
                None,
            )
            .await?;
        let reference = response
            .body
            .trim()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        tracing::debug!("external element {} registered as {}", id, reference);

        self.channel_map.lock().insert(
            id.clone(),
            ChannelMapEntry {
                vcpid: id.vcpid,
                channel: id.channel.clone(),
                reference: reference.clone(),
            },
        );

        Ok(ExternalElement {
            vcpid: id.vcpid,
            channel: id.channel,
            reference,
            attributes: node.attributes,
        })
    }

    /// Internal element names followed by external references.
    pub async fn list_elements(&self) -> Result<Vec<ElementRef>, MseError> {
        let response = self.pep.get(&self.show_elements_path(), Some(1)).await?;
        let show = parse_xml(&response.body)?;
        let mut elements: Vec<ElementRef> = show
            .children
            .iter()
            .filter_map(|c| c.attribute("name"))
            .map(|name| ElementRef::Internal(name.to_string()))
            .collect();

        elements.extend(
            self.external_refs()
                .await?
                .into_iter()
                .map(|(id, _)| ElementRef::External(id)),
        );
        Ok(elements)
    }

    pub async fn get_element(&self, element: &ElementRef) -> Result<Element, MseError> {
        match element {
            ElementRef::Internal(name) => {
                let response = self.pep.get(&self.show_element_path(name), None).await?;
                let node = parse_xml(&response.body)?;
                Ok(Element::Internal(internal_element(name, &node)))
            }
            ElementRef::External(id) => self
                .external_refs()
                .await?
                .into_iter()
                .map(|(_, element)| element)
                .find(|e| {
                    // The vcpid is the canonical last segment of the target.
                    e.vcpid == id.vcpid && (id.channel.is_none() || e.channel == id.channel)
                })
                .map(Element::External)
                .ok_or_else(|| {
                    PepError::inexistent(format!(
                        "{}/{}",
                        self.playlist_elements_path(),
                        id.vcpid
                    ))
                    .into()
                }),
        }
    }

    /// Deletes an element. External references are deleted by their
    /// unescaped node name.
    pub async fn delete_element(&self, element: &ElementRef) -> Result<(), MseError> {
        match element {
            ElementRef::Internal(name) => {
                self.pep.delete(&self.show_element_path(name)).await?;
            }
            ElementRef::External(id) => {
                let reference = self.resolve_reference(id).await?;
                self.pep
                    .delete(&self.playlist_element_path(&reference))
                    .await?;
                self.channel_map.lock().remove(id);
            }
        }
        tracing::debug!("deleted element {}", element);
        Ok(())
    }

    // =========================================================================
    // Playout
    // =========================================================================

    /// Path the HTTP interface uses for an element.
    async fn command_path(&self, element: &ElementRef) -> Result<String, MseError> {
        match element {
            ElementRef::Internal(name) => Ok(self.show_element_path(name)),
            ElementRef::External(id) => {
                let reference = self.resolve_reference(id).await?;
                Ok(self.playlist_element_path(&reference.replace('#', "%23")))
            }
        }
    }

    /// Sends a playout command for an element through the rundown's profile.
    pub async fn command(
        &self,
        command: MseCommand,
        element: &ElementRef,
    ) -> Result<CommandResult, MseError> {
        let path = self.command_path(element).await?;
        self.http.command(&self.info.profile, command, &path).await
    }

    pub async fn cue(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::Cue, element).await
    }

    pub async fn take(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::Take, element).await
    }

    pub async fn continue_element(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::Continue, element).await
    }

    pub async fn continue_reverse(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::ContinueReverse, element).await
    }

    pub async fn out(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::Out, element).await
    }

    pub async fn initialize(&self, element: &ElementRef) -> Result<CommandResult, MseError> {
        self.command(MseCommand::Initialize, element).await
    }

    pub async fn initialize_show(&self) -> Result<CommandResult, MseError> {
        self.http
            .initialize_show(&self.info.profile, &self.info.show)
            .await
    }

    pub async fn initialize_playlist(&self) -> Result<CommandResult, MseError> {
        self.http
            .initialize_playlist(&self.info.profile, &self.info.playlist)
            .await
    }

    pub async fn cleanup_show(&self) -> Result<CommandResult, MseError> {
        self.http
            .cleanup_show(&self.info.profile, &self.info.show)
            .await
    }

    pub async fn cleanup_playlist(&self) -> Result<CommandResult, MseError> {
        self.http
            .cleanup_playlist(&self.info.profile, &self.info.playlist)
            .await
    }

    /// Initializes the show, then the playlist. With `twice`, the pair is
    /// sent once more beforehand.
    pub async fn activate(&self, twice: bool) -> Result<CommandResult, MseError> {
        if twice {
            self.initialize_show().await?;
            self.initialize_playlist().await?;
        }
        self.initialize_show().await?;
        self.initialize_playlist().await
    }

    /// Cleans up the playlist, then the show.
    pub async fn deactivate(&self) -> Result<CommandResult, MseError> {
        self.cleanup_playlist().await?;
        self.cleanup_show().await
    }

    /// Returns whether the playlist is active on this rundown's profile.
    pub async fn is_active(&self) -> Result<bool, MseError> {
        let path = format!("{}/active_profile", playlist_path(&self.info.playlist));
        let response = match self.pep.get(&path, None).await {
            Ok(response) => response,
            Err(e) => {
                let e = MseError::from(e);
                if e.is_inexistent() {
                    return Ok(false);
                }
                return Err(e);
            }
        };
        let node = parse_xml(&response.body)?;
        let active = node.text.trim();
        Ok(!active.is_empty() && crate::profile_name(active) == self.info.profile)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Removes elements from the rundown.
    ///
    /// Show elements are always wiped. With `keep`, every tracked external
    /// reference not listed is deleted (references already gone are
    /// ignored); without, the playlist's elements are wiped too.
    pub async fn purge(&self, keep: Option<&[ExternalId]>) -> Result<(), MseError> {
        self.pep
            .replace(&self.show_elements_path(), "<elements/>")
            .await?;

        match keep {
            Some(keep) => {
                self.build_channel_map().await?;
                for entry in self.channel_map() {
                    let id = ExternalId {
                        vcpid: entry.vcpid,
                        channel: entry.channel.clone(),
                    };
                    if keep.contains(&id) {
                        continue;
                    }
                    match self
                        .pep
                        .delete(&self.playlist_element_path(&entry.reference))
                        .await
                    {
                        Ok(_) => {}
                        Err(e) => {
                            let e = MseError::from(e);
                            if !e.is_inexistent() {
                                return Err(e);
                            }
                            tracing::debug!("reference {} already gone", entry.reference);
                        }
                    }
                    self.channel_map.lock().remove(&id);
                }
            }
            None => {
                self.pep
                    .replace(&self.playlist_elements_path(), "<elements/>")
                    .await?;
                self.channel_map.lock().clear();
            }
        }
        Ok(())
    }

    // =========================================================================
    // Templates
    // =========================================================================

    /// Names of the show's master templates.
    pub async fn list_templates(&self) -> Result<Vec<String>, MseError> {
        let path = format!("{}/mastertemplates", show_path(&self.info.show));
        let response = self.pep.get(&path, Some(1)).await?;
        let node = parse_xml(&response.body)?;
        Ok(node
            .children
            .iter()
            .filter_map(|c| c.attribute("name"))
            .map(str::to_string)
            .collect())
    }

    pub async fn get_template(&self, name: &str) -> Result<FlatEntry, MseError> {
        let response = self.pep.get(&self.template_path(name), None).await?;
        Ok(flatten_entry(&parse_xml(&response.body)?))
    }
}

fn internal_element(name: &str, node: &XmlElement) -> InternalElement {
    let flat = flatten_entry(node);
    let template = flat
        .get("master_template")
        .and_then(FlatValue::as_text)
        .and_then(|path| path.rsplit('/').next())
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let data: FlatEntry = flat
        .get("data")
        .and_then(FlatValue::as_entry)
        .map(|data| {
            data.iter()
                .filter(|(k, _)| k.as_str() != "name")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    let channel = flat
        .get("channel")
        .and_then(FlatValue::as_text)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    InternalElement {
        name: name.to_string(),
        template,
        data,
        channel,
        node: flat,
    }
}
