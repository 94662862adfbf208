//! Rundown workflows against the mock PepTalk server and a recording HTTP
//! command client.

use async_trait::async_trait;
use peptalk_client::mock::{MockReply, MockServer};
use peptalk_client::PepTalkClient;
use peptalk_protocol::{unescape, ErrorKind, PepError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vizmse_core::{
    build_xml, CommandResult, Element, ElementRef, ExternalId, MseCommand, MseError, MseHttp,
    NewElement, Rundown, RundownInfo, RundownOptions, XmlElement,
};

// =========================================================================
// Test doubles
// =========================================================================

#[derive(Default)]
struct RecordingHttp {
    calls: Mutex<Vec<(String, MseCommand, String)>>,
}

impl RecordingHttp {
    fn calls(&self) -> Vec<(String, MseCommand, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MseHttp for RecordingHttp {
    async fn command(
        &self,
        profile: &str,
        command: MseCommand,
        path: &str,
    ) -> Result<CommandResult, MseError> {
        self.calls
            .lock()
            .unwrap()
            .push((profile.to_string(), command, path.to_string()));
        Ok(CommandResult {
            status: 200,
            response: String::new(),
        })
    }
}

const PLAYLIST_ELEMENTS: &str = "get /storage/playlists/{PL}/elements 2";

fn refs_body() -> String {
    [
        "<elements>",
        "<ref name=\"3\" available=\"0.00\" loaded=\"0.00\" take_count=\"0\" viz_program=\"FULL1\">/external/pilotdb/elements/42</ref>",
        "<ref name=\"3#2\" viz_program=\"FULL1\">/external/pilotdb/elements/43</ref>",
        "<ref name=\"5\">/external/pilotdb/elements/44</ref>",
        "</elements>",
    ]
    .concat()
}

/// Starts a mock MSE answering the playlist reference listing, plus
/// whatever `extra` handles. Everything else gets `ok`.
async fn mse<F>(extra: F) -> MockServer
where
    F: Fn(u64, &str) -> Option<MockReply> + Send + Sync + 'static,
{
    MockServer::start(move |id, text| {
        let command = unescape(text);
        if let Some(reply) = extra(id, &command) {
            return reply;
        }
        if command == PLAYLIST_ELEMENTS {
            return MockReply::ok(id, &refs_body());
        }
        MockReply::default_for(id, text)
    })
    .await
    .unwrap()
}

async fn setup(server: &MockServer, build_channel_map: bool) -> (Rundown, Arc<RecordingHttp>) {
    let pep = PepTalkClient::new(server.config());
    pep.connect(true).await.unwrap();
    let http = Arc::new(RecordingHttp::default());
    let rundown = Rundown::new(
        RundownInfo {
            show: "/storage/shows/{SHOW}".into(),
            playlist: "{PL}".into(),
            profile: "STUDIO".into(),
            description: "test".into(),
        },
        pep,
        http.clone(),
        RundownOptions {
            creator: "test".into(),
            build_channel_map,
        },
    );
    (rundown, http)
}

fn received(server: &MockServer) -> Vec<String> {
    server.received().iter().map(|t| unescape(t)).collect()
}

fn ext(vcpid: u64, channel: Option<&str>) -> ElementRef {
    ElementRef::External(ExternalId::new(vcpid, channel))
}

// =========================================================================
// Construction
// =========================================================================

#[tokio::test]
async fn test_ids_are_normalized() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;
    assert_eq!(rundown.show(), "SHOW");
    assert_eq!(rundown.playlist(), "PL");
    assert_eq!(rundown.profile(), "STUDIO");
}

#[tokio::test]
async fn test_background_channel_map_build() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, true).await;

    let built = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if rundown.channel_map().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(built.is_ok());
    assert_eq!(rundown.channel_map()[0].reference, "3");
}

#[tokio::test]
async fn test_background_build_failure_is_not_fatal() {
    let server = mse(|id, cmd| {
        (cmd == PLAYLIST_ELEMENTS).then(|| MockReply::error(id, "inexistent", "/storage/playlists/{PL}/elements"))
    })
    .await;
    let (rundown, _) = setup(&server, true).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rundown.channel_map().is_empty());
}

// =========================================================================
// External elements
// =========================================================================

#[tokio::test]
async fn test_external_element_lifecycle() {
    let server = mse(|id, cmd| cmd.starts_with("insert ").then(|| MockReply::ok(id, "3#4"))).await;
    let (rundown, http) = setup(&server, false).await;

    let created = rundown
        .create_element(NewElement::External {
            vcpid: 42,
            channel: Some("FULL2".into()),
        })
        .await
        .unwrap();
    match created {
        Element::External(e) => {
            assert_eq!(e.vcpid, 42);
            assert_eq!(e.reference, "3#4");
            assert_eq!(e.attributes.get("viz_program").map(String::as_str), Some("FULL2"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(received(&server).contains(
        &"insert /storage/playlists/{PL}/elements/ last <ref available=\"0.00\" loaded=\"0.00\" take_count=\"0\" viz_program=\"FULL2\">/external/pilotdb/elements/42</ref>"
            .to_string()
    ));

    let element = ext(42, Some("FULL2"));
    rundown.cue(&element).await.unwrap();
    rundown.take(&element).await.unwrap();
    assert_eq!(
        http.calls(),
        vec![
            (
                "STUDIO".to_string(),
                MseCommand::Cue,
                "/storage/playlists/{PL}/elements/3%234".to_string()
            ),
            (
                "STUDIO".to_string(),
                MseCommand::Take,
                "/storage/playlists/{PL}/elements/3%234".to_string()
            ),
        ]
    );

    rundown.delete_element(&element).await.unwrap();
    assert!(received(&server).contains(&"delete /storage/playlists/{PL}/elements/3#4".to_string()));
    assert!(!rundown
        .channel_map()
        .iter()
        .any(|e| e.vcpid == 42 && e.channel.as_deref() == Some("FULL2")));
}

#[tokio::test]
async fn test_duplicate_external_rejected_before_insert() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;
    assert_eq!(rundown.build_channel_map().await.unwrap(), 3);

    let err = rundown
        .create_element(NewElement::External {
            vcpid: 42,
            channel: Some("FULL1".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MseError::ElementExists(_)));
    assert!(!received(&server).iter().any(|c| c.starts_with("insert")));
}

#[tokio::test]
async fn test_duplicate_external_detected_without_built_map() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;
    assert!(rundown.channel_map().is_empty());

    let err = rundown
        .create_element(NewElement::External {
            vcpid: 42,
            channel: Some("FULL1".into()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MseError::ElementExists(_)));
    assert!(received(&server).contains(&PLAYLIST_ELEMENTS.to_string()));
    assert!(!received(&server).iter().any(|c| c.starts_with("insert")));
}

#[tokio::test]
async fn test_external_vcpid_must_match_exactly() {
    let server = mse(|id, cmd| {
        (cmd == PLAYLIST_ELEMENTS).then(|| {
            MockReply::ok(
                id,
                "<elements><ref name=\"7\" viz_program=\"FULL1\">/external/pilotdb/elements/042</ref></elements>",
            )
        })
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    assert_eq!(rundown.build_channel_map().await.unwrap(), 0);
    let err = rundown.get_element(&ext(42, None)).await.unwrap_err();
    assert!(err.is_inexistent());
}

#[tokio::test]
async fn test_get_missing_external_element_is_inexistent() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;

    let err = rundown.get_element(&ext(999, None)).await.unwrap_err();
    assert_eq!(err.pep_kind(), Some(ErrorKind::Inexistent));
    match err {
        MseError::Pep(PepError::Inexistent { path, .. }) => {
            assert_eq!(path, "/storage/playlists/{PL}/elements/999")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_get_external_element_matches_channel() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;

    match rundown.get_element(&ext(43, Some("FULL1"))).await.unwrap() {
        Element::External(e) => assert_eq!(e.reference, "3#2"),
        other => panic!("unexpected {:?}", other),
    }
    match rundown.get_element(&ext(44, None)).await.unwrap() {
        Element::External(e) => {
            assert_eq!(e.reference, "5");
            assert_eq!(e.channel, None);
        }
        other => panic!("unexpected {:?}", other),
    }
    let err = rundown
        .get_element(&ext(42, Some("FULL2")))
        .await
        .unwrap_err();
    assert!(err.is_inexistent());
}

#[tokio::test]
async fn test_unknown_external_command_is_not_in_rundown() {
    let server = mse(|_, _| None).await;
    let (rundown, http) = setup(&server, false).await;

    let err = rundown.take(&ext(77, Some("FULL1"))).await.unwrap_err();
    assert!(matches!(err, MseError::NotInRundown(_)));
    assert!(http.calls().is_empty());
    // The map was rebuilt on the miss.
    assert!(received(&server).contains(&PLAYLIST_ELEMENTS.to_string()));
}

#[tokio::test]
async fn test_list_elements_merges_show_and_playlist() {
    let server = mse(|id, cmd| {
        (cmd == "get /storage/shows/{SHOW}/elements 1").then(|| {
            MockReply::ok(
                id,
                "<elements><element name=\"a\"/><element name=\"b\"/></elements>",
            )
        })
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    assert_eq!(
        rundown.list_elements().await.unwrap(),
        vec![
            ElementRef::Internal("a".into()),
            ElementRef::Internal("b".into()),
            ext(42, Some("FULL1")),
            ext(43, Some("FULL1")),
            ext(44, None),
        ]
    );
}

// =========================================================================
// Internal elements
// =========================================================================

fn template_body(fields: &[&str]) -> String {
    let mut schema = XmlElement::new("schema");
    for field in fields {
        schema = schema.with_child(XmlElement::new("fielddef").with_attribute("name", *field));
    }
    let model = build_xml(&XmlElement::new("model").with_child(schema));
    build_xml(
        &XmlElement::new("entry")
            .with_attribute("name", "lower")
            .with_child(
                XmlElement::new("entry")
                    .with_attribute("name", "model_xml")
                    .with_text(model),
            ),
    )
}

fn internal_mse(
    exists: bool,
    fields: &'static [&'static str],
) -> impl Fn(u64, &str) -> Option<MockReply> + Send + Sync + 'static {
    move |id, cmd| match cmd {
        "get /storage/shows/{SHOW}/elements/e1 0" if exists => Some(MockReply::ok(id, "<element name=\"e1\"/>")),
        "get /storage/shows/{SHOW}/elements/e1 0" => Some(MockReply::error(
            id,
            "inexistent",
            "/storage/shows/{SHOW}/elements/e1",
        )),
        "get /storage/shows/{SHOW}/mastertemplates/lower" => {
            Some(MockReply::ok(id, &template_body(fields)))
        }
        _ if cmd.starts_with("insert ") => Some(MockReply::ok(id, "e1")),
        _ => None,
    }
}

#[tokio::test]
async fn test_create_internal_element() {
    let server = mse(internal_mse(false, &["2", "1", "3"])).await;
    let (rundown, _) = setup(&server, false).await;

    let created = rundown
        .create_element(NewElement::Internal {
            template: "lower".into(),
            name: "e1".into(),
            fields: vec!["a".into(), "b".into()],
            channel: Some("FULL1".into()),
        })
        .await
        .unwrap();
    let Element::Internal(element) = created else {
        panic!("expected internal element");
    };
    assert_eq!(element.name, "e1");
    assert_eq!(element.template.as_deref(), Some("lower"));
    assert_eq!(element.channel.as_deref(), Some("FULL1"));
    let data: Vec<(&str, Option<&str>)> = element
        .data
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_text()))
        .collect();
    assert_eq!(data, vec![("1", Some("a")), ("2", Some("b")), ("3", Some(""))]);

    let insert = received(&server)
        .into_iter()
        .find(|c| c.starts_with("insert "))
        .unwrap();
    assert!(insert.starts_with("insert /storage/shows/{SHOW}/elements/e1 last <element name=\"e1\" guid=\""));
    assert!(insert.contains("creator=\"test\""));
    assert!(insert.contains(
        "<ref name=\"master_template\">/storage/shows/{SHOW}/mastertemplates/lower</ref><entry name=\"default_alternatives\"/>"
    ));
    assert!(insert.contains(
        "<entry name=\"data\"><entry name=\"1\">a</entry><entry name=\"2\">b</entry><entry name=\"3\"/></entry><entry name=\"channel\">FULL1</entry>"
    ));
}

#[tokio::test]
async fn test_create_internal_element_rejections() {
    let server = mse(internal_mse(true, &["1"])).await;
    let (rundown, _) = setup(&server, false).await;
    let new = |fields: Vec<String>| NewElement::Internal {
        template: "lower".into(),
        name: "e1".into(),
        fields,
        channel: None,
    };
    let err = rundown.create_element(new(vec![])).await.unwrap_err();
    assert!(matches!(err, MseError::ElementExists(_)));

    let server = mse(internal_mse(false, &["1"])).await;
    let (rundown, _) = setup(&server, false).await;
    let err = rundown
        .create_element(new(vec!["a".into(), "b".into()]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MseError::TooManyFields {
            given: 2,
            declared: 1,
            ..
        }
    ));

    let server = mse(internal_mse(false, &[])).await;
    let (rundown, _) = setup(&server, false).await;
    let err = rundown.create_element(new(vec![])).await.unwrap_err();
    assert!(matches!(err, MseError::UnknownFieldSchema(ref t) if t == "lower"));
    assert!(!received(&server).iter().any(|c| c.starts_with("insert")));
}

#[tokio::test]
async fn test_get_internal_element() {
    let server = mse(|id, cmd| {
        (cmd == "get /storage/shows/{SHOW}/elements/e1").then(|| {
            MockReply::ok(
                id,
                "<element name=\"e1\"><ref name=\"master_template\">/storage/shows/{SHOW}/mastertemplates/lower</ref><entry name=\"data\"><entry name=\"1\">x</entry></entry></element>",
            )
        })
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    match rundown
        .get_element(&ElementRef::Internal("e1".into()))
        .await
        .unwrap()
    {
        Element::Internal(e) => {
            assert_eq!(e.template.as_deref(), Some("lower"));
            assert_eq!(e.data.get("1").and_then(|v| v.as_text()), Some("x"));
            assert_eq!(e.channel, None);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_internal_commands_and_delete_use_show_path() {
    let server = mse(|_, _| None).await;
    let (rundown, http) = setup(&server, false).await;
    let element = ElementRef::Internal("e1".into());

    rundown.continue_element(&element).await.unwrap();
    rundown.continue_reverse(&element).await.unwrap();
    rundown.out(&element).await.unwrap();
    rundown.initialize(&element).await.unwrap();
    let commands: Vec<MseCommand> = http.calls().into_iter().map(|(_, c, _)| c).collect();
    assert_eq!(
        commands,
        vec![
            MseCommand::Continue,
            MseCommand::ContinueReverse,
            MseCommand::Out,
            MseCommand::Initialize
        ]
    );
    assert!(http
        .calls()
        .iter()
        .all(|(_, _, path)| path == "/storage/shows/{SHOW}/elements/e1"));

    rundown.delete_element(&element).await.unwrap();
    assert!(received(&server).contains(&"delete /storage/shows/{SHOW}/elements/e1".to_string()));
}

// =========================================================================
// Activation
// =========================================================================

#[tokio::test]
async fn test_activate_twice_then_deactivate() {
    let server = mse(|_, _| None).await;
    let (rundown, http) = setup(&server, false).await;

    rundown.activate(true).await.unwrap();
    rundown.deactivate().await.unwrap();

    let show = "/storage/shows/{SHOW}".to_string();
    let playlist = "/storage/playlists/{PL}".to_string();
    let calls: Vec<(MseCommand, String)> =
        http.calls().into_iter().map(|(_, c, p)| (c, p)).collect();
    assert_eq!(
        calls,
        vec![
            (MseCommand::Initialize, show.clone()),
            (MseCommand::Initialize, playlist.clone()),
            (MseCommand::Initialize, show.clone()),
            (MseCommand::Initialize, playlist.clone()),
            (MseCommand::Cleanup, playlist),
            (MseCommand::Cleanup, show),
        ]
    );
}

#[tokio::test]
async fn test_is_active() {
    let server = mse(|id, cmd| {
        (cmd == "get /storage/playlists/{PL}/active_profile").then(|| {
            MockReply::ok(
                id,
                "<entry name=\"active_profile\">/config/profiles/STUDIO</entry>",
            )
        })
    })
    .await;
    let (rundown, _) = setup(&server, false).await;
    assert!(rundown.is_active().await.unwrap());

    let server = mse(|id, cmd| {
        (cmd == "get /storage/playlists/{PL}/active_profile")
            .then(|| MockReply::error(id, "inexistent", "/storage/playlists/{PL}/active_profile"))
    })
    .await;
    let (rundown, _) = setup(&server, false).await;
    assert!(!rundown.is_active().await.unwrap());
}

// =========================================================================
// Purge
// =========================================================================

#[tokio::test]
async fn test_purge_with_keep_list() {
    let server = mse(|id, cmd| match cmd {
        "delete /storage/playlists/{PL}/elements/3#2" => Some(MockReply::error(
            id,
            "inexistent",
            "/storage/playlists/{PL}/elements/3#2",
        )),
        _ => None,
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    let keep = [ExternalId::new(42, Some("FULL1"))];
    rundown.purge(Some(&keep)).await.unwrap();

    let commands = received(&server);
    assert!(commands.contains(&"replace /storage/shows/{SHOW}/elements <elements/>".to_string()));
    assert!(commands.contains(&"delete /storage/playlists/{PL}/elements/3#2".to_string()));
    assert!(commands.contains(&"delete /storage/playlists/{PL}/elements/5".to_string()));
    assert!(!commands.contains(&"delete /storage/playlists/{PL}/elements/3".to_string()));

    let map = rundown.channel_map();
    assert_eq!(map.len(), 1);
    assert_eq!(map[0].vcpid, 42);
}

#[tokio::test]
async fn test_purge_reraises_other_errors() {
    let server = mse(|id, cmd| {
        cmd.starts_with("delete ")
            .then(|| MockReply::error(id, "not_allowed", "locked"))
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    let err = rundown.purge(Some(&[])).await.unwrap_err();
    assert_eq!(err.pep_kind(), Some(ErrorKind::NotAllowed));
}

#[tokio::test]
async fn test_purge_without_keep_list_wipes_playlist() {
    let server = mse(|_, _| None).await;
    let (rundown, _) = setup(&server, false).await;
    rundown.build_channel_map().await.unwrap();

    rundown.purge(None).await.unwrap();
    let commands = received(&server);
    assert!(commands.contains(&"replace /storage/shows/{SHOW}/elements <elements/>".to_string()));
    assert!(commands.contains(&"replace /storage/playlists/{PL}/elements <elements/>".to_string()));
    assert!(rundown.channel_map().is_empty());
}

// =========================================================================
// Templates
// =========================================================================

#[tokio::test]
async fn test_templates() {
    let server = mse(|id, cmd| match cmd {
        "get /storage/shows/{SHOW}/mastertemplates 1" => Some(MockReply::ok(
            id,
            "<mastertemplates><template name=\"lower\"/><template name=\"full\"/></mastertemplates>",
        )),
        "get /storage/shows/{SHOW}/mastertemplates/lower" => {
            Some(MockReply::ok(id, &template_body(&["1"])))
        }
        _ => None,
    })
    .await;
    let (rundown, _) = setup(&server, false).await;

    assert_eq!(rundown.list_templates().await.unwrap(), vec!["lower", "full"]);
    let template = rundown.get_template("lower").await.unwrap();
    assert_eq!(template.get("name").and_then(|v| v.as_text()), Some("lower"));
    assert!(template
        .get("model_xml")
        .and_then(|v| v.as_text())
        .is_some_and(|m| m.contains("fielddef")));
}
