//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionEvent};
use crate::error::ClientError;
use peptalk_protocol::{Command, Location, PepError, RequestId, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Body returned by a successful [`PepTalkClient::ping`].
pub const PONG: &str = "PONG!";

/// High-level PepTalk client.
///
/// All paths and XML payloads are escaped on the way out; response bodies
/// come back unescaped.
#[derive(Clone)]
pub struct PepTalkClient {
    conn: Arc<Connection>,
}

impl PepTalkClient {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects and negotiates the protocol.
    pub async fn connect(&self, noevents: bool) -> Result<Response, ClientError> {
        self.conn.connect(noevents).await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Sends `close` and releases the transport.
    pub async fn close(&self) -> Result<Response, ClientError> {
        self.conn.close().await
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.subscribe()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.conn.request_timeout()
    }

    /// Sets the timeout applied to subsequent requests.
    pub fn set_timeout(&self, timeout: Duration) -> Duration {
        self.conn.set_request_timeout(timeout);
        timeout
    }

    // =========================================================================
    // Tree operations
    // =========================================================================

    /// Reads the subtree at `path`, to `depth` levels when given.
    pub async fn get(&self, path: &str, depth: Option<u32>) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Get {
                path: path.to_string(),
                depth,
            })
            .await
    }

    pub async fn set_text(&self, path: &str, text: &str) -> Result<Response, ClientError> {
        self.conn
            .send(Command::SetText {
                path: path.to_string(),
                text: text.to_string(),
            })
            .await
    }

    pub async fn set_attribute(
        &self,
        path: &str,
        key: &str,
        value: &str,
    ) -> Result<Response, ClientError> {
        self.conn
            .send(Command::SetAttribute {
                path: path.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            })
            .await
    }

    /// Inserts `xml` at `path`. The response body is the name the server
    /// gave the new node.
    pub async fn insert(
        &self,
        path: &str,
        xml: &str,
        location: Location,
        sibling: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Insert {
                path: path.to_string(),
                xml: xml.to_string(),
                location,
                sibling: sibling.map(str::to_string),
            })
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Delete {
                path: path.to_string(),
            })
            .await
    }

    pub async fn copy(
        &self,
        source: &str,
        dest: &str,
        location: Location,
        sibling: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Copy {
                source: source.to_string(),
                dest: dest.to_string(),
                location,
                sibling: sibling.map(str::to_string),
            })
            .await
    }

    /// Moves a node. Named `move_node` because `move` is a keyword.
    pub async fn move_node(
        &self,
        source: &str,
        dest: &str,
        location: Location,
        sibling: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Move {
                source: source.to_string(),
                dest: dest.to_string(),
                location,
                sibling: sibling.map(str::to_string),
            })
            .await
    }

    pub async fn replace(&self, path: &str, xml: &str) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Replace {
                path: path.to_string(),
                xml: xml.to_string(),
            })
            .await
    }

    /// Creates every missing node along `path`.
    pub async fn ensure_path(&self, path: &str) -> Result<Response, ClientError> {
        self.conn
            .send(Command::EnsurePath {
                path: path.to_string(),
            })
            .await
    }

    pub async fn uri(
        &self,
        path: &str,
        uri_type: &str,
        base: Option<&str>,
    ) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Uri {
                path: path.to_string(),
                uri_type: uri_type.to_string(),
                base: base.map(str::to_string),
            })
            .await
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Negotiates capabilities. An empty list asks for the server's list.
    pub async fn protocol(&self, capabilities: &[&str]) -> Result<Response, ClientError> {
        self.conn
            .send(Command::Protocol {
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            })
            .await
    }

    pub async fn reinitialize(&self) -> Result<Response, ClientError> {
        self.conn.send(Command::Reinitialize).await
    }

    /// Sends pre-formatted command text as is.
    pub async fn send_raw(&self, text: &str) -> Result<Response, ClientError> {
        self.conn.send(Command::Raw(text.to_string())).await
    }

    /// Checks that the server answers with a tree.
    ///
    /// Reads the root at depth zero; a body containing `<entry` counts as
    /// alive and is reported as [`PONG`].
    pub async fn ping(&self) -> Result<Response, ClientError> {
        let response = self.get("/", Some(0)).await?;
        if response.body.contains("<entry") {
            Ok(Response {
                body: PONG.to_string(),
                ..response
            })
        } else {
            Err(PepError::unspecified(
                RequestId::Id(response.id),
                format!("unexpected ping response: {}", response.body),
                Some(response.sent),
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockServer};
    use peptalk_protocol::ErrorKind;

    #[tokio::test]
    async fn test_connect_reports_negotiated_protocol() {
        let server = MockServer::start(MockReply::default_for).await.unwrap();
        let client = PepTalkClient::new(server.config());

        let response = client.connect(true).await.unwrap();
        assert_eq!(response.id, 1);
        assert_eq!(response.sent, "protocol peptalk noevents");
        assert_eq!(response.body, "protocol peptalk noevents");
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_insert_returns_server_name() {
        let server = MockServer::start(|id, text| {
            if text.starts_with("insert") {
                MockReply::ok(id, "it#2")
            } else {
                MockReply::default_for(id, text)
            }
        })
        .await
        .unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(true).await.unwrap();

        let response = client
            .insert("/put/it/here", "<entry name=\"it\"/>", Location::Last, None)
            .await
            .unwrap();
        assert_eq!(response.id, 2);
        assert_eq!(response.body, "it#2");
        assert_eq!(
            response.sent,
            "insert {12}/put/it/here last {18}<entry name=\"it\"/>"
        );
        assert_eq!(
            server.received()[1],
            "insert {12}/put/it/here last {18}<entry name=\"it\"/>"
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = MockServer::start(|id, text| match text {
            "get {1}/ 0" => MockReply::ok(id, "<entry name=\"\"/>"),
            _ => MockReply::default_for(id, text),
        })
        .await
        .unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(true).await.unwrap();

        let response = client.ping().await.unwrap();
        assert_eq!(response.body, PONG);
        assert_eq!(response.sent, "get {1}/ 0");
    }

    #[tokio::test]
    async fn test_ping_without_tree_is_unspecified() {
        let server = MockServer::start(|id, text| match text {
            "get {1}/ 0" => MockReply::ok(id, "nothing here"),
            _ => MockReply::default_for(id, text),
        })
        .await
        .unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(true).await.unwrap();

        let err = client.ping().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unspecified));
    }

    #[tokio::test]
    async fn test_verbs_encode_arguments() {
        let server = MockServer::start(MockReply::default_for).await.unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(false).await.unwrap();

        client.set_text("/a", "hello").await.unwrap();
        client.set_attribute("/a", "k", "v").await.unwrap();
        client.delete("/a/b").await.unwrap();
        client
            .copy("/a", "/b", Location::After, Some("x"))
            .await
            .unwrap();
        client
            .move_node("/a", "/b", Location::First, None)
            .await
            .unwrap();
        client.replace("/a", "<x/>").await.unwrap();
        client.ensure_path("/a/b/c").await.unwrap();
        client.uri("/a", "peptalk", None).await.unwrap();
        client.reinitialize().await.unwrap();

        assert_eq!(
            &server.received()[1..],
            &[
                "set text {2}/a {5}hello",
                "set attribute {2}/a {1}k {1}v",
                "delete {4}/a/b",
                "copy {2}/a {2}/b after {1}x",
                "move {2}/a {2}/b first",
                "replace {2}/a {4}<x/>",
                "ensure-path {6}/a/b/c",
                "uri {2}/a peptalk",
                "reinitialize",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_location_is_rejected_before_sending() {
        let server = MockServer::start(MockReply::default_for).await.unwrap();
        let client = PepTalkClient::new(server.config());
        client.connect(false).await.unwrap();

        let err = client
            .insert("/a", "<x/>", Location::Before, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unspecified));
        assert_eq!(server.received().len(), 1);
    }

    #[tokio::test]
    async fn test_set_timeout() {
        let client = PepTalkClient::new(ConnectionConfig::new("localhost"));
        assert_eq!(client.timeout(), Duration::from_millis(3000));
        assert_eq!(
            client.set_timeout(Duration::from_millis(500)),
            Duration::from_millis(500)
        );
        assert_eq!(client.timeout(), Duration::from_millis(500));
    }
}
