//! Streaming client for the Kalshi trade API
//!
//! One authenticated full-duplex connection per client. The upgrade request
//! is signed like any REST call; after the handshake the client sends a
//! single subscribe command and then dispatches every inbound message to an
//! injected [`StreamHandler`].
//!
//! The receive loop is one cooperative task: handlers that block stall it.
//! There is no reconnection, heartbeat, or backoff here - callers layer
//! those on top. Cancelling (dropping) the `connect` future releases the
//! underlying connection.

use std::ops::ControlFlow;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::auth::{
    Credentials, RequestSigner, ACCESS_KEY_HEADER, ACCESS_SIGNATURE_HEADER,
    ACCESS_TIMESTAMP_HEADER,
};
use crate::error::{KalshiError, Result};
use crate::types::{Environment, StreamMessage, SubscribeCommand};
use crate::WS_PATH;

/// Inbound message observer, injected at client construction.
///
/// `on_message` returns [`ControlFlow`]: `Break` ends the session cleanly,
/// which is how callers bound a capture run. The error and close callbacks
/// default to logging.
pub trait StreamHandler: Send {
    /// Called once after the subscribe command is sent.
    fn on_open(&mut self) {}

    /// Called for every decoded inbound message.
    fn on_message(&mut self, message: &StreamMessage) -> ControlFlow<()>;

    /// Called when the transport fails or a frame fails to decode. The
    /// connection is torn down afterwards; retrying is the caller's call.
    fn on_error(&mut self, error: &KalshiError) {
        error!("stream error: {}", error);
    }

    /// Called when the peer closes the connection.
    fn on_close(&mut self, code: u16, reason: &str) {
        info!("stream closed: {} {}", code, reason);
    }
}

/// Default observer: logs every message and never stops the loop.
pub struct LogObserver;

impl StreamHandler for LogObserver {
    fn on_message(&mut self, message: &StreamMessage) -> ControlFlow<()> {
        debug!("received {} message: {:?}", message.kind, message.msg);
        ControlFlow::Continue(())
    }
}

/// Streaming client bound to one environment and one handler.
pub struct KalshiWsClient {
    endpoint: String,
    signer: RequestSigner,
    channels: Vec<String>,
    message_id: u64,
    handler: Box<dyn StreamHandler>,
}

impl KalshiWsClient {
    /// Create a client for the given environment.
    pub fn new(
        credentials: Credentials,
        environment: Environment,
        handler: Box<dyn StreamHandler>,
    ) -> Self {
        Self::with_endpoint(&format!("{}{}", environment.ws_base(), WS_PATH), credentials, handler)
    }

    /// Create a client with a custom endpoint (for testing).
    pub fn with_endpoint(
        endpoint: &str,
        credentials: Credentials,
        handler: Box<dyn StreamHandler>,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            signer: RequestSigner::new(credentials),
            channels: vec!["ticker".to_string()],
            message_id: 1,
            handler,
        }
    }

    /// Replace the channel list sent in the subscribe command.
    pub fn set_channels(&mut self, channels: Vec<String>) {
        self.channels = channels;
    }

    fn next_message_id(&mut self) -> u64 {
        let id = self.message_id;
        self.message_id += 1;
        id
    }

    /// Connect, subscribe, and run the receive loop until the peer closes
    /// the connection, the handler breaks, or an error occurs.
    pub async fn connect(&mut self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| KalshiError::Validation(format!("invalid endpoint: {e}")))?;
        // The upgrade request is signed on its path component, like any GET.
        let auth = self.signer.sign("GET", url.path())?;

        let mut request = self.endpoint.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            header_name(ACCESS_KEY_HEADER)?,
            header_value(&auth.key_id)?,
        );
        headers.insert(
            header_name(ACCESS_SIGNATURE_HEADER)?,
            header_value(&auth.signature)?,
        );
        headers.insert(
            header_name(ACCESS_TIMESTAMP_HEADER)?,
            header_value(&auth.timestamp)?,
        );

        info!("connecting to {}", self.endpoint);
        let (ws_stream, response) = connect_async(request).await?;
        debug!("websocket connected, status: {}", response.status());

        let (mut write, mut read) = ws_stream.split();

        let command = SubscribeCommand::new(self.next_message_id(), self.channels.clone());
        let command_json = serde_json::to_string(&command)?;
        debug!("subscribing to channels: {:?}", self.channels);
        write.send(Message::Text(command_json.into())).await?;

        self.handler.on_open();

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<StreamMessage>(text.as_str()) {
                        Ok(message) => {
                            if self.handler.on_message(&message).is_break() {
                                debug!("handler requested stop");
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            let err = KalshiError::from(e);
                            self.handler.on_error(&err);
                            return Err(err);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!("failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.to_string()),
                        None => (1005, String::new()),
                    };
                    info!("server closed connection: {} {}", code, reason);
                    self.handler.on_close(code, &reason);
                    return Ok(());
                }
                Some(Ok(_)) => {
                    // Binary and pong frames are ignored
                }
                Some(Err(e)) => {
                    let err = KalshiError::from(e);
                    self.handler.on_error(&err);
                    return Err(err);
                }
                None => {
                    // Stream ended without a close frame
                    self.handler.on_close(1006, "");
                    return Ok(());
                }
            }
        }
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| KalshiError::Validation(format!("invalid header name: {e}")))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| KalshiError::Validation(format!("invalid header value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    #[derive(Debug)]
    enum Event {
        Open,
        Message(String),
        Error(String),
        Close(u16, String),
    }

    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        stop_after: Option<usize>,
        seen: usize,
    }

    impl Recorder {
        fn new(events: Arc<Mutex<Vec<Event>>>) -> Self {
            Self { events, stop_after: None, seen: 0 }
        }

        fn stopping_after(events: Arc<Mutex<Vec<Event>>>, n: usize) -> Self {
            Self { events, stop_after: Some(n), seen: 0 }
        }
    }

    impl StreamHandler for Recorder {
        fn on_open(&mut self) {
            self.events.lock().unwrap().push(Event::Open);
        }

        fn on_message(&mut self, message: &StreamMessage) -> ControlFlow<()> {
            self.events.lock().unwrap().push(Event::Message(message.kind.clone()));
            self.seen += 1;
            match self.stop_after {
                Some(n) if self.seen >= n => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }

        fn on_error(&mut self, error: &KalshiError) {
            self.events.lock().unwrap().push(Event::Error(error.to_string()));
        }

        fn on_close(&mut self, code: u16, reason: &str) {
            self.events.lock().unwrap().push(Event::Close(code, reason.to_string()));
        }
    }

    fn test_credentials() -> Credentials {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        Credentials::new("test-key-id", key)
    }

    async fn bind_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        (listener, endpoint)
    }

    #[tokio::test]
    async fn test_subscribe_then_peer_close_reaches_close_handler() {
        let (listener, endpoint) = bind_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // First inbound frame must be the subscribe command
            let frame = ws.next().await.unwrap().unwrap();
            let command: SubscribeCommand =
                serde_json::from_str(frame.to_text().unwrap()).unwrap();
            assert_eq!(command.id, 1);
            assert_eq!(command.cmd, "subscribe");
            assert_eq!(command.params.channels, vec!["ticker"]);

            // Answer a ping, then close with code 1000
            let _ = ws.send(Message::Ping(b"hb".as_slice().into())).await;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Pong(data))) => {
                        assert_eq!(data.as_ref(), b"hb");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("expected pong, got {other:?}"),
                }
            }
            ws.close(Some(CloseFrame { code: CloseCode::Normal, reason: "done".into() }))
                .await
                .unwrap();
            while let Some(msg) = ws.next().await {
                if msg.is_err() {
                    break;
                }
            }
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut client = KalshiWsClient::with_endpoint(
            &endpoint,
            test_credentials(),
            Box::new(Recorder::new(events.clone())),
        );
        client.connect().await.unwrap();
        server.await.unwrap();

        let events = events.lock().unwrap();
        assert!(matches!(events[0], Event::Open));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Close(1000, reason) if reason.as_str() == "done")));
    }

    #[tokio::test]
    async fn test_handshake_carries_content_type_and_access_headers() {
        let (listener, endpoint) = bind_server().await;
        let seen = Arc::new(Mutex::new(Vec::<(String, String)>::new()));
        let captured = seen.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| {
                let mut headers = captured.lock().unwrap();
                for (name, value) in req.headers() {
                    headers.push((
                        name.as_str().to_string(),
                        value.to_str().unwrap_or("").to_string(),
                    ));
                }
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();
            let _subscribe = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            while let Some(msg) = ws.next().await {
                if msg.is_err() {
                    break;
                }
            }
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut client = KalshiWsClient::with_endpoint(
            &endpoint,
            test_credentials(),
            Box::new(Recorder::new(events)),
        );
        client.connect().await.unwrap();
        server.await.unwrap();

        let headers = seen.lock().unwrap();
        let value_of = |name: &str| {
            headers.iter().find(|(n, _)| n.as_str() == name).map(|(_, v)| v.clone())
        };
        assert_eq!(value_of("content-type").as_deref(), Some("application/json"));
        assert_eq!(value_of("kalshi-access-key").as_deref(), Some("test-key-id"));
        assert!(value_of("kalshi-access-signature").is_some());
        assert!(value_of("kalshi-access-timestamp").is_some());
    }

    #[tokio::test]
    async fn test_malformed_frame_reaches_error_handler_and_closes() {
        let (listener, endpoint) = bind_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _subscribe = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text("not json".into())).await.unwrap();
            // Client must tear the connection down, not leave it open
            let end = ws.next().await;
            assert!(!matches!(end, Some(Ok(Message::Text(_)))));
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut client = KalshiWsClient::with_endpoint(
            &endpoint,
            test_credentials(),
            Box::new(Recorder::new(events.clone())),
        );
        let result = client.connect().await;
        assert!(matches!(result, Err(KalshiError::Decode(_))));
        server.await.unwrap();

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::Error(_))));
    }

    #[tokio::test]
    async fn test_handler_break_stops_receive_loop() {
        let (listener, endpoint) = bind_server().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _subscribe = ws.next().await.unwrap().unwrap();
            let _ = ws
                .send(Message::Text(r#"{"type":"ticker","msg":{"price":40}}"#.into()))
                .await;
            let _ = ws
                .send(Message::Text(r#"{"type":"ticker","msg":{"price":41}}"#.into()))
                .await;
            while let Some(msg) = ws.next().await {
                if msg.is_err() {
                    break;
                }
            }
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut client = KalshiWsClient::with_endpoint(
            &endpoint,
            test_credentials(),
            Box::new(Recorder::stopping_after(events.clone(), 1)),
        );
        client.connect().await.unwrap();
        server.await.unwrap();

        let events = events.lock().unwrap();
        let messages =
            events.iter().filter(|e| matches!(e, Event::Message(_))).count();
        assert_eq!(messages, 1);
    }

    #[tokio::test]
    async fn test_message_ids_increase_across_sessions() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut client = KalshiWsClient::with_endpoint(
            "ws://127.0.0.1:1",
            test_credentials(),
            Box::new(Recorder::new(events)),
        );
        assert_eq!(client.next_message_id(), 1);
        assert_eq!(client.next_message_id(), 2);
        assert_eq!(client.next_message_id(), 3);
    }
}
