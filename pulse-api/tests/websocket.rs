//! End-to-end WebSocket admission and delivery over a real listener.

mod common;

use futures::StreamExt;
use pulse_api::auth::Identity;
use pulse_api::ws::EntityRef;
use pulse_api::{ApiConfig, ApiServer, AppState, JwksConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{K1_MODULUS, jwks, k1_token, now, rsa_jwk};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    state: Arc<AppState>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    _jwks: MockServer,
}

impl Harness {
    async fn start() -> Self {
        let jwks_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(jwks(&[rsa_jwk("k1", K1_MODULUS)])),
            )
            .mount(&jwks_server)
            .await;

        let config = ApiConfig {
            jwks: JwksConfig {
                url: format!("{}/jwks.json", jwks_server.uri()),
                ..JwksConfig::default()
            },
            ..ApiConfig::default()
        };
        let server = ApiServer::new(config).unwrap();
        let state = Arc::clone(server.state());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            stop: Some(stop),
            task,
            _jwks: jwks_server,
        }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}/ws{query}", self.addr)
    }

    async fn connect(&self, sub: &str) -> Client {
        let expected = self.state.hub().user_connection_count(&Identity::from(sub)) + 1;
        let (client, _) = connect_async(self.url(&format!("?token={}", k1_token(sub))))
            .await
            .unwrap();
        self.wait_for_connections(sub, expected).await;
        client
    }

    /// Registration runs after the handshake completes, so poll for it.
    async fn wait_for_connections(&self, sub: &str, expected: usize) {
        let identity = Identity::from(sub);
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.hub().user_connection_count(&identity) < expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .unwrap()
            .unwrap();
    }
}

async fn next_json(client: &mut Client) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn assert_no_frame(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

#[tokio::test]
async fn test_verified_client_receives_its_notifications() {
    let harness = Harness::start().await;
    let mut first = harness.connect("u1").await;
    let mut second = harness.connect("u1").await;
    let mut other = harness.connect("u2").await;

    let report = harness.state.broadcaster().user_signed_up(
        &Identity::from("u1"),
        EntityRef::new("page-1", "Landing"),
        "signup",
    );
    assert_eq!(report.delivered, 2);

    for client in [&mut first, &mut second] {
        let item = next_json(client).await;
        assert_eq!(item["type"], "signup");
        assert_eq!(item["message"], "Someone signed up");
        assert_eq!(item["entity_id"], "page-1");
        assert_eq!(item["entity_name"], "Landing");
    }
    assert_no_frame(&mut other).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_missing_token_rejected_before_upgrade() {
    let harness = Harness::start().await;

    match connect_async(harness.url("")).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert_eq!(harness.state.hub().connection_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let harness = Harness::start().await;
    let expired = {
        use jsonwebtoken::{Algorithm, EncodingKey, Header};
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("k1".to_string());
        let key = EncodingKey::from_rsa_pem(common::K1_PRIVATE_PEM.as_bytes()).unwrap();
        let claims = serde_json::json!({"sub": "u1", "exp": now() - 3600});
        jsonwebtoken::encode(&header, &claims, &key).unwrap()
    };

    match connect_async(harness.url(&format!("?token={expired}"))).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_bearer_header_admission() {
    let harness = Harness::start().await;
    let mut request = harness.url("").into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", k1_token("u3")).parse().unwrap(),
    );

    let (_client, response) = connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);
    harness.wait_for_connections("u3", 1).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let harness = Harness::start().await;
    let mut client = harness.connect("u1").await;
    assert_eq!(harness.state.hub().connection_count(), 1);

    client.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.state.hub().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(harness.state.hub().user_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let harness = Harness::start().await;
    let mut client = harness.connect("u1").await;
    let hub = Arc::clone(harness.state.hub());

    harness.shutdown().await;
    assert_eq!(hub.connection_count(), 0);

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .unwrap();
    assert!(closed);
}
