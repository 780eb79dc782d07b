use crate::cache::Clock;
use crate::config::{Config, Listener};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use url::Url;

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

type StubKey = (Method, String);

#[derive(Default)]
struct StubState {
    responses: HashMap<StubKey, (StatusCode, String)>,
    hits: HashMap<StubKey, usize>,
    authorization: HashMap<StubKey, String>,
    bodies: HashMap<StubKey, String>,
}

/// A local HTTP server with canned responses per method and path. Records
/// how often each one was called. Unknown routes answer 404.
#[derive(Clone)]
pub struct StubUpstream {
    addr: SocketAddr,
    state: Arc<Mutex<StubState>>,
}

impl StubUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(StubState::default()));

        let server_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let io = TokioIo::new(stream);
                let state = server_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(state.clone(), req));
                    if let Err(err) =
                        hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                            .serve_connection(io, service)
                            .await
                    {
                        eprintln!("Error serving connection: {:?}", err);
                    }
                });
            }
        });

        StubUpstream { addr, state }
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.state
            .lock()
            .responses
            .insert((method, path.to_string()), (status, body.to_string()));
    }

    pub fn hits(&self, method: Method, path: &str) -> usize {
        self.state
            .lock()
            .hits
            .get(&(method, path.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.state.lock().hits.values().sum()
    }

    pub fn last_authorization(&self, method: Method, path: &str) -> Option<String> {
        self.state
            .lock()
            .authorization
            .get(&(method, path.to_string()))
            .cloned()
    }

    pub fn last_body(&self, method: Method, path: &str) -> Option<String> {
        self.state
            .lock()
            .bodies
            .get(&(method, path.to_string()))
            .cloned()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

async fn handle(
    state: Arc<Mutex<StubState>>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let key = (parts.method.clone(), parts.uri.path().to_string());
    let (status, response_body) = {
        let mut state = state.lock();
        *state.hits.entry(key.clone()).or_default() += 1;
        if let Some(auth) = parts
            .headers
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            state.authorization.insert(key.clone(), auth.to_string());
        }
        if !body.is_empty() {
            state
                .bodies
                .insert(key.clone(), String::from_utf8_lossy(&body).into_owned());
        }
        state
            .responses
            .get(&key)
            .cloned()
            .unwrap_or((StatusCode::NOT_FOUND, r#"{"detail": "not found"}"#.to_string()))
    };

    let mut response = Response::new(Full::new(Bytes::from(response_body)));
    *response.status_mut() = status;
    Ok(response)
}

/// A listener that accepts connections and never answers on them.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Username the stub identity service reports for any token.
pub const TEST_USER: &str = "Alice.Smith";
pub const TEST_NAMESPACE: &str = "ns1";
/// Master hostname derived from [`TEST_USER`] and [`TEST_NAMESPACE`].
pub const TEST_MASTER_HOST: &str = "spark-master-alice.smith.ns1";

/// Identity stub that accepts every token as [`TEST_USER`].
pub async fn start_identity_stub() -> StubUpstream {
    let identity = StubUpstream::start().await;
    identity.respond(
        Method::GET,
        "/api/V2/me",
        200,
        &format!(r#"{{"user": "{TEST_USER}", "display": "Alice"}}"#),
    );
    identity
}

/// A config pointing the identity service at `identity`, the cluster manager
/// at `cluster_manager` and the Spark masters of namespace `ns1` at `master`.
pub fn test_config(
    identity: &StubUpstream,
    cluster_manager: Option<&StubUpstream>,
    master: Option<&StubUpstream>,
) -> Config {
    let mut config = Config::new(Listener {
        host: "127.0.0.1".into(),
        port: 8888,
    });
    config.auth_url = Url::parse(&format!("{}/", identity.url())).unwrap();
    config.cluster_manager_url = cluster_manager.map(|cm| Url::parse(&cm.url()).unwrap());
    if let Some(master) = master {
        config.namespace = Some(TEST_NAMESPACE.to_string());
        config.master_port = master.port();
        config
            .resolve
            .insert(TEST_MASTER_HOST.to_string(), "127.0.0.1:0".parse().unwrap());
    }
    config
}
