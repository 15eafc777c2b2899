//! A stand-in for the distribution authority.

use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use url::Url;

pub const TOKEN: &str = "test-token";

pub fn init_logging() {
    let _ = stderrlog::new().verbosity(99).init();
}


//------------ Received ------------------------------------------------------

/// A request as seen by the authority.
#[derive(Clone, Debug)]
pub struct Received {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: serde_json::Value,
}


//------------ Reply ---------------------------------------------------------

/// How the authority answers.
#[derive(Clone, Copy, Debug)]
pub enum Reply {
    Respond(StatusCode, &'static str),

    /// Reads the request and never answers.
    Hang,
}


//------------ MockAuthority -------------------------------------------------

/// An HTTP server answering every POST the same way.
///
/// The server runs on its own runtime in a background thread and stops when
/// dropped.
pub struct MockAuthority {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockAuthority {
    pub fn accepting() -> Self {
        Self::start(StatusCode::OK, "")
    }

    pub fn start(status: StatusCode, body: &'static str) -> Self {
        Self::with_reply(Reply::Respond(status, body))
    }

    pub fn hanging() -> Self {
        Self::with_reply(Reply::Hang)
    }

    pub fn with_reply(reply: Reply) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let (addr_tx, addr_rx) = mpsc::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let thread = {
            let received = received.clone();
            thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener =
                        TcpListener::bind("127.0.0.1:0").await.unwrap();
                    addr_tx.send(listener.local_addr().unwrap()).unwrap();
                    loop {
                        tokio::select! {
                            _ = &mut stop_rx => break,
                            res = listener.accept() => {
                                let (stream, _) = res.unwrap();
                                let received = received.clone();
                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        handle(req, received.clone(), reply)
                                    });
                                    let _ = http1::Builder::new()
                                        .serve_connection(
                                            TokioIo::new(stream), service
                                        )
                                        .await;
                                });
                            }
                        }
                    }
                })
            })
        };

        MockAuthority {
            addr: addr_rx.recv().unwrap(),
            received,
            stop: Some(stop_tx),
            thread: Some(thread),
        }
    }

    pub fn uri(&self) -> Url {
        Url::parse(&format!("http://{}/certs", self.addr)).unwrap()
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockAuthority {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    received: Arc<Mutex<Vec<Received>>>,
    reply: Reply,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
    };
    let authorization = header(AUTHORIZATION);
    let content_type = header(CONTENT_TYPE);

    let bytes = req.into_body().collect().await?.to_bytes();
    received.lock().unwrap().push(Received {
        authorization,
        content_type,
        body: serde_json::from_slice(&bytes)
            .unwrap_or(serde_json::Value::Null),
    });

    let (status, body) = match reply {
        Reply::Respond(status, body) => (status, body),
        Reply::Hang => std::future::pending().await,
    };
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap())
}
