//! Mock SSE server shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use futures_util::{StreamExt, stream};
use http::{HeaderMap, header::CONTENT_TYPE};
use http_body_util::{BodyExt, StreamBody, combinators::UnsyncBoxBody};
use hyper::{
    Request, Response,
    body::{Bytes, Frame, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

type Body = UnsyncBoxBody<Bytes, Infallible>;

/// One scripted response.
#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    content_type: &'static str,
    chunks: Vec<&'static str>,
    hold_open: bool,
}

impl Reply {
    /// An event stream that ends after `chunks`.
    pub fn events(chunks: &[&'static str]) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            chunks: chunks.to_vec(),
            hold_open: false,
        }
    }

    /// An event stream that stays open after `chunks`.
    pub fn held(chunks: &[&'static str]) -> Self {
        Self {
            hold_open: true,
            ..Self::events(chunks)
        }
    }

    /// A plain response.
    pub fn status(status: u16, content_type: &'static str, body: &'static str) -> Self {
        Self {
            status,
            content_type,
            chunks: vec![body],
            hold_open: false,
        }
    }

    fn into_response(self) -> Response<Body> {
        let frames = self
            .chunks
            .into_iter()
            .map(|chunk| Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk.as_bytes()))));
        let body = if self.hold_open {
            StreamBody::new(stream::iter(frames).chain(stream::pending())).boxed_unsync()
        } else {
            StreamBody::new(stream::iter(frames)).boxed_unsync()
        };

        Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, self.content_type)
            .body(body)
            .expect("build response")
    }
}

/// A request as seen by the server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub uri: String,
    pub headers: HeaderMap,
}

/// Serves scripted replies in order, one per request, then 503s.
pub struct MockServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let replies = Arc::clone(&replies);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        recorded.lock().expect("lock requests").push(Recorded {
                            uri: req.uri().to_string(),
                            headers: req.headers().clone(),
                        });
                        let reply = replies
                            .lock()
                            .expect("lock replies")
                            .pop_front()
                            .unwrap_or_else(|| Reply::status(503, "text/plain", "exhausted"));
                        async move { Ok::<_, Infallible>(reply.into_response()) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("lock requests").clone()
    }
}

/// An address with nothing listening on it.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe");
    listener.local_addr().expect("local addr")
}
