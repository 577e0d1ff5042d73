// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! HTTP peering for `hoard` groups.
//!
//! An [`HttpPool`] makes one process a member of a cache fleet: it is both
//! the [`PeerPicker`] local groups consult to find a key's owner and the
//! HTTP server that answers peers asking this process for keys it owns.
//!
//! The wire protocol is one GET route:
//!
//! ```text
//! GET {base_path}{group}/{key}        (path segments percent-encoded)
//! 200  application/octet-stream body = raw value bytes
//! 404  unknown group
//! 500  load failure
//! ```
//!
//! An optional `x-hoard-minute-qps` response header carries the freshness
//! hint of the peer protocol.
//!
//! # Example
//!
//! ```no_run
//! use hoard::Registry;
//! use hoard_http::HttpPool;
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new();
//! let pool = HttpPool::new(&registry, "http://10.0.0.1:8000");
//! pool.set_peers([
//!     "http://10.0.0.1:8000",
//!     "http://10.0.0.2:8000",
//!     "http://10.0.0.3:8000",
//! ]);
//!
//! let listener = TcpListener::bind("10.0.0.1:8000").await?;
//! pool.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, convert::Infallible, sync::Arc};

use bytes::Bytes;
use futures::future::BoxFuture;
use hoard::{AllocatingByteSliceSink, Error, PeerGetter, PeerPicker, PeerReply, Registry, Result};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode, body::Incoming, service::service_fn};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioIo},
};
use parking_lot::Mutex;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Path prefix under which peers are served.
const DEFAULT_BASE_PATH: &str = "/_hoard/";

/// Response header carrying the peer's queries-per-minute hint.
const MINUTE_QPS_HEADER: &str = "x-hoard-minute-qps";

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Configuration for an [`HttpPool`].
#[derive(Debug, Clone)]
pub struct HttpPoolOptions {
    /// Path prefix, including leading and trailing slash.
    pub base_path: String,
    /// Virtual nodes per peer on the consistent-hash ring.
    pub replicas: usize,
}

impl Default for HttpPoolOptions {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_string(),
            replicas: hoard_ring::DEFAULT_REPLICAS,
        }
    }
}

/// An HTTP pool of peers.
///
/// Cloning is cheap; clones share the pool's ring and client.
#[derive(Clone)]
pub struct HttpPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    self_url: String,
    base_path: String,
    replicas: usize,
    registry: Registry,
    client: HttpClient,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    ring: Option<hoard_ring::Map>,
    peers: HashMap<String, Arc<HttpPeer>>,
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_url", &self.inner.self_url)
            .field("base_path", &self.inner.base_path)
            .finish_non_exhaustive()
    }
}

impl HttpPool {
    /// Creates a pool identified by `self_url` (a base URL such as
    /// `http://example.net:8000`) and installs it as `registry`'s peer
    /// picker.
    ///
    /// # Panics
    ///
    /// Panics if the registry already has a peer picker.
    #[must_use]
    pub fn new(registry: &Registry, self_url: impl Into<String>) -> Self {
        Self::with_options(registry, self_url, HttpPoolOptions::default())
    }

    /// Creates a pool with explicit options. See [`HttpPool::new`].
    ///
    /// # Panics
    ///
    /// Panics if the registry already has a peer picker.
    #[must_use]
    pub fn with_options(
        registry: &Registry,
        self_url: impl Into<String>,
        options: HttpPoolOptions,
    ) -> Self {
        let pool = Self {
            inner: Arc::new(PoolInner {
                self_url: self_url.into(),
                base_path: options.base_path,
                replicas: options.replicas,
                registry: registry.clone(),
                client: Client::builder(TokioExecutor::new()).build_http(),
                state: Mutex::new(PoolState::default()),
            }),
        };
        let picker = pool.clone();
        registry.register_peer_picker(move || Arc::new(picker.clone()) as Arc<dyn PeerPicker>);
        pool
    }

    /// Replaces the pool's peer set. Each peer is a base URL; the set
    /// should include this process's own `self_url`.
    pub fn set_peers<I>(&self, peers: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut ring = hoard_ring::Map::new(self.inner.replicas);
        let mut getters = HashMap::new();
        for peer in peers {
            let url = peer.as_ref().to_string();
            ring.add([&url]);
            getters.insert(
                url.clone(),
                Arc::new(HttpPeer {
                    client: self.inner.client.clone(),
                    base_url: format!("{}{}", url, self.inner.base_path),
                }),
            );
        }
        let mut state = self.inner.state.lock();
        state.ring = Some(ring);
        state.peers = getters;
    }

    /// Accepts connections forever, serving peer requests.
    ///
    /// # Errors
    ///
    /// Fails only if accepting on the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, remote) = listener.accept().await?;
            let pool = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let pool = pool.clone();
                    async move { Ok::<_, Infallible>(pool.handle(req).await) }
                });
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%remote, error = %err, "peer connection error");
                }
            });
        }
    }

    /// Answers one peer request. Exposed so the pool can be mounted into an
    /// existing server instead of running [`serve`][Self::serve].
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET {
            return plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        let path = req.uri().path();
        let Some((group_name, key)) = self.parse_path(path) else {
            return plain_response(StatusCode::BAD_REQUEST, "bad request");
        };

        let Some(group) = self.inner.registry.get_group(&group_name) else {
            return plain_response(StatusCode::NOT_FOUND, &format!("no such group: {group_name}"));
        };
        group.stats().server_requests.add(1);

        let mut value = Vec::new();
        match group.get(&key, &mut AllocatingByteSliceSink::new(&mut value)).await {
            Ok(()) => Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
                .body(Full::new(Bytes::from(value)))
                .expect("static response parts are valid"),
            Err(err) => {
                warn!(group = %group_name, key = %key, error = %err, "peer request failed");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
            }
        }
    }

    /// Splits `{base_path}{group}/{key}` into decoded group and key.
    fn parse_path(&self, path: &str) -> Option<(String, String)> {
        let rest = path.strip_prefix(&self.inner.base_path)?;
        let (group, key) = rest.split_once('/')?;
        let group = percent_decode_str(group).decode_utf8().ok()?;
        let key = percent_decode_str(key).decode_utf8().ok()?;
        Some((group.into_owned(), key.into_owned()))
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.inner.state.lock();
        let ring = state.ring.as_ref()?;
        let owner = ring.get(key)?;
        if owner == self.inner.self_url {
            return None;
        }
        state
            .peers
            .get(owner)
            .cloned()
            .map(|peer| peer as Arc<dyn PeerGetter>)
    }
}

/// A client handle to one peer.
struct HttpPeer {
    client: HttpClient,
    /// The peer's base URL joined with the pool's base path.
    base_url: String,
}

impl HttpPeer {
    async fn fetch(&self, group: &str, key: &str) -> Result<PeerReply> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            utf8_percent_encode(group, NON_ALPHANUMERIC),
            utf8_percent_encode(key, NON_ALPHANUMERIC),
        );
        let request = Request::builder()
            .method(Method::GET)
            .uri(&url)
            .body(Full::new(Bytes::new()))
            .map_err(Error::peer_transport)?;

        let response = self.client.request(request).await.map_err(Error::peer_transport)?;
        if response.status() != StatusCode::OK {
            return Err(Error::peer_transport(format!(
                "peer returned {}",
                response.status()
            )));
        }

        let minute_qps = response
            .headers()
            .get(MINUTE_QPS_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(Error::peer_transport)?
            .to_bytes();

        Ok(PeerReply {
            value: body.to_vec(),
            minute_qps,
        })
    }
}

impl PeerGetter for HttpPeer {
    fn get<'a>(&'a self, group: &'a str, key: &'a str) -> BoxFuture<'a, Result<PeerReply>> {
        Box::pin(self.fetch(group, key))
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_owned())))
        .expect("static response parts are valid")
}
