#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Publishes the workload that sent a request into the request's filter
//! state.
//!
//! The `baggage` header of each request is parsed, combined with the
//! connection's verified peer identity and published as
//! [`SOURCE_METADATA`](linkerd_workload_metadata::SOURCE_METADATA), alongside
//! the raw header value as
//! [`SOURCE_BAGGAGE`](linkerd_workload_metadata::SOURCE_BAGGAGE). Requests are
//! otherwise forwarded untouched: the middleware never modifies headers or
//! bodies and never responds on its own behalf.

pub mod config;

pub use self::config::Config;
use futures::{future, TryFutureExt};
use http::header::{HeaderMap, HeaderName};
use linkerd_baggage::Baggage;
use linkerd_filter_state::FilterState;
use linkerd_workload_metadata::{self as workload, ClientId, RawBaggage, WorkloadMetadata};
use std::task::{Context, Poll};
use tracing::{debug, trace};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Reads the verified identity of the peer that sent a request.
pub trait ExtractClientId<B> {
    fn extract_client_id(&self, req: &http::Request<B>) -> Option<ClientId>;
}

/// Reads a [`ClientId`] inserted into request extensions by the server stack
/// that terminated TLS.
#[derive(Copy, Clone, Debug, Default)]
pub struct ClientIdExtension(());

#[derive(Clone, Debug)]
pub struct HandleBaggage<X, S> {
    inner: S,
    extract: X,
    config: Config,
}

// === impl HandleBaggage ===

impl<X: Clone, S> HandleBaggage<X, S> {
    fn new(config: Config, extract: X, inner: S) -> Self {
        Self {
            inner,
            extract,
            config,
        }
    }

    pub fn layer_via(
        config: Config,
        extract: X,
    ) -> impl tower::layer::Layer<S, Service = Self> + Clone {
        tower::layer::layer_fn(move |inner| Self::new(config.clone(), extract.clone(), inner))
    }
}

impl<S> HandleBaggage<ClientIdExtension, S> {
    pub fn layer(config: Config) -> impl tower::layer::Layer<S, Service = Self> + Clone {
        Self::layer_via(config, ClientIdExtension::default())
    }
}

impl<X, S> HandleBaggage<X, S> {
    fn publish<B>(&self, req: &mut http::Request<B>) -> Result<(), linkerd_filter_state::Error>
    where
        X: ExtractClientId<B>,
    {
        let peer = self.extract.extract_client_id(req);
        let (baggage, raw) = match joined(req.headers(), &self.config.header) {
            Some(raw) => (linkerd_baggage::parse(&raw), Some(RawBaggage::new(raw))),
            None => {
                trace!(header = %self.config.header, "No baggage header found");
                if peer.is_none() || !self.config.publish_peer_only {
                    return Ok(());
                }
                (Baggage::default(), None)
            }
        };

        let metadata = WorkloadMetadata::from_baggage(&baggage, peer.as_ref());
        trace!(?metadata, "Publishing source workload metadata");

        // Reuse the request's filter state if an earlier middleware created it.
        let mut state = req
            .extensions_mut()
            .remove::<FilterState>()
            .unwrap_or_default();
        let published = workload::publish(&mut state, metadata, raw);
        req.extensions_mut().insert(state);
        published
    }
}

impl<X, S, B> tower::Service<http::Request<B>> for HandleBaggage<X, S>
where
    X: ExtractClientId<B>,
    S: tower::Service<http::Request<B>>,
    S::Error: Into<Error>,
{
    type Response = S::Response;
    type Error = Error;
    type Future = future::Either<
        future::Ready<Result<S::Response, Error>>,
        future::ErrInto<S::Future, Error>,
    >;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        if let Err(error) = self.publish(&mut req) {
            // Another middleware claimed the keys this one owns.
            debug!(%error, "Failed to publish source workload metadata");
            return future::Either::Left(future::err(error.into()));
        }

        // Responses are passed through as-is.
        future::Either::Right(self.inner.call(req).err_into::<Error>())
    }
}

/// Joins all values of a header, as a comma-separated list, in the order they
/// were received.
///
/// Bytes that are not valid UTF-8 are replaced rather than discarding the
/// line, so that the line's other members are still parsed. Returns `None` if
/// there are no values or if the joined value is blank.
fn joined(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let mut values = headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()));

    let mut joined = values.next()?.into_owned();
    for v in values {
        joined.push(',');
        joined.push_str(&v);
    }
    if joined.trim().is_empty() {
        return None;
    }
    Some(joined)
}

// === impl ClientIdExtension ===

impl<B> ExtractClientId<B> for ClientIdExtension {
    fn extract_client_id(&self, req: &http::Request<B>) -> Option<ClientId> {
        req.extensions().get::<ClientId>().cloned()
    }
}

impl<B, F> ExtractClientId<B> for F
where
    F: Fn(&http::Request<B>) -> Option<ClientId>,
{
    fn extract_client_id(&self, req: &http::Request<B>) -> Option<ClientId> {
        (self)(req)
    }
}
