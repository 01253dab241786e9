#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Metadata describing the workload that sent a request.
//!
//! Inbound requests may carry a `baggage` header describing the client
//! workload. That description is combined with the identity the client
//! presented during the TLS handshake and published into the request's
//! [`FilterState`](linkerd_filter_state::FilterState), where routing, access
//! logging and telemetry read it.

mod client_id;
mod metadata;

pub use self::{
    client_id::{ClientId, InvalidClientId},
    metadata::{keys, WorkloadMetadata, WorkloadType},
};
use linkerd_filter_state::{Error, Key, LifeSpan, Object, StateStore, StateType, StreamSharing};
use std::{fmt, sync::Arc};

/// The metadata of the workload that sent the request.
pub const SOURCE_METADATA: Key<WorkloadMetadata> = Key::new("linkerd.source.workload_metadata");

/// The request's baggage header, exactly as it was received.
pub const SOURCE_BAGGAGE: Key<RawBaggage> = Key::new("linkerd.source.workload_metadata_baggage");

/// An unparsed baggage header value, retained so that it may be re-emitted
/// verbatim (e.g. into a response header template).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RawBaggage(Arc<str>);

/// Publishes a request's source workload metadata and, if the request had a
/// baggage header, its raw value.
///
/// Both values are read-only for the rest of the request and are shared with
/// the upstream connection the request is dispatched on, but not with later
/// requests reusing that connection. An error indicates that another
/// middleware already claimed one of the keys.
pub fn publish<S: StateStore>(
    state: &mut S,
    metadata: WorkloadMetadata,
    raw: Option<RawBaggage>,
) -> Result<(), Error> {
    state.set(
        SOURCE_METADATA,
        metadata,
        StateType::ReadOnly,
        LifeSpan::Request,
        StreamSharing::SharedWithUpstreamConnectionOnce,
    )?;
    if let Some(raw) = raw {
        state.set(
            SOURCE_BAGGAGE,
            raw,
            StateType::ReadOnly,
            LifeSpan::Request,
            StreamSharing::SharedWithUpstreamConnectionOnce,
        )?;
    }
    Ok(())
}

// === impl RawBaggage ===

impl RawBaggage {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RawBaggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Object for RawBaggage {
    fn serialize_as_string(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkerd_baggage::parse;
    use linkerd_filter_state::FilterState;

    const HEADER: &str = "workload.name=foo,workload.namespace=bar";

    fn metadata() -> WorkloadMetadata {
        WorkloadMetadata::from_baggage(&parse(HEADER), None)
    }

    #[test]
    fn publishes_read_only() {
        let mut state = FilterState::default();
        publish(&mut state, metadata(), Some(RawBaggage::new(HEADER))).expect("must publish");

        let md = state.get(SOURCE_METADATA).expect("metadata must be published");
        assert_eq!(md.workload_name(), Some("foo"));
        assert_eq!(md.namespace(), Some("bar"));
        assert_eq!(
            state.get(SOURCE_BAGGAGE).map(RawBaggage::as_str),
            Some(HEADER)
        );
        assert_eq!(
            state.serialize_as_string(SOURCE_BAGGAGE.name()).as_deref(),
            Some(HEADER)
        );
        assert_eq!(
            state.upstream_shared_keys(),
            vec![SOURCE_METADATA.name(), SOURCE_BAGGAGE.name()]
        );

        // Values are shared with one upstream connection, but not beyond it.
        let upstream = state.shared_with_upstream();
        assert!(upstream.has(SOURCE_METADATA));
        assert!(upstream.upstream_shared_keys().is_empty());

        let err = publish(&mut state, WorkloadMetadata::default(), None).expect_err("must fail");
        assert!(matches!(err, Error::ReadOnly { .. }));
        assert_eq!(state.get(SOURCE_METADATA), Some(&metadata()));
    }

    #[test]
    fn publishes_without_raw_baggage() {
        let mut state = FilterState::default();
        publish(&mut state, metadata(), None).expect("must publish");
        assert!(state.has(SOURCE_METADATA));
        assert!(!state.has(SOURCE_BAGGAGE));
    }

    #[test]
    fn conflicting_claim() {
        let mut state = FilterState::default();
        state
            .set(
                Key::<String>::new(SOURCE_METADATA.name()),
                "oops".to_string(),
                StateType::Mutable,
                LifeSpan::Request,
                StreamSharing::None,
            )
            .expect("must set");

        let err = publish(&mut state, metadata(), None).expect_err("must fail");
        assert!(matches!(err, Error::ConflictingStateType { .. }));
    }

    #[test]
    fn independent_states_are_identical() {
        let mut a = FilterState::default();
        let mut b = FilterState::default();
        publish(&mut a, metadata(), None).expect("must publish");
        publish(&mut b, metadata(), None).expect("must publish");
        assert_eq!(a.get(SOURCE_METADATA), b.get(SOURCE_METADATA));
    }

    /// A store that refuses every write, standing in for a host whose state
    /// is already claimed.
    struct Refuse;

    impl StateStore for Refuse {
        fn set_data(
            &mut self,
            name: &str,
            _: Arc<dyn Object>,
            _: StateType,
            _: LifeSpan,
            _: StreamSharing,
        ) -> Result<(), Error> {
            Err(Error::ReadOnly {
                name: name.to_string(),
            })
        }

        fn get_data(&self, _: &str) -> Option<&dyn Object> {
            None
        }
    }

    #[test]
    fn store_errors_are_surfaced() {
        let err = publish(&mut Refuse, metadata(), None).expect_err("must fail");
        assert!(matches!(err, Error::ReadOnly { ref name } if name == SOURCE_METADATA.name()));
    }
}
