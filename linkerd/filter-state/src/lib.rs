#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Typed state attached to a request as it moves through the proxy.
//!
//! Middlewares publish values under well-known names so that later stages
//! (routing, access logging, upstream connection selection) can read them
//! without recomputing them. Every value is published with a [`StateType`],
//! a [`LifeSpan`] and a [`StreamSharing`] policy; the store enforces that
//! read-only values are never replaced for the remainder of their lifespan.

mod store;

pub use self::store::FilterState;
use std::{any::Any, fmt, marker::PhantomData, sync::Arc};
use thiserror::Error;

/// A value that may be stored in a [`StateStore`].
pub trait Object: AsAny + fmt::Debug + Send + Sync + 'static {
    /// Renders the value for access logs and header templating.
    fn serialize_as_string(&self) -> Option<String> {
        None
    }
}

/// Exposes a stored object for downcasting.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Whether a value may be replaced or modified after it is set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StateType {
    ReadOnly,
    Mutable,
}

/// How long a value is retained.
///
/// Lifespans are ordered: a store may only hold values that do not outlive
/// it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum LifeSpan {
    FilterChain,
    Request,
    Connection,
}

/// Whether a value is propagated to the upstream connection a request is
/// dispatched on. Shared values participate in connection pooling, since a
/// pooled connection may only be reused by requests carrying equal values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StreamSharing {
    /// The value is never propagated upstream.
    None,
    /// The value is propagated to the upstream connection and retained by it.
    SharedWithUpstreamConnection,
    /// The value is propagated to the upstream connection, but not further:
    /// the copy held by the connection is not shared again when the
    /// connection is reused.
    SharedWithUpstreamConnectionOnce,
}

/// A well-known name under which values of type `T` are stored.
pub struct Key<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("filter state {name} is read-only")]
    ReadOnly { name: String },

    #[error("filter state {name} was set with a different state type")]
    ConflictingStateType { name: String },

    #[error("filter state {name} was set with a different lifespan")]
    ConflictingLifeSpan { name: String },

    #[error("filter state {name} with lifespan {requested:?} outlives its {store:?} store")]
    LifeSpanExceeded {
        name: String,
        requested: LifeSpan,
        store: LifeSpan,
    },

    #[error("filter state {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("filter state {name} is shared and cannot be modified")]
    Shared { name: String },
}

/// A per-request key/value store.
///
/// This is the contract middlewares depend on; [`FilterState`] is the
/// in-memory implementation carried in request extensions.
pub trait StateStore {
    /// Stores `value` under `name`.
    ///
    /// Fails if `name` already holds a read-only value, or a mutable value set
    /// with a different state type or lifespan.
    fn set_data(
        &mut self,
        name: &str,
        value: Arc<dyn Object>,
        state_type: StateType,
        life_span: LifeSpan,
        sharing: StreamSharing,
    ) -> Result<(), Error>;

    fn get_data(&self, name: &str) -> Option<&dyn Object>;

    fn has_data(&self, name: &str) -> bool {
        self.get_data(name).is_some()
    }

    fn set<T: Object>(
        &mut self,
        key: Key<T>,
        value: T,
        state_type: StateType,
        life_span: LifeSpan,
        sharing: StreamSharing,
    ) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.set_data(key.name, Arc::new(value), state_type, life_span, sharing)
    }

    /// Returns the value stored under `key`, if it has the key's type.
    fn get<T: Object>(&self, key: Key<T>) -> Option<&T>
    where
        Self: Sized,
    {
        self.get_data(key.name).and_then(downcast_ref)
    }
}

fn downcast_ref<T: Object>(obj: &dyn Object) -> Option<&T> {
    obj.as_any().downcast_ref()
}

// === impl AsAny ===

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// === impl Key ===

impl<T> Key<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.name).finish()
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// === impl Object ===

impl Object for String {
    fn serialize_as_string(&self) -> Option<String> {
        Some(self.clone())
    }
}

#[cfg(test)]
impl Object for u64 {
    fn serialize_as_string(&self) -> Option<String> {
        Some(self.to_string())
    }
}
