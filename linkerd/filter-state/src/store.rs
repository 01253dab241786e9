use crate::{downcast_ref, Error, Key, LifeSpan, Object, StateStore, StateType, StreamSharing};
use std::{collections::HashMap, sync::Arc};
use tracing::trace;

/// An in-memory [`StateStore`].
///
/// A request's store is carried in its `http::Extensions`. Cloning a store
/// shares the stored values; the values themselves are never mutated through
/// a shared reference.
#[derive(Clone, Debug)]
pub struct FilterState {
    life_span: LifeSpan,
    data: HashMap<String, Slot>,
}

#[derive(Clone, Debug)]
struct Slot {
    value: Arc<dyn Object>,
    state_type: StateType,
    life_span: LifeSpan,
    sharing: StreamSharing,
}

// === impl FilterState ===

impl FilterState {
    pub fn new(life_span: LifeSpan) -> Self {
        Self {
            life_span,
            data: HashMap::default(),
        }
    }

    pub fn life_span(&self) -> LifeSpan {
        self.life_span
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has<T: Object>(&self, key: Key<T>) -> bool {
        self.get(key).is_some()
    }

    /// Like [`StateStore::get`], but distinguishes a missing value from a
    /// value of another type.
    pub fn try_get<T: Object>(&self, key: Key<T>) -> Result<Option<&T>, Error> {
        match self.data.get(key.name()) {
            None => Ok(None),
            Some(slot) => downcast_ref(&*slot.value)
                .map(Some)
                .ok_or_else(|| Error::TypeMismatch {
                    name: key.name().to_string(),
                    expected: std::any::type_name::<T>(),
                }),
        }
    }

    /// Returns a mutable reference to a [`StateType::Mutable`] value.
    ///
    /// Fails for read-only values, and for values that are currently shared
    /// with an upstream connection's store.
    pub fn get_mut<T: Object>(&mut self, key: Key<T>) -> Result<Option<&mut T>, Error> {
        let name = key.name();
        let slot = match self.data.get_mut(name) {
            Some(slot) => slot,
            None => return Ok(None),
        };
        if slot.state_type == StateType::ReadOnly {
            return Err(Error::ReadOnly {
                name: name.to_string(),
            });
        }
        let obj = Arc::get_mut(&mut slot.value).ok_or_else(|| Error::Shared {
            name: name.to_string(),
        })?;
        obj.as_any_mut()
            .downcast_mut()
            .map(Some)
            .ok_or_else(|| Error::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn serialize_as_string(&self, name: &str) -> Option<String> {
        self.data.get(name)?.value.serialize_as_string()
    }

    /// The names of values that are propagated to upstream connections, in
    /// sorted order.
    ///
    /// A pooled upstream connection may only be reused by requests that share
    /// these values.
    pub fn upstream_shared_keys(&self) -> Vec<&str> {
        let mut keys = self
            .data
            .iter()
            .filter(|(_, slot)| slot.sharing != StreamSharing::None)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    /// Builds the store of an upstream connection established for this
    /// request.
    ///
    /// Values shared with the upstream connection are copied into a
    /// connection-scoped store. Values shared only once lose their sharing in
    /// the copy, so they are not propagated again when the connection is
    /// reused.
    pub fn shared_with_upstream(&self) -> Self {
        let data = self
            .data
            .iter()
            .filter_map(|(name, slot)| {
                let sharing = match slot.sharing {
                    StreamSharing::None => return None,
                    StreamSharing::SharedWithUpstreamConnection => {
                        StreamSharing::SharedWithUpstreamConnection
                    }
                    StreamSharing::SharedWithUpstreamConnectionOnce => StreamSharing::None,
                };
                let slot = Slot {
                    value: slot.value.clone(),
                    state_type: slot.state_type,
                    life_span: LifeSpan::Connection,
                    sharing,
                };
                Some((name.clone(), slot))
            })
            .collect();
        Self {
            life_span: LifeSpan::Connection,
            data,
        }
    }
}

impl StateStore for FilterState {
    fn set_data(
        &mut self,
        name: &str,
        value: Arc<dyn Object>,
        state_type: StateType,
        life_span: LifeSpan,
        sharing: StreamSharing,
    ) -> Result<(), Error> {
        if life_span > self.life_span {
            return Err(Error::LifeSpanExceeded {
                name: name.to_string(),
                requested: life_span,
                store: self.life_span,
            });
        }

        if let Some(prior) = self.data.get(name) {
            if prior.state_type == StateType::ReadOnly {
                return Err(Error::ReadOnly {
                    name: name.to_string(),
                });
            }
            if prior.state_type != state_type {
                return Err(Error::ConflictingStateType {
                    name: name.to_string(),
                });
            }
            if prior.life_span != life_span {
                return Err(Error::ConflictingLifeSpan {
                    name: name.to_string(),
                });
            }
        }

        trace!(%name, ?state_type, ?life_span, ?sharing, "Setting filter state");
        self.data.insert(
            name.to_string(),
            Slot {
                value,
                state_type,
                life_span,
                sharing,
            },
        );
        Ok(())
    }

    fn get_data(&self, name: &str) -> Option<&dyn Object> {
        self.data.get(name).map(|slot| &*slot.value)
    }
}

impl Default for FilterState {
    fn default() -> Self {
        Self::new(LifeSpan::Request)
    }
}
