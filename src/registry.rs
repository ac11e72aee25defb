//! Named-channel lookup in nested scopes.
//!
//! Scopes form a tree rooted at a process-global node. Looking a name up
//! walks from the local scope through its parents to the global root;
//! creation inserts into the scope the caller selected. Mutation of one
//! scope node is serialized by that node's lock, which is all the core
//! requires of the registry.
//!
//! Channels are stored type-erased; retrieving a name under the wrong
//! payload type is reported, not masked.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::channel::Channel;

/// Error from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The name is already bound to a channel with a different payload type.
    #[error("channel name {name:?} is bound to a different payload type")]
    TypeMismatch {
        /// The conflicting name.
        name: String,
    },
    /// Registration was requested for a builder without a name.
    #[error("registering a channel requires a name")]
    MissingName,
}

/// One node in the scope tree.
#[derive(Debug)]
pub struct Scope {
    parent: Option<Arc<Scope>>,
    entries: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl Scope {
    /// The process-global root scope.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Scope>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(Self {
                parent: None,
                entries: Mutex::new(HashMap::new()),
            })
        }))
    }

    /// A fresh scope nested under `parent`.
    #[must_use]
    pub fn nested(parent: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(parent)),
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// A fresh scope nested directly under the global root.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::nested(&Self::global())
    }

    /// Looks `name` up in this scope, then its parents. Returns `None` if
    /// the name is unbound anywhere on the chain, or bound to a different
    /// payload type.
    #[must_use]
    pub fn find<T: Send + 'static>(&self, name: &str) -> Option<Channel<T>> {
        if let Some(found) = self.find_local::<T>(name) {
            return Some(found);
        }
        let mut next = self.parent.clone();
        while let Some(scope) = next {
            if let Some(found) = scope.find_local::<T>(name) {
                return Some(found);
            }
            next = scope.parent.clone();
        }
        None
    }

    /// Returns the channel bound to `name` on the scope chain, or binds the
    /// factory's channel in **this** scope and returns it.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the name is bound to another payload type anywhere
    /// the walk looks.
    pub fn get_or_create<T: Send + 'static>(
        &self,
        name: &str,
        factory: impl FnOnce() -> Channel<T>,
    ) -> Result<Channel<T>, RegistryError> {
        // Walk parents without holding this node's lock.
        let mut next = self.parent.clone();
        while let Some(scope) = next {
            match scope.lookup::<T>(name) {
                Lookup::Found(chan) => return Ok(chan),
                Lookup::WrongType => {
                    return Err(RegistryError::TypeMismatch {
                        name: name.to_owned(),
                    })
                }
                Lookup::Absent => {}
            }
            next = scope.parent.clone();
        }
        let mut entries = self.entries.lock().expect("scope lock poisoned");
        if let Some(existing) = entries.get(name) {
            return existing
                .downcast_ref::<Channel<T>>()
                .cloned()
                .ok_or_else(|| RegistryError::TypeMismatch {
                    name: name.to_owned(),
                });
        }
        let chan = factory();
        entries.insert(name.to_owned(), Box::new(chan.clone()));
        tracing::trace!(name, channel = %chan.id(), "channel registered");
        Ok(chan)
    }

    fn find_local<T: Send + 'static>(&self, name: &str) -> Option<Channel<T>> {
        match self.lookup::<T>(name) {
            Lookup::Found(chan) => Some(chan),
            _ => None,
        }
    }

    fn lookup<T: Send + 'static>(&self, name: &str) -> Lookup<T> {
        let entries = self.entries.lock().expect("scope lock poisoned");
        match entries.get(name) {
            None => Lookup::Absent,
            Some(entry) => entry
                .downcast_ref::<Channel<T>>()
                .cloned()
                .map_or(Lookup::WrongType, Lookup::Found),
        }
    }
}

enum Lookup<T> {
    Found(Channel<T>),
    WrongType,
    Absent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_binds_once() {
        let scope = Scope::new();
        let first = scope
            .get_or_create("pipeline", Channel::<i32>::rendezvous)
            .expect("bound");
        let second = scope
            .get_or_create("pipeline", Channel::<i32>::rendezvous)
            .expect("found");
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn find_walks_to_the_parent() {
        let parent = Scope::new();
        let child = Scope::nested(&parent);
        let chan = parent
            .get_or_create("upstream", Channel::<String>::rendezvous)
            .expect("bound");
        let found = child.find::<String>("upstream").expect("visible in child");
        assert_eq!(found.id(), chan.id());
    }

    #[test]
    fn child_binding_shadows_nothing_upward() {
        let parent = Scope::new();
        let child = Scope::nested(&parent);
        child
            .get_or_create("local", Channel::<i32>::rendezvous)
            .expect("bound in child");
        assert!(parent.find::<i32>("local").is_none());
    }

    #[test]
    fn get_or_create_prefers_the_parent_binding() {
        let parent = Scope::new();
        let child = Scope::nested(&parent);
        let upstream = parent
            .get_or_create("shared", Channel::<i32>::rendezvous)
            .expect("bound in parent");
        let via_child = child
            .get_or_create("shared", Channel::<i32>::rendezvous)
            .expect("found upstream");
        assert_eq!(upstream.id(), via_child.id());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let scope = Scope::new();
        scope
            .get_or_create("typed", Channel::<i32>::rendezvous)
            .expect("bound");
        let err = scope
            .get_or_create("typed", Channel::<String>::rendezvous)
            .expect_err("wrong type");
        assert_eq!(
            err,
            RegistryError::TypeMismatch {
                name: "typed".to_owned()
            }
        );
        assert!(scope.find::<String>("typed").is_none());
    }

    #[test]
    fn unbound_name_is_absent() {
        let scope = Scope::new();
        assert!(scope.find::<i32>("missing").is_none());
    }

    #[test]
    fn builder_registration_round_trips() {
        let scope = Scope::new();
        let chan = Channel::<u64>::builder()
            .capacity(4)
            .name("jobs")
            .register(&scope)
            .expect("registered");
        let found = scope.find::<u64>("jobs").expect("bound");
        assert_eq!(found.id(), chan.id());
        let err = Channel::<u64>::builder()
            .register(&scope)
            .expect_err("name required");
        assert_eq!(err, RegistryError::MissingName);
    }
}
