// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Named-group registration and one-shot peer-picker installation.
//!
//! A [`Registry`] maps group names to [`Group`]s and owns the process's
//! peer-picker hook. Most programs use the process-wide default through the
//! free functions ([`new_group`], [`get_group`], [`register_peer_picker`]);
//! an explicit registry exists for programs embedding several independent
//! cache "processes" — notably tests that run a whole peer fleet in one
//! binary.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;

use crate::{
    Getter, Group,
    group::GroupBuilder,
    peers::PeerPicker,
};

type PickerFactory = Box<dyn Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync>;

/// A namespace of groups with a one-shot peer-picker hook.
///
/// Handles are cheap to clone and share the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    groups: RwLock<HashMap<String, Group>>,
    picker: OnceLock<PickerFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("groups", &self.inner.groups.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                groups: RwLock::new(HashMap::new()),
                picker: OnceLock::new(),
            }),
        }
    }

    /// Returns the process-wide default registry.
    #[must_use]
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Creates and registers a group with default options.
    ///
    /// See [`Group::builder`] for expiration and other knobs.
    ///
    /// # Panics
    ///
    /// Panics if a group named `name` already exists.
    #[must_use]
    pub fn new_group(&self, name: impl Into<String>, cache_bytes: i64, getter: impl Getter) -> Group {
        Group::builder(name, cache_bytes, getter).register(self)
    }

    /// Returns the named group, if registered.
    #[must_use]
    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.inner.groups.read().get(name).cloned()
    }

    /// Installs the peer-picker hook shared by every group in this
    /// registry. Groups materialize their picker lazily on first load, so
    /// the hook may be installed before or after groups are created.
    ///
    /// # Panics
    ///
    /// Panics if a hook was already installed.
    pub fn register_peer_picker(&self, picker: impl Fn() -> Arc<dyn PeerPicker> + Send + Sync + 'static) {
        self.install_picker(Box::new(move |_| picker()));
    }

    /// Installs a per-group peer-picker hook: the factory receives each
    /// group's name, so different groups can span different peer subsets.
    ///
    /// # Panics
    ///
    /// Panics if a hook was already installed.
    pub fn register_per_group_peer_picker(
        &self,
        picker: impl Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync + 'static,
    ) {
        self.install_picker(Box::new(picker));
    }

    fn install_picker(&self, factory: PickerFactory) {
        assert!(
            self.inner.picker.set(factory).is_ok(),
            "register_peer_picker called more than once"
        );
    }

    pub(crate) fn register(&self, builder: GroupBuilder) -> Group {
        let mut groups = self.inner.groups.write();
        assert!(
            !groups.contains_key(builder.name()),
            "duplicate registration of group {}",
            builder.name()
        );
        let group = builder.build(Arc::downgrade(&self.inner));
        groups.insert(group.name().to_owned(), group.clone());
        group
    }
}

impl RegistryInner {
    /// Resolves the peer picker for a group, if a hook is installed.
    pub(crate) fn picker_for(&self, group: &str) -> Option<Arc<dyn PeerPicker>> {
        self.picker.get().map(|factory| factory(group))
    }
}

/// Creates and registers a group in the process-wide default registry.
///
/// # Panics
///
/// Panics if a group named `name` already exists.
#[must_use]
pub fn new_group(name: impl Into<String>, cache_bytes: i64, getter: impl Getter) -> Group {
    Registry::global().new_group(name, cache_bytes, getter)
}

/// Returns the named group from the process-wide default registry.
#[must_use]
pub fn get_group(name: &str) -> Option<Group> {
    Registry::global().get_group(name)
}

/// Installs the peer-picker hook on the process-wide default registry.
///
/// # Panics
///
/// Panics if a hook was already installed.
pub fn register_peer_picker(picker: impl Fn() -> Arc<dyn PeerPicker> + Send + Sync + 'static) {
    Registry::global().register_peer_picker(picker);
}

/// Installs a per-group peer-picker hook on the process-wide default
/// registry.
///
/// # Panics
///
/// Panics if a hook was already installed.
pub fn register_per_group_peer_picker(picker: impl Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync + 'static) {
    Registry::global().register_per_group_peer_picker(picker);
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::{GetterError, Sink};

    struct NullGetter;

    impl Getter for NullGetter {
        fn get<'a>(
            &'a self,
            _key: &'a str,
            dest: &'a mut dyn Sink,
        ) -> BoxFuture<'a, Result<(), GetterError>> {
            Box::pin(async move {
                dest.set_string("")?;
                Ok(())
            })
        }
    }

    #[test]
    fn groups_are_retrievable_by_name() {
        let registry = Registry::new();
        let group = registry.new_group("lookup", 1024, NullGetter);
        assert_eq!(group.name(), "lookup");

        let found = registry.get_group("lookup").expect("group registered");
        assert_eq!(found.name(), "lookup");
        assert!(registry.get_group("absent").is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate registration of group twice")]
    fn duplicate_names_panic() {
        let registry = Registry::new();
        let _a = registry.new_group("twice", 1024, NullGetter);
        let _b = registry.new_group("twice", 1024, NullGetter);
    }

    #[test]
    #[should_panic(expected = "register_peer_picker called more than once")]
    fn picker_hook_is_one_shot() {
        let registry = Registry::new();
        registry.register_peer_picker(|| Arc::new(crate::NoPeers));
        registry.register_peer_picker(|| Arc::new(crate::NoPeers));
    }

    #[test]
    fn registries_are_independent() {
        let a = Registry::new();
        let b = Registry::new();
        let _group = a.new_group("shared-name", 1024, NullGetter);
        // The same name is free in an unrelated registry.
        let _group = b.new_group("shared-name", 1024, NullGetter);
        assert!(b.get_group("shared-name").is_some());
    }
}
