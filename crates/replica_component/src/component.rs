//! Core [`Component`] trait and associated metadata.
//!
//! Every piece of data stored in the ECS must implement [`Component`]. The
//! trait requires `Send + Sync + 'static` so the world can be moved onto the
//! simulation thread, and serde support so component state can cross the
//! network boundary.
//!
//! Components whose fields replicate from the server to clients also
//! implement [`NetworkedComponent`]. Everything else is local: it lives on
//! one side only and is never sent.
//!
//! ## Polyglot Type Identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm. It is deterministic and language-neutral,
//! so server and client agree on it without sharing a type table.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::field::FieldValue;

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name using
    /// the FNV-1a 64-bit hash algorithm.
    ///
    /// # Algorithm (FNV-1a 64-bit)
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self::from_name(T::type_name())
    }
}

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Networked field values keyed by field name.
///
/// This is the unit of replication: full snapshots carry every networked
/// field, deltas carry only the fields that changed.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Whether a component's state leaves the process it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replication {
    /// Server-only or client-only state. Never sent.
    Local,
    /// Fields are diffed and replicated from server to clients.
    Networked,
}

/// Metadata about a component type, used by type-erased storage.
#[derive(Debug, Clone)]
pub struct ComponentMeta {
    /// The unique type identifier.
    pub type_id: ComponentTypeId,
    /// The human-readable name of the component (e.g. `"Health"`).
    pub name: &'static str,
    /// Whether the component participates in replication.
    pub replication: Replication,
}

/// The core component trait.
///
/// # Examples
///
/// ```rust
/// use serde::{Serialize, Deserialize};
/// use replica_component::Component;
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn type_name() -> &'static str { "Health" }
/// }
/// ```
pub trait Component: Send + Sync + 'static + Serialize + DeserializeOwned {
    /// A human-readable, stable name for this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }

    /// Whether this component replicates. Overridden by
    /// [`NetworkedComponent`] implementors via [`networked!`](crate::networked).
    fn replication() -> Replication {
        Replication::Local
    }

    /// Returns the [`ComponentMeta`] descriptor for this component type.
    fn meta() -> ComponentMeta {
        ComponentMeta {
            type_id: Self::component_type_id(),
            name: Self::type_name(),
            replication: Self::replication(),
        }
    }
}

/// A component whose fields replicate from the authoritative side to
/// replicas.
///
/// The default `get_state` / `handle_state` pair implements automatic
/// state handling: the component is encoded as a MessagePack map and the
/// fields named in [`NetworkedComponent::NETWORKED_FIELDS`] (all of them when
/// `None`) form its replicated state. A unit struct has no fields; its
/// presence is its whole state. Components that need custom diff logic
/// override both methods.
///
/// `Default` is required because a replica synthesises a default instance
/// when state arrives for a component it has never seen.
pub trait NetworkedComponent: Component + Default {
    /// Names of the fields that replicate. `None` means every serialised field.
    const NETWORKED_FIELDS: Option<&'static [&'static str]> = None;

    /// Extract the networked subset of this component's fields.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the component does not serialise to a
    /// struct-like map or a unit.
    fn get_state(&self) -> Result<FieldMap, StateError> {
        Ok(to_fields::<Self>(self)?
            .into_iter()
            .filter(|(name, _)| is_networked_field::<Self>(name))
            .collect())
    }

    /// Write replicated fields into this instance. Fields absent from
    /// `fields` keep their current value. On error `self` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the merged state does not deserialise back
    /// into `Self`.
    fn handle_state(&mut self, fields: &FieldMap) -> Result<(), StateError> {
        let mut merged = to_fields::<Self>(self)?;
        let mut touched = false;
        for (name, field) in fields {
            if is_networked_field::<Self>(name) {
                merged.insert(name.clone(), field.clone());
                touched = true;
            }
        }
        if !touched {
            return Ok(());
        }
        let map = FieldValue::Map(
            merged
                .into_iter()
                .map(|(name, value)| (FieldValue::Str(name), value))
                .collect(),
        );
        *self = rmp_serde::from_slice(&rmp_serde::to_vec(&map)?)?;
        Ok(())
    }
}

/// Every serialised field of `value`, networked or not.
fn to_fields<T: Component>(value: &T) -> Result<FieldMap, StateError> {
    let encoded = rmp_serde::to_vec_named(value)?;
    match rmp_serde::from_slice::<FieldValue>(&encoded)? {
        FieldValue::Nil => Ok(FieldMap::new()),
        FieldValue::Map(entries) => entries
            .into_iter()
            .map(|(name, value)| match name {
                FieldValue::Str(name) => Ok((name, value)),
                _ => Err(StateError::NotAStruct(T::type_name())),
            })
            .collect(),
        _ => Err(StateError::NotAStruct(T::type_name())),
    }
}

fn is_networked_field<T: NetworkedComponent>(name: &str) -> bool {
    T::NETWORKED_FIELDS.is_none_or(|fields| fields.contains(&name))
}

/// Implements [`Component`] and [`NetworkedComponent`] for a type in one go.
///
/// An optional `#[fields(...)]` prefix restricts replication to the named
/// fields; the remaining fields stay local.
///
/// ```rust
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Health { current: f32, max: f32 }
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Door { open: bool, close_timer: f32 }
///
/// replica_component::networked!(Health, "Health");
/// replica_component::networked!(#[fields("open")] Door, "Door");
/// ```
#[macro_export]
macro_rules! networked {
    (#[fields($($field:literal),* $(,)?)] $ty:ty, $name:expr) => {
        impl $crate::Component for $ty {
            fn type_name() -> &'static str {
                $name
            }

            fn replication() -> $crate::Replication {
                $crate::Replication::Networked
            }
        }

        impl $crate::NetworkedComponent for $ty {
            const NETWORKED_FIELDS: Option<&'static [&'static str]> = Some(&[$($field),*]);
        }
    };
    ($ty:ty, $name:expr) => {
        impl $crate::Component for $ty {
            fn type_name() -> &'static str {
                $name
            }

            fn replication() -> $crate::Replication {
                $crate::Replication::Networked
            }
        }

        impl $crate::NetworkedComponent for $ty {}
    };
}

/// Fields whose value differs between `previous` and `current`.
///
/// Fields present in `previous` but missing from `current` are reported as
/// [`FieldValue::Nil`] so the replica clears them.
#[must_use]
pub fn diff_fields(previous: &FieldMap, current: &FieldMap) -> FieldMap {
    let mut changed: FieldMap = current
        .iter()
        .filter(|(name, value)| previous.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    for name in previous.keys() {
        if !current.contains_key(name) {
            changed.insert(name.clone(), FieldValue::Nil);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Health {
        current: f32,
        max: f32,
    }

    crate::networked!(Health, "Health");

    #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Airlock {
        open: bool,
        welded: bool,
        server_timer: f32,
    }

    crate::networked!(#[fields("open", "welded")] Airlock, "Airlock");

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    struct Marker;

    impl Component for Marker {
        fn type_name() -> &'static str {
            "Marker"
        }
    }

    #[test]
    fn test_component_type_id_is_stable() {
        assert_eq!(Health::component_type_id(), Health::component_type_id());
    }

    #[test]
    fn test_component_type_id_matches_from_name() {
        assert_eq!(
            Health::component_type_id(),
            ComponentTypeId::from_name("Health")
        );
        assert_eq!(ComponentTypeId::of::<Health>(), Health::component_type_id());
    }

    #[test]
    fn test_component_type_id_differs_between_types() {
        assert_ne!(Health::component_type_id(), Airlock::component_type_id());
    }

    #[test]
    fn test_fnv1a_known_vector() {
        // FNV-1a 64-bit of empty string is the offset basis itself.
        assert_eq!(
            ComponentTypeId::from_name(""),
            ComponentTypeId(0xcbf2_9ce4_8422_2325)
        );
    }

    #[test]
    fn test_meta_reports_replication() {
        assert_eq!(Health::meta().replication, Replication::Networked);
        assert_eq!(Marker::meta().replication, Replication::Local);
        assert_eq!(Health::meta().name, "Health");
    }

    #[test]
    fn test_get_state_returns_all_fields_by_default() {
        let state = Health {
            current: 80.0,
            max: 100.0,
        }
        .get_state()
        .unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state["current"], FieldValue::F32(80.0));
    }

    #[test]
    fn test_get_state_filters_local_fields() {
        let state = Airlock {
            open: true,
            welded: false,
            server_timer: 3.5,
        }
        .get_state()
        .unwrap();
        assert!(state.contains_key("open"));
        assert!(state.contains_key("welded"));
        assert!(!state.contains_key("server_timer"));
    }

    #[test]
    fn test_handle_state_preserves_unsent_fields() {
        let mut replica = Health {
            current: 100.0,
            max: 100.0,
        };
        let mut fields = FieldMap::new();
        fields.insert("current".into(), FieldValue::F32(80.0));
        replica.handle_state(&fields).unwrap();
        assert_eq!(
            replica,
            Health {
                current: 80.0,
                max: 100.0
            }
        );
    }

    #[test]
    fn test_handle_state_ignores_non_networked_fields() {
        let mut replica = Airlock::default();
        let mut fields = FieldMap::new();
        fields.insert("open".into(), FieldValue::Bool(true));
        fields.insert("server_timer".into(), FieldValue::F32(9.0));
        replica.handle_state(&fields).unwrap();
        assert!(replica.open);
        assert_eq!(replica.server_timer, 0.0);
    }

    #[test]
    fn test_unit_struct_state_is_empty() {
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Cuffed;
        crate::networked!(Cuffed, "Cuffed");

        assert!(Cuffed.get_state().unwrap().is_empty());
        let mut replica = Cuffed;
        replica.handle_state(&FieldMap::new()).unwrap();
        assert_eq!(replica, Cuffed);
    }

    #[test]
    fn test_non_finite_fields_roundtrip() {
        let source = Health {
            current: f32::INFINITY,
            max: f32::NAN,
        };
        let mut replica = Health::default();
        replica.handle_state(&source.get_state().unwrap()).unwrap();
        assert_eq!(replica.current, f32::INFINITY);
        assert!(replica.max.is_nan());
    }

    #[test]
    fn test_rejected_state_leaves_component_untouched() {
        let mut replica = Health {
            current: 10.0,
            max: 20.0,
        };
        let mut fields = FieldMap::new();
        fields.insert("current".into(), FieldValue::F32(5.0));
        fields.insert("max".into(), FieldValue::from("lots"));
        assert!(replica.handle_state(&fields).is_err());
        assert_eq!(
            replica,
            Health {
                current: 10.0,
                max: 20.0
            }
        );
    }

    #[test]
    fn test_diff_fields_reports_only_changes() {
        let before = Health {
            current: 100.0,
            max: 100.0,
        }
        .get_state()
        .unwrap();
        let after = Health {
            current: 80.0,
            max: 100.0,
        }
        .get_state()
        .unwrap();
        let diff = diff_fields(&before, &after);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["current"], FieldValue::F32(80.0));
        assert!(diff_fields(&after, &after).is_empty());
    }

    #[test]
    fn test_diff_fields_nulls_removed_fields() {
        let mut before = FieldMap::new();
        before.insert("gone".into(), FieldValue::UInt(1));
        let diff = diff_fields(&before, &FieldMap::new());
        assert_eq!(diff["gone"], FieldValue::Nil);
    }
}
