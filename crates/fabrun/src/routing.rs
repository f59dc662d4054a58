//! # Request Routing
//!
//! Routing is best effort. A routed method computes a `RoutingKey` from its
//! arguments; an external `Assignment` maps keys to replicas; the dispatcher
//! prefers that replica but falls back to any reachable one.
//!
//! ## Keys
//!
//! Keys are integers, floats, strings, or flat tuples of those. Equal keys
//! produce equal `RoutingKey`s, and equal `RoutingKey`s hash identically, so
//! under a fixed assignment they are always steered to the same replica.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::host::ReplicaId;
use crate::registration::TypeTag;

/// One scalar component of a routing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
}

impl Scalar {
    fn tag(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Uint(_) => 1,
            Self::Float(_) => 2,
            Self::Str(_) => 3,
        }
    }
}

// Floats compare by bit pattern so that keys form a proper equivalence.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Uint(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Uint(a), Self::Uint(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Uint(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{:?}", v),
        }
    }
}

/// A routing key: one scalar or a flat aggregate of scalars.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoutingKey {
    Scalar(Scalar),
    Struct(Vec<Scalar>),
}

impl RoutingKey {
    /// Stable within a build; used for rendezvous placement.
    pub fn hash64(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{}", s),
            Self::Struct(fields) => {
                write!(f, "(")?;
                for (i, s) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Types usable as one field of a routing key.
pub trait ScalarKey: Send + Sync + 'static {
    fn scalar(&self) -> Scalar;
}

/// Types usable as a routing key.
pub trait Key: Send + Sync + 'static {
    fn routing_key(&self) -> RoutingKey;

    fn key_type() -> TypeTag
    where
        Self: Sized,
    {
        TypeTag::of::<Self>()
    }
}

macro_rules! scalar_key {
    ($variant:ident, $repr:ty; $($t:ty),*) => {
        $(
            impl ScalarKey for $t {
                fn scalar(&self) -> Scalar {
                    Scalar::$variant(*self as $repr)
                }
            }

            impl Key for $t {
                fn routing_key(&self) -> RoutingKey {
                    RoutingKey::Scalar(self.scalar())
                }
            }
        )*
    };
}

scalar_key!(Int, i64; i8, i16, i32, i64, isize);
scalar_key!(Uint, u64; u8, u16, u32, u64, usize);
scalar_key!(Float, f64; f32, f64);

impl ScalarKey for String {
    fn scalar(&self) -> Scalar {
        Scalar::Str(self.clone())
    }
}

impl Key for String {
    fn routing_key(&self) -> RoutingKey {
        RoutingKey::Scalar(self.scalar())
    }
}

impl ScalarKey for &'static str {
    fn scalar(&self) -> Scalar {
        Scalar::Str((*self).to_string())
    }
}

impl Key for &'static str {
    fn routing_key(&self) -> RoutingKey {
        RoutingKey::Scalar(self.scalar())
    }
}

macro_rules! tuple_key {
    ($($name:ident),+) => {
        impl<$($name: ScalarKey),+> Key for ($($name,)+) {
            #[allow(non_snake_case)]
            fn routing_key(&self) -> RoutingKey {
                let ($($name,)+) = self;
                RoutingKey::Struct(vec![$($name.scalar()),+])
            }
        }
    };
}

tuple_key!(A);
tuple_key!(A, B);
tuple_key!(A, B, C);
tuple_key!(A, B, C, D);
tuple_key!(A, B, C, D, E);
tuple_key!(A, B, C, D, E, F);

/// A per-component object that computes routing keys for routed methods.
///
/// Handles construct their router with `Default` and call its per-method
/// functions before dispatching. `Key` fixes the single key type shared by
/// every routed method of the component.
pub trait Router: Default + Send + Sync + 'static {
    type Key: Key;
}

/// External replica assignment: which replica should serve a key.
pub trait Assignment: Send + Sync + 'static {
    fn pick(&self, key: &RoutingKey) -> Option<ReplicaId>;
}

/// Highest-random-weight assignment over a fixed replica set.
///
/// Adding or removing a replica only moves the keys that replica wins.
#[derive(Clone, Debug, Default)]
pub struct RendezvousAssignment {
    replicas: Vec<ReplicaId>,
}

impl RendezvousAssignment {
    pub fn new(replicas: impl IntoIterator<Item = ReplicaId>) -> Self {
        let mut replicas: Vec<ReplicaId> = replicas.into_iter().collect();
        replicas.sort();
        replicas.dedup();
        Self { replicas }
    }

    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    fn weight(replica: &ReplicaId, key_hash: u64) -> u64 {
        let mut hasher = DefaultHasher::new();
        replica.hash(&mut hasher);
        key_hash.hash(&mut hasher);
        hasher.finish()
    }
}

impl Assignment for RendezvousAssignment {
    fn pick(&self, key: &RoutingKey) -> Option<ReplicaId> {
        let key_hash = key.hash64();
        self.replicas
            .iter()
            .max_by_key(|r| (Self::weight(r, key_hash), *r))
            .cloned()
    }
}

/// Counts routed calls served by this replica, per key.
///
/// The host drains it with `report()` to feed the external assigner.
#[derive(Debug, Default)]
pub struct LoadCollector {
    counts: DashMap<RoutingKey, u64>,
}

impl LoadCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &RoutingKey) {
        *self.counts.entry(key.clone()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|e| *e.value()).sum()
    }

    /// Drains the collected counts, heaviest keys first.
    pub fn report(&self) -> Vec<(RoutingKey, u64)> {
        let keys: Vec<RoutingKey> = self.counts.iter().map(|e| e.key().clone()).collect();
        let mut out: Vec<(RoutingKey, u64)> = keys
            .into_iter()
            .filter_map(|k| self.counts.remove(&k))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}
