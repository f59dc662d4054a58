//! # fabrun
//!
//! Runtime core of a component framework for distributed applications.
//! A component is an interface implemented somewhere in a fleet of
//! processes; `fabrun` turns a reference to it into either the local
//! implementation or a proxy that forwards calls, and steers routed calls
//! toward the replica that owns their key.

pub mod component;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lazy;
pub mod listener;
pub mod metrics;
pub mod mock_transport;
pub mod registration;
pub mod registry;
pub mod routing;
pub mod runtime;
pub mod stub;
pub mod transport;

pub use crate::context::InitContext;
pub use crate::dispatch::Dispatcher;
pub use crate::dispatch::Route;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::host::Host;
pub use crate::host::ReplicaId;
pub use crate::host::StaticHost;
pub use crate::registration::Registration;
pub use crate::registry::Registry;
pub use crate::routing::Key;
pub use crate::routing::Router;
pub use crate::runtime::Runtime;
pub use crate::stub::ServerStub;
