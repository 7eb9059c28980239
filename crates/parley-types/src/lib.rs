//! Core types for Parley remote method invocation.
//!
//! This crate contains the plain data shared by the transport layer and the
//! invocation core: identifiers, calling-convention policies, structured
//! faults and space configuration. It has no runtime dependencies.

pub mod config;
pub mod fault;
pub mod ids;
pub mod policy;

pub use config::{NodeConfig, ParleyConfig, SpaceConfig};
pub use fault::Fault;
pub use ids::{ConnectionId, MethodId, ObjectId, TransactionId};
pub use policy::{ExceptionTransmission, Policy, PolicyOverride, TransportKind};
