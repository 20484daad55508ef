//! CONVOY Storage - Projections, Registry and Leases
//!
//! Everything that turns the append-only log into queryable state lives
//! here: the projection engine, the per-project writer path, the explicit
//! project registry, the lease manager and supervised rebuilds.

mod lease;
mod names;
mod project;
mod projection;
mod rebuild;
mod registry;

pub use lease::LeaseManager;
pub use names::unique_agent_name;
pub use project::{ProjectHandle, RegisterAgent, SendMessage};
pub use projection::ProjectionState;
pub use rebuild::{RebuildStatus, RebuildTask};
pub use registry::{ProjectRegistry, RegistryConfig};
