//! Protocol message families and their handlers.
//!
//! Each module exposes a `register` function that adds its message types to
//! a [`ProtocolRegistry`]; [`register_all`] installs every family.

pub mod connections;
pub mod discover_features;
pub mod problem_report;
pub mod routing;
pub mod trust_ping;

use crate::registry::ProtocolRegistry;

/// Registers every protocol family handled by the agent.
///
/// Forward messages are not registered: the agent does not act as a mediator.
pub fn register_all(registry: &mut ProtocolRegistry) {
    connections::register(registry);
    discover_features::register(registry);
    problem_report::register(registry);
    trust_ping::register(registry);
}
