//! Built-in storage drivers.

pub mod memory;

use crate::registry::Registry;

/// Register every built-in driver with `registry`.
///
/// # Panics
///
/// Panics if a built-in scheme is already registered.
pub fn register_builtin(registry: &Registry) {
    registry.register("mem", std::sync::Arc::new(memory::MemoryDriver));
    registry.register("memory", std::sync::Arc::new(memory::MemoryDriver));
}
