//! Bonfire Core
//!
//! Shared primitives beneath the session layer:
//! - Fixed-rate simulation time
//! - Cross-thread task dispatch
//! - Math re-export

pub mod dispatch;
pub mod time;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
