//! Register-stack configuration.
//!
//! Sizes are tunable per call chain. Defaults suit typical scripts:
//! a small initial allocation that grows by doubling, bounded by a
//! hard limit so runaway recursion surfaces as a catchable error
//! instead of exhausting host memory.

/// Configuration for one register stack.
///
/// # Example
///
/// ```
/// use tarn_core::StackConfig;
///
/// // Deep-recursion configuration for a worker chain
/// let config = StackConfig {
///     max_size: 1 << 22,
///     ..Default::default()
/// };
/// assert!(config.max_size > config.initial_capacity);
/// ```
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Number of register slots allocated up front.
    ///
    /// Default: 64
    pub initial_capacity: usize,

    /// Hard limit on the register stack's size in slots.
    ///
    /// Growth beyond this raises `RuntimeError::StackOverflow` to the
    /// chain's owner.
    ///
    /// Default: 1_048_576 (2^20 slots)
    pub max_size: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            initial_capacity: 64,
            max_size: 1 << 20,
        }
    }
}
