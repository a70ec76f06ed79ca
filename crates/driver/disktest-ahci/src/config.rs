//! Per-port driver tunables.

/// Maximum spin iterations when waiting for port status bits.
pub const PORT_SPIN_TIMEOUT: u32 = 1_000_000;

/// What the completion wait does after the device reports a task-file error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Stop polling as soon as PxIS.TFES is observed.
    #[default]
    AbortOnError,
    /// Keep polling until the slot's command-issue bit clears (or the spin
    /// limit runs out), then report the error.
    DrainOnError,
}

/// Tunables for one AHCI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// Polls per bounded wait before reporting the device unresponsive.
    pub spin_limit: u32,
    /// Completion behavior after a task-file error.
    pub completion: CompletionPolicy,
}

impl PortConfig {
    /// Returns a config with the given spin limit and default policy.
    #[must_use]
    pub const fn with_spin_limit(spin_limit: u32) -> Self {
        Self {
            spin_limit,
            completion: CompletionPolicy::AbortOnError,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::with_spin_limit(PORT_SPIN_TIMEOUT)
    }
}
