//! Bind-retry schedule, kept apart from socket I/O so it can be tested as a
//! plain function.

use std::time::Duration;

/// How many local-port bind attempts a tunnel open gets, and how they are
/// spaced. Port collisions are common right after a role swap or restart,
/// when the previous process still holds its forwarding ports.
#[derive(Debug, Clone, Copy)]
pub struct BindPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for BindPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

impl BindPolicy {
    /// Local port to try on the given attempt (0-based), or `None` once the
    /// policy has given up. A hint of 0 asks the OS for a fresh ephemeral
    /// port every time; a nonzero hint walks upward one port per attempt.
    pub fn candidate(&self, hint: u16, attempt: u32) -> Option<u16> {
        if attempt >= self.attempts {
            return None;
        }
        if hint == 0 {
            return Some(0);
        }
        let offset = u16::try_from(attempt).unwrap_or(u16::MAX);
        // Walking off the end of the port range falls back to ephemeral
        Some(hint.checked_add(offset).unwrap_or(0))
    }
}
