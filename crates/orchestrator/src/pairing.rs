//! Pairing session bookkeeping.

/// An in-progress pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    /// Code read from the peer, when it exposes one.
    pub expected_code: Option<String>,
    attempts_remaining: u32,
}

impl PairingSession {
    pub fn new(attempts: u32) -> Self {
        Self {
            expected_code: None,
            attempts_remaining: attempts.max(1),
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Consumes one attempt. Returns `true` when none are left.
    pub fn record_rejection(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining == 0
    }
}
