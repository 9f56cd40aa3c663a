//! # Connectivity Heuristic
//!
//! Turns raw call outcomes into a single availability flag. The last `k`
//! outcomes live in the low bits of a `u64` (1 = success). The network is
//! considered down exactly when all `k` bits are zero; a single success in the
//! window brings it back.

/// Widest supported window.
pub const MAX_WINDOW: u32 = 64;

/// Sliding bit-history of recent outcomes plus the derived availability flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityHeuristic {
    past_attempts: u64,
    active_mask: u64,
    window: u32,
    available: bool,
}

impl ConnectivityHeuristic {
    /// Creates a heuristic over the last `failures_before_offline` outcomes.
    ///
    /// Zero or negative disables it; larger values are clamped to [`MAX_WINDOW`].
    /// The window starts full of successes, so the network starts available.
    pub fn new(failures_before_offline: i32) -> Self {
        let window = if failures_before_offline <= 0 {
            0
        } else {
            (failures_before_offline as u32).min(MAX_WINDOW)
        };
        let active_mask = match window {
            0 => 0,
            MAX_WINDOW => u64::MAX,
            w => (1u64 << w) - 1,
        };
        Self {
            past_attempts: active_mask,
            active_mask,
            window,
            available: true,
        }
    }

    /// `false` when configured with a non-positive window.
    pub fn is_enabled(&self) -> bool {
        self.window > 0
    }

    /// Window size; zero when disabled.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Current belief about the network.
    pub fn available(&self) -> bool {
        self.available
    }

    /// Records one outcome.
    ///
    /// # Returns
    /// `Some(new_availability)` if the flag flipped, `None` otherwise (always
    /// `None` when disabled).
    pub fn record(&mut self, success: bool) -> Option<bool> {
        if !self.is_enabled() {
            return None;
        }
        self.past_attempts = ((self.past_attempts << 1) | u64::from(success)) & self.active_mask;
        let now = self.past_attempts != 0;
        if now == self.available {
            return None;
        }
        self.available = now;
        Some(now)
    }

    /// Failures in the window that happened after its most recent success.
    pub fn recent_failures(&self) -> u32 {
        if !self.is_enabled() {
            return 0;
        }
        self.past_attempts.trailing_zeros().min(self.window)
    }

    /// Forgets the history: the window is refilled with successes.
    ///
    /// # Returns
    /// `Some(true)` if the heuristic was offline before.
    pub fn reset(&mut self) -> Option<bool> {
        self.past_attempts = self.active_mask;
        if self.available {
            return None;
        }
        self.available = true;
        Some(true)
    }
}
