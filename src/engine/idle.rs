use log::{info, warn};
use std::time::Instant;

/// Where the worker stands with respect to idle shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Active,
    /// Idle window currently holds `n` ticks
    Idle(usize),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    Continue,
    /// Seeds still exist; the window was cut back to its latest tick
    Compacted,
    /// Close the worker. Returned at most once.
    Shutdown,
}

/// Decides when an idle worker should close.
///
/// Every idle tick is appended to a window. While the seed key exists the
/// window is compacted to its last tick as soon as it grows past two; once
/// it grows past `threshold` without seeds the worker closes.
#[derive(Debug)]
pub struct IdleMonitor {
    window: Vec<Instant>,
    threshold: usize,
    ticks: u64,
    closed: bool,
}

impl IdleMonitor {
    pub fn new(threshold: usize) -> Self {
        Self {
            window: Vec::new(),
            threshold,
            ticks: 0,
            closed: false,
        }
    }

    pub fn tick(&mut self, seed_exists: bool) -> IdleDecision {
        if self.closed {
            return IdleDecision::Continue;
        }
        self.window.push(Instant::now());
        self.ticks += 1;

        if self.window.len() > 2 && seed_exists {
            self.window.drain(..self.window.len() - 1);
            info!("Idle tick {} with seeds pending, window compacted", self.ticks);
            return IdleDecision::Compacted;
        }
        if self.window.len() > self.threshold {
            self.closed = true;
            warn!(
                "Idle for {} ticks without seeds (threshold {}), closing",
                self.window.len(),
                self.threshold
            );
            return IdleDecision::Shutdown;
        }
        IdleDecision::Continue
    }

    pub fn state(&self) -> IdleState {
        if self.closed {
            IdleState::Closed
        } else if self.window.is_empty() {
            IdleState::Active
        } else {
            IdleState::Idle(self.window.len())
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Total idle ticks seen, compactions included.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
