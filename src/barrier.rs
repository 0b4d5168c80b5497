// File: barrier.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// Counting release gate sized to the fan-out count. Every connection worker
/// calls [`arrive`](PhaseBarrier::arrive) exactly once after attempting its
/// prefix send (successfully or not); the gate opens once, when the last
/// arrival lands. Waiters are additionally bounded by the job deadline so a
/// single stuck worker degrades the race window instead of hanging the job.
#[derive(Debug)]
pub struct PhaseBarrier {
    remaining: AtomicUsize,
    release_tx: watch::Sender<bool>,
    release_rx: watch::Receiver<bool>,
}

impl PhaseBarrier {
    pub fn new(parties: usize) -> Self {
        let (release_tx, release_rx) = watch::channel(parties == 0);
        PhaseBarrier {
            remaining: AtomicUsize::new(parties),
            release_tx,
            release_rx,
        }
    }

    /// Count this worker in. Workers that fail before or during the prefix
    /// phase still arrive, so siblings are never left waiting on a worker
    /// that cannot send. The final arrival opens the gate.
    pub fn arrive(&self) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "arrive() called more times than parties");
        if prev == 1 {
            let _ = self.release_tx.send(true);
        }
    }

    /// Block until the gate opens or the deadline passes. Returns `true` when
    /// released by the gate, `false` when released by the deadline.
    pub async fn wait_release(&self, deadline: Instant) -> bool {
        let mut release_rx = self.release_rx.clone();
        loop {
            if *release_rx.borrow() {
                return true;
            }
            match timeout_at(deadline, release_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return *release_rx.borrow(),
                Err(_) => return *release_rx.borrow(),
            }
        }
    }

    /// Arrivals still outstanding. Diagnostic only.
    pub fn pending(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        *self.release_rx.borrow()
    }
}
