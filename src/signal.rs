// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Cooperative signals shared between the link side and the transfer engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How often a blocked waiter re-checks for cancellation.
const CANCEL_CHECK: Duration = Duration::from_millis(50);

// ============================================================================
// Cancellation
// ============================================================================

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared shutdown flag. Sleeps taken through the token end early on cancel.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout` or until cancelled. Returns true if cancelled.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_cancelled()
    }
}

// ============================================================================
// Batch handshake
// ============================================================================

/// "Ready for the next batch" signal raised by whoever owns the link schedule.
///
/// Signals are counted, so a notify that arrives before the waiter blocks is
/// not lost.
#[derive(Clone, Default)]
pub struct ReadySignal {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() += 1;
        cvar.notify_one();
    }

    /// Number of signals not yet consumed.
    pub fn pending(&self) -> usize {
        *self.inner.0.lock()
    }

    /// Block until a signal is available and consume it. Returns false if
    /// `cancel` fires first.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            cvar.wait_for(&mut count, CANCEL_CHECK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sleep_runs_full_timeout() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_ready_signal_counts() {
        let signal = ReadySignal::new();
        let cancel = CancelToken::new();
        signal.notify();
        signal.notify();
        assert_eq!(signal.pending(), 2);
        assert!(signal.wait(&cancel));
        assert!(signal.wait(&cancel));
        assert_eq!(signal.pending(), 0);
    }

    #[test]
    fn test_ready_signal_across_threads() {
        let signal = ReadySignal::new();
        let cancel = CancelToken::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.notify();
        });
        assert!(signal.wait(&cancel));
        handle.join().unwrap();
    }

    #[test]
    fn test_ready_signal_cancelled() {
        let signal = ReadySignal::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(!signal.wait(&cancel));
    }
}
