//! Safepoint Management
//!
//! Allocation is the only point where a snapshot pass can be interrupted by
//! the collector: `Heap::allocate` polls the heap's [`Safepoint`] and blocks
//! while a collection is in progress.
//!
//! Decoding a buffer kind copies raw bytes into a freshly allocated object.
//! That copy must not be interrupted by a moving collector, so it runs
//! inside a [`NoSafepointScope`]. The scope covers exactly "allocate then
//! bulk-copy", never general traversal.
//!
//! ## Safepoint States
//!
//! ```text
//! SAFEPOINT_NONE (0) ─────┐
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REQUESTED (1) │
//!     │                   │
//!     ▼                   │
//! SAFEPOINT_REACHED (2) ──┘ (after release)
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Safepoint state constants
pub const SAFEPOINT_NONE: u8 = 0;
pub const SAFEPOINT_REQUESTED: u8 = 1;
pub const SAFEPOINT_REACHED: u8 = 2;

/// Safepoint - coordination point between the collector and allocating
/// threads
///
/// # Examples
///
/// ```rust
/// use fsnap::runtime::safepoint::{Safepoint, SAFEPOINT_NONE};
///
/// let safepoint = Safepoint::new();
/// safepoint.poll(); // no request pending, returns immediately
/// assert_eq!(safepoint.get_state(), SAFEPOINT_NONE);
/// ```
pub struct Safepoint {
    /// Current safepoint state
    state: AtomicU8,

    /// Number of threads that have arrived at the safepoint
    paused_threads: AtomicUsize,

    /// Number of polls since creation
    polls: AtomicU64,
}

impl Safepoint {
    /// Create new safepoint in NONE state
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SAFEPOINT_NONE),
            paused_threads: AtomicUsize::new(0),
            polls: AtomicU64::new(0),
        }
    }

    /// Request allocating threads to stop
    ///
    /// # Memory Ordering
    /// Uses SeqCst to ensure all threads see the request immediately.
    pub fn request_safepoint(&self) {
        self.state.store(SAFEPOINT_REQUESTED, Ordering::SeqCst);
    }

    /// Wait until `count` threads have arrived
    pub fn wait_for_arrivals(&self, count: usize) {
        while self.paused_threads.load(Ordering::Acquire) < count {
            std::thread::yield_now();
        }
    }

    /// Thread signals it has reached the safepoint
    pub fn arrive(&self) {
        self.state.store(SAFEPOINT_REACHED, Ordering::Release);
        self.paused_threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Release the safepoint and resume all threads
    pub fn release_safepoint(&self) {
        self.paused_threads.store(0, Ordering::Release);
        self.state.store(SAFEPOINT_NONE, Ordering::Release);
    }

    /// Check if a safepoint is requested
    pub fn is_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) != SAFEPOINT_NONE
    }

    /// Get current safepoint state
    pub fn get_state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    /// Get number of threads at safepoint
    pub fn threads_at_safepoint(&self) -> usize {
        self.paused_threads.load(Ordering::Acquire)
    }

    /// Number of polls so far
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Arrive at the safepoint and wait for release
    pub fn block_until_released(&self) {
        self.arrive();

        while self.state.load(Ordering::Acquire) != SAFEPOINT_NONE {
            std::thread::yield_now();
        }
    }

    /// Allocation-site poll
    ///
    /// Blocks while a safepoint is requested. Polling inside a
    /// [`NoSafepointScope`] is a bug.
    pub fn poll(&self) {
        debug_assert_eq!(
            no_safepoint_depth(),
            0,
            "safepoint poll inside a no-safepoint scope"
        );
        self.polls.fetch_add(1, Ordering::Relaxed);
        if self.is_requested() {
            self.block_until_released();
        }
    }
}

impl Default for Safepoint {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static NO_SAFEPOINT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Nesting depth of no-safepoint scopes on the current thread
pub fn no_safepoint_depth() -> usize {
    NO_SAFEPOINT_DEPTH.with(|depth| depth.get())
}

/// RAII guard forbidding safepoints on the current thread
///
/// Not `Send`: the guard must be dropped on the thread that entered it.
pub struct NoSafepointScope {
    _not_send: PhantomData<*const ()>,
}

impl NoSafepointScope {
    /// Enter the scope
    pub fn enter() -> Self {
        NO_SAFEPOINT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for NoSafepointScope {
    fn drop(&mut self) {
        NO_SAFEPOINT_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}
