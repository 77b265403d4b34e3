//! Run-scoped handle threaded through every solver phase: cancellation,
//! memory accounting, and logging all go through here rather than through
//! process-global state, so multiple runs can coexist in one process (the
//! CLI only ever needs one, but library callers such as the OOC equivalence
//! tests spin up several in the same test binary).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Distinct warning categories, each fired at most once per run to avoid
/// flooding logs when a large mesh trips the same condition repeatedly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WarningKind {
    ThinTriangle,
    DegenerateSegment,
    NonPlanarQuad,
    IllConditionedPreconditioner,
    RefinementLimitReached,
}

impl WarningKind {
    const COUNT: usize = 5;

    fn slot(self) -> usize {
        match self {
            WarningKind::ThinTriangle => 0,
            WarningKind::DegenerateSegment => 1,
            WarningKind::NonPlanarQuad => 2,
            WarningKind::IllConditionedPreconditioner => 3,
            WarningKind::RefinementLimitReached => 4,
        }
    }
}

/// Shared state for one solver run: cooperative cancellation, a running
/// memory estimate, and de-duplicated warnings.
#[derive(Debug)]
struct RunState {
    cancelled: AtomicBool,
    memory_bytes: AtomicU64,
    memory_limit_bytes: u64,
    warned: [AtomicBool; WarningKind::COUNT],
}

/// Cloneable handle to a run's shared state. Cloning is cheap (one `Arc`
/// bump) and every clone observes the same cancellation flag and memory
/// counter.
#[derive(Clone, Debug)]
pub struct RunContext {
    state: Arc<RunState>,
}

impl RunContext {
    /// Create a new context with no memory limit (tracking only).
    #[must_use]
    pub fn new() -> Self {
        Self::with_memory_limit(u64::MAX)
    }

    /// Create a new context that reports [`crate::error::Error::OutOfMemory`]
    /// once tracked allocations exceed `limit_bytes`.
    #[must_use]
    pub fn with_memory_limit(limit_bytes: u64) -> Self {
        Self {
            state: Arc::new(RunState {
                cancelled: AtomicBool::new(false),
                memory_bytes: AtomicU64::new(0),
                memory_limit_bytes: limit_bytes,
                warned: [
                    AtomicBool::new(false),
                    AtomicBool::new(false),
                    AtomicBool::new(false),
                    AtomicBool::new(false),
                    AtomicBool::new(false),
                ],
            }),
        }
    }

    /// Request cancellation; long-running loops poll [`Self::is_cancelled`]
    /// between chunks of work and bail out with
    /// [`crate::error::Error::Cancelled`].
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Record `delta_bytes` (positive to allocate, negative to free) against
    /// the run's memory estimate and check it against the configured limit.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::OutOfMemory`] if the new total exceeds
    /// the configured limit.
    pub fn track_memory(&self, delta_bytes: i64) -> Result<(), crate::error::Error> {
        let new_total = if delta_bytes >= 0 {
            self.state
                .memory_bytes
                .fetch_add(delta_bytes as u64, Ordering::SeqCst)
                + delta_bytes as u64
        } else {
            self.state
                .memory_bytes
                .fetch_sub((-delta_bytes) as u64, Ordering::SeqCst)
                .saturating_sub((-delta_bytes) as u64)
        };
        if new_total > self.state.memory_limit_bytes {
            return Err(crate::error::Error::OutOfMemory {
                requested_mb: new_total / (1024 * 1024),
                limit_mb: self.state.memory_limit_bytes / (1024 * 1024),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn memory_bytes(&self) -> u64 {
        self.state.memory_bytes.load(Ordering::SeqCst)
    }

    /// Emit an informational log line tagged with the run.
    pub fn log(&self, message: &str) {
        info!(target: "capx", "{message}");
    }

    /// Emit `message` for `kind` at most once per run; subsequent calls for
    /// the same `kind` are silently dropped.
    pub fn warn_once(&self, kind: WarningKind, message: &str) {
        let slot = &self.state.warned[kind.slot()];
        if slot
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            warn!(target: "capx", "{message}");
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
