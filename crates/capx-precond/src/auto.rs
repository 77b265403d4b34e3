//! Auto-preconditioner selection: pick a mode purely from problem
//! complexity (link count times conductor count), so callers that don't
//! want to reason about preconditioner internals get a reasonable default.

use capx_core::PreconditionerKind;

pub const COMPLEXITY_JACOBI_MAX: u64 = 50_000;
pub const COMPLEXITY_SUPER_128_MAX: u64 = 2_000_000;
pub const COMPLEXITY_SUPER_512_MAX: u64 = 50_000_000;

/// Selected mode plus the cut size to use when it is [`PreconditionerKind::Super`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoSelection {
    pub kind: PreconditionerKind,
    pub super_pre_dim: usize,
}

#[must_use]
pub fn auto_select(link_count: usize, conductor_count: usize) -> AutoSelection {
    let complexity = link_count as u64 * u64::try_from(conductor_count.max(1)).unwrap_or(u64::MAX);
    if complexity <= COMPLEXITY_JACOBI_MAX {
        AutoSelection { kind: PreconditionerKind::Jacobi, super_pre_dim: 0 }
    } else if complexity <= COMPLEXITY_SUPER_128_MAX {
        AutoSelection { kind: PreconditionerKind::Super, super_pre_dim: 128 }
    } else if complexity <= COMPLEXITY_SUPER_512_MAX {
        AutoSelection { kind: PreconditionerKind::Super, super_pre_dim: 512 }
    } else {
        AutoSelection { kind: PreconditionerKind::Super, super_pre_dim: 1024 }
    }
}
