//! Solver configuration: the Rust analogue of `CAutoRefGlobalVars` from the
//! original tool, trimmed to the fields this crate's modules actually read
//! and validated up front rather than checked ad hoc at use sites.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Preconditioner strategy selected for the GMRES driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionerKind {
    None,
    Jacobi,
    Block,
    Super,
    Hierarchical,
}

/// Discretization scheme applied during adaptive meshing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discretization {
    Collocation,
    Galerkin,
}

/// Problem dimensionality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    D2,
    D3,
}

/// Complete configuration for one solve, built from CLI flags and/or the
/// input deck's directives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverConfig {
    pub dimension: Dimension,
    pub discretization: Discretization,
    pub preconditioner: PreconditionerKind,

    /// `-kc`: skip building the capacitance matrix off-diagonal from
    /// self-potential coefficients and instead reuse a cached run's links.
    /// Mutually exclusive with a hierarchical preconditioner (see
    /// [`Self::validate`]).
    pub reuse_cached_links: bool,
    /// `-km`: skip mesh refinement and use the deck's geometry verbatim.
    /// Mutually exclusive with a hierarchical preconditioner, same as
    /// `reuse_cached_links`.
    pub skip_mesh_refinement: bool,

    pub gmres_tolerance: f64,
    pub gmres_max_iterations: usize,
    /// One extra modified Gram-Schmidt pass per Arnoldi step, trading a
    /// second orthogonalization for numerical robustness on ill-conditioned
    /// operators.
    pub gmres_reorthogonalize: bool,

    /// `true` for the complex-permittivity (`-c`) branch; doubles the
    /// unknown count per element and switches the block operator from a
    /// real scalar to the `[R -C; C R]` 2x2 block.
    pub complex_permittivity: bool,

    pub max_mesh_refinement_levels: u32,
    pub memory_limit_bytes: u64,

    pub out_of_core: bool,
    pub ooc_working_dir: Option<std::path::PathBuf>,
    /// Ratio of estimated link-set size to free memory above which link
    /// storage pages out to disk.
    pub ooc_ratio: f64,

    /// Starting refinement tolerance for the auto-refinement loop's first
    /// mesh pass; later passes halve it.
    pub initial_mesh_eps: f64,
    /// Link-acceptance tolerance as a fraction of the current `mesh_eps`.
    pub eps_ratio: f64,
    /// Curvature weighting applied when same-conductor panel normals
    /// diverge; see `capx_hierarchy::mesher::curv_coeff`.
    pub mesh_curv_coeff: f64,
    /// Weighted-Frobenius-norm threshold on `C_k - C_{k-1}` below which the
    /// auto-refinement loop stops.
    pub auto_max_error: f64,
    /// Hard cap on outer auto-refinement iterations, regardless of
    /// convergence.
    pub auto_max_iterations: u32,
}

impl SolverConfig {
    /// Validate flag combinations the original tool accepted inconsistently.
    /// Both REDESIGN decisions here reject rather than silently downgrade.
    ///
    /// # Errors
    /// - [`Error::UnsupportedCombination`] if a hierarchical
    ///   preconditioner is requested together with `reuse_cached_links` or
    ///   `skip_mesh_refinement`.
    /// - [`Error::UnsupportedGalerkin2d`] if Galerkin discretization is
    ///   requested for a 2D problem.
    pub fn validate(&self) -> Result<(), Error> {
        if self.preconditioner == PreconditionerKind::Hierarchical {
            if self.reuse_cached_links {
                return Err(Error::UnsupportedCombination { flag: "-kc" });
            }
            if self.skip_mesh_refinement {
                return Err(Error::UnsupportedCombination { flag: "-km" });
            }
        }
        if self.dimension == Dimension::D2 && self.discretization == Discretization::Galerkin {
            return Err(Error::UnsupportedGalerkin2d);
        }
        Ok(())
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dimension: Dimension::D3,
            discretization: Discretization::Collocation,
            preconditioner: PreconditionerKind::Jacobi,
            reuse_cached_links: false,
            skip_mesh_refinement: false,
            gmres_tolerance: 1e-3,
            gmres_max_iterations: 1000,
            gmres_reorthogonalize: false,
            complex_permittivity: false,
            max_mesh_refinement_levels: 6,
            memory_limit_bytes: u64::MAX,
            out_of_core: false,
            ooc_working_dir: None,
            ooc_ratio: 2.0,
            initial_mesh_eps: 0.05,
            eps_ratio: 1.0,
            mesh_curv_coeff: 1.1,
            auto_max_error: 0.01,
            auto_max_iterations: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SolverConfig::default().validate().is_ok());
    }

    #[test]
    fn hierarchical_with_kc_is_rejected() {
        let cfg = SolverConfig {
            preconditioner: PreconditionerKind::Hierarchical,
            reuse_cached_links: true,
            ..SolverConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(Error::UnsupportedCombination { flag: "-kc" })
        ));
    }

    #[test]
    fn hierarchical_with_km_is_rejected() {
        let cfg = SolverConfig {
            preconditioner: PreconditionerKind::Hierarchical,
            skip_mesh_refinement: true,
            ..SolverConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(Error::UnsupportedCombination { flag: "-km" })
        ));
    }

    #[test]
    fn galerkin_2d_is_rejected() {
        let cfg = SolverConfig {
            dimension: Dimension::D2,
            discretization: Discretization::Galerkin,
            ..SolverConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::UnsupportedGalerkin2d)));
    }

    #[test]
    fn galerkin_3d_is_accepted() {
        let cfg = SolverConfig {
            dimension: Dimension::D3,
            discretization: Discretization::Galerkin,
            ..SolverConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
