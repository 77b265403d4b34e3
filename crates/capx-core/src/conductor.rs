//! Conductor registry: the named surfaces a capacitance matrix is computed
//! between, plus the dielectric interfaces that never get their own matrix
//! row but still carry permittivity contrast into the linear system.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One named conductor or dielectric interface group from the input deck.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conductor {
    pub name: String,
    /// `true` for a dielectric-only interface (no charge unknown of its own,
    /// contributes permittivity contrast only); `false` for a true conductor
    /// that gets a row/column in the capacitance matrix.
    pub is_dielectric: bool,
    /// Relative permittivity on the outer (normal-pointing) side.
    pub outer_perm: f64,
    /// Relative permittivity on the inner side; for a true conductor this is
    /// unused by the solver but kept for provenance.
    pub inner_perm: f64,
    /// Group id, shared by all conductor pieces read from `C` directives
    /// under the same name so they accumulate into a single matrix row.
    pub group: u32,
}

/// Conductors and dielectric groups for one run, with a global ordering that
/// the super-hierarchy builder and GMRES driver both rely on.
///
/// Dielectric interfaces are always ordered before conductors: original
/// FasterCap builds the G-matrix with dielectric rows first so the
/// conductor charge unknowns occupy a contiguous trailing block, and the
/// capacitance assembly step depends on that layout.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConductorRegistry {
    conductors: Vec<Conductor>,
}

impl ConductorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conductor or dielectric group, merging into an existing
    /// group of the same name if one already exists.
    ///
    /// # Errors
    /// Returns [`Error::ConductorKindMismatch`] if `name` was already
    /// registered with a different `is_dielectric` value.
    pub fn register(&mut self, candidate: Conductor) -> Result<u32, Error> {
        if let Some(existing) = self.conductors.iter().find(|c| c.name == candidate.name) {
            if existing.is_dielectric != candidate.is_dielectric {
                return Err(Error::ConductorKindMismatch {
                    name: candidate.name.clone(),
                });
            }
            return Ok(existing.group);
        }
        let group = u32::try_from(self.conductors.len()).expect("conductor count overflow");
        self.conductors.push(Conductor {
            group,
            ..candidate
        });
        Ok(group)
    }

    /// Finalize the registry, returning the dielectric-before-conductor
    /// ordering the rest of the solver assumes. Call once all `register`
    /// calls for a run are done.
    ///
    /// # Errors
    /// Returns [`Error::NoConductors`] if every registered group is a
    /// dielectric interface, since the capacitance matrix would then be
    /// zero by zero.
    pub fn finalize(mut self) -> Result<Self, Error> {
        if self.conductors.iter().all(|c| c.is_dielectric) {
            return Err(Error::NoConductors);
        }
        self.conductors
            .sort_by_key(|c| (!c.is_dielectric, c.group));
        for (i, c) in self.conductors.iter_mut().enumerate() {
            c.group = u32::try_from(i).expect("conductor count overflow");
        }
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, group: u32) -> Option<&Conductor> {
        self.conductors.get(group as usize)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conductors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conductors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conductor> {
        self.conductors.iter()
    }

    /// Number of groups that are true conductors (get a capacitance matrix
    /// row), excluding dielectric interfaces.
    #[must_use]
    pub fn conductor_count(&self) -> usize {
        self.conductors.iter().filter(|c| !c.is_dielectric).count()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Conductor> {
        self.conductors.iter().find(|c| c.name == name)
    }
}
