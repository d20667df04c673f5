/*!
Advection operators: strategies that turn the transported field into the
convective term of its equation.

Both strategies follow the same two-phase contract. `preadvect` predicts
face velocities from the cell velocity and makes them divergence free with
the MAC projection (momentum only); `advect` evaluates fluxes with those face
velocities and differences them into the convective term.
*/

pub mod godunov;
pub mod mol;
pub mod reconstruct;

use std::sync::Arc;
use crate::boundary::{GhostFill, Orientation, Side};
use crate::config::{Config, Scheme};
use crate::error::Result;
use crate::field::{FieldId, FieldRepo, FieldSpec, FieldState};
use crate::index_space::{Axis, Index, IndexSpace};
use crate::linear_solver::LinearSolver;
use crate::mesh::LevelGeometry;
use crate::patch::Patch;
use crate::pde::{PdeFields, PdeInfo};
use crate::projection::MacProjection;
use self::reconstruct::Pencil;

pub use self::godunov::GodunovAdvection;
pub use self::mol::MolAdvection;

pub const MAC_VELOCITY: [&str; 3] = ["u_mac", "v_mac", "w_mac"];

/// The advection-strategy interface, chosen once per equation at setup.
///
pub trait AdvectionOp: Send {
    /// Predict and project the face velocities. Only the momentum equation
    /// does work here; the default does nothing.
    fn preadvect(&mut self, _repo: &mut FieldRepo, _fstate: FieldState, _dt: f64) -> Result<()> {
        Ok(())
    }

    /// Compute the convective term from the current face velocities.
    fn advect(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<()>;

    /// Drop cached operators after the mesh changed.
    fn on_regrid(&mut self) {}
}

/// Declare (or find) the three face-velocity fields.
pub fn declare_mac_velocity(repo: &mut FieldRepo) -> Result<[FieldId; 3]> {
    Ok([
        repo.declare_field(FieldSpec::face(MAC_VELOCITY[0], Axis::I).ghost(1))?,
        repo.declare_field(FieldSpec::face(MAC_VELOCITY[1], Axis::J).ghost(1))?,
        repo.declare_field(FieldSpec::face(MAC_VELOCITY[2], Axis::K).ghost(1))?,
    ])
}

/// Build the advection strategy for an equation. The momentum equation
/// owns the MAC projection.
pub fn make_advection_op(
    repo: &mut FieldRepo,
    info: &PdeInfo,
    fields: PdeFields,
    config: &Config,
    solver: Arc<dyn LinearSolver>,
) -> Result<Box<dyn AdvectionOp>> {
    let umac = declare_mac_velocity(repo)?;
    let projection = if info.momentum {
        Some(MacProjection::new(umac, fields.field, fields.density, config, solver))
    } else {
        None
    };
    let op: Box<dyn AdvectionOp> = match config.scheme {
        Scheme::Godunov => Box::new(GodunovAdvection::new(info, fields, umac, config, projection)?),
        Scheme::Mol => Box::new(MolAdvection::new(info, fields, umac, config, projection)),
    };
    Ok(op)
}

/// Read-only view of one block of a ghosted cell field, with the rules for
/// extracting reconstruction pencils and for treating faces on the domain
/// boundary.
///
pub(crate) struct BlockView<'a> {
    pub q: &'a Patch,
    pub geom: &'a LevelGeometry,
    pub rules: &'a [[GhostFill; 6]],
    /// Density, when `q` is density weighted: prescribed boundary values are
    /// then weighted by the density in the boundary ghost cell.
    pub rho: Option<&'a Patch>,
}

impl<'a> BlockView<'a> {
    /// Five values along `axis` centered on `index`. On a non-periodic axis
    /// the pencil does not reach past the first ghost cell beyond the
    /// domain, whose value carries the boundary condition. A Dirichlet ghost
    /// holds the value on the boundary face; it enters the pencil as the
    /// cell-centered value `2 q_b - q_0` through that face.
    pub fn pencil(&self, index: Index, axis: Axis, n: usize) -> Pencil {
        let domain = &self.geom.domain;
        let periodic = self.geom.is_periodic(axis);
        let lo = domain.lower(axis) - 1;
        let hi = domain.upper(axis);
        let mut s = [0.0; 5];

        for (k, s) in s.iter_mut().enumerate() {
            let mut x = axis.of(index) + k as i64 - 2;

            if periodic {
                *s = self.q.get(axis.with(index, x), n);
                continue;
            }
            x = x.clamp(lo, hi);
            *s = self.q.get(axis.with(index, x), n);

            let (ori, inside) = if x == lo {
                (Orientation::low(axis), x + 1)
            } else if x == hi {
                (Orientation::high(axis), x - 1)
            } else {
                continue;
            };
            if let GhostFill::Dirichlet(_) = self.rules[n][ori.index()] {
                *s = 2.0 * *s - self.q.get(axis.with(index, inside), n);
            }
        }
        s
    }

    /// If the face normal to `axis` at `face` lies on a non-periodic domain
    /// boundary, return the orientation of that boundary.
    pub fn boundary_of(&self, face: Index, axis: Axis) -> Option<Orientation> {
        if self.geom.is_periodic(axis) {
            return None;
        }
        let x = axis.of(face);

        if x == self.geom.domain.lower(axis) {
            Some(Orientation::low(axis))
        } else if x == self.geom.domain.upper(axis) {
            Some(Orientation::high(axis))
        } else {
            None
        }
    }

    /// Impose the boundary condition on the two states at a face: prescribed
    /// values fill both sides, a reflecting wall sets both to zero, and any
    /// other condition copies the interior state.
    pub fn face_bc(&self, face: Index, axis: Axis, n: usize, lo: f64, hi: f64) -> (f64, f64) {
        match self.boundary_of(face, axis) {
            None => (lo, hi),
            Some(ori) => match self.rules[n][ori.index()] {
                GhostFill::Dirichlet(v) => {
                    let v = match self.rho {
                        Some(rho) => {
                            let ghost = match ori.side {
                                Side::Low => axis.shift(face, -1),
                                Side::High => face,
                            };
                            v * rho.get(rho.index_space().clamp(ghost), 0)
                        }
                        None => v,
                    };
                    (v, v)
                }
                GhostFill::ReflectOdd => (0.0, 0.0),
                GhostFill::Extrapolate | GhostFill::Gradient(_) => match ori.side {
                    Side::Low => (hi, hi),
                    Side::High => (lo, lo),
                },
            },
        }
    }
}

/// Ghost-fill rules of every component of a field, per orientation.
pub(crate) fn ghost_rules(repo: &FieldRepo, field: FieldId) -> Vec<[GhostFill; 6]> {
    let f = repo.field(field);
    (0..f.num_comp())
        .map(|n| Orientation::ALL.map(|ori| f.bc().ghost_fill(ori, n, f.is_vector())))
        .collect()
}

/// Flux-difference a block into its convective term:
/// `-sum_d (F(i+1) - F(i)) / dx_d` for conservative components, and the
/// advective form
/// `-sum_d 0.5 (U(i+1) + U(i)) (q(i+1) - q(i)) / dx_d` otherwise, where the
/// edge state is recovered from the flux where the face velocity is nonzero.
pub(crate) fn flux_difference(
    block: &IndexSpace,
    geom: &LevelGeometry,
    fluxes: [&Patch; 3],
    edges: [&Patch; 3],
    umac: [&Patch; 3],
    conservative: &[bool],
    out: &mut Patch,
) {
    let eps = reconstruct::SMALL_VEL;

    for index in block.iter() {
        for (n, &cons) in conservative.iter().enumerate() {
            let mut rate = 0.0;

            for axis in Axis::ALL {
                let d = axis.index();
                let upper = axis.shift(index, 1);
                let dx = geom.cell_spacing(axis);

                if cons {
                    rate -= (fluxes[d].get(upper, n) - fluxes[d].get(index, n)) / dx;
                } else {
                    let (u0, u1) = (umac[d].get(index, 0), umac[d].get(upper, 0));
                    let q = |face: Index, u: f64| {
                        if u.abs() > eps {
                            fluxes[d].get(face, n) / u
                        } else {
                            edges[d].get(face, n)
                        }
                    };
                    rate -= 0.5 * (u0 + u1) * (q(upper, u1) - q(index, u0)) / dx;
                }
            }
            out.set(index, n, rate);
        }
    }
}
