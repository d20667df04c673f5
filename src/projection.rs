use std::sync::Arc;
use log::{debug, info, log_enabled, Level};
use rayon::prelude::*;
use crate::boundary::Orientation;
use crate::config::Config;
use crate::error::Result;
use crate::field::{Field, FieldId, FieldRepo, FieldState};
use crate::flux_average::average_down_faces;
use crate::index_space::{coarsen_index, Axis, Index, IndexSpace};
use crate::linear_operator::{CellOperator, LevelStencil, Neighbor};
use crate::linear_solver::{LinearSolver, SolveStats, SolverOptions};
use crate::mesh_mapping::MeshMapping;
use crate::patch::Patch;

/// The approximate (MAC) projection of the face velocities `u_mac`, `v_mac`,
/// `w_mac`. Level by level, it solves
///
/// `D(beta G phi) = D(u*)`,   `u = u* - beta G phi`
///
/// with `beta = dt / (2 rho_face)` (or `dt / (2 rho_0)` for constant
/// density), so that the corrected face velocities are discretely
/// divergence free. Finer levels take Dirichlet data for `phi` from the
/// coarser solution, and corrected fine faces are averaged onto the coarse
/// faces they cover.
///
pub struct MacProjection {
    umac: [FieldId; 3],
    velocity: FieldId,
    density: FieldId,
    options: SolverOptions,
    solver: Arc<dyn LinearSolver>,
    has_overset: bool,
    variable_density: bool,
    mesh_mapping: bool,
    rho_0: f64,
    need_init: bool,
    stencils: Vec<LevelStencil>,
    unit_coefficients: Vec<Vec<[f64; 6]>>,
}

impl MacProjection {
    pub fn new(umac: [FieldId; 3], velocity: FieldId, density: FieldId, config: &Config, solver: Arc<dyn LinearSolver>) -> Self {
        Self {
            umac,
            velocity,
            density,
            options: config.mac_proj.clone(),
            solver,
            has_overset: config.has_overset,
            variable_density: config.variable_density,
            mesh_mapping: config.mesh_mapping,
            rho_0: config.rho_0,
            need_init: true,
            stencils: Vec::new(),
            unit_coefficients: Vec::new(),
        }
    }

    pub fn umac(&self) -> [FieldId; 3] {
        self.umac
    }

    /// Invalidate the cached operator after the mesh or the mask changed.
    pub fn on_regrid(&mut self) {
        self.need_init = true;
    }

    /// Project the face velocities, using the `fstate` state of the density.
    pub fn project(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<Vec<SolveStats>> {
        if self.need_init {
            self.init(repo);
        }
        let mapping = if self.mesh_mapping {
            Some(repo.require_mesh_mapping()?)
        } else {
            None
        };
        if self.variable_density {
            repo.fill_ghosts(self.density, fstate);
        }
        let mut faces = self.umac.map(|id| repo.take_field(id));
        let result = self.solve_levels(repo, &mut faces, fstate, dt, mapping.as_deref());

        for field in faces {
            repo.restore_field(field);
        }
        let stats = result?;

        for id in self.umac {
            repo.fill_ghosts(id, FieldState::New);
        }
        if log_enabled!(Level::Debug) {
            debug!(
                "mac_proj: {:?} iterations, max |div u| = {:.3e}",
                stats.iter().map(|s| s.iterations).collect::<Vec<_>>(),
                max_divergence(repo, &self.umac, self.has_overset)
            );
        }
        Ok(stats)
    }

    fn init(&mut self, repo: &FieldRepo) {
        let mesh = repo.mesh();
        self.stencils = (0..mesh.num_levels())
            .map(|lev| {
                let mask = self.has_overset.then(|| repo.mask_cell().level(lev));
                LevelStencil::build(mesh, lev, mask)
            })
            .collect();
        self.unit_coefficients.clear();
        self.need_init = false;
        info!("mac_proj: operator set up on {} level(s)", self.stencils.len());
    }

    fn solve_levels(
        &mut self,
        repo: &FieldRepo,
        faces: &mut [Field; 3],
        fstate: FieldState,
        dt: f64,
        mapping: Option<&dyn MeshMapping>,
    ) -> Result<Vec<SolveStats>> {
        let mesh = repo.mesh();
        let bc_table = repo.field(self.velocity).bc();
        let bc = Orientation::ALL.map(|ori| bc_table.projection_bc(ori));
        let ratio = mesh.ref_ratio();

        let mut phis: Vec<Vec<f64>> = Vec::with_capacity(mesh.num_levels());
        let mut stats = Vec::with_capacity(mesh.num_levels());

        for lev in 0..mesh.num_levels() {
            if self.variable_density || self.unit_coefficients.len() <= lev {
                let b = self.unit_coefficients_on(repo, lev, fstate, mapping);

                if self.unit_coefficients.len() <= lev {
                    self.unit_coefficients.push(b);
                } else {
                    self.unit_coefficients[lev] = b;
                }
            }
            let stencil = &self.stencils[lev];
            let bcoef: Vec<[f64; 6]> = self.unit_coefficients[lev]
                .par_iter()
                .map(|b| b.map(|x| 0.5 * dt * x))
                .collect();

            if let Some(m) = mapping {
                scale_faces(faces, lev, |axis, index| m.face_area_scale(lev, axis, index));
            }
            let rhs: Vec<f64> = {
                let state = [0, 1, 2].map(|d| faces[d].state(FieldState::New));
                stencil
                    .cells()
                    .par_iter()
                    .map(|c| {
                        -Axis::ALL
                            .iter()
                            .map(|&axis| {
                                let u = state[axis.index()].patch(lev, c.block);
                                (u.get(axis.shift(c.index, 1), 0) - u.get(c.index, 0)) / stencil.spacing(axis)
                            })
                            .sum::<f64>()
                    })
                    .collect()
            };

            let coarse = (lev > 0).then(|| (&self.stencils[lev - 1], &phis[lev - 1]));
            let value = |nb: Neighbor| match (nb, coarse) {
                (Neighbor::CoarseFine(index), Some((stencil, phi))) => {
                    stencil.dof(coarsen_index(index, ratio)).map_or(0.0, |d| phi[d])
                }
                _ => 0.0,
            };
            let op = CellOperator::new(stencil, bc, 0.0, Vec::new(), 1.0, bcoef.clone());
            let rhs = op.with_boundary_term(&rhs, &op.boundary_term(&value));
            let mut phi = vec![0.0; stencil.num_dofs()];

            let label = format!("mac_proj level {}", lev);
            stats.push(self.solver.solve(&label, &op, &rhs, &mut phi, &self.options)?);

            let blocks = &mesh.level(lev).blocks;
            correct_faces(faces, lev, blocks, &op, &bcoef, &phi, &value);

            if let Some(m) = mapping {
                scale_faces(faces, lev, |axis, index| 1.0 / m.face_area_scale(lev, axis, index));
            }
            phis.push(phi);
        }

        for lev in (1..mesh.num_levels()).rev() {
            for axis in Axis::ALL {
                let fine_valid: Vec<_> = mesh.level(lev).blocks.iter().map(|b| b.surrounding_faces(axis)).collect();
                let coarse_valid: Vec<_> = mesh.level(lev - 1).blocks.iter().map(|b| b.surrounding_faces(axis)).collect();
                let levels = faces[axis.index()].state_mut(FieldState::New).levels_mut();
                let (coarse, fine) = levels.split_at_mut(lev);
                average_down_faces(&fine[0], &fine_valid, &mut coarse[lev - 1], &coarse_valid, ratio, axis);
            }
        }
        Ok(stats)
    }

    /// Face coefficients `1 / rho_face`, scaled by `detJ_f / fac_d^2` under
    /// mesh mapping.
    fn unit_coefficients_on(&self, repo: &FieldRepo, lev: usize, fstate: FieldState, mapping: Option<&dyn MeshMapping>) -> Vec<[f64; 6]> {
        let rho = repo.field(self.density).state(fstate).level(lev);
        let variable = self.variable_density;
        let rho_0 = self.rho_0;

        self.stencils[lev].face_coefficients(|c, ori| {
            let rho_face = if variable {
                let nb = ori.axis.shift(c.index, ori.step());
                let p = &rho[c.block];
                0.5 * (p.get(c.index, 0) + p.get(nb, 0))
            } else {
                rho_0
            };
            let scale = mapping.map_or(1.0, |m| m.face_coefficient_scale(lev, ori.axis, ori.face_of(c.index)));
            scale / rho_face
        })
    }
}

fn scale_faces<F>(faces: &mut [Field; 3], lev: usize, factor: F)
where
    F: Fn(Axis, Index) -> f64 + Sync,
{
    for axis in Axis::ALL {
        faces[axis.index()]
            .state_mut(FieldState::New)
            .level_mut(lev)
            .par_iter_mut()
            .for_each(|patch| {
                let space = patch.index_space().clone();
                for index in space.iter() {
                    let u = patch.get(index, 0);
                    patch.set(index, 0, u * factor(axis, index))
                }
            });
    }
}

/// Subtract `beta G phi` from the face velocities. Each unknown corrects the
/// lower face on every axis, and the upper face where it lies on the upper
/// edge of its block or borders a masked cell, so each face is written once.
fn correct_faces<F>(
    faces: &mut [Field; 3],
    lev: usize,
    blocks: &[IndexSpace],
    op: &CellOperator,
    bcoef: &[[f64; 6]],
    phi: &[f64],
    value: &F,
) where
    F: Fn(Neighbor) -> f64 + Sync,
{
    let stencil = op.stencil();

    for axis in Axis::ALL {
        let lo = Orientation::low(axis).index();
        let hi = Orientation::high(axis).index();
        let patches = faces[axis.index()].state_mut(FieldState::New).level_mut(lev);

        for (c, cell) in stencil.cells().iter().enumerate() {
            let u = &mut patches[cell.block];
            let g_lo = op.face_gradient(phi, c, lo, value);
            let face = cell.index;
            u.set(face, 0, u.get(face, 0) + bcoef[c][lo] * g_lo);

            let upper_edge = axis.of(cell.index) + 1 == blocks[cell.block].upper(axis);

            if upper_edge || matches!(cell.neighbors[hi], Neighbor::Masked(_)) {
                let g_hi = op.face_gradient(phi, c, hi, value);
                let face = axis.shift(cell.index, 1);
                u.set(face, 0, u.get(face, 0) - bcoef[c][hi] * g_hi);
            }
        }
    }
}

/// Discrete divergence of the face velocities in every valid cell of a
/// level, one patch per block. Under mesh mapping the divergence is taken in
/// uniform space.
pub fn level_divergence(repo: &FieldRepo, umac: &[FieldId; 3], lev: usize) -> Vec<Patch> {
    let level = repo.mesh().level(lev);
    let mapping = repo.mesh_mapping();
    let state = umac.map(|id| repo.field(id).state(FieldState::New));

    level
        .blocks
        .par_iter()
        .enumerate()
        .map(|(b, block)| {
            Patch::from_slice_function(lev as u32, block.clone(), 1, |index, s| {
                s[0] = Axis::ALL
                    .iter()
                    .map(|&axis| {
                        let u = state[axis.index()].patch(lev, b);
                        let upper = axis.shift(index, 1);
                        let (a0, a1) = match mapping {
                            Some(m) => (m.face_area_scale(lev, axis, index), m.face_area_scale(lev, axis, upper)),
                            None => (1.0, 1.0),
                        };
                        (a1 * u.get(upper, 0) - a0 * u.get(index, 0)) / level.geometry.cell_spacing(axis)
                    })
                    .sum();
            })
        })
        .collect()
}

/// Largest discrete divergence of the face velocities over the valid cells
/// of every level (unmasked cells only when `masked` is set).
pub fn max_divergence(repo: &FieldRepo, umac: &[FieldId; 3], masked: bool) -> f64 {
    (0..repo.num_active_levels())
        .map(|lev| {
            let mask = repo.mask_cell().level(lev);

            level_divergence(repo, umac, lev)
                .iter()
                .enumerate()
                .map(|(b, div)| {
                    div.index_space()
                        .iter()
                        .filter(|index| !masked || mask[b].get(*index, 0) != 0)
                        .map(|index| div.get(index, 0).abs())
                        .fold(0.0, f64::max)
                })
                .fold(0.0, f64::max)
        })
        .fold(0.0, f64::max)
}
