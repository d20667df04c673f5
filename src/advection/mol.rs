use log::debug;
use rayon::prelude::*;
use crate::config::Config;
use crate::error::Result;
use crate::field::{FieldId, FieldRepo, FieldState};
use crate::index_space::{Axis, Index, IndexSpace};
use crate::patch::Patch;
use crate::pde::{PdeFields, PdeInfo};
use crate::projection::MacProjection;
use super::reconstruct::{mc_slope, mol_face_velocity, upwind_state};
use super::{flux_difference, ghost_rules, AdvectionOp, BlockView};

/// Method-of-lines advection: a single limited upwind interpolation of the
/// current cell field to the faces, with no time extrapolation and no
/// transverse terms. The convective rate is written into the requested state
/// of the convective term, and fine fluxes are not averaged onto coarse
/// faces.
///
pub struct MolAdvection {
    name: String,
    fields: PdeFields,
    umac: [FieldId; 3],
    multiply_rho: bool,
    conservative: Vec<bool>,
    mesh_mapping: bool,
    projection: Option<MacProjection>,
}

impl MolAdvection {
    pub fn new(info: &PdeInfo, fields: PdeFields, umac: [FieldId; 3], config: &Config, projection: Option<MacProjection>) -> Self {
        Self {
            name: info.name.clone(),
            fields,
            umac,
            multiply_rho: info.multiply_rho,
            conservative: info.conservative.clone(),
            mesh_mapping: config.mesh_mapping,
            projection,
        }
    }

    fn prepare(&self, repo: &mut FieldRepo, fstate: FieldState) -> Result<()> {
        if self.mesh_mapping {
            let mapping = repo.require_mesh_mapping()?;
            repo.field_mut(self.fields.field).to_stretched_space(fstate, mapping.as_ref());
        }
        repo.fill_ghosts(self.fields.field, fstate);
        repo.fill_ghosts(self.fields.density, fstate);
        Ok(())
    }
}

/// The limited extrapolations from either side of a face: `(q_L + s_L / 2,
/// q_R - s_R / 2)`, boundary conditions applied.
fn face_states(view: &BlockView, face: Index, axis: Axis, n: usize) -> (f64, f64) {
    let lower = axis.shift(face, -1);
    let sl = view.pencil(lower, axis, n);
    let sr = view.pencil(face, axis, n);
    let umns = sl[2] + 0.5 * mc_slope(&sl);
    let upls = sr[2] - 0.5 * mc_slope(&sr);
    view.face_bc(face, axis, n, umns, upls)
}

fn block_fluxes(view: &BlockView, block: &IndexSpace, umac: [&Patch; 3]) -> ([Patch; 3], [Patch; 3]) {
    let ncomp = view.q.num_fields();
    let level = view.q.level();
    let mut fluxes = Axis::ALL.map(|axis| Patch::zeros(level, ncomp, block.surrounding_faces(axis)));
    let mut edges = Axis::ALL.map(|axis| Patch::zeros(level, ncomp, block.surrounding_faces(axis)));

    for axis in Axis::ALL {
        let d = axis.index();

        for face in block.surrounding_faces(axis).iter() {
            let vel = umac[d].get(face, 0);

            for n in 0..ncomp {
                let (umns, upls) = face_states(view, face, axis, n);
                let qe = upwind_state(umns, upls, vel);
                edges[d].set(face, n, qe);
                fluxes[d].set(face, n, vel * qe);
            }
        }
    }
    (fluxes, edges)
}

impl AdvectionOp for MolAdvection {
    fn preadvect(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<()> {
        if self.projection.is_none() {
            return Ok(());
        }
        self.prepare(repo, fstate)?;

        let rules = ghost_rules(repo, self.fields.field);
        let predicted: Vec<Vec<[Patch; 3]>> = (0..repo.num_active_levels())
            .map(|lev| {
                let level = repo.mesh().level(lev);
                let u = repo.field(self.fields.field).state(fstate).level(lev);

                level
                    .blocks
                    .par_iter()
                    .enumerate()
                    .map(|(b, block)| {
                        let view = BlockView {
                            q: &u[b],
                            geom: &level.geometry,
                            rules: &rules,
                            rho: None,
                        };
                        Axis::ALL.map(|axis| {
                            Patch::from_slice_function(lev as u32, block.surrounding_faces(axis), 1, |face, s| {
                                let (umns, upls) = face_states(&view, face, axis, axis.index());
                                s[0] = mol_face_velocity(umns, upls);
                            })
                        })
                    })
                    .collect()
            })
            .collect();

        for (lev, blocks) in predicted.into_iter().enumerate() {
            for (b, faces) in blocks.into_iter().enumerate() {
                for (id, patch) in self.umac.iter().zip(faces) {
                    let space = patch.index_space().clone();
                    repo.field_mut(*id).state_mut(FieldState::New).level_mut(lev)[b].copy_from(&patch, &space);
                }
            }
        }
        if let Some(projection) = self.projection.as_mut() {
            projection.project(repo, fstate, dt)?;
        }
        Ok(())
    }

    fn advect(&mut self, repo: &mut FieldRepo, fstate: FieldState, _dt: f64) -> Result<()> {
        self.prepare(repo, fstate)?;

        let rules = ghost_rules(repo, self.fields.field);
        let (field, density, umac_ids) = (self.fields.field, self.fields.density, self.umac);
        let multiply_rho = self.multiply_rho;
        let conservative = &self.conservative;

        repo.with_field_mut(self.fields.conv_term, |conv, repo| {
            for lev in 0..repo.num_active_levels() {
                let level = repo.mesh().level(lev);
                let q = repo.field(field).state(fstate).level(lev);
                let rho = repo.field(density).state(fstate).level(lev);
                let umac = umac_ids.map(|id| repo.field(id).state(FieldState::New).level(lev));

                conv.state_mut(fstate)
                    .level_mut(lev)
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(b, out)| {
                        let weighted = multiply_rho.then(|| {
                            Patch::from_slice_function(q[b].level(), q[b].index_space().clone(), q[b].num_fields(), |index, s| {
                                let r = rho[b].get(rho[b].index_space().clamp(index), 0);
                                for (n, s) in s.iter_mut().enumerate() {
                                    *s = r * q[b].get(index, n)
                                }
                            })
                        });
                        let view = BlockView {
                            q: weighted.as_ref().unwrap_or(&q[b]),
                            geom: &level.geometry,
                            rules: &rules,
                            rho: multiply_rho.then(|| &rho[b]),
                        };
                        let block = &level.blocks[b];
                        let u = umac.map(|u| &u[b]);
                        let (fluxes, edges) = block_fluxes(&view, block, u);

                        flux_difference(
                            block,
                            &level.geometry,
                            [&fluxes[0], &fluxes[1], &fluxes[2]],
                            [&edges[0], &edges[1], &edges[2]],
                            u,
                            conservative,
                            out,
                        );
                    });
            }
        });
        debug!("mol: advected {} into its {:?} convective term", self.name, fstate);
        Ok(())
    }

    fn on_regrid(&mut self) {
        if let Some(projection) = self.projection.as_mut() {
            projection.on_regrid()
        }
    }
}
