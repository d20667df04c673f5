use log::debug;
use rayon::prelude::*;
use crate::config::{Config, GodunovScheme};
use crate::error::Result;
use crate::field::{FieldId, FieldRepo, FieldState};
use crate::flux_average::average_down_faces;
use crate::index_space::{Axis, Index, IndexSpace};
use crate::patch::Patch;
use crate::pde::{PdeFields, PdeInfo};
use crate::projection::MacProjection;
use super::reconstruct::{self, upwind_state, upwind_velocity};
use super::{flux_difference, ghost_rules, AdvectionOp, BlockView};

/// Unsplit Godunov advection. Face states are traced over half a time step
/// from the reconstructed cell profiles, corrected by transverse fluxes and
/// upwinded against the face velocities. The face velocities themselves are
/// predicted the same way from the cell velocity and projected before use.
///
/// Mesh mapping is not applied by this scheme.
///
pub struct GodunovAdvection {
    name: String,
    fields: PdeFields,
    umac: [FieldId; 3],
    multiply_rho: bool,
    conservative: Vec<bool>,
    scheme: GodunovScheme,
    use_forces_in_trans: bool,
    projection: Option<MacProjection>,
}

impl GodunovAdvection {
    pub fn new(info: &PdeInfo, fields: PdeFields, umac: [FieldId; 3], config: &Config, projection: Option<MacProjection>) -> Result<Self> {
        Ok(Self {
            name: info.name.clone(),
            fields,
            umac,
            multiply_rho: info.multiply_rho,
            conservative: info.conservative.clone(),
            scheme: config.godunov_scheme()?,
            use_forces_in_trans: config.godunov_use_forces_in_trans,
            projection,
        })
    }

    pub fn scheme(&self) -> GodunovScheme {
        self.scheme
    }

    /// Predicted (unprojected) face velocities of one block: the velocity
    /// component normal to each face, traced with the cell velocity.
    fn predict_face_velocities(&self, view: &BlockView, block: &IndexSpace, src: &Patch, rho: &Patch, dt: f64) -> [Patch; 3] {
        let u = view.q;
        let region = block.extend_all(1);
        let force = |index: Index, n: usize| {
            if self.multiply_rho {
                src.get(index, n) / rho.get(index, 0)
            } else {
                src.get(index, n)
            }
        };
        let mut traces = Traces::predict(view, &region, self.scheme, dt, |axis, index| {
            let c = u.get(index, axis.index());
            (c, c)
        });
        if self.use_forces_in_trans {
            traces.add_force(&region, 0.5 * dt, &force);
        }
        let traces = &traces;
        let u_ad = |axis: Axis, face: Index| {
            let (lo, hi) = traces.sides(view, face, axis, axis.index());
            upwind_velocity(lo, hi)
        };

        Axis::ALL.map(|axis| {
            let d = axis.index();

            Patch::from_slice_function(u.level(), block.surrounding_faces(axis), 1, |face, s| {
                let lower = axis.shift(face, -1);
                let mut stl = traces.ip[d].get(lower, d);
                let mut sth = traces.im[d].get(face, d);

                for t in axis.transverse() {
                    let dtdx = dt / view.geom.cell_spacing(t);

                    for (cell, state) in [(lower, &mut stl), (face, &mut sth)] {
                        let upper = t.shift(cell, 1);
                        let (u0, u1) = (u_ad(t, cell), u_ad(t, upper));
                        let e0 = traces.edge(view, cell, t, d, u0);
                        let e1 = traces.edge(view, upper, t, d, u1);
                        *state -= 0.5 * dtdx * 0.5 * (u0 + u1) * (e1 - e0);
                    }
                }
                if !self.use_forces_in_trans {
                    stl += 0.5 * dt * force(lower, d);
                    sth += 0.5 * dt * force(face, d);
                }
                let (stl, sth) = view.face_bc(face, axis, d, stl, sth);
                s[0] = upwind_velocity(stl, sth);
            })
        })
    }

    /// Fluxes and upwinded edge states of one block on the faces normal to
    /// each axis.
    fn block_fluxes(&self, view: &BlockView, block: &IndexSpace, umac: [&Patch; 3], src: &Patch, dt: f64) -> ([Patch; 3], [Patch; 3]) {
        let ncomp = view.q.num_fields();
        let region = block.extend_all(1);
        let force = |index: Index, n: usize| src.get(index, n);

        let mut traces = Traces::predict(view, &region, self.scheme, dt, |axis, index| {
            let u = umac[axis.index()];
            (u.get(index, 0), u.get(axis.shift(index, 1), 0))
        });
        if self.use_forces_in_trans {
            traces.add_force(&region, 0.5 * dt, &force);
        }
        let mut fluxes = Axis::ALL.map(|axis| Patch::zeros(view.q.level(), ncomp, block.surrounding_faces(axis)));
        let mut edges = Axis::ALL.map(|axis| Patch::zeros(view.q.level(), ncomp, block.surrounding_faces(axis)));

        for axis in Axis::ALL {
            let d = axis.index();

            for face in block.surrounding_faces(axis).iter() {
                let lower = axis.shift(face, -1);
                let vel = umac[d].get(face, 0);

                for n in 0..ncomp {
                    let mut stl = traces.ip[d].get(lower, n);
                    let mut sth = traces.im[d].get(face, n);

                    for t in axis.transverse() {
                        let dtdx = dt / view.geom.cell_spacing(t);
                        let ut = umac[t.index()];

                        for (cell, state) in [(lower, &mut stl), (face, &mut sth)] {
                            let upper = t.shift(cell, 1);
                            let (u0, u1) = (ut.get(cell, 0), ut.get(upper, 0));
                            let e0 = traces.edge(view, cell, t, n, u0);
                            let e1 = traces.edge(view, upper, t, n, u1);

                            *state -= if self.conservative[n] {
                                0.5 * dtdx * (u1 * e1 - u0 * e0)
                            } else {
                                0.5 * dtdx * 0.5 * (u0 + u1) * (e1 - e0)
                            };
                        }
                    }
                    if !self.use_forces_in_trans {
                        stl += 0.5 * dt * force(lower, n);
                        sth += 0.5 * dt * force(face, n);
                    }
                    let (stl, sth) = view.face_bc(face, axis, n, stl, sth);
                    let qe = upwind_state(stl, sth, vel);
                    edges[d].set(face, n, qe);
                    fluxes[d].set(face, n, vel * qe);
                }
            }
        }
        (fluxes, edges)
    }

    fn fill_inputs(&self, repo: &mut FieldRepo, fstate: FieldState) {
        repo.fill_ghosts(self.fields.field, fstate);
        repo.fill_ghosts(self.fields.density, fstate);
        repo.fill_ghosts(self.fields.src_term, FieldState::New);
    }
}

impl AdvectionOp for GodunovAdvection {
    fn preadvect(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<()> {
        if self.projection.is_none() {
            return Ok(());
        }
        self.fill_inputs(repo, fstate);

        let rules = ghost_rules(repo, self.fields.field);
        let predicted: Vec<Vec<[Patch; 3]>> = (0..repo.num_active_levels())
            .map(|lev| {
                let level = repo.mesh().level(lev);
                let u = repo.field(self.fields.field).state(fstate).level(lev);
                let rho = repo.field(self.fields.density).state(fstate).level(lev);
                let src = repo.field(self.fields.src_term).state(FieldState::New).level(lev);

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
                        self.predict_face_velocities(&view, block, &src[b], &rho[b], dt)
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

    fn advect(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<()> {
        self.fill_inputs(repo, fstate);

        let rules = ghost_rules(repo, self.fields.field);
        let nlev = repo.num_active_levels();
        let mut fluxes: Vec<[Vec<Patch>; 3]> = Vec::with_capacity(nlev);
        let mut edges: Vec<[Vec<Patch>; 3]> = Vec::with_capacity(nlev);

        for lev in 0..nlev {
            let level = repo.mesh().level(lev);
            let q = repo.field(self.fields.field).state(fstate).level(lev);
            let rho = repo.field(self.fields.density).state(fstate).level(lev);
            let src = repo.field(self.fields.src_term).state(FieldState::New).level(lev);
            let umac = self.umac.map(|id| repo.field(id).state(FieldState::New).level(lev));

            let weighted: Option<Vec<Patch>> = self
                .multiply_rho
                .then(|| q.par_iter().zip(rho).map(|(q, rho)| density_weighted(q, rho)).collect());

            let (f, e): (Vec<_>, Vec<_>) = level
                .blocks
                .par_iter()
                .enumerate()
                .map(|(b, block)| {
                    let view = BlockView {
                        q: weighted.as_ref().map_or(&q[b], |w| &w[b]),
                        geom: &level.geometry,
                        rules: &rules,
                        rho: self.multiply_rho.then(|| &rho[b]),
                    };
                    self.block_fluxes(&view, block, umac.map(|u| &u[b]), &src[b], dt)
                })
                .collect::<Vec<_>>()
                .into_iter()
                .unzip();

            fluxes.push(by_axis(f));
            edges.push(by_axis(e));
        }

        let mesh = repo.mesh();

        for lev in (1..nlev).rev() {
            for axis in Axis::ALL {
                let d = axis.index();
                let fine_valid: Vec<_> = mesh.level(lev).blocks.iter().map(|b| b.surrounding_faces(axis)).collect();
                let coarse_valid: Vec<_> = mesh.level(lev - 1).blocks.iter().map(|b| b.surrounding_faces(axis)).collect();
                let (coarse, fine) = fluxes.split_at_mut(lev);
                average_down_faces(&fine[0][d], &fine_valid, &mut coarse[lev - 1][d], &coarse_valid, mesh.ref_ratio(), axis);
            }
        }

        let umac_ids = self.umac;
        let conservative = &self.conservative;

        repo.with_field_mut(self.fields.conv_term, |conv, repo| {
            for lev in 0..nlev {
                let level = repo.mesh().level(lev);
                let umac = umac_ids.map(|id| repo.field(id).state(FieldState::New).level(lev));
                let (f, e) = (&fluxes[lev], &edges[lev]);

                conv.state_mut(FieldState::New)
                    .level_mut(lev)
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(b, out)| {
                        flux_difference(
                            &level.blocks[b],
                            &level.geometry,
                            [&f[0][b], &f[1][b], &f[2][b]],
                            [&e[0][b], &e[1][b], &e[2][b]],
                            umac.map(|u| &u[b]),
                            conservative,
                            out,
                        )
                    });
            }
        });
        debug!("godunov ({:?}): advected {} on {} level(s)", self.scheme, self.name, nlev);
        Ok(())
    }

    fn on_regrid(&mut self) {
        if let Some(projection) = self.projection.as_mut() {
            projection.on_regrid()
        }
    }
}

/// Time-centered traces at the lower (`im`) and upper (`ip`) faces of every
/// cell of a region, per axis. Block-local scratch.
///
struct Traces {
    im: [Patch; 3],
    ip: [Patch; 3],
}

impl Traces {
    fn predict<S>(view: &BlockView, region: &IndexSpace, scheme: GodunovScheme, dt: f64, speed: S) -> Self
    where
        S: Fn(Axis, Index) -> (f64, f64),
    {
        let ncomp = view.q.num_fields();
        let level = view.q.level();
        let mut im = Axis::ALL.map(|_| Patch::zeros(level, ncomp, region.clone()));
        let mut ip = Axis::ALL.map(|_| Patch::zeros(level, ncomp, region.clone()));

        for axis in Axis::ALL {
            let d = axis.index();
            let dtdx = dt / view.geom.cell_spacing(axis);

            for index in region.iter() {
                let (u_lo, u_hi) = speed(axis, index);

                for n in 0..ncomp {
                    let (m, p) = reconstruct::predict(scheme, &view.pencil(index, axis, n), u_lo, u_hi, dtdx);
                    im[d].set(index, n, m);
                    ip[d].set(index, n, p);
                }
            }
        }
        Self { im, ip }
    }

    fn add_force<F>(&mut self, region: &IndexSpace, half_dt: f64, force: &F)
    where
        F: Fn(Index, usize) -> f64,
    {
        let ncomp = self.im[0].num_fields();

        for d in 0..3 {
            for index in region.iter() {
                for n in 0..ncomp {
                    let f = half_dt * force(index, n);
                    self.im[d].set(index, n, self.im[d].get(index, n) + f);
                    self.ip[d].set(index, n, self.ip[d].get(index, n) + f);
                }
            }
        }
    }

    /// The two traced states at a face, boundary conditions applied.
    fn sides(&self, view: &BlockView, face: Index, axis: Axis, n: usize) -> (f64, f64) {
        let d = axis.index();
        let lo = self.ip[d].get(axis.shift(face, -1), n);
        let hi = self.im[d].get(face, n);
        view.face_bc(face, axis, n, lo, hi)
    }

    /// Upwinded traced state at a face, used in the transverse corrections.
    fn edge(&self, view: &BlockView, face: Index, axis: Axis, n: usize, vel: f64) -> f64 {
        let (lo, hi) = self.sides(view, face, axis, n);
        upwind_state(lo, hi, vel)
    }
}

fn density_weighted(q: &Patch, rho: &Patch) -> Patch {
    Patch::from_slice_function(q.level(), q.index_space().clone(), q.num_fields(), |index, s| {
        let r = rho.get(rho.index_space().clamp(index), 0);
        for (n, s) in s.iter_mut().enumerate() {
            *s = r * q.get(index, n)
        }
    })
}

fn by_axis(blocks: Vec<[Patch; 3]>) -> [Vec<Patch>; 3] {
    let mut result = [Vec::new(), Vec::new(), Vec::new()];

    for patches in blocks {
        for (v, p) in result.iter_mut().zip(patches) {
            v.push(p)
        }
    }
    result
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;
    use std::sync::Arc;
    use super::GodunovAdvection;
    use crate::advection::{declare_mac_velocity, AdvectionOp};
    use crate::config::Config;
    use crate::field::{FieldRepo, FieldState};
    use crate::index_space::range3d;
    use crate::linear_solver::ConjugateGradient;
    use crate::mesh::{LevelGeometry, Mesh};
    use crate::pde::{PdeFields, PdeInfo};
    use crate::projection::MacProjection;

    fn repo() -> FieldRepo {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        FieldRepo::new(Mesh::single_level(geom, 4).unwrap())
    }

    fn conv_sum(repo: &FieldRepo, fields: &PdeFields) -> (f64, f64) {
        let state = repo.field(fields.conv_term).state(FieldState::New);
        let blocks = &repo.mesh().level(0).blocks;
        let mut sum = 0.0;
        let mut max = 0.0_f64;

        for (b, block) in blocks.iter().enumerate() {
            for index in block.iter() {
                let c = state.patch(0, b).get(index, 0);
                sum += c;
                max = max.max(c.abs());
            }
        }
        (sum, max)
    }

    #[test]
    fn conservative_update_conserves_the_volume_integral() {
        for godunov_type in ["plm", "ppm", "weno_z"] {
            let mut repo = repo();
            let info = PdeInfo::scalar("tracer", false);
            let fields = PdeFields::declare(&mut repo, &info).unwrap();
            let umac = declare_mac_velocity(&mut repo).unwrap();
            let config = Config {
                godunov_type: godunov_type.to_string(),
                ..Config::default()
            };

            repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
                s[0] = 1.0 + 0.5 * (2.0 * PI * x[0]).sin() * (2.0 * PI * x[1]).cos()
            });
            repo.set_from_function(umac[0], FieldState::New, |_, x, s| s[0] = (2.0 * PI * x[1]).sin());
            repo.set_from_function(umac[1], FieldState::New, |_, x, s| s[0] = (2.0 * PI * x[2]).cos());
            repo.set_from_function(umac[2], FieldState::New, |_, _, s| s[0] = 0.5);

            let mut op = GodunovAdvection::new(&info, fields, umac, &config, None).unwrap();
            op.advect(&mut repo, FieldState::New, 0.02).unwrap();

            let (sum, max) = conv_sum(&repo, &fields);
            assert!(max > 1e-3, "{}", godunov_type);
            assert!(sum.abs() < 1e-10 * max * 512.0, "{}: {}", godunov_type, sum);
        }
    }

    #[test]
    fn fluxes_averaged_down_keep_the_composite_integral() {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        let mut mesh = Mesh::single_level(geom, 4).unwrap();
        mesh.add_level(vec![range3d(4..12, 4..12, 4..12)]).unwrap();
        let mut repo = FieldRepo::new(mesh);

        let info = PdeInfo::scalar("tracer", false);
        let fields = PdeFields::declare(&mut repo, &info).unwrap();
        let umac = declare_mac_velocity(&mut repo).unwrap();

        repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
            s[0] = 1.0 + 0.5 * (2.0 * PI * x[0]).sin() * (2.0 * PI * x[1]).cos()
        });
        repo.set_from_function(umac[0], FieldState::New, |_, x, s| s[0] = (2.0 * PI * x[1]).sin());
        repo.set_from_function(umac[1], FieldState::New, |_, x, s| s[0] = (2.0 * PI * x[2]).cos());
        repo.set_from_function(umac[2], FieldState::New, |_, _, s| s[0] = 0.5);

        let mut op = GodunovAdvection::new(&info, fields, umac, &Config::default(), None).unwrap();
        op.advect(&mut repo, FieldState::New, 0.02).unwrap();

        let fine = repo.field(fields.conv_term).state(FieldState::New).level(1);
        assert!(fine.iter().any(|p| p.data().iter().any(|c| c.abs() > 1e-3)));
        assert!(repo.volume_integral(fields.conv_term, FieldState::New, 0).abs() < 1e-10);
    }

    #[test]
    fn uniform_field_has_no_convective_term() {
        let mut repo = repo();
        let info = PdeInfo::scalar("tracer", true);
        let fields = PdeFields::declare(&mut repo, &info).unwrap();
        let umac = declare_mac_velocity(&mut repo).unwrap();

        repo.field_mut(fields.field).state_mut(FieldState::New).set_val(3.0);
        repo.field_mut(fields.density).state_mut(FieldState::New).set_val(1.2);
        repo.set_from_function(umac[0], FieldState::New, |_, _, s| s[0] = 0.7);
        repo.set_from_function(umac[1], FieldState::New, |_, _, s| s[0] = -0.4);

        let mut op = GodunovAdvection::new(&info, fields, umac, &Config::default(), None).unwrap();
        op.advect(&mut repo, FieldState::New, 0.05).unwrap();
        assert!(conv_sum(&repo, &fields).1 < 1e-12);
    }

    #[test]
    fn uniform_flow_predicts_uniform_face_velocities() {
        let mut repo = repo();
        let info = PdeInfo::icns();
        let config = Config::default();
        let fields = PdeFields::declare(&mut repo, &info).unwrap();
        let umac = declare_mac_velocity(&mut repo).unwrap();

        repo.field_mut(fields.density).state_mut(FieldState::New).set_val(1.0);
        repo.set_from_function(fields.field, FieldState::New, |_, _, s| {
            s[0] = 1.0;
            s[1] = -0.5;
            s[2] = 0.0;
        });
        let projection = MacProjection::new(umac, fields.field, fields.density, &config, Arc::new(ConjugateGradient));
        let mut op = GodunovAdvection::new(&info, fields, umac, &config, Some(projection)).unwrap();
        op.preadvect(&mut repo, FieldState::New, 0.05).unwrap();

        for (id, expected) in umac.iter().zip([1.0, -0.5, 0.0]) {
            let state = repo.field(*id).state(FieldState::New);
            assert!(state.level(0).iter().all(|p| p.data().iter().all(|u| (u - expected).abs() < 1e-12)));
        }

        op.advect(&mut repo, FieldState::New, 0.05).unwrap();
        assert!(conv_sum(&repo, &fields).1 < 1e-12);
    }
}
