use std::sync::Arc;
use log::{debug, info};
use rayon::prelude::*;
use crate::boundary::{Orientation, SolverBc};
use crate::config::{Config, Scheme};
use crate::error::{Error, Result};
use crate::field::{Field, FieldId, FieldRepo, FieldState, Location, StateData};
use crate::index_space::{coarsen_index, Axis, Index};
use crate::linear_operator::{CellOperator, LevelStencil, Neighbor};
use crate::linear_solver::{LinearSolver, SolveStats, SolverOptions};
use crate::mesh::Mesh;
use crate::mesh_mapping::MeshMapping;
use crate::patch::Patch;
use crate::pde::{DiffusionKind, PdeFields, PdeInfo};

/// The diffusion-operator interface, chosen once per equation at setup.
///
pub trait DiffusionOp: Send {
    /// Apply the operator explicitly to the `fstate` state of the field and
    /// store the result in the diffusion term (its New state for the
    /// Godunov scheme, its `fstate` state for the method of lines).
    fn compute_diff_term(&mut self, repo: &mut FieldRepo, fstate: FieldState) -> Result<()>;

    /// Solve `(a - dt L) x = a fld_new` in place over the New state of the
    /// field, level by level from coarse to fine. Callers pass the implicit
    /// fraction of the time step.
    fn linsys_solve(&mut self, repo: &mut FieldRepo, dt: f64) -> Result<Vec<SolveStats>>;

    /// Drop cached operators after the mesh changed.
    fn on_regrid(&mut self);
}

/// Build the diffusion operator declared by an equation, if any.
pub fn make_diffusion_op(info: &PdeInfo, fields: PdeFields, config: &Config, solver: Arc<dyn LinearSolver>) -> Result<Option<Box<dyn DiffusionOp>>> {
    let op: Option<Box<dyn DiffusionOp>> = match info.diffusion {
        Some(DiffusionKind::Scalar) => Some(Box::new(ScalarDiffusion::new(info, fields, config, solver)?)),
        Some(DiffusionKind::Tensor) => Some(Box::new(TensorDiffusion::new(info, fields, config, solver)?)),
        None => None,
    };
    Ok(op)
}

/// `L q = div(mu grad q)`, applied to each component independently.
///
pub struct ScalarDiffusion {
    core: Core,
}

/// `L u = div(mu (grad u + grad u^T))` for a velocity vector. The implicit
/// solve treats the `div(mu grad u)` part implicitly per component, and the
/// transpose part explicitly from the current New state.
///
pub struct TensorDiffusion {
    core: Core,
}

impl ScalarDiffusion {
    pub fn new(info: &PdeInfo, fields: PdeFields, config: &Config, solver: Arc<dyn LinearSolver>) -> Result<Self> {
        Ok(Self {
            core: Core::new(info, fields, config, solver, DiffusionKind::Scalar)?,
        })
    }
}

impl TensorDiffusion {
    pub fn new(info: &PdeInfo, fields: PdeFields, config: &Config, solver: Arc<dyn LinearSolver>) -> Result<Self> {
        Ok(Self {
            core: Core::new(info, fields, config, solver, DiffusionKind::Tensor)?,
        })
    }
}

impl DiffusionOp for ScalarDiffusion {
    fn compute_diff_term(&mut self, repo: &mut FieldRepo, fstate: FieldState) -> Result<()> {
        self.core.apply(repo, fstate, false)
    }

    fn linsys_solve(&mut self, repo: &mut FieldRepo, dt: f64) -> Result<Vec<SolveStats>> {
        self.core.solve(repo, dt, false)
    }

    fn on_regrid(&mut self) {
        self.core.need_init = true;
    }
}

impl DiffusionOp for TensorDiffusion {
    fn compute_diff_term(&mut self, repo: &mut FieldRepo, fstate: FieldState) -> Result<()> {
        self.core.apply(repo, fstate, true)
    }

    fn linsys_solve(&mut self, repo: &mut FieldRepo, dt: f64) -> Result<Vec<SolveStats>> {
        self.core.solve(repo, dt, true)
    }

    fn on_regrid(&mut self) {
        self.core.need_init = true;
    }
}

/// State shared by both operator kinds: the operands, the cached level
/// stencils, and the solver collaborator.
///
struct Core {
    name: String,
    fields: PdeFields,
    multiply_rho: bool,
    scheme: Scheme,
    mesh_mapping: bool,
    has_overset: bool,
    options: SolverOptions,
    solver: Arc<dyn LinearSolver>,
    need_init: bool,
    stencils: Vec<LevelStencil>,
}

impl Core {
    fn new(info: &PdeInfo, fields: PdeFields, config: &Config, solver: Arc<dyn LinearSolver>, kind: DiffusionKind) -> Result<Self> {
        if info.diffusion != Some(kind) {
            return Err(Error::config(format!(
                "{}: a {:?} diffusion operator cannot serve an equation declared with {:?}",
                info.name, kind, info.diffusion
            )));
        }
        Ok(Self {
            name: info.name.clone(),
            fields,
            multiply_rho: info.multiply_rho,
            scheme: config.scheme,
            mesh_mapping: config.mesh_mapping,
            has_overset: config.has_overset,
            options: config.diffusion.clone(),
            solver,
            need_init: true,
            stencils: Vec::new(),
        })
    }

    fn prepare(&mut self, repo: &mut FieldRepo, fstate: FieldState) -> Result<Option<Arc<dyn MeshMapping>>> {
        if self.need_init {
            let mesh = repo.mesh();
            self.stencils = (0..mesh.num_levels())
                .map(|lev| LevelStencil::build(mesh, lev, self.has_overset.then(|| repo.mask_cell().level(lev))))
                .collect();
            self.need_init = false;
            info!("{}: diffusion operator set up on {} level(s)", self.name, self.stencils.len());
        }
        repo.fill_ghosts(self.fields.field, fstate);
        repo.fill_ghosts(self.fields.mueff, FieldState::New);

        if self.mesh_mapping {
            Ok(Some(repo.require_mesh_mapping()?))
        } else {
            Ok(None)
        }
    }

    fn apply(&mut self, repo: &mut FieldRepo, fstate: FieldState, tensor: bool) -> Result<()> {
        let mapping = self.prepare(repo, fstate)?;
        let target = match self.scheme {
            Scheme::Godunov => FieldState::New,
            Scheme::Mol => fstate,
        };
        let fields = self.fields;
        let stencils = &self.stencils;

        repo.with_field_mut(fields.diff_term, |diff, repo| {
            let field = repo.field(fields.field);
            let state = field.state(fstate);

            for (lev, stencil) in stencils.iter().enumerate() {
                let bcoef = face_coefficients(repo, fields.mueff, stencil, mapping.as_deref());
                let transpose = tensor.then(|| transpose_term(stencil, state.level(lev), &bcoef));

                for n in 0..field.num_comp() {
                    let op = CellOperator::new(stencil, solver_bcs(field, n), 0.0, Vec::new(), 1.0, bcoef.clone());
                    let x = stencil.gather(state.level(lev), n);
                    let mut lx = op.divergence(&x, neighbor_values(repo.mesh(), state, lev, n));

                    if let Some(t) = &transpose {
                        lx.par_iter_mut().zip(t).for_each(|(l, t)| *l += t[n]);
                    }
                    stencil.scatter(&lx, diff.state_mut(target).level_mut(lev), n);
                }
            }
        });
        debug!("{}: diffusion term into {:?} state", self.name, target);
        Ok(())
    }

    fn solve(&mut self, repo: &mut FieldRepo, dt: f64, tensor: bool) -> Result<Vec<SolveStats>> {
        let mapping = self.prepare(repo, FieldState::New)?;
        let fields = self.fields;
        let multiply_rho = self.multiply_rho;
        let (stencils, solver, options, name) = (&self.stencils, &self.solver, &self.options, &self.name);

        let stats = repo.with_field_mut(fields.field, |field, repo| -> Result<Vec<SolveStats>> {
            let mut stats = Vec::new();

            for (lev, stencil) in stencils.iter().enumerate() {
                let bcoef = face_coefficients(repo, fields.mueff, stencil, mapping.as_deref());
                let rho = repo.field(fields.density).state(FieldState::New).level(lev);
                let acoef: Vec<f64> = stencil
                    .cells()
                    .par_iter()
                    .map(|c| {
                        let r = if multiply_rho { rho[c.block].get(c.index, 0) } else { 1.0 };
                        r * mapping.as_deref().map_or(1.0, |m| m.detj(lev, Location::Cell, c.index))
                    })
                    .collect();
                let transpose = tensor.then(|| transpose_term(stencil, field.state(FieldState::New).level(lev), &bcoef));

                for n in 0..field.num_comp() {
                    let op = CellOperator::new(stencil, solver_bcs(field, n), 1.0, acoef.clone(), dt, bcoef.clone());
                    let state = field.state(FieldState::New);
                    let mut x = stencil.gather(state.level(lev), n);
                    let rhs: Vec<f64> = x
                        .par_iter()
                        .zip(&acoef)
                        .enumerate()
                        .map(|(c, (x, a))| a * x + transpose.as_ref().map_or(0.0, |t| dt * t[c][n]))
                        .collect();
                    let l0 = op.boundary_term(neighbor_values(repo.mesh(), state, lev, n));
                    let rhs = op.with_boundary_term(&rhs, &l0);

                    let label = format!("{}_diffusion level {} comp {}", name, lev, n);
                    stats.push(solver.solve(&label, &op, &rhs, &mut x, options)?);
                    stencil.scatter(&x, field.state_mut(FieldState::New).level_mut(lev), n);
                }
            }
            Ok(stats)
        })?;

        debug!(
            "{}: implicit diffusion solved ({:?} iterations)",
            self.name,
            stats.iter().map(|s| s.iterations).collect::<Vec<_>>()
        );
        Ok(stats)
    }
}

fn solver_bcs(field: &Field, n: usize) -> [SolverBc; 6] {
    Orientation::ALL.map(|ori| field.bc().solver_bc(ori, n, field.is_vector()))
}

/// Face viscosities: the mean of the effective viscosity of the two cells
/// sharing a face, scaled by `detJ_f / fac_d^2` under mesh mapping.
fn face_coefficients(repo: &FieldRepo, mueff: FieldId, stencil: &LevelStencil, mapping: Option<&dyn MeshMapping>) -> Vec<[f64; 6]> {
    let lev = stencil.lev();
    let mu = repo.field(mueff).state(FieldState::New).level(lev);

    stencil.face_coefficients(|c, ori| {
        let p = &mu[c.block];
        let nb = ori.axis.shift(c.index, ori.step());
        let scale = mapping.map_or(1.0, |m| m.face_coefficient_scale(lev, ori.axis, ori.face_of(c.index)));
        0.5 * (p.get(c.index, 0) + p.get(nb, 0)) * scale
    })
}

/// Values of the field outside the unknowns of a level: coarse-fine
/// neighbors read the coarser level, masked neighbors keep their current
/// value.
fn neighbor_values<'a>(mesh: &'a Mesh, state: &'a StateData, lev: usize, n: usize) -> impl Fn(Neighbor) -> f64 + Sync + 'a {
    move |nb| match nb {
        Neighbor::Masked(index) => mesh
            .level(lev)
            .block_containing(index)
            .map_or(0.0, |b| state.patch(lev, b).get(index, n)),
        Neighbor::CoarseFine(index) if lev > 0 => {
            let coarse = coarsen_index(index, mesh.ref_ratio());
            mesh.level(lev - 1)
                .block_containing(coarse)
                .map_or(0.0, |b| state.patch(lev - 1, b).get(coarse, n))
        }
        _ => 0.0,
    }
}

/// The transpose part of the tensor operator, `sum_d d/dx_d (mu du_d/dx_i)`,
/// for every unknown. Face gradients normal to the face are two-point
/// differences; tangential ones average the centered differences of the two
/// cells sharing the face.
fn transpose_term(stencil: &LevelStencil, patches: &[Patch], bcoef: &[[f64; 6]]) -> Vec<[f64; 3]> {
    let h = Axis::ALL.map(|a| stencil.spacing(a));

    stencil
        .cells()
        .par_iter()
        .zip(bcoef)
        .map(|(c, b)| {
            let u = &patches[c.block];
            let gradient = |cell: Index, i: Axis, d: Axis| -> f64 {
                let across = d.shift(cell, 1);
                let comp = d.index();

                if i == d {
                    (u.get(across, comp) - u.get(cell, comp)) / h[d.index()]
                } else {
                    let centered = |x: Index| u.get(i.shift(x, 1), comp) - u.get(i.shift(x, -1), comp);
                    0.25 * (centered(cell) + centered(across)) / h[i.index()]
                }
            };
            let mut t = [0.0; 3];

            for i in Axis::ALL {
                for d in Axis::ALL {
                    let lo = Orientation::low(d);
                    let hi = Orientation::high(d);
                    let g_hi = gradient(c.index, i, d);
                    let g_lo = gradient(d.shift(c.index, -1), i, d);
                    t[i.index()] += (b[hi.index()] * g_hi - b[lo.index()] * g_lo) / h[d.index()];
                }
            }
            t
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::f64::consts::PI;
    use std::sync::Arc;
    use super::{DiffusionOp, ScalarDiffusion, TensorDiffusion};
    use crate::config::{Config, Scheme};
    use crate::field::{FieldRepo, FieldState};
    use crate::linear_solver::ConjugateGradient;
    use crate::mesh::{LevelGeometry, Mesh};
    use crate::mesh_mapping::ConstantMapping;
    use crate::pde::{PdeFields, PdeInfo};

    const H: f64 = 1.0 / 8.0;

    fn eigenvalue() -> f64 {
        (2.0 * (2.0 * PI * H).cos() - 2.0) / (H * H)
    }

    fn setup(info: &PdeInfo) -> (FieldRepo, PdeFields) {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        let mut repo = FieldRepo::new(Mesh::single_level(geom, 4).unwrap());
        let fields = PdeFields::declare(&mut repo, info).unwrap();
        repo.field_mut(fields.mueff).state_mut(FieldState::New).set_val(1.0);
        repo.field_mut(fields.density).state_mut(FieldState::New).set_val(2.0);
        (repo, fields)
    }

    fn check_component(repo: &FieldRepo, id: crate::field::FieldId, fstate: FieldState, n: usize, f: impl Fn([f64; 3]) -> f64) {
        let geom = repo.mesh().geometry(0);
        let state = repo.field(id).state(fstate);

        for (b, block) in repo.mesh().level(0).blocks.iter().enumerate() {
            for index in block.iter() {
                let expected = f(geom.cell_center(index));
                let value = state.patch(0, b).get(index, n);
                assert!((value - expected).abs() < 1e-8, "{:?}: {} != {}", index, value, expected);
            }
        }
    }

    #[test]
    fn operator_kind_must_match_the_equation() {
        let info = PdeInfo::icns();
        let (_, fields) = setup(&info);
        assert!(ScalarDiffusion::new(&info, fields, &Config::default(), Arc::new(ConjugateGradient)).is_err());
        assert!(TensorDiffusion::new(&info, fields, &Config::default(), Arc::new(ConjugateGradient)).is_ok());
    }

    #[test]
    fn explicit_scalar_term_is_the_discrete_laplacian() {
        let info = PdeInfo::scalar("tracer", false);
        let (mut repo, fields) = setup(&info);
        let config = Config {
            scheme: Scheme::Mol,
            ..Config::default()
        };
        repo.set_from_function(fields.field, FieldState::Old, |_, x, s| s[0] = (2.0 * PI * x[0]).sin());

        let mut op = ScalarDiffusion::new(&info, fields, &config, Arc::new(ConjugateGradient)).unwrap();
        op.compute_diff_term(&mut repo, FieldState::Old).unwrap();
        check_component(&repo, fields.diff_term, FieldState::Old, 0, |x| eigenvalue() * (2.0 * PI * x[0]).sin());
    }

    #[test]
    fn stretched_face_coefficients_scale_the_explicit_term() {
        let info = PdeInfo::scalar("tracer", false);
        let (mut repo, fields) = setup(&info);
        repo.set_mesh_mapping(Arc::new(ConstantMapping { factors: [2.0, 1.0, 1.0] }));
        let config = Config {
            scheme: Scheme::Mol,
            mesh_mapping: true,
            ..Config::default()
        };
        repo.set_from_function(fields.field, FieldState::Old, |_, x, s| s[0] = (2.0 * PI * x[0]).sin());

        // x faces carry detJ / fac_x^2 = 2 / 4
        let mut op = ScalarDiffusion::new(&info, fields, &config, Arc::new(ConjugateGradient)).unwrap();
        op.compute_diff_term(&mut repo, FieldState::Old).unwrap();
        check_component(&repo, fields.diff_term, FieldState::Old, 0, |x| 0.5 * eigenvalue() * (2.0 * PI * x[0]).sin());
    }

    #[test]
    fn implicit_solve_damps_a_mode_by_its_eigenvalue() {
        let info = PdeInfo::scalar("tracer", true);
        let (mut repo, fields) = setup(&info);
        let dt = 0.01;
        repo.set_from_function(fields.field, FieldState::New, |_, x, s| s[0] = (2.0 * PI * x[1]).cos());

        let mut op = ScalarDiffusion::new(&info, fields, &Config::default(), Arc::new(ConjugateGradient)).unwrap();
        let stats = op.linsys_solve(&mut repo, dt).unwrap();
        assert_eq!(stats.len(), 1);

        let factor = 2.0 / (2.0 - dt * eigenvalue());
        check_component(&repo, fields.field, FieldState::New, 0, |x| factor * (2.0 * PI * x[1]).cos());
    }

    #[test]
    fn tensor_term_of_a_shear_flow_is_its_laplacian() {
        let info = PdeInfo::icns();
        let (mut repo, fields) = setup(&info);
        repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
            s[0] = (2.0 * PI * x[1]).sin();
            s[1] = 0.0;
            s[2] = 0.0;
        });

        let mut op = TensorDiffusion::new(&info, fields, &Config::default(), Arc::new(ConjugateGradient)).unwrap();
        op.compute_diff_term(&mut repo, FieldState::New).unwrap();
        check_component(&repo, fields.diff_term, FieldState::New, 0, |x| eigenvalue() * (2.0 * PI * x[1]).sin());
        check_component(&repo, fields.diff_term, FieldState::New, 1, |_| 0.0);
        check_component(&repo, fields.diff_term, FieldState::New, 2, |_| 0.0);
    }
}
