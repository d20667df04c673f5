use std::sync::Arc;
use log::info;
use crate::advection::{make_advection_op, AdvectionOp};
use crate::config::{Config, DiffusionType, Scheme};
use crate::diffusion::{make_diffusion_op, DiffusionOp};
use crate::error::{Error, Result};
use crate::field::{FieldId, FieldRepo, FieldSpec, FieldState};
use crate::linear_solver::{LinearSolver, SolveStats};
use crate::rhs::ComputeRhs;

/// The kind of diffusion operator a transport equation is declared with.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffusionKind {
    /// `div(mu grad q)`, one coefficient per face, applied per component.
    Scalar,
    /// `div(mu (grad u + grad u^T))` for a velocity vector.
    Tensor,
}

/// Static description of one transport equation.
///
#[derive(Clone, Debug)]
pub struct PdeInfo {
    pub name: String,
    pub num_comp: usize,
    pub multiply_rho: bool,
    pub diffusion: Option<DiffusionKind>,
    pub conservative: Vec<bool>,
    pub momentum: bool,
}

impl PdeInfo {
    /// Incompressible momentum: a density-weighted velocity vector with a
    /// tensor viscous operator, advected in non-conservative form.
    pub fn icns() -> Self {
        Self {
            name: "velocity".to_string(),
            num_comp: 3,
            multiply_rho: true,
            diffusion: Some(DiffusionKind::Tensor),
            conservative: vec![false; 3],
            momentum: true,
        }
    }

    /// A passive or density-weighted scalar in conservative form.
    pub fn scalar(name: &str, multiply_rho: bool) -> Self {
        Self {
            name: name.to_string(),
            num_comp: 1,
            multiply_rho,
            diffusion: Some(DiffusionKind::Scalar),
            conservative: vec![true],
            momentum: false,
        }
    }

    pub fn without_diffusion(mut self) -> Self {
        self.diffusion = None;
        self
    }

    pub fn with_conservative(mut self, conservative: bool) -> Self {
        self.conservative = vec![conservative; self.num_comp];
        self
    }
}

/// The operands of one transport equation: the transported field, its
/// source, diffusion and convective terms, the effective viscosity, and the
/// shared density. A non-owning bundle of registry handles.
///
#[derive(Clone, Copy, Debug)]
pub struct PdeFields {
    pub field: FieldId,
    pub src_term: FieldId,
    pub diff_term: FieldId,
    pub conv_term: FieldId,
    pub mueff: FieldId,
    pub density: FieldId,
}

impl PdeFields {
    pub const NUM_GHOST: i64 = 3;
    pub const DENSITY: &'static str = "density";

    /// Declare (or find) every operand of the equation in the registry.
    pub fn declare(repo: &mut FieldRepo, info: &PdeInfo) -> Result<Self> {
        if info.conservative.len() != info.num_comp {
            return Err(Error::config(format!(
                "{}: {} conservative-form flags for {} components",
                info.name,
                info.conservative.len(),
                info.num_comp
            )));
        }
        if info.diffusion == Some(DiffusionKind::Tensor) && info.num_comp != 3 {
            return Err(Error::config(format!("{}: the tensor operator needs 3 components", info.name)));
        }
        let name = &info.name;
        let n = info.num_comp;

        let mut spec = FieldSpec::cell(name, n).ghost(Self::NUM_GHOST);
        if info.momentum {
            spec = spec.vector();
        }
        let fields = Self {
            density: repo.declare_field(FieldSpec::cell(Self::DENSITY, 1).ghost(Self::NUM_GHOST))?,
            field: repo.declare_field(spec)?,
            src_term: repo.declare_field(FieldSpec::cell(&format!("{}_src_term", name), n).ghost(1).states(1))?,
            diff_term: repo.declare_field(FieldSpec::cell(&format!("{}_diff_term", name), n))?,
            conv_term: repo.declare_field(FieldSpec::cell(&format!("{}_conv_term", name), n))?,
            mueff: repo.declare_field(FieldSpec::cell(&format!("{}_mueff", name), 1).ghost(1).states(1))?,
        };
        fields.check(repo, info)?;
        Ok(fields)
    }

    fn check(&self, repo: &FieldRepo, info: &PdeInfo) -> Result<()> {
        for id in [self.field, self.src_term, self.diff_term, self.conv_term] {
            let f = repo.field(id);

            if f.num_comp() != info.num_comp {
                return Err(Error::config(format!(
                    "{}: operand {} has {} components, expected {}",
                    info.name,
                    f.name(),
                    f.num_comp(),
                    info.num_comp
                )));
            }
        }
        for id in [self.mueff, self.density] {
            if repo.field(id).num_comp() != 1 {
                return Err(Error::config(format!("{}: {} must be a scalar", info.name, repo.field(id).name())));
            }
        }
        Ok(())
    }
}

/// One transport equation bound to its advection strategy, diffusion
/// operator and right-hand-side assembly, all selected once from the
/// configuration. A time step calls, in order, `compute_advection_term`,
/// `compute_diffusion_term`, `compute_predictor_rhs` (or
/// `compute_corrector_rhs`) and `solve`.
///
pub struct PdeSystem {
    info: PdeInfo,
    fields: PdeFields,
    diffusion_type: DiffusionType,
    scheme: Scheme,
    mesh_mapping: bool,
    advection: Box<dyn AdvectionOp>,
    diffusion: Option<Box<dyn DiffusionOp>>,
    rhs: ComputeRhs,
}

impl PdeSystem {
    pub fn new(repo: &mut FieldRepo, info: PdeInfo, config: &Config, solver: Arc<dyn LinearSolver>) -> Result<Self> {
        config.validate()?;
        let fields = PdeFields::declare(repo, &info)?;
        let advection = make_advection_op(repo, &info, fields, config, solver.clone())?;
        let diffusion = make_diffusion_op(&info, fields, config, solver)?;
        let rhs = ComputeRhs::new(fields, &info, config.scheme);

        info!(
            "{}: {:?} advection, {:?} diffusion ({:?})",
            info.name, config.scheme, info.diffusion, config.diffusion_type
        );
        Ok(Self {
            info,
            fields,
            diffusion_type: config.diffusion_type,
            scheme: config.scheme,
            mesh_mapping: config.mesh_mapping,
            advection,
            diffusion,
            rhs,
        })
    }

    pub fn info(&self) -> &PdeInfo {
        &self.info
    }

    pub fn fields(&self) -> &PdeFields {
        &self.fields
    }

    /// Predict and project the face velocities (momentum only), then compute
    /// the convective term from the `fstate` state of the field.
    pub fn compute_advection_term(&mut self, repo: &mut FieldRepo, fstate: FieldState, dt: f64) -> Result<()> {
        self.advection.preadvect(repo, fstate, dt)?;
        self.advection.advect(repo, fstate, dt)
    }

    /// Apply the diffusion operator explicitly to the `fstate` state. An
    /// equation without diffusion gets a zero diffusion term.
    pub fn compute_diffusion_term(&mut self, repo: &mut FieldRepo, fstate: FieldState) -> Result<()> {
        match self.diffusion.as_mut() {
            Some(op) => op.compute_diff_term(repo, fstate),
            None => {
                let target = match self.scheme {
                    Scheme::Godunov => FieldState::New,
                    Scheme::Mol => fstate,
                };
                repo.field_mut(self.fields.diff_term).state_mut(target).set_val(0.0);
                Ok(())
            }
        }
    }

    pub fn compute_predictor_rhs(&self, repo: &mut FieldRepo, dt: f64) -> Result<()> {
        self.rhs.predictor_rhs(repo, self.diffusion_type, dt, self.mesh_mapping)
    }

    pub fn compute_corrector_rhs(&self, repo: &mut FieldRepo, dt: f64) -> Result<()> {
        self.rhs.corrector_rhs(repo, self.diffusion_type, dt, self.mesh_mapping)
    }

    /// The implicit diffusion solve, over the implicit fraction of the step
    /// (half of it for Crank-Nicolson). Nothing to do for explicit diffusion
    /// or an equation without diffusion.
    pub fn solve(&mut self, repo: &mut FieldRepo, dt: f64) -> Result<Vec<SolveStats>> {
        match (self.diffusion.as_mut(), self.diffusion_type.implicit_factor()) {
            (Some(op), Some(factor)) => op.linsys_solve(repo, factor * dt),
            _ => Ok(Vec::new()),
        }
    }

    /// Invalidate every cached operator after the mesh changed.
    pub fn on_regrid(&mut self) {
        self.advection.on_regrid();

        if let Some(op) = self.diffusion.as_mut() {
            op.on_regrid()
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use super::{PdeInfo, PdeSystem};
    use crate::config::{Config, DiffusionType, Scheme};
    use crate::field::{FieldRepo, FieldState};
    use crate::linear_solver::ConjugateGradient;
    use crate::mesh::{LevelGeometry, Mesh};

    fn repo() -> FieldRepo {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        FieldRepo::new(Mesh::single_level(geom, 4).unwrap())
    }

    #[test]
    fn bundle_shape_mismatch_is_a_configuration_error() {
        let mut repo = repo();
        let info = PdeInfo {
            conservative: vec![true, false],
            ..PdeInfo::scalar("tracer", false)
        };
        assert!(PdeSystem::new(&mut repo, info, &Config::default(), Arc::new(ConjugateGradient)).is_err());

        let info = PdeInfo {
            num_comp: 2,
            conservative: vec![true; 2],
            ..PdeInfo::icns()
        };
        assert!(PdeSystem::new(&mut repo, info, &Config::default(), Arc::new(ConjugateGradient)).is_err());
    }

    #[test]
    fn quiescent_scalar_stays_put_through_a_step() {
        for scheme in [Scheme::Godunov, Scheme::Mol] {
            for diffusion_type in [DiffusionType::Explicit, DiffusionType::CrankNicolson, DiffusionType::Implicit] {
                let mut repo = repo();
                let config = Config {
                    scheme,
                    diffusion_type,
                    ..Config::default()
                };
                let mut pde = PdeSystem::new(&mut repo, PdeInfo::scalar("tracer", false), &config, Arc::new(ConjugateGradient)).unwrap();
                let fields = *pde.fields();

                repo.field_mut(fields.field).state_mut(FieldState::New).set_val(0.25);
                repo.field_mut(fields.mueff).state_mut(FieldState::New).set_val(0.1);
                repo.advance_states();

                pde.compute_advection_term(&mut repo, FieldState::Old, 0.1).unwrap();
                pde.compute_diffusion_term(&mut repo, FieldState::Old).unwrap();
                pde.compute_predictor_rhs(&mut repo, 0.1).unwrap();
                pde.solve(&mut repo, 0.1).unwrap();

                assert!((repo.volume_integral(fields.field, FieldState::New, 0) - 0.25).abs() < 1e-12);
            }
        }
    }
}
