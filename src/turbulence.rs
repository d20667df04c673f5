use log::info;
use rayon::prelude::*;
use crate::error::Result;
use crate::field::{FieldId, FieldRepo, FieldState};

/// The turbulence-closure collaborator: fills the effective viscosity read by
/// the diffusion operators.
///
pub trait TurbulenceModel: Send {
    fn name(&self) -> &str;

    /// Update the effective viscosity from the current flow state.
    fn update_mueff(&mut self, repo: &mut FieldRepo) -> Result<()>;
}

/// No turbulence model: the effective viscosity is the molecular viscosity,
/// optionally weighted by the density (a dynamic viscosity from a kinematic
/// one).
///
pub struct Laminar {
    viscosity: f64,
    mueff: FieldId,
    density: Option<FieldId>,
}

impl Laminar {
    pub fn new(viscosity: f64, mueff: FieldId) -> Self {
        Self {
            viscosity,
            mueff,
            density: None,
        }
    }

    /// Multiply the viscosity by the New density.
    pub fn density_weighted(mut self, density: FieldId) -> Self {
        self.density = Some(density);
        self
    }
}

impl TurbulenceModel for Laminar {
    fn name(&self) -> &str {
        "laminar"
    }

    fn update_mueff(&mut self, repo: &mut FieldRepo) -> Result<()> {
        let nu = self.viscosity;

        match self.density {
            None => repo.field_mut(self.mueff).state_mut(FieldState::New).set_val(nu),
            Some(density) => {
                repo.fill_ghosts(density, FieldState::New);
                repo.with_field_mut(self.mueff, |mueff, repo| {
                    let rho = repo.field(density).state(FieldState::New);

                    for lev in 0..rho.num_levels() {
                        let rho = rho.level(lev);

                        mueff.state_mut(FieldState::New)
                            .level_mut(lev)
                            .par_iter_mut()
                            .zip(rho)
                            .for_each(|(mu, rho)| {
                                let space = mu.index_space().clone();
                                for index in space.iter() {
                                    mu.set(index, 0, nu * rho.get(rho.index_space().clamp(index), 0))
                                }
                            });
                    }
                });
            }
        }
        info!("{}: effective viscosity set from nu = {:e}", self.name(), nu);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Laminar, TurbulenceModel};
    use crate::field::{FieldRepo, FieldState};
    use crate::mesh::{LevelGeometry, Mesh};
    use crate::pde::{PdeFields, PdeInfo};

    #[test]
    fn laminar_viscosity_is_weighted_by_density() {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        let mut repo = FieldRepo::new(Mesh::single_level(geom, 4).unwrap());
        let fields = PdeFields::declare(&mut repo, &PdeInfo::icns()).unwrap();
        repo.set_from_function(fields.density, FieldState::New, |_, x, s| s[0] = 1.0 + x[2]);

        let mut model = Laminar::new(1e-3, fields.mueff).density_weighted(fields.density);
        model.update_mueff(&mut repo).unwrap();

        let mu = repo.field(fields.mueff).state(FieldState::New);
        let rho = repo.field(fields.density).state(FieldState::New);
        for (b, block) in repo.mesh().level(0).blocks.iter().enumerate() {
            for index in block.iter() {
                let expected = 1e-3 * rho.patch(0, b).get(index, 0);
                assert!((mu.patch(0, b).get(index, 0) - expected).abs() < 1e-15);
            }
        }
    }
}
