use log::debug;
use rayon::prelude::*;
use crate::config::{Config, DiffusionType};
use crate::error::Result;
use crate::field::{FieldRepo, FieldState, Location};
use crate::index_space::Axis;
use crate::pde::PdeFields;

/// The inverse time scales limiting the step of the momentum advance:
/// convective `C = max |u_d| / dx_d`, diffusive
/// `V = 2 max(mu / rho) sum_d 1 / dx_d^2` and forcing
/// `F = max sum_d |f_d| / dx_d`.
///
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CflNumbers {
    pub convective: f64,
    pub diffusive: f64,
    pub forcing: f64,
}

impl CflNumbers {
    /// `0.5 ((C + V) + sqrt((C + V)^2 + 4 F))`: the inverse of the step at
    /// unit CFL number.
    pub fn unit_time(&self) -> f64 {
        let cv = self.convective + self.diffusive;
        0.5 * (cv + (cv * cv + 4.0 * self.forcing).sqrt())
    }

    /// The step for a target CFL number, capped at `max_dt` (which is also
    /// the step for a flow at rest).
    pub fn dt(&self, cfl: f64, max_dt: f64) -> f64 {
        let unit = self.unit_time();

        if unit > f64::EPSILON {
            (cfl / unit).min(max_dt)
        } else {
            max_dt
        }
    }
}

/// Evaluate the CFL numbers of the New state of a momentum equation over the
/// valid cells of every level. The diffusive limit enters only for explicit
/// diffusion; the forcing limit only when `use_force_cfl` is set. Under mesh
/// mapping the cell sizes are stretched by the cell scale factors.
pub fn estimate_dt(repo: &FieldRepo, fields: &PdeFields, config: &Config, use_force_cfl: bool) -> Result<CflNumbers> {
    let mapping = if config.mesh_mapping {
        Some(repo.require_mesh_mapping()?)
    } else {
        None
    };
    let explicit = config.diffusion_type == DiffusionType::Explicit;
    let velocity = repo.field(fields.field).state(FieldState::New);
    let force = repo.field(fields.src_term).state(FieldState::New);
    let mu = repo.field(fields.mueff).state(FieldState::New);
    let rho = repo.field(fields.density).state(FieldState::New);

    let max = |a: CflNumbers, b: CflNumbers| CflNumbers {
        convective: a.convective.max(b.convective),
        diffusive: a.diffusive.max(b.diffusive),
        forcing: a.forcing.max(b.forcing),
    };

    let numbers = (0..repo.num_active_levels())
        .map(|lev| {
            let level = repo.mesh().level(lev);
            let geom = &level.geometry;
            let mapping = mapping.as_deref();

            level
                .blocks
                .par_iter()
                .enumerate()
                .map(|(b, block)| {
                    let (u, f) = (velocity.patch(lev, b), force.patch(lev, b));
                    let (m, r) = (mu.patch(lev, b), rho.patch(lev, b));

                    block
                        .iter()
                        .map(|index| {
                            let fac = mapping.map_or([1.0; 3], |m| m.scale_factors(lev, Location::Cell, index));
                            let dxinv = Axis::ALL.map(|a| 1.0 / (geom.cell_spacing(a) * fac[a.index()]));
                            let mut cfl = CflNumbers::default();

                            for a in Axis::ALL {
                                let d = a.index();
                                cfl.convective = cfl.convective.max(u.get(index, d).abs() * dxinv[d]);

                                if use_force_cfl {
                                    cfl.forcing += f.get(index, d).abs() * dxinv[d];
                                }
                            }
                            if explicit {
                                let dxinv2: f64 = dxinv.iter().map(|x| x * x).sum();
                                cfl.diffusive = 2.0 * m.get(index, 0) / r.get(index, 0) * dxinv2;
                            }
                            cfl
                        })
                        .fold(CflNumbers::default(), max)
                })
                .reduce(CflNumbers::default, max)
        })
        .fold(CflNumbers::default(), max);

    debug!(
        "cfl: convective {:.4e}, diffusive {:.4e}, forcing {:.4e}",
        numbers.convective, numbers.diffusive, numbers.forcing
    );
    Ok(numbers)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use super::{estimate_dt, CflNumbers};
    use crate::config::{Config, DiffusionType};
    use crate::field::{FieldRepo, FieldState};
    use crate::mesh::{LevelGeometry, Mesh};
    use crate::mesh_mapping::ConstantMapping;
    use crate::pde::{PdeFields, PdeInfo};

    fn setup() -> (FieldRepo, PdeFields) {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        let mut repo = FieldRepo::new(Mesh::single_level(geom, 4).unwrap());
        let fields = PdeFields::declare(&mut repo, &PdeInfo::icns()).unwrap();
        repo.set_from_function(fields.field, FieldState::New, |_, x, s| {
            s[0] = 2.0 * x[0];
            s[1] = -0.5;
            s[2] = 0.0;
        });
        repo.field_mut(fields.density).state_mut(FieldState::New).set_val(2.0);
        repo.field_mut(fields.mueff).state_mut(FieldState::New).set_val(0.01);
        (repo, fields)
    }

    #[test]
    fn convective_limit_uses_the_fastest_cell() {
        let (repo, fields) = setup();
        let cfl = estimate_dt(&repo, &fields, &Config::default(), false).unwrap();
        assert!((cfl.convective - 2.0 * 0.9375 * 8.0).abs() < 1e-12);
        assert_eq!(cfl.diffusive, 0.0);
        assert!((cfl.dt(0.5, 1.0) - 0.5 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn explicit_diffusion_and_forcing_tighten_the_step() {
        let (mut repo, fields) = setup();
        repo.field_mut(fields.src_term).state_mut(FieldState::New).set_val(1.0);
        let config = Config {
            diffusion_type: DiffusionType::Explicit,
            ..Config::default()
        };
        let cfl = estimate_dt(&repo, &fields, &config, true).unwrap();
        assert!((cfl.diffusive - 2.0 * 0.005 * 192.0).abs() < 1e-12);
        assert!((cfl.forcing - 24.0).abs() < 1e-12);
        assert!(cfl.dt(0.5, 1.0) < CflNumbers { forcing: 0.0, ..cfl }.dt(0.5, 1.0));
    }

    #[test]
    fn stretched_cells_relax_the_step_and_rest_gives_the_cap() {
        let (mut repo, fields) = setup();
        repo.set_mesh_mapping(Arc::new(ConstantMapping { factors: [2.0, 1.0, 1.0] }));
        let config = Config {
            mesh_mapping: true,
            ..Config::default()
        };
        let cfl = estimate_dt(&repo, &fields, &config, false).unwrap();
        assert!((cfl.convective - 15.0 / 2.0).abs() < 1e-12);
        assert_eq!(CflNumbers::default().dt(0.5, 0.1), 0.1);
    }
}
