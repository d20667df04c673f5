use std::sync::Arc;
use log::debug;
use rayon::prelude::*;
use crate::config::{DiffusionType, Scheme};
use crate::error::Result;
use crate::field::{FieldRepo, FieldState, Location, StateData};
use crate::index_space::Index;
use crate::mesh_mapping::MeshMapping;
use crate::pde::{PdeFields, PdeInfo};

/// The convective, diffusive and source terms read by one assembly pass.
/// Slot 0 of `conv` and `diff` is the first requested state, slot 1 the
/// second.
struct Terms<'a> {
    conv: [&'a StateData; 2],
    diff: [&'a StateData; 2],
    src: &'a StateData,
}

impl<'a> Terms<'a> {
    fn conv(&self, slot: usize, lev: usize, b: usize, index: Index, n: usize) -> f64 {
        self.conv[slot].patch(lev, b).get(index, n)
    }

    fn diff(&self, slot: usize, lev: usize, b: usize, index: Index, n: usize) -> f64 {
        self.diff[slot].patch(lev, b).get(index, n)
    }

    fn src(&self, lev: usize, b: usize, index: Index, n: usize) -> f64 {
        self.src.patch(lev, b).get(index, n)
    }
}

/// Assembly of the new state of a transported field from its old state and
/// its source, diffusion and convective terms.
pub struct ComputeRhs {
    fields: PdeFields,
    multiply_rho: bool,
    scheme: Scheme,
}

impl ComputeRhs {
    pub fn new(fields: PdeFields, info: &PdeInfo, scheme: Scheme) -> Self {
        Self {
            fields,
            multiply_rho: info.multiply_rho,
            scheme,
        }
    }

    /// Predictor:
    /// `fld_new = detJ fld_old + mask dt (conv + detJ src + factor diff)`.
    ///
    /// The Godunov scheme keeps a single (New) state of the convective and
    /// diffusive terms; the method of lines reads their Old state.
    pub fn predictor_rhs(&self, repo: &mut FieldRepo, difftype: DiffusionType, dt: f64, mesh_mapping: bool) -> Result<()> {
        let factor = difftype.predictor_factor();
        let fstate = match self.scheme {
            Scheme::Godunov => FieldState::New,
            Scheme::Mol => FieldState::Old,
        };
        self.assemble(repo, difftype, dt, mesh_mapping, [fstate, fstate], |t, lev, b, index, n, detj| {
            t.conv(0, lev, b, index, n) + detj * t.src(lev, b, index, n) + factor * t.diff(0, lev, b, index, n)
        })
    }

    /// Corrector:
    /// `fld_new = detJ fld_old + mask dt (0.5 (conv_old + conv_new)
    ///     + ofac diff_old + nfac diff_new + detJ src)`.
    pub fn corrector_rhs(&self, repo: &mut FieldRepo, difftype: DiffusionType, dt: f64, mesh_mapping: bool) -> Result<()> {
        let (ofac, nfac) = difftype.corrector_factors();

        self.assemble(repo, difftype, dt, mesh_mapping, [FieldState::Old, FieldState::New], |t, lev, b, index, n, detj| {
            let conv = 0.5 * (t.conv(0, lev, b, index, n) + t.conv(1, lev, b, index, n));
            let diff = ofac * t.diff(0, lev, b, index, n) + nfac * t.diff(1, lev, b, index, n);
            conv + diff + detj * t.src(lev, b, index, n)
        })
    }

    fn assemble<F>(
        &self,
        repo: &mut FieldRepo,
        difftype: DiffusionType,
        dt: f64,
        mesh_mapping: bool,
        states: [FieldState; 2],
        increment: F,
    ) -> Result<()>
    where
        F: Fn(&Terms, usize, usize, Index, usize, f64) -> f64 + Sync,
    {
        let mapping: Option<Arc<dyn MeshMapping>> = if mesh_mapping {
            Some(repo.require_mesh_mapping()?)
        } else {
            None
        };
        let fields = self.fields;
        let multiply_rho = self.multiply_rho;
        let explicit = difftype == DiffusionType::Explicit;

        repo.with_field_mut(fields.field, |field, repo| {
            if let Some(m) = &mapping {
                field.to_stretched_space(FieldState::New, m.as_ref());
                field.to_stretched_space(FieldState::Old, m.as_ref());
            }
            let ncomp = field.num_comp();
            let (new, old) = field.state_pair_mut(FieldState::New, FieldState::Old);
            let conv = repo.field(fields.conv_term);
            let diff = repo.field(fields.diff_term);
            let terms = Terms {
                conv: [conv.state(states[0]), conv.state(states[1])],
                diff: [diff.state(states[0]), diff.state(states[1])],
                src: repo.field(fields.src_term).state(FieldState::New),
            };
            let density = repo.field(fields.density);
            let (rho_old, rho_new) = (density.state(FieldState::Old), density.state(FieldState::New));
            let mask = repo.mask_cell();

            for lev in 0..repo.num_active_levels() {
                let blocks = &repo.mesh().level(lev).blocks;
                let mask = mask.level(lev);
                let mapping = mapping.as_deref();
                let terms = &terms;
                let increment = &increment;

                new.level_mut(lev).par_iter_mut().enumerate().for_each(|(b, fld)| {
                    let q_old = old.patch(lev, b);

                    for index in blocks[b].iter() {
                        let detj = mapping.map_or(1.0, |m| m.detj(lev, Location::Cell, index));
                        let m = mask[b].get(index, 0) as f64;

                        for n in 0..ncomp {
                            let mut q = detj * q_old.get(index, n);

                            if multiply_rho {
                                q *= rho_old.patch(lev, b).get(index, 0);
                            }
                            q += m * dt * increment(terms, lev, b, index, n, detj);

                            if multiply_rho {
                                q /= rho_new.patch(lev, b).get(index, 0);
                            }
                            if explicit {
                                q /= detj;
                            }
                            fld.set(index, n, q)
                        }
                    }
                });
            }
            debug!("assembled {} ({:?}, dt = {:.4e})", field.name(), difftype, dt);
        });
        Ok(())
    }
}
