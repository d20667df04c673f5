use rayon::prelude::*;
use crate::boundary::{GhostFill, Orientation, Side};
use crate::index_space::{Axis, Index, IndexSpace};
use crate::patch::Patch;

/// A trait for a container that can respond to queries for a patch whose
/// valid region overlies a point.
///
pub trait PatchQuery {
    /// Return a patch containing the given point, if one exists.
    ///
    fn patch_containing_point(&self, point: Index) -> Option<&Patch>;
}

/// The patches of one level, paired with the valid region of each patch
/// (the block it belongs to, without guard zones).
///
pub struct ValidPatches<'a> {
    pub patches: &'a [Patch],
    pub valid: &'a [IndexSpace],
}

impl<'a> PatchQuery for ValidPatches<'a> {
    fn patch_containing_point(&self, point: Index) -> Option<&Patch> {
        self.valid
            .iter()
            .position(|v| v.contains(point))
            .map(|n| &self.patches[n])
    }
}

/// What a level's ghost fill needs to know about the level: the valid region
/// of each patch, the domain in the index space of the data (cells or faces),
/// periodicity with its period in cells, and the cell spacing.
///
pub struct LevelLayout<'a> {
    pub valid: &'a [IndexSpace],
    pub domain: IndexSpace,
    pub periodic: [bool; 3],
    pub period: [i64; 3],
    pub spacing: [f64; 3],
}

impl<'a> LevelLayout<'a> {
    /// Map an index on a periodic axis back into the domain.
    pub fn wrap(&self, index: Index) -> Index {
        let mut result = index;

        for axis in Axis::ALL {
            let n = axis.index();
            let x = axis.of(result);
            let lo = self.domain.lower(axis);

            if self.periodic[n] && !self.domain.range(axis).contains(&x) {
                result = axis.with(result, lo + (x - lo).rem_euclid(self.period[n]));
            }
        }
        result
    }
}

/// The next coarser level, used to fill guard zones at coarse-fine
/// boundaries by piecewise-constant injection.
///
pub struct CoarseLevel<'a> {
    pub patches: ValidPatches<'a>,
    pub ratio: i64,
}

/// Fill guard zone values of every patch on a level, corners included.
/// Indexes contained in the valid regions are not touched. A guard zone is
/// taken, in order of preference, from the same-level patch whose valid region
/// contains it (after periodic wrapping), from the coarser level, or, outside
/// the domain, from the boundary rule returned by `boundary` for that
/// orientation and component.
///
/// All values are gathered before any patch is written, so a patch never
/// reads guard zones written during the same fill.
///
pub fn fill_ghosts<G>(patches: &mut [Patch], layout: &LevelLayout, coarse: Option<&CoarseLevel>, boundary: G)
where
    G: Fn(Orientation, usize) -> GhostFill + Sync,
{
    let updates: Vec<Vec<(Index, Vec<f64>)>> = {
        let query = ValidPatches {
            patches,
            valid: layout.valid,
        };
        let filler = GhostFiller {
            query: &query,
            layout,
            coarse,
            boundary: &boundary,
        };
        (0..patches.len())
            .into_par_iter()
            .map(|n| filler.guard_values(n))
            .collect()
    };

    patches
        .par_iter_mut()
        .zip(updates)
        .for_each(|(patch, values)| {
            for (index, v) in values {
                patch.get_slice_mut(index).copy_from_slice(&v)
            }
        });
}

struct GhostFiller<'a, G> {
    query: &'a ValidPatches<'a>,
    layout: &'a LevelLayout<'a>,
    coarse: Option<&'a CoarseLevel<'a>>,
    boundary: &'a G,
}

impl<'a, G> GhostFiller<'a, G>
where
    G: Fn(Orientation, usize) -> GhostFill + Sync,
{
    fn guard_values(&self, n: usize) -> Vec<(Index, Vec<f64>)> {
        let patch = &self.query.patches[n];
        let valid = &self.layout.valid[n];

        patch
            .index_space()
            .iter()
            .filter(|index| !valid.contains(*index))
            .map(|index| (index, self.sample(n, index)))
            .collect()
    }

    fn sample(&self, n: usize, index: Index) -> Vec<f64> {
        let wrapped = self.layout.wrap(index);

        if self.layout.domain.contains(wrapped) {
            self.interior(n, wrapped)
        } else {
            self.physical_boundary(n, wrapped)
        }
    }

    fn interior(&self, n: usize, index: Index) -> Vec<f64> {
        if let Some(p) = self.query.patch_containing_point(index) {
            return p.get_slice(index).to_vec();
        }
        if let Some(coarse) = self.coarse {
            let ci = coarsen(index, coarse.ratio);

            if let Some(p) = coarse.patches.patch_containing_point(ci) {
                return p.get_slice(ci).to_vec();
            }
        }
        let own = &self.query.patches[n];
        own.get_slice(self.layout.valid[n].clamp(index)).to_vec()
    }

    fn physical_boundary(&self, n: usize, index: Index) -> Vec<f64> {
        let domain = &self.layout.domain;
        let inside = domain.clamp(index);
        let base = self.interior(n, inside);

        let axis = match Axis::ALL.into_iter().find(|a| a.of(index) != a.of(inside)) {
            Some(axis) => axis,
            None => return base,
        };
        let side = if axis.of(index) < domain.lower(axis) {
            Side::Low
        } else {
            Side::High
        };
        let ori = Orientation { axis, side };
        let distance = (axis.of(index) - axis.of(inside)) as f64 * self.layout.spacing[axis.index()];

        (0..base.len())
            .map(|comp| match (self.boundary)(ori, comp) {
                GhostFill::Dirichlet(v) => v,
                GhostFill::Extrapolate => base[comp],
                GhostFill::Gradient(g) => base[comp] + g * distance,
                GhostFill::ReflectOdd => {
                    let mirror = match side {
                        Side::Low => 2 * domain.lower(axis) - 1 - axis.of(index),
                        Side::High => 2 * domain.upper(axis) - 1 - axis.of(index),
                    };
                    let m = domain.clamp(axis.with(inside, mirror));
                    -self.interior(n, m)[comp]
                }
            })
            .collect()
    }
}

fn coarsen(index: Index, ratio: i64) -> Index {
    (index.0.div_euclid(ratio), index.1.div_euclid(ratio), index.2.div_euclid(ratio))
}

#[cfg(test)]
mod test {
    use super::{fill_ghosts, CoarseLevel, LevelLayout, ValidPatches};
    use crate::boundary::GhostFill;
    use crate::index_space::{range3d, IndexSpace};
    use crate::patch::Patch;

    fn patches(valid: &[IndexSpace], f: impl Fn((i64, i64, i64)) -> f64) -> Vec<Patch> {
        valid
            .iter()
            .map(|v| {
                let mut p = Patch::zeros(0, 1, v.extend_all(2));
                for index in v.iter() {
                    p.set(index, 0, f(index))
                }
                p
            })
            .collect()
    }

    #[test]
    fn periodic_neighbors_fill_guard_zones() {
        let valid = vec![range3d(0..4, 0..4, 0..4), range3d(4..8, 0..4, 0..4)];
        let mut data = patches(&valid, |(i, _, _)| i as f64);
        let layout = LevelLayout {
            valid: &valid,
            domain: range3d(0..8, 0..4, 0..4),
            periodic: [true, true, true],
            period: [8, 4, 4],
            spacing: [1.0; 3],
        };
        fill_ghosts(&mut data, &layout, None, |_, _| GhostFill::Extrapolate);

        assert_eq!(data[0].get((-1, 0, 0), 0), 7.0);
        assert_eq!(data[0].get((5, -2, 5), 0), 5.0);
        assert_eq!(data[1].get((8, 0, 0), 0), 0.0);
        assert_eq!(data[1].get((3, 1, 1), 0), 3.0);
    }

    #[test]
    fn boundary_rules_apply_outside_the_domain() {
        let valid = vec![range3d(0..4, 0..4, 0..4)];
        let mut data = patches(&valid, |(i, _, _)| 1.0 + i as f64);
        let layout = LevelLayout {
            valid: &valid,
            domain: range3d(0..4, 0..4, 0..4),
            periodic: [false, true, true],
            period: [4, 4, 4],
            spacing: [0.5; 3],
        };
        fill_ghosts(&mut data, &layout, None, |ori, _| match ori.side {
            crate::boundary::Side::Low => GhostFill::Dirichlet(-3.0),
            crate::boundary::Side::High => GhostFill::ReflectOdd,
        });

        assert_eq!(data[0].get((-1, 2, 2), 0), -3.0);
        assert_eq!(data[0].get((-2, -1, 5), 0), -3.0);
        assert_eq!(data[0].get((4, 0, 0), 0), -4.0);
        assert_eq!(data[0].get((5, 0, 0), 0), -3.0);
    }

    #[test]
    fn coarse_level_fills_coarse_fine_guard_zones() {
        let coarse_valid = vec![range3d(0..4, 0..4, 0..4)];
        let coarse = patches(&coarse_valid, |(i, j, k)| (i * 100 + j * 10 + k) as f64);
        let fine_valid = vec![range3d(2..6, 2..6, 2..6)];
        let mut fine = patches(&fine_valid, |_| 0.0);

        let layout = LevelLayout {
            valid: &fine_valid,
            domain: range3d(0..8, 0..8, 0..8),
            periodic: [false; 3],
            period: [8; 3],
            spacing: [1.0; 3],
        };
        let coarse_level = CoarseLevel {
            patches: ValidPatches {
                patches: &coarse,
                valid: &coarse_valid,
            },
            ratio: 2,
        };
        fill_ghosts(&mut fine, &layout, Some(&coarse_level), |_, _| GhostFill::Extrapolate);

        assert_eq!(fine[0].get((1, 2, 2), 0), 11.0);
        assert_eq!(fine[0].get((6, 7, 4), 0), 332.0);
    }
}
