use rayon::prelude::*;
use crate::field::{Location, MeshSpace, StateData};
use crate::index_space::{Axis, Index};

/// The mesh-mapping collaborator: stretching factors of a curvilinear map
/// from a uniform computational mesh to the physical mesh. Factors are
/// requested per level, per location (cell center or face), per index.
///
pub trait MeshMapping: Send + Sync {
    /// Stretching factor of each coordinate direction.
    fn scale_factors(&self, lev: usize, location: Location, index: Index) -> [f64; 3];

    /// Jacobian determinant of the map.
    fn detj(&self, lev: usize, location: Location, index: Index) -> f64 {
        let f = self.scale_factors(lev, location, index);
        f[0] * f[1] * f[2]
    }

    /// Face coefficient scaling `detJ_f / fac_d^2` for a face normal to
    /// `axis`.
    fn face_coefficient_scale(&self, lev: usize, axis: Axis, index: Index) -> f64 {
        let f = self.scale_factors(lev, Location::Face(axis), index);
        let detj = f[0] * f[1] * f[2];
        detj / (f[axis.index()] * f[axis.index()])
    }

    /// Face area factor `detJ_f / fac_d` mapping a physical normal velocity
    /// to its uniform-space counterpart.
    fn face_area_scale(&self, lev: usize, axis: Axis, index: Index) -> f64 {
        let f = self.scale_factors(lev, Location::Face(axis), index);
        f[0] * f[1] * f[2] / f[axis.index()]
    }
}

/// A mapping with the same stretching everywhere.
///
#[derive(Clone, Debug)]
pub struct ConstantMapping {
    pub factors: [f64; 3],
}

impl MeshMapping for ConstantMapping {
    fn scale_factors(&self, _: usize, _: Location, _: Index) -> [f64; 3] {
        self.factors
    }
}

/// A mapping defined by a closure.
///
pub struct MappingFn<F>(pub F);

impl<F> MeshMapping for MappingFn<F>
where
    F: Fn(usize, Location, Index) -> [f64; 3] + Send + Sync,
{
    fn scale_factors(&self, lev: usize, location: Location, index: Index) -> [f64; 3] {
        (self.0)(lev, location, index)
    }
}

/// Bring one state to the requested mesh space. A state already tagged with
/// the target space is left alone. Cell-centered vector fields are weighted
/// component-wise by `detJ / fac_d` on the way to stretched space and by the
/// inverse on the way back; other fields only change their tag.
///
pub(crate) fn transform_state(
    state: &mut StateData,
    location: Location,
    vector: bool,
    mapping: &dyn MeshMapping,
    target: MeshSpace,
) {
    if state.space() == target {
        return;
    }
    if vector && location == Location::Cell {
        for (lev, patches) in state.levels_mut().iter_mut().enumerate() {
            patches.par_iter_mut().for_each(|patch| {
                let space = patch.index_space().clone();

                for index in space.iter() {
                    let f = mapping.scale_factors(lev, location, index);
                    let detj = f[0] * f[1] * f[2];
                    let u = patch.get_slice_mut(index);

                    for (d, u) in u.iter_mut().enumerate().take(3) {
                        match target {
                            MeshSpace::Stretched => *u *= detj / f[d],
                            MeshSpace::Uniform => *u *= f[d] / detj,
                        }
                    }
                }
            });
        }
    }
    state.set_space(target);
}

#[cfg(test)]
mod test {
    use super::{ConstantMapping, MeshMapping};
    use crate::field::Location;
    use crate::index_space::Axis;

    #[test]
    fn face_scalings_follow_the_factors() {
        let m = ConstantMapping {
            factors: [2.0, 1.0, 0.5],
        };
        assert_eq!(m.detj(0, Location::Cell, (0, 0, 0)), 1.0);
        assert_eq!(m.face_area_scale(0, Axis::I, (0, 0, 0)), 0.5);
        assert_eq!(m.face_coefficient_scale(0, Axis::K, (0, 0, 0)), 4.0);
    }
}
