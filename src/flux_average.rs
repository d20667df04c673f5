use rayon::prelude::*;
use crate::index_space::{Axis, Index, IndexSpace};
use crate::meshing::{PatchQuery, ValidPatches};
use crate::patch::Patch;

/// Replace every coarse face value (normal to `axis`) whose `ratio^2`
/// coincident fine faces all lie in the valid region of some fine patch by
/// the mean of those fine values. On a uniform level the faces have equal
/// area, so this is the area-weighted average.
///
/// Returns the number of coarse faces replaced.
///
pub fn average_down_faces(
    fine: &[Patch],
    fine_valid: &[IndexSpace],
    coarse: &mut [Patch],
    coarse_valid: &[IndexSpace],
    ratio: i64,
    axis: Axis,
) -> usize {
    let query = ValidPatches {
        patches: fine,
        valid: fine_valid,
    };
    let [t1, t2] = axis.transverse();
    let weight = 1.0 / (ratio * ratio) as f64;

    coarse
        .par_iter_mut()
        .zip(coarse_valid)
        .map(|(patch, valid)| {
            let ncomp = patch.num_fields();
            let mut replaced = 0;

            for face in valid.iter() {
                let base: Index = (face.0 * ratio, face.1 * ratio, face.2 * ratio);
                let mut sum = vec![0.0; ncomp];
                let mut complete = true;

                'fine: for a in 0..ratio {
                    for b in 0..ratio {
                        let f = t2.shift(t1.shift(base, a), b);

                        match query.patch_containing_point(f) {
                            Some(p) => {
                                for (s, v) in sum.iter_mut().zip(p.get_slice(f)) {
                                    *s += v
                                }
                            }
                            None => {
                                complete = false;
                                break 'fine;
                            }
                        }
                    }
                }
                if complete {
                    for (n, s) in sum.into_iter().enumerate() {
                        patch.set(face, n, s * weight)
                    }
                    replaced += 1;
                }
            }
            replaced
        })
        .sum()
}

#[cfg(test)]
mod test {
    use super::average_down_faces;
    use crate::index_space::{range3d, Axis};
    use crate::patch::Patch;

    fn check_ratio(ratio: i64) {
        let fine_cells = range3d(4 * ratio..8 * ratio, 0..4 * ratio, 0..4 * ratio);
        let fine_valid = vec![fine_cells.surrounding_faces(Axis::J)];
        let fine = vec![Patch::from_slice_function(1, fine_valid[0].clone(), 2, |(i, j, k), s| {
            s[0] = (i + 7 * j + 3 * k) as f64;
            s[1] = 1.0;
        })];
        let coarse_valid = vec![range3d(0..8, 0..4, 0..4).surrounding_faces(Axis::J)];
        let mut coarse = vec![Patch::filled(0, 2, coarse_valid[0].clone(), -1.0)];

        let replaced = average_down_faces(&fine, &fine_valid, &mut coarse, &coarse_valid, ratio, Axis::J);
        assert_eq!(replaced, 4 * 5 * 4);

        for face in coarse_valid[0].iter() {
            let value = coarse[0].get(face, 0);

            if (4..8).contains(&face.0) {
                let mut sum = 0.0;
                for a in 0..ratio {
                    for b in 0..ratio {
                        sum += (face.0 * ratio + a + 7 * face.1 * ratio + 3 * (face.2 * ratio + b)) as f64;
                    }
                }
                assert!((value * (ratio * ratio) as f64 - sum).abs() < 1e-9);
                assert_eq!(coarse[0].get(face, 1), 1.0);
            } else {
                assert_eq!(value, -1.0);
            }
        }
    }

    #[test]
    fn coarse_faces_take_the_mean_of_four_fine_faces() {
        check_ratio(2)
    }

    #[test]
    fn coarse_faces_take_the_mean_of_sixteen_fine_faces() {
        check_ratio(4)
    }
}
