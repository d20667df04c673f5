use serde::{Deserialize, Serialize};
use crate::index_space::{Index, IndexSpace};




/**
 * A patch is a mapping from a rectangular subset of a level's index space to
 * associated field values. Each index holds `num_fields` contiguous values,
 * and the values are stored in row-major order. A patch usually covers a
 * block of the level together with a layer of guard (ghost) zones around it.
 *
 * The element type defaults to `f64`; integer patches (`Patch<i32>`) are used
 * for validity masks.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patch<T = f64> {
    level: u32,
    space: IndexSpace,
    num_fields: usize,
    data: Vec<T>,
}




// ============================================================================
impl<T: Copy + Default> Patch<T> {


    /**
     * Generate a patch of default values (zeros) at a given level, covering
     * the given index space.
     */
    pub fn zeros(level: u32, num_fields: usize, space: IndexSpace) -> Self {
        Self::filled(level, num_fields, space, T::default())
    }


    pub fn filled(level: u32, num_fields: usize, space: IndexSpace, value: T) -> Self {
        Self {
            level,
            data: vec![value; space.len() * num_fields],
            space,
            num_fields,
        }
    }


    /**
     * Generate a patch at a given level, covering the given space, with values
     * defined from a closure which writes the `num_fields` values at an index.
     */
    pub fn from_slice_function<F>(level: u32, space: IndexSpace, num_fields: usize, f: F) -> Self
    where
        F: Fn(Index, &mut [T])
    {
        let mut data = vec![T::default(); space.len() * num_fields];

        for (index, slot) in space.iter().zip(data.chunks_exact_mut(num_fields)) {
            f(index, slot)
        }
        Self { level, space, num_fields, data }
    }


    pub fn level(&self) -> u32 {
        self.level
    }


    pub fn index_space(&self) -> &IndexSpace {
        &self.space
    }


    pub fn num_fields(&self) -> usize {
        self.num_fields
    }


    pub fn data(&self) -> &[T] {
        &self.data
    }


    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }


    /**
     * Return the values at the given index. Panics if the index is out of
     * range.
     */
    pub fn get_slice(&self, index: Index) -> &[T] {
        let s = self.offset(index);
        &self.data[s .. s + self.num_fields]
    }


    pub fn get_slice_mut(&mut self, index: Index) -> &mut [T] {
        let s = self.offset(index);
        &mut self.data[s .. s + self.num_fields]
    }


    /**
     * Return one field value at the given index.
     */
    pub fn get(&self, index: Index, field: usize) -> T {
        self.data[self.offset(index) + field]
    }


    pub fn set(&mut self, index: Index, field: usize, value: T) {
        let s = self.offset(index);
        self.data[s + field] = value
    }


    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value)
    }


    /**
     * Return an iterator over the value slices at every index of a subset of
     * this patch, in row-major order.
     */
    pub fn select<'a>(&'a self, subset: &'a IndexSpace) -> impl Iterator<Item = &'a [T]> + 'a {
        subset.iter().map(move |index| self.get_slice(index))
    }


    /**
     * Overwrite the values in `region` with those of another patch. The region
     * must lie inside both patches.
     */
    pub fn copy_from(&mut self, other: &Self, region: &IndexSpace) {
        for index in region.iter() {
            let s = other.get_slice(index);
            self.get_slice_mut(index).copy_from_slice(s)
        }
    }


    fn offset(&self, index: Index) -> usize {
        self.validate_index(index);
        self.space.row_major_offset(index) * self.num_fields
    }


    fn validate_index(&self, index: Index) {
        if !self.space.contains(index) {
            panic!("index {:?} out of range on patch {:?}", index, self.space);
        }
    }
}




// ============================================================================
impl Patch<f64> {


    /**
     * Sample the patch at an index of a finer level, `ratio` times finer than
     * this patch, by piecewise constant injection.
     */
    pub fn sample_refined(&self, fine_index: Index, ratio: i64) -> &[f64] {
        let (i, j, k) = fine_index;
        self.get_slice((i.div_euclid(ratio), j.div_euclid(ratio), k.div_euclid(ratio)))
    }


    /**
     * Return the sum of one field over a subset of the patch.
     */
    pub fn sum(&self, subset: &IndexSpace, field: usize) -> f64 {
        self.select(subset).map(|s| s[field]).sum()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Patch;
    use crate::index_space::range3d;

    #[test]
    fn patch_slice_access_works() {
        let patch = Patch::from_slice_function(1, range3d(4..10, 4..10, 0..2), 2, |(i, j, k), s| {
            s[0] = (i + j) as f64;
            s[1] = k as f64;
        });
        assert_eq!(patch.get((5, 5, 0), 0), 10.0);
        assert_eq!(patch.get_slice((6, 8, 1)), &[14.0, 1.0]);
    }

    #[test]
    fn piecewise_constant_sampling_works() {
        let patch = Patch::from_slice_function(0, range3d(0..4, 0..4, 0..4), 1, |(i, j, k), s| {
            s[0] = (i * 100 + j * 10 + k) as f64
        });
        assert_eq!(patch.sample_refined((3, 5, 7), 2), &[123.0]);
        assert_eq!(patch.sample_refined((2, 4, 6), 2), &[123.0]);
    }

    #[test]
    fn copy_from_overwrites_only_the_region() {
        let src = Patch::filled(0, 1, range3d(0..4, 0..4, 0..1), 2.0);
        let mut dst = Patch::<f64>::zeros(0, 1, range3d(2..6, 0..4, 0..1));
        dst.copy_from(&src, &range3d(2..4, 0..4, 0..1));
        assert_eq!(dst.sum(dst.index_space(), 0), 16.0);
    }

    #[test]
    #[should_panic]
    fn out_of_range_access_panics() {
        let patch = Patch::<i32>::zeros(0, 1, range3d(0..2, 0..2, 0..2));
        patch.get((2, 0, 0), 0);
    }
}
