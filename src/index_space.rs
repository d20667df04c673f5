use core::ops::Range;
use serde::{Deserialize, Serialize};




/**
 * A cell (or face) index in a 3D index space
 */
pub type Index = (i64, i64, i64);




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    I,
    J,
    K,
}




// ============================================================================
impl Axis {

    pub const ALL: [Axis; 3] = [Axis::I, Axis::J, Axis::K];


    /**
     * Return the position of this axis in a 3-tuple or array.
     */
    pub fn index(self) -> usize {
        match self {
            Axis::I => 0,
            Axis::J => 1,
            Axis::K => 2,
        }
    }


    /**
     * Return the two axes orthogonal to this one, in increasing order.
     */
    pub fn transverse(self) -> [Axis; 2] {
        match self {
            Axis::I => [Axis::J, Axis::K],
            Axis::J => [Axis::I, Axis::K],
            Axis::K => [Axis::I, Axis::J],
        }
    }


    /**
     * Return the index of the neighbor `delta` steps along this axis.
     */
    pub fn shift(self, index: Index, delta: i64) -> Index {
        match self {
            Axis::I => (index.0 + delta, index.1, index.2),
            Axis::J => (index.0, index.1 + delta, index.2),
            Axis::K => (index.0, index.1, index.2 + delta),
        }
    }


    /**
     * Return the component of the given index along this axis.
     */
    pub fn of(self, index: Index) -> i64 {
        match self {
            Axis::I => index.0,
            Axis::J => index.1,
            Axis::K => index.2,
        }
    }


    /**
     * Return a copy of the index with the component along this axis replaced.
     */
    pub fn with(self, index: Index, value: i64) -> Index {
        match self {
            Axis::I => (value, index.1, index.2),
            Axis::J => (index.0, value, index.2),
            Axis::K => (index.0, index.1, value),
        }
    }
}




/**
 * Represents a rectangular region in a discrete index space
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpace {
    di: Range<i64>,
    dj: Range<i64>,
    dk: Range<i64>,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit integer.
 */
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end && dk.start <= dk.end,
            "index space has negative volume");

        Self { di, dj, dk }
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> (usize, usize, usize) {
        ((self.di.end - self.di.start) as usize,
         (self.dj.end - self.dj.start) as usize,
         (self.dk.end - self.dk.start) as usize)
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        let (l, m, n) = self.dim();
        l * m * n
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> Index {
        (self.di.start, self.dj.start, self.dk.start)
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> Index {
        (self.di.end, self.dj.end, self.dk.end)
    }


    /**
     * Return the range of indexes covered on the given axis.
     */
    pub fn range(&self, axis: Axis) -> &Range<i64> {
        match axis {
            Axis::I => &self.di,
            Axis::J => &self.dj,
            Axis::K => &self.dk,
        }
    }


    pub fn lower(&self, axis: Axis) -> i64 {
        self.range(axis).start
    }


    pub fn upper(&self, axis: Axis) -> i64 {
        self.range(axis).end
    }


    /**
     * Return the number of indexes along the given axis.
     */
    pub fn count(&self, axis: Axis) -> i64 {
        self.upper(axis) - self.lower(axis)
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: Index) -> bool {
        self.di.contains(&index.0) && self.dj.contains(&index.1) && self.dk.contains(&index.2)
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.di.start >= self.di.start && other.di.end <= self.di.end &&
        other.dj.start >= self.dj.start && other.dj.end <= self.dj.end &&
        other.dk.start >= self.dk.start && other.dk.end <= self.dk.end
    }


    /**
     * Return the index in this space nearest to the given one.
     */
    pub fn clamp(&self, index: Index) -> Index {
        (index.0.clamp(self.di.start, self.di.end - 1),
         index.1.clamp(self.dj.start, self.dj.end - 1),
         index.2.clamp(self.dk.start, self.dk.end - 1))
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     */
    pub fn extend_all(&self, delta: i64) -> Self {
        Self::new(
            self.di.start - delta .. self.di.end + delta,
            self.dj.start - delta .. self.dj.end + delta,
            self.dk.start - delta .. self.dk.end + delta)
    }


    /**
     * Expand this index space on both sides of a single axis.
     */
    pub fn extend_axis(&self, delta: i64, axis: Axis) -> Self {
        self.map_axis(axis, |r| r.start - delta .. r.end + delta)
    }


    /**
     * Expand just the upper end of this index space on the given axis.
     */
    pub fn extend_upper(&self, delta: i64, axis: Axis) -> Self {
        self.map_axis(axis, |r| r.start .. r.end + delta)
    }


    /**
     * Trim this index space by the given number of elements on each axis.
     */
    pub fn trim_all(&self, delta: i64) -> Self {
        self.extend_all(-delta)
    }


    /**
     * Trim just the lower elements of this index space by a certain amount on
     * the given axis.
     */
    pub fn trim_lower(&self, delta: i64, axis: Axis) -> Self {
        self.map_axis(axis, |r| r.start + delta .. r.end)
    }


    /**
     * Shift this index space by `delta` along the given axis.
     */
    pub fn translate(&self, delta: i64, axis: Axis) -> Self {
        self.map_axis(axis, |r| r.start + delta .. r.end + delta)
    }


    /**
     * Return the space of faces normal to `axis` which bound the cells of
     * this space. It has one more element than this space on that axis.
     */
    pub fn surrounding_faces(&self, axis: Axis) -> Self {
        self.extend_upper(1, axis)
    }


    /**
     * Return the index space of the cells produced by refining each of these
     * cells by the given factor.
     */
    pub fn refine_by(&self, factor: i64) -> Self {
        Self::new(
            self.di.start * factor .. self.di.end * factor,
            self.dj.start * factor .. self.dj.end * factor,
            self.dk.start * factor .. self.dk.end * factor)
    }


    /**
     * Return the smallest index space of coarse cells covering this one,
     * where one coarse cell covers `factor` cells per axis.
     */
    pub fn coarsen_by(&self, factor: i64) -> Self {
        let lo = |x: i64| x.div_euclid(factor);
        let hi = |x: i64| -((-x).div_euclid(factor));
        Self::new(
            lo(self.di.start) .. hi(self.di.end),
            lo(self.dj.start) .. hi(self.dj.end),
            lo(self.dk.start) .. hi(self.dk.end))
    }


    /**
     * Return the intersection of two index spaces, or `None` if they do not
     * overlap.
     */
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let cut = |a: &Range<i64>, b: &Range<i64>| a.start.max(b.start) .. a.end.min(b.end);
        let (di, dj, dk) = (cut(&self.di, &other.di), cut(&self.dj, &other.dj), cut(&self.dk, &other.dk));

        if di.start < di.end && dj.start < dj.end && dk.start < dk.end {
            Some(Self { di, dj, dk })
        } else {
            None
        }
    }


    /**
     * Return the slab of `width` elements lying just outside this space on the
     * low (`upper_side == false`) or high side of the given axis. Asking for an
     * empty slab is an error.
     */
    pub fn outer_slab(&self, axis: Axis, upper_side: bool, width: i64) -> Self {
        assert!(width > 0, "boundary slab is empty");

        if upper_side {
            self.map_axis(axis, |r| r.end .. r.end + width)
        } else {
            self.map_axis(axis, |r| r.start - width .. r.start)
        }
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: Index) -> usize {
        let i = (index.0 - self.di.start) as usize;
        let j = (index.1 - self.dj.start) as usize;
        let k = (index.2 - self.dk.start) as usize;
        let (_, m, n) = self.dim();
        (i * m + j) * n + k
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = Index> + '_ {
        self.di.clone().flat_map(move |i| {
            self.dj.clone().flat_map(move |j| self.dk.clone().map(move |k| (i, j, k)))
        })
    }


    fn map_axis<F: Fn(&Range<i64>) -> Range<i64>>(&self, axis: Axis, f: F) -> Self {
        let mut result = self.clone();
        let r = match axis {
            Axis::I => &mut result.di,
            Axis::J => &mut result.dj,
            Axis::K => &mut result.dk,
        };
        *r = f(r);
        Self::new(result.di, result.dj, result.dk)
    }
}




// ============================================================================
impl From<(Range<i64>, Range<i64>, Range<i64>)> for IndexSpace {
    fn from(range: (Range<i64>, Range<i64>, Range<i64>)) -> Self {
        Self::new(range.0, range.1, range.2)
    }
}

impl From<IndexSpace> for (Range<i64>, Range<i64>, Range<i64>) {
    fn from(space: IndexSpace) -> Self {
        (space.di, space.dj, space.dk)
    }
}




/**
 * The index of the cell `ratio` times coarser containing a cell.
 */
pub fn coarsen_index(index: Index, ratio: i64) -> Index {
    (index.0.div_euclid(ratio), index.1.div_euclid(ratio), index.2.div_euclid(ratio))
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn range3d(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> IndexSpace {
    IndexSpace::new(di, dj, dk)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{range3d, Axis, IndexSpace};

    #[test]
    fn row_major_traversal_matches_offsets() {
        let space = range3d(-2..3, 0..4, 1..3);
        assert_eq!(space.len(), 40);

        for (n, index) in space.iter().enumerate() {
            assert_eq!(space.row_major_offset(index), n);
        }
    }

    #[test]
    fn coarsen_rounds_outward_for_negative_indexes() {
        let space = range3d(-3..5, 0..8, 1..2);
        assert_eq!(space.coarsen_by(2), range3d(-2..3, 0..4, 0..1));
        assert_eq!(space.coarsen_by(2).refine_by(2), range3d(-4..6, 0..8, 0..2));
    }

    #[test]
    fn intersect_of_disjoint_spaces_is_none() {
        let a = range3d(0..4, 0..4, 0..4);
        let b = range3d(4..8, 0..4, 0..4);
        assert!(a.intersect(&b).is_none());
        assert_eq!(a.extend_all(1).intersect(&b), Some(range3d(4..5, 0..4, 0..4)));
    }

    #[test]
    fn face_space_has_one_extra_layer() {
        let space = range3d(0..4, 0..2, 0..3);
        assert_eq!(space.surrounding_faces(Axis::J).dim(), (4, 3, 3));
        assert_eq!(space.outer_slab(Axis::K, true, 2), range3d(0..4, 0..2, 3..5));
        assert_eq!(space.outer_slab(Axis::I, false, 1), range3d(-1..0, 0..2, 0..3));
    }

    #[test]
    fn clamp_moves_index_inside() {
        let space = range3d(0..4, 0..4, 0..4);
        assert_eq!(space.clamp((-1, 5, 2)), (0, 3, 2));
    }

    #[test]
    #[should_panic(expected = "negative volume")]
    fn negative_volume_panics() {
        IndexSpace::new(2..1, 0..1, 0..1);
    }
}
