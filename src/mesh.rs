use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::index_space::{Axis, Index, IndexSpace};

/// The geometry of one refinement level: its index domain, the physical size
/// of a cell, the physical position of the domain's lower corner, and the
/// periodicity of each axis.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelGeometry {
    pub domain: IndexSpace,
    pub cell_size: [f64; 3],
    pub prob_lo: [f64; 3],
    pub periodic: [bool; 3],
}

impl LevelGeometry {
    /// Geometry of a box `[prob_lo, prob_hi]` divided into `shape` cells.
    pub fn new(shape: (i64, i64, i64), prob_lo: [f64; 3], prob_hi: [f64; 3], periodic: [bool; 3]) -> Self {
        let domain = IndexSpace::new(0..shape.0, 0..shape.1, 0..shape.2);
        let cell_size = [
            (prob_hi[0] - prob_lo[0]) / shape.0 as f64,
            (prob_hi[1] - prob_lo[1]) / shape.1 as f64,
            (prob_hi[2] - prob_lo[2]) / shape.2 as f64,
        ];
        Self {
            domain,
            cell_size,
            prob_lo,
            periodic,
        }
    }

    pub fn cell_spacing(&self, axis: Axis) -> f64 {
        self.cell_size[axis.index()]
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_size.iter().product()
    }

    pub fn is_periodic(&self, axis: Axis) -> bool {
        self.periodic[axis.index()]
    }

    pub fn cell_center(&self, index: Index) -> [f64; 3] {
        let (i, j, k) = index;
        let dx = &self.cell_size;
        let lo = &self.prob_lo;
        [
            lo[0] + dx[0] * (i as f64 + 0.5),
            lo[1] + dx[1] * (j as f64 + 0.5),
            lo[2] + dx[2] * (k as f64 + 0.5),
        ]
    }

    /// Position of the center of a face normal to `axis`, where face `i` is
    /// the lower face of cell `i`.
    pub fn face_center(&self, index: Index, axis: Axis) -> [f64; 3] {
        let mut x = self.cell_center(index);
        x[axis.index()] -= 0.5 * self.cell_spacing(axis);
        x
    }

    /// The geometry of the next finer level.
    pub fn refine(&self, ratio: i64) -> Self {
        Self {
            domain: self.domain.refine_by(ratio),
            cell_size: self.cell_size.map(|d| d / ratio as f64),
            prob_lo: self.prob_lo,
            periodic: self.periodic,
        }
    }
}

/// One level of the hierarchy: its geometry and the blocks which tile the
/// part of the domain the level covers.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Level {
    pub geometry: LevelGeometry,
    pub blocks: Vec<IndexSpace>,
}

impl Level {
    /// Return the position of the block whose valid region contains the given
    /// cell, if any.
    pub fn block_containing(&self, index: Index) -> Option<usize> {
        self.blocks.iter().position(|b| b.contains(index))
    }

    pub fn covers(&self, index: Index) -> bool {
        self.block_containing(index).is_some()
    }

    pub fn num_cells(&self) -> usize {
        self.blocks.iter().map(IndexSpace::len).sum()
    }
}

/// An ordered collection of levels with a fixed refinement ratio between
/// consecutive levels. Level 0 covers its whole domain; each finer level
/// covers part of the refined domain of the level below.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mesh {
    levels: Vec<Level>,
    ref_ratio: i64,
}

impl Mesh {
    pub fn new(base: LevelGeometry, blocks: Vec<IndexSpace>, ref_ratio: i64) -> Result<Self> {
        if ref_ratio < 2 {
            return Err(Error::geometry(format!("refinement ratio {} is less than 2", ref_ratio)));
        }
        let level = Level {
            geometry: base,
            blocks,
        };
        validate_blocks(&level, 0)?;

        if level.num_cells() != level.geometry.domain.len() {
            return Err(Error::geometry("level 0 blocks do not cover the domain"));
        }
        Ok(Self {
            levels: vec![level],
            ref_ratio,
        })
    }

    /// A single-level mesh over `geometry` decomposed into blocks of at most
    /// `block_size` cells per axis.
    pub fn single_level(geometry: LevelGeometry, block_size: i64) -> Result<Self> {
        let blocks = decompose(&geometry.domain, block_size);
        Self::new(geometry, blocks, 2)
    }

    /// Add a finer level made of the given blocks, expressed in the index
    /// space of the new level. Each fine block must lie inside the refined
    /// domain and be covered by the current finest level.
    pub fn add_level(&mut self, blocks: Vec<IndexSpace>) -> Result<()> {
        let lev = self.levels.len();
        let coarse = &self.levels[lev - 1];
        let level = Level {
            geometry: coarse.geometry.refine(self.ref_ratio),
            blocks,
        };
        validate_blocks(&level, lev)?;

        for block in &level.blocks {
            let covered: usize = coarse
                .blocks
                .iter()
                .filter_map(|c| c.intersect(&block.coarsen_by(self.ref_ratio)))
                .map(|s| s.len())
                .sum();

            if covered != block.coarsen_by(self.ref_ratio).len() {
                return Err(Error::geometry(format!(
                    "level {} block {:?} is not nested in level {}",
                    lev,
                    block,
                    lev - 1
                )));
            }
        }
        self.levels.push(level);
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn finest_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, lev: usize) -> &Level {
        &self.levels[lev]
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn geometry(&self, lev: usize) -> &LevelGeometry {
        &self.levels[lev].geometry
    }

    pub fn ref_ratio(&self) -> i64 {
        self.ref_ratio
    }
}

fn validate_blocks(level: &Level, lev: usize) -> Result<()> {
    let domain = &level.geometry.domain;

    for (n, block) in level.blocks.iter().enumerate() {
        if block.is_empty() || !domain.contains_space(block) {
            return Err(Error::geometry(format!(
                "level {} block {:?} is empty or outside the domain {:?}",
                lev, block, domain
            )));
        }
        if level.blocks[..n].iter().any(|other| other.intersect(block).is_some()) {
            return Err(Error::geometry(format!("level {} block {:?} overlaps another block", lev, block)));
        }
    }
    Ok(())
}

/// Split an index space into blocks of at most `block_size` elements per
/// axis.
pub fn decompose(space: &IndexSpace, block_size: i64) -> Vec<IndexSpace> {
    let chunks = |axis: Axis| {
        let r = space.range(axis).clone();
        r.clone()
            .step_by(block_size.max(1) as usize)
            .map(move |s| s..(s + block_size).min(r.end))
            .collect::<Vec<_>>()
    };
    let (ci, cj, ck) = (chunks(Axis::I), chunks(Axis::J), chunks(Axis::K));
    let mut blocks = Vec::new();

    for di in &ci {
        for dj in &cj {
            for dk in &ck {
                blocks.push(IndexSpace::new(di.clone(), dj.clone(), dk.clone()))
            }
        }
    }
    blocks
}

#[cfg(test)]
mod test {
    use super::{decompose, LevelGeometry, Mesh};
    use crate::index_space::range3d;

    fn unit_geometry(n: i64) -> LevelGeometry {
        LevelGeometry::new((n, n, n), [0.0; 3], [1.0; 3], [true; 3])
    }

    #[test]
    fn decompose_tiles_the_space() {
        let blocks = decompose(&range3d(0..10, 0..4, 0..4), 4);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks.iter().map(|b| b.len()).sum::<usize>(), 160);
    }

    #[test]
    fn uncovered_base_level_is_rejected() {
        let result = Mesh::new(unit_geometry(8), vec![range3d(0..4, 0..8, 0..8)], 2);
        assert!(result.is_err());
    }

    #[test]
    fn fine_level_must_be_nested() {
        let mut mesh = Mesh::single_level(unit_geometry(8), 4).unwrap();
        assert!(mesh.add_level(vec![range3d(4..12, 4..12, 4..12)]).is_ok());
        assert!(mesh.add_level(vec![range3d(0..4, 0..4, 0..4)]).is_err());
        assert_eq!(mesh.num_levels(), 2);
        assert_eq!(mesh.geometry(1).cell_size, [1.0 / 16.0; 3]);
    }

    #[test]
    fn overlapping_blocks_are_rejected() {
        let blocks = vec![range3d(0..8, 0..8, 0..4), range3d(0..8, 0..8, 2..8)];
        assert!(Mesh::new(unit_geometry(8), blocks, 2).is_err());
    }
}
