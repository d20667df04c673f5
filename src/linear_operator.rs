use rayon::prelude::*;
use crate::boundary::{Orientation, SolverBc};
use crate::index_space::{Axis, Index, IndexSpace};
use crate::linear_solver::LinearOperator;
use crate::mesh::Mesh;
use crate::patch::Patch;

/// What lies across one face of an unknown cell.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Neighbor {
    /// Another unknown, by position in the unknown vector.
    Cell(usize),
    /// A physical domain boundary.
    Domain(Orientation),
    /// A cell of this level not covered by any block; its value comes from
    /// the coarser level.
    CoarseFine(Index),
    /// A cell whose validity mask is zero; it is not an unknown.
    Masked(Index),
}

/// One unknown of a level: its block, its index, and its six neighbors in
/// `Orientation::ALL` order.
///
#[derive(Clone, Debug)]
pub struct StencilCell {
    pub block: usize,
    pub index: Index,
    pub neighbors: [Neighbor; 6],
}

/// The unknowns of one level (every valid, unmasked cell of its blocks) and
/// their connectivity. Building it is the expensive part of setting up a
/// level operator, so owners cache it until the mesh or mask changes.
///
#[derive(Clone, Debug)]
pub struct LevelStencil {
    lev: usize,
    cells: Vec<StencilCell>,
    dofs: Vec<Vec<Option<usize>>>,
    blocks: Vec<IndexSpace>,
    spacing: [f64; 3],
    touches_domain: [bool; 6],
    touches_coarse_fine: bool,
    touches_mask: bool,
}

impl LevelStencil {
    pub fn build(mesh: &Mesh, lev: usize, mask: Option<&[Patch<i32>]>) -> Self {
        let level = mesh.level(lev);
        let geom = &level.geometry;
        let valid = |b: usize, index: Index| mask.map_or(true, |m| m[b].get(index, 0) != 0);

        let mut dofs = Vec::with_capacity(level.blocks.len());
        let mut count = 0;

        for (b, block) in level.blocks.iter().enumerate() {
            let map: Vec<Option<usize>> = block
                .iter()
                .map(|index| {
                    valid(b, index).then(|| {
                        count += 1;
                        count - 1
                    })
                })
                .collect();
            dofs.push(map);
        }

        let lookup = |index: Index| -> Option<(usize, Option<usize>)> {
            let b = level.block_containing(index)?;
            Some((b, dofs[b][level.blocks[b].row_major_offset(index)]))
        };

        let mut cells = Vec::with_capacity(count);
        let mut touches_domain = [false; 6];
        let mut touches_coarse_fine = false;
        let mut touches_mask = false;

        for (b, block) in level.blocks.iter().enumerate() {
            for index in block.iter() {
                if !valid(b, index) {
                    continue;
                }
                let mut neighbors = [Neighbor::Domain(Orientation::ALL[0]); 6];

                for (slot, ori) in Orientation::ALL.iter().enumerate() {
                    let n = wrap(ori.axis.shift(index, ori.step()), &geom.domain, geom.periodic);

                    neighbors[slot] = if !geom.domain.contains(n) {
                        touches_domain[slot] = true;
                        Neighbor::Domain(*ori)
                    } else {
                        match lookup(n) {
                            Some((_, Some(dof))) => Neighbor::Cell(dof),
                            Some((_, None)) => {
                                touches_mask = true;
                                Neighbor::Masked(n)
                            }
                            None => {
                                touches_coarse_fine = true;
                                Neighbor::CoarseFine(n)
                            }
                        }
                    };
                }
                cells.push(StencilCell {
                    block: b,
                    index,
                    neighbors,
                });
            }
        }

        Self {
            lev,
            cells,
            dofs,
            blocks: level.blocks.clone(),
            spacing: geom.cell_size,
            touches_domain,
            touches_coarse_fine,
            touches_mask,
        }
    }

    pub fn lev(&self) -> usize {
        self.lev
    }

    pub fn num_dofs(&self) -> usize {
        self.cells.len()
    }

    pub fn cells(&self) -> &[StencilCell] {
        &self.cells
    }

    pub fn spacing(&self, axis: Axis) -> f64 {
        self.spacing[axis.index()]
    }

    /// The unknown at a cell of this level, if the cell is valid and
    /// unmasked.
    pub fn dof(&self, index: Index) -> Option<usize> {
        let b = self.blocks.iter().position(|block| block.contains(index))?;
        self.dofs[b][self.blocks[b].row_major_offset(index)]
    }

    /// Whether the system on this level has some Dirichlet-like data fixing
    /// the constant mode, given the physical boundary conditions.
    pub fn is_constrained(&self, bc: &[SolverBc; 6]) -> bool {
        self.touches_coarse_fine
            || self.touches_mask
            || (0..6).any(|n| self.touches_domain[n] && matches!(bc[n], SolverBc::Dirichlet(_)))
    }

    /// Read one component of the unknowns from block patches.
    pub fn gather(&self, patches: &[Patch], comp: usize) -> Vec<f64> {
        self.cells
            .par_iter()
            .map(|c| patches[c.block].get(c.index, comp))
            .collect()
    }

    /// Write one component of the unknowns into block patches. Masked cells
    /// and guard zones are not touched.
    pub fn scatter(&self, x: &[f64], patches: &mut [Patch], comp: usize) {
        let mut start = 0;

        for (b, patch) in patches.iter_mut().enumerate() {
            let end = start + self.dofs[b].iter().filter(|d| d.is_some()).count();

            for (c, value) in self.cells[start..end].iter().zip(&x[start..end]) {
                patch.set(c.index, comp, *value)
            }
            start = end;
        }
    }

    /// Evaluate a per-face coefficient for every unknown, in
    /// `Orientation::ALL` order.
    pub fn face_coefficients<F>(&self, f: F) -> Vec<[f64; 6]>
    where
        F: Fn(&StencilCell, Orientation) -> f64 + Sync,
    {
        self.cells
            .par_iter()
            .map(|c| {
                let mut b = [0.0; 6];
                for (slot, ori) in Orientation::ALL.iter().enumerate() {
                    b[slot] = f(c, *ori);
                }
                b
            })
            .collect()
    }
}

/// The level operator `A x = alpha a x - beta div(b grad x)` over the
/// unknowns of a `LevelStencil`. Data on domain boundaries, coarse-fine
/// neighbors and masked neighbors does not enter `A`; it is collected by
/// `boundary_term` into the affine part of the divergence.
///
pub struct CellOperator<'a> {
    stencil: &'a LevelStencil,
    bc: [SolverBc; 6],
    alpha: f64,
    acoef: Vec<f64>,
    beta: f64,
    bcoef: Vec<[f64; 6]>,
}

impl<'a> CellOperator<'a> {
    pub fn new(stencil: &'a LevelStencil, bc: [SolverBc; 6], alpha: f64, acoef: Vec<f64>, beta: f64, bcoef: Vec<[f64; 6]>) -> Self {
        assert_eq!(bcoef.len(), stencil.num_dofs(), "face coefficients do not match the stencil");
        Self {
            stencil,
            bc,
            alpha,
            acoef,
            beta,
            bcoef,
        }
    }

    pub fn stencil(&self) -> &LevelStencil {
        self.stencil
    }

    /// Outward normal gradient of `x` across face `slot` of unknown `c`,
    /// with neighbor values outside the unknowns supplied by `value`.
    pub fn face_gradient<F>(&self, x: &[f64], c: usize, slot: usize, value: &F) -> f64
    where
        F: Fn(Neighbor) -> f64,
    {
        let cell = &self.stencil.cells[c];
        let ori = Orientation::ALL[slot];
        let h = self.stencil.spacing(ori.axis);

        match cell.neighbors[slot] {
            Neighbor::Cell(n) => (x[n] - x[c]) / h,
            Neighbor::Domain(_) => match self.bc[slot] {
                SolverBc::Dirichlet(v) => (v - x[c]) / (0.5 * h),
                SolverBc::Neumann(g) => g,
                SolverBc::Periodic => 0.0,
            },
            nb @ (Neighbor::CoarseFine(_) | Neighbor::Masked(_)) => (value(nb) - x[c]) / h,
        }
    }

    /// The affine part of `div(b grad x)`: its value at `x = 0`.
    pub fn boundary_term<F>(&self, value: F) -> Vec<f64>
    where
        F: Fn(Neighbor) -> f64 + Sync,
    {
        let zero = vec![0.0; self.stencil.num_dofs()];
        (0..self.stencil.num_dofs())
            .into_par_iter()
            .map(|c| self.divergence_at(&zero, c, &value))
            .collect()
    }

    /// `div(b grad x)` including boundary data.
    pub fn divergence<F>(&self, x: &[f64], value: F) -> Vec<f64>
    where
        F: Fn(Neighbor) -> f64 + Sync,
    {
        (0..self.stencil.num_dofs())
            .into_par_iter()
            .map(|c| self.divergence_at(x, c, &value))
            .collect()
    }

    /// The right-hand side which, solved against `A`, includes the boundary
    /// data: `rhs + beta L0`.
    pub fn with_boundary_term(&self, rhs: &[f64], l0: &[f64]) -> Vec<f64> {
        rhs.par_iter().zip(l0).map(|(r, l)| r + self.beta * l).collect()
    }

    fn divergence_at<F>(&self, x: &[f64], c: usize, value: &F) -> f64
    where
        F: Fn(Neighbor) -> f64,
    {
        (0..6)
            .map(|slot| {
                let h = self.stencil.spacing(Orientation::ALL[slot].axis);
                self.bcoef[c][slot] * self.face_gradient(x, c, slot, value) / h
            })
            .sum()
    }

    fn homogeneous_divergence(&self, x: &[f64], c: usize) -> f64 {
        let cell = &self.stencil.cells[c];

        (0..6)
            .map(|slot| {
                let h = self.stencil.spacing(Orientation::ALL[slot].axis);
                let g = match cell.neighbors[slot] {
                    Neighbor::Cell(n) => (x[n] - x[c]) / h,
                    Neighbor::Domain(_) => match self.bc[slot] {
                        SolverBc::Dirichlet(_) => -x[c] / (0.5 * h),
                        SolverBc::Neumann(_) | SolverBc::Periodic => 0.0,
                    },
                    Neighbor::CoarseFine(_) | Neighbor::Masked(_) => -x[c] / h,
                };
                self.bcoef[c][slot] * g / h
            })
            .sum()
    }

    fn a(&self, c: usize) -> f64 {
        self.acoef.get(c).copied().unwrap_or(1.0)
    }
}

impl<'a> LinearOperator for CellOperator<'a> {
    fn dim(&self) -> usize {
        self.stencil.num_dofs()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.par_iter_mut().enumerate().for_each(|(c, y)| {
            *y = self.alpha * self.a(c) * x[c] - self.beta * self.homogeneous_divergence(x, c)
        });
    }

    fn diagonal(&self) -> Option<Vec<f64>> {
        let d = (0..self.stencil.num_dofs())
            .into_par_iter()
            .map(|c| {
                let cell = &self.stencil.cells[c];
                let off: f64 = (0..6)
                    .map(|slot| {
                        let h = self.stencil.spacing(Orientation::ALL[slot].axis);
                        let w = match cell.neighbors[slot] {
                            Neighbor::Cell(_) | Neighbor::CoarseFine(_) | Neighbor::Masked(_) => 1.0 / h,
                            Neighbor::Domain(_) => match self.bc[slot] {
                                SolverBc::Dirichlet(_) => 2.0 / h,
                                SolverBc::Neumann(_) | SolverBc::Periodic => 0.0,
                            },
                        };
                        self.bcoef[c][slot] * w / h
                    })
                    .sum();
                self.alpha * self.a(c) + self.beta * off
            })
            .collect();
        Some(d)
    }

    fn is_singular(&self) -> bool {
        let no_reaction = self.alpha == 0.0 || (!self.acoef.is_empty() && self.acoef.iter().all(|a| *a == 0.0));
        no_reaction && !self.stencil.is_constrained(&self.bc)
    }
}

fn wrap(index: Index, domain: &IndexSpace, periodic: [bool; 3]) -> Index {
    let mut result = index;

    for axis in Axis::ALL {
        let x = axis.of(result);
        let lo = domain.lower(axis);

        if periodic[axis.index()] && !domain.range(axis).contains(&x) {
            result = axis.with(result, lo + (x - lo).rem_euclid(domain.count(axis)));
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::{CellOperator, LevelStencil, Neighbor};
    use crate::boundary::SolverBc;
    use crate::linear_solver::{ConjugateGradient, LinearOperator, LinearSolver, SolverOptions};
    use crate::mesh::{LevelGeometry, Mesh};
    use crate::patch::Patch;

    fn mesh(periodic: bool) -> Mesh {
        let geom = LevelGeometry::new((8, 4, 4), [0.0; 3], [2.0, 1.0, 1.0], [periodic; 3]);
        Mesh::single_level(geom, 4).unwrap()
    }

    #[test]
    fn periodic_stencil_has_no_boundaries() {
        let stencil = LevelStencil::build(&mesh(true), 0, None);
        assert_eq!(stencil.num_dofs(), 128);
        assert!(stencil
            .cells()
            .iter()
            .all(|c| c.neighbors.iter().all(|n| matches!(n, Neighbor::Cell(_)))));
        assert!(!stencil.is_constrained(&[SolverBc::Periodic; 6]));
    }

    #[test]
    fn masked_cells_are_not_unknowns() {
        let m = mesh(false);
        let mask: Vec<Patch<i32>> = m
            .level(0)
            .blocks
            .iter()
            .map(|b| Patch::from_slice_function(0, b.clone(), 1, |(i, _, _), s| s[0] = (i != 3) as i32))
            .collect();
        let stencil = LevelStencil::build(&m, 0, Some(&mask));
        assert_eq!(stencil.num_dofs(), 112);
        assert!(stencil.dof((3, 0, 0)).is_none());
        assert!(stencil.is_constrained(&[SolverBc::Neumann(0.0); 6]));
    }

    #[test]
    fn dirichlet_laplacian_reproduces_a_linear_profile() {
        let m = mesh(false);
        let stencil = LevelStencil::build(&m, 0, None);
        let mut bc = [SolverBc::Neumann(0.0); 6];
        bc[0] = SolverBc::Dirichlet(0.0);
        bc[1] = SolverBc::Dirichlet(2.0);

        let bcoef = stencil.face_coefficients(|_, _| 1.0);
        let op = CellOperator::new(&stencil, bc, 0.0, Vec::new(), 1.0, bcoef);
        assert!(!op.is_singular());

        let l0 = op.boundary_term(|_| 0.0);
        let rhs = op.with_boundary_term(&vec![0.0; stencil.num_dofs()], &l0);
        let mut x = vec![0.0; stencil.num_dofs()];
        ConjugateGradient.solve("laplace", &op, &rhs, &mut x, &SolverOptions::default()).unwrap();

        for (c, cell) in stencil.cells().iter().enumerate() {
            let xc = 0.25 * (cell.index.0 as f64 + 0.5);
            assert!((x[c] - xc).abs() < 1e-8);
        }
        let residual = op.divergence(&x, |_| 0.0);
        assert!(residual.iter().all(|r| r.abs() < 1e-6));

        let mut y = vec![0.0; stencil.num_dofs()];
        op.apply(&x, &mut y);
        assert!(y.iter().zip(&rhs).all(|(a, b)| (a - b).abs() < 1e-6));
    }
}
