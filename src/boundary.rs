use serde::{Deserialize, Serialize};
use crate::index_space::{Axis, Index};




/**
 * The low or high side of an axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Low,
    High,
}




/**
 * One of the six faces of a box: an axis and a side
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation {
    pub axis: Axis,
    pub side: Side,
}




// ============================================================================
impl Orientation {

    pub const ALL: [Orientation; 6] = [
        Orientation::low(Axis::I),
        Orientation::high(Axis::I),
        Orientation::low(Axis::J),
        Orientation::high(Axis::J),
        Orientation::low(Axis::K),
        Orientation::high(Axis::K),
    ];

    pub const fn low(axis: Axis) -> Self {
        Self { axis, side: Side::Low }
    }

    pub const fn high(axis: Axis) -> Self {
        Self { axis, side: Side::High }
    }

    /**
     * Position of this orientation in `Orientation::ALL`.
     */
    pub fn index(self) -> usize {
        2 * self.axis.index() + match self.side {
            Side::Low => 0,
            Side::High => 1,
        }
    }

    /**
     * The sign of the outward normal: -1 on the low side, +1 on the high side.
     */
    pub fn outward_sign(self) -> f64 {
        match self.side {
            Side::Low => -1.0,
            Side::High => 1.0,
        }
    }

    /**
     * The step from a cell to its neighbor across this face.
     */
    pub fn step(self) -> i64 {
        match self.side {
            Side::Low => -1,
            Side::High => 1,
        }
    }

    /**
     * The index of the face on this side of a cell.
     */
    pub fn face_of(self, cell: Index) -> Index {
        match self.side {
            Side::Low => cell,
            Side::High => self.axis.shift(cell, 1),
        }
    }
}




/**
 * Physical boundary condition kinds attached to each orientation of a field
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BcType {
    FixedValue,
    FixedGradient,
    WallModel,
    SlipWall,
    Extrapolation,
    Periodic,
}




/**
 * How the ghost zones beyond a physical boundary are filled for one component
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GhostFill {
    /// Ghost zones hold the prescribed value on the boundary face.
    Dirichlet(f64),
    /// Ghost zones copy the nearest interior value.
    Extrapolate,
    /// Ghost zones follow a prescribed gradient along the coordinate axis.
    Gradient(f64),
    /// Ghost zones mirror the interior with a sign change.
    ReflectOdd,
}




/**
 * The boundary condition seen by a linear solver at a domain face. Neumann
 * data is the outward normal derivative.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SolverBc {
    Dirichlet(f64),
    Neumann(f64),
    Periodic,
}




/**
 * The boundary-condition table of a field: a kind per orientation and a value
 * per orientation per component.
 */
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BcTable {
    kinds: Vec<BcType>,
    values: Vec<Vec<f64>>,
}




// ============================================================================
impl BcTable {


    /**
     * A table with every orientation set to first-order extrapolation.
     */
    pub fn new(num_comp: usize) -> Self {
        Self {
            kinds: vec![BcType::Extrapolation; 6],
            values: vec![vec![0.0; num_comp]; 6],
        }
    }


    /**
     * Set the kind and the per-component values of one orientation. Missing
     * values are zero.
     */
    pub fn set(&mut self, ori: Orientation, kind: BcType, values: &[f64]) -> &mut Self {
        let slot = &mut self.values[ori.index()];
        slot.iter_mut().for_each(|v| *v = 0.0);
        slot.iter_mut().zip(values).for_each(|(v, x)| *v = *x);
        self.kinds[ori.index()] = kind;
        self
    }


    pub fn set_periodic(&mut self, axis: Axis) -> &mut Self {
        self.set(Orientation::low(axis), BcType::Periodic, &[]);
        self.set(Orientation::high(axis), BcType::Periodic, &[])
    }


    pub fn kind(&self, ori: Orientation) -> BcType {
        self.kinds.get(ori.index()).copied().unwrap_or(BcType::Extrapolation)
    }


    pub fn value(&self, ori: Orientation, comp: usize) -> f64 {
        self.values.get(ori.index()).and_then(|v| v.get(comp)).copied().unwrap_or(0.0)
    }


    /**
     * The ghost-zone rule for one component. For vector fields, component `n`
     * is aligned with axis `n`, so the wall-normal component of a wall is
     * reflected.
     */
    pub fn ghost_fill(&self, ori: Orientation, comp: usize, vector: bool) -> GhostFill {
        let normal = vector && comp == ori.axis.index();

        match self.kind(ori) {
            BcType::FixedValue => GhostFill::Dirichlet(self.value(ori, comp)),
            BcType::FixedGradient => GhostFill::Gradient(self.value(ori, comp)),
            BcType::SlipWall | BcType::WallModel if normal => GhostFill::ReflectOdd,
            BcType::SlipWall | BcType::WallModel => GhostFill::Extrapolate,
            BcType::Extrapolation | BcType::Periodic => GhostFill::Extrapolate,
        }
    }


    /**
     * The condition used by the diffusion solve for one component.
     */
    pub fn solver_bc(&self, ori: Orientation, comp: usize, vector: bool) -> SolverBc {
        let normal = vector && comp == ori.axis.index();

        match self.kind(ori) {
            BcType::Periodic => SolverBc::Periodic,
            BcType::FixedValue => SolverBc::Dirichlet(self.value(ori, comp)),
            BcType::FixedGradient => SolverBc::Neumann(self.value(ori, comp) * ori.outward_sign()),
            BcType::SlipWall | BcType::WallModel if normal => SolverBc::Dirichlet(0.0),
            BcType::SlipWall | BcType::WallModel | BcType::Extrapolation => SolverBc::Neumann(0.0),
        }
    }


    /**
     * The condition on the projection potential at a face where this table
     * describes the velocity: outflow faces hold the potential at zero, all
     * other non-periodic faces leave the normal velocity untouched.
     */
    pub fn projection_bc(&self, ori: Orientation) -> SolverBc {
        match self.kind(ori) {
            BcType::Periodic => SolverBc::Periodic,
            BcType::FixedGradient | BcType::Extrapolation => SolverBc::Dirichlet(0.0),
            BcType::FixedValue | BcType::SlipWall | BcType::WallModel => SolverBc::Neumann(0.0),
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{BcTable, BcType, GhostFill, Orientation, SolverBc};
    use crate::index_space::Axis;

    #[test]
    fn orientations_are_numbered_in_order() {
        for (n, ori) in Orientation::ALL.iter().enumerate() {
            assert_eq!(ori.index(), n);
        }
    }

    #[test]
    fn slip_wall_reflects_only_the_normal_component() {
        let mut bc = BcTable::new(3);
        bc.set(Orientation::low(Axis::J), BcType::SlipWall, &[]);
        let ori = Orientation::low(Axis::J);
        assert_eq!(bc.ghost_fill(ori, 1, true), GhostFill::ReflectOdd);
        assert_eq!(bc.ghost_fill(ori, 0, true), GhostFill::Extrapolate);
        assert_eq!(bc.solver_bc(ori, 1, true), SolverBc::Dirichlet(0.0));
        assert_eq!(bc.solver_bc(ori, 2, true), SolverBc::Neumann(0.0));
    }

    #[test]
    fn outflow_holds_projection_potential_at_zero() {
        let mut bc = BcTable::new(3);
        bc.set(Orientation::low(Axis::I), BcType::FixedValue, &[1.0, 0.0, 0.0]);
        assert_eq!(bc.projection_bc(Orientation::low(Axis::I)), SolverBc::Neumann(0.0));
        assert_eq!(bc.projection_bc(Orientation::high(Axis::I)), SolverBc::Dirichlet(0.0));
    }

    #[test]
    fn fixed_gradient_becomes_outward_neumann_data() {
        let mut bc = BcTable::new(1);
        bc.set(Orientation::low(Axis::K), BcType::FixedGradient, &[2.0]);
        bc.set(Orientation::high(Axis::K), BcType::FixedGradient, &[2.0]);
        assert_eq!(bc.solver_bc(Orientation::low(Axis::K), 0, false), SolverBc::Neumann(-2.0));
        assert_eq!(bc.solver_bc(Orientation::high(Axis::K), 0, false), SolverBc::Neumann(2.0));
    }
}
