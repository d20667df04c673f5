use std::collections::HashMap;
use std::sync::Arc;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::boundary::{BcTable, GhostFill};
use crate::error::{Error, Result};
use crate::index_space::{Axis, IndexSpace};
use crate::mesh::Mesh;
use crate::mesh_mapping::{self, MeshMapping};
use crate::meshing::{self, CoarseLevel, LevelLayout, ValidPatches};
use crate::patch::Patch;




/**
 * The time levels held by a field
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldState {
    New,
    Old,
    NPH,
}




// ============================================================================
impl FieldState {
    fn slot(self) -> usize {
        match self {
            FieldState::New => 0,
            FieldState::Old => 1,
            FieldState::NPH => 2,
        }
    }
}




/**
 * Where the values of a field live: cell centers or the faces normal to an
 * axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    Cell,
    Face(Axis),
}




// ============================================================================
impl Location {


    /**
     * The index space of the values belonging to a block of cells.
     */
    pub fn space_of(self, cells: &IndexSpace) -> IndexSpace {
        match self {
            Location::Cell => cells.clone(),
            Location::Face(axis) => cells.surrounding_faces(axis),
        }
    }
}




/**
 * Which mesh the values of a state are expressed on when mesh mapping is
 * active
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshSpace {
    Uniform,
    Stretched,
}




/**
 * One state of a field: a patch per block per level, and the mesh-space tag.
 */
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateData {
    levels: Vec<Vec<Patch>>,
    space: MeshSpace,
}




// ============================================================================
impl StateData {

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, lev: usize) -> &[Patch] {
        &self.levels[lev]
    }

    pub fn level_mut(&mut self, lev: usize) -> &mut [Patch] {
        &mut self.levels[lev]
    }

    pub fn patch(&self, lev: usize, block: usize) -> &Patch {
        &self.levels[lev][block]
    }

    pub fn space(&self) -> MeshSpace {
        self.space
    }

    pub(crate) fn set_space(&mut self, space: MeshSpace) {
        self.space = space
    }

    pub(crate) fn levels_mut(&mut self) -> &mut Vec<Vec<Patch>> {
        &mut self.levels
    }

    /**
     * Overwrite every value (guard zones included) and the tag with those of
     * another state of the same shape.
     */
    pub fn copy_from(&mut self, other: &StateData) {
        for (a, b) in self.levels.iter_mut().zip(&other.levels) {
            a.par_iter_mut().zip(b).for_each(|(p, q)| p.data_mut().copy_from_slice(q.data()));
        }
        self.space = other.space
    }

    pub fn set_val(&mut self, value: f64) {
        for patches in &mut self.levels {
            patches.par_iter_mut().for_each(|p| p.fill(value));
        }
    }
}




/**
 * Describes a field to be declared in the registry.
 */
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub num_comp: usize,
    pub num_ghost: i64,
    pub location: Location,
    pub num_states: usize,
    pub vector: bool,
}




// ============================================================================
impl FieldSpec {

    /**
     * A cell-centered field with Old and New states and no guard zones.
     */
    pub fn cell(name: &str, num_comp: usize) -> Self {
        Self {
            name: name.to_string(),
            num_comp,
            num_ghost: 0,
            location: Location::Cell,
            num_states: 2,
            vector: false,
        }
    }

    /**
     * A single-state, single-component field on the faces normal to `axis`.
     */
    pub fn face(name: &str, axis: Axis) -> Self {
        Self {
            name: name.to_string(),
            num_comp: 1,
            num_ghost: 0,
            location: Location::Face(axis),
            num_states: 1,
            vector: false,
        }
    }

    pub fn ghost(mut self, num_ghost: i64) -> Self {
        self.num_ghost = num_ghost;
        self
    }

    pub fn states(mut self, num_states: usize) -> Self {
        self.num_states = num_states.clamp(1, 3);
        self
    }

    /**
     * Mark the three components as aligned with the coordinate axes.
     */
    pub fn vector(mut self) -> Self {
        self.vector = true;
        self
    }
}




/**
 * A named, multi-component quantity on every level, with its time states and
 * boundary-condition table.
 */
#[derive(Debug)]
pub struct Field {
    id: FieldId,
    name: String,
    num_comp: usize,
    num_ghost: i64,
    location: Location,
    vector: bool,
    bc: BcTable,
    states: Vec<StateData>,
}




// ============================================================================
impl Field {

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_comp(&self) -> usize {
        self.num_comp
    }

    pub fn num_ghost(&self) -> i64 {
        self.num_ghost
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn is_vector(&self) -> bool {
        self.vector
    }

    pub fn bc(&self) -> &BcTable {
        &self.bc
    }

    pub fn bc_mut(&mut self) -> &mut BcTable {
        &mut self.bc
    }

    pub fn has_state(&self, fstate: FieldState) -> bool {
        fstate.slot() < self.states.len()
    }

    /**
     * Return one state of the field. A field declared with a single state
     * answers every request with its New state; asking a two-state field for
     * its N+1/2 state is an error.
     */
    pub fn state(&self, fstate: FieldState) -> &StateData {
        &self.states[self.slot(fstate)]
    }

    pub fn state_mut(&mut self, fstate: FieldState) -> &mut StateData {
        let slot = self.slot(fstate);
        &mut self.states[slot]
    }

    /**
     * Borrow two different states at once, the first mutably.
     */
    pub fn state_pair_mut(&mut self, target: FieldState, source: FieldState) -> (&mut StateData, &StateData) {
        let (t, s) = (self.slot(target), self.slot(source));
        assert!(t != s, "field {} state {:?} borrowed twice", self.name, target);

        if t < s {
            let (a, b) = self.states.split_at_mut(s);
            (&mut a[t], &b[0])
        } else {
            let (a, b) = self.states.split_at_mut(t);
            (&mut b[0], &a[s])
        }
    }

    /**
     * The index space of valid values belonging to a block.
     */
    pub fn valid_space(&self, block: &IndexSpace) -> IndexSpace {
        self.location.space_of(block)
    }

    /**
     * Fill every guard zone of one state on every level, coarse to fine.
     */
    pub fn fill_ghosts(&mut self, fstate: FieldState, mesh: &Mesh) {
        let location = self.location;
        let vector = self.vector;
        let slot = self.slot(fstate);
        let bc = &self.bc;
        let levels = &mut self.states[slot].levels;

        for lev in 0..levels.len() {
            let level = mesh.level(lev);
            let geom = &level.geometry;
            let valid: Vec<_> = level.blocks.iter().map(|b| location.space_of(b)).collect();
            let layout = LevelLayout {
                valid: &valid,
                domain: location.space_of(&geom.domain),
                periodic: geom.periodic,
                period: [
                    geom.domain.count(Axis::I),
                    geom.domain.count(Axis::J),
                    geom.domain.count(Axis::K),
                ],
                spacing: geom.cell_size,
            };
            let boundary = |ori, comp| match location {
                Location::Cell => bc.ghost_fill(ori, comp, vector),
                Location::Face(_) => GhostFill::Extrapolate,
            };
            let (coarser, finer) = levels.split_at_mut(lev);

            if lev == 0 {
                meshing::fill_ghosts(&mut finer[0], &layout, None, boundary);
            } else {
                let coarse_valid: Vec<_> = mesh.level(lev - 1).blocks.iter().map(|b| location.space_of(b)).collect();
                let coarse = CoarseLevel {
                    patches: ValidPatches {
                        patches: &coarser[lev - 1],
                        valid: &coarse_valid,
                    },
                    ratio: mesh.ref_ratio(),
                };
                meshing::fill_ghosts(&mut finer[0], &layout, Some(&coarse), boundary);
            }
        }
    }

    /**
     * Express a state on the stretched mesh, if it is not already.
     */
    pub fn to_stretched_space(&mut self, fstate: FieldState, mapping: &dyn MeshMapping) {
        let (location, vector) = (self.location, self.vector);
        mesh_mapping::transform_state(self.state_mut(fstate), location, vector, mapping, MeshSpace::Stretched)
    }

    /**
     * Express a state on the uniform mesh, if it is not already.
     */
    pub fn to_uniform_space(&mut self, fstate: FieldState, mapping: &dyn MeshMapping) {
        let (location, vector) = (self.location, self.vector);
        mesh_mapping::transform_state(self.state_mut(fstate), location, vector, mapping, MeshSpace::Uniform)
    }

    fn slot(&self, fstate: FieldState) -> usize {
        if self.states.len() == 1 {
            return 0;
        }
        if !self.has_state(fstate) {
            panic!("field {} has no {:?} state", self.name, fstate);
        }
        fstate.slot()
    }

    fn placeholder(id: FieldId) -> Self {
        Self {
            id,
            name: String::new(),
            num_comp: 0,
            num_ghost: 0,
            location: Location::Cell,
            vector: false,
            bc: BcTable::default(),
            states: Vec::new(),
        }
    }
}




/**
 * Handle to a field in the registry.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldId(usize);




/**
 * An integer field with one patch per block (no guard zones), used for the
 * overset validity mask.
 */
#[derive(Clone, Debug)]
pub struct IntField {
    name: String,
    levels: Vec<Vec<Patch<i32>>>,
}




// ============================================================================
impl IntField {

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self, lev: usize) -> &[Patch<i32>] {
        &self.levels[lev]
    }

    pub fn level_mut(&mut self, lev: usize) -> &mut [Patch<i32>] {
        &mut self.levels[lev]
    }
}




/**
 * The field registry. It owns the mesh, every field and integer field, and
 * the optional mesh-mapping collaborator. Fields are addressed by `FieldId`
 * or looked up by name.
 */
pub struct FieldRepo {
    mesh: Mesh,
    fields: Vec<Field>,
    names: HashMap<String, FieldId>,
    int_fields: Vec<IntField>,
    mapping: Option<Arc<dyn MeshMapping>>,
}




// ============================================================================
impl FieldRepo {

    pub const MASK_CELL: &'static str = "mask_cell";


    /**
     * Create a registry over the given mesh. The validity mask `mask_cell` is
     * declared with every cell valid.
     */
    pub fn new(mesh: Mesh) -> Self {
        let mut repo = Self {
            mesh,
            fields: Vec::new(),
            names: HashMap::new(),
            int_fields: Vec::new(),
            mapping: None,
        };
        repo.declare_int_field(Self::MASK_CELL, 1);
        repo
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn num_active_levels(&self) -> usize {
        self.mesh.num_levels()
    }


    /**
     * Declare a field, or return the existing one if a field with the same
     * name, component count and location was already declared. Declaring an
     * existing name with a different shape is a configuration error.
     */
    pub fn declare_field(&mut self, spec: FieldSpec) -> Result<FieldId> {
        if let Some(&id) = self.names.get(&spec.name) {
            let field = &self.fields[id.0];

            if field.num_comp != spec.num_comp || field.location != spec.location {
                return Err(Error::config(format!(
                    "field {} redeclared with {} components at {:?} (was {} at {:?})",
                    spec.name, spec.num_comp, spec.location, field.num_comp, field.location
                )));
            }
            return Ok(id);
        }

        let id = FieldId(self.fields.len());
        let allocate = || StateData {
            levels: self
                .mesh
                .levels()
                .iter()
                .enumerate()
                .map(|(lev, level)| {
                    level
                        .blocks
                        .iter()
                        .map(|b| Patch::zeros(lev as u32, spec.num_comp, spec.location.space_of(b).extend_all(spec.num_ghost)))
                        .collect()
                })
                .collect(),
            space: MeshSpace::Uniform,
        };
        let mut bc = BcTable::new(spec.num_comp);

        for axis in Axis::ALL {
            if self.mesh.geometry(0).is_periodic(axis) {
                bc.set_periodic(axis);
            }
        }
        let field = Field {
            id,
            name: spec.name.clone(),
            num_comp: spec.num_comp,
            num_ghost: spec.num_ghost,
            location: spec.location,
            vector: spec.vector,
            bc,
            states: (0..spec.num_states).map(|_| allocate()).collect(),
        };
        debug!("declared field {} ({} comp, {} ghost, {:?})", spec.name, spec.num_comp, spec.num_ghost, spec.location);

        self.fields.push(field);
        self.names.insert(spec.name, id);
        Ok(id)
    }


    /**
     * Declare an integer field with one value per cell, set to `default`.
     */
    pub fn declare_int_field(&mut self, name: &str, default: i32) -> &mut IntField {
        if let Some(n) = self.int_fields.iter().position(|f| f.name == name) {
            return &mut self.int_fields[n];
        }
        let levels = self
            .mesh
            .levels()
            .iter()
            .enumerate()
            .map(|(lev, level)| level.blocks.iter().map(|b| Patch::filled(lev as u32, 1, b.clone(), default)).collect())
            .collect();
        self.int_fields.push(IntField {
            name: name.to_string(),
            levels,
        });
        let n = self.int_fields.len() - 1;
        &mut self.int_fields[n]
    }

    pub fn field_id(&self, name: &str) -> Result<FieldId> {
        self.names.get(name).copied().ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    pub fn field_exists(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn get_field(&self, name: &str) -> Result<&Field> {
        Ok(self.field(self.field_id(name)?))
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0]
    }

    pub fn int_field(&self, name: &str) -> Result<&IntField> {
        self.int_fields.iter().find(|f| f.name == name).ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    pub fn int_field_mut(&mut self, name: &str) -> Result<&mut IntField> {
        self.int_fields.iter_mut().find(|f| f.name == name).ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /**
     * The overset validity mask: 1 for cells carrying valid data, 0 for cells
     * owned by another solver.
     */
    pub fn mask_cell(&self) -> &IntField {
        &self.int_fields[0]
    }

    pub fn set_mesh_mapping(&mut self, mapping: Arc<dyn MeshMapping>) {
        self.mapping = Some(mapping)
    }

    pub fn mesh_mapping(&self) -> Option<&dyn MeshMapping> {
        self.mapping.as_deref()
    }

    /**
     * The mesh mapping, or a configuration error if mapping was requested
     * but no collaborator is installed.
     */
    pub fn require_mesh_mapping(&self) -> Result<Arc<dyn MeshMapping>> {
        self.mapping
            .clone()
            .ok_or_else(|| Error::config("mesh mapping is enabled but no mapping is installed"))
    }


    /**
     * Check a field out of the registry and run `f` with it and with the rest
     * of the registry. While checked out, the field is not visible through
     * the registry.
     */
    pub fn with_field_mut<R, F>(&mut self, id: FieldId, f: F) -> R
    where
        F: FnOnce(&mut Field, &FieldRepo) -> R,
    {
        let mut field = self.take_field(id);
        let result = f(&mut field, self);
        self.restore_field(field);
        result
    }

    pub(crate) fn take_field(&mut self, id: FieldId) -> Field {
        std::mem::replace(&mut self.fields[id.0], Field::placeholder(id))
    }

    pub(crate) fn restore_field(&mut self, field: Field) {
        let id = field.id;
        self.fields[id.0] = field
    }

    pub fn fill_ghosts(&mut self, id: FieldId, fstate: FieldState) {
        let mesh = &self.mesh;
        self.fields[id.0].fill_ghosts(fstate, mesh)
    }

    /**
     * Copy the New state of every multi-state field into its Old state.
     */
    pub fn advance_states(&mut self) {
        for field in &mut self.fields {
            if field.states.len() > 1 {
                let (old, new) = field.state_pair_mut(FieldState::Old, FieldState::New);
                old.copy_from(new);
            }
        }
    }

    /**
     * Set every value of a state (guard zones included) from a function of
     * the level and the physical position of the value.
     */
    pub fn set_from_function<F>(&mut self, id: FieldId, fstate: FieldState, f: F)
    where
        F: Fn(usize, [f64; 3], &mut [f64]) + Sync,
    {
        let mesh = &self.mesh;
        let field = &mut self.fields[id.0];
        let location = field.location;

        for (lev, patches) in field.state_mut(fstate).levels.iter_mut().enumerate() {
            let geom = mesh.geometry(lev);

            patches.par_iter_mut().for_each(|patch| {
                let space = patch.index_space().clone();

                for index in space.iter() {
                    let x = match location {
                        Location::Cell => geom.cell_center(index),
                        Location::Face(axis) => geom.face_center(index, axis),
                    };
                    f(lev, x, patch.get_slice_mut(index))
                }
            });
        }
    }

    /**
     * Volume integral of one component of a cell-centered state over the
     * composite mesh (each region counted on the finest level covering it).
     */
    pub fn volume_integral(&self, id: FieldId, fstate: FieldState, comp: usize) -> f64 {
        let state = self.field(id).state(fstate);
        let ratio = self.mesh.ref_ratio();

        (0..self.mesh.num_levels())
            .map(|lev| {
                let level = self.mesh.level(lev);
                let finer = (lev + 1 < self.mesh.num_levels()).then(|| self.mesh.level(lev + 1));
                let volume = level.geometry.cell_volume();

                level
                    .blocks
                    .iter()
                    .zip(state.level(lev))
                    .map(|(block, patch)| {
                        block
                            .iter()
                            .filter(|&(i, j, k)| match finer {
                                Some(f) => !f.covers((i * ratio, j * ratio, k * ratio)),
                                None => true,
                            })
                            .map(|index| patch.get(index, comp))
                            .sum::<f64>()
                    })
                    .sum::<f64>()
                    * volume
            })
            .sum()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{FieldRepo, FieldSpec, FieldState};
    use crate::mesh::{LevelGeometry, Mesh};

    fn repo() -> FieldRepo {
        let geom = LevelGeometry::new((8, 8, 8), [0.0; 3], [1.0; 3], [true; 3]);
        FieldRepo::new(Mesh::single_level(geom, 4).unwrap())
    }

    #[test]
    fn redeclaring_with_a_new_shape_fails() {
        let mut repo = repo();
        let a = repo.declare_field(FieldSpec::cell("tracer", 1)).unwrap();
        assert_eq!(repo.declare_field(FieldSpec::cell("tracer", 1)).unwrap(), a);
        assert!(repo.declare_field(FieldSpec::cell("tracer", 2)).is_err());
        assert!(repo.field_id("missing").is_err());
    }

    #[test]
    fn advance_states_copies_new_into_old() {
        let mut repo = repo();
        let id = repo.declare_field(FieldSpec::cell("tracer", 1).ghost(1)).unwrap();
        repo.set_from_function(id, FieldState::New, |_, x, s| s[0] = x[0]);
        repo.advance_states();
        let integral = repo.volume_integral(id, FieldState::Old, 0);
        assert!((integral - 0.5).abs() < 1e-12);
    }

    #[test]
    fn mask_defaults_to_valid() {
        let repo = repo();
        let mask = repo.mask_cell();
        assert!(mask.level(0).iter().all(|p| p.data().iter().all(|&m| m == 1)));
    }

    #[test]
    fn checked_out_field_is_restored() {
        let mut repo = repo();
        let id = repo.declare_field(FieldSpec::cell("tracer", 1)).unwrap();
        let name = repo.with_field_mut(id, |field, rest| {
            field.state_mut(FieldState::New).set_val(2.0);
            rest.field(id).name().to_string()
        });
        assert_eq!(name, "");
        assert_eq!(repo.field(id).name(), "tracer");
        assert!((repo.volume_integral(id, FieldState::New, 0) - 2.0).abs() < 1e-12);
    }
}
