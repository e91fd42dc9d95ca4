//! DOF layout: ownership ([`IndexMap`]), cell connectivity ([`DofMap`]) and
//! the P1 [`FunctionSpace`] tying them to a mesh.

pub mod dofmap;
pub mod function_space;
pub mod index_map;

pub use dofmap::DofMap;
pub use function_space::FunctionSpace;
pub use index_map::IndexMap;
