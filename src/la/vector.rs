//! Vector with owned entries followed by ghost entries.

use std::sync::Arc;

use crate::comm::Communicator;
use crate::mpc_error::MpcError;
use crate::space::IndexMap;

/// Block vector laid out by an [`IndexMap`]: owned blocks, then ghosts.
#[derive(Clone, Debug, PartialEq)]
pub struct GhostedVector {
    index_map: Arc<IndexMap>,
    bs: usize,
    values: Vec<f64>,
}

impl GhostedVector {
    pub fn new(index_map: Arc<IndexMap>, bs: usize) -> Self {
        let n = (index_map.size_local() + index_map.num_ghosts()) * bs;
        Self {
            index_map,
            bs,
            values: vec![0.0; n],
        }
    }

    pub fn from_values(
        index_map: Arc<IndexMap>,
        bs: usize,
        values: Vec<f64>,
    ) -> Result<Self, MpcError> {
        let n = (index_map.size_local() + index_map.num_ghosts()) * bs;
        if values.len() != n {
            return Err(MpcError::DimensionMismatch {
                context: "GhostedVector values",
                expected: n,
                found: values.len(),
            });
        }
        Ok(Self {
            index_map,
            bs,
            values,
        })
    }

    pub fn index_map(&self) -> &Arc<IndexMap> {
        &self.index_map
    }

    pub fn bs(&self) -> usize {
        self.bs
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn owned(&self) -> &[f64] {
        &self.values[..self.index_map.size_local() * self.bs]
    }

    pub fn owned_mut(&mut self) -> &mut [f64] {
        let n = self.index_map.size_local() * self.bs;
        &mut self.values[..n]
    }

    /// Local scalar index of global DOF `dof`, if owned or ghosted here.
    pub fn local_index(&self, dof: u64) -> Option<usize> {
        let bs = self.bs as u64;
        self.index_map
            .global_to_local(dof / bs)
            .map(|b| b * self.bs + (dof % bs) as usize)
    }

    pub fn get_global(&self, dof: u64) -> Option<f64> {
        self.local_index(dof).map(|i| self.values[i])
    }

    pub fn set(&mut self, value: f64) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn zero_ghosts(&mut self) {
        let n = self.index_map.size_local() * self.bs;
        self.values[n..].iter_mut().for_each(|v| *v = 0.0);
    }

    /// Refresh ghost entries from their owners.
    pub fn scatter_forward<C: Communicator>(&mut self, comm: &C) -> Result<(), MpcError> {
        self.index_map.scatter_forward(comm, &mut self.values, self.bs)
    }

    /// Add ghost entries into their owners, then zero the ghosts.
    pub fn scatter_reverse_add<C: Communicator>(&mut self, comm: &C) -> Result<(), MpcError> {
        self.index_map
            .scatter_reverse_add(comm, &mut self.values, self.bs)?;
        self.zero_ghosts();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    #[test]
    fn serial_layout() {
        let mut v = GhostedVector::new(Arc::new(IndexMap::serial(2)), 3);
        assert_eq!(v.len(), 6);
        v.owned_mut()[4] = 2.5;
        assert_eq!(v.get_global(4), Some(2.5));
        assert_eq!(v.get_global(6), None);
        v.scatter_forward(&NoComm).unwrap();
        v.scatter_reverse_add(&NoComm).unwrap();
        assert_eq!(v.values()[4], 2.5);
        assert!(GhostedVector::from_values(Arc::new(IndexMap::serial(2)), 1, vec![0.0]).is_err());
    }
}
