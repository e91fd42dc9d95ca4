//! Flat slave/master relation produced by the constraint builders.

use serde::{Deserialize, Serialize};

use crate::mpc_error::MpcError;

/// CSR snapshot of `slave -> [(master, coefficient, owner)]`.
///
/// Slaves are local scalar DOFs of the producing rank; masters are global
/// scalar DOFs with the rank that owns them. Relation `i` occupies
/// `offsets[i]..offsets[i + 1]` of the three master arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MpcData {
    slaves: Vec<usize>,
    masters: Vec<u64>,
    coeffs: Vec<f64>,
    owners: Vec<usize>,
    offsets: Vec<usize>,
}

impl Default for MpcData {
    fn default() -> Self {
        Self::new()
    }
}

impl MpcData {
    pub fn new() -> Self {
        Self {
            slaves: Vec::new(),
            masters: Vec::new(),
            coeffs: Vec::new(),
            owners: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Build from raw arrays, checking their shape.
    pub fn from_parts(
        slaves: Vec<usize>,
        masters: Vec<u64>,
        coeffs: Vec<f64>,
        owners: Vec<usize>,
        offsets: Vec<usize>,
    ) -> Result<Self, MpcError> {
        let data = Self {
            slaves,
            masters,
            coeffs,
            owners,
            offsets,
        };
        data.validate()?;
        Ok(data)
    }

    /// Append one relation.
    pub fn push(&mut self, slave: usize, terms: impl IntoIterator<Item = (u64, f64, usize)>) {
        self.slaves.push(slave);
        for (m, c, o) in terms {
            self.masters.push(m);
            self.coeffs.push(c);
            self.owners.push(o);
        }
        self.offsets.push(self.masters.len());
    }

    /// Concatenate another fragment after this one.
    pub fn append(&mut self, other: &MpcData) {
        for i in 0..other.num_slaves() {
            self.push(other.slaves[i], other.relation(i));
        }
    }

    /// Offsets start at zero, never decrease, end at the master count, and
    /// every slave has at least one master.
    pub fn validate(&self) -> Result<(), MpcError> {
        let n = self.masters.len();
        if self.coeffs.len() != n || self.owners.len() != n {
            return Err(MpcError::MalformedData(format!(
                "{n} masters but {} coefficients and {} owners",
                self.coeffs.len(),
                self.owners.len()
            )));
        }
        if self.offsets.len() != self.slaves.len() + 1 {
            return Err(MpcError::MalformedData(format!(
                "{} offsets for {} slaves",
                self.offsets.len(),
                self.slaves.len()
            )));
        }
        if self.offsets[0] != 0 || self.offsets[self.slaves.len()] != n {
            return Err(MpcError::MalformedData(
                "offsets must start at 0 and end at the number of masters".into(),
            ));
        }
        if let Some(i) = self.offsets.windows(2).position(|w| w[1] <= w[0]) {
            return Err(MpcError::MalformedData(format!(
                "slave {} has no masters",
                self.slaves[i]
            )));
        }
        Ok(())
    }

    pub fn num_slaves(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    /// Terms of relation `i`.
    pub fn relation(&self, i: usize) -> impl Iterator<Item = (u64, f64, usize)> + '_ {
        let range = self.offsets[i]..self.offsets[i + 1];
        self.masters[range.clone()]
            .iter()
            .copied()
            .zip(self.coeffs[range.clone()].iter().copied())
            .zip(self.owners[range].iter().copied())
            .map(|((m, c), o)| (m, c, o))
    }

    pub fn slaves(&self) -> &[usize] {
        &self.slaves
    }

    pub fn masters(&self) -> &[u64] {
        &self.masters
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_csr_layout() {
        let mut a = MpcData::new();
        a.push(3, [(0, 1.0, 0)]);
        let mut b = MpcData::new();
        b.push(5, [(1, 0.5, 0), (2, 0.5, 1)]);
        a.append(&b);
        assert_eq!(a.slaves(), &[3, 5]);
        assert_eq!(a.offsets(), &[0, 1, 3]);
        assert_eq!(a.owners(), &[0, 0, 1]);
        a.validate().unwrap();
        let rel: Vec<_> = a.relation(1).collect();
        assert_eq!(rel, vec![(1, 0.5, 0), (2, 0.5, 1)]);
    }

    #[test]
    fn empty_relation_is_malformed() {
        let bad = MpcData::from_parts(vec![1], vec![], vec![], vec![], vec![0, 0]);
        assert!(matches!(bad, Err(MpcError::MalformedData(_))));
        let bad = MpcData::from_parts(vec![1], vec![0], vec![1.0], vec![], vec![0, 1]);
        assert!(matches!(bad, Err(MpcError::MalformedData(_))));
    }

    #[test]
    fn serde_round_trip() {
        let mut a = MpcData::new();
        a.push(2, [(7, -1.5, 1)]);
        let json = serde_json::to_string(&a).unwrap();
        let back: MpcData = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
