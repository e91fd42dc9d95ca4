//! Fixed, versioned, little-endian wire types for the constraint exchanges.
//!
//! All multi-byte integers in these structs are **little-endian** on the wire.
//! Floats travel as their IEEE bit pattern, also little-endian.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Maximum number of vertices of a supported cell (tetrahedron).
pub const MAX_CELL_NODES: usize = 4;

/// Operation codes carried in [`WireHdr::kind`]; a mismatch means two ranks
/// entered different collectives.
pub mod kind {
    pub const GATHER: u16 = 1;
    pub const FLAGS: u16 = 2;
    pub const GHOST_REQUEST: u16 = 3;
    pub const SCATTER_FORWARD: u16 = 4;
    pub const SCATTER_REVERSE: u16 = 5;
    pub const MATCH_QUERY: u16 = 6;
    pub const MATCH_REPLY: u16 = 7;
    pub const SLAVE_QUERY: u16 = 8;
    pub const SLAVE_REPLY: u16 = 9;
    pub const GHOST_SLAVES: u16 = 10;
    pub const PATTERN_ROWS: u16 = 11;
    pub const MATRIX_ROWS: u16 = 12;
}

#[inline]
fn f64_to_wire(x: f64) -> u64 {
    x.to_bits().to_le()
}

#[inline]
fn f64_from_wire(w: u64) -> f64 {
    f64::from_bits(u64::from_le(w))
}

/// Header sent to every peer before the payload of a collective.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub count_le: u32, // number of payload records that follow
}

impl WireHdr {
    pub fn new(kind: u16, count: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            count_le: (count as u32).to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
}

/// A bare global index.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireIndex {
    pub value_le: u64,
}

impl WireIndex {
    pub fn of(value: u64) -> Self {
        Self {
            value_le: value.to_le(),
        }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.value_le)
    }
}

/// A single scalar value.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireValue {
    pub bits_le: u64,
}

impl WireValue {
    pub fn of(value: f64) -> Self {
        Self {
            bits_le: f64_to_wire(value),
        }
    }
    pub fn get(&self) -> f64 {
        f64_from_wire(self.bits_le)
    }
}

/// A `(row, col)` sparsity entry in global numbering.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePair {
    pub row_le: u64,
    pub col_le: u64,
}

impl WirePair {
    pub fn new(row: u64, col: u64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
}

/// A `(row, col, value)` matrix contribution in global numbering.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub value_le: u64,
}

impl WireEntry {
    pub fn new(row: u64, col: u64, value: f64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
            value_le: f64_to_wire(value),
        }
    }
    pub fn row(&self) -> u64 {
        u64::from_le(self.row_le)
    }
    pub fn col(&self) -> u64 {
        u64::from_le(self.col_le)
    }
    pub fn value(&self) -> f64 {
        f64_from_wire(self.value_le)
    }
}

/// A point query sent to a remote partition by the geometric matcher.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireQuery {
    pub id_le: u64,
    pub x_le: [u64; 3],
}

impl WireQuery {
    pub fn new(id: usize, x: [f64; 3]) -> Self {
        Self {
            id_le: (id as u64).to_le(),
            x_le: x.map(f64_to_wire),
        }
    }
    pub fn id(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
    pub fn point(&self) -> [f64; 3] {
        self.x_le.map(f64_from_wire)
    }
}

/// Authoritative answer to a [`WireQuery`]: the hit cell with everything the
/// querying rank needs to build coefficients without the remote geometry.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHit {
    pub id_le: u64,
    pub cell_le: u64,
    pub nodes_le: u64,
    pub blocks_le: [u64; MAX_CELL_NODES],
    pub owners_le: [u64; MAX_CELL_NODES],
    pub basis_le: [u64; MAX_CELL_NODES],
}

impl WireHit {
    pub fn new(id: usize, cell: usize, blocks: &[u64], owners: &[usize], basis: &[f64]) -> Self {
        let mut hit = Self::zeroed();
        hit.id_le = (id as u64).to_le();
        hit.cell_le = (cell as u64).to_le();
        hit.nodes_le = (blocks.len() as u64).to_le();
        for (i, ((&b, &o), &phi)) in blocks.iter().zip(owners).zip(basis).enumerate() {
            hit.blocks_le[i] = b.to_le();
            hit.owners_le[i] = (o as u64).to_le();
            hit.basis_le[i] = f64_to_wire(phi);
        }
        hit
    }
    pub fn id(&self) -> usize {
        u64::from_le(self.id_le) as usize
    }
    pub fn cell(&self) -> usize {
        u64::from_le(self.cell_le) as usize
    }
    pub fn num_nodes(&self) -> usize {
        (u64::from_le(self.nodes_le) as usize).min(MAX_CELL_NODES)
    }
    pub fn blocks(&self) -> Vec<u64> {
        self.blocks_le[..self.num_nodes()]
            .iter()
            .map(|&b| u64::from_le(b))
            .collect()
    }
    pub fn owners(&self) -> Vec<usize> {
        self.owners_le[..self.num_nodes()]
            .iter()
            .map(|&o| u64::from_le(o) as usize)
            .collect()
    }
    pub fn basis(&self) -> Vec<f64> {
        self.basis_le[..self.num_nodes()]
            .iter()
            .map(|&w| f64_from_wire(w))
            .collect()
    }
}

/// One `(slave, master, owner, coefficient)` term of a relation.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMaster {
    pub slave_le: u64,
    pub master_le: u64,
    pub owner_le: u64,
    pub coeff_le: u64,
}

impl WireMaster {
    pub fn new(slave: u64, master: u64, owner: usize, coeff: f64) -> Self {
        Self {
            slave_le: slave.to_le(),
            master_le: master.to_le(),
            owner_le: (owner as u64).to_le(),
            coeff_le: f64_to_wire(coeff),
        }
    }
    pub fn slave(&self) -> u64 {
        u64::from_le(self.slave_le)
    }
    pub fn master(&self) -> u64 {
        u64::from_le(self.master_le)
    }
    pub fn owner(&self) -> usize {
        u64::from_le(self.owner_le) as usize
    }
    pub fn coeff(&self) -> f64 {
        f64_from_wire(self.coeff_le)
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireIndex>(), 8);
const_assert_eq!(size_of::<WirePair>(), 16);
const_assert_eq!(size_of::<WireEntry>(), 24);
const_assert_eq!(size_of::<WireQuery>(), 32);
const_assert_eq!(size_of::<WireHit>(), 24 + 3 * 8 * MAX_CELL_NODES);
const_assert_eq!(size_of::<WireMaster>(), 32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_keeps_only_the_used_nodes() {
        let hit = WireHit::new(3, 7, &[10, 11], &[0, 1], &[0.25, 0.75]);
        assert_eq!(hit.id(), 3);
        assert_eq!(hit.cell(), 7);
        assert_eq!(hit.blocks(), vec![10, 11]);
        assert_eq!(hit.owners(), vec![0, 1]);
        assert_eq!(hit.basis(), vec![0.25, 0.75]);
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let hdr = WireHdr::new(kind::MATCH_QUERY, 258);
        let bytes = bytemuck::bytes_of(&hdr);
        assert_eq!(&bytes[4..8], &[2, 1, 0, 0]);
        assert_eq!(hdr.version(), WIRE_VERSION);
    }
}
