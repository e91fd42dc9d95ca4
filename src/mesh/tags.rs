//! Integer markers on mesh facets.

use crate::mesh::Mesh;

/// Sorted facet indices with one marker value each.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshTags {
    indices: Vec<usize>,
    values: Vec<i32>,
}

impl MeshTags {
    /// Build from unsorted `(facet, value)` pairs; a later pair for the same
    /// facet overrides an earlier one.
    pub fn new(pairs: impl IntoIterator<Item = (usize, i32)>) -> Self {
        let mut pairs: Vec<(usize, i32)> = pairs.into_iter().collect();
        pairs.reverse();
        pairs.sort_by_key(|&(f, _)| f);
        pairs.dedup_by_key(|&mut (f, _)| f);
        let (indices, values) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Mark with `value` every exterior facet whose vertices all satisfy `on`.
    pub fn locate_facets(mesh: &Mesh, value: i32, on: impl Fn(&[f64; 3]) -> bool) -> Self {
        let x = mesh.coordinates();
        let found = mesh.facets().iter().enumerate().filter_map(|(i, f)| {
            (f.is_exterior() && f.vertices.iter().all(|&v| on(&x[v]))).then_some((i, value))
        });
        Self::new(found)
    }

    /// Union of two tag sets; `other` wins on conflicts.
    pub fn merge(&self, other: &MeshTags) -> Self {
        Self::new(self.iter().chain(other.iter()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, i32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Facets carrying `value`, ascending.
    pub fn find(&self, value: i32) -> Vec<usize> {
        self.iter()
            .filter_map(|(f, v)| (v == value).then_some(f))
            .collect()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation::create_rectangle;

    #[test]
    fn locate_left_and_right_sides() {
        let mesh = create_rectangle([0.0, 0.0], [1.0, 1.0], 2, 2).unwrap();
        let left = MeshTags::locate_facets(&mesh, 1, |x| x[0].abs() < 1e-12);
        let right = MeshTags::locate_facets(&mesh, 2, |x| (x[0] - 1.0).abs() < 1e-12);
        let tags = left.merge(&right);
        assert_eq!(tags.find(1).len(), 2);
        assert_eq!(tags.find(2).len(), 2);
        for f in tags.find(2) {
            assert!((mesh.facet_midpoint(f)[0] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn later_value_overrides() {
        let tags = MeshTags::new([(3, 1), (1, 5), (3, 7)]);
        assert_eq!(tags.indices(), &[1, 3]);
        assert_eq!(tags.values(), &[5, 7]);
    }
}
