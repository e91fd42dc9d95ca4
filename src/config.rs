//! Tunables for constraint construction and constrained assembly.

use serde::{Deserialize, Serialize};

/// What to do when one slave ends up with the same master twice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterMergePolicy {
    /// Reject the relation with [`MpcError::RedundantMaster`](crate::mpc_error::MpcError).
    #[default]
    Error,
    /// Sum the coefficients into a single master entry.
    Sum,
}

/// Configuration shared by the constraint builders, consolidation and assembly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    /// Coefficients with magnitude below this value are dropped from a relation.
    pub coefficient_tolerance: f64,
    /// Tolerance on reference coordinates when testing point-in-cell.
    pub point_tolerance: f64,
    /// Absolute padding added to every cell and partition bounding box.
    pub bbox_padding: f64,
    /// Value inserted on the diagonal of slave and Dirichlet rows.
    pub diagonal_value: f64,
    /// Duplicate-master handling during consolidation and `add_masters`.
    pub merge_policy: MasterMergePolicy,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            coefficient_tolerance: 1e-10,
            point_tolerance: 1e-10,
            bbox_padding: 1e-8,
            diagonal_value: 1.0,
            merge_policy: MasterMergePolicy::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: MpcConfig =
            serde_json::from_str(r#"{ "merge_policy": "sum", "diagonal_value": 2.5 }"#).unwrap();
        assert_eq!(cfg.merge_policy, MasterMergePolicy::Sum);
        assert_eq!(cfg.diagonal_value, 2.5);
        assert_eq!(cfg.coefficient_tolerance, MpcConfig::default().coefficient_tolerance);
    }
}
