//! Delta calculator.

use storepush_core::{ArtifactId, Delta, Snapshot};

/// `current \ baseline`, keeping the order of `current`.
pub fn compute(current: &[ArtifactId], baseline: &Snapshot) -> Delta {
    Delta::new(
        current
            .iter()
            .filter(|id| !baseline.contains(id))
            .cloned()
            .collect(),
    )
}
