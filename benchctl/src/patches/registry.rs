use crate::patches::runner::Patch;
use crate::patches::{v3, v5};

/// Canonical patch order. Append only.
pub fn shipped_patches() -> Vec<Box<dyn Patch>> {
    vec![
        Box::new(v3::DeprecateOldConfig),
        Box::new(v5::UpdateSiteLogging),
        Box::new(v5::UpdateArchivedSites),
    ]
}
