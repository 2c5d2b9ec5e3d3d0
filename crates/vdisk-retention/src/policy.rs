//! Effective retention policy of a vDisk

use serde::Serialize;
use vdisk_common::RetentionPolicy;
use vdisk_model::{VDisk, VPool};

/// Where the effective policy of a vDisk came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    VDisk,
    VPool,
    Default,
}

/// Pick the vDisk override, then the vPool override, then `default`
#[must_use]
pub fn resolve_policy<'a>(
    vdisk: &'a VDisk,
    vpool: &'a VPool,
    default: &'a RetentionPolicy,
) -> (&'a RetentionPolicy, PolicySource) {
    if let Some(policy) = &vdisk.snapshot_retention_policy {
        (policy, PolicySource::VDisk)
    } else if let Some(policy) = &vpool.snapshot_retention_policy {
        (policy, PolicySource::VPool)
    } else {
        (default, PolicySource::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_common::RetentionRule;

    #[test]
    fn test_resolution_order() {
        let default = RetentionPolicy::default();
        let pool_policy = RetentionPolicy::new(vec![RetentionRule::new(2, 2)]);
        let disk_policy = RetentionPolicy::new(vec![RetentionRule::new(1, 1)]);

        let mut vpool = VPool::new("vp");
        let mut vdisk = VDisk::new("vd", "vp", "sd");
        assert_eq!(
            resolve_policy(&vdisk, &vpool, &default),
            (&default, PolicySource::Default)
        );

        vpool.snapshot_retention_policy = Some(pool_policy.clone());
        assert_eq!(
            resolve_policy(&vdisk, &vpool, &default),
            (&pool_policy, PolicySource::VPool)
        );

        vdisk.snapshot_retention_policy = Some(disk_policy.clone());
        assert_eq!(
            resolve_policy(&vdisk, &vpool, &default),
            (&disk_policy, PolicySource::VDisk)
        );
    }
}
