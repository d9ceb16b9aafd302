//! Well-known mechanism families and their parameter keys.

use crate::MechanismType;

/// Kernel network interface mechanism family.
pub const KERNEL: &str = "KERNEL";

/// Device passthrough (VFIO) mechanism family.
pub const VFIO: &str = "VFIO";

/// Kernel: name of the interface to create in the client's namespace.
pub const INTERFACE_NAME: &str = "name";

/// Kernel: URL of the client's network namespace.
pub const NETNS_INODE_URL: &str = "inodeURL";

/// VFIO: cgroup directory the device must be permitted in.
pub const CGROUP_DIR: &str = "cgroupDir";

/// Any family: device token allocated from an SR-IOV pool.
pub const TOKEN_ID: &str = "tokenID";

/// Label naming the SR-IOV token pool a request draws from.
pub const SRIOV_TOKEN_LABEL: &str = "sriovToken";

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Returns the [`MechanismType`] for the kernel family.
pub fn kernel() -> MechanismType {
    MechanismType::from_canonical(KERNEL)
}

/// Returns the [`MechanismType`] for the vfio family.
pub fn vfio() -> MechanismType {
    MechanismType::from_canonical(VFIO)
}
