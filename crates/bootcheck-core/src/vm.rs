//! KubeVirt resource model.
//!
//! Only the subset of `VirtualMachine` and `VirtualMachineInstance` that
//! verification reads or writes is modelled. Unknown fields returned by the
//! cluster are ignored on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API version of the KubeVirt core group.
pub const KUBEVIRT_API_VERSION: &str = "kubevirt.io/v1";

/// Name of the disk/volume carrying the image under test.
pub const CONTAINER_DISK_NAME: &str = "containerdisk";

/// Name of the disk/volume carrying guest-init data.
pub const CLOUD_INIT_DISK_NAME: &str = "cloudinitdisk";

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name.
    pub name: String,
    /// Namespace, filled in by the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A KubeVirt `VirtualMachine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    /// API version.
    pub api_version: String,
    /// Resource kind.
    pub kind: String,
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: VirtualMachineSpec,
    /// Observed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VirtualMachineStatus>,
}

/// Desired state of a `VirtualMachine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Whether the VM should be running.
    #[serde(default)]
    pub running: bool,
    /// Template for the instance.
    pub template: InstanceTemplate,
}

/// Template for a `VirtualMachineInstance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    /// Template metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,
    /// Instance spec.
    pub spec: InstanceSpec,
}

/// Instance spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Domain (hardware) spec.
    pub domain: DomainSpec,
    /// Volumes backing the domain's disks.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Grace period for instance termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Domain spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// CPU topology.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,
    /// Resource requests.
    #[serde(default)]
    pub resources: Resources,
    /// Devices.
    #[serde(default)]
    pub devices: Devices,
}

/// CPU topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    /// Number of cores.
    pub cores: u32,
}

/// Resource requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Requested quantities, e.g. `memory: 1Gi`.
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

/// Devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Devices {
    /// Disks.
    #[serde(default)]
    pub disks: Vec<Disk>,
    /// Entropy device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng: Option<serde_json::Value>,
}

/// A disk attached to the domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk name, matching a volume.
    pub name: String,
    /// Disk target.
    pub disk: DiskTarget,
}

/// Disk target bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskTarget {
    /// Bus type (`virtio`, `sata`, `scsi`).
    pub bus: String,
}

/// A volume backing a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Volume source.
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// Volume sources used by verification VMs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeSource {
    /// Disk image packaged in a container image.
    #[serde(rename = "containerDisk")]
    ContainerDisk {
        /// Image reference.
        image: String,
    },
    /// NoCloud guest-init data.
    #[serde(rename = "cloudInitNoCloud")]
    CloudInitNoCloud {
        /// Rendered user data.
        #[serde(rename = "userData")]
        user_data: String,
    },
}

/// Observed state of a `VirtualMachine`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// True once the instance is running and ready.
    #[serde(default)]
    pub ready: bool,
    /// Human readable status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

impl VirtualMachine {
    /// Creates a VM that boots `image` from a container disk and receives
    /// `user_data` through a NoCloud volume.
    #[must_use]
    pub fn with_container_disk(name: &str, image: &str, user_data: &str) -> Self {
        Self {
            api_version: KUBEVIRT_API_VERSION.to_string(),
            kind: "VirtualMachine".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: VirtualMachineSpec {
                running: true,
                template: InstanceTemplate {
                    metadata: None,
                    spec: InstanceSpec {
                        domain: DomainSpec {
                            cpu: None,
                            resources: Resources::default(),
                            devices: Devices {
                                disks: vec![
                                    Disk::virtio(CONTAINER_DISK_NAME),
                                    Disk::virtio(CLOUD_INIT_DISK_NAME),
                                ],
                                rng: Some(serde_json::json!({})),
                            },
                        },
                        volumes: vec![
                            Volume {
                                name: CONTAINER_DISK_NAME.to_string(),
                                source: VolumeSource::ContainerDisk {
                                    image: image.to_string(),
                                },
                            },
                            Volume {
                                name: CLOUD_INIT_DISK_NAME.to_string(),
                                source: VolumeSource::CloudInitNoCloud {
                                    user_data: user_data.to_string(),
                                },
                            },
                        ],
                        termination_grace_period_seconds: Some(0),
                    },
                },
            },
            status: None,
        }
    }

    /// Returns the VM name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if the cluster reports the VM as ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Returns the container disk image, if any.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .volumes
            .iter()
            .find_map(|v| match &v.source {
                VolumeSource::ContainerDisk { image } => Some(image.as_str()),
                VolumeSource::CloudInitNoCloud { .. } => None,
            })
    }

    /// Returns the NoCloud user data, if any.
    #[must_use]
    pub fn user_data(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .volumes
            .iter()
            .find_map(|v| match &v.source {
                VolumeSource::CloudInitNoCloud { user_data } => Some(user_data.as_str()),
                VolumeSource::ContainerDisk { .. } => None,
            })
    }
}

impl Disk {
    /// Creates a virtio disk.
    #[must_use]
    pub fn virtio(name: &str) -> Self {
        Self {
            name: name.to_string(),
            disk: DiskTarget {
                bus: "virtio".to_string(),
            },
        }
    }
}

/// A KubeVirt `VirtualMachineInstance`: the runtime handle of a running VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstance {
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Observed state.
    #[serde(default)]
    pub status: InstanceStatus,
}

/// Observed state of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Lifecycle phase (`Scheduling`, `Running`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Network interfaces reported by the guest.
    #[serde(default)]
    pub interfaces: Vec<InstanceInterface>,
}

/// Network interface reported for an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInterface {
    /// Interface name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Primary IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl VirtualMachineInstance {
    /// Returns the instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the first reported interface IP.
    #[must_use]
    pub fn ip_address(&self) -> Option<&str> {
        self.status
            .interfaces
            .iter()
            .find_map(|i| i.ip_address.as_deref().filter(|ip| !ip.is_empty()))
    }
}
