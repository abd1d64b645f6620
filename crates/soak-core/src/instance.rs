use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Batch launch request: one call creates between `min_count` and
/// `max_count` instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    pub device_name: String,
    pub volume_size: u32,
    pub volume_type: String,
    pub delete_volume_on_termination: bool,
    pub min_count: u32,
    pub max_count: u32,
    pub key_name: String,
    /// Applied to both the instance and its root volume.
    pub tags: BTreeMap<String, String>,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            image_id: String::new(),
            instance_type: String::new(),
            device_name: "/dev/sda1".to_string(),
            volume_size: 20,
            volume_type: "gp2".to_string(),
            delete_volume_on_termination: true,
            min_count: 1,
            max_count: 1,
            key_name: String::new(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Unknown,
}

impl InstanceState {
    /// Parse a provider state name ("pending", "running", "shutting-down", ...).
    pub fn from_provider(name: &str) -> Self {
        match name {
            "pending" => InstanceState::Pending,
            "running" => InstanceState::Running,
            "stopping" => InstanceState::Stopping,
            "stopped" => InstanceState::Stopped,
            "shutting-down" => InstanceState::ShuttingDown,
            "terminated" => InstanceState::Terminated,
            _ => InstanceState::Unknown,
        }
    }

    /// States an instance cannot leave on its way to running.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            InstanceState::ShuttingDown | InstanceState::Terminated
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Pending => write!(f, "pending"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::ShuttingDown => write!(f, "shutting-down"),
            InstanceState::Terminated => write!(f, "terminated"),
            InstanceState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
}

/// Instances created by a single launch call, in launch order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSet {
    instances: Vec<Instance>,
}

impl InstanceSet {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }

    pub fn ids(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn all_running(&self) -> bool {
        !self.instances.is_empty()
            && self
                .instances
                .iter()
                .all(|i| i.state == InstanceState::Running)
    }
}
