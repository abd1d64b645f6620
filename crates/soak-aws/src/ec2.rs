use crate::error::{classify_sdk_error, error_code, INSTANCE_NOT_FOUND, KEY_PAIR_DUPLICATE};
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::{Credentials as AwsCredentials, Region};
use aws_sdk_ec2::types::{
    BlockDeviceMapping, EbsBlockDevice, Filter, InstanceType, ResourceType, Tag,
    TagSpecification, VolumeType,
};
use aws_sdk_ec2::Client;
use soak_core::{
    Credentials, GeneratedKey, Instance, InstanceSet, InstanceState, KeyMaterial, LaunchSpec,
    Provisioner, SoakError,
};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SUPPORTED_RESOURCE_TYPE: &str = "ec2";
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Provisions EC2 instances and key pairs.
#[derive(Debug, Clone)]
pub struct Ec2Provisioner {
    ready_timeout: Duration,
    poll_interval: Duration,
}

/// A credentialed EC2 client for one region.
#[derive(Debug, Clone)]
pub struct Ec2Session {
    client: Client,
    region: String,
}

impl Ec2Session {
    pub fn region(&self) -> &str {
        &self.region
    }
}

impl Ec2Provisioner {
    /// Provisioner for the configured resource type. Only "ec2" exists.
    pub fn for_resource_type(resource_type: &str) -> Result<Self, SoakError> {
        if !resource_type.eq_ignore_ascii_case(SUPPORTED_RESOURCE_TYPE) {
            return Err(SoakError::Config(format!(
                "unsupported aws resource_type '{}', expected '{}'",
                resource_type, SUPPORTED_RESOURCE_TYPE
            )));
        }
        Ok(Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Upper bound on waiting for instances to run and get hostnames.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current state of each instance id EC2 knows about.
    async fn describe_states(
        &self,
        session: &Ec2Session,
        ids: &[String],
    ) -> Result<Option<HashMap<String, InstanceState>>, SoakError> {
        let result = session
            .client
            .describe_instances()
            .set_instance_ids(Some(ids.to_vec()))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            // Freshly launched ids can lag behind in describe calls.
            Err(e) if error_code(&e) == Some(INSTANCE_NOT_FOUND) => return Ok(None),
            Err(e) => return Err(classify_sdk_error("DescribeInstances", e)),
        };

        let mut states = HashMap::new();
        for reservation in output.reservations() {
            for instance in reservation.instances() {
                if let Some(id) = instance.instance_id() {
                    let state = instance
                        .state()
                        .and_then(|s| s.name())
                        .map(|name| InstanceState::from_provider(name.as_str()))
                        .unwrap_or(InstanceState::Unknown);
                    states.insert(id.to_string(), state);
                }
            }
        }
        Ok(Some(states))
    }

    async fn poll_until_running(
        &self,
        session: &Ec2Session,
        ids: &[String],
    ) -> Result<Vec<Instance>, SoakError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Some(states) = self.describe_states(session, ids).await? {
                match readiness(ids, &states) {
                    Readiness::Ready(instances) => return Ok(instances),
                    Readiness::Failed(reason) => return Err(SoakError::Provision(reason)),
                    Readiness::Waiting(pending) => {
                        debug!("Waiting for instances to run: {:?}", pending)
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(SoakError::Timeout(format!(
                    "instances {:?} not running after {}s",
                    ids,
                    self.ready_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Public DNS names keyed by instance id, skipping ids without one yet.
    async fn describe_hostnames(
        &self,
        session: &Ec2Session,
        ids: &[String],
    ) -> Result<HashMap<String, String>, SoakError> {
        let output = session
            .client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-id")
                    .set_values(Some(ids.to_vec()))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_sdk_error("DescribeInstances", e))?;

        let mut hostnames = HashMap::new();
        for reservation in output.reservations() {
            for instance in reservation.instances() {
                if let (Some(id), Some(dns)) =
                    (instance.instance_id(), instance.public_dns_name())
                {
                    if !dns.is_empty() {
                        hostnames.insert(id.to_string(), dns.to_string());
                    }
                }
            }
        }
        Ok(hostnames)
    }
}

#[async_trait::async_trait]
impl Provisioner for Ec2Provisioner {
    type Session = Ec2Session;

    fn name(&self) -> &str {
        "aws"
    }

    async fn open_session(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<Ec2Session, SoakError> {
        let provider = AwsCredentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "soak-config",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .load()
            .await;
        let client = Client::new(&sdk_config);

        // Cheap authenticated call so bad credentials fail here and not
        // halfway through provisioning.
        client
            .describe_regions()
            .region_names(region)
            .send()
            .await
            .map_err(|e| classify_sdk_error("DescribeRegions", e))?;

        info!("AWS session open in {}", region);
        Ok(Ec2Session {
            client,
            region: region.to_string(),
        })
    }

    async fn create_key_pair(
        &self,
        session: &Ec2Session,
        name: &str,
    ) -> Result<GeneratedKey, SoakError> {
        let output = session
            .client
            .create_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(|e| {
                if error_code(&e) == Some(KEY_PAIR_DUPLICATE) {
                    SoakError::Provision(format!("key pair '{}' already exists", name))
                } else {
                    classify_sdk_error("CreateKeyPair", e)
                }
            })?;

        let private_key = output
            .key_material()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                SoakError::Provision(format!("key pair '{}' returned no key material", name))
            })?;

        info!("Created key pair {}", name);
        Ok(GeneratedKey {
            name: name.to_string(),
            private_key: private_key.to_string(),
        })
    }

    async fn launch_instances(
        &self,
        session: &Ec2Session,
        spec: &LaunchSpec,
    ) -> Result<InstanceSet, SoakError> {
        let volume_size = to_i32("volume_size", spec.volume_size)?;
        let mut request = session
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .min_count(to_i32("min", spec.min_count)?)
            .max_count(to_i32("max", spec.max_count)?)
            .key_name(&spec.key_name)
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(&spec.device_name)
                    .ebs(
                        EbsBlockDevice::builder()
                            .delete_on_termination(spec.delete_volume_on_termination)
                            .volume_size(volume_size)
                            .volume_type(VolumeType::from(spec.volume_type.as_str()))
                            .build(),
                    )
                    .build(),
            );
        if !spec.tags.is_empty() {
            request = request
                .tag_specifications(tag_specification(ResourceType::Instance, &spec.tags))
                .tag_specifications(tag_specification(ResourceType::Volume, &spec.tags));
        }

        info!(
            "Launching {}..{} x {} from {}",
            spec.min_count, spec.max_count, spec.instance_type, spec.image_id
        );
        let output = request
            .send()
            .await
            .map_err(|e| classify_sdk_error("RunInstances", e))?;

        let instances: Vec<Instance> = output
            .instances()
            .iter()
            .filter_map(|i| {
                i.instance_id().map(|id| Instance {
                    id: id.to_string(),
                    state: InstanceState::Pending,
                })
            })
            .collect();
        if instances.is_empty() {
            return Err(SoakError::Provision("RunInstances returned no instances".into()));
        }

        let set = InstanceSet::new(instances);
        info!("Launched {:?}", set.ids());
        Ok(set)
    }

    async fn wait_until_running(
        &self,
        session: &Ec2Session,
        instances: &InstanceSet,
    ) -> Result<InstanceSet, SoakError> {
        let running = self.poll_until_running(session, &instances.ids()).await?;
        Ok(InstanceSet::new(running))
    }

    async fn resolve_hostnames(
        &self,
        session: &Ec2Session,
        instances: &InstanceSet,
    ) -> Result<Vec<String>, SoakError> {
        let ids = instances.ids();
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            let found = self.describe_hostnames(session, &ids).await?;
            match hostnames_in_order(&ids, &found) {
                Ok(hostnames) => {
                    info!("Resolved hostnames {:?}", hostnames);
                    return Ok(hostnames);
                }
                Err(missing) if Instant::now() >= deadline => {
                    return Err(SoakError::Timeout(format!(
                        "no public hostname for {:?} after {}s",
                        missing,
                        self.ready_timeout.as_secs()
                    )));
                }
                Err(missing) => debug!("Waiting for public hostnames: {:?}", missing),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn terminate(
        &self,
        session: &Ec2Session,
        instances: &InstanceSet,
    ) -> Result<(), SoakError> {
        let mut failures = Vec::new();
        for id in instances.ids() {
            let result = session
                .client
                .terminate_instances()
                .instance_ids(&id)
                .send()
                .await;
            match result {
                Ok(_) => info!(instance_id = %id, "Termination requested"),
                Err(e) if error_code(&e) == Some(INSTANCE_NOT_FOUND) => {
                    info!(instance_id = %id, "Instance already gone")
                }
                Err(e) => {
                    let err = classify_sdk_error("TerminateInstances", e);
                    warn!(instance_id = %id, "Termination failed: {}", err);
                    failures.push(format!("{}: {}", id, err));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SoakError::Provision(format!(
                "failed to terminate {}",
                failures.join("; ")
            )))
        }
    }

    async fn delete_key_pair(
        &self,
        session: &Ec2Session,
        key: &KeyMaterial,
    ) -> Result<(), SoakError> {
        session
            .client
            .delete_key_pair()
            .key_name(&key.name)
            .send()
            .await
            .map_err(|e| classify_sdk_error("DeleteKeyPair", e))?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Ready(Vec<Instance>),
    Waiting(Vec<String>),
    Failed(String),
}

/// Whether every id has reached running, in launch order.
fn readiness(ids: &[String], states: &HashMap<String, InstanceState>) -> Readiness {
    let instances: Vec<Instance> = ids
        .iter()
        .map(|id| Instance {
            id: id.clone(),
            state: states.get(id).copied().unwrap_or(InstanceState::Pending),
        })
        .collect();

    if let Some(gone) = instances.iter().find(|i| i.state.is_gone()) {
        return Readiness::Failed(format!(
            "instance {} went to {} before running",
            gone.id, gone.state
        ));
    }

    let pending: Vec<String> = instances
        .iter()
        .filter(|i| i.state != InstanceState::Running)
        .map(|i| i.id.clone())
        .collect();
    if pending.is_empty() {
        Readiness::Ready(instances)
    } else {
        Readiness::Waiting(pending)
    }
}

/// Hostnames in the order of `ids`, or the ids still missing one.
fn hostnames_in_order(
    ids: &[String],
    found: &HashMap<String, String>,
) -> Result<Vec<String>, Vec<String>> {
    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.contains_key(*id))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(missing);
    }
    Ok(ids.iter().map(|id| found[id].clone()).collect())
}

fn tag_specification(resource: ResourceType, tags: &BTreeMap<String, String>) -> TagSpecification {
    tags.iter()
        .fold(
            TagSpecification::builder().resource_type(resource),
            |builder, (key, value)| builder.tags(Tag::builder().key(key).value(value).build()),
        )
        .build()
}

fn to_i32(field: &str, value: u32) -> Result<i32, SoakError> {
    i32::try_from(value).map_err(|_| SoakError::Config(format!("{} {} is out of range", field, value)))
}
