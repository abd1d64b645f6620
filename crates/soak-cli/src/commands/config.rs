use std::path::Path;

const SAMPLE_CONFIG: &str = r#"# Agent soak test configuration

cloud_provider:
  aws:
    access_key: { env: AWS_ACCESS_KEY_ID }
    secret_access_key: { env: AWS_SECRET_ACCESS_KEY }
    region: us-west-2
    resource_type: ec2
    keypair: soak-test-key
    image_id: ami-0123456789abcdef0
    instance_type: t2.medium
    volume_size: 20
    min: 1
    max: 1
    username: ubuntu
    terminate: true
    tags:
      Name: signalfx-agent-soak

instance_wait_time: 120
bootstrap_script: soak-addon.sh
# command_timeout_secs: 3600
# teardown_on_abort: false
jobs:
  - build
  - test
"#;

pub fn run(config_path: &Path, path: bool, init: bool) -> anyhow::Result<()> {
    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if write_sample(config_path)? {
            println!("Sample config written to: {}", config_path.display());
        } else {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
        }
        return Ok(());
    }

    println!("Config path: {}", config_path.display());
    if config_path.exists() {
        println!("Status:      present");
        println!("Run `soak-test check` to validate it.");
    } else {
        println!("Status:      not found");
        println!("Run `soak-test config --init` to create one.");
    }
    Ok(())
}

/// Write the sample config unless a file is already there.
fn write_sample(config_path: &Path) -> anyhow::Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, SAMPLE_CONFIG)?;
    Ok(true)
}
