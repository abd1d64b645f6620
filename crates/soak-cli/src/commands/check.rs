use anyhow::Context;
use soak_core::config::{redact, Config, ConfigSource, Provider};

/// Load and validate the config, then print it with secrets redacted.
pub fn run(source: &ConfigSource) -> anyhow::Result<()> {
    let config = source
        .load()
        .with_context(|| format!("loading {}", source.path().display()))?;
    println!("Config path: {}", source.path().display());
    print!("{}", summary(&config));
    if let Provider::Unsupported(name) = &config.provider {
        anyhow::bail!("unsupported cloud provider '{}'", name);
    }
    Ok(())
}

fn summary(config: &Config) -> String {
    let mut out = String::new();
    out.push_str(&format!("Provider:    {}\n", config.provider.name()));
    if let Provider::Aws(aws) = &config.provider {
        out.push_str(&format!("Region:      {}\n", aws.region));
        out.push_str(&format!("Access key:  {}\n", redact(&aws.credentials.access_key_id)));
        out.push_str(&format!("Key pair:    {}\n", aws.keypair));
        out.push_str(&format!(
            "Instances:   {}..{} x {} ({}, {} GiB)\n",
            aws.min, aws.max, aws.instance_type, aws.image_id, aws.volume_size
        ));
        out.push_str(&format!("Username:    {}\n", aws.username));
        out.push_str(&format!("Terminate:   {}\n", aws.terminate));
    }
    out.push_str(&format!("Wait:        {}s\n", config.instance_wait_time.as_secs()));
    out.push_str(&format!("Bootstrap:   {}\n", config.bootstrap_script.display()));
    match config.command_timeout {
        Some(t) => out.push_str(&format!("Timeout:     {}s\n", t.as_secs())),
        None => out.push_str("Timeout:     none\n"),
    }
    out.push_str(&format!("Jobs:        {}\n", config.jobs.join(", ")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_never_prints_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("soak-config.yaml");
        std::fs::write(
            &path,
            r#"
cloud_provider:
  aws:
    access_key: AKIAABCDEFGH1234
    secret_access_key: very-secret-value
    region: us-west-2
    keypair: soak
    image_id: ami-1
    instance_type: t2.medium
    username: ubuntu
jobs: [build]
"#,
        )
        .unwrap();

        let config = ConfigSource::new(&path).load().unwrap();
        let text = summary(&config);
        assert!(text.contains("****1234"));
        assert!(!text.contains("AKIAABCDEFGH1234"));
        assert!(!text.contains("very-secret-value"));
        assert!(text.contains("Jobs:        build"));
    }
}
