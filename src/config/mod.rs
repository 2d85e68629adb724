pub mod types;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl RuntimeConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used so the runtime can start with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: RuntimeConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            RuntimeConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("loaded runtime configuration");
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SVCRT_CONSUL_ADDRESS") {
            self.consul.address = v;
        }
        if let Ok(v) = std::env::var("SVCRT_CONSUL_DATACENTER") {
            self.consul.datacenter = Some(v);
        }
        if let Ok(v) = std::env::var("SVCRT_CONSUL_TOKEN") {
            self.consul.token = Some(v);
        }
        if let Ok(v) = std::env::var("SVCRT_RING_VNODES") {
            if let Ok(n) = v.parse::<i64>() {
                self.ring.vnodes = n;
            }
        }
        if let Ok(v) = std::env::var("SVCRT_ADMIN_LISTEN") {
            self.admin.listen = v;
        }
        if let Ok(v) = std::env::var("SVCRT_GATE_INITIALLY_OPEN") {
            self.gate.initially_open = v == "true" || v == "1";
        }
    }

    /// Reject configurations that would yield `ServiceError::Incomplete`:
    /// an environment with neither watches to observe nor registrations to
    /// advertise has nothing to do.
    pub fn validate(&self) -> Result<()> {
        if self.watches.is_empty() && self.registrations.is_empty() {
            anyhow::bail!("incomplete configuration: no watches or registrations configured");
        }
        if self.ring.vnodes < 0 {
            anyhow::bail!("ring.vnodes must be non-negative");
        }
        for reg in &self.registrations {
            for check in &reg.checks {
                humantime::parse_duration(&check.ttl)
                    .map_err(|e| anyhow::anyhow!("invalid ttl {:?}: {e}", check.ttl))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_configuration() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_a_single_watch() {
        let mut cfg = RuntimeConfig::default();
        cfg.watches.push(WatchConfig {
            service: "payments".to_string(),
            tag: None,
            other_tags: vec![],
            passing_only: true,
            datacenter: None,
            cross_dc: false,
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_malformed_ttl() {
        let mut cfg = RuntimeConfig::default();
        cfg.registrations.push(RegistrationConfig {
            id: None,
            name: "svc".to_string(),
            address: "10.0.0.1".to_string(),
            port: 8080,
            tags: vec![],
            checks: vec![TtlCheckConfig {
                id: None,
                ttl: "not-a-duration".to_string(),
                notes: None,
            }],
        });
        assert!(cfg.validate().is_err());
    }
}
