use serde::Deserialize;

const HOST_VAR: &str = "FILLER_METRICS_HOST";
const PORT_VAR: &str = "FILLER_METRICS_PORT";

/// Where the Prometheus endpoint listens
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9464
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl MetricsConfig {
    /// `FILLER_METRICS_HOST` and `FILLER_METRICS_PORT`, falling back to the
    /// defaults when unset or unparsable
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var(HOST_VAR)
                .ok()
                .filter(|host| !host.is_empty())
                .unwrap_or(defaults.host),
            port: std::env::var(PORT_VAR)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Listen on `port` instead, as given on the command line
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_override_keeps_host() {
        let config = MetricsConfig {
            host: "127.0.0.1".to_string(),
            ..MetricsConfig::default()
        }
        .with_port(9100);

        assert_eq!(config.address(), "127.0.0.1:9100");
    }
}
