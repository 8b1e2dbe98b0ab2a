use crate::error::BootstrapError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_HOST_IP: &str = "0.0.0.0";

/// Publishes a container port on a host port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: String,
}

impl PortBinding {
    pub fn new(container_port: u16, host_port: u16, host_ip: impl Into<String>) -> Self {
        Self {
            container_port,
            host_port,
            host_ip: host_ip.into(),
        }
    }

    /// Docker's key for the container side of the binding.
    pub fn container_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}/tcp",
            self.host_ip, self.host_port, self.container_port
        )
    }
}

/// Accepts `PORT`, `HOST:CONTAINER` and `IP:HOST:CONTAINER`.
impl FromStr for PortBinding {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.rsplitn(3, ':').collect();
        let (host_ip, host, container) = match parts.as_slice() {
            [port] => (DEFAULT_HOST_IP, *port, *port),
            [container, host] => (DEFAULT_HOST_IP, *host, *container),
            [container, host, ip] => (*ip, *host, *container),
            _ => unreachable!("rsplitn(3) yields one to three parts"),
        };

        Ok(PortBinding {
            container_port: parse_port(container, s)?,
            host_port: parse_port(host, s)?,
            host_ip: host_ip.to_string(),
        })
    }
}

fn parse_port(raw: &str, whole: &str) -> Result<u16, BootstrapError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(BootstrapError::InvalidSpec {
            reason: format!("invalid port binding {whole:?}"),
        }),
    }
}

/// Publishes every exposed port on the same host port.
pub fn default_bindings(exposed_ports: &[u16], host_ip: &str) -> Vec<PortBinding> {
    exposed_ports
        .iter()
        .map(|&port| PortBinding::new(port, port, host_ip))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        assert_eq!(
            "7860".parse::<PortBinding>().unwrap(),
            PortBinding::new(7860, 7860, "0.0.0.0")
        );
        assert_eq!(
            "8080:7860".parse::<PortBinding>().unwrap(),
            PortBinding::new(7860, 8080, "0.0.0.0")
        );
        assert_eq!(
            "127.0.0.1:8080:7860".parse::<PortBinding>().unwrap(),
            PortBinding::new(7860, 8080, "127.0.0.1")
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<PortBinding>().is_err());
        assert!("abc".parse::<PortBinding>().is_err());
        assert!("0:7860".parse::<PortBinding>().is_err());
        assert!("70000:7860".parse::<PortBinding>().is_err());
    }

    #[test]
    fn defaults_mirror_exposed_ports() {
        let bindings = default_bindings(&[7860, 9000], "0.0.0.0");
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].host_port, 7860);
        assert_eq!(bindings[0].container_key(), "7860/tcp");
        assert_eq!(bindings[1].to_string(), "0.0.0.0:9000->9000/tcp");
    }
}
