//! Run parameters for one probe session pair.
//!
//! [`ProbeConfig`] is filled from CLI flags in `main.rs`; library users and
//! tests construct it directly and override what they need.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::state::RoleSet;

/// Port the echo receiver listens on for `/probe/data` and `/probe/size`.
pub const DEFAULT_DATA_PORT: u16 = 9000;
/// Port the prober listens on for feedback signals.
pub const DEFAULT_FEEDBACK_PORT: u16 = 9001;
/// Probe cadence (10 probes per second).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Errors detected before any socket is bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("initial probe size must be at least 1 byte")]
    ZeroInitialSize,
    #[error("initial step must be at least 1 byte")]
    ZeroInitialStep,
    #[error("{0} interval must be non-zero")]
    ZeroInterval(&'static str),
    #[error("data and feedback ports must differ when both roles share host {0}")]
    PortClash(IpAddr),
    #[error("cannot resolve target {0:?}")]
    Unresolvable(String),
}

/// Adjustable run parameters.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Peer IP address or hostname.
    pub target: String,
    /// Address the local sockets bind to.
    pub bind_ip: IpAddr,
    pub data_port: u16,
    pub feedback_port: u16,
    pub roles: RoleSet,
    /// Size of the first probe, in bytes.
    pub initial_size: u32,
    /// Growth between probes until the first loss.
    pub initial_step: u32,
    pub tick_interval: Duration,
    /// Cadence of the orchestrator's result polling loop.
    pub poll_interval: Duration,
    /// Abort the run after this long; `None` waits forever.
    pub run_timeout: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1".to_owned(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_port: DEFAULT_DATA_PORT,
            feedback_port: DEFAULT_FEEDBACK_PORT,
            roles: RoleSet::Both,
            initial_size: 1,
            initial_step: 10_000,
            tick_interval: DEFAULT_TICK_INTERVAL,
            poll_interval: Duration::from_millis(100),
            run_timeout: None,
        }
    }
}

impl ProbeConfig {
    /// Check parameter invariants and resolve the target host.
    pub fn validate(&self) -> Result<IpAddr, ConfigError> {
        if self.initial_size == 0 {
            return Err(ConfigError::ZeroInitialSize);
        }
        if self.initial_step == 0 {
            return Err(ConfigError::ZeroInitialStep);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("tick"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll"));
        }

        let target = self.target_ip()?;
        if self.roles == RoleSet::Both
            && target.is_loopback()
            && self.data_port == self.feedback_port
        {
            return Err(ConfigError::PortClash(target));
        }
        Ok(target)
    }

    /// Resolve `target`, accepting either a literal IP or a hostname.
    pub fn target_ip(&self) -> Result<IpAddr, ConfigError> {
        if let Ok(ip) = self.target.parse::<IpAddr>() {
            return Ok(ip);
        }
        (self.target.as_str(), 0)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| addr.ip())
            .ok_or_else(|| ConfigError::Unresolvable(self.target.clone()))
    }

    /// Where the prober sends probes (the receiver's data port).
    pub fn data_peer(&self, target: IpAddr) -> SocketAddr {
        SocketAddr::new(target, self.data_port)
    }

    /// Where the receiver sends feedback (the prober's feedback port).
    pub fn feedback_peer(&self, target: IpAddr) -> SocketAddr {
        SocketAddr::new(target, self.feedback_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.validate(), Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(cfg.tick_interval, Duration::from_millis(100));
        assert_eq!((cfg.data_port, cfg.feedback_port), (9000, 9001));
    }

    #[test]
    fn zero_initial_size_rejected() {
        let cfg = ProbeConfig {
            initial_size: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInitialSize));
    }

    #[test]
    fn zero_step_rejected() {
        let cfg = ProbeConfig {
            initial_step: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInitialStep));
    }

    #[test]
    fn shared_loopback_port_rejected() {
        let cfg = ProbeConfig {
            feedback_port: DEFAULT_DATA_PORT,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::PortClash(_))));

        let send_only = ProbeConfig {
            roles: RoleSet::Send,
            ..cfg
        };
        assert!(send_only.validate().is_ok());
    }

    #[test]
    fn peers_use_configured_ports() {
        let cfg = ProbeConfig::default();
        let ip = cfg.validate().unwrap();
        assert_eq!(cfg.data_peer(ip), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.feedback_peer(ip), "127.0.0.1:9001".parse().unwrap());
    }
}
