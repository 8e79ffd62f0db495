//! Run lifecycle: bind, spawn, poll, report.
//!
//! An [`Orchestrator`] owns the complete state of one run.  Its
//! responsibilities are:
//! - Binding one UDP socket per requested role (fatal on failure).
//! - Spawning a [`Prober`] and/or an [`EchoReceiver`] session.
//! - Polling both sessions at a fixed cadence until one of them stops.
//! - Choosing the authoritative answer and tearing every session down.
//!
//! | role     | binds                  | sends to                 |
//! |----------|------------------------|--------------------------|
//! | prober   | `bind_ip:feedback_port`| `target:data_port`       |
//! | receiver | `bind_ip:data_port`    | `target:feedback_port`   |

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{ConfigError, ProbeConfig};
use crate::echo::EchoReceiver;
use crate::prober::Prober;
use crate::session::{SessionError, SessionHandle};
use crate::socket::{Socket, SocketError, Transport};
use crate::state::{Role, RoleSet};

/// Errors that end a run without a result.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot bind {role} socket on {addr}: {source}")]
    Bind {
        role: Role,
        addr: SocketAddr,
        #[source]
        source: SocketError,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no result after {elapsed_secs:.1}s (prober at {prober_size:?} bytes)")]
    TimedOut {
        elapsed_secs: f64,
        prober_size: Option<u32>,
    },
    #[error("{0} stopped without a result")]
    NoResult(Role),
}

/// The single value a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Largest payload, in bytes, confirmed to cross the path.
    pub max_safe_size: u32,
    /// Which session supplied the value.
    pub source: Role,
}

impl std::fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "maximum safe payload: {} bytes (reported by {})",
            self.max_safe_size, self.source
        )
    }
}

/// Owner of the sessions of one run.
pub struct Orchestrator {
    config: ProbeConfig,
    prober: Option<SessionHandle<Prober>>,
    receiver: Option<SessionHandle<EchoReceiver>>,
}

impl Orchestrator {
    /// Validate `config`, bind the sockets and start the requested sessions.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(config: ProbeConfig) -> Result<Self, OrchestratorError> {
        let target = config.validate()?;

        // Bind every socket before spawning anything so a bind failure leaves
        // no session behind.
        let prober_socket = if config.roles.includes(Role::Prober) {
            Some(bind(Role::Prober, SocketAddr::new(config.bind_ip, config.feedback_port)).await?)
        } else {
            None
        };
        let receiver_socket = if config.roles.includes(Role::Receiver) {
            Some(bind(Role::Receiver, SocketAddr::new(config.bind_ip, config.data_port)).await?)
        } else {
            None
        };

        Ok(Self::with_transports(
            config,
            target,
            prober_socket,
            receiver_socket,
        ))
    }

    /// Start sessions on already-bound transports.
    ///
    /// Roles whose transport is `None` are not run.  Used by [`start`] and by
    /// tests that interpose a [`crate::simulator::Simulator`].
    ///
    /// [`start`]: Orchestrator::start
    pub fn with_transports<P: Transport, R: Transport>(
        config: ProbeConfig,
        target: IpAddr,
        prober_transport: Option<P>,
        receiver_transport: Option<R>,
    ) -> Self {
        let prober = prober_transport.map(|transport| {
            SessionHandle::spawn(
                Prober::new(config.initial_size, config.initial_step),
                transport,
                config.data_peer(target),
                Some(config.tick_interval),
            )
        });
        let receiver = receiver_transport.map(|transport| {
            SessionHandle::spawn(
                EchoReceiver::new(),
                transport,
                config.feedback_peer(target),
                None,
            )
        });
        log::info!(
            "[orchestrator] target {target}, prober={}, receiver={}",
            prober.is_some(),
            receiver.is_some()
        );
        Self {
            config,
            prober,
            receiver,
        }
    }

    /// Poll until a session stops, then report the maximum safe size.
    ///
    /// Returns an error if a session hit a fatal transport error, or if
    /// `run_timeout` elapsed first.  Without a timeout a stalled run never
    /// returns.
    pub async fn run(mut self) -> Result<ProbeReport, OrchestratorError> {
        let started = Instant::now();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll.tick().await;
            if !self.all_running() {
                break;
            }
            if let Some(limit) = self.config.run_timeout {
                if started.elapsed() >= limit {
                    let prober_size = self
                        .prober
                        .as_ref()
                        .map(|p| p.inspect(Prober::current_size));
                    self.shutdown().await?;
                    return Err(OrchestratorError::TimedOut {
                        elapsed_secs: started.elapsed().as_secs_f64(),
                        prober_size,
                    });
                }
            }
        }

        let report = self.report();
        if let Some(ref r) = report {
            log::info!("[orchestrator] {r} after {:.1?}", started.elapsed());
        }
        self.shutdown().await?;
        report.ok_or(OrchestratorError::NoResult(self.authoritative_role()))
    }

    /// `true` while every requested session is still running.
    fn all_running(&self) -> bool {
        self.prober.as_ref().map_or(true, SessionHandle::is_running)
            && self.receiver.as_ref().map_or(true, SessionHandle::is_running)
    }

    /// The receiver's observed size wins over the prober's rollback estimate.
    fn report(&self) -> Option<ProbeReport> {
        let from_receiver = self
            .receiver
            .as_ref()
            .and_then(SessionHandle::final_size)
            .map(|max_safe_size| ProbeReport {
                max_safe_size,
                source: Role::Receiver,
            });
        from_receiver.or_else(|| {
            self.prober
                .as_ref()
                .and_then(SessionHandle::final_size)
                .map(|max_safe_size| ProbeReport {
                    max_safe_size,
                    source: Role::Prober,
                })
        })
    }

    fn authoritative_role(&self) -> Role {
        match self.config.roles {
            RoleSet::Send => Role::Prober,
            _ => Role::Receiver,
        }
    }

    /// Abort both event loops; surface the first fatal session error.
    async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        if let Some(receiver) = self.receiver.as_ref() {
            let (probes, payloads) = receiver.inspect(EchoReceiver::counters);
            log::debug!("[orchestrator] receiver saw {probes} announcements, {payloads} payloads");
        }
        let prober = match self.prober.take() {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        };
        let receiver = match self.receiver.take() {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        };
        prober.and(receiver)?;
        Ok(())
    }
}

async fn bind(role: Role, addr: SocketAddr) -> Result<Socket, OrchestratorError> {
    Socket::bind(addr)
        .await
        .map_err(|source| OrchestratorError::Bind { role, addr, source })
}

/// Validate, bind, run and report in one call.
pub async fn run(config: ProbeConfig) -> Result<ProbeReport, OrchestratorError> {
    Orchestrator::start(config).await?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_display_names_the_source() {
        let report = ProbeReport {
            max_safe_size: 1466,
            source: Role::Receiver,
        };
        assert_eq!(
            report.to_string(),
            "maximum safe payload: 1466 bytes (reported by receiver)"
        );
    }

    #[tokio::test]
    async fn invalid_config_fails_before_binding() {
        let cfg = ProbeConfig {
            initial_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Orchestrator::start(cfg).await,
            Err(OrchestratorError::Config(ConfigError::ZeroInitialSize))
        ));
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let squatter = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let cfg = ProbeConfig {
            bind_ip: "127.0.0.1".parse().unwrap(),
            data_port: squatter.local_addr.port(),
            roles: RoleSet::Receive,
            ..Default::default()
        };
        assert!(matches!(
            Orchestrator::start(cfg).await,
            Err(OrchestratorError::Bind {
                role: Role::Receiver,
                ..
            })
        ));
    }
}
