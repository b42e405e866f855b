//! The protocol-independent session contract.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use vigil_core::{config::ConnectorConfig, Host, Protocol};

use crate::{
    error::{ConnectorError, Result},
    pool::WorkerPool,
    ssh::SshConnector,
    types::{CommandOutput, PrivilegeProbe},
    winrm::WinRmConnector,
};

/// One remote session to one host.
///
/// Lifecycle: `probe_network` (optional, stateless) → `open` → any number of
/// `probe_privilege` / `run` calls → `close`. Implementations keep the session
/// open between calls so a whole task costs a single handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// `(address, port)` the session targets.
    fn endpoint(&self) -> (&str, u16);

    /// Raw TCP reachability check without authenticating.
    async fn probe_network(&self, timeout: Duration) -> Result<()> {
        let (address, port) = self.endpoint();
        let target = format!("{address}:{port}");
        match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(ConnectorError::Unreachable(format!("{target}: {e}"))),
            Err(_) => Err(ConnectorError::ConnectTimeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Establish and authenticate the session.
    async fn open(&mut self) -> Result<()>;

    /// Report whether the session can act with administrative rights.
    async fn probe_privilege(&mut self) -> Result<PrivilegeProbe>;

    /// Execute one command on the open session.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Tear the session down. Idempotent; errors are logged, not returned.
    async fn close(&mut self);
}

/// Builds a connector for a host. The orchestrator depends on this seam so
/// tests can substitute scripted connectors.
pub trait ConnectorFactory: Send + Sync {
    fn connector_for(&self, host: &Host) -> Box<dyn Connector>;
}

/// Picks [`SshConnector`] or [`WinRmConnector`] from the host's protocol.
#[derive(Debug, Clone)]
pub struct DefaultConnectorFactory {
    config: ConnectorConfig,
    pool: WorkerPool,
}

impl DefaultConnectorFactory {
    pub fn new(config: ConnectorConfig) -> Self {
        let pool = WorkerPool::new(config.worker_threads);
        Self { config, pool }
    }
}

impl ConnectorFactory for DefaultConnectorFactory {
    fn connector_for(&self, host: &Host) -> Box<dyn Connector> {
        match host.protocol {
            Protocol::Ssh => Box::new(SshConnector::new(
                host.clone(),
                &self.config,
                self.pool.clone(),
            )),
            Protocol::Winrm => Box::new(WinRmConnector::new(host.clone(), &self.config)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Credential;

    fn host(protocol: Protocol, port: u16) -> Host {
        Host {
            id: "h1".into(),
            address: "127.0.0.1".into(),
            port: Some(port),
            protocol,
            username: "audit".into(),
            credential: Credential::Password {
                password: "x".into(),
            },
            use_tls: false,
        }
    }

    #[test]
    fn factory_dispatches_on_protocol() {
        let factory = DefaultConnectorFactory::new(ConnectorConfig::default());
        assert_eq!(
            factory.connector_for(&host(Protocol::Ssh, 22)).protocol(),
            Protocol::Ssh
        );
        assert_eq!(
            factory.connector_for(&host(Protocol::Winrm, 5985)).protocol(),
            Protocol::Winrm
        );
    }

    #[tokio::test]
    async fn probe_network_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let factory = DefaultConnectorFactory::new(ConnectorConfig::default());
        let c = factory.connector_for(&host(Protocol::Ssh, port));
        c.probe_network(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn probe_network_reports_closed_port() {
        // Bind then drop to get a port that is very likely closed.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let factory = DefaultConnectorFactory::new(ConnectorConfig::default());
        let c = factory.connector_for(&host(Protocol::Ssh, port));
        let err = c.probe_network(Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_transient());
    }
}
