//! vigil-connector: remote sessions and the pre-check pipeline.
//!
//! - [`connector::Connector`]: one trait, implemented by [`ssh::SshConnector`]
//!   and [`winrm::WinRmConnector`]
//! - [`preflight::Preflight`]: network → login → privilege gates
//! - [`executor::CommandExecutor`]: runs a check command and recognises
//!   technical failures
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vigil_connector::{DefaultConnectorFactory, ConnectorFactory, Preflight, RetryPolicy};
//! use vigil_core::{config::ConnectorConfig, Credential, Host, Protocol};
//!
//! #[tokio::main]
//! async fn main() {
//!     let host = Host {
//!         id: "web-01".into(),
//!         address: "10.0.0.5".into(),
//!         port: None,
//!         protocol: Protocol::Ssh,
//!         username: "audit".into(),
//!         credential: Credential::Password { password: "secret".into() },
//!         use_tls: false,
//!     };
//!     let factory = DefaultConnectorFactory::new(ConnectorConfig::default());
//!     let mut conn = factory.connector_for(&host);
//!     let report = Preflight::new(Duration::from_secs(5), RetryPolicy::none())
//!         .run(conn.as_mut(), |gate| println!("{gate:?}"))
//!         .await;
//!     println!("ready: {}", report.passed());
//!     conn.close().await;
//! }
//! ```

pub mod connector;
pub mod error;
pub mod executor;
pub mod pool;
pub mod preflight;
pub mod retry;
pub mod ssh;
pub mod truncate;
pub mod types;
pub mod winrm;

pub use connector::{Connector, ConnectorFactory, DefaultConnectorFactory};
pub use error::{ConnectorError, Result};
pub use executor::{CommandExecutor, CommandOutcome};
pub use pool::WorkerPool;
pub use preflight::Preflight;
pub use retry::{open_with_retry, RetryPolicy};
pub use types::{CommandOutput, Gate, GateOutcome, PreflightReport, PrivilegeProbe};
