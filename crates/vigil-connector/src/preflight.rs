//! Network → login → privilege gates run once per task, before any script.

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    connector::Connector,
    retry::{open_with_retry, RetryPolicy},
    types::{Gate, GateOutcome, PreflightReport},
};

#[derive(Debug, Clone)]
pub struct Preflight {
    pub network_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Preflight {
    pub fn new(network_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            network_timeout,
            retry,
        }
    }

    /// Raw TCP connect to the session endpoint.
    pub async fn network(&self, connector: &dyn Connector) -> GateOutcome {
        let (address, port) = connector.endpoint();
        match connector.probe_network(self.network_timeout).await {
            Ok(()) => GateOutcome::pass(Gate::Network, format!("{address}:{port} is reachable")),
            Err(e) => GateOutcome::fail(Gate::Network, e.to_string()),
        }
    }

    /// Open and authenticate the session that the rest of the task reuses.
    pub async fn login(&self, connector: &mut dyn Connector) -> GateOutcome {
        match open_with_retry(connector, &self.retry).await {
            Ok(()) => GateOutcome::pass(Gate::Login, "authenticated"),
            Err(e) => GateOutcome::fail(Gate::Login, e.to_string()),
        }
    }

    pub async fn privilege(&self, connector: &mut dyn Connector) -> GateOutcome {
        match connector.probe_privilege().await {
            Ok(probe) if probe.elevated => GateOutcome::pass(Gate::Privilege, probe.detail),
            Ok(probe) => GateOutcome::fail(
                Gate::Privilege,
                if probe.detail.is_empty() {
                    "account cannot elevate non-interactively".to_string()
                } else {
                    probe.detail
                },
            ),
            Err(e) => GateOutcome::fail(Gate::Privilege, e.to_string()),
        }
    }

    /// Run all gates in order, stopping at the first failure.
    ///
    /// `on_gate` observes each outcome as soon as it is known, so callers can
    /// stream progress while the next gate is still running.
    pub async fn run<F>(&self, connector: &mut dyn Connector, mut on_gate: F) -> PreflightReport
    where
        F: FnMut(&GateOutcome) + Send,
    {
        let (address, port) = connector.endpoint();
        let target = format!("{address}:{port}");
        let mut report = PreflightReport::default();

        for gate in Gate::ORDER {
            let outcome = match gate {
                Gate::Network => self.network(connector).await,
                Gate::Login => self.login(connector).await,
                Gate::Privilege => self.privilege(connector).await,
            };
            on_gate(&outcome);
            let ok = outcome.ok;
            if !ok {
                warn!(
                    target = %target,
                    gate = ?gate,
                    message = %outcome.message,
                    "preliminary check failed"
                );
            }
            report.outcomes.push(outcome);
            if !ok {
                return report;
            }
        }

        info!(target = %target, "preliminary checks passed");
        report
    }
}
