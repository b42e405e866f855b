use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::taxonomy::ErrorCode;

/// Identifies one multi-host run and its progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        // UUIDv7 sorts by creation time, which keeps run listings ordered.
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Remote-access protocol spoken by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Shell over SSH (Linux/Unix targets).
    Ssh,
    /// Windows Remote Management (WS-Management over HTTP).
    Winrm,
}

impl Protocol {
    pub fn default_port(self, use_tls: bool) -> u16 {
        match (self, use_tls) {
            (Protocol::Ssh, _) => 22,
            (Protocol::Winrm, false) => 5985,
            (Protocol::Winrm, true) => 5986,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ssh => write!(f, "ssh"),
            Protocol::Winrm => write!(f, "winrm"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh" => Ok(Protocol::Ssh),
            "winrm" => Ok(Protocol::Winrm),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Login secret, already decrypted by the external secret service.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    Password {
        password: String,
    },
    PrivateKey {
        /// PEM/OpenSSH encoded key material.
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

// Never print secrets, even at debug level.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => write!(f, "Credential::Password(***)"),
            Credential::PrivateKey { .. } => write!(f, "Credential::PrivateKey(***)"),
        }
    }
}

/// A remote target. Immutable for the duration of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub address: String,
    /// `None` selects the protocol default.
    #[serde(default)]
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub username: String,
    pub credential: Credential,
    /// WinRM only: speak HTTPS.
    #[serde(default)]
    pub use_tls: bool,
}

impl Host {
    pub fn effective_port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| self.protocol.default_port(self.use_tls))
    }
}

/// A check definition. Read-only input to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub processor: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// One host paired with the scripts to run on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub host_id: String,
    pub script_ids: Vec<String>,
}

/// Final verdict of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckStatus {
    /// The audited system is compliant.
    Passed,
    /// The audited system is non-compliant.
    Failed,
    /// The check could not be completed.
    Error,
    /// Needs manual review by an operator.
    Operator,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Passed => "Passed",
            CheckStatus::Failed => "Failed",
            CheckStatus::Error => "Error",
            CheckStatus::Operator => "Operator",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Passed" => Ok(CheckStatus::Passed),
            "Failed" => Ok(CheckStatus::Failed),
            "Error" => Ok(CheckStatus::Error),
            "Operator" => Ok(CheckStatus::Operator),
            other => Err(format!("unknown check status: {other}")),
        }
    }
}

/// The classifier's decision, before it is bound to a host and script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub check_status: CheckStatus,
    pub error_code: Option<ErrorCode>,
    pub error_description: Option<String>,
    pub actual_data: Option<String>,
}

impl Verdict {
    pub fn passed() -> Self {
        Self {
            check_status: CheckStatus::Passed,
            error_code: None,
            error_description: None,
            actual_data: None,
        }
    }

    /// Verdict implied by a catalog code, described by the catalog text.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            check_status: code.check_status(),
            error_code: Some(code),
            error_description: Some(code.description().to_string()),
            actual_data: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }
}

/// One persisted outcome per (host, script) per task attempt. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub session_id: SessionId,
    pub host_id: String,
    pub script_id: String,
    /// The pipeline produced a verdict without a technical fault.
    pub success: bool,
    pub output: String,
    pub error: String,
    pub check_status: CheckStatus,
    pub error_code: Option<ErrorCode>,
    pub error_description: Option<String>,
    pub actual_data: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(
        session_id: &SessionId,
        host_id: &str,
        script_id: &str,
        output: String,
        error: String,
        verdict: Verdict,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            session_id: session_id.clone(),
            host_id: host_id.to_string(),
            script_id: script_id.to_string(),
            success: verdict.check_status != CheckStatus::Error,
            output,
            error,
            check_status: verdict.check_status,
            error_code: verdict.error_code,
            error_description: verdict.error_description,
            actual_data: verdict.actual_data,
            executed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_follow_protocol() {
        assert_eq!(Protocol::Ssh.default_port(false), 22);
        assert_eq!(Protocol::Winrm.default_port(false), 5985);
        assert_eq!(Protocol::Winrm.default_port(true), 5986);
    }

    #[test]
    fn credential_debug_hides_secret() {
        let c = Credential::Password {
            password: "hunter2".into(),
        };
        assert!(!format!("{c:?}").contains("hunter2"));
    }

    #[test]
    fn error_verdict_is_not_success() {
        let sid = SessionId::new();
        let r = ExecutionResult::new(
            &sid,
            "h1",
            "s1",
            String::new(),
            String::new(),
            Verdict::from_code(ErrorCode::NetworkUnreachable),
        );
        assert!(!r.success);
        assert_eq!(r.check_status, CheckStatus::Error);

        let r = ExecutionResult::new(
            &sid,
            "h1",
            "s1",
            String::new(),
            String::new(),
            Verdict::from_code(ErrorCode::ConfigMismatch),
        );
        assert!(r.success);
        assert_eq!(r.check_status, CheckStatus::Failed);
    }

    #[test]
    fn host_deserializes_with_default_port() {
        let json = r#"{"id":"h1","address":"10.0.0.5","protocol":"winrm","username":"admin",
                       "credential":{"kind":"password","password":"x"},"use_tls":true}"#;
        let host: Host = serde_json::from_str(json).unwrap();
        assert_eq!(host.effective_port(), 5986);
    }
}
