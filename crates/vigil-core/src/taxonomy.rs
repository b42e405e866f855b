//! The numeric error catalog shared with authored check scripts.
//!
//! Codes 11–52 are an external contract: processor scripts signal outcomes by
//! exit status, by a `VIGIL_STATUS:` line, or by embedding a code in their
//! output. The decade of a code selects its [`ErrorCategory`], and the category
//! decides whether the audited system is non-compliant (`Failed`) or the check
//! itself could not be completed (`Error`).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::CheckStatus;

/// Coarse grouping of taxonomy codes by decade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 11–14: reachability, authentication, privilege.
    Connection,
    /// 21–23: files on the audited host.
    Filesystem,
    /// 31–34: commands and services on the audited host.
    Process,
    /// 41–44: the audited configuration does not match the reference.
    Configuration,
    /// 50–52: the local processor script misbehaved.
    Processor,
}

/// A catalog entry. The discriminant is the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    NetworkUnreachable = 11,
    LoginFailed = 12,
    InsufficientPrivilege = 13,
    ConnectionLost = 14,
    FileNotFound = 21,
    PermissionDenied = 22,
    FileUnreadable = 23,
    CommandNotFound = 31,
    ServiceNotFound = 32,
    ServiceStopped = 33,
    CommandTimeout = 34,
    ConfigMismatch = 41,
    ConfigMissing = 42,
    ConfigInvalid = 43,
    PolicyNotApplied = 44,
    ProcessorFailed = 50,
    ProcessorOutputInvalid = 51,
    ProcessorTimeout = 52,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 18] = [
        ErrorCode::NetworkUnreachable,
        ErrorCode::LoginFailed,
        ErrorCode::InsufficientPrivilege,
        ErrorCode::ConnectionLost,
        ErrorCode::FileNotFound,
        ErrorCode::PermissionDenied,
        ErrorCode::FileUnreadable,
        ErrorCode::CommandNotFound,
        ErrorCode::ServiceNotFound,
        ErrorCode::ServiceStopped,
        ErrorCode::CommandTimeout,
        ErrorCode::ConfigMismatch,
        ErrorCode::ConfigMissing,
        ErrorCode::ConfigInvalid,
        ErrorCode::PolicyNotApplied,
        ErrorCode::ProcessorFailed,
        ErrorCode::ProcessorOutputInvalid,
        ErrorCode::ProcessorTimeout,
    ];

    /// Look up a catalog entry. Returns `None` for anything outside the catalog,
    /// including unassigned values inside 11–52 such as 15 or 45.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() as i64 == code)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn category(self) -> ErrorCategory {
        match self.code() {
            11..=19 => ErrorCategory::Connection,
            21..=29 => ErrorCategory::Filesystem,
            31..=39 => ErrorCategory::Process,
            40..=49 => ErrorCategory::Configuration,
            _ => ErrorCategory::Processor,
        }
    }

    /// Verdict implied by this code: configuration mismatches mean the host is
    /// non-compliant, everything else means the check could not be completed.
    pub fn check_status(self) -> CheckStatus {
        match self.category() {
            ErrorCategory::Configuration => CheckStatus::Failed,
            _ => CheckStatus::Error,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NetworkUnreachable => "Host is unreachable over the network",
            ErrorCode::LoginFailed => "Authentication to the host failed",
            ErrorCode::InsufficientPrivilege => "Account lacks administrative privileges",
            ErrorCode::ConnectionLost => "Connection to the host was lost during the check",
            ErrorCode::FileNotFound => "File or directory not found",
            ErrorCode::PermissionDenied => "Permission denied while accessing a resource",
            ErrorCode::FileUnreadable => "File could not be read",
            ErrorCode::CommandNotFound => "Command not found on the host",
            ErrorCode::ServiceNotFound => "Service not found on the host",
            ErrorCode::ServiceStopped => "Service is not running",
            ErrorCode::CommandTimeout => "Check command timed out",
            ErrorCode::ConfigMismatch => "Configuration value does not match the reference",
            ErrorCode::ConfigMissing => "Required configuration parameter is missing",
            ErrorCode::ConfigInvalid => "Configuration value has an invalid format",
            ErrorCode::PolicyNotApplied => "Required security policy is not applied",
            ErrorCode::ProcessorFailed => "Processor script failed",
            ErrorCode::ProcessorOutputInvalid => "Processor script produced unrecognised output",
            ErrorCode::ProcessorTimeout => "Processor script timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(d)?;
        ErrorCode::from_code(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code: {raw}")))
    }
}
