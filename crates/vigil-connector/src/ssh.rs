//! Shell-over-SSH connector backed by libssh2.
//!
//! All libssh2 calls block, so each one is shipped to the [`WorkerPool`]. The
//! session carries its own libssh2 timeout as well, which bounds the worker
//! thread even after the async side has given up waiting.

use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, info, warn};
use vigil_core::{config::ConnectorConfig, Credential, Host, Protocol};

use crate::{
    connector::Connector,
    error::{ConnectorError, Result},
    pool::WorkerPool,
    types::{CommandOutput, PrivilegeProbe},
};

/// Root needs no elevation; everyone else must have passwordless sudo.
const PRIVILEGE_PROBE: &str =
    "if [ \"$(id -u)\" = \"0\" ]; then echo root; else sudo -n true 2>&1 && echo sudo; fi";

/// libssh2's `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Extra slack on top of libssh2's own timeout before the pool gives up.
const POOL_GRACE: Duration = Duration::from_secs(5);

/// Pause between read sweeps when neither stream has data.
const READ_PAUSE: Duration = Duration::from_millis(5);

const READ_CHUNK: usize = 32 * 1024;

pub struct SshConnector {
    host: Host,
    port: u16,
    connect_timeout: Duration,
    pool: WorkerPool,
    session: Option<Session>,
    /// Elevation probed during `open`, on the same connection.
    privilege: Option<PrivilegeProbe>,
}

impl SshConnector {
    pub fn new(host: Host, config: &ConnectorConfig, pool: WorkerPool) -> Self {
        let port = host.effective_port();
        Self {
            host,
            port,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            pool,
            session: None,
            privilege: None,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    fn endpoint(&self) -> (&str, u16) {
        (&self.host.address, self.port)
    }

    async fn open(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let address = self.host.address.clone();
        let port = self.port;
        let username = self.host.username.clone();
        let credential = self.host.credential.clone();
        let timeout = self.connect_timeout;

        let (session, probe) = self
            .pool
            .run_blocking(timeout + POOL_GRACE, move || {
                let session = handshake(&address, port, timeout)?;
                authenticate(&session, &username, &credential)?;

                // Elevation is probed here, on the login connection, so the
                // privilege gate costs no extra round trip.
                let probe = match exec_blocking(&session, PRIVILEGE_PROBE, timeout) {
                    Ok(out) => PrivilegeProbe {
                        elevated: out.exit_code == 0,
                        detail: first_line(&out),
                    },
                    Err(e) => PrivilegeProbe {
                        elevated: false,
                        detail: format!("privilege probe failed: {e}"),
                    },
                };
                Ok((session, probe))
            })
            .await?;

        info!(host_id = %self.host.id, port, elevated = probe.elevated, "ssh session open");
        self.session = Some(session);
        self.privilege = Some(probe);
        Ok(())
    }

    async fn probe_privilege(&mut self) -> Result<PrivilegeProbe> {
        self.privilege.clone().ok_or(ConnectorError::NotConnected)
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = self.session.clone().ok_or(ConnectorError::NotConnected)?;
        let command = command.to_string();
        let ms = timeout.as_millis() as u64;

        debug!(host_id = %self.host.id, "ssh exec");
        self.pool
            .run_blocking(timeout + POOL_GRACE, move || {
                session.set_timeout(ms.min(u32::MAX as u64) as u32);
                exec_blocking(&session, &command, timeout).map_err(|e| match e {
                    ConnectorError::Timeout { .. } => ConnectorError::Timeout { ms },
                    other => other,
                })
            })
            .await
            .map_err(|e| match e {
                // The pool deadline fired before libssh2 gave up.
                ConnectorError::Timeout { .. } => ConnectorError::Timeout { ms },
                other => other,
            })
    }

    async fn close(&mut self) {
        self.privilege = None;
        let Some(session) = self.session.take() else {
            return;
        };
        let host_id = self.host.id.clone();
        let result = self
            .pool
            .run_blocking(POOL_GRACE, move || {
                session
                    .disconnect(None, "vigil check complete", None)
                    .map_err(|e| ConnectorError::Transport(e.to_string()))
            })
            .await;
        if let Err(e) = result {
            warn!(host_id = %host_id, err = %e, "ssh disconnect failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking helpers (run inside the worker pool)
// ---------------------------------------------------------------------------

fn handshake(address: &str, port: u16, timeout: Duration) -> Result<Session> {
    let addr = (address, port)
        .to_socket_addrs()
        .map_err(|e| ConnectorError::Unreachable(format!("{address}: {e}")))?
        .next()
        .ok_or_else(|| ConnectorError::Unreachable(format!("{address}: no address")))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            ConnectorError::ConnectTimeout {
                ms: timeout.as_millis() as u64,
            }
        }
        _ => ConnectorError::Unreachable(format!("{addr}: {e}")),
    })?;

    let mut session = Session::new().map_err(|e| ConnectorError::Transport(e.to_string()))?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| transport_error(e, timeout))?;
    Ok(session)
}

fn authenticate(session: &Session, username: &str, credential: &Credential) -> Result<()> {
    let result = match credential {
        Credential::Password { password } => session.userauth_password(username, password),
        Credential::PrivateKey { key, passphrase } => {
            session.userauth_pubkey_memory(username, None, key, passphrase.as_deref())
        }
    };
    // Anything that goes wrong during userauth is a credential problem.
    result.map_err(|e| ConnectorError::Auth(e.message().to_string()))?;
    if !session.authenticated() {
        return Err(ConnectorError::Auth("server rejected credentials".to_string()));
    }
    Ok(())
}

fn exec_blocking(session: &Session, command: &str, timeout: Duration) -> Result<CommandOutput> {
    let mut channel = session.channel_session().map_err(session_error)?;
    channel.exec(command).map_err(session_error)?;

    // Both streams share one window: draining stdout to EOF first would
    // stall a command that writes a lot to stderr.
    session.set_blocking(false);
    let drained = read_interleaved(
        &mut channel.stream(0),
        &mut channel.stderr(),
        || channel.eof(),
        timeout,
    );
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close().map_err(session_error)?;
    let exit_code = channel.exit_status().map_err(session_error)?;

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Read two non-blocking streams in turn until `at_eof` reports the remote
/// side done and neither stream yields more data.
fn read_interleaved<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut at_eof: impl FnMut() -> bool,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let got_out = read_available(stdout, &mut buf, &mut out)?;
        let got_err = read_available(stderr, &mut buf, &mut err)?;
        if got_out || got_err {
            continue;
        }
        if at_eof() {
            return Ok((out, err));
        }
        if Instant::now() >= deadline {
            return Err(ConnectorError::Timeout {
                ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(READ_PAUSE);
    }
}

/// One read attempt. `true` if bytes were appended.
fn read_available(stream: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> Result<bool> {
    match stream.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(false),
        Err(e) => Err(io_error(e)),
    }
}

fn is_timeout(e: &ssh2::Error) -> bool {
    matches!(e.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
}

fn transport_error(e: ssh2::Error, timeout: Duration) -> ConnectorError {
    if is_timeout(&e) {
        ConnectorError::ConnectTimeout {
            ms: timeout.as_millis() as u64,
        }
    } else {
        ConnectorError::Transport(e.message().to_string())
    }
}

fn session_error(e: ssh2::Error) -> ConnectorError {
    if is_timeout(&e) {
        ConnectorError::Timeout { ms: 0 }
    } else {
        ConnectorError::SessionLost(e.message().to_string())
    }
}

fn io_error(e: std::io::Error) -> ConnectorError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectorError::Timeout { ms: 0 },
        _ => ConnectorError::SessionLost(e.to_string()),
    }
}

fn first_line(out: &CommandOutput) -> String {
    let text = if out.stdout.trim().is_empty() {
        &out.stderr
    } else {
        &out.stdout
    };
    text.lines().next().unwrap_or_default().trim().to_string()
}
