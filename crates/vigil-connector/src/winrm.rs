//! Windows Remote Management connector.
//!
//! Speaks WS-Management over HTTP(S) with Basic authentication:
//!
//! ```text
//! open   → Create shell            (login gate: first authenticated call)
//! run    → Command → Receive* → Signal(terminate)
//! close  → Delete shell
//! ```
//!
//! Commands run under PowerShell via `-EncodedCommand`, so check scripts never
//! need cmd.exe quoting.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_core::{config::ConnectorConfig, Credential, Host, Protocol};

use crate::{
    connector::Connector,
    error::{ConnectorError, Result},
    types::{CommandOutput, PrivilegeProbe},
};

const NS_ENVELOPE: &str = concat!(
    r#"xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
    r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
    r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" "#,
    r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell""#
);
const RESOURCE_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const STATE_DONE: &str = "CommandState/Done";
/// WS-Man fault code for "no output within OperationTimeout"; poll again.
const FAULT_RECEIVE_TIMEOUT: &str = "2150858793";
/// Server-side long-poll per Receive request.
const OPERATION_TIMEOUT_SECS: u64 = 20;

const ADMIN_PROBE: &str = "([Security.Principal.WindowsPrincipal]\
[Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole(\
[Security.Principal.WindowsBuiltInRole]::Administrator)";

pub struct WinRmConnector {
    host: Host,
    port: u16,
    endpoint: String,
    client: Option<reqwest::Client>,
    connect_timeout: Duration,
    accept_invalid_certs: bool,
    shell_id: Option<String>,
}

impl WinRmConnector {
    pub fn new(host: Host, config: &ConnectorConfig) -> Self {
        let port = host.effective_port();
        let scheme = if host.use_tls { "https" } else { "http" };
        let endpoint = format!("{scheme}://{}:{port}/wsman", host.address);
        Self {
            host,
            port,
            endpoint,
            client: None,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            accept_invalid_certs: config.winrm_accept_invalid_certs,
            shell_id: None,
        }
    }

    fn password(&self) -> Result<&str> {
        match &self.host.credential {
            Credential::Password { password } => Ok(password),
            Credential::PrivateKey { .. } => Err(ConnectorError::Auth(
                "WinRM requires a password credential".to_string(),
            )),
        }
    }

    /// POST one envelope; returns the response body of a 200 reply.
    async fn post(&self, envelope: String, read_timeout: Duration) -> Result<String> {
        let client = self.client.as_ref().ok_or(ConnectorError::NotConnected)?;
        let response = client
            .post(&self.endpoint)
            .basic_auth(&self.host.username, Some(self.password()?))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .timeout(read_timeout)
            .body(envelope)
            .send()
            .await
            .map_err(|e| request_error(e, read_timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::SessionLost(e.to_string()))?;

        match status {
            StatusCode::OK => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectorError::Auth(
                format!("WinRM endpoint answered {status}"),
            )),
            _ => Err(ConnectorError::Protocol(
                fault_message(&body).unwrap_or_else(|| format!("unexpected HTTP {status}")),
            )),
        }
    }

    async fn start_command(&self, shell_id: &str, command: &str) -> Result<String> {
        let body = format!(
            "<rsp:CommandLine><rsp:Command>powershell.exe</rsp:Command>\
             <rsp:Arguments>-NoProfile -NonInteractive -EncodedCommand {}</rsp:Arguments>\
             </rsp:CommandLine>",
            encode_powershell(command)
        );
        let options = "<w:OptionSet><w:Option Name=\"WINRS_CONSOLEMODE_STDIN\">TRUE</w:Option>\
                       <w:Option Name=\"WINRS_SKIP_CMD_SHELL\">TRUE</w:Option></w:OptionSet>";
        let envelope =
            build_envelope(&self.endpoint, ACTION_COMMAND, Some(shell_id), options, &body);
        let reply = self.post(envelope, self.connect_timeout).await?;
        find_text(&reply, "CommandId")
            .ok_or_else(|| ConnectorError::Protocol("Command reply without CommandId".to_string()))
    }

    async fn receive_all(&self, shell_id: &str, command_id: &str) -> Result<CommandOutput> {
        let body = format!(
            "<rsp:Receive><rsp:DesiredStream CommandId=\"{command_id}\">stdout stderr\
             </rsp:DesiredStream></rsp:Receive>"
        );
        let mut out = CommandOutput {
            exit_code: -1,
            ..Default::default()
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let read_timeout = Duration::from_secs(OPERATION_TIMEOUT_SECS + 10);

        loop {
            let envelope =
                build_envelope(&self.endpoint, ACTION_RECEIVE, Some(shell_id), "", &body);
            let reply = match self.post(envelope, read_timeout).await {
                Ok(r) => r,
                Err(ConnectorError::Protocol(msg)) if msg.contains(FAULT_RECEIVE_TIMEOUT) => {
                    continue
                }
                Err(e) => return Err(e),
            };
            let chunk = parse_receive(&reply)?;
            stdout.extend_from_slice(&chunk.stdout);
            stderr.extend_from_slice(&chunk.stderr);
            if chunk.done {
                out.exit_code = chunk.exit_code.unwrap_or(-1);
                break;
            }
        }

        out.stdout = String::from_utf8_lossy(&stdout).into_owned();
        out.stderr = String::from_utf8_lossy(&stderr).into_owned();
        Ok(out)
    }

    async fn signal_terminate(&self, shell_id: &str, command_id: &str) {
        let body = format!(
            "<rsp:Signal CommandId=\"{command_id}\">\
             <rsp:Code>{SIGNAL_TERMINATE}</rsp:Code></rsp:Signal>"
        );
        let envelope = build_envelope(&self.endpoint, ACTION_SIGNAL, Some(shell_id), "", &body);
        if let Err(e) = self.post(envelope, self.connect_timeout).await {
            debug!(host_id = %self.host.id, err = %e, "winrm signal failed");
        }
    }
}

#[async_trait]
impl Connector for WinRmConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Winrm
    }

    fn endpoint(&self) -> (&str, u16) {
        (&self.host.address, self.port)
    }

    async fn open(&mut self) -> Result<()> {
        if self.shell_id.is_some() {
            return Ok(());
        }
        self.password()?;

        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        self.client = Some(client);

        let options = "<w:OptionSet><w:Option Name=\"WINRS_NOPROFILE\">TRUE</w:Option>\
                       <w:Option Name=\"WINRS_CODEPAGE\">65001</w:Option></w:OptionSet>";
        let body = "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams>\
                    <rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>";
        let envelope = build_envelope(&self.endpoint, ACTION_CREATE, None, options, body);

        let reply = match self.post(envelope, self.connect_timeout).await {
            Ok(r) => r,
            Err(e) => {
                self.client = None;
                return Err(e);
            }
        };
        let shell_id = find_shell_id(&reply)
            .ok_or_else(|| ConnectorError::Protocol("Create reply without ShellId".to_string()))?;

        info!(host_id = %self.host.id, port = self.port, "winrm shell open");
        self.shell_id = Some(shell_id);
        Ok(())
    }

    async fn probe_privilege(&mut self) -> Result<PrivilegeProbe> {
        let out = self.run(ADMIN_PROBE, self.connect_timeout).await?;
        let answer = out.stdout.trim().to_string();
        Ok(PrivilegeProbe {
            elevated: answer.eq_ignore_ascii_case("true"),
            detail: if answer.is_empty() {
                out.stderr.trim().to_string()
            } else {
                format!("Administrators membership: {answer}")
            },
        })
    }

    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let shell_id = self.shell_id.clone().ok_or(ConnectorError::NotConnected)?;
        let command_id = self.start_command(&shell_id, command).await?;

        let result = tokio::time::timeout(timeout, self.receive_all(&shell_id, &command_id)).await;
        // Always release the command slot on the remote side.
        self.signal_terminate(&shell_id, &command_id).await;

        match result {
            Ok(r) => r,
            Err(_) => Err(ConnectorError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn close(&mut self) {
        if let Some(shell_id) = self.shell_id.take() {
            let envelope = build_envelope(&self.endpoint, ACTION_DELETE, Some(&shell_id), "", "");
            if let Err(e) = self.post(envelope, self.connect_timeout).await {
                warn!(host_id = %self.host.id, err = %e, "winrm shell delete failed");
            }
        }
        self.client = None;
    }
}

// ---------------------------------------------------------------------------
// Envelope building and parsing
// ---------------------------------------------------------------------------

fn build_envelope(
    endpoint: &str,
    action: &str,
    shell_id: Option<&str>,
    options: &str,
    body: &str,
) -> String {
    let selector = shell_id
        .map(|id| {
            format!(
                "<w:SelectorSet><w:Selector Name=\"ShellId\">{}</w:Selector></w:SelectorSet>",
                xml_escape(id)
            )
        })
        .unwrap_or_default();
    format!(
        "<s:Envelope {NS_ENVELOPE}><s:Header>\
         <a:To>{endpoint}</a:To>\
         <a:ReplyTo><a:Address s:mustUnderstand=\"true\">\
         http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>\
         <w:MaxEnvelopeSize s:mustUnderstand=\"true\">153600</w:MaxEnvelopeSize>\
         <a:MessageID>uuid:{}</a:MessageID>\
         <w:Locale xml:lang=\"en-US\" s:mustUnderstand=\"false\"/>\
         <w:OperationTimeout>PT{OPERATION_TIMEOUT_SECS}S</w:OperationTimeout>\
         <w:ResourceURI s:mustUnderstand=\"true\">{RESOURCE_CMD}</w:ResourceURI>\
         <a:Action s:mustUnderstand=\"true\">{action}</a:Action>\
         {selector}{options}\
         </s:Header><s:Body>{body}</s:Body></s:Envelope>",
        Uuid::new_v4()
    )
}

/// PowerShell `-EncodedCommand` takes base64 of UTF-16LE.
pub(crate) fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    B64.encode(utf16)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub done: bool,
    pub exit_code: Option<i32>,
}

/// Decode the streams and command state from one Receive reply.
pub(crate) fn parse_receive(xml: &str) -> Result<ReceiveChunk> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut chunk = ReceiveChunk::default();
    let mut current_stream: Option<String> = None;
    let mut in_exit_code = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Stream" => current_stream = attr(&e, b"Name"),
                b"CommandState" => chunk.done |= is_done(&e),
                b"ExitCode" => in_exit_code = true,
                _ => {}
            },
            // Self-closing: an empty end-of-stream marker or a bare state.
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"CommandState" {
                    chunk.done |= is_done(&e);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ConnectorError::Protocol(e.to_string()))?;
                if in_exit_code {
                    chunk.exit_code = text.trim().parse().ok();
                } else if let Some(name) = current_stream.as_deref() {
                    let bytes = B64
                        .decode(text.trim())
                        .map_err(|e| ConnectorError::Protocol(format!("bad stream payload: {e}")))?;
                    match name {
                        "stderr" => chunk.stderr.extend(bytes),
                        _ => chunk.stdout.extend(bytes),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Stream" => current_stream = None,
                b"ExitCode" => in_exit_code = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConnectorError::Protocol(format!("malformed reply: {e}"))),
            _ => {}
        }
    }
    Ok(chunk)
}

/// Text of the first element with the given local name.
fn find_text(xml: &str, local: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local.as_bytes() => inside = true,
            Ok(Event::Text(t)) if inside => return t.unescape().ok().map(|s| s.into_owned()),
            Ok(Event::End(e)) if e.local_name().as_ref() == local.as_bytes() => inside = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Shell id from a Create reply: `<rsp:ShellId>` or the `ShellId` selector.
fn find_shell_id(xml: &str) -> Option<String> {
    if let Some(id) = find_text(xml, "ShellId") {
        return Some(id);
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"Selector" => {
                inside = attr(&e, b"Name").as_deref() == Some("ShellId");
            }
            Ok(Event::Text(t)) if inside => return t.unescape().ok().map(|s| s.into_owned()),
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Human-readable reason from a SOAP fault, including the WS-Man code.
fn fault_message(xml: &str) -> Option<String> {
    let text = find_text(xml, "Text").or_else(|| find_text(xml, "Message"))?;
    let code = {
        let mut reader = Reader::from_str(xml);
        let mut found = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e))
                    if e.local_name().as_ref() == b"WSManFault" =>
                {
                    found = attr(&e, b"Code");
                    break;
                }
                Ok(Event::Eof) | Err(_) => break,
                _ => {}
            }
        }
        found
    };
    Some(match code {
        Some(c) => format!("{text} (code {c})"),
        None => text,
    })
}

fn is_done(e: &quick_xml::events::BytesStart<'_>) -> bool {
    attr(e, b"State").is_some_and(|s| s.ends_with(STATE_DONE))
}

fn attr(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn request_error(e: reqwest::Error, timeout: Duration) -> ConnectorError {
    if e.is_connect() {
        ConnectorError::Unreachable(e.to_string())
    } else if e.is_timeout() {
        ConnectorError::Timeout {
            ms: timeout.as_millis() as u64,
        }
    } else {
        ConnectorError::Transport(e.to_string())
    }
}
