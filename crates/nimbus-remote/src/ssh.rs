//! `ssh2`-backed `RemoteExecClient`. Bastion forwarding is mandatory
//! whenever `ConnectionSpec::bastion` is set (spec.md §4.3): we dial the
//! bastion directly, then open a `direct-tcpip` channel through it to the
//! target host/port and run a second SSH handshake over that channel,
//! which is the standard ProxyJump shape for `ssh2` (it has no native
//! ProxyJump support of its own).

use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use ssh2::Session;

use crate::error::RemoteExecError;
use crate::{CommandOutput, ConnectionSpec, RemoteExecClient, Result};

pub struct SshRemoteExecClient;

impl SshRemoteExecClient {
    pub fn new() -> Self {
        SshRemoteExecClient
    }

    fn dial_direct(host: &str, port: u16, dial_error_limit: u32) -> Result<TcpStream> {
        let mut last_err = String::new();
        for attempt in 0..dial_error_limit {
            match TcpStream::connect((host, port)) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    last_err = e.to_string();
                    thread::sleep(crate::DIAL_RETRY_INTERVAL);
                    let _ = attempt;
                }
            }
        }
        Err(RemoteExecError::dial(host, format!("exhausted {} attempts: {}", dial_error_limit, last_err)))
    }

    fn handshake(
        stream: TcpStream,
        host: &str,
        ssh_user: &str,
        private_key_path: &std::path::Path,
    ) -> Result<Session> {
        let mut session = Session::new().map_err(|e| RemoteExecError::dial(host, e.to_string()))?;
        session.set_tcp_stream(stream);
        session.handshake().map_err(|e| RemoteExecError::dial(host, e.to_string()))?;
        session
            .userauth_pubkey_file(ssh_user, None, private_key_path, None)
            .map_err(|e| RemoteExecError::dial(host, format!("auth failed: {}", e)))?;
        if !session.authenticated() {
            return Err(RemoteExecError::dial(host, "authentication did not succeed"));
        }
        Ok(session)
    }

    /// Opens a session to `conn.host`, jumping through `conn.bastion` when
    /// present. The returned session is connected either directly or
    /// through a `direct-tcpip` channel tunneled inside the bastion's
    /// session.
    fn connect(conn: &ConnectionSpec) -> Result<Session> {
        match &conn.bastion {
            None => {
                let stream = Self::dial_direct(&conn.host, conn.port, conn.dial_error_limit)?;
                Self::handshake(stream, &conn.host, &conn.ssh_user, &conn.private_key_path)
            }
            Some(bastion) => {
                let bastion_stream = Self::dial_direct(&bastion.host, bastion.port, conn.dial_error_limit)?;
                let bastion_session = Self::handshake(
                    bastion_stream,
                    &bastion.host,
                    &bastion.ssh_user,
                    &bastion.private_key_path,
                )?;
                let mut last_err = String::new();
                for _ in 0..conn.dial_error_limit {
                    match bastion_session.channel_direct_tcpip(&conn.host, conn.port, None) {
                        Ok(channel) => {
                            let mut target_session =
                                Session::new().map_err(|e| RemoteExecError::dial(&conn.host, e.to_string()))?;
                            target_session.set_tcp_stream_channel(channel);
                            target_session
                                .handshake()
                                .map_err(|e| RemoteExecError::dial(&conn.host, e.to_string()))?;
                            target_session
                                .userauth_pubkey_file(&conn.ssh_user, None, &conn.private_key_path, None)
                                .map_err(|e| RemoteExecError::dial(&conn.host, format!("auth failed: {}", e)))?;
                            if !target_session.authenticated() {
                                return Err(RemoteExecError::dial(&conn.host, "authentication did not succeed"));
                            }
                            return Ok(target_session);
                        }
                        Err(e) => {
                            last_err = e.to_string();
                            thread::sleep(crate::DIAL_RETRY_INTERVAL);
                        }
                    }
                }
                Err(RemoteExecError::dial(
                    &conn.host,
                    format!("direct-tcpip through bastion exhausted {} attempts: {}", conn.dial_error_limit, last_err),
                ))
            }
        }
    }
}

impl Default for SshRemoteExecClient {
    fn default() -> Self {
        Self::new()
    }
}

/// `ssh2` sessions don't support a native per-channel wall clock timeout for
/// blocking reads, so we poll `channel.eof()`/read in a loop and bail once
/// `deadline` passes, forcibly closing the session (spec.md §4.3 "on
/// timeout the session is forcibly closed").
fn exec_with_timeout(session: &Session, command: &str, host: &str, timeout: Duration) -> Result<CommandOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| RemoteExecError::dial(host, e.to_string()))?;
    channel
        .exec(command)
        .map_err(|e| RemoteExecError::dial(host, e.to_string()))?;

    let deadline = Instant::now() + timeout;
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stdout_buf = [0u8; 8192];
    let mut stderr_buf = [0u8; 8192];

    loop {
        if Instant::now() >= deadline {
            let _ = channel.close();
            return Err(RemoteExecError::timeout(host, format!("command exceeded {:?}", timeout)));
        }
        let mut made_progress = false;
        match channel.read(&mut stdout_buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout.push_str(&String::from_utf8_lossy(&stdout_buf[..n]));
                made_progress = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }
        match channel.stderr().read(&mut stderr_buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr.push_str(&String::from_utf8_lossy(&stderr_buf[..n]));
                made_progress = true;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }
        if channel.eof() {
            break;
        }
        if !made_progress {
            thread::sleep(Duration::from_millis(100));
        }
    }

    channel.wait_close().ok();
    let exit_code = channel.exit_status().unwrap_or(-1);
    if exit_code != 0 {
        return Err(RemoteExecError::nonzero(host, format!("exit code {}", exit_code)));
    }
    Ok(CommandOutput { stdout, stderr, exit_code })
}

impl RemoteExecClient for SshRemoteExecClient {
    fn run(&self, conn: &ConnectionSpec, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let session = Self::connect(conn)?;
        exec_with_timeout(&session, command, &conn.host, timeout)
    }
}
