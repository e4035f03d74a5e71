//! In-memory `RemoteExecClient` test double, in the spirit of
//! `MockProvider`/`Vault::mocked`: records every command it was asked to run
//! and returns canned output, never touching a real socket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::{CommandOutput, ConnectionSpec, RemoteExecClient, RemoteExecError, Result};

#[derive(Default)]
pub struct MockRemoteExecClient {
    stubs: Mutex<HashMap<String, CommandOutput>>,
    failures: Mutex<HashMap<String, RemoteExecError>>,
    history: Mutex<Vec<String>>,
}

impl MockRemoteExecClient {
    pub fn new() -> Self {
        MockRemoteExecClient::default()
    }

    /// Registers an exact-match command -> output stub.
    pub fn stub(&self, command: &str, output: CommandOutput) {
        self.stubs.lock().unwrap().insert(command.to_string(), output);
    }

    /// Registers an exact-match command that should fail the call outright.
    pub fn fail(&self, command: &str, err: RemoteExecError) {
        self.failures.lock().unwrap().insert(command.to_string(), err);
    }

    pub fn last_command(&self) -> Option<String> {
        self.history.lock().unwrap().last().cloned()
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().clone()
    }
}

impl RemoteExecClient for MockRemoteExecClient {
    fn run(&self, _conn: &ConnectionSpec, command: &str, _timeout: Duration) -> Result<CommandOutput> {
        self.history.lock().unwrap().push(command.to_string());
        if let Some(err) = self.failures.lock().unwrap().get(command) {
            return Err(err.clone());
        }
        if let Some(out) = self.stubs.lock().unwrap().get(command) {
            return Ok(out.clone());
        }
        Ok(CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn conn() -> ConnectionSpec {
        ConnectionSpec {
            host: "10.8.0.10".into(),
            port: 22,
            ssh_user: "root".into(),
            private_key_path: PathBuf::from("/dev/null"),
            bastion: None,
            dial_error_limit: 30,
        }
    }

    #[test]
    fn records_history_in_order() {
        let client = MockRemoteExecClient::new();
        client.run(&conn(), "one", Duration::from_secs(1)).unwrap();
        client.run(&conn(), "two", Duration::from_secs(1)).unwrap();
        assert_eq!(client.history(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn stubbed_failure_is_returned() {
        let client = MockRemoteExecClient::new();
        client.fail("boom", RemoteExecError::nonzero("h", "exit 1"));
        let err = client.run(&conn(), "boom", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind, crate::RemoteExecErrorKind::Nonzero);
    }
}
