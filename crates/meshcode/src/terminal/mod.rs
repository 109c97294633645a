//! Interactive shells attached to project containers.
//!
//! Each WebSocket connection owns at most one [`TerminalSession`]. Output of
//! the shell is relayed to that connection as `terminal-output` events; when
//! the shell exits the connection is told the session ended.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::container::{ContainerError, ContainerResult, ContainerRuntimeApi, KillSwitch};
use crate::ws::{ConnectionId, RoomHub, WsEvent};

/// Shell started when no other command is configured.
///
/// `script` allocates a pseudo terminal so prompts and line editing work
/// without `docker exec -t`.
pub const DEFAULT_SHELL: &[&str] = &["script", "-qfc", "/bin/bash", "/dev/null"];

/// Sent once the shell process is gone.
pub const SESSION_ENDED: &str = "\r\nSession ended\r\n";

/// Starts terminal sessions.
pub struct TerminalService {
    runtime: Arc<dyn ContainerRuntimeApi>,
    shell: Vec<String>,
}

impl TerminalService {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>) -> Self {
        Self {
            runtime,
            shell: DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_shell(mut self, shell: Vec<String>) -> Self {
        if !shell.is_empty() {
            self.shell = shell;
        }
        self
    }

    pub fn shell(&self) -> &[String] {
        &self.shell
    }

    /// Attach a shell in `container_id` and relay its output to `conn_id`.
    pub async fn open(
        &self,
        container_id: &str,
        hub: Arc<RoomHub>,
        conn_id: ConnectionId,
    ) -> ContainerResult<TerminalSession> {
        let exec = self
            .runtime
            .exec_interactive(container_id, &self.shell)
            .await?;
        info!(
            "Started terminal in container {} for connection {}",
            container_id, conn_id
        );

        let mut output = exec.output;
        let relay = tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            while let Some(item) = output.next_chunk().await {
                match item {
                    Ok(chunk) => {
                        let text = decoder.decode(chunk.bytes());
                        if !text.is_empty() && !hub.send_to(conn_id, WsEvent::terminal_output(text)) {
                            return;
                        }
                    }
                    // A shell exiting non-zero is still just the end of the session.
                    Err(ContainerError::ExecFailed { exit_code, .. }) => {
                        debug!("Terminal shell exited with {:?}", exit_code);
                        break;
                    }
                    Err(e) => {
                        warn!("Terminal output failed for connection {}: {}", conn_id, e);
                        hub.send_to(
                            conn_id,
                            WsEvent::TerminalError {
                                message: e.to_string(),
                            },
                        );
                        break;
                    }
                }
            }
            hub.send_to(conn_id, WsEvent::terminal_output(SESSION_ENDED));
        });

        Ok(TerminalSession {
            input: exec.input,
            kill: exec.kill,
            relay,
        })
    }
}

/// A running shell. Dropping it kills the process.
pub struct TerminalSession {
    input: tokio::sync::mpsc::Sender<Bytes>,
    kill: KillSwitch,
    relay: JoinHandle<()>,
}

impl TerminalSession {
    /// Forward keystrokes to the shell.
    pub async fn write(&self, data: impl Into<Bytes>) -> ContainerResult<()> {
        self.input
            .send(data.into())
            .await
            .map_err(|_| ContainerError::StreamClosed)
    }

    pub fn is_finished(&self) -> bool {
        self.relay.is_finished()
    }

    /// Kill the shell without announcing the end of the session.
    pub fn terminate(mut self) {
        self.relay.abort();
        self.kill.kill();
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.kill.kill();
    }
}

/// Decodes UTF-8 across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: keep it for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerConfig, ExecStream, InteractiveExec, exec};
    use async_trait::async_trait;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;

    /// Runs the requested "shell" on the host instead of in a container.
    struct HostRuntime {
        program: Vec<String>,
    }

    #[async_trait]
    impl ContainerRuntimeApi for HostRuntime {
        async fn create_container(&self, _config: &ContainerConfig) -> ContainerResult<String> {
            Ok("c1".to_string())
        }

        async fn start_container(&self, _id: &str) -> ContainerResult<()> {
            Ok(())
        }

        async fn stop_container(&self, _id: &str, _timeout: Option<u32>) -> ContainerResult<()> {
            Ok(())
        }

        async fn remove_container(&self, _id: &str, _force: bool) -> ContainerResult<()> {
            Ok(())
        }

        async fn container_state_status(&self, _id: &str) -> ContainerResult<Option<String>> {
            Ok(Some("running".to_string()))
        }

        async fn exec_stream(&self, _id: &str, _cmd: &[String]) -> ContainerResult<ExecStream> {
            Ok(ExecStream::completed(Bytes::new()))
        }

        async fn exec_interactive(
            &self,
            _id: &str,
            _cmd: &[String],
        ) -> ContainerResult<InteractiveExec> {
            let child = Command::new(&self.program[0])
                .args(&self.program[1..])
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;
            Ok(exec::interactive_child(child, self.program[0].clone()))
        }

        async fn put_archive(&self, _id: &str, _dir: &str, _a: Bytes) -> ContainerResult<()> {
            Ok(())
        }
    }

    fn service(program: &[&str]) -> TerminalService {
        TerminalService::new(Arc::new(HostRuntime {
            program: program.iter().map(|s| s.to_string()).collect(),
        }))
    }

    async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<WsEvent>) -> WsEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for terminal output")
            .expect("hub channel closed")
    }

    #[tokio::test]
    async fn test_input_is_echoed_as_output() {
        let hub = Arc::new(RoomHub::new());
        let (conn, mut rx) = hub.register("alice");
        let session = service(&["cat"]).open("c1", hub.clone(), conn).await.unwrap();

        session.write("ls\n").await.unwrap();
        assert_eq!(next_event(&mut rx).await, WsEvent::terminal_output("ls\n"));

        session.terminate();
    }

    #[tokio::test]
    async fn test_exit_announces_session_end() {
        let hub = Arc::new(RoomHub::new());
        let (conn, mut rx) = hub.register("alice");
        let _session = service(&["sh", "-c", "printf hi; exit 2"])
            .open("c1", hub.clone(), conn)
            .await
            .unwrap();

        assert_eq!(next_event(&mut rx).await, WsEvent::terminal_output("hi"));
        assert_eq!(
            next_event(&mut rx).await,
            WsEvent::terminal_output(SESSION_ENDED)
        );
    }

    #[test]
    fn test_default_shell() {
        let service = TerminalService::new(Arc::new(HostRuntime { program: vec![] }));
        assert_eq!(service.shell()[0], "script");
        let service = service.with_shell(vec![]);
        assert_eq!(service.shell().len(), 4);
    }

    #[test]
    fn test_utf8_decoder_handles_split_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert_eq!(decoder.decode(&bytes[2..]), "éllo");
        assert_eq!(decoder.decode(&[0xff, b'a']), "\u{fffd}a");
    }
}
