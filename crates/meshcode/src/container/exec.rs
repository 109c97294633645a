//! Streaming command execution.
//!
//! Every command that runs inside a project container surfaces as an
//! [`ExecStream`]: a stream of output chunks in arrival order that ends either
//! cleanly (the command exited with status 0) or with exactly one error item.
//! Dropping the stream cancels the underlying process.

use std::pin::Pin;
use std::process::ExitStatus;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::debug;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;

use super::error::{ContainerError, ContainerResult};

/// Output chunks buffered between the process pump and the consumer.
const EXEC_CHANNEL_CAPACITY: usize = 64;

/// Keystrokes buffered for an interactive session.
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// A single piece of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl ExecChunk {
    pub fn bytes(&self) -> &Bytes {
        match self {
            ExecChunk::Stdout(b) | ExecChunk::Stderr(b) => b,
        }
    }
}

/// Fully collected output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Asynchronous output of a command running in a container.
pub struct ExecStream {
    inner: Pin<Box<dyn Stream<Item = ContainerResult<ExecChunk>> + Send>>,
    finished: bool,
}

impl std::fmt::Debug for ExecStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecStream")
            .field("finished", &self.finished)
            .finish()
    }
}

impl ExecStream {
    /// Wrap any chunk stream. Items after the first error are never yielded.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = ContainerResult<ExecChunk>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            finished: false,
        }
    }

    /// A stream that has already completed successfully with the given stdout.
    pub fn completed(stdout: impl Into<Bytes>) -> Self {
        let stdout = stdout.into();
        let items = if stdout.is_empty() {
            Vec::new()
        } else {
            vec![Ok(ExecChunk::Stdout(stdout))]
        };
        Self::new(futures::stream::iter(items))
    }

    /// A stream whose only item is the given error.
    pub fn failed(error: ContainerError) -> Self {
        Self::new(futures::stream::iter(vec![Err(error)]))
    }

    pub async fn next_chunk(&mut self) -> Option<ContainerResult<ExecChunk>> {
        self.next().await
    }

    /// Drain the stream, returning the collected output or the terminal error.
    pub async fn collect_output(mut self) -> ContainerResult<ExecOutput> {
        let mut output = ExecOutput::default();
        while let Some(item) = self.next().await {
            match item? {
                ExecChunk::Stdout(b) => output.stdout.extend_from_slice(&b),
                ExecChunk::Stderr(b) => output.stderr.extend_from_slice(&b),
            }
        }
        Ok(output)
    }
}

impl Stream for ExecStream {
    type Item = ContainerResult<ExecChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Kills an interactive process when triggered or dropped.
#[derive(Debug)]
pub struct KillSwitch(Option<oneshot::Sender<()>>);

impl KillSwitch {
    pub fn new(tx: oneshot::Sender<()>) -> Self {
        Self(Some(tx))
    }

    pub fn kill(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

/// A persistent, bidirectional execution (interactive shell).
#[derive(Debug)]
pub struct InteractiveExec {
    /// Bytes written here are forwarded to the process stdin.
    pub input: mpsc::Sender<Bytes>,
    /// Combined stdout/stderr of the process.
    pub output: ExecStream,
    pub kill: KillSwitch,
}

impl InteractiveExec {
    pub fn new(input: mpsc::Sender<Bytes>, output: ExecStream, kill: KillSwitch) -> Self {
        Self {
            input,
            output,
            kill,
        }
    }

    pub async fn write(&self, data: impl Into<Bytes>) -> ContainerResult<()> {
        self.input
            .send(data.into())
            .await
            .map_err(|_| ContainerError::StreamClosed)
    }

    pub fn terminate(&mut self) {
        self.kill.kill();
    }
}

/// Pump a spawned child's output into an [`ExecStream`].
///
/// The child must have been spawned with piped stdout and stderr.
pub(crate) fn stream_child(child: Child, label: impl Into<String>) -> ExecStream {
    let (tx, rx) = mpsc::channel(EXEC_CHANNEL_CAPACITY);
    tokio::spawn(pump_child(child, label.into(), tx, None, None));
    ExecStream::new(ReceiverStream::new(rx))
}

/// Attach to a spawned child for interactive use.
///
/// The child must have been spawned with piped stdin, stdout and stderr.
pub(crate) fn interactive_child(child: Child, label: impl Into<String>) -> InteractiveExec {
    let (tx, rx) = mpsc::channel(EXEC_CHANNEL_CAPACITY);
    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(pump_child(
        child,
        label.into(),
        tx,
        Some(input_rx),
        Some(kill_rx),
    ));
    InteractiveExec::new(
        input_tx,
        ExecStream::new(ReceiverStream::new(rx)),
        KillSwitch::new(kill_tx),
    )
}

async fn pump_child(
    mut child: Child,
    label: String,
    tx: mpsc::Sender<ContainerResult<ExecChunk>>,
    mut input: Option<mpsc::Receiver<Bytes>>,
    mut kill: Option<oneshot::Receiver<()>>,
) {
    let mut stdin: Option<ChildStdin> = if input.is_some() {
        child.stdin.take()
    } else {
        None
    };
    let mut stdout = child.stdout.take().map(ReaderStream::new);
    let mut stderr = child.stderr.take().map(ReaderStream::new);
    let mut stderr_buf: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            chunk = next_from(&mut stdout), if stdout.is_some() => match chunk {
                Some(Ok(bytes)) => {
                    if tx.send(Ok(ExecChunk::Stdout(bytes))).await.is_err() {
                        cancel(&mut child, &label).await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(ContainerError::Io(e))).await;
                    cancel(&mut child, &label).await;
                    return;
                }
                None => stdout = None,
            },
            chunk = next_from(&mut stderr), if stderr.is_some() => match chunk {
                Some(Ok(bytes)) => {
                    stderr_buf.extend_from_slice(&bytes);
                    if tx.send(Ok(ExecChunk::Stderr(bytes))).await.is_err() {
                        cancel(&mut child, &label).await;
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(ContainerError::Io(e))).await;
                    cancel(&mut child, &label).await;
                    return;
                }
                None => stderr = None,
            },
            data = recv_input(&mut input), if input.is_some() => match data {
                Some(bytes) => {
                    let failed = match stdin.as_mut() {
                        Some(pipe) => pipe.write_all(&bytes).await.is_err() || pipe.flush().await.is_err(),
                        None => false,
                    };
                    if failed {
                        debug!("stdin of {} closed", label);
                        stdin = None;
                    }
                }
                None => {
                    // All writers are gone: close stdin so the process sees EOF.
                    input = None;
                    stdin = None;
                }
            },
            _ = wait_kill(&mut kill), if kill.is_some() => {
                cancel(&mut child, &label).await;
                return;
            }
            _ = tx.closed() => {
                cancel(&mut child, &label).await;
                return;
            }
            else => break,
        }

        if stdout.is_none() && stderr.is_none() {
            break;
        }
    }

    drop(stdin);
    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            let _ = tx
                .send(Err(exit_error(&label, status, &stderr_buf)))
                .await;
        }
        Err(e) => {
            let _ = tx.send(Err(ContainerError::Io(e))).await;
        }
    }
}

async fn next_from<R>(stream: &mut Option<ReaderStream<R>>) -> Option<std::io::Result<Bytes>>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

async fn recv_input(input: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_kill(kill: &mut Option<oneshot::Receiver<()>>) {
    match kill {
        // A dropped sender counts as a kill request too.
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending().await,
    }
}

async fn cancel(child: &mut Child, label: &str) {
    debug!("cancelling {}", label);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn exit_error(label: &str, status: ExitStatus, stderr: &[u8]) -> ContainerError {
    ContainerError::ExecFailed {
        command: label.to_string(),
        exit_code: status.code(),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}
