//! Container lifecycle and PTY bridge.
//!
//! Grounded on `Container` in the original Python backend: create with a
//! TTY and stdin open, attach a single bidirectional stream, resize
//! best-effort, and stop via kill-then-wait-then-remove with every step
//! swallowing "not found".

use std::sync::Arc;

use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, RemoveContainerOptions, ResizeContainerOptions,
    StartContainerOptions,
};
use bollard::service::HostConfig;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::errors::{ArenaError, ArenaResult};
use crate::replay_stream::ReplayStream;

/// One frame of PTY output. Ordering within a container is strictly the
/// arrival order from the underlying stream.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Frame {
    pub stream: FrameStream,
    pub bytes: Vec<u8>,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum FrameStream {
    Stdout = 1,
    Stderr = 2,
}

/// Opaque handle to a created container. Unusable after `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub String);

/// Full-duplex bridge to an attached container: send bytes on stdin,
/// observe a `ReplayStream<Frame>` of merged stdout/stderr.
pub struct Attachment {
    pub output: ReplayStream<Frame>,
    stdin_tx: Arc<mpsc_sender::StdinSender>,
}

impl Attachment {
    /// No-op once the reader side has hit EOF (mirrors `running` going
    /// false on the container).
    pub async fn send(&self, bytes: &[u8]) -> ArenaResult<()> {
        self.stdin_tx.send(bytes).await
    }
}

/// Start a sandbox from an image tag and bridge its PTY.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(
        &self,
        image: &str,
        memory_bytes: Option<i64>,
        cpu_nanos: Option<i64>,
    ) -> ArenaResult<Handle>;

    /// Idempotent.
    async fn start(&self, handle: &Handle) -> ArenaResult<()>;

    /// Opens the bidirectional stream and multiplexes the reader side into
    /// the returned `ReplayStream` so many subscribers observe identical
    /// bytes.
    async fn attach(&self, handle: &Handle) -> ArenaResult<Attachment>;

    /// Best-effort; failure must be non-fatal.
    async fn resize(&self, handle: &Handle, cols: u16, rows: u16);

    /// SIGKILL, then wait, then remove. Each step swallows "not found".
    /// The handle is unusable afterwards.
    async fn stop(&self, handle: &Handle);
}

mod mpsc_sender {
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex;

    use crate::errors::{ArenaError, ArenaResult};

    /// Wraps the writer half of an attached container so `send` can be
    /// called concurrently from many callers without tearing writes.
    pub struct StdinSender {
        inner: Mutex<Option<Box<dyn tokio::io::AsyncWrite + Send + Unpin>>>,
    }

    impl StdinSender {
        pub fn new(writer: Box<dyn tokio::io::AsyncWrite + Send + Unpin>) -> Self {
            Self {
                inner: Mutex::new(Some(writer)),
            }
        }

        pub fn closed() -> Self {
            Self {
                inner: Mutex::new(None),
            }
        }

        pub async fn send(&self, bytes: &[u8]) -> ArenaResult<()> {
            let mut guard = self.inner.lock().await;
            match guard.as_mut() {
                Some(writer) => writer
                    .write_all(bytes)
                    .await
                    .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string())),
                // A handle whose reader returned EOF: sends become a no-op.
                None => Ok(()),
            }
        }

        pub async fn mark_closed(&self) {
            *self.inner.lock().await = None;
        }
    }
}

/// Docker-backed implementation via `bollard`.
pub struct DockerContainerRuntime {
    docker: Arc<Docker>,
}

impl DockerContainerRuntime {
    pub fn connect() -> ArenaResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    async fn with_retry<F, Fut, T>(&self, op: F) -> ArenaResult<T>
    where
        F: Fn(Arc<Docker>) -> Fut,
        Fut: std::future::Future<Output = Result<T, bollard::errors::Error>>,
    {
        match op(self.docker.clone()).await {
            Ok(value) => Ok(value),
            Err(first_error) => {
                debug!(error = %first_error, "container daemon call failed, retrying once");
                op(self.docker.clone())
                    .await
                    .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerContainerRuntime {
    async fn create(
        &self,
        image: &str,
        memory_bytes: Option<i64>,
        cpu_nanos: Option<i64>,
    ) -> ArenaResult<Handle> {
        let name = format!("gba-{}", uuid::Uuid::new_v4());
        let host_config = HostConfig {
            memory: memory_bytes,
            nano_cpus: cpu_nanos,
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        self.with_retry(move |docker| {
            let options = options.clone();
            let config = config.clone();
            async move { docker.create_container(Some(options), config).await }
        })
        .await?;

        Ok(Handle(name))
    }

    async fn start(&self, handle: &Handle) -> ArenaResult<()> {
        let id = handle.0.clone();
        let result = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()), // already started
            Err(error) => Err(ArenaError::RuntimeUnavailable(error.to_string())),
        }
    }

    async fn attach(&self, handle: &Handle) -> ArenaResult<Attachment> {
        let id = handle.0.clone();
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            ..Default::default()
        };

        let AttachContainerResults { mut output, input } = self
            .docker
            .attach_container(&id, Some(options))
            .await
            .map_err(|error| ArenaError::RuntimeUnavailable(error.to_string()))?;

        let replay: ReplayStream<Frame> = ReplayStream::new();
        let replay_writer = replay.clone();
        let stdin_tx = Arc::new(mpsc_sender::StdinSender::new(Box::new(input)));
        let stdin_for_task = stdin_tx.clone();

        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                let frame = match chunk {
                    Ok(LogOutput::StdOut { message }) => Some(Frame {
                        stream: FrameStream::Stdout,
                        bytes: message.to_vec(),
                        timestamp_millis: now_millis(),
                    }),
                    Ok(LogOutput::StdErr { message }) => Some(Frame {
                        stream: FrameStream::Stderr,
                        bytes: message.to_vec(),
                        timestamp_millis: now_millis(),
                    }),
                    Ok(_) => None,
                    Err(error) => {
                        warn!(%error, "attached container stream errored");
                        None
                    }
                };
                if let Some(frame) = frame
                    && replay_writer.append(frame).await.is_err()
                {
                    break;
                }
            }
            // EOF: mark not-running. Future sends become a no-op, future
            // receives replay history then end.
            replay_writer.close().await;
            stdin_for_task.mark_closed().await;
        });

        Ok(Attachment {
            output: replay,
            stdin_tx,
        })
    }

    async fn resize(&self, handle: &Handle, cols: u16, rows: u16) {
        let options = ResizeContainerOptions {
            height: rows,
            width: cols,
        };
        if let Err(error) = self.docker.resize_container(&handle.0, options).await {
            debug!(%error, container = %handle.0, "resize failed, ignoring (best-effort)");
        }
    }

    async fn stop(&self, handle: &Handle) {
        let id = &handle.0;

        let kill_options = KillContainerOptions { signal: "SIGKILL" };
        if let Err(error) = self.docker.kill_container(id, Some(kill_options)).await
            && !is_not_found(&error)
        {
            warn!(%error, container = %id, "kill failed");
        }

        if let Err(error) = self
            .docker
            .wait_container(id, None::<bollard::container::WaitContainerOptions<String>>)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            && !is_not_found(&error)
        {
            warn!(%error, container = %id, "wait failed");
        }

        let remove_options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(error) = self.docker.remove_container(id, Some(remove_options)).await
            && !is_not_found(&error)
        {
            warn!(%error, container = %id, "remove failed");
        }
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Deterministic in-memory runtime used by tests: no Docker daemon, frames
/// are produced by `push_output` instead of a real PTY.
#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::{Attachment, ContainerRuntime, Frame, Handle};
    use crate::errors::ArenaResult;
    use crate::replay_stream::ReplayStream;

    #[derive(Default)]
    pub struct FakeContainerRuntime {
        streams: Mutex<HashMap<String, ReplayStream<Frame>>>,
    }

    impl FakeContainerRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn push_output(&self, handle: &Handle, frame: Frame) {
            if let Some(stream) = self.streams.lock().await.get(&handle.0) {
                let _ = stream.append(frame).await;
            }
        }

        pub async fn end_output(&self, handle: &Handle) {
            if let Some(stream) = self.streams.lock().await.get(&handle.0) {
                stream.close().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl ContainerRuntime for FakeContainerRuntime {
        async fn create(
            &self,
            image: &str,
            _memory_bytes: Option<i64>,
            _cpu_nanos: Option<i64>,
        ) -> ArenaResult<Handle> {
            let id = format!("fake-{image}-{}", uuid::Uuid::new_v4());
            self.streams
                .lock()
                .await
                .insert(id.clone(), ReplayStream::new());
            Ok(Handle(id))
        }

        async fn start(&self, _handle: &Handle) -> ArenaResult<()> {
            Ok(())
        }

        async fn attach(&self, handle: &Handle) -> ArenaResult<Attachment> {
            let stream = self
                .streams
                .lock()
                .await
                .get(&handle.0)
                .cloned()
                .unwrap_or_default();
            Ok(Attachment {
                output: stream,
                stdin_tx: Arc::new(super::mpsc_sender::StdinSender::new(Box::new(
                    tokio::io::sink(),
                ))),
            })
        }

        async fn resize(&self, _handle: &Handle, _cols: u16, _rows: u16) {}

        async fn stop(&self, handle: &Handle) {
            self.end_output(handle).await;
            self.streams.lock().await.remove(&handle.0);
        }
    }
}
