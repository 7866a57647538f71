//! Unix socket listener.
//!
//! One task accepts connections; each connection gets its own task that
//! reads a frame, dispatches it, writes exactly one response line and then
//! reads the next frame.

use super::dispatcher::Dispatcher;
use super::{Result, ServerConfig, ServerError};
use consulns_metrics::metrics;
use parking_lot::{Mutex, RwLock};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Connection ID counter.
static CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// Listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, not yet bound.
    Created,
    /// Bound and accepting connections.
    Listening,
    /// Listening socket closed, waiting for connections to finish.
    Draining,
    /// All connections closed and the socket file removed.
    Stopped,
}

/// Remote backend server on a Unix domain socket.
pub struct UnixServer {
    path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    listener: Mutex<Option<UnixListener>>,
    state: RwLock<ListenerState>,
}

impl UnixServer {
    /// Creates a server for `path`. Nothing is bound until [`bind`](Self::bind).
    pub fn new(path: impl Into<PathBuf>, dispatcher: Arc<Dispatcher>, config: ServerConfig) -> Self {
        Self {
            path: path.into(),
            dispatcher,
            config,
            listener: Mutex::new(None),
            state: RwLock::new(ListenerState::Created),
        }
    }

    /// Returns the socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current state.
    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn set_state(&self, state: ListenerState) {
        debug!(path = %self.path.display(), ?state, "listener state");
        *self.state.write() = state;
    }

    /// Binds the socket, replacing a stale socket file left at the path.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self) -> Result<()> {
        if self.state() != ListenerState::Created {
            return Err(ServerError::Shutdown);
        }

        remove_stale_socket(&self.path)?;
        let listener = UnixListener::bind(&self.path)?;
        *self.listener.lock() = Some(listener);
        self.set_state(ListenerState::Listening);

        info!(path = %self.path.display(), "remote backend listening");
        Ok(())
    }

    /// Accepts connections until `shutdown` fires, then drains.
    ///
    /// After the token fires the listening socket is closed, every open
    /// connection is allowed to finish its in-flight request, and the
    /// socket file is removed.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.listener.lock().take().ok_or(ServerError::Shutdown)?;
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let max_frame_len = self.config.max_frame_len;
                        let shutdown = shutdown.clone();
                        let conn_id = CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

                        tracker.spawn(async move {
                            let open = dispatcher.stats().inc_connection();
                            metrics().record_connection();
                            metrics().set_active_connections(open);

                            if let Err(e) =
                                handle_connection(stream, &dispatcher, max_frame_len, shutdown, conn_id).await
                            {
                                debug!(error = %e, conn_id, "connection error");
                            }

                            let open = dispatcher.stats().dec_connection();
                            metrics().set_active_connections(open);
                        });
                    }
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        error!(error = %e, "error accepting connection");
                    }
                },
            }
        }

        self.set_state(ListenerState::Draining);
        drop(listener);

        tracker.close();
        info!(connections = tracker.len(), "draining connections");
        tracker.wait().await;

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, path = %self.path.display(), "could not remove socket file");
            }
        }

        self.set_state(ListenerState::Stopped);
        info!(path = %self.path.display(), "remote backend stopped");
        Ok(())
    }
}

/// Removes a socket file left over from a previous run.
///
/// Anything at the path that is not a socket is left alone and reported.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "removing stale socket");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn handle_connection(
    stream: UnixStream,
    dispatcher: &Dispatcher,
    max_frame_len: usize,
    shutdown: CancellationToken,
    conn_id: u64,
) -> Result<()> {
    trace!(conn_id, "new connection");

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();

        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                trace!(conn_id, "closing connection on shutdown");
                break;
            }
            read = read_frame(&mut reader, &mut buf, max_frame_len) => read,
        };

        match read {
            Ok(0) => {
                trace!(conn_id, "connection closed by client");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, conn_id, "read error");
                return Err(ServerError::Io(e));
            }
        }

        let received_at = Instant::now();
        let frame = trim_frame(&buf);

        let response = match std::str::from_utf8(frame) {
            Ok(text) => {
                trace!(conn_id, frame = %text, "request");
                dispatcher.dispatch(text, received_at).await
            }
            Err(e) => {
                warn!(error = %e, conn_id, "request is not UTF-8");
                super::Response::failure()
            }
        };

        let line = response.to_line();
        trace!(conn_id, response = %line.trim_end(), "response");
        write_half.write_all(line.as_bytes()).await?;
    }

    Ok(())
}

/// Reads one newline-terminated frame into `buf`.
///
/// Returns the number of bytes read, 0 at end of stream. A frame longer
/// than `max_len` bytes (newline excluded) is an `InvalidData` error.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let n = reader.take(limit).read_until(b'\n', buf).await?;

    if n > max_len && buf.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame exceeds {max_len} bytes"),
        ));
    }

    Ok(n)
}

/// Strips the line terminator (`\n` or `\r\n`) and surrounding whitespace.
fn trim_frame(buf: &[u8]) -> &[u8] {
    let start = buf
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(buf.len());
    let end = buf
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &buf[start..end]
}
