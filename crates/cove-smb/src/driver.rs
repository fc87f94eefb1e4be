//! The per-context I/O driver
//!
//! SMB client libraries are strictly single-threaded: every call that
//! touches a context must come from one thread. The driver owns the
//! boxed [`ShareClient`] on a dedicated OS thread and pumps a FIFO
//! command queue; callers get a future resolved through a oneshot
//! completion when their command's turn comes.
//!
//! A caller that drops its future before completion simply leaves a
//! dead oneshot behind; the driver's send fails and the result is
//! discarded. The in-flight request itself is never aborted — the
//! library does not support that — so later operations still observe
//! its effect.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::client::{
    ClientFactory, EntryKind, OpenFlags, RawDir, RawDirEntry, RawFd, RawStat,
};
use crate::endpoint::SmbEndpoint;
use crate::error::{ClientError, Result};

/// Completion slot for one submitted command
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// One queued operation
pub(crate) enum Command {
    Stat {
        path: String,
        reply: Reply<RawStat>,
    },
    Open {
        path: String,
        flags: OpenFlags,
        reply: Reply<RawFd>,
    },
    Close {
        fd: RawFd,
    },
    Fstat {
        fd: RawFd,
        reply: Reply<RawStat>,
    },
    Pread {
        fd: RawFd,
        offset: u64,
        len: u32,
        reply: Reply<Bytes>,
    },
    Pwrite {
        fd: RawFd,
        offset: u64,
        data: Bytes,
        reply: Reply<u32>,
    },
    Ftruncate {
        fd: RawFd,
        len: u64,
        reply: Reply<()>,
    },
    Fsync {
        fd: RawFd,
        reply: Reply<()>,
    },
    Opendir {
        path: String,
        reply: Reply<RawDir>,
    },
    Readdir {
        dir: RawDir,
        reply: Reply<Option<RawDirEntry>>,
    },
    Closedir {
        dir: RawDir,
    },
    Mkdir {
        path: String,
        reply: Reply<()>,
    },
    Rmdir {
        path: String,
        reply: Reply<()>,
    },
    Unlink {
        path: String,
        reply: Reply<()>,
    },
    WriteProbe {
        path: String,
        kind: EntryKind,
        reply: Reply<bool>,
    },
    Shutdown,
}

/// Submission side of a running driver thread
#[derive(Debug, Clone)]
pub(crate) struct DriverHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl DriverHandle {
    /// Spawn the driver thread for an endpoint and connect.
    ///
    /// Resolves once the backend's `connect` finished; a failed connect
    /// tears the thread down and surfaces the error, so half-connected
    /// contexts never escape.
    pub(crate) async fn connect(
        endpoint: SmbEndpoint,
        factory: ClientFactory,
    ) -> Result<(Self, u64)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_name = format!("smb-io-{}", endpoint.share);
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(endpoint, factory, rx, ready_tx))
            .map_err(|e| ClientError::Io(format!("failed to spawn driver thread: {e}")))?;

        let max_io = ready_rx
            .await
            .map_err(|_| ClientError::ContextClosed)??;
        Ok((Self { tx }, max_io))
    }

    /// Enqueue a command; fails once the driver has shut down.
    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| ClientError::ContextClosed)
    }

    /// Ask the driver thread to dispose of the context and exit.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

fn run(
    endpoint: SmbEndpoint,
    factory: ClientFactory,
    mut rx: mpsc::UnboundedReceiver<Command>,
    ready: oneshot::Sender<Result<u64>>,
) {
    let mut client = factory(&endpoint);
    if let Err(e) = client.connect(&endpoint) {
        warn!(%endpoint, error = %e, "connect failed");
        let _ = ready.send(Err(e));
        return;
    }
    debug!(%endpoint, "context connected");
    if ready.send(Ok(client.max_io_size())).is_err() {
        // The acquiring caller vanished before connect finished.
        client.disconnect();
        return;
    }

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Stat { path, reply } => respond(reply, client.stat(&path)),
            Command::Open { path, flags, reply } => respond(reply, client.open(&path, flags)),
            Command::Close { fd } => client.close(fd),
            Command::Fstat { fd, reply } => respond(reply, client.fstat(fd)),
            Command::Pread {
                fd,
                offset,
                len,
                reply,
            } => respond(reply, client.pread(fd, offset, len).map(Bytes::from)),
            Command::Pwrite {
                fd,
                offset,
                data,
                reply,
            } => respond(reply, client.pwrite(fd, offset, &data)),
            Command::Ftruncate { fd, len, reply } => respond(reply, client.ftruncate(fd, len)),
            Command::Fsync { fd, reply } => respond(reply, client.fsync(fd)),
            Command::Opendir { path, reply } => respond(reply, client.opendir(&path)),
            Command::Readdir { dir, reply } => respond(reply, client.readdir(dir)),
            Command::Closedir { dir } => client.closedir(dir),
            Command::Mkdir { path, reply } => respond(reply, client.mkdir(&path)),
            Command::Rmdir { path, reply } => respond(reply, client.rmdir(&path)),
            Command::Unlink { path, reply } => respond(reply, client.unlink(&path)),
            Command::WriteProbe { path, kind, reply } => {
                respond(reply, client.write_probe(&path, kind))
            }
            Command::Shutdown => break,
        }
    }

    client.disconnect();
    debug!(%endpoint, "context closed");
}

fn respond<T>(reply: Reply<T>, result: Result<T>) {
    if reply.send(result).is_err() {
        // Dropped future; the completion is recorded and discarded.
        trace!("discarding completion for a cancelled operation");
    }
}
