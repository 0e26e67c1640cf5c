//! Accept loop for the daemon's control socket.

use std::fs;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ldmsd_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, ConnectionStream, ListenerError, TRANSPORT_TARGET};

const IDLE_POLL: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listener bound to the configured endpoint.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Next pending connection, or `None` when nobody is waiting.
    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    /// Binds the endpoint, replacing a stale Unix socket file if no daemon
    /// answers on it.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be resolved or bound, or when a live
    /// daemon already owns the Unix socket.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { host, port } => Acceptor::Tcp(bind_tcp(host, *port)?),
            SocketEndpoint::Unix { path } => Acceptor::Unix(bind_unix(path.as_std_path())?),
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Bound TCP address; `None` for Unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            Acceptor::Unix(_) => None,
        }
    }

    /// Endpoint the listener was bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Runs the accept loop on its own thread, handing each connection to
    /// `handler` on a dedicated worker thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_nonblocking() {
            remove_socket_file(&self.endpoint);
            return Err(ListenerError::NonBlocking { source });
        }
        let shared = Arc::new(Shared::default());
        let accept_loop = AcceptLoop {
            listener: self,
            handler,
            shared: Arc::clone(&shared),
        };
        let thread = thread::Builder::new()
            .name("ldmsd-accept".into())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shared,
            thread: Some(thread),
        })
    }
}

#[derive(Debug, Default)]
struct Shared {
    stopping: AtomicBool,
    accepted: AtomicUsize,
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub struct ListenerHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Waits for the accept loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptLoop {
    listener: SocketListener,
    handler: Arc<dyn ConnectionHandler>,
    shared: Arc<Shared>,
}

impl AcceptLoop {
    fn run(self) {
        let endpoint = &self.listener.endpoint;
        info!(target: TRANSPORT_TARGET, endpoint = %endpoint, "socket listener active");
        // Repeated identical accept failures are logged once.
        let mut reported = None::<io::ErrorKind>;
        while !self.shared.stopping.load(Ordering::SeqCst) {
            match self.listener.acceptor.accept() {
                Ok(Some(stream)) => {
                    reported = None;
                    self.spawn_worker(stream);
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    if reported != Some(error.kind()) {
                        warn!(target: TRANSPORT_TARGET, error = %error, "socket accept error");
                        reported = Some(error.kind());
                    }
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        info!(target: TRANSPORT_TARGET, endpoint = %endpoint, "socket listener stopped");
        remove_socket_file(endpoint);
    }

    fn spawn_worker(&self, stream: ConnectionStream) {
        let ordinal = self.shared.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(target: TRANSPORT_TARGET, ordinal, "accepted connection");
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("ldmsd-conn-{ordinal}"))
            .spawn(move || handler.handle(stream));
        if let Err(error) = spawned {
            warn!(
                target: TRANSPORT_TARGET,
                ordinal,
                error = %error,
                "failed to start connection worker"
            );
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let Some(addr) = addrs.next() else {
        return Err(ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        });
    };
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        reclaim_stale_socket(path)?;
    }
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

/// Removes a socket file left behind by a daemon that is no longer running.
fn reclaim_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let shown = path.display().to_string();
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: shown.clone(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket { path: shown });
    }
    match UnixStream::connect(path) {
        Ok(_live) => Err(ListenerError::UnixInUse { path: shown }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            debug!(target: TRANSPORT_TARGET, path = %shown, "removing stale socket");
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup { path: shown, source })
        }
        Err(source) => Err(ListenerError::UnixConnect { path: shown, source }),
    }
}

fn remove_socket_file(endpoint: &SocketEndpoint) {
    let SocketEndpoint::Unix { path } = endpoint else {
        return;
    };
    match fs::remove_file(path.as_std_path()) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => warn!(
            target: TRANSPORT_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        ),
        _ => {}
    }
}
