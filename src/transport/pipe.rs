//! Platform-specific endpoint implementation.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! Both sides expose the same small surface: a `Listener` that is bound to
//! the well-known name and accepts exactly one peer, the connected server
//! `Stream`, and a `ClientStream` for callers.

use std::io;

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use std::io;
    use std::path::{Path, PathBuf};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::trace;

    /// Connected server side.
    pub type Stream = UnixStream;

    /// Connected client side.
    pub type ClientStream = UnixStream;

    /// Maps an endpoint name to a socket path.
    ///
    /// A name containing `/` is taken as a path; anything else lands in the
    /// system temp directory as `<name>.sock`.
    pub fn endpoint_address(name: &str) -> String {
        if name.contains('/') {
            name.to_string()
        } else {
            std::env::temp_dir()
                .join(format!("{}.sock", name))
                .to_string_lossy()
                .into_owned()
        }
    }

    /// Unix Domain Socket listener.
    ///
    /// The socket file is removed when the listener is dropped, so nobody
    /// can connect while a session holds the only connection.
    #[derive(Debug)]
    pub struct Listener {
        listener: UnixListener,
        path: PathBuf,
    }

    impl Listener {
        /// Bind to the socket path for `name`.
        ///
        /// Removes a stale socket file left behind by an earlier run. Fails
        /// with `AddrInUse` if another listener still answers on the path.
        pub fn bind(name: &str, _buffer_size: usize) -> io::Result<Self> {
            let path = PathBuf::from(endpoint_address(name));
            if path.exists() {
                clear_stale_socket(&path)?;
            }

            let listener = UnixListener::bind(&path)?;
            Ok(Self { listener, path })
        }

        /// Wait for a single peer.
        pub async fn accept(&mut self) -> io::Result<Stream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }
    }

    fn clear_stale_socket(path: &Path) -> io::Result<()> {
        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is in use by another listener", path.display()),
            )),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                trace!(path = %path.display(), "Removing stale socket");
                std::fs::remove_file(path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    /// Accept errors that leave the listener usable.
    pub fn is_busy(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionAborted
        )
    }

    /// Close the server side of a connection.
    pub async fn disconnect(stream: &mut Stream) {
        if let Err(e) = stream.shutdown().await {
            trace!(error = %e, "Shutdown of closed stream");
        }
    }

    /// Open a client connection to `name`.
    pub async fn connect(name: &str) -> io::Result<ClientStream> {
        UnixStream::connect(endpoint_address(name)).await
    }

    /// Connect errors that mean "no listener right now, try again".
    pub fn is_not_ready(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        )
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use std::io;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use tracing::trace;

    /// All instances of the pipe are in use.
    const ERROR_PIPE_BUSY: i32 = 231;

    /// A client connected between pipe creation and `connect()`.
    const ERROR_PIPE_CONNECTED: i32 = 535;

    /// Connected server side.
    pub type Stream = NamedPipeServer;

    /// Connected client side.
    pub type ClientStream = NamedPipeClient;

    /// Maps an endpoint name to a pipe path.
    pub fn endpoint_address(name: &str) -> String {
        if name.starts_with(r"\\") {
            name.to_string()
        } else {
            format!(r"\\.\pipe\{}", name)
        }
    }

    /// Windows Named Pipe listener.
    ///
    /// Holds the single pipe instance until a peer connects; the connected
    /// instance is then handed out as the stream.
    #[derive(Debug)]
    pub struct Listener {
        server: Option<NamedPipeServer>,
    }

    impl Listener {
        /// Create the pipe instance for `name`.
        pub fn bind(name: &str, buffer_size: usize) -> io::Result<Self> {
            let size = u32::try_from(buffer_size).unwrap_or(u32::MAX);
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .in_buffer_size(size)
                .out_buffer_size(size)
                .create(endpoint_address(name))?;

            Ok(Self {
                server: Some(server),
            })
        }

        /// Wait for a single peer.
        pub async fn accept(&mut self) -> io::Result<Stream> {
            let server = self.server.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "pipe instance already in use")
            })?;

            match server.connect().await {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_CONNECTED) => {}
                Err(e) => return Err(e),
            }

            self.server.take().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, "pipe instance already in use")
            })
        }
    }

    /// Accept errors that leave the listener usable.
    pub fn is_busy(err: &io::Error) -> bool {
        err.raw_os_error() == Some(ERROR_PIPE_BUSY) || err.kind() == io::ErrorKind::Interrupted
    }

    /// Close the server side of a connection.
    pub async fn disconnect(stream: &mut Stream) {
        if let Err(e) = stream.disconnect() {
            trace!(error = %e, "Disconnect of closed pipe");
        }
    }

    /// Open a client connection to `name`.
    pub async fn connect(name: &str) -> io::Result<ClientStream> {
        ClientOptions::new().open(endpoint_address(name))
    }

    /// Connect errors that mean "no listener right now, try again".
    pub fn is_not_ready(err: &io::Error) -> bool {
        err.raw_os_error() == Some(ERROR_PIPE_BUSY) || err.kind() == io::ErrorKind::NotFound
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{
    connect, disconnect, endpoint_address, is_busy, is_not_ready, ClientStream, Listener, Stream,
};

#[cfg(windows)]
pub use windows_impl::{
    connect, disconnect, endpoint_address, is_busy, is_not_ready, ClientStream, Listener, Stream,
};

/// Describes an I/O error for logs, including the raw OS code when present.
pub fn describe(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("{} (os error {})", err.kind(), code),
        None => err.kind().to_string(),
    }
}
