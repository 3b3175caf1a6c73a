use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use may::coroutine::JoinHandle;
use may_minihttp::{HttpServerWithHeaders, HttpService};
use tracing::info;

/// Maximum request headers accepted per request.
pub const MAX_REQUEST_HEADERS: usize = 32;

/// Wrapper around `may_minihttp`'s HTTP server.
pub struct HttpServer<T>(pub T);

/// Handle to a running HTTP server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Poll the listening address until a TCP connection succeeds.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the server is not accepting after about 250ms.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Cancel the accept loop and wait for it to finish.
    pub fn stop(self) {
        // SAFETY: cancelling a coroutine is unsafe in `may`; the handle is
        // owned here and the coroutine only runs the accept loop.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
        info!(addr = %self.addr, "Server stopped");
    }

    /// Block until the server coroutine exits.
    ///
    /// # Errors
    ///
    /// The panic payload if the server coroutine panicked.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService + Clone + Send + Sync + 'static> HttpServer<T> {
    /// Bind and start serving.
    ///
    /// # Errors
    ///
    /// An invalid address or a port that cannot be bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let handle = HttpServerWithHeaders::<_, MAX_REQUEST_HEADERS>(self.0).start(addr)?;
        info!(addr = %addr, "Server listening");
        Ok(ServerHandle { addr, handle })
    }
}
