use may::coroutine::JoinHandle;
use may_minihttp::{HttpServer as MiniHttpServer, HttpService};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Wrapper around may_minihttp's HTTP server.
///
/// Provides a typed interface for starting and managing the listener
/// coroutine.
pub struct HttpServer<T>(pub T);

/// Handle to a running HTTP server.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server to be ready to accept connections.
    ///
    /// Polls the bound address with TCP connects; useful in tests so the
    /// first request isn't racing the listener.
    ///
    /// # Errors
    ///
    /// `TimedOut` if the listener doesn't come up within ~250 ms.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop the listener coroutine and wait for it to finish.
    pub fn stop(self) {
        // SAFETY: cancellation of the listener coroutine is the intended
        // shutdown path; the handle is valid because we own it.
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    /// Block until the listener coroutine completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener coroutine panicked.
    pub fn join(self) -> std::thread::Result<()> {
        self.handle.join()
    }
}

impl<T: HttpService + Clone + Send + Sync + 'static> HttpServer<T> {
    /// Start the HTTP server on the given address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the port cannot be
    /// bound.
    pub fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid address"))?;
        let handle = MiniHttpServer(self.0).start(addr)?;
        Ok(ServerHandle { addr, handle })
    }
}
