use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tungstenite::WebSocket;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Keep at most this many browser connections open.
const MAX_CLIENTS: usize = 10;

/// Upper bound for a client to finish the handshake, or to take a message.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// The live-reload WebSocket endpoint.
///
/// Browsers connect through the snippet injected into the markup. Every
/// [`LiveReload::broadcast`] sends them the text message `"reload"`.
pub struct LiveReload {
    port: u16,
    clients: Clients,
    stop: Arc<AtomicBool>,
    tx_reload: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl LiveReload {
    /// Starts listening on `preferred`, or on an ephemeral port when it is
    /// taken.
    pub fn bind(preferred: u16) -> std::io::Result<Self> {
        let (tcp, port) = reserve_port(preferred)?;
        let clients = Clients::default();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_i = new_thread_ws_incoming(tcp, clients.clone(), stop.clone());
        let (tx_reload, thread_o) = new_thread_ws_reload(clients.clone());

        tracing::debug!(port, "live reload listening");

        Ok(Self {
            port,
            clients,
            stop,
            tx_reload: Some(tx_reload),
            threads: vec![thread_i, thread_o],
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connected browsers.
    pub fn clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Asks every connected browser to reload.
    pub fn broadcast(&self) {
        if let Some(tx) = &self.tx_reload {
            // only fails once the sender thread is gone
            let _ = tx.send(());
        }
    }

    /// Closes all connections and joins the worker threads.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }

        // closing the channel ends the sender thread
        self.tx_reload.take();
        // wake up the blocking accept
        let _ = TcpStream::connect((Ipv4Addr::LOCALHOST, self.port));

        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("live reload thread panicked");
            }
        }

        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        for mut socket in clients.drain(..) {
            socket.close(None).ok();
        }
    }
}

impl Drop for LiveReload {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, preferred)) {
        Ok(sock) => sock,
        Err(e) => {
            tracing::warn!("port {preferred} unavailable ({e}), using an ephemeral one");
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?
        }
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Clients,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live reload connection failed: {e}");
                    continue;
                }
            };

            // a silent client must not hold up the loop, or shutdown with it
            if let Err(e) = stream
                .set_read_timeout(Some(SOCKET_TIMEOUT))
                .and_then(|()| stream.set_write_timeout(Some(SOCKET_TIMEOUT)))
            {
                tracing::warn!("live reload connection failed: {e}");
                continue;
            }

            match tungstenite::accept(stream) {
                Ok(socket) => clients
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(socket),
                Err(e) => tracing::warn!("live reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            // send without the lock, so new browsers can connect meanwhile
            let mut sockets =
                std::mem::take(&mut *clients.lock().unwrap_or_else(PoisonError::into_inner));

            sockets.retain_mut(|socket| match socket.send("reload".into()) {
                Ok(_) => true,
                Err(tungstenite::error::Error::Io(e)) => {
                    tracing::debug!("dropping live reload client: {e}");
                    false
                }
                Err(
                    tungstenite::error::Error::ConnectionClosed
                    | tungstenite::error::Error::AlreadyClosed,
                ) => false,
                Err(e) => {
                    tracing::error!("live reload error: {e:?}");
                    true
                }
            });

            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            sockets.append(&mut clients);
            *clients = sockets;

            tracing::debug!(clients = clients.len(), "reload sent");

            // Close all but the most recent connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_broadcast_reaches_client() {
        let hub = LiveReload::bind(0).unwrap();
        let url = format!("ws://127.0.0.1:{}", hub.port());

        let (mut client, _) = tungstenite::connect(url).unwrap();
        wait_for(|| hub.clients() == 1);

        hub.broadcast();

        let message = client.read().unwrap();
        assert_eq!(message.to_text().unwrap(), "reload");

        hub.stop();
    }

    #[test]
    fn test_silent_client_does_not_block_stop() {
        let hub = LiveReload::bind(0).unwrap();

        // connects, never sends the handshake
        let _silent = TcpStream::connect((Ipv4Addr::LOCALHOST, hub.port())).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let (tx, rx) = channel();
        std::thread::spawn(move || {
            hub.stop();
            let _ = tx.send(());
        });

        rx.recv_timeout(Duration::from_secs(5))
            .expect("stop hung on a silent client");
    }

    #[test]
    fn test_port_taken_falls_back() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let hub = LiveReload::bind(port).unwrap();
        assert_ne!(hub.port(), port);
    }
}
