use std::net::{Ipv4Addr, SocketAddr};
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tracing::info;

/// A static file server for the output directory, running on its own thread.
pub(crate) struct HttpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<anyhow::Result<()>>>,
}

impl HttpServer {
    /// Binds `port`, or an ephemeral port when it is taken, and starts
    /// serving `dist`.
    ///
    /// The socket is bound before the server thread starts, so a failure is
    /// reported here instead of inside the thread.
    pub(crate) fn start(dist: Utf8PathBuf, port: u16) -> std::io::Result<Self> {
        let listener = match std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("port {port} unavailable ({e}), using an ephemeral one");
                std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?
            }
        };
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        info!(url = %style(format!("http://localhost:{}/", addr.port())).yellow(), "starting a HTTP server");

        let (tx, rx) = oneshot::channel();

        let thread = thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(serve(listener, dist, rx))
        });

        Ok(Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting connections and waits for the server thread.
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("HTTP server failed: {e}"),
                Err(_) => tracing::error!("HTTP server thread panicked"),
            }
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    listener: std::net::TcpListener,
    dist: Utf8PathBuf,
    shutdown: oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let router = Router::new()
        // path to the output directory
        .fallback_service(ServeDir::new(dist));

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            shutdown.await.ok();
        })
        .await?;

    Ok(())
}
