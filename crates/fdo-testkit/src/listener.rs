//! In-process listener for end-to-end tests.

use fdo_conformance::Listener;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// A listener serving on a loopback port until dropped.
pub struct RunningListener {
    pub addr: SocketAddr,
    pub listener: Listener,
    task: JoinHandle<()>,
}

impl RunningListener {
    /// Base URL for clients.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve `listener` on `127.0.0.1:0`.
///
/// # Panics
/// If the loopback socket cannot be bound.
pub async fn spawn_listener(listener: Listener) -> RunningListener {
    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = tcp.local_addr().expect("local addr");
    let serving = listener.clone();
    let task = tokio::spawn(async move {
        if let Err(err) = fdo_conformance::listener::serve(tcp, serving).await {
            tracing::warn!(error = %err, "test listener stopped");
        }
    });
    RunningListener {
        addr,
        listener,
        task,
    }
}
