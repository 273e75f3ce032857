use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::warn;

use crate::util::retry::RetryPolicy;

/// The port may be held by a previous process instance for a while after a restart
pub async fn bind_with_retry(addr: SocketAddr, policy: &RetryPolicy) -> anyhow::Result<TcpListener> {
    policy.retry(&format!("binding {}", addr), || async {
        TcpListener::bind(addr).await
            .map_err(|e| {
                warn!("binding {} failed: {}", addr, e);
                e.into()
            })
    }).await
}

/// pause after a failed `accept()`: errors like running out of file descriptors tend to persist
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Waits for the next incoming connection. Accept errors are logged and retried after a pause.
///  Cancel safe.
pub async fn accept_next(listener: &TcpListener) -> (TcpStream, SocketAddr) {
    accept_with_backoff(|| listener.accept()).await
}

async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!("error accepting connection: {}", e);
                time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
