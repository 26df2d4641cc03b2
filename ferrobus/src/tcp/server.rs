use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::server::session::SessionTask;
use crate::server::store::DataStore;
use crate::server::table::ConnectionTable;

/// pause after a failed accept, e.g. while the process is out of file descriptors
pub(crate) const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Source of inbound TCP connections
pub(crate) trait Accept: Send + 'static {
    fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<(TcpStream, SocketAddr)>>;
}

impl Accept for TcpListener {
    fn poll_accept(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<(TcpStream, SocketAddr)>> {
        TcpListener::poll_accept(self, cx)
    }
}

/// Accepts connections and runs one session task per connection
pub(crate) struct ServerTask<L = TcpListener> {
    listener: L,
    store: Arc<DataStore>,
    table: Arc<ConnectionTable>,
    decode: DecodeLevel,
}

impl<L> ServerTask<L>
where
    L: Accept,
{
    pub(crate) fn new(
        listener: L,
        store: Arc<DataStore>,
        table: Arc<ConnectionTable>,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            listener,
            store,
            table,
            decode,
        }
    }

    pub(crate) async fn run(&mut self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("server shutdown");
                    break;
                }
                result = std::future::poll_fn(|cx| self.listener.poll_accept(cx)) => {
                    match result {
                        Err(err) => {
                            // accept failures are transient, existing sessions keep running
                            tracing::warn!("error accepting connection: {}", err);
                            tokio::select! {
                                _ = shutdown.recv() => {
                                    tracing::info!("server shutdown");
                                    break;
                                }
                                _ = tokio::time::sleep(ACCEPT_ERROR_DELAY) => {}
                            }
                        }
                        Ok((socket, addr)) => self.handle(socket, addr),
                    }
                }
            }
        }

        self.table.shutdown();
    }

    fn handle(&self, socket: TcpStream, addr: SocketAddr) {
        tracing::info!("accepted connection from: {}", addr);

        let store = self.store.clone();
        let table = self.table.clone();
        let decode = self.decode;

        self.table.add(addr, move |id| {
            tokio::spawn(
                async move {
                    let mut phys = PhysLayer::new_tcp(socket);
                    let reason = SessionTask::tcp(store, decode).run(&mut phys).await;
                    table.remove(addr, id, reason);
                }
                .instrument(tracing::info_span!("Session", "remote" = ?addr)),
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::server::table::ConnectionEvent;
    use crate::types::{DataKind, DataValues};

    /// fails with EMFILE every time `failures` is non-zero, then behaves like the real listener
    struct FlakyListener {
        inner: TcpListener,
        failures: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Accept for FlakyListener {
        fn poll_accept(
            &mut self,
            cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<(TcpStream, SocketAddr)>> {
            use std::sync::atomic::Ordering;
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |x| x.checked_sub(1))
                .is_ok()
            {
                return Poll::Ready(Err(std::io::Error::from_raw_os_error(24)));
            }
            self.inner.poll_accept(cx)
        }
    }

    async fn read_register_zero(socket: &mut TcpStream, tx_id: u8) -> [u8; 11] {
        socket
            .write_all(&[0x00, tx_id, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let mut reply = [0; 11];
        socket.read_exact(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn accept_errors_leave_existing_sessions_running() {
        let store = Arc::new(DataStore::new(1, 1, 1, 1));
        store
            .write(DataKind::HoldingRegister, 0, DataValues::Registers(vec![0xCAFE]))
            .unwrap();

        let inner = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let local = inner.local_addr().unwrap();
        let failures = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let listener = FlakyListener {
            inner,
            failures: failures.clone(),
        };

        let table = Arc::new(ConnectionTable::new(16));
        let mut events = table.subscribe();
        let (_shutdown, rx) = tokio::sync::mpsc::channel(1);
        let mut task = ServerTask::new(listener, store, table.clone(), DecodeLevel::nothing());
        let server = tokio::spawn(async move { task.run(rx).await });

        let mut healthy = TcpStream::connect(local).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Accepted(_)
        ));

        // the acceptor is parked on the listener, so the next polls will fail
        failures.store(3, std::sync::atomic::Ordering::SeqCst);
        let mut fresh = TcpStream::connect(local).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::Accepted(_)
        ));

        assert_eq!(failures.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!server.is_finished());
        assert_eq!(table.len(), 2);
        assert_eq!(
            read_register_zero(&mut healthy, 1).await,
            [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0xCA, 0xFE]
        );
        assert_eq!(
            read_register_zero(&mut fresh, 2).await,
            [0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0xCA, 0xFE]
        );
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_accept_error_delay() {
        let inner = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let listener = FlakyListener {
            inner,
            failures: Arc::new(std::sync::atomic::AtomicUsize::new(usize::MAX)),
        };

        let table = Arc::new(ConnectionTable::new(16));
        let (shutdown, rx) = tokio::sync::mpsc::channel(1);
        let mut task = ServerTask::new(
            listener,
            Arc::new(DataStore::new(1, 1, 1, 1)),
            table,
            DecodeLevel::nothing(),
        );
        let server = tokio::spawn(async move { task.run(rx).await });

        tokio::task::yield_now().await;
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
