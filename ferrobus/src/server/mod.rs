use std::net::SocketAddr;
use std::sync::Arc;

use tracing::Instrument;

use crate::common::phys::{AsyncStream, PhysLayer};
use crate::decode::DecodeLevel;
use crate::serial::SerialMode;
use crate::tcp::server::ServerTask;
use crate::types::UnitId;

pub(crate) mod apply;
pub(crate) mod session;
pub(crate) mod store;
pub(crate) mod table;

pub use apply::apply_request;
pub use store::*;
pub use table::{CloseReason, ConnectionEvent};

use session::SessionTask;
use table::ConnectionTable;

/// number of connection events buffered for a slow subscriber
const EVENT_CAPACITY: usize = 64;

/// Settings shared by TCP and serial slaves
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// unit id a serial slave answers to, ignored by TCP slaves which answer every unit id
    pub unit_id: UnitId,
    /// decode level used for logging
    pub decode: DecodeLevel,
}

impl ServerSettings {
    /// construct settings from the unit id, with logging disabled
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            decode: DecodeLevel::default(),
        }
    }

    /// change the decode level
    pub fn decode(mut self, decode: DecodeLevel) -> Self {
        self.decode = decode;
        self
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new(UnitId::new(1))
    }
}

/// A handle to a TCP slave task. The task is shutdown when the handle is dropped.
///
/// Shutting down stops accepting connections and aborts every session.
#[derive(Debug)]
pub struct ServerHandle {
    _tx: tokio::sync::mpsc::Sender<()>,
    local_addr: SocketAddr,
    table: Arc<ConnectionTable>,
}

impl ServerHandle {
    /// address the slave is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// number of active sessions
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// remote addresses of the active sessions
    pub fn connections(&self) -> Vec<SocketAddr> {
        self.table.remotes()
    }

    /// receive an event each time a session starts or ends
    ///
    /// A `Closed` event is published only after the session is gone from the table.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ConnectionEvent> {
        self.table.subscribe()
    }
}

/// Spawns a TCP slave task onto the runtime. This method can only
/// be called from within the runtime context.
///
/// Each incoming connection will spawn a new task to handle it. Bind to port zero and read
/// [`ServerHandle::local_addr`] to let the OS pick a port.
///
/// * `addr` - A socket address to bound to
/// * `store` - Data store shared by every session
/// * `settings` - Logging settings, the unit id is not used for TCP
pub async fn spawn_tcp_server_task(
    addr: SocketAddr,
    store: Arc<DataStore>,
    settings: ServerSettings,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let table = Arc::new(ConnectionTable::new(EVENT_CAPACITY));

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let mut task = ServerTask::new(listener, store, table.clone(), settings.decode);
    tokio::spawn(
        async move { task.run(rx).await }
            .instrument(tracing::info_span!("Modbus-Server-TCP", "listen" = ?local_addr)),
    );

    Ok(ServerHandle {
        _tx: tx,
        local_addr,
        table,
    })
}

/// A handle to a serial slave task. The task is shutdown when the handle is dropped.
#[derive(Debug)]
pub struct SerialServerHandle {
    _tx: tokio::sync::mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SerialServerHandle {
    /// true once the stream has ended or failed
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a serial slave on an already open stream, e.g. a serial port adapter
///
/// The slave answers frames for `settings.unit_id` and applies broadcast writes without
/// replying. Frames that fail their checksum are discarded. The task ends when the stream
/// ends or fails.
pub fn spawn_serial_server_task<S>(
    stream: S,
    mode: SerialMode,
    store: Arc<DataStore>,
    settings: ServerSettings,
) -> SerialServerHandle
where
    S: AsyncStream + 'static,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    let mut session = SessionTask::serial(store, mode, settings.unit_id, settings.decode);

    let task = tokio::spawn(
        async move {
            let mut phys = PhysLayer::new_boxed(stream);
            tokio::select! {
                _ = rx.recv() => {
                    tracing::info!("server shutdown");
                }
                reason = session.run(&mut phys) => {
                    tracing::info!("serial session ended: {}", reason);
                }
            }
        }
        .instrument(tracing::info_span!(
            "Modbus-Server-Serial",
            "mode" = %mode,
            "unit" = %settings.unit_id
        )),
    );

    SerialServerHandle { _tx: tx, task }
}
