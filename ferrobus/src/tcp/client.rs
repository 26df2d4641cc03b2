use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::Instrument;

use crate::client::task::MasterTask;
use crate::common::phys::PhysLayer;

/// run a master over an established connection until every handle is dropped
pub(crate) fn spawn_tcp_master_task(socket: TcpStream, remote: SocketAddr, mut task: MasterTask) {
    tokio::spawn(
        async move {
            if let Err(err) = socket.set_nodelay(true) {
                tracing::warn!("unable to disable Nagle's algorithm: {}", err);
            }
            let mut phys = PhysLayer::new_tcp(socket);
            task.run(&mut phys).await;
        }
        .instrument(tracing::info_span!("Modbus-Client-TCP", "remote" = ?remote)),
    );
}
