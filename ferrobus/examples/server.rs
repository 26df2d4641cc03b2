use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use ferrobus::*;

/// logs every access made through the wire
struct LoggingObserver;

impl DataStoreObserver for LoggingObserver {
    fn on_read(&self, event: &DataStoreEvent) {
        tracing::info!(
            "read {} {} at {}",
            event.data.len(),
            event.kind,
            event.start_address
        );
    }

    fn on_write(&self, event: &DataStoreEvent) {
        tracing::info!("write {} at {}: {:?}", event.kind, event.start_address, event.data);
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let store = Arc::new(DataStore::new(10, 10, 10, 10));
    store.add_observer(Arc::new(LoggingObserver));

    // if we ever drop this handle, the server will shutdown
    // along with all of its active sessions
    let server = spawn_tcp_server_task(
        "127.0.0.1:502".parse()?,
        store.clone(),
        ServerSettings::default().decode(AppDecodeLevel::DataValues.into()),
    )
    .await?;

    let mut events = server.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!("connection event: {:?}", event);
        }
    });

    let mut reader = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    while let Some(line) = reader.next().await {
        match line?.as_str() {
            "x" => return Ok(()),
            "c" => println!("active connections: {:?}", server.connections()),
            "uc" => toggle(&store, DataKind::Coil)?,
            "udi" => toggle(&store, DataKind::DiscreteInput)?,
            "uhr" => increment(&store, DataKind::HoldingRegister)?,
            "uir" => increment(&store, DataKind::InputRegister)?,
            _ => println!("unknown command"),
        }
    }

    Ok(())
}

fn toggle(store: &DataStore, kind: DataKind) -> Result<(), Box<dyn std::error::Error>> {
    let count = store.len(kind) as u16;
    let values = store.read(kind, 0, count)?;
    let toggled = values.bits()?.iter().map(|x| !x).collect();
    store.write(kind, 0, DataValues::Bits(toggled))?;
    Ok(())
}

fn increment(store: &DataStore, kind: DataKind) -> Result<(), Box<dyn std::error::Error>> {
    let count = store.len(kind) as u16;
    let values = store.read(kind, 0, count)?;
    let incremented = values
        .registers()?
        .iter()
        .map(|x| x.wrapping_add(1))
        .collect();
    store.write(kind, 0, DataValues::Registers(incremented))?;
    Ok(())
}
