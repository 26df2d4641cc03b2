use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferrobus::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder {
    reads: Mutex<Vec<DataStoreEvent>>,
    writes: Mutex<Vec<DataStoreEvent>>,
}

impl DataStoreObserver for Recorder {
    fn on_read(&self, event: &DataStoreEvent) {
        self.reads.lock().unwrap().push(event.clone());
    }

    fn on_write(&self, event: &DataStoreEvent) {
        self.writes.lock().unwrap().push(event.clone());
    }
}

fn any_local_port() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

async fn spawn_slave(store: Arc<DataStore>) -> ServerHandle {
    spawn_tcp_server_task(any_local_port(), store, ServerSettings::default())
        .await
        .unwrap()
}

async fn connect(server: &ServerHandle) -> Master {
    Master::connect_tcp(
        server.local_addr(),
        UnitId::new(1),
        MasterSettings::default(),
    )
    .await
    .unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn test_requests_and_responses() {
    let store = Arc::new(DataStore::new(10, 10, 10, 10));
    let server = spawn_slave(store.clone()).await;
    let master = connect(&server).await;

    store
        .write(DataKind::DiscreteInput, 0, DataValues::Bits(vec![true]))
        .unwrap();
    store
        .write(DataKind::InputRegister, 0, DataValues::Registers(vec![0xCAFE]))
        .unwrap();

    assert_eq!(
        master
            .read_discrete_inputs(AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, true), Indexed::new(1, false)]
    );

    assert_eq!(
        master
            .read_input_registers(AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, 0xCAFE), Indexed::new(1, 0x0000)]
    );

    // do a single coil write and verify that it was written by reading it
    assert_eq!(
        master
            .write_single_coil(Indexed::new(1, true))
            .await
            .unwrap(),
        Indexed::new(1, true)
    );
    assert_eq!(
        master
            .read_coils(AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, false), Indexed::new(1, true)]
    );

    // do a single register write and verify that it was written by reading it
    assert_eq!(
        master
            .write_single_register(Indexed::new(1, 0xABCD))
            .await
            .unwrap(),
        Indexed::new(1, 0xABCD)
    );
    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(0, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, 0x0000), Indexed::new(1, 0xABCD)]
    );

    // write multiple coils and verify that they were written
    assert_eq!(
        master
            .write_multiple_coils(WriteMultiple::from(0, vec![true, true, true]).unwrap())
            .await
            .unwrap(),
        AddressRange::try_from(0, 3).unwrap()
    );
    assert_eq!(
        master
            .read_coils(AddressRange::try_from(0, 3).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(0, true),
            Indexed::new(1, true),
            Indexed::new(2, true)
        ]
    );

    // write registers and verify that they were written
    assert_eq!(
        master
            .write_multiple_registers(WriteMultiple::from(0, vec![0x0102, 0x0304, 0x0506]).unwrap())
            .await
            .unwrap(),
        AddressRange::try_from(0, 3).unwrap()
    );
    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(0, 3).unwrap())
            .await
            .unwrap(),
        vec![
            Indexed::new(0, 0x0102),
            Indexed::new(1, 0x0304),
            Indexed::new(2, 0x0506)
        ]
    );

    // the write is applied before the read
    assert_eq!(
        master
            .read_write_multiple_registers(
                ReadWriteMultiple::new(
                    AddressRange::try_from(1, 3).unwrap(),
                    2,
                    vec![0xAAAA, 0xBBBB]
                )
                .unwrap()
            )
            .await
            .unwrap(),
        vec![
            Indexed::new(1, 0x0304),
            Indexed::new(2, 0xAAAA),
            Indexed::new(3, 0xBBBB)
        ]
    );

    // out of range access is a device exception
    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(9, 2).unwrap())
            .await,
        Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
    );

    // invalid requests never leave the master
    assert_eq!(
        master
            .read_coils(AddressRange { start: 0, count: 0 })
            .await,
        Err(RequestError::BadRequest(InvalidRequest::CountOfZero))
    );
}

async fn test_read_notification() {
    let store = Arc::new(DataStore::new(0, 0, 20, 0));
    store
        .write(DataKind::HoldingRegister, 10, DataValues::Registers(vec![100, 200]))
        .unwrap();

    let recorder = Arc::new(Recorder::default());
    store.add_observer(recorder.clone());

    let server = spawn_slave(store).await;
    let master = connect(&server).await;

    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(10, 2).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(10, 100), Indexed::new(11, 200)]
    );

    // notifications are delivered before the response is sent
    let reads = recorder.reads.lock().unwrap().clone();
    assert_eq!(
        reads,
        vec![DataStoreEvent {
            start_address: 10,
            kind: DataKind::HoldingRegister,
            data: DataValues::Registers(vec![100, 200]),
        }]
    );
    assert!(recorder.writes.lock().unwrap().is_empty());
}

async fn hammer(master: Master, start: u16) {
    let range = AddressRange::try_from(start, 4).unwrap();
    for i in 0..200u16 {
        let values = vec![i.wrapping_add(start); 4];
        master
            .write_multiple_registers(WriteMultiple::from(start, values.clone()).unwrap())
            .await
            .unwrap();
        let read: Vec<u16> = master
            .read_holding_registers(range)
            .await
            .unwrap()
            .into_iter()
            .map(|x| x.value)
            .collect();
        assert_eq!(read, values);
    }
}

async fn test_concurrent_masters() {
    let store = Arc::new(DataStore::new(0, 0, 100, 0));
    let server = spawn_slave(store).await;

    let first = connect(&server).await;
    let second = connect(&server).await;

    let a = tokio::spawn(hammer(first, 0));
    let b = tokio::spawn(hammer(second, 50));
    a.await.unwrap();
    b.await.unwrap();
}

async fn test_graceful_close_shrinks_table() {
    let server = spawn_slave(Arc::new(DataStore::new(1, 1, 1, 1))).await;
    let mut events = server.subscribe();

    let master = connect(&server).await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Accepted(_)
    ));
    assert_eq!(server.connection_count(), 1);

    // dropping the last handle closes the socket
    drop(master);

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Closed {
            reason: CloseReason::PeerClosed,
            ..
        }
    ));
    assert_eq!(server.connection_count(), 0);
}

async fn test_reset_shrinks_table() {
    let server = spawn_slave(Arc::new(DataStore::new(1, 1, 1, 1))).await;
    let mut events = server.subscribe();

    let socket = TcpStream::connect(server.local_addr()).await.unwrap();
    let local = socket.local_addr().unwrap();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Accepted(local));
    assert_eq!(server.connections(), vec![local]);

    // a zero linger time makes the close send a RST
    socket.set_linger(Some(Duration::ZERO)).unwrap();
    drop(socket);

    match next_event(&mut events).await {
        ConnectionEvent::Closed { remote, .. } => assert_eq!(remote, local),
        event => panic!("unexpected event: {event:?}"),
    }
    assert_eq!(server.connection_count(), 0);
}

async fn test_malformed_frame_closes_only_that_connection() {
    let store = Arc::new(DataStore::new(1, 1, 1, 1));
    let server = spawn_slave(store).await;
    let mut events = server.subscribe();

    let master = connect(&server).await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Accepted(_)
    ));

    let mut rogue = TcpStream::connect(server.local_addr()).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Accepted(_)
    ));

    // non-zero protocol id
    rogue
        .write_all(&[0x00, 0x01, 0x00, 0x07, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Closed {
            reason: CloseReason::DecodeFailure(_),
            ..
        }
    ));
    assert_eq!(server.connection_count(), 1);

    // the other connection is unaffected
    assert_eq!(
        master
            .read_coils(AddressRange::try_from(0, 1).unwrap())
            .await
            .unwrap(),
        vec![Indexed::new(0, false)]
    );
}

/// accepts one connection and counts requests without answering them,
/// or answers each one with an illegal data address exception
async fn spawn_fake_slave(answer: bool) -> (SocketAddr, Arc<Mutex<usize>>) {
    let listener = TcpListener::bind(any_local_port()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0; 12];
        while socket.read_exact(&mut request).await.is_ok() {
            *counter.lock().unwrap() += 1;
            if answer {
                let reply = [request[0], request[1], 0, 0, 0, 3, request[6], 0x83, 0x02];
                if socket.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
    });

    (addr, count)
}

async fn test_silent_slave_exhausts_retries() {
    let (addr, count) = spawn_fake_slave(false).await;
    let master = Master::connect_tcp(
        addr,
        UnitId::new(1),
        MasterSettings::default()
            .retries(2)
            .response_timeout(Duration::from_millis(50))
            .wait_to_retry(Duration::from_millis(10)),
    )
    .await
    .unwrap();

    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(0, 1).unwrap())
            .await,
        Err(RequestError::Communication(CommunicationFailure {
            attempts: 3,
            kind: FailureKind::NoResponse,
        }))
    );
    assert_eq!(*count.lock().unwrap(), 3);
}

async fn test_exception_is_not_retried() {
    let (addr, count) = spawn_fake_slave(true).await;
    let master = Master::connect_tcp(
        addr,
        UnitId::new(1),
        MasterSettings::default()
            .retries(3)
            .response_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();

    assert_eq!(
        master
            .read_holding_registers(AddressRange::try_from(0, 1).unwrap())
            .await,
        Err(RequestError::Exception(ExceptionCode::IllegalDataAddress))
    );

    // give a retry, if any, time to arrive
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn can_read_and_write_values() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_requests_and_responses())
}

#[test]
fn read_emits_one_notification() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_read_notification())
}

#[test]
fn concurrent_masters_on_disjoint_ranges_do_not_interfere() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_concurrent_masters())
}

#[test]
fn graceful_close_removes_connection() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_graceful_close_shrinks_table())
}

#[test]
fn reset_removes_connection() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_reset_shrinks_table())
}

#[test]
fn malformed_frame_closes_only_that_connection() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_malformed_frame_closes_only_that_connection())
}

#[test]
fn silent_slave_exhausts_retries() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_silent_slave_exhausts_retries())
}

#[test]
fn exception_is_not_retried() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_exception_is_not_retried())
}
