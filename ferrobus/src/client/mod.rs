use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::client::task::{Command, MasterTask};
use crate::common::phys::{AsyncStream, PhysLayer};
use crate::error::{InternalError, RequestError};
use crate::pdu::{Request, Response};
use crate::serial::SerialMode;
use crate::types::{AddressRange, Indexed, ReadWriteMultiple, UnitId, WriteMultiple};

pub(crate) mod settings;
pub(crate) mod task;

pub use settings::*;

/// maximum number of calls queued behind the one in flight
const MAX_QUEUED_REQUESTS: usize = 16;

/// Handle used to make requests against a master task
///
/// Each master owns one stream and executes its calls one at a time. Clones share the same
/// task, which shuts down once every clone is dropped.
#[derive(Clone, Debug)]
pub struct Master {
    tx: mpsc::Sender<Command>,
}

impl Master {
    /// Connect to a TCP slave and spawn the task that executes requests over the connection
    ///
    /// This method can only be called from within the Tokio runtime.
    ///
    /// * `addr` - Socket address of the slave
    /// * `unit_id` - Unit id placed in every request
    /// * `settings` - Retry, timeout and logging settings
    pub async fn connect_tcp(
        addr: SocketAddr,
        unit_id: UnitId,
        settings: MasterSettings,
    ) -> Result<Self, std::io::Error> {
        let socket = tokio::net::TcpStream::connect(addr).await?;
        tracing::info!("connected to: {}", addr);
        let (tx, rx) = mpsc::channel(MAX_QUEUED_REQUESTS);
        crate::tcp::client::spawn_tcp_master_task(
            socket,
            addr,
            MasterTask::tcp(rx, unit_id, settings),
        );
        Ok(Self { tx })
    }

    /// Spawn a master task that talks RTU or ASCII over an already open stream
    ///
    /// Any byte stream works, e.g. a serial port adapter or an in-memory pipe. This method can
    /// only be called from within the Tokio runtime.
    pub fn spawn_serial<S>(
        stream: S,
        mode: SerialMode,
        unit_id: UnitId,
        settings: MasterSettings,
    ) -> Self
    where
        S: AsyncStream + 'static,
    {
        let (tx, rx) = mpsc::channel(MAX_QUEUED_REQUESTS);
        let mut task = MasterTask::serial(rx, mode, unit_id, settings);
        tokio::spawn(
            async move {
                let mut phys = PhysLayer::new_boxed(stream);
                task.run(&mut phys).await;
            }
            .instrument(tracing::info_span!("Modbus-Client-Serial", "mode" = %mode)),
        );
        Self { tx }
    }

    /// Execute any request and return the matching response
    ///
    /// The request is validated before anything is sent. A device exception is returned as
    /// [`RequestError::Exception`], never as [`Response::Exception`].
    pub async fn call(&self, request: Request) -> Result<Response, RequestError> {
        request.validate()?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command { request, reply })
            .await
            .map_err(|_| RequestError::Shutdown)?;
        rx.await?
    }

    /// Read coils (0x01)
    pub async fn read_coils(&self, range: AddressRange) -> Result<Vec<Indexed<bool>>, RequestError> {
        match self.call(Request::ReadCoils(range)).await? {
            Response::ReadCoils(values) => Ok(indexed(range, values)),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Read discrete inputs (0x02)
    pub async fn read_discrete_inputs(
        &self,
        range: AddressRange,
    ) -> Result<Vec<Indexed<bool>>, RequestError> {
        match self.call(Request::ReadDiscreteInputs(range)).await? {
            Response::ReadDiscreteInputs(values) => Ok(indexed(range, values)),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Read holding registers (0x03)
    pub async fn read_holding_registers(
        &self,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        match self.call(Request::ReadHoldingRegisters(range)).await? {
            Response::ReadHoldingRegisters(values) => Ok(indexed(range, values.into_inner())),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Read input registers (0x04)
    pub async fn read_input_registers(
        &self,
        range: AddressRange,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        match self.call(Request::ReadInputRegisters(range)).await? {
            Response::ReadInputRegisters(values) => Ok(indexed(range, values.into_inner())),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Write a single coil (0x05), returning the echo from the slave
    pub async fn write_single_coil(
        &self,
        value: Indexed<bool>,
    ) -> Result<Indexed<bool>, RequestError> {
        match self.call(Request::WriteSingleCoil(value)).await? {
            Response::WriteSingleCoil(echo) => Ok(echo),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Write a single register (0x06), returning the echo from the slave
    pub async fn write_single_register(
        &self,
        value: Indexed<u16>,
    ) -> Result<Indexed<u16>, RequestError> {
        match self.call(Request::WriteSingleRegister(value)).await? {
            Response::WriteSingleRegister(echo) => Ok(echo),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Write multiple coils (0x0F), returning the range written
    pub async fn write_multiple_coils(
        &self,
        value: WriteMultiple<bool>,
    ) -> Result<AddressRange, RequestError> {
        match self.call(Request::WriteMultipleCoils(value)).await? {
            Response::WriteMultipleCoils(range) => Ok(range),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Write multiple registers (0x10), returning the range written
    pub async fn write_multiple_registers(
        &self,
        value: WriteMultiple<u16>,
    ) -> Result<AddressRange, RequestError> {
        match self.call(Request::WriteMultipleRegisters(value)).await? {
            Response::WriteMultipleRegisters(range) => Ok(range),
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }

    /// Write then read holding registers in one transaction (0x17)
    pub async fn read_write_multiple_registers(
        &self,
        value: ReadWriteMultiple,
    ) -> Result<Vec<Indexed<u16>>, RequestError> {
        let range = value.read_range;
        match self.call(Request::ReadWriteMultipleRegisters(value)).await? {
            Response::ReadWriteMultipleRegisters(values) => {
                Ok(indexed(range, values.into_inner()))
            }
            _ => Err(InternalError::UnexpectedResponse.into()),
        }
    }
}

fn indexed<T>(range: AddressRange, values: Vec<T>) -> Vec<Indexed<T>> {
    range
        .iter()
        .zip(values)
        .map(|(index, value)| Indexed::new(index, value))
        .collect()
}
