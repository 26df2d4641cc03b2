use std::sync::Arc;

use crate::common::frame::{Frame, FrameHeader, FrameWriter, FramedReader};
use crate::common::phys::PhysLayer;
use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::pdu::{Request, RequestDisplay, RequestParseError, Response, ResponseDisplay};
use crate::serial::SerialMode;
use crate::server::apply::apply_request;
use crate::server::store::DataStore;
use crate::server::table::CloseReason;
use crate::types::UnitId;

/// How a session treats the unit id of incoming frames
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Addressing {
    /// answer every unit id and echo it back
    Tcp,
    /// answer only this unit id, apply broadcast writes silently
    Serial(UnitId),
}

pub(crate) struct SessionTask {
    store: Arc<DataStore>,
    addressing: Addressing,
    reader: FramedReader,
    writer: FrameWriter,
    decode: DecodeLevel,
}

impl SessionTask {
    pub(crate) fn tcp(store: Arc<DataStore>, decode: DecodeLevel) -> Self {
        Self {
            store,
            addressing: Addressing::Tcp,
            reader: FramedReader::tcp(),
            writer: FrameWriter::tcp(),
            decode,
        }
    }

    pub(crate) fn serial(
        store: Arc<DataStore>,
        mode: SerialMode,
        unit_id: UnitId,
        decode: DecodeLevel,
    ) -> Self {
        Self {
            store,
            addressing: Addressing::Serial(unit_id),
            reader: FramedReader::serial_request(mode),
            writer: FrameWriter::serial(mode),
            decode,
        }
    }

    /// run the session until the stream ends or fails
    pub(crate) async fn run(&mut self, io: &mut PhysLayer) -> CloseReason {
        loop {
            if let Err(err) = self.run_one(io).await {
                let reason = CloseReason::from(err);
                match reason {
                    CloseReason::PeerClosed => tracing::info!("session closed by peer"),
                    _ => tracing::warn!("session closed: {}", reason),
                }
                return reason;
            }
        }
    }

    async fn run_one(&mut self, io: &mut PhysLayer) -> Result<(), RequestError> {
        let frame = match self.reader.next_frame(io, self.decode).await {
            Ok(frame) => frame,
            Err(RequestError::BadFrame(err)) if self.is_serial() => {
                // the line may recover at the next frame boundary
                tracing::warn!("discarding bad frame: {}", err);
                self.reader.reset();
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let reply = match self.addressing {
            Addressing::Tcp => true,
            Addressing::Serial(unit_id) => {
                if frame.header.unit_id.is_broadcast() {
                    false
                } else if frame.header.unit_id == unit_id {
                    true
                } else {
                    tracing::debug!("ignoring frame for unit id {}", frame.header.unit_id);
                    return Ok(());
                }
            }
        };

        match self.handle_frame(&frame, reply)? {
            Some(response) => self.reply(io, frame.header, &response).await,
            None => Ok(()),
        }
    }

    /// produce the response to a frame, if one should be sent
    fn handle_frame(&self, frame: &Frame, reply: bool) -> Result<Option<Response>, RequestError> {
        let request = match Request::parse(frame.payload()) {
            Ok(request) => request,
            Err(RequestParseError::Rejected {
                function,
                exception,
            }) => {
                tracing::warn!(
                    "rejected request with function {:#04X}: {:?}",
                    function,
                    exception
                );
                return Ok(reply.then_some(Response::Exception {
                    function,
                    exception,
                }));
            }
            Err(RequestParseError::Malformed(err)) => {
                if self.is_serial() {
                    tracing::warn!("discarding malformed request: {}", err);
                    return Ok(None);
                }
                return Err(err.into());
            }
        };

        if self.decode.app.enabled() {
            tracing::info!("PDU RX - {}", RequestDisplay::new(self.decode.app, &request));
        }

        if !reply {
            if request.is_write() {
                apply_request(&self.store, &request);
            } else {
                tracing::warn!("ignoring broadcast {}", request.function_code());
            }
            return Ok(None);
        }

        Ok(Some(apply_request(&self.store, &request)))
    }

    async fn reply(
        &mut self,
        io: &mut PhysLayer,
        header: FrameHeader,
        response: &Response,
    ) -> Result<(), RequestError> {
        if let Response::Exception {
            function,
            exception,
        } = response
        {
            tracing::warn!(
                "PDU TX - Modbus exception {:?} for function {:#04X}",
                exception,
                function
            );
        } else if self.decode.app.enabled() {
            tracing::info!("PDU TX - {}", ResponseDisplay::new(self.decode.app, response));
        }

        let bytes = self.writer.format(header, response, self.decode.frame)?;
        io.write(bytes, self.decode.physical).await?;
        Ok(())
    }

    fn is_serial(&self) -> bool {
        matches!(self.addressing, Addressing::Serial(_))
    }
}
