use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Instrument;

use crate::client::settings::MasterSettings;
use crate::common::frame::{FrameHeader, FrameWriter, FramedReader, TxId};
use crate::common::phys::PhysLayer;
use crate::error::{CommunicationFailure, FailureKind, InvalidRequest, RequestError};
use crate::pdu::{Request, RequestDisplay, Response, ResponseDisplay};
use crate::serial::SerialMode;
use crate::types::UnitId;

/// A request waiting to be executed along with the promise that completes it
pub(crate) struct Command {
    pub(crate) request: Request,
    pub(crate) reply: oneshot::Sender<Result<Response, RequestError>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Link {
    Tcp,
    Serial,
}

/// Executes requests one at a time over a single stream
pub(crate) struct MasterTask {
    rx: mpsc::Receiver<Command>,
    link: Link,
    unit_id: UnitId,
    settings: MasterSettings,
    reader: FramedReader,
    writer: FrameWriter,
    tx_id: TxId,
}

impl MasterTask {
    pub(crate) fn tcp(
        rx: mpsc::Receiver<Command>,
        unit_id: UnitId,
        settings: MasterSettings,
    ) -> Self {
        Self {
            rx,
            link: Link::Tcp,
            unit_id,
            settings,
            reader: FramedReader::tcp(),
            writer: FrameWriter::tcp(),
            tx_id: TxId::default(),
        }
    }

    pub(crate) fn serial(
        rx: mpsc::Receiver<Command>,
        mode: SerialMode,
        unit_id: UnitId,
        settings: MasterSettings,
    ) -> Self {
        Self {
            rx,
            link: Link::Serial,
            unit_id,
            settings,
            reader: FramedReader::serial_response(mode),
            writer: FrameWriter::serial(mode),
            tx_id: TxId::default(),
        }
    }

    /// run until every handle is dropped
    ///
    /// once the stream fails, every later request fails with the same error
    pub(crate) async fn run(&mut self, io: &mut PhysLayer) {
        while let Some(cmd) = self.rx.recv().await {
            let result = self.execute(io, &cmd.request).await;
            let link_failure = match &result {
                Err(RequestError::Io(kind)) => Some(*kind),
                _ => None,
            };
            // the caller may have given up waiting
            cmd.reply.send(result).ok();

            if let Some(kind) = link_failure {
                tracing::warn!("connection lost: {}", kind);
                while let Some(cmd) = self.rx.recv().await {
                    cmd.reply.send(Err(RequestError::Io(kind))).ok();
                }
                break;
            }
        }

        tracing::info!("master shutdown");
    }

    async fn execute(
        &mut self,
        io: &mut PhysLayer,
        request: &Request,
    ) -> Result<Response, RequestError> {
        if self.link == Link::Serial && self.unit_id.is_broadcast() {
            return self.broadcast(io, request).await;
        }

        let attempts = self.settings.attempts();
        let mut last_failure = FailureKind::NoResponse;

        for attempt in 1..=attempts {
            // a late reply to an earlier attempt will carry a stale id
            let tx_id = self.tx_id.next();
            let result = self
                .attempt(io, request, tx_id)
                .instrument(tracing::info_span!("Transaction", tx_id = %tx_id))
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(RequestError::ResponseTimeout) => {
                    tracing::warn!("no response (attempt {} of {})", attempt, attempts);
                    last_failure = FailureKind::NoResponse;
                }
                Err(err) => match err.as_decode_failure() {
                    Some(failure) => {
                        tracing::warn!(
                            "malformed response (attempt {} of {}): {}",
                            attempt,
                            attempts,
                            err
                        );
                        last_failure = FailureKind::MalformedResponse(failure);
                        self.reader.reset();
                    }
                    None => return Err(err),
                },
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.wait_to_retry).await;
            }
        }

        Err(CommunicationFailure {
            attempts,
            kind: last_failure,
        }
        .into())
    }

    /// send a write once to every slave on the line, no response will follow
    async fn broadcast(
        &mut self,
        io: &mut PhysLayer,
        request: &Request,
    ) -> Result<Response, RequestError> {
        let echo = match request.broadcast_echo() {
            Some(x) => x,
            None => return Err(InvalidRequest::BroadcastRead(request.function()).into()),
        };

        let decode = self.settings.decode;
        if decode.app.enabled() {
            tracing::info!("PDU TX - {}", RequestDisplay::new(decode.app, request));
        }

        let header = FrameHeader::new_serial_header(self.unit_id);
        let bytes = self.writer.format(header, request, decode.frame)?;
        io.write(bytes, decode.physical).await?;
        Ok(echo)
    }

    async fn attempt(
        &mut self,
        io: &mut PhysLayer,
        request: &Request,
        tx_id: TxId,
    ) -> Result<Response, RequestError> {
        let decode = self.settings.decode;
        let header = match self.link {
            Link::Tcp => FrameHeader::new_tcp_header(self.unit_id, tx_id),
            Link::Serial => FrameHeader::new_serial_header(self.unit_id),
        };

        if decode.app.enabled() {
            tracing::info!("PDU TX - {}", RequestDisplay::new(decode.app, request));
        }

        let bytes = self.writer.format(header, request, decode.frame)?;
        io.write(bytes, decode.physical).await?;

        let deadline = Instant::now() + self.settings.response_timeout;

        // loop until we get a response for this attempt or we timeout
        let frame = loop {
            let frame = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RequestError::ResponseTimeout);
                }
                frame = self.reader.next_frame(io, decode) => frame?,
            };

            if let Some(received) = frame.header.tx_id {
                if received != tx_id {
                    tracing::warn!("received {} while expecting {}", received, tx_id);
                    continue;
                }
            }

            if frame.header.unit_id != self.unit_id {
                tracing::warn!(
                    "received unit id {} while expecting {}",
                    frame.header.unit_id,
                    self.unit_id
                );
                continue;
            }

            break frame;
        };

        let response = Response::parse(frame.payload(), request)?;

        match response {
            Response::Exception { exception, .. } => {
                tracing::warn!("PDU RX - Modbus exception: {:?}", exception);
                Err(RequestError::Exception(exception))
            }
            response => {
                if decode.app.enabled() {
                    tracing::info!("PDU RX - {}", ResponseDisplay::new(decode.app, &response));
                }
                Ok(response)
            }
        }
    }
}
