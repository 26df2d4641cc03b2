use scursor::WriteCursor;

use crate::common::buffer::ReadBuffer;
use crate::common::phys::PhysLayer;
use crate::common::traits::Serialize;
use crate::decode::{DecodeLevel, FrameDecodeLevel};
use crate::error::{InternalError, RequestError};
use crate::serial::ascii::AsciiParser;
use crate::serial::rtu::RtuParser;
use crate::serial::SerialMode;
use crate::tcp::frame::MbapParser;
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const MAX_ADU_LENGTH: usize = 253;
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) fn to_u16(self) -> u16 {
        self.value
    }

    pub(crate) fn next(&mut self) -> TxId {
        let ret = self.value;
        self.value = self.value.wrapping_add(1);
        TxId::new(ret)
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// Correlation information carried by the envelope around a PDU
///
/// Serial frames have no transaction id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) unit_id: UnitId,
    pub(crate) tx_id: Option<TxId>,
}

impl FrameHeader {
    pub(crate) fn new_tcp_header(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: Some(tx_id),
        }
    }

    pub(crate) fn new_serial_header(unit_id: UnitId) -> Self {
        FrameHeader {
            unit_id,
            tx_id: None,
        }
    }
}

pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; constants::MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; constants::MAX_ADU_LENGTH],
        }
    }

    pub(crate) fn set(&mut self, src: &[u8]) -> bool {
        if src.len() > self.pdu.len() {
            return false;
        }

        self.pdu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
        true
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

pub(crate) enum FrameParser {
    Mbap(MbapParser),
    Rtu(RtuParser),
    Ascii(AsciiParser),
}

impl FrameParser {
    fn max_frame_size(&self) -> usize {
        match self {
            FrameParser::Mbap(_) => crate::tcp::frame::constants::MAX_FRAME_LENGTH,
            FrameParser::Rtu(_) => crate::serial::rtu::constants::MAX_FRAME_LENGTH,
            FrameParser::Ascii(_) => crate::serial::ascii::constants::MAX_FRAME_LENGTH,
        }
    }

    /// Parse bytes from the buffer. Consumed bytes are always discarded.
    ///
    /// Err implies the input data is invalid
    /// Ok(None) implies that more data is required to complete parsing
    /// Ok(Some(..)) will contain a fully parsed frame
    fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self {
            FrameParser::Mbap(x) => x.parse(cursor, level),
            FrameParser::Rtu(x) => x.parse(cursor, level),
            FrameParser::Ascii(x) => x.parse(cursor, level),
        }
    }

    fn reset(&mut self) {
        match self {
            FrameParser::Mbap(x) => x.reset(),
            FrameParser::Rtu(x) => x.reset(),
            FrameParser::Ascii(_) => {}
        }
    }
}

pub(crate) struct FramedReader {
    parser: FrameParser,
    buffer: ReadBuffer,
}

impl FramedReader {
    pub(crate) fn new(parser: FrameParser) -> Self {
        let size = parser.max_frame_size();
        Self {
            parser,
            buffer: ReadBuffer::new(size),
        }
    }

    pub(crate) fn tcp() -> Self {
        Self::new(FrameParser::Mbap(MbapParser::new()))
    }

    pub(crate) fn serial_request(mode: SerialMode) -> Self {
        match mode {
            SerialMode::Rtu => Self::new(FrameParser::Rtu(RtuParser::new_request_parser())),
            SerialMode::Ascii => Self::new(FrameParser::Ascii(AsciiParser::new())),
        }
    }

    pub(crate) fn serial_response(mode: SerialMode) -> Self {
        match mode {
            SerialMode::Rtu => Self::new(FrameParser::Rtu(RtuParser::new_response_parser())),
            SerialMode::Ascii => Self::new(FrameParser::Ascii(AsciiParser::new())),
        }
    }

    /// discard buffered bytes and partial parser state
    pub(crate) fn reset(&mut self) {
        self.parser.reset();
        self.buffer.clear();
    }

    pub(crate) async fn next_frame(
        &mut self,
        io: &mut PhysLayer,
        level: DecodeLevel,
    ) -> Result<Frame, RequestError> {
        loop {
            match self.parser.parse(&mut self.buffer, level.frame)? {
                Some(frame) => return Ok(frame),
                None => {
                    self.buffer.read_some(io, level.physical).await?;
                }
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FrameFormat {
    Mbap,
    Rtu,
    Ascii,
}

impl From<SerialMode> for FrameFormat {
    fn from(mode: SerialMode) -> Self {
        match mode {
            SerialMode::Rtu => FrameFormat::Rtu,
            SerialMode::Ascii => FrameFormat::Ascii,
        }
    }
}

pub(crate) struct FrameWriter {
    format: FrameFormat,
    pdu: [u8; constants::MAX_ADU_LENGTH],
    frame: Vec<u8>,
}

impl FrameWriter {
    pub(crate) fn new(format: FrameFormat) -> Self {
        Self {
            format,
            pdu: [0; constants::MAX_ADU_LENGTH],
            frame: Vec::new(),
        }
    }

    pub(crate) fn tcp() -> Self {
        Self::new(FrameFormat::Mbap)
    }

    pub(crate) fn serial(mode: SerialMode) -> Self {
        Self::new(mode.into())
    }

    /// serialize the message and wrap it in the transport envelope
    pub(crate) fn format(
        &mut self,
        header: FrameHeader,
        msg: &dyn Serialize,
        level: FrameDecodeLevel,
    ) -> Result<&[u8], RequestError> {
        let length = {
            let mut cursor = WriteCursor::new(self.pdu.as_mut());
            msg.serialize(&mut cursor)?;
            cursor.position()
        };

        let pdu = match self.pdu.get(..length) {
            Some(x) => x,
            None => return Err(InternalError::PduTooBig(length).into()),
        };

        self.frame.clear();
        match self.format {
            FrameFormat::Mbap => crate::tcp::frame::format_mbap(&mut self.frame, header, pdu, level)?,
            FrameFormat::Rtu => crate::serial::rtu::format_rtu(&mut self.frame, header, pdu, level),
            FrameFormat::Ascii => {
                crate::serial::ascii::format_ascii(&mut self.frame, header, pdu, level)
            }
        }

        Ok(self.frame.as_slice())
    }
}
