use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameHeader, TxId};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, InternalError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 7;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH;
    // includes the 1 byte unit id
    pub(crate) const MAX_LENGTH_FIELD: usize = crate::common::frame::constants::MAX_ADU_LENGTH + 1;
}

#[derive(Clone, Copy)]
struct MbapHeader {
    tx_id: TxId,
    adu_length: usize,
    unit_id: UnitId,
}

#[derive(Clone, Copy)]
enum ParseState {
    Begin,
    Header(MbapHeader),
}

pub(crate) struct MbapParser {
    state: ParseState,
}

impl MbapParser {
    pub(crate) fn new() -> Self {
        Self {
            state: ParseState::Begin,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Begin;
    }

    fn parse_header(cursor: &mut ReadBuffer) -> Result<MbapHeader, RequestError> {
        let tx_id = TxId::new(cursor.read_u16_be()?);
        let protocol_id = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()? as usize;
        let unit_id = UnitId::new(cursor.read_u8()?);

        if protocol_id != 0 {
            return Err(FrameParseError::UnknownProtocolId(protocol_id).into());
        }

        if length > constants::MAX_LENGTH_FIELD {
            return Err(
                FrameParseError::MbapLengthTooBig(length, constants::MAX_LENGTH_FIELD).into(),
            );
        }

        // must be > 0 b/c the 1-byte unit identifier counts towards length
        if length == 0 {
            return Err(FrameParseError::MbapLengthZero.into());
        }

        Ok(MbapHeader {
            tx_id,
            adu_length: length - 1,
            unit_id,
        })
    }

    fn parse_body(header: &MbapHeader, cursor: &mut ReadBuffer) -> Result<Frame, RequestError> {
        let mut frame = Frame::new(FrameHeader::new_tcp_header(header.unit_id, header.tx_id));
        frame.set(cursor.read(header.adu_length)?);
        Ok(frame)
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Header(header) => {
                if cursor.len() < header.adu_length {
                    return Ok(None);
                }

                let frame = Self::parse_body(&header, cursor)?;
                self.state = ParseState::Begin;

                if decode_level.enabled() {
                    tracing::info!(
                        "MBAP RX - {}",
                        MbapDisplay::new(decode_level, frame.header, frame.payload())
                    );
                }

                Ok(Some(frame))
            }
            ParseState::Begin => {
                if cursor.len() < constants::HEADER_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Header(Self::parse_header(cursor)?);
                self.parse(cursor, decode_level)
            }
        }
    }
}

pub(crate) fn format_mbap(
    out: &mut Vec<u8>,
    header: FrameHeader,
    pdu: &[u8],
    decode_level: FrameDecodeLevel,
) -> Result<(), RequestError> {
    let tx_id = header.tx_id.unwrap_or_default();
    // the unit id counts towards the length field
    let length = match u16::try_from(pdu.len() + 1) {
        Ok(x) if (x as usize) <= constants::MAX_LENGTH_FIELD => x,
        _ => return Err(InternalError::PduTooBig(pdu.len()).into()),
    };

    out.extend_from_slice(&tx_id.to_u16().to_be_bytes());
    out.extend_from_slice(&[0x00, 0x00]);
    out.extend_from_slice(&length.to_be_bytes());
    out.push(header.unit_id.value);
    out.extend_from_slice(pdu);

    if decode_level.enabled() {
        tracing::info!("MBAP TX - {}", MbapDisplay::new(decode_level, header, pdu));
    }

    Ok(())
}

struct MbapDisplay<'a> {
    level: FrameDecodeLevel,
    header: FrameHeader,
    payload: &'a [u8],
}

impl<'a> MbapDisplay<'a> {
    fn new(level: FrameDecodeLevel, header: FrameHeader, payload: &'a [u8]) -> Self {
        MbapDisplay {
            level,
            header,
            payload,
        }
    }
}

impl std::fmt::Display for MbapDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tx_id: {} unit: {} len: {}",
            self.header.tx_id.unwrap_or_default(),
            self.header.unit_id,
            self.payload.len()
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}
