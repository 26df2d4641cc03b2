use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameHeader};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const START: u8 = b':';
    pub(crate) const CR: u8 = b'\r';
    pub(crate) const LF: u8 = b'\n';
    /// ':' + hex encoded (unit id + ADU + LRC) + CRLF
    pub(crate) const MAX_FRAME_LENGTH: usize =
        1 + 2 * (1 + crate::common::frame::constants::MAX_ADU_LENGTH + 1) + 2;
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// two's complement of the sum of all bytes
pub(crate) fn lrc(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, x| acc.wrapping_add(*x))
        .wrapping_neg()
}

fn hex_value(c: u8) -> Result<u8, FrameParseError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(FrameParseError::InvalidAsciiCharacter(c)),
    }
}

fn decode_hex(chars: &[u8]) -> Result<Vec<u8>, FrameParseError> {
    if chars.len() % 2 != 0 {
        return Err(FrameParseError::MalformedAsciiFrame);
    }

    chars
        .chunks_exact(2)
        .map(|pair| Ok((hex_value(pair[0])? << 4) | hex_value(pair[1])?))
        .collect()
}

fn push_hex(out: &mut Vec<u8>, byte: u8) {
    out.push(HEX_DIGITS[(byte >> 4) as usize]);
    out.push(HEX_DIGITS[(byte & 0x0F) as usize]);
}

/// Delimits frames on the start character and the CRLF terminator
///
/// Anything received before a start character is discarded, which lets the
/// reader resynchronize on its own after a corrupted frame.
pub(crate) struct AsciiParser;

impl AsciiParser {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        // skip line noise until the start of a frame
        while let Ok(byte) = cursor.peek_at(0) {
            if byte == constants::START {
                break;
            }
            cursor.read_u8()?;
        }

        if cursor.is_empty() {
            return Ok(None);
        }

        let end = match cursor.as_slice().iter().position(|x| *x == constants::LF) {
            Some(x) => x,
            None => {
                if cursor.len() >= constants::MAX_FRAME_LENGTH {
                    let length = cursor.len();
                    cursor.clear();
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        length,
                        constants::MAX_FRAME_LENGTH,
                    )));
                }
                return Ok(None);
            }
        };

        let bytes = {
            let raw = cursor.read(end + 1)?;
            // strip the start character and the CRLF
            let chars = match raw.len().checked_sub(2) {
                Some(cr) if cr >= 1 && raw[cr] == constants::CR => &raw[1..cr],
                _ => return Err(FrameParseError::MalformedAsciiFrame.into()),
            };
            decode_hex(chars)?
        };

        // unit id + function code + LRC at a minimum
        let (received_lrc, body) = match bytes.split_last() {
            Some((lrc, body)) if body.len() >= 2 => (*lrc, body),
            _ => return Err(FrameParseError::MalformedAsciiFrame.into()),
        };

        let expected_lrc = lrc(body);
        if received_lrc != expected_lrc {
            return Err(FrameParseError::LrcValidationFailure(received_lrc, expected_lrc).into());
        }

        let unit_id = UnitId::new(body[0]);
        let pdu = &body[1..];
        let mut frame = Frame::new(FrameHeader::new_serial_header(unit_id));
        if !frame.set(pdu) {
            return Err(FrameParseError::FrameLengthTooBig(
                pdu.len(),
                crate::common::frame::constants::MAX_ADU_LENGTH,
            )
            .into());
        }

        if decode_level.enabled() {
            tracing::info!(
                "ASCII RX - {}",
                AsciiDisplay::new(decode_level, unit_id, pdu, received_lrc)
            );
        }

        Ok(Some(frame))
    }
}

pub(crate) fn format_ascii(
    out: &mut Vec<u8>,
    header: FrameHeader,
    pdu: &[u8],
    decode_level: FrameDecodeLevel,
) {
    let checksum = lrc(pdu).wrapping_sub(header.unit_id.value);

    out.push(constants::START);
    push_hex(out, header.unit_id.value);
    for byte in pdu {
        push_hex(out, *byte);
    }
    push_hex(out, checksum);
    out.push(constants::CR);
    out.push(constants::LF);

    if decode_level.enabled() {
        tracing::info!(
            "ASCII TX - {}",
            AsciiDisplay::new(decode_level, header.unit_id, pdu, checksum)
        );
    }
}

struct AsciiDisplay<'a> {
    level: FrameDecodeLevel,
    unit_id: UnitId,
    payload: &'a [u8],
    lrc: u8,
}

impl<'a> AsciiDisplay<'a> {
    fn new(level: FrameDecodeLevel, unit_id: UnitId, payload: &'a [u8], lrc: u8) -> Self {
        AsciiDisplay {
            level,
            unit_id,
            payload,
            lrc,
        }
    }
}

impl std::fmt::Display for AsciiDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "unit: {} lrc: {:#04X} (payload len = {})",
            self.unit_id,
            self.lrc,
            self.payload.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}
