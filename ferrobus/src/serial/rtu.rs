use crate::common::buffer::ReadBuffer;
use crate::common::frame::{Frame, FrameHeader};
use crate::common::function::{FunctionCode, ERROR_BIT};
use crate::common::phys::format_bytes;
use crate::decode::FrameDecodeLevel;
use crate::error::{FrameParseError, RequestError};
use crate::types::UnitId;

pub(crate) mod constants {
    pub(crate) const HEADER_LENGTH: usize = 1;
    pub(crate) const FUNCTION_CODE_LENGTH: usize = 1;
    pub(crate) const CRC_LENGTH: usize = 2;
    pub(crate) const MAX_FRAME_LENGTH: usize =
        HEADER_LENGTH + crate::common::frame::constants::MAX_ADU_LENGTH + CRC_LENGTH;
}

/// precomputes the CRC table as a constant!
pub(crate) const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

#[derive(Clone, Copy)]
enum ParserType {
    Request,
    Response,
}

#[derive(Clone, Copy)]
enum ParseState {
    Start,
    ReadFullBody(UnitId, usize),          // unit_id, length of rest
    ReadToOffsetForLength(UnitId, usize), // unit_id, length to length
}

#[derive(Clone, Copy)]
enum LengthMode {
    /// The length is always the same (without function code)
    Fixed(usize),
    /// You need to read X more bytes. The last byte contains the number of extra bytes to read after that
    Offset(usize),
    /// Unknown function code, can't determine the size
    Unknown,
}

pub(crate) struct RtuParser {
    state: ParseState,
    parser_type: ParserType,
}

impl RtuParser {
    pub(crate) fn new_request_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Request,
        }
    }

    pub(crate) fn new_response_parser() -> Self {
        Self {
            state: ParseState::Start,
            parser_type: ParserType::Response,
        }
    }

    // Returns how to calculate the length of the body
    fn length_mode(&self, function_code: u8) -> LengthMode {
        // Check exception (only valid for responses)
        if matches!(self.parser_type, ParserType::Response) && function_code & ERROR_BIT != 0 {
            return LengthMode::Fixed(1);
        }

        let function_code = match FunctionCode::get(function_code) {
            Some(code) => code,
            None => return LengthMode::Unknown,
        };

        match self.parser_type {
            ParserType::Request => match function_code {
                FunctionCode::ReadCoils => LengthMode::Fixed(4),
                FunctionCode::ReadDiscreteInputs => LengthMode::Fixed(4),
                FunctionCode::ReadHoldingRegisters => LengthMode::Fixed(4),
                FunctionCode::ReadInputRegisters => LengthMode::Fixed(4),
                FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
                FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleCoils => LengthMode::Offset(5),
                FunctionCode::WriteMultipleRegisters => LengthMode::Offset(5),
                FunctionCode::ReadWriteMultipleRegisters => LengthMode::Offset(9),
            },
            ParserType::Response => match function_code {
                FunctionCode::ReadCoils => LengthMode::Offset(1),
                FunctionCode::ReadDiscreteInputs => LengthMode::Offset(1),
                FunctionCode::ReadHoldingRegisters => LengthMode::Offset(1),
                FunctionCode::ReadInputRegisters => LengthMode::Offset(1),
                FunctionCode::WriteSingleCoil => LengthMode::Fixed(4),
                FunctionCode::WriteSingleRegister => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleCoils => LengthMode::Fixed(4),
                FunctionCode::WriteMultipleRegisters => LengthMode::Fixed(4),
                FunctionCode::ReadWriteMultipleRegisters => LengthMode::Offset(1),
            },
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::Start;
    }

    pub(crate) fn parse(
        &mut self,
        cursor: &mut ReadBuffer,
        decode_level: FrameDecodeLevel,
    ) -> Result<Option<Frame>, RequestError> {
        match self.state {
            ParseState::Start => {
                if cursor.len() < 2 {
                    return Ok(None);
                }

                let unit_id = UnitId::new(cursor.peek_at(0)?);

                if unit_id.is_rtu_reserved() {
                    tracing::warn!("received reserved unit id {}", unit_id);
                }

                let raw_function_code = cursor.peek_at(1)?;

                self.state = match self.length_mode(raw_function_code) {
                    LengthMode::Fixed(length) => ParseState::ReadFullBody(unit_id, length),
                    LengthMode::Offset(offset) => ParseState::ReadToOffsetForLength(unit_id, offset),
                    LengthMode::Unknown => {
                        return Err(RequestError::BadFrame(
                            FrameParseError::UnknownFunctionCode(raw_function_code),
                        ))
                    }
                };

                self.parse(cursor, decode_level)
            }
            ParseState::ReadToOffsetForLength(unit_id, offset) => {
                let length_index =
                    constants::HEADER_LENGTH + constants::FUNCTION_CODE_LENGTH + offset - 1;
                if cursor.len() <= length_index {
                    return Ok(None);
                }

                // Get the complete size
                let extra_bytes_to_read = cursor.peek_at(length_index)? as usize;
                self.state = ParseState::ReadFullBody(unit_id, offset + extra_bytes_to_read);

                self.parse(cursor, decode_level)
            }
            ParseState::ReadFullBody(unit_id, length) => {
                let pdu_length = constants::FUNCTION_CODE_LENGTH + length;
                if pdu_length > crate::common::frame::constants::MAX_ADU_LENGTH {
                    self.state = ParseState::Start;
                    return Err(RequestError::BadFrame(FrameParseError::FrameLengthTooBig(
                        pdu_length,
                        crate::common::frame::constants::MAX_ADU_LENGTH,
                    )));
                }

                if cursor.len() < constants::HEADER_LENGTH + pdu_length + constants::CRC_LENGTH {
                    return Ok(None);
                }

                self.state = ParseState::Start;

                let (frame, expected_crc) = {
                    let data = cursor.read(constants::HEADER_LENGTH + pdu_length)?;
                    let mut frame = Frame::new(FrameHeader::new_serial_header(unit_id));
                    frame.set(&data[constants::HEADER_LENGTH..]);
                    (frame, CRC.checksum(data))
                };
                let received_crc = cursor.read_u16_le()?;

                if received_crc != expected_crc {
                    return Err(RequestError::BadFrame(
                        FrameParseError::CrcValidationFailure(received_crc, expected_crc),
                    ));
                }

                if decode_level.enabled() {
                    tracing::info!(
                        "RTU RX - {}",
                        RtuDisplay::new(decode_level, unit_id, frame.payload(), received_crc)
                    );
                }

                Ok(Some(frame))
            }
        }
    }
}

pub(crate) fn format_rtu(
    out: &mut Vec<u8>,
    header: FrameHeader,
    pdu: &[u8],
    decode_level: FrameDecodeLevel,
) {
    out.push(header.unit_id.value);
    out.extend_from_slice(pdu);
    let crc = CRC.checksum(out.as_slice());
    out.extend_from_slice(&crc.to_le_bytes());

    if decode_level.enabled() {
        tracing::info!(
            "RTU TX - {}",
            RtuDisplay::new(decode_level, header.unit_id, pdu, crc)
        );
    }
}

struct RtuDisplay<'a> {
    level: FrameDecodeLevel,
    unit_id: UnitId,
    payload: &'a [u8],
    crc: u16,
}

impl<'a> RtuDisplay<'a> {
    fn new(level: FrameDecodeLevel, unit_id: UnitId, payload: &'a [u8], crc: u16) -> Self {
        RtuDisplay {
            level,
            unit_id,
            payload,
            crc,
        }
    }
}

impl std::fmt::Display for RtuDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "unit: {} crc: {:#06X} (payload len = {})",
            self.unit_id,
            self.crc,
            self.payload.len(),
        )?;
        if self.level.payload_enabled() {
            format_bytes(f, self.payload)?;
        }
        Ok(())
    }
}
