//! Protocol data units: one variant per supported function code
//!
//! Addresses, quantities and register values are big-endian on the wire. Coils are packed
//! least significant bit first and padded with zeros to the next byte boundary.

use scursor::{ReadCursor, WriteCursor};

use crate::common::bits::{
    byte_count_for_bits, byte_count_for_registers, num_bytes_for_bits, pack_bits, unpack_bits,
};
use crate::common::frame::constants::MAX_ADU_LENGTH;
use crate::common::function::{FunctionCode, ERROR_BIT};
use crate::common::traits::{expect_empty, Parse, Serialize};
use crate::constants::limits;
use crate::decode::AppDecodeLevel;
use crate::error::{AduParseError, InvalidRequest, RequestError};
use crate::exception::ExceptionCode;
use crate::types::{
    coil_from_u16, coil_to_u16, AddressRange, Indexed, ReadWriteMultiple, RegisterCollection,
    WriteMultiple,
};

/// A request PDU sent by a master
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// read coils (0x01)
    ReadCoils(AddressRange),
    /// read discrete inputs (0x02)
    ReadDiscreteInputs(AddressRange),
    /// read holding registers (0x03)
    ReadHoldingRegisters(AddressRange),
    /// read input registers (0x04)
    ReadInputRegisters(AddressRange),
    /// write single coil (0x05)
    WriteSingleCoil(Indexed<bool>),
    /// write single register (0x06)
    WriteSingleRegister(Indexed<u16>),
    /// write multiple coils (0x0F)
    WriteMultipleCoils(WriteMultiple<bool>),
    /// write multiple registers (0x10)
    WriteMultipleRegisters(WriteMultiple<u16>),
    /// read/write multiple registers (0x17)
    ReadWriteMultipleRegisters(ReadWriteMultiple),
}

/// A response PDU sent by a slave
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// read coils (0x01), exactly the requested number of values
    ReadCoils(Vec<bool>),
    /// read discrete inputs (0x02), exactly the requested number of values
    ReadDiscreteInputs(Vec<bool>),
    /// read holding registers (0x03)
    ReadHoldingRegisters(RegisterCollection),
    /// read input registers (0x04)
    ReadInputRegisters(RegisterCollection),
    /// echo of a write single coil (0x05)
    WriteSingleCoil(Indexed<bool>),
    /// echo of a write single register (0x06)
    WriteSingleRegister(Indexed<u16>),
    /// range written by write multiple coils (0x0F)
    WriteMultipleCoils(AddressRange),
    /// range written by write multiple registers (0x10)
    WriteMultipleRegisters(AddressRange),
    /// registers read back by read/write multiple registers (0x17)
    ReadWriteMultipleRegisters(RegisterCollection),
    /// exception response, sent with the high bit of the function code set
    Exception {
        /// function code of the request, without the error bit
        function: u8,
        /// reason the request was refused
        exception: ExceptionCode,
    },
}

/// Reasons a slave cannot turn a received PDU into a [`Request`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestParseError {
    /// the PDU is structurally malformed
    Malformed(AduParseError),
    /// the PDU is well formed but must be answered with an exception response
    Rejected {
        /// raw function code of the request
        function: u8,
        /// exception to return
        exception: ExceptionCode,
    },
}

impl From<AduParseError> for RequestParseError {
    fn from(err: AduParseError) -> Self {
        RequestParseError::Malformed(err)
    }
}

impl From<scursor::ReadError> for RequestParseError {
    fn from(err: scursor::ReadError) -> Self {
        RequestParseError::Malformed(err.into())
    }
}

impl std::error::Error for RequestParseError {}

impl std::fmt::Display for RequestParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestParseError::Malformed(err) => write!(f, "malformed request: {err}"),
            RequestParseError::Rejected {
                function,
                exception,
            } => write!(
                f,
                "request with function code {function:#04X} rejected: {exception}"
            ),
        }
    }
}

fn to_bytes(msg: &dyn Serialize) -> Result<Vec<u8>, RequestError> {
    let mut buffer = [0u8; MAX_ADU_LENGTH];
    let length = {
        let mut cursor = WriteCursor::new(buffer.as_mut());
        msg.serialize(&mut cursor)?;
        cursor.position()
    };
    Ok(buffer[..length].to_vec())
}

fn write_bytes(cursor: &mut WriteCursor, bytes: &[u8]) -> Result<(), RequestError> {
    for byte in bytes {
        cursor.write_u8(*byte)?;
    }
    Ok(())
}

fn write_registers(cursor: &mut WriteCursor, values: &[u16]) -> Result<(), RequestError> {
    cursor.write_u8(byte_count_for_registers(values.len())?)?;
    for value in values {
        cursor.write_u16_be(*value)?;
    }
    Ok(())
}

fn write_bits(cursor: &mut WriteCursor, values: &[bool]) -> Result<(), RequestError> {
    cursor.write_u8(byte_count_for_bits(values.len())?)?;
    write_bytes(cursor, &pack_bits(values))
}

/// read a byte count followed by exactly that many bytes
fn read_counted_bytes<'a>(cursor: &mut ReadCursor<'a>) -> Result<&'a [u8], AduParseError> {
    let byte_count = cursor.read_u8()? as usize;
    if cursor.remaining() < byte_count {
        return Err(AduParseError::InsufficientBytesForByteCount(
            byte_count,
            cursor.remaining(),
        ));
    }
    Ok(cursor.read_bytes(byte_count)?)
}

fn check_byte_count(expected: usize, actual: usize) -> Result<(), AduParseError> {
    if expected != actual {
        return Err(AduParseError::ByteCountMismatch(expected, actual));
    }
    Ok(())
}

impl Serialize for AddressRange {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.start)?;
        cursor.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(coil_to_u16(self.value))?;
        Ok(())
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Parse for Indexed<bool> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError> {
        Ok(Indexed::new(
            cursor.read_u16_be()?,
            coil_from_u16(cursor.read_u16_be()?)?,
        ))
    }
}

impl Parse for Indexed<u16> {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError> {
        Ok(Indexed::new(cursor.read_u16_be()?, cursor.read_u16_be()?))
    }
}

impl Request {
    pub(crate) fn function_code(&self) -> FunctionCode {
        match self {
            Request::ReadCoils(_) => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
            Request::ReadWriteMultipleRegisters(_) => FunctionCode::ReadWriteMultipleRegisters,
        }
    }

    /// raw function code of the request
    pub fn function(&self) -> u8 {
        self.function_code().get_value()
    }

    /// true if the request can be sent to the serial broadcast address
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::WriteSingleCoil(_)
                | Request::WriteSingleRegister(_)
                | Request::WriteMultipleCoils(_)
                | Request::WriteMultipleRegisters(_)
        )
    }

    /// response a slave would have sent, for writes sent to the broadcast address
    pub(crate) fn broadcast_echo(&self) -> Option<Response> {
        match self {
            Request::WriteSingleCoil(x) => Some(Response::WriteSingleCoil(*x)),
            Request::WriteSingleRegister(x) => Some(Response::WriteSingleRegister(*x)),
            Request::WriteMultipleCoils(x) => Some(Response::WriteMultipleCoils(x.range)),
            Request::WriteMultipleRegisters(x) => Some(Response::WriteMultipleRegisters(x.range)),
            _ => None,
        }
    }

    /// check the quantity limits of the function code before anything is sent
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        match self {
            Request::ReadCoils(range) | Request::ReadDiscreteInputs(range) => {
                range.limited_count(limits::MAX_READ_COILS_COUNT)?;
            }
            Request::ReadHoldingRegisters(range) | Request::ReadInputRegisters(range) => {
                range.limited_count(limits::MAX_READ_REGISTERS_COUNT)?;
            }
            Request::WriteSingleCoil(_) | Request::WriteSingleRegister(_) => {}
            Request::WriteMultipleCoils(x) => {
                x.limited_count(limits::MAX_WRITE_COILS_COUNT)?;
            }
            Request::WriteMultipleRegisters(x) => {
                x.limited_count(limits::MAX_WRITE_REGISTERS_COUNT)?;
            }
            Request::ReadWriteMultipleRegisters(x) => x.validate()?,
        }
        Ok(())
    }

    /// encode the request as a PDU
    pub fn to_bytes(&self) -> Result<Vec<u8>, RequestError> {
        to_bytes(self)
    }

    /// decode a request PDU
    ///
    /// Decoding is total: every byte of the PDU must be accounted for.
    pub fn parse(pdu: &[u8]) -> Result<Self, RequestParseError> {
        let mut cursor = ReadCursor::new(pdu);
        let raw = cursor.read_u8()?;
        let function = match FunctionCode::get(raw) {
            Some(x) => x,
            None => {
                return Err(RequestParseError::Rejected {
                    function: raw,
                    exception: ExceptionCode::IllegalFunction,
                })
            }
        };

        match function {
            FunctionCode::ReadCoils => Ok(Request::ReadCoils(parse_read(
                &mut cursor,
                function,
                limits::MAX_READ_COILS_COUNT,
            )?)),
            FunctionCode::ReadDiscreteInputs => Ok(Request::ReadDiscreteInputs(parse_read(
                &mut cursor,
                function,
                limits::MAX_READ_COILS_COUNT,
            )?)),
            FunctionCode::ReadHoldingRegisters => Ok(Request::ReadHoldingRegisters(parse_read(
                &mut cursor,
                function,
                limits::MAX_READ_REGISTERS_COUNT,
            )?)),
            FunctionCode::ReadInputRegisters => Ok(Request::ReadInputRegisters(parse_read(
                &mut cursor,
                function,
                limits::MAX_READ_REGISTERS_COUNT,
            )?)),
            FunctionCode::WriteSingleCoil => {
                let index = cursor.read_u16_be()?;
                let raw_value = cursor.read_u16_be()?;
                expect_empty(&cursor)?;
                // an unspecified coil state is a bad value, not a bad frame
                let value = coil_from_u16(raw_value)
                    .map_err(|_| reject(function, ExceptionCode::IllegalDataValue))?;
                Ok(Request::WriteSingleCoil(Indexed::new(index, value)))
            }
            FunctionCode::WriteSingleRegister => {
                let value = Indexed::<u16>::parse(&mut cursor)?;
                expect_empty(&cursor)?;
                Ok(Request::WriteSingleRegister(value))
            }
            FunctionCode::WriteMultipleCoils => {
                let start = cursor.read_u16_be()?;
                let count = cursor.read_u16_be()?;
                let data = read_counted_bytes(&mut cursor)?;
                expect_empty(&cursor)?;
                let range =
                    validate_range(function, start, count, limits::MAX_WRITE_COILS_COUNT)?;
                check_byte_count(num_bytes_for_bits(count as usize), data.len())?;
                Ok(Request::WriteMultipleCoils(WriteMultiple {
                    range,
                    values: unpack_bits(data, count as usize),
                }))
            }
            FunctionCode::WriteMultipleRegisters => {
                let start = cursor.read_u16_be()?;
                let count = cursor.read_u16_be()?;
                let data = read_counted_bytes(&mut cursor)?;
                expect_empty(&cursor)?;
                let range =
                    validate_range(function, start, count, limits::MAX_WRITE_REGISTERS_COUNT)?;
                check_byte_count(2 * count as usize, data.len())?;
                Ok(Request::WriteMultipleRegisters(WriteMultiple {
                    range,
                    values: RegisterCollection::from_network_bytes(data)?.into_inner(),
                }))
            }
            FunctionCode::ReadWriteMultipleRegisters => {
                let read_start = cursor.read_u16_be()?;
                let read_count = cursor.read_u16_be()?;
                let write_start = cursor.read_u16_be()?;
                let write_count = cursor.read_u16_be()?;
                let data = read_counted_bytes(&mut cursor)?;
                expect_empty(&cursor)?;
                let read_range = validate_range(
                    function,
                    read_start,
                    read_count,
                    limits::MAX_READ_REGISTERS_COUNT,
                )?;
                let write_range = validate_range(
                    function,
                    write_start,
                    write_count,
                    limits::MAX_READ_WRITE_WRITE_COUNT,
                )?;
                check_byte_count(2 * write_count as usize, data.len())?;
                Ok(Request::ReadWriteMultipleRegisters(ReadWriteMultiple {
                    read_range,
                    write: WriteMultiple {
                        range: write_range,
                        values: RegisterCollection::from_network_bytes(data)?.into_inner(),
                    },
                }))
            }
        }
    }
}

fn reject(function: FunctionCode, exception: ExceptionCode) -> RequestParseError {
    RequestParseError::Rejected {
        function: function.get_value(),
        exception,
    }
}

fn validate_range(
    function: FunctionCode,
    start: u16,
    count: u16,
    limit: u16,
) -> Result<AddressRange, RequestParseError> {
    if count == 0 || count > limit {
        return Err(reject(function, ExceptionCode::IllegalDataValue));
    }
    AddressRange::try_from(start, count)
        .map_err(|_| reject(function, ExceptionCode::IllegalDataAddress))
}

fn parse_read(
    cursor: &mut ReadCursor,
    function: FunctionCode,
    limit: u16,
) -> Result<AddressRange, RequestParseError> {
    let start = cursor.read_u16_be()?;
    let count = cursor.read_u16_be()?;
    expect_empty(cursor)?;
    validate_range(function, start, count, limit)
}

impl Serialize for Request {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function())?;
        match self {
            Request::ReadCoils(range)
            | Request::ReadDiscreteInputs(range)
            | Request::ReadHoldingRegisters(range)
            | Request::ReadInputRegisters(range) => range.serialize(cursor),
            Request::WriteSingleCoil(x) => x.serialize(cursor),
            Request::WriteSingleRegister(x) => x.serialize(cursor),
            Request::WriteMultipleCoils(x) => {
                x.range.serialize(cursor)?;
                write_bits(cursor, &x.values)
            }
            Request::WriteMultipleRegisters(x) => {
                x.range.serialize(cursor)?;
                write_registers(cursor, &x.values)
            }
            Request::ReadWriteMultipleRegisters(x) => {
                x.read_range.serialize(cursor)?;
                x.write.range.serialize(cursor)?;
                write_registers(cursor, &x.write.values)
            }
        }
    }
}

impl Response {
    /// raw function code as it appears on the wire, including the error bit for exceptions
    pub fn function(&self) -> u8 {
        match self {
            Response::ReadCoils(_) => FunctionCode::ReadCoils.get_value(),
            Response::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs.get_value(),
            Response::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters.get_value(),
            Response::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters.get_value(),
            Response::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil.get_value(),
            Response::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister.get_value(),
            Response::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils.get_value(),
            Response::WriteMultipleRegisters(_) => {
                FunctionCode::WriteMultipleRegisters.get_value()
            }
            Response::ReadWriteMultipleRegisters(_) => {
                FunctionCode::ReadWriteMultipleRegisters.get_value()
            }
            Response::Exception { function, .. } => function | ERROR_BIT,
        }
    }

    /// encode the response as a PDU
    pub fn to_bytes(&self) -> Result<Vec<u8>, RequestError> {
        to_bytes(self)
    }

    /// decode a response PDU in the context of the request that produced it
    ///
    /// Quantities and echoed fields are checked against the request.
    pub fn parse(pdu: &[u8], request: &Request) -> Result<Self, AduParseError> {
        let mut cursor = ReadCursor::new(pdu);
        let function = request.function_code();
        let raw = cursor.read_u8()?;

        if raw == function.as_error() {
            let exception = ExceptionCode::from(cursor.read_u8()?);
            expect_empty(&cursor)?;
            return Ok(Response::Exception {
                function: function.get_value(),
                exception,
            });
        }

        if raw != function.get_value() {
            return Err(AduParseError::UnknownResponseFunction(
                raw,
                function.get_value(),
                function.as_error(),
            ));
        }

        let response = match request {
            Request::ReadCoils(range) => Response::ReadCoils(parse_bits(&mut cursor, range)?),
            Request::ReadDiscreteInputs(range) => {
                Response::ReadDiscreteInputs(parse_bits(&mut cursor, range)?)
            }
            Request::ReadHoldingRegisters(range) => {
                Response::ReadHoldingRegisters(parse_registers(&mut cursor, range)?)
            }
            Request::ReadInputRegisters(range) => {
                Response::ReadInputRegisters(parse_registers(&mut cursor, range)?)
            }
            Request::WriteSingleCoil(sent) => {
                Response::WriteSingleCoil(check_echo(Indexed::<bool>::parse(&mut cursor)?, sent)?)
            }
            Request::WriteSingleRegister(sent) => Response::WriteSingleRegister(check_echo(
                Indexed::<u16>::parse(&mut cursor)?,
                sent,
            )?),
            Request::WriteMultipleCoils(sent) => {
                Response::WriteMultipleCoils(parse_range_echo(&mut cursor, &sent.range)?)
            }
            Request::WriteMultipleRegisters(sent) => {
                Response::WriteMultipleRegisters(parse_range_echo(&mut cursor, &sent.range)?)
            }
            Request::ReadWriteMultipleRegisters(sent) => Response::ReadWriteMultipleRegisters(
                parse_registers(&mut cursor, &sent.read_range)?,
            ),
        };

        expect_empty(&cursor)?;
        Ok(response)
    }
}

fn check_echo<T: PartialEq>(received: T, sent: &T) -> Result<T, AduParseError> {
    if received != *sent {
        return Err(AduParseError::ReplyEchoMismatch);
    }
    Ok(received)
}

fn parse_range_echo(
    cursor: &mut ReadCursor,
    sent: &AddressRange,
) -> Result<AddressRange, AduParseError> {
    let start = cursor.read_u16_be()?;
    let count = cursor.read_u16_be()?;
    if start != sent.start || count != sent.count {
        return Err(AduParseError::ReplyEchoMismatch);
    }
    Ok(*sent)
}

fn parse_bits(cursor: &mut ReadCursor, range: &AddressRange) -> Result<Vec<bool>, AduParseError> {
    let data = read_counted_bytes(cursor)?;
    check_byte_count(num_bytes_for_bits(range.count as usize), data.len())?;
    Ok(unpack_bits(data, range.count as usize))
}

fn parse_registers(
    cursor: &mut ReadCursor,
    range: &AddressRange,
) -> Result<RegisterCollection, AduParseError> {
    let data = read_counted_bytes(cursor)?;
    check_byte_count(2 * range.count as usize, data.len())?;
    RegisterCollection::from_network_bytes(data)
}

impl Serialize for Response {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError> {
        cursor.write_u8(self.function())?;
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                write_bits(cursor, bits)
            }
            Response::ReadHoldingRegisters(registers)
            | Response::ReadInputRegisters(registers)
            | Response::ReadWriteMultipleRegisters(registers) => write_registers(cursor, registers),
            Response::WriteSingleCoil(x) => x.serialize(cursor),
            Response::WriteSingleRegister(x) => x.serialize(cursor),
            Response::WriteMultipleCoils(range) | Response::WriteMultipleRegisters(range) => {
                range.serialize(cursor)
            }
            Response::Exception { exception, .. } => {
                cursor.write_u8(u8::from(*exception))?;
                Ok(())
            }
        }
    }
}

/// Display of a request at a particular application decode level
pub(crate) struct RequestDisplay<'a> {
    request: &'a Request,
    level: AppDecodeLevel,
}

impl<'a> RequestDisplay<'a> {
    pub(crate) fn new(level: AppDecodeLevel, request: &'a Request) -> Self {
        Self { request, level }
    }
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.request.function_code())?;

        if self.level.data_headers() {
            match self.request {
                Request::ReadCoils(range)
                | Request::ReadDiscreteInputs(range)
                | Request::ReadHoldingRegisters(range)
                | Request::ReadInputRegisters(range) => write!(f, " {range}")?,
                Request::WriteSingleCoil(x) => write!(f, " {x}")?,
                Request::WriteSingleRegister(x) => write!(f, " {x}")?,
                Request::WriteMultipleCoils(x) => write!(f, " {}", x.range)?,
                Request::WriteMultipleRegisters(x) => write!(f, " {}", x.range)?,
                Request::ReadWriteMultipleRegisters(x) => {
                    write!(f, " read: {} write: {}", x.read_range, x.write.range)?
                }
            }
        }

        if self.level.data_values() {
            match self.request {
                Request::WriteMultipleCoils(x) => {
                    for value in x.iter() {
                        write!(f, "\n{value}")?;
                    }
                }
                Request::WriteMultipleRegisters(x) => {
                    for value in x.iter() {
                        write!(f, "\n{value}")?;
                    }
                }
                Request::ReadWriteMultipleRegisters(x) => {
                    for value in x.write.iter() {
                        write!(f, "\n{value}")?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Display of a response at a particular application decode level
pub(crate) struct ResponseDisplay<'a> {
    response: &'a Response,
    level: AppDecodeLevel,
}

impl<'a> ResponseDisplay<'a> {
    pub(crate) fn new(level: AppDecodeLevel, response: &'a Response) -> Self {
        Self { response, level }
    }
}

impl std::fmt::Display for ResponseDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match FunctionCode::get(self.response.function()) {
            Some(x) => write!(f, "{x}")?,
            None => write!(f, "{:#04X}", self.response.function())?,
        }

        if self.level.data_headers() {
            match self.response {
                Response::ReadCoils(x) | Response::ReadDiscreteInputs(x) => {
                    write!(f, " qty: {}", x.len())?
                }
                Response::ReadHoldingRegisters(x)
                | Response::ReadInputRegisters(x)
                | Response::ReadWriteMultipleRegisters(x) => write!(f, " qty: {}", x.len())?,
                Response::WriteSingleCoil(x) => write!(f, " {x}")?,
                Response::WriteSingleRegister(x) => write!(f, " {x}")?,
                Response::WriteMultipleCoils(x) | Response::WriteMultipleRegisters(x) => {
                    write!(f, " {x}")?
                }
                Response::Exception { exception, .. } => write!(f, " {exception:?}")?,
            }
        }

        if self.level.data_values() {
            match self.response {
                Response::ReadCoils(x) | Response::ReadDiscreteInputs(x) => {
                    for (i, value) in x.iter().enumerate() {
                        write!(f, "\n[{i}]: {}", *value as i32)?;
                    }
                }
                Response::ReadHoldingRegisters(x)
                | Response::ReadInputRegisters(x)
                | Response::ReadWriteMultipleRegisters(x) => {
                    for (i, value) in x.iter().enumerate() {
                        write!(f, "\n[{i}]: {value:#06X}")?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    fn assert_request_survives_encoding(request: Request) {
        let bytes = request.to_bytes().unwrap();
        assert_eq!(Request::parse(&bytes), Ok(request));
    }

    #[test]
    fn encodes_read_holding_registers() {
        let request = Request::ReadHoldingRegisters(range(0x006B, 3));
        assert_eq!(
            request.to_bytes().unwrap(),
            vec![0x03, 0x00, 0x6B, 0x00, 0x03]
        );
    }

    #[test]
    fn encodes_write_multiple_coils_with_packed_bits() {
        // example from the Modbus application protocol, 10 coils starting at 19
        let values = vec![
            true, false, true, true, false, false, true, true, true, false,
        ];
        let request = Request::WriteMultipleCoils(WriteMultiple::from(0x0013, values).unwrap());
        assert_eq!(
            request.to_bytes().unwrap(),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn requests_survive_encoding() {
        assert_request_survives_encoding(Request::ReadCoils(range(1, 2000)));
        assert_request_survives_encoding(Request::ReadDiscreteInputs(range(0xFFFE, 2)));
        assert_request_survives_encoding(Request::ReadHoldingRegisters(range(0x006B, 3)));
        assert_request_survives_encoding(Request::ReadInputRegisters(range(7, 125)));
        assert_request_survives_encoding(Request::WriteSingleCoil(Indexed::new(3, true)));
        assert_request_survives_encoding(Request::WriteSingleRegister(Indexed::new(3, 0xCAFE)));
        assert_request_survives_encoding(Request::WriteMultipleCoils(
            WriteMultiple::from(5, vec![true; 13]).unwrap(),
        ));
        assert_request_survives_encoding(Request::WriteMultipleRegisters(
            WriteMultiple::from(5, vec![0xFFFF, 0x0001]).unwrap(),
        ));
        assert_request_survives_encoding(Request::ReadWriteMultipleRegisters(
            ReadWriteMultiple::new(range(3, 6), 14, vec![0x00FF, 0x00FF, 0x00FF]).unwrap(),
        ));
    }

    #[test]
    fn request_with_unknown_function_is_rejected_as_illegal_function() {
        assert_eq!(
            Request::parse(&[0x2B, 0x0E, 0x01, 0x00]),
            Err(RequestParseError::Rejected {
                function: 0x2B,
                exception: ExceptionCode::IllegalFunction
            })
        );
    }

    #[test]
    fn quantity_out_of_range_is_rejected_as_illegal_value() {
        assert_eq!(
            Request::parse(&[0x03, 0x00, 0x00, 0x00, 0x7E]),
            Err(RequestParseError::Rejected {
                function: 0x03,
                exception: ExceptionCode::IllegalDataValue
            })
        );
        assert_eq!(
            Request::parse(&[0x01, 0x00, 0x00, 0x00, 0x00]),
            Err(RequestParseError::Rejected {
                function: 0x01,
                exception: ExceptionCode::IllegalDataValue
            })
        );
    }

    #[test]
    fn range_overflowing_address_space_is_rejected_as_illegal_address() {
        assert_eq!(
            Request::parse(&[0x04, 0xFF, 0xFF, 0x00, 0x02]),
            Err(RequestParseError::Rejected {
                function: 0x04,
                exception: ExceptionCode::IllegalDataAddress
            })
        );
    }

    #[test]
    fn truncated_request_is_malformed() {
        assert_eq!(
            Request::parse(&[0x03, 0x00, 0x01, 0x00]),
            Err(RequestParseError::Malformed(AduParseError::InsufficientBytes))
        );
        assert_eq!(
            Request::parse(&[]),
            Err(RequestParseError::Malformed(AduParseError::InsufficientBytes))
        );
    }

    #[test]
    fn request_with_trailing_bytes_is_malformed() {
        assert_eq!(
            Request::parse(&[0x03, 0x00, 0x01, 0x00, 0x01, 0xFF]),
            Err(RequestParseError::Malformed(AduParseError::TrailingBytes(1)))
        );
    }

    #[test]
    fn write_multiple_with_byte_count_mismatch_is_malformed() {
        // 2 registers announced, 2 bytes of data
        assert_eq!(
            Request::parse(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x02, 0xCA, 0xFE]),
            Err(RequestParseError::Malformed(
                AduParseError::ByteCountMismatch(4, 2)
            ))
        );
        // byte count larger than the data present
        assert_eq!(
            Request::parse(&[0x0F, 0x00, 0x01, 0x00, 0x08, 0x02, 0xFF]),
            Err(RequestParseError::Malformed(
                AduParseError::InsufficientBytesForByteCount(2, 1)
            ))
        );
    }

    #[test]
    fn write_single_coil_with_bad_state_is_rejected() {
        assert_eq!(
            Request::parse(&[0x05, 0x00, 0x01, 0xAB, 0xCD]),
            Err(RequestParseError::Rejected {
                function: 0x05,
                exception: ExceptionCode::IllegalDataValue
            })
        );
    }

    #[test]
    fn master_validation_enforces_function_limits() {
        assert_eq!(
            Request::ReadHoldingRegisters(range(0, 126)).validate(),
            Err(InvalidRequest::CountTooLargeForType(126, 125))
        );
        assert_eq!(
            Request::ReadCoils(range(0, 2001)).validate(),
            Err(InvalidRequest::CountTooLargeForType(2001, 2000))
        );
        assert_eq!(
            Request::WriteMultipleRegisters(WriteMultiple::from(0, vec![0; 124]).unwrap())
                .validate(),
            Err(InvalidRequest::CountTooLargeForType(124, 123))
        );
        assert_eq!(
            Request::WriteMultipleCoils(WriteMultiple::from(0, vec![false; 1968]).unwrap())
                .validate(),
            Ok(())
        );
    }

    #[test]
    fn master_validation_rejects_value_count_mismatch() {
        let registers = WriteMultiple {
            range: range(0, 2),
            values: vec![1u16, 2, 3],
        };
        assert_eq!(
            Request::WriteMultipleRegisters(registers.clone()).validate(),
            Err(InvalidRequest::CountMismatch(2, 3))
        );
        assert_eq!(
            Request::WriteMultipleCoils(WriteMultiple {
                range: range(0, 9),
                values: vec![true; 8],
            })
            .validate(),
            Err(InvalidRequest::CountMismatch(9, 8))
        );
        assert_eq!(
            Request::ReadWriteMultipleRegisters(ReadWriteMultiple {
                read_range: range(0, 1),
                write: registers,
            })
            .validate(),
            Err(InvalidRequest::CountMismatch(2, 3))
        );
    }

    #[test]
    fn parses_read_coils_response_discarding_padding() {
        let request = Request::ReadCoils(range(0x0013, 19));
        let response =
            Response::parse(&[0x01, 0x03, 0xCD, 0x6B, 0xFD], &request).unwrap();
        match response {
            Response::ReadCoils(bits) => {
                assert_eq!(bits.len(), 19);
                assert_eq!(bits[16..], [true, false, true]);
            }
            _ => panic!("unexpected response: {response:?}"),
        }
    }

    #[test]
    fn parses_read_registers_response() {
        let request = Request::ReadHoldingRegisters(range(0x006B, 3));
        let response = Response::parse(
            &[0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64],
            &request,
        )
        .unwrap();
        assert_eq!(
            response,
            Response::ReadHoldingRegisters(RegisterCollection::new(vec![0x022B, 0x0000, 0x0064]))
        );
    }

    #[test]
    fn parses_exception_response() {
        let request = Request::ReadHoldingRegisters(range(0x006B, 3));
        assert_eq!(
            Response::parse(&[0x83, 0x02], &request),
            Ok(Response::Exception {
                function: 0x03,
                exception: ExceptionCode::IllegalDataAddress
            })
        );
    }

    #[test]
    fn response_with_unexpected_function_fails() {
        let request = Request::ReadCoils(range(0, 1));
        assert_eq!(
            Response::parse(&[0x02, 0x01, 0x01], &request),
            Err(AduParseError::UnknownResponseFunction(0x02, 0x01, 0x81))
        );
    }

    #[test]
    fn response_with_wrong_byte_count_fails() {
        let request = Request::ReadInputRegisters(range(0, 2));
        assert_eq!(
            Response::parse(&[0x04, 0x02, 0x00, 0x01], &request),
            Err(AduParseError::ByteCountMismatch(4, 2))
        );
    }

    #[test]
    fn write_response_must_echo_the_request() {
        let request = Request::WriteSingleRegister(Indexed::new(1, 0x0003));
        assert_eq!(
            Response::parse(&[0x06, 0x00, 0x01, 0x00, 0x04], &request),
            Err(AduParseError::ReplyEchoMismatch)
        );

        let request =
            Request::WriteMultipleRegisters(WriteMultiple::from(1, vec![1, 2]).unwrap());
        assert_eq!(
            Response::parse(&[0x10, 0x00, 0x01, 0x00, 0x02], &request),
            Ok(Response::WriteMultipleRegisters(range(1, 2)))
        );
        assert_eq!(
            Response::parse(&[0x10, 0x00, 0x01, 0x00, 0x03], &request),
            Err(AduParseError::ReplyEchoMismatch)
        );
    }

    #[test]
    fn responses_survive_encoding() {
        let cases = [
            (
                Request::ReadCoils(range(0x0013, 19)),
                Response::ReadCoils(vec![
                    true, false, true, true, false, false, true, true, true, true, false, true,
                    false, true, true, false, true, false, true,
                ]),
            ),
            (
                Request::ReadDiscreteInputs(range(0, 10)),
                Response::ReadDiscreteInputs(vec![true, false, true, true, false, false, true, true, true, false]),
            ),
            (
                Request::ReadWriteMultipleRegisters(
                    ReadWriteMultiple::new(range(3, 2), 14, vec![1]).unwrap(),
                ),
                Response::ReadWriteMultipleRegisters(RegisterCollection::new(vec![0xCAFE, 7])),
            ),
            (
                Request::ReadHoldingRegisters(range(0x006B, 3)),
                Response::ReadHoldingRegisters(RegisterCollection::new(vec![0x022B, 0, 0x0064])),
            ),
            (
                Request::ReadInputRegisters(range(8, 1)),
                Response::ReadInputRegisters(RegisterCollection::new(vec![0x000A])),
            ),
            (
                Request::WriteSingleCoil(Indexed::new(0xAC, true)),
                Response::WriteSingleCoil(Indexed::new(0xAC, true)),
            ),
            (
                Request::WriteSingleRegister(Indexed::new(1, 0x0003)),
                Response::WriteSingleRegister(Indexed::new(1, 0x0003)),
            ),
            (
                Request::WriteMultipleCoils(WriteMultiple::from(0x0013, vec![true; 10]).unwrap()),
                Response::WriteMultipleCoils(range(0x0013, 10)),
            ),
            (
                Request::WriteMultipleRegisters(WriteMultiple::from(1, vec![0x000A, 0x0102]).unwrap()),
                Response::WriteMultipleRegisters(range(1, 2)),
            ),
            (
                Request::WriteMultipleCoils(WriteMultiple::from(1, vec![true, true]).unwrap()),
                Response::Exception {
                    function: 0x0F,
                    exception: ExceptionCode::ServerDeviceFailure,
                },
            ),
        ];

        for (request, response) in cases {
            let bytes = response.to_bytes().unwrap();
            assert_eq!(Response::parse(&bytes, &request), Ok(response));
        }
    }

    #[test]
    fn exception_response_sets_error_bit() {
        let response = Response::Exception {
            function: 0x2B,
            exception: ExceptionCode::IllegalFunction,
        };
        assert_eq!(response.to_bytes().unwrap(), vec![0xAB, 0x01]);
    }

    #[test]
    fn displays_request_at_each_level() {
        let request = Request::WriteMultipleRegisters(WriteMultiple::from(1, vec![0x00FF]).unwrap());
        assert_eq!(
            RequestDisplay::new(AppDecodeLevel::FunctionCode, &request).to_string(),
            "WRITE MULTIPLE REGISTERS (0x10)"
        );
        assert_eq!(
            RequestDisplay::new(AppDecodeLevel::DataValues, &request).to_string(),
            "WRITE MULTIPLE REGISTERS (0x10) start: 0x0001 qty: 1\nidx: 0x0001 value: 0x00FF"
        );
    }
}
