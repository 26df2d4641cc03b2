use crate::exception::ExceptionCode;

/// The task processing requests has terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Shutdown;

/// Top level error type for the master API
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// An I/O error occurred on the underlying connection
    Io(std::io::ErrorKind),
    /// A Modbus exception was returned by the device
    Exception(ExceptionCode),
    /// Request was not sent because it contained invalid parameters
    BadRequest(InvalidRequest),
    /// The transport envelope around a PDU could not be parsed
    BadFrame(FrameParseError),
    /// The PDU payload could not be parsed
    BadResponse(AduParseError),
    /// An internal error occurred while serializing a message
    Internal(InternalError),
    /// No response was received within the configured timeout
    ResponseTimeout,
    /// Every attempt allowed by the retry policy failed
    Communication(CommunicationFailure),
    /// The task processing requests has terminated
    Shutdown,
}

/// Raised by the master once every attempt for one logical operation has failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommunicationFailure {
    /// number of times the request was sent
    pub attempts: usize,
    /// what went wrong on the last attempt
    pub kind: FailureKind,
}

/// Distinguishes silence from garbage on the final attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// nothing matching the request arrived before the response timeout
    NoResponse,
    /// a response arrived but could not be decoded
    MalformedResponse(DecodeFailure),
}

/// A frame or PDU that could not be decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeFailure {
    /// bad transport envelope
    Frame(FrameParseError),
    /// bad PDU payload
    Pdu(AduParseError),
}

/// Errors that result from a bad request parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidRequest {
    /// Request contained a count of zero
    CountOfZero,
    /// Start and count would overflow the u16 address space
    AddressOverflow(u16, u16),
    /// The count exceeds the maximum allowed for this function (count, max)
    CountTooLargeForType(u16, u16),
    /// The number of values cannot be represented as a u16 count
    CountTooBigForU16(usize),
    /// The quantity of the range does not match the number of values (quantity, values)
    CountMismatch(u16, usize),
    /// Only write requests may be sent to the serial broadcast address (function code)
    BroadcastRead(u8),
}

/// Errors that occur while parsing a frame off a stream (TCP or serial)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameParseError {
    /// Received TCP frame with the length field set to zero
    MbapLengthZero,
    /// Received TCP frame with length that exceeds max allowed size (actual, max)
    MbapLengthTooBig(usize, usize),
    /// Received TCP frame with a non-Modbus protocol id
    UnknownProtocolId(u16),
    /// Received RTU frame whose CRC did not match (received, expected)
    CrcValidationFailure(u16, u16),
    /// Received ASCII frame whose LRC did not match (received, expected)
    LrcValidationFailure(u8, u8),
    /// Received ASCII frame containing a character that is not a hex digit
    InvalidAsciiCharacter(u8),
    /// Received ASCII frame with an odd number of hex characters or no room for the LRC
    MalformedAsciiFrame,
    /// Serial frame would exceed the maximum allowed length (actual, max)
    FrameLengthTooBig(usize, usize),
    /// Serial frame length cannot be determined for this function code
    UnknownFunctionCode(u8),
}

/// Errors that occur while parsing requests and responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AduParseError {
    /// PDU is too short to be valid
    InsufficientBytes,
    /// byte count doesn't match the number of bytes implied by the quantity (expected, actual)
    ByteCountMismatch(usize, usize),
    /// byte count doesn't match the actual number of bytes present (count, remaining)
    InsufficientBytesForByteCount(usize, usize),
    /// PDU contains extra trailing bytes
    TrailingBytes(usize),
    /// a parameter expected to be echoed in the reply did not match
    ReplyEchoMismatch,
    /// an unexpected response function code was received (actual, expected, expected error)
    UnknownResponseFunction(u8, u8, u8),
    /// bad value for the coil state
    UnknownCoilState(u16),
}

/// Errors that indicate faulty logic in the library itself if they occur
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InternalError {
    /// Insufficient space for a write operation
    InsufficientWriteSpace,
    /// The byte count of a field would exceed the maximum size of u8
    BadByteCount(usize),
    /// The serialized PDU exceeds the maximum allowed length
    PduTooBig(usize),
    /// Attempted to read more bytes than are buffered (requested, present)
    InsufficientBytesForRead(usize, usize),
    /// A parsed response does not correspond to the request that produced it
    UnexpectedResponse,
}

impl std::error::Error for RequestError {}
impl std::error::Error for InvalidRequest {}
impl std::error::Error for FrameParseError {}
impl std::error::Error for AduParseError {}
impl std::error::Error for InternalError {}
impl std::error::Error for CommunicationFailure {}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RequestError::Io(kind) => write!(f, "i/o error: {kind}"),
            RequestError::Exception(ex) => write!(f, "modbus exception: {ex}"),
            RequestError::BadRequest(err) => write!(f, "bad request: {err}"),
            RequestError::BadFrame(err) => write!(f, "bad frame: {err}"),
            RequestError::BadResponse(err) => write!(f, "bad response: {err}"),
            RequestError::Internal(err) => write!(f, "internal error: {err}"),
            RequestError::ResponseTimeout => {
                f.write_str("timeout occurred before receiving a response from the server")
            }
            RequestError::Communication(err) => err.fmt(f),
            RequestError::Shutdown => f.write_str("the task processing requests has shut down"),
        }
    }
}

impl std::fmt::Display for CommunicationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind {
            FailureKind::NoResponse => {
                write!(f, "no response after {} attempt(s)", self.attempts)
            }
            FailureKind::MalformedResponse(DecodeFailure::Frame(err)) => {
                write!(f, "malformed response after {} attempt(s): {err}", self.attempts)
            }
            FailureKind::MalformedResponse(DecodeFailure::Pdu(err)) => {
                write!(f, "malformed response after {} attempt(s): {err}", self.attempts)
            }
        }
    }
}

impl std::fmt::Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InvalidRequest::CountOfZero => f.write_str("request contains a count of zero"),
            InvalidRequest::AddressOverflow(start, count) => write!(
                f,
                "start == {start} and count = {count} would overflow the representation of u16"
            ),
            InvalidRequest::CountTooLargeForType(count, max) => write!(
                f,
                "the request count of {count} exceeds maximum allowed count of {max} for this type"
            ),
            InvalidRequest::CountTooBigForU16(count) => write!(
                f,
                "the requested count of objects exceeds the maximum value of u16: {count}"
            ),
            InvalidRequest::CountMismatch(count, values) => write!(
                f,
                "the request count of {count} does not match the number of values: {values}"
            ),
            InvalidRequest::BroadcastRead(function) => write!(
                f,
                "function code {function:#04X} cannot be sent to the broadcast address"
            ),
        }
    }
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FrameParseError::MbapLengthZero => {
                f.write_str("received TCP frame with the length field set to zero")
            }
            FrameParseError::MbapLengthTooBig(size, max) => write!(
                f,
                "received TCP frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownProtocolId(id) => {
                write!(f, "received TCP frame with non-Modbus protocol id: {id}")
            }
            FrameParseError::CrcValidationFailure(received, expected) => write!(
                f,
                "received frame with CRC {received:#06X} while expecting {expected:#06X}"
            ),
            FrameParseError::LrcValidationFailure(received, expected) => write!(
                f,
                "received frame with LRC {received:#04X} while expecting {expected:#04X}"
            ),
            FrameParseError::InvalidAsciiCharacter(c) => {
                write!(f, "received ASCII frame with non-hex character {c:#04X}")
            }
            FrameParseError::MalformedAsciiFrame => {
                f.write_str("received ASCII frame with an invalid number of characters")
            }
            FrameParseError::FrameLengthTooBig(size, max) => write!(
                f,
                "received frame with length ({size}) that exceeds max allowed size ({max})"
            ),
            FrameParseError::UnknownFunctionCode(fc) => {
                write!(f, "cannot determine frame length of function code {fc:#04X}")
            }
        }
    }
}

impl std::fmt::Display for AduParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AduParseError::InsufficientBytes => f.write_str("PDU is too short to be valid"),
            AduParseError::ByteCountMismatch(expected, actual) => write!(
                f,
                "byte count ({actual}) doesn't match what is expected from the quantity ({expected})"
            ),
            AduParseError::InsufficientBytesForByteCount(count, remaining) => write!(
                f,
                "byte count ({count}) doesn't match the actual number of bytes remaining ({remaining})"
            ),
            AduParseError::TrailingBytes(remaining) => {
                write!(f, "PDU contains {remaining} extra trailing bytes")
            }
            AduParseError::ReplyEchoMismatch => {
                f.write_str("a parameter expected to be echoed in the reply did not match")
            }
            AduParseError::UnknownResponseFunction(actual, expected, error) => write!(
                f,
                "received unknown response function code: {actual}. Expected {expected} or {error}"
            ),
            AduParseError::UnknownCoilState(value) => write!(
                f,
                "received coil state with unspecified value: {value:#06X}"
            ),
        }
    }
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            InternalError::InsufficientWriteSpace => {
                f.write_str("insufficient space for write operation")
            }
            InternalError::BadByteCount(size) => {
                write!(f, "byte count would exceed maximum size of u8: {size}")
            }
            InternalError::PduTooBig(size) => {
                write!(f, "PDU length of {size} exceeds the maximum allowed length")
            }
            InternalError::InsufficientBytesForRead(requested, present) => write!(
                f,
                "attempted to read {requested} bytes with only {present} remaining"
            ),
            InternalError::UnexpectedResponse => {
                f.write_str("response does not correspond to the request")
            }
        }
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err.kind())
    }
}

impl From<ExceptionCode> for RequestError {
    fn from(ex: ExceptionCode) -> Self {
        RequestError::Exception(ex)
    }
}

impl From<InvalidRequest> for RequestError {
    fn from(err: InvalidRequest) -> Self {
        RequestError::BadRequest(err)
    }
}

impl From<FrameParseError> for RequestError {
    fn from(err: FrameParseError) -> Self {
        RequestError::BadFrame(err)
    }
}

impl From<AduParseError> for RequestError {
    fn from(err: AduParseError) -> Self {
        RequestError::BadResponse(err)
    }
}

impl From<InternalError> for RequestError {
    fn from(err: InternalError) -> Self {
        RequestError::Internal(err)
    }
}

impl From<CommunicationFailure> for RequestError {
    fn from(err: CommunicationFailure) -> Self {
        RequestError::Communication(err)
    }
}

impl From<Shutdown> for RequestError {
    fn from(_: Shutdown) -> Self {
        RequestError::Shutdown
    }
}

impl From<scursor::ReadError> for AduParseError {
    fn from(_: scursor::ReadError) -> Self {
        AduParseError::InsufficientBytes
    }
}

impl From<scursor::ReadError> for RequestError {
    fn from(err: scursor::ReadError) -> Self {
        RequestError::BadResponse(err.into())
    }
}

impl From<scursor::WriteError> for InternalError {
    fn from(_: scursor::WriteError) -> Self {
        InternalError::InsufficientWriteSpace
    }
}

impl From<scursor::WriteError> for RequestError {
    fn from(err: scursor::WriteError) -> Self {
        RequestError::Internal(err.into())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RequestError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RequestError::Shutdown
    }
}

impl RequestError {
    /// Converts a per-attempt error into the decode failure it represents, if any
    pub(crate) fn as_decode_failure(&self) -> Option<DecodeFailure> {
        match self {
            RequestError::BadFrame(err) => Some(DecodeFailure::Frame(*err)),
            RequestError::BadResponse(err) => Some(DecodeFailure::Pdu(*err)),
            _ => None,
        }
    }
}
