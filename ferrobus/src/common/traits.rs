use scursor::{ReadCursor, WriteCursor};

use crate::error::{AduParseError, RequestError};

pub(crate) trait Serialize {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), RequestError>;
}

pub(crate) trait Parse: Sized {
    fn parse(cursor: &mut ReadCursor) -> Result<Self, AduParseError>;
}

/// fail if the cursor still holds bytes after a complete message was parsed
pub(crate) fn expect_empty(cursor: &ReadCursor) -> Result<(), AduParseError> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(AduParseError::TrailingBytes(cursor.remaining()))
    }
}
