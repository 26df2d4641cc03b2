use crate::common::phys::PhysLayer;
use crate::decode::PhysDecodeLevel;
use crate::error::InternalError;

pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// buffered bytes that have not been consumed yet
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buffer[self.begin..self.end]
    }

    /// drop everything that is buffered
    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    pub(crate) fn peek_at(&self, idx: usize) -> Result<u8, InternalError> {
        self.as_slice()
            .get(idx)
            .copied()
            .ok_or(InternalError::InsufficientBytesForRead(idx + 1, self.len()))
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&[u8], InternalError> {
        if self.len() < count {
            return Err(InternalError::InsufficientBytesForRead(count, self.len()));
        }

        let start = self.begin;
        self.begin += count;
        Ok(&self.buffer[start..start + count])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InternalError> {
        let value = self.peek_at(0)?;
        self.begin += 1;
        Ok(value)
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b2 << 8) | b1)
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut PhysLayer,
        level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        // before we read any data, check to see if the buffer is empty and adjust the indices
        // this allows use to make the biggest read possible, and avoids subsequent buffer shifting later
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // if we've reached capacity, but still need more data we have to shift
        if self.end == self.buffer.len() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        let count = io.read(&mut self.buffer[self.end..], level).await?;

        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }
}
