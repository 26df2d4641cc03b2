pub(crate) mod ascii;
pub(crate) mod rtu;

/// Encapsulation used on a serial line
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SerialMode {
    /// binary frames terminated by a CRC-16
    Rtu,
    /// hexadecimal text frames delimited by `:` and CRLF with an LRC checksum
    Ascii,
}

impl std::fmt::Display for SerialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialMode::Rtu => f.write_str("RTU"),
            SerialMode::Ascii => f.write_str("ASCII"),
        }
    }
}
