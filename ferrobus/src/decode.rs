/// Controls the decoding of transmitted and received data at the application, frame, and physical layer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeLevel {
    /// Controls decoding of the protocol data unit
    pub app: AppDecodeLevel,
    /// Controls decoding of the transport envelope
    ///
    /// On TCP, this is the MBAP decoding. On serial, this controls the RTU or ASCII framing.
    pub frame: FrameDecodeLevel,
    /// Controls the logging of physical layer read/write
    pub physical: PhysDecodeLevel,
}

/// Controls how transmitted and received Protocol Data Units (PDUs) are decoded at the INFO log level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AppDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the function code only
    FunctionCode,
    /// Decode the function code and the general description of the data
    DataHeaders,
    /// Decode the function code, the general description of the data and the actual data values
    DataValues,
}

/// Controls how the transport envelope around a PDU is decoded at the INFO log level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FrameDecodeLevel {
    /// Decode nothing
    #[default]
    Nothing,
    /// Decode the header
    Header,
    /// Decode the header and the raw payload as hexadecimal
    Payload,
}

/// Controls how data transmitted at the physical layer (TCP, serial, etc) is logged
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PhysDecodeLevel {
    /// Log nothing
    #[default]
    Nothing,
    /// Log only the length of data that is sent and received
    Length,
    /// Log the length and the actual data that is sent and received
    Data,
}

impl DecodeLevel {
    /// construct a `DecodeLevel` with nothing enabled
    pub fn nothing() -> Self {
        Self::default()
    }

    /// construct a `DecodeLevel` from its fields
    pub fn new(app: AppDecodeLevel, frame: FrameDecodeLevel, physical: PhysDecodeLevel) -> Self {
        DecodeLevel {
            app,
            frame,
            physical,
        }
    }

    /// change the application decode level
    pub fn application(mut self, app: AppDecodeLevel) -> Self {
        self.app = app;
        self
    }

    /// change the frame decode level
    pub fn frame(mut self, frame: FrameDecodeLevel) -> Self {
        self.frame = frame;
        self
    }

    /// change the physical layer decode level
    pub fn physical(mut self, physical: PhysDecodeLevel) -> Self {
        self.physical = physical;
        self
    }
}

impl From<AppDecodeLevel> for DecodeLevel {
    fn from(app: AppDecodeLevel) -> Self {
        Self {
            app,
            frame: FrameDecodeLevel::Nothing,
            physical: PhysDecodeLevel::Nothing,
        }
    }
}

impl AppDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.header()
    }

    pub(crate) fn header(&self) -> bool {
        !matches!(self, AppDecodeLevel::Nothing)
    }

    pub(crate) fn data_headers(&self) -> bool {
        matches!(self, AppDecodeLevel::DataHeaders | AppDecodeLevel::DataValues)
    }

    pub(crate) fn data_values(&self) -> bool {
        matches!(self, AppDecodeLevel::DataValues)
    }
}

impl FrameDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.header_enabled()
    }

    pub(crate) fn header_enabled(&self) -> bool {
        !matches!(self, FrameDecodeLevel::Nothing)
    }

    pub(crate) fn payload_enabled(&self) -> bool {
        matches!(self, FrameDecodeLevel::Payload)
    }
}

impl PhysDecodeLevel {
    pub(crate) fn enabled(&self) -> bool {
        self.length_enabled()
    }

    pub(crate) fn length_enabled(&self) -> bool {
        !matches!(self, PhysDecodeLevel::Nothing)
    }

    pub(crate) fn data_enabled(&self) -> bool {
        matches!(self, PhysDecodeLevel::Data)
    }
}
