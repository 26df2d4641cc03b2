use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::types::{AddressRange, DataKind, DataValues, WrongShape};

/// Number of entries in each space of [`DataStore::default`]
pub const DEFAULT_SPACE_SIZE: usize = 1 << 16;

/// Record of a completed read or write against a [`DataStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataStoreEvent {
    /// first address that was accessed
    pub start_address: u16,
    /// space that was accessed
    pub kind: DataKind,
    /// values that were read or written
    pub data: DataValues,
}

/// Receives notifications for every successful access to a [`DataStore`]
///
/// Callbacks run synchronously on the task performing the access, after the access completes
/// and before the call that triggered it returns. The store lock is not held while they run.
pub trait DataStoreObserver: Send + Sync {
    /// called after a successful read
    fn on_read(&self, _event: &DataStoreEvent) {}

    /// called after a successful write
    fn on_write(&self, _event: &DataStoreEvent) {}
}

/// Errors returned by [`DataStore`] accesses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// `start + count` exceeds the length of the space
    IllegalDataAddress {
        /// space that was accessed
        kind: DataKind,
        /// first address requested
        start: u16,
        /// number of values requested
        count: usize,
        /// length of the space
        length: usize,
    },
    /// bit values supplied for a register space or the reverse
    ShapeMismatch(WrongShape),
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StoreError::IllegalDataAddress {
                kind,
                start,
                count,
                length,
            } => write!(
                f,
                "{kind} access at {start} for {count} value(s) exceeds the length of {length}"
            ),
            StoreError::ShapeMismatch(err) => err.fmt(f),
        }
    }
}

impl From<WrongShape> for StoreError {
    fn from(err: WrongShape) -> Self {
        StoreError::ShapeMismatch(err)
    }
}

struct Spaces {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl Spaces {
    fn bits(&self, kind: DataKind) -> Option<&Vec<bool>> {
        match kind {
            DataKind::Coil => Some(&self.coils),
            DataKind::DiscreteInput => Some(&self.discrete_inputs),
            _ => None,
        }
    }

    fn bits_mut(&mut self, kind: DataKind) -> Option<&mut Vec<bool>> {
        match kind {
            DataKind::Coil => Some(&mut self.coils),
            DataKind::DiscreteInput => Some(&mut self.discrete_inputs),
            _ => None,
        }
    }

    fn registers(&self, kind: DataKind) -> Option<&Vec<u16>> {
        match kind {
            DataKind::HoldingRegister => Some(&self.holding_registers),
            DataKind::InputRegister => Some(&self.input_registers),
            _ => None,
        }
    }

    fn registers_mut(&mut self, kind: DataKind) -> Option<&mut Vec<u16>> {
        match kind {
            DataKind::HoldingRegister => Some(&mut self.holding_registers),
            DataKind::InputRegister => Some(&mut self.input_registers),
            _ => None,
        }
    }
}

fn check_range(
    kind: DataKind,
    start: u16,
    count: usize,
    length: usize,
) -> Result<Range<usize>, StoreError> {
    let begin = start as usize;
    let end = begin + count;
    if end > length {
        return Err(StoreError::IllegalDataAddress {
            kind,
            start,
            count,
            length,
        });
    }
    Ok(begin..end)
}

fn wrong_shape(kind: DataKind) -> StoreError {
    let actual = kind.shape();
    let requested = match actual {
        crate::types::ValueShape::Bits => crate::types::ValueShape::Registers,
        crate::types::ValueShape::Registers => crate::types::ValueShape::Bits,
    };
    StoreError::ShapeMismatch(WrongShape { requested, actual })
}

/// In-memory coils, discrete inputs, holding registers and input registers
///
/// Every access is bounds checked and runs under a single store-wide lock, so concurrent
/// callers observe either all or none of any single write.
pub struct DataStore {
    spaces: Mutex<Spaces>,
    observers: RwLock<Vec<Arc<dyn DataStoreObserver>>>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new(
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
        )
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let spaces = self.lock();
        f.debug_struct("DataStore")
            .field("coils", &spaces.coils.len())
            .field("discrete_inputs", &spaces.discrete_inputs.len())
            .field("holding_registers", &spaces.holding_registers.len())
            .field("input_registers", &spaces.input_registers.len())
            .finish()
    }
}

impl DataStore {
    /// Create a store with each space independently sized and zero initialized
    pub fn new(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            spaces: Mutex::new(Spaces {
                coils: vec![false; coils],
                discrete_inputs: vec![false; discrete_inputs],
                holding_registers: vec![0; holding_registers],
                input_registers: vec![0; input_registers],
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for read and write notifications
    pub fn add_observer(&self, observer: Arc<dyn DataStoreObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Number of entries in a space
    pub fn len(&self, kind: DataKind) -> usize {
        let spaces = self.lock();
        match kind {
            DataKind::Coil => spaces.coils.len(),
            DataKind::DiscreteInput => spaces.discrete_inputs.len(),
            DataKind::HoldingRegister => spaces.holding_registers.len(),
            DataKind::InputRegister => spaces.input_registers.len(),
        }
    }

    /// Read `count` values starting at `start`
    pub fn read(&self, kind: DataKind, start: u16, count: u16) -> Result<DataValues, StoreError> {
        let data = {
            let spaces = self.lock();
            Self::read_locked(&spaces, kind, start, count as usize)?
        };

        self.notify(
            |observer, event| observer.on_read(event),
            DataStoreEvent {
                start_address: start,
                kind,
                data: data.clone(),
            },
        );

        Ok(data)
    }

    /// Read a range of coils or discrete inputs
    pub fn read_bits(&self, kind: DataKind, range: AddressRange) -> Result<Vec<bool>, StoreError> {
        match self.read(kind, range.start, range.count)? {
            DataValues::Bits(x) => Ok(x),
            DataValues::Registers(_) => Err(wrong_shape(kind)),
        }
    }

    /// Read a range of holding or input registers
    pub fn read_registers(
        &self,
        kind: DataKind,
        range: AddressRange,
    ) -> Result<Vec<u16>, StoreError> {
        match self.read(kind, range.start, range.count)? {
            DataValues::Registers(x) => Ok(x),
            DataValues::Bits(_) => Err(wrong_shape(kind)),
        }
    }

    /// Write values starting at `start`
    ///
    /// The shape of `values` must match the space. Nothing is written if any address is out of range.
    pub fn write(&self, kind: DataKind, start: u16, values: DataValues) -> Result<(), StoreError> {
        {
            let mut spaces = self.lock();
            Self::write_locked(&mut spaces, kind, start, &values)?;
        }

        self.notify(
            |observer, event| observer.on_write(event),
            DataStoreEvent {
                start_address: start,
                kind,
                data: values,
            },
        );

        Ok(())
    }

    /// Write a sequence of coils or discrete inputs
    pub fn write_bits(&self, kind: DataKind, start: u16, values: &[bool]) -> Result<(), StoreError> {
        self.write(kind, start, DataValues::Bits(values.to_vec()))
    }

    /// Write a sequence of holding or input registers
    pub fn write_registers(
        &self,
        kind: DataKind,
        start: u16,
        values: &[u16],
    ) -> Result<(), StoreError> {
        self.write(kind, start, DataValues::Registers(values.to_vec()))
    }

    /// Write holding registers, then read holding registers, under one lock
    ///
    /// Both ranges are checked before anything is modified.
    pub fn write_then_read_registers(
        &self,
        write_start: u16,
        values: &[u16],
        read: AddressRange,
    ) -> Result<Vec<u16>, StoreError> {
        let kind = DataKind::HoldingRegister;
        let written = DataValues::Registers(values.to_vec());

        let data = {
            let mut spaces = self.lock();
            let length = spaces.holding_registers.len();
            check_range(kind, read.start, read.count as usize, length)?;
            Self::write_locked(&mut spaces, kind, write_start, &written)?;
            Self::read_locked(&spaces, kind, read.start, read.count as usize)?
        };

        self.notify(
            |observer, event| observer.on_write(event),
            DataStoreEvent {
                start_address: write_start,
                kind,
                data: written,
            },
        );
        self.notify(
            |observer, event| observer.on_read(event),
            DataStoreEvent {
                start_address: read.start,
                kind,
                data: data.clone(),
            },
        );

        match data {
            DataValues::Registers(x) => Ok(x),
            DataValues::Bits(_) => Err(wrong_shape(kind)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Spaces> {
        self.spaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_locked(
        spaces: &Spaces,
        kind: DataKind,
        start: u16,
        count: usize,
    ) -> Result<DataValues, StoreError> {
        if let Some(bits) = spaces.bits(kind) {
            let range = check_range(kind, start, count, bits.len())?;
            return Ok(DataValues::Bits(bits[range].to_vec()));
        }
        if let Some(registers) = spaces.registers(kind) {
            let range = check_range(kind, start, count, registers.len())?;
            return Ok(DataValues::Registers(registers[range].to_vec()));
        }
        Err(wrong_shape(kind))
    }

    fn write_locked(
        spaces: &mut Spaces,
        kind: DataKind,
        start: u16,
        values: &DataValues,
    ) -> Result<(), StoreError> {
        if let Some(bits) = spaces.bits_mut(kind) {
            let src = values.bits()?;
            let range = check_range(kind, start, src.len(), bits.len())?;
            bits[range].copy_from_slice(src);
            return Ok(());
        }
        if let Some(registers) = spaces.registers_mut(kind) {
            let src = values.registers()?;
            let range = check_range(kind, start, src.len(), registers.len())?;
            registers[range].copy_from_slice(src);
            return Ok(());
        }
        Err(wrong_shape(kind))
    }

    fn notify<F>(&self, callback: F, event: DataStoreEvent)
    where
        F: Fn(&dyn DataStoreObserver, &DataStoreEvent),
    {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers.iter() {
            callback(observer.as_ref(), &event);
        }
    }
}
