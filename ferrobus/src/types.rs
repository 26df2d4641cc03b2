use crate::constants::limits;
use crate::error::{AduParseError, InvalidRequest};

/// Modbus unit identifier, just a type-safe wrapper around `u8`
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnitId {
    /// underlying raw value
    pub value: u8,
}

/// Start and count tuple used when making various requests
/// Cannot be constructed with invalid start/count
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressRange {
    /// Starting address of the range
    pub start: u16,
    /// Count of elements in the range
    pub count: u16,
}

/// Value and its address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Indexed<T> {
    /// Address of the value
    pub index: u16,
    /// Associated value
    pub value: T,
}

/// Ordered, mutable sequence of 16-bit registers
///
/// The network representation is big-endian, two bytes per register.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterCollection {
    values: Vec<u16>,
}

/// The four independently addressed spaces of a Modbus device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// read/write bits
    Coil,
    /// read-only bits
    DiscreteInput,
    /// read/write 16-bit registers
    HoldingRegister,
    /// read-only 16-bit registers
    InputRegister,
}

/// The two shapes a slice of Modbus values can take
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueShape {
    /// sequence of booleans
    Bits,
    /// sequence of 16-bit values
    Registers,
}

/// A slice of values read from or written to a data store, tagged by its shape
///
/// Exactly one shape is populated. Asking for the other one is an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataValues {
    /// coils or discrete inputs
    Bits(Vec<bool>),
    /// holding or input registers
    Registers(Vec<u16>),
}

/// Returned when a [`DataValues`] is accessed as the shape it doesn't hold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WrongShape {
    /// shape that was asked for
    pub requested: ValueShape,
    /// shape that is actually held
    pub actual: ValueShape,
}

/// Collection of values and starting address
///
/// Used when making write multiple coil/register requests
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteMultiple<T> {
    /// range of addresses
    pub range: AddressRange,
    /// vector of values
    pub values: Vec<T>,
}

/// Registers to write and then a range to read back, in a single transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadWriteMultiple {
    /// range read after the write is performed
    pub read_range: AddressRange,
    /// registers written first
    pub write: WriteMultiple<u16>,
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04X}", self.value)
    }
}

impl UnitId {
    /// Create a new UnitId
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    /// Broadcast address (only in serial modes)
    pub fn broadcast() -> Self {
        Self { value: 0x00 }
    }

    /// Returns true if this is the serial broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.value == 0x00
    }

    /// Returns true if the address is reserved in serial modes
    pub fn is_rtu_reserved(&self) -> bool {
        self.value >= 248
    }
}

/// Create the default UnitId of `0xFF`
impl Default for UnitId {
    fn default() -> Self {
        Self { value: 0xFF }
    }
}

impl AddressRange {
    /// Create a new address range
    pub fn try_from(start: u16, count: u16) -> Result<Self, InvalidRequest> {
        if count == 0 {
            return Err(InvalidRequest::CountOfZero);
        }

        let max_start = u16::MAX - (count - 1);

        if start > max_start {
            return Err(InvalidRequest::AddressOverflow(start, count));
        }

        Ok(Self { start, count })
    }

    pub(crate) fn iter(&self) -> AddressIterator {
        AddressIterator::new(self.start, self.count)
    }

    pub(crate) fn limited_count(self, limit: u16) -> Result<Self, InvalidRequest> {
        // the fields are public, so the constructor checks may have been bypassed
        Self::try_from(self.start, self.count)?;
        if self.count > limit {
            return Err(InvalidRequest::CountTooLargeForType(self.count, limit));
        }
        Ok(self)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "start: {:#06X} qty: {}", self.start, self.count)
    }
}

pub(crate) struct AddressIterator {
    current: u16,
    remain: u16,
}

impl AddressIterator {
    fn new(current: u16, remain: u16) -> Self {
        Self { current, remain }
    }
}

impl Iterator for AddressIterator {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        match self.remain.checked_sub(1) {
            Some(x) => {
                let ret = self.current;
                // wrapping because the last address of a range may be u16::MAX
                self.current = self.current.wrapping_add(1);
                self.remain = x;
                Some(ret)
            }
            None => None,
        }
    }
}

impl<T> Indexed<T> {
    /// Create a new indexed value
    pub fn new(index: u16, value: T) -> Self {
        Indexed { index, value }
    }
}

impl<T> From<(u16, T)> for Indexed<T> {
    fn from(tuple: (u16, T)) -> Self {
        let (index, value) = tuple;
        Self::new(index, value)
    }
}

impl std::fmt::Display for Indexed<bool> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {}", self.index, self.value as i32)
    }
}

impl std::fmt::Display for Indexed<u16> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idx: {:#06X} value: {:#06X}", self.index, self.value)
    }
}

pub(crate) fn coil_from_u16(value: u16) -> Result<bool, AduParseError> {
    match value {
        crate::constants::coil::ON => Ok(true),
        crate::constants::coil::OFF => Ok(false),
        _ => Err(AduParseError::UnknownCoilState(value)),
    }
}

pub(crate) fn coil_to_u16(value: bool) -> u16 {
    if value {
        crate::constants::coil::ON
    } else {
        crate::constants::coil::OFF
    }
}

impl RegisterCollection {
    /// Create a collection from 16-bit values
    pub fn new(values: Vec<u16>) -> Self {
        Self { values }
    }

    /// Create a collection from big-endian byte pairs
    ///
    /// Fails if the number of bytes is odd.
    pub fn from_network_bytes(bytes: &[u8]) -> Result<Self, AduParseError> {
        if bytes.len() % 2 != 0 {
            return Err(AduParseError::TrailingBytes(1));
        }

        let values = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self { values })
    }

    /// Serialize the registers as big-endian byte pairs
    pub fn network_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|x| x.to_be_bytes()).collect()
    }

    /// Number of bytes in the network representation, always `2 * len()`
    pub fn byte_count(&self) -> usize {
        2 * self.values.len()
    }

    /// Append a register to the end of the collection
    pub fn push(&mut self, value: u16) {
        self.values.push(value)
    }

    /// Remove and return the register at `index`, shifting later registers down
    ///
    /// Returns `None` if the index is out of bounds.
    pub fn remove(&mut self, index: usize) -> Option<u16> {
        if index < self.values.len() {
            Some(self.values.remove(index))
        } else {
            None
        }
    }

    /// Consume the collection and return the underlying values
    pub fn into_inner(self) -> Vec<u16> {
        self.values
    }
}

impl std::ops::Deref for RegisterCollection {
    type Target = [u16];

    fn deref(&self) -> &Self::Target {
        self.values.as_slice()
    }
}

impl std::ops::DerefMut for RegisterCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.values.as_mut_slice()
    }
}

impl From<Vec<u16>> for RegisterCollection {
    fn from(values: Vec<u16>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<u16> for RegisterCollection {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl std::fmt::Display for RegisterCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, val) in self.values.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{val}")?;
        }
        Ok(())
    }
}

impl DataKind {
    /// Shape of the values held by this space
    pub fn shape(self) -> ValueShape {
        match self {
            DataKind::Coil | DataKind::DiscreteInput => ValueShape::Bits,
            DataKind::HoldingRegister | DataKind::InputRegister => ValueShape::Registers,
        }
    }

    /// Discrete inputs and input registers cannot be written by a remote master
    pub fn is_writable_from_wire(self) -> bool {
        matches!(self, DataKind::Coil | DataKind::HoldingRegister)
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Coil => f.write_str("coil"),
            DataKind::DiscreteInput => f.write_str("discrete input"),
            DataKind::HoldingRegister => f.write_str("holding register"),
            DataKind::InputRegister => f.write_str("input register"),
        }
    }
}

impl DataValues {
    /// Which shape is populated
    pub fn shape(&self) -> ValueShape {
        match self {
            DataValues::Bits(_) => ValueShape::Bits,
            DataValues::Registers(_) => ValueShape::Registers,
        }
    }

    /// Access the boolean sequence
    pub fn bits(&self) -> Result<&[bool], WrongShape> {
        match self {
            DataValues::Bits(x) => Ok(x.as_slice()),
            DataValues::Registers(_) => Err(WrongShape {
                requested: ValueShape::Bits,
                actual: ValueShape::Registers,
            }),
        }
    }

    /// Access the 16-bit sequence
    pub fn registers(&self) -> Result<&[u16], WrongShape> {
        match self {
            DataValues::Registers(x) => Ok(x.as_slice()),
            DataValues::Bits(_) => Err(WrongShape {
                requested: ValueShape::Registers,
                actual: ValueShape::Bits,
            }),
        }
    }

    /// Number of values regardless of shape
    pub fn len(&self) -> usize {
        match self {
            DataValues::Bits(x) => x.len(),
            DataValues::Registers(x) => x.len(),
        }
    }

    /// True if no values are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::error::Error for WrongShape {}

impl std::fmt::Display for WrongShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} is not a valid option for values holding {:?}",
            self.requested, self.actual
        )
    }
}

impl<T> WriteMultiple<T> {
    /// Create new collection of values
    pub fn from(start: u16, values: Vec<T>) -> Result<Self, InvalidRequest> {
        let count = match u16::try_from(values.len()) {
            Ok(x) => x,
            Err(_) => return Err(InvalidRequest::CountTooBigForU16(values.len())),
        };
        let range = AddressRange::try_from(start, count)?;
        Ok(Self { range, values })
    }

    pub(crate) fn limited_count(&self, limit: u16) -> Result<(), InvalidRequest> {
        self.range.limited_count(limit)?;
        if self.values.len() != self.range.count as usize {
            return Err(InvalidRequest::CountMismatch(
                self.range.count,
                self.values.len(),
            ));
        }
        Ok(())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = Indexed<T>> + '_
    where
        T: Copy,
    {
        self.range
            .iter()
            .zip(self.values.iter())
            .map(|(index, value)| Indexed::new(index, *value))
    }
}

impl ReadWriteMultiple {
    /// Create a request that writes `values` at `write_start` and then reads `read_range`
    pub fn new(
        read_range: AddressRange,
        write_start: u16,
        values: Vec<u16>,
    ) -> Result<Self, InvalidRequest> {
        Ok(Self {
            read_range,
            write: WriteMultiple::from(write_start, values)?,
        })
    }

    pub(crate) fn validate(&self) -> Result<(), InvalidRequest> {
        self.read_range
            .limited_count(limits::MAX_READ_REGISTERS_COUNT)?;
        self.write
            .limited_count(limits::MAX_READ_WRITE_WRITE_COUNT)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_start_max_count_of_one_is_allowed() {
        AddressRange::try_from(u16::MAX, 1).unwrap();
    }

    #[test]
    fn address_maximum_range_is_ok() {
        AddressRange::try_from(0, 0xFFFF).unwrap();
    }

    #[test]
    fn address_count_zero_fails_validation() {
        assert_eq!(
            AddressRange::try_from(0, 0),
            Err(InvalidRequest::CountOfZero)
        );
    }

    #[test]
    fn start_max_count_of_two_overflows() {
        assert_eq!(
            AddressRange::try_from(u16::MAX, 2),
            Err(InvalidRequest::AddressOverflow(u16::MAX, 2))
        );
    }

    #[test]
    fn address_iterator_reaches_the_top_of_the_address_space() {
        let range = AddressRange::try_from(u16::MAX - 1, 2).unwrap();
        assert_eq!(range.iter().collect::<Vec<u16>>(), vec![0xFFFE, 0xFFFF]);
    }

    #[test]
    fn register_collection_byte_count() {
        let col = RegisterCollection::new(vec![1, 2, 3]);
        assert_eq!(col.byte_count(), 6);
    }

    #[test]
    fn new_register_collection() {
        let col = RegisterCollection::new(vec![5, 3, 4, 6]);
        assert_eq!(col.len(), 4);
        assert_eq!(col[0], 5);
    }

    #[test]
    fn register_collection_from_bytes() {
        let col = RegisterCollection::from_network_bytes(&[0, 1, 0, 2, 0, 3]).unwrap();
        assert_eq!(col.len(), 3);
        assert_eq!(&col[..], &[1, 2, 3]);
    }

    #[test]
    fn register_collection_network_bytes() {
        let col = RegisterCollection::new(vec![5, 3, 4, 6]);
        assert_eq!(col.network_bytes(), vec![0, 5, 0, 3, 0, 4, 0, 6]);
    }

    #[test]
    fn register_collection_bytes_and_values_agree() {
        let values = vec![0x0000, 0xCAFE, 0x00FF, 0xFF00, 0xFFFF];
        let direct = RegisterCollection::new(values.clone());
        let parsed = RegisterCollection::from_network_bytes(&direct.network_bytes()).unwrap();
        assert_eq!(parsed, direct);
        assert_eq!(parsed.network_bytes().len(), 2 * values.len());
    }

    #[test]
    fn register_collection_rejects_odd_byte_count() {
        assert_eq!(
            RegisterCollection::from_network_bytes(&[0x00, 0x01, 0x02]),
            Err(AduParseError::TrailingBytes(1))
        );
    }

    #[test]
    fn empty_register_collection_has_no_bytes() {
        let col = RegisterCollection::default();
        assert!(col.network_bytes().is_empty());
    }

    #[test]
    fn register_collection_can_be_modified() {
        let mut col = RegisterCollection::new(vec![3, 4, 5]);
        col[0] = 9;
        col.push(45);
        assert_eq!(col.remove(1), Some(4));
        assert_eq!(col.remove(10), None);
        assert_eq!(&col[..], &[9, 5, 45]);
        assert_eq!(col.to_string(), "9, 5, 45");
    }

    #[test]
    fn data_values_accessors_check_the_shape() {
        let bits = DataValues::Bits(vec![true, false]);
        assert_eq!(bits.bits(), Ok([true, false].as_slice()));
        assert_eq!(
            bits.registers(),
            Err(WrongShape {
                requested: ValueShape::Registers,
                actual: ValueShape::Bits
            })
        );

        let registers = DataValues::Registers(vec![7]);
        assert_eq!(registers.registers(), Ok([7].as_slice()));
        assert!(registers.bits().is_err());
    }

    #[test]
    fn write_multiple_computes_range_from_values() {
        let write = WriteMultiple::from(10, vec![true, false, true]).unwrap();
        assert_eq!(write.range, AddressRange::try_from(10, 3).unwrap());
        assert_eq!(
            write.iter().collect::<Vec<Indexed<bool>>>(),
            vec![
                Indexed::new(10, true),
                Indexed::new(11, false),
                Indexed::new(12, true)
            ]
        );
    }

    #[test]
    fn write_multiple_rejects_empty_values() {
        assert_eq!(
            WriteMultiple::<u16>::from(0, Vec::new()),
            Err(InvalidRequest::CountOfZero)
        );
    }

    #[test]
    fn read_write_multiple_limits_the_write_count() {
        let request = ReadWriteMultiple::new(
            AddressRange::try_from(0, 1).unwrap(),
            0,
            vec![0; 122],
        )
        .unwrap();
        assert_eq!(
            request.validate(),
            Err(InvalidRequest::CountTooLargeForType(122, 121))
        );
    }

    #[test]
    fn broadcast_address() {
        assert_eq!(UnitId::broadcast(), UnitId::new(0x00));
        assert!(UnitId::new(0).is_broadcast());
    }

    #[test]
    fn rtu_reserved_address() {
        assert!(UnitId::new(248).is_rtu_reserved());
        assert!(UnitId::new(255).is_rtu_reserved());
        assert!(!UnitId::new(41).is_rtu_reserved());
    }
}
