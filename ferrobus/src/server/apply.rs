use crate::exception::ExceptionCode;
use crate::pdu::{Request, Response};
use crate::server::store::{DataStore, StoreError};
use crate::types::{DataKind, DataValues, RegisterCollection};

impl From<StoreError> for ExceptionCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::IllegalDataAddress { .. } => ExceptionCode::IllegalDataAddress,
            StoreError::ShapeMismatch(_) => ExceptionCode::ServerDeviceFailure,
        }
    }
}

/// Apply a decoded request to the store and build the response
///
/// Every failure becomes an exception response. Writes to discrete inputs and input registers
/// are refused with [`ExceptionCode::IllegalFunction`].
pub fn apply_request(store: &DataStore, request: &Request) -> Response {
    match execute(store, request) {
        Ok(response) => response,
        Err(exception) => Response::Exception {
            function: request.function(),
            exception,
        },
    }
}

fn execute(store: &DataStore, request: &Request) -> Result<Response, ExceptionCode> {
    let response = match request {
        Request::ReadCoils(range) => Response::ReadCoils(store.read_bits(DataKind::Coil, *range)?),
        Request::ReadDiscreteInputs(range) => {
            Response::ReadDiscreteInputs(store.read_bits(DataKind::DiscreteInput, *range)?)
        }
        Request::ReadHoldingRegisters(range) => Response::ReadHoldingRegisters(
            store
                .read_registers(DataKind::HoldingRegister, *range)?
                .into(),
        ),
        Request::ReadInputRegisters(range) => Response::ReadInputRegisters(
            store
                .read_registers(DataKind::InputRegister, *range)?
                .into(),
        ),
        Request::WriteSingleCoil(x) => {
            write(store, DataKind::Coil, x.index, DataValues::Bits(vec![x.value]))?;
            Response::WriteSingleCoil(*x)
        }
        Request::WriteSingleRegister(x) => {
            write(
                store,
                DataKind::HoldingRegister,
                x.index,
                DataValues::Registers(vec![x.value]),
            )?;
            Response::WriteSingleRegister(*x)
        }
        Request::WriteMultipleCoils(x) => {
            write(
                store,
                DataKind::Coil,
                x.range.start,
                DataValues::Bits(x.values.clone()),
            )?;
            Response::WriteMultipleCoils(x.range)
        }
        Request::WriteMultipleRegisters(x) => {
            write(
                store,
                DataKind::HoldingRegister,
                x.range.start,
                DataValues::Registers(x.values.clone()),
            )?;
            Response::WriteMultipleRegisters(x.range)
        }
        Request::ReadWriteMultipleRegisters(x) => {
            let values =
                store.write_then_read_registers(x.write.range.start, &x.write.values, x.read_range)?;
            Response::ReadWriteMultipleRegisters(RegisterCollection::new(values))
        }
    };

    Ok(response)
}

fn write(
    store: &DataStore,
    kind: DataKind,
    start: u16,
    values: DataValues,
) -> Result<(), ExceptionCode> {
    if !kind.is_writable_from_wire() {
        return Err(ExceptionCode::IllegalFunction);
    }
    store.write(kind, start, values)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressRange, Indexed, ReadWriteMultiple, WriteMultiple};

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn reads_holding_registers() {
        let store = DataStore::new(0, 0, 20, 0);
        store
            .write_registers(DataKind::HoldingRegister, 10, &[100, 200])
            .unwrap();
        assert_eq!(
            apply_request(&store, &Request::ReadHoldingRegisters(range(10, 2))),
            Response::ReadHoldingRegisters(RegisterCollection::new(vec![100, 200]))
        );
    }

    #[test]
    fn out_of_range_read_becomes_illegal_data_address() {
        let store = DataStore::new(10, 10, 10, 10);
        assert_eq!(
            apply_request(&store, &Request::ReadInputRegisters(range(9, 2))),
            Response::Exception {
                function: 0x04,
                exception: ExceptionCode::IllegalDataAddress
            }
        );
    }

    #[test]
    fn writes_echo_the_request() {
        let store = DataStore::new(10, 10, 10, 10);
        assert_eq!(
            apply_request(&store, &Request::WriteSingleCoil(Indexed::new(3, true))),
            Response::WriteSingleCoil(Indexed::new(3, true))
        );
        let request =
            Request::WriteMultipleRegisters(WriteMultiple::from(2, vec![7, 8, 9]).unwrap());
        assert_eq!(
            apply_request(&store, &request),
            Response::WriteMultipleRegisters(range(2, 3))
        );
        assert_eq!(
            store.read_registers(DataKind::HoldingRegister, range(2, 3)),
            Ok(vec![7, 8, 9])
        );
        assert_eq!(store.read_bits(DataKind::Coil, range(3, 1)), Ok(vec![true]));
    }

    #[test]
    fn writes_to_read_only_spaces_are_illegal_functions() {
        let store = DataStore::new(10, 10, 10, 10);
        assert_eq!(
            write(&store, DataKind::DiscreteInput, 0, DataValues::Bits(vec![true])),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            write(&store, DataKind::InputRegister, 0, DataValues::Registers(vec![1])),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            store.read_registers(DataKind::InputRegister, range(0, 1)),
            Ok(vec![0])
        );
    }

    #[test]
    fn read_write_multiple_writes_before_reading() {
        let store = DataStore::new(0, 0, 10, 0);
        let request = Request::ReadWriteMultipleRegisters(
            ReadWriteMultiple::new(range(0, 4), 1, vec![0xCA, 0xFE]).unwrap(),
        );
        assert_eq!(
            apply_request(&store, &request),
            Response::ReadWriteMultipleRegisters(RegisterCollection::new(vec![0, 0xCA, 0xFE, 0]))
        );
    }
}
