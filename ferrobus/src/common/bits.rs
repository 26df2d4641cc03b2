use crate::error::InternalError;

pub(crate) fn num_bytes_for_bits(count: usize) -> usize {
    count.div_ceil(8)
}

/// byte count field for a packed bit sequence, which must fit in a u8
pub(crate) fn byte_count_for_bits(count: usize) -> Result<u8, InternalError> {
    let bytes = num_bytes_for_bits(count);
    u8::try_from(bytes).map_err(|_| InternalError::BadByteCount(bytes))
}

/// byte count field for a register sequence, which must fit in a u8
pub(crate) fn byte_count_for_registers(count: usize) -> Result<u8, InternalError> {
    let bytes = 2 * count;
    u8::try_from(bytes).map_err(|_| InternalError::BadByteCount(bytes))
}

/// pack booleans LSB first, zero padding the final byte
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, bit)| if *bit { acc | (1 << i) } else { acc })
        })
        .collect()
}

/// unpack exactly `count` booleans, ignoring any padding bits
///
/// the caller is responsible for checking that `bytes` holds at least `count` bits
pub(crate) fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| byte & (1 << i) != 0))
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_bytes_for_bits() {
        assert_eq!(num_bytes_for_bits(1), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(2000), 250);
    }

    #[test]
    fn byte_count_cannot_exceed_u8() {
        assert_eq!(byte_count_for_bits(2040), Ok(255));
        assert_eq!(
            byte_count_for_bits(2041),
            Err(InternalError::BadByteCount(256))
        );
        assert_eq!(
            byte_count_for_registers(128),
            Err(InternalError::BadByteCount(256))
        );
    }

    #[test]
    fn packs_least_significant_bit_first() {
        // example from the Modbus application protocol, read coils 20-38
        let bits = unpack_bits(&[0xCD, 0x6B, 0x05], 19);
        assert_eq!(pack_bits(&bits), vec![0xCD, 0x6B, 0x05]);
        assert_eq!(
            &bits[0..8],
            &[true, false, true, true, false, false, true, true]
        );
    }

    #[test]
    fn padding_bits_are_discarded() {
        assert_eq!(unpack_bits(&[0xFF], 3), vec![true, true, true]);
    }

    #[test]
    fn every_coil_count_survives_packing() {
        for count in 1..=2000usize {
            let bits: Vec<bool> = (0..count).map(|i| i % 3 == 0 || i % 7 == 0).collect();
            let packed = pack_bits(&bits);
            assert_eq!(packed.len(), num_bytes_for_bits(count));
            if count % 8 != 0 {
                let last = packed[packed.len() - 1];
                assert_eq!(last >> (count % 8), 0, "padding must be zero");
            }
            assert_eq!(unpack_bits(&packed, count), bits);
        }
    }
}
