//! CRC-16/MODBUS used by RTU frames and by the vendor framed payload.

/// Length of the little-endian checksum trailer
pub const CRC_LENGTH: usize = 2;

/// precomputes the CRC table as a constant!
const CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Compute the CRC-16/MODBUS of `data`
///
/// Reflected polynomial 0xA001, initial register 0xFFFF. An empty slice yields 0xFFFF.
pub fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Split a buffer into its payload and the little-endian CRC stored in the final two bytes
///
/// Returns `None` when the buffer is too short to hold a trailer.
pub fn split_trailer(buffer: &[u8]) -> Option<(&[u8], u16)> {
    let split = buffer.len().checked_sub(CRC_LENGTH)?;
    let (payload, trailer) = buffer.split_at(split);
    match trailer {
        [low, high] => Some((payload, u16::from_le_bytes([*low, *high]))),
        _ => None,
    }
}

/// Returns true if the trailing CRC matches the CRC of everything before it
pub fn validate(buffer: &[u8]) -> bool {
    match split_trailer(buffer) {
        Some((payload, received)) => crc16(payload) == received,
        None => false,
    }
}
