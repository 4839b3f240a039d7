//! On-flash record format for [`PersistedState`].
//!
//! Binary layout (little-endian):
//! - magic: 4 bytes (`SPLG`)
//! - version: 1 byte
//! - reserved: 3 bytes (zero)
//! - payload length: 4 bytes (u32)
//! - payload: postcard-encoded `PersistedState`
//! - padding: 0xFF up to the flash write granularity

use super::{PersistedState, StorageError};

pub const RECORD_MAGIC: [u8; 4] = *b"SPLG";
pub const RECORD_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 12;

/// Largest encoded record, header included
pub const MAX_RECORD_SIZE: usize = 640;

/// Parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Erased flash or a different magic: nothing stored
    Empty,
    /// A record written by a different format version
    OtherVersion(u8),
    Valid { payload_len: usize },
}

pub fn parse_header(bytes: &[u8; HEADER_SIZE]) -> Result<Header, StorageError> {
    if bytes[0..4] != RECORD_MAGIC {
        return Ok(Header::Empty);
    }
    if bytes[4] != RECORD_VERSION {
        return Ok(Header::OtherVersion(bytes[4]));
    }
    let payload_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if payload_len == 0 || HEADER_SIZE + payload_len > MAX_RECORD_SIZE {
        return Err(StorageError::Corrupt);
    }
    Ok(Header::Valid { payload_len })
}

/// Round `len` up to a multiple of `align`
pub const fn padded_len(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}

/// Encode `state` into `buf`, padding to `align` bytes. Returns the record length.
pub fn encode(
    state: &PersistedState,
    buf: &mut [u8; MAX_RECORD_SIZE],
    align: usize,
) -> Result<usize, StorageError> {
    let payload_len = postcard::to_slice(state, &mut buf[HEADER_SIZE..])
        .map_err(|_| StorageError::Encode)?
        .len();

    buf[0..4].copy_from_slice(&RECORD_MAGIC);
    buf[4] = RECORD_VERSION;
    buf[5..8].fill(0);
    buf[8..12].copy_from_slice(&(payload_len as u32).to_le_bytes());

    let used = HEADER_SIZE + payload_len;
    let total = padded_len(used, align.max(1));
    if total > MAX_RECORD_SIZE {
        return Err(StorageError::NoSpace);
    }
    buf[used..total].fill(0xFF);
    Ok(total)
}

/// Decode a payload of exactly the length recorded in the header
pub fn decode_payload(payload: &[u8]) -> Result<PersistedState, StorageError> {
    let (state, rest) =
        postcard::take_from_bytes(payload).map_err(|_| StorageError::Corrupt)?;
    if !rest.is_empty() {
        return Err(StorageError::Corrupt);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayState;

    #[test]
    fn test_encode_layout() {
        let state = PersistedState {
            relay: RelayState::On,
            energy_mwh: 5,
            ..Default::default()
        };
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let len = encode(&state, &mut buf, 4).unwrap();
        assert_eq!(len % 4, 0);
        assert_eq!(&buf[0..4], b"SPLG");
        assert_eq!(buf[4], RECORD_VERSION);

        let header: [u8; HEADER_SIZE] = buf[..HEADER_SIZE].try_into().unwrap();
        let Header::Valid { payload_len } = parse_header(&header).unwrap() else {
            panic!("header should be valid");
        };
        let decoded = decode_payload(&buf[HEADER_SIZE..HEADER_SIZE + payload_len]).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_parse_header_cases() {
        assert_eq!(parse_header(&[0xFF; HEADER_SIZE]).unwrap(), Header::Empty);

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&RECORD_MAGIC);
        header[4] = 9;
        assert_eq!(parse_header(&header).unwrap(), Header::OtherVersion(9));

        header[4] = RECORD_VERSION;
        header[8..12].copy_from_slice(&4096u32.to_le_bytes());
        assert_eq!(parse_header(&header), Err(StorageError::Corrupt));
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(13, 4), 16);
        assert_eq!(padded_len(16, 4), 16);
        assert_eq!(padded_len(5, 1), 5);
    }
}
