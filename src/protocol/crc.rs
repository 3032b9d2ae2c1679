//! CRC-16 used for packet headers and payloads
//!
//! CCITT polynomial 0x1021 with XMODEM parameters, computed bitwise so no
//! lookup table ends up in flash.

use crc::{Crc, NoTable, CRC_16_XMODEM};

const CRC: Crc<u16, NoTable> = Crc::<u16, NoTable>::new(&CRC_16_XMODEM);

/// Compute the CRC of `data` starting from `seed`.
///
/// An empty slice returns the seed-defined value.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut digest = CRC.digest_with_initial(seed);
    digest.update(data);
    digest.finalize()
}
