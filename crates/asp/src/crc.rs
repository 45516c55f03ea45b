//! CRC-32/ISO-HDLC, the check value algorithm shared by the application
//! specification generator and the engine's code loader.
//!
//! Parameters: width 32, polynomial 0x04C11DB7, initial value 0xFFFFFFFF,
//! reflected input and output, final XOR 0xFFFFFFFF.

/// Reflected polynomial for CRC-32/ISO-HDLC.
const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Incremental CRC-32/ISO-HDLC session.
#[derive(Debug, Clone)]
pub struct Crc32 {
    table: [u32; 256],
    value: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Starts a new session.
    #[must_use]
    pub fn new() -> Self {
        let mut table = [0u32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let mut crc = i as u32;
            for _ in 0..8 {
                crc = if crc & 1 == 0 { crc >> 1 } else { (crc >> 1) ^ POLYNOMIAL };
            }
            *slot = crc;
        }
        Self {
            table,
            value: 0xFFFF_FFFF,
        }
    }

    /// Contributes bytes to the running check value.
    pub fn add(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.value ^ u32::from(byte)) & 0xFF) as usize;
            self.value = (self.value >> 8) ^ self.table[index];
        }
    }

    /// Finishes the session, yielding the check value.
    #[must_use]
    pub fn finish(self) -> u32 {
        self.value ^ 0xFFFF_FFFF
    }
}

/// Computes the check value of a single buffer.
#[must_use]
pub fn checksum(data: &[u8]) -> u32 {
    let mut session = Crc32::new();
    session.add(data);
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_answer() {
        // The standard check input for CRC-32/ISO-HDLC.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut session = Crc32::new();
        session.add(b"1234");
        session.add(b"56789");
        assert_eq!(session.finish(), checksum(b"123456789"));
    }

    #[test]
    fn empty_input() {
        assert_eq!(checksum(b""), 0);
    }
}
