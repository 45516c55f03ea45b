//! Source info side tables (`.aspd` files): mapping program counter offsets
//! back to file, line, and column for post-mortem diagnostics.
//!
//! Layout: magic `AspD`, a version byte, a big-endian u16 file-name count
//! followed by length-prefixed names, then a big-endian u32 record count
//! followed by records of `(pc u32, file u16, line u32, column u32)`, all
//! big-endian. Records need not arrive sorted; lookup resolves a program
//! counter to the record with the greatest pc not beyond it.

use crate::error::AddCodeError;

/// Header magic of a source info file.
pub const SOURCE_INFO_MAGIC: [u8; 4] = *b"AspD";

/// Current source info format version.
pub const SOURCE_INFO_VERSION: u8 = 1;

/// One resolved source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    pc: u32,
    file: u16,
    line: u32,
    column: u32,
}

/// A parsed source info table.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    files: Vec<String>,
    records: Vec<Record>,
}

impl SourceInfo {
    /// Parses a source info image.
    pub fn parse(bytes: &[u8]) -> Result<Self, AddCodeError> {
        let mut cursor = Cursor { bytes, position: 0 };
        if cursor.take(4)? != SOURCE_INFO_MAGIC {
            return Err(AddCodeError::InvalidFormat);
        }
        if cursor.u8()? != SOURCE_INFO_VERSION {
            return Err(AddCodeError::InvalidVersion);
        }

        let file_count = cursor.u16()?;
        let mut files = Vec::with_capacity(file_count as usize);
        for _ in 0..file_count {
            let length = cursor.u16()? as usize;
            let name = cursor.take(length)?;
            files.push(String::from_utf8(name.to_vec()).map_err(|_| AddCodeError::InvalidFormat)?);
        }

        let record_count = cursor.u32()?;
        let mut records = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let record = Record {
                pc: cursor.u32()?,
                file: cursor.u16()?,
                line: cursor.u32()?,
                column: cursor.u32()?,
            };
            if record.file as usize >= files.len() {
                return Err(AddCodeError::InvalidFormat);
            }
            records.push(record);
        }
        records.sort_by_key(|record| record.pc);

        Ok(Self { files, records })
    }

    /// Resolves a program counter to the nearest preceding source position.
    #[must_use]
    pub fn lookup(&self, pc: u32) -> Option<SourceLocation<'_>> {
        let index = self.records.partition_point(|record| record.pc <= pc);
        let record = self.records.get(index.checked_sub(1)?)?;
        Some(SourceLocation {
            file: &self.files[record.file as usize],
            line: record.line,
            column: record.column,
        })
    }
}

/// Builder emitting the source info format; the contract the offline
/// compiler's debug output follows.
#[derive(Debug, Default)]
pub struct SourceInfoBuilder {
    files: Vec<String>,
    records: Vec<Record>,
}

impl SourceInfoBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file name, returning its index.
    pub fn file(&mut self, name: &str) -> u16 {
        if let Some(index) = self.files.iter().position(|existing| existing == name) {
            return index as u16;
        }
        self.files.push(name.to_string());
        (self.files.len() - 1) as u16
    }

    pub fn record(&mut self, pc: u32, file: u16, line: u32, column: u32) {
        self.records.push(Record { pc, file, line, column });
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&SOURCE_INFO_MAGIC);
        out.push(SOURCE_INFO_VERSION);
        out.extend_from_slice(&(self.files.len() as u16).to_be_bytes());
        for file in &self.files {
            out.extend_from_slice(&(file.len() as u16).to_be_bytes());
            out.extend_from_slice(file.as_bytes());
        }
        out.extend_from_slice(&(self.records.len() as u32).to_be_bytes());
        for record in &self.records {
            out.extend_from_slice(&record.pc.to_be_bytes());
            out.extend_from_slice(&record.file.to_be_bytes());
            out.extend_from_slice(&record.line.to_be_bytes());
            out.extend_from_slice(&record.column.to_be_bytes());
        }
        out
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, count: usize) -> Result<&'a [u8], AddCodeError> {
        if self.bytes.len() - self.position < count {
            return Err(AddCodeError::InvalidFormat);
        }
        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, AddCodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, AddCodeError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("two bytes")))
    }

    fn u32(&mut self) -> Result<u32, AddCodeError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("four bytes")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_lookup() {
        let mut builder = SourceInfoBuilder::new();
        let main = builder.file("main.asp");
        let util = builder.file("util.asp");
        builder.record(0, main, 1, 1);
        builder.record(10, main, 2, 5);
        builder.record(30, util, 7, 3);
        let info = SourceInfo::parse(&builder.finish()).unwrap();

        assert_eq!(
            info.lookup(0),
            Some(SourceLocation {
                file: "main.asp",
                line: 1,
                column: 1
            })
        );
        assert_eq!(info.lookup(12).unwrap().line, 2);
        assert_eq!(info.lookup(1000).unwrap().file, "util.asp");
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            SourceInfo::parse(b"NotD\x01"),
            Err(AddCodeError::InvalidFormat)
        ));
    }
}
