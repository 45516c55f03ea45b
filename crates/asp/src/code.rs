//! Code memory: streamed loading, buffer adoption, and demand paging.
//!
//! Executable images start with a twelve-byte header: magic `AspE`, the
//! four-byte engine version the code was built for, and a big-endian u32
//! check value that must equal the application specification's check value.
//! Program counter addresses are relative to the first instruction, which
//! follows the header.

use crate::error::{AddCodeError, RunError, RunResult};

/// Header magic of an executable image.
pub const CODE_MAGIC: [u8; 4] = *b"AspE";

/// Engine version quad, embedded in every executable this engine accepts.
pub const ENGINE_VERSION: [u8; 4] = [0, 8, 1, 0];

/// Size of the executable header in bytes.
pub const CODE_HEADER_SIZE: usize = 12;

/// Demand-page reader. Fills `buffer` from `offset` bytes into the
/// executable image, returning how many bytes were produced; a short read
/// marks the end of the image.
pub type CodeReader<C> = fn(context: &mut C, offset: u32, buffer: &mut [u8]) -> RunResult<usize>;

#[derive(Debug)]
struct Page {
    /// File offset this page starts at, or `None` when the slot is empty.
    offset: Option<u32>,
    data: Vec<u8>,
    length: usize,
}

enum Store<C> {
    /// Accumulating streamed code; not yet executable.
    Loading { buffer: Vec<u8>, capacity: Option<usize> },
    /// Sealed code, header stripped.
    Sealed { code: Vec<u8> },
    /// Demand paging over a host callback.
    Paged {
        reader: CodeReader<C>,
        page_size: usize,
        pages: Vec<Page>,
        next_victim: usize,
        read_count: u64,
    },
}

impl<C> std::fmt::Debug for Store<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading { buffer, capacity } => f
                .debug_struct("Loading")
                .field("len", &buffer.len())
                .field("capacity", capacity)
                .finish(),
            Self::Sealed { code } => f.debug_struct("Sealed").field("len", &code.len()).finish(),
            Self::Paged {
                page_size, read_count, ..
            } => f
                .debug_struct("Paged")
                .field("page_size", page_size)
                .field("read_count", read_count)
                .finish(),
        }
    }
}

/// The engine's code memory.
#[derive(Debug)]
pub(crate) struct CodeArea<C> {
    store: Store<C>,
    sealed: bool,
    version: [u8; 4],
}

impl<C> CodeArea<C> {
    /// Starts in streamed-loading mode. `capacity` bounds the code buffer;
    /// `None` lets it grow with the stream.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            store: Store::Loading {
                buffer: Vec::new(),
                capacity,
            },
            sealed: false,
            version: [0; 4],
        }
    }

    /// True once code has been sealed in any mode.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Version quad of the loaded executable.
    pub fn version(&self) -> [u8; 4] {
        self.version
    }

    /// Appends streamed bytes.
    pub fn add(&mut self, bytes: &[u8]) -> Result<(), AddCodeError> {
        if self.sealed {
            return Err(AddCodeError::InvalidState);
        }
        match &mut self.store {
            Store::Loading { buffer, capacity } => {
                if let Some(capacity) = capacity
                    && buffer.len() + bytes.len() > *capacity
                {
                    return Err(AddCodeError::OutOfCodeMemory);
                }
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            _ => Err(AddCodeError::InvalidState),
        }
    }

    /// Seals streamed code, validating the header against the given check
    /// value.
    pub fn seal(&mut self, expected_check: u32) -> Result<(), AddCodeError> {
        if self.sealed {
            return Err(AddCodeError::InvalidState);
        }
        let Store::Loading { buffer, .. } = &mut self.store else {
            return Err(AddCodeError::InvalidState);
        };
        let image = std::mem::take(buffer);
        let version = validate_header(&image, expected_check)?;
        self.store = Store::Sealed {
            code: image[CODE_HEADER_SIZE..].to_vec(),
        };
        self.version = version;
        self.sealed = true;
        Ok(())
    }

    /// Adopts a complete image and seals it in one call.
    pub fn seal_with(&mut self, image: &[u8], expected_check: u32) -> Result<(), AddCodeError> {
        if self.sealed {
            return Err(AddCodeError::InvalidState);
        }
        let version = validate_header(image, expected_check)?;
        self.store = Store::Sealed {
            code: image[CODE_HEADER_SIZE..].to_vec(),
        };
        self.version = version;
        self.sealed = true;
        Ok(())
    }

    /// Switches to paged mode. Must precede sealing; sealing then happens
    /// through [`CodeArea::seal_paged`].
    pub fn set_paging(&mut self, page_count: usize, page_size: usize, reader: CodeReader<C>) -> Result<(), AddCodeError> {
        if self.sealed || page_count == 0 || page_size < CODE_HEADER_SIZE {
            return Err(AddCodeError::InvalidState);
        }
        let pages = (0..page_count)
            .map(|_| Page {
                offset: None,
                data: vec![0; page_size],
                length: 0,
            })
            .collect();
        self.store = Store::Paged {
            reader,
            page_size,
            pages,
            next_victim: 0,
            read_count: 0,
        };
        Ok(())
    }

    /// Seals paged code: reads and validates the header through the reader.
    pub fn seal_paged(&mut self, context: &mut C, expected_check: u32) -> Result<(), AddCodeError> {
        if self.sealed {
            return Err(AddCodeError::InvalidState);
        }
        let Store::Paged { reader, .. } = &self.store else {
            return Err(AddCodeError::InvalidState);
        };
        let reader = *reader;
        let mut header = [0u8; CODE_HEADER_SIZE];
        let produced = reader(context, 0, &mut header).map_err(|_| AddCodeError::InvalidFormat)?;
        if produced < CODE_HEADER_SIZE {
            return Err(AddCodeError::InvalidFormat);
        }
        let version = validate_header(&header, expected_check)?;
        self.version = version;
        self.sealed = true;
        Ok(())
    }

    /// Size of the executable body, when it is held in memory.
    pub fn code_size(&self) -> Option<usize> {
        match &self.store {
            Store::Sealed { code } => Some(code.len()),
            _ => None,
        }
    }

    /// Number of page reads performed so far, optionally resetting the
    /// counter.
    pub fn page_read_count(&mut self, reset: bool) -> u64 {
        match &mut self.store {
            Store::Paged { read_count, .. } => {
                let count = *read_count;
                if reset {
                    *read_count = 0;
                }
                count
            }
            _ => 0,
        }
    }

    /// Fetches one byte at a program counter address.
    pub fn byte(&mut self, context: &mut C, address: u32) -> RunResult<u8> {
        let mut buffer = [0u8; 1];
        self.read(context, address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Fetches `buffer.len()` bytes starting at a program counter address.
    pub fn read(&mut self, context: &mut C, address: u32, buffer: &mut [u8]) -> RunResult<()> {
        if !self.sealed {
            return Err(RunError::InvalidState);
        }
        match &mut self.store {
            Store::Sealed { code } => {
                let start = address as usize;
                let end = start + buffer.len();
                if end > code.len() {
                    return Err(RunError::BeyondEndOfCode);
                }
                buffer.copy_from_slice(&code[start..end]);
                Ok(())
            }
            Store::Paged {
                reader,
                page_size,
                pages,
                next_victim,
                read_count,
            } => {
                let reader = *reader;
                let page_size = *page_size;
                let mut file_offset = address as usize + CODE_HEADER_SIZE;
                let mut filled = 0usize;
                while filled < buffer.len() {
                    let page_offset = (file_offset / page_size * page_size) as u32;
                    let within = file_offset % page_size;

                    let slot = match pages.iter().position(|page| page.offset == Some(page_offset)) {
                        Some(slot) => slot,
                        None => {
                            // Demand-load into the next victim slot, round robin.
                            let slot = *next_victim;
                            *next_victim = (slot + 1) % pages.len();
                            let page = &mut pages[slot];
                            page.offset = None;
                            let produced = reader(context, page_offset, &mut page.data)?;
                            *read_count += 1;
                            page.length = produced;
                            page.offset = Some(page_offset);
                            slot
                        }
                    };

                    let page = &pages[slot];
                    if within >= page.length {
                        return Err(RunError::BeyondEndOfCode);
                    }
                    let available = page.length - within;
                    let take = available.min(buffer.len() - filled);
                    buffer[filled..filled + take].copy_from_slice(&page.data[within..within + take]);
                    filled += take;
                    file_offset += take;
                }
                Ok(())
            }
            Store::Loading { .. } => Err(RunError::InvalidState),
        }
    }
}

fn validate_header(image: &[u8], expected_check: u32) -> Result<[u8; 4], AddCodeError> {
    if image.len() < CODE_HEADER_SIZE {
        return Err(AddCodeError::InvalidFormat);
    }
    if image[..4] != CODE_MAGIC {
        return Err(AddCodeError::InvalidFormat);
    }
    let version: [u8; 4] = image[4..8].try_into().expect("four bytes");
    // Compatibility requires matching major and minor; patch and tweak may
    // differ.
    if version[0] != ENGINE_VERSION[0] || version[1] != ENGINE_VERSION[1] {
        return Err(AddCodeError::InvalidVersion);
    }
    let check = u32::from_be_bytes(image[8..12].try_into().expect("four bytes"));
    if check != expected_check {
        return Err(AddCodeError::InvalidCheckValue);
    }
    Ok(version)
}

/// Builds an executable header for the given check value.
#[must_use]
pub fn code_header(check_value: u32) -> [u8; CODE_HEADER_SIZE] {
    let mut header = [0u8; CODE_HEADER_SIZE];
    header[..4].copy_from_slice(&CODE_MAGIC);
    header[4..8].copy_from_slice(&ENGINE_VERSION);
    header[8..12].copy_from_slice(&check_value.to_be_bytes());
    header
}
