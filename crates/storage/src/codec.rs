//! Bijective encode/decode of one block pair to/from a contiguous byte run.
//!
//! Record layout (all integers little-endian):
//!   - record header: magic, version, four section byte-sizes
//!   - fixed section: 5 length-prefixed messages (tx header, tx metadata,
//!     tx proof, results header, results proof) + CRC32C
//!   - receipts / state diffs / transactions sections: length-prefixed
//!     messages + CRC32C each
//!   - whole-record CRC32C over everything after the record header
//!
//! Decoding accumulates a reading budget derived from the declared section
//! sizes so truncated or oversized records are rejected before they are
//! fully read. Any mismatch surfaces as a [`CodecError`], never a panic.

use crc32c::crc32c_append;
use lattice_common::error::CodecError;
use lattice_common::types::{BlockPair, ResultsBlock, TransactionsBlock};
use std::io::{ErrorKind, Read, Write};

pub(crate) const BLOCKS_FILE_MAGIC: u32 = 0x5342_524F; // "ORBS"
pub(crate) const BLOCKS_FILE_VERSION: u32 = 0;
pub(crate) const BLOCK_MAGIC: u32 = 0x6B4F_4C42; // "BLOk"
pub(crate) const BLOCK_VERSION: u32 = 0;

const BLOCK_HEADER_SIZE: usize = 24;
const CHECKSUM_SIZE: usize = 4;
const CHUNK_LENGTH_SIZE: usize = 4;

/// Size of the blocks-file header: magic, version, network id, virtual-chain
/// id, CRC32C.
pub(crate) const BLOCKS_FILE_HEADER_SIZE: u64 = 20;

/// Fixed header preceding every block record on disk.
pub(crate) struct BlocksFileHeader {
    pub network_id: u32,
    pub virtual_chain_id: u32,
}

impl BlocksFileHeader {
    pub fn write(&self, w: &mut impl Write) -> Result<(), CodecError> {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&BLOCKS_FILE_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&BLOCKS_FILE_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.network_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.virtual_chain_id.to_le_bytes());
        w.write_all(&buf)?;
        w.write_all(&crc32c::crc32c(&buf).to_le_bytes())?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Self, CodecError> {
        let mut buf = [0u8; 16];
        r.read_exact(&mut buf)?;
        let mut checksum = [0u8; 4];
        r.read_exact(&mut checksum)?;

        let computed = crc32c::crc32c(&buf);
        let recorded = u32::from_le_bytes(checksum);
        if computed != recorded {
            return Err(CodecError::ChecksumMismatch {
                section: "file header",
                computed,
                recorded,
            });
        }

        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != BLOCKS_FILE_MAGIC {
            return Err(CodecError::BadFileMagic { found: magic });
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != BLOCKS_FILE_VERSION {
            return Err(CodecError::BadFileVersion { found: version });
        }

        Ok(BlocksFileHeader {
            network_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            virtual_chain_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

struct BlockRecordHeader {
    fixed_size: u32,
    receipts_size: u32,
    diffs_size: u32,
    txs_size: u32,
}

impl BlockRecordHeader {
    fn total_size(&self) -> usize {
        self.fixed_size as usize
            + self.receipts_size as usize
            + self.diffs_size as usize
            + self.txs_size as usize
    }

    fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&BLOCK_VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.fixed_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.receipts_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.diffs_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.txs_size.to_le_bytes());
        buf
    }

    fn parse(buf: &[u8; BLOCK_HEADER_SIZE]) -> Result<Self, CodecError> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != BLOCK_MAGIC {
            return Err(CodecError::BadBlockMagic { found: magic });
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != BLOCK_VERSION {
            return Err(CodecError::BadBlockVersion { found: version });
        }
        Ok(BlockRecordHeader {
            fixed_size: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            receipts_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            diffs_size: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            txs_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        })
    }
}

/// Byte-count ceiling for a decode in progress. `limit` covers the record
/// header plus all declared section payloads (checksums excluded).
struct ReadingBudget {
    limit: usize,
    bytes_read: usize,
}

/// Encodes and decodes block pairs with a maximum-record-size guard.
#[derive(Debug)]
pub struct BlockCodec {
    max_block_size: usize,
}

impl BlockCodec {
    pub fn new(max_block_size: usize) -> Self {
        BlockCodec { max_block_size }
    }

    /// Serializes `block` into `w`, returning the number of bytes written.
    /// Refuses oversized records before writing a single byte.
    pub fn encode(&self, block: &BlockPair, w: &mut impl Write) -> Result<usize, CodecError> {
        let tb = &block.transactions_block;
        let rb = &block.results_block;

        let fixed = [
            bincode::serialize(&tb.header)?,
            bincode::serialize(&tb.metadata)?,
            bincode::serialize(&tb.block_proof)?,
            bincode::serialize(&rb.header)?,
            bincode::serialize(&rb.block_proof)?,
        ];
        let receipts = serialize_all(&rb.transaction_receipts)?;
        let diffs = serialize_all(&rb.contract_state_diffs)?;
        let txs = serialize_all(&tb.signed_transactions)?;

        let header = BlockRecordHeader {
            fixed_size: section_size(&fixed),
            receipts_size: section_size(&receipts),
            diffs_size: section_size(&diffs),
            txs_size: section_size(&txs),
        };

        let record_size = BLOCK_HEADER_SIZE + header.total_size() + CHECKSUM_SIZE * 5;
        if record_size > self.max_block_size {
            return Err(CodecError::SizeBudgetExceeded {
                size: record_size,
                limit: self.max_block_size,
            });
        }

        // Everything after the record header feeds the whole-record checksum.
        let mut body = Vec::with_capacity(header.total_size() + CHECKSUM_SIZE * 4);
        append_section(&mut body, &fixed);
        append_section(&mut body, &receipts);
        append_section(&mut body, &diffs);
        append_section(&mut body, &txs);

        w.write_all(&header.to_bytes())?;
        w.write_all(&body)?;
        w.write_all(&crc32c::crc32c(&body).to_le_bytes())?;

        Ok(record_size)
    }

    /// Decodes one block record from `r`, returning the block pair and the
    /// number of bytes consumed so the caller can advance a file offset
    /// precisely. A clean end of stream before the record header surfaces as
    /// [`CodecError::UnexpectedEof`].
    pub fn decode(&self, r: &mut impl Read) -> Result<(BlockPair, usize), CodecError> {
        let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
        if let Err(err) = r.read_exact(&mut header_bytes) {
            if err.kind() == ErrorKind::UnexpectedEof {
                return Err(CodecError::UnexpectedEof);
            }
            return Err(err.into());
        }
        let header = BlockRecordHeader::parse(&header_bytes)?;

        let mut budget = ReadingBudget {
            limit: BLOCK_HEADER_SIZE + header.total_size(),
            bytes_read: BLOCK_HEADER_SIZE,
        };
        if budget.limit > self.max_block_size {
            return Err(CodecError::SizeBudgetExceeded {
                size: budget.limit,
                limit: self.max_block_size,
            });
        }

        let mut full_crc = 0u32;
        let fixed = read_fixed_section(r, &mut budget, &mut full_crc, header.fixed_size)?;
        let receipts = read_dynamic_section(
            r,
            &mut budget,
            &mut full_crc,
            header.receipts_size,
            "receipts section",
        )?;
        let diffs = read_dynamic_section(
            r,
            &mut budget,
            &mut full_crc,
            header.diffs_size,
            "state diffs section",
        )?;
        let txs = read_dynamic_section(
            r,
            &mut budget,
            &mut full_crc,
            header.txs_size,
            "transactions section",
        )?;

        if budget.bytes_read != budget.limit {
            return Err(CodecError::SizeMismatch {
                declared: budget.limit,
                read: budget.bytes_read,
            });
        }

        let mut recorded = [0u8; 4];
        r.read_exact(&mut recorded)?;
        let recorded = u32::from_le_bytes(recorded);
        if recorded != full_crc {
            return Err(CodecError::ChecksumMismatch {
                section: "block record",
                computed: full_crc,
                recorded,
            });
        }

        let block = BlockPair {
            transactions_block: TransactionsBlock {
                header: bincode::deserialize(&fixed[0])?,
                metadata: bincode::deserialize(&fixed[1])?,
                signed_transactions: deserialize_all(&txs)?,
                block_proof: bincode::deserialize(&fixed[2])?,
            },
            results_block: ResultsBlock {
                header: bincode::deserialize(&fixed[3])?,
                transaction_receipts: deserialize_all(&receipts)?,
                contract_state_diffs: deserialize_all(&diffs)?,
                block_proof: bincode::deserialize(&fixed[4])?,
            },
        };

        Ok((block, budget.limit + CHECKSUM_SIZE * 5))
    }
}

fn serialize_all<T: serde::Serialize>(items: &[T]) -> Result<Vec<Vec<u8>>, CodecError> {
    items
        .iter()
        .map(|item| bincode::serialize(item).map_err(CodecError::from))
        .collect()
}

fn deserialize_all<T: serde::de::DeserializeOwned>(chunks: &[Vec<u8>]) -> Result<Vec<T>, CodecError> {
    chunks
        .iter()
        .map(|chunk| bincode::deserialize(chunk).map_err(CodecError::from))
        .collect()
}

/// Byte size of a section: every message is preceded by a u32 length.
fn section_size(chunks: &[Vec<u8>]) -> u32 {
    chunks
        .iter()
        .map(|c| (CHUNK_LENGTH_SIZE + c.len()) as u32)
        .sum()
}

fn append_section(body: &mut Vec<u8>, chunks: &[Vec<u8>]) {
    let start = body.len();
    for chunk in chunks {
        body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        body.extend_from_slice(chunk);
    }
    let crc = crc32c::crc32c(&body[start..]);
    body.extend_from_slice(&crc.to_le_bytes());
}

fn read_chunk(
    r: &mut impl Read,
    budget: &mut ReadingBudget,
    section_crc: &mut u32,
    full_crc: &mut u32,
) -> Result<Vec<u8>, CodecError> {
    let mut len_bytes = [0u8; CHUNK_LENGTH_SIZE];
    r.read_exact(&mut len_bytes)?;
    *section_crc = crc32c_append(*section_crc, &len_bytes);
    *full_crc = crc32c_append(*full_crc, &len_bytes);
    budget.bytes_read += CHUNK_LENGTH_SIZE;

    let len = u32::from_le_bytes(len_bytes) as usize;
    if budget.limit < budget.bytes_read + len {
        return Err(CodecError::SizeBudgetExceeded {
            size: budget.bytes_read + len,
            limit: budget.limit,
        });
    }

    let mut chunk = vec![0u8; len];
    r.read_exact(&mut chunk)?;
    *section_crc = crc32c_append(*section_crc, &chunk);
    *full_crc = crc32c_append(*full_crc, &chunk);
    budget.bytes_read += len;
    Ok(chunk)
}

fn read_section_checksum(
    r: &mut impl Read,
    full_crc: &mut u32,
    section_crc: u32,
    section: &'static str,
) -> Result<(), CodecError> {
    let mut recorded = [0u8; CHECKSUM_SIZE];
    r.read_exact(&mut recorded)?;
    *full_crc = crc32c_append(*full_crc, &recorded);
    let recorded = u32::from_le_bytes(recorded);
    if recorded != section_crc {
        return Err(CodecError::ChecksumMismatch {
            section,
            computed: section_crc,
            recorded,
        });
    }
    Ok(())
}

/// The fixed section always holds exactly five messages.
fn read_fixed_section(
    r: &mut impl Read,
    budget: &mut ReadingBudget,
    full_crc: &mut u32,
    declared_size: u32,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let before = budget.bytes_read;
    let mut section_crc = 0u32;
    let mut chunks = Vec::with_capacity(5);
    for _ in 0..5 {
        chunks.push(read_chunk(r, budget, &mut section_crc, full_crc)?);
    }
    if budget.bytes_read - before != declared_size as usize {
        return Err(CodecError::SizeMismatch {
            declared: declared_size as usize,
            read: budget.bytes_read - before,
        });
    }
    read_section_checksum(r, full_crc, section_crc, "fixed section")?;
    Ok(chunks)
}

/// Dynamic sections are consumed until exactly the declared byte size has
/// been read; a misaligned length prefix shows up as a size mismatch.
fn read_dynamic_section(
    r: &mut impl Read,
    budget: &mut ReadingBudget,
    full_crc: &mut u32,
    declared_size: u32,
    section: &'static str,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let declared = declared_size as usize;
    let mut section_crc = 0u32;
    let mut chunks = Vec::new();
    let mut consumed = 0usize;
    while consumed < declared {
        let chunk = read_chunk(r, budget, &mut section_crc, full_crc)?;
        consumed += CHUNK_LENGTH_SIZE + chunk.len();
        chunks.push(chunk);
    }
    if consumed != declared {
        return Err(CodecError::SizeMismatch {
            declared,
            read: consumed,
        });
    }
    read_section_checksum(r, full_crc, section_crc, section)?;
    Ok(chunks)
}
