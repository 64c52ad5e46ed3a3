//! Single-file block archives.
//!
//! Layout (CARv1 framing with a dag-json header):
//! - `varint(header len) || header` where header is `{"roots":[cid...],"version":1}`
//! - then for each block: `varint(len(cid) + len(data)) || cid || data`
//!
//! Reading an archive checks framing only. Digests are checked with
//! [`crate::block::verify_block`] before a block is used.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::cid::{read_varint, write_varint, Cid};
use crate::types::{ExchangeError, Result};

/// Archive format version.
pub const ARCHIVE_VERSION: u64 = 1;

#[derive(Serialize, Deserialize)]
struct ArchiveHeader {
    roots: Vec<Cid>,
    version: u64,
}

/// Blocks and declared roots read out of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    roots: Vec<Cid>,
    blocks: Vec<Block>,
}

impl Archive {
    /// Declared roots, in header order.
    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// All blocks, in insertion order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Look up a block by CID. `None` is the normal "not found" answer.
    pub fn get(&self, cid: &Cid) -> Option<&Block> {
        self.blocks.iter().find(|block| &block.cid == cid)
    }
}

/// Bundle blocks under the given roots.
///
/// Every root must be one of `blocks`. Block order is preserved.
pub fn build_archive(blocks: &[Block], roots: &[Cid]) -> Result<Vec<u8>> {
    for root in roots {
        if !blocks.iter().any(|block| &block.cid == root) {
            return Err(ExchangeError::MissingRoot(root.to_string()));
        }
    }

    let header = serde_json::to_vec(&ArchiveHeader {
        roots: roots.to_vec(),
        version: ARCHIVE_VERSION,
    })?;

    let mut data = Vec::new();
    write_varint(&mut data, header.len() as u64);
    data.extend_from_slice(&header);

    for block in blocks {
        let cid = block.cid.to_bytes();
        write_varint(&mut data, (cid.len() + block.bytes.len()) as u64);
        data.extend_from_slice(&cid);
        data.extend_from_slice(&block.bytes);
    }

    Ok(data)
}

/// Parse archive bytes.
pub fn read_archive(data: &[u8]) -> Result<Archive> {
    let mut offset = 0;

    let header_len = read_section_len(data, &mut offset)?;
    let header: ArchiveHeader = serde_json::from_slice(&data[offset..offset + header_len])
        .map_err(|e| ExchangeError::InvalidArchive(format!("Bad header: {}", e)))?;
    offset += header_len;

    if header.version != ARCHIVE_VERSION {
        return Err(ExchangeError::InvalidArchive(format!(
            "Unsupported archive version: {}",
            header.version
        )));
    }

    let mut blocks = Vec::new();
    while offset < data.len() {
        let section_len = read_section_len(data, &mut offset)?;
        let section = &data[offset..offset + section_len];

        let (cid, cid_len) = Cid::read_bytes(section)
            .map_err(|e| ExchangeError::InvalidArchive(format!("Bad block CID: {}", e)))?;
        blocks.push(Block::from_parts(cid, section[cid_len..].to_vec()));

        offset += section_len;
    }

    for root in &header.roots {
        if !blocks.iter().any(|block| &block.cid == root) {
            return Err(ExchangeError::MissingRoot(root.to_string()));
        }
    }

    Ok(Archive {
        roots: header.roots,
        blocks,
    })
}

/// Read a length prefix and check the section it announces fits in `data`.
fn read_section_len(data: &[u8], offset: &mut usize) -> Result<usize> {
    let len = read_varint(data, offset)
        .ok_or_else(|| ExchangeError::InvalidArchive("Malformed length prefix".to_string()))?;
    let len = usize::try_from(len)
        .map_err(|_| ExchangeError::InvalidArchive("Section length overflow".to_string()))?;

    if data.len() - *offset < len {
        return Err(ExchangeError::InvalidArchive(format!(
            "Section truncated: need {} bytes, have {}",
            len,
            data.len() - *offset
        )));
    }
    Ok(len)
}
