//! Bag-of-cells serialization.
//!
//! Writes the compact form (no offset index, no CRC32C). Reading accepts the
//! index and CRC flags but does not verify the checksum.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::Cell;
use crate::error::{BridgeError, BridgeResult};

/// Generic BOC magic prefix.
pub const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

/// Serialize a single-root tree of cells.
pub fn serialize(root: &Cell) -> BridgeResult<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    post_order(root, &mut seen, &mut order);
    order.reverse();

    let index: HashMap<[u8; 32], usize> = order
        .iter()
        .enumerate()
        .map(|(i, c)| (c.hash(), i))
        .collect();

    let size_bytes = bytes_needed(order.len() as u64);
    let mut cells_blob = Vec::new();
    for cell in &order {
        cells_blob.extend_from_slice(&cell.descriptors());
        cells_blob.extend_from_slice(&cell.padded_data());
        for r in cell.refs() {
            let idx = index
                .get(&r.hash())
                .copied()
                .ok_or_else(|| BridgeError::InvalidBoc("dangling reference".into()))?;
            write_uint(&mut cells_blob, idx as u64, size_bytes);
        }
    }
    let off_bytes = bytes_needed(cells_blob.len() as u64);

    let mut out = Vec::with_capacity(cells_blob.len() + 16);
    out.extend_from_slice(&BOC_MAGIC);
    out.push(size_bytes as u8);
    out.push(off_bytes as u8);
    write_uint(&mut out, order.len() as u64, size_bytes);
    write_uint(&mut out, 1, size_bytes); // roots
    write_uint(&mut out, 0, size_bytes); // absent
    write_uint(&mut out, cells_blob.len() as u64, off_bytes);
    write_uint(&mut out, 0, size_bytes); // root index
    out.extend_from_slice(&cells_blob);
    Ok(out)
}

/// Serialize and base64-encode (standard alphabet, padded).
pub fn serialize_base64(root: &Cell) -> BridgeResult<String> {
    Ok(STANDARD.encode(serialize(root)?))
}

/// Parse the first root of a BOC.
pub fn deserialize(bytes: &[u8]) -> BridgeResult<Arc<Cell>> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(4)? != BOC_MAGIC {
        return Err(BridgeError::InvalidBoc("bad magic".into()));
    }
    let flags = r.byte()?;
    let has_idx = flags & 0x80 != 0;
    let size_bytes = (flags & 0x07) as usize;
    if size_bytes == 0 || size_bytes > 4 {
        return Err(BridgeError::InvalidBoc(format!("ref size {}", size_bytes)));
    }
    let off_bytes = r.byte()? as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(BridgeError::InvalidBoc(format!("offset size {}", off_bytes)));
    }
    let cell_count = r.uint(size_bytes)? as usize;
    let root_count = r.uint(size_bytes)? as usize;
    let _absent = r.uint(size_bytes)?;
    let _total_size = r.uint(off_bytes)?;
    if root_count == 0 {
        return Err(BridgeError::InvalidBoc("no roots".into()));
    }
    let mut roots = Vec::with_capacity(root_count);
    for _ in 0..root_count {
        roots.push(r.uint(size_bytes)? as usize);
    }
    if has_idx {
        r.take(cell_count * off_bytes)?;
    }

    let mut raw = Vec::with_capacity(cell_count);
    for i in 0..cell_count {
        let d1 = r.byte()?;
        let d2 = r.byte()?;
        if d1 & 0x08 != 0 {
            return Err(BridgeError::InvalidBoc(format!("cell {} is exotic", i)));
        }
        let ref_count = (d1 & 0x07) as usize;
        let data_len = (d2 as usize + 1) / 2;
        let mut data = r.take(data_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = data.last().copied().unwrap_or(0);
            if last == 0 {
                return Err(BridgeError::InvalidBoc(format!("cell {} missing tag bit", i)));
            }
            let bits = data_len * 8 - (last.trailing_zeros() as usize + 1);
            if let Some(b) = data.last_mut() {
                *b &= !(1u8 << last.trailing_zeros());
            }
            bits
        };
        let mut refs = Vec::with_capacity(ref_count);
        for _ in 0..ref_count {
            let idx = r.uint(size_bytes)? as usize;
            if idx <= i || idx >= cell_count {
                return Err(BridgeError::InvalidBoc(format!(
                    "cell {} has bad ref {}",
                    i, idx
                )));
            }
            refs.push(idx);
        }
        raw.push((data, bit_len, refs));
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for (i, (data, bit_len, refs)) in raw.into_iter().enumerate().rev() {
        let children = refs
            .iter()
            .map(|&idx| {
                built[idx]
                    .clone()
                    .ok_or_else(|| BridgeError::InvalidBoc("unbuilt child".into()))
            })
            .collect::<BridgeResult<Vec<_>>>()?;
        built[i] = Some(Arc::new(Cell::new(data, bit_len, children)?));
    }

    built
        .get(roots[0])
        .cloned()
        .flatten()
        .ok_or_else(|| BridgeError::InvalidBoc("root index out of range".into()))
}

/// Parse a base64 (standard alphabet) BOC.
pub fn deserialize_base64(encoded: &str) -> BridgeResult<Arc<Cell>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| BridgeError::InvalidBoc(e.to_string()))?;
    deserialize(&bytes)
}

fn post_order<'a>(cell: &'a Cell, seen: &mut HashSet<[u8; 32]>, out: &mut Vec<&'a Cell>) {
    if !seen.insert(cell.hash()) {
        return;
    }
    for r in cell.refs() {
        post_order(r, seen, out);
    }
    out.push(cell);
}

fn bytes_needed(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    ((bits + 7) / 8).max(1)
}

fn write_uint(out: &mut Vec<u8>, value: u64, len: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - len..]);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> BridgeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| BridgeError::InvalidBoc("unexpected end of data".into()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> BridgeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, len: usize) -> BridgeResult<u64> {
        Ok(self
            .take(len)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}
