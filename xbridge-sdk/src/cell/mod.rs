//! Ordinary TVM cells.
//!
//! A cell holds up to 1023 data bits and up to four references to other
//! cells. Its representation hash and depth are computed once, when the cell
//! is built, so size/depth checks during batching are cheap.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{BridgeError, BridgeResult};

pub mod boc;

/// Maximum number of data bits in one cell.
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum number of references in one cell.
pub const MAX_CELL_REFS: usize = 4;

/// Bytes that fit in one snake-format continuation cell.
const SNAKE_CHUNK_BYTES: usize = MAX_CELL_BITS / 8;

// ═══════════════════════════════════════════════════════════════════════════════
// CELL
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable ordinary cell.
#[derive(Clone)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: [u8; 32],
    depth: u16,
}

impl Cell {
    /// Build a cell from raw parts, validating limits.
    pub fn new(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> BridgeResult<Self> {
        if bit_len > MAX_CELL_BITS {
            return Err(BridgeError::CellOverflow(format!(
                "{} bits > {}",
                bit_len, MAX_CELL_BITS
            )));
        }
        if refs.len() > MAX_CELL_REFS {
            return Err(BridgeError::CellOverflow(format!(
                "{} refs > {}",
                refs.len(),
                MAX_CELL_REFS
            )));
        }
        let byte_len = (bit_len + 7) / 8;
        if data.len() < byte_len {
            return Err(BridgeError::CellUnderflow(format!(
                "{} bytes cannot hold {} bits",
                data.len(),
                bit_len
            )));
        }
        data.truncate(byte_len);
        if bit_len % 8 != 0 {
            // Clear anything past the last meaningful bit.
            let keep = 0xffu8 << (8 - bit_len % 8);
            data[byte_len - 1] &= keep;
        }

        let depth = refs.iter().map(|r| r.depth + 1).max().unwrap_or(0);

        let mut cell = Self {
            data,
            bit_len,
            refs,
            hash: [0u8; 32],
            depth,
        };
        cell.hash = cell.compute_hash();
        Ok(cell)
    }

    /// The empty cell.
    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, Vec::new()).expect("empty cell is always valid")
    }

    /// Number of data bits.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Raw data bytes (last byte zero-padded).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Child cells.
    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    /// Representation hash.
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Hex-encoded representation hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Depth of the tree rooted at this cell (0 for a leaf).
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Whether the cell has no bits and no refs.
    pub fn is_empty(&self) -> bool {
        self.bit_len == 0 && self.refs.is_empty()
    }

    /// Start reading this cell.
    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// Serialize the tree rooted here as a bag of cells.
    pub fn to_boc(&self) -> BridgeResult<Vec<u8>> {
        boc::serialize(self)
    }

    /// Parse a single-root bag of cells.
    pub fn from_boc(bytes: &[u8]) -> BridgeResult<Arc<Cell>> {
        boc::deserialize(bytes)
    }

    /// Descriptor bytes `d1`, `d2` for an ordinary level-0 cell.
    pub(crate) fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = ((self.bit_len / 8) + (self.bit_len + 7) / 8) as u8;
        [d1, d2]
    }

    /// Data bytes with the completion tag appended for partial bytes.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        if self.bit_len % 8 != 0 {
            let idx = self.bit_len / 8;
            out[idx] |= 0x80 >> (self.bit_len % 8);
        }
        out
    }

    fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth.to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash);
        }
        hasher.finalize().into()
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Cell {}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("refs", &self.refs.len())
            .field("hash", &self.hash_hex())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Incremental cell writer.
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data bits still available.
    pub fn bits_left(&self) -> usize {
        MAX_CELL_BITS - self.bit_len
    }

    /// References still available.
    pub fn refs_left(&self) -> usize {
        MAX_CELL_REFS - self.refs.len()
    }

    pub fn store_bit(&mut self, bit: bool) -> BridgeResult<&mut Self> {
        if self.bit_len >= MAX_CELL_BITS {
            return Err(BridgeError::CellOverflow("no bits left".into()));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.data[idx] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Store an unsigned integer of up to 128 bits, big-endian.
    pub fn store_u128(&mut self, value: u128, bits: usize) -> BridgeResult<&mut Self> {
        if bits > 128 {
            return Err(BridgeError::CellOverflow(format!("uint{} unsupported", bits)));
        }
        if bits < 128 && value >> bits != 0 {
            return Err(BridgeError::CellOverflow(format!(
                "{} does not fit in {} bits",
                value, bits
            )));
        }
        if bits > self.bits_left() {
            return Err(BridgeError::CellOverflow(format!(
                "{} bits requested, {} left",
                bits,
                self.bits_left()
            )));
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Store an unsigned integer of up to 64 bits.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> BridgeResult<&mut Self> {
        self.store_u128(value as u128, bits)
    }

    /// Store a two's-complement signed integer of up to 64 bits.
    pub fn store_int(&mut self, value: i64, bits: usize) -> BridgeResult<&mut Self> {
        if bits == 0 || bits > 64 {
            return Err(BridgeError::CellOverflow(format!("int{} unsupported", bits)));
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        if (value as i128) < min || (value as i128) > max {
            return Err(BridgeError::CellOverflow(format!(
                "{} does not fit in int{}",
                value, bits
            )));
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    /// Store whole bytes.
    pub fn store_bytes(&mut self, bytes: &[u8]) -> BridgeResult<&mut Self> {
        if bytes.len() * 8 > self.bits_left() {
            return Err(BridgeError::CellOverflow(format!(
                "{} bytes requested, {} bits left",
                bytes.len(),
                self.bits_left()
            )));
        }
        for byte in bytes {
            self.store_uint(*byte as u64, 8)?;
        }
        Ok(self)
    }

    /// Store a `VarUInteger 16` amount.
    pub fn store_coins(&mut self, amount: u128) -> BridgeResult<&mut Self> {
        if amount == 0 {
            return self.store_uint(0, 4);
        }
        let byte_len = ((128 - amount.leading_zeros() as usize) + 7) / 8;
        if byte_len > 15 {
            return Err(BridgeError::CellOverflow(format!(
                "coin amount {} too large",
                amount
            )));
        }
        self.store_uint(byte_len as u64, 4)?;
        self.store_u128(amount, byte_len * 8)
    }

    /// Store `addr_std` or `addr_none` when `None`.
    pub fn store_address(&mut self, address: Option<&Address>) -> BridgeResult<&mut Self> {
        match address {
            None => self.store_uint(0, 2),
            Some(addr) => {
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?;
                self.store_int(addr.workchain() as i64, 8)?;
                self.store_bytes(addr.hash_part())
            }
        }
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> BridgeResult<&mut Self> {
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(BridgeError::CellOverflow("no refs left".into()));
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// Store a `Maybe ^Cell`.
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> BridgeResult<&mut Self> {
        match cell {
            Some(c) => {
                self.store_bit(true)?;
                self.store_ref(c)
            }
            None => self.store_bit(false),
        }
    }

    /// Append all bits and refs of another cell.
    pub fn store_cell_contents(&mut self, cell: &Cell) -> BridgeResult<&mut Self> {
        if cell.bit_len() > self.bits_left() || cell.refs().len() > self.refs_left() {
            return Err(BridgeError::CellOverflow(
                "cell contents do not fit builder".into(),
            ));
        }
        let mut slice = cell.parse();
        while slice.remaining_bits() > 0 {
            let bit = slice.load_bit()?;
            self.store_bit(bit)?;
        }
        for r in cell.refs() {
            self.store_ref(r.clone())?;
        }
        Ok(self)
    }

    /// Store a string in snake format: as many bytes as fit here, the rest in
    /// a chain of continuation cells.
    pub fn store_string_tail(&mut self, value: &str) -> BridgeResult<&mut Self> {
        let bytes = value.as_bytes();
        let head_len = bytes.len().min(self.bits_left() / 8);
        let (head, rest) = bytes.split_at(head_len);
        self.store_bytes(head)?;
        if rest.is_empty() {
            return Ok(self);
        }

        let mut tail: Option<Arc<Cell>> = None;
        for chunk in rest.chunks(SNAKE_CHUNK_BYTES).rev() {
            let mut b = CellBuilder::new();
            b.store_bytes(chunk)?;
            if let Some(next) = tail.take() {
                b.store_ref(next)?;
            }
            tail = Some(Arc::new(b.build()?));
        }
        match tail {
            Some(t) => self.store_ref(t),
            None => Ok(self),
        }
    }

    pub fn build(self) -> BridgeResult<Cell> {
        Cell::new(self.data, self.bit_len, self.refs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SLICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Read cursor over a cell.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    pub fn load_bit(&mut self) -> BridgeResult<bool> {
        if self.bit_pos >= self.cell.bit_len {
            return Err(BridgeError::CellUnderflow("no bits left".into()));
        }
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1 == 1;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_u128(&mut self, bits: usize) -> BridgeResult<u128> {
        if bits > 128 {
            return Err(BridgeError::CellUnderflow(format!("uint{} unsupported", bits)));
        }
        if bits > self.remaining_bits() {
            return Err(BridgeError::CellUnderflow(format!(
                "{} bits requested, {} left",
                bits,
                self.remaining_bits()
            )));
        }
        let mut value = 0u128;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u128;
        }
        Ok(value)
    }

    pub fn load_uint(&mut self, bits: usize) -> BridgeResult<u64> {
        if bits > 64 {
            return Err(BridgeError::CellUnderflow(format!("uint{} unsupported", bits)));
        }
        Ok(self.load_u128(bits)? as u64)
    }

    pub fn load_int(&mut self, bits: usize) -> BridgeResult<i64> {
        if bits == 0 || bits > 64 {
            return Err(BridgeError::CellUnderflow(format!("int{} unsupported", bits)));
        }
        let raw = self.load_uint(bits)?;
        if bits == 64 {
            return Ok(raw as i64);
        }
        let sign = 1u64 << (bits - 1);
        Ok(if raw & sign != 0 {
            (raw as i64) - (1i64 << bits)
        } else {
            raw as i64
        })
    }

    pub fn load_bytes(&mut self, len: usize) -> BridgeResult<Vec<u8>> {
        (0..len).map(|_| Ok(self.load_uint(8)? as u8)).collect()
    }

    pub fn load_coins(&mut self) -> BridgeResult<u128> {
        let len = self.load_uint(4)? as usize;
        self.load_u128(len * 8)
    }

    /// Load `addr_none` (as `None`) or `addr_std`.
    pub fn load_address(&mut self) -> BridgeResult<Option<Address>> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(BridgeError::InvalidAddress("anycast is not supported".into()));
                }
                let workchain = self.load_int(8)? as i8;
                let bytes = self.load_bytes(32)?;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Address::new(workchain, hash)))
            }
            tag => Err(BridgeError::InvalidAddress(format!(
                "unsupported address tag {:#04b}",
                tag
            ))),
        }
    }

    pub fn load_ref(&mut self) -> BridgeResult<&'a Arc<Cell>> {
        let cell: &'a Cell = self.cell;
        let r = cell
            .refs
            .get(self.ref_pos)
            .ok_or_else(|| BridgeError::CellUnderflow("no refs left".into()))?;
        self.ref_pos += 1;
        Ok(r)
    }

    pub fn load_maybe_ref(&mut self) -> BridgeResult<Option<&'a Arc<Cell>>> {
        if self.load_bit()? {
            Ok(Some(self.load_ref()?))
        } else {
            Ok(None)
        }
    }

    /// Read a snake-format string starting at the cursor.
    pub fn load_string_tail(&mut self) -> BridgeResult<String> {
        let mut bytes = self.load_bytes(self.remaining_bits() / 8)?;
        let mut next = if self.remaining_refs() > 0 {
            Some(self.load_ref()?.clone())
        } else {
            None
        };
        while let Some(cell) = next {
            let mut s = cell.parse();
            bytes.extend(s.load_bytes(s.remaining_bits() / 8)?);
            next = if s.remaining_refs() > 0 {
                Some(s.load_ref()?.clone())
            } else {
                None
            };
        }
        String::from_utf8(bytes).map_err(|e| BridgeError::Encoding(e.to_string()))
    }
}
