//! Bag-of-cells container: decoding into an index-based cell arena, a bit
//! reader over single cells, and a builder/serializer used for fixtures and
//! tooling.
//!
//! Every reference in a decoded arena points to a strictly later cell, so the
//! graph is acyclic and walking it always terminates.

use crate::error::DecodeError;
use crc_fast::CrcAlgorithm;
use std::collections::VecDeque;

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;

const MAGIC_GENERIC: u32 = 0xb5ee_9c72;
const MAGIC_INDEXED: u32 = 0x68ff_65f3;
const MAGIC_INDEXED_CRC: u32 = 0xacc3_a728;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
    exotic: bool,
}

impl Cell {
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[usize] {
        &self.refs
    }

    pub fn is_exotic(&self) -> bool {
        self.exotic
    }
}

/// Decoded bag of cells. Cells are addressed by their position in the
/// serialized cell list.
#[derive(Debug, Clone)]
pub struct BagOfCells {
    cells: Vec<Cell>,
    roots: Vec<usize>,
}

impl BagOfCells {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        let magic = r.read_uint(4)? as u32;

        let (has_idx, has_crc, size) = match magic {
            MAGIC_GENERIC => {
                let flags = r.read_u8()?;
                if flags & 0x18 != 0 {
                    return Err(DecodeError::Header(format!(
                        "reserved flag bits set: 0x{flags:02x}"
                    )));
                }
                (flags & 0x80 != 0, flags & 0x40 != 0, (flags & 0x07) as usize)
            }
            MAGIC_INDEXED => (true, false, r.read_u8()? as usize),
            MAGIC_INDEXED_CRC => (true, true, r.read_u8()? as usize),
            other => return Err(DecodeError::BadMagic(other)),
        };
        if !(1..=4).contains(&size) {
            return Err(DecodeError::Header(format!(
                "reference size {size} out of range"
            )));
        }
        let off_bytes = r.read_u8()? as usize;
        if !(1..=8).contains(&off_bytes) {
            return Err(DecodeError::Header(format!(
                "offset size {off_bytes} out of range"
            )));
        }

        let cell_count = r.read_uint(size)? as usize;
        let root_count = r.read_uint(size)? as usize;
        let absent = r.read_uint(size)? as usize;
        let total_size = r.read_uint(off_bytes)? as usize;

        if root_count == 0 || root_count > cell_count {
            return Err(DecodeError::Header(format!(
                "{root_count} roots for {cell_count} cells"
            )));
        }
        if absent != 0 {
            return Err(DecodeError::Header(
                "absent cells are not supported".into(),
            ));
        }
        // every cell needs at least its two descriptor bytes
        if cell_count.saturating_mul(2) > total_size
            || total_size > r.remaining()
        {
            return Err(DecodeError::Header(format!(
                "{cell_count} cells cannot fit in {total_size} bytes"
            )));
        }

        let roots = if magic == MAGIC_GENERIC {
            let mut roots = Vec::with_capacity(root_count);
            for _ in 0..root_count {
                let root = r.read_uint(size)? as usize;
                if root >= cell_count {
                    return Err(DecodeError::Header(format!(
                        "root index {root} out of range"
                    )));
                }
                roots.push(root);
            }
            roots
        } else {
            if root_count != 1 {
                return Err(DecodeError::Header(
                    "indexed format carries exactly one root".into(),
                ));
            }
            vec![0]
        };

        if has_idx {
            r.skip(cell_count.saturating_mul(off_bytes))?;
        }

        let data_start = r.pos;
        let mut cells = Vec::with_capacity(cell_count);
        for index in 0..cell_count {
            cells.push(read_cell(&mut r, index, cell_count, size)?);
        }
        if r.pos - data_start != total_size {
            return Err(DecodeError::Header(format!(
                "cell data is {} bytes, header says {total_size}",
                r.pos - data_start
            )));
        }

        if has_crc {
            let covered = r.pos;
            let expected = u32::from_le_bytes(
                r.take(4)?.try_into().map_err(|_| {
                    DecodeError::UnexpectedEof(covered)
                })?,
            );
            let actual = crc32c(&bytes[..covered]);
            if expected != actual {
                return Err(DecodeError::Checksum { expected, actual });
            }
        }
        if r.remaining() != 0 {
            return Err(DecodeError::Header(format!(
                "{} trailing bytes",
                r.remaining()
            )));
        }

        Ok(Self { cells, roots })
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn root(&self) -> usize {
        self.roots[0]
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Reader positioned at the start of cell `index`.
    pub fn slice(&self, index: usize) -> Result<CellSlice<'_>, DecodeError> {
        if index >= self.cells.len() {
            return Err(DecodeError::BadReference {
                cell: index,
                target: index,
            });
        }
        Ok(CellSlice {
            boc: self,
            cell: index,
            bit_pos: 0,
            ref_pos: 0,
        })
    }
}

fn read_cell(
    r: &mut ByteReader<'_>,
    index: usize,
    cell_count: usize,
    size: usize,
) -> Result<Cell, DecodeError> {
    let d1 = r.read_u8()?;
    let d2 = r.read_u8()?;
    let ref_count = (d1 & 0x07) as usize;
    let exotic = d1 & 0x08 != 0;
    let with_hashes = d1 & 0x10 != 0;
    let level_mask = d1 >> 5;

    if ref_count > MAX_CELL_REFS {
        return Err(DecodeError::Cell {
            index,
            reason: format!("{ref_count} references"),
        });
    }
    if with_hashes {
        let hash_count = level_mask.count_ones() as usize + 1;
        r.skip(hash_count * (32 + 2))?;
    }

    let data_len = (d2 as usize).div_ceil(2);
    let data = r.take(data_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        data_len * 8
    } else {
        // last byte carries a completion tag: a one bit followed by zeros
        let last = data[data_len - 1];
        if last == 0 {
            return Err(DecodeError::Cell {
                index,
                reason: "missing completion tag".into(),
            });
        }
        data_len * 8 - (last.trailing_zeros() as usize + 1)
    };
    if bit_len > MAX_CELL_BITS {
        return Err(DecodeError::Cell {
            index,
            reason: format!("{bit_len} bits"),
        });
    }

    let mut refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        let target = r.read_uint(size)? as usize;
        if target <= index || target >= cell_count {
            return Err(DecodeError::BadReference {
                cell: index,
                target,
            });
        }
        refs.push(target);
    }

    Ok(Cell {
        data,
        bit_len,
        refs,
        exotic,
    })
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_uint(&mut self, n: usize) -> Result<u64, DecodeError> {
        Ok(self
            .take(n)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

/// Sequential reader over the bits and references of one cell.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    boc: &'a BagOfCells,
    cell: usize,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    fn inner(&self) -> &'a Cell {
        &self.boc.cells[self.cell]
    }

    pub fn cell_index(&self) -> usize {
        self.cell
    }

    pub fn remaining_bits(&self) -> usize {
        self.inner().bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.inner().refs.len() - self.ref_pos
    }

    fn ensure_bits(&self, n: usize) -> Result<(), DecodeError> {
        let left = self.remaining_bits();
        if n > left {
            return Err(DecodeError::BitUnderflow { wanted: n, left });
        }
        Ok(())
    }

    fn bit_at(&self, pos: usize) -> bool {
        (self.inner().data[pos / 8] >> (7 - pos % 8)) & 1 == 1
    }

    pub fn load_bit(&mut self) -> Result<bool, DecodeError> {
        self.ensure_bits(1)?;
        let bit = self.bit_at(self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Unsigned big-endian integer of `n <= 64` bits.
    pub fn load_uint(&mut self, n: usize) -> Result<u64, DecodeError> {
        debug_assert!(n <= 64);
        self.ensure_bits(n)?;
        let mut value = 0u64;
        for i in 0..n {
            value = (value << 1) | self.bit_at(self.bit_pos + i) as u64;
        }
        self.bit_pos += n;
        Ok(value)
    }

    /// Two's-complement signed integer of `1 <= n <= 64` bits.
    pub fn load_int(&mut self, n: usize) -> Result<i64, DecodeError> {
        debug_assert!((1..=64).contains(&n));
        let raw = self.load_uint(n)?;
        if n == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - n;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn load_bytes<const N: usize>(
        &mut self,
    ) -> Result<[u8; N], DecodeError> {
        self.ensure_bits(N * 8)?;
        let mut out = [0u8; N];
        for byte in out.iter_mut() {
            *byte = self.load_uint(8)? as u8;
        }
        Ok(out)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), DecodeError> {
        self.ensure_bits(n)?;
        self.bit_pos += n;
        Ok(())
    }

    /// Reads `n` bits without consuming them.
    pub fn peek_uint(&self, n: usize) -> Result<u64, DecodeError> {
        self.clone().load_uint(n)
    }

    pub fn load_ref(&mut self) -> Result<CellSlice<'a>, DecodeError> {
        let target = *self
            .inner()
            .refs
            .get(self.ref_pos)
            .ok_or(DecodeError::RefUnderflow)?;
        self.ref_pos += 1;
        self.boc.slice(target)
    }
}

/// Owned cell tree produced by [`CellBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<BuiltCell>,
}

#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<BuiltCell>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_bit(mut self, bit: bool) -> Self {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
        self
    }

    pub fn store_uint(mut self, value: u64, n: usize) -> Self {
        for i in (0..n).rev() {
            self = self.store_bit((value >> i) & 1 == 1);
        }
        self
    }

    pub fn store_int(self, value: i64, n: usize) -> Self {
        let mask = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };
        self.store_uint(value as u64 & mask, n)
    }

    pub fn store_bytes(mut self, bytes: &[u8]) -> Self {
        for b in bytes {
            self = self.store_uint(*b as u64, 8);
        }
        self
    }

    pub fn store_ref(mut self, cell: BuiltCell) -> Self {
        self.refs.push(cell);
        self
    }

    pub fn build(self) -> Result<BuiltCell, DecodeError> {
        check_capacity(self.bit_len, self.refs.len())?;
        Ok(BuiltCell {
            data: self.data,
            bit_len: self.bit_len,
            refs: self.refs,
        })
    }

    /// Finishes the cell as an arena entry whose references are indices
    /// into the arena. Owned children added with `store_ref` are rejected.
    pub fn build_raw(self, refs: Vec<usize>) -> Result<RawCell, DecodeError> {
        if !self.refs.is_empty() {
            return Err(DecodeError::Cell {
                index: 0,
                reason: "arena cell cannot own children".into(),
            });
        }
        check_capacity(self.bit_len, refs.len())?;
        Ok(RawCell {
            data: self.data,
            bit_len: self.bit_len,
            refs,
        })
    }
}

fn check_capacity(bits: usize, refs: usize) -> Result<(), DecodeError> {
    if bits > MAX_CELL_BITS || refs > MAX_CELL_REFS {
        return Err(DecodeError::Cell {
            index: 0,
            reason: format!("{bits} bits and {refs} refs exceed cell capacity"),
        });
    }
    Ok(())
}

/// One cell of a flat arena, references given as arena indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

/// Serializes a cell tree in the generic format with a single root.
/// Cells are numbered breadth-first so that every reference points forward.
pub fn serialize_boc(root: &BuiltCell, with_crc: bool) -> Vec<u8> {
    let mut order: Vec<&BuiltCell> = vec![root];
    let mut arena: Vec<RawCell> = Vec::new();
    let mut queue = VecDeque::from([0usize]);
    while let Some(i) = queue.pop_front() {
        let cell = order[i];
        let mut refs = Vec::with_capacity(cell.refs.len());
        for child in &cell.refs {
            order.push(child);
            refs.push(order.len() - 1);
            queue.push_back(order.len() - 1);
        }
        // breadth-first pops come in index order
        arena.push(RawCell {
            data: cell.data.clone(),
            bit_len: cell.bit_len,
            refs,
        });
    }
    serialize_arena(&arena, with_crc)
}

/// Serializes an arena as is, cell 0 being the single root. References are
/// written unchecked, so the output may be rejected by the decoder.
pub fn serialize_arena(cells: &[RawCell], with_crc: bool) -> Vec<u8> {
    let size = bytes_needed(cells.len() as u64);
    let mut cell_data = Vec::new();
    for cell in cells {
        let full = cell.bit_len / 8;
        let partial = cell.bit_len % 8 != 0;
        cell_data.push(cell.refs.len() as u8);
        cell_data.push((full * 2 + partial as usize) as u8);
        let mut data = cell.data.clone();
        if partial {
            let last = data.len() - 1;
            data[last] |= 1 << (7 - cell.bit_len % 8);
        }
        cell_data.extend_from_slice(&data);
        for target in &cell.refs {
            push_uint(&mut cell_data, *target as u64, size);
        }
    }
    let off_bytes = bytes_needed(cell_data.len() as u64);

    let mut out = Vec::with_capacity(cell_data.len() + 32);
    out.extend_from_slice(&MAGIC_GENERIC.to_be_bytes());
    let flags: u8 = if with_crc { 0x40 } else { 0 };
    out.push(flags | size as u8);
    out.push(off_bytes as u8);
    push_uint(&mut out, cells.len() as u64, size);
    push_uint(&mut out, 1, size);
    push_uint(&mut out, 0, size);
    push_uint(&mut out, cell_data.len() as u64, off_bytes);
    push_uint(&mut out, 0, size);
    out.extend_from_slice(&cell_data);
    if with_crc {
        let crc = crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    out
}

fn bytes_needed(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

fn push_uint(out: &mut Vec<u8>, value: u64, n: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - n..]);
}

/// CRC-32C (Castagnoli), the bag-of-cells trailer checksum.
pub fn crc32c(data: &[u8]) -> u32 {
    crc_fast::checksum(CrcAlgorithm::Crc32Iscsi, data) as u32
}
