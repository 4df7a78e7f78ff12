//! Decoder for the `getAllShardsInfo` response: a `HashmapE` keyed by
//! workchain whose values reference a bin-tree of shard descriptors.

use super::boc::{BagOfCells, BuiltCell, CellBuilder, CellSlice, serialize_boc};
use crate::error::DecodeError;
use serde::Serialize;
use std::collections::HashSet;

/// Key width of the shard dictionary on the wire.
pub const SHARD_DICT_KEY_BITS: usize = 32;
/// Shard prefixes are at most 60 bits long, so no valid bin-tree is deeper.
pub const MAX_BIN_TREE_DEPTH: usize = 64;

const TAG_SHARD_DESCR: u64 = 0xb;
const TAG_SHARD_DESCR_NEW: u64 = 0xa;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardDescriptor {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
    #[serde(with = "hex_bytes")]
    pub root_hash: [u8; 32],
    #[serde(with = "hex_bytes")]
    pub file_hash: [u8; 32],
}

mod hex_bytes {
    pub fn serialize<S>(value: &[u8; 32], s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_str(&hex::encode(value))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShardDecoder {
    key_bits: usize,
    workchain: i32,
}

impl Default for ShardDecoder {
    fn default() -> Self {
        Self {
            key_bits: SHARD_DICT_KEY_BITS,
            workchain: 0,
        }
    }
}

impl ShardDecoder {
    pub fn new(key_bits: usize, workchain: i32) -> Self {
        Self {
            key_bits,
            workchain,
        }
    }

    /// Decodes every shard descriptor of the configured workchain, in
    /// depth-first left-then-right order. Any malformed cell fails the whole
    /// response.
    pub fn decode(
        &self,
        bytes: &[u8],
    ) -> Result<Vec<ShardDescriptor>, DecodeError> {
        let boc = BagOfCells::deserialize(bytes)?;
        let root = boc.slice(boc.root())?;
        let mut value =
            dict_lookup(root, self.workchain as i64, self.key_bits)?;
        let tree = value.load_ref()?;
        walk_bin_tree(tree, self.workchain)
    }
}

/// Decodes with the wire defaults: 32-bit keys, workchain 0.
pub fn decode_shards(
    bytes: &[u8],
) -> Result<Vec<ShardDescriptor>, DecodeError> {
    ShardDecoder::default().decode(bytes)
}

fn key_bit(key: i64, key_bits: usize, i: usize) -> bool {
    let from_lsb = key_bits - 1 - i;
    if from_lsb >= 64 {
        key < 0
    } else {
        (key >> from_lsb) & 1 == 1
    }
}

fn bit_width(m: usize) -> usize {
    (usize::BITS - m.leading_zeros()) as usize
}

/// Looks `key` up in a `HashmapE key_bits X` and returns the slice positioned
/// at the value.
fn dict_lookup<'a>(
    mut slice: CellSlice<'a>,
    key: i64,
    key_bits: usize,
) -> Result<CellSlice<'a>, DecodeError> {
    if !slice.load_bit()? {
        return Err(DecodeError::MissingKey(key));
    }
    let mut node = slice.load_ref()?;
    let mut consumed = 0usize;

    loop {
        let remaining = key_bits - consumed;
        let label_len = match_label(&mut node, remaining, |i| {
            key_bit(key, key_bits, consumed + i)
        })?
        .ok_or(DecodeError::MissingKey(key))?;
        consumed += label_len;
        if consumed == key_bits {
            return Ok(node);
        }
        // fork: left child for 0, right child for 1
        let go_right = key_bit(key, key_bits, consumed);
        let left = node.load_ref()?;
        node = if go_right { node.load_ref()? } else { left };
        consumed += 1;
    }
}

/// Reads an `HmLabel ~l m` and compares it bit by bit with `expected`.
/// Returns `Some(l)` on a match, `None` on the first differing bit.
fn match_label(
    s: &mut CellSlice<'_>,
    m: usize,
    expected: impl Fn(usize) -> bool,
) -> Result<Option<usize>, DecodeError> {
    let mut matches = true;
    let len = if !s.load_bit()? {
        // hml_short$0: unary length then the bits
        let mut len = 0usize;
        while s.load_bit()? {
            len += 1;
            if len > m {
                return Err(DecodeError::Dictionary(format!(
                    "short label of {len} bits exceeds {m}"
                )));
            }
        }
        for i in 0..len {
            matches &= s.load_bit()? == expected(i);
        }
        len
    } else if !s.load_bit()? {
        // hml_long$10
        let len = s.load_uint(bit_width(m))? as usize;
        if len > m {
            return Err(DecodeError::Dictionary(format!(
                "long label of {len} bits exceeds {m}"
            )));
        }
        for i in 0..len {
            matches &= s.load_bit()? == expected(i);
        }
        len
    } else {
        // hml_same$11
        let v = s.load_bit()?;
        let len = s.load_uint(bit_width(m))? as usize;
        if len > m {
            return Err(DecodeError::Dictionary(format!(
                "same label of {len} bits exceeds {m}"
            )));
        }
        for i in 0..len {
            matches &= v == expected(i);
        }
        len
    };
    Ok(matches.then_some(len))
}

/// Every cell may be visited once. Shard trees never share subtrees, and a
/// shared one would let a small payload expand exponentially.
fn walk_bin_tree(
    root: CellSlice<'_>,
    workchain: i32,
) -> Result<Vec<ShardDescriptor>, DecodeError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((mut node, depth)) = stack.pop() {
        if depth > MAX_BIN_TREE_DEPTH {
            return Err(DecodeError::TooDeep(MAX_BIN_TREE_DEPTH));
        }
        if !seen.insert(node.cell_index()) {
            return Err(DecodeError::SharedCell(node.cell_index()));
        }
        if node.load_bit()? {
            let left = node.load_ref()?;
            let right = node.load_ref()?;
            stack.push((right, depth + 1));
            stack.push((left, depth + 1));
        } else {
            out.push(read_descriptor(&mut node, workchain)?);
        }
    }
    Ok(out)
}

fn read_descriptor(
    s: &mut CellSlice<'_>,
    workchain: i32,
) -> Result<ShardDescriptor, DecodeError> {
    let tag = s.load_uint(4)?;
    if tag != TAG_SHARD_DESCR && tag != TAG_SHARD_DESCR_NEW {
        return Err(DecodeError::BadTag(tag));
    }
    let seqno = s.load_uint(32)? as u32;
    // reg_mc_seqno, start_lt, end_lt
    s.skip_bits(32 + 64 + 64)?;
    let root_hash = s.load_bytes::<32>()?;
    let file_hash = s.load_bytes::<32>()?;
    // before_split, before_merge, want_split, want_merge, nx_cc_updated,
    // flags, next_catchain_seqno
    s.skip_bits(5 + 3 + 32)?;
    let shard = s.load_int(64)?;
    Ok(ShardDescriptor {
        workchain,
        shard,
        seqno,
        root_hash,
        file_hash,
    })
}

/// Shape of a shard bin-tree, used to produce shard-list payloads.
#[derive(Debug, Clone)]
pub enum ShardTree {
    Leaf(ShardDescriptor),
    Fork(Box<ShardTree>, Box<ShardTree>),
}

impl ShardTree {
    pub fn fork(left: ShardTree, right: ShardTree) -> Self {
        ShardTree::Fork(Box::new(left), Box::new(right))
    }
}

/// Serializes a shard tree as a `getAllShardsInfo` payload holding a single
/// workchain entry. Inverse of [`ShardDecoder::decode`] for the fields it
/// reads; skipped fields are written as zero.
pub fn encode_shard_list(
    workchain: i32,
    tree: &ShardTree,
) -> Result<Vec<u8>, DecodeError> {
    let tree_cell = encode_tree(tree, 0)?;
    let key_bits = SHARD_DICT_KEY_BITS;
    let edge = write_label(CellBuilder::new(), workchain as i64, key_bits)
        .store_ref(tree_cell)
        .build()?;
    let root = CellBuilder::new().store_bit(true).store_ref(edge).build()?;
    Ok(serialize_boc(&root, true))
}

fn encode_tree(
    tree: &ShardTree,
    depth: usize,
) -> Result<BuiltCell, DecodeError> {
    if depth > MAX_BIN_TREE_DEPTH {
        return Err(DecodeError::TooDeep(MAX_BIN_TREE_DEPTH));
    }
    match tree {
        ShardTree::Leaf(d) => {
            write_descriptor(CellBuilder::new().store_bit(false), d).build()
        }
        ShardTree::Fork(l, r) => CellBuilder::new()
            .store_bit(true)
            .store_ref(encode_tree(l, depth + 1)?)
            .store_ref(encode_tree(r, depth + 1)?)
            .build(),
    }
}

fn write_descriptor(b: CellBuilder, d: &ShardDescriptor) -> CellBuilder {
    b.store_uint(TAG_SHARD_DESCR, 4)
        .store_uint(d.seqno as u64, 32)
        .store_uint(0, 32)
        .store_uint(0, 64)
        .store_uint(0, 64)
        .store_bytes(&d.root_hash)
        .store_bytes(&d.file_hash)
        .store_uint(0, 5 + 3)
        .store_uint(0, 32)
        .store_int(d.shard, 64)
}

/// Writes the full key as one edge label using the shortest of the three
/// label encodings.
fn write_label(b: CellBuilder, key: i64, m: usize) -> CellBuilder {
    let bits: Vec<bool> = (0..m).map(|i| key_bit(key, m, i)).collect();
    let width = bit_width(m);
    let short = 1 + (m + 1) + m;
    let long = 2 + width + m;
    let same_bit = bits.first().copied().unwrap_or(false);
    if bits.iter().all(|bit| *bit == same_bit) && 3 + width < short.min(long) {
        return b
            .store_uint(0b11, 2)
            .store_bit(same_bit)
            .store_uint(m as u64, width);
    }
    let mut b = if short <= long {
        let mut b = b.store_bit(false);
        for _ in 0..m {
            b = b.store_bit(true);
        }
        b.store_bit(false)
    } else {
        b.store_uint(0b10, 2).store_uint(m as u64, width)
    };
    for bit in bits {
        b = b.store_bit(bit);
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::boc::serialize_arena;

    fn descr(seqno: u32, shard: i64, fill: u8) -> ShardDescriptor {
        ShardDescriptor {
            workchain: 0,
            shard,
            seqno,
            root_hash: [fill; 32],
            file_hash: [fill.wrapping_add(1); 32],
        }
    }

    const LEFT: i64 = 0x4000_0000_0000_0000;
    const RIGHT_LEFT: i64 = -0x4000_0000_0000_0000; // 0xc000...
    const RIGHT_RIGHT: i64 = 0x6000_0000_0000_0000;

    fn three_shard_fixture() -> Vec<u8> {
        let tree = ShardTree::fork(
            ShardTree::Leaf(descr(100, LEFT, 1)),
            ShardTree::fork(
                ShardTree::Leaf(descr(200, RIGHT_LEFT, 2)),
                ShardTree::Leaf(descr(300, RIGHT_RIGHT, 3)),
            ),
        );
        encode_shard_list(0, &tree).unwrap()
    }

    #[test]
    fn test_decode_three_descriptors_in_dfs_order() {
        let shards = decode_shards(&three_shard_fixture()).unwrap();
        assert_eq!(shards.len(), 3);
        assert_eq!(
            shards.iter().map(|s| s.seqno).collect::<Vec<_>>(),
            vec![100, 200, 300]
        );
        assert_eq!(
            shards.iter().map(|s| s.shard).collect::<Vec<_>>(),
            vec![LEFT, RIGHT_LEFT, RIGHT_RIGHT]
        );
        assert_eq!(shards[1], descr(200, RIGHT_LEFT, 2));
        assert!(shards.iter().all(|s| s.workchain == 0));
    }

    #[test]
    fn test_truncated_fixture_is_an_error_not_a_partial_list() {
        let bytes = three_shard_fixture();
        for cut in [bytes.len() - 1, bytes.len() / 2, 10] {
            assert!(decode_shards(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_corrupted_fixture_is_rejected() {
        let mut bytes = three_shard_fixture();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(decode_shards(&bytes).is_err());
    }

    #[test]
    fn test_unknown_descriptor_tag_fails_whole_decode() {
        let leaf = CellBuilder::new()
            .store_bit(false)
            .store_uint(0x3, 4)
            .store_uint(7, 32)
            .build()
            .unwrap();
        let good = write_descriptor(
            CellBuilder::new().store_bit(false),
            &descr(1, LEFT, 9),
        )
        .build()
        .unwrap();
        let tree = CellBuilder::new()
            .store_bit(true)
            .store_ref(good)
            .store_ref(leaf)
            .build()
            .unwrap();
        let bytes = wrap_single_key(tree, 0);
        assert_eq!(decode_shards(&bytes), Err(DecodeError::BadTag(0x3)));
    }

    /// Dictionary root, one edge for key 0, then `forks` fork cells whose
    /// two references both point at the next cell, ending in one leaf.
    fn shared_fork_chain(forks: usize) -> Vec<u8> {
        let mut cells = vec![
            CellBuilder::new().store_bit(true).build_raw(vec![1]).unwrap(),
            write_label(CellBuilder::new(), 0, SHARD_DICT_KEY_BITS)
                .build_raw(vec![2])
                .unwrap(),
        ];
        for i in 0..forks {
            let next = 3 + i;
            cells.push(
                CellBuilder::new()
                    .store_bit(true)
                    .build_raw(vec![next, next])
                    .unwrap(),
            );
        }
        cells.push(
            write_descriptor(
                CellBuilder::new().store_bit(false),
                &descr(1, LEFT, 4),
            )
            .build_raw(Vec::new())
            .unwrap(),
        );
        serialize_arena(&cells, true)
    }

    #[test]
    fn test_shared_subtree_is_rejected() {
        // a single fork pointing twice at the same leaf
        assert_eq!(
            decode_shards(&shared_fork_chain(1)),
            Err(DecodeError::SharedCell(3))
        );
        // would expand to 2^40 descriptors if walked naively
        assert!(matches!(
            decode_shards(&shared_fork_chain(40)),
            Err(DecodeError::SharedCell(_))
        ));
    }

    fn wrap_single_key(tree: BuiltCell, key: i64) -> Vec<u8> {
        let edge = write_label(CellBuilder::new(), key, SHARD_DICT_KEY_BITS)
            .store_ref(tree)
            .build()
            .unwrap();
        let root = CellBuilder::new()
            .store_bit(true)
            .store_ref(edge)
            .build()
            .unwrap();
        serialize_boc(&root, false)
    }

    #[test]
    fn test_dictionary_with_fork_and_short_labels() {
        // keys 0 and 1: 31 shared zero bits, then a fork on the last bit
        let tree_for = |seqno| {
            write_descriptor(
                CellBuilder::new().store_bit(false),
                &descr(seqno, LEFT, 0),
            )
            .build()
            .unwrap()
        };
        // hml_short with length 0: '0' + unary '0'
        let leaf0 = CellBuilder::new()
            .store_uint(0b00, 2)
            .store_ref(tree_for(10))
            .build()
            .unwrap();
        let leaf1 = CellBuilder::new()
            .store_uint(0b00, 2)
            .store_ref(tree_for(11))
            .build()
            .unwrap();
        let mut edge = CellBuilder::new().store_bit(false);
        for _ in 0..31 {
            edge = edge.store_bit(true);
        }
        edge = edge.store_bit(false);
        for _ in 0..31 {
            edge = edge.store_bit(false);
        }
        let edge = edge.store_ref(leaf0).store_ref(leaf1).build().unwrap();
        let root = CellBuilder::new()
            .store_bit(true)
            .store_ref(edge)
            .build()
            .unwrap();
        let bytes = serialize_boc(&root, false);

        let wc0 = ShardDecoder::new(32, 0).decode(&bytes).unwrap();
        assert_eq!(wc0[0].seqno, 10);
        let wc1 = ShardDecoder::new(32, 1).decode(&bytes).unwrap();
        assert_eq!(wc1[0].seqno, 11);
        assert_eq!(wc1[0].workchain, 1);
        assert_eq!(
            ShardDecoder::new(32, 2).decode(&bytes),
            Err(DecodeError::MissingKey(2))
        );
    }

    #[test]
    fn test_wide_key_dictionary() {
        let tree = encode_tree(&ShardTree::Leaf(descr(5, LEFT, 4)), 0).unwrap();
        let edge = write_label(CellBuilder::new(), 0, 256)
            .store_ref(tree)
            .build()
            .unwrap();
        let root = CellBuilder::new()
            .store_bit(true)
            .store_ref(edge)
            .build()
            .unwrap();
        let bytes = serialize_boc(&root, false);
        let shards = ShardDecoder::new(256, 0).decode(&bytes).unwrap();
        assert_eq!(shards, vec![descr(5, LEFT, 4)]);
    }

    #[test]
    fn test_empty_dictionary_is_missing_key() {
        let root = CellBuilder::new().store_bit(false).build().unwrap();
        let bytes = serialize_boc(&root, false);
        assert_eq!(decode_shards(&bytes), Err(DecodeError::MissingKey(0)));
    }

    #[test]
    fn test_label_encodings_round_trip_through_lookup() {
        for key in [0i64, 1, -1, 0x1234_5678, -239] {
            let tree =
                encode_tree(&ShardTree::Leaf(descr(1, LEFT, 0)), 0).unwrap();
            let bytes = wrap_single_key(tree, key);
            let decoder = ShardDecoder::new(32, key as i32);
            assert_eq!(decoder.decode(&bytes).unwrap().len(), 1, "key {key}");
        }
    }
}
