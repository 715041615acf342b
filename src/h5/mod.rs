//! Read-only HDF5 decoder for Keras weight files.
//!
//! Keras writes `model.weights.h5` through h5py with library defaults, so
//! the files use a small, stable corner of the format: version 0 superblocks,
//! version 1 object headers, symbol-table groups and contiguous datasets.
//! This module decodes that corner (plus the newer superblock, object header
//! and compact link encodings) from an in-memory buffer. Anything outside it
//! is reported as [`H5Error::Unsupported`] rather than guessed at.

pub mod message;

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use tracing::trace;

use crate::model::{TensorData, f16_to_f32};
use message::{Dataspace, Datatype, Layout, Message, kind};

/// HDF5 format signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Limit on B-tree depth and continuation chains in corrupted files.
const MAX_DEPTH: usize = 64;

/// Errors raised while decoding an HDF5 buffer.
#[derive(Debug, thiserror::Error)]
pub enum H5Error {
    #[error("not an HDF5 file (signature not found)")]
    NotHdf5,

    #[error("truncated HDF5 structure: {0}")]
    Truncated(#[from] std::io::Error),

    #[error("address {address:#x} (+{len} bytes) lies outside the {file_len}-byte file")]
    OutOfBounds { address: u64, len: u64, file_len: usize },

    #[error("expected {expected} signature at {address:#x}")]
    BadSignature { expected: &'static str, address: u64 },

    #[error("malformed HDF5 structure: {0}")]
    Malformed(String),

    #[error("unsupported HDF5 feature: {0}")]
    Unsupported(String),

    #[error("no object at '{0}'")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Field sizes
// ---------------------------------------------------------------------------

/// Width of file addresses and lengths, fixed by the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    offset: u8,
    length: u8,
}

impl Sizes {
    fn read_uint(cur: &mut Cursor<&[u8]>, width: u8) -> Result<u64, H5Error> {
        Ok(match width {
            1 => cur.read_u8()? as u64,
            2 => cur.read_u16::<LittleEndian>()? as u64,
            4 => cur.read_u32::<LittleEndian>()? as u64,
            8 => cur.read_u64::<LittleEndian>()?,
            other => {
                return Err(H5Error::Unsupported(format!("{other}-byte address fields")));
            }
        })
    }

    /// Read an address; the all-ones value means "undefined".
    pub fn read_address(&self, cur: &mut Cursor<&[u8]>) -> Result<Option<u64>, H5Error> {
        let value = Self::read_uint(cur, self.offset)?;
        let undefined = u64::MAX >> (64 - 8 * self.offset as u32);
        Ok((value != undefined).then_some(value))
    }

    pub fn read_length(&self, cur: &mut Cursor<&[u8]>) -> Result<u64, H5Error> {
        Self::read_uint(cur, self.length)
    }
}

// ---------------------------------------------------------------------------
// Public object model
// ---------------------------------------------------------------------------

/// A group's members, by name, pointing at object header addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub members: BTreeMap<String, u64>,
}

impl Group {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// A dataset's metadata and raw element bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub shape: Vec<usize>,
    pub dtype: Datatype,
    pub raw: Vec<u8>,
}

/// Anything a path can resolve to.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

/// A parsed HDF5 file held in memory.
#[derive(Debug, Clone)]
pub struct H5File {
    data: Vec<u8>,
    base: u64,
    sizes: Sizes,
    root: u64,
}

impl H5File {
    /// Locate and decode the superblock.
    pub fn parse(data: Vec<u8>) -> Result<Self, H5Error> {
        let start = find_signature(&data).ok_or(H5Error::NotHdf5)?;
        let mut cur = Cursor::new(&data[start + SIGNATURE.len()..]);
        let version = cur.read_u8()?;

        let (sizes, base, root) = match version {
            0 | 1 => {
                let _free_space_version = cur.read_u8()?;
                let _root_entry_version = cur.read_u8()?;
                let _reserved = cur.read_u8()?;
                let _shared_header_version = cur.read_u8()?;
                let sizes = Sizes {
                    offset: cur.read_u8()?,
                    length: cur.read_u8()?,
                };
                let _reserved = cur.read_u8()?;
                let _leaf_k = cur.read_u16::<LittleEndian>()?;
                let _internal_k = cur.read_u16::<LittleEndian>()?;
                let _flags = cur.read_u32::<LittleEndian>()?;
                if version == 1 {
                    let _indexed_k = cur.read_u16::<LittleEndian>()?;
                    let _reserved = cur.read_u16::<LittleEndian>()?;
                }
                let base = sizes.read_address(&mut cur)?.unwrap_or(start as u64);
                let _free_space = sizes.read_address(&mut cur)?;
                let _eof = sizes.read_address(&mut cur)?;
                let _driver = sizes.read_address(&mut cur)?;
                // Root group symbol table entry.
                let _name_offset = Sizes::read_uint(&mut cur, sizes.offset)?;
                let root = sizes.read_address(&mut cur)?.ok_or_else(|| {
                    H5Error::Malformed("root group has no object header".to_string())
                })?;
                (sizes, base, root)
            }
            2 | 3 => {
                let sizes = Sizes {
                    offset: cur.read_u8()?,
                    length: cur.read_u8()?,
                };
                let _flags = cur.read_u8()?;
                let base = sizes.read_address(&mut cur)?.unwrap_or(start as u64);
                let _extension = sizes.read_address(&mut cur)?;
                let _eof = sizes.read_address(&mut cur)?;
                let root = sizes.read_address(&mut cur)?.ok_or_else(|| {
                    H5Error::Malformed("root group has no object header".to_string())
                })?;
                (sizes, base, root)
            }
            other => {
                return Err(H5Error::Unsupported(format!("superblock version {other}")));
            }
        };

        trace!(
            superblock = version,
            offset_size = sizes.offset,
            length_size = sizes.length,
            base,
            root,
            "hdf5 superblock"
        );
        Ok(Self {
            data,
            base,
            sizes,
            root,
        })
    }

    /// Resolve a `/`-separated path from the root group.
    ///
    /// Returns `Ok(None)` when any component is missing.
    pub fn get(&self, path: &str) -> Result<Option<Node>, H5Error> {
        let mut address = self.root;
        let mut node = self.node_at(address)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            let Node::Group(group) = node else {
                return Ok(None);
            };
            match group.members.get(component) {
                Some(&child) => address = child,
                None => return Ok(None),
            }
            node = self.node_at(address)?;
        }
        Ok(Some(node))
    }

    /// The group at `path`, or `None` if absent or not a group.
    pub fn group(&self, path: &str) -> Result<Option<Group>, H5Error> {
        Ok(match self.get(path)? {
            Some(Node::Group(group)) => Some(group),
            _ => None,
        })
    }

    /// The dataset at `path`; absence is an error.
    pub fn dataset(&self, path: &str) -> Result<Dataset, H5Error> {
        match self.get(path)? {
            Some(Node::Dataset(dataset)) => Ok(dataset),
            _ => Err(H5Error::NotFound(path.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    fn absolute(&self, address: u64, len: u64) -> Result<usize, H5Error> {
        let start = self.base.checked_add(address);
        match start.and_then(|s| s.checked_add(len).map(|e| (s, e))) {
            Some((start, end)) if end <= self.data.len() as u64 => Ok(start as usize),
            _ => Err(H5Error::OutOfBounds {
                address,
                len,
                file_len: self.data.len(),
            }),
        }
    }

    fn bytes(&self, address: u64, len: u64) -> Result<&[u8], H5Error> {
        let start = self.absolute(address, len)?;
        Ok(&self.data[start..start + len as usize])
    }

    fn cursor(&self, address: u64) -> Result<Cursor<&[u8]>, H5Error> {
        let start = self.absolute(address, 0)?;
        Ok(Cursor::new(&self.data[start..]))
    }

    fn expect_signature(
        &self,
        address: u64,
        expected: &'static str,
    ) -> Result<Cursor<&[u8]>, H5Error> {
        let found = self.bytes(address, 4)?;
        if found != expected.as_bytes() {
            return Err(H5Error::BadSignature { expected, address });
        }
        let mut cur = self.cursor(address)?;
        cur.set_position(4);
        Ok(cur)
    }

    fn message_body(&self, message: &Message) -> &[u8] {
        &self.data[message.offset..message.offset + message.size]
    }

    // -----------------------------------------------------------------------
    // Object headers
    // -----------------------------------------------------------------------

    /// Collect every message of the object header at `address`, following
    /// continuation blocks.
    fn messages(&self, address: u64) -> Result<Vec<Message>, H5Error> {
        let mut blocks: Vec<(u64, u64, bool)> = Vec::new();

        if self.bytes(address, 4)? == b"OHDR" {
            let mut cur = self.expect_signature(address, "OHDR")?;
            let version = cur.read_u8()?;
            if version != 2 {
                return Err(H5Error::Unsupported(format!("object header version {version}")));
            }
            let flags = cur.read_u8()?;
            if flags & 0x20 != 0 {
                let mut times = [0u8; 16];
                cur.read_exact(&mut times)?;
            }
            if flags & 0x10 != 0 {
                let _max_compact = cur.read_u16::<LittleEndian>()?;
                let _min_dense = cur.read_u16::<LittleEndian>()?;
            }
            let chunk_size = Sizes::read_uint(&mut cur, 1 << (flags & 0x03))?;
            blocks.push((address + cur.position(), chunk_size, true));
            // Creation-order tracking adds two bytes to every message header.
            return self.collect_messages(blocks, flags & 0x04 != 0);
        }

        let mut cur = self.cursor(address)?;
        let version = cur.read_u8()?;
        if version != 1 {
            return Err(H5Error::Unsupported(format!("object header version {version}")));
        }
        let _reserved = cur.read_u8()?;
        let _message_count = cur.read_u16::<LittleEndian>()?;
        let _reference_count = cur.read_u32::<LittleEndian>()?;
        let header_size = cur.read_u32::<LittleEndian>()? as u64;
        // Version 1 messages start on the next 8-byte boundary.
        blocks.push((address + 16, header_size, false));
        self.collect_messages(blocks, false)
    }

    fn collect_messages(
        &self,
        mut pending: Vec<(u64, u64, bool)>,
        creation_order: bool,
    ) -> Result<Vec<Message>, H5Error> {
        let mut messages = Vec::new();
        let mut visited = 0usize;

        while let Some((start, len, v2)) = pending.pop() {
            visited += 1;
            if visited > MAX_DEPTH {
                return Err(H5Error::Malformed(
                    "object header continuation chain too long".to_string(),
                ));
            }
            let header_len: u64 = match (v2, creation_order) {
                (false, _) => 8,
                (true, false) => 4,
                (true, true) => 6,
            };
            let block = self.bytes(start, len)?;
            let mut cur = Cursor::new(block);

            while (len - cur.position()) >= header_len {
                let (kind, size, flags) = if v2 {
                    let kind = cur.read_u8()? as u16;
                    let size = cur.read_u16::<LittleEndian>()? as u64;
                    let flags = cur.read_u8()?;
                    if creation_order {
                        let _order = cur.read_u16::<LittleEndian>()?;
                    }
                    (kind, size, flags)
                } else {
                    let kind = cur.read_u16::<LittleEndian>()?;
                    let size = cur.read_u16::<LittleEndian>()? as u64;
                    let flags = cur.read_u8()?;
                    let mut reserved = [0u8; 3];
                    cur.read_exact(&mut reserved)?;
                    (kind, size, flags)
                };

                let body_start = cur.position();
                if body_start + size > len {
                    return Err(H5Error::Malformed(format!(
                        "message of type {kind:#x} overruns its header block"
                    )));
                }
                let message = Message {
                    kind,
                    flags,
                    offset: self.absolute(start + body_start, size)?,
                    size: size as usize,
                };
                cur.set_position(body_start + size);

                match kind {
                    kind::NIL => {}
                    kind::CONTINUATION => {
                        let (address, length) =
                            message::parse_continuation(self.message_body(&message), self.sizes)?;
                        if v2 {
                            self.expect_signature(address, "OCHK")?;
                            // Skip signature, drop trailing checksum.
                            pending.push((address + 4, length.saturating_sub(8), true));
                        } else {
                            pending.push((address, length, false));
                        }
                    }
                    _ => messages.push(message),
                }
            }
        }
        Ok(messages)
    }

    /// Decode the object at `address` as a group or dataset.
    fn node_at(&self, address: u64) -> Result<Node, H5Error> {
        let messages = self.messages(address)?;
        let find = |k: u16| messages.iter().find(|m| m.kind == k);

        if let Some(layout) = find(kind::LAYOUT) {
            return self.dataset_from(&messages, layout).map(Node::Dataset);
        }

        let links: Vec<&Message> = messages.iter().filter(|m| m.kind == kind::LINK).collect();
        if !links.is_empty() {
            let mut group = Group::default();
            for msg in links {
                let link = message::parse_link(self.message_body(msg), self.sizes)?;
                if let Some(target) = link.address {
                    group.members.insert(link.name, target);
                }
            }
            return Ok(Node::Group(group));
        }

        if let Some(table) = find(kind::SYMBOL_TABLE) {
            let table = message::parse_symbol_table(self.message_body(table), self.sizes)?;
            return self.symbol_table_group(table).map(Node::Group);
        }

        if let Some(info) = find(kind::LINK_INFO) {
            if message::link_info_is_dense(self.message_body(info), self.sizes)? {
                return Err(H5Error::Unsupported("dense link storage".to_string()));
            }
            return Ok(Node::Group(Group::default()));
        }

        Err(H5Error::Malformed(format!(
            "object at {address:#x} is neither a group nor a dataset"
        )))
    }

    // -----------------------------------------------------------------------
    // Old-style groups
    // -----------------------------------------------------------------------

    fn symbol_table_group(&self, table: message::SymbolTable) -> Result<Group, H5Error> {
        let mut cur = self.expect_signature(table.heap_address, "HEAP")?;
        let _version = cur.read_u8()?;
        let mut reserved = [0u8; 3];
        cur.read_exact(&mut reserved)?;
        let heap_size = self.sizes.read_length(&mut cur)?;
        let _free_list = self.sizes.read_length(&mut cur)?;
        let heap_data = self
            .sizes
            .read_address(&mut cur)?
            .ok_or_else(|| H5Error::Malformed("local heap without data segment".to_string()))?;
        let heap = self.bytes(heap_data, heap_size)?;

        let mut group = Group::default();
        self.walk_btree(table.btree_address, heap, &mut group, 0)?;
        Ok(group)
    }

    fn walk_btree(
        &self,
        address: u64,
        heap: &[u8],
        group: &mut Group,
        depth: usize,
    ) -> Result<(), H5Error> {
        if depth > MAX_DEPTH {
            return Err(H5Error::Malformed("group B-tree too deep".to_string()));
        }
        let mut cur = self.expect_signature(address, "TREE")?;
        let node_type = cur.read_u8()?;
        if node_type != 0 {
            return Err(H5Error::Malformed(format!(
                "expected group B-tree node, found type {node_type}"
            )));
        }
        let level = cur.read_u8()?;
        let entries = cur.read_u16::<LittleEndian>()?;
        let _left = self.sizes.read_address(&mut cur)?;
        let _right = self.sizes.read_address(&mut cur)?;

        let mut children = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            let _key = self.sizes.read_length(&mut cur)?;
            let child = self
                .sizes
                .read_address(&mut cur)?
                .ok_or_else(|| H5Error::Malformed("B-tree child is undefined".to_string()))?;
            children.push(child);
        }

        for child in children {
            if level > 0 {
                self.walk_btree(child, heap, group, depth + 1)?;
            } else {
                self.read_symbol_node(child, heap, group)?;
            }
        }
        Ok(())
    }

    fn read_symbol_node(&self, address: u64, heap: &[u8], group: &mut Group) -> Result<(), H5Error> {
        let mut cur = self.expect_signature(address, "SNOD")?;
        let _version = cur.read_u8()?;
        let _reserved = cur.read_u8()?;
        let count = cur.read_u16::<LittleEndian>()?;

        for _ in 0..count {
            let name_offset = self.sizes.read_length(&mut cur)? as usize;
            let header = self.sizes.read_address(&mut cur)?;
            let _cache_type = cur.read_u32::<LittleEndian>()?;
            let _reserved = cur.read_u32::<LittleEndian>()?;
            let mut scratch = [0u8; 16];
            cur.read_exact(&mut scratch)?;

            let name = heap_string(heap, name_offset)?;
            if let Some(header) = header {
                group.members.insert(name, header);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Datasets
    // -----------------------------------------------------------------------

    fn dataset_from(&self, messages: &[Message], layout: &Message) -> Result<Dataset, H5Error> {
        if messages.iter().any(|m| m.kind == kind::FILTER_PIPELINE) {
            return Err(H5Error::Unsupported("filtered (compressed) datasets".to_string()));
        }
        let space = messages
            .iter()
            .find(|m| m.kind == kind::DATASPACE)
            .ok_or_else(|| H5Error::Malformed("dataset without dataspace".to_string()))?;
        let dtype = messages
            .iter()
            .find(|m| m.kind == kind::DATATYPE)
            .ok_or_else(|| H5Error::Malformed("dataset without datatype".to_string()))?;
        if dtype.is_shared() {
            return Err(H5Error::Unsupported("committed (shared) datatypes".to_string()));
        }

        let space: Dataspace = message::parse_dataspace(self.message_body(space), self.sizes)?;
        let dtype = message::parse_datatype(self.message_body(dtype))?;
        let layout = message::parse_layout(self.message_body(layout), layout.offset, self.sizes)?;

        let expected = space
            .element_count()?
            .checked_mul(dtype.size() as u64)
            .ok_or_else(|| H5Error::Malformed("dataset size overflows".to_string()))?;
        // No storage can hold more bytes than the file itself.
        if expected > self.data.len() as u64 {
            return Err(H5Error::Malformed(format!(
                "dataset needs {expected} bytes but the file holds {}",
                self.data.len()
            )));
        }

        let raw = match layout {
            Layout::Compact { offset, size } => {
                if (size as u64) < expected || offset + size > self.data.len() {
                    return Err(H5Error::Malformed(format!(
                        "compact dataset holds {size} bytes, expected {expected}"
                    )));
                }
                self.data[offset..offset + expected as usize].to_vec()
            }
            Layout::Contiguous { address: None, .. } => vec![0u8; expected as usize],
            Layout::Contiguous {
                address: Some(address),
                ..
            } => self.bytes(address, expected)?.to_vec(),
        };

        Ok(Dataset {
            shape: space.dims.iter().map(|&d| d as usize).collect(),
            dtype,
            raw,
        })
    }
}

/// Signature search at 0, 512, 1024, 2048, ... (user block sizes).
fn find_signature(data: &[u8]) -> Option<usize> {
    let mut offset = 0usize;
    loop {
        if offset + SIGNATURE.len() > data.len() {
            return None;
        }
        if data[offset..offset + SIGNATURE.len()] == SIGNATURE {
            return Some(offset);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
}

fn heap_string(heap: &[u8], offset: usize) -> Result<String, H5Error> {
    let tail = heap
        .get(offset..)
        .ok_or_else(|| H5Error::Malformed(format!("heap offset {offset} out of range")))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| H5Error::Malformed("unterminated name in local heap".to_string()))?;
    String::from_utf8(tail[..end].to_vec())
        .map_err(|e| H5Error::Malformed(format!("group member name is not UTF-8: {e}")))
}

// ---------------------------------------------------------------------------
// Element decoding
// ---------------------------------------------------------------------------

impl Dataset {
    /// Decode into TensorFlow.js element storage: floats become `f32`,
    /// integers become `i32` (values outside the `i32` range are rejected).
    pub fn to_tensor_data(&self) -> Result<TensorData, H5Error> {
        let size = self.dtype.size();
        let chunks = self.raw.chunks_exact(size);

        match self.dtype {
            Datatype::Float { big_endian, .. } => {
                let values = chunks
                    .map(|c| match (size, big_endian) {
                        (2, false) => f16_to_f32(LittleEndian::read_u16(c)),
                        (2, true) => f16_to_f32(BigEndian::read_u16(c)),
                        (4, false) => LittleEndian::read_f32(c),
                        (4, true) => BigEndian::read_f32(c),
                        (_, false) => LittleEndian::read_f64(c) as f32,
                        (_, true) => BigEndian::read_f64(c) as f32,
                    })
                    .collect();
                Ok(TensorData::Float32(values))
            }
            Datatype::Integer {
                signed, big_endian, ..
            } => {
                let mut values = Vec::with_capacity(self.raw.len() / size);
                for c in chunks {
                    let wide: i128 = match (size, signed, big_endian) {
                        (1, true, _) => c[0] as i8 as i128,
                        (1, false, _) => c[0] as i128,
                        (2, true, false) => LittleEndian::read_i16(c) as i128,
                        (2, true, true) => BigEndian::read_i16(c) as i128,
                        (2, false, false) => LittleEndian::read_u16(c) as i128,
                        (2, false, true) => BigEndian::read_u16(c) as i128,
                        (4, true, false) => LittleEndian::read_i32(c) as i128,
                        (4, true, true) => BigEndian::read_i32(c) as i128,
                        (4, false, false) => LittleEndian::read_u32(c) as i128,
                        (4, false, true) => BigEndian::read_u32(c) as i128,
                        (_, true, false) => LittleEndian::read_i64(c) as i128,
                        (_, true, true) => BigEndian::read_i64(c) as i128,
                        (_, false, false) => LittleEndian::read_u64(c) as i128,
                        (_, false, true) => BigEndian::read_u64(c) as i128,
                    };
                    let narrow = i32::try_from(wide).map_err(|_| {
                        H5Error::Unsupported(format!("integer value {wide} exceeds int32 range"))
                    })?;
                    values.push(narrow);
                }
                Ok(TensorData::Int32(values))
            }
        }
    }
}
