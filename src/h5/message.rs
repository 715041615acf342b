//! Object header messages.
//!
//! Only the message types that describe groups and plain datasets are
//! decoded; everything else (attributes, fill values, modification times)
//! is carried as an opaque [`Message`] and ignored by callers.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{H5Error, Sizes};

/// Message type identifiers from the HDF5 file format.
pub mod kind {
    pub const NIL: u16 = 0x0000;
    pub const DATASPACE: u16 = 0x0001;
    pub const LINK_INFO: u16 = 0x0002;
    pub const DATATYPE: u16 = 0x0003;
    pub const LINK: u16 = 0x0006;
    pub const LAYOUT: u16 = 0x0008;
    pub const FILTER_PIPELINE: u16 = 0x000B;
    pub const CONTINUATION: u16 = 0x0010;
    pub const SYMBOL_TABLE: u16 = 0x0011;
}

/// Message flag: the body is a reference to a shared message.
const FLAG_SHARED: u8 = 0x02;

/// A raw message located inside the file buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub kind: u16,
    pub flags: u8,
    /// Absolute offset of the message body.
    pub offset: usize,
    pub size: usize,
}

impl Message {
    pub fn is_shared(&self) -> bool {
        self.flags & FLAG_SHARED != 0
    }
}

// ---------------------------------------------------------------------------
// Dataspace
// ---------------------------------------------------------------------------

/// Dataset extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// Current dimension sizes; empty for scalars.
    pub dims: Vec<u64>,
    /// A null dataspace holds no elements at all.
    pub null: bool,
}

impl Dataspace {
    /// Total elements; dimensions whose product overflows are malformed.
    pub fn element_count(&self) -> Result<u64, H5Error> {
        if self.null {
            return Ok(0);
        }
        self.dims
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| H5Error::Malformed(format!("dataspace {:?} overflows", self.dims)))
    }
}

pub fn parse_dataspace(body: &[u8], sizes: Sizes) -> Result<Dataspace, H5Error> {
    let mut cur = Cursor::new(body);
    let version = cur.read_u8()?;
    let rank = cur.read_u8()? as usize;
    let _flags = cur.read_u8()?;
    let null = match version {
        1 => {
            let _reserved = cur.read_u8()?;
            let _reserved = cur.read_u32::<LittleEndian>()?;
            false
        }
        2 => cur.read_u8()? == 2,
        other => {
            return Err(H5Error::Unsupported(format!("dataspace message version {other}")));
        }
    };

    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(sizes.read_length(&mut cur)?);
    }
    Ok(Dataspace { dims, null })
}

// ---------------------------------------------------------------------------
// Datatype
// ---------------------------------------------------------------------------

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer {
        size: usize,
        signed: bool,
        big_endian: bool,
    },
    Float {
        size: usize,
        big_endian: bool,
    },
}

impl Datatype {
    pub fn size(&self) -> usize {
        match *self {
            Datatype::Integer { size, .. } | Datatype::Float { size, .. } => size,
        }
    }
}

fn class_name(class: u8) -> &'static str {
    match class {
        0 => "fixed-point",
        1 => "floating-point",
        2 => "time",
        3 => "string",
        4 => "bitfield",
        5 => "opaque",
        6 => "compound",
        7 => "reference",
        8 => "enumerated",
        9 => "variable-length",
        10 => "array",
        _ => "unknown",
    }
}

pub fn parse_datatype(body: &[u8]) -> Result<Datatype, H5Error> {
    let mut cur = Cursor::new(body);
    let class_and_version = cur.read_u8()?;
    let class = class_and_version & 0x0f;
    let mut bits = [0u8; 3];
    cur.read_exact(&mut bits)?;
    let size = cur.read_u32::<LittleEndian>()? as usize;
    let big_endian = bits[0] & 0x01 != 0;

    match class {
        0 => {
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(H5Error::Unsupported(format!("{size}-byte integer datatype")));
            }
            Ok(Datatype::Integer {
                size,
                signed: bits[0] & 0x08 != 0,
                big_endian,
            })
        }
        1 => {
            if bits[0] & 0x40 != 0 {
                return Err(H5Error::Unsupported("VAX floating-point byte order".to_string()));
            }
            if !matches!(size, 2 | 4 | 8) {
                return Err(H5Error::Unsupported(format!("{size}-byte float datatype")));
            }
            Ok(Datatype::Float { size, big_endian })
        }
        other => Err(H5Error::Unsupported(format!(
            "{} datatype",
            class_name(other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Data layout
// ---------------------------------------------------------------------------

/// Where a dataset's raw bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Stored inside the object header; absolute offset and length.
    Compact { offset: usize, size: usize },
    /// Stored in one block; `address` is `None` when never written.
    Contiguous { address: Option<u64>, size: u64 },
}

pub fn parse_layout(body: &[u8], body_offset: usize, sizes: Sizes) -> Result<Layout, H5Error> {
    let mut cur = Cursor::new(body);
    let version = cur.read_u8()?;
    match version {
        1 | 2 => {
            let rank = cur.read_u8()? as usize;
            let class = cur.read_u8()?;
            let mut reserved = [0u8; 5];
            cur.read_exact(&mut reserved)?;
            let address = if class != 0 {
                sizes.read_address(&mut cur)?
            } else {
                None
            };
            let mut element_count: u64 = 1;
            for _ in 0..rank {
                element_count = element_count.saturating_mul(cur.read_u32::<LittleEndian>()? as u64);
            }
            match class {
                0 => {
                    let size = cur.read_u32::<LittleEndian>()? as usize;
                    Ok(Layout::Compact {
                        offset: body_offset + cur.position() as usize,
                        size,
                    })
                }
                1 => Ok(Layout::Contiguous {
                    address,
                    size: element_count,
                }),
                _ => Err(H5Error::Unsupported("chunked dataset storage".to_string())),
            }
        }
        3 | 4 => {
            let class = cur.read_u8()?;
            match class {
                0 => {
                    let size = cur.read_u16::<LittleEndian>()? as usize;
                    Ok(Layout::Compact {
                        offset: body_offset + cur.position() as usize,
                        size,
                    })
                }
                1 => {
                    let address = sizes.read_address(&mut cur)?;
                    let size = sizes.read_length(&mut cur)?;
                    Ok(Layout::Contiguous { address, size })
                }
                2 => Err(H5Error::Unsupported("chunked dataset storage".to_string())),
                _ => Err(H5Error::Unsupported("virtual dataset storage".to_string())),
            }
        }
        other => Err(H5Error::Unsupported(format!("data layout message version {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Old-style group storage: B-tree of symbol nodes plus a local name heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTable {
    pub btree_address: u64,
    pub heap_address: u64,
}

pub fn parse_symbol_table(body: &[u8], sizes: Sizes) -> Result<SymbolTable, H5Error> {
    let mut cur = Cursor::new(body);
    let btree_address = sizes.read_address(&mut cur)?.ok_or_else(|| {
        H5Error::Malformed("symbol table message without a B-tree".to_string())
    })?;
    let heap_address = sizes.read_address(&mut cur)?.ok_or_else(|| {
        H5Error::Malformed("symbol table message without a local heap".to_string())
    })?;
    Ok(SymbolTable {
        btree_address,
        heap_address,
    })
}

/// A named hard link from a new-style group; `None` for soft or external links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub address: Option<u64>,
}

pub fn parse_link(body: &[u8], sizes: Sizes) -> Result<Link, H5Error> {
    let mut cur = Cursor::new(body);
    let version = cur.read_u8()?;
    if version != 1 {
        return Err(H5Error::Unsupported(format!("link message version {version}")));
    }
    let flags = cur.read_u8()?;
    let link_type = if flags & 0x08 != 0 { cur.read_u8()? } else { 0 };
    if flags & 0x04 != 0 {
        let _creation_order = cur.read_u64::<LittleEndian>()?;
    }
    if flags & 0x10 != 0 {
        let _charset = cur.read_u8()?;
    }
    let name_len = match flags & 0x03 {
        0 => cur.read_u8()? as usize,
        1 => cur.read_u16::<LittleEndian>()? as usize,
        2 => cur.read_u32::<LittleEndian>()? as usize,
        _ => cur.read_u64::<LittleEndian>()? as usize,
    };
    let remaining = body.len().saturating_sub(cur.position() as usize);
    if name_len > remaining {
        return Err(H5Error::Malformed(format!(
            "link name of {name_len} bytes overruns its {remaining}-byte message"
        )));
    }
    let mut name = vec![0u8; name_len];
    cur.read_exact(&mut name)?;
    let name = String::from_utf8(name)
        .map_err(|e| H5Error::Malformed(format!("link name is not UTF-8: {e}")))?;

    let address = if link_type == 0 {
        sizes.read_address(&mut cur)?
    } else {
        None
    };
    Ok(Link { name, address })
}

/// Whether a link-info message points at dense (fractal heap) link storage.
pub fn link_info_is_dense(body: &[u8], sizes: Sizes) -> Result<bool, H5Error> {
    let mut cur = Cursor::new(body);
    let _version = cur.read_u8()?;
    let flags = cur.read_u8()?;
    if flags & 0x01 != 0 {
        let _max_creation_index = cur.read_u64::<LittleEndian>()?;
    }
    Ok(sizes.read_address(&mut cur)?.is_some())
}

/// Target of an object header continuation message.
pub fn parse_continuation(body: &[u8], sizes: Sizes) -> Result<(u64, u64), H5Error> {
    let mut cur = Cursor::new(body);
    let address = sizes.read_address(&mut cur)?.ok_or_else(|| {
        H5Error::Malformed("continuation message with undefined address".to_string())
    })?;
    let length = sizes.read_length(&mut cur)?;
    Ok((address, length))
}
