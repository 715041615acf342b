//! Fixture builders shared by the integration suites.
//!
//! [`H5Writer`] emits the small HDF5 subset Keras weight files use, in two
//! flavors: the classic layout `h5py` produces by default (superblock v0,
//! version 1 object headers, symbol-table groups) and the newer one
//! (superblock v2, `OHDR` headers, link messages). [`KerasFixture`] wraps a
//! config and weight file into a `.keras` zip archive.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde_json::{Value, json};

const UNDEFINED: u64 = u64::MAX;

/// HDF5 file layout flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H5Style {
    Classic,
    Modern,
}

enum Data {
    F32(Vec<f32>),
    I32(Vec<i32>),
    /// Float32 dataset whose storage was never allocated.
    Unallocated,
}

enum Node {
    Group(BTreeMap<String, Node>),
    Dataset { shape: Vec<u64>, data: Data },
}

/// Build an HDF5 file from `/`-separated dataset paths.
pub struct H5Writer {
    style: H5Style,
    root: BTreeMap<String, Node>,
}

impl H5Writer {
    pub fn new(style: H5Style) -> Self {
        Self {
            style,
            root: BTreeMap::new(),
        }
    }

    fn insert(&mut self, path: &str, node: Node) {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let (last, parents) = parts.split_last().expect("non-empty path");
        let mut map = &mut self.root;
        for part in parents {
            let entry = map
                .entry(part.to_string())
                .or_insert_with(|| Node::Group(BTreeMap::new()));
            map = match entry {
                Node::Group(children) => children,
                Node::Dataset { .. } => panic!("{part} is a dataset"),
            };
        }
        map.insert(last.to_string(), node);
    }

    /// Add an empty group (e.g. a layer without variables).
    pub fn group(mut self, path: &str) -> Self {
        self.insert(path, Node::Group(BTreeMap::new()));
        self
    }

    pub fn f32(mut self, path: &str, shape: &[u64], data: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<u64>() as usize, data.len());
        self.insert(
            path,
            Node::Dataset {
                shape: shape.to_vec(),
                data: Data::F32(data),
            },
        );
        self
    }

    pub fn i32(mut self, path: &str, shape: &[u64], data: Vec<i32>) -> Self {
        assert_eq!(shape.iter().product::<u64>() as usize, data.len());
        self.insert(
            path,
            Node::Dataset {
                shape: shape.to_vec(),
                data: Data::I32(data),
            },
        );
        self
    }

    /// Float32 dataset with a declared shape but no storage address.
    pub fn unallocated_f32(mut self, path: &str, shape: &[u64]) -> Self {
        self.insert(
            path,
            Node::Dataset {
                shape: shape.to_vec(),
                data: Data::Unallocated,
            },
        );
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Emitter {
            buf: Vec::new(),
            style: self.style,
        };
        let superblock_len = match self.style {
            H5Style::Classic => 96,
            H5Style::Modern => 48,
        };
        out.buf.resize(superblock_len, 0);
        let root = out.group(&self.root);
        let eof = out.buf.len() as u64;

        let mut sb = Vec::new();
        sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        match self.style {
            H5Style::Classic => {
                // version, free-space, root entry, reserved, shared header
                sb.extend_from_slice(&[0, 0, 0, 0, 0]);
                sb.extend_from_slice(&[8, 8, 0]);
                sb.extend_from_slice(&4u16.to_le_bytes());
                sb.extend_from_slice(&16u16.to_le_bytes());
                sb.extend_from_slice(&0u32.to_le_bytes());
                sb.extend_from_slice(&0u64.to_le_bytes());
                sb.extend_from_slice(&UNDEFINED.to_le_bytes());
                sb.extend_from_slice(&eof.to_le_bytes());
                sb.extend_from_slice(&UNDEFINED.to_le_bytes());
                // Root symbol table entry.
                sb.extend_from_slice(&0u64.to_le_bytes());
                sb.extend_from_slice(&root.to_le_bytes());
                sb.extend_from_slice(&0u32.to_le_bytes());
                sb.extend_from_slice(&0u32.to_le_bytes());
                sb.extend_from_slice(&[0u8; 16]);
            }
            H5Style::Modern => {
                sb.extend_from_slice(&[2, 8, 8, 0]);
                sb.extend_from_slice(&0u64.to_le_bytes());
                sb.extend_from_slice(&UNDEFINED.to_le_bytes());
                sb.extend_from_slice(&eof.to_le_bytes());
                sb.extend_from_slice(&root.to_le_bytes());
                sb.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        assert_eq!(sb.len(), superblock_len);
        out.buf[..superblock_len].copy_from_slice(&sb);
        out.buf
    }
}

struct Emitter {
    buf: Vec<u8>,
    style: H5Style,
}

fn pad8(mut body: Vec<u8>) -> Vec<u8> {
    while body.len() % 8 != 0 {
        body.push(0);
    }
    body
}

impl Emitter {
    fn align(&mut self) -> u64 {
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
        self.buf.len() as u64
    }

    fn append(&mut self, bytes: &[u8]) -> u64 {
        let address = self.align();
        self.buf.extend_from_slice(bytes);
        address
    }

    /// Write an object header holding `messages` and return its address.
    fn object_header(&mut self, messages: Vec<(u16, Vec<u8>)>) -> u64 {
        let mut header = Vec::new();
        match self.style {
            H5Style::Classic => {
                let mut body = Vec::new();
                for (kind, msg) in &messages {
                    let msg = pad8(msg.clone());
                    body.extend_from_slice(&kind.to_le_bytes());
                    body.extend_from_slice(&(msg.len() as u16).to_le_bytes());
                    body.extend_from_slice(&[0, 0, 0, 0]);
                    body.extend_from_slice(&msg);
                }
                header.push(1);
                header.push(0);
                header.extend_from_slice(&(messages.len() as u16).to_le_bytes());
                header.extend_from_slice(&1u32.to_le_bytes());
                header.extend_from_slice(&(body.len() as u32).to_le_bytes());
                header.extend_from_slice(&[0u8; 4]);
                header.extend_from_slice(&body);
            }
            H5Style::Modern => {
                let mut body = Vec::new();
                for (kind, msg) in &messages {
                    body.push(*kind as u8);
                    body.extend_from_slice(&(msg.len() as u16).to_le_bytes());
                    body.push(0);
                    body.extend_from_slice(msg);
                }
                header.extend_from_slice(b"OHDR");
                // version 2, flags: 4-byte chunk size
                header.extend_from_slice(&[2, 0x02]);
                header.extend_from_slice(&(body.len() as u32).to_le_bytes());
                header.extend_from_slice(&body);
                // Checksum is not verified by the reader.
                header.extend_from_slice(&[0u8; 4]);
            }
        }
        self.append(&header)
    }

    fn group(&mut self, children: &BTreeMap<String, Node>) -> u64 {
        let mut members = Vec::new();
        for (name, child) in children {
            let address = match child {
                Node::Group(grandchildren) => self.group(grandchildren),
                Node::Dataset { shape, data } => self.dataset(shape, data),
            };
            members.push((name.clone(), address));
        }
        match self.style {
            H5Style::Classic => self.symbol_table_group(&members),
            H5Style::Modern => {
                let messages = if members.is_empty() {
                    // Link info: version 0, no flags, no fractal heap, no name index.
                    let mut info = vec![0, 0];
                    info.extend_from_slice(&UNDEFINED.to_le_bytes());
                    info.extend_from_slice(&UNDEFINED.to_le_bytes());
                    vec![(0x0002, info)]
                } else {
                    members
                        .iter()
                        .map(|(name, address)| {
                            let mut link = vec![1, 0, name.len() as u8];
                            link.extend_from_slice(name.as_bytes());
                            link.extend_from_slice(&address.to_le_bytes());
                            (0x0006, link)
                        })
                        .collect()
                };
                self.object_header(messages)
            }
        }
    }

    fn symbol_table_group(&mut self, members: &[(String, u64)]) -> u64 {
        // Local heap data: empty string at offset 0, then the names.
        let mut heap_data = vec![0u8; 8];
        let mut offsets = Vec::new();
        for (name, _) in members {
            offsets.push(heap_data.len() as u64);
            heap_data.extend_from_slice(name.as_bytes());
            heap_data.push(0);
            heap_data = pad8(heap_data);
        }
        let heap_data_address = self.append(&heap_data);

        let mut heap = Vec::new();
        heap.extend_from_slice(b"HEAP");
        heap.extend_from_slice(&[0, 0, 0, 0]);
        heap.extend_from_slice(&(heap_data.len() as u64).to_le_bytes());
        heap.extend_from_slice(&UNDEFINED.to_le_bytes());
        heap.extend_from_slice(&heap_data_address.to_le_bytes());
        let heap_address = self.append(&heap);

        let mut snod = Vec::new();
        snod.extend_from_slice(b"SNOD");
        snod.extend_from_slice(&[1, 0]);
        snod.extend_from_slice(&(members.len() as u16).to_le_bytes());
        for ((_, address), offset) in members.iter().zip(&offsets) {
            snod.extend_from_slice(&offset.to_le_bytes());
            snod.extend_from_slice(&address.to_le_bytes());
            snod.extend_from_slice(&0u32.to_le_bytes());
            snod.extend_from_slice(&0u32.to_le_bytes());
            snod.extend_from_slice(&[0u8; 16]);
        }
        let snod_address = self.append(&snod);

        let mut tree = Vec::new();
        tree.extend_from_slice(b"TREE");
        tree.extend_from_slice(&[0, 0]);
        tree.extend_from_slice(&1u16.to_le_bytes());
        tree.extend_from_slice(&UNDEFINED.to_le_bytes());
        tree.extend_from_slice(&UNDEFINED.to_le_bytes());
        tree.extend_from_slice(&0u64.to_le_bytes());
        tree.extend_from_slice(&snod_address.to_le_bytes());
        tree.extend_from_slice(&offsets.last().copied().unwrap_or(0).to_le_bytes());
        let tree_address = self.append(&tree);

        let mut table = Vec::new();
        table.extend_from_slice(&tree_address.to_le_bytes());
        table.extend_from_slice(&heap_address.to_le_bytes());
        self.object_header(vec![(0x0011, table)])
    }

    fn dataset(&mut self, shape: &[u64], data: &Data) -> u64 {
        let bytes: Vec<u8> = match data {
            Data::F32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Data::I32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Data::Unallocated => Vec::new(),
        };
        let data_address = match data {
            Data::Unallocated => UNDEFINED,
            _ => self.append(&bytes),
        };

        let mut space = vec![1, shape.len() as u8, 0, 0, 0, 0, 0, 0];
        for dim in shape {
            space.extend_from_slice(&dim.to_le_bytes());
        }

        let dtype = match data {
            Data::F32(_) | Data::Unallocated => {
                let mut t = vec![0x11, 0x20, 0x1f, 0x00];
                t.extend_from_slice(&4u32.to_le_bytes());
                t.extend_from_slice(&0u16.to_le_bytes());
                t.extend_from_slice(&32u16.to_le_bytes());
                t.extend_from_slice(&[23, 8, 0, 23]);
                t.extend_from_slice(&127u32.to_le_bytes());
                t
            }
            Data::I32(_) => {
                let mut t = vec![0x10, 0x08, 0x00, 0x00];
                t.extend_from_slice(&4u32.to_le_bytes());
                t.extend_from_slice(&0u16.to_le_bytes());
                t.extend_from_slice(&32u16.to_le_bytes());
                t
            }
        };

        let mut layout = vec![3, 1];
        layout.extend_from_slice(&data_address.to_le_bytes());
        layout.extend_from_slice(&(bytes.len() as u64).to_le_bytes());

        self.object_header(vec![(0x0001, space), (0x0003, dtype), (0x0008, layout)])
    }
}

// ---------------------------------------------------------------------------
// .keras archives
// ---------------------------------------------------------------------------

/// A `.keras` archive under construction.
pub struct KerasFixture {
    pub config: Value,
    pub metadata: Option<Value>,
    pub weights: Vec<u8>,
}

impl KerasFixture {
    pub fn new(config: Value, weights: Vec<u8>) -> Self {
        Self {
            config,
            metadata: Some(json!({
                "keras_version": "3.3.3",
                "date_saved": "2024-05-01@12:00:00"
            })),
            weights,
        }
    }

    pub fn write_to(&self, path: &Path) {
        let file = std::fs::File::create(path).expect("create archive");
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        zip.start_file("config.json", options).expect("start config");
        zip.write_all(&serde_json::to_vec(&self.config).unwrap())
            .expect("write config");
        if let Some(metadata) = &self.metadata {
            zip.start_file("metadata.json", options).expect("start metadata");
            zip.write_all(&serde_json::to_vec(metadata).unwrap())
                .expect("write metadata");
        }
        zip.start_file("model.weights.h5", options)
            .expect("start weights");
        zip.write_all(&self.weights).expect("write weights");
        zip.finish().expect("finish archive");
    }
}

// ---------------------------------------------------------------------------
// Model configs
// ---------------------------------------------------------------------------

pub fn dense_config(name: &str, units: usize) -> Value {
    json!({
        "module": "keras.layers",
        "class_name": "Dense",
        "config": {
            "name": name,
            "trainable": true,
            "dtype": {
                "module": "keras",
                "class_name": "DTypePolicy",
                "config": {"name": "float32"},
                "registered_name": null
            },
            "units": units,
            "activation": "relu",
            "use_bias": true
        },
        "registered_name": null,
        "build_config": {"input_shape": [null, 4]}
    })
}

pub fn sequential(layers: Vec<Value>) -> Value {
    let mut all = vec![json!({
        "module": "keras.layers",
        "class_name": "InputLayer",
        "config": {"batch_shape": [null, 4], "dtype": "float32", "name": "input_layer"},
        "registered_name": null
    })];
    all.extend(layers);
    json!({
        "module": "keras",
        "class_name": "Sequential",
        "config": {"name": "sequential", "trainable": true, "layers": all},
        "registered_name": null,
        "build_config": {"input_shape": [null, 4]}
    })
}

/// Sequential `Dense(3) -> Dense(2)` over 4 inputs.
pub fn two_dense_model(style: H5Style) -> KerasFixture {
    let weights = H5Writer::new(style)
        .f32(
            "layers/dense/vars/0",
            &[4, 3],
            (0..12).map(|i| i as f32 * 0.25 - 1.5).collect(),
        )
        .f32("layers/dense/vars/1", &[3], vec![0.1, -0.2, 0.3])
        .f32(
            "layers/dense_1/vars/0",
            &[3, 2],
            vec![1.0, -1.0, 0.5, -0.5, 2.0, 0.0],
        )
        .f32("layers/dense_1/vars/1", &[2], vec![0.0, 0.01])
        .group("optimizer/vars")
        .build();
    KerasFixture::new(
        sequential(vec![dense_config("dense", 3), dense_config("output", 2)]),
        weights,
    )
}

/// Write the two-dense fixture at `dir/asl_model.keras`.
pub fn write_two_dense_model(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("asl_model.keras");
    two_dense_model(H5Style::Classic).write_to(&path);
    path
}
