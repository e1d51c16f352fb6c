//! The portable `MTSM` structure format.
//!
//! Layout: signature, u16 version, u16 size x/y/z, one placement probability
//! byte per Y slice, the u16-counted name table, then one zlib section with
//! u16 name indices, param1 bytes and param2 bytes for every node in
//! `x + y*sx + z*sy*sx` order.

use crate::binary::{ByteReader, ByteWriter, CodecError, decompress};
use crate::coordinates::Pos;
use crate::node::Node;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const SCHEMATIC_SIGNATURE: [u8; 4] = *b"MTSM";
pub const SCHEMATIC_VERSION: u16 = 4;
/// Slice probability meaning "always place"; never stored explicitly.
pub const ALWAYS_PLACE: u8 = 127;

#[derive(Debug, Error)]
pub enum SchematicError {
    #[error("invalid schematic signature {0:?}")]
    InvalidSignature([u8; 4]),
    #[error("node refers to name index {0} outside the name table")]
    InvalidNameIndex(u16),
    #[error("schematic table holds {actual} entries for a volume of {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("schematic file error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid schematic table: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchematicSize {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl SchematicSize {
    pub fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }

    pub fn volume(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }

    pub fn contains(&self, pos: Pos) -> bool {
        (0..self.x as i64).contains(&pos.x)
            && (0..self.y as i64).contains(&pos.y)
            && (0..self.z as i64).contains(&pos.z)
    }

    pub fn index(&self, pos: Pos) -> Option<usize> {
        if !self.contains(pos) {
            return None;
        }
        let (sx, sy) = (self.x as usize, self.y as usize);
        Some(pos.x as usize + pos.y as usize * sx + pos.z as usize * sy * sx)
    }

    pub fn pos_of(&self, index: usize) -> Pos {
        let (sx, sy) = (self.x as usize, self.y as usize);
        Pos::new(
            (index % sx) as i64,
            (index / sx % sy) as i64,
            (index / (sx * sy)) as i64,
        )
    }
}

/// One node of a [`SchematicTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchematicEntry {
    pub name: String,
    pub prob: u8,
    #[serde(default)]
    pub param2: Option<u8>,
    #[serde(default)]
    pub force_place: bool,
}

/// Structured description of a schematic, indexed like the node array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchematicTable {
    pub size: SchematicSize,
    /// Sparse `(y, probability)` pairs.
    #[serde(default)]
    pub y_slice_probs: Vec<(u16, u8)>,
    pub data: Vec<SchematicEntry>,
}

impl SchematicTable {
    pub fn from_json_str(text: &str) -> Result<Self, SchematicError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schematic {
    loaded: bool,
    pub version: u16,
    size: SchematicSize,
    y_slice_probs: BTreeMap<u16, u8>,
    names: Vec<String>,
    nodes: Vec<Node>,
}

impl Schematic {
    /// An unloaded schematic; reads return nothing until data is loaded.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SchematicError> {
        let mut schematic = Self::new();
        schematic.load(data)?;
        Ok(schematic)
    }

    pub fn from_table(table: &SchematicTable) -> Result<Self, SchematicError> {
        let mut schematic = Self::new();
        schematic.serialize_schematic(table)?;
        Ok(schematic)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, SchematicError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| {
            error!("couldn't open schematic {}: {err}", path.display());
            err
        })?;
        Self::from_bytes(&data)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn size(&self) -> SchematicSize {
        self.size
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Probability byte of a Y slice, [`ALWAYS_PLACE`] unless one was stored.
    pub fn y_slice_prob(&self, y: u16) -> u8 {
        self.y_slice_probs.get(&y).copied().unwrap_or(ALWAYS_PLACE)
    }

    pub fn get_node(&self, pos: Pos) -> Option<&Node> {
        if !self.loaded {
            return None;
        }
        self.size.index(pos).and_then(|index| self.nodes.get(index))
    }

    pub fn load(&mut self, data: &[u8]) -> Result<(), SchematicError> {
        *self = Self::new();
        let mut reader = ByteReader::new(data);

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&reader.read_bytes(4)?);
        if signature != SCHEMATIC_SIGNATURE {
            error!("couldn't load schematic: invalid signature {signature:?}");
            return Err(SchematicError::InvalidSignature(signature));
        }

        let version = reader.read_u16()?;
        let size = SchematicSize::new(reader.read_u16()?, reader.read_u16()?, reader.read_u16()?);
        debug!("schematic v{version} of size ({}, {}, {})", size.x, size.y, size.z);

        let mut y_slice_probs = BTreeMap::new();
        for y in 0..size.y {
            let prob = reader.read_u8()?;
            if prob < ALWAYS_PLACE {
                y_slice_probs.insert(y, prob);
            }
        }

        let name_count = reader.read_u16()?;
        let mut names = Vec::with_capacity(name_count as usize);
        for _ in 0..name_count {
            names.push(reader.read_string_u16()?);
        }

        let bulk = decompress(reader.remaining())?;
        let mut bulk = ByteReader::new(&bulk);
        let volume = size.volume();
        let mut nodes = Vec::with_capacity(volume);
        for index in 0..volume {
            let name_index = bulk.read_u16()?;
            let name = names
                .get(name_index as usize)
                .ok_or(SchematicError::InvalidNameIndex(name_index))?;
            nodes.push(Node::new(name.clone()).at(size.pos_of(index)));
        }
        for node in nodes.iter_mut() {
            node.param1 = bulk.read_u8()?;
        }
        for node in nodes.iter_mut() {
            node.param2 = bulk.read_u8()?;
        }

        *self = Self {
            loaded: true,
            version,
            size,
            y_slice_probs,
            names,
            nodes,
        };
        Ok(())
    }

    /// Binary form of the schematic, or `None` when nothing is loaded.
    pub fn export(&self) -> Result<Option<Vec<u8>>, SchematicError> {
        if !self.loaded {
            return Ok(None);
        }

        let mut names = self.names.clone();
        let mut indices: HashMap<&str, u16> = HashMap::new();
        for (index, name) in self.names.iter().enumerate() {
            indices.entry(name.as_str()).or_insert(index as u16);
        }
        for node in &self.nodes {
            if !indices.contains_key(node.itemstring.as_str()) {
                let id = u16::try_from(names.len()).map_err(|_| CodecError::TooLong {
                    len: names.len() + 1,
                    width: 16,
                })?;
                indices.insert(node.itemstring.as_str(), id);
                names.push(node.itemstring.clone());
            }
        }

        let mut out = ByteWriter::new();
        out.write_bytes(&SCHEMATIC_SIGNATURE);
        out.write_u16(self.version);
        out.write_u16(self.size.x);
        out.write_u16(self.size.y);
        out.write_u16(self.size.z);
        for y in 0..self.size.y {
            out.write_u8(self.y_slice_prob(y));
        }
        out.write_len_u16(names.len())?;
        for name in &names {
            out.write_string_u16(name)?;
        }

        let mut bulk = ByteWriter::with_capacity(self.nodes.len() * 4);
        for node in &self.nodes {
            bulk.write_u16(indices[node.itemstring.as_str()]);
        }
        for node in &self.nodes {
            bulk.write_u8(node.param1);
        }
        for node in &self.nodes {
            bulk.write_u8(node.param2);
        }
        out.write_compressed(&bulk.into_inner())?;

        Ok(Some(out.into_inner()))
    }

    /// Writes the binary form to `path`; returns `false` when nothing is loaded.
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<bool, SchematicError> {
        let Some(bytes) = self.export()? else {
            return Ok(false);
        };
        fs::write(path, bytes)?;
        Ok(true)
    }

    /// Builds the schematic from a structured table. Entries without
    /// `force_place` get half their probability as param1. Slice
    /// probabilities of 127 and above mean "always place" and are dropped.
    pub fn serialize_schematic(&mut self, table: &SchematicTable) -> Result<(), SchematicError> {
        let expected = table.size.volume();
        if table.data.len() != expected {
            return Err(SchematicError::SizeMismatch {
                expected,
                actual: table.data.len(),
            });
        }

        let mut names: Vec<String> = Vec::new();
        let mut nodes = Vec::with_capacity(expected);
        for (index, entry) in table.data.iter().enumerate() {
            if !names.contains(&entry.name) {
                names.push(entry.name.clone());
            }
            let param1 = if entry.force_place {
                entry.prob
            } else {
                entry.prob / 2
            };
            let param2 = entry.param2.unwrap_or(0);
            nodes.push(Node::with_params(entry.name.clone(), param1, param2).at(table.size.pos_of(index)));
        }

        *self = Self {
            loaded: true,
            version: SCHEMATIC_VERSION,
            size: table.size,
            y_slice_probs: table
                .y_slice_probs
                .iter()
                .copied()
                .filter(|&(y, prob)| y < table.size.y && prob < ALWAYS_PLACE)
                .collect(),
            names,
            nodes,
        };
        Ok(())
    }
}
