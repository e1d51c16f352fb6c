use crate::binary::{ByteReader, ByteWriter, CodecError, latin1_encode};
use crate::coordinates::{
    BLOCK_SIZE, BlockKey, NODES_PER_BLOCK, Pos, block_coord_from_id, block_origin,
    from_local_index,
};
use crate::inventory::{InvRef, InventoryError};
use crate::metadata::NodeMetaRef;
use crate::node::{AIR, Node, NodeTimerRef};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Format revision written by [`MapBlock::serialize`].
pub const SERIALIZATION_VERSION: u8 = 25;
/// Last revision that stores metadata in the typed legacy layout.
pub const LEGACY_METADATA_VERSION: u8 = 22;
/// Only this revision carries the node timer section.
pub const TIMERS_VERSION: u8 = 25;

pub const IS_UNDERGROUND: u8 = 0x01;
pub const DAY_NIGHT_DIFFERS: u8 = 0x02;
pub const LIGHTING_EXPIRED: u8 = 0x04;
pub const GENERATED: u8 = 0x08;

const CONTENT_WIDTH: u8 = 2;
const PARAMS_WIDTH: u8 = 2;
const METADATA_VERSION: u8 = 1;
const TIMER_RECORD_LEN: u8 = 10;
const STATIC_POS_SCALE: f64 = 10_000.0;
const TIMER_SCALE: f64 = 1_000.0;

const LEGACY_GENERIC: u16 = 1;
const LEGACY_SIGN: u16 = 14;
const LEGACY_CHEST: u16 = 15;
const LEGACY_FURNACE: u16 = 16;
const LEGACY_LOCKED_CHEST: u16 = 17;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("node data has {actual} bytes, expected {expected}")]
    InvalidParamLength { expected: usize, actual: usize },
    #[error("unknown metadata type id {0}")]
    UnknownMetadataType(u16),
    #[error("content id {0} missing from the name-id table")]
    UnknownContentId(u16),
    #[error("local index {0} is outside the block")]
    OutOfBounds(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticObject {
    pub kind: u8,
    /// Absolute position in nodes.
    pub pos: [f64; 3],
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct MapBlock {
    key: BlockKey,
    coord: Pos,
    pub version: u8,
    pub flags: u8,
    pub content_width: u8,
    pub params_width: u8,
    nodes: Vec<Node>,
    // Both maps are keyed by local index.
    node_meta: BTreeMap<usize, NodeMetaRef>,
    node_timers: BTreeMap<usize, NodeTimerRef>,
    pub static_object_version: u8,
    pub static_objects: Vec<StaticObject>,
    pub timestamp: u32,
    pub name_id_mapping_version: u8,
    name_id_mappings: Vec<String>,
}

impl MapBlock {
    /// A generated block filled with air.
    pub fn new(key: BlockKey) -> Self {
        let coord = block_coord_from_id(key);
        let origin = block_origin(coord);
        let nodes = (0..NODES_PER_BLOCK)
            .map(|index| Node::air().at(origin + local_pos(index)))
            .collect::<Vec<_>>();
        let name_id_mappings = rebuild_name_table(&nodes);

        Self {
            key,
            coord,
            version: SERIALIZATION_VERSION,
            flags: GENERATED,
            content_width: CONTENT_WIDTH,
            params_width: PARAMS_WIDTH,
            nodes,
            node_meta: BTreeMap::new(),
            node_timers: BTreeMap::new(),
            static_object_version: 0,
            static_objects: Vec::new(),
            timestamp: 0,
            name_id_mapping_version: 0,
            name_id_mappings,
        }
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn coord(&self) -> Pos {
        self.coord
    }

    pub fn origin(&self) -> Pos {
        block_origin(self.coord)
    }

    pub fn check_index(index: usize) -> Result<(), BlockError> {
        if index >= NODES_PER_BLOCK {
            return Err(BlockError::OutOfBounds(index));
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get_node(&self, index: usize) -> Result<&Node, BlockError> {
        Self::check_index(index)?;
        Ok(&self.nodes[index])
    }

    /// Replaces the node and drops any metadata or timer left at that index.
    pub fn set_node(&mut self, index: usize, mut node: Node) -> Result<(), BlockError> {
        Self::check_index(index)?;
        self.node_meta.remove(&index);
        self.node_timers.remove(&index);

        node.pos = self.origin() + local_pos(index);
        if !self.name_id_mappings.contains(&node.itemstring) {
            self.name_id_mappings.push(node.itemstring.clone());
        }
        self.nodes[index] = node;
        Ok(())
    }

    pub fn remove_node(&mut self, index: usize) -> Result<(), BlockError> {
        self.set_node(index, Node::air())
    }

    pub fn get_meta(&self, index: usize) -> Result<Option<&NodeMetaRef>, BlockError> {
        Self::check_index(index)?;
        Ok(self.node_meta.get(&index))
    }

    pub fn meta_mut(&mut self, index: usize) -> Result<&mut NodeMetaRef, BlockError> {
        Self::check_index(index)?;
        Ok(self.node_meta.entry(index).or_default())
    }

    pub fn set_meta(&mut self, index: usize, meta: NodeMetaRef) -> Result<(), BlockError> {
        Self::check_index(index)?;
        if meta.is_empty() {
            self.node_meta.remove(&index);
        } else {
            self.node_meta.insert(index, meta);
        }
        Ok(())
    }

    pub fn metadata(&self) -> impl Iterator<Item = (usize, &NodeMetaRef)> {
        self.node_meta.iter().map(|(&index, meta)| (index, meta))
    }

    pub fn get_timer(&self, index: usize) -> Result<Option<&NodeTimerRef>, BlockError> {
        Self::check_index(index)?;
        Ok(self.node_timers.get(&index))
    }

    pub fn set_timer(&mut self, index: usize, mut timer: NodeTimerRef) -> Result<(), BlockError> {
        Self::check_index(index)?;
        timer.pos = self.origin() + local_pos(index);
        self.node_timers.insert(index, timer);
        Ok(())
    }

    pub fn remove_timer(&mut self, index: usize) -> Result<Option<NodeTimerRef>, BlockError> {
        Self::check_index(index)?;
        Ok(self.node_timers.remove(&index))
    }

    pub fn timers(&self) -> impl Iterator<Item = (usize, &NodeTimerRef)> {
        self.node_timers.iter().map(|(&index, timer)| (index, timer))
    }

    pub fn name_id_mappings(&self) -> &[String] {
        &self.name_id_mappings
    }

    pub fn is_underground(&self) -> bool {
        self.flags & IS_UNDERGROUND != 0
    }

    pub fn day_night_differs(&self) -> bool {
        self.flags & DAY_NIGHT_DIFFERS != 0
    }

    pub fn lighting_expired(&self) -> bool {
        self.flags & LIGHTING_EXPIRED != 0
    }

    pub fn is_generated(&self) -> bool {
        self.flags & GENERATED != 0
    }

    pub fn deserialize(data: &[u8], key: BlockKey) -> Result<Self, BlockError> {
        let coord = block_coord_from_id(key);
        let origin = block_origin(coord);
        let mut reader = ByteReader::new(data);

        let version = reader.read_u8()?;
        let flags = reader.read_u8()?;
        let content_width = reader.read_u8()?;
        let params_width = reader.read_u8()?;
        debug!("decoding block {key} at {coord}: version {version}, {} bytes", data.len());

        let bulk = reader.read_compressed()?;
        let (content_ids, param1, param2) = split_node_bulk(&bulk, content_width)?;

        let meta_section = reader.read_compressed()?;
        let mut meta_reader = ByteReader::new(&meta_section);
        let node_meta = if version <= LEGACY_METADATA_VERSION {
            read_legacy_metadata(&mut meta_reader)?
        } else {
            read_metadata(&mut meta_reader)?
        };

        let static_object_version = reader.read_u8()?;
        let static_count = reader.read_u16()?;
        let mut static_objects = Vec::with_capacity(static_count as usize);
        for _ in 0..static_count {
            let kind = reader.read_u8()?;
            let x = reader.read_i32()? as f64 / STATIC_POS_SCALE + origin.x as f64;
            let y = reader.read_i32()? as f64 / STATIC_POS_SCALE + origin.y as f64;
            let z = reader.read_i32()? as f64 / STATIC_POS_SCALE + origin.z as f64;
            let data = reader.read_blob_u16()?;
            static_objects.push(StaticObject {
                kind,
                pos: [x, y, z],
                data,
            });
        }

        let timestamp = reader.read_u32()?;

        let name_id_mapping_version = reader.read_u8()?;
        let mapping_count = reader.read_u16()?;
        let mut names_by_id = HashMap::with_capacity(mapping_count as usize);
        for _ in 0..mapping_count {
            let id = reader.read_u16()?;
            let name = reader.read_string_u16()?;
            names_by_id.insert(id, name);
        }

        let mut node_timers = BTreeMap::new();
        if version == TIMERS_VERSION {
            let _record_len = reader.read_u8()?;
            let timer_count = reader.read_u16()?;
            for _ in 0..timer_count {
                let index = reader.read_u16()? as usize;
                Self::check_index(index)?;
                let timeout = reader.read_i32()? as f64 / TIMER_SCALE;
                let elapsed = reader.read_i32()? as f64 / TIMER_SCALE;
                let mut timer = NodeTimerRef::new(origin + local_pos(index), timeout, elapsed);
                timer.active = true;
                node_timers.insert(index, timer);
            }
        }

        let mut nodes = Vec::with_capacity(NODES_PER_BLOCK);
        for index in 0..NODES_PER_BLOCK {
            let id = content_ids[index];
            let name = names_by_id
                .get(&id)
                .ok_or(BlockError::UnknownContentId(id))?;
            nodes.push(
                Node::with_params(name.clone(), param1[index], param2[index])
                    .at(origin + local_pos(index)),
            );
        }
        let mut ids: Vec<_> = names_by_id.into_iter().collect();
        ids.sort_by_key(|(id, _)| *id);
        let name_id_mappings = ids.into_iter().map(|(_, name)| name).collect();

        Ok(Self {
            key,
            coord,
            version,
            flags,
            content_width,
            params_width,
            nodes,
            node_meta,
            node_timers,
            static_object_version,
            static_objects,
            timestamp,
            name_id_mapping_version,
            name_id_mappings,
        })
    }

    /// Encodes the block in the current format revision. The name-id table
    /// is rebuilt from the nodes first, so ids are reassigned on every call.
    pub fn serialize(&mut self) -> Result<Vec<u8>, BlockError> {
        self.version = SERIALIZATION_VERSION;
        self.content_width = CONTENT_WIDTH;
        self.params_width = PARAMS_WIDTH;
        self.name_id_mappings = rebuild_name_table(&self.nodes);
        self.node_meta.retain(|_, meta| !meta.is_empty());

        let mut out = ByteWriter::with_capacity(NODES_PER_BLOCK);
        out.write_u8(self.version);
        out.write_u8(self.flags);
        out.write_u8(self.content_width);
        out.write_u8(self.params_width);

        let ids: HashMap<&str, u16> = self
            .name_id_mappings
            .iter()
            .enumerate()
            .map(|(id, name)| (name.as_str(), id as u16))
            .collect();
        let mut bulk = ByteWriter::with_capacity(NODES_PER_BLOCK * 4);
        for node in &self.nodes {
            bulk.write_u16(ids[node.itemstring.as_str()]);
        }
        for node in &self.nodes {
            bulk.write_u8(node.param1);
        }
        for node in &self.nodes {
            bulk.write_u8(node.param2);
        }
        out.write_compressed(&bulk.into_inner())?;

        let mut meta = ByteWriter::new();
        meta.write_u8(METADATA_VERSION);
        meta.write_len_u16(self.node_meta.len())?;
        for (&index, entry) in &self.node_meta {
            meta.write_u16(index as u16);
            meta.write_u32(entry.to_table().len() as u32);
            for (key, value) in entry.to_table() {
                meta.write_string_u16(key)?;
                meta.write_blob_u32(value)?;
            }
            meta.write_bytes(&latin1_encode(&entry.get_inventory().to_serialized_text())?);
        }
        out.write_compressed(&meta.into_inner())?;

        let origin = self.origin();
        out.write_u8(self.static_object_version);
        out.write_len_u16(self.static_objects.len())?;
        for object in &self.static_objects {
            out.write_u8(object.kind);
            let offsets = [
                object.pos[0] - origin.x as f64,
                object.pos[1] - origin.y as f64,
                object.pos[2] - origin.z as f64,
            ];
            for offset in offsets {
                out.write_i32((offset * STATIC_POS_SCALE).round() as i32);
            }
            out.write_blob_u16(&object.data)?;
        }

        out.write_u32(self.timestamp);

        out.write_u8(self.name_id_mapping_version);
        out.write_len_u16(self.name_id_mappings.len())?;
        for (id, name) in self.name_id_mappings.iter().enumerate() {
            out.write_u16(id as u16);
            out.write_string_u16(name)?;
        }

        out.write_u8(TIMER_RECORD_LEN);
        out.write_len_u16(self.node_timers.len())?;
        for (&index, timer) in &self.node_timers {
            out.write_u16(index as u16);
            out.write_i32((timer.timeout * TIMER_SCALE).round() as i32);
            out.write_i32((timer.elapsed * TIMER_SCALE).round() as i32);
        }

        let bytes = out.into_inner();
        debug!("encoded block {} into {} bytes", self.key, bytes.len());
        Ok(bytes)
    }
}

/// Distinct itemstrings of `nodes` in first-seen order; a node's content id
/// is its name's position in this table.
pub fn rebuild_name_table(nodes: &[Node]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for node in nodes {
        if seen.insert(node.itemstring.as_str()) {
            names.push(node.itemstring.clone());
        }
    }
    names
}

fn local_pos(index: usize) -> Pos {
    from_local_index(index, BLOCK_SIZE as usize)
}

fn split_node_bulk(
    bulk: &[u8],
    content_width: u8,
) -> Result<(Vec<u16>, Vec<u8>, Vec<u8>), BlockError> {
    let id_width = if content_width == 1 { 1 } else { 2 };
    let expected = NODES_PER_BLOCK * (id_width + 2);
    if bulk.len() != expected {
        return Err(BlockError::InvalidParamLength {
            expected,
            actual: bulk.len(),
        });
    }

    let mut reader = ByteReader::new(bulk);
    let mut content_ids = Vec::with_capacity(NODES_PER_BLOCK);
    for _ in 0..NODES_PER_BLOCK {
        let id = if id_width == 1 {
            reader.read_u8()? as u16
        } else {
            reader.read_u16()?
        };
        content_ids.push(id);
    }
    let param1 = reader.read_bytes(NODES_PER_BLOCK)?;
    let param2 = reader.read_bytes(NODES_PER_BLOCK)?;
    Ok((content_ids, param1, param2))
}

fn read_meta_index(reader: &mut ByteReader<'_>) -> Result<usize, BlockError> {
    let index = reader.read_u16()? as usize;
    MapBlock::check_index(index)?;
    Ok(index)
}

fn read_variables(
    reader: &mut ByteReader<'_>,
    meta: &mut NodeMetaRef,
) -> Result<(), BlockError> {
    let count = reader.read_u32()?;
    for _ in 0..count {
        let key = reader.read_string_u16()?;
        let value = reader.read_blob_u32()?;
        meta.set_raw(key, value);
    }
    Ok(())
}

fn read_metadata(reader: &mut ByteReader<'_>) -> Result<BTreeMap<usize, NodeMetaRef>, BlockError> {
    let mut node_meta = BTreeMap::new();
    let meta_version = reader.read_u8()?;
    if meta_version == 0 {
        return Ok(node_meta);
    }

    let count = reader.read_u16()?;
    for _ in 0..count {
        let index = read_meta_index(reader)?;
        let mut meta = NodeMetaRef::new();
        read_variables(reader, &mut meta)?;
        meta.set_inventory(InvRef::read_from(reader)?);
        node_meta.insert(index, meta);
    }
    Ok(node_meta)
}

fn read_legacy_metadata(
    reader: &mut ByteReader<'_>,
) -> Result<BTreeMap<usize, NodeMetaRef>, BlockError> {
    let mut node_meta = BTreeMap::new();
    let _meta_version = reader.read_u16()?;
    let count = reader.read_u16()?;

    for _ in 0..count {
        let index = read_meta_index(reader)?;
        let type_id = reader.read_u16()?;
        let _declared = reader.read_blob_u16()?;
        let mut meta = NodeMetaRef::new();

        match type_id {
            LEGACY_GENERIC => {
                meta.set_inventory(InvRef::read_from(reader)?);
                meta.set_raw("text", reader.read_blob_u32()?);
                meta.set_raw("owner", reader.read_blob_u16()?);
                meta.set_raw("infotext", reader.read_blob_u16()?);
                meta.set_raw("formspec", reader.read_blob_u16()?);
                meta.set_raw("allow_text_input", vec![reader.read_u8()?]);
                meta.set_raw("removal_disabled", vec![reader.read_u8()?]);
                meta.set_raw("enforce_owner", vec![reader.read_u8()?]);
                read_variables(reader, &mut meta)?;
            }
            LEGACY_SIGN => {
                meta.set_raw("text", reader.read_blob_u16()?);
            }
            LEGACY_CHEST | LEGACY_FURNACE => {
                meta.set_inventory(InvRef::read_from(reader)?);
            }
            LEGACY_LOCKED_CHEST => {
                meta.set_raw("owner", reader.read_blob_u16()?);
                meta.set_inventory(InvRef::read_from(reader)?);
            }
            other => return Err(BlockError::UnknownMetadataType(other)),
        }

        node_meta.insert(index, meta);
    }
    Ok(node_meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::compress;
    use crate::coordinates::block_id;
    use crate::inventory::ItemStack;

    fn chest_inventory() -> InvRef {
        let mut inv = InvRef::new();
        inv.set_list(
            "main",
            vec![
                ItemStack::from_fields("default:cobble", 99),
                ItemStack::empty(),
            ],
        );
        inv
    }

    fn encoded_tail(names: &[&str], timers: Option<&[(u16, i32, i32)]>) -> Vec<u8> {
        let mut out = ByteWriter::new();
        out.write_u8(0);
        out.write_u16(0);
        out.write_u32(1234);
        out.write_u8(0);
        out.write_u16(names.len() as u16);
        for (id, name) in names.iter().enumerate() {
            out.write_u16(id as u16);
            out.write_string_u16(name).unwrap();
        }
        if let Some(timers) = timers {
            out.write_u8(10);
            out.write_u16(timers.len() as u16);
            for &(index, timeout, elapsed) in timers {
                out.write_u16(index);
                out.write_i32(timeout);
                out.write_i32(elapsed);
            }
        }
        out.into_inner()
    }

    fn raw_block(version: u8, metadata: &[u8], timers: Option<&[(u16, i32, i32)]>) -> Vec<u8> {
        let mut bulk = vec![0u8; NODES_PER_BLOCK * 4];
        // Node 1 uses content id 1.
        bulk[3] = 1;
        let mut out = ByteWriter::new();
        out.write_u8(version);
        out.write_u8(GENERATED);
        out.write_u8(2);
        out.write_u8(2);
        out.write_bytes(&compress(&bulk).unwrap());
        out.write_bytes(&compress(metadata).unwrap());
        out.write_bytes(&encoded_tail(&["air", "default:chest"], timers));
        out.into_inner()
    }

    fn legacy_metadata() -> Vec<u8> {
        let inventory = chest_inventory().to_serialized_text();
        let mut meta = ByteWriter::new();
        meta.write_u16(1);
        meta.write_u16(3);

        meta.write_u16(1);
        meta.write_u16(LEGACY_LOCKED_CHEST);
        meta.write_blob_u16(&[]).unwrap();
        meta.write_blob_u16(b"singleplayer").unwrap();
        meta.write_bytes(inventory.as_bytes());

        meta.write_u16(2);
        meta.write_u16(LEGACY_SIGN);
        meta.write_blob_u16(&[]).unwrap();
        meta.write_blob_u16(b"hello").unwrap();

        meta.write_u16(3);
        meta.write_u16(LEGACY_GENERIC);
        meta.write_blob_u16(&[]).unwrap();
        meta.write_bytes(inventory.as_bytes());
        meta.write_blob_u32(b"text body").unwrap();
        meta.write_blob_u16(b"singleplayer").unwrap();
        meta.write_blob_u16(b"Generic").unwrap();
        meta.write_blob_u16(b"size[8,9]").unwrap();
        meta.write_u8(1);
        meta.write_u8(0);
        meta.write_u8(1);
        meta.write_u32(1);
        meta.write_string_u16("color").unwrap();
        meta.write_blob_u32(b"red").unwrap();
        meta.into_inner()
    }

    fn modern_metadata() -> Vec<u8> {
        let mut meta = ByteWriter::new();
        meta.write_u8(1);
        meta.write_u16(1);
        meta.write_u16(1);
        meta.write_u32(1);
        meta.write_string_u16("owner").unwrap();
        meta.write_blob_u32(b"singleplayer").unwrap();
        meta.write_bytes(chest_inventory().to_serialized_text().as_bytes());
        meta.into_inner()
    }

    #[test]
    fn fresh_block_is_air() {
        let block = MapBlock::new(0);
        assert!(block.nodes().iter().all(|node| node.itemstring == AIR));
        assert_eq!(block.name_id_mappings(), &["air".to_string()]);
        assert!(block.is_generated());
        assert!(!block.is_underground());
    }

    #[test]
    fn index_outside_block_is_rejected() {
        let mut block = MapBlock::new(0);
        assert!(matches!(block.get_node(4096), Err(BlockError::OutOfBounds(4096))));
        assert!(matches!(
            block.set_node(5000, Node::air()),
            Err(BlockError::OutOfBounds(5000))
        ));
        assert!(block.get_meta(4095).unwrap().is_none());
    }

    #[test]
    fn round_trip_preserves_nodes_meta_objects_and_timers() {
        let key = block_id(Pos::new(-3, 2, 7));
        let mut block = MapBlock::new(key);
        let mut rng = fastrand::Rng::with_seed(11);
        let names = ["default:stone", "default:dirt", "default:water_source", "air"];
        for index in 0..NODES_PER_BLOCK {
            let name = names[rng.usize(..names.len())];
            block
                .set_node(index, Node::with_params(name, rng.u8(..), rng.u8(..)))
                .unwrap();
        }

        let meta = block.meta_mut(17).unwrap();
        meta.set_string("infotext", "Locked Chest").unwrap();
        meta.set_inventory(chest_inventory());
        block.set_timer(40, NodeTimerRef::new(Pos::ORIGIN, 2.5, 0.75)).unwrap();
        let origin = block.origin();
        block.static_objects.push(StaticObject {
            kind: 7,
            pos: [
                origin.x as f64 + 3.25,
                origin.y as f64 + 0.5,
                origin.z as f64 - 0.125,
            ],
            data: b"__builtin:item".to_vec(),
        });
        block.timestamp = 99;

        let bytes = block.serialize().unwrap();
        let decoded = MapBlock::deserialize(&bytes, key).unwrap();

        for index in 0..NODES_PER_BLOCK {
            assert_eq!(decoded.get_node(index).unwrap(), block.get_node(index).unwrap());
        }
        assert_eq!(
            decoded.metadata().collect::<Vec<_>>(),
            block.metadata().collect::<Vec<_>>()
        );
        let timer = decoded.get_timer(40).unwrap().unwrap();
        assert_eq!((timer.timeout, timer.elapsed), (2.5, 0.75));
        assert_eq!(decoded.static_objects.len(), 1);
        for axis in 0..3 {
            let delta = decoded.static_objects[0].pos[axis] - block.static_objects[0].pos[axis];
            assert!(delta.abs() < 1e-4);
        }
        assert_eq!(decoded.static_objects[0].data, b"__builtin:item");
        assert_eq!(decoded.timestamp, 99);
        assert_eq!(decoded.version, SERIALIZATION_VERSION);
    }

    #[test]
    fn oversized_object_data_fails_instead_of_clipping() {
        let mut block = MapBlock::new(0);
        block.static_objects.push(StaticObject {
            kind: 7,
            pos: [1.0, 2.0, 3.0],
            data: vec![b'x'; u16::MAX as usize + 1],
        });
        assert!(matches!(
            block.serialize(),
            Err(BlockError::Codec(CodecError::TooLong { width: 16, .. }))
        ));
    }

    #[test]
    fn high_byte_names_round_trip_exactly() {
        let mut block = MapBlock::new(0);
        let name = "caf\u{e9}:stone\u{ff}";
        block.set_node(9, Node::new(name)).unwrap();
        let bytes = block.serialize().unwrap();
        assert!(bytes.windows(11).any(|w| w == b"caf\xe9:stone\xff"));

        let decoded = MapBlock::deserialize(&bytes, 0).unwrap();
        assert_eq!(decoded.get_node(9).unwrap().itemstring, name);

        block.set_node(10, Node::new("snow\u{2603}")).unwrap();
        assert!(matches!(
            block.serialize(),
            Err(BlockError::Codec(CodecError::NotLatin1(_)))
        ));
    }

    #[test]
    fn name_table_is_rebuilt_without_stale_names() {
        let mut block = MapBlock::new(0);
        block.set_node(0, Node::new("default:mese")).unwrap();
        block.set_node(0, Node::air()).unwrap();
        assert!(block.name_id_mappings().contains(&"default:mese".to_string()));

        let bytes = block.serialize().unwrap();
        assert_eq!(block.name_id_mappings(), &["air".to_string()]);
        let decoded = MapBlock::deserialize(&bytes, 0).unwrap();
        assert_eq!(decoded.name_id_mappings(), &["air".to_string()]);
    }

    #[test]
    fn set_node_drops_meta_and_timer() {
        let mut block = MapBlock::new(0);
        block.meta_mut(5).unwrap().set_int("count", 3);
        block.set_timer(5, NodeTimerRef::new(Pos::ORIGIN, 1.0, 0.0)).unwrap();
        block.set_node(5, Node::new("default:furnace")).unwrap();
        assert!(block.get_meta(5).unwrap().is_none());
        assert!(block.get_timer(5).unwrap().is_none());
    }

    #[test]
    fn nodes_carry_absolute_positions() {
        let key = block_id(Pos::new(-1, 0, 2));
        let block = MapBlock::new(key);
        assert_eq!(block.get_node(0).unwrap().pos, Pos::new(-16, 0, 32));
        assert_eq!(block.get_node(4095).unwrap().pos, Pos::new(-1, 15, 47));
    }

    #[test]
    fn legacy_and_modern_metadata_expose_the_same_contract() {
        let legacy = MapBlock::deserialize(&raw_block(22, &legacy_metadata(), None), 0).unwrap();
        let modern = MapBlock::deserialize(
            &raw_block(25, &modern_metadata(), Some(&[(1, 3000, 500)])),
            0,
        )
        .unwrap();

        for block in [&legacy, &modern] {
            let meta = block.get_meta(1).unwrap().unwrap();
            assert_eq!(meta.get_raw("owner"), Some(&b"singleplayer"[..]));
            assert_eq!(meta.get_inventory(), &chest_inventory());
            assert_eq!(block.get_node(1).unwrap().itemstring, "default:chest");
            assert_eq!(block.timestamp, 1234);
        }

        assert_eq!(
            legacy.get_meta(2).unwrap().unwrap().get_string("text").as_deref(),
            Some("hello")
        );
        let generic = legacy.get_meta(3).unwrap().unwrap();
        assert_eq!(generic.get_raw("formspec"), Some(&b"size[8,9]"[..]));
        assert_eq!(generic.get_raw("enforce_owner"), Some(&[1u8][..]));
        assert_eq!(generic.get_raw("color"), Some(&b"red"[..]));
        assert_eq!(generic.get_inventory(), &chest_inventory());

        assert!(legacy.timers().next().is_none());
        let timer = modern.get_timer(1).unwrap().unwrap();
        assert_eq!((timer.timeout, timer.elapsed), (3.0, 0.5));
    }

    #[test]
    fn legacy_block_reencodes_as_current_format() {
        let mut legacy =
            MapBlock::deserialize(&raw_block(22, &legacy_metadata(), None), 0).unwrap();
        let bytes = legacy.serialize().unwrap();
        assert_eq!(bytes[0], SERIALIZATION_VERSION);
        let decoded = MapBlock::deserialize(&bytes, 0).unwrap();
        assert_eq!(
            decoded.get_meta(3).unwrap(),
            legacy.get_meta(3).unwrap()
        );
    }

    #[test]
    fn modern_metadata_version_zero_is_empty() {
        let block = MapBlock::deserialize(&raw_block(25, &[0], Some(&[])), 0).unwrap();
        assert!(block.metadata().next().is_none());
    }

    #[test]
    fn unknown_legacy_metadata_type_is_fatal() {
        let mut meta = ByteWriter::new();
        meta.write_u16(1);
        meta.write_u16(1);
        meta.write_u16(0);
        meta.write_u16(42);
        meta.write_blob_u16(&[]).unwrap();
        let result = MapBlock::deserialize(&raw_block(20, &meta.into_inner(), None), 0);
        assert!(matches!(result, Err(BlockError::UnknownMetadataType(42))));
    }

    #[test]
    fn short_node_data_is_invalid_param_length() {
        let mut out = ByteWriter::new();
        out.write_bytes(&[25, 0, 2, 2]);
        out.write_bytes(&compress(&[0u8; 100]).unwrap());
        let result = MapBlock::deserialize(&out.into_inner(), 0);
        assert!(matches!(
            result,
            Err(BlockError::InvalidParamLength { expected: 16384, actual: 100 })
        ));
    }

    #[test]
    fn truncated_blob_is_a_codec_error() {
        let mut block = MapBlock::new(0);
        let bytes = block.serialize().unwrap();
        let result = MapBlock::deserialize(&bytes[..bytes.len() - 4], 0);
        assert!(matches!(result, Err(BlockError::Codec(CodecError::Truncated))));
    }

    #[test]
    fn one_byte_content_ids_are_supported() {
        let mut bulk = vec![0u8; NODES_PER_BLOCK * 3];
        bulk[0] = 1;
        let mut out = ByteWriter::new();
        out.write_bytes(&[24, 0, 1, 2]);
        out.write_bytes(&compress(&bulk).unwrap());
        out.write_bytes(&compress(&[0]).unwrap());
        out.write_bytes(&encoded_tail(&["air", "default:glass"], None));
        let block = MapBlock::deserialize(&out.into_inner(), 0).unwrap();
        assert_eq!(block.get_node(0).unwrap().itemstring, "default:glass");
        assert_eq!(block.get_node(1).unwrap().itemstring, "air");
    }
}
