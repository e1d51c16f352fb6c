use crate::config::MapConfig;
use crate::coordinates::{BlockKey, Pos, block_id_of, local_index};
use crate::map_block::{BlockError, MapBlock};
use crate::metadata::{MetaError, NodeMetaRef};
use crate::node::{AIR, IGNORE, Node, NodeTimerRef};
use crate::schematic::{Schematic, SchematicEntry, SchematicError, SchematicSize, SchematicTable};
use crate::storage::{MapStore, StorageError};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Error)]
pub enum MapError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Schematic(#[from] SchematicError),
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error("cannot replace ignore content at {0}; initialize its block first")]
    IgnoreContentReplacement(Pos),
    #[error("region of size {0} does not fit in a schematic")]
    RegionTooLarge(Pos),
}

/// Block keys ordered from least to most recently touched.
#[derive(Debug, Clone, Default)]
struct KeyQueue {
    keys: VecDeque<BlockKey>,
}

impl KeyQueue {
    fn touch(&mut self, key: BlockKey) {
        self.remove(key);
        self.keys.push_back(key);
    }

    fn remove(&mut self, key: BlockKey) {
        self.keys.retain(|&k| k != key);
    }

    fn front(&self) -> Option<BlockKey> {
        self.keys.front().copied()
    }

    fn contains(&self, key: BlockKey) -> bool {
        self.keys.contains(&key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Node-level access to a stored map through a bounded cache of decoded
/// blocks. Mutated blocks stay dirty until [`MapInterface::save`] or
/// eviction writes them back; every dirty block is also loaded.
pub struct MapInterface<S: MapStore> {
    store: S,
    config: MapConfig,
    blocks: HashMap<BlockKey, MapBlock>,
    history: KeyQueue,
    dirty: KeyQueue,
}

impl<S: MapStore> MapInterface<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, MapConfig::default())
    }

    pub fn with_config(store: S, config: MapConfig) -> Self {
        Self {
            store,
            config,
            blocks: HashMap::new(),
            history: KeyQueue::default(),
            dirty: KeyQueue::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Flushes pending writes and hands back the store.
    pub fn into_store(mut self) -> Result<S, MapError> {
        self.save()?;
        Ok(self.store)
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn max_cache_size(&self) -> usize {
        self.config.effective_cache_size()
    }

    pub fn set_max_cache_size(&mut self, size: usize) -> Result<(), MapError> {
        self.config.max_cache_size = size;
        debug!("maximum cache size set to {}", self.max_cache_size());
        self.check_cache()
    }

    pub fn loaded_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_loaded(&self, key: BlockKey) -> bool {
        self.blocks.contains_key(&key)
    }

    pub fn is_dirty(&self, key: BlockKey) -> bool {
        self.dirty.contains(key)
    }

    pub fn loaded_keys(&self) -> impl Iterator<Item = BlockKey> + '_ {
        self.blocks.keys().copied()
    }

    pub fn block(&self, key: BlockKey) -> Option<&MapBlock> {
        self.blocks.get(&key)
    }

    /// Evicts least recently touched blocks until the cache bound holds.
    pub fn check_cache(&mut self) -> Result<(), MapError> {
        while self.blocks.len() > self.max_cache_size() {
            let Some(oldest) = self.history.front() else {
                break;
            };
            debug!("evicting block {oldest} to make room");
            self.unload_mapblock(oldest)?;
        }
        Ok(())
    }

    /// Saves everything, then drops every loaded block.
    pub fn flush_cache(&mut self) -> Result<(), MapError> {
        self.save()?;
        while let Some(key) = self.history.front() {
            debug!("dropping block {key} for cache flush");
            self.unload_mapblock(key)?;
        }
        Ok(())
    }

    /// Loads and decodes a stored block; `false` when the store has none.
    /// An already loaded block is only touched, so pending changes survive.
    pub fn load_mapblock(&mut self, key: BlockKey) -> Result<bool, MapError> {
        if self.blocks.contains_key(&key) {
            self.history.touch(key);
            return Ok(true);
        }
        let Some(data) = self.store.read(key)? else {
            debug!("block {key} not found in store");
            return Ok(false);
        };
        let block = MapBlock::deserialize(&data, key)?;
        debug!("loaded block {key}");
        self.blocks.insert(key, block);
        self.history.touch(key);
        self.check_cache()?;
        Ok(true)
    }

    pub fn unload_mapblock(&mut self, key: BlockKey) -> Result<(), MapError> {
        if self.dirty.contains(key) {
            debug!("saving dirty block {key} before unloading");
            self.save_mapblock(key)?;
        }
        self.history.remove(key);
        self.blocks.remove(&key);
        Ok(())
    }

    /// Encodes a loaded block into the store and marks it clean.
    pub fn save_mapblock(&mut self, key: BlockKey) -> Result<bool, MapError> {
        let Some(block) = self.blocks.get_mut(&key) else {
            self.dirty.remove(key);
            return Ok(false);
        };
        let data = block.serialize()?;
        self.store.write(key, &data)?;
        self.dirty.remove(key);
        debug!("saved block {key} at {}", block.coord());
        Ok(true)
    }

    /// Replaces whatever is at `key` with a fresh air block pending save.
    pub fn init_mapblock(&mut self, key: BlockKey) -> Result<(), MapError> {
        debug!("initializing block {key}");
        self.blocks.insert(key, MapBlock::new(key));
        self.dirty.touch(key);
        self.history.touch(key);
        self.check_cache()
    }

    fn writable_block(&mut self, pos: Pos) -> Result<&mut MapBlock, MapError> {
        let key = block_id_of(pos);
        if !self.load_mapblock(key)? {
            return Err(MapError::IgnoreContentReplacement(pos));
        }
        self.dirty.touch(key);
        self.blocks
            .get_mut(&key)
            .ok_or(MapError::IgnoreContentReplacement(pos))
    }

    /// The node at `pos`, or an `ignore` node when its block was never generated.
    pub fn get_node(&mut self, pos: Pos) -> Result<Node, MapError> {
        let key = block_id_of(pos);
        if !self.load_mapblock(key)? {
            return Ok(Node::ignore().at(pos));
        }
        match self.blocks.get(&key) {
            Some(block) => Ok(block.get_node(local_index(pos))?.clone()),
            None => Ok(Node::ignore().at(pos)),
        }
    }

    pub fn set_node(&mut self, pos: Pos, node: Node) -> Result<(), MapError> {
        let block = self.writable_block(pos)?;
        block.set_node(local_index(pos), node)?;
        Ok(())
    }

    pub fn remove_node(&mut self, pos: Pos) -> Result<(), MapError> {
        self.set_node(pos, Node::air())
    }

    /// A copy of the metadata at `pos`; empty when there is none or the
    /// block was never generated.
    pub fn get_meta(&mut self, pos: Pos) -> Result<NodeMetaRef, MapError> {
        let key = block_id_of(pos);
        if !self.load_mapblock(key)? {
            return Ok(NodeMetaRef::new());
        }
        let meta = match self.blocks.get(&key) {
            Some(block) => block.get_meta(local_index(pos))?.cloned(),
            None => None,
        };
        Ok(meta.unwrap_or_default())
    }

    /// Mutable metadata at `pos`; the block is marked dirty.
    pub fn meta_mut(&mut self, pos: Pos) -> Result<&mut NodeMetaRef, MapError> {
        let block = self.writable_block(pos)?;
        Ok(block.meta_mut(local_index(pos))?)
    }

    pub fn set_meta(&mut self, pos: Pos, meta: NodeMetaRef) -> Result<(), MapError> {
        let block = self.writable_block(pos)?;
        block.set_meta(local_index(pos), meta)?;
        Ok(())
    }

    pub fn get_timer(&mut self, pos: Pos) -> Result<Option<NodeTimerRef>, MapError> {
        let key = block_id_of(pos);
        if !self.load_mapblock(key)? {
            return Ok(None);
        }
        match self.blocks.get(&key) {
            Some(block) => Ok(block.get_timer(local_index(pos))?.copied()),
            None => Ok(None),
        }
    }

    pub fn set_timer(&mut self, pos: Pos, timer: NodeTimerRef) -> Result<(), MapError> {
        let block = self.writable_block(pos)?;
        block.set_timer(local_index(pos), timer)?;
        Ok(())
    }

    /// Writes back and unloads every dirty block, then commits the store.
    pub fn save(&mut self) -> Result<(), MapError> {
        if !self.dirty.is_empty() {
            info!("saving {} blocks", self.dirty.len());
        }
        while let Some(key) = self.dirty.front() {
            debug!("{} blocks left to save", self.dirty.len());
            self.save_mapblock(key)?;
            self.unload_mapblock(key)?;
        }
        self.store.commit()?;
        Ok(())
    }

    pub fn block_ids(&self) -> Result<Vec<BlockKey>, MapError> {
        Ok(self.store.block_ids()?)
    }

    /// Deletes every stored block and drops the cache, pending changes included.
    pub fn clear_map(&mut self) -> Result<(), MapError> {
        warn!("emptying the map of all its blocks");
        self.blocks.clear();
        self.history.clear();
        self.dirty.clear();
        self.store.clear()?;
        Ok(())
    }

    /// Samples the box between two corners (inclusive, in any order) into a
    /// schematic that always places its nodes.
    pub fn export_schematic(
        &mut self,
        corner_a: Pos,
        corner_b: Pos,
        force_place: bool,
    ) -> Result<Schematic, MapError> {
        let min = corner_a.min(corner_b);
        let max = corner_a.max(corner_b);
        let extent = max - min + Pos::new(1, 1, 1);
        let axis = |len: i64| u16::try_from(len).map_err(|_| MapError::RegionTooLarge(extent));
        let size = SchematicSize::new(axis(extent.x)?, axis(extent.y)?, axis(extent.z)?);

        let mut data = Vec::with_capacity(size.volume());
        for z in 0..extent.z {
            for y in 0..extent.y {
                for x in 0..extent.x {
                    let node = self.get_node(min + Pos::new(x, y, z))?;
                    data.push(SchematicEntry {
                        name: node.itemstring,
                        prob: u8::MAX,
                        param2: Some(node.param2),
                        force_place,
                    });
                }
            }
        }
        debug!("exported {} nodes between {min} and {max}", data.len());

        let table = SchematicTable {
            size,
            y_slice_probs: Vec::new(),
            data,
        };
        Ok(Schematic::from_table(&table)?)
    }

    /// Places a schematic with its (0, 0, 0) at `origin`, initializing any
    /// ungenerated block it touches. Returns the number of nodes placed.
    pub fn import_schematic(
        &mut self,
        origin: Pos,
        schematic: &Schematic,
        stage_save_percent: Option<f64>,
    ) -> Result<usize, MapError> {
        self.import_schematic_with_progress(origin, schematic, stage_save_percent, None)
    }

    pub fn import_schematic_with_progress(
        &mut self,
        origin: Pos,
        schematic: &Schematic,
        stage_save_percent: Option<f64>,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<usize, MapError> {
        if !schematic.is_loaded() {
            return Ok(0);
        }

        let size = schematic.size();
        let total = size.volume();
        let stage_every = stage_save_percent.unwrap_or(self.config.stage_save_percent);
        let mut last_stage = 0u64;
        let mut placed = 0usize;

        for y in 0..size.y as i64 {
            for x in 0..size.x as i64 {
                for z in 0..size.z as i64 {
                    let relative = Pos::new(x, y, z);
                    let Some(node) = schematic.get_node(relative) else {
                        continue;
                    };
                    let target = origin + relative;

                    match self.set_node(target, node.clone()) {
                        Err(MapError::IgnoreContentReplacement(_)) => {
                            self.init_mapblock(block_id_of(target))?;
                            self.set_node(target, node.clone())?;
                        }
                        other => other?,
                    }
                    placed += 1;

                    if let Some(callback) = progress.as_mut() {
                        if placed % PROGRESS_EVERY == 0 || placed == total {
                            callback(placed, total);
                        }
                    }

                    if stage_every > 0.0 {
                        let done = 1 + z + x * size.z as i64 + y * size.z as i64 * size.x as i64;
                        let percent = done as f64 / total as f64 * 100.0;
                        let stage = (percent / stage_every) as u64;
                        if stage != last_stage {
                            last_stage = stage;
                            info!(
                                "saving partial import at {percent:3.5}% ({} blocks pending)",
                                self.dirty.len()
                            );
                            self.save()?;
                        }
                    }
                }
            }
        }

        info!("imported {placed} nodes at {origin}");
        Ok(placed)
    }

    /// Replaces with air every stored node whose name is not in `known`,
    /// writing back the blocks it changes. Returns the number of nodes replaced.
    pub fn purge_unknown_nodes(&mut self, known: &HashSet<String>) -> Result<usize, MapError> {
        self.save()?;
        let keys = self.store.block_ids()?;
        info!("inspecting {} blocks for unknown nodes", keys.len());

        let mut replaced = 0usize;
        for key in keys {
            let Some(data) = self.store.read(key)? else {
                continue;
            };
            let mut block = MapBlock::deserialize(&data, key)?;
            let unknown: Vec<usize> = block
                .nodes()
                .iter()
                .enumerate()
                .filter(|(_, node)| {
                    node.itemstring != AIR
                        && node.itemstring != IGNORE
                        && !known.contains(&node.itemstring)
                })
                .map(|(index, _)| index)
                .collect();
            if unknown.is_empty() {
                continue;
            }

            for &index in &unknown {
                block.remove_node(index)?;
            }
            self.store.write(key, &block.serialize()?)?;
            if self.blocks.contains_key(&key) {
                self.blocks.insert(key, block);
            }
            info!("removed {} unknown nodes from block {key}", unknown.len());
            replaced += unknown.len();
        }

        self.store.commit()?;
        Ok(replaced)
    }
}
