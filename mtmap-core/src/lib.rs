pub mod binary;
pub mod config;
pub mod coordinates;
pub mod inventory;
pub mod map;
pub mod map_block;
pub mod metadata;
pub mod node;
pub mod schematic;
pub mod storage;

pub use config::MapConfig;
pub use coordinates::{BLOCK_SIZE, BlockKey, LocalNodeCoord, Pos, block_id, block_id_of, local_index};
pub use inventory::{InvRef, InventoryError, InventoryList, ItemStack};
pub use map::{MapError, MapInterface};
pub use map_block::{BlockError, MapBlock, StaticObject};
pub use metadata::{MetaError, NodeMetaRef};
pub use node::{AIR, IGNORE, Node, NodeTimerRef};
pub use schematic::{Schematic, SchematicEntry, SchematicError, SchematicSize, SchematicTable};
pub use storage::{MapStore, MemoryStore, SqliteStore, StorageError};
