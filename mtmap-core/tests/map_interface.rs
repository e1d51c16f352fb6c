use mtmap_core::{
    AIR, BLOCK_SIZE, BlockKey, ItemStack, MapConfig, MapError, MapInterface, MemoryStore, Node,
    NodeTimerRef, Pos, Schematic, SchematicEntry, SchematicSize, SchematicTable, SqliteStore,
    block_id_of,
};
use std::collections::BTreeSet;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn brick_schematic(size: SchematicSize) -> Schematic {
    let data = (0..size.volume())
        .map(|index| SchematicEntry {
            name: if index % 3 == 0 { "default:brick" } else { "default:cobble" }.to_string(),
            prob: 255,
            param2: Some((index % 4) as u8),
            force_place: true,
        })
        .collect();
    let table = SchematicTable {
        size,
        y_slice_probs: Vec::new(),
        data,
    };
    Schematic::from_table(&table).unwrap()
}

#[test]
fn fresh_block_is_all_air() {
    init_logging();
    let mut map = MapInterface::new(MemoryStore::new());
    map.init_mapblock(0).unwrap();

    for z in 0..BLOCK_SIZE {
        for y in 0..BLOCK_SIZE {
            for x in 0..BLOCK_SIZE {
                let node = map.get_node(Pos::new(x, y, z)).unwrap();
                assert_eq!(node.itemstring, AIR);
                assert_eq!((node.param1, node.param2), (0, 0));
            }
        }
    }
    assert!(map.is_dirty(0));
}

#[test]
fn writing_into_an_ungenerated_block_is_rejected() {
    init_logging();
    let mut map = MapInterface::new(MemoryStore::new());
    let pos = Pos::new(-40, 12, 300);

    let err = map.set_node(pos, Node::new("default:stone")).unwrap_err();
    assert!(matches!(err, MapError::IgnoreContentReplacement(at) if at == pos));
    assert_eq!(map.dirty_count(), 0);
    assert!(map.block_ids().unwrap().is_empty());
}

#[test]
fn schematic_import_initializes_missing_blocks() {
    init_logging();
    let mut map = MapInterface::new(MemoryStore::new());
    let size = SchematicSize::new(20, 3, 20);
    let schematic = brick_schematic(size);
    let origin = Pos::new(-2, 5, -2);

    let placed = map.import_schematic(origin, &schematic, None).unwrap();
    assert_eq!(placed, size.volume());

    let mut targets = BTreeSet::new();
    for z in 0..size.z as i64 {
        for x in 0..size.x as i64 {
            targets.insert(block_id_of(origin + Pos::new(x, 0, z)));
        }
    }
    assert_eq!(targets.len(), 9);
    for &key in &targets {
        assert!(map.is_dirty(key), "block {key} should await saving");
    }

    let relative = Pos::new(19, 2, 0);
    let expected = schematic.get_node(relative).unwrap().clone();
    let node = map.get_node(origin + relative).unwrap();
    assert_eq!(node.itemstring, expected.itemstring);
    assert_eq!(node.param2, expected.param2);
    assert_eq!(node.pos, origin + relative);

    map.save().unwrap();
    let stored: BTreeSet<BlockKey> = map.block_ids().unwrap().into_iter().collect();
    assert_eq!(stored, targets);
}

#[test]
fn overwriting_a_node_clears_its_metadata_and_timer() {
    init_logging();
    let mut map = MapInterface::new(MemoryStore::new());
    map.init_mapblock(0).unwrap();
    let pos = Pos::new(7, 8, 9);

    map.set_node(pos, Node::new("default:chest")).unwrap();
    {
        let meta = map.meta_mut(pos).unwrap();
        meta.set_string("infotext", "Chest").unwrap();
        meta.get_inventory_mut().set_size("main", 4);
        meta.get_inventory_mut()
            .set_stack("main", 1, ItemStack::from_fields("default:apple", 3));
    }
    let mut timer = NodeTimerRef::default();
    timer.start(10.0);
    map.set_timer(pos, timer).unwrap();
    map.flush_cache().unwrap();

    let meta = map.get_meta(pos).unwrap();
    assert_eq!(meta.get_string("infotext").as_deref(), Some("Chest"));
    assert_eq!(
        meta.get_inventory().get_stack("main", 1),
        Some(&ItemStack::from_fields("default:apple", 3))
    );
    assert!(map.get_timer(pos).unwrap().is_some());

    map.set_node(pos, Node::new("default:stone")).unwrap();
    assert!(map.get_meta(pos).unwrap().is_empty());
    assert!(map.get_timer(pos).unwrap().is_none());

    map.save().unwrap();
    assert!(map.get_meta(pos).unwrap().is_empty());
    assert!(map.get_timer(pos).unwrap().is_none());
}

#[test]
fn cache_stays_within_its_bound() {
    init_logging();
    let config = MapConfig::from_json_str(r#"{"max_cache_size": 4}"#).unwrap();
    let mut map = MapInterface::with_config(MemoryStore::new(), config);
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut seen = BTreeSet::new();

    for _ in 0..600 {
        let pos = Pos::new(rng.i64(-48..48), rng.i64(-16..32), rng.i64(-32..32));
        let key = block_id_of(pos);
        seen.insert(key);
        match rng.u8(0..4) {
            0 => map.init_mapblock(key).unwrap(),
            1 => {
                map.get_node(pos).unwrap();
            }
            _ => match map.set_node(pos, Node::new("default:sand")) {
                Ok(()) | Err(MapError::IgnoreContentReplacement(_)) => {}
                Err(err) => panic!("unexpected error: {err}"),
            },
        }

        assert!(map.loaded_count() <= map.max_cache_size());
        for &key in &seen {
            assert!(!map.is_dirty(key) || map.is_loaded(key));
        }
    }

    map.set_max_cache_size(0).unwrap();
    assert_eq!(map.loaded_count(), 1);
}

#[test]
fn sqlite_map_survives_reopening() {
    init_logging();
    let path = std::env::temp_dir().join(format!("mtmap-map-{}.sqlite", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let pos = Pos::new(-20, 33, 4100);

    {
        let mut map = MapInterface::new(SqliteStore::open(&path).unwrap());
        map.init_mapblock(block_id_of(pos)).unwrap();
        map.set_node(pos, Node::with_params("default:torch", 14, 2)).unwrap();
        map.meta_mut(pos).unwrap().set_int("fuel", 42);
        map.into_store().unwrap().close().unwrap();
    }

    let mut map = MapInterface::new(SqliteStore::open(&path).unwrap());
    assert_eq!(map.block_ids().unwrap(), vec![block_id_of(pos)]);
    let node = map.get_node(pos).unwrap();
    assert_eq!(node.itemstring, "default:torch");
    assert_eq!((node.param1, node.param2), (14, 2));
    assert_eq!(map.get_meta(pos).unwrap().get_int("fuel").unwrap(), Some(42));

    let schematic = map.export_schematic(pos, pos + Pos::new(1, 0, 0), true).unwrap();
    assert_eq!(schematic.size(), SchematicSize::new(2, 1, 1));
    assert_eq!(schematic.get_node(Pos::ORIGIN).unwrap().itemstring, "default:torch");
    drop(map);
    std::fs::remove_file(&path).unwrap();
}
