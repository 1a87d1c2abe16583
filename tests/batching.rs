mod common;

use eavault::EavaultError;
use eavault::config::EngineConfig;
use eavault::instance::EntityInstance;
use eavault::interface::CancelToken;

use common::*;

const OVERVIEW_READ: &str = "select guid, created, modified from eav_overview";

fn places(registry: &eavault::registry::Registry, count: usize) -> Vec<EntityInstance> {
    (0..count)
        .map(|i| {
            let mut place = registry.instantiate(PLACE).expect("place");
            place.set(TOWN, format!("town {}", i)).expect("town");
            place
        })
        .collect()
}

#[test]
fn five_guids_in_chunks_of_two() {
    let mut config = EngineConfig::default();
    config.batch.load_chunk_size = 2;
    let (registry, provider, store) = recording_store(config);
    let places = places(&registry, 5);
    store.save(&places).expect("save");

    provider.clear();
    let guids: Vec<String> = places.iter().map(|p| p.guid().to_string()).collect();
    let loaded = store.load(PLACE, Some(&guids)).expect("load");
    assert_eq!(provider.params_of(OVERVIEW_READ), vec![2, 2, 1]);
    let order: Vec<&str> = loaded.iter().map(|p| p.guid()).collect();
    let expected: Vec<&str> = guids.iter().map(String::as_str).collect();
    assert_eq!(order, expected);
    for (i, place) in loaded.iter().enumerate() {
        assert_eq!(place.get::<String>(TOWN).expect("town"), format!("town {}", i));
    }
}

#[test]
fn only_declared_kinds_are_queried() {
    let (registry, provider, store) = recording_store(EngineConfig::default());
    store.save(&places(&registry, 1)).expect("save");
    provider.clear();
    store.load(PLACE, None).expect("load");
    let tables: Vec<String> = provider
        .recorded()
        .into_iter()
        .filter(|r| r.sql.starts_with("select"))
        .map(|r| r.sql)
        .collect();
    assert!(tables.iter().any(|sql| sql.contains("from eav_text ")));
    assert!(!tables.iter().any(|sql| sql.contains("eav_integer")));
    assert!(!tables.iter().any(|sql| sql.contains("eav_enum")));
    assert!(!tables.iter().any(|sql| sql.contains("eav_binding")));
}

#[test]
fn workers_keep_resolution_order() {
    let mut config = EngineConfig::default();
    config.batch.load_chunk_size = 3;
    config.batch.load_workers = 4;
    let (registry, provider, store) = recording_store(config);
    let places = places(&registry, 20);
    store.save(&places).expect("save");
    provider.clear();
    let guids: Vec<String> = places.iter().map(|p| p.guid().to_string()).collect();
    let loaded = store.load(PLACE, Some(&guids)).expect("load");
    assert_eq!(loaded.len(), 20);
    for (place, guid) in loaded.iter().zip(&guids) {
        assert_eq!(place.guid(), guid);
    }
    let mut sizes = provider.params_of(OVERVIEW_READ);
    sizes.sort();
    assert_eq!(sizes, vec![2, 3, 3, 3, 3, 3, 3]);
}

#[test]
fn chunks_are_clamped_to_the_dialect_limit() {
    let mut config = EngineConfig::default();
    config.batch.load_chunk_size = 5_000;
    let (registry, provider, store) = recording_store(config);
    let places = places(&registry, 1_200);
    store.save(&places).expect("save");
    provider.clear();
    let loaded = store.load(PLACE, None).expect("load");
    assert_eq!(loaded.len(), 1_200);
    assert_eq!(provider.params_of(OVERVIEW_READ), vec![998, 202]);
}

#[test]
fn cancelled_calls_stop_before_the_next_batch() {
    let (registry, store) = store();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = store.save_with(&places(&registry, 3), &cancel).unwrap_err();
    assert!(matches!(err, EavaultError::Cancelled));
    assert_eq!(count_rows(&store, "eav_overview"), 0);

    store.save(&places(&registry, 3)).expect("save");
    let err = store.load_with(PLACE, None, &cancel).unwrap_err();
    assert!(matches!(err, EavaultError::Cancelled));
}

#[test]
fn save_batches_follow_configuration() {
    let mut config = EngineConfig::default();
    config.batch.save_batch_size = 2;
    let (registry, provider, store) = recording_store(config);
    provider.clear();
    let report = store.save(&places(&registry, 5)).expect("save");
    assert_eq!(report.instances, 5);
    assert_eq!(report.overview_inserted, 5);
    let overview_inserts = provider.params_of("insert into eav_overview");
    assert_eq!(overview_inserts.len(), 5);
}
