mod common;

use eavault::config::EngineConfig;
use eavault::datatype::SqlValue;

use common::*;

fn audited() -> EngineConfig {
    EngineConfig::from_toml("[audit]\nenabled = true").expect("config")
}

#[test]
fn audit_is_off_by_default() {
    let (registry, store) = store();
    let mut place = registry.instantiate(PLACE).expect("place");
    place.set(TOWN, "Kabwe".to_string()).expect("town");
    let report = store.save(&[place]).expect("save");
    assert_eq!(report.audit_rows, 0);
    assert_eq!(count_rows(&store, "eav_audit"), 0);
}

#[test]
fn every_scalar_write_is_appended() {
    let (registry, store) = store_with(audited());
    let mut place = registry.instantiate(PLACE).expect("place");
    place.set(TOWN, "Kabwe".to_string()).expect("town");
    let first = store.save(&[place.clone()]).expect("save");
    // street and town
    assert_eq!(first.audit_rows, 2);
    // an identical save still logs
    store.save(&[place.clone()]).expect("save again");
    assert_eq!(count_rows(&store, "eav_audit"), 4);
    // while the value tables stay put
    assert_eq!(count_rows(&store, "eav_text"), 2);
}

#[test]
fn values_land_in_the_column_of_their_storage_class() {
    let (registry, store) = store_with(audited());
    let mut person = registry.instantiate(PERSON).expect("person");
    person.set(NAME, "Mwila".to_string()).expect("name");
    person.set(AGE, 31).expect("age");
    person.set(SCORE, 2.5).expect("score");
    store.save(&[person.clone()]).expect("save");

    let mut conn = store.provider().acquire().expect("connection");
    let rows = conn
        .query(
            "select field_id, kind, text_value, integer_value, real_value \
             from eav_audit where guid = ? order by field_id",
            &[SqlValue::from(person.guid())],
        )
        .expect("audit rows");
    let name = rows.iter().find(|r| r.id(0).expect("id") == NAME).expect("name row");
    assert_eq!(name.text(1).expect("kind"), "text");
    assert_eq!(name.text(2).expect("text"), "Mwila");
    assert_eq!(name.get(3).expect("integer"), &SqlValue::Null);
    let age = rows.iter().find(|r| r.id(0).expect("id") == AGE).expect("age row");
    assert_eq!(age.integer(3).expect("integer"), 31);
    let score = rows.iter().find(|r| r.id(0).expect("id") == SCORE).expect("score row");
    assert_eq!(score.get(4).expect("real"), &SqlValue::Real(2.5));
}

#[test]
fn previous_values_stay_in_the_log() {
    let (registry, store) = store_with(audited());
    let mut place = registry.instantiate(PLACE).expect("place");
    place.set(TOWN, "Mansa".to_string()).expect("town");
    store.save(&[place.clone()]).expect("save");
    place.set(TOWN, "Mongu".to_string()).expect("town");
    store.save(&[place.clone()]).expect("save again");

    let mut conn = store.provider().acquire().expect("connection");
    let rows = conn
        .query(
            "select text_value from eav_audit where guid = ? and field_id = ? order by audit_id",
            &[SqlValue::from(place.guid()), SqlValue::from(TOWN)],
        )
        .expect("audit rows");
    let towns: Vec<&str> = rows.iter().map(|r| r.text(0).expect("town")).collect();
    assert_eq!(towns, vec!["Mansa", "Mongu"]);
}
