//! End-to-end demonstration: normalize a raw batch, apply a full sync, then
//! a delta sync, and print the resulting cache. Run with
//! `cargo run --example sync_demo`.

use std::sync::Arc;

use contact_cache::{CacheLimits, RawContact, SyncEngine, SyncMetadata, SystemClock};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let limits = CacheLimits::default();
    let store = contact_cache::MemoryStore::new();
    let mut engine = SyncEngine::new(store, limits, Arc::new(SystemClock));

    let batch = vec![
        RawContact {
            external_contact_id: "c-1".to_string(),
            display_name: "Alex Rivera".to_string(),
            phones: vec!["+1 (555) 123-4567".to_string()],
            emails: vec!["ALEX@EXAMPLE.COM".to_string()],
            source_version: 1,
            source_last_modified_ms: 1,
            ..Default::default()
        },
        RawContact {
            external_contact_id: "c-2".to_string(),
            display_name: "Sam Patel".to_string(),
            phones: vec!["555.987.6543".to_string()],
            source_version: 1,
            source_last_modified_ms: 1,
            ..Default::default()
        },
    ];

    let summary = engine.apply_full_sync(
        "bt-pixel8",
        &batch,
        &SyncMetadata {
            complete_snapshot: true,
            source_sync_sequence: 1,
            ..Default::default()
        },
    )?;
    println!("full sync: {summary:?}");

    let update = vec![RawContact {
        external_contact_id: "c-1".to_string(),
        display_name: "Alex Rivera".to_string(),
        phones: vec!["+15551234567".to_string(), "+15550001111".to_string()],
        source_version: 2,
        source_last_modified_ms: 2,
        ..Default::default()
    }];
    let summary = engine.apply_delta_sync(
        "bt-pixel8",
        &update,
        &[],
        &SyncMetadata {
            source_sync_sequence: 2,
            ..Default::default()
        },
    )?;
    println!("delta sync: {summary:?}");

    let reader = contact_cache::ContactReader::new(engine.store());
    for contact in reader.list_contacts("bt-pixel8")? {
        println!("{} -> {:?}", contact.display_name, contact.phones);
    }

    Ok(())
}
