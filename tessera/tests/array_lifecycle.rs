#![allow(missing_docs)]

use std::error::Error;
use std::sync::Arc;

use tessera::array::{
    Array, ArrayError, ArraySchema, ArrayType, Attribute, ConsolidationOptions, Datatype,
    Dimension, EncryptionKey, EncryptionType, Ownership, QueryType,
};
use tessera::config::Config;
use tessera::context::{Context, ManualClock};
use tessera::storage::{Bytes, StorageError, store::MemoryStore};

fn schema() -> Result<ArraySchema, ArrayError> {
    ArraySchema::new(
        ArrayType::Sparse,
        vec![Dimension::new("x", 0, 99)?],
        vec![Attribute::new("a", Datatype::Int32)],
    )
}

fn context(now: u64) -> (Arc<Context>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let ctx = Context::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
    (Arc::new(ctx), clock)
}

fn cell(x: u64, value: i32) -> (Vec<u64>, Bytes) {
    (vec![x], Bytes::copy_from_slice(&value.to_le_bytes()))
}

#[test]
fn array_open_close_state() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "/a", &schema()?, &EncryptionKey::none())?;

    let array = Array::new(&ctx, "a", QueryType::Read)?;
    assert!(array.is_open());
    assert_eq!(array.uri().as_str(), "/a");
    assert_eq!(array.query_type(), QueryType::Read);
    assert_eq!(*array.schema()?, schema()?);
    assert!(matches!(
        array.open(QueryType::Read),
        Err(ArrayError::InvalidState(_))
    ));

    array.close()?;
    assert!(!array.is_open());
    assert!(matches!(array.close(), Err(ArrayError::InvalidState(_))));
    assert!(matches!(array.reopen(), Err(ArrayError::InvalidState(_))));
    assert!(matches!(array.schema(), Err(ArrayError::InvalidState(_))));
    assert!(matches!(
        array.get_metadata("k"),
        Err(ArrayError::InvalidState(_))
    ));
    assert!(matches!(array.read_cells(), Err(ArrayError::InvalidState(_))));
    assert!(matches!(
        array.consolidate(&ConsolidationOptions::default()),
        Err(ArrayError::InvalidState(_))
    ));

    // timestamps and configuration are accessible while closed
    array.set_open_timestamp_start(1);
    assert_eq!(array.open_timestamp_start(), 1);
    array.set_config(Config::new().with("x", 1));
    assert_eq!(array.config().get("x"), Some("1"));

    array.open(QueryType::Write)?;
    assert_eq!(array.query_type(), QueryType::Write);
    assert_eq!(array.open_timestamp_start(), 1);
    Ok(())
}

#[test]
fn array_open_missing() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    assert!(matches!(
        Array::new(&ctx, "missing", QueryType::Read),
        Err(ArrayError::StorageError(StorageError::MissingMetadata(_)))
    ));
    assert!(Array::encryption_type(&ctx, "missing").is_err());

    let array = Array::bind(&ctx, "missing", EncryptionKey::none())?;
    assert!(!array.is_open());
    assert!(array.open(QueryType::Read).is_err());
    assert!(!array.is_open());
    Ok(())
}

#[test]
fn array_create_existing() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;
    assert!(matches!(
        Array::create(&ctx, "a", &schema()?, &EncryptionKey::none()),
        Err(ArrayError::InvalidArgument(_))
    ));
    assert_eq!(
        Array::load_schema(&ctx, "a", &EncryptionKey::none())?,
        schema()?
    );
    Ok(())
}

#[test]
fn array_timestamp_window() -> Result<(), Box<dyn Error>> {
    let (ctx, clock) = context(50);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;

    let array = Array::new(&ctx, "a", QueryType::Read)?;
    assert_eq!(array.open_timestamp_start(), 0);
    assert_eq!(array.open_timestamp_end(), Some(50));
    clock.set(60);
    array.reopen()?;
    assert_eq!(array.open_timestamp_end(), Some(60));

    // an explicit window is kept across reopens
    array.set_open_timestamp_start(5);
    array.set_open_timestamp_end(40);
    assert_eq!(array.open_timestamp_end(), Some(60));
    array.reopen()?;
    for _ in 0..3 {
        assert_eq!(array.open_timestamp_start(), 5);
        assert_eq!(array.open_timestamp_end(), Some(40));
        clock.advance(10);
        array.reopen()?;
    }

    array.close()?;
    array.set_open_timestamp_start(41);
    assert!(matches!(
        array.open(QueryType::Read),
        Err(ArrayError::InvalidArgument(_))
    ));
    assert!(!array.is_open());

    let array = Array::bind(&ctx, "a", EncryptionKey::none())?;
    assert_eq!(array.open_timestamp_end(), None);
    Ok(())
}

#[test]
fn array_time_travel() -> Result<(), Box<dyn Error>> {
    let (ctx, clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;

    let writer = Array::new(&ctx, "a", QueryType::Write)?;
    writer.write_fragment([cell(0, 1), cell(1, 1)])?;
    clock.set(20);
    writer.reopen()?;
    writer.write_fragment([cell(1, 2)])?;
    writer.close()?;

    let array = Array::bind(&ctx, "a", EncryptionKey::none())?;
    array.set_open_timestamp_end(15);
    array.open(QueryType::Read)?;
    assert_eq!(array.fragments()?.len(), 1);
    assert_eq!(
        array.read_cells()?.get(&vec![1]),
        Some(&cell(1, 1).1)
    );

    array.set_open_timestamp_start(15);
    array.set_open_timestamp_end(25);
    array.reopen()?;
    let cells = array.read_cells()?;
    assert_eq!(cells.len(), 1);
    assert_eq!(cells.get(&vec![1]), Some(&cell(1, 2).1));
    Ok(())
}

#[test]
fn array_reopen_sees_new_fragments() -> Result<(), Box<dyn Error>> {
    let (ctx, clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;

    let reader = Array::new(&ctx, "a", QueryType::Read)?;
    assert!(reader.fragments()?.is_empty());

    clock.advance(1);
    let writer = Array::new(&ctx, "a", QueryType::Write)?;
    let name = writer.write_fragment([cell(3, 3)])?;
    writer.close()?;

    assert!(reader.fragments()?.is_empty());
    clock.advance(1);
    reader.reopen()?;
    assert_eq!(reader.fragments()?, vec![name]);
    assert_eq!(reader.read_cells()?.len(), 1);
    Ok(())
}

#[test]
fn array_encryption() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    let key = EncryptionKey::aes_256_gcm(vec![7u8; 32])?;
    Array::create(&ctx, "a", &schema()?, &key)?;
    assert_eq!(Array::encryption_type(&ctx, "a")?, EncryptionType::Aes256Gcm);

    assert!(matches!(
        Array::new(&ctx, "a", QueryType::Read),
        Err(ArrayError::Encryption(_))
    ));
    assert!(matches!(
        Array::new_with_encryption(
            &ctx,
            "a",
            QueryType::Read,
            EncryptionKey::aes_256_gcm(vec![8u8; 32])?
        ),
        Err(ArrayError::Encryption(_))
    ));
    assert!(matches!(
        Array::load_schema(&ctx, "a", &EncryptionKey::none()),
        Err(ArrayError::Encryption(_))
    ));

    let array = Array::new_with_encryption(&ctx, "a", QueryType::Read, key.clone())?;
    assert_eq!(array.encryption(), EncryptionType::Aes256Gcm);
    assert_eq!(Array::load_schema(&ctx, "a", &key)?, schema()?);
    Ok(())
}

#[test]
fn array_raw_ownership() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;

    let array = Array::new(&ctx, "a", QueryType::Write)?;
    array.put_metadata("k", Datatype::Int32, 1, 42i32.to_le_bytes().to_vec())?;

    let borrowed = Array::from_raw(array.raw(), Ownership::Borrowed);
    assert!(borrowed.is_open());
    drop(borrowed);
    assert!(array.is_open());

    let owned = Array::from_raw(array.raw(), Ownership::Owned);
    assert_eq!(owned.get_metadata("k")?.datatype(), Datatype::Int32);
    drop(owned);
    assert!(!array.is_open());
    assert!(!array.raw().is_open());

    // dropping the owner flushed the pending metadata
    let reader = Array::new(&ctx, "a", QueryType::Read)?;
    assert_eq!(
        reader.get_metadata("k")?.value().as_ref(),
        42i32.to_le_bytes()
    );
    Ok(())
}

#[test]
fn array_drop_flushes_metadata() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;
    {
        let array = Array::new(&ctx, "a", QueryType::ModifyExclusive)?;
        array.put_metadata("k", Datatype::UInt8, 3, vec![1, 2, 3])?;
    }
    let array = Array::new(&ctx, "a", QueryType::Read)?;
    assert_eq!(array.metadata_num()?, 1);
    assert_eq!(array.get_metadata("k")?.value_num(), 3);
    Ok(())
}

#[test]
fn array_delete() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;
    Array::create(&ctx, "ab", &schema()?, &EncryptionKey::none())?;
    {
        let array = Array::new(&ctx, "a", QueryType::Write)?;
        array.write_fragment([cell(0, 0)])?;
        array.put_metadata("k", Datatype::Bool, 1, vec![1])?;
        assert!(matches!(
            Array::delete_array(&ctx, "a"),
            Err(ArrayError::ConcurrentModification(_))
        ));
    }

    Array::delete_array(&ctx, "a")?;
    assert!(matches!(
        Array::new(&ctx, "a", QueryType::Read),
        Err(ArrayError::StorageError(StorageError::MissingMetadata(_)))
    ));
    assert!(Array::delete_array(&ctx, "a").is_err());

    // arrays sharing a name prefix are untouched
    Array::new(&ctx, "ab", QueryType::Read)?;
    Ok(())
}

#[test]
fn array_config_overlay() -> Result<(), Box<dyn Error>> {
    let clock = Arc::new(ManualClock::new(10));
    let ctx = Arc::new(
        Context::new(Arc::new(MemoryStore::new()))
            .with_clock(clock)
            .with_config(Config::new().with("a", "context").with("b", "context")),
    );
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;

    let array = Array::new(&ctx, "a", QueryType::Read)?;
    assert_eq!(array.config(), *ctx.config());
    array.set_config(Config::new().with("b", "array"));
    let config = array.config();
    assert_eq!(config.get("a"), Some("context"));
    assert_eq!(config.get("b"), Some("array"));
    Ok(())
}

#[test]
fn array_query_type_gate() -> Result<(), Box<dyn Error>> {
    let (ctx, _clock) = context(10);
    Array::create(&ctx, "a", &schema()?, &EncryptionKey::none())?;
    let writer = Array::new(&ctx, "a", QueryType::Write)?;
    writer.write_fragment([cell(0, 0)])?;
    writer.write_fragment([cell(0, 1)])?;
    writer.close()?;

    let reader = Array::new(&ctx, "a", QueryType::Read)?;
    let before = reader.fragments()?;
    match reader.consolidate(&ConsolidationOptions::default()) {
        Err(ArrayError::Permission(message)) => {
            assert_eq!(message, "cannot consolidate array opened in readonly mode");
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(matches!(
        reader.consolidate_metadata(),
        Err(ArrayError::Permission(_))
    ));
    reader.reopen()?;
    assert_eq!(reader.fragments()?, before);

    for query_type in [QueryType::Delete, QueryType::Update] {
        let array = Array::new(&ctx, "a", query_type)?;
        assert!(matches!(
            array.put_metadata("k", Datatype::Int8, 1, vec![0]),
            Err(ArrayError::Permission(_))
        ));
        assert_eq!(array.metadata_num()?, 0);
    }
    let deleter = Array::new(&ctx, "a", QueryType::Delete)?;
    assert!(matches!(
        deleter.write_fragment([cell(0, 0)]),
        Err(ArrayError::Permission(_))
    ));
    Ok(())
}
