#![allow(missing_docs)]

use std::error::Error;

use tessera_filesystem::FilesystemStore;
use tessera_storage::{Bytes, ListableStorageTraits, ReadableStorageTraits, WritableStorageTraits};

#[test]
#[cfg_attr(miri, ignore)]
fn filesystem() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let store = FilesystemStore::new(path.path())?.sorted();
    tessera_storage::store_test::store_write(&store)?;
    tessera_storage::store_test::store_read(&store)?;
    tessera_storage::store_test::store_list(&store)?;
    tessera_storage::store_test::store_list_size(&store)?;
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn filesystem_replace() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    let store = FilesystemStore::new(path.path())?;
    let key = "a/__commits/x.wrt".try_into()?;
    store.set(&key, Bytes::from_static(b"first"))?;
    store.set(&key, Bytes::from_static(b"second"))?;
    assert_eq!(store.get(&key)?, Some(Bytes::from_static(b"second")));
    assert_eq!(store.list()?, vec![key.clone()]);
    assert_eq!(
        std::fs::read_dir(path.path().join("a/__commits"))?.count(),
        1
    );

    store.erase_prefix(&"a/".try_into()?)?;
    assert!(store.list()?.is_empty());
    assert!(path.path().exists());
    Ok(())
}

#[test]
#[cfg_attr(miri, ignore)]
fn filesystem_reopen() -> Result<(), Box<dyn Error>> {
    let path = tempfile::TempDir::new()?;
    {
        let store = FilesystemStore::new(path.path())?;
        store.set(&"a/b".try_into()?, Bytes::from_static(&[1, 2]))?;
    }
    let store = FilesystemStore::new(path.path())?;
    assert_eq!(store.size_key(&"a/b".try_into()?)?, Some(2));
    assert_eq!(store.base_path(), path.path());
    Ok(())
}
