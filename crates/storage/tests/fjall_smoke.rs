#![cfg(feature = "fjall")]

use walletd_storage::fjall::FjallStore;
use walletd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn put_get_delete_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let store = FjallStore::open(dir.path()).expect("open");
        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"state".as_slice(), b"v1".as_slice());
        batch.put(Column::Coin, b"outpoint".as_slice(), b"entry".as_slice());
        store.write_batch(&batch).expect("write batch");
        store.persist().expect("persist");
    }

    let store = FjallStore::open(dir.path()).expect("reopen");
    assert_eq!(
        store.get(Column::Meta, b"state").expect("get"),
        Some(b"v1".to_vec())
    );
    assert_eq!(
        store.get(Column::Coin, b"outpoint").expect("get"),
        Some(b"entry".to_vec())
    );

    store.delete(Column::Coin, b"outpoint").expect("delete");
    assert_eq!(store.get(Column::Coin, b"outpoint").expect("get"), None);
}
