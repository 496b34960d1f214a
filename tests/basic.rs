//! Basic put/get/delete behavior and persistence across reopen.

use leafdb::{Db, Error};
use tempfile::TempDir;

fn open_test_db() -> (TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("leaf.db")).unwrap();
    (dir, db)
}

#[test]
fn put_then_get_returns_value() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(b"k", b"v")
    })
    .unwrap();

    let value = db
        .read(|tx| tx.bucket(b"b")?.expect("bucket").get(b"k"))
        .unwrap();
    assert_eq!(value, Some(b"v".to_vec()));
}

#[test]
fn last_write_wins_within_a_transaction() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(b"k", b"v1")?;
        bucket.put(b"k", b"v2")?;
        assert_eq!(bucket.get(b"k")?, Some(b"v2".to_vec()));
        Ok(())
    })
    .unwrap();

    let value = db
        .read(|tx| tx.bucket(b"b")?.expect("bucket").get(b"k"))
        .unwrap();
    assert_eq!(value, Some(b"v2".to_vec()));
}

#[test]
fn writes_across_transactions_linearize() {
    let (_dir, db) = open_test_db();

    db.write(|tx| tx.create_bucket(b"b")?.put(b"k", b"v1"))
        .unwrap();
    db.write(|tx| tx.bucket(b"b")?.expect("bucket").put(b"k", b"v2"))
        .unwrap();

    let value = db
        .read(|tx| tx.bucket(b"b")?.expect("bucket").get(b"k"))
        .unwrap();
    assert_eq!(value, Some(b"v2".to_vec()));
}

#[test]
fn delete_removes_key() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(b"k", b"v")
    })
    .unwrap();
    let deleted = db
        .write(|tx| tx.bucket(b"b")?.expect("bucket").delete(b"k"))
        .unwrap();
    assert!(deleted);

    let value = db
        .read(|tx| tx.bucket(b"b")?.expect("bucket").get(b"k"))
        .unwrap();
    assert_eq!(value, None);
}

#[test]
fn delete_of_missing_key_reports_false() {
    let (_dir, db) = open_test_db();

    db.write(|tx| tx.create_bucket(b"b").map(|_| ())).unwrap();
    let deleted = db
        .write(|tx| tx.bucket(b"b")?.expect("bucket").delete(b"nope"))
        .unwrap();
    assert!(!deleted);
}

#[test]
fn committed_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.db");

    let db = Db::open(&path).unwrap();
    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(b"k1", b"v1")?;
        bucket.put(b"k2", b"v2")
    })
    .unwrap();
    db.close().unwrap();

    let db = Db::open(&path).unwrap();
    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        assert_eq!(bucket.get(b"k1")?, Some(b"v1".to_vec()));
        assert_eq!(bucket.get(b"k2")?, Some(b"v2".to_vec()));
        Ok(())
    })
    .unwrap();
}

#[test]
fn many_keys_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.db");

    let db = Db::open(&path).unwrap();
    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        for i in 0..1000u32 {
            bucket.put(format!("key{i:05}").as_bytes(), format!("value{i}").as_bytes())?;
        }
        Ok(())
    })
    .unwrap();
    drop(db);

    let db = Db::open(&path).unwrap();
    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        for i in 0..1000u32 {
            assert_eq!(
                bucket.get(format!("key{i:05}").as_bytes())?,
                Some(format!("value{i}").into_bytes()),
                "key {i} lost across reopen"
            );
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn missing_bucket_lookup_returns_none() {
    let (_dir, db) = open_test_db();

    db.read(|tx| {
        assert!(tx.bucket(b"missing")?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn create_existing_bucket_fails() {
    let (_dir, db) = open_test_db();

    db.write(|tx| tx.create_bucket(b"b").map(|_| ())).unwrap();
    let result = db.write(|tx| tx.create_bucket(b"b").map(|_| ()));

    assert!(matches!(result, Err(Error::BucketExists)));
}

#[test]
fn delete_missing_bucket_fails() {
    let (_dir, db) = open_test_db();

    let result = db.write(|tx| tx.delete_bucket(b"missing"));

    assert!(matches!(result, Err(Error::BucketNotFound)));
}

#[test]
fn empty_bucket_name_is_rejected() {
    let (_dir, db) = open_test_db();

    let result = db.write(|tx| tx.create_bucket(b"").map(|_| ()));

    assert!(matches!(result, Err(Error::NameRequired)));
}

#[test]
fn oversized_key_is_rejected() {
    let (_dir, db) = open_test_db();

    let result = db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(&vec![0u8; 8192], b"v")
    });

    assert!(matches!(result, Err(Error::KeyTooLarge { .. })));
}
