//! Cursor iteration: ordering across splits, seek, empty-leaf skipping.

use leafdb::{Db, Tx};
use tempfile::TempDir;

fn open_test_db() -> (TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("leaf.db")).unwrap();
    (dir, db)
}

fn collect_all(tx: &Tx<'_>, bucket_name: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let bucket = tx.bucket(bucket_name).unwrap().expect("bucket");
    let mut cursor = bucket.cursor();
    let mut out = Vec::new();
    let mut entry = cursor.first().unwrap();
    while let Some(pair) = entry {
        out.push(pair);
        entry = cursor.next().unwrap();
    }
    out
}

#[test]
fn iterates_in_ascending_order_across_splits() {
    let (_dir, db) = open_test_db();

    // Inserted out of order, large enough values to force leaf splits.
    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        for i in (0..100u32).rev() {
            bucket.put(format!("k{i:02}").as_bytes(), &[b'x'; 64])?;
        }
        Ok(())
    })
    .unwrap();

    db.read(|tx| {
        let entries = collect_all(tx, b"b");
        assert_eq!(entries.len(), 100);
        for (i, (key, value)) in entries.iter().enumerate() {
            assert_eq!(key, format!("k{i:02}").as_bytes(), "position {i}");
            assert_eq!(value.len(), 64);
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn empty_bucket_yields_nothing() {
    let (_dir, db) = open_test_db();
    db.write(|tx| tx.create_bucket(b"b").map(|_| ())).unwrap();

    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        let mut cursor = bucket.cursor();
        assert!(cursor.first()?.is_none());
        assert!(cursor.next()?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn next_without_first_yields_nothing() {
    let (_dir, db) = open_test_db();
    db.write(|tx| tx.create_bucket(b"b")?.put(b"k", b"v")).unwrap();

    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        let mut cursor = bucket.cursor();
        assert!(cursor.next()?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn seek_finds_exact_and_following_keys() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        for key in [b"b".as_slice(), b"d", b"f"] {
            bucket.put(key, b"v")?;
        }
        Ok(())
    })
    .unwrap();

    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        let mut cursor = bucket.cursor();

        // Exact hit.
        let (key, _) = cursor.seek(b"d")?.expect("found");
        assert_eq!(key, b"d");

        // Between keys: first key >= target.
        let (key, _) = cursor.seek(b"c")?.expect("found");
        assert_eq!(key, b"d");

        // Before the first key.
        let (key, _) = cursor.seek(b"a")?.expect("found");
        assert_eq!(key, b"b");

        // Past the last key.
        assert!(cursor.seek(b"z")?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn seek_then_next_continues_in_order() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        for i in 0..200u32 {
            bucket.put(format!("k{i:03}").as_bytes(), &[b'v'; 48])?;
        }
        Ok(())
    })
    .unwrap();

    db.read(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        let mut cursor = bucket.cursor();
        let (key, _) = cursor.seek(b"k100")?.expect("found");
        assert_eq!(key, b"k100");
        for i in 101..200u32 {
            let (key, _) = cursor.next()?.expect("more keys");
            assert_eq!(key, format!("k{i:03}").into_bytes());
        }
        assert!(cursor.next()?.is_none());
        Ok(())
    })
    .unwrap();
}

#[test]
fn iteration_skips_leaves_emptied_by_deletes() {
    let (_dir, db) = open_test_db();

    // Force several leaves, then delete a contiguous prefix so the leading
    // leaves end up empty. No rebalancing happens on delete, so those
    // leaves stay in the tree until their pages fall out of it.
    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        for i in 0..100u32 {
            bucket.put(format!("k{i:02}").as_bytes(), &[b'x'; 200])?;
        }
        Ok(())
    })
    .unwrap();
    db.write(|tx| {
        let bucket = tx.bucket(b"b")?.expect("bucket");
        for i in 0..50u32 {
            bucket.delete(format!("k{i:02}").as_bytes())?;
        }
        Ok(())
    })
    .unwrap();

    db.read(|tx| {
        let entries = collect_all(tx, b"b");
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].0, b"k50");
        for (i, (key, _)) in entries.iter().enumerate() {
            assert_eq!(key, format!("k{:02}", i + 50).as_bytes());
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn cursor_sees_writes_buffered_in_its_own_transaction() {
    let (_dir, db) = open_test_db();

    db.write(|tx| {
        let bucket = tx.create_bucket(b"b")?;
        bucket.put(b"a", b"1")?;
        bucket.put(b"c", b"3")?;
        bucket.put(b"b", b"2")?;

        let mut cursor = bucket.cursor();
        let mut keys = Vec::new();
        let mut entry = cursor.first()?;
        while let Some((key, _)) = entry {
            keys.push(key);
            entry = cursor.next()?;
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        Ok(())
    })
    .unwrap();
}
