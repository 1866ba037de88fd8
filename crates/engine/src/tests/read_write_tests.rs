use super::helpers::{open_db, open_db_manual_compaction, segment_files};
use anyhow::Result;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;

// -------------------- Round trips --------------------

#[test]
fn write_then_read_round_trip() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"hello", b"world")?;
    assert_eq!(db.get(b"hello")?, Some(b"world".to_vec()));
    Ok(())
}

#[test]
fn first_record_byte_image_on_disk() -> Result<()> {
    let (dir, db) = open_db(1000);
    db.put(b"hello", b"world")?;

    // The first start allocates seg-1 as the active segment; the record
    // lands at the head of that file.
    let data = fs::read(dir.path().join("seg-1.bin"))?;
    let mut expected = vec![0x00, 0x00, 0x00, 0x00, 0x22, 0x93, 0x2B, 0xB2];
    expected.extend_from_slice(&5i32.to_be_bytes());
    expected.extend_from_slice(&5i32.to_be_bytes());
    expected.push(0);
    expected.extend_from_slice(b"hello");
    expected.extend_from_slice(b"world");
    assert_eq!(data, expected);
    Ok(())
}

#[test]
fn read_streams_into_any_sink() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"k", b"payload")?;

    let mut out = Vec::new();
    assert!(db.read(b"k", &mut out)?);
    assert_eq!(out, b"payload");

    let mut absent = Vec::new();
    assert!(!db.read(b"nope", &mut absent)?);
    assert!(absent.is_empty());
    Ok(())
}

#[test]
fn write_drains_any_source() -> Result<()> {
    let (_dir, db) = open_db(1000);
    let mut source = Cursor::new(b"streamed value".to_vec());
    db.write(b"k", &mut source)?;
    assert_eq!(db.get(b"k")?, Some(b"streamed value".to_vec()));
    Ok(())
}

#[test]
fn empty_value_reads_as_live() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"k", b"")?;

    let mut out = Vec::new();
    assert!(db.read(b"k", &mut out)?);
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn empty_key_is_rejected() {
    let (_dir, db) = open_db(1000);
    assert!(db.put(b"", b"v").is_err());
    assert!(db.delete(b"").is_err());
}

// -------------------- Overwrite & delete --------------------

#[test]
fn most_recent_write_wins() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"k", b"v1")?;
    db.put(b"other", b"noise")?;
    db.put(b"k", b"v2")?;
    assert_eq!(db.get(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_hides_older_value() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"k", b"v")?;
    db.delete(b"k")?;
    assert_eq!(db.get(b"k")?, None);
    Ok(())
}

#[test]
fn write_after_delete_revives_key() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.delete(b"k")?;
    db.put(b"k", b"back")?;
    assert_eq!(db.get(b"k")?, Some(b"back".to_vec()));
    Ok(())
}

#[test]
fn overwrite_delete_rewrite_sequence() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"a", b"1")?;
    db.put(b"a", b"2")?;
    db.delete(b"a")?;
    db.put(b"a", b"3")?;
    assert_eq!(db.get(b"a")?, Some(b"3".to_vec()));
    Ok(())
}

#[test]
fn delete_of_unknown_key_is_ok() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.delete(b"never-written")?;
    assert_eq!(db.get(b"never-written")?, None);
    Ok(())
}

// -------------------- Rolling --------------------

#[test]
fn active_segment_rolls_at_capacity() -> Result<()> {
    // 10 records of 17 + 3 + 20 bytes against a 50-byte threshold must
    // roll several times.
    let (dir, db) = open_db_manual_compaction(50);
    for i in 0..10u32 {
        let key = format!("k{:02}", i);
        let value = vec![b'v'; 20];
        db.put(key.as_bytes(), &value)?;
    }

    let plain: Vec<String> = segment_files(dir.path())
        .into_iter()
        .filter(|n| n.starts_with("seg-"))
        .collect();
    assert!(plain.len() > 1, "expected rolls, got {:?}", plain);

    // Keys from before the rolls still resolve through older segments.
    assert_eq!(db.get(b"k00")?, Some(vec![b'v'; 20]));
    for i in 0..10u32 {
        let key = format!("k{:02}", i);
        assert_eq!(db.get(key.as_bytes())?, Some(vec![b'v'; 20]));
    }
    Ok(())
}

#[test]
fn reads_resolve_across_rolled_segments() -> Result<()> {
    // Threshold 1 rolls after every append, so every record lives in its
    // own sealed segment.
    let (_dir, db) = open_db(1);
    db.put(b"a", b"1")?;
    db.put(b"b", b"2")?;
    db.put(b"a", b"3")?;
    db.delete(b"b")?;

    assert_eq!(db.get(b"a")?, Some(b"3".to_vec()));
    assert_eq!(db.get(b"b")?, None);
    Ok(())
}

// -------------------- Lifecycle --------------------

#[test]
fn writes_fail_after_stop() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.put(b"k", b"v")?;
    db.stop()?;
    assert!(db.put(b"k2", b"v2").is_err());
    Ok(())
}

#[test]
fn stop_is_idempotent() -> Result<()> {
    let (_dir, db) = open_db(1000);
    db.stop()?;
    db.stop()?;
    Ok(())
}

#[test]
fn double_start_is_rejected() {
    let (_dir, db) = open_db(1000);
    assert!(db.start().is_err());
}

#[test]
fn debug_output_names_the_ring() {
    let (dir, db) = open_db(1000);
    let rendered = format!("{:?}", db);
    assert!(rendered.contains("segment_count"));
    assert!(rendered.contains("current_id"));
    assert_eq!(db.segment_count(), 1);
    assert_eq!(db.base_dir(), dir.path());
}

// -------------------- Concurrency --------------------

#[test]
fn concurrent_mixed_workload() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(crate::Database::new(dir.path(), 512));
    db.start()?;

    let threads: Vec<_> = (0..8u32)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..50u32 {
                    let key = format!("t{}-k{}", t, i);
                    let value = format!("value-{}-{}", t, i);
                    db.put(key.as_bytes(), value.as_bytes()).unwrap();

                    // Read back own writes and probe foreign keyspaces.
                    let got = db.get(key.as_bytes()).unwrap();
                    assert_eq!(got, Some(value.into_bytes()));
                    let foreign = format!("t{}-k{}", (t + 1) % 8, i);
                    let _ = db.get(foreign.as_bytes()).unwrap();

                    if i % 3 == 0 {
                        db.delete(key.as_bytes()).unwrap();
                    }
                }
            })
        })
        .collect();

    for handle in threads {
        handle.join().unwrap();
    }

    for t in 0..8u32 {
        for i in 0..50u32 {
            let key = format!("t{}-k{}", t, i);
            let expected = if i % 3 == 0 {
                None
            } else {
                Some(format!("value-{}-{}", t, i).into_bytes())
            };
            assert_eq!(db.get(key.as_bytes())?, expected, "key {}", key);
        }
    }

    db.stop()?;
    Ok(())
}
