mod common;

use arkive::{ArchiveHandle, ArchiveState, ArkError, ArkOptions};
use common::{reference_archive, ArkBuilder};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;
use tempfile::NamedTempFile;

#[test]
fn test_close_is_idempotent_and_final() {
    let ark = ArchiveHandle::from_source(reference_archive().bytes, ArkOptions::default()).unwrap();
    assert_eq!(ark.state(), ArchiveState::Opened);
    let kept = ark.extract("a.txt").unwrap();

    ark.close().unwrap();
    ark.close().unwrap();
    assert!(ark.is_closed());

    assert!(matches!(ark.extract("a.txt"), Err(ArkError::Closed)));
    assert!(matches!(ark.entries(), Err(ArkError::Closed)));
    assert!(matches!(ark.lookup("a.txt"), Err(ArkError::Closed)));
    assert!(matches!(ark.read_at("a.txt", 0, &mut [0u8; 2]), Err(ArkError::Closed)));
    assert!(matches!(ark.open_entry("a.txt"), Err(ArkError::Closed)));

    // Data extracted before close is an independent copy.
    assert_eq!(kept, b"hello");
    // Header metadata stays readable.
    assert_eq!(ark.encryption_key(), 0xDEADBEEF);
}

#[test]
fn test_open_reader_fails_after_close() {
    let ark = ArchiveHandle::from_source(
        ArkBuilder::v2(4).file("big", &vec![1u8; 10_000]).build().bytes,
        ArkOptions { read_chunk_size: 100, ..ArkOptions::default() },
    )
    .unwrap();
    let mut reader = ark.open_entry("big").unwrap();
    let mut head = [0u8; 50];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(head, [1u8; 50]);

    ark.close().unwrap();
    let err = reader.read(&mut head).unwrap_err();
    assert!(matches!(ArkError::from_io(err), ArkError::Closed));
}

#[test]
fn test_concurrent_extract_from_file() {
    let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 5000 + i as usize * 100]).collect();
    let mut builder = ArkBuilder::v2(0xC0C0);
    for (i, p) in payloads.iter().enumerate() {
        builder = builder.file(&format!("f{i}.bin"), p);
    }
    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(&builder.build().bytes).unwrap();
    tmp.flush().unwrap();

    let ark = Arc::new(ArchiveHandle::open(tmp.path()).unwrap());
    let payloads = Arc::new(payloads);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ark = Arc::clone(&ark);
            let payloads = Arc::clone(&payloads);
            thread::spawn(move || {
                for round in 0..20 {
                    let i = (t + round) % payloads.len();
                    let data = ark.extract(format!("f{i}.bin")).unwrap();
                    assert_eq!(data, payloads[i]);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_close_during_concurrent_reads() {
    let payload = vec![0x42u8; 64 * 1024];
    let built = ArkBuilder::v1(0x77).file("x", &payload).build();
    let ark = Arc::new(ArchiveHandle::from_source(built.bytes, ArkOptions::default()).unwrap());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let ark = Arc::clone(&ark);
            let payload = payload.clone();
            thread::spawn(move || loop {
                match ark.extract("x") {
                    Ok(data) => assert_eq!(data, payload),
                    Err(ArkError::Closed) => break,
                    Err(other) => panic!("unexpected {other:?}"),
                }
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(20));
    ark.close().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(ark.state(), ArchiveState::Closed);
}

#[test]
fn test_extract_many_matches_extract() {
    let mut builder = ArkBuilder::v2(9);
    for i in 0..32 {
        builder = builder.file(&format!("d{}/e{i}", i % 4), &vec![i as u8; i * 13]);
    }
    let ark = ArchiveHandle::from_source(builder.build().bytes, ArkOptions::default()).unwrap();
    let paths: Vec<String> = ark.entries().unwrap().iter().map(|e| e.path.clone()).collect();

    let results = ark.extract_many(&paths);
    for (path, result) in paths.iter().zip(results) {
        assert_eq!(result.unwrap(), ark.extract(path).unwrap(), "{path}");
    }
}
