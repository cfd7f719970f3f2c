//! Clustered streams over file and transactional buffers

use plexus_rs::{
    ClusteredStreams, ContainerBuilder, ContainerOptions, FileBuffer, PlexusError, StreamTraits,
};
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::TempDir;

fn options() -> ContainerOptions {
    ContainerOptions {
        cluster_size: 64,
        reserved_streams: 2,
        ..ContainerOptions::default()
    }
}

#[test]
fn test_streams_survive_reopen_of_mapped_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("streams.plx");
    let long: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    {
        let buffer = FileBuffer::create_file(&path, 128, 4).unwrap();
        let streams = ClusteredStreams::create(buffer, &options()).unwrap();
        assert_eq!(streams.count().unwrap(), 2);

        let a = streams.add().unwrap();
        let b = streams.add().unwrap();
        streams.write_all(a, b"short").unwrap();
        streams.write_all(b, &long).unwrap();
        streams.write_all(0, b"reserved payload").unwrap();
        streams.flush().unwrap();
    }

    let buffer = FileBuffer::open_file(&path, 128, 4).unwrap();
    let streams = ClusteredStreams::open(buffer, &options()).unwrap();
    assert_eq!(streams.count().unwrap(), 4);
    assert_eq!(streams.reserved_streams().unwrap(), 2);
    assert_eq!(streams.read_all(2).unwrap(), b"short".to_vec());
    assert_eq!(streams.read_all(3).unwrap(), long);
    assert_eq!(streams.read_all(0).unwrap(), b"reserved payload".to_vec());
    assert!(streams.read_all(1).unwrap().is_empty());
}

#[test]
fn test_reap_keeps_slot_and_remove_shifts() {
    let dir = TempDir::new().unwrap();
    let container = ContainerBuilder::new()
        .file(dir.path().join("reap.plx"))
        .cluster_size(32)
        .reserved_streams(1)
        .build()
        .unwrap();
    let streams = container.streams();

    for word in ["zero", "one", "two", "three"] {
        let index = streams.add().unwrap();
        streams.write_all(index, word.as_bytes()).unwrap();
    }
    let free_before = streams.free_cluster_count().unwrap();

    streams.reap(2).unwrap();
    assert!(streams.is_reaped(2).unwrap());
    assert!(streams
        .fast_read_stream_descriptor_traits(2)
        .unwrap()
        .contains(StreamTraits::REAPED));
    assert_eq!(streams.count().unwrap(), 5);
    assert_eq!(streams.free_cluster_count().unwrap(), free_before + 1);
    assert!(matches!(streams.read_all(2), Err(PlexusError::StreamReaped(2))));
    assert!(matches!(
        streams.write_all(2, b"again"),
        Err(PlexusError::StreamReaped(2))
    ));
    // reaping twice is a no-op
    streams.reap(2).unwrap();

    streams.remove(1).unwrap();
    assert_eq!(streams.count().unwrap(), 4);
    assert!(streams.is_reaped(1).unwrap());
    assert_eq!(streams.read_all(2).unwrap(), b"two".to_vec());
    assert_eq!(streams.read_all(3).unwrap(), b"three".to_vec());

    assert!(matches!(streams.remove(0), Err(PlexusError::ReservedStream(0))));
    assert!(matches!(streams.reap(0), Err(PlexusError::ReservedStream(0))));
    assert!(matches!(
        streams.remove(9),
        Err(PlexusError::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_released_clusters_are_reused() {
    let container = ContainerBuilder::new()
        .in_memory()
        .cluster_size(32)
        .reserved_streams(0)
        .build()
        .unwrap();
    let streams = container.streams();

    let first = streams.add().unwrap();
    streams.write_all(first, &[1u8; 200]).unwrap();
    let total = streams.total_clusters().unwrap();

    streams.set_length(first, 0).unwrap();
    assert!(streams.free_cluster_count().unwrap() > 0);

    let second = streams.add().unwrap();
    streams.write_all(second, &[2u8; 150]).unwrap();
    assert_eq!(streams.total_clusters().unwrap(), total);
    assert_eq!(streams.read_all(second).unwrap(), vec![2u8; 150]);
}

#[test]
fn test_stream_handle_reads_writes_and_seeks() {
    let container = ContainerBuilder::new().in_memory().cluster_size(32).build().unwrap();
    let streams = container.streams();
    let index = streams.add().unwrap();

    let mut handle = streams.open_stream(index).unwrap();
    handle.write_all(b"hello clustered world").unwrap();
    handle.seek(SeekFrom::Start(6)).unwrap();
    let mut word = [0u8; 9];
    handle.read_exact(&mut word).unwrap();
    assert_eq!(&word, b"clustered");

    handle.seek(SeekFrom::End(-5)).unwrap();
    handle.write_all(b"WORLD!").unwrap();
    assert_eq!(handle.len().unwrap(), 22);
    drop(handle);

    assert_eq!(
        streams.read_all(index).unwrap(),
        b"hello clustered WORLD!".to_vec()
    );
}

#[test]
fn test_transactional_container_rolls_back_stream_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("txn.plx");
    let container = ContainerBuilder::new()
        .transactional(&path)
        .cluster_size(32)
        .reserved_streams(1)
        .build()
        .unwrap();
    assert!(container.is_transactional());

    let kept = container.streams().add().unwrap();
    container.streams().write_all(kept, b"kept").unwrap();
    container.commit().unwrap();

    let dropped = container.streams().add().unwrap();
    container.streams().write_all(dropped, b"dropped").unwrap();
    container.streams().write_all(kept, b"overwritten").unwrap();
    container.rollback().unwrap();

    assert_eq!(container.streams().count().unwrap(), 2);
    assert_eq!(container.streams().read_all(kept).unwrap(), b"kept".to_vec());
    drop(container);

    let reopened = ContainerBuilder::new().transactional(&path).build().unwrap();
    assert_eq!(reopened.streams().count().unwrap(), 2);
    assert_eq!(reopened.streams().read_all(1).unwrap(), b"kept".to_vec());
}
