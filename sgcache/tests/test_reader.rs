use futures_util::StreamExt;
use sgcache::reader::CancelReader;
use std::io::SeekFrom;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio_test::{assert_err, assert_ok};
use tokio_util::io::ReaderStream;

/// Écrit un artefact de ressource et ouvre un lecteur dessus.
fn write_resource(content: &[u8]) -> (TempDir, Arc<CancelReader>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("artifact.bin");
    std::fs::write(&path, content).unwrap();
    let reader = Arc::new(CancelReader::open(&path).unwrap());
    (dir, reader)
}

/// Contenu non uniforme, pour détecter les recollages de chunks dans le
/// mauvais ordre.
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_stream_whole_resource() {
    let content = patterned(100_000);
    let (_dir, reader) = write_resource(&content);

    let mut stream = ReaderStream::new(reader.cursor());
    let mut collected = Vec::new();
    let mut chunks = 0usize;
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
        chunks += 1;
    }

    assert_eq!(collected, content);
    // Le corps part en plusieurs morceaux, pas d'une seule pièce
    assert!(chunks > 1);
}

#[tokio::test]
async fn test_stream_range_window() {
    let content = patterned(1_000);
    let (_dir, reader) = write_resource(&content);

    // Même découpe qu'une requête `Range: bytes=900-999`
    let mut cursor = reader.cursor();
    std::io::Seek::seek(&mut cursor, SeekFrom::Start(900)).unwrap();
    let mut stream = ReaderStream::new(cursor.take(100));

    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, &content[900..]);
}

#[tokio::test]
async fn test_cancel_from_concurrent_task_stops_stream() {
    let (_dir, reader) = write_resource(&vec![7u8; 1 << 20]);
    let mut stream = ReaderStream::new(reader.cursor());

    let first = stream.next().await.unwrap();
    assert_ok!(first);

    let canceller = {
        let reader = Arc::clone(&reader);
        tokio::spawn(async move { reader.cancel() })
    };
    canceller.await.unwrap();

    // Le flux échoue au poll suivant au lieu de servir des octets périmés
    let next = stream.next().await.unwrap();
    let err = assert_err!(next);
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

#[tokio::test]
async fn test_concurrent_streams_share_one_reader() {
    let content = patterned(200_000);
    let (_dir, reader) = write_resource(&content);

    let spawn_collect = |reader: Arc<CancelReader>| {
        tokio::spawn(async move {
            let mut cursor = reader.cursor();
            let mut data = Vec::new();
            cursor.read_to_end(&mut data).await.unwrap();
            data
        })
    };

    let first = spawn_collect(Arc::clone(&reader));
    let second = spawn_collect(Arc::clone(&reader));
    assert_eq!(first.await.unwrap(), content);
    assert_eq!(second.await.unwrap(), content);
}

#[tokio::test]
async fn test_seek_past_end_streams_nothing() {
    let (_dir, reader) = write_resource(b"short");
    let mut cursor = reader.cursor();
    std::io::Seek::seek(&mut cursor, SeekFrom::Start(reader.len() + 10)).unwrap();

    let mut stream = ReaderStream::new(cursor);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_cursor_created_after_cancel_fails() {
    let (_dir, reader) = write_resource(b"gone before the request arrived");
    reader.cancel();

    let mut stream = ReaderStream::new(reader.cursor());
    let item = stream.next().await.unwrap();
    assert_err!(item);
}
