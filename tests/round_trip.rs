mod common;

use bytes::Bytes;
use common::{framed, memory_session, pattern, sqlite_session};
use gridfile::{
    BlobSession, Chunk, ErrorKind, FileQuery, UploadOptions, config::DEFAULT_CHUNK_SIZE,
    store::ChunksCollection,
};

const CHUNK: u32 = 256;

async fn assert_round_trip(session: &BlobSession, len: usize) {
    let data = pattern(len);
    let record = session
        .upload(
            framed(&data, 100),
            UploadOptions::new(format!("blob-{len}")).chunk_size(CHUNK),
        )
        .await
        .unwrap();

    assert_eq!(record.length, len as u64, "length for {len}");
    assert_eq!(record.md5, format!("{:x}", md5::compute(&data)), "md5 for {len}");

    let expected: Vec<u32> = (0..record.chunk_count() as u32).collect();
    let stored = session
        .bucket()
        .chunk_store()
        .chunk_numbers(record.id)
        .await
        .unwrap();
    assert_eq!(stored, expected, "chunk numbers for {len}");

    let mut out = Vec::<u8>::new();
    session.download(record.id, &mut out).await.unwrap();
    assert_eq!(out, data, "content for {len}");
}

const SIZES: [usize; 7] = [0, 1, 255, 256, 257, 512, 3 * 256 + 17];

#[tokio::test]
async fn round_trip_memory() {
    let session = memory_session().await;
    for len in SIZES {
        assert_round_trip(&session, len).await;
    }
}

#[tokio::test]
async fn round_trip_sqlite() {
    let session = sqlite_session().await;
    for len in SIZES {
        assert_round_trip(&session, len).await;
    }
}

#[tokio::test]
async fn small_file_fits_one_default_chunk() {
    let session = sqlite_session().await;
    let data = pattern(7945);
    let record = session
        .upload(framed(&data, 1024), UploadOptions::new("package.json"))
        .await
        .unwrap();

    assert_eq!(record.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(record.length, 7945);
    assert_eq!(record.md5, "614c8e5b47ad4c212cbad0c672d53df1");

    let store = session.bucket().chunk_store();
    assert_eq!(store.chunk_numbers(record.id).await.unwrap(), vec![0]);

    let found = session.find_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(found.md5, record.md5);

    let mut out = Vec::<u8>::new();
    session.download(record.id, &mut out).await.unwrap();
    assert_eq!(out.len(), 7945);
    assert_eq!(out, data);
}

#[tokio::test]
async fn empty_file_has_known_digest_and_no_chunks() {
    let session = memory_session().await;
    let record = session
        .upload_bytes(Bytes::new(), UploadOptions::new("empty"))
        .await
        .unwrap();
    assert_eq!(record.md5, "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(
        session.bucket().chunk_store().count_chunks(record.id).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn passthrough_fields_survive_sqlite() {
    let session = sqlite_session().await;
    let record = session
        .upload_bytes(
            &b"{\"name\":\"gridfile\"}"[..],
            UploadOptions::new("package.json")
                .content_type("application/json")
                .metadata(serde_json::json!("test"))
                .alias("test-alias1")
                .alias("alias-2"),
        )
        .await
        .unwrap();

    let found = session
        .find_one(&FileQuery::ByFilename("package.json".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, record.id);
    assert_eq!(found.content_type.as_deref(), Some("application/json"));
    assert_eq!(found.metadata, Some(serde_json::json!("test")));
    assert_eq!(found.aliases, vec!["test-alias1", "alias-2"]);
}

#[tokio::test]
async fn delete_is_idempotent_on_sqlite() {
    let session = sqlite_session().await;
    let record = session
        .upload(framed(&pattern(1000), 64), UploadOptions::new("d").chunk_size(CHUNK))
        .await
        .unwrap();

    let first = session.delete(record.id).await.unwrap();
    assert_eq!(first.map(|r| r.md5), Some(record.md5.clone()));
    assert!(session.delete(record.id).await.unwrap().is_none());
    assert_eq!(
        session.bucket().chunk_store().count_chunks(record.id).await.unwrap(),
        0
    );
    assert!(session.find_one(&FileQuery::Any).await.unwrap().is_none());

    let err = session.download(record.id, Vec::<u8>::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn missing_chunk_is_an_integrity_failure() {
    let session = memory_session().await;
    let record = session
        .upload(framed(&pattern(600), 50), UploadOptions::new("gap").chunk_size(CHUNK))
        .await
        .unwrap();

    // Drop every chunk, then put back only chunk 0: the tail is gone.
    let store = session.bucket().chunk_store();
    store.delete_chunks(record.id).await.unwrap();
    let head = Bytes::copy_from_slice(&pattern(600)[..256]);
    reinsert(&session, Chunk::new(record.id, 0, head)).await;

    let err = session.download(record.id, Vec::<u8>::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[tokio::test]
async fn all_chunks_missing_is_not_found() {
    let session = memory_session().await;
    let record = session
        .upload(framed(&pattern(300), 50), UploadOptions::new("gone").chunk_size(CHUNK))
        .await
        .unwrap();
    session
        .bucket()
        .chunk_store()
        .delete_chunks(record.id)
        .await
        .unwrap();

    let err = session.download(record.id, Vec::<u8>::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn extra_chunk_is_an_integrity_failure() {
    let session = memory_session().await;
    let record = session
        .upload(framed(&pattern(300), 50), UploadOptions::new("extra").chunk_size(CHUNK))
        .await
        .unwrap();
    reinsert(&session, Chunk::new(record.id, 2, Bytes::from_static(b"junk"))).await;

    let mut out = Vec::<u8>::new();
    let err = session.download(record.id, &mut out).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert!(out.len() <= 300);
}

#[tokio::test]
async fn tampered_chunk_fails_digest_check() {
    let session = memory_session().await;
    let data = pattern(300);
    let record = session
        .upload(framed(&data, 50), UploadOptions::new("tampered").chunk_size(CHUNK))
        .await
        .unwrap();

    session
        .bucket()
        .chunk_store()
        .delete_chunks(record.id)
        .await
        .unwrap();
    let mut forged = data.clone();
    forged[10] ^= 0xff;
    reinsert(&session, Chunk::new(record.id, 0, Bytes::copy_from_slice(&forged[..256]))).await;
    reinsert(&session, Chunk::new(record.id, 1, Bytes::copy_from_slice(&forged[256..]))).await;

    let err = session.download(record.id, Vec::<u8>::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

async fn reinsert(session: &BlobSession, chunk: Chunk) {
    let chunks = session.bucket().chunk_store().collection().clone();
    chunks.insert_one(&chunk).await.unwrap();
}
