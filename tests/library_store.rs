use reelbox::error::LibraryError;
use reelbox::library::{self, LibraryIndex, UploadItem};
use reelbox::store::{BlobStore, DirBlobStore};
use std::fs;

#[test]
fn imported_tracks_survive_reopen_in_sorted_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let store = DirBlobStore::open(dir.path()).expect("open");
        let report = library::import_batch(
            &store,
            &[
                UploadItem::new("zulu.mp3", "audio/mpeg", vec![0, 1, 2]),
                UploadItem::new("Echo.wav", "audio/wav", b"RIFF\nfake\n".to_vec()),
                UploadItem::new("lima.txt", "text/plain", b"nope".to_vec()),
            ],
        );
        assert_eq!(report.saved.len(), 2);
        assert!(report.storage_failure.is_none());
    }

    let store = DirBlobStore::open(dir.path()).expect("reopen");
    let index = LibraryIndex::rebuild(&store).expect("index");
    assert_eq!(index.names(), &["Echo.wav", "zulu.mp3"]);

    let echo = store.get("Echo.wav").expect("get");
    assert_eq!(echo.payload, b"RIFF\nfake\n");
    assert_eq!(echo.mime_type, "audio/wav");
}

#[test]
fn importing_from_disk_walks_folders() {
    let source = tempfile::tempdir().expect("source");
    let album = source.path().join("album");
    fs::create_dir_all(&album).expect("mkdir");
    fs::write(album.join("01 intro.flac"), b"flac").expect("write");
    fs::write(album.join("folder.jpg"), b"jpg").expect("write");

    let (items, unreadable) = library::collect_upload_items(&[source.path().to_path_buf()]);
    assert!(unreadable.is_empty());

    let target = tempfile::tempdir().expect("target");
    let store = DirBlobStore::open(target.path()).expect("open");
    let report = library::import_batch(&store, &items);

    assert_eq!(report.saved, vec![String::from("01 intro.flac")]);
    assert_eq!(
        report.skipped,
        vec![(String::from("folder.jpg"), String::from("not an audio file"))]
    );
}

#[test]
fn removed_tracks_are_gone_for_good() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DirBlobStore::open(dir.path()).expect("open");
    store.put("a.mp3", b"a", "audio/mpeg").expect("put");
    store.delete("a.mp3").expect("delete");
    store.delete("a.mp3").expect("second delete is a no-op");

    assert!(matches!(store.get("a.mp3"), Err(LibraryError::NotFound(_))));
    assert!(LibraryIndex::rebuild(&store).expect("index").is_empty());
}
