use crate::error::LibraryError;
use crate::model::is_audio_mime;
use crate::store::{BlobStore, validate_put};
use rayon::prelude::*;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MIME_BY_EXTENSION: &[(&str, &str)] = &[
    ("mp3", "audio/mpeg"),
    ("flac", "audio/flac"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("oga", "audio/ogg"),
    ("opus", "audio/opus"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("weba", "audio/webm"),
];
const UNKNOWN_MIME: &str = "application/octet-stream";

/// Ordered track names derived from the store.
///
/// Backends enumerate in whatever order they like, so the index always
/// sorts by byte-wise name comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryIndex {
    names: Vec<String>,
}

impl LibraryIndex {
    pub fn rebuild(store: &dyn BlobStore) -> Result<Self, LibraryError> {
        Ok(Self::from_names(store.names()?))
    }

    pub fn from_names(mut names: Vec<String>) -> Self {
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .ok()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One file handed over by the upload side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadItem {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub saved: Vec<String>,
    pub skipped: Vec<(String, String)>,
    /// Set when a write failed because storage itself is unusable.
    pub storage_failure: Option<LibraryError>,
}

impl ImportReport {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.skipped.is_empty()
    }
}

/// Validate every item and write the valid ones.
///
/// Items are independent: a rejected item never blocks the rest of the
/// batch. Writes run concurrently; the store serializes same-name writes.
pub fn import_batch(store: &dyn BlobStore, items: &[UploadItem]) -> ImportReport {
    let mut report = ImportReport::default();
    let mut valid = Vec::new();

    for item in items {
        match validate_put(&item.file_name, &item.mime_type) {
            Ok(()) => valid.push(item),
            Err(err) => {
                tracing::info!(file = %item.file_name, mime = %item.mime_type, "skipping upload");
                report
                    .skipped
                    .push((item.file_name.clone(), skip_reason(&item.mime_type, &err)));
            }
        }
    }

    // Bounded by the rayon pool, however large the batch.
    let results: Vec<(String, Result<(), LibraryError>)> = valid
        .par_iter()
        .map(|item| {
            (
                item.file_name.clone(),
                store.put(&item.file_name, &item.bytes, &item.mime_type),
            )
        })
        .collect();

    for (name, result) in results {
        match result {
            Ok(()) => report.saved.push(name),
            Err(err) => {
                if err.is_storage() && report.storage_failure.is_none() {
                    report.storage_failure = Some(err.clone());
                }
                report.skipped.push((name, err.to_string()));
            }
        }
    }

    report.saved.sort();
    report
}

fn skip_reason(mime_type: &str, err: &LibraryError) -> String {
    match err {
        LibraryError::Validation { .. } if is_audio_mime(mime_type) => {
            String::from("invalid track name")
        }
        LibraryError::Validation { .. } => String::from("not an audio file"),
        other => other.to_string(),
    }
}

pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    MIME_BY_EXTENSION
        .iter()
        .find(|(known, _)| ext.eq_ignore_ascii_case(known))
        .map(|(_, mime)| *mime)
        .unwrap_or(UNKNOWN_MIME)
}

/// Turn picked paths into upload items. Directories are walked; every
/// regular file becomes an item so non-audio files are reported as skipped
/// rather than silently dropped.
pub fn collect_upload_items(paths: &[PathBuf]) -> (Vec<UploadItem>, Vec<(String, String)>) {
    let mut items = Vec::new();
    let mut unreadable = Vec::new();

    for root in paths {
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    unreadable.push((root.display().to_string(), err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            match fs::read(path) {
                Ok(bytes) => items.push(UploadItem {
                    mime_type: guess_mime_type(path).to_string(),
                    file_name,
                    bytes,
                }),
                Err(err) => unreadable.push((file_name, err.to_string())),
            }
        }
    }

    (items, unreadable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBlobStore;
    use tempfile::tempdir;

    #[test]
    fn index_is_sorted_regardless_of_store_order() {
        let store = MemoryBlobStore::new();
        for name in ["delta.mp3", "Alpha.mp3", "charlie.mp3", "bravo.mp3"] {
            store.put(name, b"x", "audio/mpeg").expect("put");
        }
        let index = LibraryIndex::rebuild(&store).expect("rebuild");
        assert_eq!(
            index.names(),
            &["Alpha.mp3", "bravo.mp3", "charlie.mp3", "delta.mp3"]
        );
        assert_eq!(index.index_of("charlie.mp3"), Some(2));
        assert_eq!(index.name_at(0), Some("Alpha.mp3"));
        assert_eq!(index.name_at(4), None);
        assert!(index.contains("bravo.mp3"));
        assert!(!index.contains("echo.mp3"));
    }

    #[test]
    fn batch_with_one_invalid_item_saves_the_rest() {
        let store = MemoryBlobStore::new();
        let items = vec![
            UploadItem::new("a.mp3", "audio/mpeg", b"a".to_vec()),
            UploadItem::new("readme.txt", "text/plain", b"r".to_vec()),
            UploadItem::new("b.ogg", "audio/ogg", b"b".to_vec()),
        ];

        let report = import_batch(&store, &items);

        assert_eq!(report.saved, vec![String::from("a.mp3"), String::from("b.ogg")]);
        assert_eq!(
            report.skipped,
            vec![(String::from("readme.txt"), String::from("not an audio file"))]
        );
        assert_eq!(store.names().expect("names").len(), 2);
        assert!(report.storage_failure.is_none());
    }

    #[test]
    fn large_batch_is_written_without_a_thread_per_item() {
        let store = MemoryBlobStore::new();
        let items: Vec<UploadItem> = (0..4000)
            .map(|n| UploadItem::new(format!("track-{n:04}.mp3"), "audio/mpeg", vec![0; 16]))
            .collect();

        let report = import_batch(&store, &items);

        assert_eq!(report.saved.len(), 4000);
        assert!(report.skipped.is_empty());
        assert_eq!(report.saved.first().map(String::as_str), Some("track-0000.mp3"));
        assert_eq!(store.names().expect("names").len(), 4000);
    }

    #[test]
    fn mime_guess_covers_common_audio_extensions() {
        assert_eq!(guess_mime_type(Path::new("x.MP3")), "audio/mpeg");
        assert_eq!(guess_mime_type(Path::new("x.flac")), "audio/flac");
        assert_eq!(guess_mime_type(Path::new("x.m4a")), "audio/mp4");
        assert_eq!(guess_mime_type(Path::new("notes.txt")), UNKNOWN_MIME);
        assert_eq!(guess_mime_type(Path::new("no_extension")), UNKNOWN_MIME);
    }

    #[test]
    fn collect_walks_directories_and_keeps_non_audio_for_reporting() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("album");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("one.mp3"), b"1").expect("write");
        fs::write(nested.join("cover.jpg"), b"j").expect("write");
        fs::write(dir.path().join("two.wav"), b"2").expect("write");

        let (items, unreadable) = collect_upload_items(&[dir.path().to_path_buf()]);

        assert!(unreadable.is_empty());
        let mut names: Vec<(&str, &str)> = items
            .iter()
            .map(|item| (item.file_name.as_str(), item.mime_type.as_str()))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("cover.jpg", UNKNOWN_MIME),
                ("one.mp3", "audio/mpeg"),
                ("two.wav", "audio/wav"),
            ]
        );
    }

    #[test]
    fn collect_reports_missing_paths() {
        let dir = tempdir().expect("tempdir");
        let (items, unreadable) = collect_upload_items(&[dir.path().join("missing.mp3")]);
        assert!(items.is_empty());
        assert_eq!(unreadable.len(), 1);
    }
}
