use crate::error::LibraryError;
use crate::model::{Track, is_audio_mime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const RECORD_EXTENSION: &str = "track";

/// Durable keyed storage for audio payloads.
///
/// Every call is atomic on its own; nothing spans calls.
pub trait BlobStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8], mime_type: &str) -> Result<(), LibraryError>;
    fn get(&self, name: &str) -> Result<Track, LibraryError>;
    /// All stored tracks in no particular order.
    fn get_all(&self) -> Result<Vec<Track>, LibraryError>;
    /// Removing an absent name is not an error.
    fn delete(&self, name: &str) -> Result<(), LibraryError>;

    fn names(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self
            .get_all()?
            .into_iter()
            .map(|track| track.name)
            .collect())
    }
}

pub fn validate_put(name: &str, mime_type: &str) -> Result<(), LibraryError> {
    let bad_name = name.trim().is_empty()
        || name
            .chars()
            .any(|ch| ch == '/' || ch == '\\' || ch.is_control());
    if bad_name || !is_audio_mime(mime_type) {
        return Err(LibraryError::Validation {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    name: String,
    mime_type: String,
    len: u64,
}

/// One file per track: a JSON header line followed by the raw payload.
#[derive(Debug)]
pub struct DirBlobStore {
    dir: PathBuf,
    temp_counter: AtomicU64,
}

impl DirBlobStore {
    pub fn open(dir: &Path) -> Result<Self, LibraryError> {
        fs::create_dir_all(dir)
            .map_err(|err| LibraryError::storage(&format!("cannot create {}", dir.display()), err))?;
        tracing::debug!(dir = %dir.display(), "opened track store");
        Ok(Self {
            dir: dir.to_path_buf(),
            temp_counter: AtomicU64::new(0),
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", name_digest(name)))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}.{}.{seq}.tmp",
            name_digest(name),
            std::process::id()
        ))
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, LibraryError> {
        let read_dir = fs::read_dir(&self.dir)
            .map_err(|err| LibraryError::storage(&format!("cannot list {}", self.dir.display()), err))?;
        Ok(read_dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == RECORD_EXTENSION)
            })
            .collect())
    }
}

impl BlobStore for DirBlobStore {
    fn put(&self, name: &str, bytes: &[u8], mime_type: &str) -> Result<(), LibraryError> {
        validate_put(name, mime_type)?;

        let header = RecordHeader {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            len: bytes.len() as u64,
        };
        let header_line = serde_json::to_string(&header)
            .map_err(|err| LibraryError::storage("cannot encode record header", err))?;

        let temp = self.temp_path(name);
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(header_line.as_bytes())?;
            file.write_all(b"\n")?;
            file.write_all(bytes)?;
            file.sync_all()
        })();
        if let Err(err) = written.and_then(|()| fs::rename(&temp, self.record_path(name))) {
            let _ = fs::remove_file(&temp);
            return Err(LibraryError::storage(&format!("cannot save {name}"), err));
        }

        tracing::debug!(track = %name, bytes = bytes.len(), "stored track");
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Track, LibraryError> {
        let path = self.record_path(name);
        let track = match read_record(&path) {
            Ok(track) => track,
            Err(RecordError::Missing) => return Err(LibraryError::NotFound(name.to_string())),
            Err(RecordError::Broken(reason)) => {
                return Err(LibraryError::Storage(format!("cannot load {name}: {reason}")));
            }
        };
        if track.name != name {
            return Err(LibraryError::NotFound(name.to_string()));
        }
        Ok(track)
    }

    fn get_all(&self) -> Result<Vec<Track>, LibraryError> {
        let mut tracks = Vec::new();
        for path in self.record_paths()? {
            match read_record(&path) {
                Ok(track) => tracks.push(track),
                Err(RecordError::Missing) => {}
                Err(RecordError::Broken(reason)) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping unreadable track record");
                }
            }
        }
        Ok(tracks)
    }

    fn delete(&self, name: &str) -> Result<(), LibraryError> {
        match fs::remove_file(self.record_path(name)) {
            Ok(()) => {
                tracing::debug!(track = %name, "deleted track");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LibraryError::storage(&format!("cannot remove {name}"), err)),
        }
    }

    fn names(&self) -> Result<Vec<String>, LibraryError> {
        let mut names = Vec::new();
        for path in self.record_paths()? {
            match read_header(&path) {
                Ok(header) => names.push(header.name),
                Err(RecordError::Missing) => {}
                Err(RecordError::Broken(reason)) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping unreadable track header");
                }
            }
        }
        Ok(names)
    }
}

enum RecordError {
    Missing,
    Broken(String),
}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == ErrorKind::NotFound {
            Self::Missing
        } else {
            Self::Broken(err.to_string())
        }
    }
}

/// Returns the header and the number of bytes its line occupies.
fn read_header_from(reader: &mut impl BufRead) -> Result<(RecordHeader, u64), RecordError> {
    let mut line = String::new();
    let consumed = reader.read_line(&mut line)?;
    let header = serde_json::from_str(line.trim_end())
        .map_err(|err| RecordError::Broken(format!("bad header: {err}")))?;
    Ok((header, consumed as u64))
}

/// Reads only the header, but rejects records whose file size disagrees with
/// it so a listing never names a track that `read_record` would refuse.
fn read_header(path: &Path) -> Result<RecordHeader, RecordError> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let (header, header_len) = read_header_from(&mut reader)?;
    let payload_len = file_len.saturating_sub(header_len);
    if payload_len != header.len {
        return Err(RecordError::Broken(format!(
            "payload size mismatch ({payload_len} of {} bytes)",
            header.len
        )));
    }
    Ok(header)
}

fn read_record(path: &Path) -> Result<Track, RecordError> {
    let mut reader = BufReader::new(File::open(path)?);
    let (header, _) = read_header_from(&mut reader)?;
    let mut payload = Vec::with_capacity(usize::try_from(header.len).unwrap_or(0));
    reader.read_to_end(&mut payload)?;
    if payload.len() as u64 != header.len {
        return Err(RecordError::Broken(format!(
            "truncated payload ({} of {} bytes)",
            payload.len(),
            header.len
        )));
    }
    Ok(Track {
        name: header.name,
        payload,
        mime_type: header.mime_type,
    })
}

fn name_digest(name: &str) -> String {
    Sha256::digest(name.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Volatile store used by tests and by the fallback mode when the disk
/// store is unavailable.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    tracks: Mutex<HashMap<String, Track>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Track>>, LibraryError> {
        self.tracks
            .lock()
            .map_err(|_| LibraryError::Storage(String::from("memory store lock poisoned")))
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, name: &str, bytes: &[u8], mime_type: &str) -> Result<(), LibraryError> {
        validate_put(name, mime_type)?;
        self.lock()?
            .insert(name.to_string(), Track::new(name, bytes.to_vec(), mime_type));
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Track, LibraryError> {
        self.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))
    }

    fn get_all(&self) -> Result<Vec<Track>, LibraryError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn delete(&self, name: &str) -> Result<(), LibraryError> {
        self.lock()?.remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_overwrites_existing_name() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.put("song.mp3", b"old", "audio/mpeg").expect("first put");
        store.put("song.mp3", b"new", "audio/mpeg").expect("second put");

        let all = store.get_all().expect("get_all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload, b"new");
    }

    #[test]
    fn records_survive_reopening() {
        let dir = tempdir().expect("tempdir");
        {
            let store = DirBlobStore::open(dir.path()).expect("open");
            store
                .put("Track One.flac", &[0, 1, 2, 255], "audio/flac")
                .expect("put");
        }
        let reopened = DirBlobStore::open(dir.path()).expect("reopen");
        let track = reopened.get("Track One.flac").expect("get");
        assert_eq!(track.payload, vec![0, 1, 2, 255]);
        assert_eq!(track.mime_type, "audio/flac");
    }

    #[test]
    fn payload_may_contain_newlines() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.put("a.wav", b"\n\n{\"x\":1}\n", "audio/wav").expect("put");
        assert_eq!(store.get("a.wav").expect("get").payload, b"\n\n{\"x\":1}\n");
    }

    #[test]
    fn rejects_non_audio_mime_type() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        let err = store.put("notes.txt", b"x", "text/plain").expect_err("invalid");
        assert!(matches!(err, LibraryError::Validation { .. }));
        assert!(store.get_all().expect("get_all").is_empty());
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(validate_put("../escape.mp3", "audio/mpeg").is_err());
        assert!(validate_put("dir\\song.mp3", "audio/mpeg").is_err());
        assert!(validate_put("   ", "audio/mpeg").is_err());
        assert!(validate_put("fine name.mp3", "audio/mpeg").is_ok());
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        assert_eq!(
            store.get("ghost.mp3"),
            Err(LibraryError::NotFound(String::from("ghost.mp3")))
        );
    }

    #[test]
    fn delete_absent_is_noop() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.delete("ghost.mp3").expect("delete absent");
        store.put("a.mp3", b"a", "audio/mpeg").expect("put");
        store.delete("a.mp3").expect("delete");
        assert!(store.names().expect("names").is_empty());
    }

    #[test]
    fn truncated_record_is_skipped_in_listing_and_fails_get() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.put("good.mp3", b"good", "audio/mpeg").expect("put good");
        store.put("bad.mp3", b"0123456789", "audio/mpeg").expect("put bad");

        let bad_path = store.record_path("bad.mp3");
        let raw = fs::read(&bad_path).expect("read");
        fs::write(&bad_path, &raw[..raw.len() - 4]).expect("truncate");

        let names: Vec<String> = store
            .get_all()
            .expect("get_all")
            .into_iter()
            .map(|track| track.name)
            .collect();
        assert_eq!(names, vec![String::from("good.mp3")]);
        assert!(store.get("bad.mp3").expect_err("broken").is_storage());
    }

    #[test]
    fn names_agrees_with_get_all_when_a_payload_is_cut_short() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            store.put(name, b"0123456789", "audio/mpeg").expect("put");
        }
        let cut = store.record_path("c.mp3");
        let raw = fs::read(&cut).expect("read");
        fs::write(&cut, &raw[..raw.len() - 3]).expect("truncate");

        let mut listed = store.names().expect("names");
        listed.sort();
        let mut loaded: Vec<String> = store
            .get_all()
            .expect("get_all")
            .into_iter()
            .map(|track| track.name)
            .collect();
        loaded.sort();
        assert_eq!(listed, vec![String::from("a.mp3"), String::from("b.mp3")]);
        assert_eq!(listed, loaded);
    }

    #[test]
    fn names_skips_records_with_trailing_garbage() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.put("long.mp3", b"abc", "audio/mpeg").expect("put");
        let path = store.record_path("long.mp3");
        let mut raw = fs::read(&path).expect("read");
        raw.extend_from_slice(b"extra");
        fs::write(&path, raw).expect("append");

        assert!(store.names().expect("names").is_empty());
        assert!(store.get("long.mp3").expect_err("broken").is_storage());
    }

    #[test]
    fn names_reads_headers_only() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        store.put("b.mp3", b"b", "audio/mpeg").expect("put");
        store.put("a.mp3", b"a", "audio/mpeg").expect("put");
        let mut names = store.names().expect("names");
        names.sort();
        assert_eq!(names, vec![String::from("a.mp3"), String::from("b.mp3")]);
    }

    #[test]
    fn concurrent_puts_of_one_name_keep_a_single_record() {
        let dir = tempdir().expect("tempdir");
        let store = DirBlobStore::open(dir.path()).expect("open");
        std::thread::scope(|scope| {
            for n in 0..8_u8 {
                let store = &store;
                scope.spawn(move || {
                    store
                        .put("race.mp3", &[n; 64], "audio/mpeg")
                        .expect("concurrent put");
                });
            }
        });

        let all = store.get_all().expect("get_all");
        assert_eq!(all.len(), 1);
        let first = all[0].payload[0];
        assert!(all[0].payload.iter().all(|byte| *byte == first));
        let leftovers = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn memory_store_matches_contract() {
        let store = MemoryBlobStore::new();
        store.put("x.ogg", b"1", "audio/ogg").expect("put");
        store.put("x.ogg", b"2", "audio/ogg").expect("overwrite");
        assert_eq!(store.get("x.ogg").expect("get").payload, b"2");
        assert!(store.put("x.txt", b"1", "text/plain").is_err());
        store.delete("x.ogg").expect("delete");
        store.delete("x.ogg").expect("delete again");
        assert!(matches!(store.get("x.ogg"), Err(LibraryError::NotFound(_))));
    }
}
