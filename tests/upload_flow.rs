use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Write};

use clap::Parser;
use dropbox_upload::api::{ApiError, FileMetadata, FolderMetadata, StorageApi, UploadCursor};
use dropbox_upload::config::{normalize_args, Args, Config};
use dropbox_upload::transfer::{self, DirectoryStatus};
use reqwest::StatusCode;

/// In-memory stand-in for the provider: keeps folders, committed files and
/// open sessions, and checks session offsets like the real service does.
#[derive(Default)]
struct MemoryStore {
    folders: RefCell<Vec<String>>,
    files: RefCell<HashMap<String, Vec<u8>>>,
    sessions: RefCell<HashMap<String, Vec<u8>>>,
}

fn conflict(endpoint: &str, summary: &str) -> ApiError {
    ApiError::Endpoint {
        endpoint: endpoint.into(),
        status: StatusCode::CONFLICT,
        summary: summary.into(),
    }
}

impl MemoryStore {
    fn commit(&self, path: &str, data: Vec<u8>) -> Result<FileMetadata, ApiError> {
        let mut files = self.files.borrow_mut();
        if files.contains_key(path) {
            return Err(conflict("files/upload", "path/conflict/file/.."));
        }
        let size = data.len() as u64;
        files.insert(path.to_string(), data);
        Ok(FileMetadata {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path_display: Some(format!("/{path}")),
            size,
        })
    }

    fn check_offset(&self, cursor: &UploadCursor) -> Result<(), ApiError> {
        let sessions = self.sessions.borrow();
        let data = sessions
            .get(&cursor.session_id)
            .ok_or_else(|| conflict("files/upload_session", "not_found/.."))?;
        if data.len() as u64 != cursor.offset {
            return Err(conflict("files/upload_session", "incorrect_offset/.."));
        }
        Ok(())
    }
}

impl StorageApi for MemoryStore {
    fn create_folder(&self, path: &str) -> Result<FolderMetadata, ApiError> {
        let mut folders = self.folders.borrow_mut();
        if folders.iter().any(|f| f == path) {
            return Err(conflict("files/create_folder_v2", "path/conflict/folder/.."));
        }
        folders.push(path.to_string());
        Ok(FolderMetadata {
            name: path.to_string(),
            path_display: Some(format!("/{path}")),
        })
    }

    fn upload(&self, path: &str, body: &[u8]) -> Result<FileMetadata, ApiError> {
        self.commit(path, body.to_vec())
    }

    fn start_session(&self, body: &[u8]) -> Result<String, ApiError> {
        let mut sessions = self.sessions.borrow_mut();
        let id = format!("session-{}", sessions.len());
        sessions.insert(id.clone(), body.to_vec());
        Ok(id)
    }

    fn append_session(&self, cursor: &UploadCursor, body: &[u8]) -> Result<(), ApiError> {
        self.check_offset(cursor)?;
        if let Some(data) = self.sessions.borrow_mut().get_mut(&cursor.session_id) {
            data.extend_from_slice(body);
        }
        Ok(())
    }

    fn finish_session(
        &self,
        cursor: &UploadCursor,
        path: &str,
        body: &[u8],
    ) -> Result<FileMetadata, ApiError> {
        self.check_offset(cursor)?;
        let mut data = self
            .sessions
            .borrow_mut()
            .remove(&cursor.session_id)
            .unwrap_or_default();
        data.extend_from_slice(body);
        self.commit(path, data)
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn config_for(argv: &[&str]) -> Config {
    let mut full = vec!["dropbox-upload", "-appID", "id", "-appSecret", "secret", "-token", "t"];
    full.extend_from_slice(argv);
    let args = Args::try_parse_from(normalize_args(full)).unwrap();
    Config::resolve_with(args, |_| None).unwrap()
}

#[test]
fn local_file_is_uploaded_in_chunks_with_exact_progress() {
    let mut local = tempfile::NamedTempFile::new().unwrap();
    let data = pattern(2_500);
    local.write_all(&data).unwrap();

    let store = MemoryStore::default();
    let mut reported = 0u64;
    let summary = transfer::upload(
        &store,
        File::open(local.path()).unwrap(),
        "backups/blob.bin",
        1_024,
        |n: u64| reported += n,
    )
    .unwrap();

    assert_eq!(reported, 2_500);
    assert_eq!(summary.bytes, 2_500);
    assert_eq!(summary.metadata.size, 2_500);
    assert_eq!(summary.requests, 3);
    assert_eq!(store.files.borrow()["backups/blob.bin"], data);
    assert!(store.sessions.borrow().is_empty());
}

#[test]
fn whole_and_chunked_uploads_report_the_same_total() {
    let data = pattern(4_096);
    for chunk_size in [512, 4_095, 4_096, 4_097, 1 << 20] {
        let store = MemoryStore::default();
        let mut reported = 0u64;
        transfer::upload(&store, Cursor::new(data.clone()), "f", chunk_size, |n: u64| {
            reported += n
        })
        .unwrap();
        assert_eq!(reported, 4_096, "chunk size {chunk_size}");
        assert_eq!(store.files.borrow()["f"], data, "chunk size {chunk_size}");
    }
}

#[test]
fn stream_of_unknown_length_is_uploaded() {
    // Standard input is just another reader without a known size.
    let store = MemoryStore::default();
    let summary = transfer::upload(&store, &b"piped through a shell"[..], "notes.txt", 4, |_: u64| {})
        .unwrap();
    assert_eq!(summary.bytes, 21);
    assert_eq!(store.files.borrow()["notes.txt"], b"piped through a shell");
}

#[test]
fn creating_a_directory_twice_succeeds() {
    let store = MemoryStore::default();
    assert_eq!(
        transfer::ensure_directory(&store, "photos").unwrap(),
        DirectoryStatus::Created
    );
    assert_eq!(
        transfer::ensure_directory(&store, "photos").unwrap(),
        DirectoryStatus::AlreadyExists
    );
}

#[test]
fn upload_never_overwrites_an_existing_file() {
    let store = MemoryStore::default();
    transfer::upload(&store, &b"one"[..], "same", 16, |_: u64| {}).unwrap();
    let err = transfer::upload(&store, &b"two"[..], "same", 16, |_: u64| {}).unwrap_err();
    assert!(err.to_string().contains("path/conflict"), "{err}");
    assert_eq!(store.files.borrow()["same"], b"one");
}

#[test]
fn resolved_config_drives_the_remote_path() {
    let config = config_for(&["-dir", "/archive/", "-input", "report.pdf"]);
    assert_eq!(config.remote_path(), "archive/report.pdf");

    let config = config_for(&["-dir", "", "-filename", "root.txt"]);
    assert_eq!(config.directory, "");
    assert_eq!(config.remote_path(), "root.txt");
}
