// Library root
// -----------
// This crate exposes a small library surface for the CLI. The binary
// (`main.rs`) resolves the configuration and hands it to `ui::run`.
//
// Module responsibilities:
// - `config`: Flag and environment parsing into a validated `Config`.
// - `api`: Encapsulates HTTP interactions with Dropbox (authorization,
//   folder creation, whole-file and chunked uploads).
// - `transfer`: Remote path building, idempotent folder creation and the
//   chunking upload driver, written against the `StorageApi` trait.
// - `ui`: Terminal flow: prompts, progress bars and status messages.
//
// The `StorageApi` seam keeps the upload logic testable without network
// access.
pub mod api;
pub mod config;
pub mod transfer;
pub mod ui;
