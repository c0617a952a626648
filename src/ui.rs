// UI layer: runs one upload from a resolved `Config`, printing status
// lines, prompting for the authorization code with `dialoguer` and
// drawing transfer progress with `indicatif`.

use crate::api::{AppCredentials, DropboxClient, StorageApi};
use crate::config::Config;
use crate::transfer::{self, DirectoryStatus, ProgressObserver, UploadSummary};
use anyhow::{Context, Result};
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io;
use std::time::Duration;
use tracing::info;

const FILE_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const STREAM_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}";

/// Feeds transfer progress into a progress bar.
struct BarObserver(ProgressBar);

impl ProgressObserver for BarObserver {
    fn progressed(&mut self, bytes: u64) {
        self.0.inc(bytes);
    }
}

/// Run one upload: authenticate, create the folder if asked, upload the
/// input and report the result.
pub fn run(config: &Config) -> Result<()> {
    let client = authenticate(config)?;

    if config.create_directory && !config.directory.is_empty() {
        create_directory(&client, &config.directory)?;
    }

    let remote = config.remote_path();
    println!(
        "Uploading file {} => {}",
        config.input.as_deref().unwrap_or("<stdin>"),
        remote
    );

    let summary = upload_input(&client, config, &remote)
        .with_context(|| format!("Error uploading file {}", remote))?;
    info!(bytes = summary.bytes, requests = summary.requests, "upload complete");

    let shown = summary.metadata.path_display.unwrap_or(remote);
    println!("File {} successfully created", shown.trim_start_matches('/'));
    Ok(())
}

/// Use the supplied access token or run the interactive code flow. The
/// token is not validated up front; a bad one fails on the first call.
fn authenticate(config: &Config) -> Result<DropboxClient> {
    let mut client = DropboxClient::from_env()?;
    match &config.access_token {
        Some(token) => client.set_token(token),
        None => {
            let token = authorize_interactively(&client, &config.credentials)?;
            client.set_token(&token);
        }
    }
    Ok(client)
}

/// Show the authorization URL, read back the code and exchange it.
fn authorize_interactively(client: &DropboxClient, credentials: &AppCredentials) -> Result<String> {
    println!("Please visit:");
    println!("{}", DropboxClient::authorize_url(&credentials.app_id));
    println!("and approve access, then paste the code shown.");

    // `Input::interact_text()` prompts on the terminal, even when stdin
    // carries the upload payload.
    let code: String = Input::new().with_prompt("Authorization code").interact_text()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("Requesting access token...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = client.exchange_code(credentials, code.trim());
    spinner.finish_and_clear();

    result.context("Authorization failed")
}

fn create_directory<A: StorageApi + ?Sized>(api: &A, dir: &str) -> Result<()> {
    match transfer::ensure_directory(api, dir) {
        Ok(DirectoryStatus::Created) => println!("Folder {} successfully created", dir),
        Ok(DirectoryStatus::AlreadyExists) => println!("Folder {} already exists", dir),
        Err(e) => return Err(e).with_context(|| format!("Error creating folder {}", dir)),
    }
    Ok(())
}

/// Upload the input file with a sized progress bar, or stdin with an
/// open-ended byte counter.
fn upload_input<A: StorageApi + ?Sized>(api: &A, config: &Config, remote: &str) -> Result<UploadSummary> {
    let chunk_size = config.chunk_size_bytes();
    match &config.input {
        Some(path) => {
            let size = std::fs::metadata(path)
                .with_context(|| format!("Error reading file {:?}", path))?
                .len();
            let file = File::open(path).with_context(|| format!("Error opening file {:?}", path))?;

            let bar = ProgressBar::new(size);
            bar.set_style(ProgressStyle::with_template(FILE_TEMPLATE)?.progress_chars("=> "));
            let result = transfer::upload(api, file, remote, chunk_size, BarObserver(bar.clone()));
            finish_bar(&bar, result.is_ok());
            Ok(result?)
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template(STREAM_TEMPLATE)?);
            bar.enable_steady_tick(Duration::from_millis(100));
            let stdin = io::stdin();
            let result = transfer::upload(api, stdin.lock(), remote, chunk_size, BarObserver(bar.clone()));
            finish_bar(&bar, result.is_ok());
            Ok(result?)
        }
    }
}

fn finish_bar(bar: &ProgressBar, ok: bool) {
    if ok {
        bar.finish_with_message("Done");
    } else {
        bar.abandon();
    }
}
