// Configuration module: command-line flags and their environment
// fallbacks, resolved into a validated `Config`. A flag that is given wins
// over the environment; a flag that is missing or empty falls back to it.
//
//   dropbox-upload -dir backups -mkdir -input db.tar.gz
//   DROPBOX_APP_ID=... DROPBOX_APP_SECRET=... dropbox-upload -filename log.txt < log.txt

use std::ffi::OsString;

use clap::Parser;
use thiserror::Error;

use crate::api::AppCredentials;
use crate::transfer;

/// Long flag names that may also be written with a single dash.
const LONG_FLAGS: &[&str] = &[
    "dir",
    "mkdir",
    "filename",
    "input",
    "appID",
    "appId",
    "appSecret",
    "token",
    "chunk-size",
    "help",
    "version",
];

const MIB: u64 = 1024 * 1024;

pub const DIR_ENV: &str = "DROPBOX_DIR";
pub const APP_ID_ENV: &str = "DROPBOX_APP_ID";
pub const APP_SECRET_ENV: &str = "DROPBOX_APP_SECRET";
pub const TOKEN_ENV: &str = "DROPBOX_APP_TOKEN";

/// Raw command-line arguments, before validation.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "dropbox-upload")]
#[command(about = "Upload a file or standard input to Dropbox")]
#[command(version)]
pub struct Args {
    /// Remote directory name
    #[arg(long = "dir", env = DIR_ENV)]
    pub dir: Option<String>,

    /// Create the directory before uploading
    #[arg(
        long = "mkdir",
        num_args = 0..=1,
        require_equals = true,
        default_value_t = false,
        default_missing_value = "true",
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub mkdir: bool,

    /// Remote file name (defaults to the input path)
    #[arg(long = "filename")]
    pub filename: Option<String>,

    /// Input file to upload (stdin used by default)
    #[arg(long = "input")]
    pub input: Option<String>,

    /// Dropbox App ID
    #[arg(long = "appID", visible_alias = "appId", env = APP_ID_ENV, hide_env_values = true)]
    pub app_id: Option<String>,

    /// Dropbox App Secret
    #[arg(long = "appSecret", env = APP_SECRET_ENV, hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Dropbox access token (skips interactive authorization)
    #[arg(long = "token", env = TOKEN_ENV, hide_env_values = true)]
    pub token: Option<String>,

    /// Upload chunk size in megabytes
    #[arg(
        long = "chunk-size",
        default_value_t = 64,
        value_parser = clap::value_parser!(u64).range(1..=150)
    )]
    pub chunk_size: u64,
}

/// Reasons the arguments cannot be turned into a [`Config`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Application ID and Secret is required.")]
    MissingAppCredentials,

    #[error("Filename is required.")]
    MissingFilename,
}

/// Validated configuration for one upload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Remote directory; empty means the root.
    pub directory: String,
    pub create_directory: bool,
    /// Remote object name.
    pub filename: String,
    /// Local file; `None` reads standard input.
    pub input: Option<String>,
    pub credentials: AppCredentials,
    pub access_token: Option<String>,
    /// Chunk size in MiB.
    pub chunk_size: u64,
}

impl Config {
    /// Validate parsed arguments against the process environment.
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        Self::resolve_with(args, |name| std::env::var(name).ok())
    }

    /// Validate parsed arguments. Empty strings count as unset; an unset
    /// flag with an environment counterpart is looked up through `env`.
    pub fn resolve_with<F>(args: Args, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |value: Option<String>, name: &str| non_empty(value).or_else(|| non_empty(env(name)));

        let (app_id, app_secret) = match (
            lookup(args.app_id, APP_ID_ENV),
            lookup(args.app_secret, APP_SECRET_ENV),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(ConfigError::MissingAppCredentials),
        };

        let input = non_empty(args.input);
        let filename = match (non_empty(args.filename), &input) {
            (Some(name), _) => name,
            (None, Some(path)) => path.clone(),
            (None, None) => return Err(ConfigError::MissingFilename),
        };

        Ok(Config {
            directory: lookup(args.dir, DIR_ENV).unwrap_or_default(),
            create_directory: args.mkdir,
            filename,
            input,
            credentials: AppCredentials { app_id, app_secret },
            access_token: lookup(args.token, TOKEN_ENV),
            chunk_size: args.chunk_size,
        })
    }

    pub fn chunk_size_bytes(&self) -> usize {
        (self.chunk_size * MIB) as usize
    }

    /// Destination path of the upload, relative to the Dropbox root.
    pub fn remote_path(&self) -> String {
        transfer::remote_path(&self.directory, &self.filename)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Rewrite Go-style single-dash long flags (`-dir x`, `-dir=x`) to the
/// double-dash form clap expects. Arguments after `--` are left alone.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for (i, arg) in args.into_iter().enumerate() {
        let arg: OsString = arg.into();
        if i == 0 || passthrough {
            out.push(arg);
            continue;
        }
        let rewritten = arg.to_str().and_then(|s| {
            if s == "--" {
                return None;
            }
            let flag = s.strip_prefix('-').filter(|rest| !rest.starts_with('-'))?;
            let name = flag.split('=').next().unwrap_or(flag);
            LONG_FLAGS.contains(&name).then(|| OsString::from(format!("-{s}")))
        });
        if arg == "--" {
            passthrough = true;
        }
        out.push(rewritten.unwrap_or(arg));
    }
    out
}
