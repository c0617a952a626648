// API client module: a small blocking HTTP client for the parts of the
// Dropbox v2 API this tool needs. RPC-style endpoints take a JSON body,
// content endpoints take the argument JSON in the `Dropbox-API-Arg`
// header and the file bytes as the request body.

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";
const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Errors returned by [`StorageApi`] implementations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status. `summary` carries
    /// the provider's `error_summary` when present, otherwise the raw body.
    #[error("{endpoint} failed: {status} - {summary}")]
    Endpoint {
        endpoint: String,
        status: StatusCode,
        summary: String,
    },

    #[error("encoding request argument: {0}")]
    Argument(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

impl ApiError {
    /// Whether the error means a folder already sits at the target path,
    /// which folder creation treats as success. A file in the way is not.
    pub fn is_already_exists(&self) -> bool {
        match self {
            ApiError::Endpoint { summary, .. } => {
                summary.starts_with("path/conflict/folder") || summary.contains("already exists")
            }
            other => other.to_string().contains("already exists"),
        }
    }
}

/// Application key and secret registered with Dropbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
}

/// Metadata returned for a created folder.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FolderMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
}

/// Metadata returned for an uploaded file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// Position inside an upload session: the session id and the number of
/// bytes the provider has received so far.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UploadCursor {
    pub session_id: String,
    pub offset: u64,
}

/// The provider operations the upload flow depends on.
pub trait StorageApi {
    /// Create a folder at `path`.
    fn create_folder(&self, path: &str) -> Result<FolderMetadata, ApiError>;

    /// Upload `body` as a whole file at `path`.
    fn upload(&self, path: &str, body: &[u8]) -> Result<FileMetadata, ApiError>;

    /// Open an upload session with the first chunk; returns the session id.
    fn start_session(&self, body: &[u8]) -> Result<String, ApiError>;

    /// Append a chunk at `cursor.offset`.
    fn append_session(&self, cursor: &UploadCursor, body: &[u8]) -> Result<(), ApiError>;

    /// Append the final chunk and commit the session to `path`.
    fn finish_session(
        &self,
        cursor: &UploadCursor,
        path: &str,
        body: &[u8],
    ) -> Result<FileMetadata, ApiError>;
}

#[derive(Serialize)]
struct CreateFolderArg<'a> {
    path: &'a str,
    autorename: bool,
}

#[derive(Serialize)]
struct CommitInfo<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    mute: bool,
}

impl<'a> CommitInfo<'a> {
    fn add(path: &'a str) -> Self {
        CommitInfo {
            path,
            mode: "add",
            autorename: false,
            mute: false,
        }
    }
}

#[derive(Serialize)]
struct StartSessionArg {
    close: bool,
}

#[derive(Deserialize)]
struct StartSessionResult {
    session_id: String,
}

#[derive(Serialize)]
struct AppendArg<'a> {
    cursor: &'a UploadCursor,
    close: bool,
}

#[derive(Serialize)]
struct FinishArg<'a> {
    cursor: &'a UploadCursor,
    commit: CommitInfo<'a>,
}

#[derive(Deserialize)]
struct CreateFolderResult {
    metadata: FolderMetadata,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_summary: String,
}

/// Blocking Dropbox client. Holds the reqwest client, the two base URLs
/// and the access token used for authenticated calls.
#[derive(Clone)]
pub struct DropboxClient {
    client: Client,
    api_url: String,
    content_url: String,
    token: Option<String>,
}

impl DropboxClient {
    /// Create a client configured from `DROPBOX_API_URL` and
    /// `DROPBOX_CONTENT_URL`, falling back to the public Dropbox hosts.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = std::env::var("DROPBOX_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let content_url =
            std::env::var("DROPBOX_CONTENT_URL").unwrap_or_else(|_| DEFAULT_CONTENT_URL.into());
        Self::with_base_urls(api_url, content_url)
    }

    /// Create a client talking to the given base URLs.
    pub fn with_base_urls(
        api_url: impl Into<String>,
        content_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        // A single chunk may take minutes on a slow link.
        let client = Client::builder()
            .timeout(None)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;
        Ok(DropboxClient {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            content_url: content_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Store the access token for subsequent requests.
    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// URL the user opens to grant this application access. The page shows
    /// an authorization code to paste back into [`Self::exchange_code`].
    pub fn authorize_url(app_id: &str) -> String {
        match Url::parse_with_params(
            AUTHORIZE_URL,
            &[("client_id", app_id), ("response_type", "code")],
        ) {
            Ok(url) => url.into(),
            Err(_) => format!("{AUTHORIZE_URL}?client_id={app_id}&response_type=code"),
        }
    }

    /// Trade an authorization code for an access token.
    pub fn exchange_code(&self, credentials: &AppCredentials, code: &str) -> Result<String, ApiError> {
        let endpoint = "oauth2/token";
        let url = format!("{}/{}", self.api_url, endpoint);
        debug!(endpoint, "exchanging authorization code");
        let res = self
            .client
            .post(&url)
            .basic_auth(&credentials.app_id, Some(&credentials.app_secret))
            .form(&[("code", code), ("grant_type", "authorization_code")])
            .send()?;
        let token: TokenResponse = parse_response(endpoint, res)?;
        Ok(token.access_token)
    }

    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(t) = &self.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {t}"))?);
        }
        Ok(headers)
    }

    fn rpc<A: Serialize, R: DeserializeOwned>(&self, endpoint: &str, arg: &A) -> Result<R, ApiError> {
        let url = format!("{}/2/{}", self.api_url, endpoint);
        debug!(endpoint, "rpc request");
        let res = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(arg)
            .send()?;
        parse_response(endpoint, res)
    }

    fn content<A: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: &A,
        body: &[u8],
    ) -> Result<R, ApiError> {
        let url = format!("{}/2/{}", self.content_url, endpoint);
        debug!(endpoint, bytes = body.len(), "content request");
        let mut headers = self.auth_headers()?;
        headers.insert(API_ARG_HEADER, header_arg(arg)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        let res = self
            .client
            .post(&url)
            .headers(headers)
            .body(body.to_vec())
            .send()?;
        parse_response(endpoint, res)
    }
}

impl StorageApi for DropboxClient {
    fn create_folder(&self, path: &str) -> Result<FolderMetadata, ApiError> {
        let path = api_path(path);
        let res: CreateFolderResult = self.rpc(
            "files/create_folder_v2",
            &CreateFolderArg {
                path: &path,
                autorename: false,
            },
        )?;
        Ok(res.metadata)
    }

    fn upload(&self, path: &str, body: &[u8]) -> Result<FileMetadata, ApiError> {
        let path = api_path(path);
        self.content("files/upload", &CommitInfo::add(&path), body)
    }

    fn start_session(&self, body: &[u8]) -> Result<String, ApiError> {
        let res: StartSessionResult =
            self.content("files/upload_session/start", &StartSessionArg { close: false }, body)?;
        Ok(res.session_id)
    }

    fn append_session(&self, cursor: &UploadCursor, body: &[u8]) -> Result<(), ApiError> {
        self.content(
            "files/upload_session/append_v2",
            &AppendArg {
                cursor,
                close: false,
            },
            body,
        )
    }

    fn finish_session(
        &self,
        cursor: &UploadCursor,
        path: &str,
        body: &[u8],
    ) -> Result<FileMetadata, ApiError> {
        let path = api_path(path);
        self.content(
            "files/upload_session/finish",
            &FinishArg {
                cursor,
                commit: CommitInfo::add(&path),
            },
            body,
        )
    }
}

/// Check the status and decode the JSON body, turning provider errors into
/// [`ApiError::Endpoint`].
fn parse_response<R: DeserializeOwned>(endpoint: &str, res: Response) -> Result<R, ApiError> {
    let status = res.status();
    if !status.is_success() {
        let txt = res.text().unwrap_or_default();
        let summary = serde_json::from_str::<ErrorBody>(&txt)
            .map(|e| e.error_summary)
            .unwrap_or(txt);
        return Err(ApiError::Endpoint {
            endpoint: endpoint.to_string(),
            status,
            summary,
        });
    }
    Ok(res.json()?)
}

/// Dropbox paths are absolute: exactly one leading `/`.
fn api_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

/// Serialize `arg` for the `Dropbox-API-Arg` header. Header values must be
/// visible ASCII, so everything else is written as `\uXXXX` escapes.
fn header_arg<A: Serialize>(arg: &A) -> Result<HeaderValue, ApiError> {
    let json = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && !c.is_ascii_control() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(HeaderValue::from_str(&out)?)
}
