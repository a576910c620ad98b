use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use suppaftp::FtpStream;

use crate::error::SyncError;

const FTP_HOST: &str = "ftp.ebi.ac.uk";
const COMPLEXTAB_DIR: &str = "pub/databases/intact/complex/current/complextab";

/// One species dataset published by the Complex Portal. The key is the
/// filename with the `.tsv` suffix stripped and underscores normalised to
/// spaces; the URL is the HTTPS face of the FTP path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    pub key: String,
    pub filename: String,
    pub url: String,
}

pub trait PortalClient: Send + Sync {
    fn list_datasets(&self) -> Result<Vec<Dataset>, SyncError>;
    fn fetch_table(&self, dataset: &Dataset) -> Result<String, SyncError>;
}

pub struct PortalFtpClient {
    http: Client,
    host: String,
    directory: String,
}

impl PortalFtpClient {
    pub fn new() -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cpx-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::PortalHttp(err.to_string()))?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| SyncError::PortalHttp(err.to_string()))?;
        Ok(Self {
            http,
            host: FTP_HOST.to_string(),
            directory: COMPLEXTAB_DIR.to_string(),
        })
    }
}

impl PortalClient for PortalFtpClient {
    fn list_datasets(&self) -> Result<Vec<Dataset>, SyncError> {
        let mut ftp = FtpStream::connect(format!("{}:21", self.host))
            .map_err(|err| SyncError::FtpConnection(err.to_string()))?;
        ftp.login("anonymous", "anonymous")
            .map_err(|err| SyncError::FtpConnection(err.to_string()))?;
        ftp.cwd(&self.directory)
            .map_err(|err| SyncError::FtpConnection(err.to_string()))?;
        let files = ftp
            .nlst(None)
            .map_err(|err| SyncError::FtpConnection(err.to_string()))?;
        let _ = ftp.quit();

        Ok(datasets_from_listing(&self.host, &self.directory, &files))
    }

    fn fetch_table(&self, dataset: &Dataset) -> Result<String, SyncError> {
        let response = self
            .http
            .get(&dataset.url)
            .send()
            .map_err(|err| SyncError::PortalHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "Complex Portal request failed".to_string());
            return Err(SyncError::PortalStatus { status, message });
        }
        response
            .text()
            .map_err(|err| SyncError::PortalHttp(err.to_string()))
    }
}

pub fn datasets_from_listing(host: &str, directory: &str, files: &[String]) -> Vec<Dataset> {
    files
        .iter()
        .filter(|name| !name.contains("README"))
        .filter(|name| name.ends_with(".tsv"))
        .map(|name| Dataset {
            key: name.trim_end_matches(".tsv").replace('_', " "),
            filename: name.to_string(),
            url: format!("https://{host}/{directory}/{name}"),
        })
        .collect()
}

/// Selects a dataset by key (case-insensitive) or by filename stem, so both
/// `"sars-cov-2"` and `"9606"` work as selectors.
pub fn find_dataset<'a>(datasets: &'a [Dataset], selector: &str) -> Option<&'a Dataset> {
    let wanted = selector.trim().to_lowercase().replace('_', " ");
    datasets.iter().find(|dataset| {
        dataset.key.to_lowercase() == wanted
            || dataset.filename.trim_end_matches(".tsv").to_lowercase() == wanted
    })
}
