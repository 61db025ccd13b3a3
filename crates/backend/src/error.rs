use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend base URL '{base_url}' is not usable"))]
    InvalidBaseUrl {
        stage: &'static str,
        base_url: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("failed to read response body on `{stage}`, {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status}: {message}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("failed to parse backend payload on `{stage}`, {source}"))]
    DecodePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
