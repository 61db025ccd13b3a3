use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("stream line {line_number} is not valid JSON: {line}"))]
    MalformedEvent {
        stage: &'static str,
        line_number: usize,
        line: String,
        source: serde_json::Error,
    },
    #[snafu(display("failed to read response body on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReconcileError {
    #[snafu(display("response stream could not be decoded: {source}"))]
    Decode {
        stage: &'static str,
        source: DecodeError,
    },
    #[snafu(display("backend reported an error mid-stream: {message}"))]
    StreamErrorEvent {
        stage: &'static str,
        message: String,
    },
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
