use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProtocolError {
    #[snafu(display("backend response carried no choices"))]
    MissingChoice { stage: &'static str },
    #[snafu(display("backend response choice carried no message"))]
    MissingMessage { stage: &'static str },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
