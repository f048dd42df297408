use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("interpreter {0:?} not recognized (expected one of: sh, bash, local)")]
    UnsupportedInterpreter(String),

    #[error("local scripts are run in-process, not submitted to the scheduler")]
    LocalSubmission,

    #[error("only local scripts can be run in-process; submit {0} scripts instead")]
    NotLocal(String),

    #[error("cannot chunk {total} argument vectors into slots of {chunk}")]
    UnevenChunking { total: usize, chunk: usize },

    #[error("no non-empty argument vectors to submit")]
    EmptyBatch,

    #[error("invalid resources: {0}")]
    InvalidResources(String),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("submission command `{command}` failed ({status}): {stderr}")]
    SubmissionTransport {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("no job id found in submission output: {output:?}")]
    SubmissionParse { output: String, script: String },

    #[error("status command `{command}` failed ({status}): {stderr}")]
    StatusTransport {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("cancel command `{command}` failed ({status}): {stderr}")]
    CancelTransport {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unable to parse status listing: {0}")]
    StatusParse(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Configuration mistakes that no amount of retrying will fix.
    ///
    /// These are raised before any external command runs.  Everything else
    /// (transport and parse failures) is left to the caller's retry policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedInterpreter(_)
                | Error::LocalSubmission
                | Error::NotLocal(_)
                | Error::UnevenChunking { .. }
                | Error::EmptyBatch
                | Error::InvalidResources(_)
                | Error::InvalidEnvironment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
