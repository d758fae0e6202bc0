//! Pod log capture for running jobs.

pub mod capture;

pub use capture::{
    log_file_name, CancelToken, KubectlLogStreamer, LogCapture, LogError, LogStreamer, SinkReport,
    StreamEnd,
};
