//! Long-running spamsub service: socket server, staleness scheduler and the
//! single job processor that owns every engine write.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_publish, request_status, request_stop, request_submit, request_sync, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{run, serve, start_blocking, DaemonSettings, JobSummary};
