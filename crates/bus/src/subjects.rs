//! Bus subjects and durable-stream names. These strings are the wire
//! contract between the brain, the workers, and the gateway-side
//! collaborators; nothing else may invent subjects.

/// Durable stream receiving every job dispatch.
pub const JOBS_STREAM: &str = "JOBS";

/// Durable worker consumer on [`JOBS_STREAM`].
pub const WORKERS_CONSUMER: &str = "WORKERS";

/// Seconds a delivered job may stay unacked before redelivery.
pub const ACK_WAIT_SECS: u64 = 60;

/// Maximum delivery attempts per job message.
pub const MAX_DELIVER: i64 = 3;

pub const JOBS_DISPATCH: &str = "bakerst.jobs.dispatch";
pub const JOBS_STATUS_WILDCARD: &str = "bakerst.jobs.status.*";
pub const TRANSFER_READY: &str = "bakerst.brain.transfer.ready";
pub const TRANSFER_CLEAR: &str = "bakerst.brain.transfer.clear";
pub const TRANSFER_ABORT: &str = "bakerst.brain.transfer.abort";
pub const HEARTBEAT_BRAIN: &str = "bakerst.heartbeat.brain";
pub const EXTENSIONS_HEARTBEAT_WILDCARD: &str = "bakerst.extensions.*.heartbeat";
pub const COMPANIONS_WILDCARD: &str = "bakerst.companions.>";

/// The per-job status subject.
pub fn job_status_subject(job_id: &str) -> String {
    format!("bakerst.jobs.status.{job_id}")
}

/// Extract the job id from a status subject, if it is one.
pub fn job_id_from_status_subject(subject: &str) -> Option<&str> {
    subject.strip_prefix("bakerst.jobs.status.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_subject_roundtrip() {
        let s = job_status_subject("abc-123");
        assert_eq!(s, "bakerst.jobs.status.abc-123");
        assert_eq!(job_id_from_status_subject(&s), Some("abc-123"));
        assert_eq!(job_id_from_status_subject("bakerst.jobs.dispatch"), None);
    }
}
