//! Concurrent log tailer (spec §4.5 "Log streaming"): polls the run pod every
//! second and forwards append-only log deltas to a channel the RPC layer
//! turns into `StreamLogs` messages.
//!
//! No direct teacher counterpart (Qovery ships full log files to S3 rather
//! than diffing live container logs), so this is grounded on spec.md's
//! strip-prefix delta rule directly, using the same polling cadence the
//! teacher's `deploy_job/job.rs::await_job_to_complete` uses for its own
//! 1-second `tokio::time::interval` condition poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::k8s::KubernetesGateway;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct LogTailer {
    k8s: Arc<dyn KubernetesGateway>,
    tenant: String,
    job_name: String,
    sink: mpsc::Sender<String>,
}

impl LogTailer {
    pub fn new(k8s: Arc<dyn KubernetesGateway>, tenant: String, job_name: String, sink: mpsc::Sender<String>) -> Self {
        LogTailer { k8s, tenant, job_name, sink }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        let mut last_sent = String::new();
        let mut consecutive_failures = 0u32;

        loop {
            interval.tick().await;

            let pods = match self.k8s.list_pods_by_label(&self.tenant, &format!("job-name={}", self.job_name)).await {
                Ok(pods) => pods,
                Err(err) => {
                    consecutive_failures += 1;
                    debug!(job_name = %self.job_name, err = %err, consecutive_failures, "tailer pod lookup failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        debug!(job_name = %self.job_name, "tailer aborting after repeated pod-lookup failures");
                        return;
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            let Some(pod) = pods.into_iter().next() else { continue };
            let phase = pod.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default();

            if phase == "Succeeded" || phase == "Failed" {
                return;
            }
            if phase != "Running" {
                continue;
            }

            let Some(pod_name) = pod.metadata.name.clone() else { continue };
            let current = match self.collect_logs(&pod_name).await {
                Some(logs) => logs,
                None => continue,
            };

            if let Some(diff) = current.strip_prefix(&last_sent) {
                if !diff.is_empty() {
                    if self.sink.send(diff.to_string()).await.is_err() {
                        return;
                    }
                    last_sent = current;
                }
            } else {
                // Logs didn't grow monotonically from what we last saw (the
                // append-only contract was violated); resync by sending the
                // whole current snapshot and restarting the diff baseline.
                if self.sink.send(current.clone()).await.is_err() {
                    return;
                }
                last_sent = current;
            }
        }
    }

    async fn collect_logs(&self, pod_name: &str) -> Option<String> {
        let mut blocks = Vec::new();
        if let Ok(init_logs) = self.k8s.get_pod_logs(&self.tenant, pod_name, "init").await {
            if !init_logs.trim().is_empty() {
                blocks.push(format!("Init container logs:\n{init_logs}"));
            }
        }
        if let Ok(runner_logs) = self.k8s.get_pod_logs(&self.tenant, pod_name, "runner").await {
            if !runner_logs.trim().is_empty() {
                blocks.push(format!("Runner container logs:\n{runner_logs}"));
            }
        }
        Some(blocks.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    /// `strip_prefix` is the load-bearing primitive for delta extraction;
    /// exercise its edge cases directly rather than through the poll loop.
    #[test]
    fn diff_of_grown_log_is_the_suffix() {
        let last_sent = "line1\n".to_string();
        let current = "line1\nline2\n".to_string();
        assert_eq!(current.strip_prefix(&last_sent), Some("line2\n"));
    }

    #[test]
    fn diff_of_unchanged_log_is_empty() {
        let last_sent = "line1\n".to_string();
        let current = "line1\n".to_string();
        assert_eq!(current.strip_prefix(&last_sent), Some(""));
    }

    #[test]
    fn non_append_only_log_has_no_prefix_match() {
        let last_sent = "line1\nline2\n".to_string();
        let current = "line1\n".to_string();
        assert_eq!(current.strip_prefix(&last_sent), None);
    }
}
