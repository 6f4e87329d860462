use crate::{
    models::{ApiError, SyncRequest, SyncSummary},
    sync::SyncService,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

/// Background sync runs. One worker drains the queue so a burst of
/// requests cannot hammer the marketplace in parallel.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: SyncRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    #[serde(rename = "done")]
    Completed { summary: SyncSummary },
    Failed { error: String },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(service: SyncService) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }
                info!(
                    target = "sync.jobs",
                    job_id = %job.id,
                    account_id = %job.request.account_id,
                    "job_started"
                );

                let result = service.run(job.request).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(summary) => {
                        guard.insert(job.id, JobState::Completed { summary });
                    }
                    Err(err) => {
                        guard.insert(
                            job.id,
                            JobState::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_sync(&self, request: SyncRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job { id, request };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::store::{MemoryCredentialStore, MemoryItemStore};
    use serde_json::json;

    #[test]
    fn job_states_serialize_with_status_tags() {
        let queued = serde_json::to_value(JobInfo {
            id: "j-1".to_string(),
            state: JobState::Queued,
        })
        .expect("serialize");
        assert_eq!(queued, json!({"id": "j-1", "status": "queued"}));

        let failed = serde_json::to_value(JobState::Failed {
            error: "account not connected".to_string(),
        })
        .expect("serialize");
        assert_eq!(failed["status"], json!("failed"));
        assert_eq!(failed["error"], json!("account not connected"));
    }

    #[tokio::test]
    async fn queued_job_runs_and_records_the_failure() {
        let service = SyncService::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemoryItemStore::new()),
            build_client(),
        );
        let (queue, _worker) = JobQueue::spawn(service);

        let request: SyncRequest =
            serde_json::from_str(r#"{"account_id":"ghost"}"#).expect("request");
        let id = queue.enqueue_sync(request).await.expect("enqueue");
        assert!(queue.get(id).await.is_some());

        let mut state = None;
        for _ in 0..50 {
            if let Some(info) = queue.get(id).await
                && matches!(info.state, JobState::Failed { .. })
            {
                state = Some(info.state);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        match state {
            Some(JobState::Failed { error }) => assert!(error.contains("not connected")),
            _ => panic!("job never reached the failed state"),
        }
    }
}
