use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::{UploadContext, UploadResult, UploadTask};

/// Bounded worker pool for upload tasks.
///
/// Tasks that target the same blob form a chain and run one after another
/// under a single permit; distinct blobs run in parallel up to the bound.
/// Results come back in submission order.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyController {
    parallelism: usize,
}

/// Identity of a task kept outside the spawned future, so a panicking chain
/// still produces one result per task
struct TaskSlot {
    index: usize,
    source_path: PathBuf,
    blob_uri: String,
}

impl ConcurrencyController {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    #[instrument(skip_all, fields(tasks = tasks.len(), parallelism = self.parallelism))]
    pub async fn run(&self, tasks: Vec<UploadTask>, ctx: Arc<UploadContext>) -> Vec<UploadResult> {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut workers = Vec::new();

        for chain in chains_by_blob(tasks) {
            let slots: Vec<TaskSlot> = chain
                .iter()
                .map(|task| TaskSlot {
                    index: task.index,
                    source_path: task.source_path.clone(),
                    blob_uri: ctx.blob_uri(&task.blob_name),
                })
                .collect();

            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            workers.push((slots, tokio::spawn(run_chain(chain, semaphore, ctx))));
        }

        let (slots, handles): (Vec<_>, Vec<_>) = workers.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut results: Vec<(usize, UploadResult)> = Vec::with_capacity(total);
        for (slots, outcome) in slots.into_iter().zip(joined) {
            match outcome {
                Ok(chain_results) => results.extend(chain_results),
                Err(e) => {
                    error!(error = %e, "Upload worker aborted");
                    let message = format!("Upload worker aborted: {}", e);
                    for slot in slots {
                        results.push((
                            slot.index,
                            UploadResult::failed(slot.source_path, slot.blob_uri, message.clone()),
                        ));
                    }
                }
            }
        }

        results.sort_by_key(|(index, _)| *index);

        let succeeded = results.iter().filter(|(_, r)| r.success).count();
        info!(total, succeeded, failed = total - succeeded, "Upload batch finished");

        results.into_iter().map(|(_, result)| result).collect()
    }
}

async fn run_chain(
    chain: Vec<UploadTask>,
    semaphore: Arc<Semaphore>,
    ctx: Arc<UploadContext>,
) -> Vec<(usize, UploadResult)> {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };

    let Some(_permit) = permit else {
        debug!(tasks = chain.len(), "Chain cancelled before start");
        return chain
            .iter()
            .map(|task| (task.index, task.not_attempted(&ctx)))
            .collect();
    };

    let mut results = Vec::with_capacity(chain.len());
    for task in chain {
        let index = task.index;
        results.push((index, task.run(&ctx).await));
    }
    results
}

/// Group tasks by blob name, keeping first-appearance order between groups
/// and submission order within each group
fn chains_by_blob(tasks: Vec<UploadTask>) -> Vec<Vec<UploadTask>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut chains: Vec<Vec<UploadTask>> = Vec::new();

    for task in tasks {
        match positions.get(&task.blob_name) {
            Some(&position) => chains[position].push(task),
            None => {
                positions.insert(task.blob_name.clone(), chains.len());
                chains.push(vec![task]);
            }
        }
    }
    chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ContentProvider, DestinationSpec, MemoryStorageClient, StorageCall, UploadStatus,
        UploaderConfig,
    };
    use bytes::Bytes;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context(client: &MemoryStorageClient) -> Arc<UploadContext> {
        Arc::new(UploadContext::new(
            Arc::new(client.clone()),
            DestinationSpec::new("batch"),
            UploaderConfig::default(),
            CancellationToken::new(),
        ))
    }

    fn task(index: usize, blob: &str) -> UploadTask {
        UploadTask::new(
            index,
            format!("/in/{}", blob),
            blob,
            ContentProvider::Buffer(Bytes::from(format!("content of {}", blob))),
        )
    }

    #[test]
    fn chains_group_same_blob_in_order() {
        let chains = chains_by_blob(vec![task(0, "a"), task(1, "b"), task(2, "a"), task(3, "c")]);
        let shape: Vec<Vec<usize>> = chains
            .iter()
            .map(|chain| chain.iter().map(|t| t.index).collect())
            .collect();
        assert_eq!(shape, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[tokio::test]
    async fn results_follow_submission_order() {
        let client = MemoryStorageClient::new()
            .with_container("batch")
            .with_write_delay(Duration::from_millis(5));
        let tasks: Vec<UploadTask> = (0..12)
            .map(|i| task(i, &format!("f{:02}.txt", 11 - i)))
            .collect();

        let results = ConcurrencyController::new(4).run(tasks, context(&client)).await;

        assert_eq!(results.len(), 12);
        for (i, result) in results.iter().enumerate() {
            assert!(result.success);
            assert!(result.blob_uri.ends_with(&format!("f{:02}.txt", 11 - i)));
        }
        assert!(client.peak_concurrent_writes() <= 4);
    }

    #[tokio::test]
    async fn parallelism_is_respected() {
        let client = MemoryStorageClient::new()
            .with_container("batch")
            .with_write_delay(Duration::from_millis(20));
        let tasks: Vec<UploadTask> = (0..6).map(|i| task(i, &format!("p{}.bin", i))).collect();

        ConcurrencyController::new(2).run(tasks, context(&client)).await;

        assert_eq!(client.peak_concurrent_writes(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_batch_is_not_attempted() {
        let client = MemoryStorageClient::new().with_container("batch");
        let ctx = context(&client);
        ctx.cancel.cancel();

        let results = ConcurrencyController::new(3)
            .run(vec![task(0, "a"), task(1, "b")], ctx)
            .await;

        assert!(results.iter().all(|r| r.status == UploadStatus::NotAttempted));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn same_blob_tasks_never_write_concurrently() {
        let client = MemoryStorageClient::new()
            .with_container("batch")
            .with_write_delay(Duration::from_millis(20));
        let tasks = vec![task(0, "same.txt"), task(1, "same.txt"), task(2, "same.txt")];

        let results = ConcurrencyController::new(4).run(tasks, context(&client)).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(client.peak_concurrent_writes(), 1);
        let writes: Vec<StorageCall> =
            client.calls().into_iter().filter(|c| c.is_write()).collect();
        assert_eq!(writes.len(), 3);
        let stored = client.blob("batch", "same.txt").unwrap();
        assert_eq!(stored.content, b"content of same.txt");
    }
}
