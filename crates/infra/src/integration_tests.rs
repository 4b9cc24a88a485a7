//! Integration tests for the task lifecycle pipeline.
//!
//! Tests: Submission → Store + Queue → Processor → Store + Cache + Queue → Lookup
//!
//! Verifies:
//! - A submitted task is processed to `done` and readable through either path
//! - Failures inside the processor leave the task `failed` without a result
//! - Partial writes are observable exactly as the non-atomic pipeline allows

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use taskpipe_core::{
        Priority, ReverseWithLength, StatusUpdate, TASKS_INPUT_TOPIC, TASKS_OUTPUT_TOPIC, Task,
        TaskId, TaskOutputMessage, TaskStatus, result_cache_key,
    };
    use taskpipe_queue::{InMemoryQueue, MessageQueue, QueueError, Record, Subscription};

    use crate::context::TaskContext;
    use crate::lookup::{LookupService, TaskLookup};
    use crate::processor::{ProcessOutcome, ProcessingError, TaskProcessor};
    use crate::result_cache::{CacheError, InMemoryResultCache, ResultCache};
    use crate::submission::SubmissionService;
    use crate::task_store::{CompletionMetrics, InMemoryTaskStore, TaskStore, TaskStoreError};
    use crate::workers::ProcessorWorker;

    const GROUP: &str = "task-processor-group";

    /// Store that rejects the status updates matched by `reject` and delegates
    /// everything else.
    struct RejectingStore {
        inner: InMemoryTaskStore,
        reject: fn(&StatusUpdate) -> bool,
    }

    impl RejectingStore {
        fn rejecting_done() -> Self {
            Self {
                inner: InMemoryTaskStore::new(),
                reject: |update| matches!(update, StatusUpdate::Done { .. }),
            }
        }

        fn rejecting_processing() -> Self {
            Self {
                inner: InMemoryTaskStore::new(),
                reject: |update| matches!(update, StatusUpdate::Processing),
            }
        }
    }

    #[async_trait::async_trait]
    impl TaskStore for RejectingStore {
        async fn insert(&self, task: &Task) -> Result<(), TaskStoreError> {
            self.inner.insert(task).await
        }

        async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
            self.inner.get(id).await
        }

        async fn update_status(
            &self,
            id: TaskId,
            update: &StatusUpdate,
            at: DateTime<Utc>,
        ) -> Result<u64, TaskStoreError> {
            if (self.reject)(update) {
                return Err(TaskStoreError::Query("injected failure".to_string()));
            }
            self.inner.update_status(id, update, at).await
        }

        async fn completion_metrics(&self) -> Result<CompletionMetrics, TaskStoreError> {
            self.inner.completion_metrics().await
        }
    }

    /// Cache whose reads and writes all fail.
    struct UnavailableCache;

    #[async_trait::async_trait]
    impl ResultCache for UnavailableCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }
    }

    /// Queue that appends records and then reports an error for selected topics,
    /// like a broker acknowledgement lost after the write.
    struct LostAckQueue {
        inner: InMemoryQueue,
        failing_topic: &'static str,
        accept: bool,
    }

    #[async_trait::async_trait]
    impl MessageQueue for LostAckQueue {
        fn partition_count(&self) -> u32 {
            self.inner.partition_count()
        }

        async fn publish(&self, topic: &str, record: Record) -> Result<(), QueueError> {
            if topic != self.failing_topic {
                return self.inner.publish(topic, record).await;
            }
            if self.accept {
                self.inner.publish(topic, record).await?;
            }
            Err(QueueError::Connection("broker unavailable".to_string()))
        }

        async fn subscribe(
            &self,
            topic: &str,
            group: &str,
            partition: u32,
        ) -> Result<Box<dyn Subscription>, QueueError> {
            self.inner.subscribe(topic, group, partition).await
        }
    }

    struct Harness {
        ctx: TaskContext,
        store: Arc<InMemoryTaskStore>,
        cache: Arc<InMemoryResultCache>,
        queue: InMemoryQueue,
    }

    fn harness(partitions: u32) -> Harness {
        let store = Arc::new(InMemoryTaskStore::new());
        let cache = Arc::new(InMemoryResultCache::new());
        let queue = InMemoryQueue::new(partitions);
        let ctx = TaskContext::new(store.clone(), cache.clone(), Arc::new(queue.clone()));
        Harness {
            ctx,
            store,
            cache,
            queue,
        }
    }

    fn priority(value: i32) -> Priority {
        Priority::new(value).unwrap()
    }

    async fn wait_for_status(store: &dyn TaskStore, id: TaskId, status: TaskStatus) -> Task {
        for _ in 0..500 {
            if let Some(task) = store.get(id).await.unwrap() {
                if task.status == status {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    fn output_records(queue: &InMemoryQueue) -> Vec<TaskOutputMessage> {
        queue
            .records(TASKS_OUTPUT_TOPIC)
            .iter()
            .map(|r| serde_json::from_slice(&r.value).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn submitted_task_flows_to_done_and_is_readable() {
        let h = harness(3);
        let worker = ProcessorWorker::spawn(
            h.ctx.queue.clone(),
            GROUP,
            TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength)),
        )
        .await
        .unwrap();
        assert_eq!(worker.partitions(), 3);

        let submitted = SubmissionService::from_context(&h.ctx)
            .create("hello", priority(5))
            .await
            .unwrap();
        assert_eq!(submitted.status, TaskStatus::Pending);

        let row = wait_for_status(h.store.as_ref(), submitted.id, TaskStatus::Done).await;
        assert_eq!(row.result.as_deref(), Some("olleh (len=5)"));
        assert_eq!(row.created_at, submitted.created_at);

        let lookup = LookupService::new(&h.ctx);
        let Some(TaskLookup::Completed(output)) = lookup.find_by_id(submitted.id).await.unwrap()
        else {
            panic!("expected completed lookup");
        };
        assert_eq!(output.task_id, submitted.id);
        assert_eq!(output.result, "olleh (len=5)");
        assert_eq!(output.processed_at, row.updated_at);

        let outputs = output_records(&h.queue);
        assert_eq!(outputs, vec![output]);
        assert_eq!(
            h.queue.records(TASKS_OUTPUT_TOPIC)[0].key,
            submitted.id.to_string()
        );

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let h = harness(1);
        let lookup = LookupService::new(&h.ctx);
        assert_eq!(lookup.find_by_id(TaskId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_input_does_not_stop_the_loop() {
        let h = harness(1);
        let worker = ProcessorWorker::spawn(
            h.ctx.queue.clone(),
            GROUP,
            TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength)),
        )
        .await
        .unwrap();

        let pending = Task::new(TaskId::new(), "untouched", priority(0), taskpipe_core::now());
        h.store.insert(&pending).await.unwrap();
        h.queue
            .publish(TASKS_INPUT_TOPIC, Record::new(pending.id.to_string(), "{oops"))
            .await
            .unwrap();

        let submitted = SubmissionService::from_context(&h.ctx)
            .create("abc", priority(2))
            .await
            .unwrap();

        let row = wait_for_status(h.store.as_ref(), submitted.id, TaskStatus::Done).await;
        assert_eq!(row.result.as_deref(), Some("cba (len=3)"));

        let untouched = h.store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(untouched, pending);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn done_write_failure_marks_failed_and_publishes_nothing() {
        let queue = InMemoryQueue::new(1);
        let store = Arc::new(RejectingStore::rejecting_done());
        let cache = Arc::new(InMemoryResultCache::new());
        let ctx = TaskContext::new(store.clone(), cache.clone(), Arc::new(queue.clone()));

        let submitted = SubmissionService::from_context(&ctx)
            .create("hello", priority(5))
            .await
            .unwrap();
        let input = queue.records(TASKS_INPUT_TOPIC);
        assert_eq!(input.len(), 1);

        let outcome = TaskProcessor::new(&ctx, Arc::new(ReverseWithLength))
            .handle(&input[0].value)
            .await;
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed {
                error: ProcessingError::Store(_),
                ..
            }
        ));

        let row = store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.result, None);
        assert!(queue.records(TASKS_OUTPUT_TOPIC).is_empty());
        assert!(cache.is_empty());

        let lookup = LookupService::new(&ctx);
        assert!(matches!(
            lookup.find_by_id(submitted.id).await.unwrap(),
            Some(TaskLookup::Task(_))
        ));
    }

    #[tokio::test]
    async fn cache_write_failure_marks_failed_and_publishes_nothing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = InMemoryQueue::new(1);
        let ctx = TaskContext::new(
            store.clone(),
            Arc::new(UnavailableCache),
            Arc::new(queue.clone()),
        );

        let submitted = SubmissionService::from_context(&ctx)
            .create("abc", priority(3))
            .await
            .unwrap();
        let input = queue.records(TASKS_INPUT_TOPIC);

        let outcome = TaskProcessor::new(&ctx, Arc::new(ReverseWithLength))
            .handle(&input[0].value)
            .await;
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed {
                error: ProcessingError::Cache(CacheError::Backend(_)),
                ..
            }
        ));

        let row = store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.result, None);
        assert!(queue.records(TASKS_OUTPUT_TOPIC).is_empty());

        // Lookup still answers from the store while the cache is down.
        let Some(TaskLookup::Task(found)) =
            LookupService::new(&ctx).find_by_id(submitted.id).await.unwrap()
        else {
            panic!("expected raw task lookup");
        };
        assert_eq!(found.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn processing_mark_failure_still_completes_task() {
        let store = Arc::new(RejectingStore::rejecting_processing());
        let queue = InMemoryQueue::new(1);
        let ctx = TaskContext::new(
            store.clone(),
            Arc::new(InMemoryResultCache::new()),
            Arc::new(queue.clone()),
        );

        let submitted = SubmissionService::from_context(&ctx)
            .create("abc", priority(3))
            .await
            .unwrap();
        let input = queue.records(TASKS_INPUT_TOPIC);

        let ProcessOutcome::Completed(output) =
            TaskProcessor::new(&ctx, Arc::new(ReverseWithLength))
                .handle(&input[0].value)
                .await
        else {
            panic!("expected completion");
        };
        assert_eq!(output.task_id, submitted.id);
        assert_eq!(output.result, "cba (len=3)");

        let row = store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Done);
        assert_eq!(row.result.as_deref(), Some("cba (len=3)"));
        assert_eq!(output_records(&queue), vec![output]);
    }

    #[tokio::test]
    async fn lookup_falls_back_to_store_when_cache_is_unavailable() {
        let h = harness(1);
        let submitted = SubmissionService::from_context(&h.ctx)
            .create("hello", priority(5))
            .await
            .unwrap();
        let input = h.queue.records(TASKS_INPUT_TOPIC);
        let ProcessOutcome::Completed(processed) =
            TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength))
                .handle(&input[0].value)
                .await
        else {
            panic!("expected completion");
        };

        // Same store, but every cache read and backfill fails.
        let degraded = TaskContext::new(
            h.store.clone(),
            Arc::new(UnavailableCache),
            Arc::new(h.queue.clone()),
        );
        let found = LookupService::new(&degraded)
            .find_by_id(submitted.id)
            .await
            .unwrap();
        assert_eq!(found, Some(TaskLookup::Completed(processed)));

        let pending = SubmissionService::from_context(&degraded)
            .create("later", priority(0))
            .await
            .unwrap();
        let Some(TaskLookup::Task(row)) = LookupService::new(&degraded)
            .find_by_id(pending.id)
            .await
            .unwrap()
        else {
            panic!("expected raw task lookup");
        };
        assert_eq!(row.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn output_published_before_error_is_contradicted_by_store() {
        let store = Arc::new(InMemoryTaskStore::new());
        let cache = Arc::new(InMemoryResultCache::new());
        let inner = InMemoryQueue::new(1);
        let queue = Arc::new(LostAckQueue {
            inner: inner.clone(),
            failing_topic: TASKS_OUTPUT_TOPIC,
            accept: true,
        });
        let ctx = TaskContext::new(store.clone(), cache.clone(), queue);

        let submitted = SubmissionService::from_context(&ctx)
            .create("hello", priority(5))
            .await
            .unwrap();
        let input = inner.records(TASKS_INPUT_TOPIC);

        let outcome = TaskProcessor::new(&ctx, Arc::new(ReverseWithLength))
            .handle(&input[0].value)
            .await;
        assert!(matches!(
            outcome,
            ProcessOutcome::Failed {
                error: ProcessingError::Publish(_),
                ..
            }
        ));

        // The output record made it out...
        let outputs = output_records(&inner);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].task_id, submitted.id);
        assert_eq!(outputs[0].result, "olleh (len=5)");

        // ...but the store says the task failed and holds no result.
        let row = store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert_eq!(row.result, None);
        assert!(row.result_matches_status());

        // The cache write preceded the publish and is left in place.
        let cached = cache
            .get(&result_cache_key(&submitted.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::from_str::<TaskOutputMessage>(&cached).unwrap(),
            outputs[0]
        );
    }

    #[tokio::test]
    async fn publish_failure_on_submit_leaves_task_pending() {
        let store = Arc::new(InMemoryTaskStore::new());
        let inner = InMemoryQueue::new(1);
        let queue = Arc::new(LostAckQueue {
            inner: inner.clone(),
            failing_topic: TASKS_INPUT_TOPIC,
            accept: false,
        });
        let ctx = TaskContext::new(store.clone(), Arc::new(InMemoryResultCache::new()), queue);

        let submitted = SubmissionService::from_context(&ctx)
            .create("stuck", priority(1))
            .await
            .unwrap();

        assert_eq!(submitted.status, TaskStatus::Pending);
        assert!(inner.records(TASKS_INPUT_TOPIC).is_empty());
        let row = store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_result_expires_and_store_path_matches_it() {
        let h = harness(1);
        let submitted = SubmissionService::from_context(&h.ctx)
            .create("hello", priority(5))
            .await
            .unwrap();
        let input = h.queue.records(TASKS_INPUT_TOPIC);

        let ProcessOutcome::Completed(processed) =
            TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength))
                .handle(&input[0].value)
                .await
        else {
            panic!("expected completion");
        };

        let key = result_cache_key(&submitted.id);
        tokio::time::advance(h.ctx.result_ttl - Duration::from_secs(1)).await;
        assert!(h.cache.get(&key).await.unwrap().is_some());

        let lookup = LookupService::new(&h.ctx);
        let from_cache = lookup.find_by_id(submitted.id).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(h.cache.get(&key).await.unwrap(), None);

        let from_store = lookup.find_by_id(submitted.id).await.unwrap();
        assert_eq!(from_cache, from_store);
        assert_eq!(from_store, Some(TaskLookup::Completed(processed)));

        // The store path refilled the cache.
        assert!(h.cache.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn redelivered_input_reprocesses_to_same_result() {
        let h = harness(1);
        let submitted = SubmissionService::from_context(&h.ctx)
            .create("abc", priority(9))
            .await
            .unwrap();
        let input = h.queue.records(TASKS_INPUT_TOPIC);
        let processor = TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength));

        processor.handle(&input[0].value).await;
        processor.handle(&input[0].value).await;

        let row = h.store.get(submitted.id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Done);
        assert_eq!(row.result.as_deref(), Some("cba (len=3)"));
        assert_eq!(output_records(&h.queue).len(), 2);
    }

    #[tokio::test]
    async fn metrics_cover_completed_tasks_only() {
        let h = harness(2);
        let service = SubmissionService::from_context(&h.ctx);
        let processor = TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength));

        for payload in ["a", "bb", "ccc"] {
            service.create(payload, priority(0)).await.unwrap();
        }
        service.create("left pending", priority(0)).await.unwrap();

        for record in h
            .queue
            .records(TASKS_INPUT_TOPIC)
            .iter()
            .filter(|r| !String::from_utf8_lossy(&r.value).contains("left pending"))
        {
            processor.handle(&record.value).await;
        }

        let metrics = h.store.completion_metrics().await.unwrap();
        assert_eq!(metrics.total_tasks, 3);
        assert!(metrics.average_processing_time_ms.is_some_and(|ms| ms >= 0));
        assert!(h.store.all().iter().all(Task::result_matches_status));
    }

    #[tokio::test]
    async fn shutdown_joins_every_partition_loop() {
        let h = harness(4);
        let worker = ProcessorWorker::spawn(
            h.ctx.queue.clone(),
            GROUP,
            TaskProcessor::new(&h.ctx, Arc::new(ReverseWithLength)),
        )
        .await
        .unwrap();
        assert_eq!(worker.partitions(), 4);

        tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .expect("worker did not stop");
    }
}
