//! Job execution: expand, look up the cache, dispatch, aggregate.

use crate::job::SubRequest;
use crate::registry::JobHandle;
use crate::scheduler::SchedulerInner;
use deckflow_cache::prompt_key;
use deckflow_core::credentials::Secret;
use deckflow_core::error::FlowError;
use deckflow_core::runtime::CompletionClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Worker loop: pull the best queued job, run it, repeat until shutdown.
pub(crate) async fn worker_loop(inner: Arc<SchedulerInner>, worker: usize, shutdown: CancellationToken) {
    tracing::debug!(worker, "worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match inner.queue.pop() {
            Some(id) => {
                // purged or otherwise gone while queued
                if let Ok(handle) = inner.registry.get(&id) {
                    run_job(&inner, handle).await;
                }
            }
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = inner.queue.notified() => {}
                }
            }
        }
    }
    tracing::debug!(worker, "worker stopped");
}

pub(crate) async fn run_job(inner: &SchedulerInner, handle: Arc<JobHandle>) {
    // overdue while it waited in the queue
    if handle.deadline_passed() {
        handle.cancel("deadline exceeded");
        return;
    }
    if !handle.start() {
        return;
    }
    let spec = &handle.spec;
    tracing::info!(
        job_id = %handle.id,
        priority = handle.priority,
        units = spec.unit_count,
        provider = %spec.provider.kind,
        model = %spec.provider.model,
        "job started"
    );

    let credential = match inner.keys.resolve(&spec.identity) {
        Ok(secret) => secret,
        Err(e) => {
            handle.fail(e, None);
            return;
        }
    };

    let client = match inner
        .gateway
        .connect_cancellable(&spec.provider, &credential, handle.stop_token())
    {
        Ok(client) => client,
        Err(e) => {
            handle.fail(e.masked(&credential), None);
            return;
        }
    };

    let ctx = spec.context();
    let units = (0..spec.unit_count)
        .map(|index| {
            let prompt = inner.prompts.build(&ctx, index);
            let key = prompt_key(client.model(), &prompt.system, &prompt.user);
            SubRequest::new(handle.id, index, prompt, key)
        })
        .collect();
    if !handle.expand(units) {
        return;
    }

    let unit_ctx = UnitContext {
        inner,
        handle: &handle,
        client: &client,
        credential: &credential,
    };
    let batched = inner
        .gateway
        .run_batched(spec.unit_count, |index| unit_ctx.run(index));
    match handle.deadline_at {
        Some(at) => {
            tokio::pin!(batched);
            tokio::select! {
                _ = &mut batched => {}
                _ = tokio::time::sleep_until(at) => {
                    handle.cancel("deadline exceeded");
                    // units in flight run to completion; their outputs are dropped
                    batched.await;
                }
            }
        }
        None => {
            batched.await;
        }
    }

    handle.complete();
}

struct UnitContext<'a> {
    inner: &'a SchedulerInner,
    handle: &'a JobHandle,
    client: &'a CompletionClient,
    credential: &'a Secret,
}

impl UnitContext<'_> {
    async fn run(&self, index: usize) {
        let handle = self.handle;
        if handle.should_stop() {
            return;
        }
        if handle.deadline_passed() {
            handle.cancel("deadline exceeded");
            return;
        }
        let Some((prompt, key)) = handle.begin_unit(index) else {
            return;
        };
        let use_cache = handle.spec.use_cache;

        if use_cache {
            if let Some(hit) = self.inner.cache.get(&key).await {
                handle.record_output(index, hit, 0, true);
                return;
            }
            if handle.should_stop() {
                return;
            }
        }

        match self.client.dispatch(&prompt).await {
            Ok(completion) => {
                let stored = handle.record_output(index, completion.text.clone(), completion.attempts, false);
                if stored && use_cache {
                    self.inner.cache.put(&key, &completion.text, None).await;
                }
            }
            Err(e) => {
                let attempts = match &e {
                    FlowError::RetriesExhausted { attempts, .. } => *attempts,
                    _ => 1,
                };
                handle.fail(e.masked(self.credential), Some((index, attempts)));
            }
        }
    }
}
