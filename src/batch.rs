//! 批量抓取
//!
//! 并发数是风控策略而不是性能参数，默认保持在 2。

use crate::assembler::{RecordAssembler, VideoSource};
use crate::state::{SharedState, VideoRecord};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

pub struct BatchCoordinator<S> {
    assembler: Arc<RecordAssembler<S>>,
}

impl<S: VideoSource> BatchCoordinator<S> {
    pub fn new(assembler: Arc<RecordAssembler<S>>) -> Self {
        Self { assembler }
    }

    pub fn assembler(&self) -> &Arc<RecordAssembler<S>> {
        &self.assembler
    }

    /// 并发组装一批视频，失败的条目只记录日志，不影响其他条目
    ///
    /// 返回顺序按完成先后，不保证与输入一致。
    pub async fn process_batch(&self, bvids: &[String], max_concurrency: usize) -> Vec<VideoRecord> {
        self.run(bvids, max_concurrency, None).await
    }

    /// 同 [`process_batch`](Self::process_batch)，同时把进度写入共享状态
    ///
    /// 已有刷新在进行时直接返回 `None`，不发起任何请求。
    pub async fn process_batch_tracked(
        &self,
        bvids: &[String],
        max_concurrency: usize,
        state: &SharedState,
    ) -> Option<Vec<VideoRecord>> {
        if !state.try_start_fetching(bvids.len()) {
            info!("[bili] refresh already running, skipping batch of {}", bvids.len());
            return None;
        }
        let records = self.run(bvids, max_concurrency, Some(state)).await;
        state.finish_fetching(bvids.len());
        Some(records)
    }

    async fn run(
        &self,
        bvids: &[String],
        max_concurrency: usize,
        state: Option<&SharedState>,
    ) -> Vec<VideoRecord> {
        let total = bvids.len();
        if total == 0 {
            warn!("[bili] empty batch, nothing to fetch");
            return Vec::new();
        }

        let concurrency = max_concurrency.max(1);
        info!(
            "[bili] processing batch of {} videos with concurrency {}",
            total, concurrency
        );

        let completed = AtomicUsize::new(0);

        let tasks = bvids.iter().cloned().map(|bvid| {
            let assembler = Arc::clone(&self.assembler);
            let completed = &completed;
            async move {
                let result = assembler.assemble(&bvid).await;

                let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                if let Some(state) = state {
                    state.update_progress(done);
                }
                info!("[bili] progress {}/{}", done, total);

                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!("[bili] dropping {} from batch: {}", bvid, e);
                        None
                    }
                }
            }
        });

        let records: Vec<VideoRecord> = stream::iter(tasks)
            .buffer_unordered(concurrency)
            .filter_map(|record| async move { record })
            .collect()
            .await;

        info!("[bili] batch finished: {}/{} succeeded", records.len(), total);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::tests::{sample_uploader, sample_video, FakeSource};
    use crate::client::{RawUploaderPayload, RawVideoPayload};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_failed_item_is_dropped() {
        let source = FakeSource::default()
            .with_video("A", sample_video("a", 1, "1"))
            .with_failing_video("B")
            .with_video("C", sample_video("c", 3, "3"))
            .with_uploader("1", sample_uploader("u1", 10))
            .with_uploader("3", sample_uploader("u3", 30));
        let coordinator =
            BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::new(source))));

        let mut records = coordinator
            .process_batch(&ids(&["A", "B", "C"]), DEFAULT_MAX_CONCURRENCY)
            .await;
        records.sort_by(|a, b| a.bvid.cmp(&b.bvid));

        let got: Vec<_> = records.iter().map(|r| (r.bvid.as_str(), r.view_count)).collect();
        assert_eq!(got, vec![("A", 1), ("C", 3)]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let coordinator = BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::new(
            FakeSource::default(),
        ))));
        assert!(coordinator.process_batch(&[], 2).await.is_empty());
    }

    /// 记录同时在途的请求数
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl VideoSource for SlowSource {
        async fn fetch_video_detail(&self, bvid: &str) -> Result<RawVideoPayload> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(sample_video(bvid, 1, "1"))
        }

        async fn fetch_uploader_detail(&self, _mid: &str) -> Result<RawUploaderPayload> {
            Ok(sample_uploader("u", 1))
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let source = Arc::new(SlowSource::default());
        let coordinator =
            BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::clone(&source))));

        let bvids: Vec<String> = (0..8).map(|i| format!("BV{}", i)).collect();
        let records = coordinator.process_batch(&bvids, 2).await;

        assert_eq!(records.len(), 8);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);

        // 0 按 1 处理
        source.peak.store(0, Ordering::SeqCst);
        let records = coordinator.process_batch(&bvids[..3], 0).await;
        assert_eq!(records.len(), 3);
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tracked_batch_updates_progress() {
        let source = FakeSource::default()
            .with_video("A", sample_video("a", 1, "1"))
            .with_failing_video("B")
            .with_uploader("1", sample_uploader("u1", 10));
        let coordinator =
            BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::new(source))));
        let state = SharedState::new();

        let records = coordinator
            .process_batch_tracked(&ids(&["A", "B"]), 2, &state)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let progress = state.get_progress();
        assert!(!progress.fetching);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.total, 2);
    }

    #[tokio::test]
    async fn test_tracked_batch_refuses_while_fetching() {
        let source = Arc::new(FakeSource::default().with_video("A", sample_video("a", 1, "1")));
        let coordinator =
            BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::clone(&source))));
        let state = SharedState::new();
        assert!(state.try_start_fetching(5));

        let result = coordinator
            .process_batch_tracked(&ids(&["A"]), 2, &state)
            .await;

        assert!(result.is_none());
        assert!(source.video_calls.lock().is_empty());
        assert_eq!(state.get_progress().total, 5);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_tracked_batch_future_is_send() {
        let coordinator = BatchCoordinator::new(Arc::new(RecordAssembler::new(Arc::new(
            FakeSource::default(),
        ))));
        let state = SharedState::new();
        let bvids = ids(&["A"]);
        let future = coordinator.process_batch_tracked(&bvids, 2, &state);
        assert_send(&future);
    }
}
