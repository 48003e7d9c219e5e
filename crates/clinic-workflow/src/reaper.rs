//! 过期队列清理
//!
//! 按固定周期调用 `clear_expired`。只移除签到时间早于今天的成员，
//! 与正常请求并发运行不会误删。

use crate::queue::QueueRouter;
use clinic_core::{ClinicStore, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

/// 过期清理器
#[derive(Debug)]
pub struct ExpiryReaper<S: ClinicStore> {
    router: QueueRouter<S>,
    period: Duration,
}

impl<S: ClinicStore> Clone for ExpiryReaper<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            period: self.period,
        }
    }
}

impl<S: ClinicStore> ExpiryReaper<S> {
    pub fn new(router: QueueRouter<S>, period: Duration) -> Self {
        Self { router, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 执行一次清理
    pub async fn sweep_once(&self) -> Result<usize> {
        self.router.clear_expired().await
    }

    /// 周期清理，失败只记录日志并等待下一轮
    pub async fn run(&self) {
        info!("Starting queue expiry reaper with period: {:?}", self.period);

        let mut interval = interval(self.period);
        loop {
            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error clearing expired queue entries: {}", e);
            }
        }
    }

    /// 在后台任务中运行
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seed_encounter, Fixture};
    use crate::MemoryStore;
    use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
    use clinic_core::QueueKind;
    use std::sync::Arc;

    fn reaper(store: &MemoryStore, period: Duration) -> ExpiryReaper<MemoryStore> {
        let router = QueueRouter::new(Arc::new(store.clone()), FixedOffset::east_opt(0).unwrap());
        ExpiryReaper::new(router, period)
    }

    #[tokio::test]
    async fn test_sweep_once_removes_stale_entries() {
        let fixture = Fixture::seeded().await;
        seed_encounter(&fixture.store, 5, Utc::now()).await;
        seed_encounter(&fixture.store, 7, Utc::now() - ChronoDuration::days(2)).await;
        let reaper = reaper(&fixture.store, Duration::from_secs(3600));

        let router = QueueRouter::new(Arc::new(fixture.store.clone()), FixedOffset::east_opt(0).unwrap());
        let queue = router.add_to_queue("Front Desk", 7, QueueKind::User).await.unwrap();
        router.add_to_queue("Front Desk", 5, QueueKind::User).await.unwrap();

        assert_eq!(reaper.sweep_once().await.unwrap(), 1);
        let remaining: Vec<i64> = router
            .list_queue(queue.id)
            .await
            .unwrap()
            .encounters
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(remaining, vec![5]);
    }

    #[tokio::test]
    async fn test_spawned_reaper_sweeps_on_first_tick() {
        let fixture = Fixture::seeded().await;
        seed_encounter(&fixture.store, 7, Utc::now() - ChronoDuration::days(2)).await;
        let router = QueueRouter::new(Arc::new(fixture.store.clone()), FixedOffset::east_opt(0).unwrap());
        let queue = router.add_to_queue("Triage", 7, QueueKind::PreExam).await.unwrap();

        let handle = reaper(&fixture.store, Duration::from_millis(20)).spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(router.list_queue(queue.id).await.unwrap().encounters.is_empty());
    }
}
