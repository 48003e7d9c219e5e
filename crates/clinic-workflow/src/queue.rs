//! 科室队列管理
//!
//! 记录每个在诊就诊当前所在的科室队列，提供入队、转移、出队、列表和过期清理

use chrono::{DateTime, FixedOffset, Utc};
use clinic_core::utils::before_today;
use clinic_core::{
    settle, ClinicError, ClinicStore, ClinicTx, EncounterRepository, Queue, QueueKind,
    QueueListing, QueueRepository, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 队列路由器
#[derive(Debug)]
pub struct QueueRouter<S: ClinicStore> {
    store: Arc<S>,
    offset: FixedOffset,
}

impl<S: ClinicStore> Clone for QueueRouter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            offset: self.offset,
        }
    }
}

impl<S: ClinicStore> QueueRouter<S> {
    /// `offset` 决定“今天”从哪一刻开始
    pub fn new(store: Arc<S>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// 显式创建队列，名称重复时返回 `Conflict`
    pub async fn create_queue(&self, name: &str, kind: QueueKind) -> Result<Queue> {
        let mut tx = self.store.begin().await?;
        let result = tx.insert_queue(name, kind).await;
        let queue = settle(tx, result).await?;

        info!("Created queue '{}' ({:?})", queue.name, queue.kind);
        Ok(queue)
    }

    /// 幂等入队，队列不存在时按 `kind` 创建
    pub async fn add_to_queue(&self, queue_name: &str, encounter_id: i64, kind: QueueKind) -> Result<Queue> {
        let mut tx = self.store.begin().await?;
        let result = enqueue(&mut tx, queue_name, encounter_id, kind).await;
        settle(tx, result).await
    }

    /// 在一个事务内从源队列移到目标队列
    pub async fn move_encounter(&self, from_queue_id: i64, to_queue_id: i64, encounter_id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let from = require_queue(&mut tx, from_queue_id).await?;
            let to = require_queue(&mut tx, to_queue_id).await?;
            transfer(&mut tx, &from, &to, encounter_id).await
        }
        .await;
        settle(tx, result).await
    }

    /// 同 `move_encounter`，目标队列按名称解析或创建
    pub async fn move_to_queue_name(
        &self,
        from_queue_id: i64,
        to_queue_name: &str,
        encounter_id: i64,
        kind: QueueKind,
    ) -> Result<Queue> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let from = require_queue(&mut tx, from_queue_id).await?;
            let to = resolve_or_create(&mut tx, to_queue_name, kind).await?;
            transfer(&mut tx, &from, &to, encounter_id).await?;
            Ok::<_, ClinicError>(to)
        }
        .await;
        settle(tx, result).await
    }

    /// 出队；不在队列中时不做任何事
    pub async fn delete_from_queue(&self, queue_id: i64, encounter_id: i64) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result = async {
            require_queue(&mut tx, queue_id).await?;
            tx.remove_member(queue_id, encounter_id).await
        }
        .await;
        let removed = settle(tx, result).await?;

        if removed {
            info!("Removed encounter {} from queue {}", encounter_id, queue_id);
        } else {
            debug!("Encounter {} was not in queue {}", encounter_id, queue_id);
        }
        Ok(removed)
    }

    /// 列出所有队列（按类型、名称排序），成员按入队顺序展开为完整就诊记录
    ///
    /// 读取队列与展开成员分属两个事务，并发写入时可能看到略旧的快照。
    pub async fn list_all(&self) -> Result<Vec<QueueListing>> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut snapshot = Vec::new();
            for queue in tx.list_queues().await? {
                let members = tx.queue_members(queue.id).await?;
                snapshot.push((queue, members));
            }
            Ok::<_, ClinicError>(snapshot)
        }
        .await;
        let mut snapshot = settle(tx, result).await?;
        snapshot.sort_by(|(a, _), (b, _)| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));

        let mut listings = Vec::with_capacity(snapshot.len());
        for (queue, members) in snapshot {
            listings.push(self.hydrate(queue, members).await?);
        }
        Ok(listings)
    }

    /// 单个队列及其成员
    pub async fn list_queue(&self, queue_id: i64) -> Result<QueueListing> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let queue = require_queue(&mut tx, queue_id).await?;
            let members = tx.queue_members(queue_id).await?;
            Ok::<_, ClinicError>((queue, members))
        }
        .await;
        let (queue, members) = settle(tx, result).await?;
        self.hydrate(queue, members).await
    }

    async fn hydrate(&self, queue: Queue, members: Vec<i64>) -> Result<QueueListing> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut encounters = Vec::with_capacity(members.len());
            for encounter_id in members {
                if let Some(encounter) = tx.find_encounter(encounter_id).await? {
                    encounters.push(encounter);
                }
            }
            Ok::<_, ClinicError>(encounters)
        }
        .await;
        let encounters = settle(tx, result).await?;
        Ok(QueueListing { queue, encounters })
    }

    /// 清理签到时间早于今天零点的队列成员
    pub async fn clear_expired(&self) -> Result<usize> {
        self.clear_expired_at(Utc::now()).await
    }

    /// 以 `now` 作为当前时间清理过期成员，返回移除数量
    pub async fn clear_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let offset = self.offset;
        let mut tx = self.store.begin().await?;
        let result = async {
            let mut removed = 0usize;
            for queue in tx.list_queues().await? {
                for encounter_id in tx.queue_members(queue.id).await? {
                    let expired = match tx.find_encounter(encounter_id).await? {
                        Some(encounter) => before_today(encounter.check_in, now, offset),
                        None => {
                            warn!("Dropping orphaned encounter {} from queue '{}'", encounter_id, queue.name);
                            true
                        }
                    };

                    if expired && tx.remove_member(queue.id, encounter_id).await? {
                        removed += 1;
                    }
                }
            }
            Ok::<_, ClinicError>(removed)
        }
        .await;
        let removed = settle(tx, result).await?;

        info!("Cleared {} expired queue entries", removed);
        Ok(removed)
    }
}

/// 事务内入队：校验就诊存在，解析或创建队列后追加
pub(crate) async fn enqueue<X: ClinicTx>(
    tx: &mut X,
    queue_name: &str,
    encounter_id: i64,
    kind: QueueKind,
) -> Result<Queue> {
    if tx.find_encounter(encounter_id).await?.is_none() {
        return Err(ClinicError::not_found("encounter", encounter_id));
    }

    let queue = resolve_or_create(tx, queue_name, kind).await?;
    if tx.append_member(queue.id, encounter_id).await? {
        info!("Added encounter {} to queue '{}'", encounter_id, queue.name);
    } else {
        debug!("Encounter {} already in queue '{}'", encounter_id, queue.name);
    }
    Ok(queue)
}

async fn resolve_or_create<X: ClinicTx>(tx: &mut X, name: &str, kind: QueueKind) -> Result<Queue> {
    match tx.find_queue_by_name(name).await? {
        Some(queue) => {
            if queue.kind != kind {
                warn!("Queue '{}' is {:?}, requested as {:?}", queue.name, queue.kind, kind);
            }
            Ok(queue)
        }
        None => {
            let queue = tx.insert_queue(name, kind).await?;
            info!("Created queue '{}' ({:?})", queue.name, queue.kind);
            Ok(queue)
        }
    }
}

async fn require_queue<X: ClinicTx>(tx: &mut X, queue_id: i64) -> Result<Queue> {
    tx.find_queue(queue_id)
        .await?
        .ok_or_else(|| ClinicError::not_found("queue", queue_id))
}

async fn transfer<X: ClinicTx>(tx: &mut X, from: &Queue, to: &Queue, encounter_id: i64) -> Result<()> {
    if tx.find_encounter(encounter_id).await?.is_none() {
        return Err(ClinicError::not_found("encounter", encounter_id));
    }

    tx.remove_member(from.id, encounter_id).await?;
    tx.append_member(to.id, encounter_id).await?;

    info!("Moved encounter {} from '{}' to '{}'", encounter_id, from.name, to.name);
    Ok(())
}
