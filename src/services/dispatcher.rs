use crate::config::Config;
use crate::error::Result;
use crate::services::bus::{BusDelivery, EventBus};
use crate::services::notification::NotificationService;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 通知派发器
///
/// 每个 worker 以独立消费者身份循环读取总线：新条目直接处理，
/// 陈旧的未确认条目周期性认领回来重投。处理结果决定确认与否，
/// 只有瞬时失败会把条目留在 pending 列表里等待下一轮。
#[derive(Clone)]
pub struct NotificationDispatcher {
    bus: EventBus,
    notifications: NotificationService,
    config: Config,
}

impl NotificationDispatcher {
    pub async fn new(
        bus: EventBus,
        notifications: NotificationService,
        config: Config,
    ) -> Result<Self> {
        Ok(Self {
            bus,
            notifications,
            config,
        })
    }

    /// 启动配置数量的派发 worker
    pub fn spawn_workers(&self) {
        for index in 0..self.config.dispatcher_count.max(1) {
            let worker = self.clone();
            let consumer = format!("dispatcher-{}", index);
            tokio::spawn(async move {
                worker.run(consumer).await;
            });
        }
    }

    async fn run(self, consumer_name: String) {
        // 消费组和专用读连接都就绪之前不开始读
        let mut reader = loop {
            let ready = async {
                self.bus.ensure_group().await?;
                self.bus.consumer(&consumer_name).await
            };
            match ready.await {
                Ok(reader) => break reader,
                Err(e) => {
                    error!("Consumer {} failed to initialize: {}", consumer_name, e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        };
        let consumer = reader.name().to_string();

        info!("Notification dispatcher {} started", consumer);

        let claim_interval = Duration::from_secs(self.config.bus_claim_interval_secs);
        let min_idle_ms = (self.config.bus_claim_min_idle_secs * 1000) as usize;
        let batch_size = self.config.bus_batch_size.max(1);
        let block_ms = self.config.bus_block_ms as usize;
        let mut last_claim = Instant::now();

        loop {
            if last_claim.elapsed() >= claim_interval {
                last_claim = Instant::now();
                match self.bus.claim_stale(&consumer, min_idle_ms, batch_size).await {
                    Ok(claimed) => {
                        for delivery in claimed {
                            self.handle(&consumer, delivery).await;
                        }
                    }
                    Err(e) => warn!("Consumer {} claim pass failed: {}", consumer, e),
                }
            }

            match reader.read_batch(batch_size, block_ms).await {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        self.handle(&consumer, delivery).await;
                    }
                }
                Err(e) => {
                    error!("Consumer {} failed to read from bus: {}", consumer, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// 处理一条投递并按结果决定确认
    ///
    /// 三条出路：处理完成就确认；瞬时失败不确认，留给总线重投；
    /// 载荷损坏或永久失败则确认掉，坏载荷额外进死信流。
    async fn handle(&self, consumer: &str, delivery: BusDelivery) {
        let event = match delivery.event() {
            Ok(event) => event,
            Err(e) => {
                error!(
                    "Consumer {} got malformed payload in entry {}: {}",
                    consumer, delivery.entry_id, e
                );
                if let Err(e) = self
                    .bus
                    .dead_letter(&delivery.entry_id, &delivery.payload, "malformed payload")
                    .await
                {
                    error!("Failed to dead letter entry {}: {}", delivery.entry_id, e);
                }
                return;
            }
        };

        match self.notifications.dispatch(&event).await {
            Ok(outcome) => {
                debug!(
                    "Consumer {} handled entry {} ({:?})",
                    consumer, delivery.entry_id, outcome
                );
                if let Err(e) = self.bus.ack(&delivery.entry_id).await {
                    // 确认失败会导致重投，接受由此产生的重复通知
                    warn!("Failed to ack entry {}: {}", delivery.entry_id, e);
                }
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "Consumer {} hit transient failure on entry {}, leaving it pending: {}",
                    consumer, delivery.entry_id, e
                );
            }
            Err(e) => {
                error!(
                    "Consumer {} dropping entry {} after permanent failure: {}",
                    consumer, delivery.entry_id, e
                );
                if let Err(e) = self.bus.ack(&delivery.entry_id).await {
                    warn!("Failed to ack entry {}: {}", delivery.entry_id, e);
                }
            }
        }
    }
}
