use crate::config::Config;
use crate::error::Result;
use crate::models::notification::NotificationEvent;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// 流条目里承载事件 JSON 的字段名
pub const PAYLOAD_FIELD: &str = "payload";

/// 一条待处理的总线投递
///
/// entry_id 是流内序号，确认和死信都靠它；payload 保持原始 JSON 文本，
/// 解析失败的条目也要能原样挪进死信流。
#[derive(Debug, Clone)]
pub struct BusDelivery {
    pub entry_id: String,
    pub payload: String,
}

impl BusDelivery {
    /// 解析出通知事件；载荷损坏时报错，由调用方决定死信处理
    pub fn event(&self) -> Result<NotificationEvent> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// 基于 Redis Stream 的持久事件总线
///
/// 发布方只追加；消费方以消费组读取，处理完显式确认。
/// 未确认的条目留在 pending 列表里，空闲够久之后会被重新认领投递，
/// 投递次数超限的条目转入死信流，避免毒条目无限循环。
#[derive(Clone)]
pub struct EventBus {
    client: Client,
    conn: ConnectionManager,
    stream: String,
    group: String,
    dead_letter_stream: String,
    max_deliveries: usize,
}

impl EventBus {
    pub async fn new(config: &Config) -> Result<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!("Event bus connected to Redis at {}", config.redis_url);

        Ok(Self {
            client,
            conn,
            stream: config.notification_stream.clone(),
            group: config.notification_group.clone(),
            dead_letter_stream: config.dead_letter_stream.clone(),
            max_deliveries: config.bus_max_deliveries as usize,
        })
    }

    /// 为一个消费者建立专用读句柄
    ///
    /// 阻塞式读取独占一条连接，不能和发布、确认共用，
    /// 否则一次 XREADGROUP BLOCK 会把同连接上的其它命令卡住。
    pub async fn consumer(&self, name: &str) -> Result<BusConsumer> {
        let conn = ConnectionManager::new(self.client.clone()).await?;
        Ok(BusConsumer {
            conn,
            stream: self.stream.clone(),
            group: self.group.clone(),
            name: name.to_string(),
        })
    }

    /// 发布事件，返回流条目 ID
    ///
    /// XADD 返回即表示已落盘进流，之后的投递由消费组负责。
    pub async fn publish(&self, event: &NotificationEvent) -> Result<String> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();

        let entry_id: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .await?;

        debug!(
            "Published {:?} event {} for recipient {}",
            event.kind, entry_id, event.recipient_id
        );
        Ok(entry_id)
    }

    /// 创建消费组；组已存在时不算错误
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(&self.stream, &self.group, "$")
            .await
        {
            Ok(()) => {
                info!(
                    "Created consumer group {} on stream {}",
                    self.group, self.stream
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 认领同组内空闲超过 min_idle_ms 的未确认条目
    ///
    /// 投递次数已超限的条目直接转入死信流，不再交给调用方；
    /// 其余条目重新投递，交给当前消费者处理。
    pub async fn claim_stale(
        &self,
        consumer: &str,
        min_idle_ms: usize,
        count: usize,
    ) -> Result<Vec<BusDelivery>> {
        let mut conn = self.conn.clone();

        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, &self.group, "-", "+", count)
            .await?;

        let mut delivery_counts: HashMap<String, usize> = HashMap::new();
        let mut stale_ids: Vec<String> = Vec::new();
        for entry in &pending.ids {
            if entry.last_delivered_ms >= min_idle_ms {
                delivery_counts.insert(entry.id.clone(), entry.times_delivered);
                stale_ids.push(entry.id.clone());
            }
        }
        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream, &self.group, consumer, min_idle_ms, &stale_ids)
            .await?;

        let mut deliveries = Vec::new();
        for entry in claimed.ids {
            let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
            let times_delivered = delivery_counts.get(&entry.id).copied().unwrap_or(0);

            if times_delivered >= self.max_deliveries {
                warn!(
                    "Entry {} exceeded {} deliveries, moving to dead letter stream",
                    entry.id, self.max_deliveries
                );
                self.dead_letter(&entry.id, &payload, "max deliveries exceeded")
                    .await?;
                continue;
            }

            deliveries.push(BusDelivery {
                entry_id: entry.id,
                payload,
            });
        }

        if !deliveries.is_empty() {
            info!(
                "Consumer {} claimed {} stale deliveries",
                consumer,
                deliveries.len()
            );
        }
        Ok(deliveries)
    }

    /// 确认条目处理完成，从 pending 列表移除
    pub async fn ack(&self, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&self.stream, &self.group, &[entry_id]).await?;
        Ok(())
    }

    /// 把条目挪进死信流并确认原条目
    pub async fn dead_letter(&self, entry_id: &str, payload: &str, reason: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: String = conn
            .xadd(
                &self.dead_letter_stream,
                "*",
                &[
                    (PAYLOAD_FIELD, payload),
                    ("reason", reason),
                    ("source_entry", entry_id),
                ],
            )
            .await?;

        warn!("Dead lettered entry {}: {}", entry_id, reason);
        self.ack(entry_id).await
    }
}

/// 单个消费者的专用读句柄，见 EventBus::consumer
pub struct BusConsumer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    name: String,
}

impl BusConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 读取一批新条目，最多阻塞 block_ms 毫秒
    pub async fn read_batch(&mut self, count: usize, block_ms: usize) -> Result<Vec<BusDelivery>> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.name)
            .count(count)
            .block(block_ms);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await?;

        let mut deliveries = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                // 字段缺失时留空载荷，下游解析失败后按死信处理
                let payload: String = entry.get(PAYLOAD_FIELD).unwrap_or_default();
                deliveries.push(BusDelivery {
                    entry_id: entry.id,
                    payload,
                });
            }
        }
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{NotificationArgs, NotificationKind};

    #[test]
    fn test_delivery_parses_event() {
        let event = NotificationEvent::new(
            "user-9",
            NotificationKind::NewComment,
            NotificationArgs {
                actor_id: "user-3".to_string(),
                subject_id: "post-5".to_string(),
            },
        );
        let delivery = BusDelivery {
            entry_id: "1692000000000-0".to_string(),
            payload: serde_json::to_string(&event).unwrap(),
        };

        let decoded = delivery.event().unwrap();
        assert_eq!(decoded.recipient_id, "user-9");
        assert_eq!(decoded.kind, NotificationKind::NewComment);
    }

    #[test]
    fn test_delivery_rejects_garbage_payload() {
        let delivery = BusDelivery {
            entry_id: "1692000000000-1".to_string(),
            payload: "not json".to_string(),
        };
        assert!(delivery.event().is_err());

        let empty = BusDelivery {
            entry_id: "1692000000000-2".to_string(),
            payload: String::new(),
        };
        assert!(empty.event().is_err());
    }
}
