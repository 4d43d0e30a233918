use crate::error::{AppError, Result};
use crate::models::notification::Notification;
use axum::response::sse::Event;
use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use serde_json::json;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// 连接确认帧的事件名
pub const FRAME_CONNECTED: &str = "connected";
/// 通知帧的事件名
pub const FRAME_NOTIFICATION: &str = "notification";

const STATE_OPEN: u8 = 0;
const STATE_CLOSED: u8 = 1;

/// 推送给客户端的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    pub id: Option<String>,
    pub name: &'static str,
    pub data: String,
}

impl NotificationFrame {
    /// 连接建立后发送的确认帧，让客户端能区分"已连接但暂无通知"和"从未连上"
    pub fn connected() -> Self {
        Self {
            id: None,
            name: FRAME_CONNECTED,
            data: json!({ "message": "connect completed" }).to_string(),
        }
    }

    /// 实时通知帧，帧 ID 就是通知记录的 ID
    pub fn notification(notification: &Notification) -> Self {
        Self {
            id: Some(notification.id.clone()),
            name: FRAME_NOTIFICATION,
            data: json!({
                "id": notification.id,
                "kind": notification.kind,
                "text": notification.kind.text(),
            })
            .to_string(),
        }
    }

    pub fn into_sse_event(self) -> Event {
        let mut event = Event::default().event(self.name).data(self.data);
        if let Some(id) = self.id {
            event = event.id(id);
        }
        event
    }
}

/// 流会话的唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// 单个接收者的服务端推送通道
///
/// 状态机只有 OPEN -> CLOSED 一条迁移；close 是唯一的迁移入口，
/// 幂等且只生效一次。重连不复用会话，而是新建一个。
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    recipient_id: String,
    state: AtomicU8,
    sender: Mutex<Option<mpsc::Sender<NotificationFrame>>>,
}

impl StreamSession {
    pub fn new(recipient_id: &str, capacity: usize) -> (Arc<Self>, mpsc::Receiver<NotificationFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Self {
            id: SessionId::generate(),
            recipient_id: recipient_id.to_string(),
            state: AtomicU8::new(STATE_OPEN),
            sender: Mutex::new(Some(tx)),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// 向客户端推送一帧
    ///
    /// 通道已断开或积压占满都判定为会话死亡：转入 CLOSED 并向调用方报错，
    /// 由调用方决定是否清理注册表。
    pub fn push(&self, frame: NotificationFrame) -> Result<()> {
        if !self.is_open() {
            return Err(AppError::SessionClosed);
        }

        let result = {
            let guard = self.sender.lock();
            match guard.as_ref() {
                Some(tx) => tx.try_send(frame),
                None => return Err(AppError::SessionClosed),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.close();
                Err(AppError::SessionClosed)
            }
        }
    }

    /// 唯一的状态迁移入口；返回 true 表示本次调用完成了 OPEN -> CLOSED
    ///
    /// 迁移时丢弃发送端，让对应的接收流立即结束。
    pub fn close(&self) -> bool {
        let transitioned = self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if transitioned {
            self.sender.lock().take();
        }

        transitioned
    }
}

/// 接收者 -> 活跃流会话 的并发注册表
///
/// 注册、查询、移除都必须能被派发任务和传输任务并发调用，
/// 互斥完全交给底层并发映射，不做任何外部加锁。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<StreamSession>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// 注册新会话；同一接收者的旧会话先被关闭（后连接者胜出）
    pub fn register(&self, session: Arc<StreamSession>) {
        let recipient_id = session.recipient_id().to_string();
        if let Some(previous) = self.sessions.insert(recipient_id, session) {
            if previous.close() {
                debug!(
                    "Replaced live session {} for recipient {}",
                    previous.id(),
                    previous.recipient_id()
                );
            }
        }
    }

    /// 当前会话句柄；不阻塞，没有则返回 None
    pub fn get(&self, recipient_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions
            .get(recipient_id)
            .map(|entry| entry.value().clone())
    }

    /// 仅当注册表里仍是这个会话时才移除（compare-and-remove）
    ///
    /// 旧会话迟到的清理不会误删同一接收者新注册的会话。
    pub fn remove(&self, recipient_id: &str, session_id: SessionId) -> bool {
        self.sessions
            .remove_if(recipient_id, |_, session| session.id() == session_id)
            .is_some()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 为接收者建立推送通道
    ///
    /// 确认帧发送成功之前不注册，开通失败时注册表保持原样。
    pub fn open_stream(
        self: &Arc<Self>,
        recipient_id: &str,
        idle_timeout: Duration,
        capacity: usize,
    ) -> Result<SessionStream> {
        let (session, receiver) = StreamSession::new(recipient_id, capacity);

        session
            .push(NotificationFrame::connected())
            .map_err(|_| AppError::Internal("Could not establish notification stream".to_string()))?;

        self.register(session.clone());
        info!(
            "Notification stream opened for recipient {} ({})",
            recipient_id,
            session.id()
        );

        Ok(SessionStream::new(session, receiver, self.clone(), idle_timeout))
    }
}

/// 交给传输层消费的帧流
///
/// 空闲超时在流内部触发关闭和注册表清理；客户端断开或服务端丢弃流时
/// 由守卫完成同样的清理。两条路径都幂等，清理只会生效一次。
pub struct SessionStream {
    inner: Pin<Box<dyn Stream<Item = NotificationFrame> + Send>>,
    guard: SessionGuard,
}

impl SessionStream {
    fn new(
        session: Arc<StreamSession>,
        receiver: mpsc::Receiver<NotificationFrame>,
        registry: Arc<ConnectionRegistry>,
        idle_timeout: Duration,
    ) -> Self {
        let timeout_session = session.clone();
        let timeout_registry = registry.clone();

        let inner = ReceiverStream::new(receiver)
            .timeout(idle_timeout)
            .take_while(move |frame| {
                if frame.is_ok() {
                    return true;
                }
                if timeout_session.close() {
                    warn!(
                        "Notification stream for recipient {} idled out ({})",
                        timeout_session.recipient_id(),
                        timeout_session.id()
                    );
                }
                timeout_registry.remove(timeout_session.recipient_id(), timeout_session.id());
                false
            })
            .filter_map(|frame| frame.ok());

        Self {
            inner: Box::pin(inner),
            guard: SessionGuard { session, registry },
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.guard.session.id()
    }
}

impl Stream for SessionStream {
    type Item = NotificationFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct SessionGuard {
    session: Arc<StreamSession>,
    registry: Arc<ConnectionRegistry>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let closed_now = self.session.close();
        let removed = self
            .registry
            .remove(self.session.recipient_id(), self.session.id());
        if closed_now || removed {
            debug!(
                "Notification stream for recipient {} cleaned up ({})",
                self.session.recipient_id(),
                self.session.id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{NotificationArgs, NotificationEvent, NotificationKind};
    use tokio_test::{assert_pending, assert_ready};

    fn notification_frame(id: &str) -> NotificationFrame {
        let event = NotificationEvent::new(
            "recipient",
            NotificationKind::NewLike,
            NotificationArgs {
                actor_id: "actor".to_string(),
                subject_id: "subject".to_string(),
            },
        );
        let mut notification = Notification::from_event(&event);
        notification.id = id.to_string();
        NotificationFrame::notification(&notification)
    }

    #[test]
    fn test_session_id_generate_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_push_delivers_frame() {
        let (session, mut rx) = StreamSession::new("user-1", 8);
        session.push(notification_frame("n-1")).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.name, FRAME_NOTIFICATION);
        assert_eq!(frame.id.as_deref(), Some("n-1"));
        assert!(frame.data.contains("new Like!"));
    }

    #[test]
    fn test_close_only_transitions_once() {
        let (session, _rx) = StreamSession::new("user-1", 8);
        assert!(session.is_open());
        assert!(session.close());
        assert!(!session.close());
        assert!(!session.is_open());
    }

    #[test]
    fn test_push_after_close_fails() {
        let (session, _rx) = StreamSession::new("user-1", 8);
        session.close();

        let err = session.push(notification_frame("n-1")).unwrap_err();
        assert!(matches!(err, AppError::SessionClosed));
    }

    #[test]
    fn test_push_to_dropped_receiver_closes_session() {
        let (session, rx) = StreamSession::new("user-1", 8);
        drop(rx);

        let err = session.push(notification_frame("n-1")).unwrap_err();
        assert!(matches!(err, AppError::SessionClosed));
        assert!(!session.is_open());
    }

    #[test]
    fn test_push_when_buffer_full_closes_session() {
        let (session, _rx) = StreamSession::new("user-1", 1);
        session.push(notification_frame("n-1")).unwrap();

        let err = session.push(notification_frame("n-2")).unwrap_err();
        assert!(matches!(err, AppError::SessionClosed));
        assert!(!session.is_open());
    }

    #[test]
    fn test_register_replaces_and_closes_previous() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = StreamSession::new("user-1", 8);
        let (second, _rx2) = StreamSession::new("user-1", 8);

        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.get("user-1").unwrap().id(), second.id());
    }

    #[test]
    fn test_compare_and_remove_ignores_stale_handle() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = StreamSession::new("user-1", 8);
        let (second, _rx2) = StreamSession::new("user-1", 8);

        registry.register(first.clone());
        registry.register(second.clone());

        // 旧会话迟到的清理不能删掉新会话
        assert!(!registry.remove("user-1", first.id()));
        assert_eq!(registry.get("user-1").unwrap().id(), second.id());

        assert!(registry.remove("user-1", second.id()));
        assert!(registry.get("user-1").is_none());
        assert!(!registry.remove("user-1", second.id()));
    }

    #[test]
    fn test_push_failure_isolated_between_recipients() {
        let registry = ConnectionRegistry::new();
        let (dead, rx_dead) = StreamSession::new("user-a", 8);
        let (live, mut rx_live) = StreamSession::new("user-b", 8);

        registry.register(dead.clone());
        registry.register(live.clone());
        drop(rx_dead);

        assert!(dead.push(notification_frame("n-1")).is_err());
        registry.remove("user-a", dead.id());

        live.push(notification_frame("n-2")).unwrap();
        assert_eq!(rx_live.try_recv().unwrap().id.as_deref(), Some("n-2"));
        assert!(registry.get("user-a").is_none());
        assert!(registry.get("user-b").is_some());
    }

    #[tokio::test]
    async fn test_open_stream_sends_connected_frame_first() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut stream = registry
            .open_stream("user-1", Duration::from_secs(60), 8)
            .unwrap();

        let frame = stream.next().await.unwrap();
        assert_eq!(frame.name, FRAME_CONNECTED);
        assert!(frame.data.contains("connect completed"));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_frames_pushed_through_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stream = registry
            .open_stream("user-1", Duration::from_secs(60), 8)
            .unwrap();

        let mut task = tokio_test::task::spawn(stream);
        let connected = assert_ready!(task.poll_next()).unwrap();
        assert_eq!(connected.name, FRAME_CONNECTED);

        assert_pending!(task.poll_next());

        let session = registry.get("user-1").unwrap();
        session.push(notification_frame("n-7")).unwrap();

        assert!(task.is_woken());
        let frame = assert_ready!(task.poll_next()).unwrap();
        assert_eq!(frame.id.as_deref(), Some("n-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_once_and_cleans_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut stream = registry
            .open_stream("user-1", Duration::from_millis(100), 8)
            .unwrap();
        let session = registry.get("user-1").unwrap();

        assert_eq!(stream.next().await.unwrap().name, FRAME_CONNECTED);

        // 没有新帧，超时后流结束，会话关闭且注册表已被清理
        assert!(stream.next().await.is_none());
        assert!(!session.is_open());
        assert_eq!(registry.session_count(), 0);

        // 守卫随后的清理只是空操作
        drop(stream);
        assert!(!session.is_open());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_cleans_registry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stream = registry
            .open_stream("user-1", Duration::from_secs(60), 8)
            .unwrap();
        let session = registry.get("user-1").unwrap();

        drop(stream);

        assert!(!session.is_open());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_replaced_session_stream_ends_without_evicting_successor() {
        let registry = Arc::new(ConnectionRegistry::new());
        let old_stream = registry
            .open_stream("user-1", Duration::from_secs(60), 8)
            .unwrap();
        let old_id = old_stream.session_id();

        let new_stream = registry
            .open_stream("user-1", Duration::from_secs(60), 8)
            .unwrap();

        // 旧会话被顶替后其流走到尽头，丢弃时不能清掉新会话
        let frames: Vec<_> = old_stream.collect().await;
        assert_eq!(frames.len(), 1, "only the connected frame was delivered");

        assert_eq!(registry.session_count(), 1);
        let current = registry.get("user-1").unwrap();
        assert_ne!(current.id(), old_id);
        assert_eq!(current.id(), new_stream.session_id());
    }
}
