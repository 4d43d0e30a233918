use crate::{
    config::Config,
    services::{
        auth::AuthService,
        dispatcher::NotificationDispatcher,
        notification::NotificationService,
        post::PostService,
        user::UserService,
    },
};

/// 应用程序的共享状态
/// 包含所有服务和配置的引用
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 认证服务
    pub auth_service: AuthService,

    /// 用户服务
    pub user_service: UserService,

    /// 帖子服务
    pub post_service: PostService,

    /// 通知服务
    pub notification_service: NotificationService,

    /// 通知派发器
    pub dispatcher: NotificationDispatcher,
}
