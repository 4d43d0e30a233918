pub mod database;
pub mod auth;
pub mod user;
pub mod post;
pub mod bus;
pub mod stream;
pub mod notification;
pub mod dispatcher;

// 重新导出常用类型
pub use database::Database;
pub use auth::AuthService;
pub use user::UserService;
pub use post::PostService;
pub use bus::EventBus;
pub use stream::ConnectionRegistry;
pub use notification::NotificationService;
pub use dispatcher::NotificationDispatcher;
