pub mod users;
pub mod posts;
pub mod notifications;
