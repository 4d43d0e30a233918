use crate::error::{AppError, Result};
use crate::models::user::{JoinRequest, LoginRequest, User, UserResponse};
use crate::services::auth::AuthService;
use crate::services::database::Database;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use validator::Validate;

/// 用户服务
///
/// 按用户名的读路径走 Redis 旁路缓存，认证中间件每个请求都要查一次用户，
/// 不能每次都打到数据库。缓存故障一律降级为直接查库，不向上冒错。
#[derive(Clone)]
pub struct UserService {
    db: Database,
    auth: AuthService,
    cache: ConnectionManager,
}

impl UserService {
    pub async fn new(db: Database, auth: AuthService) -> Result<Self> {
        let client = redis::Client::open(db.config.redis_url.as_str())?;
        let cache = ConnectionManager::new(client).await?;
        Ok(Self { db, auth, cache })
    }

    fn cache_key(username: &str) -> String {
        format!("user:username:{}", username)
    }

    /// 注册新用户
    pub async fn join(&self, request: JoinRequest) -> Result<UserResponse> {
        request.validate()?;

        let existing: Option<User> = self
            .db
            .find_one("user", "username", &request.username)
            .await?;
        if existing.is_some() {
            return Err(AppError::conflict("Username already taken"));
        }

        let password_hash = self.auth.hash_password(&request.password)?;
        let user = self
            .db
            .create("user", User::new(request.username, password_hash))
            .await?;

        info!("User {} joined", user.username);
        Ok(user.to_response())
    }

    /// 登录，通过后返回访问令牌
    pub async fn login(&self, request: LoginRequest) -> Result<(String, UserResponse)> {
        let user: User = self
            .db
            .find_one("user", "username", &request.username)
            .await?
            .ok_or_else(|| AppError::unauthorized("Invalid username or password"))?;

        if !self.auth.verify_password(&request.password, &user.password)? {
            return Err(AppError::unauthorized("Invalid username or password"));
        }

        let token = self.auth.create_token(&user)?;
        info!("User {} logged in", user.username);
        Ok((token, user.to_response()))
    }

    /// 按用户名取用户，带旁路缓存
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let key = Self::cache_key(username);
        let mut cache = self.cache.clone();

        match cache.get::<_, Option<String>>(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<User>(&cached) {
                Ok(user) => {
                    debug!("User cache hit for {}", username);
                    return Ok(Some(user));
                }
                Err(e) => warn!("Discarding corrupt user cache entry for {}: {}", username, e),
            },
            Ok(None) => {}
            Err(e) => warn!("User cache read failed for {}: {}", username, e),
        }

        let user: Option<User> = self.db.find_one("user", "username", username).await?;

        if let Some(user) = &user {
            let json = serde_json::to_string(user)?;
            if let Err(e) = cache
                .set_ex::<_, _, ()>(&key, json, self.db.config.cache_ttl)
                .await
            {
                warn!("User cache write failed for {}: {}", username, e);
            }
        }

        Ok(user)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        self.db.get_by_id("user", id).await
    }
}
