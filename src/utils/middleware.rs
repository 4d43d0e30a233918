use crate::{error::AppError, models::user::User, state::AppState};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

type KeyedRateLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;
static RATE_LIMITER: OnceCell<KeyedRateLimiter> = OnceCell::const_new();

/// 认证中间件
///
/// 带合法令牌的请求把用户写进扩展，其余请求原样放行，
/// 是否强制认证由各个处理器自己决定。
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                match app_state.auth_service.verify_token(token) {
                    Ok(claims) => {
                        match app_state.user_service.get_by_username(&claims.username).await {
                            Ok(Some(user))
                                if user.deleted_at.is_none() && user.id == claims.sub =>
                            {
                                debug!("Authenticated user: {} ({})", user.username, user.id);
                                request.extensions_mut().insert(user);
                            }
                            Ok(_) => {
                                warn!("Token subject {} no longer resolves to a user", claims.sub)
                            }
                            Err(e) => warn!(
                                "Failed to load user for token subject {}: {}",
                                claims.sub, e
                            ),
                        }
                    }
                    Err(e) => {
                        debug!("JWT verification failed: {}", e);
                        // 不返回错误，让请求继续处理（作为未认证请求）
                    }
                }
            }
        }
    }

    Ok(next.run(request).await)
}

/// 根据限流配置计算配额
///
/// 窗口平摊到单次请求后不足一纳秒时判定为非法配置。
fn rate_limit_quota(requests: u32, window_secs: u64) -> Result<Quota, AppError> {
    let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_secs(window_secs.max(1)) / burst.get();

    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .ok_or_else(|| {
            AppError::Internal(format!(
                "Rate limit window of {}s cannot cover {} requests",
                window_secs, burst
            ))
        })
}

/// 速率限制中间件
pub async fn rate_limit_middleware(
    State(app_state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, AppError> {
    let rate_limiter = RATE_LIMITER
        .get_or_try_init(|| async {
            let quota = rate_limit_quota(
                app_state.config.rate_limit_requests,
                app_state.config.rate_limit_window,
            )?;
            Ok::<_, AppError>(RateLimiter::dashmap(quota))
        })
        .await?;

    let client_ip = get_client_ip(&request);

    match rate_limiter.check_key(&client_ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            warn!("Rate limit exceeded for IP: {}", client_ip);
            Err(AppError::RateLimitExceeded)
        }
    }
}

/// 请求日志中间件
pub async fn request_logging_middleware(request: Request<Body>, next: Next<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    let start_time = std::time::Instant::now();

    debug!("Incoming request: {} {} from {}", method, uri, client_ip);

    let response = next.run(request).await;

    let elapsed = start_time.elapsed();
    let status = response.status();

    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri,
        status.as_u16(),
        elapsed.as_millis()
    );

    response
}

/// 获取客户端 IP 地址
fn get_client_ip(request: &Request<Body>) -> String {
    let headers = request.headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(ip_str) = forwarded_for.to_str() {
            if let Some(ip) = ip_str.split(',').next() {
                return ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    request
        .extensions()
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 可选认证提取器
pub struct OptionalAuth(pub Option<User>);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<User>().cloned();
        Ok(OptionalAuth(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_quota_from_config() {
        let quota = rate_limit_quota(100, 60).unwrap();
        assert_eq!(quota.burst_size().get(), 100);

        // 零值配置回落到每秒一次
        assert!(rate_limit_quota(0, 0).is_ok());
    }

    #[test]
    fn test_rate_limit_quota_rejects_zero_period() {
        // 一秒窗口摊给 u32::MAX 次请求，单次周期向下取整为零
        assert!(rate_limit_quota(u32::MAX, 1).is_err());
    }
}
