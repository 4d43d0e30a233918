use std::sync::Arc;
use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, Router},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tokio::time::Duration;

mod routes;
mod models;
mod services;
mod config;
mod error;
mod utils;
mod state;

use crate::{
    config::Config,
    services::{
        AuthService, ConnectionRegistry, Database, EventBus, NotificationDispatcher,
        NotificationService, PostService, UserService,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "sns_pulse=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SNS-Pulse service...");

    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化数据库连接
    let db = match Database::new(&config).await {
        Ok(db) => match db.verify_connection().await {
            Ok(_) => {
                info!("Database connection established successfully");
                db
            }
            Err(e) => {
                warn!("Database connection failed: {}", e);
                info!("Attempting to auto-start database...");

                // 尝试自动启动数据库
                if let Err(start_err) = auto_start_database(&config).await {
                    error!(
                        "Failed to auto-start database: {}. Original error: {}",
                        start_err, e
                    );
                    return Err(anyhow::anyhow!("Database connection failed"));
                }

                // 重新尝试连接
                let db = Database::new(&config).await?;
                db.verify_connection().await?;
                info!("Database auto-started and connected successfully");
                db
            }
        },
        Err(e) => {
            error!("Failed to create database connection: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed"));
        }
    };

    // 初始化所有服务
    let auth_service = AuthService::new(&config).await?;
    let user_service = UserService::new(db.clone(), auth_service.clone()).await?;
    let event_bus = EventBus::new(&config).await?;
    let post_service = PostService::new(db.clone(), event_bus.clone()).await?;
    let registry = Arc::new(ConnectionRegistry::new());
    let notification_service = NotificationService::new(db.clone(), registry).await?;
    let dispatcher = NotificationDispatcher::new(
        event_bus.clone(),
        notification_service.clone(),
        config.clone(),
    )
    .await?;

    // 创建应用状态
    let app_state = Arc::new(AppState {
        config: config.clone(),
        auth_service,
        user_service,
        post_service,
        notification_service,
        dispatcher,
    });

    // 启动后台任务
    start_background_tasks(app_state.clone()).await;

    // 配置 CORS
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(
            config
                .cors_allowed_origins
                .split(',')
                .map(|origin| origin.parse::<HeaderValue>().unwrap())
                .collect::<Vec<_>>(),
        );

    // 构建应用路由 - 使用/api/sns/前缀避免网关路由冲突
    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .nest("/api/sns/users", routes::users::router())
        .nest("/api/sns/posts", routes::posts::router())
        .nest("/api/sns/notifications", routes::notifications::router())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            utils::middleware::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            utils::middleware::rate_limit_middleware,
        ))
        .layer(middleware::from_fn(
            utils::middleware::request_logging_middleware,
        ))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "SNS-Pulse is running!"
}

async fn auto_start_database(config: &Config) -> anyhow::Result<()> {
    info!("Attempting to start SurrealDB...");

    // 尝试启动 SurrealDB 进程
    let output = tokio::process::Command::new("surreal")
        .args([
            "start",
            "--user",
            &config.database_username,
            "--pass",
            &config.database_password,
            "memory",
        ])
        .spawn();

    match output {
        Ok(_) => {
            info!("SurrealDB started successfully");
            // 等待数据库启动
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(())
        }
        Err(e) => {
            error!("Failed to start SurrealDB: {}", e);
            Err(anyhow::anyhow!("Failed to start database"))
        }
    }
}

async fn start_background_tasks(app_state: Arc<AppState>) {
    info!("Starting background tasks...");

    // 通知派发 worker
    app_state.dispatcher.spawn_workers();

    info!("Background tasks started successfully");
}
