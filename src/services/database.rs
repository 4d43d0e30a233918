use crate::config::Config;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Debug;
use surrealdb::engine::remote::http::{Client, Http};
use surrealdb::opt::auth::Root;
use surrealdb::{Response, Surreal};
use tracing::{error, info};

/// 数据库服务
///
/// 记录 ID 统一由调用方生成 UUID，查询时通过 meta::id(id) 投影回纯字符串。
#[derive(Clone)]
pub struct Database {
    client: Surreal<Client>,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let client = Surreal::new::<Http>(http_endpoint(&config.database_url)).await?;

        client
            .signin(Root {
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;

        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.client.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(AppError::from(e))
            }
        }
    }

    /// 执行原始SQL查询
    pub async fn query(&self, sql: &str) -> Result<Response> {
        let response = self.client.query(sql).await?;
        Ok(response.check()?)
    }

    /// 执行带参数的查询
    pub async fn query_with_params<P>(&self, sql: &str, params: P) -> Result<Response>
    where
        P: Serialize,
    {
        let response = self.client.query(sql).bind(params).await?;
        Ok(response.check()?)
    }

    /// 创建记录，记录 ID 取自 data 的 id 字段
    pub async fn create<T>(&self, table: &str, data: T) -> Result<T>
    where
        T: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + Debug,
    {
        let value = serde_json::to_value(&data)?;
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Internal("Record is missing an id field".to_string()))?
            .to_string();

        self.query_with_params(
            "CREATE type::thing($table, $id) CONTENT $data RETURN NONE",
            json!({
                "table": table,
                "id": id,
                "data": value,
            }),
        )
        .await?;

        Ok(data)
    }

    /// 通过ID获取单个记录
    pub async fn get_by_id<T>(&self, table: &str, id: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + Send + Sync + Debug,
    {
        let mut response = self
            .query_with_params(
                "SELECT *, meta::id(id) AS id FROM type::thing($table, $id)",
                json!({
                    "table": table,
                    "id": id,
                }),
            )
            .await?;

        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }

    /// 通过ID合并JSON字段，返回更新后的记录
    pub async fn update_by_id_with_json<T>(
        &self,
        table: &str,
        id: &str,
        updates: serde_json::Value,
    ) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + Send + Sync + Debug,
    {
        let mut response = self
            .query_with_params(
                "UPDATE type::thing($table, $id) MERGE $updates RETURN NONE; \
                 SELECT *, meta::id(id) AS id FROM type::thing($table, $id)",
                json!({
                    "table": table,
                    "id": id,
                    "updates": updates,
                }),
            )
            .await?;

        let results: Vec<T> = response.take(1)?;
        Ok(results.into_iter().next())
    }

    /// 查找单个记录
    pub async fn find_one<T>(&self, table: &str, field: &str, value: &str) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de> + Send + Sync + Clone + Debug,
    {
        let sql = format!(
            "SELECT *, meta::id(id) AS id FROM {} WHERE {} = $value LIMIT 1",
            table, field
        );

        let mut response = self
            .query_with_params(&sql, json!({ "value": value }))
            .await?;

        let results: Vec<T> = response.take(0)?;
        Ok(results.into_iter().next())
    }
}

/// SurrealDB HTTP 引擎只接受 host:port 形式的地址
fn http_endpoint(url: &str) -> &str {
    url.trim_start_matches("https://").trim_start_matches("http://")
}

/// 分页结果结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// 规整后的分页参数
#[derive(Debug, Clone, Copy)]
pub struct PageParams {
    pub page: usize,
    pub limit: usize,
    pub offset: usize,
}

impl PageParams {
    /// 规整查询参数：页码至少为 1，每页条数限制在 [1, max_page_size]
    pub fn resolve(page: Option<usize>, limit: Option<usize>, config: &Config) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(config.default_page_size)
            .clamp(1, config.max_page_size);
        Self {
            page,
            limit,
            offset: (page - 1) * limit,
        }
    }

    /// 组装分页结果
    pub fn into_result<T>(self, data: Vec<T>, total: usize) -> PaginatedResult<T> {
        PaginatedResult {
            data,
            total,
            page: self.page,
            per_page: self.limit,
            total_pages: (total + self.limit - 1) / self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_endpoint_strips_scheme() {
        assert_eq!(http_endpoint("http://localhost:8000"), "localhost:8000");
        assert_eq!(http_endpoint("https://db.internal:8000"), "db.internal:8000");
        assert_eq!(http_endpoint("localhost:8000"), "localhost:8000");
    }

    #[test]
    fn test_page_params_defaults_and_clamps() {
        let config = Config::default();

        let params = PageParams::resolve(None, None, &config);
        assert_eq!(params.page, 1);
        assert_eq!(params.limit, config.default_page_size);
        assert_eq!(params.offset, 0);

        // 非法的零值规整到下界
        let params = PageParams::resolve(Some(0), Some(0), &config);
        assert_eq!(params.page, 1);
        assert_eq!(params.limit, 1);
        assert_eq!(params.offset, 0);

        let params = PageParams::resolve(Some(3), Some(1000), &config);
        assert_eq!(params.limit, config.max_page_size);
        assert_eq!(params.offset, 2 * config.max_page_size);
    }

    #[test]
    fn test_page_params_total_pages_math() {
        let config = Config::default();
        let params = PageParams::resolve(Some(1), Some(20), &config);

        assert_eq!(params.into_result::<()>(Vec::new(), 0).total_pages, 0);
        assert_eq!(params.into_result::<()>(Vec::new(), 1).total_pages, 1);
        assert_eq!(params.into_result::<()>(Vec::new(), 20).total_pages, 1);
        assert_eq!(params.into_result::<()>(Vec::new(), 21).total_pages, 2);
        assert_eq!(params.into_result::<()>(Vec::new(), 40).total_pages, 2);
    }
}
