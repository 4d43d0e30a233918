use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::user::User;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // 用户ID
    pub username: String, // 用户名
    pub iat: i64,         // 签发时间
    pub exp: i64,         // 过期时间
}

/// 认证服务：密码哈希与 JWT 签发验证
#[derive(Clone)]
pub struct AuthService {
    config: Config,
}

impl AuthService {
    pub async fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Stored password hash is invalid: {}", e)))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub fn create_token(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            iat: now,
            exp: now + self.config.jwt_expiry_secs as i64,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )?;
        Ok(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let decoding_key = DecodingKey::from_secret(self.config.jwt_secret.as_ref());
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for user: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Authentication("Invalid token".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        AuthService::new(&Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_password_hash_and_verify() {
        let auth = service().await;
        let hash = auth.hash_password("correct horse battery").unwrap();

        assert_ne!(hash, "correct horse battery");
        assert!(auth.verify_password("correct horse battery", &hash).unwrap());
        assert!(!auth.verify_password("wrong password", &hash).unwrap());
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let auth = service().await;
        let user = User::new("alice".to_string(), "hash".to_string());

        let token = auth.create_token(&user).unwrap();
        let claims = auth.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn test_tampered_token_rejected() {
        let auth = service().await;
        let user = User::new("alice".to_string(), "hash".to_string());

        let mut token = auth.create_token(&user).unwrap();
        token.push('x');

        assert!(auth.verify_token(&token).is_err());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let auth = service().await;
        let config = Config::default();

        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user-1".to_string(),
            username: "alice".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_ref()),
        )
        .unwrap();

        assert!(auth.verify_token(&token).is_err());
    }
}
