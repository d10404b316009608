use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    db::DbPool,
    error::{AppError, AppResult},
    models::{ROLE_USER, User},
    response::{ApiResponse, Meta},
};
use crate::dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest};

const PASSWORD_MIN: usize = 5;
const PASSWORD_MAX: usize = 130;

pub fn validate_registration(payload: &RegisterRequest) -> AppResult<()> {
    if payload.first_name.trim().is_empty() || payload.last_name.trim().is_empty() {
        return Err(AppError::BadRequest("first and last name are required".into()));
    }
    let email = payload.email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(AppError::BadRequest("email is invalid".into()));
    }
    let len = payload.password.chars().count();
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&len) {
        return Err(AppError::BadRequest(format!(
            "password must be between {PASSWORD_MIN} and {PASSWORD_MAX} characters"
        )));
    }
    if payload.password != payload.password_re {
        return Err(AppError::BadRequest("passwords do not match".into()));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn issue_token(user: &User, config: &AppConfig) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::seconds(config.jwt_expiration_seconds))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub async fn register_user(
    pool: &DbPool,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    validate_registration(&payload)?;
    let email = payload.email.trim().to_ascii_lowercase();

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(pool)
        .await?;

    if exist.is_some() {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    let password_hash = hash_password(&payload.password)?;

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, first_name, last_name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, first_name, last_name, email, password_hash, role, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(email.as_str())
    .bind(password_hash)
    .bind(ROLE_USER)
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(ApiResponse::success("User created", user, None))
}

pub async fn login_user(
    pool: &DbPool,
    config: &AppConfig,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let email = email.trim().to_ascii_lowercase();
    let user: Option<User> = sqlx::query_as::<_, User>(
        "SELECT id, first_name, last_name, email, password_hash, role, created_at FROM users WHERE email = $1",
    )
    .bind(email.as_str())
    .fetch_optional(pool)
    .await?;

    let user = match user {
        Some(u) => u,
        None => return Err(AppError::BadRequest("Invalid email or password".into())),
    };

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let token = issue_token(&user, config)?;
    let resp = LoginResponse {
        token: format!("Bearer {}", token),
    };

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(ApiResponse::success(
        "Logged in",
        resp,
        Some(Meta::empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::CheckoutConfig, middleware::auth::decode_token};

    fn request(password: &str, password_re: &str) -> RegisterRequest {
        RegisterRequest {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password: password.into(),
            password_re: password_re.into(),
        }
    }

    #[test]
    fn registration_requires_matching_passwords() {
        assert!(validate_registration(&request("hunter22", "hunter22")).is_ok());
        assert!(validate_registration(&request("hunter22", "hunter23")).is_err());
        assert!(validate_registration(&request("abc", "abc")).is_err());
    }

    #[test]
    fn registration_requires_plausible_email() {
        let mut req = request("hunter22", "hunter22");
        req.email = "not-an-email".into();
        assert!(validate_registration(&req).is_err());
    }

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("hunter22").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"hunter22", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"hunter23", &parsed).is_err());
    }

    #[test]
    fn issued_token_round_trips_through_extractor_decoder() {
        let config = AppConfig {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "test-secret".into(),
            jwt_expiration_seconds: 60,
            checkout: CheckoutConfig::default(),
        };
        let user = User {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            role: "storeowner".into(),
            created_at: Utc::now(),
        };

        let token = issue_token(&user, &config).unwrap();
        let auth = decode_token(&token, &config.jwt_secret).unwrap();
        assert_eq!(auth.user_id, user.id);
        assert!(auth.is_staff());
        assert!(decode_token(&token, "other-secret").is_err());
    }
}
