use std::env;

const DEFAULT_SHIPPING_ADDRESS: &str = "USA, New York, 123 wall street, Apt:10032, 143B";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_seconds: i64,
    pub checkout: CheckoutConfig,
}

/// Values stamped onto every order created by checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub default_currency: String,
    pub default_payment_method: String,
    pub default_shipping_address: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            default_payment_method: "Credit Card".to_string(),
            default_shipping_address: DEFAULT_SHIPPING_ADDRESS.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_expiration_seconds = env::var("JWT_EXPIRATION_SECONDS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(3600 * 24 * 7);

        let currency = env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "USD".to_string());
        let checkout = CheckoutConfig::new(
            &currency,
            env::var("DEFAULT_PAYMENT_METHOD").ok(),
            env::var("DEFAULT_SHIPPING_ADDRESS").ok(),
        )?;

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            jwt_expiration_seconds,
            checkout,
        })
    }
}

impl CheckoutConfig {
    pub fn new(
        currency: &str,
        payment_method: Option<String>,
        shipping_address: Option<String>,
    ) -> anyhow::Result<Self> {
        let default_currency = normalize_currency(currency)
            .ok_or_else(|| anyhow::anyhow!("DEFAULT_CURRENCY must be a 3-letter code, got {currency:?}"))?;
        let defaults = Self::default();
        Ok(Self {
            default_currency,
            default_payment_method: payment_method
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.default_payment_method),
            default_shipping_address: shipping_address
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.default_shipping_address),
        })
    }
}

/// Upper-cases a 3-letter ISO 4217 code, or `None` when it is not one.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_upper_cased() {
        assert_eq!(normalize_currency("usd").as_deref(), Some("USD"));
        assert_eq!(normalize_currency(" eur ").as_deref(), Some("EUR"));
    }

    #[test]
    fn malformed_currency_is_rejected() {
        assert!(normalize_currency("US").is_none());
        assert!(normalize_currency("US1").is_none());
        assert!(normalize_currency("dollar").is_none());
        assert!(CheckoutConfig::new("xx", None, None).is_err());
    }

    #[test]
    fn blank_overrides_fall_back_to_defaults() {
        let config = CheckoutConfig::new("usd", Some("  ".into()), None).unwrap();
        assert_eq!(config, CheckoutConfig::default());
    }
}
