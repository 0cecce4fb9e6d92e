use crate::error::{MarketError, Result};
use log::*;
use std::fmt::{self, Debug, Display};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;

pub const ENV_SHORTCODE: &str = "MPESA_SHORTCODE";
pub const ENV_PASSKEY: &str = "MPESA_PASSKEY";
pub const ENV_CONSUMER_KEY: &str = "MPESA_CONSUMER_KEY";
pub const ENV_CONSUMER_SECRET: &str = "MPESA_CONSUMER_SECRET";
pub const ENV_PORT: &str = "PORT";

/// A value that never shows up in logs or debug output.
#[derive(Clone, Default, PartialEq)]
pub struct Secret<T>
where
    T: Clone + Default,
{
    value: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn reveal(&self) -> &T {
        &self.value
    }
}

impl<T: Clone + Default> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T: Clone + Default> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Settings read from the environment. These five variables are the only ones consulted.
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    pub shortcode: Option<String>,
    pub passkey: Option<Secret<String>>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<Secret<String>>,
    pub port: u16,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let port = non_empty(ENV_PORT)
            .map(|s| {
                s.trim().parse::<u16>().unwrap_or_else(|e| {
                    error!("{s} is not a valid port for {ENV_PORT}. {e} Using the default, {DEFAULT_PORT}, instead.");
                    DEFAULT_PORT
                })
            })
            .unwrap_or(DEFAULT_PORT);
        Self {
            shortcode: non_empty(ENV_SHORTCODE),
            passkey: non_empty(ENV_PASSKEY).map(Secret::new),
            consumer_key: non_empty(ENV_CONSUMER_KEY),
            consumer_secret: non_empty(ENV_CONSUMER_SECRET).map(Secret::new),
            port,
        }
    }

    /// Builds the provider settings, naming the first missing variable if any.
    pub fn mpesa(&self, base_url: &str, callback_url: &str, request_timeout: Duration) -> Result<MpesaConfig> {
        fn required<T: Clone>(value: &Option<T>, name: &str) -> Result<T> {
            value.clone().ok_or_else(|| {
                MarketError::ValidationError(format!(
                    "{name} is not set; it is required for the mpesa gateway"
                ))
            })
        }
        Ok(MpesaConfig {
            shortcode: required(&self.shortcode, ENV_SHORTCODE)?,
            passkey: required(&self.passkey, ENV_PASSKEY)?,
            consumer_key: required(&self.consumer_key, ENV_CONSUMER_KEY)?,
            consumer_secret: required(&self.consumer_secret, ENV_CONSUMER_SECRET)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            callback_url: callback_url.to_string(),
            request_timeout,
        })
    }
}

#[derive(Clone, Debug)]
pub struct MpesaConfig {
    pub shortcode: String,
    pub passkey: Secret<String>,
    pub consumer_key: String,
    pub consumer_secret: Secret<String>,
    /// e.g. `https://sandbox.safaricom.co.ke`
    pub base_url: String,
    pub callback_url: String,
    pub request_timeout: Duration,
}
