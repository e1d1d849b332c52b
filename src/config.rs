// src/config.rs
use std::env;
use std::net::IpAddr;

use crate::errors::{AppError, Result};

const DEFAULT_BASE_URL: &str = "https://api.pesaflux.co.ke";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pesaflux_api_key: String,
    /// Email registered with the PesaFlux account; sent with status queries.
    pub pesaflux_email: String,
    pub pesaflux_base_url: String,
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            pesaflux_api_key: require("PESAFLUX_API_KEY")?,
            pesaflux_email: require("PESAFLUX_EMAIL")?,
            pesaflux_base_url: env::var("PESAFLUX_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            database_url: require("DATABASE_URL")?,
            host: parse_host(&env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()))?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| AppError::configuration("PORT must be a number"))?,
        })
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/api/v1/payments/stk-push", self.pesaflux_base_url)
    }

    pub fn transaction_status_url(&self) -> String {
        format!("{}/api/v1/payments/transaction-status", self.pesaflux_base_url)
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| AppError::configuration(format!("{} must be set", key)))
}

fn parse_host(host: &str) -> Result<IpAddr> {
    host.parse()
        .map_err(|_| AppError::configuration("HOST must be a valid IP address"))
}
