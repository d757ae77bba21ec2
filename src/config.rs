use std::str::FromStr;
use std::time::Duration;

use crate::model::Ms;

const MIN_MS: Ms = 60_000;

/// Service configuration, sourced from environment variables in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minutes after a reservation's start during which check-in is still
    /// accepted; past it the sweeper reclaims the booking.
    pub auto_cancel_grace_min: i64,
    /// Minutes before a reservation's start from which check-in is accepted.
    pub check_in_lead_min: i64,
    /// Minutes added to the end time by a default extension.
    pub default_extension_min: i64,
    pub sweep_interval_secs: u64,
    pub dispatch_interval_secs: u64,
    pub dispatch_batch_size: usize,
    pub max_delivery_attempts: u32,
    pub lock_ttl_secs: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_cancel_grace_min: 15,
            check_in_lead_min: 10,
            default_extension_min: 30,
            sweep_interval_secs: 60,
            dispatch_interval_secs: 5,
            dispatch_batch_size: 50,
            max_delivery_attempts: 5,
            lock_ttl_secs: 30,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        Self {
            auto_cancel_grace_min: env_or("RESERVA_AUTO_CANCEL_GRACE_MIN", d.auto_cancel_grace_min),
            check_in_lead_min: env_or("RESERVA_CHECK_IN_LEAD_MIN", d.check_in_lead_min),
            default_extension_min: env_or("RESERVA_DEFAULT_EXTENSION_MIN", d.default_extension_min),
            sweep_interval_secs: env_or("RESERVA_SWEEP_INTERVAL_SECS", d.sweep_interval_secs),
            dispatch_interval_secs: env_or("RESERVA_DISPATCH_INTERVAL_SECS", d.dispatch_interval_secs),
            dispatch_batch_size: env_or("RESERVA_DISPATCH_BATCH_SIZE", d.dispatch_batch_size),
            max_delivery_attempts: env_or("RESERVA_MAX_DELIVERY_ATTEMPTS", d.max_delivery_attempts),
            lock_ttl_secs: env_or("RESERVA_LOCK_TTL_SECS", d.lock_ttl_secs),
            metrics_port: std::env::var("RESERVA_METRICS_PORT").ok().and_then(|s| s.parse().ok()),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            check_in_lead: self.check_in_lead_min * MIN_MS,
            auto_cancel_grace: self.auto_cancel_grace_min * MIN_MS,
            default_extension: self.default_extension_min * MIN_MS,
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            lock_ttl: self.lock_ttl_secs as Ms * 1_000,
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            interval: Duration::from_secs(self.dispatch_interval_secs),
            batch_size: self.dispatch_batch_size,
            max_attempts: self.max_delivery_attempts,
            lock_ttl: self.lock_ttl_secs as Ms * 1_000,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Time windows the engine applies, in unix-ms.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub check_in_lead: Ms,
    pub auto_cancel_grace: Ms,
    pub default_extension: Ms,
}

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub lock_ttl: Ms,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub lock_ttl: Ms,
}
