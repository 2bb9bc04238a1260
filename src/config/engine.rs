//! Engine configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::planner::PlannerLimits;
use crate::hub::ws::SocketSettings;
use crate::runtime::supervisor::LoopPolicy;

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "SEAT_DISPATCH_";

/// Tunables of the engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the HTTP and socket server binds to.
    pub listen_addr: SocketAddr,
    /// Name of the queue the switch consumes dial requests from.
    pub push_queue: String,
    /// Name of the queue the switch reports completed legs on.
    pub cdr_queue: String,
    /// Maximum messages allowed in the push queue.
    pub max_queue_len: usize,
    /// Maximum orders in processing across all projects.
    pub max_robot_concurrency: usize,
    /// Pause after a tick that admitted nothing, milliseconds.
    pub tick_idle_ms: u64,
    /// Pause after a failed loop pass, seconds.
    pub error_backoff_secs: u64,
    /// Longest wait for one completion event, milliseconds.
    pub cdr_wait_ms: u64,
    /// How long a reserved completion event stays invisible before redelivery, seconds.
    pub cdr_visibility_secs: u64,
    /// Interval of the sweepers, seconds.
    pub sweep_interval_secs: u64,
    /// Age after which a processing order is finished by the reaper, seconds.
    pub stale_order_after_secs: u64,
    /// Time a seat without connections keeps its check-in, seconds.
    pub reconnect_grace_secs: u64,
    /// Lifetime of the call→seat mapping, seconds.
    pub call_seat_ttl_secs: u64,
    /// Outbound frames buffered per client connection.
    pub connection_buffer: usize,
    /// Interval between socket pings, seconds.
    pub heartbeat_secs: u64,
    /// Deadline of a single socket write, seconds.
    pub write_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            push_queue: "switch:push".into(),
            cdr_queue: "switch:cdr".into(),
            max_queue_len: 200,
            max_robot_concurrency: 100,
            tick_idle_ms: 1_000,
            error_backoff_secs: 5,
            cdr_wait_ms: 1_000,
            cdr_visibility_secs: 60,
            sweep_interval_secs: 60,
            stale_order_after_secs: 3_600,
            reconnect_grace_secs: 60,
            call_seat_ttl_secs: 86_400,
            connection_buffer: 64,
            heartbeat_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.push_queue.is_empty() || self.cdr_queue.is_empty() {
            return Err("queue names must not be empty".into());
        }
        if self.push_queue == self.cdr_queue {
            return Err("push_queue and cdr_queue must differ".into());
        }
        let positive = [
            ("max_queue_len", self.max_queue_len as u64),
            ("max_robot_concurrency", self.max_robot_concurrency as u64),
            ("tick_idle_ms", self.tick_idle_ms),
            ("error_backoff_secs", self.error_backoff_secs),
            ("cdr_wait_ms", self.cdr_wait_ms),
            ("cdr_visibility_secs", self.cdr_visibility_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("stale_order_after_secs", self.stale_order_after_secs),
            ("call_seat_ttl_secs", self.call_seat_ttl_secs),
            ("connection_buffer", self.connection_buffer as u64),
            ("heartbeat_secs", self.heartbeat_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(format!("{name} must be greater than 0"));
        }
        if self.cdr_visibility_secs.saturating_mul(1_000) <= self.cdr_wait_ms {
            return Err("cdr_visibility_secs must exceed cdr_wait_ms".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `SEAT_DISPATCH_*` environment variables, after loading a
    /// `.env` file if one exists.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each prefixed field name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |field: &str| lookup(&format!("{ENV_PREFIX}{}", field.to_ascii_uppercase()));
        set_parsed(&get, "listen_addr", &mut cfg.listen_addr)?;
        if let Some(v) = get("push_queue") {
            cfg.push_queue = v;
        }
        if let Some(v) = get("cdr_queue") {
            cfg.cdr_queue = v;
        }
        set_parsed(&get, "max_queue_len", &mut cfg.max_queue_len)?;
        set_parsed(&get, "max_robot_concurrency", &mut cfg.max_robot_concurrency)?;
        set_parsed(&get, "tick_idle_ms", &mut cfg.tick_idle_ms)?;
        set_parsed(&get, "error_backoff_secs", &mut cfg.error_backoff_secs)?;
        set_parsed(&get, "cdr_wait_ms", &mut cfg.cdr_wait_ms)?;
        set_parsed(&get, "cdr_visibility_secs", &mut cfg.cdr_visibility_secs)?;
        set_parsed(&get, "sweep_interval_secs", &mut cfg.sweep_interval_secs)?;
        set_parsed(&get, "stale_order_after_secs", &mut cfg.stale_order_after_secs)?;
        set_parsed(&get, "reconnect_grace_secs", &mut cfg.reconnect_grace_secs)?;
        set_parsed(&get, "call_seat_ttl_secs", &mut cfg.call_seat_ttl_secs)?;
        set_parsed(&get, "connection_buffer", &mut cfg.connection_buffer)?;
        set_parsed(&get, "heartbeat_secs", &mut cfg.heartbeat_secs)?;
        set_parsed(&get, "write_timeout_secs", &mut cfg.write_timeout_secs)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Global admission limits.
    pub const fn planner_limits(&self) -> PlannerLimits {
        PlannerLimits {
            max_queue_len: self.max_queue_len,
            max_robot_concurrency: self.max_robot_concurrency,
        }
    }

    /// Pauses of the push tick.
    pub const fn tick_policy(&self) -> LoopPolicy {
        LoopPolicy {
            idle: Duration::from_millis(self.tick_idle_ms),
            backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Pauses of the completion-event loop. Reserving already waits, so idle passes do not
    /// sleep again.
    pub const fn cdr_policy(&self) -> LoopPolicy {
        LoopPolicy {
            idle: Duration::ZERO,
            backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Pauses of the sweepers.
    pub const fn sweep_policy(&self) -> LoopPolicy {
        LoopPolicy {
            idle: Duration::from_secs(self.sweep_interval_secs),
            backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }

    /// Socket heartbeat and write deadline.
    pub const fn socket_settings(&self) -> SocketSettings {
        SocketSettings {
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

fn set_parsed<T, G>(get: &G, field: &str, slot: &mut T) -> Result<(), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(field) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{ENV_PREFIX}{}: {e}", field.to_ascii_uppercase()))?;
    }
    Ok(())
}
