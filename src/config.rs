use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use tracing::warn;

use crate::engine::PackingConfig;
use crate::selector::StrategyKind;
use crate::types::MAX_TIER_SLOTS;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub planner: PlannerConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_lookup(env_string),
            planner: PlannerConfig::from_lookup(env_string),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "COIL_PLANNER_API_HOST";
    const PORT_VAR: &'static str = "COIL_PLANNER_API_PORT";

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host_value = lookup(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = parse_or_default(
            Self::PORT_VAR,
            lookup(Self::PORT_VAR),
            Self::DEFAULT_PORT,
            |value| value != 0,
            "must not be 0",
        );

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Default planning parameters; requests may override them.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    packing: PackingConfig,
    max_request_items: usize,
}

impl PlannerConfig {
    const MAX_WEIGHT_VAR: &'static str = "COIL_PLANNER_MAX_CONTAINER_WEIGHT";
    const MIN_WEIGHT_VAR: &'static str = "COIL_PLANNER_MIN_ACCEPTABLE_WEIGHT";
    const PAIRED_LENGTH_VAR: &'static str = "COIL_PLANNER_MAX_PAIRED_LENGTH";
    const BOTTOM_SLOTS_VAR: &'static str = "COIL_PLANNER_BOTTOM_SLOTS";
    const TOP_SLOTS_VAR: &'static str = "COIL_PLANNER_TOP_SLOTS";
    const TARGET_VAR: &'static str = "COIL_PLANNER_TARGET_CONTAINERS";
    const HEIGHT_SCORE_VAR: &'static str = "COIL_PLANNER_HEIGHT_SCORE_WEIGHT";
    const WEIGHT_SCORE_VAR: &'static str = "COIL_PLANNER_WEIGHT_SCORE_WEIGHT";
    const STRATEGY_VAR: &'static str = "COIL_PLANNER_STRATEGY";
    const NODE_LIMIT_VAR: &'static str = "COIL_PLANNER_SEARCH_NODE_LIMIT";
    const EXHAUSTIVE_LIMIT_VAR: &'static str = "COIL_PLANNER_EXHAUSTIVE_LIMIT";
    const PARALLEL_VAR: &'static str = "COIL_PLANNER_PARALLEL";
    const PROGRESS_INTERVAL_VAR: &'static str = "COIL_PLANNER_PROGRESS_INTERVAL";
    const MAX_REQUEST_ITEMS_VAR: &'static str = "COIL_PLANNER_MAX_REQUEST_ITEMS";

    /// Default ceiling for the number of coils one request may expand into.
    pub const DEFAULT_MAX_REQUEST_ITEMS: usize = 10_000;

    #[allow(dead_code)]
    pub fn new(packing: PackingConfig) -> Self {
        Self {
            packing,
            max_request_items: Self::DEFAULT_MAX_REQUEST_ITEMS,
        }
    }

    #[allow(dead_code)]
    pub fn with_max_request_items(mut self, max_request_items: usize) -> Self {
        self.max_request_items = max_request_items;
        self
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_container_weight = load_f64_with_warning(
            Self::MAX_WEIGHT_VAR,
            lookup(Self::MAX_WEIGHT_VAR),
            PackingConfig::DEFAULT_MAX_CONTAINER_WEIGHT,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted container limit differs from the standard 25 t load",
        );

        let min_acceptable_weight = load_f64_with_warning(
            Self::MIN_WEIGHT_VAR,
            lookup(Self::MIN_WEIGHT_VAR),
            PackingConfig::DEFAULT_MIN_ACCEPTABLE_WEIGHT,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted minimum tonnage changes which containers are shipped",
        );

        let max_paired_length = load_f64_with_warning(
            Self::PAIRED_LENGTH_VAR,
            lookup(Self::PAIRED_LENGTH_VAR),
            PackingConfig::DEFAULT_MAX_PAIRED_LENGTH,
            |value| value > 0.0,
            "must be greater than 0",
            "Adjusted stack height may not fit the container door",
        );

        let max_bottom_slots = parse_or_default(
            Self::BOTTOM_SLOTS_VAR,
            lookup(Self::BOTTOM_SLOTS_VAR),
            PackingConfig::DEFAULT_MAX_BOTTOM_SLOTS,
            |value| (1..=MAX_TIER_SLOTS).contains(&value),
            "must be between 1 and 64",
        );

        let max_top_slots = parse_or_default(
            Self::TOP_SLOTS_VAR,
            lookup(Self::TOP_SLOTS_VAR),
            PackingConfig::DEFAULT_MAX_TOP_SLOTS,
            |value| (1..=MAX_TIER_SLOTS).contains(&value),
            "must be between 1 and 64",
        );

        let target_container_count = parse_or_default(
            Self::TARGET_VAR,
            lookup(Self::TARGET_VAR),
            0usize,
            |_| true,
            "",
        );

        let height_score_weight = load_f64_with_warning(
            Self::HEIGHT_SCORE_VAR,
            lookup(Self::HEIGHT_SCORE_VAR),
            PackingConfig::DEFAULT_HEIGHT_SCORE_WEIGHT,
            |value| value >= 0.0,
            "must not be negative",
            "Adjusted score weights change which containers are preferred",
        );

        let weight_score_weight = load_f64_with_warning(
            Self::WEIGHT_SCORE_VAR,
            lookup(Self::WEIGHT_SCORE_VAR),
            PackingConfig::DEFAULT_WEIGHT_SCORE_WEIGHT,
            |value| value >= 0.0,
            "must not be negative",
            "Adjusted score weights change which containers are preferred",
        );

        let strategy = lookup(Self::STRATEGY_VAR)
            .and_then(|raw| match raw.parse::<StrategyKind>() {
                Ok(strategy) => Some(strategy),
                Err(err) => {
                    warn!("{}: {}. Using default value.", Self::STRATEGY_VAR, err);
                    None
                }
            })
            .unwrap_or_default();

        let search_node_limit = parse_or_default(
            Self::NODE_LIMIT_VAR,
            lookup(Self::NODE_LIMIT_VAR),
            PackingConfig::DEFAULT_SEARCH_NODE_LIMIT,
            |value| value >= 1,
            "must be at least 1",
        );

        let exhaustive_limit = parse_or_default(
            Self::EXHAUSTIVE_LIMIT_VAR,
            lookup(Self::EXHAUSTIVE_LIMIT_VAR),
            PackingConfig::DEFAULT_EXHAUSTIVE_LIMIT,
            |_| true,
            "",
        );

        let parallel = lookup(Self::PARALLEL_VAR)
            .and_then(|raw| parse_bool(&raw, Self::PARALLEL_VAR))
            .unwrap_or(false);

        let progress_interval = parse_or_default(
            Self::PROGRESS_INTERVAL_VAR,
            lookup(Self::PROGRESS_INTERVAL_VAR),
            PackingConfig::DEFAULT_PROGRESS_INTERVAL,
            |value| value >= 1,
            "must be at least 1",
        );

        let max_request_items = parse_or_default(
            Self::MAX_REQUEST_ITEMS_VAR,
            lookup(Self::MAX_REQUEST_ITEMS_VAR),
            Self::DEFAULT_MAX_REQUEST_ITEMS,
            |value| value >= 1,
            "must be at least 1",
        );

        let packing = PackingConfig::builder()
            .max_container_weight(max_container_weight)
            .min_acceptable_weight(min_acceptable_weight)
            .max_paired_length(max_paired_length)
            .max_bottom_slots(max_bottom_slots)
            .max_top_slots(max_top_slots)
            .target_container_count(target_container_count)
            .height_score_weight(height_score_weight)
            .weight_score_weight(weight_score_weight)
            .strategy(strategy)
            .search_node_limit(search_node_limit)
            .exhaustive_limit(exhaustive_limit)
            .parallel(parallel)
            .progress_interval(progress_interval)
            .build();

        let packing = match packing.validate() {
            Ok(()) => packing,
            Err(err) => {
                warn!("{}. Using default planner settings.", err);
                PackingConfig::default()
            }
        };

        Self {
            packing,
            max_request_items,
        }
    }

    /// Returns the configured PackingConfig.
    pub fn packing_config(&self) -> PackingConfig {
        self.packing
    }

    /// Most coils a single request may expand into.
    pub fn max_request_items(&self) -> usize {
        self.max_request_items
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

/// Parses `raw`, falling back to `default` when it is absent or invalid.
fn parse_or_default<T>(
    var_name: &str,
    raw: Option<String>,
    default: T,
    validator: impl Fn(T) -> bool,
    invalid_hint: &str,
) -> T
where
    T: FromStr + Copy + Display,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if validator(value) => value,
        Ok(_) => {
            warn!(
                "{} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Err(err) => {
            warn!(
                "Could not parse {} ('{}'): {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    raw: Option<String>,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    let value = parse_or_default(
        var_name,
        raw,
        default,
        |value: f64| value.is_finite() && validator(value),
        invalid_hint,
    );
    let tolerance = (default.abs().max(1.0)) * 1e-9;
    if (value - default).abs() > tolerance {
        warn!("{} ({} = {}).", warning, var_name, value);
    }
    value
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_bool_true_values() {
        assert_eq!(parse_bool("1", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("true", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("yes", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("y", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("on", "TEST_VAR"), Some(true));

        // Test case insensitivity
        assert_eq!(parse_bool("TRUE", "TEST_VAR"), Some(true));
        assert_eq!(parse_bool("Yes", "TEST_VAR"), Some(true));

        // Test with whitespace
        assert_eq!(parse_bool(" true ", "TEST_VAR"), Some(true));
    }

    #[test]
    fn test_parse_bool_false_values() {
        assert_eq!(parse_bool("0", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("false", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("no", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("n", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("off", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("OFF", "TEST_VAR"), Some(false));
        assert_eq!(parse_bool("  0  ", "TEST_VAR"), Some(false));
    }

    #[test]
    fn test_parse_bool_invalid_values() {
        assert_eq!(parse_bool("invalid", "TEST_VAR"), None);
        assert_eq!(parse_bool("2", "TEST_VAR"), None);
        assert_eq!(parse_bool("", "TEST_VAR"), None);
    }

    #[test]
    fn parse_or_default_falls_back() {
        assert_eq!(parse_or_default("V", None, 7u64, |_| true, ""), 7);
        assert_eq!(parse_or_default("V", Some("12".into()), 7u64, |_| true, ""), 12);
        assert_eq!(parse_or_default("V", Some("abc".into()), 7u64, |_| true, ""), 7);
        assert_eq!(
            parse_or_default("V", Some("0".into()), 7u64, |v| v >= 1, "must be at least 1"),
            7
        );
        assert_eq!(
            load_f64_with_warning("V", Some("NaN".into()), 1.0, |_| true, "", ""),
            1.0
        );
    }

    #[test]
    fn planner_defaults_without_variables() {
        let planner = PlannerConfig::from_lookup(lookup_from(&[]));
        assert_eq!(planner.packing_config(), PackingConfig::default());
        assert_eq!(
            planner.max_request_items(),
            PlannerConfig::DEFAULT_MAX_REQUEST_ITEMS
        );
    }

    #[test]
    fn planner_reads_variables() {
        let planner = PlannerConfig::from_lookup(lookup_from(&[
            ("COIL_PLANNER_MAX_CONTAINER_WEIGHT", "24000"),
            ("COIL_PLANNER_MIN_ACCEPTABLE_WEIGHT", "18000"),
            ("COIL_PLANNER_TOP_SLOTS", "9"),
            ("COIL_PLANNER_TARGET_CONTAINERS", "3"),
            ("COIL_PLANNER_STRATEGY", "exhaustive"),
            ("COIL_PLANNER_PARALLEL", "yes"),
            ("COIL_PLANNER_MAX_REQUEST_ITEMS", "500"),
        ]));
        let packing = planner.packing_config();
        assert_eq!(packing.max_container_weight, 24_000.0);
        assert_eq!(packing.min_acceptable_weight, 18_000.0);
        assert_eq!(packing.max_top_slots, 9);
        assert_eq!(packing.target_container_count, Some(3));
        assert_eq!(packing.strategy, StrategyKind::Exhaustive);
        assert!(packing.parallel);
        assert_eq!(planner.max_request_items(), 500);
    }

    #[test]
    fn oversized_slot_counts_fall_back_to_defaults() {
        let planner = PlannerConfig::from_lookup(lookup_from(&[
            ("COIL_PLANNER_BOTTOM_SLOTS", "65"),
            ("COIL_PLANNER_TOP_SLOTS", "10000000000000"),
            ("COIL_PLANNER_MAX_REQUEST_ITEMS", "0"),
        ]));
        let packing = planner.packing_config();
        assert_eq!(packing.max_bottom_slots, PackingConfig::DEFAULT_MAX_BOTTOM_SLOTS);
        assert_eq!(packing.max_top_slots, PackingConfig::DEFAULT_MAX_TOP_SLOTS);
        assert_eq!(
            planner.max_request_items(),
            PlannerConfig::DEFAULT_MAX_REQUEST_ITEMS
        );
    }

    #[test]
    fn inconsistent_planner_settings_fall_back_to_defaults() {
        let planner = PlannerConfig::from_lookup(lookup_from(&[
            ("COIL_PLANNER_MAX_CONTAINER_WEIGHT", "10000"),
            ("COIL_PLANNER_MIN_ACCEPTABLE_WEIGHT", "15000"),
        ]));
        assert_eq!(planner.packing_config(), PackingConfig::default());
    }

    #[test]
    fn api_config_validates_host_and_port() {
        let api = ApiConfig::from_lookup(lookup_from(&[
            ("COIL_PLANNER_API_HOST", "not-an-ip"),
            ("COIL_PLANNER_API_PORT", "0"),
        ]));
        assert!(api.binds_to_all_interfaces());
        assert_eq!(api.display_host(), "0.0.0.0");
        assert_eq!(api.port(), 8080);

        let api = ApiConfig::from_lookup(lookup_from(&[
            ("COIL_PLANNER_API_HOST", "127.0.0.1"),
            ("COIL_PLANNER_API_PORT", "9000"),
        ]));
        assert!(!api.binds_to_all_interfaces());
        assert_eq!(api.socket_addr().to_string(), "127.0.0.1:9000");
    }
}
