//! Environment variable overrides applied on top of the loaded config file.

use std::time::Duration;

use tracing::warn;

use crate::schema::CourierConfig;

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut CourierConfig) {
    apply_overrides_with(config, |name| std::env::var(name).ok())
}

/// Apply overrides, resolving variable names through `lookup`.
///
/// Empty values are ignored. Values that fail to parse are logged and skipped.
pub fn apply_overrides_with(config: &mut CourierConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(bind) = get("BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = get("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => config.server.port = p,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(origins) = get("CORS_ALLOWED_ORIGINS") {
        config.server.cors_allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(token) = get("COURIER_TOKEN") {
        config.server.token = Some(token);
    }
    if let Some(env) = get("APP_ENV") {
        config.logging.app_env = env;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(path) = get("WHATSAPP_STORE_PATH") {
        config.whatsapp.store_path = Some(path.into());
    }
    if let Some(raw) = get("WHATSAPP_SESSION_TIMEOUT") {
        match parse_duration(&raw) {
            Some(d) => config.whatsapp.pairing_timeout_secs = d.as_secs().max(1),
            None => warn!(value = %raw, "ignoring invalid WHATSAPP_SESSION_TIMEOUT"),
        }
    }
    if let Some(raw) = get("WHATSAPP_RECONNECT_DELAY") {
        match parse_duration(&raw) {
            Some(d) => config.whatsapp.reconnect.delay_secs = d.as_secs(),
            None => warn!(value = %raw, "ignoring invalid WHATSAPP_RECONNECT_DELAY"),
        }
    }
}

/// Parse a compact duration such as `5m`, `30s`, `1h30m` or `250ms`.
///
/// A bare integer is read as seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_go_durations() {
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("42"), Some(Duration::from_secs(42)));
    }

    #[test]
    fn rejects_garbage_durations() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("m5"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("5m3"), None);
    }

    #[test]
    fn applies_deployment_variables() {
        let vars = env(&[
            ("PORT", "8081"),
            ("APP_ENV", "production"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("WHATSAPP_SESSION_TIMEOUT", "2m"),
            ("WHATSAPP_RECONNECT_DELAY", "10s"),
            ("COURIER_TOKEN", "s3cret"),
        ]);
        let mut config = CourierConfig::default();
        apply_overrides_with(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config.server.port, 8081);
        assert!(config.logging.wants_json());
        assert_eq!(config.server.cors_allowed_origins, vec![
            "https://a.example".to_string(),
            "https://b.example".to_string()
        ]);
        assert_eq!(config.whatsapp.pairing_timeout_secs, 120);
        assert_eq!(config.whatsapp.reconnect.delay_secs, 10);
        assert_eq!(config.server.token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let vars = env(&[("PORT", "not-a-port"), ("WHATSAPP_SESSION_TIMEOUT", "soon")]);
        let mut config = CourierConfig::default();
        apply_overrides_with(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config, CourierConfig::default());
    }

    #[test]
    fn empty_values_are_ignored() {
        let vars = env(&[("BIND", "  "), ("LOG_LEVEL", "")]);
        let mut config = CourierConfig::default();
        apply_overrides_with(&mut config, |k| vars.get(k).cloned());

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
    }
}
