use serde::Serialize;

pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXEC_MAX_BYTES: u64 = 65_536;

const TIMEOUT_RANGE: (u64, u64) = (100, 600_000);
const MAX_BYTES_RANGE: (u64, u64) = (256, 4_194_304);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecLimits {
    pub timeout_ms: u64,
    pub max_output_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitSources {
    pub timeout_ms: &'static str,       // "param" | "env" | "config" | "default"
    pub max_output_bytes: &'static str, // "param" | "env" | "config" | "default"
}

fn parse_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok()
}

pub fn parse_env_bool(name: &str) -> Option<bool> {
    let v = std::env::var(name).ok()?;
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn clamp(v: u64, (min, max): (u64, u64)) -> u64 {
    v.clamp(min, max)
}

fn resolve_one(
    param: Option<u64>,
    env_name: &str,
    configured: Option<u64>,
    default: u64,
    range: (u64, u64),
) -> (u64, &'static str) {
    if let Some(p) = param {
        (clamp(p, range), "param")
    } else if let Some(envv) = parse_env_u64(env_name) {
        (clamp(envv, range), "env")
    } else if let Some(c) = configured {
        (clamp(c, range), "config")
    } else {
        (default, "default")
    }
}

/// Resolve limits for gated shell execution.
/// - timeout_ms: param → env(NEXUS_EXEC_TIMEOUT_MS) → config → default(30000), clamped [100..600000]
/// - max_output_bytes: param → env(NEXUS_EXEC_MAX_BYTES) → config → default(65536), clamped [256..4194304]
pub fn resolve_exec_limits(
    param_timeout_ms: Option<u64>,
    param_max_bytes: Option<u64>,
    configured: (Option<u64>, Option<u64>),
) -> (ExecLimits, LimitSources) {
    let (timeout_ms, timeout_src) = resolve_one(
        param_timeout_ms,
        "NEXUS_EXEC_TIMEOUT_MS",
        configured.0,
        DEFAULT_EXEC_TIMEOUT_MS,
        TIMEOUT_RANGE,
    );
    let (max_output_bytes, bytes_src) = resolve_one(
        param_max_bytes,
        "NEXUS_EXEC_MAX_BYTES",
        configured.1,
        DEFAULT_EXEC_MAX_BYTES,
        MAX_BYTES_RANGE,
    );

    (
        ExecLimits {
            timeout_ms,
            max_output_bytes,
        },
        LimitSources {
            timeout_ms: timeout_src,
            max_output_bytes: bytes_src,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_clamped_and_win() {
        let (limits, sources) = resolve_exec_limits(Some(5), Some(10_000_000), (Some(1_000), None));
        assert_eq!(limits.timeout_ms, 100);
        assert_eq!(limits.max_output_bytes, 4_194_304);
        assert_eq!(sources.timeout_ms, "param");
        assert_eq!(sources.max_output_bytes, "param");
    }

    #[test]
    fn config_sits_between_env_and_default() {
        if std::env::var("NEXUS_EXEC_TIMEOUT_MS").is_ok()
            || std::env::var("NEXUS_EXEC_MAX_BYTES").is_ok()
        {
            return;
        }
        let (limits, sources) = resolve_exec_limits(None, None, (Some(2_000), None));
        assert_eq!(limits.timeout_ms, 2_000);
        assert_eq!(sources.timeout_ms, "config");
        assert_eq!(limits.max_output_bytes, DEFAULT_EXEC_MAX_BYTES);
        assert_eq!(sources.max_output_bytes, "default");
    }

    #[test]
    fn parse_env_bool_accepts_common_spellings() {
        std::env::set_var("NEXUS_TEST_BOOL_FLAG", "Yes");
        assert_eq!(parse_env_bool("NEXUS_TEST_BOOL_FLAG"), Some(true));
        std::env::set_var("NEXUS_TEST_BOOL_FLAG", "off");
        assert_eq!(parse_env_bool("NEXUS_TEST_BOOL_FLAG"), Some(false));
        std::env::set_var("NEXUS_TEST_BOOL_FLAG", "maybe");
        assert_eq!(parse_env_bool("NEXUS_TEST_BOOL_FLAG"), None);
        std::env::remove_var("NEXUS_TEST_BOOL_FLAG");
    }
}
