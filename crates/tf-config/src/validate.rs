use std::collections::HashSet;

use crate::telefuse::TelefuseConfig;

/// Internal validation, called automatically during `TelefuseConfig::from_str` / `load`.
pub(crate) fn validate(config: &TelefuseConfig) -> anyhow::Result<()> {
    // server.listen must start with tcp://
    if !config.server.listen.starts_with("tcp://") {
        anyhow::bail!(
            "server.listen must start with \"tcp://\", got {:?}",
            config.server.listen,
        );
    }

    if config.runtime.ingest_parallelism == 0 {
        anyhow::bail!("runtime.ingest_parallelism must be > 0");
    }
    if config.runtime.channel_capacity == 0 {
        anyhow::bail!("runtime.channel_capacity must be > 0");
    }
    if config.runtime.eval_timeout.is_zero() {
        anyhow::bail!("runtime.eval_timeout must be > 0");
    }
    if config.store.query_timeout.is_zero() {
        anyhow::bail!("store.query_timeout must be > 0");
    }
    if config.store.retention.is_zero() {
        anyhow::bail!("store.retention must be > 0");
    }

    // cache horizons
    if config.cache.horizon.is_zero() {
        anyhow::bail!("cache.horizon must be > 0");
    }
    for (class, horizon) in &config.cache.classes {
        if horizon.is_zero() {
            anyhow::bail!("cache.classes.{class}: horizon must be > 0");
        }
    }
    if config.cache.max_points == Some(0) {
        anyhow::bail!("cache.max_points must be > 0 when set");
    }

    if config.metrics.report_interval.is_zero() {
        anyhow::bail!("metrics.report_interval must be > 0");
    }

    if config.fleet.liveness_threshold.is_zero() {
        anyhow::bail!("fleet.liveness_threshold must be > 0");
    }

    // devices: unique ids, known classes
    let mut device_ids = HashSet::new();
    for d in &config.devices {
        if !device_ids.insert(d.id.as_str()) {
            anyhow::bail!("device {:?} is declared more than once", d.id);
        }
        if let Some(class) = &d.class
            && !config.cache.classes.contains_key(class)
        {
            anyhow::bail!(
                "device {:?}: class {class:?} has no entry in [cache.classes]",
                d.id,
            );
        }
    }

    // synthetic variables must parse now, never at first evaluation
    for (i, s) in config.synthetics.iter().enumerate() {
        if !is_valid_name(&s.name) {
            anyhow::bail!(
                "synthetic[{i}]: invalid variable name {:?}, must match [A-Za-z_][A-Za-z0-9_]*",
                s.name,
            );
        }
        tf_lang::parse_expr(&s.expression)
            .map_err(|e| anyhow::anyhow!("synthetic[{i}] {:?}: {e}", s.name))?;
    }

    // rules
    let mut rule_ids = HashSet::new();
    for r in &config.rules {
        if !rule_ids.insert(r.id.as_str()) {
            anyhow::bail!("rule {:?} is declared more than once", r.id);
        }
        if r.interval.is_zero() {
            anyhow::bail!("rule {:?}: interval must be > 0", r.id);
        }
        if !r.threshold.is_finite() {
            anyhow::bail!("rule {:?}: threshold must be finite", r.id);
        }
        if r.variable.is_empty() {
            anyhow::bail!("rule {:?}: variable must not be empty", r.id);
        }
    }

    for (i, uri) in config.sinks.derived.iter().enumerate() {
        crate::sinks::parse_sink_uri(uri)
            .map_err(|e| anyhow::anyhow!("sinks.derived[{}]: {}", i, e))?;
    }
    for (i, uri) in config.sinks.alerts.iter().enumerate() {
        crate::sinks::parse_sink_uri(uri)
            .map_err(|e| anyhow::anyhow!("sinks.alerts[{}]: {}", i, e))?;
    }

    Ok(())
}

/// A valid variable name starts with ASCII letter or underscore, followed by
/// ASCII alphanumerics or underscores.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.bytes();
    match chars.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    chars.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::TelefuseConfig;

    /// Minimal valid TOML for validation tests.
    const MINIMAL_TOML: &str = r#"
[server]
listen = "tcp://127.0.0.1:9900"

[runtime]
ingest_parallelism = 1
eval_timeout = "5s"

[cache]
horizon = "1h"

[cache.classes]
meter = "24h"

[sinks]
alerts = ["file:///tmp/alerts.jsonl"]

[[device]]
id = "d1"
class = "meter"

[[synthetic]]
name = "ratio"
expression = "a / b"

[[rule]]
id = "r1"
selector = { mode = "group", value = "north" }
variable = "t"
function = "AVG"
operator = ">"
threshold = 1.0
"#;

    fn expect_err(toml: &str, needle: &str) {
        let err = toml.parse::<TelefuseConfig>().unwrap_err();
        assert!(
            err.to_string().contains(needle),
            "expected error mentioning {needle:?}, got: {err}",
        );
    }

    #[test]
    fn minimal_is_valid() {
        assert!(MINIMAL_TOML.parse::<TelefuseConfig>().is_ok());
    }

    #[test]
    fn reject_broken_synthetic_expression() {
        let toml = MINIMAL_TOML.replace("a / b", "a / (b");
        expect_err(&toml, "synthetic[0]");
    }

    #[test]
    fn reject_bad_synthetic_name() {
        let toml = MINIMAL_TOML.replace("name = \"ratio\"", "name = \"1ratio\"");
        expect_err(&toml, "1ratio");
    }

    #[test]
    fn reject_duplicate_rule_id() {
        let toml = format!(
            r#"{MINIMAL_TOML}
[[rule]]
id = "r1"
selector = {{ mode = "tag", value = "a=b" }}
variable = "t"
function = "MAX"
operator = "<"
threshold = 0.0
"#
        );
        expect_err(&toml, "more than once");
    }

    #[test]
    fn reject_duplicate_device_id() {
        let toml = format!("{MINIMAL_TOML}\n[[device]]\nid = \"d1\"\n");
        expect_err(&toml, "\"d1\"");
    }

    #[test]
    fn reject_unknown_device_class() {
        let toml = MINIMAL_TOML.replace("class = \"meter\"", "class = \"pump\"");
        expect_err(&toml, "pump");
    }

    #[test]
    fn reject_zero_horizon() {
        let toml = MINIMAL_TOML.replace("meter = \"24h\"", "meter = \"0s\"");
        expect_err(&toml, "cache.classes.meter");
    }

    #[test]
    fn reject_zero_rule_interval() {
        let toml = MINIMAL_TOML.replace("threshold = 1.0", "threshold = 1.0\ninterval = \"0s\"");
        expect_err(&toml, "interval");
    }

    #[test]
    fn reject_unknown_sink_scheme() {
        let toml = MINIMAL_TOML.replace(
            r#"alerts = ["file:///tmp/alerts.jsonl"]"#,
            r#"alerts = ["http://localhost:9200"]"#,
        );
        expect_err(&toml, "sinks.alerts[0]");
    }
}
