/// Domain-tagged logging macros.
///
/// Every macro adds a `domain` field, which the plain formatter renders as a
/// `[domain]` prefix. Domains: `sys` (lifecycle), `conn` (receiver sockets),
/// `pipe` (ingest and rule cycles), `res` (cache and metrics), `conf`
/// (configuration and sink setup).
///
/// ```ignore
/// tf_info!(sys, rules = 2, synthetics = 3, "engine bootstrap complete");
/// tf_warn!(pipe, device = %id, error = %e, "point evaluation timed out");
/// tf_debug!(conn, peer = %peer, "accepted connection");
/// ```
///
/// The domain is a bare identifier, not a string.

/// Internal helper; use `tf_error!` .. `tf_trace!`.
#[doc(hidden)]
macro_rules! tf_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

/// ```ignore
/// tf_error!(res, error = %e, "alert sink write failed");
/// ```
#[allow(unused_macros)]
macro_rules! tf_error {
    ($domain:ident, $($rest:tt)*) => {
        tf_log!(error, $domain, $($rest)*)
    };
}

/// ```ignore
/// tf_warn!(pipe, rule = %id, stage = %stage, "rule cycle failed");
/// ```
macro_rules! tf_warn {
    ($domain:ident, $($rest:tt)*) => {
        tf_log!(warn, $domain, $($rest)*)
    };
}

/// ```ignore
/// tf_info!(sys, listen = %addr, "engine started");
/// ```
macro_rules! tf_info {
    ($domain:ident, $($rest:tt)*) => {
        tf_log!(info, $domain, $($rest)*)
    };
}

/// ```ignore
/// tf_debug!(conn, peer = %peer, "connection closed");
/// ```
macro_rules! tf_debug {
    ($domain:ident, $($rest:tt)*) => {
        tf_log!(debug, $domain, $($rest)*)
    };
}

/// ```ignore
/// tf_trace!(pipe, device = %id, ts_ms, "point decoded");
/// ```
#[allow(unused_macros)]
macro_rules! tf_trace {
    ($domain:ident, $($rest:tt)*) => {
        tf_log!(trace, $domain, $($rest)*)
    };
}
