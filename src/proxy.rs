//! Process-level proxy suppression.
//!
//! Transient proxy variables left in the environment break the search and
//! model calls. The embedding process clears them once at startup; core
//! constructors never touch process state, and each HTTP client
//! additionally refuses to trust the proxy environment per request.

/// Proxy variables cleared at startup, upper and lower case.
const PROXY_VARS: [&str; 4] = ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// Remove proxy variables from the process environment.
///
/// Call once from the process entry point before the first search run.
pub fn clear_proxy_env() {
    for var in PROXY_VARS {
        std::env::remove_var(var);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_vars_are_removed() {
        std::env::set_var("HTTP_PROXY", "http://127.0.0.1:7890");
        std::env::set_var("https_proxy", "http://127.0.0.1:7890");

        clear_proxy_env();

        for var in PROXY_VARS {
            assert!(std::env::var(var).is_err());
        }
    }
}
