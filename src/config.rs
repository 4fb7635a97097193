//! Environment-driven startup configuration (SPEC_FULL §3). No config file,
//! no CLI flags — the source reads `os.Getenv` directly and this mirrors that.

use std::env;

const DEFAULT_LISTEN: &str = "0.0.0.0:50051";
const DEFAULT_BUCKET: &str = "uptimeai-test-bucket";

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: String,
    pub kubeconfig: Option<String>,
    pub bucket_name: String,
    pub debug: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            listen_addr: env::var("LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string()),
            kubeconfig: env::var("KUBECONFIG").ok().filter(|s| !s.is_empty()),
            bucket_name: env::var("BUCKET_NAME").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            debug: env::var("TF_EXECUTOR_DEBUG").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_absent() {
        // SAFETY: test runs single-threaded w.r.t. these vars via serial env access.
        unsafe {
            env::remove_var("LISTEN");
            env::remove_var("BUCKET_NAME");
            env::remove_var("TF_EXECUTOR_DEBUG");
        }
        let settings = Settings::from_env();
        assert_eq!(settings.listen_addr, DEFAULT_LISTEN);
        assert_eq!(settings.bucket_name, DEFAULT_BUCKET);
        assert!(!settings.debug);
    }
}
