use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Args;

/// Service settings. Every flag can also come from the environment.
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ServerConfig {
    #[arg(long, env = "NESTEGG_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,
    #[arg(long, env = "NESTEGG_PORT", default_value_t = 8080)]
    pub port: u16,
    #[arg(
        long,
        env = "NESTEGG_DEFAULT_ITERATIONS",
        default_value_t = 1_000,
        help = "Monte Carlo iterations when a request does not set them"
    )]
    pub default_iterations: u32,
    #[arg(long, env = "NESTEGG_MAX_ITERATIONS", default_value_t = 10_000)]
    pub max_iterations: u32,
    #[arg(long, env = "NESTEGG_SEED", default_value_t = 42)]
    pub default_seed: u64,
    #[arg(
        long,
        env = "NESTEGG_REQUEST_TIMEOUT_SECS",
        default_value_t = 60,
        help = "Requests running longer than this are cancelled"
    )]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            default_iterations: 1_000,
            max_iterations: 10_000,
            default_seed: 42,
            request_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("--max-iterations must be > 0".to_string());
        }
        if self.default_iterations == 0 || self.default_iterations > self.max_iterations {
            return Err("--default-iterations must be between 1 and --max-iterations".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("--request-timeout-secs must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        config: ServerConfig,
    }

    #[test]
    fn defaults_match_clap_defaults() {
        let parsed = Harness::try_parse_from(["nestegg"]).expect("defaults parse");
        assert_eq!(parsed.config, ServerConfig::default());
        assert!(parsed.config.validate().is_ok());
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = Harness::try_parse_from([
            "nestegg",
            "--bind",
            "127.0.0.1",
            "--port",
            "9000",
            "--max-iterations",
            "500",
            "--default-iterations",
            "250",
        ])
        .expect("flags parse");
        assert_eq!(parsed.config.socket_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(parsed.config.default_iterations, 250);
    }

    #[test]
    fn default_iterations_cannot_exceed_limit() {
        let config = ServerConfig {
            default_iterations: 20_000,
            ..ServerConfig::default()
        };
        let err = config.validate().expect_err("must reject");
        assert!(err.contains("--default-iterations"));
    }
}
