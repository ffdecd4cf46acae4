//! Configuration parsing and validation for the proxy server
//!
//! Every option can come from the command line or the environment; the
//! environment names match what deployments of the original service used.
use anyhow::anyhow;
use clap::Parser;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the proxy server will listen.
    #[arg(short = 'p', long, env = "PORT", default_value_t = 3007)]
    pub port: u16,

    /// The API key clients must present as a bearer token.
    #[arg(long, env = "API_KEY")]
    pub api_key: String,

    /// Comma-separated Z.AI session cookies used for upstream auth.
    #[arg(long, env = "Z_AI_COOKIES", value_delimiter = ',')]
    pub cookies: Vec<String>,

    /// The Z.AI chat completions endpoint.
    #[arg(
        long,
        env = "UPSTREAM_URL",
        default_value = "https://chat.z.ai/api/chat/completions"
    )]
    pub upstream_url: Url,

    /// The model name advertised to clients.
    #[arg(long, env = "MODEL_NAME", default_value = "GLM-4.5")]
    pub model_name: String,

    /// The Z.AI-side model id requests are rewritten to.
    #[arg(long, env = "UPSTREAM_MODEL", default_value = "0727-360B-API")]
    pub upstream_model: String,

    /// Whether thinking content is passed through as <think> tags rather
    /// than stripped.
    #[arg(long, env = "SHOW_THINK_TAGS", default_value_t = true)]
    pub show_think_tags: bool,

    /// Seconds between sweeps that return failed cookies to rotation.
    #[arg(long, default_value_t = 300)]
    pub cookie_recovery_interval_secs: u64,

    /// Maximum number of idle HTTP connections to keep alive for the
    /// upstream host.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    /// Responses can stream for minutes, so keep this generous.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if self.api_key.is_empty() {
            return Err(anyhow!("API key must not be empty (set API_KEY)"));
        }
        if !matches!(self.upstream_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Upstream URL '{}' must be http or https",
                self.upstream_url
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["z2api", "--api-key", "sk-test"])
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.port, 3007);
        assert_eq!(config.model_name, "GLM-4.5");
        assert_eq!(config.upstream_model, "0727-360B-API");
        assert_eq!(
            config.upstream_url.as_str(),
            "https://chat.z.ai/api/chat/completions"
        );
        assert!(config.show_think_tags);
        assert!(config.cookies.is_empty());
    }

    #[test]
    fn test_cookie_list_splits_on_commas() {
        let config =
            Config::try_parse_from(["z2api", "--api-key", "sk-test", "--cookies", "a,b,c"])
                .unwrap();
        assert_eq!(config.cookies, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = Config::try_parse_from(["z2api", "--api-key", ""])
            .unwrap()
            .validate();
        assert!(result.is_err());
    }
}
