use std::time::Duration;

use anyhow::bail;
use clap::{ArgAction, Parser, ValueEnum};
use lockbot_core::{LockSettings, RetryPolicy, Settings, TokenSettings};

/// Where locks and installations are kept.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    /// Process memory; everything is lost on restart.
    Memory,
    Dynamodb,
}

/// Configuration for the lockbot server.
#[derive(Parser, Debug, Clone)]
#[command(name = "lockbot")]
#[command(about = "Channel-scoped resource locks for Slack teams")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "LOCKBOT_HOST")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value = "3000", env = "LOCKBOT_PORT")]
    pub port: u16,

    /// Store backend
    #[arg(long, value_enum, default_value = "dynamodb", env = "STORE_BACKEND")]
    pub store_backend: StoreBackendKind,

    /// DynamoDB table holding lock records
    #[arg(long, default_value = "lockbot-locks", env = "LOCKS_TABLE_NAME")]
    pub locks_table_name: String,

    /// DynamoDB table holding team installations
    #[arg(long, default_value = "lockbot-installations", env = "INSTALLATIONS_TABLE_NAME")]
    pub installations_table_name: String,

    /// AWS region (defaults to the SDK's region resolution)
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// DynamoDB endpoint override, e.g. http://localhost:8000 for DynamoDB Local
    #[arg(long, env = "DYNAMODB_ENDPOINT_URL")]
    pub dynamodb_endpoint_url: Option<String>,

    /// Secret used to sign install state tokens
    #[arg(long, env = "STATE_SECRET", hide_env_values = true)]
    pub state_secret: String,

    /// Slack signing secret; request signatures are not checked when unset
    #[arg(long, env = "SLACK_SIGNING_SECRET", hide_env_values = true)]
    pub slack_signing_secret: Option<String>,

    /// Slack app client ID
    #[arg(long, env = "SLACK_CLIENT_ID")]
    pub slack_client_id: Option<String>,

    /// Slack app client secret
    #[arg(long, env = "SLACK_CLIENT_SECRET", hide_env_values = true)]
    pub slack_client_secret: Option<String>,

    /// Comma-separated OAuth scopes requested on install
    #[arg(long, default_value = "commands,chat:write", env = "SLACK_SCOPES")]
    pub slack_scopes: String,

    /// Public base URL of this server, used to build the OAuth redirect URI
    #[arg(long, default_value = "http://localhost:3000", env = "PUBLIC_URL")]
    pub public_url: String,

    /// Slack Web API base URL
    #[arg(long, default_value = "https://slack.com/api", env = "SLACK_API_URL")]
    pub slack_api_url: String,

    /// Slack OAuth authorize page
    #[arg(
        long,
        default_value = "https://slack.com/oauth/v2/authorize",
        env = "SLACK_AUTHORIZE_URL"
    )]
    pub slack_authorize_url: String,

    /// Lifetime of install state tokens in seconds
    #[arg(long, default_value = "300", env = "STATE_TOKEN_TTL_SECS")]
    pub state_token_ttl_secs: u64,

    /// Largest accepted lock TTL in seconds
    #[arg(long, default_value = "2592000", env = "MAX_LOCK_TTL_SECS")]
    pub max_lock_ttl_secs: u64,

    /// Attempts per store call when the store is throttling
    #[arg(long, default_value = "3", env = "STORE_MAX_ATTEMPTS")]
    pub store_max_attempts: u32,

    /// Interval of the expired-lock purge task in seconds (0 disables it)
    #[arg(long, default_value = "0", env = "PURGE_INTERVAL_SECS")]
    pub purge_interval_secs: u64,

    /// Honor `/unlock <name> force` from chat
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "ALLOW_CHAT_FORCE")]
    pub allow_chat_force: bool,
}

impl Config {
    /// Core settings derived from the flags.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        if self.state_secret.trim().is_empty() {
            bail!("STATE_SECRET must not be empty");
        }
        if self.state_token_ttl_secs == 0 {
            bail!("STATE_TOKEN_TTL_SECS must be positive");
        }

        let mut tokens = TokenSettings::new(self.state_secret.as_bytes());
        tokens.state_token_ttl = Duration::from_secs(self.state_token_ttl_secs);

        Ok(Settings {
            retry: RetryPolicy {
                max_attempts: self.store_max_attempts.max(1),
                ..RetryPolicy::default()
            },
            locks: LockSettings {
                max_ttl: Duration::from_secs(self.max_lock_ttl_secs),
            },
            tokens,
        })
    }

    /// Where Slack sends the installer back to.
    pub fn redirect_uri(&self) -> String {
        format!("{}/slack/oauth_redirect", self.public_url.trim_end_matches('/'))
    }

    pub fn scopes(&self) -> Vec<String> {
        self.slack_scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn purge_interval(&self) -> Option<Duration> {
        (self.purge_interval_secs > 0).then(|| Duration::from_secs(self.purge_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["lockbot", "--state-secret", "s3cret"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_settings_from_flags() {
        let config = parse(&[
            "--store-max-attempts",
            "5",
            "--max-lock-ttl-secs",
            "3600",
            "--state-token-ttl-secs",
            "60",
        ]);
        let settings = config.settings().unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.locks.max_ttl, Duration::from_secs(3600));
        assert_eq!(settings.tokens.state_token_ttl, Duration::from_secs(60));
        assert_eq!(settings.tokens.signing_secret, b"s3cret".to_vec());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let config = Config::try_parse_from(["lockbot", "--state-secret", " "]).unwrap();
        assert!(config.settings().is_err());
    }

    #[test]
    fn test_derived_values() {
        let config = parse(&[
            "--public-url",
            "https://locks.example.com/",
            "--slack-scopes",
            "commands, chat:write,",
            "--purge-interval-secs",
            "60",
            "--allow-chat-force",
            "false",
        ]);
        assert_eq!(
            config.redirect_uri(),
            "https://locks.example.com/slack/oauth_redirect"
        );
        assert_eq!(config.scopes(), vec!["commands", "chat:write"]);
        assert_eq!(config.purge_interval(), Some(Duration::from_secs(60)));
        assert!(!config.allow_chat_force);
    }
}
