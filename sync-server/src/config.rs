use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use sync_core::synchronizer::SyncSettings;

/// Relays Prometheus Alertmanager notifications to CachetHQ incidents.
#[derive(Debug, Clone, Parser)]
#[command(name = "prometheus-cachethq", about, version)]
pub struct Config {
    /// Token sent by Prometheus in the webhook configuration. Empty disables the check.
    #[arg(long, env = "PROMETHEUS_TOKEN", default_value = "")]
    pub prometheus_token: String,

    /// Where to find CachetHQ.
    #[arg(long = "cachethq-url", env = "CACHETHQ_URL", default_value = "http://127.0.0.1/")]
    pub cachethq_url: String,

    /// Token to send to CachetHQ.
    #[arg(long = "cachethq-token", env = "CACHETHQ_TOKEN", default_value = "")]
    pub cachethq_token: String,

    /// Root CA (PEM) to trust when talking to CachetHQ over https.
    #[arg(long = "cachethq-root-ca", env = "CACHETHQ_ROOT_CA")]
    pub cachethq_root_ca: Option<PathBuf>,

    /// Don't check the certificate of the https access to CachetHQ.
    #[arg(long = "cachethq-skip-verify-ssl", env = "CACHETHQ_SKIP_VERIFY_SSL")]
    pub cachethq_skip_verify_ssl: bool,

    /// Per-request timeout for CachetHQ calls.
    #[arg(long = "cachethq-timeout-secs", env = "CACHETHQ_TIMEOUT_SECS", default_value_t = 10)]
    pub cachethq_timeout_secs: u64,

    /// Extra attempts for a failed CachetHQ call. 0 leaves retrying to Alertmanager.
    #[arg(long = "cachethq-retries", env = "CACHETHQ_RETRIES", default_value_t = 0)]
    pub cachethq_retries: u32,

    /// Log level: info, debug, or any tracing filter directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Certificate file; together with --ssl-key-file enables https.
    #[arg(long, env = "SSL_CERT_FILE")]
    pub ssl_cert_file: Option<PathBuf>,

    /// Key file; together with --ssl-cert-file enables https.
    #[arg(long, env = "SSL_KEY_FILE")]
    pub ssl_key_file: Option<PathBuf>,

    /// Label to look for in Prometheus alerts.
    #[arg(long, env = "LABEL_NAME", default_value = sync_core::DEFAULT_LABEL_NAME)]
    pub label_name: String,

    /// Port to listen on.
    #[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,

    /// Create CachetHQ incidents as visible.
    #[arg(long, env = "CACHETHQ_INCIDENT_VISIBLE")]
    pub visible: bool,

    /// How long a webhook request waits for its batch before answering 504.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read root CA {path:?}: {source}")]
    ReadRootCa {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid root CA {path:?}: {source}")]
    InvalidRootCa {
        path: PathBuf,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build CachetHQ client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("--ssl-cert-file and --ssl-key-file must be given together")]
    PartialTls,
}

impl Config {
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            label_name: self.label_name.clone(),
            visible: self.visible,
        }
    }

    pub fn prometheus_token(&self) -> Option<&str> {
        Some(self.prometheus_token.as_str()).filter(|t| !t.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// HTTP client for CachetHQ with the configured trust root and verification policy.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let timeout = Duration::from_secs(self.cachethq_timeout_secs);
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(self.cachethq_skip_verify_ssl);

        if let Some(path) = &self.cachethq_root_ca {
            let pem = std::fs::read(path).map_err(|source| ConfigError::ReadRootCa {
                path: path.clone(),
                source,
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|source| {
                ConfigError::InvalidRootCa {
                    path: path.clone(),
                    source,
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }

        builder.build().map_err(ConfigError::Client)
    }

    /// Certificate and key for serving https, if configured.
    pub fn server_tls(&self) -> Result<Option<(PathBuf, PathBuf)>, ConfigError> {
        match (&self.ssl_cert_file, &self.ssl_key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (None, None) => Ok(None),
            _ => Err(ConfigError::PartialTls),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("prometheus-cachethq").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn flags_populate_settings() {
        let config = parse(&[
            "--prometheus-token",
            "s3cret",
            "--cachethq-url",
            "https://status.example.com/",
            "--label-name",
            "service",
            "--visible",
            "--http-port",
            "9000",
        ]);

        assert_eq!(config.prometheus_token(), Some("s3cret"));
        assert_eq!(config.cachethq_url, "https://status.example.com/");
        assert_eq!(config.http_port, 9000);

        let settings = config.sync_settings();
        assert_eq!(settings.label_name, "service");
        assert!(settings.visible);
    }

    #[test]
    fn empty_token_disables_auth() {
        let config = parse(&["--prometheus-token", ""]);
        assert_eq!(config.prometheus_token(), None);
    }

    #[test]
    fn default_client_builds() {
        let config = parse(&["--cachethq-skip-verify-ssl", "--cachethq-timeout-secs", "3"]);
        assert!(config.cachethq_skip_verify_ssl);
        assert!(config.http_client().is_ok());
    }

    #[test]
    fn missing_root_ca_is_an_error() {
        let config = parse(&["--cachethq-root-ca", "/nonexistent/ca.pem"]);
        assert!(matches!(
            config.http_client(),
            Err(ConfigError::ReadRootCa { .. })
        ));
    }

    #[test]
    fn tls_needs_both_files() {
        let both = parse(&["--ssl-cert-file", "cert.pem", "--ssl-key-file", "key.pem"]);
        assert_eq!(
            both.server_tls().expect("tls"),
            Some((PathBuf::from("cert.pem"), PathBuf::from("key.pem")))
        );

        let mut partial = both.clone();
        partial.ssl_key_file = None;
        assert!(matches!(partial.server_tls(), Err(ConfigError::PartialTls)));

        let mut none = both;
        none.ssl_cert_file = None;
        none.ssl_key_file = None;
        assert_eq!(none.server_tls().expect("tls"), None);
    }
}
