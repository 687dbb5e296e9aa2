use std::sync::OnceLock;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{HttpConfig, ProxyConfig};
use crate::error::DownloadError;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Apply `proxy_config` to an existing `reqwest::ClientBuilder`.
///
/// - `enabled = false` => disable all proxy (including env/system)
/// - `enabled = true` + `url = Some(..)` => use explicit proxy (optionally with auth)
/// - `enabled = true` + `url = None` + `use_system_proxy = true` => use system/env proxy defaults
/// - `enabled = true` + `url = None` + `use_system_proxy = false` => disable all proxy
pub fn apply_proxy_config(
    mut builder: reqwest::ClientBuilder,
    proxy_config: &ProxyConfig,
) -> reqwest::ClientBuilder {
    if !proxy_config.enabled {
        return builder.no_proxy();
    }

    if let Some(url) = proxy_config.url.as_deref() {
        match reqwest::Proxy::all(url) {
            Ok(mut proxy) => {
                if let (Some(username), Some(password)) = (
                    proxy_config.username.as_ref(),
                    proxy_config.password.as_ref(),
                ) {
                    proxy = proxy.basic_auth(username, password);
                }
                info!(proxy_url = %url, "Using explicitly configured proxy");
                builder = builder.proxy(proxy);
            }
            Err(error) => {
                warn!(
                    proxy_url = %url,
                    error = %error,
                    "Invalid proxy URL; disabling proxy"
                );
                builder = builder.no_proxy();
            }
        }
        return builder;
    }

    if proxy_config.use_system_proxy {
        // reqwest picks up system/env proxies unless `no_proxy()` is called.
        return builder;
    }

    builder.no_proxy()
}

/// Build the shared client used for manifests and segments.
///
/// No client-wide timeout is set: manifest and segment requests carry their
/// own per-request timeouts from [`HttpConfig`].
pub fn create_client(config: &HttpConfig) -> Result<Client, DownloadError> {
    install_rustls_provider();

    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        builder = builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    builder = apply_proxy_config(builder, &config.proxy);

    builder
        .build()
        .map_err(|e| DownloadError::configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(create_client(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn invalid_proxy_url_falls_back_to_no_proxy() {
        let config = HttpConfig {
            proxy: ProxyConfig {
                url: Some("not a proxy url".to_string()),
                ..ProxyConfig::default()
            },
            ..HttpConfig::default()
        };
        assert!(create_client(&config).is_ok());
    }

    #[test]
    fn disabled_proxy_builds() {
        let config = HttpConfig {
            proxy: ProxyConfig {
                enabled: false,
                url: Some("http://127.0.0.1:3128".to_string()),
                ..ProxyConfig::default()
            },
            ..HttpConfig::default()
        };
        assert!(create_client(&config).is_ok());
    }
}
