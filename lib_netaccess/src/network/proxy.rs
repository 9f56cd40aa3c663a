//! # Proxy Settings
//!
//! Host, port and credentials of the optional HTTP proxy. The settings live
//! behind a [`SharedProxySettings`] handle read by the transport on every
//! request, so a preference change is picked up by the next request without
//! rebuilding the pooled client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::configs::config_net::{invalid, parse_option, ConfigError};
use crate::events::{Event, EventKind, Subscriber};

/// Preference keys that describe the proxy.
pub const PROXY_KEY_PREFIX: &str = "proxy.";

/// Shared, live-reloadable proxy settings.
pub type SharedProxySettings = Arc<RwLock<ProxySettings>>;

/// HTTP proxy routing and credentials, as stored in preferences.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxySettings {
    /// Route requests through the proxy.
    pub use_proxy: bool,
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Send credentials to the proxy.
    pub use_auth: bool,
    /// `user`, or `DOMAIN\user` for NTLM.
    pub user: String,
    /// Proxy password. Masked in `Debug` output.
    pub password: String,
}

/// Credentials in the form the proxy expects.
#[derive(Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ProxyCredentials {
    /// Plain user name and password.
    Basic { user: String, password: String },
    /// A `DOMAIN\user` login.
    Ntlm { domain: String, user: String, password: String },
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyCredentials::Basic { user, .. } => {
                write!(f, "Basic {{ user: {:?}, password: \"*****\" }}", user)
            }
            ProxyCredentials::Ntlm { domain, user, .. } => write!(
                f,
                "Ntlm {{ domain: {:?}, user: {:?}, password: \"*****\" }}",
                domain, user
            ),
        }
    }
}

impl fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySettings")
            .field("use_proxy", &self.use_proxy)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_auth", &self.use_auth)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "*****" })
            .finish()
    }
}

impl ProxySettings {
    /// Wraps the settings into a shared handle.
    pub fn shared(self) -> SharedProxySettings {
        Arc::new(RwLock::new(self))
    }

    /// `true` if requests should go through the proxy.
    pub fn is_active(&self) -> bool {
        self.use_proxy && !self.host.trim().is_empty()
    }

    /// Credentials to present, if authentication is enabled.
    ///
    /// A `DOMAIN\user` name selects NTLM.
    pub fn credentials(&self) -> Option<ProxyCredentials> {
        if !self.use_auth || self.user.is_empty() {
            return None;
        }
        match self.user.split_once('\\') {
            Some((domain, user)) => Some(ProxyCredentials::Ntlm {
                domain: domain.to_string(),
                user: user.to_string(),
                password: self.password.clone(),
            }),
            None => Some(ProxyCredentials::Basic {
                user: self.user.clone(),
                password: self.password.clone(),
            }),
        }
    }

    /// The proxy as an `http://[user:password@]host:port` URL, or `None` when inactive.
    pub fn proxy_url(&self) -> Option<Url> {
        if !self.is_active() {
            return None;
        }
        let mut url = Url::parse(&format!("http://{}:{}", self.host.trim(), self.port)).ok()?;
        if let Some(creds) = self.credentials() {
            let user = match &creds {
                ProxyCredentials::Basic { user, .. } => user.clone(),
                ProxyCredentials::Ntlm { domain, user, .. } => {
                    warn!(
                        domain = %domain,
                        "NTLM proxy authentication is not negotiated; sending DOMAIN\\user as Basic credentials"
                    );
                    format!("{}\\{}", domain, user)
                }
            };
            let password = match &creds {
                ProxyCredentials::Basic { password, .. } | ProxyCredentials::Ntlm { password, .. } => password,
            };
            url.set_username(&user).ok()?;
            url.set_password(Some(password)).ok()?;
        }
        Some(url)
    }

    /// `true` if any key of the preference delta concerns the proxy.
    pub fn touches_proxy(prefs: &BTreeMap<String, String>) -> bool {
        prefs.keys().any(|k| k.starts_with(PROXY_KEY_PREFIX))
    }

    /// Applies `proxy.*` keys from a preference delta.
    ///
    /// # Returns
    /// `true` if any setting changed.
    pub fn apply_preferences(&mut self, prefs: &BTreeMap<String, String>) -> Result<bool, ConfigError> {
        let before = self.clone();
        for (key, value) in prefs {
            match key.as_str() {
                "proxy.useProxy" => self.use_proxy = parse_flag(key, value)?,
                "proxy.host" => self.host = value.trim().to_string(),
                "proxy.port" => self.port = parse_option(key, value)?,
                "proxy.useAuth" => self.use_auth = parse_flag(key, value)?,
                "proxy.user" => self.user = value.clone(),
                "proxy.password" => self.password = value.clone(),
                _ => {}
            }
        }
        Ok(*self != before)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Applies `PREFERENCES_CHANGED` deltas that touch the proxy to a shared handle.
pub struct ProxyReloader {
    settings: SharedProxySettings,
}

impl ProxyReloader {
    /// A reloader writing into `settings`.
    pub fn new(settings: SharedProxySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Subscriber for ProxyReloader {
    async fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        if event.kind() != EventKind::PreferencesChanged {
            return Ok(());
        }
        let Some(prefs) = event.payload().as_preferences() else {
            return Ok(());
        };
        if !ProxySettings::touches_proxy(prefs) {
            return Ok(());
        }

        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = settings.clone();
        if updated.apply_preferences(prefs)? {
            *settings = updated;
            info!(proxy = ?*settings, "Proxy settings reloaded");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "proxy-reloader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_inactive_proxy_has_no_url() {
        let settings = ProxySettings {
            use_proxy: false,
            host: "proxy.local".into(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(settings.proxy_url(), None);
    }

    #[test]
    fn test_basic_credentials_travel_in_url() {
        let settings = ProxySettings {
            use_proxy: true,
            host: "proxy.local".into(),
            port: 8080,
            use_auth: true,
            user: "alice".into(),
            password: "s3cret".into(),
        };
        let url = settings.proxy_url().unwrap();
        assert_eq!(url.host_str(), Some("proxy.local"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.username(), "alice");
        assert_eq!(url.password(), Some("s3cret"));
        assert!(!format!("{:?}", settings).contains("s3cret"));
    }

    #[test]
    fn test_domain_user_selects_ntlm() {
        let settings = ProxySettings {
            use_auth: true,
            user: r"CORP\bob".into(),
            password: "pw".into(),
            ..Default::default()
        };
        match settings.credentials() {
            Some(ProxyCredentials::Ntlm { domain, user, .. }) => {
                assert_eq!(domain, "CORP");
                assert_eq!(user, "bob");
            }
            other => panic!("expected NTLM credentials, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_preferences_reports_changes() {
        let mut settings = ProxySettings::default();
        assert!(settings
            .apply_preferences(&prefs(&[("proxy.useProxy", "true"), ("proxy.port", "3128")]))
            .unwrap());
        assert!(settings.use_proxy);
        assert_eq!(settings.port, 3128);
        assert!(!settings.apply_preferences(&prefs(&[("proxy.port", "3128")])).unwrap());
        assert!(settings.apply_preferences(&prefs(&[("proxy.port", "http")])).is_err());
    }

    #[tokio::test]
    async fn test_reloader_updates_shared_settings_in_place() {
        let shared = ProxySettings::default().shared();
        let reloader = ProxyReloader::new(Arc::clone(&shared));

        let unrelated = Event::new(EventKind::PreferencesChanged, prefs(&[("ui.theme", "dark")]));
        reloader.handle_event(&unrelated).await.unwrap();
        assert_eq!(*shared.read().unwrap(), ProxySettings::default());

        let change = Event::new(
            EventKind::PreferencesChanged,
            prefs(&[("proxy.useProxy", "yes"), ("proxy.host", "10.0.0.8"), ("proxy.port", "8081")]),
        );
        reloader.handle_event(&change).await.unwrap();

        let now = shared.read().unwrap().clone();
        assert!(now.is_active());
        assert_eq!(now.proxy_url().unwrap().as_str(), "http://10.0.0.8:8081/");
    }

    #[tokio::test]
    async fn test_reloader_rejects_bad_values_without_partial_update() {
        let shared = ProxySettings::default().shared();
        let reloader = ProxyReloader::new(Arc::clone(&shared));
        let change = Event::new(
            EventKind::PreferencesChanged,
            prefs(&[("proxy.host", "10.0.0.8"), ("proxy.port", "eighty")]),
        );
        assert!(reloader.handle_event(&change).await.is_err());
        assert_eq!(*shared.read().unwrap(), ProxySettings::default());
    }
}
