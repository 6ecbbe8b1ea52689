use serde::Deserialize;
use url::Url;

use crate::utils::ConfigError;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_URI: &str = "mqtt://127.0.0.1:1883";

/// Top-level configuration settings for the application.
///
/// `uri` is the broker connection string, see [`ClientSettings::from_uri`].
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub uri: String,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub uri: Option<String>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills everything `partial` leaves out from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        Settings {
            uri: partial.uri.unwrap_or(default.uri),
            log: LogSettings {
                level: partial
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
        }
    }

    pub fn client(&self) -> Result<ClientSettings, ConfigError> {
        ClientSettings::from_uri(&self.uri)
    }
}

/// Everything a session needs to reach and log into a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// May be empty, in which case a clean session is forced on connect.
    pub client_id: String,
    pub clean_session: bool,
    /// Keep-alive interval in seconds, 0 disables it.
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Subscribed at QoS 0 after every accepted CONNACK.
    pub topics: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            client_id: String::new(),
            clean_session: false,
            keep_alive: 0,
            username: None,
            password: None,
            topics: Vec::new(),
        }
    }
}

impl ClientSettings {
    /// Parses a connection string of the form
    /// `mqtt://[user:pass@]host[:port]?topics=a,b&clientId=x&timeout=30&cleanSession&username=u&password=p`.
    ///
    /// `cleanSession` is enabled by its mere presence. Credentials given as
    /// query parameters win over the ones in the authority part.
    ///
    /// ```rust
    /// use popmqtt::config::ClientSettings;
    ///
    /// let settings = ClientSettings::from_uri("mqtt://broker.local?clientId=dev&timeout=30").unwrap();
    /// assert_eq!(settings.address(), "broker.local:1883");
    /// assert_eq!(settings.client_id, "dev");
    /// assert_eq!(settings.keep_alive, 30);
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(uri)?;
        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => return Err(ConfigError::Scheme(other.to_string())),
        }
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ConfigError::MissingHost),
        };

        let mut settings = ClientSettings {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            ..ClientSettings::default()
        };
        if !url.username().is_empty() {
            settings.username = Some(url.username().to_string());
        }
        settings.password = url.password().map(str::to_string);

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "topics" => {
                    settings.topics = value
                        .split(',')
                        .map(str::trim)
                        .filter(|topic| !topic.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "clientId" => settings.client_id = value.into_owned(),
                "timeout" => {
                    settings.keep_alive =
                        value
                            .parse()
                            .map_err(|_| ConfigError::InvalidParameter {
                                key: "timeout",
                                value: value.to_string(),
                            })?;
                }
                "cleanSession" => settings.clean_session = true,
                "username" => settings.username = non_empty(&value),
                "password" => settings.password = non_empty(&value),
                _ => {}
            }
        }
        Ok(settings)
    }

    /// `host:port` as handed to the socket.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
