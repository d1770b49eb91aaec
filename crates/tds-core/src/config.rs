//! Login and locale configuration.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tds_protocol::{DEFAULT_PACKET_SIZE, TdsVersion};
use zeroize::Zeroizing;

use crate::error::Error;

/// Language used when none is configured.
pub const DEFAULT_LANGUAGE: &str = "us_english";

/// Client charset used when the environment names none.
pub const DEFAULT_CHARSET: &str = "ISO-8859-1";

/// Server name used when neither the login nor the environment sets one.
pub const DEFAULT_SERVER: &str = "SYBASE";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1433;

/// Language and charset settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    /// Session language.
    pub language: String,
    /// Charset of client-side text.
    pub client_charset: String,
    /// Charset requested for the server, if any.
    pub server_charset: Option<String>,
    /// Format for date output, if overridden.
    pub date_format: Option<String>,
    /// Format for time output, if overridden.
    pub time_format: Option<String>,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            client_charset: DEFAULT_CHARSET.to_string(),
            server_charset: None,
            date_format: None,
            time_format: None,
        }
    }
}

impl Locale {
    /// Locale with the client charset read from `LC_ALL`, `LC_CTYPE` or
    /// `LANG`, in that order.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Locale built from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let charset = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.is_empty())
            .and_then(|value| charset_from_locale(&value));

        Self {
            client_charset: charset.unwrap_or_else(|| DEFAULT_CHARSET.to_string()),
            ..Self::default()
        }
    }
}

/// Extract the charset part of a POSIX locale name (`xx_YY.CHARSET@mod`).
///
/// ASCII is widened to ISO-8859-1 since servers rarely accept it.
#[must_use]
pub fn charset_from_locale(locale: &str) -> Option<String> {
    #[allow(clippy::unwrap_used)]
    static LOCALE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z]{1,8}(?:_[A-Za-z0-9]{1,8})?\.([A-Za-z0-9_.:\-]+?)(?:@.*)?$").unwrap()
    });

    let charset = LOCALE_RE.captures(locale)?.get(1)?.as_str();
    if charset.eq_ignore_ascii_case("US-ASCII") || charset.eq_ignore_ascii_case("ANSI_X3.4-1968") {
        return Some(DEFAULT_CHARSET.to_string());
    }
    Some(charset.to_string())
}

/// Settings a connection is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Negotiated packet size.
    pub block_size: usize,
    /// Multiplex sessions over the transport.
    pub mars: bool,
    /// Protocol version.
    pub tds_version: TdsVersion,
    /// Per-read timeout; `None` blocks indefinitely.
    pub query_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_PACKET_SIZE,
            mars: false,
            tds_version: TdsVersion::V7_4,
            query_timeout: None,
        }
    }
}

/// Everything needed to log in to a server.
#[derive(Clone)]
#[non_exhaustive]
pub struct Login {
    /// Server name or address.
    pub server_name: String,
    /// TCP port.
    pub port: u16,
    /// Login name.
    pub user_name: String,
    password: Zeroizing<String>,
    /// Initial database.
    pub database: Option<String>,
    /// Application name reported to the server.
    pub app_name: String,
    /// Client host name reported to the server.
    pub client_host_name: String,
    /// Session language.
    pub language: String,
    /// Client charset.
    pub client_charset: String,
    /// Requested server charset.
    pub server_charset: Option<String>,
    /// Requested packet size, 0 lets the server decide.
    pub block_size: usize,
    /// Protocol version.
    pub tds_version: TdsVersion,
    /// Enable MARS.
    pub mars: bool,
    /// Allow bulk copy on this login.
    pub bulk_copy: bool,
    /// Send text as UTF-16.
    pub use_utf16: bool,
    /// Verify the host name against the server certificate.
    pub check_ssl_hostname: bool,
    /// Consult environment variables for unset fields.
    pub use_environment: bool,
    /// Per-read timeout.
    pub query_timeout: Option<Duration>,
}

impl Default for Login {
    fn default() -> Self {
        Self::with_locale(&Locale::default())
    }
}

impl Login {
    /// Login initialised from the environment.
    #[must_use]
    pub fn new() -> Self {
        let mut login = Self::with_locale(&Locale::from_env());
        login.server_name = default_server_name(|key| std::env::var(key).ok());
        if let Ok(host) = std::env::var("HOSTNAME") {
            if !host.is_empty() {
                login.client_host_name = host;
            }
        }
        login
    }

    /// Login whose language and charsets come from `locale`.
    #[must_use]
    pub fn with_locale(locale: &Locale) -> Self {
        Self {
            server_name: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            user_name: String::new(),
            password: Zeroizing::new(String::new()),
            database: None,
            app_name: String::new(),
            client_host_name: "localhost".to_string(),
            language: locale.language.clone(),
            client_charset: locale.client_charset.clone(),
            server_charset: locale.server_charset.clone(),
            block_size: 0,
            tds_version: TdsVersion::V7_4,
            mars: false,
            bulk_copy: true,
            use_utf16: true,
            check_ssl_hostname: true,
            use_environment: true,
            query_timeout: None,
        }
    }

    /// Parse an ADO-style connection string on top of [`Login::new`].
    ///
    /// Keys are case-insensitive; unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut login = Self::new();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    if let Some((host, port)) = value.split_once(',') {
                        login.server_name = host.trim().to_string();
                        login.port = parse_port(port.trim())?;
                    } else {
                        login.server_name = value.to_string();
                    }
                }
                "port" => login.port = parse_port(value)?,
                "user id" | "uid" | "user" => login.user_name = value.to_string(),
                "password" | "pwd" => login.password = Zeroizing::new(value.to_string()),
                "database" | "initial catalog" => login.database = Some(value.to_string()),
                "application name" | "app" => login.app_name = value.to_string(),
                "language" => login.language = value.to_string(),
                "client charset" | "charset" => login.client_charset = value.to_string(),
                "packet size" => {
                    login.block_size = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid packet size: {value}")))?;
                }
                "tds version" | "tdsversion" | "protocol version" => {
                    login.tds_version = TdsVersion::parse(value)
                        .ok_or_else(|| Error::Config(format!("invalid TDS version: {value}")))?;
                }
                "multipleactiveresultsets" | "mars" => login.mars = parse_bool(value)?,
                "query timeout" | "command timeout" => {
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid timeout: {value}")))?;
                    login.query_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        Ok(login)
    }

    /// Set the server name.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Set user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = user.into();
        self.password = Zeroizing::new(password.into());
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the requested packet size.
    #[must_use]
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Enable or disable MARS.
    #[must_use]
    pub fn mars(mut self, enabled: bool) -> Self {
        self.mars = enabled;
        self
    }

    /// The password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Options for creating the connection this login runs on.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            block_size: if self.block_size == 0 {
                DEFAULT_PACKET_SIZE
            } else {
                self.block_size
            },
            mars: self.mars,
            tds_version: self.tds_version,
            query_timeout: self.query_timeout,
        }
    }
}

impl fmt::Debug for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Login")
            .field("server_name", &self.server_name)
            .field("port", &self.port)
            .field("user_name", &self.user_name)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("app_name", &self.app_name)
            .field("language", &self.language)
            .field("client_charset", &self.client_charset)
            .field("block_size", &self.block_size)
            .field("tds_version", &self.tds_version)
            .field("mars", &self.mars)
            .finish_non_exhaustive()
    }
}

/// Server name from `DSQUERY`, then `TDSQUERY`, else [`DEFAULT_SERVER`].
pub fn default_server_name(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["DSQUERY", "TDSQUERY"]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string())
}

fn parse_port(value: &str) -> Result<u16, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid port: {value}")))
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") || value == "0"
    {
        Ok(false)
    } else {
        Err(Error::Config(format!("invalid boolean: {value}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_from_locale() {
        assert_eq!(charset_from_locale("en_US.UTF-8").as_deref(), Some("UTF-8"));
        assert_eq!(
            charset_from_locale("de_DE.ISO-8859-15@euro").as_deref(),
            Some("ISO-8859-15")
        );
        assert_eq!(
            charset_from_locale("en_US.US-ASCII").as_deref(),
            Some(DEFAULT_CHARSET)
        );
        assert_eq!(charset_from_locale("C"), None);
        assert_eq!(charset_from_locale("POSIX"), None);
    }

    #[test]
    fn test_locale_lookup_order() {
        let locale = Locale::from_lookup(|key| match key {
            "LC_ALL" => Some(String::new()),
            "LC_CTYPE" => Some("fr_FR.CP1252".to_string()),
            "LANG" => Some("en_US.UTF-8".to_string()),
            _ => None,
        });
        assert_eq!(locale.client_charset, "CP1252");
        assert_eq!(locale.language, DEFAULT_LANGUAGE);

        let locale = Locale::from_lookup(|_| None);
        assert_eq!(locale.client_charset, DEFAULT_CHARSET);
    }

    #[test]
    fn test_default_server_name() {
        assert_eq!(default_server_name(|_| None), "SYBASE");
        assert_eq!(
            default_server_name(|key| (key == "TDSQUERY").then(|| "db2".to_string())),
            "db2"
        );
        assert_eq!(
            default_server_name(|key| Some(format!("{key}_host"))),
            "DSQUERY_host"
        );
    }

    #[test]
    fn test_login_defaults() {
        let login = Login::default();
        assert_eq!(login.language, "us_english");
        assert_eq!(login.block_size, 0);
        assert!(login.bulk_copy);
        assert!(login.use_utf16);
        assert!(login.check_ssl_hostname);
        assert_eq!(login.connection_options().block_size, DEFAULT_PACKET_SIZE);
    }

    #[test]
    fn test_from_connection_string() {
        let login = Login::from_connection_string(
            "Server=db.local,1500;UID=sa;PWD=secret;Initial Catalog=master;\
             Packet Size=8192;TDS Version=5.0;MARS=yes;Foo=bar",
        )
        .unwrap();
        assert_eq!(login.server_name, "db.local");
        assert_eq!(login.port, 1500);
        assert_eq!(login.user_name, "sa");
        assert_eq!(login.password(), "secret");
        assert_eq!(login.database.as_deref(), Some("master"));
        assert_eq!(login.tds_version, TdsVersion::V5_0);

        let options = login.connection_options();
        assert_eq!(options.block_size, 8192);
        assert!(options.mars);
    }

    #[test]
    fn test_from_connection_string_errors() {
        assert!(matches!(
            Login::from_connection_string("server"),
            Err(Error::Config(_))
        ));
        assert!(Login::from_connection_string("port=abc").is_err());
        assert!(Login::from_connection_string("mars=maybe").is_err());
        assert!(Login::from_connection_string("tds version=9.9").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let login = Login::default().credentials("sa", "hunter2");
        let debug = format!("{login:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
