use http::header::HeaderName;
use thiserror::Error;
use tracing::error;

/// Header read by default.
pub const DEFAULT_HEADER: HeaderName = HeaderName::from_static(linkerd_baggage::HEADER);

/// Overrides the name of the header that carries workload baggage.
pub const ENV_BAGGAGE_HEADER: &str = "LINKERD2_PROXY_BAGGAGE_HEADER";

/// Controls whether metadata derived from the peer's identity alone is
/// published for requests without baggage.
pub const ENV_BAGGAGE_PUBLISH_PEER_ONLY: &str = "LINKERD2_PROXY_BAGGAGE_PUBLISH_PEER_ONLY";

#[derive(Clone, Debug)]
pub struct Config {
    pub header: HeaderName,
    pub publish_peer_only: bool,
}

/// The strings used to build a configuration.
pub trait Strings {
    /// Retrieves the value for the key `key`.
    ///
    /// `key` must be one of the `ENV_` values above.
    fn get(&self, key: &str) -> Result<Option<String>, EnvError>;
}

/// An implementation of `Strings` that reads the values from environment variables.
pub struct Env;

#[derive(Clone, Debug, Error)]
pub enum EnvError {
    #[error("invalid environment variable")]
    InvalidEnvVar,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("not a boolean value: {0}")]
    NotABool(
        #[from]
        #[source]
        std::str::ParseBoolError,
    ),
    #[error("not a valid header name")]
    NotAHeaderName,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER,
            publish_peer_only: true,
        }
    }
}

pub fn parse_config<S: Strings>(strings: &S) -> Result<Config, EnvError> {
    let header = parse(strings, ENV_BAGGAGE_HEADER, parse_header_name);
    let publish_peer_only = parse(strings, ENV_BAGGAGE_PUBLISH_PEER_ONLY, parse_bool);

    let defaults = Config::default();
    Ok(Config {
        header: header?.unwrap_or(defaults.header),
        publish_peer_only: publish_peer_only?.unwrap_or(defaults.publish_peer_only),
    })
}

// === impl Env ===

impl Strings for Env {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        use std::env;

        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(env::VarError::NotUnicode(_)) => {
                error!("{key} is not encoded in Unicode");
                Err(EnvError::InvalidEnvVar)
            }
        }
    }
}

impl Env {
    pub fn try_config(&self) -> Result<Config, EnvError> {
        parse_config(self)
    }
}

// === Parsing ===

fn parse<S, T, Parse>(strings: &S, name: &str, parse: Parse) -> Result<Option<T>, EnvError>
where
    S: Strings,
    Parse: FnOnce(&str) -> Result<T, ParseError>,
{
    match strings.get(name)? {
        Some(ref s) => {
            let r = parse(s).map_err(|parse_error| {
                error!("{name}={s:?} is not valid: {parse_error:?}");
                EnvError::InvalidEnvVar
            })?;
            Ok(Some(r))
        }
        None => Ok(None),
    }
}

fn parse_bool(s: &str) -> Result<bool, ParseError> {
    s.parse().map_err(Into::into)
}

fn parse_header_name(s: &str) -> Result<HeaderName, ParseError> {
    HeaderName::from_bytes(s.trim().as_bytes()).map_err(|_| ParseError::NotAHeaderName)
}

#[cfg(test)]
impl Strings for std::collections::HashMap<&'static str, &'static str> {
    fn get(&self, key: &str) -> Result<Option<String>, EnvError> {
        Ok(self.get(key).map(ToString::to_string))
    }
}
