//! Configuration for the supervisor and its log shipper.
//!
//! Neither [`Config`] nor [`ShipperConfig`] is constructable directly, use
//! [`ConfigBuilder`] and [`ShipperConfigBuilder`].
//!
//! # Examples
//!
//! ```
//! # use logship_init::config::{ConfigBuilder, ShipperConfigBuilder};
//! let shipper = ShipperConfigBuilder::default()
//!     .server("logs.example.com:6514")
//!     .cert("/run/secrets/client.pem")
//!     .key("/run/secrets/client-key.pem")
//!     .ca_cert("/run/secrets/ca.pem")
//!     .build()
//!     .expect("mission failed");
//!
//! ConfigBuilder::default()
//!     .cmd(vec!["nginx".into(), "-g".into(), "daemon off;".into()])
//!     .shipper(shipper)
//!     .build()
//!     .expect("mission failed");
//! ```

use std::{path::PathBuf, time::Duration};

use derive_builder::Builder;

/// Arguments to the supervisor
#[derive(Builder, Clone, Debug)]
#[builder(setter(into, strip_option))]
#[builder(build_fn(validate = "Self::validate"))]
#[non_exhaustive]
pub struct Config {
    /// Command to execute in popen3 format (first program, rest arguments).
    pub cmd: Vec<String>,
    /// Where to ship the command's output. If None, output is only mirrored.
    #[builder(default)]
    pub shipper: Option<ShipperConfig>,
    /// How long to wait for the output relays once the command has exited.
    #[builder(default = "Duration::from_secs(2)")]
    pub output_grace: Duration,
    /// Adopt orphaned descendants when not running as PID 1 (Linux only).
    #[builder(default)]
    pub subreaper: bool,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.cmd.as_ref().map_or(true, Vec::is_empty) {
            return Err("cmd must not be empty".into());
        }

        Ok(())
    }
}

/// Arguments to the log shipper
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
#[builder(build_fn(validate = "Self::validate"))]
#[non_exhaustive]
pub struct ShipperConfig {
    /// Collector address, `HOST:PORT`.
    pub server: String,
    /// PEM client certificate (chain) presented to the collector.
    pub cert: PathBuf,
    /// PEM private key of the client certificate.
    pub key: PathBuf,
    /// PEM CA bundle the collector's certificate is validated against.
    pub ca_cert: PathBuf,
    /// Number of events held while the collector is unreachable.
    #[builder(default = "10")]
    pub capacity: usize,
    /// Delay between failed connection attempts.
    #[builder(default = "Duration::from_secs(1)")]
    pub backoff: Duration,
    /// Limit on establishing the TCP connection, per resolved address.
    #[builder(default = "Duration::from_secs(10)")]
    pub connect_timeout: Duration,
    /// Limit on a single socket read or write, handshake included.
    #[builder(default = "Duration::from_secs(30)")]
    pub write_timeout: Duration,
}

impl ShipperConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref server) = self.server {
            if split_server(server).is_none() {
                return Err(format!("server '{}' is not of the form HOST:PORT", server));
            }
        }

        if self.capacity == Some(0) {
            return Err("capacity must be at least 1".into());
        }

        Ok(())
    }
}

/// Splits `HOST:PORT` into its parts, unwrapping bracketed IPv6 literals.
pub(crate) fn split_server(server: &str) -> Option<(&str, u16)> {
    let (host, port) = server.rsplit_once(':')?;
    let port = port.parse().ok()?;

    let host = if host.starts_with('[') && host.ends_with(']') {
        &host[1..host.len() - 1]
    } else if host.contains(':') {
        return None;
    } else {
        host
    };

    if host.is_empty() {
        None
    } else {
        Some((host, port))
    }
}
