use std::{io, path::PathBuf};

use thiserror::Error;

use crate::config::{ConfigBuilderError, ShipperConfigBuilderError};

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Credential error: couldn't read {kind} from '{}': {source}", path.display())]
    Credential {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Credential error: no {kind} found in '{}'", path.display())]
    MissingCredential { kind: &'static str, path: PathBuf },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("TLS error: invalid server name '{0}'")]
    ServerName(String),

    #[error("Process error: couldn't start '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },

    #[error("System error: {0}")]
    Nix(#[from] nix::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ConfigBuilderError> for Error {
    fn from(err: ConfigBuilderError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<ShipperConfigBuilderError> for Error {
    fn from(err: ShipperConfigBuilderError) -> Self {
        Self::Config(err.to_string())
    }
}
