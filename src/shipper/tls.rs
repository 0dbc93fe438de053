use std::{
    convert::TryFrom,
    fs::File,
    io::{self, BufReader, Write},
    net::{TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    ClientConfig, ClientConnection, RootCertStore, StreamOwned,
};

use super::Connector;
use crate::{
    config::{split_server, ShipperConfig},
    error::{Error, Result},
};

/// Connects to a collector over mutually authenticated TLS.
///
/// The certificate, key, and CA files are read again for every connection, so
/// credentials rotated on disk are picked up on the next reconnect.
pub struct TlsConnector {
    server: String,
    name: ServerName<'static>,
    cert: PathBuf,
    key: PathBuf,
    ca_cert: PathBuf,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TlsConnector {
    pub fn new(config: &ShipperConfig) -> Result<Self> {
        let (host, _) =
            split_server(&config.server).ok_or_else(|| Error::ServerName(config.server.clone()))?;
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| Error::ServerName(host.to_string()))?;

        let connector = Self {
            server: config.server.clone(),
            name,
            cert: config.cert.clone(),
            key: config.key.clone(),
            ca_cert: config.ca_cert.clone(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
        };

        // Fail early if the files are missing.
        connector.client_config()?;
        Ok(connector)
    }

    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        client_config(&self.cert, &self.key, &self.ca_cert).map(Arc::new)
    }

    fn open_socket(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in self.server.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(socket) => return Ok(socket),
                Err(err) => {
                    debug!("Couldn't connect to {}: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not resolve to any address", self.server),
                )
            })
            .into())
    }
}

impl Connector for TlsConnector {
    type Connection = TlsConnection;

    fn destination(&self) -> String {
        self.server.clone()
    }

    fn connect(&self) -> Result<TlsConnection> {
        let config = self.client_config()?;
        let mut socket = self.open_socket()?;
        socket.set_nodelay(true)?;
        socket.set_read_timeout(Some(self.write_timeout))?;
        socket.set_write_timeout(Some(self.write_timeout))?;

        let mut session = ClientConnection::new(config, self.name.clone())?;
        while session.is_handshaking() {
            session.complete_io(&mut socket)?;
        }
        debug!(
            "TLS session with {} uses {:?}",
            self.server,
            session.protocol_version()
        );

        Ok(TlsConnection {
            stream: StreamOwned::new(session, socket),
            failed: false,
        })
    }
}

/// An established session with a collector.
pub struct TlsConnection {
    stream: StreamOwned<ClientConnection, TcpStream>,
    /// Set once a write or flush has failed.
    failed: bool,
}

/// Limit on sending close_notify when the connection is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

impl Write for TlsConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.stream.write(buf);
        self.failed |= written.is_err();
        written
    }

    fn flush(&mut self) -> io::Result<()> {
        let flushed = self.stream.flush();
        self.failed |= flushed.is_err();
        flushed
    }
}

impl Drop for TlsConnection {
    fn drop(&mut self) {
        // A broken or stalled socket gets no close_notify.
        if self.failed {
            return;
        }

        let _ = self.stream.sock.set_write_timeout(Some(CLOSE_TIMEOUT));
        self.stream.conn.send_close_notify();
        let _ = self.stream.flush();
    }
}

/// Builds a client configuration presenting `cert`/`key` and trusting `ca_cert`.
pub fn client_config(cert: &Path, key: &Path, ca_cert: &Path) -> Result<ClientConfig> {
    let chain = load_certs(cert, "client certificate")?;
    let key = load_key(key)?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(ca_cert, "CA certificate")?);
    if ignored > 0 {
        warn!(
            "Ignored {} unparsable CA certificates in '{}'",
            ignored,
            ca_cert.display()
        );
    }
    if added == 0 {
        return Err(Error::MissingCredential {
            kind: "usable CA certificate",
            path: ca_cert.to_owned(),
        });
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;

    Ok(config)
}

fn open(path: &Path, kind: &'static str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| Error::Credential {
            kind,
            path: path.to_owned(),
            source,
        })
}

fn load_certs(path: &Path, kind: &'static str) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, kind)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|source| Error::Credential {
            kind,
            path: path.to_owned(),
            source,
        })?;

    if certs.is_empty() {
        return Err(Error::MissingCredential {
            kind,
            path: path.to_owned(),
        });
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let kind = "private key";
    let mut reader = open(path, kind)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| Error::Credential {
            kind,
            path: path.to_owned(),
            source,
        })?
        .ok_or_else(|| Error::MissingCredential {
            kind,
            path: path.to_owned(),
        })
}
