use std::{ffi::OsString, time::Duration};

use clap::{crate_version, value_t, values_t, App, AppSettings, Arg};

use crate::{
    config::{Config, ConfigBuilder, ShipperConfigBuilder},
    error::Result,
};

/// Options that take a value, accepted with one dash as well as two.
const VALUED_FLAGS: [&str; 6] = [
    "server",
    "cert",
    "key",
    "ca-cert",
    "buffer-size",
    "output-grace",
];

#[derive(Debug)]
pub struct Args {
    pub cmd: Vec<String>,
    pub server: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub ca_cert: Option<String>,
    pub buffer_size: usize,
    pub output_grace: u64,
    pub subreaper: bool,
    pub verbosity: u64,
}

pub fn get_args() -> Args {
    get_args_from(std::env::args_os()).unwrap_or_else(|e| e.exit())
}

pub fn get_args_from<I, T>(args: I) -> std::result::Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let args = App::new("logship-init")
        .version(crate_version!())
        .about("Run a command as PID 1, forwarding signals and shipping its output over TLS")
        .setting(AppSettings::TrailingVarArg)
        .arg(Arg::with_name("server")
                 .help("Collector to stream output to, HOST:PORT")
                 .long("server")
                 .takes_value(true)
                 .value_name("HOST:PORT")
                 .requires_all(&["cert", "key", "ca-cert"]))
        .arg(Arg::with_name("cert")
                 .help("Client certificate")
                 .long("cert")
                 .takes_value(true)
                 .value_name("FILE"))
        .arg(Arg::with_name("key")
                 .help("Private key associated with the client certificate")
                 .long("key")
                 .takes_value(true)
                 .value_name("FILE"))
        .arg(Arg::with_name("ca-cert")
                 .help("CA certificate for validating the server certificate")
                 .long("ca-cert")
                 .takes_value(true)
                 .value_name("FILE"))
        .arg(Arg::with_name("buffer-size")
                 .help("Number of output chunks held while the collector is unreachable")
                 .long("buffer-size")
                 .takes_value(true)
                 .value_name("events"))
        .arg(Arg::with_name("output-grace")
                 .help("How long to wait for output once the command has exited, defaults to 2000ms")
                 .long("output-grace")
                 .takes_value(true)
                 .value_name("milliseconds"))
        .arg(Arg::with_name("subreaper")
                 .help("Register as a child subreaper, for when it does not run as PID 1")
                 .short("s")
                 .long("subreaper"))
        .arg(Arg::with_name("verbose")
                 .help("Print debugging messages to stderr, repeat for more")
                 .short("v")
                 .long("verbose")
                 .multiple(true))
        .arg(Arg::with_name("command")
                 .help("Command to execute")
                 .multiple(true)
                 .required(true))
        .get_matches_from_safe(normalize_flags(args))?;

    let cmd = values_t!(args.values_of("command"), String)?;

    let buffer_size = if args.occurrences_of("buffer-size") > 0 {
        value_t!(args.value_of("buffer-size"), usize)?
    } else {
        10
    };

    let output_grace = if args.occurrences_of("output-grace") > 0 {
        value_t!(args.value_of("output-grace"), u64)?
    } else {
        2000
    };

    Ok(Args {
        cmd,
        server: args.value_of("server").map(str::to_string),
        cert: args.value_of("cert").map(str::to_string),
        key: args.value_of("key").map(str::to_string),
        ca_cert: args.value_of("ca-cert").map(str::to_string),
        buffer_size,
        output_grace,
        subreaper: args.is_present("subreaper"),
        verbosity: args.occurrences_of("verbose"),
    })
}

impl Args {
    pub fn config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::default();
        builder
            .cmd(self.cmd.clone())
            .output_grace(Duration::from_millis(self.output_grace))
            .subreaper(self.subreaper);

        if let Some(ref server) = self.server {
            let mut shipper = ShipperConfigBuilder::default();
            shipper.server(server.as_str()).capacity(self.buffer_size);
            if let Some(ref cert) = self.cert {
                shipper.cert(cert);
            }
            if let Some(ref key) = self.key {
                shipper.key(key);
            }
            if let Some(ref ca_cert) = self.ca_cert {
                shipper.ca_cert(ca_cert);
            }
            builder.shipper(shipper.build()?);
        }

        Ok(builder.build()?)
    }
}

/// Rewrites single-dash long options (`-server x`, `-ca-cert=x`) to their
/// double-dash form, up to the command.
fn normalize_flags<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut out: Vec<OsString> = args.next().into_iter().collect();
    let mut expect_value = false;

    while let Some(arg) = args.next() {
        if expect_value {
            expect_value = false;
            out.push(arg);
            continue;
        }

        let text = match arg.to_str() {
            Some(text) => text.to_string(),
            None => {
                out.push(arg);
                break;
            }
        };

        if text == "--" || !text.starts_with('-') {
            out.push(arg);
            break;
        }

        let long = text.trim_start_matches('-');
        let (name, inline) = match long.find('=') {
            Some(at) => (&long[..at], true),
            None => (long, false),
        };

        if VALUED_FLAGS.contains(&name) {
            out.push(format!("--{}", long).into());
            expect_value = !inline;
        } else {
            out.push(arg);
        }
    }

    out.extend(args);
    out
}
