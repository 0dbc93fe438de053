use std::{io::Write, process};

use env_logger::{Builder, Env};
use log::{error, LevelFilter};
use logship_init::{cli, run};

fn init_logger(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    Builder::from_env(Env::default().default_filter_or(level.to_string()))
        .format(|buf, record| {
            writeln!(buf, "[logship-init] {} {}", record.level(), record.args())
        })
        .init();
}

fn main() {
    let args = cli::get_args();
    init_logger(args.verbosity);

    let code = match args.config().and_then(run) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            1
        }
    };

    process::exit(code);
}
