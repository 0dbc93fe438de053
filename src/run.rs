use std::{
    io,
    sync::mpsc::{self, Receiver},
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    error::Result,
    process::{self, Child, ChildStatus},
    relay::{self, Tee},
    shipper::LogShipper,
    signal::{self, SignalAction, SignalSet},
};

/// Where the signal loop is in the life of the child.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Running,
    Reaping,
    ShuttingDown(ChildStatus),
}

/// Runs the command to completion and returns the exit code to report.
///
/// Must be called from the main thread before any other thread is started:
/// it blocks signals for the whole process.
pub fn run(config: Config) -> Result<i32> {
    let signals = SignalSet::block()?;

    // Bad TLS material is fatal before the child is started.
    let shipper = match config.shipper {
        Some(ref shipper) => Some(LogShipper::new(shipper)?),
        None => {
            info!("No server configured, output will not be shipped");
            None
        }
    };

    if config.subreaper {
        process::become_subreaper()?;
    }

    info!("Running: {}", config.cmd.join(" "));
    let (child, pipes) = process::spawn(&config.cmd)?;
    info!("Child pid: {}", child.pid());

    let (done_tx, done_rx) = mpsc::channel();
    let writer = shipper.as_ref().map(LogShipper::writer);
    relay::spawn(
        "stdout",
        pipes.stdout,
        Tee::new("stdout", io::stdout(), writer.clone()),
        done_tx.clone(),
    )?;
    relay::spawn(
        "stderr",
        pipes.stderr,
        Tee::new("stderr", io::stderr(), writer),
        done_tx,
    )?;

    let status = supervise(&signals, &child)?;

    wait_for_relays(&done_rx, 2, config.output_grace);
    if let Some(shipper) = shipper {
        shipper.close();
    }

    Ok(status.code())
}

/// Forwards signals to `child` until it has been reaped.
fn supervise(signals: &SignalSet, child: &Child) -> Result<ChildStatus> {
    let mut phase = Phase::Running;
    loop {
        phase = match phase {
            Phase::Running => {
                let received = signals.wait()?;
                match signal::action(received) {
                    SignalAction::Reap => Phase::Reaping,
                    SignalAction::Forward => {
                        child.signal(received);
                        Phase::Running
                    }
                }
            }
            // A notification may be about an orphan rather than our child.
            Phase::Reaping => match process::reap(child.pid())? {
                Some(status) => Phase::ShuttingDown(status),
                None => Phase::Running,
            },
            Phase::ShuttingDown(status) => return Ok(status),
        };
    }
}

/// Waits up to `grace` for `count` relays to reach end of stream.
///
/// Descendants of the child may hold its output pipes open indefinitely; the
/// remaining relays are left behind once the grace period is over.
fn wait_for_relays(done: &Receiver<&'static str>, count: usize, grace: Duration) {
    let deadline = Instant::now() + grace;
    let mut pending = count;

    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(name) => {
                debug!("Finished relaying {}", name);
                pending -= 1;
            }
            Err(_) => {
                warn!(
                    "{} output streams still open after {:?}, descendants may be holding them",
                    pending, grace
                );
                break;
            }
        }
    }
}
