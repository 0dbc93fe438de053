#![allow(unsafe_code)]

//! Signal reception for the supervisor.
//!
//! Every signal that can be sent to the process is blocked before any other
//! thread starts, and the main thread picks them up one at a time with
//! [`SignalSet::wait`]. What happens next is decided by [`action`].

use nix::{
    libc::c_int,
    sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal},
};

use crate::error::Result;

/// Raised by the process itself rather than sent to it.
const SELF_INFLICTED: [Signal; 6] = [
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGPIPE,
    Signal::SIGSEGV,
    Signal::SIGTRAP,
];

/// Cannot be caught, blocked or waited for.
const UNCATCHABLE: [Signal; 2] = [Signal::SIGKILL, Signal::SIGSTOP];

/// What the supervisor does with a received signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalAction {
    /// A child changed state: collect exit statuses.
    Reap,
    /// Pass the identical signal on to the child.
    Forward,
}

pub const fn action(signal: Signal) -> SignalAction {
    match signal {
        Signal::SIGCHLD => SignalAction::Reap,
        _ => SignalAction::Forward,
    }
}

/// Whether `signal` is part of the set the supervisor waits on.
pub fn is_supervised(signal: Signal) -> bool {
    !SELF_INFLICTED.contains(&signal) && !UNCATCHABLE.contains(&signal)
}

/// The signals the supervisor waits on.
pub struct SignalSet {
    mask: SigSet,
}

impl SignalSet {
    /// Blocks every supervised signal on the calling thread.
    ///
    /// The mask propagates to all threads started after this point, so this
    /// must run before any thread is spawned.
    pub fn block() -> Result<Self> {
        let mut mask = SigSet::empty();
        for signal in Signal::iterator().filter(|signal| is_supervised(*signal)) {
            mask.add(signal);
        }
        mask.thread_block()?;

        // Indicate interest in SIGCHLD by setting a dummy handler, so child
        // exits are kept pending instead of discarded.
        extern "C" fn sigchld_handler(_: c_int) {}

        let handler = SigAction::new(
            SigHandler::Handler(sigchld_handler),
            SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        unsafe {
            sigaction(Signal::SIGCHLD, &handler)?;
        }

        Ok(Self { mask })
    }

    /// Blocks until one of the signals is pending and takes it.
    pub fn wait(&self) -> Result<Signal> {
        let signal = self.mask.wait()?;
        trace!("Received {:?}", signal);
        Ok(signal)
    }
}
