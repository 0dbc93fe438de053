//! Best-effort log shipping to a remote collector.
//!
//! A [`LogShipper`] accepts output unconditionally into a bounded
//! [`RingBuffer`] and a background thread drains it into a connection made by
//! a [`Connector`]. When the collector is slow or unreachable the oldest
//! events are overwritten instead of blocking the writers; when the
//! connection fails the drain thread reconnects with a fixed backoff, forever.
//!
//! Writers are never told about any of this. The only ways to observe
//! delivery problems are the log lines of the drain thread and [`stats`].
//!
//! [`stats`]: LogShipper::stats

use std::{
    io::{self, Write},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{config::ShipperConfig, error::Result, ringbuffer::RingBuffer};

pub use self::tls::{TlsConnection, TlsConnector};

mod tls;

/// Opens connections to a collector.
///
/// Called from the drain thread every time a connection is needed; an error
/// is logged and retried after the backoff.
pub trait Connector: Send + 'static {
    type Connection: Write;

    /// Human-readable destination, used in log lines.
    fn destination(&self) -> String;

    fn connect(&self) -> Result<Self::Connection>;
}

/// Delivery counters of a shipper.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShipperStats {
    /// Events written to a collector.
    pub shipped: u64,
    /// Events overwritten in the buffer before they could be shipped.
    pub overwritten: u64,
    /// Events taken from the buffer whose write failed.
    pub lost_on_failure: u64,
    /// Events still queued when the shipper was closed.
    pub discarded_on_close: u64,
}

impl ShipperStats {
    pub const fn dropped(&self) -> u64 {
        self.overwritten + self.lost_on_failure + self.discarded_on_close
    }
}

pub struct LogShipper {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogShipper {
    /// Creates a shipper to the TLS collector described by `config`.
    ///
    /// The TLS material is loaded here first so that missing or invalid files
    /// are reported before anything else happens.
    pub fn new(config: &ShipperConfig) -> Result<Self> {
        let connector = TlsConnector::new(config)?;
        Self::with_connector(connector, config.capacity, config.backoff)
    }

    /// Creates a shipper over any connector and starts its drain thread.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn with_connector<C: Connector>(
        connector: C,
        capacity: usize,
        backoff: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(capacity));
        let drain = Drain {
            connector,
            shared: Arc::clone(&shared),
            backoff,
        };

        let worker = thread::Builder::new()
            .name("log-shipper".into())
            .spawn(move || drain.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Returns a handle that queues everything written to it.
    pub fn writer(&self) -> ShipperWriter {
        ShipperWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queues one event. Always accepts the whole input.
    pub fn write(&self, event: &[u8]) -> usize {
        self.shared.push(event);
        event.len()
    }

    pub fn stats(&self) -> ShipperStats {
        self.shared.lock().stats
    }

    /// Stops the drain thread and waits for it to exit.
    ///
    /// Events still queued are discarded. Only the first call does anything;
    /// later calls return immediately.
    pub fn close(&self) {
        let worker = match lock(&self.worker).take() {
            Some(worker) => worker,
            None => {
                debug!("Log shipper already closed");
                return;
            }
        };

        info!("Cancelling log shipper");
        self.shared.request_stop();

        if worker.join().is_err() {
            error!("Log shipper thread panicked");
        }

        let stats = self.stats();
        info!(
            "Log shipper stopped: {} events shipped, {} dropped ({} overwritten, {} lost on write failure, {} discarded on close)",
            stats.shipped,
            stats.dropped(),
            stats.overwritten,
            stats.lost_on_failure,
            stats.discarded_on_close,
        );
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        self.close();
    }
}

/// Write side of a [`LogShipper`].
///
/// Each `write` call becomes one event; writes never block on the network and
/// never fail.
#[derive(Clone)]
pub struct ShipperWriter {
    shared: Arc<Shared>,
}

impl Write for ShipperWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct State {
    events: RingBuffer<Vec<u8>>,
    /// Coalesced wake-up: set when the buffer goes from empty to non-empty.
    readable: bool,
    stop: bool,
    stats: ShipperStats,
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

enum Next {
    Event(Vec<u8>),
    Stop,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                events: RingBuffer::new(capacity),
                readable: false,
                stop: false,
                stats: ShipperStats::default(),
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn push(&self, event: &[u8]) {
        if event.is_empty() {
            return;
        }

        let mut state = self.lock();
        let was_empty = state.events.is_empty();
        state.events.push(event.to_vec());

        // A pending notification already covers this event.
        if was_empty && !state.readable {
            state.readable = true;
            self.changed.notify_one();
        }
    }

    fn request_stop(&self) {
        self.lock().stop = true;
        self.changed.notify_all();
    }

    /// Takes the oldest event, waiting for one if the buffer is empty.
    fn next_event(&self) -> Next {
        let (event, overwritten) = {
            let mut state = self.lock();
            loop {
                if state.stop {
                    return Next::Stop;
                }

                let overwritten = state.events.overflow();
                if let Ok(event) = state.events.pop() {
                    state.stats.overwritten += overwritten as u64;
                    break (event, overwritten);
                }

                while !state.readable && !state.stop {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                state.readable = false;
            }
        };

        // Never log with the state lock held.
        if overwritten > 0 {
            warn!(
                "{} events were overwritten before they could be shipped",
                overwritten
            );
        }
        Next::Event(event)
    }

    /// Sleeps for `timeout` unless stopped first. Returns whether to stop.
    fn sleep_unless_stopped(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| !state.stop)
            .unwrap_or_else(PoisonError::into_inner);
        state.stop
    }

    fn record_shipped(&self) {
        self.lock().stats.shipped += 1;
    }

    fn record_lost(&self) {
        self.lock().stats.lost_on_failure += 1;
    }

    /// Drops whatever is still queued, returning how many events that was.
    fn discard_pending(&self) -> u64 {
        let mut state = self.lock();
        let mut discarded = 0;
        state.stats.overwritten += state.events.overflow() as u64;
        while state.events.pop().is_ok() {
            discarded += 1;
        }
        state.stats.discarded_on_close += discarded;
        discarded
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Drain<C> {
    connector: C,
    shared: Arc<Shared>,
    backoff: Duration,
}

impl<C: Connector> Drain<C> {
    fn run(self) {
        info!("Starting log shipper");

        'connect: loop {
            info!("Establishing connection to: {}", self.connector.destination());
            let mut connection = match self.connector.connect() {
                Ok(connection) => connection,
                Err(err) => {
                    warn!("Error {}, sleeping for {:?}", err, self.backoff);
                    if self.shared.sleep_unless_stopped(self.backoff) {
                        break;
                    }
                    continue;
                }
            };
            info!("Connection established");

            loop {
                let event = match self.shared.next_event() {
                    Next::Event(event) => event,
                    Next::Stop => break 'connect,
                };

                trace!("Shipping event of {} bytes", event.len());
                if let Err(err) = ship(&mut connection, &event) {
                    // The event is not requeued.
                    warn!("Write failed: {}", err);
                    self.shared.record_lost();
                    continue 'connect;
                }
                self.shared.record_shipped();
            }
        }

        let discarded = self.shared.discard_pending();
        if discarded > 0 {
            warn!("Discarding {} queued events", discarded);
        }
        info!("Log shipper exiting");
    }
}

fn ship<W: Write>(connection: &mut W, event: &[u8]) -> io::Result<()> {
    connection.write_all(event)?;
    connection.flush()
}
