//! Copies child output to the local stdio streams and the log shipper.

use std::{
    io::{self, Read, Write},
    sync::mpsc::Sender,
    thread::{self, JoinHandle},
};

use crate::shipper::ShipperWriter;

/// Writes everything to a local stream and, if shipping, to the shipper.
///
/// A failing local stream is dropped after logging, shipping carries on.
pub struct Tee<L> {
    name: &'static str,
    local: Option<L>,
    remote: Option<ShipperWriter>,
}

impl<L: Write> Tee<L> {
    pub fn new(name: &'static str, local: L, remote: Option<ShipperWriter>) -> Self {
        Self {
            name,
            local: Some(local),
            remote,
        }
    }

    fn write_local(&mut self, buf: &[u8]) {
        if let Some(local) = self.local.as_mut() {
            // Flushed per chunk: the supervisor may exit without unwinding.
            if let Err(err) = local.write_all(buf).and_then(|_| local.flush()) {
                warn!("Couldn't mirror {} locally, disabling: {}", self.name, err);
                self.local = None;
            }
        }
    }
}

impl<L: Write> Write for Tee<L> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_local(buf);
        if let Some(remote) = self.remote.as_mut() {
            remote.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(local) = self.local.as_mut() {
            local.flush()?;
        }
        Ok(())
    }
}

/// Starts a thread relaying `source` into `sink` until end of stream.
///
/// The thread sends `name` on `done` when it finishes.
pub fn spawn<R, L>(
    name: &'static str,
    mut source: R,
    mut sink: Tee<L>,
    done: Sender<&'static str>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    L: Write + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-relay", name))
        .spawn(move || {
            match io::copy(&mut source, &mut sink) {
                Ok(bytes) => debug!("Relayed {} bytes of {}", bytes, name),
                Err(err) => warn!("Relaying {} failed: {}", name, err),
            }
            let _ = done.send(name);
        })
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor, Write},
        sync::{mpsc, Arc, Mutex},
        time::Duration,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn relays_to_the_local_stream_and_signals_completion() {
        let local = Shared::default();
        let (tx, rx) = mpsc::channel();

        let handle = spawn(
            "stdout",
            Cursor::new(b"hello\nworld\n".to_vec()),
            Tee::new("stdout", local.clone(), None),
            tx,
        )
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("stdout"));
        handle.join().unwrap();
        assert_eq!(&*local.0.lock().unwrap(), b"hello\nworld\n");
    }

    #[test]
    fn broken_local_stream_is_dropped() {
        let mut tee = Tee::new("stderr", Broken, None);
        assert_eq!(tee.write(b"one").unwrap(), 3);
        assert!(tee.local.is_none());
        assert_eq!(tee.write(b"two").unwrap(), 3);
    }
}
