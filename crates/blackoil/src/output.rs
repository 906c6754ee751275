//! Report step snapshots and where they go.

use std::{
    sync::mpsc::{sync_channel, SyncSender},
    thread::JoinHandle,
};

use nalgebra::DVector;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

use crate::{fip::FluidInPlace, Error};

/// State at the end of a report step.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    pub report_step: usize,
    /// simulated time, s
    pub time: f64,
    pub pressure: DVector<f64>,
    /// water, oil, gas
    pub saturation: [DVector<f64>; 3],
    pub rs: DVector<f64>,
    pub rv: DVector<f64>,
    pub bhp: DVector<f64>,
    /// phase-major over the wells, positive into the reservoir
    pub surface_rates: DVector<f64>,
    pub fluid_in_place: Option<Vec<FluidInPlace>>,
}

pub trait SnapshotSink {
    fn write(&mut self, snapshot: StateSnapshot) -> Result<(), Error>;

    /// Called once after the last report step.
    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Keeps every snapshot in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub snapshots: Vec<StateSnapshot>,
}

impl SnapshotSink for MemorySink {
    fn write(&mut self, snapshot: StateSnapshot) -> Result<(), Error> {
        self.snapshots.push(snapshot);
        Ok(())
    }
}

/// Hands snapshots to a sink running on a background thread.
///
/// The queue holds at most `capacity` snapshots; `write` blocks while it is full.
pub struct AsyncSnapshotWriter<S: SnapshotSink + Send + 'static> {
    sender: Option<SyncSender<StateSnapshot>>,
    handle: Option<JoinHandle<Result<S, Error>>>,
}

impl<S: SnapshotSink + Send + 'static> AsyncSnapshotWriter<S> {
    pub fn new(mut sink: S, capacity: usize) -> Self {
        let (sender, receiver) = sync_channel::<StateSnapshot>(capacity);
        let handle = std::thread::spawn(move || {
            for snapshot in receiver {
                let step = snapshot.report_step;
                sink.write(snapshot)?;
                log::trace!("snapshot of report step {step} written");
            }
            sink.finish()?;
            Ok(sink)
        });
        AsyncSnapshotWriter {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Waits for the queue to drain and returns the sink.
    pub fn into_inner(mut self) -> Result<S, Error> {
        self.join()
    }

    fn join(&mut self) -> Result<S, Error> {
        drop(self.sender.take());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Output("snapshot writer thread panicked".into()))?,
            None => Err(Error::Output("snapshot writer already finished".into())),
        }
    }
}

impl<S: SnapshotSink + Send + 'static> SnapshotSink for AsyncSnapshotWriter<S> {
    fn write(&mut self, snapshot: StateSnapshot) -> Result<(), Error> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::Output("snapshot writer already finished".into()))?;
        if sender.send(snapshot).is_err() {
            // the thread only hangs up after a failed write
            return self.join().map(|_| ());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.join().map(|_| ())
    }
}

impl<S: SnapshotSink + Send + 'static> Drop for AsyncSnapshotWriter<S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.join() {
                log::warn!("{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(step: usize) -> StateSnapshot {
        StateSnapshot {
            report_step: step,
            time: step as f64,
            pressure: DVector::zeros(2),
            saturation: [DVector::zeros(2), DVector::zeros(2), DVector::zeros(2)],
            rs: DVector::zeros(2),
            rv: DVector::zeros(2),
            bhp: DVector::zeros(0),
            surface_rates: DVector::zeros(0),
            fluid_in_place: None,
        }
    }

    #[test]
    fn test_async_writer_keeps_order() {
        let mut writer = AsyncSnapshotWriter::new(MemorySink::default(), 1);
        for step in 0..5 {
            writer.write(snapshot(step)).unwrap();
        }
        let sink = writer.into_inner().unwrap();
        let steps: Vec<usize> = sink.snapshots.iter().map(|s| s.report_step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
    }

    struct Failing;

    impl SnapshotSink for Failing {
        fn write(&mut self, _snapshot: StateSnapshot) -> Result<(), Error> {
            Err(Error::Output("disk full".into()))
        }
    }

    #[test]
    fn test_async_writer_reports_sink_error() {
        let mut writer = AsyncSnapshotWriter::new(Failing, 4);
        // the error surfaces on a later write or at the end
        let first = writer.write(snapshot(0));
        let end = writer.finish();
        assert!(first.is_err() || end.is_err());
    }
}
