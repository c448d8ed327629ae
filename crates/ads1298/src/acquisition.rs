//! Acquisition path run on every data-ready edge.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use flume::{Sender, TrySendError};
use log::{error, trace, warn};

use exg_types::{frame_len, FrameError, FrameEvent};

use crate::codec::decode_frame;
use crate::spi_bus::SpiBus;
use crate::types::SharedState;

/// A consumer of frame events.
///
/// Subscribers are called on the data-ready context and must return
/// quickly; a channel subscriber never blocks the read path.
#[derive(Clone)]
pub enum Subscriber {
    Callback(Arc<dyn Fn(&FrameEvent) + Send + Sync>),
    Channel(Sender<FrameEvent>),
}

impl Subscriber {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        Subscriber::Callback(Arc::new(f))
    }

    pub fn channel(tx: Sender<FrameEvent>) -> Self {
        Subscriber::Channel(tx)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscriber::Callback(_) => f.write_str("Subscriber::Callback"),
            Subscriber::Channel(tx) => write!(f, "Subscriber::Channel(len={})", tx.len()),
        }
    }
}

impl From<Sender<FrameEvent>> for Subscriber {
    fn from(tx: Sender<FrameEvent>) -> Self {
        Subscriber::Channel(tx)
    }
}

/// Append-only, ordered list of subscribers.
///
/// Dispatch walks a snapshot, so a subscriber may register others from the
/// data-ready context; they receive events from the next frame on.
#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: RwLock<Arc<[Subscriber]>>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self {
            subscribers: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Subscriber) {
        let mut current = self.subscribers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = current.to_vec();
        next.push(subscriber);
        *current = Arc::from(next);
    }

    fn snapshot(&self) -> Arc<[Subscriber]> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every subscriber in registration order.
    pub fn dispatch(&self, event: &FrameEvent) {
        for subscriber in self.snapshot().iter() {
            match subscriber {
                Subscriber::Callback(f) => f(event),
                Subscriber::Channel(tx) => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => warn!("Subscriber channel full, event dropped"),
                    // The consumer went away; its lifetime is not ours to manage.
                    Err(TrySendError::Disconnected(_)) => trace!("Subscriber channel disconnected"),
                },
            }
        }
    }
}

/// Counters maintained by the acquisition path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Frames decoded into samples
    pub frames_decoded: u64,
    /// Frames that failed to decode (length or sync)
    pub frames_rejected: u64,
    /// Bus reads that failed
    pub read_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    rejected: AtomicU64,
    read_failures: AtomicU64,
}

/// Reads, decodes and fans out one frame per data-ready edge.
pub struct AcquisitionPipeline {
    bus: Arc<SpiBus>,
    state: Arc<SharedState>,
    subscribers: Arc<SubscriberRegistry>,
    channel_count: usize,
    counters: Counters,
}

impl AcquisitionPipeline {
    pub fn new(
        bus: Arc<SpiBus>,
        state: Arc<SharedState>,
        subscribers: Arc<SubscriberRegistry>,
        channel_count: usize,
    ) -> Self {
        Self {
            bus,
            state,
            subscribers,
            channel_count,
            counters: Counters::default(),
        }
    }

    /// Handle one data-ready edge.
    ///
    /// Does nothing unless the device is streaming. Errors never escape:
    /// they are counted and delivered to subscribers as `FrameEvent::Error`.
    pub fn on_data_ready(&self) {
        if !self.state.is_streaming() {
            return;
        }

        let event = match self.bus.read_frame(frame_len(self.channel_count)) {
            Ok(frame) => match decode_frame(&frame, self.channel_count) {
                Ok(sample) => {
                    self.counters.decoded.fetch_add(1, Ordering::Relaxed);
                    FrameEvent::Sample(sample)
                }
                Err(e) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    trace!("Frame rejected: {}", e);
                    FrameEvent::Error(e)
                }
            },
            Err(e) => {
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                error!("Error reading frame in data-ready handler: {}", e);
                FrameEvent::Error(FrameError::ReadFailed(e.to_string()))
            }
        };

        self.subscribers.dispatch(&event);
    }

    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            frames_decoded: self.counters.decoded.load(Ordering::Relaxed),
            frames_rejected: self.counters.rejected.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_hal::MockSpi;
    use crate::types::DeviceState;
    use std::sync::Mutex;

    fn pipeline(spi: &MockSpi, channels: usize) -> (AcquisitionPipeline, Arc<SharedState>, Arc<SubscriberRegistry>) {
        let bus = Arc::new(SpiBus::new(Box::new(spi.clone())));
        let state = Arc::new(SharedState::new(DeviceState::Streaming));
        let registry = Arc::new(SubscriberRegistry::new());
        (AcquisitionPipeline::new(bus, state.clone(), registry.clone(), channels), state, registry)
    }

    #[test]
    fn ignores_edges_when_not_streaming() {
        let spi = MockSpi::new();
        let (pipeline, state, registry) = pipeline(&spi, 2);
        let (tx, rx) = flume::unbounded();
        registry.register(tx.into());

        state.set(DeviceState::Idle);
        pipeline.on_data_ready();

        assert!(spi.transactions().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatches_in_registration_order() {
        let spi = MockSpi::new();
        spi.push_frame(vec![0xC0, 0, 0, 0, 0, 1, 0, 0, 2]);
        let (pipeline, _state, registry) = pipeline(&spi, 2);

        let order = Arc::new(Mutex::new(Vec::new()));
        for id in 0..3 {
            let order = order.clone();
            registry.register(Subscriber::callback(move |event| {
                assert!(event.sample().is_some());
                order.lock().unwrap().push(id);
            }));
        }

        pipeline.on_data_ready();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(spi.transactions(), vec![vec![0u8; 9]]);
    }

    #[test]
    fn out_of_sync_frame_is_reported_and_next_frame_decodes() {
        let spi = MockSpi::new();
        spi.push_frame(vec![0x00; 6]);
        spi.push_frame(vec![0xC0, 0x10, 0x00, 0x00, 0x00, 0x01]);
        let (pipeline, _state, registry) = pipeline(&spi, 1);
        let (tx, rx) = flume::unbounded();
        registry.register(Subscriber::channel(tx));

        pipeline.on_data_ready();
        pipeline.on_data_ready();

        assert_eq!(
            rx.try_recv().unwrap(),
            FrameEvent::Error(FrameError::OutOfSync { status_word: 0 })
        );
        let sample = rx.try_recv().unwrap().sample().cloned().unwrap();
        assert_eq!(sample.lead_off_positive, 0x01);
        assert_eq!(sample.channel_values.len(), 1);

        assert_eq!(
            pipeline.stats(),
            AcquisitionStats { frames_decoded: 1, frames_rejected: 1, read_failures: 0 }
        );
    }

    #[test]
    fn bus_failure_becomes_read_failed_event() {
        let spi = MockSpi::new();
        spi.fail_transfers(true);
        let (pipeline, _state, registry) = pipeline(&spi, 4);
        let (tx, rx) = flume::unbounded();
        registry.register(tx.into());

        pipeline.on_data_ready();

        assert!(matches!(rx.try_recv(), Ok(FrameEvent::Error(FrameError::ReadFailed(_)))));
        assert_eq!(pipeline.stats().read_failures, 1);
    }

    #[test]
    fn subscriber_can_register_another_from_the_ready_context() {
        let spi = MockSpi::new();
        spi.push_frame(vec![0xC0, 0, 0, 0, 0, 0]);
        spi.push_frame(vec![0xC0, 0, 0, 0, 0, 0]);
        let (pipeline, _state, registry) = pipeline(&spi, 1);
        let (tx, rx) = flume::unbounded();

        let late = Mutex::new(Some(tx));
        let inner_registry = registry.clone();
        registry.register(Subscriber::callback(move |_| {
            if let Some(tx) = late.lock().unwrap().take() {
                inner_registry.register(Subscriber::channel(tx));
            }
        }));

        pipeline.on_data_ready();
        assert_eq!(registry.len(), 2);
        assert!(rx.try_recv().is_err(), "a new subscriber starts with the next frame");

        pipeline.on_data_ready();
        assert!(rx.try_recv().unwrap().sample().is_some());
    }

    #[test]
    fn full_or_closed_channels_do_not_block_others() {
        let spi = MockSpi::new();
        spi.push_frame(vec![0xC0, 0, 0, 0, 0, 0]);
        spi.push_frame(vec![0xC0, 0, 0, 0, 0, 0]);
        let (pipeline, _state, registry) = pipeline(&spi, 1);

        let (full_tx, _full_rx) = flume::bounded(1);
        let (closed_tx, closed_rx) = flume::unbounded();
        drop(closed_rx);
        let (tx, rx) = flume::unbounded();
        registry.register(full_tx.into());
        registry.register(closed_tx.into());
        registry.register(tx.into());

        pipeline.on_data_ready();
        pipeline.on_data_ready();

        assert_eq!(rx.len(), 2);
        assert_eq!(registry.len(), 3);
    }
}
