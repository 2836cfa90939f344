//! Batched delivery of scan results.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{self, Poll};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use futures_core::Stream;
use futures_timer::Delay;
use log::{debug, info, warn};

use crate::error::{ErrorKind, NativeError};
use crate::native::{NativeStack, ScanCallback};
use crate::types::{AdapterState, ScanResult};
use crate::{Error, Result};

/// Flush interval used when the caller has no particular preference.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

enum ScanEvent {
    Result(ScanResult),
    Failed(i32),
    AdapterState(AdapterState),
}

/// The scan callback registered with the native stack; forwards events to the stream.
struct ScanForwarder {
    sender: Sender<ScanEvent>,
}

impl ScanCallback for ScanForwarder {
    fn on_scan_result(&self, result: ScanResult) {
        let _ = self.sender.try_send(ScanEvent::Result(result));
    }

    fn on_scan_failed(&self, error_code: i32) {
        let _ = self.sender.try_send(ScanEvent::Failed(error_code));
    }

    fn on_adapter_state_changed(&self, state: AdapterState) {
        let _ = self.sender.try_send(ScanEvent::AdapterState(state));
    }
}

/// Stops the native scan when dropped.
struct ScanRegistration {
    native: Arc<dyn NativeStack>,
    callback: Arc<dyn ScanCallback>,
    active: Arc<AtomicBool>,
}

impl Drop for ScanRegistration {
    fn drop(&mut self) {
        debug!("stopping scan");
        self.native.stop_scan(&self.callback);
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Registers a scan callback and returns the stream of batches.
///
/// `active` is the scanner's busy flag; it must already be set and is cleared when the
/// stream is dropped or ends.
pub(crate) fn start_scan(
    native: Arc<dyn NativeStack>,
    active: Arc<AtomicBool>,
    flush_interval: Duration,
    emit_empty_batches: bool,
) -> Result<ScanBatches> {
    let (sender, receiver) = async_channel::unbounded();
    let callback: Arc<dyn ScanCallback> = Arc::new(ScanForwarder { sender });
    if !native.start_scan(callback.clone()) {
        active.store(false, Ordering::SeqCst);
        return Err(Error::new(
            ErrorKind::Internal,
            Some(NativeError::CallReturnedFalse),
            "the native stack refused to start scanning",
        ));
    }
    info!("scan started, flushing every {flush_interval:?}");
    let next_flush = Instant::now() + flush_interval;
    Ok(ScanBatches {
        events: Box::pin(receiver),
        buffer: Vec::new(),
        interval: flush_interval,
        next_flush,
        delay: Delay::new(flush_interval),
        emit_empty_batches,
        registration: Some(ScanRegistration {
            native,
            callback,
            active,
        }),
    })
}

/// Ordered batches of scan results, one every flush interval.
///
/// Ends after yielding an error if the adapter is turned off or the native scan fails.
/// Dropping the stream stops the native scan.
pub struct ScanBatches {
    events: Pin<Box<Receiver<ScanEvent>>>,
    buffer: Vec<ScanResult>,
    interval: Duration,
    next_flush: Instant,
    delay: Delay,
    emit_empty_batches: bool,
    registration: Option<ScanRegistration>,
}

impl ScanBatches {
    /// Whether the native scan is still registered.
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
    }

    /// Stops the native scan; the stream yields nothing more.
    pub fn stop(&mut self) {
        self.buffer.clear();
        self.registration.take();
    }

    fn finish(&mut self, error: Error) -> Error {
        warn!("scan aborted: {error}");
        self.stop();
        error
    }
}

impl std::fmt::Debug for ScanBatches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanBatches")
            .field("interval", &self.interval)
            .field("buffered", &self.buffer.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Stream for ScanBatches {
    type Item = Result<Vec<ScanResult>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.registration.is_none() {
            return Poll::Ready(None);
        }
        loop {
            match this.events.as_mut().poll_next(cx) {
                Poll::Ready(Some(ScanEvent::Result(result))) => this.buffer.push(result),
                Poll::Ready(Some(ScanEvent::Failed(code))) => {
                    let error = this.finish(NativeError::ScanFailed(code).into());
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(Some(ScanEvent::AdapterState(state))) => {
                    if matches!(state, AdapterState::Off | AdapterState::TurningOff) {
                        let error = this.finish(ErrorKind::BluetoothIsTurnedOff.into());
                        return Poll::Ready(Some(Err(error)));
                    }
                }
                Poll::Ready(None) => {
                    this.stop();
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }
        loop {
            match Pin::new(&mut this.delay).poll(cx) {
                Poll::Ready(()) => {
                    let now = Instant::now();
                    this.next_flush += this.interval;
                    if this.next_flush <= now {
                        // the consumer fell behind by more than a tick
                        this.next_flush = now + this.interval;
                    }
                    this.delay.reset(this.next_flush - now);
                    let batch = std::mem::take(&mut this.buffer);
                    if batch.is_empty() && !this.emit_empty_batches {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(batch)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
