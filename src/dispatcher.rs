//! Single-threaded dispatch loop: raw frames in, reconstructed messages
//! out.
//!
//! All correlator and buffer state is owned by one thread; the only shared
//! objects are the two bounded channels and the counters. The producer
//! side never blocks (overflow drops frames and counts them), the consumer
//! side applies backpressure (a full message queue stalls the dispatcher,
//! a closed one shuts it down).

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::correlator::Correlator;
use crate::message::CapturedMessage;
use crate::protocol;

/// Dispatcher settings, already resolved from config + CLI.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub monitored_port: u16,
    /// Message expiration interval in seconds.
    pub expiration: f64,
    pub packet_queue_capacity: usize,
    pub message_queue_capacity: usize,
}

/// Shared run counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct Counters {
    pub frames: AtomicU64,
    pub decode_errors: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub messages_emitted: AtomicU64,
    pub messages_truncated: AtomicU64,
}

/// Handle held by the owner: feed frames, read messages, shut down.
pub struct DispatcherHandle {
    packet_tx: Sender<Vec<u8>>,
    pub messages: Receiver<CapturedMessage>,
    pub counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Producer side: enqueue one raw frame. A full queue drops the frame
    /// and counts it rather than stalling the capture loop.
    pub fn feed(&self, frame: Vec<u8>) {
        match self.packet_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Stop accepting new frames, drain the queue, flush every buffer as
    /// on expiration, close the message queue, and join the thread.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the dispatcher thread.
pub fn spawn(config: DispatcherConfig) -> DispatcherHandle {
    let (packet_tx, packet_rx) = bounded::<Vec<u8>>(config.packet_queue_capacity);
    let (message_tx, message_rx) = bounded::<CapturedMessage>(config.message_queue_capacity);
    let counters = Arc::new(Counters::default());
    let running = Arc::new(AtomicBool::new(true));

    let thread_counters = counters.clone();
    let thread_running = running.clone();
    let handle = thread::Builder::new()
        .name("httptap-dispatcher".into())
        .spawn(move || {
            let mut dispatcher = Dispatcher {
                monitored_port: config.monitored_port,
                correlator: Correlator::new(config.expiration),
                message_tx,
                counters: thread_counters,
                epoch: Instant::now(),
            };
            dispatcher.run(packet_rx, &thread_running, config.expiration);
        })
        .expect("failed to spawn dispatcher thread");

    DispatcherHandle {
        packet_tx,
        messages: message_rx,
        counters,
        running,
        thread: Some(handle),
    }
}

struct Dispatcher {
    monitored_port: u16,
    correlator: Correlator,
    message_tx: Sender<CapturedMessage>,
    counters: Arc<Counters>,
    epoch: Instant,
}

impl Dispatcher {
    fn run(&mut self, packet_rx: Receiver<Vec<u8>>, running: &AtomicBool, expiration: f64) {
        // Sweep at half the expiration interval so a message is overdue by
        // at most half an interval before it is flushed.
        let sweep_every = Duration::from_secs_f64((expiration / 2.0).clamp(0.01, 1.0));
        let recv_timeout = sweep_every.min(Duration::from_millis(50));
        let mut last_sweep = Instant::now();

        loop {
            if !running.load(Ordering::SeqCst) {
                // Drain whatever the producer managed to enqueue.
                while let Ok(frame) = packet_rx.try_recv() {
                    if !self.handle_frame(&frame) {
                        return;
                    }
                }
                break;
            }

            match packet_rx.recv_timeout(recv_timeout) {
                Ok(frame) => {
                    if !self.handle_frame(&frame) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if last_sweep.elapsed() >= sweep_every {
                let now = self.now();
                let expired = self.correlator.expire(now);
                if !expired.is_empty() {
                    tracing::debug!(
                        flushed = expired.len(),
                        active = self.correlator.len(),
                        "expiration sweep"
                    );
                }
                if !self.emit_all(expired) {
                    return;
                }
                last_sweep = Instant::now();
            }
        }

        let flushed = self.correlator.flush();
        let _ = self.emit_all(flushed);
        tracing::debug!("dispatcher shut down");
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Returns false when the sink has closed and the loop must end.
    fn handle_frame(&mut self, frame: &[u8]) -> bool {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        match protocol::decode_packet(frame, self.monitored_port) {
            Ok(Some(pkt)) => {
                let emitted = self.correlator.process_packet(self.now(), &pkt);
                self.emit_all(emitted)
            }
            Ok(None) => true,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(error = %e, "dropped undecodable frame");
                true
            }
        }
    }

    fn emit_all(&mut self, messages: Vec<CapturedMessage>) -> bool {
        for message in messages {
            self.counters.messages_emitted.fetch_add(1, Ordering::Relaxed);
            if message.truncated {
                self.counters.messages_truncated.fetch_add(1, Ordering::Relaxed);
            }
            // Blocking send is the backpressure: a slow consumer stalls the
            // whole pipeline rather than losing completed messages.
            if self.message_tx.send(message).is_err() {
                tracing::error!("message sink closed, shutting down dispatcher");
                return false;
            }
        }
        true
    }
}
