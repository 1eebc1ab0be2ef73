//! Per-device connection lifecycle: background connect/retry, fire-and-forget
//! pixel sends, and an idempotent close that powers the controller off once.

use super::backoff::Backoff;
use super::control::DeviceControl;
use super::ddp;
use crate::error::ProtocolError;
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed; no connect requested yet.
    Idle,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Outcome of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Not connected (or closed), or the socket would block. The frame is gone.
    Dropped,
}

struct Inner {
    state: ClientState,
    socket: Option<UdpSocket>,
    target: Option<SocketAddr>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ProtocolClient {
    host: String,
    port: u16,
    control: Arc<dyn DeviceControl>,
    backoff: Backoff,
    /// Configured size, compared against what the controller reports.
    led_count: Option<u32>,
    inner: Arc<Mutex<Inner>>,
    cancel: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    /// Teardown of the client this one replaces; joined before the first handshake.
    previous: Option<JoinHandle<()>>,
}

impl ProtocolClient {
    pub fn new(host: &str, port: u16, control: Arc<dyn DeviceControl>, backoff: Backoff) -> Self {
        Self {
            host: host.to_string(),
            port,
            control,
            backoff,
            led_count: None,
            inner: Arc::new(Mutex::new(Inner {
                state: ClientState::Idle,
                socket: None,
                target: None,
            })),
            cancel: None,
            worker: None,
            previous: None,
        }
    }

    pub fn with_led_count(mut self, led_count: u32) -> Self {
        self.led_count = Some(led_count);
        self
    }

    /// Hold the first handshake until `teardown` (the old client's close) has
    /// finished, so its power-off cannot land after our power-on.
    pub fn replacing(mut self, teardown: Option<JoinHandle<()>>) -> Self {
        self.previous = teardown;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ClientState {
        lock(&self.inner).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Start the connect loop unless one is already running or has succeeded.
    pub fn ensure_connected(&mut self) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != ClientState::Idle {
                return;
            }
            inner.state = ClientState::Connecting;
        }

        let (tx_cancel, rx_cancel) = mpsc::channel();
        let host = self.host.clone();
        let port = self.port;
        let control = Arc::clone(&self.control);
        let backoff = self.backoff;
        let led_count = self.led_count;
        let inner = Arc::clone(&self.inner);
        let previous = self.previous.take();

        let worker = thread::Builder::new()
            .name(format!("ddp-connect-{}", host))
            .spawn(move || {
                if let Some(teardown) = previous {
                    let _ = teardown.join();
                }
                let mut attempt: u32 = 0;
                loop {
                    match rx_cancel.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => return,
                        Err(TryRecvError::Empty) => {}
                    }

                    attempt += 1;
                    match handshake(&host, port, led_count, control.as_ref()) {
                        Ok((socket, target)) => {
                            let mut guard = lock(&inner);
                            if guard.state == ClientState::Connecting {
                                guard.socket = Some(socket);
                                guard.target = Some(target);
                                guard.state = ClientState::Connected;
                                info!("[DDP] Connected to {}:{} after {} attempt(s)", host, port, attempt);
                            }
                            return;
                        }
                        Err(e) => {
                            let delay = backoff.delay(attempt);
                            warn!(
                                "[DDP] Connect to {}:{} failed (attempt {}): {}. Retrying in {} ms",
                                host,
                                port,
                                attempt,
                                e,
                                delay.as_millis()
                            );
                            match rx_cancel.recv_timeout(delay) {
                                Err(RecvTimeoutError::Timeout) => continue,
                                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                            }
                        }
                    }
                }
            });

        match worker {
            Ok(handle) => {
                self.cancel = Some(tx_cancel);
                self.worker = Some(handle);
            }
            Err(e) => {
                warn!("[DDP] Could not spawn connect thread for {}:{}: {}", self.host, self.port, e);
                lock(&self.inner).state = ClientState::Idle;
            }
        }
    }

    /// Push one frame. Never blocks and never waits for the device.
    pub fn send(&self, rgb: &[u8]) -> Result<Delivery, ProtocolError> {
        let inner = lock(&self.inner);
        if inner.state != ClientState::Connected {
            return Ok(Delivery::Dropped);
        }
        let (Some(socket), Some(target)) = (inner.socket.as_ref(), inner.target) else {
            return Ok(Delivery::Dropped);
        };

        let packet = ddp::encode_packet(rgb)?;
        match socket.send_to(&packet, target) {
            Ok(_) => Ok(Delivery::Sent),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Delivery::Dropped),
            Err(e) => Err(e.into()),
        }
    }

    /// Separate control call; failures are reported, not retried.
    pub fn set_brightness(&self, value: i32) -> Result<(), ProtocolError> {
        let clamped = value.clamp(0, 255) as u8;
        self.control.set_brightness(clamped)?;
        Ok(())
    }

    pub fn control(&self) -> Arc<dyn DeviceControl> {
        Arc::clone(&self.control)
    }

    /// Idempotent. Sends stop and the socket is released before this returns.
    /// Cancelling the connect loop and powering the device off happen on a
    /// teardown thread, whose handle is returned on the first call only.
    pub fn close(&mut self) -> Option<JoinHandle<()>> {
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                ClientState::Closing | ClientState::Closed => return None,
                _ => inner.state = ClientState::Closing,
            }
            inner.socket = None;
            inner.target = None;
        }

        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let worker = self.worker.take();
        let previous = self.previous.take();
        let control = Arc::clone(&self.control);
        let inner = Arc::clone(&self.inner);
        let label = format!("{}:{}", self.host, self.port);

        let teardown = thread::Builder::new()
            .name(format!("ddp-close-{}", self.host))
            .spawn(move || {
                for handle in [previous, worker].into_iter().flatten() {
                    let _ = handle.join();
                }
                if let Err(e) = control.power_off() {
                    debug!("[DDP] Power off for {} failed: {}", label, e);
                }
                lock(&inner).state = ClientState::Closed;
                info!("[DDP] Closed {}", label);
            });

        match teardown {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("[DDP] Could not spawn teardown thread for {}:{}: {}", self.host, self.port, e);
                lock(&self.inner).state = ClientState::Closed;
                None
            }
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn handshake(
    host: &str,
    port: u16,
    led_count: Option<u32>,
    control: &dyn DeviceControl,
) -> Result<(UdpSocket, SocketAddr), ProtocolError> {
    let target = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ProtocolError::Resolve {
            host: host.to_string(),
            port,
        })?;

    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)?;
    socket.set_nonblocking(true)?;

    let device = control.info()?;
    info!("[DDP] {}:{} is \"{}\" with {} LEDs", host, port, device.name, device.led_count);
    if let Some(expected) = led_count {
        if expected != device.led_count {
            warn!(
                "[DDP] {}:{} reports {} LEDs but {} are configured",
                host, port, device.led_count, expected
            );
        }
    }

    control.power_on()?;
    Ok((socket, target))
}
