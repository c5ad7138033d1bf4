use crate::error::EisError;
use crate::framing;
use crate::instrument::Instrument;
use crate::scheduler::{SweepControl, SweepScheduler};
use crate::sink::ResultSink;
use crate::types::{ControlCommand, ImpedanceSample, SweepResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Streaming session socket behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long one blocking command wait lasts before reporting `Idle`, ms.
    pub command_wait_ms: u64,
    /// Detect STOP by byte-literal substring containment instead of exact
    /// command match. Only for compatibility with legacy peers; a data
    /// payload containing the literal text would falsely trigger an abort.
    pub legacy_substring_stop: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_wait_ms: 1_000,
            legacy_substring_stop: false,
        }
    }
}

/// What a blocking command wait produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Command(ControlCommand),
    /// The wait window elapsed with no bytes.
    Idle,
    /// Peer half-closed the socket.
    Disconnected,
}

/// One peer connection: frames accepted samples outward and watches the same
/// socket for control bytes, without a dedicated thread. The apparent
/// concurrency comes from alternating the socket between blocking (command
/// wait) and non-blocking (between-step STOP peek) modes.
pub struct StreamingSession {
    stream: TcpStream,
    peer: SocketAddr,
    config: SessionConfig,
}

impl StreamingSession {
    pub fn new(stream: TcpStream, config: SessionConfig) -> Result<Self, EisError> {
        let peer = stream
            .peer_addr()
            .map_err(|e| EisError::io(e, "resolving peer address"))?;
        stream
            .set_read_timeout(Some(Duration::from_millis(config.command_wait_ms)))
            .map_err(|e| EisError::io(e, "setting command wait timeout"))?;
        Ok(Self {
            stream,
            peer,
            config,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Block for up to the configured wait for one control command.
    pub fn wait_command(&mut self) -> Result<ControlEvent, EisError> {
        let mut buffer = [0u8; 1024];
        match self.stream.read(&mut buffer) {
            Ok(0) => Ok(ControlEvent::Disconnected),
            Ok(n) => Ok(ControlEvent::Command(ControlCommand::parse(&buffer[..n]))),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(ControlEvent::Idle)
            }
            Err(e) => Err(EisError::io(e, "waiting for control command")),
        }
    }

    /// Non-blocking peek for STOP or disconnect between ladder steps. Never
    /// stalls the sweep; any socket problem maps to `Disconnect` rather than
    /// an error so the scheduler can wind down cleanly.
    pub fn poll_control(&mut self) -> SweepControl {
        if self.stream.set_nonblocking(true).is_err() {
            return SweepControl::Disconnect;
        }

        let mut buffer = [0u8; 1024];
        let control = match self.stream.read(&mut buffer) {
            Ok(0) => SweepControl::Disconnect,
            Ok(n) => {
                let stop = if self.config.legacy_substring_stop {
                    ControlCommand::contains_stop(&buffer[..n])
                } else {
                    ControlCommand::parse(&buffer[..n]) == ControlCommand::Stop
                };
                if stop {
                    SweepControl::Stop
                } else {
                    debug!("ignoring mid-sweep bytes from {}", self.peer);
                    SweepControl::Continue
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => SweepControl::Continue,
            Err(_) => SweepControl::Disconnect,
        };

        if self.stream.set_nonblocking(false).is_err() {
            return SweepControl::Disconnect;
        }
        control
    }

    /// Frame and transmit one accepted sample.
    pub fn send_sample(&mut self, sample: &ImpedanceSample) -> Result<(), EisError> {
        framing::write_frame(&mut self.stream, std::slice::from_ref(sample))
    }

    /// Frame and transmit a whole finalized result buffer in one frame.
    pub fn send_result(&mut self, result: &SweepResult) -> Result<(), EisError> {
        framing::write_frame(&mut self.stream, result.rows())
    }
}

/// Accept loop owning the listening socket. One peer at a time; a dead
/// session sends the server back to standby.
pub struct SweepServer {
    listener: TcpListener,
    session_config: SessionConfig,
}

impl SweepServer {
    pub fn bind(address: &str, session_config: SessionConfig) -> Result<Self, EisError> {
        let listener = TcpListener::bind(address)
            .map_err(|e| EisError::io(e, format!("binding listener on {address}")))?;
        // non-blocking accept keeps the standby loop responsive to shutdown
        listener
            .set_nonblocking(true)
            .map_err(|e| EisError::io(e, "configuring listener"))?;
        Ok(Self {
            listener,
            session_config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, EisError> {
        self.listener
            .local_addr()
            .map_err(|e| EisError::io(e, "resolving listener address"))
    }

    /// Serve peers until `shutdown` is raised. Each accepted peer gets a
    /// streaming session wired to the scheduler; connection failures end
    /// that session and the server returns to standby.
    pub fn serve<I: Instrument>(
        &self,
        scheduler: &mut SweepScheduler<I>,
        sink: &mut dyn ResultSink,
        shutdown: &AtomicBool,
    ) -> Result<(), EisError> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, leaving standby");
                return Ok(());
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("client connected from {peer}");
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| EisError::io(e, "configuring peer socket"))?;
                    match StreamingSession::new(stream, self.session_config) {
                        Ok(mut session) => {
                            self.handle_peer(&mut session, scheduler, sink, shutdown);
                            info!("client session ended, returning to standby");
                        }
                        Err(e) => warn!("rejecting connection: {e}"),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Err(e) => return Err(EisError::io(e, "accepting connection")),
            }
        }
    }

    fn handle_peer<I: Instrument>(
        &self,
        session: &mut StreamingSession,
        scheduler: &mut SweepScheduler<I>,
        sink: &mut dyn ResultSink,
        shutdown: &AtomicBool,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }

            match session.wait_command() {
                Ok(ControlEvent::Idle) => {}
                Ok(ControlEvent::Disconnected) => {
                    info!("client {} disconnected", session.peer());
                    return;
                }
                Ok(ControlEvent::Command(ControlCommand::Start)) => {
                    info!("START received, beginning sweep");
                    let outcome = {
                        // split the borrows: the session is both frame writer
                        // and control source for the duration of the sweep
                        let session_cell = std::cell::RefCell::new(&mut *session);
                        scheduler.run_sweep(
                            sink,
                            |sample| session_cell.borrow_mut().send_sample(sample),
                            || {
                                if shutdown.load(Ordering::Relaxed) {
                                    SweepControl::Stop
                                } else {
                                    session_cell.borrow_mut().poll_control()
                                }
                            },
                        )
                    };
                    match outcome {
                        Ok(()) => info!("sweep ended in state {:?}", scheduler.state()),
                        Err(e) => {
                            warn!("session failed mid-sweep: {e}");
                            return;
                        }
                    }
                }
                Ok(ControlEvent::Command(ControlCommand::Stop)) => {
                    // stop with no sweep running has nothing to do
                    debug!("ignoring STOP while idle");
                }
                Ok(ControlEvent::Command(ControlCommand::Unknown(token))) => {
                    debug!("ignoring unrecognized command {token:?}");
                }
                Err(e) => {
                    warn!("control channel failed: {e}");
                    return;
                }
            }
        }
    }
}
