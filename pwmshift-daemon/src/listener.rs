//! UDP remote control.
//!
//! One datagram is one command. Datagrams are handled in arrival order on
//! the listener's thread; a SetLevels ramp finishes (or is preempted by the
//! console) before the next datagram is read.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use pwmshift_engine::{ModeController, PatternSource, RampOutcome};
use pwmshift_protocol::{Command, CommandCode, Decoded, Decoder, MAX_DATAGRAM_SIZE};

/// Datagram counters, shared with the console status screen.
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    accepted: AtomicU64,
    discarded: AtomicU64,
}

impl ListenerStats {
    /// Every datagram read from the socket.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Datagrams addressed to this instance that decoded cleanly.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Malformed or undersized datagrams.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied(CommandCode),
    NotForUs,
    Discarded,
}

pub struct RemoteListener {
    socket: UdpSocket,
    decoder: Decoder,
    controller: Arc<ModeController>,
    stats: Arc<ListenerStats>,
}

impl RemoteListener {
    /// Bind on all interfaces. Failure here is fatal for the process.
    pub fn bind(port: u16, decoder: Decoder, controller: Arc<ModeController>) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Self::from_socket(socket, decoder, controller))
    }

    pub fn from_socket(socket: UdpSocket, decoder: Decoder, controller: Arc<ModeController>) -> Self {
        Self {
            socket,
            decoder,
            controller,
            stats: Arc::new(ListenerStats::default()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Receive and apply datagrams forever.
    pub fn run(&self) -> ! {
        match self.local_addr() {
            Ok(addr) => info!(
                "Listening for {} commands on {addr} (id {})",
                self.decoder.variant(),
                self.decoder.id()
            ),
            Err(e) => warn!("Listening on unknown address: {e}"),
        }

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.receive_one(&mut buf) {
                Ok(Outcome::Applied(code)) => debug!("Applied remote {}", code.label()),
                Ok(Outcome::NotForUs | Outcome::Discarded) => {}
                Err(e) => warn!("UDP recv error: {e}"),
            }
        }
    }

    /// Block for one datagram and apply it.
    pub fn receive_one(&self, buf: &mut [u8]) -> io::Result<Outcome> {
        let (len, src) = self.socket.recv_from(buf)?;
        debug!("Datagram of {len} bytes from {src}");
        Ok(self.handle_datagram(&buf[..len]))
    }

    pub fn handle_datagram(&self, datagram: &[u8]) -> Outcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let command = match self.decoder.decode(datagram) {
            Ok(Decoded::Command(command)) => command,
            Ok(Decoded::NotForUs) => {
                debug!("Datagram not addressed to id {}", self.decoder.id());
                return Outcome::NotForUs;
            }
            Err(e) => {
                debug!("Discarding datagram: {e}");
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                return Outcome::Discarded;
            }
        };

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        let code = command.code();
        dispatch(&self.controller, command);
        Outcome::Applied(code)
    }
}

fn dispatch(controller: &ModeController, command: Command) {
    let outcome = match command {
        Command::Off => controller.off(),
        Command::SetLevels { ramp_ms, levels } => controller.set_static(levels, ramp_ms),
        Command::AutoDisable => controller.disable_auto(),
        Command::AutoPattern {
            ramp_ms,
            pattern,
            declared_steps,
        } => {
            if usize::from(declared_steps) > pattern.len() {
                debug!(
                    "Remote pattern declared {declared_steps} steps, using {}",
                    pattern.len()
                );
            }
            if let Err(e) = controller.start_pattern(pattern, ramp_ms, PatternSource::Remote) {
                error!("Remote pattern not started: {e}");
            }
            return;
        }
    };

    if outcome == RampOutcome::Cancelled {
        debug!("Remote ramp preempted by a later command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwmshift_engine::{
        color, ColorStep, ColorTriple, Intensity, ModeKind, Pattern, RecordingSink, SinkWrite, BLACK,
    };
    use pwmshift_protocol::{ProtocolVariant, TargetField};
    use std::time::{Duration, Instant};

    fn listener(variant: ProtocolVariant, id: u8) -> (RemoteListener, RecordingSink) {
        let sink = RecordingSink::new();
        let controller = Arc::new(ModeController::new(sink.clone(), 20));
        sink.clear();
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind loopback");
        let listener = RemoteListener::from_socket(socket, Decoder::new(variant, id), controller);
        (listener, sink)
    }

    fn wait_for_writes(sink: &RecordingSink, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for writes");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn bitmask_pattern_datagram(steps: u8, rest_ms: u32) -> Vec<u8> {
        let mut buf = vec![CommandCode::AutoPattern as u8];
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(steps);
        for i in 0..steps {
            buf.extend_from_slice(&[i, 255 - i, 0]);
            buf.extend_from_slice(&rest_ms.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_set_levels_over_socket() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 0);
        let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
        let datagram = Command::SetLevels {
            ramp_ms: 1000,
            levels: color(1.0, 0.0, 0.0),
        }
        .encode(TargetField::Mask(0));
        sender
            .send_to(&datagram, listener.local_addr().expect("local addr"))
            .expect("send");

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let outcome = listener.receive_one(&mut buf).expect("receive");

        assert_eq!(outcome, Outcome::Applied(CommandCode::SetLevels));
        let writes = sink.writes();
        assert_eq!(writes.len(), 200);
        assert_eq!(
            writes.last(),
            Some(&SinkWrite::Levels(color(1.0, 0.0, 0.0)))
        );
        let status = listener.controller.status();
        assert_eq!(status.base, color(1.0, 0.0, 0.0));
        assert_eq!(listener.stats().received(), 1);
        assert_eq!(listener.stats().accepted(), 1);
    }

    #[test]
    fn test_auto_disable_without_auto_is_noop() {
        let (listener, sink) = listener(ProtocolVariant::SingleId, 4);
        let datagram = Command::AutoDisable.encode(TargetField::Id(4));

        assert_eq!(
            listener.handle_datagram(&datagram),
            Outcome::Applied(CommandCode::AutoDisable)
        );
        assert!(sink.is_empty());
        assert_eq!(listener.controller.status().mode, ModeKind::Disabled);
    }

    #[test]
    fn test_oversized_pattern_runs_35_steps() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 3);

        assert_eq!(
            listener.handle_datagram(&bitmask_pattern_datagram(40, 0)),
            Outcome::Applied(CommandCode::AutoPattern)
        );
        assert_eq!(listener.controller.status().mode, ModeKind::RemotePattern);
        // One write per step with zero ramp and rest; 36 writes covers a full cycle
        wait_for_writes(&sink, 36);
        listener.controller.shutdown();

        let step_color = |i: u8| {
            ColorTriple::new(
                Intensity::from_byte(i),
                Intensity::from_byte(255 - i),
                Intensity::OFF,
            )
        };
        let writes = sink.writes();
        for i in 0..35u8 {
            assert_eq!(writes[usize::from(i)], SinkWrite::Levels(step_color(i)));
        }
        // Wrapped to the first step instead of playing record 36
        assert_eq!(writes[35], SinkWrite::Levels(step_color(0)));
        for i in 35..40u8 {
            assert!(!writes.contains(&SinkWrite::Levels(step_color(i))));
        }
    }

    #[test]
    fn test_other_target_ignored() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 5);
        let datagram = Command::SetLevels {
            ramp_ms: 0,
            levels: color(1.0, 1.0, 1.0),
        }
        .encode(TargetField::Mask(1 << 1));

        assert_eq!(listener.handle_datagram(&datagram), Outcome::NotForUs);
        assert!(sink.is_empty());
        assert_eq!(listener.stats().received(), 1);
        assert_eq!(listener.stats().accepted(), 0);
        assert_eq!(listener.stats().discarded(), 0);
    }

    #[test]
    fn test_malformed_discarded_silently() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 0);

        assert_eq!(listener.handle_datagram(&[1, 0, 0]), Outcome::Discarded);
        assert_eq!(
            listener.handle_datagram(&bitmask_pattern_datagram(0, 60_000)),
            Outcome::Discarded
        );
        let mut unknown = vec![0x42];
        unknown.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(listener.handle_datagram(&unknown), Outcome::Discarded);

        assert!(sink.is_empty());
        assert_eq!(listener.stats().discarded(), 3);
    }

    #[test]
    fn test_pattern_switch_keeps_worker_output_then_disable_restores() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 0);
        let white = Command::SetLevels {
            ramp_ms: 0,
            levels: color(1.0, 1.0, 1.0),
        };
        listener.handle_datagram(&white.encode(TargetField::Mask(0)));

        let hold = |c| {
            Command::AutoPattern {
                ramp_ms: 0,
                pattern: Pattern::new(vec![ColorStep::new(c, 60_000)]).expect("non-empty"),
                declared_steps: 1,
            }
            .encode(TargetField::Mask(0))
        };
        listener.handle_datagram(&hold(color(1.0, 0.0, 0.0)));
        wait_for_writes(&sink, 2);
        listener.handle_datagram(&hold(color(0.0, 0.0, 1.0)));
        wait_for_writes(&sink, 3);

        // Stopping the red worker did not fade back to white
        assert_eq!(
            sink.writes()[1..3],
            [
                SinkWrite::Levels(color(1.0, 0.0, 0.0)),
                SinkWrite::Levels(color(0.0, 0.0, 1.0)),
            ]
        );

        listener.handle_datagram(&Command::AutoDisable.encode(TargetField::Mask(0)));
        let status = listener.controller.status();
        assert_eq!(status.mode, ModeKind::Disabled);
        assert_eq!(status.current, color(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_off_stops_pattern() {
        let (listener, sink) = listener(ProtocolVariant::Bitmask, 0);
        listener.handle_datagram(&bitmask_pattern_datagram(2, 60_000));
        wait_for_writes(&sink, 1);

        assert_eq!(
            listener.handle_datagram(&Command::Off.encode(TargetField::Mask(0))),
            Outcome::Applied(CommandCode::Off)
        );
        let status = listener.controller.status();
        assert_eq!(status.current, BLACK);
        assert_eq!(status.base, BLACK);
        assert!(!status.worker.is_alive());
    }
}
