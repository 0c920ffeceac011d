//! RTP JPEG receiver: sequence tracking, delay-buffered FEC recovery, and
//! timed frame delivery (spec.md §4.7).

use std::collections::VecDeque;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::fec::{recover_packet, trim_after_eoi};
use super::packet::{FecPacket, JpegPacket, RtpHeader, FEC_PAYLOAD_TYPE, JPEG_PAYLOAD_TYPE};
use super::sender::FRAME_PERIOD;
use super::seq::SequenceTracker;
use crate::error::Result;

/// Target depth of both the media and FEC delay buffers (spec.md §3).
pub const BUFFER_SIZE: usize = 50;
/// Lookback distance, in packets, at which FEC recovery is evaluated.
pub const MEDIA_PACKET_DELAY: usize = 20;

/// Snapshot emitted to the statistics callback after each media packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub received: u64,
    pub expected: u64,
    pub corrected: u64,
    pub uncorrectable: u64,
}

type FrameCallback = Box<dyn Fn(Vec<u8>) + Send + 'static>;
type StatsCallback = Box<dyn Fn(Stats) + Send + 'static>;

struct ReceiverState {
    ssrc: u32,
    tracker: Option<SequenceTracker>,
    media: VecDeque<(u16, JpegPacket)>,
    fec: VecDeque<FecPacket>,
    display: VecDeque<Vec<u8>>,
    corrected: u64,
    uncorrectable: u64,
    on_frame: FrameCallback,
    on_stats: Option<StatsCallback>,
}

impl ReceiverState {
    fn stats(&self) -> Stats {
        let (received, expected) = self
            .tracker
            .as_ref()
            .map(|t| (t.received(), t.expected()))
            .unwrap_or((0, 0));
        Stats {
            received,
            expected,
            corrected: self.corrected,
            uncorrectable: self.uncorrectable,
        }
    }

    fn handle_datagram(&mut self, buf: &[u8]) {
        let header = match RtpHeader::parse(buf) {
            Ok((h, _)) => h,
            Err(_) => {
                tracing::warn!("unparsable RTP datagram, dropping");
                return;
            }
        };

        match header.pt {
            JPEG_PAYLOAD_TYPE => self.handle_media(buf),
            FEC_PAYLOAD_TYPE => self.handle_fec(buf),
            pt => tracing::warn!(pt, "RTP datagram with unrecognized payload type, dropping"),
        }
    }

    fn handle_media(&mut self, buf: &[u8]) {
        let packet = match JpegPacket::parse(buf) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("unparsable JPEG RTP packet, dropping");
                return;
            }
        };
        if packet.header.ssrc != self.ssrc {
            tracing::debug!(got = packet.header.ssrc, want = self.ssrc, "SSRC mismatch, dropping");
            return;
        }
        if !packet.ends_with_eoi() {
            tracing::warn!(seq = packet.header.sequence, "JPEG payload missing FF D9 trailer");
        }

        let seq = packet.header.sequence;
        let valid = match &mut self.tracker {
            None => {
                self.tracker = Some(SequenceTracker::new(seq));
                true
            }
            Some(t) => t.update_seq(seq),
        };

        if valid {
            self.media.push_back((seq, packet));
            self.run_recovery();
        }

        if let Some(cb) = &self.on_stats {
            cb(self.stats());
        }
    }

    fn handle_fec(&mut self, buf: &[u8]) {
        let packet = match FecPacket::parse(buf) {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("unparsable FEC RTP packet, dropping");
                return;
            }
        };
        if packet.header.ssrc != self.ssrc {
            tracing::debug!("FEC packet SSRC mismatch, dropping");
            return;
        }
        if packet.levels.is_empty() {
            tracing::warn!("FEC packet carries no protection level, dropping");
            return;
        }
        self.fec.push_back(packet);
        if self.fec.len() > BUFFER_SIZE {
            self.fec.pop_front();
        }
    }

    fn run_recovery(&mut self) {
        if self.media.len() < BUFFER_SIZE {
            return;
        }
        let end = self.media.len();
        let idx_a = end - MEDIA_PACKET_DELAY - 1;
        let idx_b = end - MEDIA_PACKET_DELAY;
        let seq_a = self.media[idx_a].0;
        let seq_b = self.media[idx_b].0;
        let gap = seq_b.wrapping_sub(seq_a);

        match gap {
            0 | 1 => {}
            2 => self.try_recover(idx_a, seq_a),
            _ => self.uncorrectable += 1,
        }

        if let Some((seq, packet)) = self.media.pop_front() {
            let _ = seq;
            self.display.push_back(packet.payload);
        }
    }

    fn try_recover(&mut self, idx_a: usize, seq_a: u16) {
        let missing_seq = seq_a.wrapping_add(1);

        let fec = self.fec.iter().find(|f| {
            let Some(level) = f.levels.first() else {
                return false;
            };
            let rel = missing_seq.wrapping_sub(f.sn_base) as u32;
            let width = f.mask_width_bits();
            rel < width && (level.mask & (1u64 << (width - 1 - rel))) != 0
        });

        let Some(fec) = fec.cloned() else {
            self.uncorrectable += 1;
            return;
        };

        let Some(fec_level) = fec.levels.first() else {
            self.uncorrectable += 1;
            return;
        };
        let width = fec.mask_width_bits();
        let known: Vec<Vec<u8>> = self
            .media
            .iter()
            .filter_map(|(seq, packet)| {
                let rel = seq.wrapping_sub(fec.sn_base) as u32;
                if rel < width && (fec_level.mask & (1u64 << (width - 1 - rel))) != 0 {
                    packet.serialize().ok()
                } else {
                    None
                }
            })
            .collect();

        let known_refs: Vec<&[u8]> = known.iter().map(Vec::as_slice).collect();
        let Ok(mut recovered_bytes) = recover_packet(&fec, &known_refs) else {
            self.uncorrectable += 1;
            return;
        };
        trim_after_eoi(&mut recovered_bytes);

        match JpegPacket::parse(&recovered_bytes) {
            Ok(packet) => {
                self.media.insert(idx_a + 1, (missing_seq, packet));
                self.corrected += 1;
                tracing::trace!(missing_seq, "FEC recovered a lost media packet");
            }
            Err(_) => {
                self.uncorrectable += 1;
            }
        }
    }
}

/// Owns the receive sockets and the background workers driving them.
pub struct RtpReceiver {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl RtpReceiver {
    /// Bind a UDP v4 socket (mandatory) and a best-effort v6 socket on
    /// `port`, and start servicing both plus the display timer.
    pub fn bind(
        port: u16,
        ssrc: u32,
        on_frame: impl Fn(Vec<u8>) + Send + 'static,
        on_stats: Option<impl Fn(Stats) + Send + 'static>,
    ) -> Result<Self> {
        let socket_v4 = UdpSocket::bind(("0.0.0.0", port))?;
        let socket_v6 = match UdpSocket::bind(("::", port)) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, port, "IPv6 RTP listener bind failed, continuing on v4 only");
                None
            }
        };

        let state = Arc::new(Mutex::new(ReceiverState {
            ssrc,
            tracker: None,
            media: VecDeque::with_capacity(BUFFER_SIZE),
            fec: VecDeque::with_capacity(BUFFER_SIZE),
            display: VecDeque::new(),
            corrected: 0,
            uncorrectable: 0,
            on_frame: Box::new(on_frame),
            on_stats: on_stats.map(|f| Box::new(f) as StatsCallback),
        }));

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        handles.push(spawn_datagram_reader(socket_v4, state.clone(), shutdown.clone()));
        if let Some(socket_v6) = socket_v6 {
            handles.push(spawn_datagram_reader(socket_v6, state.clone(), shutdown.clone()));
        }
        handles.push(spawn_display_timer(state, shutdown.clone()));

        Ok(RtpReceiver { shutdown, handles })
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn spawn_datagram_reader(
    socket: UdpSocket,
    state: Arc<Mutex<ReceiverState>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    socket
        .set_read_timeout(Some(std::time::Duration::from_millis(200)))
        .ok();
    thread::spawn(move || {
        let mut buf = [0u8; 65535];
        while !shutdown.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, _)) => state.lock().handle_datagram(&buf[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::warn!(error = %e, "RTP datagram read error");
                }
            }
        }
    })
}

fn spawn_display_timer(state: Arc<Mutex<ReceiverState>>, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(FRAME_PERIOD);
            let mut guard = state.lock();
            if let Some(frame) = guard.display.pop_front() {
                (guard.on_frame)(frame);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::fec::FecGenerator;

    fn jpeg_bytes(seq: u16, payload: &[u8]) -> Vec<u8> {
        JpegPacket {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, seq, seq as u32 * 3600, 7),
            type_specific: 0,
            fragment_offset: 0,
            jpeg_type: 0,
            quantization_table: 0,
            width8: 0,
            height8: 0,
            payload: payload.to_vec(),
        }
        .serialize()
        .unwrap()
    }

    fn new_state() -> ReceiverState {
        ReceiverState {
            ssrc: 7,
            tracker: None,
            media: VecDeque::new(),
            fec: VecDeque::new(),
            display: VecDeque::new(),
            corrected: 0,
            uncorrectable: 0,
            on_frame: Box::new(|_| {}),
            on_stats: None,
        }
    }

    #[test]
    fn ssrc_mismatch_is_dropped() {
        let mut state = new_state();
        let bytes = JpegPacket {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, 1, 0, 999),
            type_specific: 0,
            fragment_offset: 0,
            jpeg_type: 0,
            quantization_table: 0,
            width8: 0,
            height8: 0,
            payload: vec![0xFF, 0xD8, 0xFF, 0xD9],
        }
        .serialize()
        .unwrap();
        state.handle_datagram(&bytes);
        assert!(state.media.is_empty());
    }

    #[test]
    fn recovers_one_missing_packet_via_fec() {
        let mut state = new_state();
        let mut gen = FecGenerator::new(2, 0);

        // Enough delivered packets for the delay window to slide past the
        // one dropped packet: the buffer must first fill to BUFFER_SIZE
        // before run_recovery does anything, then the window needs to
        // travel MEDIA_PACKET_DELAY further to reach the drop point.
        let total = BUFFER_SIZE * 2 + MEDIA_PACKET_DELAY;
        let missing_seq = 10u16;

        for i in 0..total {
            let seq = i as u16;
            let payload = vec![b'A' + (i % 5) as u8, 0xFF, 0xD9];
            let bytes = jpeg_bytes(seq, &payload);

            // Fold every packet into its FEC group as the sender would,
            // even the one that's about to be dropped.
            if let Some(fec) = gen.push(seq, seq as u32 * 3600, 7, &bytes) {
                state.handle_fec(&fec.serialize().unwrap());
            }

            if seq == missing_seq {
                continue;
            }
            state.handle_media(&bytes);
        }

        assert!(state.corrected >= 1);
    }
}
