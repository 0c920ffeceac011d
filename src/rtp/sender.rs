//! Paced RTP JPEG sender with optional simulated loss and FEC (spec.md §4.6).

use std::io::Read;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;

use super::fec::FecGenerator;
use super::packet::{JpegPacket, RtpHeader, JPEG_PAYLOAD_TYPE};
use crate::error::Result;

/// One RTP packet interval (spec.md §4.6).
pub const FRAME_PERIOD: Duration = Duration::from_millis(40);
const TIMESTAMP_CLOCK_SCALE: u32 = 40 * 90;

/// Optional simulated-loss and FEC parameters, set via the `MKN-Options`
/// negotiation (spec.md §4.3, §6).
#[derive(Debug, Clone, Default)]
pub struct SenderOptions {
    pub bernoulli_drop_p: Option<f64>,
    pub fec_k: Option<u16>,
}

/// Sends one JPEG frame per [`FRAME_PERIOD`] to a fixed destination.
///
/// `start`/`stop` toggle pacing without tearing the worker thread down, so
/// PLAY/PAUSE can flip between them repeatedly; dropping the sender joins
/// the worker.
pub struct RtpSender {
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RtpSender {
    /// Spawn the pacing worker. `frames` yields frame bytes per the
    /// length-prefixed framing convention (spec.md §6); it is read entirely
    /// from the worker thread. Playback starts paused — call [`start`](Self::start).
    pub fn spawn(
        socket: UdpSocket,
        dest: SocketAddr,
        ssrc: u32,
        frames: impl Read + Send + 'static,
        options: SenderOptions,
    ) -> Self {
        let playing = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_playing = playing.clone();
        let worker_shutdown = shutdown.clone();

        let handle = thread::spawn(move || {
            run(socket, dest, ssrc, frames, options, worker_playing, worker_shutdown);
        });

        RtpSender {
            playing,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn start(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for RtpSender {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    socket: UdpSocket,
    dest: SocketAddr,
    ssrc: u32,
    mut frames: impl Read,
    options: SenderOptions,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let mut rng = rand::rng();
    let mut seq: u16 = rng.random_range(0..=60000);
    let mut fec = options.fec_k.map(|k| FecGenerator::new(k, rng.random_range(0..=60000)));

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        if !playing.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let payload = match read_next_frame(&mut frames) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::info!("frame source exhausted, sender stopping");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "fatal frame source error");
                return;
            }
        };

        let timestamp = seq as u32 * TIMESTAMP_CLOCK_SCALE;
        let packet = JpegPacket {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, seq, timestamp, ssrc),
            type_specific: 0,
            fragment_offset: 0,
            jpeg_type: 0,
            quantization_table: 0,
            width8: 0,
            height8: 0,
            payload,
        };

        let bytes = match packet.serialize() {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize JPEG RTP packet");
                return;
            }
        };

        let dropped = options
            .bernoulli_drop_p
            .map(|p| rng.random_bool(p))
            .unwrap_or(false);

        if dropped {
            tracing::trace!(seq, "simulated packet loss");
        } else if let Err(e) = socket.send_to(&bytes, dest) {
            tracing::warn!(error = %e, seq, "RTP send failed");
        }

        if let Some(fec) = fec.as_mut()
            && let Some(fec_packet) = fec.push(seq, timestamp, ssrc, &bytes)
            && let Ok(fec_bytes) = fec_packet.serialize()
        {
            if let Err(e) = socket.send_to(&fec_bytes, dest) {
                tracing::warn!(error = %e, "FEC send failed");
            }
        }

        seq = seq.wrapping_add(1);
        thread::sleep(FRAME_PERIOD);
    }
}

/// Read one length-prefixed frame (spec.md §6): exactly 5 ASCII decimal
/// digits giving the byte length, followed by that many JPEG bytes.
/// `Ok(None)` signals a clean end of stream (fewer than 5 digits readable).
fn read_next_frame(r: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 5];
    let mut read = 0;
    while read < 5 {
        match r.read(&mut len_buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) => return Err(e.into()),
        }
    }
    if read < 5 {
        return Ok(None);
    }

    let len_str = std::str::from_utf8(&len_buf).map_err(|_| {
        crate::error::Error::Internal("frame length prefix was not ASCII".to_string())
    })?;
    let len: usize = len_str
        .parse()
        .map_err(|_| crate::error::Error::Internal(format!("unparseable frame length {len_str:?}")))?;

    let mut payload = vec![0u8; len];
    let mut read = 0;
    while read < len {
        match r.read(&mut payload[read..]) {
            Ok(0) => {
                return Err(crate::error::Error::Internal(
                    "frame source ended mid-frame".to_string(),
                ));
            }
            Ok(n) => read += n,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_length_prefixed_frames() {
        let mut data = Cursor::new(b"00003abc00002xy".to_vec());
        assert_eq!(read_next_frame(&mut data).unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_next_frame(&mut data).unwrap(), Some(b"xy".to_vec()));
        assert_eq!(read_next_frame(&mut data).unwrap(), None);
    }

    #[test]
    fn short_length_prefix_is_clean_eof() {
        let mut data = Cursor::new(b"12".to_vec());
        assert_eq!(read_next_frame(&mut data).unwrap(), None);
    }

    #[test]
    fn unparseable_length_is_fatal() {
        let mut data = Cursor::new(b"abcde".to_vec());
        assert!(read_next_frame(&mut data).is_err());
    }
}
