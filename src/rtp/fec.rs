//! XOR-parity FEC generation and recovery (spec.md §4.6, §4.7), modeled on
//! the RFC 2733 parity scheme. A `FecGenerator` accumulates whole,
//! already-serialized media packets into one parity group of `k` and emits
//! a [`FecPacket`] once the group fills; [`recover_packet`] runs the
//! XOR-inverse on the receive side.

use super::packet::{FecLevel, FecPacket, RtpHeader, FEC_PAYLOAD_TYPE, JPEG_PAYLOAD_TYPE};
use crate::error::{Error, Result};

/// Accumulates one FEC protection group over consecutive media packets.
///
/// Per the Open Question decision recorded in DESIGN.md, a group that
/// would need its base sequence number to be read as wrapping past 65535
/// is refused rather than risk emitting a mis-based FEC packet: the
/// partial group is dropped and accumulation restarts from the packet
/// that triggered the wrap.
pub struct FecGenerator {
    k: u16,
    members: Vec<u16>,
    xor_payload: Vec<u8>,
    xor_length: u16,
    fec_seq: u16,
}

impl FecGenerator {
    pub fn new(k: u16, initial_fec_seq: u16) -> Self {
        FecGenerator {
            k,
            members: Vec::with_capacity(k as usize),
            xor_payload: Vec::new(),
            xor_length: 0,
            fec_seq: initial_fec_seq,
        }
    }

    pub fn k(&self) -> u16 {
        self.k
    }

    /// Fold one media packet's wire bytes into the running group. `seq` is
    /// that packet's RTP sequence number, `timestamp` its RTP timestamp.
    /// Returns the completed [`FecPacket`] once `k` packets have been
    /// folded in, carrying `timestamp` (the last member's) as its own.
    pub fn push(&mut self, seq: u16, timestamp: u32, ssrc: u32, packet_bytes: &[u8]) -> Option<FecPacket> {
        if let Some(&base) = self.members.first() {
            if seq < base {
                tracing::warn!(base, seq, "FEC group would span a sequence wrap; dropping group");
                self.reset();
            }
        }

        xor_into(&mut self.xor_payload, packet_bytes);
        self.xor_length ^= packet_bytes.len() as u16;
        self.members.push(seq);

        if self.members.len() < self.k as usize {
            return None;
        }

        let sn_base = self.members[0];
        let mask = top_k_bits_set(self.k);
        let long_mask = self.k > 16;

        let fec_seq = self.fec_seq;
        self.fec_seq = self.fec_seq.wrapping_add(1);

        let packet = FecPacket {
            header: RtpHeader::new(FEC_PAYLOAD_TYPE, fec_seq, timestamp, ssrc),
            extension_recovery: false,
            long_mask,
            padding_recovery: false,
            extension_bit_recovery: false,
            cc_recovery: 0,
            marker_recovery: false,
            pt_recovery: JPEG_PAYLOAD_TYPE,
            sn_base,
            ts_recovery: timestamp,
            length_recovery: self.xor_length,
            levels: vec![FecLevel {
                protection_length: self.xor_payload.len() as u16,
                mask,
                payload: std::mem::take(&mut self.xor_payload),
            }],
        };

        self.reset();
        Some(packet)
    }

    fn reset(&mut self) {
        self.members.clear();
        self.xor_payload.clear();
        self.xor_length = 0;
    }
}

fn top_k_bits_set(k: u16) -> u64 {
    let width: u32 = if k > 16 { 48 } else { 16 };
    let mut mask: u64 = 0;
    for i in 0..k as u32 {
        mask |= 1u64 << (width - 1 - i);
    }
    mask
}

/// XOR `src` into `dst`, treating either operand's missing tail as zero.
fn xor_into(dst: &mut Vec<u8>, src: &[u8]) {
    if dst.len() < src.len() {
        dst.resize(src.len(), 0);
    }
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// Reconstruct a missing media packet's wire bytes from a FEC packet and
/// the `k - 1` surviving group members' bytes (in any order).
///
/// The recovered length is exact — `length_recovery` is the XOR of every
/// member's true length, so XORing out the known members' lengths yields
/// the missing packet's length precisely, with no need to guess at a
/// `FF D9` boundary. [`trim_after_eoi`] is offered separately for callers
/// that want the marker-based trim spec.md describes as a fallback.
pub fn recover_packet(fec: &FecPacket, known_members: &[&[u8]]) -> Result<Vec<u8>> {
    let level = fec
        .levels
        .first()
        .ok_or_else(|| Error::Internal("FEC packet carries no protection level".into()))?;
    let mut payload = level.payload.clone();
    let mut length = fec.length_recovery;
    for member in known_members {
        xor_into(&mut payload, member);
        length ^= member.len() as u16;
    }
    payload.truncate(length as usize);
    Ok(payload)
}

/// Trim trailing bytes after the last `FF D9` (JPEG end-of-image) marker.
pub fn trim_after_eoi(buf: &mut Vec<u8>) {
    if let Some(pos) = buf.windows(2).rposition(|w| w == [0xFF, 0xD9]) {
        buf.truncate(pos + 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::packet::JpegPacket;

    fn jpeg(seq: u16, payload: &[u8]) -> Vec<u8> {
        JpegPacket {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, seq, seq as u32 * 3600, 42),
            type_specific: 0,
            fragment_offset: 0,
            jpeg_type: 1,
            quantization_table: 0,
            width8: 10,
            height8: 10,
            payload: payload.to_vec(),
        }
        .serialize()
        .unwrap()
    }

    #[test]
    fn recovers_single_missing_packet_of_two() {
        let a = jpeg(100, &[0xFF, 0xD8, b'A', 0xFF, 0xD9]);
        let b = jpeg(101, &[0xFF, 0xD8, b'B', b'B', b'B', 0xFF, 0xD9]);

        let mut gen = FecGenerator::new(2, 0);
        assert!(gen.push(100, 360000, 42, &a).is_none());
        let fec = gen.push(101, 363600, 42, &b).unwrap();

        assert_eq!(fec.sn_base, 100);
        assert_eq!(fec.mask_width_bits(), 16);

        let recovered = recover_packet(&fec, &[&a]).unwrap();
        assert_eq!(recovered, b);

        let recovered_a = recover_packet(&fec, &[&b]).unwrap();
        assert_eq!(recovered_a, a);
    }

    #[test]
    fn mask_has_exactly_k_bits_set() {
        let mask16 = top_k_bits_set(5);
        assert_eq!(mask16.count_ones(), 5);
        assert_eq!(mask16 >> (64 - 16), mask16);

        let mask48 = top_k_bits_set(20);
        assert_eq!(mask48.count_ones(), 20);
    }

    #[test]
    fn trims_after_last_eoi_marker() {
        let mut buf = vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9, 0, 0, 0];
        trim_after_eoi(&mut buf);
        assert_eq!(buf, vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
    }
}
