//! RTP fixed header plus the custom JPEG and FEC payload layouts
//! (spec.md §3, §6). Bit-exact: every field round-trips through
//! `parse`/`serialize` unchanged.

use crate::error::{Error, Result};

/// RTP fixed header (RFC 3550 §5.1) with CSRC list and optional extension.
///
/// ```text
///  0                   1                   2                   3
/// |V=2|P|X|  CC   |M|     PT      |       sequence number        |
/// |                           timestamp                           |
/// |                             SSRC                              |
/// |                         CSRCs (CC × 4 bytes)                  |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub cc: u8,
    pub marker: bool,
    pub pt: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub extension_block: Option<ExtensionBlock>,
}

/// RFC 3550 §5.3.1 generic header extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionBlock {
    /// Profile-defined 4-byte prolog (carries the profile id in its first two bytes).
    pub prolog: [u8; 4],
    /// Extension payload, always a multiple of 4 bytes.
    pub data: Vec<u8>,
}

impl RtpHeader {
    pub fn new(pt: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            cc: 0,
            marker: false,
            pt,
            sequence,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            extension_block: None,
        }
    }

    /// Parse a fixed header (plus CSRC list and extension block) from the
    /// front of `buf`. Returns the header and the number of bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 12 {
            return Err(Error::Internal("RTP header truncated".to_string()));
        }
        let b0 = buf[0];
        let version = b0 >> 6;
        let padding = (b0 & 0b0010_0000) != 0;
        let extension = (b0 & 0b0001_0000) != 0;
        let cc = b0 & 0x0F;

        let b1 = buf[1];
        let marker = (b1 & 0x80) != 0;
        let pt = b1 & 0x7F;

        let sequence = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = 12;
        let mut csrcs = Vec::with_capacity(cc as usize);
        for _ in 0..cc {
            if offset + 4 > buf.len() {
                return Err(Error::Internal("RTP header CSRC list truncated".to_string()));
            }
            csrcs.push(u32::from_be_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]));
            offset += 4;
        }

        let extension_block = if extension {
            if offset + 6 > buf.len() {
                return Err(Error::Internal("RTP extension truncated".to_string()));
            }
            let prolog = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            let word_count = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]) as usize;
            offset += 6;
            let data_len = word_count * 4;
            if offset + data_len > buf.len() {
                return Err(Error::Internal("RTP extension payload truncated".to_string()));
            }
            let data = buf[offset..offset + data_len].to_vec();
            offset += data_len;
            Some(ExtensionBlock { prolog, data })
        } else {
            None
        };

        Ok((
            RtpHeader {
                version,
                padding,
                extension,
                cc,
                marker,
                pt,
                sequence,
                timestamp,
                ssrc,
                csrcs,
                extension_block,
            },
            offset,
        ))
    }

    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.cc as usize != self.csrcs.len() {
            return Err(Error::Internal(
                "RTP header csrc count does not match csrc list length".to_string(),
            ));
        }
        let b0 = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | self.cc;
        let b1 = ((self.marker as u8) << 7) | self.pt;
        out.push(b0);
        out.push(b1);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrcs {
            out.extend_from_slice(&csrc.to_be_bytes());
        }
        if let Some(ext) = &self.extension_block {
            out.extend_from_slice(&ext.prolog);
            let word_count = (ext.data.len() / 4) as u16;
            out.extend_from_slice(&word_count.to_be_bytes());
            out.extend_from_slice(&ext.data);
        }
        Ok(())
    }
}

/// Custom Motion-JPEG RTP payload (spec.md §3, PT=26).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegPacket {
    pub header: RtpHeader,
    pub type_specific: u8,
    pub fragment_offset: u32,
    pub jpeg_type: u8,
    pub quantization_table: u8,
    pub width8: u8,
    pub height8: u8,
    pub payload: Vec<u8>,
}

pub const JPEG_PAYLOAD_TYPE: u8 = 26;

impl JpegPacket {
    pub fn ends_with_eoi(&self) -> bool {
        self.payload.len() >= 2 && self.payload[self.payload.len() - 2..] == [0xFF, 0xD9]
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (header, offset) = RtpHeader::parse(buf)?;
        if header.pt != JPEG_PAYLOAD_TYPE {
            return Err(Error::Internal("not a JPEG RTP packet".to_string()));
        }
        if offset + 8 > buf.len() {
            return Err(Error::Internal("JPEG profile tail truncated".to_string()));
        }
        let type_specific = buf[offset];
        let fragment_offset = u32::from_be_bytes([0, buf[offset + 1], buf[offset + 2], buf[offset + 3]]);
        let jpeg_type = buf[offset + 4];
        let quantization_table = buf[offset + 5];
        let width8 = buf[offset + 6];
        let height8 = buf[offset + 7];
        let payload = buf[offset + 8..].to_vec();

        Ok(JpegPacket {
            header,
            type_specific,
            fragment_offset,
            jpeg_type,
            quantization_table,
            width8,
            height8,
            payload,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(20 + self.payload.len());
        self.header.serialize(&mut out)?;
        out.push(self.type_specific);
        let offset_bytes = self.fragment_offset.to_be_bytes();
        out.extend_from_slice(&offset_bytes[1..]);
        out.push(self.jpeg_type);
        out.push(self.quantization_table);
        out.push(self.width8);
        out.push(self.height8);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

pub const FEC_PAYLOAD_TYPE: u8 = 100;

/// One FEC protection level: a mask over the group plus the XOR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecLevel {
    pub protection_length: u16,
    /// Bit `i` (MSB-first) selects group member `i`, counted from `sn_base`.
    /// Only the low 16 or 48 bits are meaningful, per `long_mask`.
    pub mask: u64,
    pub payload: Vec<u8>,
}

/// Custom FEC packet modeled on RFC 2733 (spec.md §3, PT=100).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    pub header: RtpHeader,
    pub extension_recovery: bool,
    pub long_mask: bool,
    pub padding_recovery: bool,
    pub extension_bit_recovery: bool,
    pub cc_recovery: u8,
    pub marker_recovery: bool,
    pub pt_recovery: u8,
    pub sn_base: u16,
    pub ts_recovery: u32,
    pub length_recovery: u16,
    pub levels: Vec<FecLevel>,
}

impl FecPacket {
    pub fn mask_width_bits(&self) -> u32 {
        if self.long_mask {
            48
        } else {
            16
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let (header, mut offset) = RtpHeader::parse(buf)?;
        if header.pt != FEC_PAYLOAD_TYPE {
            return Err(Error::Internal("not a FEC RTP packet".to_string()));
        }
        if offset + 10 > buf.len() {
            return Err(Error::Internal("FEC header truncated".to_string()));
        }
        let b0 = buf[offset];
        let extension_recovery = (b0 & 0x80) != 0;
        let long_mask = (b0 & 0x40) != 0;
        let padding_recovery = (b0 & 0x20) != 0;
        let extension_bit_recovery = (b0 & 0x10) != 0;
        let cc_recovery = b0 & 0x0F;

        let b1 = buf[offset + 1];
        let marker_recovery = (b1 & 0x80) != 0;
        let pt_recovery = b1 & 0x7F;

        let sn_base = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);
        let ts_recovery = u32::from_be_bytes([
            buf[offset + 4],
            buf[offset + 5],
            buf[offset + 6],
            buf[offset + 7],
        ]);
        let length_recovery = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]);
        offset += 10;

        let mask_bytes = if long_mask { 6 } else { 2 };
        let mut levels = Vec::new();
        while offset + 2 + mask_bytes <= buf.len() {
            let protection_length = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            offset += 2;
            let mut mask: u64 = 0;
            for i in 0..mask_bytes {
                mask = (mask << 8) | buf[offset + i] as u64;
            }
            offset += mask_bytes;
            let plen = protection_length as usize;
            if offset + plen > buf.len() {
                return Err(Error::Internal("FEC level payload truncated".to_string()));
            }
            let payload = buf[offset..offset + plen].to_vec();
            offset += plen;
            levels.push(FecLevel {
                protection_length,
                mask,
                payload,
            });
        }

        Ok(FecPacket {
            header,
            extension_recovery,
            long_mask,
            padding_recovery,
            extension_bit_recovery,
            cc_recovery,
            marker_recovery,
            pt_recovery,
            sn_base,
            ts_recovery,
            length_recovery,
            levels,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.header.serialize(&mut out)?;

        let b0 = ((self.extension_recovery as u8) << 7)
            | ((self.long_mask as u8) << 6)
            | ((self.padding_recovery as u8) << 5)
            | ((self.extension_bit_recovery as u8) << 4)
            | self.cc_recovery;
        out.push(b0);

        let b1 = ((self.marker_recovery as u8) << 7) | self.pt_recovery;
        out.push(b1);

        out.extend_from_slice(&self.sn_base.to_be_bytes());
        out.extend_from_slice(&self.ts_recovery.to_be_bytes());
        out.extend_from_slice(&self.length_recovery.to_be_bytes());

        let mask_bytes = if self.long_mask { 6 } else { 2 };
        for level in &self.levels {
            out.extend_from_slice(&level.protection_length.to_be_bytes());
            let mask_be = level.mask.to_be_bytes();
            out.extend_from_slice(&mask_be[8 - mask_bytes..]);
            out.extend_from_slice(&level.payload);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jpeg(seq: u16) -> JpegPacket {
        JpegPacket {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, seq, seq as u32 * 3600, 0xDEADBEEF),
            type_specific: 0,
            fragment_offset: 0,
            jpeg_type: 1,
            quantization_table: 0,
            width8: 80,
            height8: 60,
            payload: vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9],
        }
    }

    #[test]
    fn jpeg_round_trips() {
        let pkt = sample_jpeg(42);
        let wire = pkt.serialize().unwrap();
        let back = JpegPacket::parse(&wire).unwrap();
        assert_eq!(pkt, back);
        assert!(back.ends_with_eoi());
    }

    #[test]
    fn csrc_mismatch_fails_serialize() {
        let mut pkt = sample_jpeg(1);
        pkt.header.cc = 1;
        assert!(pkt.serialize().is_err());
    }

    #[test]
    fn fec_round_trips_16_bit_mask() {
        let fec = FecPacket {
            header: RtpHeader::new(FEC_PAYLOAD_TYPE, 7, 12345, 0xCAFEBABE),
            extension_recovery: false,
            long_mask: false,
            padding_recovery: false,
            extension_bit_recovery: false,
            cc_recovery: 0,
            marker_recovery: true,
            pt_recovery: JPEG_PAYLOAD_TYPE,
            sn_base: 100,
            ts_recovery: 99,
            length_recovery: 6,
            levels: vec![FecLevel {
                protection_length: 4,
                mask: 0b1100_0000_0000_0000,
                payload: vec![1, 2, 3, 4],
            }],
        };
        let wire = fec.serialize().unwrap();
        let back = FecPacket::parse(&wire).unwrap();
        assert_eq!(fec, back);
        assert_eq!(back.mask_width_bits(), 16);
    }

    #[test]
    fn fec_round_trips_48_bit_mask() {
        let fec = FecPacket {
            header: RtpHeader::new(FEC_PAYLOAD_TYPE, 7, 12345, 1),
            extension_recovery: false,
            long_mask: true,
            padding_recovery: false,
            extension_bit_recovery: false,
            cc_recovery: 0,
            marker_recovery: false,
            pt_recovery: JPEG_PAYLOAD_TYPE,
            sn_base: 500,
            ts_recovery: 1,
            length_recovery: 2,
            levels: vec![FecLevel {
                protection_length: 2,
                mask: 0xFFFF_FFFF_FFFF,
                payload: vec![9, 9],
            }],
        };
        let wire = fec.serialize().unwrap();
        let back = FecPacket::parse(&wire).unwrap();
        assert_eq!(fec, back);
        assert_eq!(back.mask_width_bits(), 48);
    }
}
