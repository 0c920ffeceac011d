//! RTP transport: wire formats, sequence tracking, FEC, and the paced
//! sender/receiver pair that ride on top of them.

pub mod fec;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;

pub use fec::{recover_packet, trim_after_eoi, FecGenerator};
pub use packet::{ExtensionBlock, FecLevel, FecPacket, JpegPacket, RtpHeader, FEC_PAYLOAD_TYPE, JPEG_PAYLOAD_TYPE};
pub use receiver::{RtpReceiver, Stats, BUFFER_SIZE, MEDIA_PACKET_DELAY};
pub use sender::{RtpSender, SenderOptions, FRAME_PERIOD};
pub use seq::{SequenceTracker, MAX_DROPOUT, MAX_MISORDER, MIN_SEQUENTIAL, RTP_SEQ_MOD};
