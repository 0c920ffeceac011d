//! The private `MKN-Options` header grammar (spec.md §6):
//! `<float> ";" <uint16> ";" <uint16>` — Bernoulli drop probability,
//! FEC group size k, FEC p.

use crate::error::{Error, Result};

pub const OPTION_TAG: &str = "net.markusklemm.options";
pub const HEADER_NAME: &str = "MKN-Options";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MknOptions {
    pub bernoulli_p: f64,
    pub fec_k: u16,
    pub fec_p: u16,
}

impl MknOptions {
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.trim().split(';').collect();
        let [p, k, fec_p] = parts[..] else {
            return Err(Error::BadTransport(format!("malformed MKN-Options value {value:?}")));
        };
        let bernoulli_p: f64 = p
            .trim()
            .parse()
            .map_err(|_| Error::BadTransport(format!("bad Bernoulli probability in {value:?}")))?;
        let fec_k: u16 = k
            .trim()
            .parse()
            .map_err(|_| Error::BadTransport(format!("bad FEC k in {value:?}")))?;
        let fec_p: u16 = fec_p
            .trim()
            .parse()
            .map_err(|_| Error::BadTransport(format!("bad FEC p in {value:?}")))?;

        if !(0.0..=1.0).contains(&bernoulli_p) {
            return Err(Error::BadTransport(format!(
                "Bernoulli probability {bernoulli_p} out of [0,1] in {value:?}"
            )));
        }

        Ok(MknOptions { bernoulli_p, fec_k, fec_p })
    }

    pub fn serialize(&self) -> String {
        format!("{};{};{}", self.bernoulli_p, self.fec_k, self.fec_p)
    }
}
