// CAPTIONS - ATSC A/53 caption transport
//
// • split_cc_data: GA94 user data -> cc triplets
// • eia608: line-21 channels and XDS metadata (fields 1 and 2)
// • cea708: DTVCC packets and service blocks
//
// CaptionDecoder owns one of each and is fed per user-data packet.

pub mod cea708;
pub mod eia608;

use crate::media::{CodecId, StreamKind};
use crate::report::Stream;

use self::cea708::DtvccAssembler;
use self::eia608::{Cc608Detector, XdsAssembler};

pub const ATSC_IDENTIFIER: &[u8; 4] = b"GA94";
const CC_DATA_TYPE: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcType {
    /// NTSC line 21 field 1 (CC1/CC2).
    Field1,
    /// NTSC line 21 field 2 (CC3/CC4, XDS).
    Field2,
    DtvccData,
    DtvccStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcTriplet {
    pub valid: bool,
    pub cc_type: CcType,
    pub data: [u8; 2],
}

/// Split ATSC user data (starting at "GA94") into cc triplets.
/// None when the packet is not cc_data or its count overruns the buffer.
pub fn split_cc_data(user_data: &[u8]) -> Option<Vec<CcTriplet>> {
    let body = user_data.strip_prefix(ATSC_IDENTIFIER)?;
    let (&type_code, rest) = body.split_first()?;
    if type_code != CC_DATA_TYPE {
        return None;
    }
    let (&flags, rest) = rest.split_first()?;
    let process_cc_data = flags & 0x40 != 0;
    let count = (flags & 0x1F) as usize;
    // em_data
    let rest = rest.get(1..)?;
    if !process_cc_data {
        return Some(Vec::new());
    }
    let triplets = rest.get(..count * 3)?;
    Some(
        triplets
            .chunks_exact(3)
            .map(|t| CcTriplet {
                valid: t[0] & 0x04 != 0,
                cc_type: match t[0] & 0x03 {
                    0 => CcType::Field1,
                    1 => CcType::Field2,
                    2 => CcType::DtvccData,
                    _ => CcType::DtvccStart,
                },
                data: [t[1], t[2]],
            })
            .collect(),
    )
}

#[derive(Debug, Default)]
pub struct CaptionDecoder {
    pub cc608: Cc608Detector,
    pub xds: XdsAssembler,
    pub dtvcc: DtvccAssembler,
    /// cc_data packets accepted.
    pub cc_packets: u64,
}

impl CaptionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one user-data payload. Returns false if it was not cc_data.
    pub fn feed_user_data(&mut self, user_data: &[u8]) -> bool {
        match split_cc_data(user_data) {
            Some(triplets) => {
                self.cc_packets += 1;
                self.feed_triplets(&triplets);
                true
            }
            None => false,
        }
    }

    pub fn feed_triplets(&mut self, triplets: &[CcTriplet]) {
        for t in triplets {
            match t.cc_type {
                CcType::Field1 if t.valid => self.cc608.feed(1, t.data),
                CcType::Field2 if t.valid => {
                    self.cc608.feed(2, t.data);
                    self.xds.feed(t.data);
                }
                CcType::DtvccStart | CcType::DtvccData => self.dtvcc.feed(t),
                _ => {}
            }
        }
    }

    pub fn is_detected(&self) -> bool {
        self.cc608.any() || self.dtvcc.any()
    }

    /// One Text stream per detected 608 channel and 708 service.
    pub fn streams(&self, muxing: &str) -> Vec<Stream> {
        let mut out = Vec::new();
        for channel in 0..4 {
            if !self.cc608.has_channel(channel) {
                continue;
            }
            let mut s = Stream::new(StreamKind::Text);
            s.push("ID", format!("CC{}", channel + 1));
            s.push("Format", CodecId::Eia608.name());
            s.push("Muxing mode", muxing);
            out.push(s);
        }
        for (service, stats) in self.dtvcc.services() {
            let mut s = Stream::new(StreamKind::Text);
            s.push("ID", service.to_string());
            s.push("Format", CodecId::Cea708.name());
            s.push("Muxing mode", muxing);
            s.push_both("Service", format!("Service {}", service), service);
            s.set_key("service_bytes", stats.bytes);
            out.push(s);
        }
        out
    }

    /// XDS metadata onto the general stream.
    pub fn describe_general(&self, general: &mut Stream) {
        let info = &self.xds.info;
        general.push_opt("Title", info.program_name.clone());
        general.push_opt("Network name", info.network_name.clone());
        general.push_opt("Call letters", info.call_letters.clone());
        general.push_opt("Content advisory", info.content_advisory.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_data(flags: u8, triplets: &[[u8; 3]]) -> Vec<u8> {
        let mut out = b"GA94".to_vec();
        out.push(0x03);
        out.push(flags);
        out.push(0xFF);
        for t in triplets {
            out.extend_from_slice(t);
        }
        out.push(0xFF);
        out
    }

    #[test]
    fn splits_triplets() {
        let data = user_data(0x42, &[[0xFC, 0x94, 0x2C], [0xFF, 0x03, 0x10]]);
        let triplets = split_cc_data(&data).unwrap();
        assert_eq!(triplets.len(), 2);
        assert_eq!(triplets[0].cc_type, CcType::Field1);
        assert!(triplets[0].valid);
        assert_eq!(triplets[1].cc_type, CcType::DtvccStart);
        assert_eq!(triplets[1].data, [0x03, 0x10]);
    }

    #[test]
    fn rejects_overrun_and_other_types() {
        let data = user_data(0x45, &[[0xFC, 0x80, 0x80]]);
        assert_eq!(split_cc_data(&data), None);
        let mut bar = b"GA94".to_vec();
        bar.push(0x06);
        assert_eq!(split_cc_data(&bar), None);
        assert_eq!(split_cc_data(b"DTG1"), None);
        assert_eq!(split_cc_data(&user_data(0x02, &[])), Some(Vec::new()));
    }

    #[test]
    fn decoder_reports_channels() {
        let mut dec = CaptionDecoder::new();
        assert!(dec.feed_user_data(&user_data(0x41, &[[0xFC, 0x94, 0x2C]])));
        assert!(dec.is_detected());
        let streams = dec.streams("A/53 / DTVCC Transport");
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].get("ID"), Some("CC1"));
        assert_eq!(streams[0].get("Format"), Some("EIA-608"));
    }
}
