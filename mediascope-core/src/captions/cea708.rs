// CEA-708 - DTVCC packet reassembly and service demultiplexing
//
// Packet header: sequence_number(2) packet_size_code(6), length 2*code
// bytes (128 when code is 0) including the header. Service block header:
// service_number(3) block_size(5); number 7 takes a 6-bit extended number
// from the next byte; number 0 is the null block that ends the packet.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{CcTriplet, CcType};
use crate::bits::{BitResult, BitstreamError};

pub const MAX_DTVCC_PACKET: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceBlock {
    pub service: u8,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtvccPacket {
    pub sequence: u8,
    pub size: usize,
    pub blocks: Vec<ServiceBlock>,
}

pub fn packet_size(header: u8) -> usize {
    match header & 0x3F {
        0 => MAX_DTVCC_PACKET,
        code => code as usize * 2,
    }
}

/// Decode a complete DTVCC packet (header byte included).
pub fn decode_packet(data: &[u8]) -> BitResult<DtvccPacket> {
    let (&header, _) = data.split_first().ok_or(BitstreamError::Truncated {
        needed: 8,
        available: 0,
    })?;
    let size = packet_size(header);
    if data.len() < size {
        return Err(BitstreamError::Truncated {
            needed: size * 8,
            available: data.len() * 8,
        });
    }

    let mut blocks = Vec::new();
    let mut pos = 1usize;
    while pos < size {
        let byte = data[pos];
        let mut service = byte >> 5;
        let len = (byte & 0x1F) as usize;
        pos += 1;
        if service == 0 {
            break;
        }
        if service == 7 && len != 0 {
            let ext = *data.get(pos).filter(|_| pos < size).ok_or(BitstreamError::Truncated {
                needed: 8,
                available: 0,
            })?;
            service = ext & 0x3F;
            if service < 7 {
                return Err(BitstreamError::Reserved("extended_service_number"));
            }
            pos += 1;
        }
        if pos + len > size {
            return Err(BitstreamError::Truncated {
                needed: (pos + len) * 8,
                available: size * 8,
            });
        }
        blocks.push(ServiceBlock {
            service,
            offset: pos,
            len,
        });
        pos += len;
    }
    Ok(DtvccPacket {
        sequence: header >> 6,
        size,
        blocks,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub blocks: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DtvccAssembler {
    buf: Vec<u8>,
    expected: usize,
    services: BTreeMap<u8, ServiceStats>,
    pub packets: u64,
    pub errors: u64,
}

impl DtvccAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, triplet: &CcTriplet) {
        match triplet.cc_type {
            CcType::DtvccStart => {
                // a start always closes whatever was pending
                self.finish();
                if !triplet.valid {
                    return;
                }
                self.expected = packet_size(triplet.data[0]);
                self.buf.extend_from_slice(&triplet.data);
            }
            CcType::DtvccData => {
                if !triplet.valid || self.expected == 0 {
                    return;
                }
                self.buf.extend_from_slice(&triplet.data);
            }
            _ => return,
        }
        if self.buf.len() >= self.expected {
            self.finish();
        }
    }

    fn finish(&mut self) {
        if self.expected == 0 {
            self.buf.clear();
            return;
        }
        match decode_packet(&self.buf) {
            Ok(packet) => {
                self.packets += 1;
                for block in &packet.blocks {
                    let stats = self.services.entry(block.service).or_default();
                    stats.blocks += 1;
                    stats.bytes += block.len as u64;
                }
            }
            Err(err) => {
                tracing::debug!("dtvcc packet dropped: {}", err);
                self.errors += 1;
            }
        }
        self.buf.clear();
        self.expected = 0;
    }

    pub fn services(&self) -> impl Iterator<Item = (u8, ServiceStats)> + '_ {
        self.services.iter().map(|(k, v)| (*k, *v))
    }

    pub fn any(&self) -> bool {
        !self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(b: [u8; 2]) -> CcTriplet {
        CcTriplet {
            valid: true,
            cc_type: CcType::DtvccStart,
            data: b,
        }
    }

    fn cont(b: [u8; 2]) -> CcTriplet {
        CcTriplet {
            valid: true,
            cc_type: CcType::DtvccData,
            data: b,
        }
    }

    #[test]
    fn decodes_service_blocks() {
        // size code 3 -> 6 bytes: header, service 1 len 2, 2 bytes, null block, pad
        let packet = [0x43, 0x22, 0x41, 0x42, 0x00, 0x00];
        let decoded = decode_packet(&packet).unwrap();
        assert_eq!(decoded.sequence, 1);
        assert_eq!(decoded.blocks, vec![ServiceBlock { service: 1, offset: 2, len: 2 }]);
    }

    #[test]
    fn extended_service_number() {
        let packet = [0x03, 0xE1, 0x0A, 0x41, 0x00, 0x00];
        let decoded = decode_packet(&packet).unwrap();
        assert_eq!(decoded.blocks[0].service, 10);
        assert_eq!(decoded.blocks[0].len, 1);
    }

    #[test]
    fn block_overrun_is_error() {
        let packet = [0x02, 0x3F, 0x00, 0x00];
        assert!(matches!(decode_packet(&packet), Err(BitstreamError::Truncated { .. })));
        assert_eq!(packet_size(0x00), 128);
    }

    #[test]
    fn assembles_across_triplets() {
        let mut dtvcc = DtvccAssembler::new();
        dtvcc.feed(&start([0x03, 0x22]));
        dtvcc.feed(&cont([0x41, 0x42]));
        dtvcc.feed(&cont([0x00, 0x00]));
        assert_eq!(dtvcc.packets, 1);
        dtvcc.feed(&start([0x02, 0x41]));
        dtvcc.feed(&cont([0x20, 0x00]));
        let services: Vec<_> = dtvcc.services().collect();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0], (1, ServiceStats { blocks: 1, bytes: 2 }));
        assert_eq!(services[1].0, 2);
        assert!(dtvcc.any());
    }
}
