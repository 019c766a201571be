// EIA-608 - Line 21 channel detection and XDS assembly
//
// Bytes carry odd parity in bit 7, stripped before use.
// XDS lives on field 2: class start (odd 0x01-0x0D), continue (even),
// data pairs, then 0x0F + checksum. The checksum is not verified.

use serde::Serialize;

/// XDS packets longer than this are dropped.
pub const MAX_XDS_PACKET: usize = 32;

const XDS_END: u8 = 0x0F;

// ============================================================================
// Channel detection
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Cc608Detector {
    channels: [bool; 4],
    current: [Option<usize>; 2],
    /// Printable characters per channel.
    pub characters: [u64; 4],
}

impl Cc608Detector {
    /// `field` is 1 or 2.
    pub fn feed(&mut self, field: u8, data: [u8; 2]) {
        let index = if field == 2 { 1 } else { 0 };
        let (b1, b2) = (data[0] & 0x7F, data[1] & 0x7F);
        match b1 {
            0x00 if b2 == 0 => {}
            0x01..=0x0F => self.current[index] = None,
            0x10..=0x1F => {
                let channel = index * 2 + usize::from(b1 & 0x08 != 0);
                self.channels[channel] = true;
                self.current[index] = Some(channel);
            }
            0x20..=0x7F => {
                if let Some(channel) = self.current[index] {
                    self.characters[channel] += 1 + u64::from(b2 >= 0x20);
                }
            }
            _ => {}
        }
    }

    /// Channel index 0..4 for CC1..CC4.
    pub fn has_channel(&self, channel: usize) -> bool {
        self.channels.get(channel).copied().unwrap_or(false)
    }

    pub fn any(&self) -> bool {
        self.channels.iter().any(|&c| c)
    }
}

// ============================================================================
// XDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum XdsClass {
    Current,
    Future,
    Channel,
    Miscellaneous,
    PublicService,
    Reserved,
    Private,
}

impl XdsClass {
    fn from_index(index: usize) -> Self {
        match index {
            0 => XdsClass::Current,
            1 => XdsClass::Future,
            2 => XdsClass::Channel,
            3 => XdsClass::Miscellaneous,
            4 => XdsClass::PublicService,
            5 => XdsClass::Reserved,
            _ => XdsClass::Private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XdsPacket {
    pub class: XdsClass,
    pub type_code: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XdsInfo {
    pub program_name: Option<String>,
    pub content_advisory: Option<String>,
    pub network_name: Option<String>,
    pub call_letters: Option<String>,
}

#[derive(Debug, Clone)]
struct Partial {
    type_code: u8,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct XdsAssembler {
    partial: [Option<Partial>; 7],
    active: Option<usize>,
    pub packets: u64,
    pub dropped: u64,
    pub info: XdsInfo,
}

impl XdsAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one field-2 byte pair. Returns a packet when its end marker arrives.
    pub fn feed(&mut self, data: [u8; 2]) -> Option<XdsPacket> {
        let (b1, b2) = (data[0] & 0x7F, data[1] & 0x7F);
        match b1 {
            0x01..=0x0E => {
                let class = ((b1 - 1) / 2) as usize;
                if b1 & 1 == 1 {
                    self.partial[class] = Some(Partial {
                        type_code: b2,
                        data: Vec::new(),
                    });
                    self.active = Some(class);
                } else {
                    let resumable = self.partial[class]
                        .as_ref()
                        .is_some_and(|p| p.type_code == b2);
                    self.active = resumable.then_some(class);
                }
                None
            }
            XDS_END => {
                let class = self.active.take()?;
                let partial = self.partial[class].take()?;
                let packet = XdsPacket {
                    class: XdsClass::from_index(class),
                    type_code: partial.type_code,
                    data: partial.data,
                };
                self.packets += 1;
                self.apply(&packet);
                Some(packet)
            }
            0x10..=0x1F => {
                // caption control code interrupts the packet; it may continue later
                self.active = None;
                None
            }
            0x20..=0x7F => {
                let class = self.active?;
                let partial = self.partial[class].as_mut()?;
                partial.data.extend([b1, b2].into_iter().filter(|&b| b != 0));
                if partial.data.len() > MAX_XDS_PACKET {
                    tracing::debug!("xds packet over {} bytes dropped", MAX_XDS_PACKET);
                    self.partial[class] = None;
                    self.active = None;
                    self.dropped += 1;
                }
                None
            }
            _ => None,
        }
    }

    fn apply(&mut self, packet: &XdsPacket) {
        match (packet.class, packet.type_code) {
            (XdsClass::Current, 0x03) => self.info.program_name = ascii(&packet.data),
            (XdsClass::Current, 0x05) => {
                if let [a, b, ..] = packet.data[..] {
                    self.info.content_advisory = content_advisory(a, b);
                }
            }
            (XdsClass::Channel, 0x01) => self.info.network_name = ascii(&packet.data),
            (XdsClass::Channel, 0x02) => self.info.call_letters = ascii(&packet.data),
            _ => {}
        }
    }
}

fn ascii(data: &[u8]) -> Option<String> {
    let text: String = data
        .iter()
        .filter(|b| (0x20..0x7F).contains(*b))
        .map(|&b| b as char)
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Decode the two content advisory characters.
pub fn content_advisory(a: u8, b: u8) -> Option<String> {
    let (a, b) = (a & 0x7F, b & 0x7F);
    let system = (a >> 3) & 0x03;
    match system {
        0 | 2 => {
            const MPA: [&str; 8] = ["N/A", "G", "PG", "PG-13", "R", "NC-17", "X", "Not Rated"];
            Some(format!("MPA: {}", MPA[(a & 7) as usize]))
        }
        1 => {
            const TV: [&str; 8] = ["None", "TV-Y", "TV-Y7", "TV-G", "TV-PG", "TV-14", "TV-MA", "None"];
            let rating = (b & 7) as usize;
            let mut flags = Vec::new();
            if a & 0x20 != 0 {
                flags.push("D");
            }
            if b & 0x08 != 0 {
                flags.push("L");
            }
            if b & 0x10 != 0 {
                flags.push("S");
            }
            if b & 0x20 != 0 {
                flags.push(if rating == 2 { "FV" } else { "V" });
            }
            if flags.is_empty() {
                Some(TV[rating].to_string())
            } else {
                Some(format!("{} ({})", TV[rating], flags.join("/")))
            }
        }
        _ => {
            const EN: [&str; 8] = ["E", "C", "C8+", "G", "PG", "14+", "18+", "Reserved"];
            const FR: [&str; 8] = ["E", "G", "8 ans +", "13 ans +", "16 ans +", "18 ans +", "Reserved", "Reserved"];
            let rating = (b & 7) as usize;
            if b & 0x20 == 0 {
                Some(format!("Canadian English: {}", EN[rating]))
            } else {
                Some(format!("Canadian French: {}", FR[rating]))
            }
        }
    }
}
