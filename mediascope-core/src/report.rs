//! Output model handed to the renderers.
//!
//! The core fills these in once per file; renderers only read them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::display;
use crate::media::{ContainerKind, StreamKind};

/// One (name, display value) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stream {
    pub kind: StreamKind,
    pub fields: Vec<Field>,
    /// Machine-readable values keyed by snake_case name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub machine: BTreeMap<String, String>,
}

impl Stream {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            machine: BTreeMap::new(),
        }
    }

    /// Append a display field. Replaces an earlier field of the same name in place.
    pub fn push(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.value = value,
            None => self.fields.push(Field {
                name: name.to_string(),
                value,
            }),
        }
        self
    }

    pub fn push_opt<T: ToString>(&mut self, name: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.push(name, value.to_string());
        }
        self
    }

    /// Display field plus raw machine value under `key_of(name)`.
    pub fn push_both(&mut self, name: &str, display: impl Into<String>, raw: impl ToString) -> &mut Self {
        self.push(name, display);
        self.machine.insert(key_of(name), raw.to_string());
        self
    }

    pub fn set_key(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.machine.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn key(&self, key: &str) -> Option<&str> {
        self.machine.get(key).map(String::as_str)
    }
}

/// "Bit rate mode" -> "bit_rate_mode"
pub fn key_of(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BitrateMode {
    Constant,
    Variable,
}

impl BitrateMode {
    pub fn name(&self) -> &'static str {
        match self {
            BitrateMode::Constant => "Constant",
            BitrateMode::Variable => "Variable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub format: ContainerKind,
    pub file_size: u64,
    pub duration_ms: Option<u64>,
    pub bitrate_mode: Option<BitrateMode>,
    pub overall_bitrate: Option<u64>,
    /// Container bytes that are not elementary stream payload.
    pub stream_overhead: Option<u64>,
    /// (min, max) multiplex bitrate from PCR intervals.
    pub bitrate_bracket: Option<(u64, u64)>,
}

impl ContainerInfo {
    pub fn new(format: ContainerKind, file_size: u64) -> Self {
        Self {
            format,
            file_size,
            duration_ms: None,
            bitrate_mode: None,
            overall_bitrate: None,
            stream_overhead: None,
            bitrate_bracket: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub general: Stream,
    pub container: ContainerInfo,
    pub streams: Vec<Stream>,
}

impl Report {
    pub fn new(format: ContainerKind, file_size: u64) -> Self {
        Self {
            general: Stream::new(StreamKind::General),
            container: ContainerInfo::new(format, file_size),
            streams: Vec::new(),
        }
    }

    pub fn streams_of(&self, kind: StreamKind) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(move |s| s.kind == kind)
    }

    /// Write the container values into the General stream. Fields already
    /// pushed by a container probe keep their position.
    pub fn finish(&mut self) {
        let c = &self.container;
        let g = &mut self.general;
        g.push("Format", c.format.name());
        g.push_both("File size", display::file_size(c.file_size), c.file_size);
        if let Some(ms) = c.duration_ms {
            g.push_both("Duration", display::duration(ms), ms);
        }
        if let Some(mode) = c.bitrate_mode {
            g.push("Overall bit rate mode", mode.name());
        }
        if let Some(bps) = c.overall_bitrate {
            g.push_both("Overall bit rate", display::bitrate(bps), bps);
        }
        if let Some((min, max)) = c.bitrate_bracket {
            g.set_key("overall_bit_rate_minimum", min);
            g.set_key("overall_bit_rate_maximum", max);
        }
        if let Some(overhead) = c.stream_overhead {
            g.push_both("Stream size", display::file_size(overhead), overhead);
        }
        for kind in [StreamKind::Video, StreamKind::Audio, StreamKind::Text] {
            let count = self.streams.iter().filter(|s| s.kind == kind).count();
            if count > 0 {
                g.set_key(&format!("count_of_{}_streams", kind.name().to_ascii_lowercase()), count);
            }
        }
    }
}
