//! Packet decoding for the panel's JSON line protocol
//!
//! Every line the panel prints is expected to be one JSON object. Lines that do
//! not parse, or parse to something other than an object, are noise (the board
//! prints partial lines while it resets) and are dropped without an error.

use serde_json::{Map, Value};
use tracing::trace;

/// Top-level key carrying analog axis samples (`index -> 0..1023`)
pub const AXIS_KEY: &str = "axis";
/// Top-level key carrying button samples (`index -> 0|1`)
pub const BUTTON_KEY: &str = "btn";
/// Top-level key carrying radio frequency pairs (`index -> [active, standby]`)
pub const RADIO_KEY: &str = "rad";
/// Protocol control message (`OK`, `ERROR`, `INIT`)
pub const MESSAGE_KEY: &str = "msg";
/// Present in every full status dump
pub const VERSION_KEY: &str = "ver";

/// One decoded line from the panel
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    fields: Map<String, Value>,
}

/// Control messages the panel answers commands with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Ok,
    Error,
    Init,
}

impl ControlMessage {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "OK" => Some(ControlMessage::Ok),
            "ERROR" => Some(ControlMessage::Error),
            "INIT" => Some(ControlMessage::Init),
            _ => None,
        }
    }
}

/// Active/standby pair reported by a radio head
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioFrequencies {
    pub active: f64,
    pub standby: f64,
}

/// Decodes one raw line into a packet
///
/// Returns `None` for anything that is not a JSON object. This is not an error
/// condition; callers simply skip the line.
pub fn decode_line(line: &[u8]) -> Option<Packet> {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => Some(Packet { fields }),
        Ok(other) => {
            trace!("Dropping non-object line: {}", other);
            None
        }
        Err(e) => {
            trace!(
                "Dropping malformed line {:?}: {}",
                String::from_utf8_lossy(line),
                e
            );
            None
        }
    }
}

impl Packet {
    /// Raw access to a top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Axis samples as `(index, raw)`; entries with a non-numeric index or
    /// value are skipped
    pub fn axes(&self) -> Vec<(u16, i64)> {
        self.integer_channels(AXIS_KEY)
    }

    /// Button samples as `(index, raw)`
    pub fn buttons(&self) -> Vec<(u16, i64)> {
        self.integer_channels(BUTTON_KEY)
    }

    /// Radio samples; entries that are not a two-element numeric array are skipped
    pub fn radios(&self) -> Vec<(u16, RadioFrequencies)> {
        let Some(Value::Object(channels)) = self.fields.get(RADIO_KEY) else {
            return Vec::new();
        };

        channels
            .iter()
            .filter_map(|(key, value)| {
                let index = parse_index(key)?;
                match value.as_array().map(Vec::as_slice) {
                    Some([active, standby]) => Some((
                        index,
                        RadioFrequencies {
                            active: active.as_f64()?,
                            standby: standby.as_f64()?,
                        },
                    )),
                    _ => {
                        trace!("Skipping radio {} with unexpected shape: {}", key, value);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn message(&self) -> Option<ControlMessage> {
        self.fields
            .get(MESSAGE_KEY)
            .and_then(Value::as_str)
            .and_then(ControlMessage::parse)
    }

    /// True when this packet is (part of) a full status dump
    pub fn is_status_dump(&self) -> bool {
        self.fields.contains_key(VERSION_KEY)
    }

    fn integer_channels(&self, key: &str) -> Vec<(u16, i64)> {
        let Some(Value::Object(channels)) = self.fields.get(key) else {
            return Vec::new();
        };

        channels
            .iter()
            .filter_map(|(index, value)| {
                let index = parse_index(index)?;
                // The firmware only prints integers, but tolerate "512.0"
                let raw = value
                    .as_i64()
                    .or_else(|| value.as_f64().map(|v| v.round() as i64))?;
                Some((index, raw))
            })
            .collect()
    }
}

fn parse_index(key: &str) -> Option<u16> {
    match key.parse::<u16>() {
        Ok(index) => Some(index),
        Err(_) => {
            trace!("Skipping non-numeric channel index {:?}", key);
            None
        }
    }
}

/// Which protocol flag to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagKind {
    Ok,
    Error,
    Init,
    Dump,
}

/// "Has a response of this kind arrived" markers
///
/// Set as a side effect of decoding control packets. The serial link keeps
/// these behind the same mutex as the packet queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolFlags {
    pub ok: bool,
    pub error: bool,
    pub init: bool,
    pub dump: bool,
}

impl ProtocolFlags {
    /// Updates the flags from the reserved keys of a packet. Idempotent.
    pub fn observe(&mut self, packet: &Packet) {
        match packet.message() {
            Some(ControlMessage::Ok) => self.ok = true,
            Some(ControlMessage::Error) => self.error = true,
            Some(ControlMessage::Init) => self.init = true,
            None => {}
        }
        if packet.is_status_dump() {
            self.dump = true;
        }
    }

    pub fn is_set(&self, kind: FlagKind) -> bool {
        *self.slot(kind)
    }

    /// Returns the flag and clears it in one step
    pub fn take(&mut self, kind: FlagKind) -> bool {
        std::mem::take(self.slot_mut(kind))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn slot(&self, kind: FlagKind) -> &bool {
        match kind {
            FlagKind::Ok => &self.ok,
            FlagKind::Error => &self.error,
            FlagKind::Init => &self.init,
            FlagKind::Dump => &self.dump,
        }
    }

    fn slot_mut(&mut self, kind: FlagKind) -> &mut bool {
        match kind {
            FlagKind::Ok => &mut self.ok,
            FlagKind::Error => &mut self.error,
            FlagKind::Init => &mut self.init,
            FlagKind::Dump => &mut self.dump,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_axis_packet() {
        let packet = decode_line(br#"{"axis":{"0":512,"3":1023}}"#).unwrap();
        let mut axes = packet.axes();
        axes.sort();
        assert_eq!(axes, vec![(0, 512), (3, 1023)]);
        assert!(packet.buttons().is_empty());
    }

    #[test]
    fn garbage_is_not_a_packet() {
        let mut flags = ProtocolFlags::default();
        let decoded = decode_line(b"garbage{{{");
        assert!(decoded.is_none());
        if let Some(packet) = &decoded {
            flags.observe(packet);
        }
        assert_eq!(flags, ProtocolFlags::default());
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert!(decode_line(b"[1,2,3]").is_none());
        assert!(decode_line(b"42").is_none());
        assert!(decode_line(b"\"OK\"").is_none());
        assert!(decode_line(b"").is_none());
    }

    #[test]
    fn trailing_carriage_return_is_tolerated() {
        let packet = decode_line(b"{\"msg\":\"OK\"}\r").unwrap();
        assert_eq!(packet.message(), Some(ControlMessage::Ok));
    }

    #[test]
    fn control_packets_set_flags() {
        let mut flags = ProtocolFlags::default();
        flags.observe(&decode_line(br#"{"msg":"INIT"}"#).unwrap());
        assert!(flags.init);
        assert!(!flags.ok && !flags.error && !flags.dump);

        flags.observe(&decode_line(br#"{"ver":"1.2","axis":{}}"#).unwrap());
        assert!(flags.dump);

        flags.observe(&decode_line(br#"{"msg":"ERROR"}"#).unwrap());
        flags.observe(&decode_line(br#"{"msg":"ERROR"}"#).unwrap());
        assert!(flags.error);
    }

    #[test]
    fn unknown_message_leaves_flags_alone() {
        let mut flags = ProtocolFlags::default();
        flags.observe(&decode_line(br#"{"msg":"HELLO"}"#).unwrap());
        assert_eq!(flags, ProtocolFlags::default());
    }

    #[test]
    fn take_clears_only_the_requested_flag() {
        let mut flags = ProtocolFlags {
            ok: true,
            dump: true,
            ..Default::default()
        };
        assert!(flags.take(FlagKind::Ok));
        assert!(!flags.take(FlagKind::Ok));
        assert!(flags.is_set(FlagKind::Dump));
    }

    #[test]
    fn radios_and_bad_indices() {
        let packet =
            decode_line(br#"{"rad":{"1":[121.5,118.7],"x":[1.0,2.0],"2":[1.0]},"btn":{"a":1,"4":0}}"#)
                .unwrap();
        assert_eq!(
            packet.radios(),
            vec![(
                1,
                RadioFrequencies {
                    active: 121.5,
                    standby: 118.7
                }
            )]
        );
        assert_eq!(packet.buttons(), vec![(4, 0)]);
    }
}
