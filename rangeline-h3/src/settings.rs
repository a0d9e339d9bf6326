use crate::frame::{decode_varint, encode_varint, varint_len};

const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
const QPACK_BLOCKED_STREAMS: u64 = 0x07;

/// HTTP/3 SETTINGS parameters (RFC 9114 Section 7.2.4.1).
///
/// The client runs QPACK without a dynamic table, so the defaults advertise
/// a zero table capacity and no blocked streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub qpack_max_table_capacity: u64,
    /// `None` leaves the field section size unlimited.
    pub max_field_section_size: Option<u64>,
    pub qpack_blocked_streams: u64,
}

impl Settings {
    /// Identifier/value pairs that differ from the protocol defaults.
    fn pairs(&self) -> impl Iterator<Item = (u64, u64)> {
        [
            (QPACK_MAX_TABLE_CAPACITY, Some(self.qpack_max_table_capacity).filter(|v| *v != 0)),
            (MAX_FIELD_SECTION_SIZE, self.max_field_section_size),
            (QPACK_BLOCKED_STREAMS, Some(self.qpack_blocked_streams).filter(|v| *v != 0)),
        ]
        .into_iter()
        .filter_map(|(id, value)| value.map(|v| (id, v)))
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        for (id, value) in self.pairs() {
            encode_varint(buf, id);
            encode_varint(buf, value);
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.pairs()
            .map(|(id, value)| varint_len(id) + varint_len(value))
            .sum()
    }

    /// Decode a SETTINGS payload. Unknown identifiers are skipped.
    pub fn decode(mut buf: &[u8]) -> Option<Self> {
        let mut settings = Settings::default();
        while !buf.is_empty() {
            let (id, n) = decode_varint(buf)?;
            let (value, m) = decode_varint(&buf[n..])?;
            buf = &buf[n + m..];
            match id {
                QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = Some(value),
                QPACK_BLOCKED_STREAMS => settings.qpack_blocked_streams = value,
                _ => {}
            }
        }
        Some(settings)
    }
}
