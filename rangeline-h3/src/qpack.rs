//! QPACK field sections without a dynamic table (RFC 9204).
//!
//! The client advertises a zero table capacity, so every field line it sees
//! refers to the static table or carries literals. The encoder never emits
//! Huffman strings; the decoder accepts them.

use crate::error::H3Error;
use crate::huffman;

/// A single header name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The value as UTF-8, if it is valid.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

// ── Static table (RFC 9204 Appendix A) ──────────────────────────────

static STATIC_TABLE: [(&str, &str); 99] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    ("content-security-policy", "script-src 'none'; object-src 'none'; base-uri 'none'"),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

enum StaticMatch {
    Full(usize),
    Name(usize),
    None,
}

fn lookup(field: &HeaderField) -> StaticMatch {
    let mut name_match = None;
    for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
        if name.as_bytes() != field.name.as_slice() {
            continue;
        }
        if value.as_bytes() == field.value.as_slice() {
            return StaticMatch::Full(i);
        }
        name_match.get_or_insert(i);
    }
    name_match.map_or(StaticMatch::None, StaticMatch::Name)
}

fn static_entry(index: u64) -> Result<(&'static str, &'static str), H3Error> {
    usize::try_from(index)
        .ok()
        .and_then(|i| STATIC_TABLE.get(i))
        .copied()
        .ok_or(H3Error::QpackDecodingFailed)
}

// ── Prefix integers (RFC 9204 Section 4.1.1) ───────────────────────

/// Append an integer using the low `bits` bits of the first byte; the high
/// bits of that byte come from `flags`.
fn put_int(buf: &mut Vec<u8>, flags: u8, bits: u32, mut value: u64) {
    let limit = (1u64 << bits) - 1;
    if value < limit {
        buf.push(flags | value as u8);
        return;
    }
    buf.push(flags | limit as u8);
    value -= limit;
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a raw (non-Huffman) string whose length prefix has `bits` bits.
fn put_str(buf: &mut Vec<u8>, flags: u8, bits: u32, s: &[u8]) {
    put_int(buf, flags, bits, s.len() as u64);
    buf.extend_from_slice(s);
}

// ── Encoder ─────────────────────────────────────────────────────────

/// Encode `headers` as a field section referencing only the static table.
pub fn encode(headers: &[HeaderField], buf: &mut Vec<u8>) {
    // Required Insert Count = 0, Delta Base = 0.
    buf.extend_from_slice(&[0x00, 0x00]);

    for field in headers {
        match lookup(field) {
            // Indexed field line, static: 11 + 6-bit index.
            StaticMatch::Full(index) => put_int(buf, 0xc0, 6, index as u64),
            // Literal with static name reference: 01 N=0 T=1 + 4-bit index.
            StaticMatch::Name(index) => {
                put_int(buf, 0x50, 4, index as u64);
                put_str(buf, 0x00, 7, &field.value);
            }
            // Literal with literal name: 001 N=0 H=0 + 3-bit length.
            StaticMatch::None => {
                put_str(buf, 0x20, 3, &field.name);
                put_str(buf, 0x00, 7, &field.value);
            }
        }
    }
}

// ── Decoder ─────────────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Result<u8, H3Error> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(H3Error::QpackDecodingFailed)
    }

    fn int(&mut self, bits: u32) -> Result<u64, H3Error> {
        let limit = (1u64 << bits) - 1;
        let mut value = u64::from(self.peek()?) & limit;
        self.pos += 1;
        if value < limit {
            return Ok(value);
        }
        let mut shift = 0u32;
        loop {
            let byte = self.peek()?;
            self.pos += 1;
            if shift > 56 {
                return Err(H3Error::QpackDecodingFailed);
            }
            value += u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// A string literal whose Huffman flag is `huffman_bit` in the first
    /// byte and whose length uses the `bits` bits below it.
    fn string(&mut self, huffman_bit: u8, bits: u32) -> Result<Vec<u8>, H3Error> {
        let huffman = self.peek()? & huffman_bit != 0;
        let len = usize::try_from(self.int(bits)?).map_err(|_| H3Error::QpackDecodingFailed)?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(H3Error::QpackDecodingFailed)?;
        let raw = &self.buf[self.pos..end];
        self.pos = end;
        if huffman {
            huffman::decode(raw)
        } else {
            Ok(raw.to_vec())
        }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// Decode a field section.
///
/// Any reference to the dynamic table is an error since the client never
/// grants the peer a table.
pub fn decode(buf: &[u8]) -> Result<Vec<HeaderField>, H3Error> {
    let mut r = Reader { buf, pos: 0 };
    if r.int(8)? != 0 {
        return Err(H3Error::QpackDecodingFailed);
    }
    r.int(7)?;

    let mut headers = Vec::new();
    while !r.done() {
        let first = r.peek()?;
        let field = if first & 0x80 != 0 {
            // 1T: indexed field line.
            if first & 0x40 == 0 {
                return Err(H3Error::QpackDecodingFailed);
            }
            let (name, value) = static_entry(r.int(6)?)?;
            HeaderField::new(name, value)
        } else if first & 0x40 != 0 {
            // 01NT: literal with name reference.
            if first & 0x10 == 0 {
                return Err(H3Error::QpackDecodingFailed);
            }
            let (name, _) = static_entry(r.int(4)?)?;
            HeaderField::new(name, r.string(0x80, 7)?)
        } else if first & 0x20 != 0 {
            // 001NH: literal with literal name.
            let name = r.string(0x08, 3)?;
            HeaderField::new(name, r.string(0x80, 7)?)
        } else {
            // Post-base forms only address the dynamic table.
            return Err(H3Error::QpackDecodingFailed);
        };
        headers.push(field);
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(lines: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x00, 0x00];
        buf.extend_from_slice(lines);
        buf
    }

    #[test]
    fn request_headers_use_static_entries() {
        let headers = vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":scheme", "https"),
            HeaderField::new(":authority", "media.example.com"),
            HeaderField::new(":path", "/video/seg.mp4?token=1"),
            HeaderField::new("range", "bytes=0-65535"),
            HeaderField::new("x-session", "42"),
        ];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);

        // :method GET is static index 17, :scheme https is 23.
        assert_eq!(&buf[..4], &[0x00, 0x00, 0xc0 | 17, 0xc0 | 23]);
        assert_eq!(decode(&buf).unwrap(), headers);
    }

    #[test]
    fn long_values_use_continuation_bytes() {
        let value = "v".repeat(300);
        let headers = vec![HeaderField::new("user-agent", value.as_str())];
        let mut buf = Vec::new();
        encode(&headers, &mut buf);
        assert_eq!(decode(&buf).unwrap(), headers);
    }

    #[test]
    fn response_with_huffman_content_range() {
        // :status 206 (index 65), then content-range as a literal name with
        // a Huffman-coded value.
        let mut lines = vec![0xc0 | 0x3f, 65 - 63];
        put_str(&mut lines, 0x20, 3, b"content-range");
        let coded = [0x8f, 0xd2, 0x4a, 0x85, 0x00, 0xb3, 0xef, 0xb0, 0x10, 0x00, 0x1f];
        put_int(&mut lines, 0x80, 7, coded.len() as u64);
        lines.extend_from_slice(&coded);

        let headers = decode(&section(&lines)).unwrap();
        assert_eq!(headers[0], HeaderField::new(":status", "206"));
        assert_eq!(headers[1].name, b"content-range");
        assert_eq!(headers[1].value_str(), Some("bytes 0-99/1000"));
    }

    #[test]
    fn dynamic_references_are_rejected() {
        // Non-zero Required Insert Count.
        assert!(decode(&[0x01, 0x00]).is_err());
        // Indexed field line with T=0 (dynamic).
        assert!(decode(&section(&[0x80])).is_err());
        // Post-base indexed field line.
        assert!(decode(&section(&[0x10])).is_err());
    }

    #[test]
    fn truncated_literal_is_rejected() {
        let mut lines = Vec::new();
        put_str(&mut lines, 0x20, 3, b"x-long-name");
        lines.truncate(lines.len() - 2);
        assert!(decode(&section(&lines)).is_err());
        assert!(decode(&section(&[0xff])).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn out_of_range_static_index() {
        assert!(decode(&section(&[0xc0 | 0x3f, 99 - 63])).is_err());
    }
}
