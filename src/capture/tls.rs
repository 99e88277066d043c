//! TLS ClientHello parsing: SNI extraction and JA3 fingerprinting
//!
//! JA3 = md5(version,ciphers,extensions,curves,point_formats) with GREASE
//! values removed, fields joined by `,` and list items by `-`.

/// TLS record content type for handshake
const TLS_HANDSHAKE: u8 = 0x16;
/// Handshake type for ClientHello
const CLIENT_HELLO: u8 = 0x01;
/// server_name extension
const EXT_SERVER_NAME: u16 = 0x0000;
/// supported_groups (elliptic curves) extension
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
/// ec_point_formats extension
const EXT_EC_POINT_FORMATS: u16 = 0x000b;

/// Parsed ClientHello fields of interest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub sni: Option<String>,
    pub ja3: Option<String>,
}

/// GREASE values are reserved 0x?a?a patterns injected by browsers; they
/// are excluded from the JA3 string by definition.
fn is_grease(value: u16) -> bool {
    (value & 0x0f0f) == 0x0a0a
}

fn read_u16(buf: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*buf.get(pos)?, *buf.get(pos + 1)?]))
}

/// Parse a TLS ClientHello from a raw TCP payload. Returns `None` when the
/// payload is not a handshake record or is truncated before the fields we
/// need.
pub fn parse_client_hello(payload: &[u8]) -> Option<ClientHello> {
    if payload.len() < 6 || payload[0] != TLS_HANDSHAKE {
        return None;
    }

    // Record header: type(1) version(2) length(2)
    let mut pos = 5;
    if payload[pos] != CLIENT_HELLO {
        return None;
    }

    // Handshake header: type(1) length(3)
    pos += 4;
    let client_version = read_u16(payload, pos)?;
    // version(2) + random(32)
    pos += 2 + 32;

    // Session ID
    let session_id_len = *payload.get(pos)? as usize;
    pos += 1 + session_id_len;

    // Cipher suites
    let cipher_len = read_u16(payload, pos)? as usize;
    pos += 2;
    let mut ciphers = Vec::new();
    let cipher_end = pos + cipher_len;
    while pos + 2 <= cipher_end {
        let cipher = read_u16(payload, pos)?;
        if !is_grease(cipher) {
            ciphers.push(cipher.to_string());
        }
        pos += 2;
    }
    pos = cipher_end;

    // Compression methods
    let compression_len = *payload.get(pos)? as usize;
    pos += 1 + compression_len;

    // Extensions
    let mut extensions = Vec::new();
    let mut curves = Vec::new();
    let mut point_formats = Vec::new();
    let mut sni = None;

    if let Some(ext_total) = read_u16(payload, pos) {
        pos += 2;
        let ext_end = (pos + ext_total as usize).min(payload.len());

        while pos + 4 <= ext_end {
            let ext_type = read_u16(payload, pos)?;
            let ext_len = read_u16(payload, pos + 2)? as usize;
            pos += 4;
            if pos + ext_len > payload.len() {
                break;
            }
            let ext_data = &payload[pos..pos + ext_len];

            if !is_grease(ext_type) {
                extensions.push(ext_type.to_string());
            }

            match ext_type {
                EXT_SERVER_NAME => {
                    // ServerNameList: list_len(2) type(1) name_len(2) name
                    if ext_data.len() >= 5 {
                        let name_len = read_u16(ext_data, 3)? as usize;
                        if 5 + name_len <= ext_data.len() {
                            sni = std::str::from_utf8(&ext_data[5..5 + name_len])
                                .ok()
                                .map(|s| s.to_string());
                        }
                    }
                }
                EXT_SUPPORTED_GROUPS => {
                    if ext_data.len() >= 2 {
                        let list_len = read_u16(ext_data, 0)? as usize;
                        let mut off = 2;
                        while off + 2 <= (2 + list_len).min(ext_data.len()) {
                            let group = read_u16(ext_data, off)?;
                            if !is_grease(group) {
                                curves.push(group.to_string());
                            }
                            off += 2;
                        }
                    }
                }
                EXT_EC_POINT_FORMATS => {
                    if !ext_data.is_empty() {
                        let fmt_len = ext_data[0] as usize;
                        for &fmt in ext_data.iter().skip(1).take(fmt_len) {
                            point_formats.push(fmt.to_string());
                        }
                    }
                }
                _ => {}
            }

            pos += ext_len;
        }
    }

    let ja3_input = format!(
        "{},{},{},{},{}",
        client_version,
        ciphers.join("-"),
        extensions.join("-"),
        curves.join("-"),
        point_formats.join("-"),
    );
    let ja3 = format!("{:x}", md5::compute(ja3_input.as_bytes()));

    Some(ClientHello {
        sni,
        ja3: Some(ja3),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal syntactically valid ClientHello.
    fn build_client_hello(
        sni: Option<&str>,
        ciphers: &[u16],
        extra_extensions: &[(u16, Vec<u8>)],
    ) -> Vec<u8> {
        let mut extensions = Vec::new();

        if let Some(name) = sni {
            let name_bytes = name.as_bytes();
            let mut data = Vec::new();
            data.extend_from_slice(&((name_bytes.len() + 3) as u16).to_be_bytes());
            data.push(0); // host_name type
            data.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
            data.extend_from_slice(name_bytes);

            extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&(data.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&data);
        }

        for (ext_type, data) in extra_extensions {
            extensions.extend_from_slice(&ext_type.to_be_bytes());
            extensions.extend_from_slice(&(data.len() as u16).to_be_bytes());
            extensions.extend_from_slice(data);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&0x0303u16.to_be_bytes()); // client_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session id length
        body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
        for &cipher in ciphers {
            body.extend_from_slice(&cipher.to_be_bytes());
        }
        body.push(1); // compression methods length
        body.push(0); // null compression
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![CLIENT_HELLO];
        let len = body.len();
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&body);

        let mut record = vec![TLS_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_sni() {
        let payload = build_client_hello(Some("api.openai.com"), &[0x1301, 0x1302], &[]);
        let hello = parse_client_hello(&payload).unwrap();
        assert_eq!(hello.sni.as_deref(), Some("api.openai.com"));
        assert!(hello.ja3.is_some());
    }

    #[test]
    fn ja3_is_stable_and_grease_invariant() {
        let plain = build_client_hello(Some("x.example"), &[0x1301, 0x1302], &[]);
        let with_grease = build_client_hello(Some("x.example"), &[0x1301, 0x0a0a, 0x1302], &[]);

        let a = parse_client_hello(&plain).unwrap().ja3.unwrap();
        let b = parse_client_hello(&with_grease).unwrap().ja3.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn different_cipher_lists_differ() {
        let a = build_client_hello(None, &[0x1301], &[]);
        let b = build_client_hello(None, &[0x1302], &[]);
        assert_ne!(
            parse_client_hello(&a).unwrap().ja3,
            parse_client_hello(&b).unwrap().ja3
        );
    }

    #[test]
    fn curves_and_point_formats_feed_the_fingerprint() {
        let groups = (EXT_SUPPORTED_GROUPS, vec![0x00, 0x04, 0x00, 0x1d, 0x00, 0x17]);
        let formats = (EXT_EC_POINT_FORMATS, vec![0x01, 0x00]);
        let with = build_client_hello(None, &[0x1301], &[groups, formats]);
        let without = build_client_hello(None, &[0x1301], &[]);
        assert_ne!(
            parse_client_hello(&with).unwrap().ja3,
            parse_client_hello(&without).unwrap().ja3
        );
    }

    #[test]
    fn rejects_non_handshake_payloads() {
        assert!(parse_client_hello(&[0x17, 0x03, 0x03, 0x00, 0x05, 1, 2, 3, 4, 5]).is_none());
        assert!(parse_client_hello(b"GET / HTTP/1.1\r\n").is_none());
        assert!(parse_client_hello(&[]).is_none());
    }

    #[test]
    fn truncated_hello_is_rejected() {
        let mut payload = build_client_hello(Some("api.openai.com"), &[0x1301], &[]);
        payload.truncate(20);
        assert!(parse_client_hello(&payload).is_none());
    }
}
