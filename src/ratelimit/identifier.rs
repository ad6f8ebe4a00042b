//! Caller identifier extraction.
//!
//! A request is counted under one opaque identifier derived from its headers:
//! a hashed API key when present, else the first forwarded client address,
//! else `ip:unknown`.

use http::HeaderMap;

/// Header carrying the caller secret.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying the proxy chain of client addresses.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Identifier used when a request carries nothing to identify it.
pub const UNKNOWN_IDENTIFIER: &str = "ip:unknown";

/// Derive the counting identifier for a request.
///
/// The same header values always produce the same identifier, on every node,
/// so both the local and the shared counters see stable keys. The raw API key
/// never appears in the result.
pub fn get_identifier(headers: &HeaderMap) -> String {
    if let Some(api_key) = header_bytes(headers, API_KEY_HEADER) {
        return format!("apikey:{}", hash_secret(api_key));
    }

    if let Some(forwarded) = header_str(headers, FORWARDED_FOR_HEADER) {
        let client = forwarded.split(',').next().unwrap_or_default().trim();
        if !client.is_empty() {
            return format!("ip:{}", client);
        }
    }

    UNKNOWN_IDENTIFIER.to_string()
}

/// Raw header bytes, so keys with non-visible-ASCII octets still count as keys.
fn header_bytes<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a [u8]> {
    headers
        .get(name)
        .map(|v| v.as_bytes())
        .filter(|v| !v.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Fast non-cryptographic hash of a secret, rendered as 16 hex digits.
///
/// Fx-style rotate/multiply mixing. Stable across processes and platforms,
/// which a seeded hasher would not be.
fn hash_secret(secret: &[u8]) -> String {
    const K: u64 = 0x517c_c1b7_2722_0a95;

    let mut hash: u64 = 0;
    for &byte in secret {
        hash = (hash.rotate_left(5) ^ u64::from(byte)).wrapping_mul(K);
    }
    hash = (hash.rotate_left(5) ^ secret.len() as u64).wrapping_mul(K);

    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_api_key_takes_precedence() {
        let h = headers(&[("x-api-key", "secret-1"), ("x-forwarded-for", "1.2.3.4")]);
        let id = get_identifier(&h);

        assert!(id.starts_with("apikey:"));
        assert!(!id.contains("secret-1"));
        assert_eq!(id.len(), "apikey:".len() + 16);
    }

    #[test]
    fn test_identifier_is_deterministic() {
        let h = headers(&[("x-api-key", "secret-1")]);
        assert_eq!(get_identifier(&h), get_identifier(&h.clone()));
        assert_eq!(hash_secret(b"secret-1"), hash_secret(b"secret-1"));
    }

    #[test]
    fn test_distinct_keys_get_distinct_identifiers() {
        let a = get_identifier(&headers(&[("x-api-key", "secret-1")]));
        let b = get_identifier(&headers(&[("x-api-key", "secret-2")]));
        let c = get_identifier(&headers(&[("x-api-key", "1-terces")]));

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_api_key_with_opaque_bytes_is_still_a_key() {
        let mut h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        h.insert("x-api-key", HeaderValue::from_bytes(b"key\xff").unwrap());
        let id = get_identifier(&h);

        assert!(id.starts_with("apikey:"), "{}", id);
        assert_eq!(id, format!("apikey:{}", hash_secret(b"key\xff")));
        assert_ne!(id, get_identifier(&headers(&[("x-api-key", "key")])));
    }

    #[test]
    fn test_forwarded_for_uses_first_hop() {
        let h = headers(&[("x-forwarded-for", " 203.0.113.7 , 10.0.0.1, 10.0.0.2")]);
        assert_eq!(get_identifier(&h), "ip:203.0.113.7");

        let h = headers(&[("x-forwarded-for", "198.51.100.1")]);
        assert_eq!(get_identifier(&h), "ip:198.51.100.1");
    }

    #[test]
    fn test_no_identifying_headers() {
        assert_eq!(get_identifier(&HeaderMap::new()), "ip:unknown");
        assert_eq!(get_identifier(&headers(&[("x-forwarded-for", " , 10.0.0.1")])), "ip:unknown");
        assert_eq!(get_identifier(&headers(&[("user-agent", "curl/8")])), "ip:unknown");
    }
}
