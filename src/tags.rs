//! The tag codec: converts between the in-memory key/value representation
//! and the packed tag byte stream, using a static dictionary of well-known
//! keys, values and relation roles.
//!
//! Wire format for a single tag, given a signed byte `code`:
//! - `code > 0`: an exact `(key, value)` pair looked up in the dictionary; no
//!   inline strings follow.
//! - `code < 0`: a known key, freetext value; one length-prefixed value
//!   string follows.
//! - `code == 0`: fully freetext; two length-prefixed strings follow (key
//!   then value).
//!
//! A handful of noise keys carry no information worth storing and are
//! dropped entirely during encoding (`created_by`, `import_uuid`,
//! `attribution`, anything starting with `source` or `tiger:`).
//!
//! A full tag *list* is an unsigned varint count followed by that many
//! encoded tags. An entity with no tags therefore encodes to the single byte
//! `0x00`.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{new_error, ErrorKind, Result};
use crate::varint::{read_unsigned, write_unsigned};

/// A decoded key/value tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyVal {
    pub key: String,
    pub val: String,
}

/// The static tag dictionary. Seeded with enough of the most frequent OSM
/// keys/values to exercise every wire-format branch; a production build
/// would compile this from a frequency table over a planet extract.
struct Dictionary {
    pair_to_code: HashMap<(&'static str, &'static str), i8>,
    code_to_pair: Vec<(&'static str, &'static str)>,
    key_to_code: HashMap<&'static str, i8>,
    code_to_key: Vec<&'static str>,
    role_to_code: HashMap<&'static str, u8>,
    code_to_role: Vec<&'static str>,
}

/// `(key, value)` pairs common enough to deserve an exact dictionary code.
/// Index + 1 is the positive `code` value (code 0 is reserved for freetext).
const EXACT_PAIRS: &[(&str, &str)] = &[
    ("highway", "residential"),
    ("highway", "service"),
    ("highway", "footway"),
    ("highway", "unclassified"),
    ("highway", "track"),
    ("highway", "path"),
    ("highway", "primary"),
    ("highway", "secondary"),
    ("highway", "tertiary"),
    ("highway", "motorway"),
    ("building", "yes"),
    ("building", "house"),
    ("building", "residential"),
    ("natural", "tree"),
    ("natural", "water"),
    ("natural", "coastline"),
    ("landuse", "residential"),
    ("landuse", "farmland"),
    ("landuse", "forest"),
    ("surface", "asphalt"),
    ("surface", "paved"),
    ("surface", "unpaved"),
    ("surface", "gravel"),
    ("oneway", "yes"),
    ("oneway", "no"),
    ("service", "driveway"),
    ("service", "parking_aisle"),
    ("amenity", "parking"),
    ("amenity", "school"),
    ("amenity", "place_of_worship"),
    ("power", "tower"),
    ("power", "pole"),
    ("power", "line"),
    ("waterway", "stream"),
    ("waterway", "river"),
    ("barrier", "fence"),
    ("barrier", "wall"),
    ("leisure", "park"),
    ("access", "private"),
    ("bridge", "yes"),
    ("tunnel", "yes"),
];

/// Keys common enough to deserve a dictionary code even with a freetext value.
const KNOWN_KEYS: &[&str] = &[
    "name",
    "highway",
    "building",
    "natural",
    "landuse",
    "surface",
    "oneway",
    "service",
    "amenity",
    "power",
    "waterway",
    "barrier",
    "leisure",
    "access",
    "bridge",
    "tunnel",
    "ref",
    "addr:housenumber",
    "addr:street",
    "addr:city",
    "addr:postcode",
    "maxspeed",
    "lanes",
    "lit",
    "layer",
    "width",
    "height",
    "operator",
    "network",
    "cycleway",
    "railway",
    "shop",
    "website",
    "phone",
    "opening_hours",
    "wikidata",
    "wikipedia",
];

/// Relation roles common enough to deserve a one-byte code (0 = freetext).
const KNOWN_ROLES: &[&str] = &[
    "outer", "inner", "from", "to", "via", "stop", "platform", "main_stream",
    "side_stream", "label", "admin_centre", "subarea",
];

/// Tag keys carrying no queryable information; dropped during encoding.
const NOISE_KEYS: &[&str] = &["created_by", "import_uuid", "attribution"];

fn is_noise_key(key: &str) -> bool {
    NOISE_KEYS.contains(&key) || key.starts_with("source") || key.starts_with("tiger:")
}

fn build_dictionary() -> Dictionary {
    let mut pair_to_code = HashMap::with_capacity(EXACT_PAIRS.len());
    let mut code_to_pair = Vec::with_capacity(EXACT_PAIRS.len());
    for (i, &(k, v)) in EXACT_PAIRS.iter().enumerate() {
        let code = (i + 1) as i8;
        pair_to_code.insert((k, v), code);
        code_to_pair.push((k, v));
    }

    let mut key_to_code = HashMap::with_capacity(KNOWN_KEYS.len());
    let mut code_to_key = Vec::with_capacity(KNOWN_KEYS.len());
    for (i, &k) in KNOWN_KEYS.iter().enumerate() {
        // Negative codes: -1 for the first entry, etc.
        let code = -((i + 1) as i8);
        key_to_code.insert(k, code);
        code_to_key.push(k);
    }

    let mut role_to_code = HashMap::with_capacity(KNOWN_ROLES.len());
    let mut code_to_role = Vec::with_capacity(KNOWN_ROLES.len());
    for (i, &r) in KNOWN_ROLES.iter().enumerate() {
        let code = (i + 1) as u8;
        role_to_code.insert(r, code);
        code_to_role.push(r);
    }

    Dictionary {
        pair_to_code,
        code_to_pair,
        key_to_code,
        code_to_key,
        role_to_code,
        code_to_role,
    }
}

fn dictionary() -> &'static Dictionary {
    static DICT: OnceLock<Dictionary> = OnceLock::new();
    DICT.get_or_init(build_dictionary)
}

/// Returns a positive code if `(key, val)` is an exact dictionary pair, a
/// negative code if only `key` is dictionary-known, else `0`.
pub fn encode_tag_code(key: &str, val: &str) -> i8 {
    let dict = dictionary();
    if let Some(&code) = dict.pair_to_code.get(&(key, val)) {
        return code;
    }
    if let Some(&code) = dict.key_to_code.get(key) {
        return code;
    }
    0
}

fn decode_pair_code(code: i8) -> Option<(&'static str, &'static str)> {
    dictionary().code_to_pair.get((code - 1) as usize).copied()
}

fn decode_key_code(code: i8) -> Option<&'static str> {
    // code is negative; ((-code) - 1) is the index.
    dictionary().code_to_key.get(((-code) - 1) as usize).copied()
}

pub fn encode_role(role: &str) -> u8 {
    dictionary().role_to_code.get(role).copied().unwrap_or(0)
}

pub fn decode_role_dictionary(code: u8) -> Option<&'static str> {
    if code == 0 {
        None
    } else {
        dictionary().code_to_role.get((code - 1) as usize).copied()
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_unsigned(buf, s.len() as u64).expect("writing to a Vec<u8> cannot fail");
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(bytes: &[u8]) -> Result<(String, usize)> {
    let mut cursor = bytes;
    let len = read_unsigned(&mut cursor).map_err(|_| {
        new_error(ErrorKind::MalformedPbf {
            detail: "truncated string length in tag payload".into(),
            offset: None,
        })
    })? as usize;
    let header_len = bytes.len() - cursor.len();
    if cursor.len() < len {
        return Err(new_error(ErrorKind::MalformedPbf {
            detail: "truncated string body in tag payload".into(),
            offset: None,
        }));
    }
    let s = std::str::from_utf8(&cursor[..len])
        .map_err(|_| new_error(ErrorKind::MalformedPbf {
            detail: "tag payload string is not valid UTF-8".into(),
            offset: None,
        }))?
        .to_string();
    Ok((s, header_len + len))
}

/// Encode one tag into its wire representation, appending to `buf`. Returns
/// `true` if the tag was a noise key and was dropped (encoded as nothing).
pub fn encode_tag(buf: &mut Vec<u8>, key: &str, val: &str) {
    if is_noise_key(key) {
        return;
    }
    let code = encode_tag_code(key, val);
    buf.push(code as u8);
    if code == 0 {
        write_string(buf, key);
        write_string(buf, val);
    } else if code < 0 {
        write_string(buf, val);
    }
    // code > 0: no inline strings, dictionary supplies both key and value.
}

/// Decode a single tag starting at `bytes[0]`. Returns the tag and the
/// number of bytes consumed.
pub fn decode_tag(bytes: &[u8]) -> Result<(KeyVal, usize)> {
    if bytes.is_empty() {
        return Err(new_error(ErrorKind::MalformedPbf {
            detail: "empty tag payload".into(),
            offset: None,
        }));
    }
    let code = bytes[0] as i8;
    let mut consumed = 1;
    if code > 0 {
        let (k, v) = decode_pair_code(code).ok_or_else(|| {
            new_error(ErrorKind::MalformedPbf {
                detail: format!("unknown exact-pair tag code {code}"),
                offset: None,
            })
        })?;
        Ok((
            KeyVal {
                key: k.to_string(),
                val: v.to_string(),
            },
            consumed,
        ))
    } else if code < 0 {
        let k = decode_key_code(code).ok_or_else(|| {
            new_error(ErrorKind::MalformedPbf {
                detail: format!("unknown key-only tag code {code}"),
                offset: None,
            })
        })?;
        let (v, n) = read_string(&bytes[consumed..])?;
        consumed += n;
        Ok((
            KeyVal {
                key: k.to_string(),
                val: v,
            },
            consumed,
        ))
    } else {
        let (k, n1) = read_string(&bytes[consumed..])?;
        consumed += n1;
        let (v, n2) = read_string(&bytes[consumed..])?;
        consumed += n2;
        Ok((KeyVal { key: k, val: v }, consumed))
    }
}

/// Encode a full tag list: an unsigned varint count followed by that many
/// encoded tags. Noise keys are filtered out before the count is computed.
/// Fails with `CapacityExceeded` if the encoded payload would exceed
/// [`crate::limits::MAX_TAG_PAYLOAD`].
pub fn encode_tag_list(tags: &[(String, String)]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut count: u64 = 0;
    for (k, v) in tags {
        if is_noise_key(k) {
            continue;
        }
        encode_tag(&mut body, k, v);
        count += 1;
    }
    let mut out = Vec::with_capacity(body.len() + 5);
    write_unsigned(&mut out, count).expect("writing to a Vec<u8> cannot fail");
    out.extend_from_slice(&body);
    if out.len() > crate::limits::MAX_TAG_PAYLOAD {
        return Err(new_error(ErrorKind::CapacityExceeded {
            what: "single entity's tag payload exceeds 1 MiB",
        }));
    }
    Ok(out)
}

/// Decode a full tag list previously produced by [`encode_tag_list`].
pub fn decode_tag_list(bytes: &[u8]) -> Result<Vec<KeyVal>> {
    let mut cursor = bytes;
    let count = read_unsigned(&mut cursor).map_err(|_| {
        new_error(ErrorKind::MalformedPbf {
            detail: "truncated tag list count".into(),
            offset: None,
        })
    })?;
    let mut offset = bytes.len() - cursor.len();
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (kv, consumed) = decode_tag(&bytes[offset..])?;
        offset += consumed;
        out.push(kv);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tag_list_is_one_zero_byte() {
        let encoded = encode_tag_list(&[]).unwrap();
        assert_eq!(encoded, vec![0x00]);
    }

    #[test]
    fn roundtrip_mixed_tag_list() {
        let tags = vec![
            ("highway".to_string(), "residential".to_string()), // exact pair
            ("highway".to_string(), "bizarre_value".to_string()), // key-only
            ("totally_custom_key".to_string(), "value".to_string()), // freetext
        ];
        let encoded = encode_tag_list(&tags).unwrap();
        let decoded = decode_tag_list(&encoded).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], KeyVal { key: "highway".into(), val: "residential".into() });
        assert_eq!(decoded[1], KeyVal { key: "highway".into(), val: "bizarre_value".into() });
        assert_eq!(decoded[2], KeyVal { key: "totally_custom_key".into(), val: "value".into() });
    }

    #[test]
    fn noise_keys_are_dropped() {
        let tags = vec![
            ("created_by".to_string(), "JOSM".to_string()),
            ("source".to_string(), "Bing".to_string()),
            ("source:date".to_string(), "2020".to_string()),
            ("tiger:county".to_string(), "Foo".to_string()),
            ("name".to_string(), "Keep Me".to_string()),
        ];
        let encoded = encode_tag_list(&tags).unwrap();
        let decoded = decode_tag_list(&encoded).unwrap();
        assert_eq!(decoded, vec![KeyVal { key: "name".into(), val: "Keep Me".into() }]);
    }

    #[test]
    fn role_roundtrip() {
        assert_eq!(encode_role("outer"), 1);
        assert_eq!(decode_role_dictionary(1), Some("outer"));
        assert_eq!(encode_role("some_freetext_role"), 0);
        assert_eq!(decode_role_dictionary(0), None);
    }

    #[test]
    fn oversized_payload_is_capacity_exceeded() {
        let huge_value = "x".repeat(crate::limits::MAX_TAG_PAYLOAD + 1);
        let tags = vec![("k".to_string(), huge_value)];
        assert!(encode_tag_list(&tags).is_err());
    }
}
