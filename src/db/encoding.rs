//! Byte-key encoders shared by the built-in indexers in [`super::indexer`].
//!
//! Every encoding here is self-delimited: a variable-length component ends
//! in a `0x00` sentinel so that a prefix query can reuse the same encoder
//! with the terminator simply omitted, and a compound index's components
//! concatenate without ambiguity.

pub const STRING_TERMINATOR: u8 = 0x00;

/// Encodes a UTF-8 string with a trailing sentinel byte.
pub fn encode_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.extend_from_slice(s.as_bytes());
    out.push(STRING_TERMINATOR);
    out
}

/// Same as [`encode_string`], but without the trailing sentinel — used for
/// prefix queries, which must match every terminated key beginning with
/// these bytes.
pub fn encode_string_prefix(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Lower-cased variant of [`encode_string`], for case-insensitive indexes.
pub fn encode_string_lower(s: &str) -> Vec<u8> {
    encode_string(&s.to_lowercase())
}

pub fn encode_string_lower_prefix(s: &str) -> Vec<u8> {
    encode_string_prefix(&s.to_lowercase())
}

pub fn encode_bool(b: bool) -> Vec<u8> {
    vec![b as u8]
}

/// Marker trait for fixed-width integers encoded big-endian so that byte
/// order matches numeric order; signed types additionally flip the sign bit
/// so that negative values sort before non-negative ones.
pub trait IntKey {
    fn encode_int(&self) -> Vec<u8>;
}

macro_rules! impl_unsigned_int_key {
    ($($t:ty),*) => {
        $(
            impl IntKey for $t {
                fn encode_int(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }
        )*
    };
}

macro_rules! impl_signed_int_key {
    ($($t:ty),*) => {
        $(
            impl IntKey for $t {
                fn encode_int(&self) -> Vec<u8> {
                    let mut bytes = self.to_be_bytes();
                    bytes[0] ^= 0x80;
                    bytes.to_vec()
                }
            }
        )*
    };
}

impl_unsigned_int_key!(u8, u16, u32, u64, u128);
impl_signed_int_key!(i8, i16, i32, i64, i128);

pub fn encode_int<T: IntKey>(v: &T) -> Vec<u8> {
    v.encode_int()
}

/// Parses a UUID supplied either as 16 raw bytes or as a 36-character
/// hyphenated string, per the two forms the database accepts as query
/// arguments.
pub fn parse_uuid_arg(bytes: &[u8]) -> Option<[u8; 16]> {
    if bytes.len() == 16 {
        let mut out = [0u8; 16];
        out.copy_from_slice(bytes);
        return Some(out);
    }
    if bytes.len() == 36 {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if let Ok(uuid) = uuid::Uuid::parse_str(text) {
                return Some(*uuid.as_bytes());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_prefix_is_a_prefix_of_terminated() {
        let full = encode_string("joe");
        let prefix = encode_string_prefix("joe");
        assert!(full.starts_with(&prefix));
        assert_eq!(full.len(), prefix.len() + 1);
    }

    #[test]
    fn string_ordering_matches_terminator_rules() {
        // "joe" < "joey" lexicographically even with the terminator, since
        // 0x00 sorts before any other byte.
        assert!(encode_string("joe") < encode_string("joey"));
    }

    #[test]
    fn signed_int_ordering_matches_numeric_ordering() {
        let neg: i32 = -5;
        let zero: i32 = 0;
        let pos: i32 = 5;
        assert!(neg.encode_int() < zero.encode_int());
        assert!(zero.encode_int() < pos.encode_int());
    }

    #[test]
    fn unsigned_int_ordering_matches_numeric_ordering() {
        let a: u64 = 10;
        let b: u64 = 300;
        assert!(a.encode_int() < b.encode_int());
    }

    #[test]
    fn uuid_accepts_binary_and_text() {
        let uuid = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let text = uuid.to_string();
        let from_text = parse_uuid_arg(text.as_bytes()).unwrap();
        let from_bytes = parse_uuid_arg(uuid.as_bytes()).unwrap();
        assert_eq!(from_text, from_bytes);
        assert_eq!(from_text, *uuid.as_bytes());
    }
}
