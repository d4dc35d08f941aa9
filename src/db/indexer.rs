//! The indexer capability: the sole extension point between the core and a
//! caller's concrete record type. The core never reflects over `R`; it only
//! calls these traits, which the caller implements (directly, or via one of
//! the built-in field indexers below) against its own types.

use smallvec::SmallVec;

use crate::error::{Error, Result};

use super::encoding::{self, IntKey};

/// The keys one record contributes to a multi-valued index. A `SmallVec`
/// avoids an allocation for the overwhelmingly common case of a record
/// contributing exactly one key, the same shape the teacher's hash index
/// uses for its "maybe unique" row lists.
pub type Keys = SmallVec<[Vec<u8>; 1]>;

/// What a [`SingleIndexer`] produced for one record.
pub enum IndexOutcome {
    Key(Vec<u8>),
    /// The record has no value for this index. Only legal when the owning
    /// [`super::schema::IndexSchema::allow_missing`] is set; otherwise the
    /// write path turns this into [`Error::MissingRequiredIndex`].
    Missing,
}

/// Projects one record to at most one key (`FromObject` in the design).
pub trait SingleIndexer<R>: Send + Sync {
    fn from_object(&self, record: &R) -> IndexOutcome;
}

/// Projects one record to zero or more keys, one entry per key
/// (`FromObjectMulti`).
pub trait MultiIndexer<R>: Send + Sync {
    fn from_object_multi(&self, record: &R) -> Keys;
}

/// A single positional query argument. Indexes declare, by construction,
/// how many of these they expect and in what order.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    I64(i64),
    U64(u64),
    Bool(bool),
}

impl<'a> Arg<'a> {
    fn type_name(&self) -> &'static str {
        match self {
            Arg::Str(_) => "str",
            Arg::Bytes(_) => "bytes",
            Arg::I64(_) => "i64",
            Arg::U64(_) => "u64",
            Arg::Bool(_) => "bool",
        }
    }
}

fn arg_mismatch(table: &str, index: &str, expected: &str, args: &[Arg<'_>]) -> Error {
    let got: Vec<&str> = args.iter().map(|a| a.type_name()).collect();
    Error::ArgMismatch(table.to_string(), index.to_string(), format!("expected {expected}, got {got:?}"))
}

/// Turns query arguments into an exact-match lookup key (`FromArgs`).
pub trait ArgsIndexer: Send + Sync {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>>;
}

/// Turns query arguments into an open (unterminated) prefix (`FromArgsPrefix`).
pub trait ArgsPrefixIndexer: ArgsIndexer {
    fn from_args_prefix(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        self.from_args(table, index, args)
    }
}

/// Most built-in indexers support both capabilities at once; `CompoundIndex`
/// and `ConditionalIndex` hold these as trait objects.
pub trait FieldIndexer<R>: SingleIndexer<R> + ArgsPrefixIndexer {}
impl<R, T: SingleIndexer<R> + ArgsPrefixIndexer> FieldIndexer<R> for T {}

type Extract<R, T> = Box<dyn Fn(&R) -> Option<T> + Send + Sync>;

/// Indexes a string field, with an implicit `0x00` terminator.
pub struct StringFieldIndex<R> {
    extract: Extract<R, String>,
    lowercase: bool,
}

impl<R> StringFieldIndex<R> {
    pub fn new(extract: impl Fn(&R) -> Option<String> + Send + Sync + 'static) -> Self {
        Self { extract: Box::new(extract), lowercase: false }
    }

    pub fn required(extract: impl Fn(&R) -> String + Send + Sync + 'static) -> Self {
        Self::new(move |r| Some(extract(r)))
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    fn encode(&self, s: &str) -> Vec<u8> {
        if self.lowercase { encoding::encode_string_lower(s) } else { encoding::encode_string(s) }
    }

    fn encode_prefix(&self, s: &str) -> Vec<u8> {
        if self.lowercase { encoding::encode_string_lower_prefix(s) } else { encoding::encode_string_prefix(s) }
    }
}

impl<R> SingleIndexer<R> for StringFieldIndex<R> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        match (self.extract)(record) {
            Some(s) => IndexOutcome::Key(self.encode(&s)),
            None => IndexOutcome::Missing,
        }
    }
}

impl<R> ArgsIndexer for StringFieldIndex<R> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        match args {
            [Arg::Str(s)] => Ok(self.encode(s)),
            _ => Err(arg_mismatch(table, index, "1 string", args)),
        }
    }
}

impl<R> ArgsPrefixIndexer for StringFieldIndex<R> {
    fn from_args_prefix(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        match args {
            [Arg::Str(s)] => Ok(self.encode_prefix(s)),
            _ => Err(arg_mismatch(table, index, "1 string", args)),
        }
    }
}

/// Indexes a string-slice field: one key is emitted per element
/// (`FromObjectMulti`).
pub struct StringSliceFieldIndex<R> {
    extract: Box<dyn Fn(&R) -> Vec<String> + Send + Sync>,
    lowercase: bool,
}

impl<R> StringSliceFieldIndex<R> {
    pub fn new(extract: impl Fn(&R) -> Vec<String> + Send + Sync + 'static) -> Self {
        Self { extract: Box::new(extract), lowercase: false }
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }
}

impl<R> MultiIndexer<R> for StringSliceFieldIndex<R> {
    fn from_object_multi(&self, record: &R) -> Keys {
        (self.extract)(record)
            .iter()
            .map(|s| if self.lowercase { encoding::encode_string_lower(s) } else { encoding::encode_string(s) })
            .collect()
    }
}

/// Converts a query argument to the concrete integer type an
/// [`IntFieldIndex`] was built for.
pub trait IntArg: IntKey + Sized {
    fn from_arg(arg: &Arg<'_>) -> Option<Self>;
}

macro_rules! impl_int_arg_signed {
    ($($t:ty),*) => {
        $(impl IntArg for $t {
            fn from_arg(arg: &Arg<'_>) -> Option<Self> {
                match arg {
                    Arg::I64(v) => <$t>::try_from(*v).ok(),
                    _ => None,
                }
            }
        })*
    };
}

macro_rules! impl_int_arg_unsigned {
    ($($t:ty),*) => {
        $(impl IntArg for $t {
            fn from_arg(arg: &Arg<'_>) -> Option<Self> {
                match arg {
                    Arg::U64(v) => <$t>::try_from(*v).ok(),
                    _ => None,
                }
            }
        })*
    };
}

impl_int_arg_signed!(i8, i16, i32, i64);
impl_int_arg_unsigned!(u8, u16, u32, u64);

/// Indexes a fixed-width integer field, encoded big-endian (sign bit
/// flipped for signed types) so byte order matches numeric order.
pub struct IntFieldIndex<R, T> {
    extract: Extract<R, T>,
}

impl<R, T: IntArg> IntFieldIndex<R, T> {
    pub fn new(extract: impl Fn(&R) -> Option<T> + Send + Sync + 'static) -> Self {
        Self { extract: Box::new(extract) }
    }

    pub fn required(extract: impl Fn(&R) -> T + Send + Sync + 'static) -> Self {
        Self::new(move |r| Some(extract(r)))
    }
}

impl<R, T: IntArg> SingleIndexer<R> for IntFieldIndex<R, T> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        match (self.extract)(record) {
            Some(v) => IndexOutcome::Key(encoding::encode_int(&v)),
            None => IndexOutcome::Missing,
        }
    }
}

impl<R, T: IntArg> ArgsIndexer for IntFieldIndex<R, T> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        match args {
            [one] => T::from_arg(one).map(|v| encoding::encode_int(&v)).ok_or_else(|| arg_mismatch(table, index, "1 integer", args)),
            _ => Err(arg_mismatch(table, index, "1 integer", args)),
        }
    }
}

impl<R, T: IntArg> ArgsPrefixIndexer for IntFieldIndex<R, T> {}

/// Indexes a boolean field as a single `0x00`/`0x01` byte.
pub struct BoolFieldIndex<R> {
    extract: Extract<R, bool>,
}

impl<R> BoolFieldIndex<R> {
    pub fn new(extract: impl Fn(&R) -> Option<bool> + Send + Sync + 'static) -> Self {
        Self { extract: Box::new(extract) }
    }

    pub fn required(extract: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        Self::new(move |r| Some(extract(r)))
    }
}

impl<R> SingleIndexer<R> for BoolFieldIndex<R> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        match (self.extract)(record) {
            Some(b) => IndexOutcome::Key(encoding::encode_bool(b)),
            None => IndexOutcome::Missing,
        }
    }
}

impl<R> ArgsIndexer for BoolFieldIndex<R> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        match args {
            [Arg::Bool(b)] => Ok(encoding::encode_bool(*b)),
            _ => Err(arg_mismatch(table, index, "1 bool", args)),
        }
    }
}

impl<R> ArgsPrefixIndexer for BoolFieldIndex<R> {}

/// Indexes a UUID field, stored as 16 raw bytes. Accepts either 16-byte
/// binary or 36-character hyphenated text as a query argument.
pub struct UuidFieldIndex<R> {
    extract: Extract<R, [u8; 16]>,
}

impl<R> UuidFieldIndex<R> {
    pub fn new(extract: impl Fn(&R) -> Option<[u8; 16]> + Send + Sync + 'static) -> Self {
        Self { extract: Box::new(extract) }
    }

    pub fn required(extract: impl Fn(&R) -> [u8; 16] + Send + Sync + 'static) -> Self {
        Self::new(move |r| Some(extract(r)))
    }
}

impl<R> SingleIndexer<R> for UuidFieldIndex<R> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        match (self.extract)(record) {
            Some(bytes) => IndexOutcome::Key(bytes.to_vec()),
            None => IndexOutcome::Missing,
        }
    }
}

impl<R> ArgsIndexer for UuidFieldIndex<R> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        let bytes = match args {
            [Arg::Bytes(b)] => encoding::parse_uuid_arg(b),
            [Arg::Str(s)] => encoding::parse_uuid_arg(s.as_bytes()),
            _ => None,
        };
        bytes.map(|b| b.to_vec()).ok_or_else(|| arg_mismatch(table, index, "16-byte or 36-char uuid", args))
    }
}

impl<R> ArgsPrefixIndexer for UuidFieldIndex<R> {}

/// Concatenates sub-indexers; query arguments are positional, one per
/// component.
pub struct CompoundIndex<R> {
    parts: Vec<Box<dyn FieldIndexer<R>>>,
}

impl<R> CompoundIndex<R> {
    pub fn new(parts: Vec<Box<dyn FieldIndexer<R>>>) -> Self {
        assert!(!parts.is_empty(), "a compound index needs at least one component");
        Self { parts }
    }
}

impl<R> SingleIndexer<R> for CompoundIndex<R> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        let mut out = Vec::new();
        for part in &self.parts {
            match part.from_object(record) {
                IndexOutcome::Key(mut bytes) => out.append(&mut bytes),
                IndexOutcome::Missing => return IndexOutcome::Missing,
            }
        }
        IndexOutcome::Key(out)
    }
}

impl<R> ArgsIndexer for CompoundIndex<R> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        if args.len() != self.parts.len() {
            return Err(arg_mismatch(table, index, &format!("{} positional args", self.parts.len()), args));
        }
        let mut out = Vec::new();
        for (part, arg) in self.parts.iter().zip(args) {
            out.extend(part.from_args(table, index, std::slice::from_ref(arg))?);
        }
        Ok(out)
    }
}

impl<R> ArgsPrefixIndexer for CompoundIndex<R> {
    fn from_args_prefix(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        if args.is_empty() || args.len() > self.parts.len() {
            return Err(arg_mismatch(table, index, &format!("1..={} positional args", self.parts.len()), args));
        }
        let mut out = Vec::new();
        let last = args.len() - 1;
        for (i, (part, arg)) in self.parts.iter().zip(args).enumerate() {
            let one = std::slice::from_ref(arg);
            if i == last {
                out.extend(part.from_args_prefix(table, index, one)?);
            } else {
                out.extend(part.from_args(table, index, one)?);
            }
        }
        Ok(out)
    }
}

/// Evaluates a predicate, then delegates to an inner indexer or reports the
/// record as missing from the index.
pub struct ConditionalIndex<R> {
    predicate: Box<dyn Fn(&R) -> bool + Send + Sync>,
    inner: Box<dyn FieldIndexer<R>>,
}

impl<R> ConditionalIndex<R> {
    pub fn new(predicate: impl Fn(&R) -> bool + Send + Sync + 'static, inner: Box<dyn FieldIndexer<R>>) -> Self {
        Self { predicate: Box::new(predicate), inner }
    }
}

impl<R> SingleIndexer<R> for ConditionalIndex<R> {
    fn from_object(&self, record: &R) -> IndexOutcome {
        if (self.predicate)(record) {
            self.inner.from_object(record)
        } else {
            IndexOutcome::Missing
        }
    }
}

impl<R> ArgsIndexer for ConditionalIndex<R> {
    fn from_args(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        self.inner.from_args(table, index, args)
    }
}

impl<R> ArgsPrefixIndexer for ConditionalIndex<R> {
    fn from_args_prefix(&self, table: &str, index: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
        self.inner.from_args_prefix(table, index, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person {
        email: String,
        age: i32,
    }

    #[test]
    fn string_index_round_trips_via_args() {
        let idx = StringFieldIndex::required(|p: &Person| p.email.clone());
        let key = match idx.from_object(&Person { email: "joe@aol.com".into(), age: 30 }) {
            IndexOutcome::Key(k) => k,
            IndexOutcome::Missing => panic!("should not be missing"),
        };
        let from_args = idx.from_args("person", "id", &[Arg::Str("joe@aol.com")]).unwrap();
        assert_eq!(key, from_args);
    }

    #[test]
    fn int_index_orders_numerically() {
        let idx = IntFieldIndex::required(|p: &Person| p.age);
        let younger = match idx.from_object(&Person { email: "a".into(), age: 21 }) {
            IndexOutcome::Key(k) => k,
            _ => unreachable!(),
        };
        let older = match idx.from_object(&Person { email: "a".into(), age: 53 }) {
            IndexOutcome::Key(k) => k,
            _ => unreachable!(),
        };
        assert!(younger < older);
    }

    #[test]
    fn compound_index_concatenates_components() {
        let idx: CompoundIndex<Person> = CompoundIndex::new(vec![
            Box::new(StringFieldIndex::required(|p: &Person| p.email.clone())),
            Box::new(IntFieldIndex::required(|p: &Person| p.age)),
        ]);
        let key = match idx.from_object(&Person { email: "joe@aol.com".into(), age: 30 }) {
            IndexOutcome::Key(k) => k,
            _ => unreachable!(),
        };
        let from_args = idx.from_args("person", "email_age", &[Arg::Str("joe@aol.com"), Arg::I64(30)]).unwrap();
        assert_eq!(key, from_args);
    }

    #[test]
    fn conditional_index_reports_missing() {
        let idx = ConditionalIndex::new(|p: &Person| p.age >= 18, Box::new(StringFieldIndex::required(|p: &Person| p.email.clone())));
        assert!(matches!(idx.from_object(&Person { email: "a".into(), age: 10 }), IndexOutcome::Missing));
        assert!(matches!(idx.from_object(&Person { email: "a".into(), age: 30 }), IndexOutcome::Key(_)));
    }
}
