//! # Orbpack
//!
//! A small, bounded, schema-agnostic TLV encoding for the dynamic values
//! that orb peers exchange as call arguments and results.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//!
//! All integers are Little-Endian. Every item can be skipped without
//! knowing its schema, which lets decoders ignore fields they do not know.

mod pack;
mod value;

pub use pack::Pack;
pub use value::Value;
pub use value::MAX_DEPTH;
pub use value::decode_value;
pub use value::encode_value;


/// Encoding and decoding errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// A different tag was found where a specific one was required.
    UnexpectedTag { expected: Tag, found: Tag },
    /// String data is not valid UTF-8, or a char is not a valid scalar value.
    InvalidUtf8,
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// Closing a scope that is not the innermost open scope.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// Attempted to close a scope when only the root remains.
    ScopeUnderflow,
    /// Attempted to finish the encoder with open scopes.
    ScopeStillOpen,
    /// Wrote a second item into a scope holding exactly one.
    TooManyItems(Scope),
    /// Closed a scope holding exactly one item without writing it.
    MissingItem(Scope),
    /// Wrote a non-entry item directly into a map.
    InvalidMapEntry,
    /// A value did not have the shape the caller asked for.
    TypeMismatch { expected: &'static str, found: &'static str },
    /// An integer did not fit the requested width.
    OutOfRange(&'static str),
    /// Containers nested deeper than `MAX_DEPTH`.
    TooDeep(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::UnexpectedTag { expected, found } => {
                write!(f, "unexpected tag: expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "invalid utf-8"),
            Error::UnexpectedEnd => write!(f, "unexpected end of buffer"),
            Error::TooLarge(len) => write!(f, "length {} exceeds u32::MAX", len),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "scope mismatch: expected {:?}, found {:?}", expected, actual)
            }
            Error::ScopeUnderflow => write!(f, "no open scope to close"),
            Error::ScopeStillOpen => write!(f, "encoder finished with open scopes"),
            Error::TooManyItems(s) => write!(f, "scope {:?} holds exactly one item", s),
            Error::MissingItem(s) => write!(f, "scope {:?} closed without its item", s),
            Error::InvalidMapEntry => write!(f, "maps only hold key/value entries"),
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::OutOfRange(ty) => write!(f, "value out of range for {}", ty),
            Error::TooDeep(limit) => write!(f, "nesting exceeds {} levels", limit),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for orbpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    True = 0x02,
    False = 0x03,
    U64 = 0x04,
    S64 = 0x05,
    F64 = 0x06,
    Char = 0x07,
    None = 0x08,

    Str = 0x10,
    Bytes = 0x11,

    List = 0x20,
    Map = 0x21,
    Entry = 0x22,
    Some = 0x23,
}

impl Tag {
    /// Returns the tag for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Unit),
            0x02 => Some(Tag::True),
            0x03 => Some(Tag::False),
            0x04 => Some(Tag::U64),
            0x05 => Some(Tag::S64),
            0x06 => Some(Tag::F64),
            0x07 => Some(Tag::Char),
            0x08 => Some(Tag::None),
            0x10 => Some(Tag::Str),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x22 => Some(Tag::Entry),
            0x23 => Some(Tag::Some),
            _ => None,
        }
    }

    fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::True | Tag::False | Tag::None => Some(0),
            Tag::Char => Some(4),
            Tag::U64 | Tag::S64 | Tag::F64 => Some(8),
            Tag::Str | Tag::Bytes | Tag::List | Tag::Map | Tag::Entry | Tag::Some => None,
        }
    }
}

/// An open container on the `Encoder` stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The virtual root; allows any number of items.
    Root,
    /// Ordered sequence; allows any number of items.
    List,
    /// Key/value container; only allows `Entry` items.
    Map,
    /// A named payload; allows exactly one item after the key.
    Entry,
    /// `Option::Some`; allows exactly one item.
    Some,
}

struct Open {
    scope: Scope,
    /// Offset of the body, directly after the 4-byte length slot.
    body: usize,
    items: usize,
}

/// A bounded, scope-checked encoder.
///
/// Container lengths are back-patched when the scope closes, so callers
/// stream items without knowing sizes up front.
pub struct Encoder {
    buf: Vec<u8>,
    stack: Vec<Open>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: vec![Open { scope: Scope::Root, body: 0, items: 0 }],
        }
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if self.stack.len() > 1 {
            return Err(Error::ScopeStillOpen);
        }
        Ok(self.buf)
    }

    fn top(&mut self) -> &mut Open {
        // The root frame is never popped.
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn admit(&mut self, tag: Tag) -> Result<()> {
        let top = self.top();
        match top.scope {
            Scope::Root | Scope::List => Ok(()),
            Scope::Map if tag == Tag::Entry => Ok(()),
            Scope::Map => Err(Error::InvalidMapEntry),
            Scope::Entry | Scope::Some if top.items >= 1 => Err(Error::TooManyItems(top.scope)),
            Scope::Entry | Scope::Some => Ok(()),
        }
    }

    fn scalar(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(data);
        self.top().items += 1;
        Ok(())
    }

    fn blob(&mut self, tag: Tag, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| Error::TooLarge(data.len()))?;
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.top().items += 1;
        Ok(())
    }

    fn begin(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.admit(tag)?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&[0; 4]);
        let body = self.buf.len();
        self.stack.push(Open { scope, body, items: 0 });
        Ok(())
    }

    fn end(&mut self, expected: Scope) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(Error::ScopeUnderflow);
        }
        let top = self.top();
        if top.scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: top.scope });
        }
        if matches!(top.scope, Scope::Entry | Scope::Some) && top.items == 0 {
            return Err(Error::MissingItem(top.scope));
        }

        let body = top.body;
        let len = self.buf.len() - body;
        let len = u32::try_from(len).map_err(|_| Error::TooLarge(len))?;
        self.buf[body - 4..body].copy_from_slice(&len.to_le_bytes());
        self.stack.pop();
        self.top().items += 1;
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.scalar(Tag::Unit, &[]) }
    pub fn none(&mut self) -> Result<()> { self.scalar(Tag::None, &[]) }
    pub fn bool(&mut self, v: bool) -> Result<()> { self.scalar(if v { Tag::True } else { Tag::False }, &[]) }
    pub fn u64(&mut self, v: u64) -> Result<()> { self.scalar(Tag::U64, &v.to_le_bytes()) }
    pub fn s64(&mut self, v: i64) -> Result<()> { self.scalar(Tag::S64, &v.to_le_bytes()) }
    pub fn f64(&mut self, v: f64) -> Result<()> { self.scalar(Tag::F64, &v.to_le_bytes()) }
    pub fn char(&mut self, v: char) -> Result<()> { self.scalar(Tag::Char, &(v as u32).to_le_bytes()) }
    pub fn str(&mut self, v: &str) -> Result<()> { self.blob(Tag::Str, v.as_bytes()) }
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> { self.blob(Tag::Bytes, v) }

    /// Begins a list; close with `list_end()`.
    pub fn list_begin(&mut self) -> Result<()> { self.begin(Tag::List, Scope::List) }
    pub fn list_end(&mut self) -> Result<()> { self.end(Scope::List) }

    /// Begins a map; only `entry_begin()` may be written directly inside.
    pub fn map_begin(&mut self) -> Result<()> { self.begin(Tag::Map, Scope::Map) }
    pub fn map_end(&mut self) -> Result<()> { self.end(Scope::Map) }

    /// Begins a named entry. Exactly one payload item must follow.
    pub fn entry_begin(&mut self, key: &str) -> Result<()> {
        self.begin(Tag::Entry, Scope::Entry)?;
        self.str(key)?;
        // The key is metadata, not the payload.
        self.top().items = 0;
        Ok(())
    }
    pub fn entry_end(&mut self) -> Result<()> { self.end(Scope::Entry) }

    /// Begins `Option::Some`. Exactly one payload item must follow.
    pub fn some_begin(&mut self) -> Result<()> { self.begin(Tag::Some, Scope::Some) }
    pub fn some_end(&mut self) -> Result<()> { self.end(Scope::Some) }

    /// Writes a complete `key => u64` entry.
    pub fn entry_u64(&mut self, key: &str, v: u64) -> Result<()> {
        self.entry_begin(key)?;
        self.u64(v)?;
        self.entry_end()
    }

    /// Writes a complete `key => str` entry.
    pub fn entry_str(&mut self, key: &str, v: &str) -> Result<()> {
        self.entry_begin(key)?;
        self.str(v)?;
        self.entry_end()
    }
}

/// A zero-copy, bounds-checked cursor over encoded bytes.
///
/// Container reads return new decoders restricted to the container body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left in this view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let b = *self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.take_array::<4>()?) as usize)
    }

    fn expect(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::UnexpectedTag { expected, found });
        }
        self.take(1)?;
        Ok(())
    }

    fn enter(&mut self, expected: Tag) -> Result<Decoder<'a>> {
        self.expect(expected)?;
        let len = self.take_len()?;
        Ok(Decoder::new(self.take(len)?))
    }

    /// Skips the next item, including everything nested inside it.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        match tag.fixed_width() {
            Some(width) => { self.take(width)?; }
            None => {
                let len = self.take_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    pub fn unit(&mut self) -> Result<()> { self.expect(Tag::Unit) }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::True => { self.take(1)?; Ok(true) }
            Tag::False => { self.take(1)?; Ok(false) }
            found => Err(Error::UnexpectedTag { expected: Tag::True, found }),
        }
    }

    pub fn u64(&mut self) -> Result<u64> { self.expect(Tag::U64)?; Ok(u64::from_le_bytes(self.take_array()?)) }
    pub fn s64(&mut self) -> Result<i64> { self.expect(Tag::S64)?; Ok(i64::from_le_bytes(self.take_array()?)) }
    pub fn f64(&mut self) -> Result<f64> { self.expect(Tag::F64)?; Ok(f64::from_le_bytes(self.take_array()?)) }

    pub fn char(&mut self) -> Result<char> {
        self.expect(Tag::Char)?;
        char::from_u32(u32::from_le_bytes(self.take_array()?)).ok_or(Error::InvalidUtf8)
    }

    pub fn str(&mut self) -> Result<&'a str> {
        self.expect(Tag::Str)?;
        let len = self.take_len()?;
        std::str::from_utf8(self.take(len)?).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        self.take(len)
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        Ok(ListIter { dec: self.enter(Tag::List)? })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        Ok(MapIter { dec: self.enter(Tag::Map)? })
    }

    /// Decodes an option, returning a decoder over the payload when present.
    pub fn option(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.peek_tag()? {
            Tag::None => { self.take(1)?; Ok(None) }
            Tag::Some => Ok(Some(self.enter(Tag::Some)?)),
            found => Err(Error::UnexpectedTag { expected: Tag::Some, found }),
        }
    }

    /// Decodes an entry into `(key, payload decoder)`.
    pub fn entry(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut inner = self.enter(Tag::Entry)?;
        let key = inner.str()?;
        Ok((key, inner))
    }
}

/// Iterator over the items of a list.
#[derive(Debug)]
pub struct ListIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    /// Returns a decoder for the next item, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        let mut ahead = self.dec.clone();
        ahead.skip()?;
        let len = self.dec.remaining() - ahead.remaining();
        Ok(Some(Decoder::new(self.dec.take(len)?)))
    }
}

/// Iterator over the entries of a map.
#[derive(Debug)]
pub struct MapIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    /// Returns `(key, payload decoder)` for the next entry, or `None` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.remaining() == 0 {
            return Ok(None);
        }
        self.dec.entry().map(Some)
    }
}
