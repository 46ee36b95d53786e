use crate::{Decoder, Encoder, Error, Result, Tag};

/// A self-describing dynamic value.
///
/// Map entries keep their insertion order; duplicate keys are preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    U64(u64),
    S64(i64),
    F64(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
    Option(Option<Box<Value>>),
}

impl Value {
    /// Short name of the variant, used in mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::U64(_) => "u64",
            Value::S64(_) => "s64",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Option(_) => "option",
        }
    }

    /// Looks up the first entry named `key` in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

/// Appends `value` to the encoder.
pub fn encode_value(enc: &mut Encoder, value: &Value) -> Result<()> {
    match value {
        Value::Unit => enc.unit(),
        Value::Bool(v) => enc.bool(*v),
        Value::U64(v) => enc.u64(*v),
        Value::S64(v) => enc.s64(*v),
        Value::F64(v) => enc.f64(*v),
        Value::Char(v) => enc.char(*v),
        Value::Str(v) => enc.str(v),
        Value::Bytes(v) => enc.bytes(v),
        Value::List(items) => {
            enc.list_begin()?;
            for item in items {
                encode_value(enc, item)?;
            }
            enc.list_end()
        }
        Value::Map(entries) => {
            enc.map_begin()?;
            for (key, item) in entries {
                enc.entry_begin(key)?;
                encode_value(enc, item)?;
                enc.entry_end()?;
            }
            enc.map_end()
        }
        Value::Option(None) => enc.none(),
        Value::Option(Some(inner)) => {
            enc.some_begin()?;
            encode_value(enc, inner)?;
            enc.some_end()
        }
    }
}

/// Deepest container nesting `decode_value` accepts.
pub const MAX_DEPTH: usize = 128;

/// Reads the next item from the decoder as a `Value`.
///
/// Fails with `Error::TooDeep` past `MAX_DEPTH` nested lists, maps or options.
pub fn decode_value(dec: &mut Decoder<'_>) -> Result<Value> {
    decode_nested(dec, 0)
}

fn decode_nested(dec: &mut Decoder<'_>, depth: usize) -> Result<Value> {
    let tag = dec.peek_tag()?;
    if matches!(tag, Tag::List | Tag::Map | Tag::Some) && depth >= MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }
    let value = match tag {
        Tag::Unit => { dec.unit()?; Value::Unit }
        Tag::True | Tag::False => Value::Bool(dec.bool()?),
        Tag::U64 => Value::U64(dec.u64()?),
        Tag::S64 => Value::S64(dec.s64()?),
        Tag::F64 => Value::F64(dec.f64()?),
        Tag::Char => Value::Char(dec.char()?),
        Tag::Str => Value::Str(dec.str()?.to_owned()),
        Tag::Bytes => Value::Bytes(dec.bytes()?.to_vec()),
        Tag::List => {
            let mut iter = dec.list()?;
            let mut items = Vec::new();
            while let Some(mut item) = iter.next()? {
                items.push(decode_nested(&mut item, depth + 1)?);
            }
            Value::List(items)
        }
        Tag::Map => {
            let mut iter = dec.map()?;
            let mut entries = Vec::new();
            while let Some((key, mut item)) = iter.next()? {
                entries.push((key.to_owned(), decode_nested(&mut item, depth + 1)?));
            }
            Value::Map(entries)
        }
        Tag::None | Tag::Some => match dec.option()? {
            None => Value::Option(None),
            Some(mut inner) => Value::Option(Some(Box::new(decode_nested(&mut inner, depth + 1)?))),
        },
        Tag::Entry => return Err(Error::InvalidMapEntry),
    };
    Ok(value)
}
