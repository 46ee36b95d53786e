use crate::{Decoder, Encoder, Error, Result, Value, decode_value, encode_value};

/// Conversion between a Rust type and the dynamic `Value` tree.
pub trait Pack: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;

    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        encode_value(enc, &self.to_value())
    }

    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        Self::from_value(decode_value(dec)?)
    }
}

fn mismatch<T>(expected: &'static str, found: &Value) -> Result<T> {
    Err(Error::TypeMismatch { expected, found: found.kind() })
}

impl Pack for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl Pack for () {
    fn to_value(&self) -> Value {
        Value::Unit
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Unit => Ok(()),
            other => mismatch("unit", &other),
        }
    }
}

impl Pack for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            other => mismatch("bool", &other),
        }
    }
}

macro_rules! pack_unsigned {
    ($($ty:ty),*) => { $(
        impl Pack for $ty {
            fn to_value(&self) -> Value {
                Value::U64(*self as u64)
            }

            fn from_value(value: Value) -> Result<Self> {
                let wide = match value {
                    Value::U64(v) => v,
                    Value::S64(v) => u64::try_from(v).map_err(|_| Error::OutOfRange(stringify!($ty)))?,
                    other => return mismatch(stringify!($ty), &other),
                };
                <$ty>::try_from(wide).map_err(|_| Error::OutOfRange(stringify!($ty)))
            }
        }
    )* };
}

macro_rules! pack_signed {
    ($($ty:ty),*) => { $(
        impl Pack for $ty {
            fn to_value(&self) -> Value {
                Value::S64(*self as i64)
            }

            fn from_value(value: Value) -> Result<Self> {
                let wide = match value {
                    Value::S64(v) => v,
                    Value::U64(v) => i64::try_from(v).map_err(|_| Error::OutOfRange(stringify!($ty)))?,
                    other => return mismatch(stringify!($ty), &other),
                };
                <$ty>::try_from(wide).map_err(|_| Error::OutOfRange(stringify!($ty)))
            }
        }
    )* };
}

pack_unsigned!(u8, u16, u32, u64, usize);
pack_signed!(i8, i16, i32, i64, isize);

impl Pack for f64 {
    fn to_value(&self) -> Value {
        Value::F64(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::F64(v) => Ok(v),
            Value::U64(v) => Ok(v as f64),
            Value::S64(v) => Ok(v as f64),
            other => mismatch("f64", &other),
        }
    }
}

impl Pack for f32 {
    fn to_value(&self) -> Value {
        Value::F64(*self as f64)
    }

    fn from_value(value: Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl Pack for char {
    fn to_value(&self) -> Value {
        Value::Char(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Char(v) => Ok(v),
            other => mismatch("char", &other),
        }
    }
}

impl Pack for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Str(v) => Ok(v),
            other => mismatch("str", &other),
        }
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(Pack::to_value).collect())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => mismatch("list", &other),
        }
    }
}

impl<T: Pack> Pack for Option<T> {
    fn to_value(&self) -> Value {
        Value::Option(self.as_ref().map(|v| Box::new(v.to_value())))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Option(None) => Ok(None),
            Value::Option(Some(inner)) => T::from_value(*inner).map(Some),
            other => mismatch("option", &other),
        }
    }
}

impl<A: Pack, B: Pack> Pack for (A, B) {
    fn to_value(&self) -> Value {
        Value::List(vec![self.0.to_value(), self.1.to_value()])
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(a), Some(b)) => Ok((A::from_value(a)?, B::from_value(b)?)),
                    _ => Err(Error::UnexpectedEnd),
                }
            }
            other => mismatch("pair", &other),
        }
    }
}
