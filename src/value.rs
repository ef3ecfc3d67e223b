/// The closed set of register layouts the marshaling layer understands.
///
/// Adding a kind here means adding an arm to every match in [`crate::marshal`]; the compiler
/// will point at all of them.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::IntoStaticStr,
    strum::VariantArray,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Uint16,
    Int16,
    Uint32,
    Int32,
    /// Monotonic counter. Same width as [`Kind::Uint32`] but the opposite word order.
    Acc32,
    Uint64,
    Float32,
    String16,
    String32,
}

#[derive(thiserror::Error, Debug)]
#[error("`{0}` is not a supported register kind")]
pub struct UnsupportedKind(pub String);

impl Kind {
    /// Number of 16-bit words that must be transferred for a value of this kind.
    pub const fn words(self) -> u16 {
        match self {
            Kind::Uint16 | Kind::Int16 => 1,
            Kind::Uint32 | Kind::Int32 | Kind::Acc32 | Kind::Float32 => 2,
            Kind::Uint64 => 4,
            Kind::String16 => 8,
            Kind::String32 => 16,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub const fn is_text(self) -> bool {
        matches!(self, Kind::String16 | Kind::String32)
    }
}

impl std::str::FromStr for Kind {
    type Err = UnsupportedKind;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Kind as strum::VariantArray>::VARIANTS
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnsupportedKind(s.to_string()))
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Acc32(u32),
    Uint64(u64),
    Float32(f32),
    /// May contain trailing NUL padding exactly as the device sent it.
    String16(String),
    String32(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseValueError {
    #[error("`{1}` is not a valid {0}")]
    Integer(Kind, String, #[source] std::num::ParseIntError),
    #[error("`{1}` is not a valid {0}")]
    Float(Kind, String, #[source] std::num::ParseFloatError),
    #[error("text for a {0} register must be ASCII and at most {1} bytes long")]
    Text(Kind, usize),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Uint16(_) => Kind::Uint16,
            Value::Int16(_) => Kind::Int16,
            Value::Uint32(_) => Kind::Uint32,
            Value::Int32(_) => Kind::Int32,
            Value::Acc32(_) => Kind::Acc32,
            Value::Uint64(_) => Kind::Uint64,
            Value::Float32(_) => Kind::Float32,
            Value::String16(_) => Kind::String16,
            Value::String32(_) => Kind::String32,
        }
    }

    /// Parse user supplied text into a value of the given kind.
    pub fn parse(kind: Kind, text: &str) -> Result<Value, ParseValueError> {
        let int = |e| ParseValueError::Integer(kind, text.to_string(), e);
        Ok(match kind {
            Kind::Uint16 => Value::Uint16(text.parse().map_err(int)?),
            Kind::Int16 => Value::Int16(text.parse().map_err(int)?),
            Kind::Uint32 => Value::Uint32(text.parse().map_err(int)?),
            Kind::Int32 => Value::Int32(text.parse().map_err(int)?),
            Kind::Acc32 => Value::Acc32(text.parse().map_err(int)?),
            Kind::Uint64 => Value::Uint64(text.parse().map_err(int)?),
            Kind::Float32 => Value::Float32(
                text.parse()
                    .map_err(|e| ParseValueError::Float(kind, text.to_string(), e))?,
            ),
            Kind::String16 | Kind::String32 => {
                let capacity = usize::from(kind.words()) * 2;
                if !text.is_ascii() || text.len() > capacity {
                    return Err(ParseValueError::Text(kind, capacity));
                }
                if kind == Kind::String16 {
                    Value::String16(text.to_string())
                } else {
                    Value::String32(text.to_string())
                }
            }
        })
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Uint16(n) => Some(n.into()),
            Value::Uint32(n) | Value::Acc32(n) => Some(n.into()),
            Value::Uint64(n) => Some(n),
            Value::Int16(n) => u64::try_from(n).ok(),
            Value::Int32(n) => u64::try_from(n).ok(),
            Value::Float32(_) | Value::String16(_) | Value::String32(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Uint16(n) => Some(n.into()),
            Value::Int16(n) => Some(n.into()),
            Value::Uint32(n) | Value::Acc32(n) => Some(n.into()),
            Value::Int32(n) => Some(n.into()),
            Value::Uint64(n) => i64::try_from(n).ok(),
            Value::Float32(_) | Value::String16(_) | Value::String32(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(n) => Some(n.into()),
            Value::Uint64(n) => Some(n as f64),
            Value::String16(_) | Value::String32(_) => None,
            _ => self.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String16(s) | Value::String32(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Uint16(n) => write!(f, "{n}"),
            Value::Int16(n) => write!(f, "{n}"),
            Value::Uint32(n) | Value::Acc32(n) => write!(f, "{n}"),
            Value::Int32(n) => write!(f, "{n}"),
            Value::Uint64(n) => write!(f, "{n}"),
            Value::Float32(n) => write!(f, "{n}"),
            Value::String16(s) | Value::String32(s) => f.write_str(s),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Uint16(n) => serializer.serialize_u16(*n),
            Value::Int16(n) => serializer.serialize_i16(*n),
            Value::Uint32(n) | Value::Acc32(n) => serializer.serialize_u32(*n),
            Value::Int32(n) => serializer.serialize_i32(*n),
            Value::Uint64(n) => serializer.serialize_u64(*n),
            Value::Float32(n) => serializer.serialize_f32(*n),
            Value::String16(s) | Value::String32(s) => serializer.serialize_str(s),
        }
    }
}

/// A decoded register, as handed out by [`crate::client::RegisterClient`].
///
/// Built once per read from the registry metadata and the decoded words, then never changed.
/// It holds no reference back to the connection it was read over.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RegisterValue {
    address: u16,
    name: String,
    description: String,
    kind: Kind,
    value: Value,
}

impl RegisterValue {
    pub(crate) fn new(
        address: u16,
        name: impl Into<String>,
        description: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            description: description.into(),
            kind: value.kind(),
            value,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Word count of this register on the wire.
    pub fn size_in_words(&self) -> u16 {
        self.kind.words()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.value, f)
    }
}
