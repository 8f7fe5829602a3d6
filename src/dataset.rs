//! In-memory view of a gridded scientific dataset: named dimensions, typed
//! n-d variables and attributes. Merging works on this model; the file format
//! lives behind [`DatasetCodec`].

use camino::Utf8Path;
use ndarray::{Array1, ArrayD, Axis, concatenate};
use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// Variable contents, one n-d array per storage type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Values {
    I8(ArrayD<i8>),
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    U32(ArrayD<u32>),
    I64(ArrayD<i64>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! each_values {
    ($value:expr, $data:ident => $body:expr) => {
        match $value {
            Values::I8($data) => $body,
            Values::U8($data) => $body,
            Values::I16($data) => $body,
            Values::U16($data) => $body,
            Values::I32($data) => $body,
            Values::U32($data) => $body,
            Values::I64($data) => $body,
            Values::U64($data) => $body,
            Values::F32($data) => $body,
            Values::F64($data) => $body,
        }
    };
}

macro_rules! map_values {
    ($value:expr, $data:ident => $body:expr) => {
        match $value {
            Values::I8($data) => Values::I8($body),
            Values::U8($data) => Values::U8($body),
            Values::I16($data) => Values::I16($body),
            Values::U16($data) => Values::U16($body),
            Values::I32($data) => Values::I32($body),
            Values::U32($data) => Values::U32($body),
            Values::I64($data) => Values::I64($body),
            Values::U64($data) => Values::U64($body),
            Values::F32($data) => Values::F32($body),
            Values::F64($data) => Values::F64($body),
        }
    };
}

macro_rules! values_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$ty>> for Values {
                fn from(data: ArrayD<$ty>) -> Self {
                    Values::$variant(data)
                }
            }

            impl From<Vec<$ty>> for Values {
                fn from(data: Vec<$ty>) -> Self {
                    Values::$variant(Array1::from(data).into_dyn())
                }
            }
        )*
    };
}

values_from!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl Values {
    pub fn shape(&self) -> &[usize] {
        each_values!(self, data => data.shape())
    }

    pub fn len(&self) -> usize {
        each_values!(self, data => data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Values::I8(_) => "i8",
            Values::U8(_) => "u8",
            Values::I16(_) => "i16",
            Values::U16(_) => "u16",
            Values::I32(_) => "i32",
            Values::U32(_) => "u32",
            Values::I64(_) => "i64",
            Values::U64(_) => "u64",
            Values::F32(_) => "f32",
            Values::F64(_) => "f64",
        }
    }

    /// Elements in logical (row-major) order, widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        each_values!(self, data => data.iter().map(|value| *value as f64).collect())
    }

    pub fn first_f64(&self) -> Option<f64> {
        each_values!(self, data => data.iter().next().map(|value| *value as f64))
    }

    /// A single-element array of `value` in this array's storage type.
    pub fn scalar_like(&self, value: f64) -> Values {
        match self {
            Values::I8(_) => vec![value as i8].into(),
            Values::U8(_) => vec![value as u8].into(),
            Values::I16(_) => vec![value as i16].into(),
            Values::U16(_) => vec![value as u16].into(),
            Values::I32(_) => vec![value as i32].into(),
            Values::U32(_) => vec![value as u32].into(),
            Values::I64(_) => vec![value as i64].into(),
            Values::U64(_) => vec![value as u64].into(),
            Values::F32(_) => vec![value as f32].into(),
            Values::F64(_) => vec![value].into(),
        }
    }

    /// Joins `other` after `self` along `axis`. Both must share a storage
    /// type and agree on every other axis.
    pub fn concat(&self, other: &Values, axis: Axis) -> Result<Values, String> {
        macro_rules! join {
            ($variant:ident, $a:expr, $b:expr) => {
                concatenate(axis, &[$a.view(), $b.view()])
                    .map(Values::$variant)
                    .map_err(|err| err.to_string())
            };
        }

        match (self, other) {
            (Values::I8(a), Values::I8(b)) => join!(I8, a, b),
            (Values::U8(a), Values::U8(b)) => join!(U8, a, b),
            (Values::I16(a), Values::I16(b)) => join!(I16, a, b),
            (Values::U16(a), Values::U16(b)) => join!(U16, a, b),
            (Values::I32(a), Values::I32(b)) => join!(I32, a, b),
            (Values::U32(a), Values::U32(b)) => join!(U32, a, b),
            (Values::I64(a), Values::I64(b)) => join!(I64, a, b),
            (Values::U64(a), Values::U64(b)) => join!(U64, a, b),
            (Values::F32(a), Values::F32(b)) => join!(F32, a, b),
            (Values::F64(a), Values::F64(b)) => join!(F64, a, b),
            _ => Err(format!(
                "storage type changes ({} vs {})",
                self.type_name(),
                other.type_name()
            )),
        }
    }

    /// Keeps the listed indices along `axis`, in the given order.
    pub fn select(&self, axis: Axis, indices: &[usize]) -> Values {
        map_values!(self, data => data.select(axis, indices))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Number(Values),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(text) => Some(text),
            AttrValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<&Values> {
        match self {
            AttrValue::Text(_) => None,
            AttrValue::Number(values) => Some(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVar {
    pub name: String,
    pub dims: Vec<String>,
    pub attrs: Vec<Attribute>,
    pub values: Values,
}

impl DataVar {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| &attr.value)
    }

    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        match self.attrs.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<AttrValue> {
        let idx = self.attrs.iter().position(|attr| attr.name == name)?;
        Some(self.attrs.remove(idx).value)
    }

    pub fn leads_with(&self, dim: &str) -> bool {
        self.dims.first().map(|first| first == dim).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dims: Vec<Dimension>,
    pub vars: Vec<DataVar>,
    pub attrs: Vec<Attribute>,
}

impl Dataset {
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|dim| dim.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&DataVar> {
        self.vars.iter().find(|var| var.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut DataVar> {
        self.vars.iter_mut().find(|var| var.name == name)
    }

    pub fn set_dimension_len(&mut self, name: &str, len: usize) {
        if let Some(dim) = self.dims.iter_mut().find(|dim| dim.name == name) {
            dim.len = len;
        }
    }
}

/// Reads and writes [`Dataset`]s in some on-disk format.
pub trait DatasetCodec: Send + Sync {
    fn read(&self, path: &Utf8Path) -> Result<Dataset, ProfileError>;
    fn write(&self, path: &Utf8Path, dataset: &Dataset) -> Result<(), ProfileError>;
}
