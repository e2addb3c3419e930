use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use tabula_error::{DbError, Result, length_err, schema_err, type_err};

use super::bitmap::{Bitmap, Validity};
use super::compute::cast::cast;
use super::datatype::DataType;
use super::scalar::ScalarValue;

/// Primitive values stored directly in a vec.
pub trait NativeType: Copy + Default + PartialOrd + Send + Sync + fmt::Debug + 'static {
    fn datatype() -> DataType;

    /// Get a slice of the values if the data has the matching physical layout.
    fn values(data: &ArrayData) -> Option<&[Self]>;

    fn into_data(values: Vec<Self>) -> ArrayData;

    fn into_scalar(self) -> ScalarValue;

    fn total_cmp(&self, other: &Self) -> Ordering;
}

macro_rules! impl_native_ord {
    ($prim:ty, $variant:ident) => {
        impl NativeType for $prim {
            fn datatype() -> DataType {
                DataType::$variant
            }

            fn values(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn into_scalar(self) -> ScalarValue {
                ScalarValue::$variant(self)
            }

            fn total_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    };
}

macro_rules! impl_native_float {
    ($prim:ty, $variant:ident) => {
        impl NativeType for $prim {
            fn datatype() -> DataType {
                DataType::$variant
            }

            fn values(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn into_scalar(self) -> ScalarValue {
                ScalarValue::$variant(self)
            }

            fn total_cmp(&self, other: &Self) -> Ordering {
                match (self.is_nan(), other.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => self.partial_cmp(other).unwrap_or(Ordering::Equal),
                }
            }
        }
    };
}

impl_native_ord!(bool, Boolean);
impl_native_ord!(i8, Int8);
impl_native_ord!(i16, Int16);
impl_native_ord!(i32, Int32);
impl_native_ord!(i64, Int64);
impl_native_ord!(u8, UInt8);
impl_native_ord!(u16, UInt16);
impl_native_ord!(u32, UInt32);
impl_native_ord!(u64, UInt64);
impl_native_float!(f32, Float32);
impl_native_float!(f64, Float64);

/// Physical storage for an array.
///
/// Slots that are null according to the array's validity hold a default
/// value. `Date` is stored as `Int32` and `Datetime` as `Int64`.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Null,
    Boolean(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Categorical {
        codes: Vec<u32>,
        categories: Arc<Vec<String>>,
    },
    /// Offsets has one more entry than there are rows.
    List {
        offsets: Vec<usize>,
        values: Box<Array>,
    },
}

impl ArrayData {
    fn with_capacity(datatype: &DataType, cap: usize) -> Self {
        match datatype {
            DataType::Null => ArrayData::Null,
            DataType::Boolean => ArrayData::Boolean(Vec::with_capacity(cap)),
            DataType::Int8 => ArrayData::Int8(Vec::with_capacity(cap)),
            DataType::Int16 => ArrayData::Int16(Vec::with_capacity(cap)),
            DataType::Int32 | DataType::Date => ArrayData::Int32(Vec::with_capacity(cap)),
            DataType::Int64 | DataType::Datetime => ArrayData::Int64(Vec::with_capacity(cap)),
            DataType::UInt8 => ArrayData::UInt8(Vec::with_capacity(cap)),
            DataType::UInt16 => ArrayData::UInt16(Vec::with_capacity(cap)),
            DataType::UInt32 => ArrayData::UInt32(Vec::with_capacity(cap)),
            DataType::UInt64 => ArrayData::UInt64(Vec::with_capacity(cap)),
            DataType::Float32 => ArrayData::Float32(Vec::with_capacity(cap)),
            DataType::Float64 => ArrayData::Float64(Vec::with_capacity(cap)),
            DataType::Utf8 => ArrayData::Utf8(Vec::with_capacity(cap)),
            DataType::Categorical => ArrayData::Categorical {
                codes: Vec::with_capacity(cap),
                categories: Arc::new(Vec::new()),
            },
            DataType::List(inner) | DataType::Array(inner, _) => {
                let mut offsets = Vec::with_capacity(cap + 1);
                offsets.push(0);
                ArrayData::List {
                    offsets,
                    values: Box::new(Array::new_null(inner, 0)),
                }
            }
        }
    }

    /// Check that the physical layout can back the given type.
    fn matches_datatype(&self, datatype: &DataType) -> bool {
        matches!(
            (self, datatype),
            (ArrayData::Null, DataType::Null)
                | (ArrayData::Boolean(_), DataType::Boolean)
                | (ArrayData::Int8(_), DataType::Int8)
                | (ArrayData::Int16(_), DataType::Int16)
                | (ArrayData::Int32(_), DataType::Int32 | DataType::Date)
                | (ArrayData::Int64(_), DataType::Int64 | DataType::Datetime)
                | (ArrayData::UInt8(_), DataType::UInt8)
                | (ArrayData::UInt16(_), DataType::UInt16)
                | (ArrayData::UInt32(_), DataType::UInt32)
                | (ArrayData::UInt64(_), DataType::UInt64)
                | (ArrayData::Float32(_), DataType::Float32)
                | (ArrayData::Float64(_), DataType::Float64)
                | (ArrayData::Utf8(_), DataType::Utf8)
                | (ArrayData::Categorical { .. }, DataType::Categorical)
                | (ArrayData::List { .. }, DataType::List(_) | DataType::Array(_, _))
        )
    }

    /// Number of physical slots, `None` for the null layout which has no
    /// backing storage.
    fn physical_len(&self) -> Option<usize> {
        Some(match self {
            ArrayData::Null => return None,
            ArrayData::Boolean(v) => v.len(),
            ArrayData::Int8(v) => v.len(),
            ArrayData::Int16(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::UInt16(v) => v.len(),
            ArrayData::UInt32(v) => v.len(),
            ArrayData::UInt64(v) => v.len(),
            ArrayData::Float32(v) => v.len(),
            ArrayData::Float64(v) => v.len(),
            ArrayData::Utf8(v) => v.len(),
            ArrayData::Categorical { codes, .. } => codes.len(),
            ArrayData::List { offsets, .. } => offsets.len().saturating_sub(1),
        })
    }

    fn push_default(&mut self) {
        match self {
            ArrayData::Null => (),
            ArrayData::Boolean(v) => v.push(false),
            ArrayData::Int8(v) => v.push(0),
            ArrayData::Int16(v) => v.push(0),
            ArrayData::Int32(v) => v.push(0),
            ArrayData::Int64(v) => v.push(0),
            ArrayData::UInt8(v) => v.push(0),
            ArrayData::UInt16(v) => v.push(0),
            ArrayData::UInt32(v) => v.push(0),
            ArrayData::UInt64(v) => v.push(0),
            ArrayData::Float32(v) => v.push(0.0),
            ArrayData::Float64(v) => v.push(0.0),
            ArrayData::Utf8(v) => v.push(String::new()),
            ArrayData::Categorical { codes, .. } => codes.push(0),
            ArrayData::List { .. } => (),
        }
    }
}

/// Apply the same expression to every flat variant of `ArrayData`, producing
/// the same variant. Lists need to be handled by the caller.
macro_rules! map_flat_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            ArrayData::Null => ArrayData::Null,
            ArrayData::Boolean($v) => ArrayData::Boolean($body),
            ArrayData::Int8($v) => ArrayData::Int8($body),
            ArrayData::Int16($v) => ArrayData::Int16($body),
            ArrayData::Int32($v) => ArrayData::Int32($body),
            ArrayData::Int64($v) => ArrayData::Int64($body),
            ArrayData::UInt8($v) => ArrayData::UInt8($body),
            ArrayData::UInt16($v) => ArrayData::UInt16($body),
            ArrayData::UInt32($v) => ArrayData::UInt32($body),
            ArrayData::UInt64($v) => ArrayData::UInt64($body),
            ArrayData::Float32($v) => ArrayData::Float32($body),
            ArrayData::Float64($v) => ArrayData::Float64($body),
            ArrayData::Utf8($v) => ArrayData::Utf8($body),
            ArrayData::Categorical {
                codes: $v,
                categories,
            } => ArrayData::Categorical {
                codes: $body,
                categories: categories.clone(),
            },
            ArrayData::List { .. } => unreachable!("list data handled by caller"),
        }
    };
}

fn gather<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&idx| values[idx].clone()).collect()
}

/// A typed, nullable sequence of values.
#[derive(Clone)]
pub struct Array {
    datatype: DataType,
    validity: Validity,
    data: ArrayData,
}

impl Array {
    /// Create a new array from its parts, checking that the physical layout
    /// matches the datatype and that the lengths line up.
    pub fn try_new(datatype: DataType, validity: Validity, data: ArrayData) -> Result<Self> {
        if !data.matches_datatype(&datatype) {
            return Err(type_err!("Array data does not match datatype {datatype}"));
        }
        if let Some(len) = data.physical_len() {
            if len != validity.len() {
                return Err(length_err!(
                    "Array data has {len} values, validity has {}",
                    validity.len()
                ));
            }
        }
        if let (DataType::Array(_, width), ArrayData::List { offsets, .. }) = (&datatype, &data) {
            if let Some(bad) = offsets.windows(2).find(|w| w[1] - w[0] != *width) {
                return Err(schema_err!(
                    "Expected fixed width {width} for every row, got a row of {}",
                    bad[1] - bad[0]
                ));
            }
        }

        Ok(Array {
            datatype,
            validity,
            data,
        })
    }

    /// Create an array where every value is null.
    pub fn new_null(datatype: &DataType, len: usize) -> Self {
        let mut builder = ArrayBuilder::with_capacity(datatype.clone(), len);
        for _ in 0..len {
            builder.push_null();
        }
        builder.finish()
    }

    pub fn from_native<T: NativeType>(values: Vec<T>) -> Self {
        Array {
            datatype: T::datatype(),
            validity: Validity::new_all_valid(values.len()),
            data: T::into_data(values),
        }
    }

    pub fn from_native_opt<T: NativeType>(values: Vec<Option<T>>) -> Self {
        let validity: Validity = values.iter().map(|v| v.is_some()).collect();
        let values = values.into_iter().map(|v| v.unwrap_or_default()).collect();
        Array {
            datatype: T::datatype(),
            validity,
            data: T::into_data(values),
        }
    }

    /// Create an array by repeating a value.
    pub fn from_scalar(value: &ScalarValue, len: usize) -> Result<Self> {
        let mut builder = ArrayBuilder::with_capacity(value.datatype(), len);
        for _ in 0..len {
            builder.push(value.clone())?;
        }
        Ok(builder.finish())
    }

    /// Create an array of the given type from values.
    ///
    /// Every non-null value needs to be of the given type. List values are
    /// cast to the inner type, and rows of fixed size array types are checked
    /// against the declared width.
    pub fn try_from_scalars(
        datatype: &DataType,
        values: impl IntoIterator<Item = ScalarValue>,
    ) -> Result<Self> {
        let values = values.into_iter();
        let mut builder = ArrayBuilder::with_capacity(datatype.clone(), values.size_hint().0);
        for value in values {
            builder.push(value)?;
        }
        Ok(builder.finish())
    }

    /// Create an array from values, inferring the type as the common type of
    /// all non-null values.
    pub fn try_from_scalars_infer(values: Vec<ScalarValue>) -> Result<Self> {
        let mut datatype = DataType::Null;
        for value in &values {
            datatype = DataType::supertype(&datatype, &value.datatype())?;
        }
        let mut builder = ArrayBuilder::with_capacity(datatype.clone(), values.len());
        for value in values {
            if value.is_null() || value.datatype() == datatype {
                builder.push(value)?;
            } else {
                let casted = cast(&Array::from_scalar(&value, 1)?, &datatype, true)?;
                builder.push(casted.get_value(0))?;
            }
        }
        Ok(builder.finish())
    }

    /// Create a list (or fixed size array) typed array from per-row arrays.
    pub fn try_new_list(datatype: DataType, rows: Vec<Option<Array>>) -> Result<Self> {
        let mut builder = ArrayBuilder::with_capacity(datatype, rows.len());
        for row in rows {
            match row {
                Some(arr) => builder.push(ScalarValue::List(arr))?,
                None => builder.push_null(),
            }
        }
        Ok(builder.finish())
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        self.validity.null_count()
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.is_valid(idx)
    }

    /// Get typed values for this array.
    ///
    /// Values in null slots are defaults.
    pub fn values<T: NativeType>(&self) -> Result<&[T]> {
        T::values(&self.data).ok_or_else(|| {
            type_err!(
                "Cannot access {} array as {}",
                self.datatype,
                T::datatype()
            )
        })
    }

    /// Get typed values, with nulls as `None`.
    pub fn values_opt<T: NativeType>(&self) -> Result<Vec<Option<T>>> {
        let values = self.values::<T>()?;
        Ok(values
            .iter()
            .enumerate()
            .map(|(idx, v)| self.is_valid(idx).then_some(*v))
            .collect())
    }

    /// Get the value at an index.
    ///
    /// Panics if the index is out of bounds.
    pub fn get_value(&self, idx: usize) -> ScalarValue {
        if !self.is_valid(idx) {
            return ScalarValue::Null;
        }

        match &self.data {
            ArrayData::Null => ScalarValue::Null,
            ArrayData::Boolean(v) => ScalarValue::Boolean(v[idx]),
            ArrayData::Int8(v) => ScalarValue::Int8(v[idx]),
            ArrayData::Int16(v) => ScalarValue::Int16(v[idx]),
            ArrayData::Int32(v) => match self.datatype {
                DataType::Date => ScalarValue::Date(v[idx]),
                _ => ScalarValue::Int32(v[idx]),
            },
            ArrayData::Int64(v) => match self.datatype {
                DataType::Datetime => ScalarValue::Datetime(v[idx]),
                _ => ScalarValue::Int64(v[idx]),
            },
            ArrayData::UInt8(v) => ScalarValue::UInt8(v[idx]),
            ArrayData::UInt16(v) => ScalarValue::UInt16(v[idx]),
            ArrayData::UInt32(v) => ScalarValue::UInt32(v[idx]),
            ArrayData::UInt64(v) => ScalarValue::UInt64(v[idx]),
            ArrayData::Float32(v) => ScalarValue::Float32(v[idx]),
            ArrayData::Float64(v) => ScalarValue::Float64(v[idx]),
            ArrayData::Utf8(v) => ScalarValue::Utf8(v[idx].clone()),
            ArrayData::Categorical { codes, categories } => {
                ScalarValue::Categorical(categories[codes[idx] as usize].clone())
            }
            ArrayData::List { offsets, values } => {
                ScalarValue::List(values.slice(offsets[idx], offsets[idx + 1] - offsets[idx]))
            }
        }
    }

    pub fn iter_values(&self) -> impl Iterator<Item = ScalarValue> + '_ {
        (0..self.len()).map(|idx| self.get_value(idx))
    }

    /// Select rows by index.
    ///
    /// Panics if any index is out of bounds.
    pub fn take(&self, indices: &[usize]) -> Array {
        let data = match &self.data {
            ArrayData::List { offsets, values } => {
                let mut new_offsets = Vec::with_capacity(indices.len() + 1);
                new_offsets.push(0);
                let mut child_indices = Vec::new();
                for &idx in indices {
                    child_indices.extend(offsets[idx]..offsets[idx + 1]);
                    new_offsets.push(child_indices.len());
                }
                ArrayData::List {
                    offsets: new_offsets,
                    values: Box::new(values.take(&child_indices)),
                }
            }
            other => map_flat_data!(other, v => gather(v, indices)),
        };

        Array {
            datatype: self.datatype.clone(),
            validity: self.validity.take(indices),
            data,
        }
    }

    /// Select rows by index, `None` producing a null.
    pub fn take_opt(&self, indices: &[Option<usize>]) -> Array {
        if self.is_empty() {
            return Array::new_null(&self.datatype, indices.len());
        }

        let dense: Vec<usize> = indices.iter().map(|idx| idx.unwrap_or(0)).collect();
        let mut out = self.take(&dense);
        for (pos, idx) in indices.iter().enumerate() {
            if idx.is_none() {
                out.validity.set_invalid(pos);
            }
        }
        out
    }

    /// Get a contiguous slice of the array. Out of range slices are clamped.
    pub fn slice(&self, offset: usize, len: usize) -> Array {
        let start = offset.min(self.len());
        let end = offset.saturating_add(len).min(self.len());
        let indices: Vec<usize> = (start..end).collect();
        self.take(&indices)
    }

    /// Keep rows where the mask is true.
    pub fn filter(&self, mask: &[bool]) -> Array {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(idx, &keep)| keep.then_some(idx))
            .collect();
        self.take(&indices)
    }

    /// Repeat a length one array to the given length. Arrays already of the
    /// given length are returned as is.
    pub fn broadcast(&self, len: usize) -> Result<Array> {
        if self.len() == len {
            return Ok(self.clone());
        }
        if self.len() == 1 {
            return Ok(self.take(&vec![0; len]));
        }
        Err(length_err!(
            "Cannot broadcast array of length {} to length {len}",
            self.len()
        ))
    }

    /// Concatenate arrays. Inputs are cast to their common type.
    pub fn concat(arrays: &[Array]) -> Result<Array> {
        let mut datatype = match arrays.first() {
            Some(first) => first.datatype.clone(),
            None => return Err(DbError::compute("Cannot concatenate zero arrays")),
        };
        for arr in &arrays[1..] {
            datatype = DataType::supertype(&datatype, &arr.datatype)?;
        }
        if arrays.len() == 1 && arrays[0].datatype == datatype {
            return Ok(arrays[0].clone());
        }

        let total = arrays.iter().map(|a| a.len()).sum();
        let mut builder = ArrayBuilder::with_capacity(datatype.clone(), total);
        for arr in arrays {
            if arr.datatype == datatype {
                builder.extend_from_array(arr)?;
            } else {
                builder.extend_from_array(&cast(arr, &datatype, true)?)?;
            }
        }
        Ok(builder.finish())
    }

    /// Replace the validity of this array.
    pub fn with_validity(mut self, validity: Validity) -> Result<Self> {
        if validity.len() != self.len() {
            return Err(length_err!(
                "Validity of length {} for array of length {}",
                validity.len(),
                self.len()
            ));
        }
        self.validity = validity;
        Ok(self)
    }

    /// Reinterpret the array as a different type with the same physical
    /// layout, e.g. Int32 as Date.
    pub fn reinterpret(self, datatype: DataType) -> Result<Self> {
        Array::try_new(datatype, self.validity, self.data)
    }

    /// Offsets and child values for list typed arrays.
    pub fn list_parts(&self) -> Result<(&[usize], &Array)> {
        match &self.data {
            ArrayData::List { offsets, values } => Ok((offsets, values)),
            _ => Err(type_err!("Expected a list array, got {}", self.datatype)),
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.datatype == other.datatype
            && self.len() == other.len()
            && (0..self.len()).all(|idx| self.get_value(idx) == other.get_value(idx))
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array({}) [", self.datatype)?;
        for (idx, value) in self.iter_values().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match value {
                ScalarValue::Utf8(s) | ScalarValue::Categorical(s) => write!(f, "{s:?}")?,
                other => write!(f, "{other}")?,
            }
        }
        write!(f, "]")
    }
}

/// Incrementally build an array from scalar values.
#[derive(Debug)]
pub struct ArrayBuilder {
    datatype: DataType,
    validity: Bitmap,
    data: ArrayData,
    /// Child arrays for list types, concatenated on finish.
    children: Vec<Array>,
    /// Dictionary lookup for categorical types.
    categories: HashMap<String, u32, RandomState>,
}

impl ArrayBuilder {
    pub fn with_capacity(datatype: DataType, cap: usize) -> Self {
        ArrayBuilder {
            data: ArrayData::with_capacity(&datatype, cap),
            validity: Bitmap::with_capacity(cap),
            datatype,
            children: Vec::new(),
            categories: HashMap::default(),
        }
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    pub fn push_null(&mut self) {
        self.validity.push(false);
        match (&mut self.data, &self.datatype) {
            (ArrayData::List { offsets, .. }, DataType::Array(inner, width)) => {
                // Fixed size rows keep their stride even when null.
                self.children.push(Array::new_null(inner, *width));
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last + width);
            }
            (ArrayData::List { offsets, .. }, _) => {
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last);
            }
            (data, _) => data.push_default(),
        }
    }

    pub fn push(&mut self, value: ScalarValue) -> Result<()> {
        if value.is_null() {
            self.push_null();
            return Ok(());
        }

        match (&mut self.data, value) {
            (ArrayData::Boolean(v), ScalarValue::Boolean(x)) => v.push(x),
            (ArrayData::Int8(v), ScalarValue::Int8(x)) => v.push(x),
            (ArrayData::Int16(v), ScalarValue::Int16(x)) => v.push(x),
            (ArrayData::Int32(v), ScalarValue::Int32(x) | ScalarValue::Date(x)) => v.push(x),
            (ArrayData::Int64(v), ScalarValue::Int64(x) | ScalarValue::Datetime(x)) => v.push(x),
            (ArrayData::UInt8(v), ScalarValue::UInt8(x)) => v.push(x),
            (ArrayData::UInt16(v), ScalarValue::UInt16(x)) => v.push(x),
            (ArrayData::UInt32(v), ScalarValue::UInt32(x)) => v.push(x),
            (ArrayData::UInt64(v), ScalarValue::UInt64(x)) => v.push(x),
            (ArrayData::Float32(v), ScalarValue::Float32(x)) => v.push(x),
            (ArrayData::Float64(v), ScalarValue::Float64(x)) => v.push(x),
            (ArrayData::Utf8(v), ScalarValue::Utf8(s) | ScalarValue::Categorical(s)) => v.push(s),
            (
                ArrayData::Categorical { codes, categories },
                ScalarValue::Categorical(s) | ScalarValue::Utf8(s),
            ) => {
                let code = match self.categories.get(&s) {
                    Some(code) => *code,
                    None => {
                        let code = categories.len() as u32;
                        Arc::make_mut(categories).push(s.clone());
                        self.categories.insert(s, code);
                        code
                    }
                };
                codes.push(code);
            }
            (ArrayData::List { offsets, .. }, ScalarValue::List(arr)) => {
                let inner = match &self.datatype {
                    DataType::List(inner) => inner.as_ref(),
                    DataType::Array(inner, width) => {
                        if arr.len() != *width {
                            return Err(schema_err!(
                                "Expected fixed width {width} for {}, got a row of {}",
                                self.datatype,
                                arr.len()
                            ));
                        }
                        inner.as_ref()
                    }
                    other => return Err(type_err!("Cannot append list to {other} array")),
                };
                let arr = if arr.datatype() == inner {
                    arr
                } else {
                    cast(&arr, inner, true)?
                };
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last + arr.len());
                self.children.push(arr);
            }
            (_, value) => {
                return Err(type_err!(
                    "Cannot append {} value '{value}' to {} array",
                    value.datatype(),
                    self.datatype
                ));
            }
        }
        self.validity.push(true);

        Ok(())
    }

    /// Append every value from an array of the same type.
    pub fn extend_from_array(&mut self, array: &Array) -> Result<()> {
        for value in array.iter_values() {
            self.push(value)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Array {
        let data = match self.data {
            ArrayData::List { offsets, .. } => {
                let inner = self.datatype.inner().cloned().unwrap_or(DataType::Null);
                let values = if self.children.is_empty() {
                    Array::new_null(&inner, 0)
                } else {
                    concat_same_type(&inner, self.children)
                };
                ArrayData::List {
                    offsets,
                    values: Box::new(values),
                }
            }
            other => other,
        };

        let validity = if self.validity.count_trues() == self.validity.len() {
            Validity::new_all_valid(self.validity.len())
        } else {
            Validity::from_bitmap(self.validity)
        };

        Array {
            datatype: self.datatype,
            validity,
            data,
        }
    }
}

/// Concatenate arrays already known to share a type.
fn concat_same_type(datatype: &DataType, arrays: Vec<Array>) -> Array {
    let total = arrays.iter().map(|a| a.len()).sum();
    let mut builder = ArrayBuilder::with_capacity(datatype.clone(), total);
    for arr in &arrays {
        for idx in 0..arr.len() {
            // Values come from arrays of the builder's type, appending cannot
            // fail on a type mismatch.
            let _ = builder.push(arr.get_value(idx));
        }
    }
    builder.finish()
}

macro_rules! impl_from_vec {
    ($prim:ty) => {
        impl From<Vec<$prim>> for Array {
            fn from(values: Vec<$prim>) -> Self {
                Array::from_native(values)
            }
        }

        impl From<Vec<Option<$prim>>> for Array {
            fn from(values: Vec<Option<$prim>>) -> Self {
                Array::from_native_opt(values)
            }
        }
    };
}

impl_from_vec!(bool);
impl_from_vec!(i8);
impl_from_vec!(i16);
impl_from_vec!(i32);
impl_from_vec!(i64);
impl_from_vec!(u8);
impl_from_vec!(u16);
impl_from_vec!(u32);
impl_from_vec!(u64);
impl_from_vec!(f32);
impl_from_vec!(f64);

impl From<Vec<String>> for Array {
    fn from(values: Vec<String>) -> Self {
        Array {
            datatype: DataType::Utf8,
            validity: Validity::new_all_valid(values.len()),
            data: ArrayData::Utf8(values),
        }
    }
}

impl From<Vec<&str>> for Array {
    fn from(values: Vec<&str>) -> Self {
        values
            .into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into()
    }
}

impl From<Vec<Option<&str>>> for Array {
    fn from(values: Vec<Option<&str>>) -> Self {
        let validity: Validity = values.iter().map(|v| v.is_some()).collect();
        let values = values
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        Array {
            datatype: DataType::Utf8,
            validity,
            data: ArrayData::Utf8(values),
        }
    }
}

#[cfg(test)]
mod tests {
    use tabula_error::ErrorKind;

    use super::*;

    #[test]
    fn take_with_nulls() {
        let arr = Array::from(vec![Some(1_i64), None, Some(3)]);
        let got = arr.take(&[2, 1, 0, 0]);
        let expected = Array::from(vec![Some(3_i64), None, Some(1), Some(1)]);
        assert_eq!(expected, got);
    }

    #[test]
    fn take_opt_fills_nulls() {
        let arr = Array::from(vec!["a", "b"]);
        let got = arr.take_opt(&[Some(1), None, Some(0)]);
        let expected = Array::from(vec![Some("b"), None, Some("a")]);
        assert_eq!(expected, got);
    }

    #[test]
    fn fixed_width_rejects_wrong_row() {
        let datatype = DataType::array(DataType::Int64, 2);
        let rows = vec![
            ScalarValue::List(Array::from(vec![1_i64, 2])),
            ScalarValue::List(Array::from(vec![1_i64, 2, 3])),
        ];
        let err = Array::try_from_scalars(&datatype, rows).unwrap_err();
        assert_eq!(ErrorKind::Schema, err.kind());
    }

    #[test]
    fn list_rows_independent_lengths() {
        let datatype = DataType::list(DataType::Int64);
        let arr = Array::try_new_list(
            datatype.clone(),
            vec![
                Some(Array::from(vec![1_i64])),
                None,
                Some(Array::from(vec![2_i64, 3, 4])),
            ],
        )
        .unwrap();

        assert_eq!(3, arr.len());
        assert_eq!(1, arr.null_count());
        assert_eq!(
            ScalarValue::List(Array::from(vec![2_i64, 3, 4])),
            arr.get_value(2)
        );

        let taken = arr.take(&[2, 0]);
        assert_eq!(
            ScalarValue::List(Array::from(vec![1_i64])),
            taken.get_value(1)
        );
    }

    #[test]
    fn list_child_values_are_cast() {
        let datatype = DataType::list(DataType::Int64);
        let arr = Array::try_new_list(datatype, vec![Some(Array::from(vec![1_i32, 2]))]).unwrap();
        assert_eq!(
            ScalarValue::List(Array::from(vec![1_i64, 2])),
            arr.get_value(0)
        );
    }

    #[test]
    fn concat_to_supertype() {
        let a = Array::from(vec![1_i32, 2]);
        let b = Array::from(vec![Some(3_i64), None]);
        let got = Array::concat(&[a, b]).unwrap();
        assert_eq!(Array::from(vec![Some(1_i64), Some(2), Some(3), None]), got);
    }

    #[test]
    fn categorical_dictionary() {
        let arr = Array::try_from_scalars(
            &DataType::Categorical,
            ["x", "y", "x"].map(|s| ScalarValue::Categorical(s.to_string())),
        )
        .unwrap();
        match arr.data() {
            ArrayData::Categorical { codes, categories } => {
                assert_eq!(&vec![0, 1, 0], codes);
                assert_eq!(2, categories.len());
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn broadcast_length_one() {
        let arr = Array::from(vec![7_i32]);
        assert_eq!(Array::from(vec![7_i32, 7, 7]), arr.broadcast(3).unwrap());
        let err = Array::from(vec![1_i32, 2]).broadcast(3).unwrap_err();
        assert_eq!(ErrorKind::LengthMismatch, err.kind());
    }

    #[test]
    fn reinterpret_as_date() {
        let arr = Array::from(vec![0_i32, 1]).reinterpret(DataType::Date).unwrap();
        assert_eq!(ScalarValue::Date(1), arr.get_value(1));
        assert!(Array::from(vec![0_i64]).reinterpret(DataType::Date).is_err());
    }
}
