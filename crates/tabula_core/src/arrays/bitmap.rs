use std::fmt;

/// An LSB ordered bitmap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    pub fn with_capacity(cap: usize) -> Self {
        Bitmap {
            len: 0,
            data: Vec::with_capacity(cap.div_ceil(8)),
        }
    }

    pub fn new_with_val(val: bool, len: usize) -> Self {
        let fill = if val { u8::MAX } else { 0 };
        Bitmap {
            len,
            data: vec![fill; len.div_ceil(8)],
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_trues(&self) -> usize {
        (0..self.len).filter(|&idx| self.value(idx)).count()
    }

    /// Push a value onto the end of the bitmap.
    pub fn push(&mut self, val: bool) {
        if self.len == self.data.len() * 8 {
            self.data.push(0);
        }
        let idx = self.len;
        self.len += 1;
        self.set_unchecked(idx, val);
    }

    /// Get the value at index.
    ///
    /// Panics if index is out of bounds.
    #[inline]
    pub fn value(&self, idx: usize) -> bool {
        let byte = self.data[idx >> 3];
        (byte >> (idx & 7)) & 1 != 0
    }

    /// Set a bit at index.
    ///
    /// Panics if index is out of bounds.
    #[inline]
    pub fn set_unchecked(&mut self, idx: usize, val: bool) {
        let byte = idx / 8;
        let bit = idx & 7;
        if val {
            self.data[byte] |= 1 << bit;
        } else {
            self.data[byte] &= !(1 << bit);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.value(idx))
    }
}

impl FromIterator<bool> for Bitmap {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut bitmap = Bitmap::with_capacity(iter.size_hint().0);
        for v in iter {
            bitmap.push(v);
        }
        bitmap
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Validity mask for an array.
#[derive(Debug, Clone)]
pub struct Validity {
    inner: ValidityInner,
}

#[derive(Debug, Clone)]
enum ValidityInner {
    /// No mask has been set, assume all entries valid.
    AllValid { len: usize },
    /// All entries invalid.
    AllInvalid { len: usize },
    /// Bitmap indicates which entries are valid.
    Mask { bitmap: Bitmap },
}

impl Validity {
    pub fn new_all_valid(len: usize) -> Self {
        Validity {
            inner: ValidityInner::AllValid { len },
        }
    }

    pub fn new_all_invalid(len: usize) -> Self {
        Validity {
            inner: ValidityInner::AllInvalid { len },
        }
    }

    pub fn from_bitmap(bitmap: Bitmap) -> Self {
        Validity {
            inner: ValidityInner::Mask { bitmap },
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            ValidityInner::AllValid { len } => *len,
            ValidityInner::AllInvalid { len } => *len,
            ValidityInner::Mask { bitmap } => bitmap.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_valid(&self) -> bool {
        match &self.inner {
            ValidityInner::AllValid { .. } => true,
            ValidityInner::AllInvalid { len } => *len == 0,
            ValidityInner::Mask { bitmap } => bitmap.count_trues() == bitmap.len(),
        }
    }

    pub fn null_count(&self) -> usize {
        match &self.inner {
            ValidityInner::AllValid { .. } => 0,
            ValidityInner::AllInvalid { len } => *len,
            ValidityInner::Mask { bitmap } => bitmap.len() - bitmap.count_trues(),
        }
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        match &self.inner {
            ValidityInner::AllValid { .. } => true,
            ValidityInner::AllInvalid { .. } => false,
            ValidityInner::Mask { bitmap } => bitmap.value(idx),
        }
    }

    pub fn set_valid(&mut self, idx: usize) {
        match &mut self.inner {
            ValidityInner::AllValid { .. } => (),
            ValidityInner::AllInvalid { len } => {
                let mut bitmap = Bitmap::new_with_val(false, *len);
                bitmap.set_unchecked(idx, true);
                self.inner = ValidityInner::Mask { bitmap }
            }
            ValidityInner::Mask { bitmap } => bitmap.set_unchecked(idx, true),
        }
    }

    pub fn set_invalid(&mut self, idx: usize) {
        match &mut self.inner {
            ValidityInner::AllValid { len } => {
                let mut bitmap = Bitmap::new_with_val(true, *len);
                bitmap.set_unchecked(idx, false);
                self.inner = ValidityInner::Mask { bitmap }
            }
            ValidityInner::AllInvalid { .. } => (),
            ValidityInner::Mask { bitmap } => bitmap.set_unchecked(idx, false),
        }
    }

    /// Select validities for some row indices.
    pub fn take(&self, indices: &[usize]) -> Validity {
        match &self.inner {
            ValidityInner::AllValid { .. } => Validity::new_all_valid(indices.len()),
            ValidityInner::AllInvalid { .. } => Validity::new_all_invalid(indices.len()),
            ValidityInner::Mask { bitmap } => {
                Validity::from_bitmap(indices.iter().map(|&idx| bitmap.value(idx)).collect())
            }
        }
    }

    /// AND two validities together, the output is valid only where both
    /// inputs are valid.
    pub fn union(&self, other: &Validity) -> Validity {
        debug_assert_eq!(self.len(), other.len());
        match (&self.inner, &other.inner) {
            (ValidityInner::AllValid { .. }, _) => other.clone(),
            (_, ValidityInner::AllValid { .. }) => self.clone(),
            (ValidityInner::AllInvalid { len }, _) | (_, ValidityInner::AllInvalid { len }) => {
                Validity::new_all_invalid(*len)
            }
            (ValidityInner::Mask { bitmap: a }, ValidityInner::Mask { bitmap: b }) => {
                Validity::from_bitmap(a.iter().zip(b.iter()).map(|(a, b)| a && b).collect())
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len()).map(|idx| self.is_valid(idx))
    }
}

impl FromIterator<bool> for Validity {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let bitmap: Bitmap = iter.into_iter().collect();
        if bitmap.count_trues() == bitmap.len() {
            Validity::new_all_valid(bitmap.len())
        } else {
            Validity::from_bitmap(bitmap)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_push_and_count() {
        let bitmap: Bitmap = [true, false, true, true, false, false, true, true, true]
            .into_iter()
            .collect();
        assert_eq!(9, bitmap.len());
        assert_eq!(6, bitmap.count_trues());
        assert!(bitmap.value(8));
        assert!(!bitmap.value(1));
    }

    #[test]
    fn validity_set_invalid_materializes_mask() {
        let mut validity = Validity::new_all_valid(4);
        validity.set_invalid(2);
        assert_eq!(1, validity.null_count());
        assert_eq!(vec![true, true, false, true], validity.iter().collect::<Vec<_>>());
    }

    #[test]
    fn validity_union() {
        let a: Validity = [true, false, true].into_iter().collect();
        let b: Validity = [true, true, false].into_iter().collect();
        let out = a.union(&b);
        assert_eq!(vec![true, false, false], out.iter().collect::<Vec<_>>());

        let all = Validity::new_all_valid(3);
        assert_eq!(1, all.union(&a).null_count());
    }

    #[test]
    fn validity_take() {
        let a: Validity = [true, false, true].into_iter().collect();
        let out = a.take(&[2, 1, 1, 0]);
        assert_eq!(vec![true, false, false, true], out.iter().collect::<Vec<_>>());
    }
}
