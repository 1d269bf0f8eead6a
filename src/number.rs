//! Typed views over raw numeric storage.
//!
//! A logical array may be stored in a narrower physical type than its class
//! suggests (a `double` matrix of small integers backed by `int8`, for
//! example). Reads promote the physical value; writes check that the value fits
//! the physical type.

use std::fmt;
use std::sync::Arc;

use crate::allocator::{BufferAllocator, Buffer};
use crate::error::{MatError, Result};
use crate::format::{ByteOrder, MatType};
use crate::io::ByteSource;

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Raw numeric storage: physical type, byte order and an owned buffer.
#[derive(Clone)]
pub struct NumberStore {
    ty: MatType,
    order: ByteOrder,
    buffer: Buffer,
}

impl NumberStore {
    /// Allocates a zeroed store of `len` values in native byte order.
    ///
    /// # Errors
    /// Returns `MatError::Format` if `ty` is not a numeric storage type.
    pub fn zeroed(ty: MatType, len: usize, allocator: &Arc<dyn BufferAllocator>) -> Result<Self> {
        Self::check_type(ty)?;
        Ok(Self { ty, order: ByteOrder::native(), buffer: Buffer::new(len * ty.width(), allocator) })
    }

    /// A zero-length `Double` store.
    pub fn empty_double() -> Self {
        Self {
            ty: MatType::Double,
            order: ByteOrder::native(),
            buffer: Buffer::new(0, &crate::allocator::default_allocator()),
        }
    }

    /// Reads `num_bytes` of raw values from `src`, keeping the source byte order.
    ///
    /// Nothing is allocated for a length the source cannot supply. Sources of
    /// unknown length are staged in bounded chunks first.
    pub fn read(
        src: &mut dyn ByteSource,
        ty: MatType,
        num_bytes: u32,
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        Self::check_type(ty)?;
        let len = num_bytes as usize;
        let buffer = if src.remaining().is_some() {
            src.ensure_available(u64::from(num_bytes))?;
            let mut buffer = Buffer::new(len, allocator);
            src.read_buffer(&mut buffer)?;
            buffer
        } else {
            Buffer::copy_from(&src.read_vec(len)?, allocator)
        };
        Ok(Self { ty, order: src.order(), buffer })
    }

    /// Copies raw `bytes` stored in `order`.
    ///
    /// # Errors
    /// Returns `MatError::Format` if the length is not a multiple of the type width.
    pub fn from_bytes(
        ty: MatType,
        bytes: &[u8],
        order: ByteOrder,
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        Self::check_type(ty)?;
        if bytes.len() % ty.width() != 0 {
            return Err(MatError::format(format!(
                "{} bytes are not a whole number of {ty} values",
                bytes.len()
            )));
        }
        Ok(Self { ty, order, buffer: Buffer::copy_from(bytes, allocator) })
    }

    /// Builds a store from doubles, choosing the narrowest physical type that
    /// holds every value exactly.
    pub fn compacted(values: &[f64], allocator: &Arc<dyn BufferAllocator>) -> Result<Self> {
        let ty = Self::narrowest_type(values);
        let mut store = Self::zeroed(ty, values.len(), allocator)?;
        for (i, v) in values.iter().enumerate() {
            store.set_f64(i, *v)?;
        }
        Ok(store)
    }

    /// Builds a store of the given physical type from doubles.
    pub fn from_f64(
        ty: MatType,
        values: &[f64],
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        let mut store = Self::zeroed(ty, values.len(), allocator)?;
        for (i, v) in values.iter().enumerate() {
            store.set_f64(i, *v)?;
        }
        Ok(store)
    }

    /// Builds a store of the given physical type from integers.
    pub fn from_i64(
        ty: MatType,
        values: &[i64],
        allocator: &Arc<dyn BufferAllocator>,
    ) -> Result<Self> {
        let mut store = Self::zeroed(ty, values.len(), allocator)?;
        for (i, v) in values.iter().enumerate() {
            store.set_i64(i, *v)?;
        }
        Ok(store)
    }

    fn check_type(ty: MatType) -> Result<()> {
        if ty.is_numeric() {
            Ok(())
        } else {
            Err(MatError::format(format!("{ty} is not a numeric storage type")))
        }
    }

    /// The smallest integer type holding all values, or `Double`.
    pub fn narrowest_type(values: &[f64]) -> MatType {
        if values.iter().any(|v| v.fract() != 0.0 || !v.is_finite()) {
            return MatType::Double;
        }
        let min = values.iter().copied().fold(0.0, f64::min);
        let max = values.iter().copied().fold(0.0, f64::max);
        [
            (MatType::UInt8, 0.0, u8::MAX as f64),
            (MatType::Int8, i8::MIN as f64, i8::MAX as f64),
            (MatType::UInt16, 0.0, u16::MAX as f64),
            (MatType::Int16, i16::MIN as f64, i16::MAX as f64),
            (MatType::UInt32, 0.0, u32::MAX as f64),
            (MatType::Int32, i32::MIN as f64, i32::MAX as f64),
        ]
        .into_iter()
        .find(|(_, lo, hi)| min >= *lo && max <= *hi)
        .map_or(MatType::Double, |(ty, _, _)| ty)
    }

    /// Physical storage type.
    pub fn physical_type(&self) -> MatType {
        self.ty
    }

    /// Byte order of the buffer.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.buffer.len() / self.ty.width()
    }

    /// Returns true if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Raw bytes in [`order`](Self::order).
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Size of the raw buffer in bytes.
    pub fn num_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Converts the whole buffer to `order` with a single in-place pass.
    pub fn convert_order(&mut self, order: ByteOrder) {
        if self.order == order {
            return;
        }
        let width = self.ty.width();
        if width > 1 {
            self.buffer.chunks_exact_mut(width).for_each(<[u8]>::reverse);
        }
        self.order = order;
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.len() {
            Ok(())
        } else {
            Err(MatError::range(format!("index {index} out of bounds for {} values", self.len())))
        }
    }

    fn raw(&self, index: usize) -> [u8; 8] {
        let width = self.ty.width();
        let start = index * width;
        let mut out = [0u8; 8];
        let src = &self.buffer[start..start + width];
        // Right-align big-endian values so both orders decode from the same array.
        match self.order {
            ByteOrder::Little => out[..width].copy_from_slice(src),
            ByteOrder::Big => out[8 - width..].copy_from_slice(src),
        }
        out
    }

    fn put_raw(&mut self, index: usize, bytes: [u8; 8]) {
        let width = self.ty.width();
        let start = index * width;
        let dst = &mut self.buffer[start..start + width];
        match self.order {
            ByteOrder::Little => dst.copy_from_slice(&bytes[..width]),
            ByteOrder::Big => dst.copy_from_slice(&bytes[8 - width..]),
        }
    }

    fn bits(&self, index: usize) -> u64 {
        let raw = self.raw(index);
        match self.order {
            ByteOrder::Little => u64::from_le_bytes(raw),
            ByteOrder::Big => u64::from_be_bytes(raw),
        }
    }

    fn put_bits(&mut self, index: usize, bits: u64) {
        let raw = match self.order {
            ByteOrder::Little => bits.to_le_bytes(),
            ByteOrder::Big => bits.to_be_bytes(),
        };
        self.put_raw(index, raw);
    }

    /// Reads value `index` promoted to `f64`.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.check_index(index)?;
        let bits = self.bits(index);
        Ok(match self.ty {
            MatType::Int8 => bits as u8 as i8 as f64,
            MatType::UInt8 => bits as u8 as f64,
            MatType::Int16 => bits as u16 as i16 as f64,
            MatType::UInt16 => bits as u16 as f64,
            MatType::Int32 => bits as u32 as i32 as f64,
            MatType::UInt32 => bits as u32 as f64,
            MatType::Int64 => bits as i64 as f64,
            MatType::UInt64 => bits as f64,
            MatType::Single => f32::from_bits(bits as u32) as f64,
            _ => f64::from_bits(bits),
        })
    }

    /// Reads value `index` promoted to `i64`. Floats are truncated toward zero.
    pub fn get_i64(&self, index: usize) -> Result<i64> {
        self.check_index(index)?;
        let bits = self.bits(index);
        Ok(match self.ty {
            MatType::Int8 => bits as u8 as i8 as i64,
            MatType::UInt8 => bits as u8 as i64,
            MatType::Int16 => bits as u16 as i16 as i64,
            MatType::UInt16 => bits as u16 as i64,
            MatType::Int32 => bits as u32 as i32 as i64,
            MatType::UInt32 => bits as u32 as i64,
            MatType::Int64 | MatType::UInt64 => bits as i64,
            MatType::Single => f32::from_bits(bits as u32) as i64,
            _ => f64::from_bits(bits) as i64,
        })
    }

    /// Writes an integer value, checking it against the physical range.
    ///
    /// # Errors
    /// Returns `MatError::Range` if the value does not fit. Unsigned types are
    /// checked against their unsigned range.
    pub fn set_i64(&mut self, index: usize, value: i64) -> Result<()> {
        self.check_index(index)?;
        let (lo, hi): (i128, i128) = match self.ty {
            MatType::Int8 => (i8::MIN.into(), i8::MAX.into()),
            MatType::UInt8 => (0, u8::MAX.into()),
            MatType::Int16 => (i16::MIN.into(), i16::MAX.into()),
            MatType::UInt16 => (0, u16::MAX.into()),
            MatType::Int32 => (i32::MIN.into(), i32::MAX.into()),
            MatType::UInt32 => (0, u32::MAX.into()),
            MatType::Int64 => (i64::MIN.into(), i64::MAX.into()),
            MatType::UInt64 => (0, u64::MAX.into()),
            MatType::Single => {
                self.put_bits(index, u64::from((value as f32).to_bits()));
                return Ok(());
            }
            _ => {
                self.put_bits(index, (value as f64).to_bits());
                return Ok(());
            }
        };
        let wide = i128::from(value);
        if wide < lo || wide > hi {
            return Err(MatError::range(format!(
                "value {value} does not fit physical type {}",
                self.ty
            )));
        }
        // Two's complement truncation keeps exactly the low `width` bytes.
        self.put_bits(index, value as u64);
        Ok(())
    }

    /// Writes a floating point value, checking it against the physical type.
    ///
    /// # Errors
    /// Returns `MatError::Range` for non-integral values in integer storage,
    /// values outside the integer range, or finite values beyond `f32` range in
    /// single storage.
    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        self.check_index(index)?;
        match self.ty {
            MatType::Double => {
                self.put_bits(index, value.to_bits());
                Ok(())
            }
            MatType::Single => {
                if value.is_finite() && value.abs() > f64::from(f32::MAX) {
                    return Err(MatError::range(format!("value {value} exceeds single range")));
                }
                self.put_bits(index, u64::from((value as f32).to_bits()));
                Ok(())
            }
            MatType::UInt64 => {
                // `u64::MAX as f64` rounds up to 2^64, so the bound is exclusive.
                if value.fract() != 0.0 || !(0.0..TWO_POW_64).contains(&value) {
                    return Err(MatError::range(format!("value {value} does not fit UInt64")));
                }
                self.put_bits(index, value as u64);
                Ok(())
            }
            _ => {
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(MatError::range(format!(
                        "value {value} is not representable as {}",
                        self.ty
                    )));
                }
                if value < i64::MIN as f64 || value >= i64::MAX as f64 {
                    return Err(MatError::range(format!("value {value} does not fit {}", self.ty)));
                }
                self.set_i64(index, value as i64)
            }
        }
    }

    /// All values promoted to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len()).filter_map(|i| self.get_f64(i).ok()).collect()
    }

    /// All values promoted to `i64`.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        (0..self.len()).filter_map(|i| self.get_i64(i).ok()).collect()
    }
}

impl PartialEq for NumberStore {
    /// Stores are equal when they hold the same physical values, regardless of
    /// buffer byte order.
    fn eq(&self, other: &Self) -> bool {
        if self.ty != other.ty || self.buffer.len() != other.buffer.len() {
            return false;
        }
        if self.order == other.order {
            return *self.buffer == *other.buffer;
        }
        (0..self.len()).all(|i| self.bits(i) == other.bits(i))
    }
}

impl fmt::Debug for NumberStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberStore")
            .field("ty", &self.ty)
            .field("order", &self.order)
            .field("len", &self.len())
            .finish()
    }
}
