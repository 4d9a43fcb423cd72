//! Typed access into staged uniform data

use std::mem::size_of;

use crate::error::UniformError;
use crate::shader::UniformField;

#[derive(Debug, Clone, Copy)]
struct ArrayShape {
    len: u32,
    stride: u32,
    element_size: u32,
}

/// Window over the staged bytes of a block, a field or an array element
///
/// Views consume themselves while walking down the field tree:
/// `block.field("lights")?.index(2)?.field("color")?`.
#[derive(Debug)]
pub struct UniformView<'a> {
    name: String,
    bytes: &'a mut [u8],
    fields: &'a [UniformField],
    array: Option<ArrayShape>,
}

impl<'a> UniformView<'a> {
    pub(crate) fn block(name: &str, bytes: &'a mut [u8], fields: &'a [UniformField]) -> Self {
        Self {
            name: name.to_string(),
            bytes,
            fields,
            array: None,
        }
    }

    /// Dotted path of this view, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte size of the view.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    pub fn len(&self) -> Option<u32> {
        self.array.map(|shape| shape.len)
    }

    pub fn field(self, name: &str) -> Result<UniformView<'a>, UniformError> {
        let unknown = || UniformError::UnknownField {
            name: name.to_string(),
            parent: self.name.clone(),
        };
        if self.array.is_some() {
            return Err(unknown());
        }
        let field = self
            .fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(unknown)?;
        let start = field.offset as usize;
        let end = start + field.size as usize;
        let path = format!("{}.{}", self.name, name);
        Ok(UniformView {
            name: path,
            bytes: &mut self.bytes[start..end],
            fields: &field.fields,
            array: field.array_len.map(|len| ArrayShape {
                len,
                stride: field.array_stride,
                element_size: field.element_size,
            }),
        })
    }

    pub fn index(self, index: u32) -> Result<UniformView<'a>, UniformError> {
        let shape = self
            .array
            .ok_or_else(|| UniformError::NotAnArray(self.name.clone()))?;
        if index >= shape.len {
            return Err(UniformError::IndexOutOfRange {
                name: self.name,
                index,
                len: shape.len,
            });
        }
        let start = (index * shape.stride) as usize;
        let end = start + shape.element_size as usize;
        Ok(UniformView {
            name: format!("{}[{}]", self.name, index),
            bytes: &mut self.bytes[start..end],
            fields: self.fields,
            array: None,
        })
    }

    /// Stage `value`. Panics when its size differs from the reflected size.
    pub fn set<T: bytemuck::Pod>(&mut self, value: &T) {
        self.set_bytes(bytemuck::bytes_of(value));
    }

    /// Stage raw bytes. Panics when the length differs from the reflected size.
    pub fn set_bytes(&mut self, data: &[u8]) {
        assert_eq!(
            data.len(),
            self.bytes.len(),
            "uniform {} is {} bytes, got {}",
            self.name,
            self.bytes.len(),
            data.len()
        );
        self.bytes.copy_from_slice(data);
    }

    /// Read back the staged value. Panics when `T` has the wrong size.
    pub fn get<T: bytemuck::Pod>(&self) -> T {
        assert_eq!(
            size_of::<T>(),
            self.bytes.len(),
            "uniform {} is {} bytes, read as {}",
            self.name,
            self.bytes.len(),
            size_of::<T>()
        );
        bytemuck::pod_read_unaligned(self.bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::FieldKind;

    fn scalar(name: &str, offset: u32) -> UniformField {
        UniformField {
            name: name.into(),
            kind: FieldKind::Scalar,
            offset,
            size: 4,
            element_size: 4,
            array_len: None,
            array_stride: 0,
            fields: Vec::new(),
        }
    }

    /// struct { time: f32, points: array<struct { x: f32, y: f32 }, 2> } with 16 byte stride
    fn layout() -> Vec<UniformField> {
        vec![
            scalar("time", 0),
            UniformField {
                name: "points".into(),
                kind: FieldKind::Struct,
                offset: 16,
                size: 32,
                element_size: 8,
                array_len: Some(2),
                array_stride: 16,
                fields: vec![scalar("x", 0), scalar("y", 4)],
            },
        ]
    }

    #[test]
    fn test_nested_array_field_offsets() {
        let fields = layout();
        let mut staging = vec![0u8; 48];
        UniformView::block("params", &mut staging, &fields)
            .field("points")
            .unwrap()
            .index(1)
            .unwrap()
            .field("y")
            .unwrap()
            .set(&2.5f32);
        assert_eq!(&staging[36..40], &2.5f32.to_ne_bytes());
    }

    #[test]
    fn test_get_reads_back() {
        let fields = layout();
        let mut staging = vec![0u8; 48];
        let mut view = UniformView::block("params", &mut staging, &fields)
            .field("time")
            .unwrap();
        view.set(&1.25f32);
        assert_eq!(view.get::<f32>(), 1.25);
        assert_eq!(view.name(), "params.time");
    }

    #[test]
    fn test_accessor_errors() {
        let fields = layout();
        let mut staging = vec![0u8; 48];
        let err = UniformView::block("params", &mut staging, &fields)
            .field("points")
            .unwrap()
            .index(2)
            .unwrap_err();
        assert_eq!(
            err,
            UniformError::IndexOutOfRange {
                name: "params.points".into(),
                index: 2,
                len: 2
            }
        );

        let err = UniformView::block("params", &mut staging, &fields)
            .field("time")
            .unwrap()
            .index(0)
            .unwrap_err();
        assert_eq!(err, UniformError::NotAnArray("params.time".into()));

        let err = UniformView::block("params", &mut staging, &fields)
            .field("missing")
            .unwrap_err();
        assert!(matches!(err, UniformError::UnknownField { .. }));
    }

    #[test]
    #[should_panic(expected = "uniform params.time is 4 bytes, got 8")]
    fn test_size_mismatch_panics() {
        let fields = layout();
        let mut staging = vec![0u8; 48];
        UniformView::block("params", &mut staging, &fields)
            .field("time")
            .unwrap()
            .set(&[0f32; 2]);
    }
}
