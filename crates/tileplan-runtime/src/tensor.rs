use alloc::vec::Vec;

use half::{bf16, f16};
use tileplan_ir::Elem;

use crate::ExecutionError;

/// A dense row-major buffer bound to a kernel slot.
///
/// Data is kept as raw bytes in the element type of the buffer, the way it would be uploaded to a
/// device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    bytes: Vec<u8>,
    shape: Vec<usize>,
    elem: Elem,
}

impl TensorData {
    /// Encode values in the given element type. Values are rounded to its precision.
    pub fn from_f32(values: &[f32], shape: Vec<usize>, elem: Elem) -> Self {
        assert_eq!(
            values.len(),
            shape.iter().product::<usize>(),
            "Shape {shape:?} doesn't match {} values",
            values.len()
        );

        let bytes = match elem {
            Elem::F16 => {
                let data: Vec<f16> = values.iter().map(|v| f16::from_f32(*v)).collect();
                bytemuck::cast_slice(&data).to_vec()
            }
            Elem::BF16 => {
                let data: Vec<bf16> = values.iter().map(|v| bf16::from_f32(*v)).collect();
                bytemuck::cast_slice(&data).to_vec()
            }
            Elem::F32 => bytemuck::cast_slice(values).to_vec(),
            Elem::U32 => {
                let data: Vec<u32> = values.iter().map(|v| *v as u32).collect();
                bytemuck::cast_slice(&data).to_vec()
            }
        };

        Self { bytes, shape, elem }
    }

    /// A zero-filled buffer.
    pub fn zeros(shape: Vec<usize>, elem: Elem) -> Self {
        let len: usize = shape.iter().product();
        Self {
            bytes: alloc::vec![0; len * elem.size()],
            shape,
            elem,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn elem(&self) -> Elem {
        self.elem
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.elem.size()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode one element.
    pub fn read(&self, index: usize) -> Option<f64> {
        let size = self.elem.size();
        let bytes = self.bytes.get(index * size..(index + 1) * size)?;

        Some(match self.elem {
            Elem::F16 => f16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            Elem::BF16 => bf16::from_le_bytes([bytes[0], bytes[1]]).to_f64(),
            Elem::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Elem::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        })
    }

    /// Encode one element, rounding it to the element type.
    pub fn write(&mut self, index: usize, value: f64) -> Result<(), ExecutionError> {
        let size = self.elem.size();
        let len = self.len();
        let Some(bytes) = self.bytes.get_mut(index * size..(index + 1) * size) else {
            return Err(ExecutionError::OutOfBounds { index, len });
        };

        match self.elem {
            Elem::F16 => bytes.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
            Elem::BF16 => bytes.copy_from_slice(&bf16::from_f64(value).to_le_bytes()),
            Elem::F32 => bytes.copy_from_slice(&(value as f32).to_le_bytes()),
            Elem::U32 => bytes.copy_from_slice(&(Elem::U32.round(value) as u32).to_le_bytes()),
        }

        Ok(())
    }

    /// Every element widened to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        (0..self.len())
            .filter_map(|index| self.read(index))
            .map(|value| value as f32)
            .collect()
    }
}
