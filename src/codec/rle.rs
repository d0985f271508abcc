//! Run-length encoding of dense chunk arrays.
//!
//! Runs compare raw bytes, so encoding is lossless for floats too (distinct
//! NaN payloads and signed zeros stay distinct).

use bytemuck::Pod;

/// `len` copies of `value`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Run<T> {
    pub value: T,
    pub len: u32,
}

/// Collapse consecutive identical elements into runs.
pub fn encode<T: Pod>(data: &[T]) -> Vec<Run<T>> {
    let mut runs: Vec<Run<T>> = Vec::new();
    for &item in data {
        match runs.last_mut() {
            Some(run) if bytemuck::bytes_of(&run.value) == bytemuck::bytes_of(&item) && run.len < u32::MAX => {
                run.len += 1;
            }
            _ => runs.push(Run { value: item, len: 1 }),
        }
    }
    runs
}

/// Total number of elements the runs expand to.
pub fn decoded_len<T>(runs: &[Run<T>]) -> usize {
    runs.iter().map(|r| r.len as usize).sum()
}

/// Expand runs back into a dense array.
pub fn decode<T: Copy>(runs: &[Run<T>]) -> Vec<T> {
    let mut out = Vec::with_capacity(decoded_len(runs));
    for run in runs {
        out.extend(std::iter::repeat_n(run.value, run.len as usize));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::material::VoxelMaterial;

    #[test]
    fn test_smooth_field_compresses() {
        let mut values = vec![-1.0f32; 2000];
        values.extend(std::iter::repeat_n(1.0f32, 2096));
        values[1000] = 0.5;

        let runs = encode(&values);
        assert_eq!(runs.len(), 4);
        assert_eq!(decoded_len(&runs), values.len());
        assert_eq!(decode(&runs), values);
    }

    #[test]
    fn test_signed_zero_preserved() {
        let values = [0.0f32, -0.0, -0.0, 0.0];
        let decoded = decode(&encode(&values));
        let bits: Vec<u32> = decoded.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, values.iter().map(|v| v.to_bits()).collect::<Vec<_>>());
        assert_eq!(encode(&values).len(), 3);
    }

    #[test]
    fn test_materials() {
        let materials = [VoxelMaterial::new(1), VoxelMaterial::new(1), VoxelMaterial::blended(1, 2, 9)];
        let runs = encode(&materials);
        assert_eq!(runs, vec![
            Run { value: VoxelMaterial::new(1), len: 2 },
            Run { value: VoxelMaterial::blended(1, 2, 9), len: 1 },
        ]);
        assert_eq!(decode(&runs), materials);
    }

    #[test]
    fn test_empty() {
        assert!(encode::<f32>(&[]).is_empty());
        assert!(decode::<f32>(&[]).is_empty());
    }
}
