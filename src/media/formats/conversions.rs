// SPDX-License-Identifier: MPL-2.0

//! Pixel format conversion utilities
//!
//! Only the luma strip from packed YUY2 to 8-bit gray is needed: every even
//! byte of a YUY2 row is a Y sample, so the gray image is exactly half the
//! size of the source.

use crate::errors::{ProviderError, ProviderResult};

/// Strip luma from a packed YUY2 image into `dst`.
///
/// `src_stride` is the number of bytes per source row (at least
/// `width * 2`; drivers may pad rows). `dst` must hold `width * height` bytes.
pub fn yuy2_to_gray8(
    src: &[u8],
    width: u32,
    height: u32,
    src_stride: usize,
    dst: &mut [u8],
) -> ProviderResult<()> {
    let width = width as usize;
    let height = height as usize;
    let row_bytes = width * 2;

    if src_stride < row_bytes {
        return Err(ProviderError::InvalidState(format!(
            "stride {} shorter than row ({} bytes)",
            src_stride, row_bytes
        )));
    }
    if height > 0 && src.len() < src_stride * (height - 1) + row_bytes {
        return Err(ProviderError::InvalidState(format!(
            "YUY2 buffer too small: {} bytes for {}x{}",
            src.len(),
            width,
            height
        )));
    }
    if dst.len() != width * height {
        return Err(ProviderError::InvalidState(format!(
            "gray buffer is {} bytes, expected {}",
            dst.len(),
            width * height
        )));
    }

    for (row, out) in dst.chunks_exact_mut(width.max(1)).take(height).enumerate() {
        let line = &src[row * src_stride..row * src_stride + row_bytes];
        for (gray, pair) in out.iter_mut().zip(line.chunks_exact(2)) {
            *gray = pair[0];
        }
    }

    Ok(())
}

/// Allocating variant of [`yuy2_to_gray8`] for tightly packed sources
pub fn yuy2_to_gray8_vec(src: &[u8], width: u32, height: u32) -> ProviderResult<Vec<u8>> {
    let mut dst = vec![0u8; width as usize * height as usize];
    yuy2_to_gray8(src, width, height, width as usize * 2, &mut dst)?;
    Ok(dst)
}
