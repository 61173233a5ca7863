//! Per-pixel decoding of captured Gray-code frames.

use procam_core::{CorrespondenceMap, Gray8, ScanParams};
use thiserror::Error;

use super::pattern::{gray_to_binary, CodeAxis, PatternFrame, PatternSequence};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected {expected} captured frames, got {got}")]
    FrameCountMismatch { expected: usize, got: usize },
    #[error("captured frames differ in size")]
    FrameSizeMismatch,
    #[error("no pixel decoded on any axis")]
    AllInvalid,
}

/// Per-bit decision for one pixel of a direct/inverse frame pair.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BitDecision {
    One,
    Zero,
    /// Too dark or too close to call; the pixel fails the axis.
    Unknown,
}

#[inline]
fn decide_bit(direct: u8, inverse: u8, contrast: u8, min_brightness: u8) -> BitDecision {
    if direct.max(inverse) <= min_brightness {
        return BitDecision::Unknown;
    }
    let diff = direct as i32 - inverse as i32;
    if diff > contrast as i32 {
        BitDecision::One
    } else if -diff > contrast as i32 {
        BitDecision::Zero
    } else {
        BitDecision::Unknown
    }
}

/// Decode a captured frame sequence into a correspondence map.
///
/// `frames` must hold one camera capture per projected pattern, in projection
/// order. A pixel fails an axis as soon as a single bit decision on that axis
/// is ambiguous or too dark, and no spatial smoothing is applied; shadows,
/// specularities and occlusions therefore end up in the invalid mask rather
/// than as wrong codes.
pub fn decode(frames: &[Gray8], params: &ScanParams) -> Result<CorrespondenceMap, DecodeError> {
    let sequence = PatternSequence::new(params.proj_width, params.proj_height, params.axes);
    decode_with_sequence(frames, &sequence, params)
}

/// [`decode`] against an explicit pattern sequence.
pub fn decode_with_sequence(
    frames: &[Gray8],
    sequence: &PatternSequence,
    params: &ScanParams,
) -> Result<CorrespondenceMap, DecodeError> {
    if frames.len() != sequence.frame_count() {
        return Err(DecodeError::FrameCountMismatch {
            expected: sequence.frame_count(),
            got: frames.len(),
        });
    }
    let width = frames[0].width();
    let height = frames[0].height();
    if frames.iter().any(|f| !f.same_size(&frames[0])) {
        return Err(DecodeError::FrameSizeMismatch);
    }

    let pixels = (width as usize) * (height as usize);
    let mut map = CorrespondenceMap::new(width, height, params.axes);

    // Per-axis accumulation state.
    let mut col_gray = vec![0u32; pixels];
    let mut col_ok = vec![params.axes.has_columns(); pixels];
    let mut row_gray = vec![0u32; pixels];
    let mut row_ok = vec![params.axes.has_rows(); pixels];

    let mut frame_iter = sequence.frames().iter().enumerate();
    while let Some((idx, frame)) = frame_iter.next() {
        let PatternFrame::Code {
            axis,
            inverted: false,
            ..
        } = *frame
        else {
            continue;
        };
        // The inverse of this bit plane is the next frame by construction.
        let direct = &frames[idx];
        let inverse = &frames[idx + 1];
        frame_iter.next();

        let (gray, ok) = match axis {
            CodeAxis::Column => (&mut col_gray, &mut col_ok),
            CodeAxis::Row => (&mut row_gray, &mut row_ok),
        };

        for (i, (d, v)) in direct
            .as_slice()
            .iter()
            .zip(inverse.as_slice().iter())
            .enumerate()
        {
            match decide_bit(*d, *v, params.contrast_threshold, params.min_brightness) {
                BitDecision::One => gray[i] = (gray[i] << 1) | 1,
                BitDecision::Zero => gray[i] <<= 1,
                BitDecision::Unknown => ok[i] = false,
            }
        }
    }

    let mut any_valid = false;
    for y in 0..height {
        for x in 0..width {
            let i = (y as usize) * (width as usize) + x as usize;

            if params.axes.has_columns() && col_ok[i] {
                let code = gray_to_binary(col_gray[i]);
                if code < params.proj_width {
                    map.set_column(x, y, code);
                    any_valid = true;
                }
            }
            if params.axes.has_rows() && row_ok[i] {
                let code = gray_to_binary(row_gray[i]);
                if code < params.proj_height {
                    map.set_row(x, y, code);
                    any_valid = true;
                }
            }
        }
    }

    if !any_valid {
        return Err(DecodeError::AllInvalid);
    }
    Ok(map)
}
