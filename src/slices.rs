use std::path::PathBuf;

use serde::Serialize;

use crate::error::SliceError;
use crate::paths::SliceNaming;
use crate::timecode::{self, TimeMark};

/// One requested excerpt of the source media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SliceJob {
    /// 1-based; defines the dashboard row and output ordering.
    pub index: usize,
    pub start: TimeMark,
    pub end: TimeMark,
    pub start_label: String,
    pub end_label: String,
    pub output: PathBuf,
}

impl SliceJob {
    pub fn duration(&self) -> TimeMark {
        self.end.checked_sub(self.start).unwrap_or(TimeMark::ZERO)
    }
}

/// Splits every raw value on whitespace, so `"5.325 7.34"` contributes two marks.
pub fn split_marks<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|value| value.as_ref().split_whitespace())
        .map(str::to_owned)
        .collect()
}

/// Turns a flat `[start, stop, start, stop, ...]` list into slice jobs in input order.
pub fn plan_slices<S: AsRef<str>>(
    marks: &[S],
    naming: &SliceNaming,
) -> Result<Vec<SliceJob>, SliceError> {
    if marks.len() % 2 != 0 {
        return Err(SliceError::OddSliceMarkCount { count: marks.len() });
    }

    marks
        .chunks_exact(2)
        .enumerate()
        .map(|(offset, pair)| {
            let index = offset + 1;
            let start_label = pair[0].as_ref().trim();
            let end_label = pair[1].as_ref().trim();
            let start = timecode::parse(start_label)?;
            let end = timecode::parse(end_label)?;

            match end.checked_sub(start) {
                Some(duration) if !duration.is_zero() => {}
                _ => {
                    return Err(SliceError::EmptySlice {
                        index,
                        start,
                        stop: end,
                    })
                }
            }

            Ok(SliceJob {
                index,
                start,
                end,
                start_label: start_label.to_owned(),
                end_label: end_label.to_owned(),
                output: naming.path_for(index, start_label, end_label),
            })
        })
        .collect()
}
