use std::collections::HashMap;

use crate::SegmentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceStatus {
    /// Resume from chunk 0.
    #[default]
    Fulled,
    /// Resume decoding from `last_key_frame_idx`; only chunks from
    /// `last_frame_idx` on are renderable.
    Sliced,
}

/// Playback progress of one video segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trace {
    pub status: TraceStatus,
    pub last_key_frame_idx: usize,
    pub last_frame_idx: usize,
    pub end_frame_idx: usize,
}

impl Trace {
    pub fn fulled(total_chunks: usize) -> Self {
        Self {
            status: TraceStatus::Fulled,
            last_key_frame_idx: 0,
            last_frame_idx: 0,
            end_frame_idx: total_chunks.saturating_sub(1),
        }
    }

    pub fn is_sliced(&self) -> bool {
        self.status == TraceStatus::Sliced
    }
}

/// Traces of every segment. At most one segment is sliced at a time.
#[derive(Debug, Default)]
pub struct TraceTable {
    sliced: HashMap<SegmentId, Trace>,
}

impl TraceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trace(&self, segment: SegmentId, total_chunks: usize) -> Trace {
        self.sliced
            .get(&segment)
            .copied()
            .unwrap_or_else(|| Trace::fulled(total_chunks))
    }

    /// Marks `segment` as sliced and resets every other trace.
    pub fn set_sliced(
        &mut self,
        segment: SegmentId,
        total_chunks: usize,
        last_key_frame_idx: usize,
        last_frame_idx: usize,
    ) {
        self.sliced.clear();
        self.sliced.insert(
            segment,
            Trace {
                status: TraceStatus::Sliced,
                last_key_frame_idx,
                last_frame_idx,
                end_frame_idx: total_chunks.saturating_sub(1),
            },
        );
    }

    pub fn reset(&mut self, segment: SegmentId) {
        self.sliced.remove(&segment);
    }

    pub fn reset_all(&mut self) {
        self.sliced.clear();
    }
}
