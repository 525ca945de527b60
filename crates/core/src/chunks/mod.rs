use crate::media::{ChunkKind, EncodedChunk};

/// Random-access view over the ordered chunks of one track.
///
/// The first chunk of a well-formed track is always a key chunk; the index
/// relies on the container for that and does not re-check it.
#[derive(Debug, Clone, Default)]
pub struct ChunkIndex {
    chunks: Vec<EncodedChunk>,
}

impl ChunkIndex {
    pub fn new(chunks: Vec<EncodedChunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&EncodedChunk> {
        self.chunks.get(idx)
    }

    pub fn first(&self) -> Option<&EncodedChunk> {
        self.chunks.first()
    }

    pub fn last(&self) -> Option<&EncodedChunk> {
        self.chunks.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EncodedChunk> {
        self.chunks.iter()
    }

    /// Half-open slice `[start, end)`, clamped to the index bounds.
    pub fn slice(&self, start: usize, end: usize) -> &[EncodedChunk] {
        let end = end.min(self.chunks.len());
        let start = start.min(end);
        &self.chunks[start..end]
    }

    /// Index of the chunk whose timestamp is closest to `timestamp_us`.
    /// Ties go to the first chunk seen.
    pub fn nearest_by_timestamp(&self, timestamp_us: i64) -> Option<usize> {
        let mut closest: Option<(usize, u64)> = None;
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let diff = chunk.timestamp_us.abs_diff(timestamp_us);
            if closest.map_or(true, |(_, best)| diff < best) {
                closest = Some((idx, diff));
            }
        }
        closest.map(|(idx, _)| idx)
    }

    /// Nearest key chunk at or before `idx`, scanning backwards. Falls back
    /// to 0 when no key chunk precedes it.
    pub fn key_at_or_before(&self, idx: usize) -> usize {
        if self.chunks.is_empty() {
            return 0;
        }
        let idx = idx.min(self.chunks.len() - 1);
        (0..=idx)
            .rev()
            .find(|&i| self.chunks[i].kind == ChunkKind::Key)
            .unwrap_or(0)
    }
}

impl From<Vec<EncodedChunk>> for ChunkIndex {
    fn from(chunks: Vec<EncodedChunk>) -> Self {
        Self::new(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(kind: ChunkKind, timestamp_us: i64) -> EncodedChunk {
        EncodedChunk {
            kind,
            timestamp_us,
            duration_us: 10,
            data: Vec::<u8>::new().into(),
        }
    }

    fn index() -> ChunkIndex {
        ChunkIndex::new(vec![
            chunk(ChunkKind::Key, 0),
            chunk(ChunkKind::Delta, 10),
            chunk(ChunkKind::Delta, 20),
            chunk(ChunkKind::Key, 30),
            chunk(ChunkKind::Delta, 40),
        ])
    }

    #[test]
    fn nearest_timestamp_prefers_first_on_ties() {
        let index = index();

        assert_eq!(index.nearest_by_timestamp(14), Some(1));
        assert_eq!(index.nearest_by_timestamp(15), Some(1));
        assert_eq!(index.nearest_by_timestamp(16), Some(2));
        assert_eq!(index.nearest_by_timestamp(-100), Some(0));
        assert_eq!(index.nearest_by_timestamp(1_000), Some(4));
        assert_eq!(ChunkIndex::default().nearest_by_timestamp(0), None);
    }

    #[test]
    fn key_lookup_scans_backwards() {
        let index = index();

        assert_eq!(index.key_at_or_before(0), 0);
        assert_eq!(index.key_at_or_before(2), 0);
        assert_eq!(index.key_at_or_before(3), 3);
        assert_eq!(index.key_at_or_before(4), 3);
        assert_eq!(index.key_at_or_before(99), 3);
    }

    #[test]
    fn slice_is_clamped() {
        let index = index();

        assert_eq!(index.slice(3, 5).len(), 2);
        assert_eq!(index.slice(3, 50).len(), 2);
        assert!(index.slice(6, 2).is_empty());
    }
}
