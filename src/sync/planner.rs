use uuid::Uuid;

use super::model::{Chunk, ChunkStatus};

pub const DEFAULT_CHUNK_SIZE: i64 = 5000;

/// Boundaries of one planned chunk. `end_offset` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    pub index: i32,
    pub start_offset: i64,
    pub end_offset: i64,
    pub profiles_count: i64,
}

impl ChunkBounds {
    /// Materializes the bounds as a fresh pending chunk owned by `job_id`.
    pub fn into_chunk(self, job_id: Uuid) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            job_id,
            index: self.index,
            status: ChunkStatus::Pending,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            profiles_count: self.profiles_count,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            artifact_url: None,
            destination_import_id: None,
            resolved_destination_list_id: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// Splits `[0, total_profiles)` into chunks of at most `chunk_size` records.
///
/// Always yields at least one chunk. With no known profiles the single chunk
/// spans `[0, chunk_size)` and reports zero planned profiles; it gets sized
/// when the source is actually read.
pub fn plan_chunks(total_profiles: i64, chunk_size: i64) -> Vec<ChunkBounds> {
    let chunk_size = chunk_size.max(1);
    let total = total_profiles.max(0);

    if total == 0 {
        return vec![ChunkBounds {
            index: 0,
            start_offset: 0,
            end_offset: chunk_size,
            profiles_count: 0,
        }];
    }

    let count = (total + chunk_size - 1) / chunk_size;
    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let size = chunk_size.min(total - start);
            ChunkBounds {
                index: i as i32,
                start_offset: start,
                end_offset: start + size,
                profiles_count: size,
            }
        })
        .collect()
}

/// The chunk that follows `last` in an open-ended plan.
pub fn next_open_chunk(last: &Chunk, chunk_size: i64) -> ChunkBounds {
    let start = last.start_offset + last.profiles_count;
    ChunkBounds {
        index: last.index + 1,
        start_offset: start,
        end_offset: start + chunk_size.max(1),
        profiles_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(total: i64, size: i64) {
        let plan = plan_chunks(total, size);
        assert!(!plan.is_empty());

        let mut expected_start = 0;
        for (i, bounds) in plan.iter().enumerate() {
            assert_eq!(bounds.index, i as i32);
            assert_eq!(bounds.start_offset, expected_start);
            expected_start = bounds.end_offset;
        }
        if total > 0 {
            assert_eq!(expected_start, total);
            assert_eq!(plan.iter().map(|b| b.profiles_count).sum::<i64>(), total);
            assert_eq!(plan.len() as i64, (total + size - 1) / size);
        }
    }

    #[test]
    fn test_twelve_thousand_in_fives() {
        let plan = plan_chunks(12_000, 5_000);
        let counts: Vec<i64> = plan.iter().map(|b| b.profiles_count).collect();
        assert_eq!(counts, vec![5_000, 5_000, 2_000]);
        assert_eq!(plan[2].start_offset, 10_000);
        assert_eq!(plan[2].end_offset, 12_000);
    }

    #[test]
    fn test_ranges_partition_the_collection() {
        for total in [1, 2, 4_999, 5_000, 5_001, 10_000, 12_345, 100_000] {
            for size in [1, 7, 1_000, 5_000, 250_000] {
                assert_partition(total, size);
            }
        }
    }

    #[test]
    fn test_zero_profiles_still_gets_one_chunk() {
        let plan = plan_chunks(0, DEFAULT_CHUNK_SIZE);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].profiles_count, 0);
        assert_eq!(plan[0].end_offset, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_plan_is_idempotent() {
        assert_eq!(plan_chunks(9_999, 1_000), plan_chunks(9_999, 1_000));
    }

    #[test]
    fn test_next_open_chunk_starts_after_fetched_records() {
        let mut last = plan_chunks(0, 100)[0].into_chunk(Uuid::new_v4());
        last.profiles_count = 100;
        let next = next_open_chunk(&last, 100);
        assert_eq!(next.index, 1);
        assert_eq!(next.start_offset, 100);
        assert_eq!(next.end_offset, 200);
    }
}
