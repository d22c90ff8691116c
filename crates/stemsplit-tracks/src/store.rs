//! The track store seam and the blind-index retry.

use std::future::Future;

use async_trait::async_trait;
use stemsplit_models::Track;

use crate::error::{TrackResult, TrackStoreError};

/// Upper bound on the `tracks` array inside one track list row, and therefore
/// on the blind-index scan.
pub const MAX_TRACK_INDEX: usize = 10;

/// A pure transform applied to a track during a read-modify-write.
pub type TrackUpdater = Box<dyn FnOnce(Track) -> TrackResult<Track> + Send>;

/// Persistence seam for tracks nested inside track list rows.
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn get_track(&self, track_list_id: &str, track_id: &str) -> TrackResult<Track>;

    async fn set_track(&self, track_list_id: &str, track_id: &str, track: Track)
        -> TrackResult<()>;

    /// Read-modify-write. No compare-and-swap token is carried from the read
    /// to the write; concurrent writers to the same track can clobber each
    /// other. Callers needing strict serialization must coordinate externally.
    async fn update_track(
        &self,
        track_list_id: &str,
        track_id: &str,
        updater: TrackUpdater,
    ) -> TrackResult<()> {
        let track = self.get_track(track_list_id, track_id).await?;
        let updated = updater(track)?;
        self.set_track(track_list_id, track_id, updated).await
    }
}

/// Attempt a conditional write at each index in `[0, max_index)` until one
/// succeeds. Returns the index that matched, or a distinct exhaustion error
/// wrapping the final attempt's failure.
pub(crate) async fn blind_index_update<F, Fut>(
    max_index: usize,
    mut attempt: F,
) -> Result<usize, TrackStoreError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<(), TrackStoreError>>,
{
    let mut last_error = None;

    for index in 0..max_index {
        match attempt(index).await {
            Ok(()) => return Ok(index),
            Err(e) => last_error = Some(e),
        }
    }

    Err(TrackStoreError::IndexExhausted {
        attempts: max_index,
        last: Box::new(
            last_error.unwrap_or_else(|| TrackStoreError::TrackNotFound("no attempts".into())),
        ),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use stemsplit_models::{SplitStemTrack, SplitTrackStatus, TrackType};

    use super::*;

    #[tokio::test]
    async fn update_succeeds_within_index_plus_one_attempts() {
        for target_index in 0..MAX_TRACK_INDEX {
            let attempts = AtomicUsize::new(0);

            let matched = blind_index_update(MAX_TRACK_INDEX, |index| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if index == target_index {
                        Ok(())
                    } else {
                        Err(TrackStoreError::dynamo("conditional check failed"))
                    }
                }
            })
            .await
            .expect("update should succeed");

            assert_eq!(matched, target_index);
            assert_eq!(attempts.load(Ordering::SeqCst), target_index + 1);
        }
    }

    #[tokio::test]
    async fn absent_track_exhausts_all_indices() {
        let attempts = AtomicUsize::new(0);

        let err = blind_index_update(MAX_TRACK_INDEX, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TrackStoreError::dynamo("conditional check failed")) }
        })
        .await
        .expect_err("update should exhaust");

        assert_eq!(attempts.load(Ordering::SeqCst), MAX_TRACK_INDEX);
        assert!(err.is_index_exhausted());
        match err {
            TrackStoreError::IndexExhausted { attempts, last } => {
                assert_eq!(attempts, MAX_TRACK_INDEX);
                assert!(matches!(*last, TrackStoreError::Dynamo(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct SingleTrackStore {
        track: Mutex<Track>,
    }

    #[async_trait]
    impl TrackStore for SingleTrackStore {
        async fn get_track(&self, _: &str, _: &str) -> TrackResult<Track> {
            Ok(self.track.lock().unwrap().clone())
        }

        async fn set_track(&self, _: &str, _: &str, track: Track) -> TrackResult<()> {
            *self.track.lock().unwrap() = track;
            Ok(())
        }
    }

    #[tokio::test]
    async fn update_track_applies_transform_between_read_and_write() {
        let store = SingleTrackStore {
            track: Mutex::new(Track::from(SplitStemTrack::requested(
                TrackType::SplitTwoStems,
                "https://example.com/song",
            ))),
        };

        store
            .update_track(
                "tl-1",
                "t-1",
                Box::new(|track| {
                    let mut split = track.into_split_stem()?;
                    split.job_status = SplitTrackStatus::Processing;
                    split.job_progress = 10;
                    Ok(Track::from(split))
                }),
            )
            .await
            .expect("update");

        let track = store.get_track("tl-1", "t-1").await.unwrap();
        let split = track.as_split_stem().unwrap().clone();
        assert_eq!(split.job_status, SplitTrackStatus::Processing);
        assert_eq!(split.job_progress, 10);
    }
}
