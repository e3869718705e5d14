//! Per-band unison-phrase accounting.
//!
//! A phrase is identified by `(band, phrase-time bucket)`, where the bucket
//! is the phrase time rounded to the nearest 0.1 s so that clients reporting
//! slightly different chart times land on the same phrase. The bonus is
//! awarded exactly once per phrase, when the completion set reaches the
//! band's expected player count.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::types::PlayerId;

/// `(band, phrase bucket)`.
type PhraseKey = (u8, i64);

#[derive(Default)]
struct UnisonInner {
    completions: HashMap<PhraseKey, HashSet<PlayerId>>,
    awarded: HashSet<PhraseKey>,
    expected: HashMap<u8, usize>,
}

pub struct UnisonCoordinator {
    inner: Mutex<UnisonInner>,
    default_expected: usize,
}

impl UnisonCoordinator {
    pub fn new(default_expected: usize) -> Self {
        Self {
            inner: Mutex::new(UnisonInner::default()),
            default_expected: default_expected.max(1),
        }
    }

    /// Set a band's expected player count for the upcoming song. Band 0
    /// falls back to the constructor default when unset.
    pub fn set_expected_players(&self, band_id: u8, count: usize) {
        self.lock().expected.insert(band_id, count.max(1));
    }

    /// Record one player's phrase completion.
    ///
    /// Returns `true` exactly when this hit completes the phrase for the
    /// whole band; every later hit on an awarded phrase returns `false`.
    pub fn record_phrase_hit(
        &self,
        player_id: PlayerId,
        band_id: u8,
        phrase_time: f64,
        phrase_end_time: f64,
    ) -> bool {
        if !phrase_time.is_finite() || phrase_end_time < phrase_time {
            return false;
        }
        let key = (band_id, phrase_bucket(phrase_time));

        let mut inner = self.lock();
        if inner.awarded.contains(&key) {
            return false;
        }
        let expected = inner
            .expected
            .get(&band_id)
            .copied()
            .unwrap_or(self.default_expected);
        let completions = inner.completions.entry(key).or_default();
        completions.insert(player_id);
        if completions.len() >= expected {
            inner.awarded.insert(key);
            inner.completions.remove(&key);
            return true;
        }
        false
    }

    pub fn awarded_count(&self) -> usize {
        self.lock().awarded.len()
    }

    /// Clear phrase accounting for the next song, keeping the per-band
    /// expected counts.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.completions.clear();
        inner.awarded.clear();
    }

    /// Lobby teardown: clear everything including expected counts.
    pub fn full_reset(&self) {
        let mut inner = self.lock();
        inner.completions.clear();
        inner.awarded.clear();
        inner.expected.clear();
    }

    fn lock(&self) -> MutexGuard<'_, UnisonInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Normalize a phrase time to its 0.1 s bucket.
fn phrase_bucket(phrase_time: f64) -> i64 {
    (phrase_time / 0.1).round() as i64
}
