//! Per-index random streams carved out of one ChaCha20 key stream.
//!
//! `ChaCha20Rng::seed_from_u64(seed)` の出力列（周期 2^68 words）を 2^36 words
//! ずつの区間に分割し、index `i` のストリームは word offset `i << 36` から始める。
//! 区間は重ならないので、どのワーカーがどの順で実行しても値は同じになる。

use std::fmt;

use rand::distributions::Standard;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::domain::ConfigurationError;

/// log2 of the number of 32-bit words in one sub-stream.
pub const SUBSTREAM_WORDS_LOG2: u32 = 36;

/// Words available to a single task before it would run into the next index.
pub const SUBSTREAM_WORDS: u64 = 1 << SUBSTREAM_WORDS_LOG2;

/// ChaCha20 word position is 68 bits wide.
const WORD_POS_BITS: u32 = 68;

/// Number of disjoint sub-streams per seed.
pub const MAX_STREAMS: u64 = 1 << (WORD_POS_BITS - SUBSTREAM_WORDS_LOG2);

const WORD_POS_MASK: u128 = (1u128 << WORD_POS_BITS) - 1;

/// Generator state for one task index.
///
/// Implements `RngCore`, so task code can use the whole `rand::Rng` API
/// (`gen`, `gen_range`, `sample`, ...).
#[derive(Clone, PartialEq, Eq)]
pub struct StreamState {
    index: usize,
    start: u128,
    rng: ChaCha20Rng,
}

impl StreamState {
    fn at(seed: u64, index: usize) -> Self {
        let start = (index as u128) << SUBSTREAM_WORDS_LOG2;
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_word_pos(start);
        Self { index, start, rng }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 32-bit words drawn since the stream was created.
    pub fn words_consumed(&self) -> u64 {
        let consumed = self.rng.get_word_pos().wrapping_sub(self.start) & WORD_POS_MASK;
        // 2^68 未満なので u64 に収まらないのは異常な巻き戻りのみ
        u64::try_from(consumed).unwrap_or(u64::MAX)
    }

    /// True once the task has read past its own sub-stream.
    pub fn is_overrun(&self) -> bool {
        self.words_consumed() > SUBSTREAM_WORDS
    }

    /// First 64 bits ahead of the current position, without advancing.
    ///
    /// Handy for checking that two runs hand out the same stream for an index.
    pub fn fingerprint(&self) -> u64 {
        self.rng.clone().next_u64()
    }

    /// One draw from N(0, 1) via Box-Muller (two uniforms per call).
    pub fn next_standard_normal(&mut self) -> f64 {
        // u1 in (0, 1] so ln() stays finite
        let u1: f64 = 1.0 - self.sample::<f64, _>(Standard);
        let u2: f64 = self.sample(Standard);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    #[cfg(test)]
    pub(crate) fn skip_words(&mut self, words: u64) {
        let pos = self.rng.get_word_pos() + words as u128;
        self.rng.set_word_pos(pos & WORD_POS_MASK);
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("index", &self.index)
            .field("words_consumed", &self.words_consumed())
            .finish()
    }
}

impl RngCore for StreamState {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// Hands out streams for one master seed.
///
/// Pure function of `(seed, index)`: no global RNG, no interior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamManager {
    seed: u64,
}

impl StreamManager {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random access by index (jump-ahead, no need to derive the ones before it).
    pub fn stream(&self, index: usize) -> Result<StreamState, ConfigurationError> {
        if index as u64 >= MAX_STREAMS {
            return Err(ConfigurationError::TooManyStreams {
                requested: index as u64 + 1,
                max: MAX_STREAMS,
            });
        }
        Ok(StreamState::at(self.seed, index))
    }

    /// Streams for indices `0..n`.
    pub fn derive(&self, n: usize) -> Result<Vec<StreamState>, ConfigurationError> {
        check_stream_count(n)?;
        Ok((0..n).map(|i| StreamState::at(self.seed, i)).collect())
    }
}

/// Fail fast before allocating anything for an oversized run.
pub fn check_stream_count(n: usize) -> Result<(), ConfigurationError> {
    if n as u64 > MAX_STREAMS {
        return Err(ConfigurationError::TooManyStreams {
            requested: n as u64,
            max: MAX_STREAMS,
        });
    }
    Ok(())
}

/// `n` independent streams for `seed`. Same inputs, same streams.
pub fn derive_streams(seed: u64, n: usize) -> Result<Vec<StreamState>, ConfigurationError> {
    StreamManager::new(seed).derive(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn draws(stream: &mut StreamState, k: usize) -> Vec<u64> {
        (0..k).map(|_| stream.next_u64()).collect()
    }

    #[test]
    fn derive_is_deterministic() {
        let a = derive_streams(42, 8).unwrap();
        let b = derive_streams(42, 8).unwrap();
        assert_eq!(a, b);

        let fa: Vec<u64> = a.iter().map(StreamState::fingerprint).collect();
        let fb: Vec<u64> = b.iter().map(StreamState::fingerprint).collect();
        assert_eq!(fa, fb);
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(64)]
    fn stream_for_index_does_not_depend_on_n(#[case] n: usize) {
        let small = derive_streams(9, n).unwrap();
        let large = derive_streams(9, n + 100).unwrap();
        for (a, b) in small.iter().zip(&large) {
            assert_eq!(a.fingerprint(), b.fingerprint());
        }
    }

    #[test]
    fn random_access_matches_bulk_derive() {
        let manager = StreamManager::new(5);
        let bulk = manager.derive(20).unwrap();
        let mut direct = manager.stream(13).unwrap();
        let mut from_bulk = bulk[13].clone();
        assert_eq!(draws(&mut direct, 16), draws(&mut from_bulk, 16));
    }

    #[test]
    fn neighbouring_streams_differ() {
        let streams = derive_streams(1, 4).unwrap();
        let prints: std::collections::HashSet<u64> =
            streams.iter().map(StreamState::fingerprint).collect();
        assert_eq!(prints.len(), 4);
    }

    #[test]
    fn different_seeds_differ() {
        let a = StreamManager::new(1).stream(0).unwrap();
        let b = StreamManager::new(2).stream(0).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_does_not_advance() {
        let s = StreamManager::new(3).stream(2).unwrap();
        let before = s.fingerprint();
        assert_eq!(s.words_consumed(), 0);
        assert_eq!(s.fingerprint(), before);
    }

    #[test]
    fn tracks_words_consumed() {
        let mut s = StreamManager::new(3).stream(1).unwrap();
        let _ = s.next_u32();
        let _ = s.next_u64();
        assert_eq!(s.words_consumed(), 3);
        assert!(!s.is_overrun());
    }

    #[test]
    fn end_of_substream_is_start_of_next() {
        let manager = StreamManager::new(11);
        let mut first = manager.stream(0).unwrap();
        first.skip_words(SUBSTREAM_WORDS);
        assert!(!first.is_overrun());

        let next = manager.stream(1).unwrap();
        assert_eq!(first.fingerprint(), next.fingerprint());

        let _ = first.next_u32();
        assert!(first.is_overrun());
    }

    #[test]
    fn last_stream_wraps_consumption_correctly() {
        let last = (MAX_STREAMS - 1) as usize;
        let mut s = StreamManager::new(1).stream(last).unwrap();
        s.skip_words(SUBSTREAM_WORDS - 2);
        let _ = s.next_u64();
        assert_eq!(s.words_consumed(), SUBSTREAM_WORDS);
        assert!(!s.is_overrun());
    }

    #[test]
    fn too_many_streams_is_rejected_before_allocation() {
        let err = check_stream_count((MAX_STREAMS + 1) as usize).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::TooManyStreams {
                requested: MAX_STREAMS + 1,
                max: MAX_STREAMS,
            }
        );
        assert!(StreamManager::new(1).stream(MAX_STREAMS as usize).is_err());
    }

    #[test]
    fn standard_normal_is_finite_and_reproducible() {
        let mut a = StreamManager::new(1).stream(4).unwrap();
        let mut b = StreamManager::new(1).stream(4).unwrap();
        for _ in 0..1000 {
            let x = a.next_standard_normal();
            assert!(x.is_finite());
            assert_eq!(x.to_bits(), b.next_standard_normal().to_bits());
        }
    }
}
