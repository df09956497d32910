//! Reproducible random streams, one per task index.

mod stream;

pub use stream::{
    check_stream_count, derive_streams, StreamManager, StreamState, MAX_STREAMS, SUBSTREAM_WORDS,
    SUBSTREAM_WORDS_LOG2,
};
