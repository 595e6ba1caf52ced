//! Engine configuration.
//!
//! All tunables live in [`EngineConfig`], passed explicitly to the parts
//! that need them. There is no global or ambient configuration; an embedding
//! host that runs several engines gives each its own config.

/// Tunables for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra milliseconds added to the playback offset when it is first
    /// initialized from a timed poke.
    ///
    /// Buffering the first poke slightly lets a burst of closely-timed
    /// pokes play back at the server's intended cadence instead of all
    /// landing on the first tick.
    pub playback_initial_buffer_ms: f64,

    /// Maximum tolerated lateness (milliseconds) before the playback offset
    /// is re-derived from the current tick.
    ///
    /// After a tab pause or long GC stall, every buffered poke would be
    /// "late" forever under the old offset; once a poke is this far behind
    /// schedule the offset resets so playback resumes at normal pacing.
    pub playback_max_drift_ms: f64,

    /// Emit a `missed / total` playback debug report every this many timed
    /// frames. Zero disables the report.
    pub playback_report_interval: u64,

    /// Maximum number of buffered pokes before the scheduler treats growth
    /// as a protocol error, drops the buffer, and signals out-of-order.
    pub max_buffered_pokes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playback_initial_buffer_ms: 250.0,
            playback_max_drift_ms: 1_000.0,
            playback_report_interval: 100,
            max_buffered_pokes: 4_096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.playback_initial_buffer_ms, 250.0);
        assert_eq!(cfg.playback_max_drift_ms, 1_000.0);
        assert_eq!(cfg.playback_report_interval, 100);
        assert_eq!(cfg.max_buffered_pokes, 4_096);
    }
}
