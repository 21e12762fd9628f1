use archivemux_frame::{FrameConfig, DEFAULT_MAX_RECORD_SIZE};

/// Configuration for the multiplexer and demultiplexer.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Maximum record size in bytes. Default: 16 MiB.
    pub max_record_size: usize,
    /// Cap on simultaneously open namespaces. Default: unbounded.
    pub max_open_namespaces: Option<usize>,
}

impl MuxConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_record_size: self.max_record_size,
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            max_open_namespaces: None,
        }
    }
}
