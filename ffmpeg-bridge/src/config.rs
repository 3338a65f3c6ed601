use std::sync::LazyLock;

/// Default size of the buffer handed to FFmpeg for custom I/O.
pub const IO_BUFFER_SIZE: usize = 32768;

const IO_BUFFER_SIZE_ENV: &str = "FFMPEG_BRIDGE_IO_BUFFER_SIZE";
const LOG_LEVEL_ENV: &str = "FFMPEG_BRIDGE_LOG_LEVEL";

pub struct BridgeConfig {
    io_buffer_size: usize,
    ffmpeg_log_level: ffmpeg_next::util::log::Level,
}

impl BridgeConfig {
    pub fn new(io_buffer_size: usize, ffmpeg_log_level: ffmpeg_next::util::log::Level) -> Self {
        Self {
            io_buffer_size,
            ffmpeg_log_level,
        }
    }

    fn from_env() -> Self {
        let io_buffer_size = std::env::var(IO_BUFFER_SIZE_ENV)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(IO_BUFFER_SIZE);
        let ffmpeg_log_level = std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|v| parse_log_level(&v))
            .unwrap_or(ffmpeg_next::util::log::Level::Error);
        Self::new(io_buffer_size, ffmpeg_log_level)
    }

    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }

    pub fn ffmpeg_log_level(&self) -> ffmpeg_next::util::log::Level {
        self.ffmpeg_log_level
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(IO_BUFFER_SIZE, ffmpeg_next::util::log::Level::Error)
    }
}

fn parse_log_level(value: &str) -> Option<ffmpeg_next::util::log::Level> {
    use ffmpeg_next::util::log::Level;
    let level = match value.trim().to_ascii_lowercase().as_str() {
        "quiet" => Level::Quiet,
        "panic" => Level::Panic,
        "fatal" => Level::Fatal,
        "error" => Level::Error,
        "warning" | "warn" => Level::Warning,
        "info" => Level::Info,
        "verbose" => Level::Verbose,
        "debug" => Level::Debug,
        "trace" => Level::Trace,
        _ => return None,
    };
    Some(level)
}

pub fn config() -> &'static BridgeConfig {
    static CONFIG: LazyLock<BridgeConfig> = LazyLock::new(BridgeConfig::from_env);
    &CONFIG
}
