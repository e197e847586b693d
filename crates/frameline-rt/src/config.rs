use serde::{Deserialize, Serialize};

/// Runtime knobs for the pacer, usually sourced from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacingOptions {
    /// Minimum spacing between frame ends in ns; 0 leaves the framerate
    /// uncapped.
    pub target_frame_time: u64,
    /// Measure but never sleep, for A/B latency comparisons.
    pub placebo: bool,
    /// Address of an engine tick function to interpose on, when the host
    /// cannot call the producer entry point itself.
    pub engine_tick_hook: Option<usize>,
}

impl PacingOptions {
    /// Read `LFX_MAX_FPS`, `LFX_PLACEBO` and `LFX_UE4_HOOK`.
    pub fn from_env() -> Self {
        let target_frame_time = std::env::var("LFX_MAX_FPS")
            .ok()
            .and_then(|fps| fps.trim().parse::<u64>().ok())
            .filter(|fps| *fps > 0)
            .map(|fps| 1_000_000_000 / fps)
            .unwrap_or(0);
        let placebo = std::env::var_os("LFX_PLACEBO").is_some();
        let engine_tick_hook = std::env::var("LFX_UE4_HOOK")
            .ok()
            .and_then(|addr| parse_hex_address(&addr));
        Self {
            target_frame_time,
            placebo,
            engine_tick_hook,
        }
    }

    pub fn with_max_fps(mut self, fps: u64) -> Self {
        self.target_frame_time = if fps > 0 { 1_000_000_000 / fps } else { 0 };
        self
    }

    pub fn with_placebo(mut self, placebo: bool) -> Self {
        self.placebo = placebo;
        self
    }
}

fn parse_hex_address(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    usize::from_str_radix(digits, 16).ok().filter(|addr| *addr != 0)
}
