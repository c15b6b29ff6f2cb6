use std::env;

pub const DEFAULT_INTERMEDIATE_ALIGNMENT: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Every intermediate tensor's offset within the intermediate region is a
    /// multiple of this many bytes, and its size is rounded up to match. The
    /// region itself starts right after the workspace, unaligned.
    pub intermediate_alignment: u64,
    /// When disabled, every intermediate tensor gets its own bytes.
    pub reuse_intermediates: bool,
    /// Zero the host tiling buffer before runners fill it.
    pub zero_host_tiling: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            intermediate_alignment: DEFAULT_INTERMEDIATE_ALIGNMENT,
            reuse_intermediates: true,
            zero_host_tiling: true,
        }
    }
}

impl RunnerSettings {
    /// Defaults, overridden by `OPGRAPH_INTERMEDIATE_ALIGNMENT` and
    /// `OPGRAPH_REUSE_INTERMEDIATES` where those are set and parse.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(align) = env::var("OPGRAPH_INTERMEDIATE_ALIGNMENT").ok().and_then(|x| x.parse::<u64>().ok()) {
            if align.is_power_of_two() {
                settings.intermediate_alignment = align;
            } else {
                log::warn!("Ignoring OPGRAPH_INTERMEDIATE_ALIGNMENT={align}, not a power of two");
            }
        }

        if let Ok(reuse) = env::var("OPGRAPH_REUSE_INTERMEDIATES") {
            settings.reuse_intermediates = !matches!(reuse.as_str(), "0" | "false" | "off");
        }

        settings
    }

    pub fn with_alignment(mut self, align: u64) -> Self {
        self.intermediate_alignment = align.max(1);
        self
    }

    pub fn without_reuse(mut self) -> Self {
        self.reuse_intermediates = false;
        self
    }
}
