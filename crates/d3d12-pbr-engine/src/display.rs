use crate::shader_constants::DisplayConstants;

pub const SDR_PAPER_WHITE_NITS: f32 = 80.0;
pub const HDR_PAPER_WHITE_NITS: f32 = 200.0;

/// Identifies the monitor a window currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub isize);

/// Luminance capabilities of the output the swap chain presents to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    pub hdr_enabled: bool,
    pub max_luminance: f32,
    pub min_luminance: f32,
    pub max_full_frame_luminance: f32,
    pub bits_per_color: u32,
}

impl DisplayInfo {
    pub fn sdr() -> Self {
        Self {
            hdr_enabled: false,
            max_luminance: SDR_PAPER_WHITE_NITS,
            min_luminance: 0.0,
            max_full_frame_luminance: SDR_PAPER_WHITE_NITS,
            bits_per_color: 8,
        }
    }

    pub fn paper_white_nits(&self) -> f32 {
        if self.hdr_enabled {
            HDR_PAPER_WHITE_NITS
        } else {
            SDR_PAPER_WHITE_NITS
        }
    }

    pub fn constants(&self) -> DisplayConstants {
        DisplayConstants {
            max_luminance: self.max_luminance,
            min_luminance: self.min_luminance,
            paper_white_nits: self.paper_white_nits(),
            max_full_frame_luminance: self.max_full_frame_luminance,
        }
    }
}

impl Default for DisplayInfo {
    fn default() -> Self {
        Self::sdr()
    }
}

/// Notifications the windowing layer forwards to the renderer.
///
/// The window keeps a non-owning reference to whoever implements this.
pub trait WindowEventListener {
    fn on_window_moved(&mut self);
    fn on_display_changed(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paper_white_follows_hdr() {
        let mut info = DisplayInfo::sdr();
        assert_eq!(info.constants().paper_white_nits, 80.0);
        info.hdr_enabled = true;
        info.max_luminance = 1000.0;
        let constants = info.constants();
        assert_eq!(constants.paper_white_nits, 200.0);
        assert_eq!(constants.max_luminance, 1000.0);
    }

    #[test]
    fn sdr_defaults() {
        let constants = DisplayInfo::default().constants();
        assert_eq!(constants.max_luminance, 80.0);
        assert_eq!(constants.min_luminance, 0.0);
        assert_eq!(constants.max_full_frame_luminance, 80.0);
    }
}
