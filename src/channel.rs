/// WiFi channel rotation cursor.
///
/// The rotation timer advances the cursor circularly through the 2.4 GHz
/// channel universe, skipping channels absent from the configured
/// bitmap, and tunes the radio to whatever comes up next.

/// Highest 2.4 GHz channel the rotation may visit (14 exists under the
/// Japanese plan only; other locales clamp it away).
pub const CHANNEL_MAX: u8 = 14;

/// Bitmap with every channel of the universe enabled (bit 0 = channel 1).
pub const CHANNEL_MAP_ALL: u16 = (1 << CHANNEL_MAX) - 1;

/// Position of the rotation within the channel universe.
///
/// A bitmap with no channel in 1..=14 set is treated as all channels
/// enabled, so [`advance`](Self::advance) always terminates. Once
/// advanced at least once, the current channel is a member of the
/// effective bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCursor {
    current: u8,
}

impl ChannelCursor {
    pub const fn new() -> Self {
        Self { current: 1 }
    }

    pub const fn current(&self) -> u8 {
        self.current
    }

    /// Advance to the next enabled channel in ascending circular order
    /// and return it.
    pub fn advance(&mut self, map: u16) -> u8 {
        let map = match map & CHANNEL_MAP_ALL {
            0 => CHANNEL_MAP_ALL,
            m => m,
        };
        loop {
            self.current = self.current % CHANNEL_MAX + 1;
            if map >> (self.current - 1) & 1 == 1 {
                return self.current;
            }
        }
    }
}

impl Default for ChannelCursor {
    fn default() -> Self {
        Self::new()
    }
}
