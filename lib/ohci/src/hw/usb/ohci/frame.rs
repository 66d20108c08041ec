// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Frame timing derived from HcFmInterval.

use std::time::Duration;

use super::bits::{FmInterval, FmRemaining};
use super::{MIN_FRAME_INTERVAL, USB_BIT_RATE};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Wall-clock length of a frame, as programmed through FrameInterval.
///
/// A change of FrameInterval only affects frames which begin after it, so
/// the countdown within the current frame is always taken relative to the
/// HcFmRemaining value loaded when that frame started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameTiming {
    /// Nominal frame duration used to arm the frame timer
    frame_time: Duration,
}

impl FrameTiming {
    pub fn from_interval(fm: FmInterval) -> Self {
        let interval = fm.frame_interval().max(MIN_FRAME_INTERVAL);
        let bit_times = u64::from(interval) + 1;
        let frame_time =
            Duration::from_nanos(bit_times * NANOS_PER_SEC / USB_BIT_RATE);
        Self { frame_time }
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Bit-times left in a frame which started `elapsed` ago with `loaded`
    /// bit-times remaining.
    pub fn remaining(loaded: u16, elapsed: Duration) -> u16 {
        let bits = elapsed.as_nanos() * u128::from(USB_BIT_RATE)
            / u128::from(NANOS_PER_SEC);
        u128::from(loaded).saturating_sub(bits) as u16
    }

    /// HcFmRemaining as it reads `elapsed` into a frame which began with
    /// `loaded`.
    pub fn fm_remaining(loaded: FmRemaining, elapsed: Duration) -> FmRemaining {
        loaded.with_frame_remaining(Self::remaining(
            loaded.frame_remaining(),
            elapsed,
        ))
    }

    /// HcFmRemaining as loaded at a frame boundary.
    pub fn reload(fm: FmInterval) -> FmRemaining {
        FmRemaining(0)
            .with_frame_remaining(fm.frame_interval())
            .with_frame_remaining_toggle(fm.frame_interval_toggle())
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::from_interval(super::bits::values::FM_INTERVAL)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use super::super::bits::values::FM_INTERVAL;

    #[test]
    fn default_frame_is_one_millisecond() {
        let timing = FrameTiming::default();
        assert_eq!(timing.frame_time(), Duration::from_millis(1));
    }

    #[test]
    fn remaining_counts_down() {
        assert_eq!(FrameTiming::remaining(0x2edf, Duration::ZERO), 0x2edf);
        // 500us is 6000 bit-times
        assert_eq!(
            FrameTiming::remaining(0x2edf, Duration::from_micros(500)),
            0x2edf - 6000
        );
        let late = Duration::from_millis(5);
        assert_eq!(FrameTiming::remaining(0x2edf, late), 0);

        let fm = FM_INTERVAL.with_frame_interval_toggle(true);
        let loaded = FrameTiming::reload(fm);
        let fr = FrameTiming::fm_remaining(loaded, Duration::from_micros(250));
        assert_eq!(fr.frame_remaining(), 0x2edf - 3000);
        assert!(fr.frame_remaining_toggle());
    }

    #[test]
    fn countdown_ignores_new_interval() {
        let elapsed = Duration::from_micros(250);
        let loaded = FrameTiming::reload(FM_INTERVAL);
        let before = FrameTiming::fm_remaining(loaded, elapsed);

        // The countdown depends only on what was loaded at the frame start
        let fm = FM_INTERVAL.with_frame_interval(0x1000);
        let timing = FrameTiming::from_interval(fm);
        assert!(timing.frame_time() < Duration::from_millis(1));
        let after = FrameTiming::fm_remaining(loaded, elapsed);
        assert_eq!(before, after);
        assert_eq!(after.frame_remaining(), 0x2edf - 3000);
    }

    #[test]
    fn degenerate_interval_clamped() {
        let timing = FrameTiming::from_interval(FmInterval(0));
        // 1001 bit-times
        assert_eq!(timing.frame_time(), Duration::from_nanos(83_416));
    }

    #[test]
    fn reload_copies_toggle() {
        let fm = FmInterval(0)
            .with_frame_interval(0x1234)
            .with_frame_interval_toggle(true);
        let fr = FrameTiming::reload(fm);
        assert_eq!(fr.frame_remaining(), 0x1234);
        assert!(fr.frame_remaining_toggle());
    }
}
