//! CAN bus configuration

use core::ops::RangeInclusive;
use fugit::HertzU32;

/// 1 Mbit/s
pub const BITRATE_1M: HertzU32 = HertzU32::from_raw(1_000_000);
/// 500 kbit/s
pub const BITRATE_500K: HertzU32 = HertzU32::from_raw(500_000);
/// 250 kbit/s
pub const BITRATE_250K: HertzU32 = HertzU32::from_raw(250_000);
/// 125 kbit/s
pub const BITRATE_125K: HertzU32 = HertzU32::from_raw(125_000);
/// 50 kbit/s
pub const BITRATE_50K: HertzU32 = HertzU32::from_raw(50_000);
/// 10 kbit/s
pub const BITRATE_10K: HertzU32 = HertzU32::from_raw(10_000);

/// Configuration for the CAN bus
///
/// Applied as a whole by [`crate::bus::Can::init`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CanConfig {
    /// Time triggered communication mode
    pub time_triggered: bool,
    /// Automatic bus-off recovery
    pub auto_bus_off: bool,
    /// Automatic wakeup on bus activity
    pub auto_wakeup: bool,
    /// Disable automatic retransmission
    pub no_retransmit: bool,
    /// Receive FIFOs drop new frames when full
    pub rx_fifo_locked: bool,
    /// Mailboxes are sent in request order
    pub tx_priority_by_request: bool,
    /// Modes of testing
    pub loopback: bool,
    /// Do not drive the bus
    pub silent: bool,
    /// Stop the controller while the core is halted by a debugger
    pub debug_freeze: bool,
    /// Bit timing parameters
    pub timing: BitTiming,
}

impl CanConfig {
    /// Create an instance with every mode switched off, except
    /// [`Self::debug_freeze`] which keeps its reset value
    pub fn new(timing: BitTiming) -> Self {
        Self {
            time_triggered: false,
            auto_bus_off: false,
            auto_wakeup: false,
            no_retransmit: false,
            rx_fifo_locked: false,
            tx_priority_by_request: false,
            loopback: false,
            silent: false,
            debug_freeze: true,
            timing,
        }
    }
}

/// Bit-timing parameters
///
/// A bit is made of one synchronization quantum, `ts1` quanta before the
/// sample point and `ts2` quanta after it. One quantum lasts `prescaler`
/// cycles of the peripheral clock.
///
/// This struct expects *real* values, the subtraction expected by the
/// hardware register is handled by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Clock cycles per time quantum
    pub prescaler: u16,
    /// Time segment before the sample point
    pub ts1: u8,
    /// Time segment after the sample point
    pub ts2: u8,
    /// Resynchronization jump width
    pub sjw: u8,
}

/// Position of the sample point within a bit, in 1/256 of the bit time
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SamplePoint(pub u16);

impl SamplePoint {
    /// 75 %
    pub const PERCENT_75: Self = Self(192);
    /// 66 %
    pub const PERCENT_66: Self = Self(170);
    /// 50 %
    pub const PERCENT_50: Self = Self(128);
}

/// Misconfigurations of [`BitTiming`].
#[derive(Debug, Clone, PartialEq)]
pub enum BitTimingError {
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// Time segment 1 is outside the wrapped `RangeInclusive`
    TimeSegment1OutOfRange(RangeInclusive<u32>),
    /// Time segment 2 is outside the wrapped `RangeInclusive`
    TimeSegment2OutOfRange(RangeInclusive<u32>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// SJW is longer than time segment 2
    JumpWidthExceedsSegment2,
    /// No segment split divides the clock into whole quanta
    ///
    /// The following requirement must be met:
    /// - `clock / bitrate` must be divisible by a bit time between 3 and 20
    ///   quanta reachable from the sample point
    NoSolution {
        /// Provided peripheral clock
        clock: HertzU32,
        /// Requested bitrate
        bitrate: HertzU32,
    },
}

/// Valid values of a BitTiming struct
struct BitTimingRanges {
    prescaler: RangeInclusive<u32>,
    ts1: RangeInclusive<u32>,
    ts2: RangeInclusive<u32>,
    sjw: RangeInclusive<u32>,
}

const BIT_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    prescaler: 1..=512,
    ts1: 1..=16,
    ts2: 1..=8,
    sjw: 1..=4,
};

const INITIAL_TS1: u32 = 14;
const INITIAL_TS2: u32 = 5;

impl BitTiming {
    /// The bit time, in time quanta
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.ts1) + u32::from(self.ts2)
    }

    /// Checks that every field fits its register field
    pub fn check(&self) -> Result<(), BitTimingError> {
        let ranges = &BIT_TIMING_RANGES;
        if !ranges.prescaler.contains(&self.prescaler.into()) {
            return Err(BitTimingError::PrescalerOutOfRange(ranges.prescaler.clone()));
        }
        if !ranges.ts1.contains(&self.ts1.into()) {
            return Err(BitTimingError::TimeSegment1OutOfRange(ranges.ts1.clone()));
        }
        if !ranges.ts2.contains(&self.ts2.into()) {
            return Err(BitTimingError::TimeSegment2OutOfRange(ranges.ts2.clone()));
        }
        if !ranges.sjw.contains(&self.sjw.into()) {
            return Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                ranges.sjw.clone(),
            ));
        }
        if self.sjw > self.ts2 {
            return Err(BitTimingError::JumpWidthExceedsSegment2);
        }
        Ok(())
    }

    /// Derives a bit timing for `bitrate` from the peripheral `clock`
    ///
    /// Starting from 14 + 5 quanta around the sample point, one quantum at a
    /// time is removed from the segment that puts the sample point further
    /// away from `sample_point`, until the bit time divides `clock / bitrate`.
    /// SJW is set to `ts2`, limited to 4.
    ///
    /// ```
    /// # use bxcan_pal::config::{BitTiming, SamplePoint};
    /// # use bxcan_pal::core::fugit::HertzU32;
    /// let timing =
    ///     BitTiming::synthesize(HertzU32::MHz(42), HertzU32::kHz(500), SamplePoint::PERCENT_75)
    ///         .unwrap();
    /// assert_eq!((timing.prescaler, timing.ts1, timing.ts2, timing.sjw), (6, 10, 3, 3));
    /// ```
    pub fn synthesize(
        clock: HertzU32,
        bitrate: HertzU32,
        sample_point: SamplePoint,
    ) -> Result<Self, BitTimingError> {
        let no_solution = BitTimingError::NoSolution { clock, bitrate };
        if bitrate.raw() == 0 {
            return Err(no_solution);
        }
        let quanta = clock.raw() / bitrate.raw();
        let sample = u32::from(sample_point.0);

        let mut ts1 = INITIAL_TS1;
        let mut ts2 = INITIAL_TS2;
        while quanta % (1 + ts1 + ts2) != 0 {
            let per_bit = 1 + ts1 + ts2;
            if per_bit * sample > (ts1 + 1) * 256 {
                ts2 -= 1;
            } else {
                ts1 -= 1;
            }
            if ts1 == 0 || ts2 == 0 {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "bxcan: no bit timing for {=u32} Hz at {=u32} Hz clock",
                    bitrate.raw(),
                    clock.raw()
                );
                return Err(no_solution);
            }
        }

        let prescaler = quanta / (1 + ts1 + ts2);
        if !BIT_TIMING_RANGES.prescaler.contains(&prescaler) {
            return Err(BitTimingError::PrescalerOutOfRange(
                BIT_TIMING_RANGES.prescaler.clone(),
            ));
        }

        // The loop bounds ts1 to 1..=14 and ts2 to 1..=5, so the casts are
        // lossless
        Ok(Self {
            prescaler: prescaler as u16,
            ts1: ts1 as u8,
            ts2: ts2 as u8,
            sjw: ts2.min(4) as u8,
        })
    }

    /// Bitrate resulting from this timing at the peripheral `clock`
    ///
    /// Zero if the prescaler is zero.
    pub fn frequency(&self, clock: HertzU32) -> HertzU32 {
        let divisor = u32::from(self.prescaler) * self.time_quanta_per_bit();
        HertzU32::from_raw(clock.raw().checked_div(divisor).unwrap_or(0))
    }

    /// Sample point resulting from this timing
    pub fn sample_point(&self) -> SamplePoint {
        let sample = (1 + u32::from(self.ts1)) * 256 / self.time_quanta_per_bit();
        SamplePoint(sample as u16)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synthesize_42mhz_500k() {
        let timing = BitTiming::synthesize(
            HertzU32::MHz(42),
            BITRATE_500K,
            SamplePoint::PERCENT_75,
        )
        .unwrap();
        assert_eq!(
            timing,
            BitTiming {
                prescaler: 6,
                ts1: 10,
                ts2: 3,
                sjw: 3,
            }
        );
        assert_eq!(timing.time_quanta_per_bit(), 14);
        assert_eq!(timing.frequency(HertzU32::MHz(42)), BITRATE_500K);
        assert_eq!(timing.check(), Ok(()));
    }

    #[test]
    fn synthesize_keeps_initial_split_when_it_fits() {
        // 40 MHz / 1 Mbit/s is 40 quanta, divisible by 20
        let timing =
            BitTiming::synthesize(HertzU32::MHz(40), BITRATE_1M, SamplePoint::PERCENT_75)
                .unwrap();
        assert_eq!((timing.prescaler, timing.ts1, timing.ts2), (2, 14, 5));
        assert_eq!(timing.sjw, 4);
        assert_eq!(timing.frequency(HertzU32::MHz(40)), BITRATE_1M);
    }

    #[test]
    fn synthesize_fails_on_prime_quanta() {
        assert_eq!(
            BitTiming::synthesize(HertzU32::MHz(23), BITRATE_1M, SamplePoint::PERCENT_75),
            Err(BitTimingError::NoSolution {
                clock: HertzU32::MHz(23),
                bitrate: BITRATE_1M,
            })
        );
    }

    #[test]
    fn synthesize_rejects_zero_bitrate() {
        assert!(matches!(
            BitTiming::synthesize(
                HertzU32::MHz(42),
                HertzU32::from_raw(0),
                SamplePoint::PERCENT_50
            ),
            Err(BitTimingError::NoSolution { .. })
        ));
    }

    #[test]
    fn synthesize_rejects_large_prescaler() {
        // 200 MHz / 10 kbit/s is 20000 quanta, 1000 per 20-quanta bit
        assert!(matches!(
            BitTiming::synthesize(HertzU32::MHz(200), BITRATE_10K, SamplePoint::PERCENT_75),
            Err(BitTimingError::PrescalerOutOfRange(_))
        ));
    }

    #[test]
    fn check_ranges() {
        let valid = BitTiming {
            prescaler: 1,
            ts1: 16,
            ts2: 8,
            sjw: 4,
        };
        assert_eq!(valid.check(), Ok(()));
        assert!(matches!(
            BitTiming { prescaler: 0, ..valid }.check(),
            Err(BitTimingError::PrescalerOutOfRange(_))
        ));
        assert!(matches!(
            BitTiming { prescaler: 513, ..valid }.check(),
            Err(BitTimingError::PrescalerOutOfRange(_))
        ));
        assert!(matches!(
            BitTiming { ts1: 17, ..valid }.check(),
            Err(BitTimingError::TimeSegment1OutOfRange(_))
        ));
        assert!(matches!(
            BitTiming { ts2: 0, ..valid }.check(),
            Err(BitTimingError::TimeSegment2OutOfRange(_))
        ));
        assert!(matches!(
            BitTiming { sjw: 5, ..valid }.check(),
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(_))
        ));
        assert_eq!(
            BitTiming { ts2: 3, ..valid }.check(),
            Err(BitTimingError::JumpWidthExceedsSegment2)
        );
    }

    #[test]
    fn frequency_of_zero_prescaler_is_zero() {
        let timing = BitTiming {
            prescaler: 0,
            ts1: 10,
            ts2: 3,
            sjw: 3,
        };
        assert_eq!(timing.frequency(HertzU32::MHz(42)).raw(), 0);
    }

    #[test]
    fn sample_point_of_timing() {
        let timing = BitTiming {
            prescaler: 6,
            ts1: 10,
            ts2: 3,
            sjw: 3,
        };
        assert_eq!(timing.sample_point(), SamplePoint(201));
    }
}
