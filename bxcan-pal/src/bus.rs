//! Mode control and status of the CAN bus

use crate::config::{BitTiming, BitTimingError, CanConfig, SamplePoint};
use crate::message::Frame;
use crate::reg::{Btr, Esr, Mmio, Msr, RegisterAccess, Registers};
use crate::rx_fifo::Fifo;
use bxcan_pal_core::{CanId, Dependencies};
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use embedded_can::ErrorKind;
use fugit::HertzU32;

/// Number of MSR reads the blocking mode transitions spend waiting for the
/// controller to acknowledge
pub const INIT_ACK_POLLS: u32 = 0xFFFF;

/// Printable error counters
pub struct ErrorCounters(pub Esr);

impl From<Esr> for ErrorCounters {
    fn from(value: Esr) -> Self {
        Self(value)
    }
}

impl ErrorCounters {
    /// Receive error counter
    pub fn receive(&self) -> u8 {
        self.0.rec()
    }

    /// Transmit error counter
    pub fn transmit(&self) -> u8 {
        self.0.tec()
    }
}

impl Debug for ErrorCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let esr = &self.0;

        f.debug_struct("ErrorCounters")
            .field("rec", &esr.rec())
            .field("tec", &esr.tec())
            .finish()
    }
}

/// Printable error status flags
pub struct ProtocolStatus(pub Esr);

impl From<Esr> for ProtocolStatus {
    fn from(value: Esr) -> Self {
        Self(value)
    }
}

impl Debug for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let esr = &self.0;

        f.debug_struct("ProtocolStatus")
            .field("lec", &LastErrorCode::from(esr.lec()))
            .field("boff", &esr.boff())
            .field("epvf", &esr.epvf())
            .field("ewgf", &esr.ewgf())
            .finish()
    }
}

/// The controller did not acknowledge a mode request within
/// [`INIT_ACK_POLLS`] status reads
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

/// Errors that may occur during configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// Initialization mode was not acknowledged
    EnterInitTimeout,
    /// Leaving initialization mode was not acknowledged
    LeaveInitTimeout,
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

/// Index is out of bounds
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfBounds;

/// Error detected on the bus most recently
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastErrorCode {
    /// No error since the code was last cleared
    NoError,
    /// Bit stuffing rule violated
    Stuff,
    /// Fixed format part of a frame had the wrong format
    Form,
    /// Transmitted frame was not acknowledged
    Acknowledgement,
    /// Sent a recessive bit but monitored a dominant one
    BitRecessive,
    /// Sent a dominant bit but monitored a recessive one
    BitDominant,
    /// CRC mismatch
    Crc,
    /// Code was written by software
    SetBySoftware,
}

impl From<u8> for LastErrorCode {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            0 => Self::NoError,
            1 => Self::Stuff,
            2 => Self::Form,
            3 => Self::Acknowledgement,
            4 => Self::BitRecessive,
            5 => Self::BitDominant,
            6 => Self::Crc,
            _ => Self::SetBySoftware,
        }
    }
}

impl embedded_can::Error for LastErrorCode {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Stuff => ErrorKind::Stuff,
            Self::Form => ErrorKind::Form,
            Self::Acknowledgement => ErrorKind::Acknowledge,
            Self::BitRecessive | Self::BitDominant => ErrorKind::Bit,
            Self::Crc => ErrorKind::Crc,
            Self::NoError | Self::SetBySoftware => ErrorKind::Other,
        }
    }
}

/// Fault confinement state of the controller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorState {
    /// Both error counters are below the warning limit
    Active,
    /// An error counter reached 96
    Warning,
    /// An error counter exceeded 127
    Passive,
    /// The transmit error counter exceeded 255
    BusOff,
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read additional status information
    fn protocol_status(&self) -> ProtocolStatus;
}

/// Driver for one bxCAN controller
///
/// `A` is the register access capability. On hardware it is [`Mmio`], tests
/// substitute a simulated register file through [`Self::with_access`].
///
/// Mode toggles such as [`Self::set_auto_bus_off`] only take effect in
/// initialization mode. The driver does not check this; using them in normal
/// operation is a caller error with hardware defined results.
pub struct Can<Id, D, A = Mmio<Id>> {
    regs: Registers<A>,
    dependencies: D,
    _id: PhantomData<Id>,
}

impl<Id: CanId, D: Dependencies<Id>> Can<Id, D> {
    /// Create a driver for the memory mapped controller `Id`.
    ///
    /// The controller is not touched; use [`Self::init`] to bring it up.
    pub fn new(dependencies: D) -> Self {
        // Safety: `Dependencies` implies ownership of the register block pointed to by
        // `Id: CanId`, and it is moved into the driver.
        let access = unsafe { Mmio::new() };
        Self::with_access(dependencies, access)
    }
}

impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> Can<Id, D, A> {
    /// Create a driver reaching the registers through `access`.
    pub fn with_access(dependencies: D, access: A) -> Self {
        Self {
            regs: Registers::new(access),
            dependencies,
            _id: PhantomData,
        }
    }

    /// Gives back the dependencies. The controller is left as is.
    pub fn release(self) -> D {
        self.dependencies
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &Registers<A> {
        &self.regs
    }

    pub(crate) fn regs(&self) -> &Registers<A> {
        &self.regs
    }

    /// Pulse the peripheral reset line. All registers return to their
    /// power-on values, which leaves the controller in sleep mode.
    pub fn reset(&mut self) {
        self.dependencies.assert_reset();
        self.dependencies.release_reset();
        #[cfg(feature = "defmt")]
        defmt::debug!("bxcan: peripheral reset");
    }

    /// Request initialization mode without waiting for the acknowledge.
    ///
    /// Use [`Self::is_init_mode`] to find out when the request took effect.
    pub fn enter_init_mode(&mut self) {
        self.regs.mcr().modify(|_, w| w.set_inrq(true));
    }

    /// Request normal operation without waiting for the acknowledge.
    pub fn leave_init_mode(&mut self) {
        self.regs.mcr().modify(|_, w| w.set_inrq(false));
    }

    fn wait_for(&self, done: impl Fn(Msr) -> bool) -> Result<(), Timeout> {
        for _ in 0..INIT_ACK_POLLS {
            if done(self.regs.msr().read()) {
                return Ok(());
            }
        }
        Err(Timeout)
    }

    /// Request initialization mode and poll for the acknowledge.
    ///
    /// Configuration is safe to change once this returns `Ok`.
    pub fn enter_init_mode_blocking(&mut self) -> Result<(), Timeout> {
        self.enter_init_mode();
        let result = self.wait_for(|msr| msr.inak());
        if result.is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("bxcan: initialization mode not acknowledged");
        }
        result
    }

    /// Request normal operation and poll for the acknowledge.
    pub fn leave_init_mode_blocking(&mut self) -> Result<(), Timeout> {
        self.leave_init_mode();
        let result = self.wait_for(|msr| !msr.inak());
        if result.is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("bxcan: leaving initialization mode not acknowledged");
        }
        result
    }

    /// `true` once the controller acknowledged initialization mode
    pub fn is_init_mode(&self) -> bool {
        self.regs.msr().read().inak()
    }

    /// Request sleep mode. No acknowledge is awaited.
    pub fn enter_sleep_mode(&mut self) {
        self.regs.mcr().modify(|_, w| w.set_sleep(true));
    }

    /// Request to leave sleep mode. No acknowledge is awaited.
    pub fn leave_sleep_mode(&mut self) {
        self.regs.mcr().modify(|_, w| w.set_sleep(false));
    }

    /// `true` while the controller reports sleep mode
    pub fn is_sleep_mode(&self) -> bool {
        self.regs.msr().read().slak()
    }

    /// Time triggered communication: mailbox time stamps are captured and
    /// may be sent in the last two data bytes.
    pub fn set_time_triggered(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_ttcm(enable));
    }

    /// Leave bus-off automatically after 128 occurrences of 11 recessive bits.
    pub fn set_auto_bus_off(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_abom(enable));
    }

    /// Leave sleep mode automatically on bus activity.
    pub fn set_auto_wakeup(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_awum(enable));
    }

    /// Transmit every frame only once, regardless of the outcome.
    pub fn set_no_retransmit(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_nart(enable));
    }

    /// When a receive FIFO is full, drop new frames instead of overwriting
    /// the last one.
    pub fn set_rx_fifo_locked(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_rflm(enable));
    }

    /// Send pending mailboxes in request order instead of identifier
    /// priority.
    pub fn set_tx_priority_by_request(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_txfp(enable));
    }

    /// Silent mode: frames are received but nothing is driven onto the bus.
    pub fn set_debug_silent(&mut self, enable: bool) {
        self.regs.btr().modify(|_, w| w.set_silm(enable));
    }

    /// Loop back mode: transmitted frames are received internally.
    pub fn set_debug_loopback(&mut self, enable: bool) {
        self.regs.btr().modify(|_, w| w.set_lbkm(enable));
    }

    /// Freeze reception and transmission while the core is halted by a
    /// debugger.
    pub fn set_debug_freeze(&mut self, enable: bool) {
        self.regs.mcr().modify(|_, w| w.set_dbf(enable));
    }

    /// Bring the controller from sleep or normal operation into normal
    /// operation with `config` applied.
    ///
    /// The timing is checked before any register is written. Fails fast if
    /// initialization mode is not acknowledged.
    pub fn init(&mut self, config: &CanConfig) -> Result<(), ConfigurationError> {
        config.timing.check()?;

        self.leave_sleep_mode();
        self.enter_init_mode_blocking()
            .map_err(|_| ConfigurationError::EnterInitTimeout)?;

        self.regs.btr().write(Btr::default());

        self.set_time_triggered(config.time_triggered);
        self.set_auto_bus_off(config.auto_bus_off);
        self.set_auto_wakeup(config.auto_wakeup);
        self.set_no_retransmit(config.no_retransmit);
        self.set_rx_fifo_locked(config.rx_fifo_locked);
        self.set_tx_priority_by_request(config.tx_priority_by_request);
        self.set_debug_silent(config.silent);
        self.set_debug_loopback(config.loopback);
        self.set_debug_freeze(config.debug_freeze);
        self.set_timing(&config.timing);

        self.leave_init_mode_blocking()
            .map_err(|_| ConfigurationError::LeaveInitTimeout)
    }

    /// Write `timing` to the bit timing register, keeping the silent and
    /// loop back bits.
    ///
    /// Only effective in initialization mode. The values are written as
    /// given; see [`BitTiming::check`].
    pub fn set_timing(&mut self, timing: &BitTiming) {
        self.regs.btr().modify(|_, w| {
            w.set_sjw(timing.sjw.wrapping_sub(1));
            w.set_ts2(timing.ts2.wrapping_sub(1));
            w.set_ts1(timing.ts1.wrapping_sub(1));
            w.set_brp(timing.prescaler.wrapping_sub(1));
        });
    }

    /// The bit timing currently programmed
    pub fn timing(&self) -> BitTiming {
        let btr = self.regs.btr().read();
        BitTiming {
            prescaler: btr.brp() + 1,
            ts1: btr.ts1() + 1,
            ts2: btr.ts2() + 1,
            sjw: btr.sjw() + 1,
        }
    }

    /// Frequency of the clock feeding the controller
    pub fn can_clock(&self) -> HertzU32 {
        self.dependencies.can_clock()
    }

    /// Derive a bit timing for `bitrate` from the controller clock and apply
    /// it inside a blocking initialization window.
    pub fn configure_bitrate(
        &mut self,
        bitrate: HertzU32,
        sample_point: SamplePoint,
    ) -> Result<BitTiming, ConfigurationError> {
        let timing = BitTiming::synthesize(self.can_clock(), bitrate, sample_point)?;
        self.enter_init_mode_blocking()
            .map_err(|_| ConfigurationError::EnterInitTimeout)?;
        self.set_timing(&timing);
        self.leave_init_mode_blocking()
            .map_err(|_| ConfigurationError::LeaveInitTimeout)?;
        Ok(timing)
    }

    /// The last error code reported by the controller
    pub fn last_error_code(&self) -> LastErrorCode {
        self.regs.esr().read().lec().into()
    }

    /// Fault confinement state
    pub fn error_state(&self) -> ErrorState {
        let esr = self.regs.esr().read();
        if esr.boff() {
            ErrorState::BusOff
        } else if esr.epvf() {
            ErrorState::Passive
        } else if esr.ewgf() {
            ErrorState::Warning
        } else {
            ErrorState::Active
        }
    }
}

impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> CanBus for Can<Id, D, A> {
    fn error_counters(&self) -> ErrorCounters {
        self.regs.esr().read().into()
    }

    fn protocol_status(&self) -> ProtocolStatus {
        self.regs.esr().read().into()
    }
}

/// The inherent [`Can::transmit`] and [`Can::receive`] take precedence over
/// these in method call syntax. Call them as `nb::Can::receive(&mut can)`, or
/// use [`Can::transmit_frame`] and [`Can::receive_frame`] directly.
impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> embedded_can::nb::Can for Can<Id, D, A> {
    type Frame = Frame;
    type Error = ErrorKind;

    /// Queues `frame` in the next empty mailbox. Never replaces a pending
    /// frame, so `Ok` always carries `None`.
    fn transmit(&mut self, frame: &Frame) -> nb::Result<Option<Frame>, ErrorKind> {
        match self.transmit_frame(frame) {
            Ok(_) => Ok(None),
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(never)) => match never {},
        }
    }

    /// Takes the next frame from FIFO 0, then FIFO 1.
    fn receive(&mut self) -> nb::Result<Frame, ErrorKind> {
        for fifo in Fifo::ALL {
            match self.receive_frame(fifo) {
                Ok(received) => return Ok(received.frame),
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(never)) => match never {},
            }
        }
        Err(nb::Error::WouldBlock)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::Mobid;
    use crate::reg::offset;
    use crate::reg::sim::fixture::bus;
    use crate::reg::sim::{Acknowledge, SimulatedRegisters};

    fn inrq(sim: &SimulatedRegisters) -> bool {
        sim.peek(offset::MCR) & 1 != 0
    }

    #[test]
    fn leave_init_mode_is_idempotent() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.enter_init_mode();
        assert!(inrq(&sim));
        can.leave_init_mode();
        assert!(!inrq(&sim));
        can.leave_init_mode();
        assert!(!inrq(&sim));
    }

    #[test]
    fn blocking_enter_waits_for_acknowledge() {
        let sim = SimulatedRegisters::with_acknowledge(Acknowledge::AfterPolls(10));
        let mut can = bus(&sim);
        assert!(!can.is_init_mode());
        assert_eq!(can.enter_init_mode_blocking(), Ok(()));
        assert!(can.is_init_mode());
        assert_eq!(can.leave_init_mode_blocking(), Ok(()));
        assert!(!can.is_init_mode());
    }

    #[test]
    fn blocking_enter_gives_up_after_poll_budget() {
        let sim = SimulatedRegisters::with_acknowledge(Acknowledge::Never);
        let mut can = bus(&sim);
        let before = sim.reads();
        assert_eq!(can.enter_init_mode_blocking(), Err(Timeout));
        let polls = sim.reads() - before;
        // One extra read belongs to the read-modify-write of the request
        assert_eq!(polls, INIT_ACK_POLLS as usize + 1);
        assert!(inrq(&sim));
    }

    #[test]
    fn init_applies_configuration() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let timing = BitTiming {
            prescaler: 6,
            ts1: 10,
            ts2: 3,
            sjw: 3,
        };
        let mut config = CanConfig::new(timing);
        config.auto_bus_off = true;
        config.tx_priority_by_request = true;
        config.loopback = true;
        assert_eq!(can.init(&config), Ok(()));

        assert!(!can.is_init_mode());
        assert!(!can.is_sleep_mode());
        assert_eq!(can.timing(), timing);
        let mcr = sim.peek(offset::MCR);
        assert_eq!(mcr & 0xFF, 1 << 6 | 1 << 2);
        assert_eq!(mcr & 1 << 16, 1 << 16);
        let btr = sim.peek(offset::BTR);
        assert_eq!(btr, 1 << 30 | 2 << 24 | 2 << 20 | 9 << 16 | 5);
    }

    #[test]
    fn init_clears_debug_freeze() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let mut config = CanConfig::new(BitTiming {
            prescaler: 6,
            ts1: 10,
            ts2: 3,
            sjw: 3,
        });
        config.debug_freeze = false;
        assert_eq!(can.init(&config), Ok(()));
        assert_eq!(sim.peek(offset::MCR) & 1 << 16, 0);
    }

    #[test]
    fn init_reports_missing_acknowledge() {
        let sim = SimulatedRegisters::with_acknowledge(Acknowledge::Never);
        let mut can = bus(&sim);
        let config = CanConfig::new(BitTiming {
            prescaler: 6,
            ts1: 10,
            ts2: 3,
            sjw: 3,
        });
        assert_eq!(can.init(&config), Err(ConfigurationError::EnterInitTimeout));
        // Timing register untouched
        assert_eq!(sim.peek(offset::BTR), 0x0123_0000);
    }

    #[test]
    fn init_rejects_invalid_timing_without_touching_registers() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let config = CanConfig::new(BitTiming {
            prescaler: 6,
            ts1: 10,
            ts2: 2,
            sjw: 3,
        });
        assert!(matches!(
            can.init(&config),
            Err(ConfigurationError::BitTiming(
                BitTimingError::JumpWidthExceedsSegment2
            ))
        ));
        assert_eq!(sim.writes(), 0);
    }

    #[test]
    fn set_timing_keeps_debug_modes() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.set_debug_silent(true);
        can.set_timing(&BitTiming {
            prescaler: 512,
            ts1: 16,
            ts2: 8,
            sjw: 4,
        });
        assert_eq!(sim.peek(offset::BTR), 1 << 31 | 3 << 24 | 7 << 20 | 15 << 16 | 511);
    }

    #[test]
    fn configure_bitrate_uses_dependency_clock() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let timing = can
            .configure_bitrate(HertzU32::kHz(500), SamplePoint::PERCENT_75)
            .unwrap();
        assert_eq!(can.timing(), timing);
        assert_eq!(timing.frequency(can.can_clock()), HertzU32::kHz(500));
    }

    #[test]
    fn reset_restores_power_on_state() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.set_no_retransmit(true);
        can.reset();
        assert_eq!(sim.reset_pulses(), 1);
        assert!(!sim.in_reset());
        assert_eq!(sim.peek(offset::MCR), 0x0001_0002);
        assert!(can.is_sleep_mode());
    }

    #[test]
    fn error_status_is_decoded() {
        let sim = SimulatedRegisters::new();
        let can = bus(&sim);
        assert_eq!(can.error_state(), ErrorState::Active);
        sim.set_error_state(130, 200, 0b011 | 3 << 4);
        assert_eq!(can.error_state(), ErrorState::Passive);
        assert_eq!(can.last_error_code(), LastErrorCode::Acknowledgement);
        let counters = can.error_counters();
        assert_eq!(counters.receive(), 130);
        assert_eq!(counters.transmit(), 200);
        sim.set_error_state(0, 255, 0b111);
        assert_eq!(can.error_state(), ErrorState::BusOff);
    }

    #[test]
    fn error_codes_map_to_embedded_can_kinds() {
        use embedded_can::Error as _;
        assert_eq!(LastErrorCode::from(4).kind(), ErrorKind::Bit);
        assert_eq!(LastErrorCode::from(5).kind(), ErrorKind::Bit);
        assert_eq!(LastErrorCode::from(6).kind(), ErrorKind::Crc);
        assert_eq!(LastErrorCode::from(0).kind(), ErrorKind::Other);
    }

    #[test]
    fn nb_can_receives_from_both_fifos() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let first = Frame::from_parts(Mobid::standard(0x10), 1, [1, 0, 0, 0, 0, 0, 0, 0]);
        let second = Frame::from_parts(Mobid::standard(0x20), 0, [0; 8]);
        sim.deliver(Fifo::Fifo1, &second, 0, 0);
        sim.deliver(Fifo::Fifo0, &first, 0, 0);

        assert_eq!(embedded_can::nb::Can::receive(&mut can), Ok(first));
        assert_eq!(embedded_can::nb::Can::receive(&mut can), Ok(second));
        assert_eq!(
            embedded_can::nb::Can::receive(&mut can),
            Err(nb::Error::WouldBlock)
        );
        assert_eq!(embedded_can::nb::Can::transmit(&mut can, &first), Ok(None));
    }
}
