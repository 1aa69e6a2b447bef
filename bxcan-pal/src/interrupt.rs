//! Interrupt enables and pending conditions
//!
//! The controller has no interrupt status register of its own. An interrupt
//! enabled in CAN_IER fires while the matching status flag is set:
//!
//! | enable           | status flag         |
//! |------------------|---------------------|
//! | TMEIE            | RQCPx in CAN_TSR    |
//! | FMPIEx           | FMPx != 0           |
//! | FFIEx, FOVIEx    | FULLx, FOVRx        |
//! | EWGIE, EPVIE     | EWGF, EPVF          |
//! | BOFIE, LECIE     | BOFF, LEC != 0      |
//! | ERRIE, WKUIE     | ERRI, WKUI          |
//! | SLKIE            | SLAKI               |
//!
//! The pending queries take the set of interrupts the caller is interested in
//! and return the subset whose status flag is asserted, independent of
//! CAN_IER.

use crate::bus::Can;
use crate::reg::{Msr, RegisterAccess, RegisterValue, Rfr, Tsr};
use crate::rx_fifo::Fifo;
use crate::tx_mailbox::Mailbox;
use bitfield::bitfield;
use bxcan_pal_core::{CanId, Dependencies};

bitfield! {
    /// A set of CAN interrupts, laid out like CAN_IER.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Sleep acknowledge
    pub slkie, set_slkie: 17;
    /// Wakeup
    pub wkuie, set_wkuie: 16;
    /// Error (any of the error conditions enabled below)
    pub errie, set_errie: 15;
    /// Last error code changed
    pub lecie, set_lecie: 11;
    /// Bus-off
    pub bofie, set_bofie: 10;
    /// Error passive
    pub epvie, set_epvie: 9;
    /// Error warning
    pub ewgie, set_ewgie: 8;
    /// FIFO 1 overrun
    pub fovie1, set_fovie1: 6;
    /// FIFO 1 full
    pub ffie1, set_ffie1: 5;
    /// FIFO 1 message pending
    pub fmpie1, set_fmpie1: 4;
    /// FIFO 0 overrun
    pub fovie0, set_fovie0: 3;
    /// FIFO 0 full
    pub ffie0, set_ffie0: 2;
    /// FIFO 0 message pending
    pub fmpie0, set_fmpie0: 1;
    /// Transmit mailbox empty
    pub tmeie, set_tmeie: 0;
}

impl InterruptSet {
    /// No interrupts
    pub const NONE: Self = Self(0);
    /// Conditions flagged in CAN_MSR
    pub const STATUS: Self = Self(1 << 17 | 1 << 16 | 1 << 15);
    /// Conditions flagged in CAN_ESR
    pub const ERROR: Self = Self(1 << 11 | 1 << 10 | 1 << 9 | 1 << 8);
    /// Conditions flagged in CAN_RF0R and CAN_RF1R
    pub const FIFO: Self = Self(0x7E);
    /// Conditions flagged in CAN_TSR
    pub const TRANSMIT: Self = Self(1);
    /// Every interrupt
    pub const ALL: Self = Self(Self::STATUS.0 | Self::ERROR.0 | Self::FIFO.0 | Self::TRANSMIT.0);

    /// `true` if no interrupt is in the set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// `true` if `interrupt` is in the set
    pub fn contains(&self, interrupt: Interrupt) -> bool {
        self.0 & u32::from(interrupt) != 0
    }

    /// Adds `interrupt` to the set
    pub fn insert(&mut self, interrupt: Interrupt) {
        self.0 |= u32::from(interrupt);
    }

    /// Interrupts contained in both sets
    pub fn intersection(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl RegisterValue for InterruptSet {
    fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    fn bits(&self) -> u32 {
        self.0
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        for int in self.iter() {
            write!(f, "{} ", int.name())?;
        }
        write!(f, "}}")
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// TMEIE
    TransmitMailboxEmpty = 0,
    /// FMPIE0
    Fifo0MessagePending = 1,
    /// FFIE0
    Fifo0Full = 2,
    /// FOVIE0
    Fifo0Overrun = 3,
    /// FMPIE1
    Fifo1MessagePending = 4,
    /// FFIE1
    Fifo1Full = 5,
    /// FOVIE1
    Fifo1Overrun = 6,
    /// EWGIE
    ErrorWarning = 8,
    /// EPVIE
    ErrorPassive = 9,
    /// BOFIE
    BusOff = 10,
    /// LECIE
    LastErrorCode = 11,
    /// ERRIE
    AnyError = 15,
    /// WKUIE
    Wakeup = 16,
    /// SLKIE
    SleepAcknowledge = 17,
}

impl Interrupt {
    fn name(self) -> &'static str {
        match self {
            Self::TransmitMailboxEmpty => "TMEIE",
            Self::Fifo0MessagePending => "FMPIE0",
            Self::Fifo0Full => "FFIE0",
            Self::Fifo0Overrun => "FOVIE0",
            Self::Fifo1MessagePending => "FMPIE1",
            Self::Fifo1Full => "FFIE1",
            Self::Fifo1Overrun => "FOVIE1",
            Self::ErrorWarning => "EWGIE",
            Self::ErrorPassive => "EPVIE",
            Self::BusOff => "BOFIE",
            Self::LastErrorCode => "LECIE",
            Self::AnyError => "ERRIE",
            Self::Wakeup => "WKUIE",
            Self::SleepAcknowledge => "SLKIE",
        }
    }
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// The bit position does not belong to an interrupt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => TransmitMailboxEmpty,
            1 => Fifo0MessagePending,
            2 => Fifo0Full,
            3 => Fifo0Overrun,
            4 => Fifo1MessagePending,
            5 => Fifo1Full,
            6 => Fifo1Overrun,
            8 => ErrorWarning,
            9 => ErrorPassive,
            10 => BusOff,
            11 => LastErrorCode,
            15 => AnyError,
            16 => Wakeup,
            17 => SleepAcknowledge,
            _ => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

const LAST_INTERRUPT: u8 = 17;

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index <= LAST_INTERRUPT {
            let i = self.index;
            self.index += 1;
            if self.flags.0 & (1 << i) == 0 {
                continue;
            }
            // Bits outside the known interrupts are skipped
            if let Ok(int) = Interrupt::try_from(i) {
                return Some(int);
            }
        }
        None
    }
}

impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> Can<Id, D, A> {
    /// Set `interrupts` in CAN_IER. Other enables remain unchanged.
    pub fn enable_interrupts(&mut self, interrupts: InterruptSet) {
        self.regs()
            .ier()
            .modify(|r, w| *w = InterruptSet(r.0 | interrupts.0));
    }

    /// Clear `interrupts` in CAN_IER. Other enables remain unchanged.
    pub fn disable_interrupts(&mut self, interrupts: InterruptSet) {
        self.regs()
            .ier()
            .modify(|r, w| *w = InterruptSet(r.0 & !interrupts.0));
    }

    /// Interrupts currently enabled in CAN_IER
    pub fn enabled_interrupts(&self) -> InterruptSet {
        self.regs().ier().read()
    }

    /// Subset of `requested` status interrupts (SLKIE, WKUIE, ERRIE) whose
    /// flag is asserted in CAN_MSR
    pub fn status_pending(&self, requested: InterruptSet) -> InterruptSet {
        status_flags(self.regs().msr().read()).intersection(requested)
    }

    /// `true` if any of `requested` status interrupts is pending
    pub fn status_is_pending(&self, requested: InterruptSet) -> bool {
        !self.status_pending(requested).is_empty()
    }

    /// Clears the flags of the pending `requested` status interrupts, one
    /// write per flag, and returns the interrupts that were pending.
    pub fn clear_status_pending(&mut self, requested: InterruptSet) -> InterruptSet {
        let pending = self.status_pending(requested);
        let msr = self.regs().msr();
        if pending.slkie() {
            msr.write_with(|w| w.set_slaki(true));
        }
        if pending.wkuie() {
            msr.write_with(|w| w.set_wkui(true));
        }
        if pending.errie() {
            msr.write_with(|w| w.set_erri(true));
        }
        pending
    }

    /// Subset of `requested` error interrupts (LECIE, BOFIE, EPVIE, EWGIE)
    /// whose condition is asserted in CAN_ESR
    ///
    /// These conditions follow the error counters and cannot be cleared by
    /// software, except for the last error code.
    pub fn error_pending(&self, requested: InterruptSet) -> InterruptSet {
        let esr = self.regs().esr().read();
        let mut pending = InterruptSet::NONE;
        pending.set_lecie(esr.lec() != 0);
        pending.set_bofie(esr.boff());
        pending.set_epvie(esr.epvf());
        pending.set_ewgie(esr.ewgf());
        pending.intersection(requested)
    }

    /// `true` if any of `requested` error interrupts is pending
    pub fn error_is_pending(&self, requested: InterruptSet) -> bool {
        !self.error_pending(requested).is_empty()
    }

    /// Subset of `requested` FIFO interrupts whose condition is asserted in
    /// CAN_RF0R or CAN_RF1R
    pub fn fifo_pending(&self, requested: InterruptSet) -> InterruptSet {
        let mut pending = InterruptSet::NONE;
        for fifo in Fifo::ALL {
            pending.0 |= fifo_flags(fifo, self.regs().rfr(fifo).read()).0;
        }
        pending.intersection(requested)
    }

    /// `true` if any of `requested` FIFO interrupts is pending
    pub fn fifo_is_pending(&self, requested: InterruptSet) -> bool {
        !self.fifo_pending(requested).is_empty()
    }

    /// Clears the full and overrun flags of the pending `requested` FIFO
    /// interrupts, one write per flag, and returns the interrupts that were
    /// pending.
    ///
    /// Message pending interrupts are only cleared by releasing frames.
    pub fn clear_fifo_pending(&mut self, requested: InterruptSet) -> InterruptSet {
        let pending = self.fifo_pending(requested);
        for fifo in Fifo::ALL {
            let rfr = self.regs().rfr(fifo);
            if pending.0 & fifo_bit(fifo, FULL) != 0 {
                rfr.write_with(|w| w.set_full(true));
            }
            if pending.0 & fifo_bit(fifo, OVERRUN) != 0 {
                rfr.write_with(|w| w.set_fovr(true));
            }
        }
        pending
    }

    /// [`InterruptSet::TRANSMIT`] if it is `requested` and any mailbox has
    /// completed a request, otherwise empty
    pub fn transmit_pending(&self, requested: InterruptSet) -> InterruptSet {
        transmit_flags(self.regs().tsr().read()).intersection(requested)
    }

    /// `true` if the transmit mailbox empty interrupt is requested and pending
    pub fn transmit_is_pending(&self, requested: InterruptSet) -> bool {
        !self.transmit_pending(requested).is_empty()
    }

    /// Clears the completion flags of every mailbox that finished a request,
    /// one write per mailbox, if the transmit interrupt is `requested`.
    /// Returns the interrupts that were pending.
    pub fn clear_transmit_pending(&mut self, requested: InterruptSet) -> InterruptSet {
        let tsr = self.regs().tsr().read();
        let pending = transmit_flags(tsr).intersection(requested);
        if pending.tmeie() {
            for mailbox in Mailbox::ALL {
                if tsr.rqcp(mailbox) {
                    self.regs()
                        .tsr()
                        .write_with(|w| w.set_rqcp(mailbox, true));
                }
            }
        }
        pending
    }
}

const FULL: u32 = 1;
const OVERRUN: u32 = 2;

/// Bit of the FIFO interrupt `flag` (0 message pending, 1 full, 2 overrun)
fn fifo_bit(fifo: Fifo, flag: u32) -> u32 {
    1 << (1 + 3 * fifo.index() as u32 + flag)
}

fn status_flags(msr: Msr) -> InterruptSet {
    let mut flags = InterruptSet::NONE;
    flags.set_slkie(msr.slaki());
    flags.set_wkuie(msr.wkui());
    flags.set_errie(msr.erri());
    flags
}

fn fifo_flags(fifo: Fifo, rfr: Rfr) -> InterruptSet {
    let mut flags = 0;
    if rfr.fmp() != 0 {
        flags |= fifo_bit(fifo, 0);
    }
    if rfr.full() {
        flags |= fifo_bit(fifo, FULL);
    }
    if rfr.fovr() {
        flags |= fifo_bit(fifo, OVERRUN);
    }
    InterruptSet(flags)
}

fn transmit_flags(tsr: Tsr) -> InterruptSet {
    let mut flags = InterruptSet::NONE;
    flags.set_tmeie(Mailbox::ALL.into_iter().any(|mailbox| tsr.rqcp(mailbox)));
    flags
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{Frame, Mobid};
    use crate::reg::offset;
    use crate::reg::sim::fixture::bus;
    use crate::reg::sim::{Outcome, SimulatedRegisters};

    #[test]
    fn iter_preserves_length() {
        assert_eq!(InterruptSet::ALL.iter().count(), 14);
        assert_eq!(InterruptSet::STATUS.iter().count(), 3);
        assert_eq!(InterruptSet::FIFO.iter().count(), 6);
    }

    #[test]
    fn iter_collect() {
        let set: InterruptSet = [Interrupt::BusOff, Interrupt::Fifo1Full]
            .into_iter()
            .collect();
        assert_eq!(set.0, 1 << 10 | 1 << 5);
        let mut iter = set.iter();
        assert_eq!(iter.next(), Some(Interrupt::Fifo1Full));
        assert_eq!(iter.next(), Some(Interrupt::BusOff));
        assert_eq!(iter.next(), None);
        assert_eq!(set.iter().collect::<InterruptSet>(), set);
    }

    #[test]
    fn interrupt_numbers() {
        assert_eq!(Interrupt::try_from(15), Ok(Interrupt::AnyError));
        assert_eq!(Interrupt::try_from(7), Err(InvalidInterruptNumber));
        assert_eq!(Interrupt::try_from(18), Err(InvalidInterruptNumber));
        assert_eq!(u32::from(Interrupt::SleepAcknowledge), 1 << 17);
    }

    #[test]
    fn enable_and_disable_keep_other_bits() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.enable_interrupts(InterruptSet::FIFO);
        can.enable_interrupts(InterruptSet::TRANSMIT);
        can.disable_interrupts([Interrupt::Fifo0Full].into_iter().collect());
        assert_eq!(sim.peek(offset::IER), 0x7B);
        assert_eq!(can.enabled_interrupts().bits(), 0x7B);
    }

    #[test]
    fn status_flags_are_cleared_one_by_one() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        // SLAKI and ERRI asserted, SLAK still set
        sim.poke(offset::MSR, 1 << 4 | 1 << 2 | 1 << 1);
        let requested = InterruptSet::STATUS;
        assert!(can.status_is_pending(requested));
        let writes = sim.writes();
        let cleared = can.clear_status_pending(requested);
        assert!(cleared.slkie() && cleared.errie() && !cleared.wkuie());
        assert_eq!(sim.writes() - writes, 2);
        assert_eq!(sim.peek(offset::MSR), 1 << 1);
        assert!(!can.status_is_pending(requested));
    }

    #[test]
    fn status_pending_only_reports_requested() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        sim.poke(offset::MSR, 1 << 3);
        let sleep: InterruptSet = [Interrupt::SleepAcknowledge].into_iter().collect();
        assert!(!can.status_is_pending(sleep));
        assert!(can.clear_status_pending(sleep).is_empty());
        assert_eq!(sim.peek(offset::MSR), 1 << 3);
    }

    #[test]
    fn error_conditions_follow_esr() {
        let sim = SimulatedRegisters::new();
        let can = bus(&sim);
        assert!(!can.error_is_pending(InterruptSet::ERROR));
        sim.set_error_state(0, 100, 0b001 | 2 << 4);
        let pending = can.error_pending(InterruptSet::ERROR);
        assert!(pending.ewgie() && pending.lecie());
        assert!(!pending.bofie() && !pending.epvie());
        let bus_off: InterruptSet = [Interrupt::BusOff].into_iter().collect();
        assert!(!can.error_is_pending(bus_off));
    }

    #[test]
    fn fifo_flags_map_per_fifo() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let frame = Frame::from_parts(Mobid::standard(1), 0, [0; 8]);
        sim.deliver(Fifo::Fifo1, &frame, 0, 0);
        let pending = can.fifo_pending(InterruptSet::FIFO);
        assert_eq!(
            pending,
            [Interrupt::Fifo1MessagePending]
                .into_iter()
                .collect::<InterruptSet>()
        );
        for _ in 0..3 {
            sim.deliver(Fifo::Fifo1, &frame, 0, 0);
        }
        let pending = can.fifo_pending(InterruptSet::FIFO);
        assert!(pending.fmpie1() && pending.ffie1() && pending.fovie1());
        assert!(!pending.fmpie0());

        let cleared = can.clear_fifo_pending(InterruptSet::FIFO);
        assert_eq!(cleared, pending);
        // Full and overrun are gone, frames stay queued
        assert_eq!(
            can.fifo_pending(InterruptSet::FIFO),
            [Interrupt::Fifo1MessagePending]
                .into_iter()
                .collect::<InterruptSet>()
        );
        assert_eq!(can.pending(Fifo::Fifo1), 3);
    }

    #[test]
    fn transmit_completion_is_pending_until_cleared() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.transmit(Mobid::standard(1), &[1]).unwrap();
        can.transmit(Mobid::standard(2), &[2]).unwrap();
        assert!(!can.transmit_is_pending(InterruptSet::ALL));
        sim.complete_transmission(Mailbox::Mailbox0, Outcome::Success);
        sim.complete_transmission(Mailbox::Mailbox1, Outcome::Error);
        assert!(!can.transmit_is_pending(InterruptSet::FIFO));
        assert_eq!(can.transmit_pending(InterruptSet::ALL), InterruptSet::TRANSMIT);

        let writes = sim.writes();
        assert_eq!(
            can.clear_transmit_pending(InterruptSet::TRANSMIT),
            InterruptSet::TRANSMIT
        );
        assert_eq!(sim.writes() - writes, 2);
        assert!(!can.transmit_is_pending(InterruptSet::TRANSMIT));
        assert_eq!(
            can.transmit_status(Mailbox::Mailbox1),
            crate::tx_mailbox::TransmitStatus::Idle
        );
    }
}
