//! In-memory stand-in for the bxCAN register block
//!
//! [`SimulatedRegisters`] implements [`RegisterAccess`] and models the parts
//! of the controller the driver depends on:
//! - INAK and SLAK follow the INRQ and SLEEP requests after a configurable
//!   number of status register reads
//! - write-1-to-clear status flags in MSR, TSR and RFxR
//! - mailbox selection (TME and CODE), write protection of pending mailboxes
//!   and transmission outcomes injected by [`SimulatedRegisters::complete_transmission`]
//! - three-deep receive FIFOs fed by [`SimulatedRegisters::deliver`]
//!
//! Every test is expected to build its own instance.

use super::{offset, Esr, IdReg, Mcr, Rdtr, RegisterAccess, RegisterValue, Rfr, Tsr};
use crate::message::{pack_payload, Frame};
use crate::rx_fifo::Fifo;
use crate::tx_mailbox::Mailbox;
use core::cell::RefCell;

const WORDS: usize = offset::BLOCK_SIZE / 4;
const FIFO_DEPTH: usize = 3;

const MCR_RESET: u32 = 0x0001_0002;
const MSR_RESET: u32 = 0x0000_0C02;
const TSR_RESET: u32 = 0x1C00_0000;
const BTR_RESET: u32 = 0x0123_0000;
const FMR_RESET: u32 = 0x2A1C_0E01;

/// When the simulated controller acknowledges INRQ and SLEEP changes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Acknowledge {
    /// After the given number of MSR reads have observed the old state
    AfterPolls(u32),
    /// Never, like a controller without a running clock
    Never,
}

/// Result of a simulated transmission attempt
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The frame was acknowledged on the bus
    Success,
    /// Another node won arbitration
    ArbitrationLost,
    /// A bus error ended the attempt
    Error,
}

#[derive(Copy, Clone, Default)]
struct Entry {
    ir: u32,
    dtr: u32,
    dlr: u32,
    dhr: u32,
}

struct State {
    words: [u32; WORDS],
    acknowledge: Acknowledge,
    settle_in: Option<u32>,
    fifos: [[Entry; FIFO_DEPTH]; 2],
    fifo_len: [usize; 2],
    reads: usize,
    writes: usize,
    in_reset: bool,
    reset_pulses: usize,
}

/// Simulated register file of one bxCAN controller
pub struct SimulatedRegisters {
    state: RefCell<State>,
}

impl Default for SimulatedRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRegisters {
    /// A controller at power-on state that acknowledges mode changes on the
    /// third status read
    pub fn new() -> Self {
        Self::with_acknowledge(Acknowledge::AfterPolls(2))
    }

    /// A controller at power-on state with the given acknowledge behavior
    pub fn with_acknowledge(acknowledge: Acknowledge) -> Self {
        let sim = Self {
            state: RefCell::new(State {
                words: [0; WORDS],
                acknowledge,
                settle_in: None,
                fifos: [[Entry::default(); FIFO_DEPTH]; 2],
                fifo_len: [0; 2],
                reads: 0,
                writes: 0,
                in_reset: false,
                reset_pulses: 0,
            }),
        };
        sim.power_on_reset();
        sim
    }

    /// Changes how future mode requests are acknowledged
    pub fn set_acknowledge(&self, acknowledge: Acknowledge) {
        self.state.borrow_mut().acknowledge = acknowledge;
    }

    /// Restores reset values and empties the receive FIFOs. Access counters
    /// are kept.
    pub fn power_on_reset(&self) {
        self.state.borrow_mut().power_on_reset();
    }

    /// Drives the reset line. Registers are reset when the line is released.
    pub fn set_reset_line(&self, asserted: bool) {
        let mut state = self.state.borrow_mut();
        if asserted {
            state.in_reset = true;
        } else if state.in_reset {
            state.in_reset = false;
            state.reset_pulses += 1;
            state.power_on_reset();
        }
    }

    /// `true` while the reset line is asserted
    pub fn in_reset(&self) -> bool {
        self.state.borrow().in_reset
    }

    /// Number of complete reset pulses seen
    pub fn reset_pulses(&self) -> usize {
        self.state.borrow().reset_pulses
    }

    /// Number of register reads through [`RegisterAccess`]
    pub fn reads(&self) -> usize {
        self.state.borrow().reads
    }

    /// Number of register writes through [`RegisterAccess`]
    pub fn writes(&self) -> usize {
        self.state.borrow().writes
    }

    /// Reads a register without side effects
    pub fn peek(&self, offset: usize) -> u32 {
        self.state.borrow().words[offset / 4]
    }

    /// Overwrites a register without side effects
    pub fn poke(&self, offset: usize, value: u32) {
        self.state.borrow_mut().words[offset / 4] = value;
    }

    /// Number of frames waiting in `fifo`
    pub fn queued(&self, fifo: Fifo) -> usize {
        self.state.borrow().fifo_len[fifo.index()]
    }

    /// Stores a received `frame` in `fifo` as if it had matched filter
    /// `filter_index`. Returns `false` if the FIFO overran.
    pub fn deliver(&self, fifo: Fifo, frame: &Frame, filter_index: u8, timestamp: u16) -> bool {
        let mut rdtr = Rdtr::default();
        rdtr.set_time(timestamp);
        rdtr.set_fmi(filter_index);
        rdtr.set_dlc(embedded_can::Frame::dlc(frame) as u8);
        let (dlr, dhr) = pack_payload(frame.raw_data());
        let entry = Entry {
            ir: frame.mobid().to_id_register().bits() & !1,
            dtr: rdtr.bits(),
            dlr,
            dhr,
        };
        self.state.borrow_mut().push(fifo, entry)
    }

    /// Finishes the pending transmission in `mailbox` with `outcome`
    pub fn complete_transmission(&self, mailbox: Mailbox, outcome: Outcome) {
        self.state.borrow_mut().complete(mailbox, outcome);
    }
}

impl State {
    fn word(&mut self, offset: usize) -> &mut u32 {
        &mut self.words[offset / 4]
    }

    fn power_on_reset(&mut self) {
        self.words = [0; WORDS];
        *self.word(offset::MCR) = MCR_RESET;
        *self.word(offset::MSR) = MSR_RESET;
        *self.word(offset::TSR) = TSR_RESET;
        *self.word(offset::BTR) = BTR_RESET;
        *self.word(offset::FMR) = FMR_RESET;
        self.fifos = [[Entry::default(); FIFO_DEPTH]; 2];
        self.fifo_len = [0; 2];
        self.settle_in = None;
    }

    fn poll_acknowledge(&mut self) {
        match self.settle_in {
            Some(0) => {
                self.settle_in = None;
                let mcr = Mcr::from_bits(*self.word(offset::MCR));
                let msr = self.word(offset::MSR);
                let mut value = super::Msr::from_bits(*msr);
                value.set_inak(mcr.inrq());
                value.set_slak(mcr.sleep() && !mcr.inrq());
                *msr = value.bits();
            }
            Some(remaining) => self.settle_in = Some(remaining - 1),
            None => {}
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            offset::MCR => self.write_mcr(value),
            // SLAKI, WKUI and ERRI are write-1-to-clear, the rest is read-only
            offset::MSR => *self.word(offset) &= !(value & 0x1C),
            offset::TSR => self.write_tsr(Tsr::from_bits(value)),
            offset::ESR => {
                let esr = self.word(offset);
                *esr = (*esr & !0x70) | (value & 0x70);
            }
            o if o == offset::RF0R || o == offset::RF0R + 4 => {
                let fifo = if o == offset::RF0R {
                    Fifo::Fifo0
                } else {
                    Fifo::Fifo1
                };
                self.write_rfr(fifo, Rfr::from_bits(value));
            }
            o if (offset::TX_MAILBOX..offset::RX_FIFO).contains(&o) => {
                let index = (o - offset::TX_MAILBOX) / offset::MAILBOX_STRIDE;
                if let Ok(mailbox) = Mailbox::try_from(index as u8) {
                    self.write_mailbox(mailbox, o % offset::MAILBOX_STRIDE, value);
                }
            }
            // Receive mailboxes are read-only
            o if (offset::RX_FIFO..offset::FMR).contains(&o) => {}
            _ => *self.word(offset) = value,
        }
    }

    fn write_mcr(&mut self, value: u32) {
        let new = Mcr::from_bits(value);
        if new.reset() {
            self.power_on_reset();
            return;
        }
        let old = Mcr::from_bits(*self.word(offset::MCR));
        *self.word(offset::MCR) = value;
        if old.inrq() != new.inrq() || old.sleep() != new.sleep() {
            self.settle_in = match self.acknowledge {
                Acknowledge::AfterPolls(polls) => Some(polls),
                Acknowledge::Never => None,
            };
        }
    }

    fn write_tsr(&mut self, value: Tsr) {
        let mut tsr = Tsr::from_bits(*self.word(offset::TSR));
        for mailbox in Mailbox::ALL {
            if value.rqcp(mailbox) {
                tsr.set_rqcp(mailbox, false);
                tsr.set_txok(mailbox, false);
                tsr.set_alst(mailbox, false);
                tsr.set_terr(mailbox, false);
            }
        }
        *self.word(offset::TSR) = tsr.bits();
        for mailbox in Mailbox::ALL {
            if value.abrq(mailbox) && !tsr.tme(mailbox) {
                self.finish(mailbox, |tsr| tsr.set_rqcp(mailbox, true));
            }
        }
    }

    fn write_rfr(&mut self, fifo: Fifo, value: Rfr) {
        let rfr = self.word(offset::RF0R + 4 * fifo.index());
        // FULL and FOVR are write-1-to-clear
        *rfr &= !(value.bits() & 0x18);
        if value.rfom() {
            self.pop(fifo);
        }
    }

    fn write_mailbox(&mut self, mailbox: Mailbox, register: usize, value: u32) {
        let tsr = Tsr::from_bits(*self.word(offset::TSR));
        if !tsr.tme(mailbox) {
            // Pending mailboxes are write protected
            return;
        }
        let base = offset::TX_MAILBOX + offset::MAILBOX_STRIDE * mailbox.index();
        match register {
            offset::MAILBOX_IR => {
                *self.word(base) = value;
                if IdReg::from_bits(value).txrq() {
                    let mut tsr = tsr;
                    tsr.set_tme(mailbox, false);
                    tsr.set_rqcp(mailbox, false);
                    tsr.set_txok(mailbox, false);
                    tsr.set_alst(mailbox, false);
                    tsr.set_terr(mailbox, false);
                    *self.word(offset::TSR) = tsr.bits();
                    self.update_code();
                }
            }
            offset::MAILBOX_DTR => {
                // The time stamp half is written by the controller
                let dtr = self.word(base + register);
                *dtr = (*dtr & 0xFFFF_0000) | (value & 0xFFFF);
            }
            _ => *self.word(base + register) = value,
        }
    }

    fn complete(&mut self, mailbox: Mailbox, outcome: Outcome) {
        if Tsr::from_bits(*self.word(offset::TSR)).tme(mailbox) {
            return;
        }
        self.finish(mailbox, |tsr| {
            tsr.set_rqcp(mailbox, true);
            match outcome {
                Outcome::Success => tsr.set_txok(mailbox, true),
                Outcome::ArbitrationLost => tsr.set_alst(mailbox, true),
                Outcome::Error => tsr.set_terr(mailbox, true),
            }
        });
    }

    /// Empties a pending mailbox, applying `flags` to the status register.
    fn finish(&mut self, mailbox: Mailbox, flags: impl FnOnce(&mut Tsr)) {
        let mut tsr = Tsr::from_bits(*self.word(offset::TSR));
        tsr.set_tme(mailbox, true);
        flags(&mut tsr);
        *self.word(offset::TSR) = tsr.bits();
        let tir = self.word(offset::TX_MAILBOX + offset::MAILBOX_STRIDE * mailbox.index());
        *tir &= !1;
        self.update_code();
    }

    fn update_code(&mut self) {
        let mut tsr = Tsr::from_bits(*self.word(offset::TSR));
        if let Some(empty) = Mailbox::ALL.into_iter().find(|&mailbox| tsr.tme(mailbox)) {
            tsr.set_code(empty.index() as u8);
            *self.word(offset::TSR) = tsr.bits();
        }
    }

    fn push(&mut self, fifo: Fifo, entry: Entry) -> bool {
        let i = fifo.index();
        let locked = Mcr::from_bits(*self.word(offset::MCR)).rflm();
        let rfr_offset = offset::RF0R + 4 * i;
        let mut rfr = Rfr::from_bits(*self.word(rfr_offset));
        let stored = if self.fifo_len[i] == FIFO_DEPTH {
            rfr.set_fovr(true);
            if !locked {
                self.fifos[i][FIFO_DEPTH - 1] = entry;
            }
            false
        } else {
            self.fifos[i][self.fifo_len[i]] = entry;
            self.fifo_len[i] += 1;
            if self.fifo_len[i] == FIFO_DEPTH {
                rfr.set_full(true);
            }
            true
        };
        rfr.set_fmp(self.fifo_len[i] as u8);
        *self.word(rfr_offset) = rfr.bits();
        self.show_head(fifo);
        stored
    }

    fn pop(&mut self, fifo: Fifo) {
        let i = fifo.index();
        if self.fifo_len[i] == 0 {
            return;
        }
        self.fifos[i].rotate_left(1);
        self.fifo_len[i] -= 1;
        self.fifos[i][FIFO_DEPTH - 1] = Entry::default();
        let rfr_offset = offset::RF0R + 4 * i;
        let mut rfr = Rfr::from_bits(*self.word(rfr_offset));
        rfr.set_fmp(self.fifo_len[i] as u8);
        *self.word(rfr_offset) = rfr.bits();
        self.show_head(fifo);
    }

    fn show_head(&mut self, fifo: Fifo) {
        let i = fifo.index();
        let head = if self.fifo_len[i] > 0 {
            self.fifos[i][0]
        } else {
            Entry::default()
        };
        let base = offset::RX_FIFO + offset::MAILBOX_STRIDE * i;
        *self.word(base + offset::MAILBOX_IR) = head.ir;
        *self.word(base + offset::MAILBOX_DTR) = head.dtr;
        *self.word(base + offset::MAILBOX_DLR) = head.dlr;
        *self.word(base + offset::MAILBOX_DHR) = head.dhr;
    }
}

impl RegisterAccess for SimulatedRegisters {
    fn read(&self, offset: usize) -> u32 {
        let mut state = self.state.borrow_mut();
        state.reads += 1;
        if offset == offset::MSR {
            state.poll_acknowledge();
        }
        state.words[offset / 4]
    }

    fn write(&self, offset: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        state.writes += 1;
        state.write(offset, value);
    }
}

impl SimulatedRegisters {
    /// Sets the error counters and flags reported in ESR
    pub fn set_error_state(&self, rec: u8, tec: u8, flags: u32) {
        let mut esr = Esr::from_bits(flags & 0x77);
        esr.set_rec(rec);
        esr.set_tec(tec);
        self.poke(offset::ESR, esr.bits());
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::SimulatedRegisters;
    use crate::bus::Can;
    use bxcan_pal_core::{CanId, Dependencies, FilterOwner};
    use fugit::HertzU32;

    pub enum TestCan {}

    unsafe impl CanId for TestCan {
        const ADDRESS: *const () = 0x4000_6400 as *const _;
    }

    unsafe impl FilterOwner for TestCan {
        const NUM_FILTER_BANKS: u8 = 28;
    }

    pub struct TestDeps<'a> {
        pub sim: &'a SimulatedRegisters,
        pub clock: HertzU32,
    }

    unsafe impl Dependencies<TestCan> for TestDeps<'_> {
        fn can_clock(&self) -> HertzU32 {
            self.clock
        }

        fn assert_reset(&mut self) {
            self.sim.set_reset_line(true);
        }

        fn release_reset(&mut self) {
            self.sim.set_reset_line(false);
        }
    }

    pub type TestBus<'a> = Can<TestCan, TestDeps<'a>, &'a SimulatedRegisters>;

    /// A driver over `sim` clocked at 42 MHz
    pub fn bus(sim: &SimulatedRegisters) -> TestBus<'_> {
        Can::with_access(
            TestDeps {
                sim,
                clock: HertzU32::MHz(42),
            },
            sim,
        )
    }
}
