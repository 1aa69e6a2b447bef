//! Register map of the bxCAN peripheral
//!
//! The driver never dereferences the register block directly. Every access
//! goes through [`RegisterAccess`], which is implemented by [`Mmio`] for real
//! hardware and by [`sim::SimulatedRegisters`] for host-side testing.

mod fields;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use fields::*;

use crate::rx_fifo::Fifo;
use crate::tx_mailbox::Mailbox;
use bxcan_pal_core::CanId;
use core::marker::PhantomData;
use vcell::VolatileCell;

/// Byte offsets of the registers, relative to the peripheral base address.
pub mod offset {
    /// Master control register
    pub const MCR: usize = 0x000;
    /// Master status register
    pub const MSR: usize = 0x004;
    /// Transmit status register
    pub const TSR: usize = 0x008;
    /// Receive FIFO 0 register; FIFO 1 follows at +4
    pub const RF0R: usize = 0x00C;
    /// Interrupt enable register
    pub const IER: usize = 0x014;
    /// Error status register
    pub const ESR: usize = 0x018;
    /// Bit timing register
    pub const BTR: usize = 0x01C;

    /// First transmit mailbox
    pub const TX_MAILBOX: usize = 0x180;
    /// First receive FIFO mailbox
    pub const RX_FIFO: usize = 0x1B0;
    /// Distance between two mailboxes
    pub const MAILBOX_STRIDE: usize = 0x10;
    /// Identifier register within a mailbox
    pub const MAILBOX_IR: usize = 0x0;
    /// Length, time stamp (and filter match index) register within a mailbox
    pub const MAILBOX_DTR: usize = 0x4;
    /// Payload bytes 0..4 within a mailbox
    pub const MAILBOX_DLR: usize = 0x8;
    /// Payload bytes 4..8 within a mailbox
    pub const MAILBOX_DHR: usize = 0xC;

    /// Filter master register
    pub const FMR: usize = 0x200;
    /// Filter mode register
    pub const FM1R: usize = 0x204;
    /// Filter scale register
    pub const FS1R: usize = 0x20C;
    /// Filter FIFO assignment register
    pub const FFA1R: usize = 0x214;
    /// Filter activation register
    pub const FA1R: usize = 0x21C;
    /// First filter bank
    pub const FILTER_BANK: usize = 0x240;
    /// Distance between two filter banks
    pub const FILTER_BANK_STRIDE: usize = 0x8;

    /// Size of the register block with all 28 filter banks
    pub const BLOCK_SIZE: usize = FILTER_BANK + 28 * FILTER_BANK_STRIDE;
}

/// Word-wide access to a bxCAN register block
///
/// Offsets are byte offsets from the start of the block and always multiples
/// of four.
pub trait RegisterAccess {
    /// Reads the register at `offset`
    fn read(&self, offset: usize) -> u32;
    /// Writes `value` to the register at `offset`
    fn write(&self, offset: usize, value: u32);
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// Memory mapped register block of the peripheral identified by `Id`
pub struct Mmio<Id> {
    _id: PhantomData<Id>,
}

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the register block at `Id::ADDRESS`. Do not keep
    /// multiple instances for the same peripheral.
    pub unsafe fn new() -> Self {
        Self { _id: PhantomData }
    }

    fn cell(&self, offset: usize) -> &VolatileCell<u32> {
        debug_assert!(offset % 4 == 0 && offset < offset::BLOCK_SIZE);
        // Safety: `Id::ADDRESS` points to a valid register block by the contract of
        // `CanId`, and every offset used by the driver lies within it.
        unsafe { &*((Id::ADDRESS as *const u8).add(offset) as *const VolatileCell<u32>) }
    }
}

impl<Id: CanId> RegisterAccess for Mmio<Id> {
    fn read(&self, offset: usize) -> u32 {
        self.cell(offset).get()
    }

    fn write(&self, offset: usize, value: u32) {
        self.cell(offset).set(value)
    }
}

/// A register value type
pub trait RegisterValue: Copy {
    /// Wraps raw register bits
    fn from_bits(bits: u32) -> Self;
    /// Raw register bits
    fn bits(&self) -> u32;
}

/// Plain 32-bit registers without named fields (payload, bit masks)
impl RegisterValue for u32 {
    fn from_bits(bits: u32) -> Self {
        bits
    }

    fn bits(&self) -> u32 {
        *self
    }
}

/// A single register holding values of type `T`
pub struct Reg<'a, A, T> {
    access: &'a A,
    offset: usize,
    _value: PhantomData<T>,
}

impl<'a, A: RegisterAccess, T: RegisterValue> Reg<'a, A, T> {
    /// Byte offset of the register
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads the register
    pub fn read(&self) -> T {
        T::from_bits(self.access.read(self.offset))
    }

    /// Writes `value` to the register
    pub fn write(&self, value: T) {
        self.access.write(self.offset, value.bits())
    }

    /// Writes a value built from all-zero bits by `f`
    ///
    /// This is the way to touch write-1-to-clear flags without affecting the
    /// other flags of the register.
    pub fn write_with(&self, f: impl FnOnce(&mut T)) {
        let mut value = T::from_bits(0);
        f(&mut value);
        self.write(value);
    }

    /// Read-modify-write. `f` gets the value read and a copy of it to change.
    pub fn modify(&self, f: impl FnOnce(&T, &mut T)) {
        let read = self.read();
        let mut value = read;
        f(&read, &mut value);
        self.write(value);
    }
}

/// Typed view of the register block behind `A`
pub struct Registers<A> {
    access: A,
}

impl<A: RegisterAccess> Registers<A> {
    /// Wraps an access capability
    pub fn new(access: A) -> Self {
        Self { access }
    }

    /// The underlying access capability
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Gives back the access capability
    pub fn into_inner(self) -> A {
        self.access
    }

    fn reg<T: RegisterValue>(&self, offset: usize) -> Reg<'_, A, T> {
        Reg {
            access: &self.access,
            offset,
            _value: PhantomData,
        }
    }

    /// CAN_MCR
    pub fn mcr(&self) -> Reg<'_, A, Mcr> {
        self.reg(offset::MCR)
    }

    /// CAN_MSR
    pub fn msr(&self) -> Reg<'_, A, Msr> {
        self.reg(offset::MSR)
    }

    /// CAN_TSR
    pub fn tsr(&self) -> Reg<'_, A, Tsr> {
        self.reg(offset::TSR)
    }

    /// CAN_RF0R / CAN_RF1R
    pub fn rfr(&self, fifo: Fifo) -> Reg<'_, A, Rfr> {
        self.reg(offset::RF0R + 4 * fifo.index())
    }

    /// CAN_IER
    pub fn ier(&self) -> Reg<'_, A, crate::interrupt::InterruptSet> {
        self.reg(offset::IER)
    }

    /// CAN_ESR
    pub fn esr(&self) -> Reg<'_, A, Esr> {
        self.reg(offset::ESR)
    }

    /// CAN_BTR
    pub fn btr(&self) -> Reg<'_, A, Btr> {
        self.reg(offset::BTR)
    }

    fn tx_mailbox(mailbox: Mailbox, register: usize) -> usize {
        offset::TX_MAILBOX + offset::MAILBOX_STRIDE * mailbox.index() + register
    }

    fn rx_fifo(fifo: Fifo, register: usize) -> usize {
        offset::RX_FIFO + offset::MAILBOX_STRIDE * fifo.index() + register
    }

    /// CAN_TIxR
    pub fn tir(&self, mailbox: Mailbox) -> Reg<'_, A, IdReg> {
        self.reg(Self::tx_mailbox(mailbox, offset::MAILBOX_IR))
    }

    /// CAN_TDTxR
    pub fn tdtr(&self, mailbox: Mailbox) -> Reg<'_, A, Tdtr> {
        self.reg(Self::tx_mailbox(mailbox, offset::MAILBOX_DTR))
    }

    /// CAN_TDLxR
    pub fn tdlr(&self, mailbox: Mailbox) -> Reg<'_, A, u32> {
        self.reg(Self::tx_mailbox(mailbox, offset::MAILBOX_DLR))
    }

    /// CAN_TDHxR
    pub fn tdhr(&self, mailbox: Mailbox) -> Reg<'_, A, u32> {
        self.reg(Self::tx_mailbox(mailbox, offset::MAILBOX_DHR))
    }

    /// CAN_RIxR
    pub fn rir(&self, fifo: Fifo) -> Reg<'_, A, IdReg> {
        self.reg(Self::rx_fifo(fifo, offset::MAILBOX_IR))
    }

    /// CAN_RDTxR
    pub fn rdtr(&self, fifo: Fifo) -> Reg<'_, A, Rdtr> {
        self.reg(Self::rx_fifo(fifo, offset::MAILBOX_DTR))
    }

    /// CAN_RDLxR
    pub fn rdlr(&self, fifo: Fifo) -> Reg<'_, A, u32> {
        self.reg(Self::rx_fifo(fifo, offset::MAILBOX_DLR))
    }

    /// CAN_RDHxR
    pub fn rdhr(&self, fifo: Fifo) -> Reg<'_, A, u32> {
        self.reg(Self::rx_fifo(fifo, offset::MAILBOX_DHR))
    }

    /// CAN_FMR
    pub fn fmr(&self) -> Reg<'_, A, Fmr> {
        self.reg(offset::FMR)
    }

    /// CAN_FM1R, one bit per bank, set for list mode
    pub fn fm1r(&self) -> Reg<'_, A, u32> {
        self.reg(offset::FM1R)
    }

    /// CAN_FS1R, one bit per bank, set for 32-bit scale
    pub fn fs1r(&self) -> Reg<'_, A, u32> {
        self.reg(offset::FS1R)
    }

    /// CAN_FFA1R, one bit per bank, set for FIFO 1
    pub fn ffa1r(&self) -> Reg<'_, A, u32> {
        self.reg(offset::FFA1R)
    }

    /// CAN_FA1R, one bit per bank, set when active
    pub fn fa1r(&self) -> Reg<'_, A, u32> {
        self.reg(offset::FA1R)
    }

    /// CAN_FiR1 of `bank`
    pub fn fr1(&self, bank: u8) -> Reg<'_, A, u32> {
        self.reg(offset::FILTER_BANK + offset::FILTER_BANK_STRIDE * usize::from(bank))
    }

    /// CAN_FiR2 of `bank`
    pub fn fr2(&self, bank: u8) -> Reg<'_, A, u32> {
        self.reg(offset::FILTER_BANK + offset::FILTER_BANK_STRIDE * usize::from(bank) + 4)
    }
}
