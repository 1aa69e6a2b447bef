//! Acceptance filter banks
//!
//! The filter banks are shared by the primary and the secondary controller
//! and only reachable through the primary one, see
//! [`FilterOwner`](bxcan_pal_core::FilterOwner). Banks below the secondary
//! start index belong to the primary controller.
//!
//! A bank is either one 32-bit filter or two 16-bit filters, used as
//! identifier lists or as identifier/mask pairs. A mask bit set to 1 means the
//! identifier bit must match.
//!
//! Content, scale, mode and FIFO assignment of a bank must only be changed
//! while the bank is inactive and the filters are in initialization mode
//! ([`Filters::init_enter`]). The typed setters below deactivate and
//! reactivate the bank themselves; entering filter initialization mode is
//! left to the caller.

use crate::bus::{Can, OutOfBounds};
use crate::message::Mobid;
use crate::reg::{Reg, RegisterAccess, Registers};
use crate::rx_fifo::Fifo;
use bxcan_pal_core::{Dependencies, FilterOwner};

/// Width of the filters in a bank
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterScale {
    /// Two 16-bit filters
    Dual16,
    /// One 32-bit filter
    Single32,
}

/// Interpretation of the two filter registers of a bank
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterMode {
    /// Identifier and mask
    Mask,
    /// List of identifiers
    List,
}

/// Raw configuration of one filter bank
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterBankConfig {
    /// Filter width
    pub scale: FilterScale,
    /// Mask or list mode
    pub mode: FilterMode,
    /// FIFO receiving the accepted frames
    pub fifo: Fifo,
    /// Content of CAN_FiR1
    pub fr1: u32,
    /// Content of CAN_FiR2
    pub fr2: u32,
    /// Bank is active
    pub enabled: bool,
}

/// Combines two 16-bit filter encodings into one register word
fn pair16(low: Mobid, high: Mobid) -> u32 {
    low.filter16() | high.filter16() << 16
}

/// Access to the filter banks
pub struct Filters<'a, A> {
    regs: &'a Registers<A>,
    banks: u8,
}

impl<Id: FilterOwner, D: Dependencies<Id>, A: RegisterAccess> Can<Id, D, A> {
    /// Access the filter banks
    pub fn filters(&mut self) -> Filters<'_, A> {
        Filters {
            regs: self.regs(),
            banks: Id::NUM_FILTER_BANKS,
        }
    }
}

impl<'a, A: RegisterAccess> Filters<'a, A> {
    /// Number of filter banks
    pub fn len(&self) -> u8 {
        self.banks
    }

    /// `true` if the controller has no filter banks
    pub fn is_empty(&self) -> bool {
        self.banks == 0
    }

    fn check(&self, bank: u8) -> Result<u32, OutOfBounds> {
        if bank >= self.banks {
            return Err(OutOfBounds);
        }
        // The bank bitmaps are single 32-bit registers.
        1u32.checked_shl(bank.into()).ok_or(OutOfBounds)
    }

    /// Enter filter initialization mode. Reception is stopped for all
    /// filter banks of both controllers.
    pub fn init_enter(&mut self) {
        self.regs.fmr().modify(|_, w| w.set_finit(true));
    }

    /// Leave filter initialization mode
    pub fn init_leave(&mut self) {
        self.regs.fmr().modify(|_, w| w.set_finit(false));
    }

    /// `true` in filter initialization mode
    pub fn is_init(&self) -> bool {
        self.regs.fmr().read().finit()
    }

    /// Assign the banks from `start` on to the secondary controller.
    ///
    /// `start` may equal the number of banks, leaving none to the secondary
    /// controller. Requires filter initialization mode.
    pub fn set_secondary_start(&mut self, start: u8) -> Result<(), OutOfBounds> {
        if start > self.banks {
            return Err(OutOfBounds);
        }
        self.regs.fmr().modify(|_, w| w.set_can2sb(start));
        Ok(())
    }

    /// First bank assigned to the secondary controller
    pub fn secondary_start(&self) -> u8 {
        self.regs.fmr().read().can2sb()
    }

    /// Activate `bank`
    pub fn enable(&mut self, bank: u8) -> Result<(), OutOfBounds> {
        let bit = self.check(bank)?;
        self.regs.fa1r().modify(|r, w| *w = r | bit);
        Ok(())
    }

    /// Deactivate `bank`
    pub fn disable(&mut self, bank: u8) -> Result<(), OutOfBounds> {
        let bit = self.check(bank)?;
        self.regs.fa1r().modify(|r, w| *w = r & !bit);
        Ok(())
    }

    /// `true` if `bank` is active
    pub fn is_enabled(&self, bank: u8) -> Result<bool, OutOfBounds> {
        let bit = self.check(bank)?;
        Ok(self.regs.fa1r().read() & bit != 0)
    }

    fn set_bit(register: Reg<'_, A, u32>, bit: u32, value: bool) {
        register.modify(|r, w| *w = if value { r | bit } else { r & !bit });
    }

    /// Program and activate `bank`: deactivate, scale, mode, content, FIFO,
    /// activate.
    fn set(
        &mut self,
        bank: u8,
        scale: FilterScale,
        mode: FilterMode,
        fr1: u32,
        fr2: u32,
        fifo: Fifo,
    ) -> Result<(), OutOfBounds> {
        let bit = self.check(bank)?;
        let regs = self.regs;
        Self::set_bit(regs.fa1r(), bit, false);
        Self::set_bit(regs.fs1r(), bit, scale == FilterScale::Single32);
        Self::set_bit(regs.fm1r(), bit, mode == FilterMode::List);
        regs.fr1(bank).write(fr1);
        regs.fr2(bank).write(fr2);
        Self::set_bit(regs.ffa1r(), bit, fifo == Fifo::Fifo1);
        Self::set_bit(regs.fa1r(), bit, true);
        Ok(())
    }

    /// Accept exactly the identifiers `id1` and `id2` into `fifo`
    pub fn set_list32(
        &mut self,
        bank: u8,
        fifo: Fifo,
        id1: Mobid,
        id2: Mobid,
    ) -> Result<(), OutOfBounds> {
        self.set(
            bank,
            FilterScale::Single32,
            FilterMode::List,
            id1.filter32(),
            id2.filter32(),
            fifo,
        )
    }

    /// Accept exactly the four identifiers `ids` into `fifo`
    ///
    /// The 16-bit encoding only holds the three upper bits of an extension.
    pub fn set_list16(&mut self, bank: u8, fifo: Fifo, ids: [Mobid; 4]) -> Result<(), OutOfBounds> {
        self.set(
            bank,
            FilterScale::Dual16,
            FilterMode::List,
            pair16(ids[0], ids[1]),
            pair16(ids[2], ids[3]),
            fifo,
        )
    }

    /// Accept the identifiers matching `id` on the bits set in `mask`
    pub fn set_mask32(
        &mut self,
        bank: u8,
        fifo: Fifo,
        id: Mobid,
        mask: Mobid,
    ) -> Result<(), OutOfBounds> {
        self.set(
            bank,
            FilterScale::Single32,
            FilterMode::Mask,
            id.filter32(),
            mask.filter32(),
            fifo,
        )
    }

    /// Accept the identifiers matching either of two identifier/mask pairs
    pub fn set_mask16(
        &mut self,
        bank: u8,
        fifo: Fifo,
        first: (Mobid, Mobid),
        second: (Mobid, Mobid),
    ) -> Result<(), OutOfBounds> {
        self.set(
            bank,
            FilterScale::Dual16,
            FilterMode::Mask,
            pair16(first.0, first.1),
            pair16(second.0, second.1),
            fifo,
        )
    }

    /// Apply a raw bank configuration, entering and leaving filter
    /// initialization mode around it.
    ///
    /// A bank with `enabled == false` is programmed and left inactive.
    pub fn configure(&mut self, bank: u8, config: &FilterBankConfig) -> Result<(), OutOfBounds> {
        self.check(bank)?;
        self.init_enter();
        let result = self.set(
            bank,
            config.scale,
            config.mode,
            config.fr1,
            config.fr2,
            config.fifo,
        );
        if !config.enabled {
            self.disable(bank)?;
        }
        self.init_leave();
        #[cfg(feature = "defmt")]
        defmt::debug!("bxcan: filter bank {=u8} configured", bank);
        result
    }

    /// Configuration currently stored for `bank`
    pub fn bank(&self, bank: u8) -> Result<FilterBankConfig, OutOfBounds> {
        let bit = self.check(bank)?;
        let regs = self.regs;
        Ok(FilterBankConfig {
            scale: if regs.fs1r().read() & bit != 0 {
                FilterScale::Single32
            } else {
                FilterScale::Dual16
            },
            mode: if regs.fm1r().read() & bit != 0 {
                FilterMode::List
            } else {
                FilterMode::Mask
            },
            fifo: if regs.ffa1r().read() & bit != 0 {
                Fifo::Fifo1
            } else {
                Fifo::Fifo0
            },
            fr1: regs.fr1(bank).read(),
            fr2: regs.fr2(bank).read(),
            enabled: regs.fa1r().read() & bit != 0,
        })
    }
}
