//! Field layouts of the control and status registers
use super::RegisterValue;
use crate::tx_mailbox::Mailbox;
use bitfield::bitfield;

macro_rules! impl_register_value {
    ($($ty:ident),*) => {
        $(
            impl RegisterValue for $ty {
                fn from_bits(bits: u32) -> Self {
                    Self(bits)
                }

                fn bits(&self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

impl_register_value!(Mcr, Msr, Tsr, Rfr, Esr, Btr, IdReg, Tdtr, Rdtr, Fmr);

bitfield! {
    /// CAN_MCR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Mcr(u32);
    impl Debug;
    /// Debug freeze
    pub dbf, set_dbf: 16;
    /// Software master reset
    pub reset, set_reset: 15;
    /// Time triggered communication mode
    pub ttcm, set_ttcm: 7;
    /// Automatic bus-off management
    pub abom, set_abom: 6;
    /// Automatic wakeup mode
    pub awum, set_awum: 5;
    /// No automatic retransmission
    pub nart, set_nart: 4;
    /// Receive FIFO locked mode
    pub rflm, set_rflm: 3;
    /// Transmit FIFO priority (by request order instead of identifier)
    pub txfp, set_txfp: 2;
    /// Sleep mode request
    pub sleep, set_sleep: 1;
    /// Initialization request
    pub inrq, set_inrq: 0;
}

bitfield! {
    /// CAN_MSR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Msr(u32);
    impl Debug;
    /// Level of the RX pin
    pub rx, set_rx: 11;
    /// Last sample point
    pub samp, set_samp: 10;
    /// Receive mode
    pub rxm, set_rxm: 9;
    /// Transmit mode
    pub txm, set_txm: 8;
    /// Sleep acknowledge interrupt (write 1 to clear)
    pub slaki, set_slaki: 4;
    /// Wakeup interrupt (write 1 to clear)
    pub wkui, set_wkui: 3;
    /// Error interrupt (write 1 to clear)
    pub erri, set_erri: 2;
    /// Sleep acknowledge
    pub slak, set_slak: 1;
    /// Initialization acknowledge
    pub inak, set_inak: 0;
}

bitfield! {
    /// CAN_TSR
    ///
    /// Per-mailbox flags are reached through the methods taking a
    /// [`Mailbox`].
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Tsr(u32);
    impl Debug;
    /// Next empty mailbox, or the lowest priority pending one if all are full
    pub u8, code, set_code: 25, 24;
}

macro_rules! mailbox_flags {
    ($($(#[$meta:meta])* $get:ident, $set:ident: $base:literal, $stride:literal;)*) => {
        impl Tsr {
            $(
                $(#[$meta])*
                pub fn $get(&self, mailbox: Mailbox) -> bool {
                    self.0 & (1_u32 << ($base + $stride * mailbox.index())) != 0
                }

                #[doc = concat!("Changes [`Self::", stringify!($get), "`]")]
                pub fn $set(&mut self, mailbox: Mailbox, value: bool) {
                    let mask = 1_u32 << ($base + $stride * mailbox.index());
                    if value {
                        self.0 |= mask;
                    } else {
                        self.0 &= !mask;
                    }
                }
            )*
        }
    };
}

mailbox_flags! {
    /// Lowest priority pending mailbox
    low, set_low: 29, 1;
    /// Mailbox is empty
    tme, set_tme: 26, 1;
    /// Abort request
    abrq, set_abrq: 7, 8;
    /// Transmission error
    terr, set_terr: 3, 8;
    /// Arbitration lost
    alst, set_alst: 2, 8;
    /// Transmission succeeded
    txok, set_txok: 1, 8;
    /// Request completed (write 1 to clear all four status flags)
    rqcp, set_rqcp: 0, 8;
}

bitfield! {
    /// CAN_RF0R / CAN_RF1R
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Rfr(u32);
    impl Debug;
    /// Release the output mailbox
    pub rfom, set_rfom: 5;
    /// Overrun (write 1 to clear)
    pub fovr, set_fovr: 4;
    /// Full (write 1 to clear)
    pub full, set_full: 3;
    /// Number of pending messages
    pub u8, fmp, set_fmp: 1, 0;
}

bitfield! {
    /// CAN_ESR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Esr(u32);
    impl Debug;
    /// Receive error counter
    pub u8, rec, set_rec: 31, 24;
    /// Transmit error counter
    pub u8, tec, set_tec: 23, 16;
    /// Last error code
    pub u8, lec, set_lec: 6, 4;
    /// Bus-off
    pub boff, set_boff: 2;
    /// Error passive
    pub epvf, set_epvf: 1;
    /// Error warning
    pub ewgf, set_ewgf: 0;
}

bitfield! {
    /// CAN_BTR
    ///
    /// Segment and prescaler fields hold the value minus one.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Btr(u32);
    impl Debug;
    /// Silent mode
    pub silm, set_silm: 31;
    /// Loop back mode
    pub lbkm, set_lbkm: 30;
    /// Resynchronization jump width
    pub u8, sjw, set_sjw: 25, 24;
    /// Time segment 2
    pub u8, ts2, set_ts2: 22, 20;
    /// Time segment 1
    pub u8, ts1, set_ts1: 19, 16;
    /// Baud rate prescaler
    pub u16, brp, set_brp: 9, 0;
}

bitfield! {
    /// Identifier word as used by CAN_TIxR, CAN_RIxR and the 32-bit filters
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct IdReg(u32);
    impl Debug;
    /// Standard identifier, or the upper 11 bits of an extended one
    pub u16, stid, set_stid: 31, 21;
    /// Lower 18 bits of an extended identifier
    pub u32, exid, set_exid: 20, 3;
    /// Extended identifier
    pub ide, set_ide: 2;
    /// Remote transmission request
    pub rtr, set_rtr: 1;
    /// Transmit request (transmit mailboxes only)
    pub txrq, set_txrq: 0;
}

bitfield! {
    /// CAN_TDTxR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Tdtr(u32);
    impl Debug;
    /// Time stamp captured at start of frame
    pub u16, time, set_time: 31, 16;
    /// Transmit the time stamp in the last two data bytes
    pub tgt, set_tgt: 8;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
}

bitfield! {
    /// CAN_RDTxR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Rdtr(u32);
    impl Debug;
    /// Time stamp captured at start of frame
    pub u16, time, set_time: 31, 16;
    /// Index of the filter the frame matched
    pub u8, fmi, set_fmi: 15, 8;
    /// Data length code
    pub u8, dlc, set_dlc: 3, 0;
}

bitfield! {
    /// CAN_FMR
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Fmr(u32);
    impl Debug;
    /// First filter bank assigned to the secondary controller
    pub u8, can2sb, set_can2sb: 13, 8;
    /// Filter initialization mode
    pub finit, set_finit: 0;
}
