//! Transmit mailboxes
//!
//! The controller has three mailboxes. A mailbox is empty (TME) until a
//! transmission is requested and becomes empty again when the request
//! completes or is aborted. While pending, its registers are write protected.
//! With more than one pending mailbox the controller sends the one with the
//! highest priority identifier first, unless
//! [`Can::set_tx_priority_by_request`](crate::bus::Can::set_tx_priority_by_request)
//! is enabled.

use crate::bus::{Can, OutOfBounds};
use crate::message::{pack_payload, unpack_payload, Frame, Mobid};
use crate::reg::RegisterAccess;
use bxcan_pal_core::{CanId, Dependencies};
use core::cmp::min;
use core::convert::Infallible;

/// Transmit mailbox index
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mailbox {
    /// Mailbox 0
    Mailbox0 = 0,
    /// Mailbox 1
    Mailbox1 = 1,
    /// Mailbox 2
    Mailbox2 = 2,
}

impl Mailbox {
    /// All mailboxes in index order
    pub const ALL: [Self; 3] = [Self::Mailbox0, Self::Mailbox1, Self::Mailbox2];

    /// Index of the mailbox
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Mailbox {
    type Error = OutOfBounds;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(OutOfBounds)
    }
}

/// State of a mailbox as reported by CAN_TSR
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitStatus {
    /// Empty, no completed request to report
    Idle,
    /// Transmission requested and not finished
    Pending,
    /// Last request was sent successfully
    Succeeded,
    /// Last request lost arbitration
    ArbitrationLost,
    /// Last request ended with a transmission error
    Failed,
    /// Last request was aborted before it was sent
    Aborted,
}

impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> Can<Id, D, A> {
    /// `true` if at least one mailbox is empty
    pub fn mailbox_is_available(&self) -> bool {
        let tsr = self.regs().tsr().read();
        Mailbox::ALL.into_iter().any(|mailbox| tsr.tme(mailbox))
    }

    /// `true` if `mailbox` is empty
    pub fn mailbox_is_empty(&self, mailbox: Mailbox) -> bool {
        self.regs().tsr().read().tme(mailbox)
    }

    /// The mailbox reported by CAN_TSR.CODE
    ///
    /// This is the next empty mailbox, or the lowest priority pending one if
    /// all are full.
    pub fn lowest_priority_mailbox(&self) -> Option<Mailbox> {
        Mailbox::try_from(self.regs().tsr().read().code()).ok()
    }

    /// Store the identifier of the frame in `mailbox`
    ///
    /// Clears the transmit request bit; the mailbox must be empty.
    pub fn set_mailbox_id(&mut self, mailbox: Mailbox, id: Mobid) {
        self.regs().tir(mailbox).write(id.to_id_register());
    }

    /// Identifier stored in `mailbox`
    pub fn mailbox_id(&self, mailbox: Mailbox) -> Mobid {
        Mobid::from_id_register(self.regs().tir(mailbox).read())
    }

    /// Store the payload of the frame in `mailbox`
    ///
    /// The data length code is `data.len()` truncated to 4 bits, and at most
    /// eight bytes are copied. Missing bytes are sent as zero.
    pub fn write_mailbox_data(&mut self, mailbox: Mailbox, data: &[u8]) {
        let mut payload = [0; 8];
        let len = min(data.len(), payload.len());
        payload[..len].copy_from_slice(&data[..len]);

        let regs = self.regs();
        regs.tdtr(mailbox)
            .modify(|_, w| w.set_dlc((data.len() & 0xF) as u8));
        let (low, high) = pack_payload(&payload);
        regs.tdlr(mailbox).write(low);
        regs.tdhr(mailbox).write(high);
    }

    /// Data length code and payload stored in `mailbox`
    pub fn read_mailbox_data(&self, mailbox: Mailbox) -> (u8, [u8; 8]) {
        let regs = self.regs();
        let dlc = regs.tdtr(mailbox).read().dlc();
        let data = unpack_payload(regs.tdlr(mailbox).read(), regs.tdhr(mailbox).read());
        (dlc, data)
    }

    /// Send the time stamp in the last two data bytes of the frame in
    /// `mailbox`. Requires time triggered communication mode and a data
    /// length of 8.
    pub fn set_transmit_time(&mut self, mailbox: Mailbox, enable: bool) {
        self.regs().tdtr(mailbox).modify(|_, w| w.set_tgt(enable));
    }

    /// Hand `mailbox` over to the controller
    pub fn request_transmission(&mut self, mailbox: Mailbox) {
        self.regs().tir(mailbox).modify(|_, w| w.set_txrq(true));
    }

    /// Time stamp captured when the frame in `mailbox` was sent
    pub fn mailbox_timestamp(&self, mailbox: Mailbox) -> u16 {
        self.regs().tdtr(mailbox).read().time()
    }

    /// Outcome of the last request for `mailbox`
    pub fn transmit_status(&self, mailbox: Mailbox) -> TransmitStatus {
        let tsr = self.regs().tsr().read();
        if !tsr.tme(mailbox) {
            TransmitStatus::Pending
        } else if !tsr.rqcp(mailbox) {
            TransmitStatus::Idle
        } else if tsr.txok(mailbox) {
            TransmitStatus::Succeeded
        } else if tsr.alst(mailbox) {
            TransmitStatus::ArbitrationLost
        } else if tsr.terr(mailbox) {
            TransmitStatus::Failed
        } else {
            TransmitStatus::Aborted
        }
    }

    /// Request to abort the pending transmission in `mailbox`. A frame that
    /// is already on the bus is finished first.
    pub fn abort(&mut self, mailbox: Mailbox) {
        self.regs().tsr().write_with(|w| w.set_abrq(mailbox, true));
    }

    /// The mailbox a new frame goes into, read without writing anything
    fn empty_mailbox(&self) -> nb::Result<Mailbox, Infallible> {
        let tsr = self.regs().tsr().read();
        if !Mailbox::ALL.into_iter().any(|mailbox| tsr.tme(mailbox)) {
            return Err(nb::Error::WouldBlock);
        }
        Mailbox::try_from(tsr.code()).map_err(|_| nb::Error::WouldBlock)
    }

    /// Puts a frame in an empty mailbox and requests its transmission.
    ///
    /// Returns the mailbox used. Fails with [`nb::Error::WouldBlock`] without
    /// touching any mailbox if all three are pending. See
    /// [`Self::write_mailbox_data`] for the handling of `data`.
    pub fn transmit(&mut self, id: Mobid, data: &[u8]) -> nb::Result<Mailbox, Infallible> {
        let mailbox = self.empty_mailbox()?;
        self.set_mailbox_id(mailbox, id);
        self.write_mailbox_data(mailbox, data);
        self.request_transmission(mailbox);
        Ok(mailbox)
    }

    /// Like [`Self::transmit`], taking a [`Frame`]
    ///
    /// Remote frames carry their data length code but no payload.
    pub fn transmit_frame(&mut self, frame: &Frame) -> nb::Result<Mailbox, Infallible> {
        use embedded_can::Frame as _;

        let mailbox = self.empty_mailbox()?;
        self.set_mailbox_id(mailbox, frame.mobid());
        let data = frame.raw_data();
        self.write_mailbox_data(mailbox, &data[..min(frame.dlc(), data.len())]);
        if frame.dlc() > data.len() {
            self.regs()
                .tdtr(mailbox)
                .modify(|_, w| w.set_dlc(frame.dlc() as u8));
        }
        self.request_transmission(mailbox);
        Ok(mailbox)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reg::offset;
    use crate::reg::sim::fixture::bus;
    use crate::reg::sim::{Outcome, SimulatedRegisters};

    #[test]
    fn mailbox_index_conversion() {
        assert_eq!(Mailbox::try_from(2), Ok(Mailbox::Mailbox2));
        assert_eq!(Mailbox::try_from(3), Err(OutOfBounds));
        assert_eq!(Mailbox::Mailbox1.index(), 1);
    }

    #[test]
    fn full_payload_round_trip() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x23, 0x45, 0x67];
        can.write_mailbox_data(Mailbox::Mailbox1, &data);
        assert_eq!(can.read_mailbox_data(Mailbox::Mailbox1), (8, data));
    }

    #[test]
    fn short_payload_round_trip() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.write_mailbox_data(Mailbox::Mailbox0, &[7, 8, 9]);
        let (dlc, data) = can.read_mailbox_data(Mailbox::Mailbox0);
        assert_eq!(dlc, 3);
        assert_eq!(&data[..3], &[7, 8, 9]);
    }

    #[test]
    fn oversized_payload_truncates_length() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let data = [0x55; 17];
        can.write_mailbox_data(Mailbox::Mailbox0, &data);
        assert_eq!(can.read_mailbox_data(Mailbox::Mailbox0), (1, [0x55; 8]));
    }

    #[test]
    fn transmit_fills_mailboxes_in_order() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let id = Mobid::extended(0x12, 0x345);
        assert_eq!(can.transmit(id, &[1]), Ok(Mailbox::Mailbox0));
        assert_eq!(can.transmit(id, &[2]), Ok(Mailbox::Mailbox1));
        assert_eq!(can.transmit(id, &[3]), Ok(Mailbox::Mailbox2));
        assert_eq!(can.mailbox_id(Mailbox::Mailbox1), id);
        assert_eq!(can.transmit_status(Mailbox::Mailbox2), TransmitStatus::Pending);
        assert_eq!(sim.peek(offset::TX_MAILBOX) & 1, 1);
    }

    #[test]
    fn transmit_without_empty_mailbox_writes_nothing() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        for _ in 0..3 {
            can.transmit(Mobid::standard(0x100), &[0; 8]).unwrap();
        }
        let writes = sim.writes();
        assert!(!can.mailbox_is_available());
        assert_eq!(
            can.transmit(Mobid::standard(0x101), &[1; 8]),
            Err(nb::Error::WouldBlock)
        );
        assert_eq!(sim.writes(), writes);
    }

    #[test]
    fn transmit_frame_without_empty_mailbox_writes_nothing() {
        use embedded_can::{Frame as _, StandardId};

        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let frame = Frame::new(StandardId::new(0x42).unwrap(), &[1, 2]).unwrap();
        for _ in 0..3 {
            can.transmit_frame(&frame).unwrap();
        }
        let writes = sim.writes();
        assert_eq!(can.transmit_frame(&frame), Err(nb::Error::WouldBlock));
        assert_eq!(sim.writes(), writes);
    }

    #[test]
    fn completed_mailbox_is_reused() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        for _ in 0..3 {
            can.transmit(Mobid::standard(0x100), &[]).unwrap();
        }
        sim.complete_transmission(Mailbox::Mailbox1, Outcome::Success);
        assert_eq!(can.transmit_status(Mailbox::Mailbox1), TransmitStatus::Succeeded);
        assert_eq!(can.lowest_priority_mailbox(), Some(Mailbox::Mailbox1));
        assert_eq!(
            can.transmit(Mobid::standard(0x200), &[4, 5]),
            Ok(Mailbox::Mailbox1)
        );
        assert_eq!(can.mailbox_id(Mailbox::Mailbox1), Mobid::standard(0x200));
    }

    #[test]
    fn transmit_outcomes_are_decoded() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        assert_eq!(can.transmit_status(Mailbox::Mailbox0), TransmitStatus::Idle);
        for _ in 0..3 {
            can.transmit(Mobid::standard(1), &[]).unwrap();
        }
        sim.complete_transmission(Mailbox::Mailbox0, Outcome::ArbitrationLost);
        sim.complete_transmission(Mailbox::Mailbox1, Outcome::Error);
        assert_eq!(
            can.transmit_status(Mailbox::Mailbox0),
            TransmitStatus::ArbitrationLost
        );
        assert_eq!(can.transmit_status(Mailbox::Mailbox1), TransmitStatus::Failed);
        can.abort(Mailbox::Mailbox2);
        assert_eq!(can.transmit_status(Mailbox::Mailbox2), TransmitStatus::Aborted);
        assert!(can.mailbox_is_empty(Mailbox::Mailbox2));
    }

    #[test]
    fn abort_leaves_other_flags_alone() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.transmit(Mobid::standard(1), &[]).unwrap();
        can.transmit(Mobid::standard(2), &[]).unwrap();
        sim.complete_transmission(Mailbox::Mailbox0, Outcome::Success);
        can.abort(Mailbox::Mailbox1);
        assert_eq!(can.transmit_status(Mailbox::Mailbox0), TransmitStatus::Succeeded);
        assert_eq!(can.transmit_status(Mailbox::Mailbox1), TransmitStatus::Aborted);
    }

    #[test]
    fn transmit_time_flag() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        can.write_mailbox_data(Mailbox::Mailbox2, &[0; 8]);
        can.set_transmit_time(Mailbox::Mailbox2, true);
        assert_eq!(
            sim.peek(offset::TX_MAILBOX + 2 * offset::MAILBOX_STRIDE + offset::MAILBOX_DTR),
            1 << 8 | 8
        );
        assert_eq!(can.mailbox_timestamp(Mailbox::Mailbox2), 0);
    }

    #[test]
    fn remote_frame_keeps_length() {
        use embedded_can::{Frame as _, StandardId};

        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let frame = Frame::new_remote(StandardId::new(0x7).unwrap(), 6).unwrap();
        assert_eq!(can.transmit_frame(&frame), Ok(Mailbox::Mailbox0));
        assert_eq!(can.read_mailbox_data(Mailbox::Mailbox0).0, 6);
        assert_eq!(can.mailbox_id(Mailbox::Mailbox0), Mobid::standard_remote(0x7));
    }
}
