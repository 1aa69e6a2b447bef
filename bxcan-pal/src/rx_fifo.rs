//! Receive FIFOs
//!
//! Each FIFO holds up to three frames. Only the oldest one is visible in the
//! FIFO output mailbox; releasing it exposes the next.

use crate::bus::{Can, OutOfBounds};
use crate::message::{unpack_payload, Frame, Mobid};
use crate::reg::RegisterAccess;
use bxcan_pal_core::{CanId, Dependencies};
use core::convert::Infallible;

/// Receive FIFO index
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fifo {
    /// FIFO 0
    Fifo0 = 0,
    /// FIFO 1
    Fifo1 = 1,
}

impl Fifo {
    /// Both FIFOs in index order
    pub const ALL: [Self; 2] = [Self::Fifo0, Self::Fifo1];

    /// Index of the FIFO
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Fifo {
    type Error = OutOfBounds;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(usize::from(value)).copied().ok_or(OutOfBounds)
    }
}

/// A frame read from a FIFO output mailbox
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReceivedFrame {
    /// The frame itself
    pub frame: Frame,
    /// Index of the filter that accepted the frame
    pub filter_index: u8,
    /// Time stamp captured at start of frame
    pub timestamp: u16,
}

impl<Id: CanId, D: Dependencies<Id>, A: RegisterAccess> Can<Id, D, A> {
    /// Read the oldest frame of `fifo`, releasing it if `release` is set.
    ///
    /// The pending count is not checked; on an empty FIFO the content of the
    /// output mailbox is returned as is. Without `release` the same frame is
    /// read again by the next call.
    pub fn receive(&mut self, fifo: Fifo, release: bool) -> ReceivedFrame {
        let (dlc, data) = self.read_fifo_data(fifo);
        let rdtr = self.regs().rdtr(fifo).read();
        let received = ReceivedFrame {
            frame: Frame::from_parts(self.fifo_id(fifo), dlc, data),
            filter_index: rdtr.fmi(),
            timestamp: rdtr.time(),
        };
        if release {
            self.release_fifo(fifo);
        }
        received
    }

    /// Release the oldest frame of `fifo`
    pub fn release_fifo(&mut self, fifo: Fifo) {
        self.regs().rfr(fifo).write_with(|w| w.set_rfom(true));
    }

    /// Number of frames waiting in `fifo`
    pub fn pending(&self, fifo: Fifo) -> u8 {
        self.regs().rfr(fifo).read().fmp()
    }

    /// Identifier of the oldest frame of `fifo`
    pub fn fifo_id(&self, fifo: Fifo) -> Mobid {
        Mobid::from_id_register(self.regs().rir(fifo).read())
    }

    /// Index of the filter that accepted the oldest frame of `fifo`
    pub fn fifo_filter_index(&self, fifo: Fifo) -> u8 {
        self.regs().rdtr(fifo).read().fmi()
    }

    /// Time stamp of the oldest frame of `fifo`
    pub fn fifo_timestamp(&self, fifo: Fifo) -> u16 {
        self.regs().rdtr(fifo).read().time()
    }

    /// Data length code and payload of the oldest frame of `fifo`
    pub fn read_fifo_data(&self, fifo: Fifo) -> (u8, [u8; 8]) {
        let regs = self.regs();
        let dlc = regs.rdtr(fifo).read().dlc();
        let data = unpack_payload(regs.rdlr(fifo).read(), regs.rdhr(fifo).read());
        (dlc, data)
    }

    /// `true` when `fifo` holds three frames
    pub fn fifo_full(&self, fifo: Fifo) -> bool {
        self.regs().rfr(fifo).read().full()
    }

    /// `true` when a frame was lost because `fifo` was full
    pub fn fifo_overrun(&self, fifo: Fifo) -> bool {
        self.regs().rfr(fifo).read().fovr()
    }

    /// Takes the oldest frame out of `fifo`.
    /// Fails with [`nb::Error::WouldBlock`] if the FIFO is empty.
    pub fn receive_frame(&mut self, fifo: Fifo) -> nb::Result<ReceivedFrame, Infallible> {
        if self.pending(fifo) == 0 {
            return Err(nb::Error::WouldBlock);
        }
        Ok(self.receive(fifo, true))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reg::offset;
    use crate::reg::sim::fixture::bus;
    use crate::reg::sim::SimulatedRegisters;

    fn frame(id: Mobid, data: &[u8]) -> Frame {
        let mut payload = [0; 8];
        payload[..data.len()].copy_from_slice(data);
        Frame::from_parts(id, data.len() as u8, payload)
    }

    #[test]
    fn receive_without_release_peeks() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        let sent = frame(Mobid::extended(0x155, 0x2AAAA), &[1, 2, 3, 4]);
        sim.deliver(Fifo::Fifo0, &sent, 5, 0x1234);

        let first = can.receive(Fifo::Fifo0, false);
        assert_eq!(first.frame, sent);
        assert_eq!(first.filter_index, 5);
        assert_eq!(first.timestamp, 0x1234);
        assert_eq!(can.pending(Fifo::Fifo0), 1);

        assert_eq!(can.receive(Fifo::Fifo0, true), first);
        assert_eq!(can.pending(Fifo::Fifo0), 0);
    }

    #[test]
    fn release_advances_to_next_frame() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        sim.deliver(Fifo::Fifo1, &frame(Mobid::standard(1), &[1]), 0, 0);
        sim.deliver(Fifo::Fifo1, &frame(Mobid::standard_remote(2), &[]), 3, 0);
        assert_eq!(can.fifo_id(Fifo::Fifo1), Mobid::standard(1));
        can.release_fifo(Fifo::Fifo1);
        assert_eq!(can.fifo_id(Fifo::Fifo1), Mobid::standard_remote(2));
        assert_eq!(can.fifo_filter_index(Fifo::Fifo1), 3);
        assert_eq!(can.pending(Fifo::Fifo0), 0);
    }

    #[test]
    fn receive_frame_on_empty_fifo_would_block() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        assert_eq!(can.receive_frame(Fifo::Fifo0), Err(nb::Error::WouldBlock));
        sim.deliver(Fifo::Fifo0, &frame(Mobid::standard(9), &[9; 8]), 0, 7);
        let received = can.receive_frame(Fifo::Fifo0).unwrap();
        assert_eq!(received.frame.mobid(), Mobid::standard(9));
        assert_eq!(received.timestamp, 7);
        assert_eq!(can.receive_frame(Fifo::Fifo0), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn overrun_is_reported() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        for i in 0..3 {
            assert!(sim.deliver(Fifo::Fifo0, &frame(Mobid::standard(i), &[]), 0, 0));
        }
        assert!(can.fifo_full(Fifo::Fifo0));
        assert!(!can.fifo_overrun(Fifo::Fifo0));
        assert!(!sim.deliver(Fifo::Fifo0, &frame(Mobid::standard(3), &[]), 0, 0));
        assert!(can.fifo_overrun(Fifo::Fifo0));
        assert_eq!(can.pending(Fifo::Fifo0), 3);
    }

    #[test]
    fn release_does_not_clear_status_flags() {
        let sim = SimulatedRegisters::new();
        let mut can = bus(&sim);
        for i in 0..4 {
            sim.deliver(Fifo::Fifo0, &frame(Mobid::standard(i), &[]), 0, 0);
        }
        can.release_fifo(Fifo::Fifo0);
        assert!(can.fifo_full(Fifo::Fifo0));
        assert!(can.fifo_overrun(Fifo::Fifo0));
        assert_eq!(sim.peek(offset::RF0R) & 0b11, 2);
    }
}
