use super::Mobid;
use core::cmp::min;
use embedded_can::Id;

/// Classic CAN frame with up to 8 data bytes
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    id: Mobid,
    dlc: u8,
    data: [u8; 8],
}

impl Frame {
    /// Assembles a frame from its raw parts. `dlc` is truncated to the 4-bit
    /// field of the hardware.
    pub fn from_parts(id: Mobid, dlc: u8, data: [u8; 8]) -> Self {
        Self {
            id,
            dlc: dlc & 0xF,
            data,
        }
    }

    /// Packed identifier of the frame
    pub fn mobid(&self) -> Mobid {
        self.id
    }

    /// All eight payload bytes, including those beyond the data length
    pub fn raw_data(&self) -> &[u8; 8] {
        &self.data
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut payload = [0; 8];
        payload[..data.len()].copy_from_slice(data);
        Some(Self {
            id: Mobid::from(id.into()),
            dlc: data.len() as u8,
            data: payload,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: Mobid::from_raw(Mobid::from(id.into()).raw() | Mobid::RTR),
            dlc: dlc as u8,
            data: [0; 8],
        })
    }

    fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        self.id.is_remote()
    }

    fn id(&self) -> Id {
        self.id.into()
    }

    fn dlc(&self) -> usize {
        self.dlc.into()
    }

    fn data(&self) -> &[u8] {
        if self.is_remote_frame() {
            &[]
        } else {
            &self.data[..min(usize::from(self.dlc), self.data.len())]
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_can::{Frame as _, StandardId};

    #[test]
    fn data_frame_exposes_only_dlc_bytes() {
        let id = StandardId::new(0x42).unwrap();
        let frame = Frame::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.mobid(), Mobid::standard(0x42));
        assert!(Frame::new(id, &[0; 9]).is_none());
    }

    #[test]
    fn remote_frame_has_no_data() {
        let frame = Frame::new_remote(StandardId::new(0x42).unwrap(), 4).unwrap();
        assert!(frame.is_remote_frame());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.data().is_empty());
    }

    #[test]
    fn oversized_dlc_is_clamped_to_payload() {
        let frame = Frame::from_parts(Mobid::standard(1), 15, [9; 8]);
        assert_eq!(frame.dlc(), 15);
        assert_eq!(frame.data().len(), 8);
    }
}
