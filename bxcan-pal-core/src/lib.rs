#![no_std]
#![warn(missing_docs)]

//! `bxcan-pal-core` is the integration layer between the platform independent
//! [`bxcan-pal`] driver and platform specific HAL crates (in documentation
//! also referred to as _target HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//! Integrators are responsible for soundness of the implementations and for
//! conforming to their respective safety prerequisites.
//!
//! [`bxcan-pal`]: <https://docs.rs/crate/bxcan-pal/>

pub use fugit;

/// Trait representing bxCAN peripheral identity
///
/// Types implementing this trait are expected to be used as marker types that
/// identify a specific controller instance on the platform. Parts with two
/// controllers expose a primary instance (owning the acceptance filter banks)
/// and a secondary one (borrowing a range of them). It only conveys *where*
/// the register block is located, not that it can be accessed. The latter is
/// expressed by the [`Dependencies`] trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of a valid bxCAN register block.
///
/// # Examples
/// ```no_run
/// use bxcan_pal_core::CanId;
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4000_6400 as *const _;
/// }
///
/// pub enum Can2 {}
///
/// unsafe impl CanId for Can2 {
///     const ADDRESS: *const () = 0x4000_6800 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block of the corresponding peripheral
    const ADDRESS: *const ();
}

/// Marks the controller instance whose register block contains the
/// acceptance filter banks
///
/// On dual-controller parts the secondary instance has no filter registers of
/// its own; its banks are the upper part of the primary's bank array, starting
/// at an index configured through the primary instance.
///
/// # Safety
/// The register block at `CanId::ADDRESS` contains `NUM_FILTER_BANKS` filter
/// banks starting at offset `0x240`.
///
/// # Examples
/// ```no_run
/// use bxcan_pal_core::{CanId, FilterOwner};
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4000_6400 as *const _;
/// }
///
/// unsafe impl FilterOwner for Can1 {
///     const NUM_FILTER_BANKS: u8 = 28;
/// }
/// ```
pub unsafe trait FilterOwner: CanId {
    /// Number of filter banks shared by all instances
    const NUM_FILTER_BANKS: u8;
}

/// Trait representing bxCAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] (clock gate,
///   reset line, pins) and release them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   peripheral (clocks are enabled, pins are configured)
/// - be a singleton (only a single instance of [`Dependencies`] for a specific
///   [`CanId`] must exist at the same time)
///
/// in order to prevent aliasing and guarantee that the driver is the sole
/// owner of the peripheral.
///
/// # Safety
/// While a [`Dependencies`] instance exists
/// - the peripheral clock must not change
/// - the pins routed to the controller must not change mode
/// - the register block must not be accessible through other safe code
///
/// # Example
/// ```no_run
/// # mod rcc {
/// #     pub struct Apb1;
/// #     impl Apb1 {
/// #         pub fn frequency(&self) -> bxcan_pal_core::fugit::HertzU32 {
/// #             bxcan_pal_core::fugit::HertzU32::MHz(42)
/// #         }
/// #         pub fn set_reset(&mut self, _bit: u32, _asserted: bool) {}
/// #     }
/// # }
/// use bxcan_pal_core::{CanId, Dependencies};
/// use bxcan_pal_core::fugit::HertzU32;
///
/// pub enum Can1 {}
///
/// unsafe impl CanId for Can1 {
///     const ADDRESS: *const () = 0x4000_6400 as *const _;
/// }
///
/// pub struct Can1Dependencies<RX, TX> {
///     apb1: rcc::Apb1,
///     rx: RX,
///     tx: TX,
/// }
///
/// impl<RX, TX> Can1Dependencies<RX, TX> {
///     pub fn free(self) -> (rcc::Apb1, RX, TX) {
///         (self.apb1, self.rx, self.tx)
///     }
/// }
///
/// const CAN1RST: u32 = 1 << 25;
///
/// unsafe impl<RX, TX> Dependencies<Can1> for Can1Dependencies<RX, TX> {
///     fn can_clock(&self) -> HertzU32 {
///         self.apb1.frequency()
///     }
///
///     fn assert_reset(&mut self) {
///         self.apb1.set_reset(CAN1RST, true);
///     }
///
///     fn release_reset(&mut self) {
///         self.apb1.set_reset(CAN1RST, false);
///     }
/// }
/// ```
pub unsafe trait Dependencies<Id: CanId> {
    /// Frequency of the clock feeding the controller (APB1 on most parts).
    ///
    /// The bit timing is derived from this clock.
    fn can_clock(&self) -> fugit::HertzU32;
    /// Hold the controller in reset.
    fn assert_reset(&mut self);
    /// Take the controller out of reset. The registers are at their power-on
    /// values afterwards.
    fn release_reset(&mut self);
}
