#![no_std]
#![warn(missing_docs)]
//! # bxCAN
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for the bxCAN controller
//! found in many STM32 microcontrollers.
//!
//! It provides the following features:
//!
//! - mode control with bounded, acknowledged transitions into and out of
//!   initialization mode
//! - bit timing synthesis from the peripheral clock
//! - filter bank configuration in all four scale/mode combinations
//! - message transmission through the three transmit mailboxes
//! - message reception from the two receive FIFOs
//! - interrupt enables and pending condition queries
//! - classic CAN frames compatible with [`embedded_can`]
//!
//! The controller is identified by a type implementing [`CanId`]. The primary
//! instance of a dual-controller device additionally implements
//! [`FilterOwner`], which gates access to the shared filter banks. Clock
//! frequency and the peripheral reset line are provided by the platform HAL
//! through [`Dependencies`].
//!
//! [`CanId`]: bxcan_pal_core::CanId
//! [`FilterOwner`]: bxcan_pal_core::FilterOwner
//! [`Dependencies`]: bxcan_pal_core::Dependencies
//!
//! Registers are reached through [`reg::RegisterAccess`]. [`bus::Can::new`]
//! uses the memory mapped register block; [`bus::Can::with_access`] accepts
//! any other implementation, such as the simulated register file enabled by
//! the `sim` feature.
//!
//! ## Example
//! ```no_run
//! use bxcan_pal::bus::Can;
//! use bxcan_pal::config::{BitTiming, CanConfig, SamplePoint, BITRATE_500K};
//! use bxcan_pal::core::fugit::HertzU32;
//! use bxcan_pal::core::{CanId, Dependencies, FilterOwner};
//! use bxcan_pal::message::Mobid;
//! use bxcan_pal::rx_fifo::Fifo;
//!
//! pub struct Can1;
//!
//! unsafe impl CanId for Can1 {
//!     const ADDRESS: *const () = 0x4000_6400 as *const _;
//! }
//!
//! unsafe impl FilterOwner for Can1 {
//!     const NUM_FILTER_BANKS: u8 = 28;
//! }
//!
//! pub struct Deps;
//!
//! unsafe impl Dependencies<Can1> for Deps {
//!     fn can_clock(&self) -> HertzU32 {
//!         HertzU32::MHz(42)
//!     }
//!     fn assert_reset(&mut self) {}
//!     fn release_reset(&mut self) {}
//! }
//!
//! let mut can = Can::<Can1, _>::new(Deps);
//! can.reset();
//!
//! let timing =
//!     BitTiming::synthesize(can.can_clock(), BITRATE_500K, SamplePoint::PERCENT_75).unwrap();
//! let mut config = CanConfig::new(timing);
//! config.auto_bus_off = true;
//! can.init(&config).unwrap();
//!
//! let mut filters = can.filters();
//! filters.init_enter();
//! filters
//!     .set_mask32(0, Fifo::Fifo0, Mobid::standard(0), Mobid::standard(0))
//!     .unwrap();
//! filters.init_leave();
//!
//! nb::block!(can.transmit(Mobid::standard(0x123), &[1, 2, 3])).unwrap();
//! let received = nb::block!(can.receive_frame(Fifo::Fifo0)).unwrap();
//! ```

pub mod bus;
pub mod config;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod prelude;
pub mod reg;
pub mod rx_fifo;
pub mod tx_mailbox;

pub use bxcan_pal_core as core;
pub use embedded_can;
