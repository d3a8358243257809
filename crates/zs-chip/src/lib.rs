//! Silicon model for the ZS controller AXI DMA path.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the programmable logic as seen from the host: register
//! offsets of the AXI DMA block, status bit definitions, the control tags
//! embedded in the MM2S stream, and the physical memory layout of the
//! transfer windows.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | AXI DMA register map, status bits, control codes, [`regs::Channel`] |
//! | [`wire`] | 64-bit word protocol: operating-mode tags, end-of-layer sentinel |
//! | [`layout`] | Mapping sizes, transfer bounds, default physical addresses |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod layout;
pub mod regs;
pub mod wire;
