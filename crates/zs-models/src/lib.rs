#![deny(unsafe_code)]

//! Binary CNN layer descriptors for the ZS controller
//!
//! Networks are shipped to the accelerator as flat files of layer records.
//! Each record is a fixed header of eleven 32-bit little-endian integers
//! followed by the layer's weights and biases.
//!
//! # Example
//!
//! ```no_run
//! use zs_models::Network;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = Network::from_file("layers.bin")?;
//!
//! for layer in &network {
//!     println!("{layer}");
//! }
//! println!("Largest output: {} words", network.max_output_words());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod error;
mod layer;
mod network;

pub use error::{LayerError, Result};
pub use layer::{LayerDescriptor, LayerLoader};
pub use network::Network;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{LayerDescriptor, LayerError, Network, Result};
}
