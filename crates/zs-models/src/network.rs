//! Whole-network layer files

use crate::error::{LayerError, Result};
use crate::layer::{LayerDescriptor, LayerLoader};
use bytes::{Buf, Bytes};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Ordered list of layers loaded from one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Network {
    layers: Vec<LayerDescriptor>,
}

impl Network {
    /// Load every record from a layer file
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` if the path does not exist, or any record error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LayerError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let network = Self::from_reader(BufReader::new(File::open(path)?))?;
        tracing::info!(
            "Loaded {} layers from {}",
            network.len(),
            path.display()
        );
        Ok(network)
    }

    /// Load every record from `reader` until a clean end of stream
    ///
    /// # Errors
    ///
    /// Returns the first record error.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let layers = LayerLoader::new(reader).collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Load from an in-memory buffer
    ///
    /// # Errors
    ///
    /// Returns the first record error.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_reader(data.into().reader())
    }

    /// Layers in file order
    pub fn layers(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True for an empty file
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Largest activation volume any layer produces
    pub fn max_output_words(&self) -> usize {
        self.layers
            .iter()
            .map(LayerDescriptor::output_words)
            .max()
            .unwrap_or(0)
    }

    /// Weights across every layer
    pub fn total_weight_count(&self) -> usize {
        self.layers.iter().map(LayerDescriptor::weight_count).sum()
    }
}

impl<'a> IntoIterator for &'a Network {
    type Item = &'a LayerDescriptor;
    type IntoIter = std::slice::Iter<'a, LayerDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(out_channels: i32) -> Vec<u8> {
        let mut tokens = vec![0, 0, 1, 1, 3, 3, out_channels, 0, 0, 0, 1];
        tokens.extend((0..out_channels).map(|i| i + 1));
        tokens.extend(std::iter::repeat(0).take(out_channels as usize));
        tokens.iter().flat_map(|t: &i32| t.to_le_bytes()).collect()
    }

    #[test]
    fn reads_consecutive_records() {
        let mut data = record(2);
        data.extend(record(5));
        let network = Network::from_bytes(data).unwrap();
        assert_eq!(network.len(), 2);
        assert_eq!(network.layers()[1].num_output_channels(), 5);
        assert_eq!(network.max_output_words(), 5 * 9);
        assert_eq!(network.total_weight_count(), 7);
        assert_eq!((&network).into_iter().count(), 2);
    }

    #[test]
    fn empty_buffer_is_an_empty_network() {
        let network = Network::from_bytes(Vec::new()).unwrap();
        assert!(network.is_empty());
        assert_eq!(network.max_output_words(), 0);
    }

    #[test]
    fn trailing_garbage_is_truncation() {
        let mut data = record(1);
        data.extend([1, 2, 3]);
        let err = Network::from_bytes(data).unwrap_err();
        assert!(matches!(err, LayerError::Truncated { .. }));
    }
}
