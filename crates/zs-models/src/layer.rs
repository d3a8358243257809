//! Convolutional layer records
//!
//! # Record layout
//!
//! Every token is a 32-bit little-endian signed integer:
//!
//! ```text
//! header   layer_type compression_enabled kernel_side
//!          num_input_channels num_input_columns num_input_rows
//!          num_output_channels pooling_enabled relu_enabled padding stride
//! weights  out × in × kernel × kernel   (column fastest, output channel slowest)
//! biases   out
//! ```
//!
//! Records follow each other with no separator; a network file is a
//! sequence of records ending at a record boundary.

use crate::error::{LayerError, Result};
use std::io::{ErrorKind, Read};

/// Upper bound on speculative preallocation for weight storage
const PREALLOC_LIMIT: usize = 1 << 20;

/// One convolutional layer as shipped to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    layer_type: u32,
    compression_enabled: bool,
    kernel_side: usize,
    num_input_channels: usize,
    num_input_columns: usize,
    num_input_rows: usize,
    num_output_channels: usize,
    pooling_enabled: bool,
    relu_enabled: bool,
    padding: usize,
    stride: usize,
    num_output_columns: usize,
    num_output_rows: usize,
    weights: Vec<i64>,
    biases: Vec<i64>,
}

impl LayerDescriptor {
    /// Read exactly one record from `reader`
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if the stream is empty or ends inside the record,
    /// and the header validation errors of [`LayerLoader::next_layer`].
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        LayerLoader::new(reader)
            .next_layer()?
            .ok_or_else(|| LayerError::truncated("layer_type"))
    }

    /// Layer kind as encoded by the network compiler
    pub const fn layer_type(&self) -> u32 {
        self.layer_type
    }

    /// Weight compression flag
    pub const fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }

    /// Kernel width and height
    pub const fn kernel_side(&self) -> usize {
        self.kernel_side
    }

    /// Input feature maps
    pub const fn num_input_channels(&self) -> usize {
        self.num_input_channels
    }

    /// Input width
    pub const fn num_input_columns(&self) -> usize {
        self.num_input_columns
    }

    /// Input height
    pub const fn num_input_rows(&self) -> usize {
        self.num_input_rows
    }

    /// Output feature maps (kernels)
    pub const fn num_output_channels(&self) -> usize {
        self.num_output_channels
    }

    /// 2×2 pooling after the convolution
    pub const fn pooling_enabled(&self) -> bool {
        self.pooling_enabled
    }

    /// ReLU after the convolution
    pub const fn relu_enabled(&self) -> bool {
        self.relu_enabled
    }

    /// Zero padding on every side
    pub const fn padding(&self) -> usize {
        self.padding
    }

    /// Convolution stride (always 1)
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Output width
    pub const fn num_output_columns(&self) -> usize {
        self.num_output_columns
    }

    /// Output height
    pub const fn num_output_rows(&self) -> usize {
        self.num_output_rows
    }

    /// Weight at `[out][input][row][col]`
    pub fn weight(&self, out: usize, input: usize, row: usize, col: usize) -> Option<i64> {
        let k = self.kernel_side;
        if out >= self.num_output_channels || input >= self.num_input_channels || row >= k || col >= k
        {
            return None;
        }
        let index = ((out * self.num_input_channels + input) * k + row) * k + col;
        self.weights.get(index).copied()
    }

    /// All weights of output channel `out` (`in × kernel × kernel`, column fastest)
    pub fn kernel(&self, out: usize) -> Option<&[i64]> {
        let len = self.num_input_channels * self.kernel_side * self.kernel_side;
        let start = out.checked_mul(len)?;
        self.weights.get(start..start + len)
    }

    /// Flat weights in file order
    pub fn weights(&self) -> &[i64] {
        &self.weights
    }

    /// One bias per output channel
    pub fn biases(&self) -> &[i64] {
        &self.biases
    }

    /// `out × in × kernel × kernel`
    pub fn weight_count(&self) -> usize {
        self.weights.len()
    }

    /// Activations produced by this layer
    pub const fn output_words(&self) -> usize {
        self.num_output_channels * self.num_output_rows * self.num_output_columns
    }

    /// Activations consumed by this layer
    pub const fn input_words(&self) -> usize {
        self.num_input_channels * self.num_input_rows * self.num_input_columns
    }
}

impl std::fmt::Display for LayerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type {} | {}x{}x{} -> {}x{}x{} | kernel {}x{} pad {} stride {}{}{}{}",
            self.layer_type,
            self.num_input_channels,
            self.num_input_rows,
            self.num_input_columns,
            self.num_output_channels,
            self.num_output_rows,
            self.num_output_columns,
            self.kernel_side,
            self.kernel_side,
            self.padding,
            self.stride,
            if self.pooling_enabled { " pool" } else { "" },
            if self.relu_enabled { " relu" } else { "" },
            if self.compression_enabled { " compressed" } else { "" },
        )
    }
}

/// Sequential reader of layer records
#[derive(Debug)]
pub struct LayerLoader<R> {
    reader: R,
    layers_read: usize,
}

impl<R: Read> LayerLoader<R> {
    /// Read records from `reader`
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            layers_read: 0,
        }
    }

    /// Records returned so far
    pub const fn layers_read(&self) -> usize {
        self.layers_read
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next record, or `None` at a clean end of stream
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` for `stride > 1`
    /// - `InvalidLayer` for negative fields, zero kernel or channel counts,
    ///   `stride < 1`, flags other than 0/1, or a non-positive output size
    /// - `Truncated` naming the field where the stream ended
    pub fn next_layer(&mut self) -> Result<Option<LayerDescriptor>> {
        let Some(layer_type) = self.first_token()? else {
            return Ok(None);
        };
        let compression = self.token("compression_enabled")?;
        let kernel_side = self.token("kernel_side")?;
        let in_channels = self.token("num_input_channels")?;
        let in_columns = self.token("num_input_columns")?;
        let in_rows = self.token("num_input_rows")?;
        let out_channels = self.token("num_output_channels")?;
        let pooling = self.token("pooling_enabled")?;
        let relu = self.token("relu_enabled")?;
        let padding = self.token("padding")?;
        let stride = self.token("stride")?;

        if stride > 1 {
            return Err(LayerError::protocol_violation(format!(
                "stride {stride} (only stride 1 is implemented)"
            )));
        }
        if stride < 1 {
            return Err(LayerError::invalid_layer(format!("stride {stride}")));
        }

        let layer_type = non_negative("layer_type", layer_type)?;
        let compression_enabled = flag("compression_enabled", compression)?;
        let pooling_enabled = flag("pooling_enabled", pooling)?;
        let relu_enabled = flag("relu_enabled", relu)?;
        let kernel_side = positive("kernel_side", kernel_side)?;
        let num_input_channels = positive("num_input_channels", in_channels)?;
        let num_output_channels = positive("num_output_channels", out_channels)?;
        let num_input_columns = non_negative("num_input_columns", in_columns)?;
        let num_input_rows = non_negative("num_input_rows", in_rows)?;
        let padding = non_negative("padding", padding)?;

        let pool_divisor = i64::from(pooling) + 1;
        let num_output_columns =
            output_side("columns", in_columns, kernel_side, padding, pool_divisor)?;
        let num_output_rows = output_side("rows", in_rows, kernel_side, padding, pool_divisor)?;

        let weight_count = [num_input_channels, kernel_side, kernel_side]
            .iter()
            .try_fold(num_output_channels as usize, |acc, &n| {
                acc.checked_mul(n as usize)
            })
            .ok_or_else(|| LayerError::invalid_layer("weight count overflows"))?;

        let mut weights = Vec::with_capacity(weight_count.min(PREALLOC_LIMIT));
        for index in 0..weight_count {
            weights.push(i64::from(self.indexed_token("weight", index)?));
        }
        let mut biases = Vec::with_capacity(num_output_channels as usize);
        for index in 0..num_output_channels as usize {
            biases.push(i64::from(self.indexed_token("bias", index)?));
        }

        let layer = LayerDescriptor {
            layer_type,
            compression_enabled,
            kernel_side: kernel_side as usize,
            num_input_channels: num_input_channels as usize,
            num_input_columns: num_input_columns as usize,
            num_input_rows: num_input_rows as usize,
            num_output_channels: num_output_channels as usize,
            pooling_enabled,
            relu_enabled,
            padding: padding as usize,
            stride: 1,
            num_output_columns,
            num_output_rows,
            weights,
            biases,
        };
        self.layers_read += 1;
        tracing::debug!("Layer {}: {layer}", self.layers_read);
        Ok(Some(layer))
    }

    fn first_token(&mut self) -> Result<Option<i32>> {
        let mut buf = [0_u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(LayerError::truncated("layer_type")),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(i32::from_le_bytes(buf)))
    }

    fn token(&mut self, field: &str) -> Result<i32> {
        let mut buf = [0_u8; 4];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(i32::from_le_bytes(buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(LayerError::truncated(field)),
            Err(e) => Err(e.into()),
        }
    }

    fn indexed_token(&mut self, field: &str, index: usize) -> Result<i32> {
        let mut buf = [0_u8; 4];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(i32::from_le_bytes(buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(LayerError::truncated(format!("{field}[{index}]")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: Read> Iterator for LayerLoader<R> {
    type Item = Result<LayerDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_layer().transpose()
    }
}

#[allow(clippy::cast_sign_loss)]
fn non_negative(field: &str, value: i32) -> Result<u32> {
    if value < 0 {
        return Err(LayerError::invalid_layer(format!("{field} is negative ({value})")));
    }
    Ok(value as u32)
}

fn positive(field: &str, value: i32) -> Result<u32> {
    if value == 0 {
        return Err(LayerError::invalid_layer(format!("{field} is zero")));
    }
    non_negative(field, value)
}

fn flag(field: &str, value: i32) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LayerError::invalid_layer(format!(
            "{field} must be 0 or 1, got {other}"
        ))),
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn output_side(
    axis: &str,
    input: i32,
    kernel_side: u32,
    padding: u32,
    pool_divisor: i64,
) -> Result<usize> {
    let side =
        (i64::from(input) - i64::from(kernel_side) + 1 + 2 * i64::from(padding)) / pool_divisor;
    if side <= 0 {
        return Err(LayerError::invalid_layer(format!(
            "output {axis} would be {side} (input {input}, kernel {kernel_side}, padding {padding})"
        )));
    }
    Ok(side as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(tokens: &[i32]) -> Vec<u8> {
        tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
    }

    /// k=1, in=1, out=2 over a 4x4 input, no padding
    fn small_record() -> Vec<i32> {
        vec![1, 0, 1, 1, 4, 4, 2, 0, 1, 0, 1, 7, -3, 100, 200]
    }

    #[test]
    fn parses_minimal_record() {
        let layer = LayerDescriptor::read_from(&encode(&small_record())[..]).unwrap();
        assert_eq!(layer.num_output_columns(), 4);
        assert_eq!(layer.num_output_rows(), 4);
        assert!(layer.relu_enabled());
        assert!(!layer.pooling_enabled());
        assert_eq!(layer.weights(), &[7, -3]);
        assert_eq!(layer.biases(), &[100, 200]);
        assert_eq!(layer.output_words(), 32);
        assert_eq!(layer.input_words(), 16);
        assert_eq!(layer.weight(1, 0, 0, 0), Some(-3));
        assert_eq!(layer.weight(2, 0, 0, 0), None);
    }

    #[test]
    fn pooling_halves_and_truncates() {
        let mut record = small_record();
        record[4] = 5; // columns
        record[7] = 1; // pooling
        let layer = LayerDescriptor::read_from(&encode(&record)[..]).unwrap();
        assert_eq!(layer.num_output_columns(), 2);
        assert_eq!(layer.num_output_rows(), 2);
    }

    #[test]
    fn kernel_larger_than_input_is_rejected() {
        let mut record = small_record();
        record[2] = 6; // kernel side
        let err = LayerDescriptor::read_from(&encode(&record)[..]).unwrap_err();
        assert!(matches!(err, LayerError::InvalidLayer { .. }), "{err}");
    }

    #[test]
    fn stride_zero_and_negative_fields_are_invalid() {
        let mut record = small_record();
        record[10] = 0;
        let err = LayerDescriptor::read_from(&encode(&record)[..]).unwrap_err();
        assert!(matches!(err, LayerError::InvalidLayer { .. }));

        let mut record = small_record();
        record[9] = -1; // padding
        let err = LayerDescriptor::read_from(&encode(&record)[..]).unwrap_err();
        assert!(matches!(err, LayerError::InvalidLayer { .. }));

        let mut record = small_record();
        record[6] = 0; // output channels
        let err = LayerDescriptor::read_from(&encode(&record)[..]).unwrap_err();
        assert!(matches!(err, LayerError::InvalidLayer { .. }));
    }

    #[test]
    fn truncation_names_the_field() {
        let record = encode(&small_record());
        let err = LayerDescriptor::read_from(&record[..10]).unwrap_err();
        assert!(
            matches!(&err, LayerError::Truncated { field } if field == "kernel_side"),
            "{err}"
        );

        let err = LayerDescriptor::read_from(&record[..record.len() - 4]).unwrap_err();
        assert!(
            matches!(&err, LayerError::Truncated { field } if field == "bias[1]"),
            "{err}"
        );

        let err = LayerDescriptor::read_from(&record[..2]).unwrap_err();
        assert!(matches!(err, LayerError::Truncated { .. }));
    }

    #[test]
    fn empty_stream_has_no_layers() {
        let mut loader = LayerLoader::new(&[][..]);
        assert!(loader.next_layer().unwrap().is_none());
        assert!(LayerDescriptor::read_from(&[][..]).is_err());
    }

    #[test]
    fn kernel_slices_follow_output_channels() {
        let layer = LayerDescriptor::read_from(&encode(&small_record())[..]).unwrap();
        assert_eq!(layer.kernel(0), Some(&[7][..]));
        assert_eq!(layer.kernel(1), Some(&[-3][..]));
        assert_eq!(layer.kernel(2), None);
    }

    #[test]
    fn display_summarises_shape() {
        let layer = LayerDescriptor::read_from(&encode(&small_record())[..]).unwrap();
        assert_eq!(
            layer.to_string(),
            "type 1 | 1x4x4 -> 2x4x4 | kernel 1x1 pad 0 stride 1 relu"
        );
    }
}
