//! Layer files on disk

use std::io::Write;
use tempfile::NamedTempFile;
use zs_models::{LayerDescriptor, LayerError, LayerLoader, Network};

struct Header {
    kernel_side: i32,
    in_channels: i32,
    columns: i32,
    rows: i32,
    out_channels: i32,
    pooling: i32,
    relu: i32,
    padding: i32,
    stride: i32,
}

impl Header {
    const fn conv3x3() -> Self {
        Self {
            kernel_side: 3,
            in_channels: 2,
            columns: 10,
            rows: 10,
            out_channels: 4,
            pooling: 0,
            relu: 1,
            padding: 1,
            stride: 1,
        }
    }

    fn weight_count(&self) -> i32 {
        self.out_channels * self.in_channels * self.kernel_side * self.kernel_side
    }

    /// Header, then weights numbered from -36 upward, then biases 1000 + o
    fn encode(&self) -> Vec<u8> {
        let mut tokens = vec![
            2,
            0,
            self.kernel_side,
            self.in_channels,
            self.columns,
            self.rows,
            self.out_channels,
            self.pooling,
            self.relu,
            self.padding,
            self.stride,
        ];
        tokens.extend((0..self.weight_count()).map(|i| i - 36));
        tokens.extend((0..self.out_channels).map(|o| 1000 + o));
        tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
    }
}

fn write_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_padded_conv_keeps_input_size() {
    let file = write_file(&Header::conv3x3().encode());
    let network = Network::from_file(file.path()).unwrap();
    assert_eq!(network.len(), 1);

    let layer = &network.layers()[0];
    assert_eq!(layer.layer_type(), 2);
    assert_eq!(layer.num_output_columns(), 10);
    assert_eq!(layer.num_output_rows(), 10);
    assert_eq!(layer.weight_count(), 4 * 2 * 3 * 3);
    assert_eq!(layer.biases(), &[1000, 1001, 1002, 1003]);
    assert!(layer.relu_enabled());
    assert!(!layer.compression_enabled());
    assert_eq!(layer.output_words(), 400);
}

#[test]
fn test_weights_are_column_fastest() {
    let layer = LayerDescriptor::read_from(&Header::conv3x3().encode()[..]).unwrap();
    assert_eq!(layer.weight(0, 0, 0, 0), Some(-36));
    assert_eq!(layer.weight(0, 0, 0, 1), Some(-35));
    assert_eq!(layer.weight(0, 0, 1, 0), Some(-33));
    assert_eq!(layer.weight(0, 1, 0, 0), Some(-27));
    assert_eq!(layer.weight(1, 0, 0, 0), Some(-18));
    assert_eq!(layer.weight(3, 1, 2, 2), Some(35));
    assert_eq!(layer.kernel(1).map(<[i64]>::len), Some(18));
}

#[test]
fn test_stride_two_is_a_protocol_violation() {
    let header = Header {
        stride: 2,
        ..Header::conv3x3()
    };
    let file = write_file(&header.encode());
    let err = Network::from_file(file.path()).unwrap_err();
    assert!(matches!(err, LayerError::ProtocolViolation { .. }), "{err}");
}

#[test]
fn test_pooling_with_padding() {
    let header = Header {
        pooling: 1,
        columns: 9,
        ..Header::conv3x3()
    };
    let layer = LayerDescriptor::read_from(&header.encode()[..]).unwrap();
    // (9 - 3 + 1 + 2) / 2
    assert_eq!(layer.num_output_columns(), 4);
    assert_eq!(layer.num_output_rows(), 5);
}

#[test]
fn test_flag_outside_zero_one_is_invalid() {
    let header = Header {
        relu: 2,
        ..Header::conv3x3()
    };
    let err = LayerDescriptor::read_from(&header.encode()[..]).unwrap_err();
    assert!(matches!(err, LayerError::InvalidLayer { .. }), "{err}");
}

#[test]
fn test_truncated_weights_are_reported() {
    let data = Header::conv3x3().encode();
    let cut = 11 * 4 + 10 * 4 + 2;
    let file = write_file(&data[..cut]);
    let err = Network::from_file(file.path()).unwrap_err();
    assert!(
        matches!(&err, LayerError::Truncated { field } if field == "weight[10]"),
        "{err}"
    );
}

#[test]
fn test_missing_file() {
    let err = Network::from_file("/nonexistent/layers.bin").unwrap_err();
    assert!(matches!(err, LayerError::FileNotFound { .. }));
}

#[test]
fn test_loader_streams_layers_one_at_a_time() {
    let mut data = Header::conv3x3().encode();
    data.extend(
        Header {
            out_channels: 1,
            padding: 0,
            ..Header::conv3x3()
        }
        .encode(),
    );

    let mut loader = LayerLoader::new(&data[..]);
    let first = loader.next_layer().unwrap().unwrap();
    assert_eq!(first.num_output_channels(), 4);
    let second = loader.next_layer().unwrap().unwrap();
    assert_eq!(second.num_output_columns(), 8);
    assert!(loader.next_layer().unwrap().is_none());
    assert_eq!(loader.layers_read(), 2);
}

#[test]
fn test_shape_accessors_agree_with_weights() {
    let layer = LayerDescriptor::read_from(&Header::conv3x3().encode()[..]).unwrap();
    let k = layer.kernel_side();
    let per_kernel = layer.num_input_channels() * k * k;

    assert_eq!(layer.weight_count(), layer.num_output_channels() * per_kernel);
    assert_eq!(layer.biases().len(), layer.num_output_channels());
    for out in 0..layer.num_output_channels() {
        assert_eq!(layer.kernel(out).map(<[i64]>::len), Some(per_kernel));
    }
    let last = layer.num_output_channels() - 1;
    assert_eq!(layer.weight(last, 1, k - 1, k - 1), layer.weights().last().copied());
    assert_eq!(layer.weight(last, 2, 0, 0), None);
    assert_eq!((layer.padding(), layer.stride()), (1, 1));
    assert!(!layer.pooling_enabled());
}
