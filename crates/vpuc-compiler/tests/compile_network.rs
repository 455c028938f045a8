use std::collections::HashSet;
use vpuc_compiler::{compile, Blob, Error};
use vpuc_core::{BlobHeader, CompilationConfig, StageType};
use vpuc_network::{AttributeValue, Layer, Network, NetworkError, TensorInfo, TensorKind};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn ints(values: &[i64]) -> AttributeValue {
    AttributeValue::Ints(values.to_vec())
}

/// `data -> conv1 (1x1, 2 -> 2 channels) -> out`.
fn conv_network(batch: usize) -> Network {
    let mut net = Network::new("conv-net");
    net.add_tensor(TensorInfo::new(
        "data",
        vec![batch, 2, 4, 4],
        TensorKind::Input,
    ))
    .add_tensor(TensorInfo::weight(
        "w",
        vec![2, 2, 1, 1],
        vec![1.0, 0.0, 0.0, 1.0],
    ))
    .add_tensor(TensorInfo::weight("b", vec![2], vec![0.5, -0.5]))
    .add_tensor(TensorInfo::new(
        "out",
        vec![batch, 2, 4, 4],
        TensorKind::Output,
    ));

    let mut conv = Layer::new("conv1", "Convolution");
    conv.inputs = vec!["data".to_string()];
    conv.outputs = vec!["out".to_string()];
    conv.weights = Some("w".to_string());
    conv.biases = Some("b".to_string());
    conv.attributes.insert("kernel".to_string(), ints(&[1, 1]));
    conv.attributes.insert("strides".to_string(), ints(&[1, 1]));
    net.add_layer(conv);

    net.inputs = vec!["data".to_string()];
    net.outputs = vec!["out".to_string()];
    net
}

fn stage_types(blob: &Blob) -> Vec<StageType> {
    blob.stages()
        .unwrap()
        .iter()
        .map(|record| record.stage_type().expect("known stage code"))
        .collect()
}

fn software() -> CompilationConfig {
    CompilationConfig {
        hw_optimization: false,
        ..CompilationConfig::default()
    }
}

#[test]
fn test_hardware_convolution_blob() {
    init_tracing();
    let blob = compile(&conv_network(1), &CompilationConfig::default()).unwrap();

    let header = BlobHeader::parse(blob.as_bytes()).unwrap();
    assert_eq!(header.magic, BlobHeader::MAGIC);
    assert_eq!(header.version, BlobHeader::VERSION);
    assert_eq!(header.const_offset % 64, 0);
    assert_eq!(blob.len(), (header.const_offset + header.const_size) as usize);

    // 1 * 2 * 4 * 4 halves, compact.
    assert_eq!(header.input_size, 64);
    assert_eq!(header.output_size, 64);
    assert!(header.const_size > 0);

    let types = stage_types(&blob);
    assert_eq!(types.len(), blob.stage_count());
    assert!(types.contains(&StageType::MyriadXHwOp));
    assert!(!types.iter().any(|ty| ty.is_stub()));
    // Aligned hardware rows are staged through copies at both edges.
    assert!(header.bss_size > 0);
}

#[test]
fn test_software_convolution_blob() {
    init_tracing();
    let blob = compile(&conv_network(1), &software()).unwrap();

    let types = stage_types(&blob);
    assert!(types.contains(&StageType::Convolution));
    assert!(!types.contains(&StageType::MyriadXHwOp));
    // Interleaved internal layout, planar network edges.
    assert!(types.contains(&StageType::Permute));
}

#[test]
fn test_disabled_layer_stays_in_software() {
    init_tracing();
    let config = CompilationConfig {
        hw_disabled_layers: HashSet::from(["conv1".to_string()]),
        ..CompilationConfig::default()
    };
    let blob = compile(&conv_network(1), &config).unwrap();
    let types = stage_types(&blob);
    assert!(types.contains(&StageType::Convolution));
    assert!(!types.contains(&StageType::MyriadXHwOp));
}

#[test]
fn test_batched_convolution_is_split() {
    init_tracing();
    let blob = compile(&conv_network(2), &software()).unwrap();

    let types = stage_types(&blob);
    assert!(types.contains(&StageType::Split));
    assert!(types.contains(&StageType::Concat));
    assert_eq!(
        types
            .iter()
            .filter(|&&ty| ty == StageType::Convolution)
            .count(),
        2
    );
}

#[test]
fn test_pooling_then_power() {
    init_tracing();
    let mut net = Network::new("pool-net");
    net.add_tensor(TensorInfo::new("data", vec![1, 4, 8, 8], TensorKind::Input))
        .add_tensor(TensorInfo::new(
            "pooled",
            vec![1, 4, 4, 4],
            TensorKind::Intermediate,
        ))
        .add_tensor(TensorInfo::new("out", vec![1, 4, 4, 4], TensorKind::Output));

    let mut pool = Layer::new("pool1", "Pooling");
    pool.inputs = vec!["data".to_string()];
    pool.outputs = vec!["pooled".to_string()];
    pool.attributes.insert("kernel".to_string(), ints(&[2, 2]));
    pool.attributes.insert("strides".to_string(), ints(&[2, 2]));
    pool.attributes.insert(
        "pool_method".to_string(),
        AttributeValue::String("avg".to_string()),
    );
    net.add_layer(pool);

    let mut power = Layer::new("pow1", "Power");
    power.inputs = vec!["pooled".to_string()];
    power.outputs = vec!["out".to_string()];
    power
        .attributes
        .insert("scale".to_string(), AttributeValue::Float(2.0));
    net.add_layer(power);

    net.inputs = vec!["data".to_string()];
    net.outputs = vec!["out".to_string()];

    for config in [CompilationConfig::default(), software()] {
        let blob = compile(&net, &config).unwrap();
        let types = stage_types(&blob);
        assert!(types.contains(&StageType::Power));
        assert_eq!(
            types.contains(&StageType::MyriadXHwOp),
            config.hw_optimization
        );
        assert_eq!(blob.header().const_size, 0);
    }
}

#[test]
fn test_fully_connected_blob() {
    init_tracing();
    let mut net = Network::new("fc-net");
    net.add_tensor(TensorInfo::new("data", vec![1, 4], TensorKind::Input))
        .add_tensor(TensorInfo::weight("w", vec![3, 4], vec![0.25; 12]))
        .add_tensor(TensorInfo::new("out", vec![1, 3], TensorKind::Output));

    let mut fc = Layer::new("fc1", "FullyConnected");
    fc.inputs = vec!["data".to_string()];
    fc.outputs = vec!["out".to_string()];
    fc.weights = Some("w".to_string());
    net.add_layer(fc);
    net.inputs = vec!["data".to_string()];
    net.outputs = vec!["out".to_string()];

    let blob = compile(&net, &software()).unwrap();
    assert!(stage_types(&blob).contains(&StageType::FullyConnected));
    // 3 * 4 halves; the original weights tensor is unused and unallocated.
    assert_eq!(blob.header().const_size, 24);
}

#[test]
fn test_unsupported_layer_is_rejected() {
    init_tracing();
    let mut net = conv_network(1);
    net.layers[0].layer_type = "Softmax".to_string();

    let err = compile(&net, &CompilationConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Core(vpuc_core::Error::Unsupported(_))));
    assert!(err.to_string().contains("Softmax"));
}

#[test]
fn test_future_ir_version_is_rejected() {
    init_tracing();
    let mut net = conv_network(1);
    net.ir_version = 10;

    let err = compile(&net, &CompilationConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Network(NetworkError::FutureVersion(10))
    ));
}

#[test]
fn test_blob_bytes_round_trip_through_reader() {
    init_tracing();
    let blob = compile(&conv_network(1), &CompilationConfig::default()).unwrap();
    let again = Blob::from_bytes(blob.as_bytes().to_vec()).unwrap();
    assert_eq!(again.header(), blob.header());
    assert_eq!(again.stages().unwrap(), blob.stages().unwrap());
}

#[test]
fn test_non_positive_scale_hint_is_rejected() {
    init_tracing();
    for hint in [0.0, -2.0, f32::NAN] {
        let mut net = conv_network(1);
        net.layers[0]
            .attributes
            .insert("scale_factor".to_string(), AttributeValue::Float(hint));

        let err = compile(&net, &CompilationConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Layer { ref layer, .. } if layer == "conv1"));
    }

    let mut net = conv_network(1);
    net.layers[0]
        .attributes
        .insert("scale_factor".to_string(), AttributeValue::Float(4.0));
    assert!(compile(&net, &CompilationConfig::default()).is_ok());
}
