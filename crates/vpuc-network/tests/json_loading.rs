use vpuc_network::{parse_network, to_json, AttributeValue, NetworkError, TensorKind};

const CONV_NET: &str = r#"{
    "name": "conv-net",
    "ir_version": 5,
    "tensors": [
        {"name": "data", "dtype": "f16", "shape": [1, 2, 4, 4], "kind": "input"},
        {"name": "w", "dtype": "f16", "shape": [2, 2, 1, 1], "kind": "weight",
         "data": [1.0, 0.0, 0.0, 1.0]},
        {"name": "out", "dtype": "f16", "shape": [1, 2, 4, 4], "kind": "output"}
    ],
    "layers": [
        {"name": "conv1", "type": "Convolution", "inputs": ["data"], "outputs": ["out"],
         "weights": "w",
         "attributes": {"kernel": [1, 1], "strides": [1, 1], "group": 1, "scale_factor": 0.5}}
    ],
    "inputs": ["data"],
    "outputs": ["out"]
}"#;

#[test]
fn test_parse_conv_network() {
    let net = parse_network(CONV_NET).unwrap();
    assert_eq!(net.name, "conv-net");
    assert_eq!(net.layers.len(), 1);

    let layer = &net.layers[0];
    assert_eq!(layer.layer_type, "Convolution");
    assert_eq!(layer.weights.as_deref(), Some("w"));
    assert_eq!(layer.biases, None);
    assert_eq!(
        layer.attributes.get("kernel"),
        Some(&AttributeValue::Ints(vec![1, 1]))
    );
    assert_eq!(layer.attributes.get("group"), Some(&AttributeValue::Int(1)));
    assert_eq!(layer.attr::<f32>("scale_factor").unwrap(), 0.5);

    let w = net.tensor("w").unwrap();
    assert_eq!(w.kind, TensorKind::Weight);
    assert_eq!(w.data.as_ref().map(Vec::len), Some(4));
}

#[test]
fn test_json_round_trip_preserves_layers() {
    let net = parse_network(CONV_NET).unwrap();
    let text = to_json(&net).unwrap();
    let again = parse_network(&text).unwrap();
    assert_eq!(again.layers[0].name, "conv1");
    assert_eq!(again.tensors.len(), 3);
}

#[test]
fn test_rejects_future_version() {
    let text = CONV_NET.replace("\"ir_version\": 5", "\"ir_version\": 10");
    let err = parse_network(&text).unwrap_err();
    assert!(matches!(err, NetworkError::FutureVersion(10)));
    assert_eq!(err.to_string(), "Cannot parse future versions: 10");
}

#[test]
fn test_rejects_unknown_tensor_reference() {
    // Only the layer's output list is followed by a comma.
    let text = CONV_NET.replace("\"outputs\": [\"out\"],", "\"outputs\": [\"nope\"],");
    assert!(matches!(
        parse_network(&text),
        Err(NetworkError::MissingTensor(name)) if name == "nope"
    ));
}

#[test]
fn test_rejects_malformed_json() {
    assert!(matches!(
        parse_network("{ not json"),
        Err(NetworkError::JsonError(_))
    ));
}
