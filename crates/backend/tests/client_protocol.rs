//! Client-aided protocol tests over a real localhost TCP session.
//!
//! The executor runs on its own thread; the key-holding client connects to
//! the OS-assigned port, uploads keys and inputs, serves nonlinear requests,
//! and decrypts the result.

use std::collections::HashMap;
use std::thread;

use veilnn_backend::{
    ClientInput, ElementType, GraphBuilder, HeBackend, HeClient, HeExecutable, HETensor,
};

fn client_backend(extra: &[(&str, &str)]) -> std::sync::Arc<HeBackend> {
    let mut map: HashMap<String, String> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.insert("enable_client".into(), "True".into());
    map.insert("port".into(), "0".into());
    HeBackend::with_config(&map).unwrap()
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < tol, "got {a}, expected {e} (all: {actual:?})");
    }
}

/// Run one client-aided call: the executor on a worker thread, the client on
/// this one. Returns the client's decrypted result.
fn run_session(
    backend: std::sync::Arc<HeBackend>,
    mut exec: HeExecutable,
    dummy_inputs: Vec<HETensor>,
    output_shape: Vec<usize>,
    inputs: HashMap<String, ClientInput>,
) -> Vec<f64> {
    let port = exec.start_server().unwrap();

    let server = thread::spawn(move || {
        let mut outputs =
            vec![backend.create_plain_tensor(ElementType::F32, &output_shape, false, "out")];
        exec.call(&mut outputs, &dummy_inputs).unwrap();
        outputs
    });

    let client = HeClient::connect(("127.0.0.1", port), inputs).unwrap();
    let values = client.run().unwrap();

    let outputs = server.join().expect("server thread panicked");
    // The server's copy of the result stays encrypted under the client key.
    assert!(outputs[0].any_encrypted_data());
    values
}

#[test]
fn test_client_aided_relu() {
    let backend = client_backend(&[("x", "client_input")]);

    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[5]);
    let activated = g.relu(x).unwrap();
    g.result(activated).unwrap();
    let graph = g.build().unwrap();

    let exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let dummy = backend.create_plain_tensor(ElementType::F32, &[5], false, "x");

    let mut inputs = HashMap::new();
    inputs.insert(
        "x".to_string(),
        ClientInput {
            values: vec![-1.0, 0.0, 1.0, -2.0, 2.0],
            encrypt: true,
        },
    );

    let values = run_session(backend, exec, vec![dummy], vec![5], inputs);
    assert_close(&values, &[0.0, 0.0, 1.0, 0.0, 2.0], 1e-2);
}

#[test]
fn test_client_aided_bounded_relu() {
    let backend = client_backend(&[("x", "client_input")]);

    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[5]);
    let activated = g.bounded_relu(x, 1.5).unwrap();
    g.result(activated).unwrap();
    let graph = g.build().unwrap();

    let exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let dummy = backend.create_plain_tensor(ElementType::F32, &[5], false, "x");

    let mut inputs = HashMap::new();
    inputs.insert(
        "x".to_string(),
        ClientInput {
            values: vec![-1.0, 0.0, 1.0, -2.0, 2.0],
            encrypt: true,
        },
    );

    let values = run_session(backend, exec, vec![dummy], vec![5], inputs);
    assert_close(&values, &[0.0, 0.0, 1.0, 0.0, 1.5], 1e-2);
}

#[test]
fn test_client_aided_max_pool() {
    let backend = client_backend(&[("x", "client_input")]);

    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[1, 1, 4, 4]);
    let pooled = g.max_pool(x, &[2, 2], &[2, 2], &[0, 0], &[0, 0]).unwrap();
    g.result(pooled).unwrap();
    let graph = g.build().unwrap();

    let exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let dummy = backend.create_plain_tensor(ElementType::F32, &[1, 1, 4, 4], false, "x");

    let mut inputs = HashMap::new();
    inputs.insert(
        "x".to_string(),
        ClientInput {
            values: (0..16).map(|i| i as f64).collect(),
            encrypt: true,
        },
    );

    let values = run_session(backend, exec, vec![dummy], vec![1, 1, 2, 2], inputs);
    assert_close(&values, &[5.0, 7.0, 13.0, 15.0], 1e-2);
}

#[test]
fn test_client_aided_affine_then_relu() {
    // Arithmetic on the server, one nonlinear round trip, result back to the
    // client: relu(x · w + c).
    let backend = client_backend(&[("x", "client_input")]);

    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[4]);
    let w = g
        .constant(ElementType::F32, &[4], vec![1.0, -1.0, 2.0, -2.0])
        .unwrap();
    let c = g
        .constant(ElementType::F32, &[4], vec![0.5, 0.5, 0.5, 0.5])
        .unwrap();
    let scaled = g.multiply(x, w).unwrap();
    let shifted = g.add(scaled, c).unwrap();
    let activated = g.relu(shifted).unwrap();
    g.result(activated).unwrap();
    let graph = g.build().unwrap();

    let exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let dummy = backend.create_plain_tensor(ElementType::F32, &[4], false, "x");

    let mut inputs = HashMap::new();
    inputs.insert(
        "x".to_string(),
        ClientInput {
            values: vec![1.0, 1.0, 1.0, 1.0],
            encrypt: true,
        },
    );

    // x·w + c = [1.5, -0.5, 2.5, -1.5]; relu = [1.5, 0, 2.5, 0].
    let values = run_session(backend, exec, vec![dummy], vec![4], inputs);
    assert_close(&values, &[1.5, 0.0, 2.5, 0.0], 1e-2);
}

#[test]
fn test_client_plaintext_input_computes_locally() {
    // An unencrypted upload leaves every slot plaintext, so the nonlinear op
    // partitions into zero offload batches and runs entirely server-side.
    let backend = client_backend(&[("x", "client_input")]);

    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[3]);
    let activated = g.relu(x).unwrap();
    g.result(activated).unwrap();
    let graph = g.build().unwrap();

    let exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let dummy = backend.create_plain_tensor(ElementType::F32, &[3], false, "x");

    let mut inputs = HashMap::new();
    inputs.insert(
        "x".to_string(),
        ClientInput {
            values: vec![-4.0, 0.0, 4.0],
            encrypt: false,
        },
    );

    let port_exec = {
        let mut exec = exec;
        let port = exec.start_server().unwrap();
        (port, exec)
    };
    let (port, mut exec) = port_exec;

    let backend_for_server = backend.clone();
    let server = thread::spawn(move || {
        let mut outputs =
            vec![backend_for_server.create_plain_tensor(ElementType::F32, &[3], false, "out")];
        exec.call(&mut outputs, &[dummy]).unwrap();
        outputs
    });

    let client = HeClient::connect(("127.0.0.1", port), inputs).unwrap();
    let values = client.run().unwrap();
    let outputs = server.join().expect("server thread panicked");

    assert!(!outputs[0].any_encrypted_data());
    assert_close(&values, &[0.0, 0.0, 4.0], 1e-9);
}

#[test]
fn test_client_mode_requires_client_parameter() {
    let backend = client_backend(&[]);
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2]);
    let b = g.parameter("b", ElementType::F32, &[2]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    assert!(HeExecutable::compile(backend, graph, false).is_err());
}
