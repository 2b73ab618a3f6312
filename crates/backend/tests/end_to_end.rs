//! Executor integration tests: whole graphs over mixed plaintext and
//! ciphertext tensors, without a client session.

use std::collections::{BTreeSet, HashMap};

use veilnn_backend::{
    BackendConfig, ElementType, GraphBuilder, HeBackend, HeEncryptionParameters, HeExecutable,
    PadMode,
};

fn backend() -> std::sync::Arc<HeBackend> {
    HeBackend::new(HeEncryptionParameters::default(), BackendConfig::default()).unwrap()
}

fn backend_with_config(entries: &[(&str, &str)]) -> std::sync::Arc<HeBackend> {
    let map: HashMap<String, String> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    HeBackend::with_config(&map).unwrap()
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < tol, "got {a}, expected {e} (all: {actual:?})");
    }
}

#[test]
fn test_add_cipher_cipher() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2, 3]);
    let b = g.parameter("b", ElementType::F32, &[2, 3]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let mut ta = backend.create_cipher_tensor(ElementType::F32, &[2, 3], false, "a");
    ta.write_values(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    backend.encrypt_tensor(&mut ta).unwrap();

    let mut tb = backend.create_cipher_tensor(ElementType::F32, &[2, 3], false, "b");
    // b[i] = i for even i, 1 - i for odd i.
    tb.write_values(&[0.0, 0.0, 2.0, -2.0, 4.0, -4.0]).unwrap();
    backend.encrypt_tensor(&mut tb).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[2, 3], false, "out")];
    exec.call(&mut outputs, &[ta, tb]).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[0.0, 1.0, 4.0, 1.0, 8.0, 1.0], 1e-3);
}

#[test]
fn test_add_matches_scenario_vector() {
    // a = [0..5], b[i] = i for even i else 1 - i: sum = [0, 0, 4, -2, 8, -4].
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2, 3]);
    let b = g.parameter("b", ElementType::F32, &[2, 3]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let mut ta = backend.create_cipher_tensor(ElementType::F32, &[2, 3], false, "a");
    ta.write_values(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    backend.encrypt_tensor(&mut ta).unwrap();

    let b_values: Vec<f64> = (0..6)
        .map(|i| if i % 2 == 0 { i as f64 } else { 1.0 - i as f64 })
        .collect();
    let mut tb = backend.create_cipher_tensor(ElementType::F32, &[2, 3], false, "b");
    tb.write_values(&b_values).unwrap();
    backend.encrypt_tensor(&mut tb).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[2, 3], false, "out")];
    exec.call(&mut outputs, &[ta, tb]).unwrap();
    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[0.0, 0.0, 4.0, -2.0, 8.0, -4.0], 1e-3);
}

#[test]
fn test_add_packed_batches() {
    let backend = backend_with_config(&[("a", "encrypt,packed"), ("b", "packed")]);
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[4, 2]);
    let b = g.parameter("b", ElementType::F32, &[4, 2]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let a_values: Vec<f64> = (0..8).map(|i| i as f64).collect();
    let b_values: Vec<f64> = (0..8).map(|i| 10.0 * i as f64).collect();
    let mut ta = backend.create_plain_tensor(ElementType::F32, &[4, 2], false, "a");
    ta.write_values(&a_values).unwrap();
    let mut tb = backend.create_plain_tensor(ElementType::F32, &[4, 2], false, "b");
    tb.write_values(&b_values).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[4, 2], true, "out")];
    exec.call(&mut outputs, &[ta, tb]).unwrap();

    assert!(outputs[0].is_packed());
    let values = backend.read_tensor(&outputs[0]).unwrap();
    let expected: Vec<f64> = (0..8).map(|i| 11.0 * i as f64).collect();
    assert_close(&values, &expected, 1e-3);
}

#[test]
fn test_add_complex_packed() {
    let config = r#"{
        "scheme_name": "HE_SEAL",
        "poly_modulus_degree": 1024,
        "security_level": 0,
        "coeff_modulus": [30, 30, 30, 30, 30],
        "scale": 1073741824,
        "complex_packing": true
    }"#;
    let backend = backend_with_config(&[
        ("encryption_parameters", config),
        ("a", "encrypt,packed"),
        ("b", "encrypt,packed"),
    ]);
    assert!(backend.complex_packing());

    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[6, 1]);
    let b = g.parameter("b", ElementType::F32, &[6, 1]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let a_values = vec![1.0, -2.0, 3.0, -4.0, 5.0, -6.0];
    let b_values = vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
    let mut ta = backend.create_plain_tensor(ElementType::F32, &[6, 1], false, "a");
    ta.write_values(&a_values).unwrap();
    let mut tb = backend.create_plain_tensor(ElementType::F32, &[6, 1], false, "b");
    tb.write_values(&b_values).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[6, 1], true, "out")];
    exec.call(&mut outputs, &[ta, tb]).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[11.0, 18.0, 33.0, 36.0, 55.0, 54.0], 1e-3);
}

#[test]
fn test_dot_cipher_plain() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2, 2]);
    let b = g.parameter("b", ElementType::F32, &[2, 2]);
    let d = g.dot(a, b, 1).unwrap();
    g.result(d).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let mut ta = backend.create_cipher_tensor(ElementType::F32, &[2, 2], false, "a");
    ta.write_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    backend.encrypt_tensor(&mut ta).unwrap();

    let mut tb = backend.create_plain_tensor(ElementType::F32, &[2, 2], false, "b");
    tb.write_values(&[5.0, 6.0, 7.0, 8.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[2, 2], false, "out")];
    exec.call(&mut outputs, &[ta, tb]).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[19.0, 22.0, 43.0, 50.0], 1e-2);
}

#[test]
fn test_convolution_all_cipher_matches_reference() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[1, 1, 5, 5]);
    let w = g.parameter("w", ElementType::F32, &[1, 1, 3, 3]);
    let conv = g
        .convolution(x, w, &[1, 1], &[1, 1], &[0, 0], &[0, 0])
        .unwrap();
    g.result(conv).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let x_values: Vec<f64> = (0..25).map(|i| ((i % 7) as f64 - 3.0) * 0.25).collect();
    let w_values: Vec<f64> = (0..9).map(|i| ((i % 3) as f64 - 1.0) * 0.5).collect();

    let mut tx = backend.create_cipher_tensor(ElementType::F32, &[1, 1, 5, 5], false, "x");
    tx.write_values(&x_values).unwrap();
    backend.encrypt_tensor(&mut tx).unwrap();
    let mut tw = backend.create_cipher_tensor(ElementType::F32, &[1, 1, 3, 3], false, "w");
    tw.write_values(&w_values).unwrap();
    backend.encrypt_tensor(&mut tw).unwrap();

    let mut outputs =
        vec![backend.create_plain_tensor(ElementType::F32, &[1, 1, 3, 3], false, "out")];
    exec.call(&mut outputs, &[tx, tw]).unwrap();

    // Floating-point reference.
    let mut expected = vec![0.0f64; 9];
    for oy in 0..3 {
        for ox in 0..3 {
            let mut acc = 0.0;
            for ky in 0..3 {
                for kx in 0..3 {
                    acc += x_values[(oy + ky) * 5 + ox + kx] * w_values[ky * 3 + kx];
                }
            }
            expected[oy * 3 + ox] = acc;
        }
    }

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &expected, 1e-3);
}

#[test]
fn test_batch_norm_inference_centered_input() {
    // ε=1e-5, γ=1, β=0, σ²=1, input = μ: the normalized output is zero.
    let backend = backend();
    let mut g = GraphBuilder::new();
    let gamma = g.parameter("gamma", ElementType::F32, &[4]);
    let beta = g.parameter("beta", ElementType::F32, &[4]);
    let x = g.parameter("x", ElementType::F32, &[1, 4]);
    let mean = g.parameter("mean", ElementType::F32, &[4]);
    let var = g.parameter("var", ElementType::F32, &[4]);
    let bn = g
        .batch_norm_inference(gamma, beta, x, mean, var, 1e-5)
        .unwrap();
    g.result(bn).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let mu = vec![0.0, 1.0, 2.0, 3.0];
    let make = |shape: &[usize], values: &[f64]| {
        let mut t = backend.create_plain_tensor(ElementType::F32, shape, false, "t");
        t.write_values(values).unwrap();
        t
    };

    let mut tx = backend.create_cipher_tensor(ElementType::F32, &[1, 4], false, "x");
    tx.write_values(&mu).unwrap();
    backend.encrypt_tensor(&mut tx).unwrap();

    let inputs = vec![
        make(&[4], &[1.0; 4]),
        make(&[4], &[0.0; 4]),
        tx,
        make(&[4], &mu),
        make(&[4], &[1.0; 4]),
    ];
    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[1, 4], false, "out")];
    exec.call(&mut outputs, &inputs).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[0.0; 4], 1e-2);
}

#[test]
fn test_multiply_then_add_across_levels() {
    // (a · b) sits one level below c after rescale; the modulus manager must
    // reconcile the mixed-level addition.
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[3]);
    let b = g.parameter("b", ElementType::F32, &[3]);
    let c = g.parameter("c", ElementType::F32, &[3]);
    let prod = g.multiply(a, b).unwrap();
    let sum = g.add(prod, c).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let encrypted = |values: &[f64]| {
        let mut t = backend.create_cipher_tensor(ElementType::F32, &[3], false, "t");
        t.write_values(values).unwrap();
        backend.encrypt_tensor(&mut t).unwrap();
        t
    };

    let inputs = vec![
        encrypted(&[1.0, 2.0, 3.0]),
        encrypted(&[4.0, 5.0, 6.0]),
        encrypted(&[10.0, 10.0, 10.0]),
    ];
    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[3], false, "out")];
    exec.call(&mut outputs, &inputs).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[14.0, 20.0, 28.0], 1e-2);
}

#[test]
fn test_lazy_mod_dot_equivalence() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[8]);
    let b = g.parameter("b", ElementType::F32, &[8]);
    let d = g.dot(a, b, 1).unwrap();
    g.result(d).unwrap();
    let graph = g.build().unwrap();

    let a_values: Vec<f64> = (0..8).map(|i| (i as f64) * 0.5 - 2.0).collect();
    let b_values: Vec<f64> = (0..8).map(|i| 1.5 - (i as f64) * 0.25).collect();
    let expected: f64 = a_values.iter().zip(&b_values).map(|(x, y)| x * y).sum();

    let run = |lazy: bool| -> f64 {
        backend.set_lazy_mod(lazy);
        let mut exec = HeExecutable::compile(backend.clone(), graph.clone(), false).unwrap();
        let encrypted = |values: &[f64]| {
            let mut t = backend.create_cipher_tensor(ElementType::F32, &[8], false, "t");
            t.write_values(values).unwrap();
            backend.encrypt_tensor(&mut t).unwrap();
            t
        };
        let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[], false, "out")];
        exec.call(&mut outputs, &[encrypted(&a_values), encrypted(&b_values)])
            .unwrap();
        backend.read_tensor(&outputs[0]).unwrap()[0]
    };

    let strict = run(false);
    let lazy = run(true);
    backend.set_lazy_mod(false);

    assert!((strict - expected).abs() < 1e-2, "strict {strict} vs {expected}");
    assert!((strict - lazy).abs() < 1e-2, "strict {strict} vs lazy {lazy}");
}

#[test]
fn test_plain_graph_shape_ops() {
    // Slice, reverse, reshape, broadcast, concat, pad over plaintext data.
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[2, 3]);
    let sliced = g.slice(x, &[0, 1], &[2, 3], &[1, 1]).unwrap(); // [2, 2]
    let reversed = g.reverse(sliced, BTreeSet::from([1])).unwrap(); // [2, 2]
    let reshaped = g.reshape(reversed, &[1, 0], &[4]).unwrap(); // transpose + flatten
    g.result(reshaped).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let mut tx = backend.create_plain_tensor(ElementType::F32, &[2, 3], false, "x");
    tx.write_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[4], false, "out")];
    exec.call(&mut outputs, &[tx]).unwrap();

    // slice → [[2,3],[5,6]]; reverse axis 1 → [[3,2],[6,5]];
    // transpose-read → [3,6,2,5].
    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[3.0, 6.0, 2.0, 5.0], 1e-9);
}

#[test]
fn test_plain_graph_reductions_and_nonlinear() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[2, 2]);
    let negated = g.negative(x).unwrap();
    let activated = g.relu(negated).unwrap();
    let summed = g.sum(activated, BTreeSet::from([0, 1])).unwrap();
    g.result(summed).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let mut tx = backend.create_plain_tensor(ElementType::F32, &[2, 2], false, "x");
    tx.write_values(&[1.0, -2.0, 3.0, -4.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[], false, "out")];
    exec.call(&mut outputs, &[tx]).unwrap();

    // -x = [-1, 2, -3, 4]; relu = [0, 2, 0, 4]; sum = 6.
    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[6.0], 1e-9);
}

#[test]
fn test_avg_pool_and_softmax_graph() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[1, 1, 2, 2]);
    let pooled = g
        .avg_pool(x, &[2, 2], &[2, 2], &[0, 0], &[0, 0], false)
        .unwrap(); // [1, 1, 1, 1]
    let flat = g.reshape(pooled, &[0, 1, 2, 3], &[1, 1]).unwrap();
    let soft = g.softmax(flat, BTreeSet::from([1])).unwrap();
    g.result(soft).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let mut tx = backend.create_plain_tensor(ElementType::F32, &[1, 1, 2, 2], false, "x");
    tx.write_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[1, 1], false, "out")];
    exec.call(&mut outputs, &[tx]).unwrap();

    // Softmax over a single element is 1 regardless of the pooled value.
    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[1.0], 1e-9);
}

#[test]
fn test_pad_graph_with_constant_value() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[2, 2]);
    let pad_value = g.constant(ElementType::F32, &[], vec![0.5]).unwrap();
    let padded = g
        .pad(x, pad_value, &[1, 1], &[0, 0], PadMode::Constant)
        .unwrap(); // [3, 3]
    g.result(padded).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let mut tx = backend.create_plain_tensor(ElementType::F32, &[2, 2], false, "x");
    tx.write_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[3, 3], false, "out")];
    exec.call(&mut outputs, &[tx]).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(
        &values,
        &[0.5, 0.5, 0.5, 0.5, 1.0, 2.0, 0.5, 3.0, 4.0],
        1e-9,
    );
}

#[test]
fn test_constant_multiply_encrypted_graph() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let x = g.parameter("x", ElementType::F32, &[3]);
    let weights = g
        .constant(ElementType::F32, &[3], vec![2.0, -1.0, 0.5])
        .unwrap();
    let prod = g.multiply(x, weights).unwrap();
    g.result(prod).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();

    let mut tx = backend.create_cipher_tensor(ElementType::F32, &[3], false, "x");
    tx.write_values(&[4.0, 4.0, 4.0]).unwrap();
    backend.encrypt_tensor(&mut tx).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[3], false, "out")];
    exec.call(&mut outputs, &[tx]).unwrap();

    let values = backend.read_tensor(&outputs[0]).unwrap();
    assert_close(&values, &[8.0, -4.0, 2.0], 1e-2);
}

#[test]
fn test_performance_counters_populated() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2]);
    let b = g.parameter("b", ElementType::F32, &[2]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let make = |values: &[f64]| {
        let mut t = backend.create_plain_tensor(ElementType::F32, &[2], false, "t");
        t.write_values(values).unwrap();
        t
    };
    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[2], false, "out")];
    exec.call(&mut outputs, &[make(&[1.0, 2.0]), make(&[3.0, 4.0])])
        .unwrap();

    let counters = exec.performance_counters();
    assert!(counters.iter().any(|c| c.name.starts_with("Add")));
    assert!(counters.iter().all(|c| c.calls == 1));
}

#[test]
fn test_unsupported_shape_rejected_per_call() {
    let backend = backend();
    let mut g = GraphBuilder::new();
    let a = g.parameter("a", ElementType::F32, &[2]);
    let b = g.parameter("b", ElementType::F32, &[2]);
    let sum = g.add(a, b).unwrap();
    g.result(sum).unwrap();
    let graph = g.build().unwrap();

    let mut exec = HeExecutable::compile(backend.clone(), graph, false).unwrap();
    let mut wrong = backend.create_plain_tensor(ElementType::F32, &[3], false, "a");
    wrong.write_values(&[1.0, 2.0, 3.0]).unwrap();
    let mut ok = backend.create_plain_tensor(ElementType::F32, &[2], false, "b");
    ok.write_values(&[1.0, 2.0]).unwrap();

    let mut outputs = vec![backend.create_plain_tensor(ElementType::F32, &[2], false, "out")];
    assert!(exec.call(&mut outputs, &[wrong, ok]).is_err());
}
