//! End-to-end forward-pass tests: golden regression, reference parity, and
//! quantized-versus-real agreement.

use quantnet::net::{AZ_POLICY_PLANES, BOARD_SIZE, INPUT_PLANES, POLICY_OUTPUTS};
use quantnet::{Net, NetError, NetworkConfig, PolicyMap, SigmoidKind, Tensor, ValueKind, QUANTIZE_FACTOR};

const Q_F: f64 = QUANTIZE_FACTOR as f64;

/// Gather table routing native position p to canonical slot p for the first
/// 1858 positions; the rest are unused
fn identity_map() -> PolicyMap {
    let native = AZ_POLICY_PLANES * BOARD_SIZE * BOARD_SIZE;
    let table: Vec<i64> = (0..native)
        .map(|p| if p < POLICY_OUTPUTS { p as i64 } else { -1 })
        .collect();
    PolicyMap::from_table(&table).unwrap()
}

fn small_config(quantize: bool) -> NetworkConfig {
    NetworkConfig {
        residual_channels: 8,
        residual_blocks: 1,
        policy_channels: 8,
        se_ratio: 4,
        value_kind: ValueKind::Wdl,
        quantize,
        gate: SigmoidKind::Float,
    }
}

/// Wire tensors for the small topology: every convolution and linear weight
/// 0.01, every bias zero, identity batch-norms
fn constant_wire_weights() -> Vec<Vec<f64>> {
    let conv = |out: usize, inp: usize, k: usize| vec![0.01; out * inp * k * k];
    let bn = |c: usize| {
        [
            vec![1.0; c],
            vec![0.0; c],
            vec![0.0; c],
            vec![1.0; c],
        ]
    };

    let mut w = Vec::new();
    // Initial conv block
    w.push(conv(8, INPUT_PLANES, 3));
    w.extend(bn(8));
    // Residual block: conv1, bn1, conv2, bn2, se lin1, se lin2
    w.push(conv(8, 8, 3));
    w.extend(bn(8));
    w.push(conv(8, 8, 3));
    w.extend(bn(8));
    w.push(vec![0.01; 2 * 8]);
    w.push(vec![0.0; 2]);
    w.push(vec![0.01; 16 * 2]);
    w.push(vec![0.0; 16]);
    // Policy head: conv block, then the native-plane convolution with bias
    w.push(conv(8, 8, 3));
    w.extend(bn(8));
    w.push(conv(AZ_POLICY_PLANES, 8, 3));
    w.push(vec![0.0; AZ_POLICY_PLANES]);
    // Value head: conv block, lin1, lin2
    w.push(conv(32, 8, 1));
    w.extend(bn(32));
    w.push(vec![0.01; 128 * 32 * 64]);
    w.push(vec![0.0; 128]);
    w.push(vec![0.01; 3 * 128]);
    w.push(vec![0.0; 3]);
    w
}

fn loaded_net(quantize: bool) -> Net {
    let mut net = Net::new(small_config(quantize), identity_map()).unwrap();
    net.load_weights(&constant_wire_weights()).unwrap();
    if quantize {
        net.quantize_parameters();
    }
    net
}

fn ones_input(batch: usize) -> Tensor<f64> {
    Tensor::filled(vec![batch, INPUT_PLANES, BOARD_SIZE, BOARD_SIZE], 1.0).unwrap()
}

#[test]
fn wire_weight_count_matches_topology() {
    let net = Net::new(small_config(true), identity_map()).unwrap();
    assert_eq!(net.weight_tensor_count(), 35);
    assert_eq!(constant_wire_weights().len(), 35);
}

/// Golden regression: the quantized forward pass over all-ones input with
/// constant weights produces these exact fixed-point values.
#[test]
fn golden_quantized_forward() {
    let net = loaded_net(true);
    let (policy, value) = net.forward(&ones_input(1)).unwrap();

    assert_eq!(policy.shape(), &[1, POLICY_OUTPUTS]);
    assert_eq!(value.shape(), &[1, 3]);

    // Corner of native plane 0
    assert_eq!(policy.data()[0], 2_799_235.0 / Q_F);
    // Edge neighbour of the corner
    assert_eq!(policy.data()[1], 4_773_976.0 / Q_F);
    // Interior cell (1,1) of plane 0
    assert_eq!(policy.data()[9], 8_144_631.0 / Q_F);
    // Spatial symmetry: the opposite corner of plane 0 and the corner of
    // plane 1 see identical receptive fields
    assert_eq!(policy.data()[63], policy.data()[0]);
    assert_eq!(policy.data()[64], policy.data()[0]);
    assert_eq!(policy.data()[1857], policy.data()[1]);

    // All three WDL logits are equal by construction
    for &v in value.data() {
        assert_eq!(v, 42_102_115.0 / Q_F);
    }
}

/// The real path reproduces an independently computed floating-point
/// reference for the identical topology.
#[test]
fn real_forward_matches_reference() {
    let net = loaded_net(false);
    let (policy, value) = net.forward(&ones_input(1)).unwrap();

    let tol = 1e-9;
    assert!((policy.data()[0] - 2.6714188869058884).abs() < tol);
    assert!((policy.data()[9] - 7.7732739388589955).abs() < tol);
    assert!((policy.data()[1857] - 4.556145088373426).abs() < tol);
    for &v in value.data() {
        assert!((v - 40.18319167319952).abs() < tol);
    }
}

/// Truncation error stays small for well-conditioned weights: the two paths
/// agree within a coarse absolute tolerance.
#[test]
fn quantized_tracks_real_within_tolerance() {
    let quant = loaded_net(true);
    let real = loaded_net(false);
    let input = ones_input(1);

    let (pq, vq) = quant.forward(&input).unwrap();
    let (pr, vr) = real.forward(&input).unwrap();

    for (a, b) in pq.data().iter().zip(pr.data()) {
        assert!((a - b).abs() < 0.05, "policy diverged: {a} vs {b}");
    }
    for (a, b) in vq.data().iter().zip(vr.data()) {
        assert!((a - b).abs() < 0.05, "value diverged: {a} vs {b}");
    }
}

/// Batch elements do not interact: evaluating two positions together equals
/// evaluating them separately.
#[test]
fn batch_elements_are_independent() {
    let net = loaded_net(true);

    let mut data = vec![1.0; 2 * INPUT_PLANES * 64];
    for v in &mut data[INPUT_PLANES * 64..] {
        *v = 0.5;
    }
    let batch = Tensor::from_vec(vec![2, INPUT_PLANES, 8, 8], data).unwrap();
    let (policy2, value2) = net.forward(&batch).unwrap();

    let (p_first, v_first) = net.forward(&ones_input(1)).unwrap();
    let half = Tensor::filled(vec![1, INPUT_PLANES, 8, 8], 0.5).unwrap();
    let (p_second, v_second) = net.forward(&half).unwrap();

    assert_eq!(&policy2.data()[..POLICY_OUTPUTS], p_first.data());
    assert_eq!(&policy2.data()[POLICY_OUTPUTS..], p_second.data());
    assert_eq!(&value2.data()[..3], v_first.data());
    assert_eq!(&value2.data()[3..], v_second.data());
}

/// Import applies x99 to the fifty-move-rule plane, export divides it back:
/// a full load-export cycle is lossless.
#[test]
fn weight_roundtrip_law() {
    let mut net = Net::new(small_config(true), identity_map()).unwrap();
    let weights = constant_wire_weights();
    net.load_weights(&weights).unwrap();

    let exported = net.export_weights();
    assert_eq!(exported, weights);

    // And a second cycle through the exported tensors is stable
    net.load_weights(&exported).unwrap();
    assert_eq!(net.export_weights(), weights);
}

#[test]
fn double_quantization_is_observable() {
    // Calling quantize_parameters twice double-scales the parameters; this
    // is the documented non-idempotence, not a guarded error.
    let mut net = Net::new(small_config(true), identity_map()).unwrap();
    net.load_weights(&constant_wire_weights()).unwrap();
    net.quantize_parameters();
    let once = net.export_weights();
    net.quantize_parameters();
    let twice = net.export_weights();

    assert_eq!(once[0][0], (0.01f64 * Q_F).round());
    assert_eq!(twice[0][0], once[0][0] * Q_F);
}

#[test]
fn forward_mode_preconditions() {
    let net = Net::new(small_config(true), identity_map()).unwrap();
    assert_eq!(
        net.forward(&ones_input(1)).unwrap_err(),
        NetError::ParametersNotQuantized
    );

    let mut net = Net::new(small_config(false), identity_map()).unwrap();
    net.quantize_parameters();
    assert_eq!(
        net.forward(&ones_input(1)).unwrap_err(),
        NetError::ParametersQuantized
    );
}

#[cfg(feature = "serde")]
#[test]
fn quantized_json_export_parses() {
    let net = loaded_net(true);
    let json = net.export_quantized_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["quantize_factor"], QUANTIZE_FACTOR);
    assert_eq!(parsed["tensors"].as_array().unwrap().len(), 35);
}

mod proptest_tests {
    use proptest::prelude::*;
    use quantnet::net::sigmoid::{float_gate, piecewise_gate};
    use quantnet::{dequantize, quantize, rescale_down, QUANTIZE_FACTOR};

    proptest! {
        /// Property: rescale_down truncates toward zero, never toward
        /// negative infinity
        #[test]
        fn prop_rescale_truncates_toward_zero(x in -1_000_000_000i64..1_000_000_000, by in 1i64..1_000_000) {
            let truncated = rescale_down(x, by);
            let floored = x.div_euclid(by);
            if x % by == 0 || x >= 0 {
                prop_assert_eq!(truncated, floored);
            } else {
                prop_assert_eq!(truncated, floored + 1);
            }
            // Truncation never increases magnitude
            prop_assert!(truncated.unsigned_abs() <= x.unsigned_abs());
        }

        /// Property: quantize then dequantize recovers the value within half
        /// a quantization step
        #[test]
        fn prop_quantize_roundtrip(v in -1000.0f64..1000.0) {
            let recovered = dequantize(quantize(v));
            // Half a step, plus slack for the rounding of the product itself
            let bound = (0.5 + 1e-6) / QUANTIZE_FACTOR as f64;
            prop_assert!((recovered - v).abs() <= bound);
        }

        /// Property: both gate formulas are bounded to [0, Q] for any
        /// pre-activation magnitude
        #[test]
        fn prop_gates_are_bounded(x in any::<i32>()) {
            let x = i64::from(x) * 1024; // cover far past the saturation bound
            let g = float_gate(x);
            prop_assert!((0.0..=QUANTIZE_FACTOR as f64).contains(&g));
            let p = piecewise_gate(x);
            prop_assert!((0..=QUANTIZE_FACTOR).contains(&p));
        }

        /// Property: the piecewise gate saturates cleanly outside the bound
        #[test]
        fn prop_piecewise_saturation(x in 2_097_152i64..i64::MAX / 2) {
            prop_assert_eq!(piecewise_gate(x), QUANTIZE_FACTOR);
            prop_assert_eq!(piecewise_gate(-x), 0);
        }
    }
}
