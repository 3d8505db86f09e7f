//! Property tests for the CPU summed-area table and soft-shadow sampler.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use satvsm::shadow::*;

fn random_variance(size: u32, seed: u64) -> VarianceBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let depths: Vec<f32> = (0..size * size).map(|_| rng.random_range(0.0..1.0)).collect();
    VarianceBuffer::from_depths(size, &depths).expect("Failed to build variance buffer")
}

/// Inclusive 2D prefix sums in f64, by recurrence.
fn reference_prefix(buf: &VarianceBuffer) -> Vec<(f64, f64)> {
    let n = buf.size() as usize;
    let mut p = vec![(0.0f64, 0.0f64); n * n];
    for y in 0..n {
        for x in 0..n {
            let m = buf.get(x as u32, y as u32);
            let up = if y > 0 { p[(y - 1) * n + x] } else { (0.0, 0.0) };
            let left = if x > 0 { p[y * n + x - 1] } else { (0.0, 0.0) };
            let diag = if x > 0 && y > 0 { p[(y - 1) * n + x - 1] } else { (0.0, 0.0) };
            p[y * n + x] = (
                m.m1 as f64 + up.0 + left.0 - diag.0,
                m.m2 as f64 + up.1 + left.1 - diag.1,
            );
        }
    }
    p
}

fn assert_close(got: f32, expected: f64, what: &str) {
    let tol = 1e-5 * expected.abs().max(1.0);
    assert!(
        (got as f64 - expected).abs() <= tol,
        "{what}: got {got}, expected {expected}"
    );
}

#[test]
fn test_prefix_sum_matches_reference() {
    for (size, width) in [(1, 4), (7, 4), (64, 32), (100, 32), (257, 256), (300, 64)] {
        let buf = random_variance(size, size as u64);
        let sat = SatBuilder::new(width).unwrap().build(&buf);
        let reference = reference_prefix(&buf);
        for (i, (got, want)) in sat.texels().iter().zip(&reference).enumerate() {
            assert_close(got.m1, want.0, &format!("S={size} texel {i} m1"));
            assert_close(got.m2, want.1, &format!("S={size} texel {i} m2"));
        }
    }
}

#[test]
fn test_box_queries_match_brute_force() {
    let size = 45u32;
    let buf = random_variance(size, 7);
    let sat = SatBuilder::new(16).unwrap().build(&buf);
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..300 {
        // Bias towards borders so clipping is exercised
        let x = if rng.random_bool(0.3) { rng.random_range(0..3) } else { rng.random_range(0..size) };
        let y = if rng.random_bool(0.3) { size - 1 - rng.random_range(0..3) } else { rng.random_range(0..size) };
        let r = rng.random_range(1..=max_radius_for(size));
        let q = ShadowQuery::new(x, y, r);

        // Zero-padded brute force: texels outside the table contribute nothing
        let (mut s1, mut s2) = (0.0f64, 0.0f64);
        let (xi, yi, ri) = (x as i64, y as i64, r as i64);
        for j in yi - ri..=yi + ri {
            for i in xi - ri..=xi + ri {
                if (0..size as i64).contains(&i) && (0..size as i64).contains(&j) {
                    let m = buf.get(i as u32, j as u32);
                    s1 += m.m1 as f64;
                    s2 += m.m2 as f64;
                }
            }
        }
        let area = (2 * r + 1) * (2 * r + 1);

        let sum = sat.box_sum(q);
        // f32 corner sums near 2000 carry ~1e-4 absolute error each
        assert!((sum.m1 as f64 - s1).abs() < 1e-2, "{q:?}: {} vs {s1}", sum.m1);
        assert!((sum.m2 as f64 - s2).abs() < 1e-2, "{q:?}: {} vs {s2}", sum.m2);

        let stats = sat.box_statistics(q);
        assert_eq!(stats.area, area, "{q:?}");
        let mean = s1 / area as f64;
        let mean_sq = s2 / area as f64;
        assert!((stats.mean as f64 - mean).abs() < 1e-2 / area as f64, "{q:?}: {} vs {mean}", stats.mean);
        assert!((stats.mean_sq as f64 - mean_sq).abs() < 1e-2 / area as f64, "{q:?}");
    }
}

#[test]
fn test_builds_are_bit_identical() {
    let buf = random_variance(130, 3);
    let builder = SatBuilder::new(64).unwrap();
    let a = builder.build(&buf);
    let b = builder.build(&buf);
    let bits = |t: &SummedAreaTable| -> Vec<(u32, u32)> {
        t.texels().iter().map(|m| (m.m1.to_bits(), m.m2.to_bits())).collect()
    };
    assert_eq!(bits(&a), bits(&b));
}

#[test]
fn test_attenuation_monotonic_in_depth() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..500 {
        let mean: f32 = rng.random_range(0.0..0.9);
        let variance: f32 = rng.random_range(0.0..0.05);
        let stats = BoxStatistics {
            mean,
            mean_sq: variance + mean * mean,
            area: 1,
        };
        let saturation: f32 = rng.random_range(0.0..1.0);
        let mut prev = 1.0f32;
        let mut d = mean;
        while d <= 1.0 {
            let a = attenuation(&stats, d, saturation);
            assert!(a <= prev + 1e-6, "mean {mean} var {variance} s {saturation} d {d}: {a} > {prev}");
            prev = a;
            d += 0.01;
        }
    }
}

#[test]
fn test_attenuation_in_unit_range() {
    let mut rng = StdRng::seed_from_u64(12);
    for _ in 0..2000 {
        let stats = BoxStatistics {
            mean: rng.random_range(-1.0..2.0),
            mean_sq: rng.random_range(-1.0..4.0),
            area: 9,
        };
        let d: f32 = rng.random_range(-1.0..2.0);
        for s in [0.0, rng.random_range(0.0..1.0), 1.0] {
            let a = attenuation(&stats, d, s);
            assert!((0.0..=1.0).contains(&a), "{stats:?} d {d} s {s}: {a}");
        }
    }
}

#[test]
fn test_uniform_buffer_scenario() {
    let size = 8;
    let buf = VarianceBuffer::from_moments(size, vec![Moments::new(0.5, 0.26); 64]).unwrap();
    let sat = SatBuilder::default().build(&buf);
    let params = PenumbraParameters {
        shadow_saturation: 0.2,
        ..Default::default()
    };
    let sampler = SoftShadowSampler::new(&sat, params);
    let q = ShadowQuery::new(4, 4, 2);

    assert_eq!(sampler.sample_query(q, 0.5), 1.0);

    let v = 0.26f64 - 0.25;
    let p = v / (v + 0.4 * 0.4);
    let expected = ((p - 0.2) / 0.8).clamp(0.0, 1.0);
    assert!((sampler.sample_query(q, 0.9) as f64 - expected).abs() < 1e-5);

    // Without light-bleed reduction the raw bound shows through
    let stats = sat.box_statistics(q);
    assert!((attenuation(&stats, 0.9, 0.0) as f64 - p).abs() < 1e-5);
}

#[test]
fn test_single_occluder_leaves_background_exact() {
    let size = 32;
    let mut buf = VarianceBuffer::new(size).unwrap();
    buf.splat_depth(20, 20, 0.1);
    let sat = SatBuilder::new(8).unwrap().build(&buf);

    // Corners of these boxes never include the occluder
    for (x, y) in [(5, 5), (28, 5), (5, 28)] {
        let stats = sat.box_statistics(ShadowQuery::new(x, y, 1));
        assert_eq!(stats.mean, 1.0);
        assert_eq!(stats.mean_sq, 1.0);
    }

    let params = PenumbraParameters {
        light_source_radius: 1,
        shadow_saturation: 0.0,
        ..Default::default()
    };
    let sampler = SoftShadowSampler::new(&sat, params);
    let at = |x: u32, y: u32, d: f32| {
        let uv = Vec2::new((x as f32 + 0.5) / size as f32, (y as f32 + 0.5) / size as f32);
        sampler.sample(&LightSpacePoint::new(uv, d))
    };
    assert_eq!(at(5, 5, 0.95), 1.0);
    assert!(at(20, 20, 0.95) < 1.0);
}

#[test]
fn test_saturation_one_is_hard_step() {
    let stats = BoxStatistics {
        mean: 0.4,
        mean_sq: 0.2,
        area: 25,
    };
    assert_eq!(attenuation(&stats, 0.41, 1.0), 0.0);
    assert_eq!(attenuation(&stats, 0.4, 1.0), 1.0);
}

#[test]
fn test_out_of_frustum_is_lit() {
    let buf = VarianceBuffer::from_depths(4, &[0.0; 16]).unwrap();
    let sat = SatBuilder::default().build(&buf);
    let sampler = SoftShadowSampler::new(&sat, PenumbraParameters::default());
    for p in [
        LightSpacePoint::new(Vec2::new(-0.1, 0.5), 0.9),
        LightSpacePoint::new(Vec2::new(0.5, 1.1), 0.9),
        LightSpacePoint::new(Vec2::new(0.5, 0.5), 1.5),
        LightSpacePoint::new(Vec2::new(f32::NAN, 0.5), 0.9),
    ] {
        assert_eq!(sampler.sample(&p), 1.0, "{p:?}");
    }
    // Inside: fully occluded by a blocker at depth 0
    assert!(sampler.sample(&LightSpacePoint::new(Vec2::splat(0.5), 0.9)) < 0.01);
}

/// f32 corner sums lose precision far from the origin; keeps the size of
/// that error visible at the default resolution.
#[test]
fn test_precision_loss_grows_with_distance_from_origin() {
    let size = 1024;
    let buf = VarianceBuffer::from_moments(size, vec![Moments::new(0.5, 0.26); (size * size) as usize]).unwrap();
    let sat = SatBuilder::default().build(&buf);
    let params = PenumbraParameters {
        shadow_saturation: 0.0,
        ..Default::default()
    };
    let sampler = SoftShadowSampler::new(&sat, params);
    let expected = 0.01f64 / (0.01 + 0.16);

    let mut errors = Vec::new();
    for texel in [4, 512, 1000] {
        let got = sampler.sample_query(ShadowQuery::new(texel, texel, 2), 0.9);
        let err = (got as f64 - expected).abs();
        println!("S={size} texel ({texel}, {texel}): {got} (expected {expected:.7}, error {err:.2e})");
        errors.push(err);
    }
    assert!(errors[0] < 1e-5, "near the origin the table is exact: {:.2e}", errors[0]);
    // Known limitation: about 3.5e-3 at (1000, 1000)
    assert!(errors.iter().all(|&e| e < 1e-2), "{errors:?}");
}
