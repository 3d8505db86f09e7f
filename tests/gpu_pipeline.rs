//! GPU pipeline tests against the CPU reference.
//!
//! Every test returns early when no adapter is available (e.g. CI without a GPU)
//! or when the adapter lacks the storage/render formats the pipeline needs.

use glam::{Mat4, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use satvsm::prelude::*;

fn gpu() -> Option<GpuContext> {
    match GpuContext::new_headless() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn settings(size: u32, workgroup: u32) -> ShadowSettings {
    ShadowSettings {
        shadow_map_size: size,
        workgroup_size: workgroup,
        screen_width: 128,
        screen_height: 96,
        ..Default::default()
    }
}

fn pipeline_with(settings: &ShadowSettings) -> Option<ShadowPipeline> {
    let ctx = gpu()?;
    match ShadowPipeline::new(ctx, settings) {
        Ok(pipeline) => Some(pipeline),
        Err(e @ Error::Unsupported(_)) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
        Err(e) => panic!("Failed to create pipeline: {e}"),
    }
}

fn pipeline(size: u32, workgroup: u32) -> Option<ShadowPipeline> {
    pipeline_with(&settings(size, workgroup))
}

fn random_variance(size: u32, seed: u64) -> VarianceBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let depths: Vec<f32> = (0..size * size).map(|_| rng.random_range(0.0..1.0)).collect();
    VarianceBuffer::from_depths(size, &depths).expect("Failed to build variance buffer")
}

fn max_relative_error(gpu: &[Moments], cpu: &[Moments]) -> f32 {
    assert_eq!(gpu.len(), cpu.len());
    gpu.iter().zip(cpu).fold(0.0f32, |acc, (g, c)| {
        let scale = c.m1.abs().max(c.m2.abs()).max(1.0);
        acc.max((g.m1 - c.m1).abs() / scale)
            .max((g.m2 - c.m2).abs() / scale)
    })
}

#[test]
fn test_gpu_sat_matches_cpu() {
    // Non-power-of-two sizes and lines longer than one work-group
    for (size, workgroup) in [(16, 32), (100, 32), (257, 64)] {
        let Some(mut pipeline) = pipeline(size, workgroup) else { return };
        let variance = random_variance(size, size as u64);
        pipeline.upload_variance(&variance).expect("upload");
        pipeline.build_sat().expect("build_sat");

        let builder = SatBuilder::new(workgroup).unwrap();
        let cpu_rows = builder.scan(size, variance.texels(), ScanAxis::Rows).expect("Failed to scan rows");
        let cpu_sat = builder.build(&variance);

        let rows = pipeline.read_sat_rows().expect("read rows");
        let sat = pipeline.read_sat().expect("read sat");
        let rows_err = max_relative_error(&rows, &cpu_rows);
        let sat_err = max_relative_error(sat.texels(), cpu_sat.texels());
        println!("S={size} wg={workgroup}: rows {rows_err:.2e}, sat {sat_err:.2e}");
        assert!(rows_err < 1e-5);
        assert!(sat_err < 1e-5);
    }
}

#[test]
fn test_gpu_sat_builds_are_identical() {
    let Some(mut pipeline) = pipeline(64, 16) else { return };
    pipeline.upload_variance(&random_variance(64, 5)).unwrap();
    pipeline.build_sat().unwrap();
    let first = pipeline.read_sat().unwrap();
    pipeline.build_sat().unwrap();
    let second = pipeline.read_sat().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_gpu_sampler_matches_cpu() {
    let size = 64;
    let Some(mut pipeline) = pipeline(size, 64) else { return };
    pipeline
        .set_parameters(PenumbraParameters {
            light_source_radius: 3,
            shadow_saturation: 0.3,
            ..Default::default()
        })
        .unwrap();
    let variance = random_variance(size, 21);
    pipeline.upload_variance(&variance).unwrap();
    pipeline.build_sat().unwrap();

    let sat = pipeline.read_sat().unwrap();
    let sampler = SoftShadowSampler::new(&sat, *pipeline.parameters());

    let mut rng = StdRng::seed_from_u64(8);
    let points: Vec<LightSpacePoint> = (0..500)
        .map(|_| {
            LightSpacePoint::new(
                Vec2::new(rng.random_range(-0.1..1.1), rng.random_range(-0.1..1.1)),
                rng.random_range(0.0..1.0),
            )
        })
        .collect();
    let gpu = pipeline.sample(&points).expect("sample");
    assert_eq!(gpu.len(), points.len());
    for (p, g) in points.iter().zip(&gpu) {
        let c = sampler.sample(p);
        assert!((c - g).abs() < 1e-3, "{p:?}: cpu {c} gpu {g}");
    }
}

#[test]
fn test_gpu_uniform_scenario() {
    let size = 8;
    let Some(mut pipeline) = pipeline(size, 8) else { return };
    pipeline
        .set_parameters(PenumbraParameters {
            light_source_radius: 2,
            shadow_saturation: 0.0,
            ..Default::default()
        })
        .unwrap();
    let variance = VarianceBuffer::from_moments(size, vec![Moments::new(0.5, 0.26); 64]).unwrap();
    pipeline.upload_variance(&variance).unwrap();
    pipeline.build_sat().unwrap();

    let uv = Vec2::splat(4.5 / 8.0);
    let out = pipeline
        .sample(&[LightSpacePoint::new(uv, 0.5), LightSpacePoint::new(uv, 0.9)])
        .unwrap();
    assert_eq!(out[0], 1.0);
    let p = 0.01 / (0.01 + 0.16);
    assert!((out[1] - p).abs() < 1e-4, "{} vs {p}", out[1]);
}

#[test]
fn test_capture_demo_scene() {
    let Some(mut pipeline) = pipeline(256, 64) else { return };
    for mesh in demo_casters() {
        pipeline.add_caster(&mesh).unwrap();
    }
    pipeline.capture().unwrap();

    let variance = pipeline.read_variance().unwrap();
    let covered = variance.texels().iter().filter(|m| m.m1 < 1.0).count();
    assert!(covered > 0, "nothing rasterized from the light");
    for m in variance.texels() {
        assert!((0.0..=1.0).contains(&m.m1));
        assert!((m.m2 - m.m1 * m.m1).abs() < 1e-6);
    }
}

#[test]
fn test_render_frame_shadows_floor() {
    let Some(mut pipeline) = pipeline(512, 256) else { return };
    for mesh in demo_casters() {
        pipeline.add_caster(&mesh).unwrap();
    }
    pipeline.render_frame().unwrap();
    assert_eq!(pipeline.frame_count(), 1);

    let mask = pipeline.read_debug_view(DebugView::Final).unwrap();
    assert_eq!((mask.width, mask.height, mask.channels), (128, 96, 1));
    let (lo, hi) = mask.range().unwrap();
    assert!(lo < 0.5, "no shadowed pixels (min {lo})");
    assert_eq!(hi, 1.0);

    // A floor point beside the tall box and one outside the light frustum
    let light = pipeline.light_view_proj();
    assert_ne!(light, Mat4::IDENTITY);
    let out = pipeline
        .sample_world(&[Vec3::new(2.5, 0.0, 1.5), Vec3::new(100.0, 0.0, 0.0)])
        .unwrap();
    assert_eq!(out[1], 1.0, "outside the light frustum is lit");
    assert!((0.0..=1.0).contains(&out[0]));
}

#[test]
fn test_disabled_shadows_are_lit() {
    let s = ShadowSettings {
        enable_shadows: false,
        ..settings(128, 64)
    };
    let Some(mut pipeline) = pipeline_with(&s) else { return };
    for mesh in demo_casters() {
        pipeline.add_caster(&mesh).unwrap();
    }
    pipeline.render_frame().unwrap();

    let variance = pipeline.read_variance().unwrap();
    assert!(variance.texels().iter().all(|m| *m == Moments::FAR));
    let mask = pipeline.read_debug_view(DebugView::Final).unwrap();
    assert!(mask.data.iter().all(|&v| v == 1.0));
}

#[test]
fn test_degenerate_light_is_fully_lit() {
    let Some(mut pipeline) = pipeline(64, 64) else { return };
    for mesh in demo_casters() {
        pipeline.add_caster(&mesh).unwrap();
    }
    pipeline.set_light(Mat4::ZERO);
    pipeline.capture().unwrap();
    pipeline.build_sat().unwrap();

    let variance = pipeline.read_variance().unwrap();
    assert!(variance.texels().iter().all(|m| *m == Moments::FAR));
    let out = pipeline.sample_world(&[Vec3::ZERO, Vec3::new(1.0, 0.5, 1.0)]).unwrap();
    assert_eq!(out, vec![1.0, 1.0]);

    // Negative w: the projected point looks inside the frustum but is behind the light,
    // against a fully occluding map, so only the w test keeps it lit
    let occluder = VarianceBuffer::from_depths(64, &vec![0.0; 64 * 64]).unwrap();
    pipeline.upload_variance(&occluder).unwrap();
    pipeline.build_sat().unwrap();
    let negated = -Mat4::IDENTITY;
    pipeline.set_light(negated);
    let world = Vec3::new(0.0, 0.0, 0.5);
    assert!(!LightSpacePoint::from_world(world, &negated).in_frustum());
    assert_eq!(pipeline.sample_world(&[world]).unwrap(), vec![1.0]);
}

#[test]
fn test_resize_and_rebuild() {
    let Some(mut pipeline) = pipeline(32, 32) else { return };
    pipeline.resize(50, 16).expect("resize");
    assert_eq!(pipeline.map_size(), 50);

    let variance = random_variance(50, 50);
    pipeline.upload_variance(&variance).unwrap();
    pipeline.build_sat().unwrap();
    let cpu = SatBuilder::new(16).unwrap().build(&variance);
    let gpu = pipeline.read_sat().unwrap();
    assert!(max_relative_error(gpu.texels(), cpu.texels()) < 1e-5);
}

#[test]
fn test_rejects_bad_configuration() {
    let Some(ctx) = gpu() else { return };
    let err = ShadowPipeline::new(ctx, &settings(64, 48)).err().expect("48 is not a power of two");
    assert!(matches!(err, Error::InvalidWorkgroupSize { size: 48, .. }));

    let Some(mut pipeline) = pipeline(32, 32) else { return };
    assert!(matches!(
        pipeline.upload_variance(&VarianceBuffer::new(16).unwrap()),
        Err(Error::InvalidResolution { size: 16, .. })
    ));
    assert!(matches!(pipeline.resize(1 << 20, 32), Err(Error::InvalidResolution { .. })));
    let bad = PenumbraParameters {
        shadow_saturation: 2.0,
        ..Default::default()
    };
    assert!(pipeline.set_parameters(bad).is_err());
    assert!(pipeline.sample(&[]).unwrap().is_empty());
}

#[test]
fn test_debug_views_readback() {
    let Some(mut pipeline) = pipeline(32, 32) else { return };
    pipeline.upload_variance(&VarianceBuffer::new(32).unwrap()).unwrap();
    pipeline.build_sat().unwrap();

    let variance = pipeline.read_debug_view(DebugView::Variance).unwrap();
    assert_eq!((variance.width, variance.channels), (32, 2));
    assert_eq!(variance.pixel(3, 4), &[1.0, 1.0]);

    let rows = pipeline.read_debug_view(DebugView::SatRows).unwrap();
    assert_eq!(rows.pixel(9, 0), &[10.0, 10.0]);

    let sat = pipeline.read_debug_view(DebugView::Sat).unwrap();
    assert_eq!(sat.pixel(31, 31), &[1024.0, 1024.0]);

    pipeline.set_debug_view(DebugView::Sat);
    assert_eq!(pipeline.presented_texture().format(), wgpu::TextureFormat::Rg32Float);
}

#[test]
fn test_missing_capability_is_not_device_fatal() {
    let Some(ctx) = gpu() else { return };
    let err = ctx
        .require_format(wgpu::TextureFormat::Depth32Float, wgpu::TextureUsages::STORAGE_BINDING)
        .expect_err("depth formats are never storage textures");
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(!err.is_device_fatal());

    let caps = satvsm::render::check_capabilities(&ctx);
    println!("capabilities: {caps:?}");
    match caps {
        Ok(()) => {
            ShadowPipeline::new(ctx, &settings(32, 32)).expect("Failed to create pipeline");
        }
        Err(e) => {
            assert!(matches!(e, Error::Unsupported(_)), "{e}");
            let err = ShadowPipeline::new(ctx, &settings(32, 32))
                .err()
                .expect("pipeline built without the capabilities it needs");
            assert!(matches!(err, Error::Unsupported(_)), "{err}");
            assert!(!err.is_device_fatal());
        }
    }
}

#[test]
fn test_rejected_settings_leave_pipeline_unchanged() {
    let Some(mut pipeline) = pipeline(32, 32) else { return };
    let before = *pipeline.parameters();
    let max = pipeline.context().limits().max_texture_dimension_2d;

    // Map change is valid, screen is not
    let bad = ShadowSettings {
        shadow_map_size: 64,
        workgroup_size: 16,
        shadow_saturation: 0.1,
        debug_view: DebugView::Sat,
        screen_width: max + 1,
        ..settings(32, 32)
    };
    assert!(pipeline.apply_settings(&bad).is_err());
    assert_eq!(pipeline.map_size(), 32);
    assert_eq!(pipeline.workgroup_size(), 32);
    assert_eq!(*pipeline.parameters(), before);
    assert_eq!(pipeline.debug_view(), DebugView::Final);

    let good = ShadowSettings {
        screen_width: 64,
        ..bad
    };
    pipeline.apply_settings(&good).expect("Failed to apply settings");
    assert_eq!(pipeline.map_size(), 64);
    assert_eq!(pipeline.parameters().shadow_saturation, 0.1);
    assert_eq!(pipeline.debug_view(), DebugView::Sat);
}
