//! Embedded WGSL for capture, SAT scan and shadow sampling.
//!
//! The sampling functions are the GPU twins of [`crate::shadow`]; keep the two
//! in step (same operand order, `floor(x + 0.5)` rounding, full-box area).

/// Per-frame shadow uniform plus the finished SAT, bind group 0.
///
/// Layout must match [`super::resources::ShadowUniform`] (176 bytes).
pub const SHADOW_BINDINGS_WGSL: &str = r#"
struct ShadowUniform {
    light_view_proj: mat4x4<f32>,
    camera_view_proj: mat4x4<f32>,
    shadow_saturation: f32,
    penumbra_scale: f32,
    z_near: f32,
    z_far: f32,
    light_source_radius: u32,
    blocker_search_radius: u32,
    contact_hardening: u32,
    enabled: u32,
    map_size: u32,
    max_radius: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> shadow: ShadowUniform;
@group(0) @binding(1) var shadow_sat: texture_2d<f32>;
"#;

/// Soft-shadow lookup. Entry point for lighting code: `shadow_attenuation(world_pos)`.
pub const SHADOW_SAMPLING_WGSL: &str = r#"
const SHADOW_MIN_VARIANCE: f32 = 1e-5;
const SHADOW_DEPTH_EPSILON: f32 = 1.1920929e-7;

// Zero below the table, clamped above it.
fn sat_at(x: i32, y: i32) -> vec2<f32> {
    if x < 0 || y < 0 {
        return vec2<f32>(0.0);
    }
    let m = i32(shadow.map_size) - 1;
    return textureLoad(shadow_sat, vec2<i32>(min(x, m), min(y, m)), 0).xy;
}

struct BoxStatistics {
    mean: f32,
    mean_sq: f32,
}

fn box_statistics(center: vec2<i32>, radius: i32) -> BoxStatistics {
    let m = i32(shadow.map_size) - 1;
    let c = min(center, vec2<i32>(m));
    let x0 = c.x - radius - 1;
    let y0 = c.y - radius - 1;
    let x1 = c.x + radius;
    let y1 = c.y + radius;

    // Zero-padded sum over the full (2r+1)² box
    let sum = sat_at(x1, y1) - sat_at(x0, y1) - sat_at(x1, y0) + sat_at(x0, y0);
    let side = 2 * radius + 1;
    let area = f32(side * side);

    var stats: BoxStatistics;
    stats.mean = sum.x / area;
    stats.mean_sq = sum.y / area;
    return stats;
}

fn linear_depth(ndc_depth: f32) -> f32 {
    return shadow.z_near + ndc_depth * (shadow.z_far - shadow.z_near);
}

fn penumbra_radius(receiver: f32, blocker: f32) -> i32 {
    var width = f32(shadow.light_source_radius);
    if shadow.contact_hardening != 0u {
        let r = linear_depth(receiver);
        let b = max(linear_depth(blocker), SHADOW_DEPTH_EPSILON);
        width = max(r - b, 0.0) * f32(shadow.light_source_radius) / b;
    }
    let scaled = floor(width * shadow.penumbra_scale + 0.5);
    return i32(clamp(scaled, 1.0, f32(shadow.max_radius)));
}

fn reduce_light_bleeding(p_max: f32, saturation: f32) -> f32 {
    let range = 1.0 - saturation;
    if range <= 0.0 {
        return select(0.0, 1.0, p_max >= 1.0);
    }
    return clamp((p_max - saturation) / range, 0.0, 1.0);
}

fn shadow_attenuation_light_space(uv: vec2<f32>, depth: f32) -> f32 {
    if shadow.enabled == 0u {
        return 1.0;
    }
    // Written positively so NaN coordinates fall through to lit.
    let inside = all(uv >= vec2<f32>(0.0)) && all(uv <= vec2<f32>(1.0))
        && depth >= 0.0 && depth <= 1.0;
    if !inside {
        return 1.0;
    }

    let s = f32(shadow.map_size);
    let texel = vec2<i32>(clamp(floor(uv * s), vec2<f32>(0.0), vec2<f32>(s - 1.0)));

    let search_radius = i32(clamp(shadow.blocker_search_radius, 1u, shadow.max_radius));
    let search = box_statistics(texel, search_radius);
    let stats = box_statistics(texel, penumbra_radius(depth, search.mean));

    if depth <= stats.mean {
        return 1.0;
    }
    let variance = max(stats.mean_sq - stats.mean * stats.mean, SHADOW_MIN_VARIANCE);
    let d = depth - stats.mean;
    let p_max = variance / (variance + d * d);
    return reduce_light_bleeding(p_max, shadow.shadow_saturation);
}

fn shadow_attenuation(world_pos: vec3<f32>) -> f32 {
    let clip = shadow.light_view_proj * vec4<f32>(world_pos, 1.0);
    if clip.w <= 0.0 {
        return 1.0;
    }
    let ndc = clip.xyz / clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5);
    return shadow_attenuation_light_space(uv, ndc.z);
}
"#;

/// Object transform, bind group 1 of the capture and mask pipelines.
const MODEL_WGSL: &str = r#"
struct Model {
    model: mat4x4<f32>,
}

@group(1) @binding(0) var<uniform> object: Model;
"#;

/// Light-view raster writing (d, d²).
const VARIANCE_CAPTURE_BODY: &str = r#"
struct CaptureOut {
    @builtin(position) pos: vec4<f32>,
}

@vertex
fn vs_capture(@location(0) position: vec3<f32>) -> CaptureOut {
    var out: CaptureOut;
    out.pos = shadow.light_view_proj * object.model * vec4<f32>(position, 1.0);
    return out;
}

@fragment
fn fs_capture(in: CaptureOut) -> @location(0) vec4<f32> {
    let d = in.pos.z;
    return vec4<f32>(d, d * d, 0.0, 1.0);
}
"#;

/// Camera-view raster writing the attenuation of each visible surface.
const MASK_BODY: &str = r#"
struct MaskOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) world: vec3<f32>,
}

@vertex
fn vs_mask(@location(0) position: vec3<f32>) -> MaskOut {
    let world = object.model * vec4<f32>(position, 1.0);
    var out: MaskOut;
    out.pos = shadow.camera_view_proj * world;
    out.world = world.xyz / world.w;
    return out;
}

@fragment
fn fs_mask(in: MaskOut) -> @location(0) vec4<f32> {
    return vec4<f32>(shadow_attenuation(in.world), 0.0, 0.0, 1.0);
}
"#;

/// Batch evaluation: w = 0 means (u, v, depth) in light space, w = 1 a world position.
const QUERY_BODY: &str = r#"
@group(1) @binding(0) var<storage, read> query_points: array<vec4<f32>>;
@group(1) @binding(1) var<storage, read_write> query_results: array<f32>;

@compute @workgroup_size(64)
fn evaluate(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if i >= arrayLength(&query_points) {
        return;
    }
    let p = query_points[i];
    if p.w > 0.5 {
        query_results[i] = shadow_attenuation(p.xyz);
    } else {
        query_results[i] = shadow_attenuation_light_space(p.xy, p.z);
    }
}
"#;

/// Chunked Hillis-Steele inclusive scan, one work-group per line.
///
/// `{{WORKGROUP_SIZE}}` is replaced before compilation, see [`sat_scan_source`].
pub const SAT_SCAN_WGSL: &str = r#"
struct ScanParams {
    size: u32,
    axis: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var scan_src: texture_2d<f32>;
@group(0) @binding(1) var scan_dst: texture_storage_2d<rg32float, write>;
@group(0) @binding(2) var<uniform> params: ScanParams;

const WORKGROUP_SIZE: u32 = {{WORKGROUP_SIZE}}u;

var<workgroup> scratch: array<vec2<f32>, WORKGROUP_SIZE>;
var<workgroup> carry: vec2<f32>;

// axis 0 walks a row (x varies), axis 1 walks a column (y varies)
fn texel_coord(line: u32, i: u32) -> vec2<i32> {
    if params.axis == 0u {
        return vec2<i32>(i32(i), i32(line));
    }
    return vec2<i32>(i32(line), i32(i));
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn scan_lines(
    @builtin(workgroup_id) group: vec3<u32>,
    @builtin(local_invocation_index) lane: u32,
) {
    let line = group.x;
    if lane == 0u {
        carry = vec2<f32>(0.0);
    }
    workgroupBarrier();

    let chunks = (params.size + WORKGROUP_SIZE - 1u) / WORKGROUP_SIZE;
    for (var chunk = 0u; chunk < chunks; chunk++) {
        let i = chunk * WORKGROUP_SIZE + lane;
        var value = vec2<f32>(0.0);
        if i < params.size {
            value = textureLoad(scan_src, texel_coord(line, i), 0).xy;
        }
        scratch[lane] = value;
        workgroupBarrier();

        for (var offset = 1u; offset < WORKGROUP_SIZE; offset = offset << 1u) {
            var sum = scratch[lane];
            if lane >= offset {
                sum = scratch[lane] + scratch[lane - offset];
            }
            workgroupBarrier();
            scratch[lane] = sum;
            workgroupBarrier();
        }

        if i < params.size {
            textureStore(scan_dst, texel_coord(line, i), vec4<f32>(scratch[lane] + carry, 0.0, 1.0));
        }
        workgroupBarrier();
        if lane == WORKGROUP_SIZE - 1u {
            carry = scratch[lane] + carry;
        }
        workgroupBarrier();
    }
}
"#;

/// The exported sampling library: bindings plus functions.
pub fn shadow_library() -> String {
    format!("{SHADOW_BINDINGS_WGSL}{SHADOW_SAMPLING_WGSL}")
}

pub fn variance_capture_source() -> String {
    format!("{}{MODEL_WGSL}{VARIANCE_CAPTURE_BODY}", shadow_library())
}

pub fn mask_source() -> String {
    format!("{}{MODEL_WGSL}{MASK_BODY}", shadow_library())
}

pub fn query_source() -> String {
    format!("{}{QUERY_BODY}", shadow_library())
}

/// Scan kernel specialised for `workgroup_size` lanes.
pub fn sat_scan_source(workgroup_size: u32) -> String {
    SAT_SCAN_WGSL.replace("{{WORKGROUP_SIZE}}", &workgroup_size.to_string())
}
