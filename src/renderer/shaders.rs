//! WGSL sources

/// Textured sphere seen from inside. Group 0 holds the per-eye transform,
/// group 1 the panorama texture and sampler.
pub const SPHERE_SHADER: &str = r#"
struct EyeUniform {
    transform: mat4x4<f32>,
    left_eye: u32,
    over_under: u32,
    _padding: vec2<u32>,
};

@group(0) @binding(0) var<uniform> eye: EyeUniform;
@group(1) @binding(0) var panorama: texture_2d<f32>;
@group(1) @binding(1) var panorama_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = eye.transform * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var uv = in.uv;
    if (eye.over_under != 0u) {
        // Left view in the top half, right view in the bottom half
        uv.y = uv.y * 0.5;
        if (eye.left_eye == 0u) {
            uv.y = uv.y + 0.5;
        }
    }
    return textureSample(panorama, panorama_sampler, uv);
}
"#;

/// Full-window quad showing an offscreen texture
pub const MIRROR_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position.xy, 0.0, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}
"#;
