//! WGSL sources for the three passes: forward mesh shading with the
//! two-light rig and key-light shadow lookup, the depth-only shadow pass, and
//! the ground grid.

pub const MESH_SHADER_SOURCE: &str = r#"
struct FrameUniforms {
    view_proj: mat4x4<f32>,
    light_view_proj: mat4x4<f32>,
    key_dir: vec4<f32>,
    fill_dir: vec4<f32>,
    ambient: vec4<f32>,
};

struct ModelUniforms {
    model: mat4x4<f32>,
    color: vec4<f32>,
    misc: vec4<f32>, // x: alpha test, y: receive shadow
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(1) @binding(0) var<uniform> model: ModelUniforms;
@group(2) @binding(0) var shadow_map: texture_depth_2d;
@group(2) @binding(1) var shadow_sampler: sampler_comparison;

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VsOut {
    var out: VsOut;
    let world = model.model * vec4<f32>(position, 1.0);
    out.world_pos = world.xyz;
    out.clip = frame.view_proj * world;
    out.normal = (model.model * vec4<f32>(normal, 0.0)).xyz;
    return out;
}

fn shadow_factor(world_pos: vec3<f32>) -> f32 {
    let light_clip = frame.light_view_proj * vec4<f32>(world_pos, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, -ndc.y * 0.5 + 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0) {
        return 1.0;
    }
    let texel = 1.0 / 1024.0;
    var sum = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let offset = vec2<f32>(f32(dx), f32(dy)) * texel;
            sum = sum + textureSampleCompareLevel(
                shadow_map, shadow_sampler, uv + offset, ndc.z - 0.002);
        }
    }
    return sum / 9.0;
}

@fragment
fn fs_main(in: VsOut, @builtin(front_facing) front_facing: bool) -> @location(0) vec4<f32> {
    if (model.color.a < model.misc.x) {
        discard;
    }
    var n = normalize(in.normal);
    if (!front_facing) {
        n = -n;
    }
    var shadow = 1.0;
    if (model.misc.y > 0.5) {
        shadow = shadow_factor(in.world_pos);
    }
    let key = max(dot(n, normalize(frame.key_dir.xyz)), 0.0) * frame.key_dir.w * shadow;
    let fill = max(dot(n, normalize(frame.fill_dir.xyz)), 0.0) * frame.fill_dir.w;
    let light = frame.ambient.rgb + vec3<f32>(key + fill);
    return vec4<f32>(model.color.rgb * light, model.color.a);
}
"#;

pub const SHADOW_SHADER_SOURCE: &str = r#"
struct FrameUniforms {
    view_proj: mat4x4<f32>,
    light_view_proj: mat4x4<f32>,
    key_dir: vec4<f32>,
    fill_dir: vec4<f32>,
    ambient: vec4<f32>,
};

struct ModelUniforms {
    model: mat4x4<f32>,
    color: vec4<f32>,
    misc: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;
@group(1) @binding(0) var<uniform> model: ModelUniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return frame.light_view_proj * model.model * vec4<f32>(position, 1.0);
}
"#;

pub const GRID_SHADER_SOURCE: &str = r#"
struct FrameUniforms {
    view_proj: mat4x4<f32>,
    light_view_proj: mat4x4<f32>,
    key_dir: vec4<f32>,
    fill_dir: vec4<f32>,
    ambient: vec4<f32>,
};

@group(0) @binding(0) var<uniform> frame: FrameUniforms;

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec3<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) color: vec3<f32>) -> VsOut {
    var out: VsOut;
    out.clip = frame.view_proj * vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color, 1.0);
}
"#;
