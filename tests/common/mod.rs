//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use stimulus_renderer::backend::dummy::{CompletionMode, DeviceEvent};
use stimulus_renderer::backend::*;
use stimulus_renderer::render_graph::*;
use stimulus_renderer::shader::{CompiledShader, ShaderPipeline, ShaderReflection};
use stimulus_renderer::{DummyDevice, DummySwapchain};

/// Uniform block shared by both stages plus a fragment-only palette array.
pub const UNIFORM_SHADER: &str = r#"
struct Params {
    offset: vec2<f32>,
    scale: f32,
    pad: f32,
    tint: vec4<f32>,
}

struct Palette {
    colors: array<vec4<f32>, 4>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<uniform> palette: Palette;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1) * params.scale;
    return vec4<f32>(x + params.offset.x, params.offset.y, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.tint * palette.colors[1];
}
"#;

/// One sampled texture in the fragment stage.
pub const TEXTURED_SHADER: &str = r#"
@group(0) @binding(0) var pattern: texture_2d<f32>;
@group(0) @binding(1) var pattern_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(pattern, pattern_sampler, position.xy / 64.0);
}
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Vertex and fragment stages with a placeholder binary and no reflected bindings.
pub fn stub_pipeline() -> ShaderPipeline {
    let stage = |stage| CompiledShader {
        stage,
        entry_point: "main".into(),
        spirv: vec![0x0723_0203],
        reflection: ShaderReflection::default(),
    };
    ShaderPipeline::new(vec![stage(ShaderStage::Vertex), stage(ShaderStage::Fragment)])
}

pub fn render_op(graph: &mut RenderGraph, name: &str) -> OperationId {
    graph.add_operation(RenderOperation::new(stub_pipeline(), DrawSpec::fullscreen_triangle()).named(name))
}

pub fn surface_image(graph: &mut RenderGraph, name: &str) -> ResourceId {
    graph.add_resource(ImageResource::new(TextureFormat::Rgba8Unorm, ImageSize::surface()).named(name))
}

pub fn device(mode: CompletionMode) -> Arc<DummyDevice> {
    Arc::new(DummyDevice::with_mode(mode))
}

pub fn swapchain(device: &Arc<DummyDevice>, image_count: u32) -> Arc<DummySwapchain> {
    Arc::new(DummySwapchain::new(device.clone(), Extent2d::new(64, 48), image_count).unwrap())
}

/// Handles of the two pass scenario: external texture `a`, intermediate `b`, swapchain output.
pub struct TwoPassGraph {
    pub graph: RenderGraph,
    pub external: ResourceId,
    pub intermediate: ResourceId,
    pub output: ResourceId,
    pub first: OperationId,
    pub second: OperationId,
}

/// `first` samples the external texture into `intermediate`, `second` samples that into
/// the swapchain image.
pub fn two_pass_graph(device: Arc<DummyDevice>, swapchain: Arc<DummySwapchain>) -> TwoPassGraph {
    let mut graph = RenderGraph::new(device);
    let external = graph.add_resource(
        ReadOnlyImageResource::new(TextureFormat::Rgba8Unorm, Extent3d::new(4, 4, 1)).named("a"),
    );
    let intermediate = surface_image(&mut graph, "b");
    let output = graph.add_resource(SwapchainImageResource::new(swapchain).named("screen"));

    let first = render_op(&mut graph, "op1");
    graph.create_input_connection(
        first,
        external,
        InputBinding::sampled(0, ShaderStageFlags::FRAGMENT),
    );
    graph.create_output_connection(first, 0, intermediate);

    let second = render_op(&mut graph, "op2");
    graph.create_input_connection(
        second,
        intermediate,
        InputBinding::sampled(0, ShaderStageFlags::FRAGMENT),
    );
    graph.create_output_connection(second, 0, output);

    TwoPassGraph {
        graph,
        external,
        intermediate,
        output,
        first,
        second,
    }
}

/// Fences of every submission, in submission order.
pub fn submitted_fences(events: &[DeviceEvent]) -> Vec<Option<FenceHandle>> {
    events
        .iter()
        .filter_map(|event| match event {
            DeviceEvent::Submit { fence, .. } => Some(*fence),
            _ => None,
        })
        .collect()
}

pub fn position_of(events: &[DeviceEvent], predicate: impl Fn(&DeviceEvent) -> bool) -> Option<usize> {
    events.iter().position(predicate)
}

pub fn count_of(events: &[DeviceEvent], predicate: impl Fn(&DeviceEvent) -> bool) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}
