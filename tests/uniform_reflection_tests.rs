//! Uniform staging and placeholder textures built from reflected WGSL

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use glam::Vec4;
use rstest::rstest;
use stimulus_renderer::backend::dummy::CompletionMode;
use stimulus_renderer::backend::*;
use stimulus_renderer::render_graph::{DrawSpec, OperationId, RenderOperation, Resource};
use stimulus_renderer::shader::{cache_key, ShaderSource};
use stimulus_renderer::uniform::{create_empty_image_resources, ImageCreateParams};
use stimulus_renderer::{
    DummyDevice, GraphSettings, RenderGraph, RendererConfig, ShaderCompiler, ShaderPipeline,
    UniformError, UniformReflection,
};

use common::*;

fn uniform_graph(device: Arc<DummyDevice>, source: &str) -> (RenderGraph, OperationId) {
    let mut compiler = ShaderCompiler::new();
    let pipeline = ShaderPipeline::from_wgsl(
        &mut compiler,
        source,
        &[(ShaderStage::Vertex, "vs_main"), (ShaderStage::Fragment, "fs_main")],
    )
    .unwrap();
    let mut graph = RenderGraph::new(device);
    let target = surface_image(&mut graph, "target");
    let op = graph.add_operation(
        RenderOperation::new(pipeline, DrawSpec::fullscreen_triangle()).named("stimulus"),
    );
    graph.create_output_connection(op, 0, target);
    (graph, op)
}

fn compile(graph: &mut RenderGraph, frames: u32) {
    let settings = GraphSettings::new(frames, 16, 16);
    graph.compile_resources(&settings).unwrap();
    graph.compile(&settings).unwrap();
}

#[test]
fn test_blocks_shared_between_stages() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let reflection = UniformReflection::with_defaults(&mut graph);

    assert_eq!(reflection.resource_count(), 2);
    assert_eq!(reflection.staged_bytes(), 32 + 64);
    assert_eq!(
        reflection.resource(op, ShaderStage::Vertex, "params"),
        reflection.resource(op, ShaderStage::Fragment, "params")
    );
    assert!(reflection.resource(op, ShaderStage::Vertex, "palette").is_none());

    let params = graph.connections().input(op, 0).unwrap();
    assert_eq!(
        params.binding.stages,
        ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT
    );
    let palette = graph.connections().input(op, 1).unwrap();
    assert_eq!(palette.binding.stages, ShaderStageFlags::FRAGMENT);
    assert!(matches!(
        graph.resource(palette.resource),
        Some(Resource::UniformBlock(block)) if block.size == 64
    ));
}

#[test]
fn test_flush_writes_only_the_requested_frame() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device.clone(), UNIFORM_SHADER);
    let mut reflection = UniformReflection::with_defaults(&mut graph);
    compile(&mut graph, 2);

    let tint = Vec4::new(1.0, 0.5, 0.25, 1.0);
    let mut view = reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Fragment)
        .unwrap()
        .block("params")
        .unwrap()
        .field("tint")
        .unwrap();
    assert_eq!(view.name(), "params.tint");
    assert_eq!(view.size(), 16);
    view.set(&tint);
    assert_eq!(view.get::<Vec4>(), tint);

    reflection.flush(1).unwrap();

    let params = reflection.resource(op, ShaderStage::Fragment, "params").unwrap();
    let resource = graph.resource(params).unwrap();
    let frame1 = device.buffer_contents(resource.buffer(1).unwrap()).unwrap();
    let frame0 = device.buffer_contents(resource.buffer(0).unwrap()).unwrap();
    assert_eq!(&frame1[16..32], bytemuck::bytes_of(&tint));
    assert!(frame1[..16].iter().all(|byte| *byte == 0));
    assert!(frame0.iter().all(|byte| *byte == 0));
}

#[test]
fn test_vertex_and_fragment_views_alias() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let mut reflection = UniformReflection::with_defaults(&mut graph);

    reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Vertex)
        .unwrap()
        .block("Params")
        .unwrap()
        .field("scale")
        .unwrap()
        .set(&2.5f32);
    let scale: f32 = reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Fragment)
        .unwrap()
        .block("params")
        .unwrap()
        .field("scale")
        .unwrap()
        .get();
    assert_eq!(scale, 2.5);
}

#[test]
fn test_size_mismatch_panics_without_staging() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let mut reflection = UniformReflection::with_defaults(&mut graph);

    let result = catch_unwind(AssertUnwindSafe(|| {
        reflection
            .get(op)
            .unwrap()
            .stage(ShaderStage::Fragment)
            .unwrap()
            .block("params")
            .unwrap()
            .field("tint")
            .unwrap()
            .set(&[1.0f32; 3]);
    }));
    let message = result.unwrap_err();
    let message = message
        .downcast_ref::<String>()
        .map(String::as_str)
        .unwrap_or_default();
    assert!(message.contains("uniform params.tint is 16 bytes, got 12"), "{message}");

    let tint = reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Fragment)
        .unwrap()
        .block("params")
        .unwrap()
        .field("tint")
        .unwrap();
    assert!(tint.bytes().iter().all(|byte| *byte == 0));
}

#[test]
fn test_array_elements() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let mut reflection = UniformReflection::with_defaults(&mut graph);

    let colors = reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Fragment)
        .unwrap()
        .block("palette")
        .unwrap()
        .field("colors")
        .unwrap();
    assert!(colors.is_array());
    assert_eq!(colors.len(), Some(4));
    let mut second = colors.index(1).unwrap();
    assert_eq!(second.name(), "palette.colors[1]");
    second.set(&Vec4::ONE);

    let palette = reflection
        .get(op)
        .unwrap()
        .stage(ShaderStage::Fragment)
        .unwrap()
        .block("palette")
        .unwrap();
    let bytes = palette.bytes();
    assert!(bytes[..16].iter().all(|byte| *byte == 0));
    assert_eq!(&bytes[16..32], bytemuck::bytes_of(&Vec4::ONE));
    assert!(bytes[32..].iter().all(|byte| *byte == 0));
}

#[rstest]
#[case::unknown_block("lights", None, None)]
#[case::unknown_field("params", Some("color"), None)]
#[case::index_out_of_range("palette", Some("colors"), Some(4))]
#[case::index_into_scalar("params", Some("scale"), Some(0))]
fn test_accessor_errors(
    #[case] block: &str,
    #[case] field: Option<&str>,
    #[case] index: Option<u32>,
) {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let mut reflection = UniformReflection::with_defaults(&mut graph);

    let result = reflection
        .get(op)
        .and_then(|selector| selector.stage(ShaderStage::Fragment))
        .and_then(|stage| stage.block(block))
        .and_then(|view| match field {
            Some(field) => view.field(field),
            None => Ok(view),
        })
        .and_then(|view| match index {
            Some(index) => view.index(index),
            None => Ok(view),
        })
        .map(|view| view.name().to_string());

    match (field, index, result) {
        (None, _, Err(UniformError::UnknownBlock(name))) => assert_eq!(name, block),
        (Some(field), None, Err(UniformError::UnknownField { name, parent })) => {
            assert_eq!(name, field);
            assert_eq!(parent, block);
        }
        (Some("colors"), Some(4), Err(UniformError::IndexOutOfRange { len, .. })) => {
            assert_eq!(len, 4)
        }
        (Some("scale"), Some(_), Err(UniformError::NotAnArray(name))) => {
            assert_eq!(name, "params.scale")
        }
        (_, _, other) => panic!("unexpected accessor result {other:?}"),
    }
}

#[test]
fn test_unknown_operation_and_stage() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let blank = render_op(&mut graph, "blank");
    let mut reflection = UniformReflection::with_defaults(&mut graph);

    assert!(matches!(
        reflection.get(blank),
        Err(UniformError::UnknownOperation(_))
    ));
    assert!(matches!(
        reflection.get(op).unwrap().stage(ShaderStage::Compute),
        Err(UniformError::UnknownStage(ShaderStage::Compute))
    ));
}

#[test]
fn test_filter_leaves_blocks_unconnected() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device, UNIFORM_SHADER);
    let mut created = Vec::new();
    let reflection = UniformReflection::new(
        &mut graph,
        |_, _, block| block.name == "palette",
        |_, stage, block| {
            created.push((stage, block.name.clone()));
            stimulus_renderer::render_graph::UniformBlockResource::new(block.size as u64)
                .named(format!("custom {}", block.name))
                .into()
        },
    );

    assert_eq!(reflection.resource_count(), 1);
    assert_eq!(created, vec![(ShaderStage::Vertex, "params".to_string())]);
    assert!(graph.connections().input(op, 1).is_none());
    assert!(graph.resource_by_name("custom params").is_some());
    assert!(reflection.resource(op, ShaderStage::Fragment, "palette").is_none());
}

#[test]
fn test_debug_dump_lists_blocks() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, _) = uniform_graph(device, UNIFORM_SHADER);
    let reflection = UniformReflection::with_defaults(&mut graph);

    let dump = reflection.debug_dump();
    assert!(dump.contains("params (binding 0, 32 bytes"), "{dump}");
    assert!(dump.contains("palette (binding 1, 64 bytes"), "{dump}");
}

#[test]
fn test_image_map_creates_sampled_placeholders() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device.clone(), TEXTURED_SHADER);
    let mut asked = Vec::new();
    let images = create_empty_image_resources(&mut graph, |sampler| {
        asked.push(sampler.name.clone());
        Some(ImageCreateParams {
            extent: Extent3d::new(8, 4, 99),
            format: TextureFormat::Rgba8Unorm,
            filter: Filter::Nearest,
        })
    });

    assert_eq!(asked, vec!["pattern".to_string()]);
    assert_eq!(images.len(), 1);
    assert!(images.find_by_name("pattern_sampler").is_none());
    assert!(matches!(
        images.resource("missing"),
        Err(UniformError::UnknownSampler(_))
    ));

    let pattern = images.resource("pattern").unwrap();
    let resource = graph.resource(pattern).unwrap();
    assert_eq!(resource.extent(), Some(Extent3d::new(8, 4, 1)));
    assert_eq!(resource.format(), Some(TextureFormat::Rgba8Unorm));
    assert_eq!(resource.layers(), 1);

    let texture = graph.connections().input(op, 0).unwrap();
    assert_eq!(texture.resource, pattern);
    assert_eq!(texture.binding.kind, DescriptorKind::SampledImage);
    assert_eq!(texture.binding.stages, ShaderStageFlags::FRAGMENT);
    let sampler = graph.connections().input(op, 1).unwrap();
    assert_eq!(sampler.resource, pattern);
    assert_eq!(sampler.binding.kind, DescriptorKind::Sampler);

    compile(&mut graph, 2);
    let image = graph.resource(pattern).unwrap().image(0).unwrap();
    assert_eq!(graph.resource(pattern).unwrap().image(1), Some(image));
    let descriptor = device.image_descriptor(image).unwrap();
    assert_eq!(descriptor.format, TextureFormat::Rgba8Unorm);
}

#[test]
fn test_pipeline_layout_covers_texture_and_sampler_bindings() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let (mut graph, op) = uniform_graph(device.clone(), TEXTURED_SHADER);
    let images = create_empty_image_resources(&mut graph, |_| None);
    compile(&mut graph, 2);

    let state = graph.compile_result().unwrap().operation_state(op).unwrap();
    let layout = device
        .descriptor_set_layout(state.descriptor_set_layout.unwrap())
        .unwrap();
    let declared: Vec<(u32, DescriptorKind)> = layout.iter().map(|b| (b.binding, b.kind)).collect();
    assert_eq!(
        declared,
        vec![(0, DescriptorKind::SampledImage), (1, DescriptorKind::Sampler)]
    );
    assert!(layout.iter().all(|b| b.stages == ShaderStageFlags::FRAGMENT));

    // every binding the fragment stage reflects has a layout entry
    let render = graph.operation(op).unwrap().as_render().unwrap();
    let fragment = render
        .pipeline
        .stages()
        .iter()
        .find(|shader| shader.stage == ShaderStage::Fragment)
        .unwrap();
    let reflected: Vec<u32> = fragment
        .reflection
        .samplers
        .iter()
        .map(|image| image.binding)
        .chain(fragment.reflection.separate_samplers.iter().map(|state| state.binding))
        .collect();
    assert_eq!(reflected, vec![0, 1]);
    assert!(reflected.iter().all(|binding| declared.iter().any(|(b, _)| b == binding)));

    let pattern = graph.resource(images.resource("pattern").unwrap()).unwrap();
    let sampler = pattern.sampler().unwrap();
    assert_eq!(state.descriptor_sets.len(), 2);
    for (frame, set) in state.descriptor_sets.iter().enumerate() {
        let writes = device.descriptor_writes(*set).unwrap();
        assert_eq!(
            writes,
            vec![
                DescriptorWrite::SampledImage {
                    binding: 0,
                    image: pattern.image(frame as u32).unwrap(),
                },
                DescriptorWrite::Sampler { binding: 1, sampler },
            ]
        );
    }
}

#[test]
fn test_image_map_defaults_when_provider_declines() {
    let device = device(CompletionMode::Immediate);
    let (mut graph, _) = uniform_graph(device, TEXTURED_SHADER);
    let images = create_empty_image_resources(&mut graph, |_| None);

    let defaults = ImageCreateParams::default();
    let (sampler, id) = images.iter().next().unwrap();
    assert_eq!(sampler.binding, 0);
    let resource = graph.resource(id).unwrap();
    assert_eq!(
        resource.extent(),
        Some(Extent3d::new(defaults.extent.width, defaults.extent.height, 1))
    );
    assert_eq!(resource.format(), Some(defaults.format));
}

#[test]
fn test_directory_cache_reused_by_fresh_compiler() {
    init_logging();
    let dir = std::env::temp_dir().join(format!("stimulus-compiler-cache-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let config = RendererConfig {
        shader_cache_dir: Some(dir.clone()),
        ..RendererConfig::default()
    };
    let source = ShaderSource::wgsl(UNIFORM_SHADER);

    let mut first = ShaderCompiler::from_config(&config).unwrap();
    let compiled = first.compile(&source, ShaderStage::Vertex, "vs_main").unwrap();
    assert_eq!((first.cache().hits(), first.cache().misses()), (0, 1));
    let key = cache_key(UNIFORM_SHADER, ShaderStage::Vertex, "vs_main");
    assert!(dir.join(format!("{key:016x}.spv")).is_file());

    let mut second = ShaderCompiler::from_config(&config).unwrap();
    let reused = second.compile(&source, ShaderStage::Vertex, "vs_main").unwrap();
    assert_eq!((second.cache().hits(), second.cache().misses()), (1, 0));
    assert_eq!(reused, compiled);

    let _ = std::fs::remove_dir_all(&dir);
}
