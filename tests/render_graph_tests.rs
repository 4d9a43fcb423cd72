//! Render graph compile behaviour against the dummy backend

mod common;

use std::sync::Arc;

use rstest::rstest;
use stimulus_renderer::backend::dummy::{CompletionMode, DeviceEvent};
use stimulus_renderer::backend::*;
use stimulus_renderer::render_graph::*;
use stimulus_renderer::{CommandBufferStrategy, DummyDevice, DummySwapchain, GraphError, GraphSettings};

use common::*;

/// One render op per entry, each writing its own image; `edges` are (producer, consumer).
fn layered_graph(device: Arc<DummyDevice>, op_count: usize, edges: &[(usize, usize)]) -> (RenderGraph, Vec<OperationId>) {
    let mut graph = RenderGraph::new(device);
    let ops: Vec<OperationId> = (0..op_count)
        .map(|index| render_op(&mut graph, &format!("op{index}")))
        .collect();
    let images: Vec<ResourceId> = (0..op_count)
        .map(|index| surface_image(&mut graph, &format!("image{index}")))
        .collect();
    for (index, op) in ops.iter().enumerate() {
        graph.create_output_connection(*op, 0, images[index]);
    }
    let mut next_slot = vec![0u32; op_count];
    for &(producer, consumer) in edges {
        let slot = next_slot[consumer];
        next_slot[consumer] += 1;
        graph.create_input_connection(
            ops[consumer],
            images[producer],
            InputBinding::sampled(slot, ShaderStageFlags::FRAGMENT),
        );
    }
    (graph, ops)
}

#[rstest]
#[case::chain(4, &[(0, 1), (1, 2), (2, 3)], 4)]
#[case::diamond(4, &[(0, 1), (0, 2), (1, 3), (2, 3)], 3)]
#[case::fan_out(4, &[(0, 1), (0, 2), (0, 3)], 2)]
#[case::uneven_fan_in(4, &[(1, 3), (0, 2), (3, 2)], 3)]
#[case::independent(3, &[], 1)]
#[case::wide(6, &[(0, 3), (1, 3), (2, 4), (3, 5), (4, 5), (0, 5)], 3)]
fn test_producers_run_in_earlier_passes(
    #[case] op_count: usize,
    #[case] edges: &[(usize, usize)],
    #[case] expected_passes: usize,
) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, ops) = layered_graph(device, op_count, edges);
    graph.compile(&GraphSettings::new(1, 16, 16)).unwrap();

    let result = graph.compile_result().unwrap();
    assert_eq!(result.passes().len(), expected_passes);
    for op in &ops {
        let containing = result.passes().iter().filter(|pass| pass.contains(*op)).count();
        assert_eq!(containing, 1, "{op} must be in exactly one pass");
    }
    for &(producer, consumer) in edges {
        let producer_pass = result.pass_of(ops[producer]).unwrap();
        let consumer_pass = result.pass_of(ops[consumer]).unwrap();
        assert!(
            producer_pass < consumer_pass,
            "op{producer} (pass {producer_pass}) must precede op{consumer} (pass {consumer_pass})"
        );
    }
}

#[rstest]
#[case::two_cycle(2, &[(0, 1), (1, 0)])]
#[case::cycle_behind_source(3, &[(0, 1), (2, 1), (1, 2)])]
fn test_cycles_are_bad_layouts(#[case] op_count: usize, #[case] edges: &[(usize, usize)]) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, _) = layered_graph(device, op_count, edges);
    let err = graph.compile(&GraphSettings::new(1, 16, 16)).unwrap_err();
    assert!(matches!(err, GraphError::BadGraphLayout(_)), "unexpected {err:?}");
    assert!(!graph.is_compiled());
    assert!(graph.passes().is_empty());
}

#[test]
fn test_two_pass_scenario() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let swapchain = swapchain(&device, 2);
    let mut scenario = two_pass_graph(device.clone(), swapchain.clone());
    scenario
        .graph
        .compile(&GraphSettings::from_swapchain(swapchain.as_ref()))
        .unwrap();

    let passes: Vec<Vec<OperationId>> = scenario
        .graph
        .passes()
        .iter()
        .map(|pass| pass.operations().collect())
        .collect();
    assert_eq!(passes, vec![vec![scenario.first], vec![scenario.second]]);

    let result = scenario.graph.compile_result().unwrap();
    assert_eq!(result.frame_count(), 2);
    for frame in 0..2 {
        let commands = device
            .recorded_commands(result.command_buffers(frame).unwrap()[0])
            .unwrap();
        let full_barriers = commands
            .iter()
            .filter(|command| **command == Command::FullBarrier)
            .count();
        assert_eq!(full_barriers, 1);

        // the swapchain image ends the frame ready for presentation
        let screen = scenario.graph.resource(scenario.output).unwrap().image(frame).unwrap();
        let last = commands
            .iter()
            .filter_map(|command| match command {
                Command::ImageBarriers(barriers) => Some(barriers),
                _ => None,
            })
            .flatten()
            .filter(|barrier| barrier.image == screen)
            .last()
            .unwrap();
        assert_eq!(last.new_layout, ImageLayout::PresentSrc);

        // the intermediate image goes back to the layout it started in
        let intermediate = scenario
            .graph
            .resource(scenario.intermediate)
            .unwrap()
            .image(frame)
            .unwrap();
        let Some(Command::ImageBarriers(closing)) = commands.last() else {
            panic!("frame must end with layout restores");
        };
        assert!(closing
            .iter()
            .any(|barrier| barrier.image == intermediate && barrier.new_layout == ImageLayout::General));
    }
}

#[test]
fn test_recompile_is_idempotent() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, _) = layered_graph(device, 5, &[(0, 2), (1, 2), (2, 3), (0, 4)]);
    let settings = GraphSettings::new(2, 32, 32);

    graph.compile(&settings).unwrap();
    let first: Vec<Vec<OperationId>> = graph.passes().iter().map(|p| p.operations().collect()).collect();
    graph.compile(&settings).unwrap();
    let second: Vec<Vec<OperationId>> = graph.passes().iter().map(|p| p.operations().collect()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_recompile_releases_previous_objects() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, _) = layered_graph(device.clone(), 2, &[(0, 1)]);
    let settings = GraphSettings::new(2, 8, 8);

    graph.compile(&settings).unwrap();
    let live = device.live_object_count();
    graph.compile(&settings).unwrap();
    assert_eq!(device.live_object_count(), live);
}

#[test]
#[should_panic(expected = "already has an input at slot 0")]
fn test_duplicate_input_slot_panics() {
    let device = Arc::new(DummyDevice::new());
    let mut graph = RenderGraph::new(device);
    let a = surface_image(&mut graph, "a");
    let b = surface_image(&mut graph, "b");
    let op = render_op(&mut graph, "op");
    graph.create_input_connection(op, a, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
    graph.create_input_connection(op, b, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
}

#[test]
#[should_panic(expected = "already has an output at slot 1")]
fn test_duplicate_output_slot_panics() {
    let device = Arc::new(DummyDevice::new());
    let mut graph = RenderGraph::new(device);
    let a = surface_image(&mut graph, "a");
    let b = surface_image(&mut graph, "b");
    let op = render_op(&mut graph, "op");
    graph.create_output_connection(op, 1, a);
    graph.create_output_connection(op, 1, b);
}

#[test]
fn test_submit_and_present_on_uncompiled_graph_do_nothing() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let swapchain = swapchain(&device, 2);
    let scenario = two_pass_graph(device.clone(), swapchain.clone());
    device.clear_events();

    scenario.graph.submit(0, &[], &[], None).unwrap();
    scenario.graph.present(0, swapchain.as_ref(), &[]).unwrap();

    assert_eq!(device.submission_count(), 0);
    assert!(!device
        .events()
        .iter()
        .any(|event| matches!(event, DeviceEvent::Present { .. })));
}

#[test]
fn test_submit_out_of_range_frame_does_nothing() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, _) = layered_graph(device.clone(), 1, &[]);
    graph.compile(&GraphSettings::new(2, 8, 8)).unwrap();

    graph.submit(2, &[], &[], None).unwrap();
    assert_eq!(device.submission_count(), 0);
    graph.submit(1, &[], &[], None).unwrap();
    assert_eq!(device.submission_count(), 1);
}

#[test]
#[should_panic(expected = "present called with a swapchain that cannot present")]
fn test_present_through_headless_swapchain_panics() {
    let device = Arc::new(DummyDevice::new());
    let headless = Arc::new(DummySwapchain::headless(device.clone(), Extent2d::new(8, 8), 1).unwrap());
    let graph = RenderGraph::new(device);
    let _ = graph.present(0, headless.as_ref(), &[]);
}

#[test]
fn test_present_operation_transitions_to_present_layout() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let swapchain = swapchain(&device, 1);
    let mut graph = RenderGraph::new(device.clone());
    let screen = graph.add_resource(SwapchainImageResource::new(swapchain.clone()));
    let draw = render_op(&mut graph, "draw");
    graph.create_output_connection(draw, 0, screen);
    let present = graph.add_operation(PresentOperation::new().named("present"));
    graph.create_input_connection(present, screen, InputBinding::present_source());
    graph.compile(&GraphSettings::from_swapchain(swapchain.as_ref())).unwrap();

    let result = graph.compile_result().unwrap();
    assert_eq!(result.pass_of(draw), Some(0));
    assert_eq!(result.pass_of(present), Some(1));
    let image = swapchain.images()[0];
    let commands = device.recorded_commands(result.command_buffers(0).unwrap()[0]).unwrap();
    assert_eq!(
        commands.first(),
        Some(&Command::ImageBarriers(vec![ImageBarrier {
            image,
            old_layout: ImageLayout::PresentSrc,
            new_layout: ImageLayout::ColorAttachment,
            layers: 1,
        }]))
    );
}

#[test]
fn test_transfer_copies_between_images() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut graph = RenderGraph::new(device.clone());
    let src = surface_image(&mut graph, "src");
    let dst = surface_image(&mut graph, "dst");
    let draw = render_op(&mut graph, "draw");
    graph.create_output_connection(draw, 0, src);
    let copy = graph.add_operation(TransferOperation::new().named("copy"));
    graph.create_input_connection(copy, src, InputBinding::transfer_source());
    graph.create_output_connection(copy, 0, dst);
    graph.compile(&GraphSettings::new(1, 8, 4)).unwrap();

    let result = graph.compile_result().unwrap();
    let src_image = graph.resource(src).unwrap().image(0).unwrap();
    let dst_image = graph.resource(dst).unwrap().image(0).unwrap();
    let commands = device.recorded_commands(result.command_buffers(0).unwrap()[0]).unwrap();
    let copy_at = commands
        .iter()
        .position(|command| {
            *command
                == Command::CopyImage {
                    src: src_image,
                    dst: dst_image,
                    extent: Extent3d::new(8, 4, 1),
                    layers: 1,
                }
        })
        .expect("copy recorded");
    let Command::ImageBarriers(barriers) = &commands[copy_at - 1] else {
        panic!("copy must be preceded by its layout transitions");
    };
    assert!(barriers
        .iter()
        .any(|b| b.image == src_image && b.new_layout == ImageLayout::TransferSrc));
    assert!(barriers
        .iter()
        .any(|b| b.image == dst_image && b.new_layout == ImageLayout::TransferDst));
}

#[test]
fn test_per_operation_command_buffers() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let (mut graph, ops) = layered_graph(device.clone(), 3, &[(0, 1), (1, 2)]);
    let settings = GraphSettings::new(2, 8, 8).with_strategy(CommandBufferStrategy::PerOperation);
    graph.compile(&settings).unwrap();

    let result = graph.compile_result().unwrap();
    assert_eq!(result.command_buffers_per_frame(), 3);
    for (index, op) in ops.iter().enumerate() {
        assert_eq!(result.command_buffer_index(*op), Some(index));
        assert_eq!(result.operations_in_command_buffer(index), &[*op]);
    }

    graph.submit(0, &[], &[], None).unwrap();
    let submitted = device.events().into_iter().find_map(|event| match event {
        DeviceEvent::Submit { command_buffers, .. } => Some(command_buffers),
        _ => None,
    });
    assert_eq!(submitted.as_deref(), result.command_buffers(0));
}

#[test]
fn test_read_only_image_uploaded_once_and_kept() {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let mut graph = RenderGraph::new(device.clone());
    let texture = graph.add_resource(
        ReadOnlyImageResource::new(TextureFormat::Rgba8Unorm, Extent3d::new(2, 2, 1)).named("texture"),
    );
    let target = surface_image(&mut graph, "target");
    let op = render_op(&mut graph, "op");
    graph.create_input_connection(op, texture, InputBinding::sampled(0, ShaderStageFlags::FRAGMENT));
    graph.create_output_connection(op, 0, target);

    let texels: Vec<u8> = (0..16).collect();
    let Some(Resource::ReadOnlyImage(image)) = graph.resource_mut(texture) else {
        panic!("texture is a read-only image");
    };
    image.set_data(device.as_ref(), texels.clone()).unwrap();

    graph.compile(&GraphSettings::new(2, 8, 8)).unwrap();
    let first = graph.resource(texture).unwrap().image(0).unwrap();
    assert_eq!(graph.resource(texture).unwrap().image(1), Some(first));
    assert_eq!(device.image_data(first), Some(texels));

    graph.compile(&GraphSettings::new(3, 16, 16)).unwrap();
    assert_eq!(graph.resource(texture).unwrap().image(0), Some(first));
}

#[rstest]
#[case::honest(true)]
#[case::dishonest(false)]
fn test_compile_while_frames_in_flight(#[case] caller_waits: bool) {
    init_logging();
    let device = device(CompletionMode::Deferred);
    let (mut graph, _) = layered_graph(device.clone(), 2, &[(0, 1)]);
    let settings = GraphSettings::new(2, 8, 8);
    graph.compile(&settings).unwrap();

    let fence = device.create_fence(false).unwrap();
    graph.submit(0, &[], &[], Some(fence)).unwrap();
    assert_eq!(device.pending_submissions(), 1);

    if caller_waits {
        device.wait_fence(fence).unwrap();
    }
    device.clear_events();
    graph.compile(&settings).unwrap();

    assert_eq!(device.pending_submissions(), 0);
    assert!(device.is_fence_signaled(fence).unwrap());
    let events = device.events();
    let idle = position_of(&events, |e| *e == DeviceEvent::WaitIdle).unwrap();
    let recorded = position_of(&events, |e| matches!(e, DeviceEvent::RecordCommandBuffer(_))).unwrap();
    assert!(idle < recorded, "compile must drain the queue before recording");
    graph.submit(0, &[], &[], None).unwrap();
}

fn quad_graph(device: Arc<DummyDevice>, input: VertexInput) -> (RenderGraph, OperationId) {
    let mut graph = RenderGraph::new(device);
    let target = surface_image(&mut graph, "target");
    let op = graph.add_operation(
        RenderOperation::new(stub_pipeline(), DrawSpec::new(0, 2))
            .with_vertex_input(input)
            .named("quad"),
    );
    graph.create_output_connection(op, 0, target);
    (graph, op)
}

#[test]
fn test_indexed_draw_from_uploaded_buffers() {
    init_logging();
    let device = device(CompletionMode::Immediate);
    let corners = [[-1.0f32, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];
    let layout = VertexBufferLayout::packed(&[VertexFormat::Float2]);
    let input = VertexInput::new()
        .with_buffer(layout.clone(), &corners)
        .with_indices([0u16, 1, 2, 2, 1, 3]);
    let (mut graph, op) = quad_graph(device.clone(), input);
    graph.compile(&GraphSettings::new(2, 16, 16)).unwrap();

    let result = graph.compile_result().unwrap();
    let state = result.operation_state(op).unwrap();
    let &[vertices] = &state.vertex_buffers[..] else {
        panic!("expected one vertex buffer, got {:?}", state.vertex_buffers);
    };
    let indices = state.index_buffer.unwrap();
    assert_eq!(device.buffer_contents(vertices).unwrap().len(), 32);
    assert_eq!(
        device.buffer_contents(indices).unwrap(),
        vec![0, 0, 1, 0, 2, 0, 2, 0, 1, 0, 3, 0]
    );
    let pipeline = device.pipeline_descriptor(state.pipeline.unwrap()).unwrap();
    assert_eq!(pipeline.vertex_buffers, vec![layout]);

    for frame in 0..2 {
        let commands = device
            .recorded_commands(result.command_buffers(frame).unwrap()[0])
            .unwrap();
        let at = |wanted: Command| commands.iter().position(|c| *c == wanted).unwrap();
        let bind = at(Command::BindVertexBuffers {
            first_binding: 0,
            buffers: vec![vertices],
        });
        let index = at(Command::BindIndexBuffer(indices));
        let draw = at(Command::DrawIndexed {
            index_count: 6,
            instance_count: 2,
        });
        assert!(bind < index && index < draw);
        assert!(!commands.iter().any(|c| matches!(c, Command::Draw { .. })));
    }

    let live = device.live_object_count();
    graph.compile(&GraphSettings::new(2, 16, 16)).unwrap();
    assert_eq!(device.live_object_count(), live);
}

#[test]
fn test_vertex_buffers_without_indices_draw_every_vertex() {
    let device = device(CompletionMode::Immediate);
    let triangle = [[0.0f32, 1.0, 0.0], [-1.0, -1.0, 0.0], [1.0, -1.0, 0.0]];
    let input =
        VertexInput::new().with_buffer(VertexBufferLayout::packed(&[VertexFormat::Float3]), &triangle);
    let (mut graph, op) = quad_graph(device.clone(), input);
    graph.compile(&GraphSettings::new(1, 16, 16)).unwrap();

    let result = graph.compile_result().unwrap();
    assert!(result.operation_state(op).unwrap().index_buffer.is_none());
    let commands = device.recorded_commands(result.command_buffers(0).unwrap()[0]).unwrap();
    assert!(commands.contains(&Command::Draw {
        vertex_count: 3,
        instance_count: 2,
        first_vertex: 0,
        first_instance: 0,
    }));
    assert!(!commands.iter().any(|c| matches!(c, Command::BindIndexBuffer(_))));
}

#[test]
fn test_empty_vertex_buffer_rejected() {
    let device = device(CompletionMode::Immediate);
    let input = VertexInput::new()
        .with_buffer::<[f32; 2]>(VertexBufferLayout::packed(&[VertexFormat::Float2]), &[]);
    let (mut graph, _) = quad_graph(device, input);
    assert!(matches!(
        graph.compile(&GraphSettings::new(1, 16, 16)),
        Err(GraphError::InvalidVertexInput { .. })
    ));
}
