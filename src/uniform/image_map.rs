//! Placeholder textures for every sampler a graph's shaders declare

use std::collections::HashMap;

use crate::backend::*;
use crate::error::UniformError;
use crate::render_graph::{InputBinding, OperationId, ReadOnlyImageResource, RenderGraph, ResourceId};
use crate::shader::SamplerBinding;

/// Image parameters handed out by an extent provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageCreateParams {
    /// Components beyond the sampler's dimensionality are ignored.
    pub extent: Extent3d,
    pub format: TextureFormat,
    pub filter: Filter,
}

impl Default for ImageCreateParams {
    fn default() -> Self {
        Self {
            extent: Extent3d::new(512, 512, 512),
            format: TextureFormat::R8Srgb,
            filter: Filter::Linear,
        }
    }
}

/// Read-only images created for reflected samplers
#[derive(Debug, Clone, Default)]
pub struct ImageMap {
    images: Vec<(SamplerBinding, ResourceId)>,
}

impl ImageMap {
    pub fn find_by_name(&self, name: &str) -> Option<ResourceId> {
        self.images
            .iter()
            .find(|(sampler, _)| sampler.name == name)
            .map(|(_, id)| *id)
    }

    pub fn resource(&self, name: &str) -> Result<ResourceId, UniformError> {
        self.find_by_name(name)
            .ok_or_else(|| UniformError::UnknownSampler(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SamplerBinding, ResourceId)> + '_ {
        self.images.iter().map(|(sampler, id)| (sampler, *id))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Create and connect a read-only image for every sampler of every render operation.
///
/// `provider` may override the parameters of a sampler; `None` falls back to
/// [`ImageCreateParams::default`]. A sampler bound by several stages of one operation gets a
/// single image.
///
/// Textures sampled through a separate `sampler` global are connected twice: as a sampled
/// image at the texture binding and as a sampler at the sampler binding, so the pipeline
/// layout covers both. A sampler shared by several textures takes the first one's filter.
pub fn create_empty_image_resources(
    graph: &mut RenderGraph,
    mut provider: impl FnMut(&SamplerBinding) -> Option<ImageCreateParams>,
) -> ImageMap {
    let samplers: Vec<(OperationId, ShaderStage, SamplerBinding)> = graph
        .operations()
        .filter_map(|(id, op)| op.as_render().map(|render| (id, render)))
        .flat_map(|(id, render)| {
            render.pipeline.stages().iter().flat_map(move |shader| {
                shader
                    .reflection
                    .samplers
                    .iter()
                    .map(move |sampler| (id, shader.stage, sampler.clone()))
            })
        })
        .collect();

    let unpaired: Vec<(OperationId, ShaderStage, String)> = graph
        .operations()
        .filter_map(|(id, op)| op.as_render().map(|render| (id, render)))
        .flat_map(|(id, render)| {
            render.pipeline.stages().iter().flat_map(move |shader| {
                shader
                    .reflection
                    .unpaired_samplers()
                    .map(move |state| (id, shader.stage, state.name.clone()))
            })
        })
        .collect();
    for (op, stage, name) in unpaired {
        log::warn!(
            "Sampler {} of {} {} stage is not paired with any texture and stays unbound",
            name,
            graph.operation_label(op),
            stage
        );
    }

    let mut map = ImageMap::default();
    let mut connected: HashMap<(OperationId, u32), ResourceId> = HashMap::new();

    for (op, stage, sampler) in samplers {
        if let Some(&id) = connected.get(&(op, sampler.binding)) {
            graph.merge_input_stages(op, sampler.binding, stage.flag());
            connect_sampler_state(graph, &mut connected, op, stage, &sampler, id);
            continue;
        }

        let params = provider(&sampler).unwrap_or_default();
        let (extent, layers) = match sampler.dim {
            ImageDimension::D1 => (Extent3d::new(params.extent.width, 1, 1), 1),
            ImageDimension::D2 => (
                Extent3d::new(params.extent.width, params.extent.height, 1),
                1,
            ),
            ImageDimension::D3 => (params.extent, 1),
            ImageDimension::Cube => (
                Extent3d::new(params.extent.width, params.extent.height, 1),
                6,
            ),
        };
        let layers = layers * sampler.array_len.max(1);

        let resource = ReadOnlyImageResource::new(params.format, extent)
            .named(sampler.name.clone())
            .with_layers(layers)
            .with_filter(params.filter);
        let id = graph.add_resource(resource);
        let binding = if sampler.is_combined() {
            InputBinding::sampled(sampler.binding, stage.flag())
        } else {
            InputBinding::texture(sampler.binding, stage.flag())
        };
        graph.create_input_connection(op, id, binding.with_layers(layers));
        connected.insert((op, sampler.binding), id);
        connect_sampler_state(graph, &mut connected, op, stage, &sampler, id);
        log::debug!(
            "Created {:?} image {} for sampler {} of {}",
            sampler.dim,
            id,
            sampler.name,
            graph.operation_label(op)
        );

        map.images.push((sampler, id));
    }
    map
}

fn connect_sampler_state(
    graph: &mut RenderGraph,
    connected: &mut HashMap<(OperationId, u32), ResourceId>,
    op: OperationId,
    stage: ShaderStage,
    sampler: &SamplerBinding,
    image: ResourceId,
) {
    let Some(slot) = sampler.sampler_binding.filter(|_| !sampler.is_combined()) else {
        return;
    };
    if connected.contains_key(&(op, slot)) {
        graph.merge_input_stages(op, slot, stage.flag());
        return;
    }
    graph.create_input_connection(op, image, InputBinding::sampler(slot, stage.flag()));
    connected.insert((op, slot), image);
}
