//! Uniform block and sampler reflection from naga modules.

use naga::valid::ModuleInfo;

use crate::backend::{ImageDimension, ShaderStage};

/// Shape of a reflected field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Vector { size: u8 },
    Matrix { columns: u8, rows: u8 },
    Struct,
    Other,
}

/// Member of a uniform block
///
/// Offsets are relative to the start of the enclosing struct element. For arrays `size`
/// covers the whole array and `fields` describes one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub kind: FieldKind,
    pub offset: u32,
    pub size: u32,
    pub element_size: u32,
    pub array_len: Option<u32>,
    pub array_stride: u32,
    pub fields: Vec<UniformField>,
}

impl UniformField {
    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_array(&self) -> bool {
        self.array_len.is_some()
    }
}

/// Uniform block declared by a shader stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    /// Variable name, falling back to the type name
    pub name: String,
    pub type_name: Option<String>,
    pub group: u32,
    pub binding: u32,
    /// Full byte size of the block
    pub size: u32,
    /// Struct members, empty when the block is a single value
    pub fields: Vec<UniformField>,
}

impl UniformBlockLayout {
    /// Match either the variable or the type name.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.type_name.as_deref() == Some(name)
    }

    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Sampled image declared by a shader stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub dim: ImageDimension,
    pub array_len: u32,
    /// Binding of the sampler this image is sampled with. Equal to `binding`
    /// for a combined image sampler, `None` when the image is never sampled.
    pub sampler_binding: Option<u32>,
}

impl SamplerBinding {
    pub fn is_combined(&self) -> bool {
        self.sampler_binding == Some(self.binding)
    }
}

/// Standalone `sampler` global
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerStateBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub comparison: bool,
}

/// Everything the uniform layer needs to know about one shader stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub blocks: Vec<UniformBlockLayout>,
    pub samplers: Vec<SamplerBinding>,
    pub separate_samplers: Vec<SamplerStateBinding>,
}

impl ShaderReflection {
    pub fn block(&self, name: &str) -> Option<&UniformBlockLayout> {
        self.blocks.iter().find(|block| block.matches(name))
    }

    pub fn sampler(&self, name: &str) -> Option<&SamplerBinding> {
        self.samplers.iter().find(|sampler| sampler.name == name)
    }

    /// Separate samplers no reflected image is paired with.
    pub fn unpaired_samplers(&self) -> impl Iterator<Item = &SamplerStateBinding> {
        self.separate_samplers.iter().filter(|state| {
            !self
                .samplers
                .iter()
                .any(|image| image.sampler_binding == Some(state.binding))
        })
    }
}

/// Field trees cannot describe a runtime sized array.
#[derive(Debug)]
struct RuntimeSizedArray;

pub(crate) fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        ShaderStage::Geometry
        | ShaderStage::TessellationControl
        | ShaderStage::TessellationEvaluation => None,
    }
}

/// Reflect the globals used by one entry point, or every bound global when
/// `entry_point` is `None`.
pub fn reflect_module(
    module: &naga::Module,
    info: &ModuleInfo,
    entry_point: Option<usize>,
) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();
    let pairs = sampling_pairs(module, entry_point);

    for (handle, global) in module.global_variables.iter() {
        if let Some(index) = entry_point {
            if info.get_entry_point(index)[handle].is_empty() {
                continue;
            }
        }
        let Some(binding) = global.binding.as_ref() else {
            continue;
        };
        let ty = &module.types[global.ty];

        match global.space {
            naga::AddressSpace::Uniform => {
                let name = global
                    .name
                    .clone()
                    .or_else(|| ty.name.clone())
                    .unwrap_or_else(|| format!("block_{}_{}", binding.group, binding.binding));
                match reflect_block(module, global.ty) {
                    Ok(fields) => reflection.blocks.push(UniformBlockLayout {
                        name,
                        type_name: ty.name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        size: ty.inner.size(module.to_ctx()),
                        fields,
                    }),
                    Err(RuntimeSizedArray) => log::warn!(
                        "Skipping uniform block {} with a runtime sized array",
                        name
                    ),
                }
            }
            naga::AddressSpace::Handle => {
                if let Some((dim, array_len)) = sampled_image(module, global.ty) {
                    let sampler_binding = pairs
                        .iter()
                        .find(|(image, _)| *image == handle)
                        .and_then(|(_, sampler)| module.global_variables[*sampler].binding.as_ref())
                        .map(|sampler| sampler.binding);
                    reflection.samplers.push(SamplerBinding {
                        name: global
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("image_{}_{}", binding.group, binding.binding)),
                        group: binding.group,
                        binding: binding.binding,
                        dim,
                        array_len,
                        sampler_binding,
                    });
                } else if let Some(comparison) = sampler_state(module, global.ty) {
                    reflection.separate_samplers.push(SamplerStateBinding {
                        name: global
                            .name
                            .clone()
                            .unwrap_or_else(|| format!("sampler_{}_{}", binding.group, binding.binding)),
                        group: binding.group,
                        binding: binding.binding,
                        comparison,
                    });
                }
            }
            _ => {}
        }
    }

    reflection.blocks.sort_by_key(|block| (block.group, block.binding));
    reflection
        .samplers
        .sort_by_key(|sampler| (sampler.group, sampler.binding));
    reflection
        .separate_samplers
        .sort_by_key(|state| (state.group, state.binding));
    pair_by_name(&mut reflection);
    reflection
}

/// (image, sampler) globals combined by `textureSample*` calls. Helper functions
/// are always walked since naga does not record which ones an entry point calls.
fn sampling_pairs(
    module: &naga::Module,
    entry_point: Option<usize>,
) -> Vec<(naga::Handle<naga::GlobalVariable>, naga::Handle<naga::GlobalVariable>)> {
    let entry_functions = module
        .entry_points
        .iter()
        .enumerate()
        .filter(|(index, _)| entry_point.map_or(true, |wanted| wanted == *index))
        .map(|(_, ep)| &ep.function);
    let functions = module
        .functions
        .iter()
        .map(|(_, function)| function)
        .chain(entry_functions);

    let mut pairs = Vec::new();
    for function in functions {
        for (_, expression) in function.expressions.iter() {
            let naga::Expression::ImageSample { image, sampler, .. } = expression else {
                continue;
            };
            let (Some(image), Some(sampler)) = (
                expression_global(function, *image),
                expression_global(function, *sampler),
            ) else {
                continue;
            };
            if !pairs.contains(&(image, sampler)) {
                pairs.push((image, sampler));
            }
        }
    }
    pairs
}

/// Global variable behind an expression, looking through binding array indexing.
fn expression_global(
    function: &naga::Function,
    expression: naga::Handle<naga::Expression>,
) -> Option<naga::Handle<naga::GlobalVariable>> {
    match function.expressions[expression] {
        naga::Expression::GlobalVariable(global) => Some(global),
        naga::Expression::Access { base, .. } | naga::Expression::AccessIndex { base, .. } => {
            expression_global(function, base)
        }
        _ => None,
    }
}

/// Images sampled only through function arguments fall back to `<image>_sampler`.
fn pair_by_name(reflection: &mut ShaderReflection) {
    for image in reflection
        .samplers
        .iter_mut()
        .filter(|image| image.sampler_binding.is_none())
    {
        let wanted = format!("{}_sampler", image.name);
        if let Some(state) = reflection
            .separate_samplers
            .iter()
            .find(|state| state.name == wanted && state.group == image.group)
        {
            image.sampler_binding = Some(state.binding);
        }
    }
}

fn reflect_block(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
) -> Result<Vec<UniformField>, RuntimeSizedArray> {
    match &module.types[ty].inner {
        naga::TypeInner::Struct { members, .. } => members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let name = member
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("member_{index}"));
                reflect_field(module, name, member.ty, member.offset)
            })
            .collect(),
        naga::TypeInner::Array { .. } => {
            // A bare array block still needs a field to index into.
            let name = module.types[ty].name.clone().unwrap_or_else(|| "data".into());
            Ok(vec![reflect_field(module, name, ty, 0)?])
        }
        _ => Ok(Vec::new()),
    }
}

fn reflect_field(
    module: &naga::Module,
    name: String,
    ty: naga::Handle<naga::Type>,
    offset: u32,
) -> Result<UniformField, RuntimeSizedArray> {
    let inner = &module.types[ty].inner;
    match inner {
        naga::TypeInner::Array { base, size, stride } => {
            let len = match size {
                naga::ArraySize::Constant(len) => len.get(),
                _ => return Err(RuntimeSizedArray),
            };
            let element = reflect_field(module, name.clone(), *base, 0)?;
            Ok(UniformField {
                name,
                kind: element.kind,
                offset,
                size: len * stride,
                element_size: element.size,
                array_len: Some(len),
                array_stride: *stride,
                fields: element.fields,
            })
        }
        naga::TypeInner::Struct { members, span } => {
            let fields = members
                .iter()
                .enumerate()
                .map(|(index, member)| {
                    let name = member
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("member_{index}"));
                    reflect_field(module, name, member.ty, member.offset)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(UniformField {
                name,
                kind: FieldKind::Struct,
                offset,
                size: *span,
                element_size: *span,
                array_len: None,
                array_stride: 0,
                fields,
            })
        }
        _ => {
            let size = inner.size(module.to_ctx());
            Ok(UniformField {
                name,
                kind: field_kind(inner),
                offset,
                size,
                element_size: size,
                array_len: None,
                array_stride: 0,
                fields: Vec::new(),
            })
        }
    }
}

fn field_kind(inner: &naga::TypeInner) -> FieldKind {
    match inner {
        naga::TypeInner::Scalar(_) | naga::TypeInner::Atomic(_) => FieldKind::Scalar,
        naga::TypeInner::Vector { size, .. } => FieldKind::Vector { size: *size as u8 },
        naga::TypeInner::Matrix { columns, rows, .. } => FieldKind::Matrix {
            columns: *columns as u8,
            rows: *rows as u8,
        },
        _ => FieldKind::Other,
    }
}

fn sampled_image(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<(ImageDimension, u32)> {
    match &module.types[ty].inner {
        naga::TypeInner::Image { dim, .. } => Some((image_dimension(*dim), 1)),
        naga::TypeInner::BindingArray { base, size } => {
            let len = match size {
                naga::ArraySize::Constant(len) => len.get(),
                _ => 1,
            };
            sampled_image(module, *base).map(|(dim, _)| (dim, len))
        }
        _ => None,
    }
}

fn sampler_state(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Option<bool> {
    match &module.types[ty].inner {
        naga::TypeInner::Sampler { comparison } => Some(*comparison),
        naga::TypeInner::BindingArray { base, .. } => sampler_state(module, *base),
        _ => None,
    }
}

fn image_dimension(dim: naga::ImageDimension) -> ImageDimension {
    match dim {
        naga::ImageDimension::D1 => ImageDimension::D1,
        naga::ImageDimension::D2 => ImageDimension::D2,
        naga::ImageDimension::D3 => ImageDimension::D3,
        naga::ImageDimension::Cube => ImageDimension::Cube,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
struct Light {
    position: vec4<f32>,
    intensity: f32,
}

struct Params {
    color: vec4<f32>,
    time: f32,
    lights: array<Light, 3>,
    transform: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<uniform> scale: f32;
@group(0) @binding(2) var noise: texture_2d<f32>;
@group(0) @binding(3) var noise_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(index) * scale;
    return vec4<f32>(x, 0.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let sampled = textureSample(noise, noise_sampler, vec2<f32>(0.5, 0.5));
    return params.color * params.time + params.lights[1].position * params.lights[2].intensity + params.transform[0] + sampled;
}
"#;

    fn reflect(entry: &str) -> ShaderReflection {
        let module = naga::front::wgsl::parse_str(SOURCE).unwrap();
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap();
        let index = module
            .entry_points
            .iter()
            .position(|ep| ep.name == entry)
            .unwrap();
        reflect_module(&module, &info, Some(index))
    }

    #[test]
    fn test_reflects_only_used_globals() {
        let vertex = reflect("vs_main");
        assert_eq!(vertex.blocks.len(), 1);
        assert_eq!(vertex.blocks[0].name, "scale");
        assert_eq!(vertex.blocks[0].size, 4);
        assert!(vertex.blocks[0].fields.is_empty());
        assert!(vertex.samplers.is_empty());

        let fragment = reflect("fs_main");
        assert_eq!(fragment.blocks.len(), 1);
        assert_eq!(fragment.samplers.len(), 1);
        assert_eq!(fragment.samplers[0].name, "noise");
        assert_eq!(fragment.samplers[0].binding, 2);
        assert_eq!(fragment.samplers[0].dim, ImageDimension::D2);
    }

    #[test]
    fn test_separate_sampler_paired_with_texture() {
        let fragment = reflect("fs_main");
        assert_eq!(
            fragment.separate_samplers,
            vec![SamplerStateBinding {
                name: "noise_sampler".into(),
                group: 0,
                binding: 3,
                comparison: false,
            }]
        );
        assert_eq!(fragment.samplers[0].sampler_binding, Some(3));
        assert!(!fragment.samplers[0].is_combined());
        assert_eq!(fragment.unpaired_samplers().count(), 0);

        assert!(reflect("vs_main").separate_samplers.is_empty());
    }

    #[test]
    fn test_pairing_follows_sample_calls_not_names() {
        let source = r#"
@group(0) @binding(0) var left: texture_2d<f32>;
@group(0) @binding(1) var right: texture_2d<f32>;
@group(0) @binding(2) var sharp: sampler;
@group(0) @binding(3) var soft: sampler;
@group(0) @binding(4) var unused_sampler: sampler;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let uv = vec2<f32>(0.25, 0.75);
    return textureSample(left, soft, uv) + textureSample(right, sharp, uv);
}
"#;
        let module = naga::front::wgsl::parse_str(source).unwrap();
        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap();
        let reflection = reflect_module(&module, &info, Some(0));

        let left = reflection.sampler("left").unwrap();
        let right = reflection.sampler("right").unwrap();
        assert_eq!((left.sampler_binding, right.sampler_binding), (Some(3), Some(2)));
        // unused by the entry point, so not reflected at all
        assert_eq!(reflection.separate_samplers.len(), 2);

        let everything = reflect_module(&module, &info, None);
        let unpaired: Vec<_> = everything.unpaired_samplers().map(|s| s.name.as_str()).collect();
        assert_eq!(unpaired, vec!["unused_sampler"]);
    }

    #[test]
    fn test_struct_layout() {
        let fragment = reflect("fs_main");
        let block = fragment.block("Params").unwrap();
        assert_eq!(block.name, "params");
        assert_eq!(block.binding, 0);

        let color = block.field("color").unwrap();
        assert_eq!((color.offset, color.size), (0, 16));
        assert_eq!(color.kind, FieldKind::Vector { size: 4 });

        let time = block.field("time").unwrap();
        assert_eq!((time.offset, time.size), (16, 4));

        let lights = block.field("lights").unwrap();
        assert_eq!(lights.offset, 32);
        assert_eq!(lights.array_len, Some(3));
        assert_eq!(lights.array_stride, 32);
        assert_eq!(lights.size, 96);
        let intensity = lights.field("intensity").unwrap();
        assert_eq!((intensity.offset, intensity.size), (16, 4));

        let transform = block.field("transform").unwrap();
        assert_eq!(transform.offset, 128);
        assert_eq!(transform.size, 64);
        assert_eq!(block.size, 192);
    }
}
