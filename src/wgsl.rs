//! WGSL front end shared by every device.
//!
//! Sources are parsed and validated with naga so that a bad shader produces the
//! same diagnostic text whether it is compiled against wgpu or the headless device.

use std::collections::BTreeSet;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Module, TypeInner};

use crate::device::ShaderStage;
use crate::error::{Error, Result};

/// A validated single-stage shader.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// `@location`s consumed by the entry point.
    pub inputs: BTreeSet<u32>,
    /// `@location`s produced by the entry point.
    pub outputs: BTreeSet<u32>,
    /// `@group(0)` bindings the entry point actually touches.
    pub bindings: BTreeSet<u32>,
    pub source: String,
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

/// Parses and validates `source`, then locates the entry point for `stage`.
pub fn compile(label: &str, stage: ShaderStage, source: &str) -> Result<CompiledShader> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| Error::Compile {
        name: label.to_string(),
        diagnostic: e.emit_to_string(source),
    })?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| Error::Compile {
            name: label.to_string(),
            diagnostic: e.emit_to_string(source),
        })?;

    let wanted = naga_stage(stage);
    let (index, entry) = module
        .entry_points
        .iter()
        .enumerate()
        .find(|(_, ep)| ep.stage == wanted)
        .ok_or_else(|| Error::Compile {
            name: label.to_string(),
            diagnostic: format!("no @{stage} entry point"),
        })?;

    let mut inputs = BTreeSet::new();
    for arg in &entry.function.arguments {
        collect_locations(&module, arg.ty, arg.binding.as_ref(), &mut inputs);
    }
    let mut outputs = BTreeSet::new();
    if let Some(result) = &entry.function.result {
        collect_locations(&module, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let usage = info.get_entry_point(index);
    let bindings = module
        .global_variables
        .iter()
        .filter(|(handle, _)| !usage[*handle].is_empty())
        .filter_map(|(_, var)| var.binding.as_ref())
        .filter(|rb| rb.group == 0)
        .map(|rb| rb.binding)
        .collect();

    Ok(CompiledShader {
        stage,
        entry_point: entry.name.clone(),
        inputs,
        outputs,
        bindings,
        source: source.to_string(),
    })
}

fn collect_locations(
    module: &Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    into: &mut BTreeSet<u32>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            into.insert(*location);
        }
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    if let Some(Binding::Location { location, .. }) = &member.binding {
                        into.insert(*location);
                    }
                }
            }
        }
    }
}

/// Checks that `shaders` form a usable program.
///
/// A program is either a single compute shader or a vertex + fragment pair whose
/// fragment inputs are all written by the vertex stage.
pub fn link(label: &str, shaders: &[&CompiledShader]) -> Result<()> {
    let link_error = |diagnostic: String| Error::Link {
        name: label.to_string(),
        diagnostic,
    };

    let mut seen = BTreeSet::new();
    for shader in shaders {
        if !seen.insert(shader.stage) {
            return Err(Error::DuplicateStage {
                name: label.to_string(),
                stage: shader.stage,
            });
        }
    }

    let find = |stage| shaders.iter().find(|s| s.stage == stage);
    match (
        find(ShaderStage::Vertex),
        find(ShaderStage::Fragment),
        find(ShaderStage::Compute),
    ) {
        (None, None, None) => Err(link_error("no shaders attached".into())),
        (None, None, Some(_)) => Ok(()),
        (_, _, Some(_)) => Err(link_error(
            "a compute shader cannot be linked with graphics stages".into(),
        )),
        (None, Some(_), None) => Err(link_error("missing vertex shader".into())),
        (Some(_), None, None) => Err(link_error("missing fragment shader".into())),
        (Some(vs), Some(fs), None) => {
            let missing: Vec<_> = fs.inputs.difference(&vs.outputs).collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(link_error(format!(
                    "fragment input location(s) {missing:?} are not written by the vertex shader"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) p: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.pos = vec4<f32>(p, 0.0, 1.0);
    out.uv = p * 0.5 + 0.5;
    return out;
}
"#;

    const FS: &str = r#"
@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(uv, 0.0, 1.0);
}
"#;

    #[test]
    fn collects_entry_point_locations() {
        let vs = compile("vs", ShaderStage::Vertex, VS).unwrap();
        assert_eq!(vs.entry_point, "vs_main");
        assert_eq!(vs.inputs, BTreeSet::from([0]));
        assert_eq!(vs.outputs, BTreeSet::from([0]));

        let fs = compile("fs", ShaderStage::Fragment, FS).unwrap();
        assert_eq!(fs.inputs, BTreeSet::from([0]));
        assert!(fs.bindings.is_empty());
        link("prog", &[&vs, &fs]).unwrap();
    }

    #[test]
    fn reports_used_bindings_only() {
        let fs = compile(
            "fs",
            ShaderStage::Fragment,
            r#"
@group(0) @binding(1) var tex: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;
@group(0) @binding(3) var unused: texture_2d<f32>;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(tex, samp, uv);
}
"#,
        )
        .unwrap();
        assert_eq!(fs.bindings, BTreeSet::from([1, 2]));
    }

    #[test]
    fn syntax_error_carries_diagnostic() {
        let err = compile("bad", ShaderStage::Fragment, "fn broken( {").unwrap_err();
        match err {
            Error::Compile { name, diagnostic } => {
                assert_eq!(name, "bad");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let err = compile("fs-as-vs", ShaderStage::Vertex, FS).unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn unmatched_fragment_input_fails_link() {
        let vs = compile("vs", ShaderStage::Vertex, VS).unwrap();
        let fs = compile(
            "fs",
            ShaderStage::Fragment,
            "@fragment fn main(@location(3) c: vec4<f32>) -> @location(0) vec4<f32> { return c; }",
        )
        .unwrap();
        assert!(matches!(link("prog", &[&vs, &fs]), Err(Error::Link { .. })));
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let vs = compile("vs", ShaderStage::Vertex, VS).unwrap();
        assert!(matches!(
            link("prog", &[&vs, &vs]),
            Err(Error::DuplicateStage {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
    }
}
