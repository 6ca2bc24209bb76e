//! Builds the Python program the engine runs for one (script, format) pair.

use std::path::Path;

use export_core::ExportFormat;

use crate::markers;

/// Principled BSDF socket names renamed by the pinned engine version.
///
/// Only quoted subscript keys are rewritten so unrelated identifiers stay intact.
const LEGACY_SOCKET_NAMES: &[(&str, &str)] = &[
    ("Specular", "Specular IOR Level"),
    ("Transmission", "Transmission Weight"),
    ("Subsurface", "Subsurface Weight"),
    ("Emission", "Emission Color"),
    ("Sheen", "Sheen Weight"),
    ("Clearcoat", "Coat Weight"),
    ("Clearcoat Roughness", "Coat Roughness"),
];

/// Object types selected for export. Cameras, lights and empties are left out.
const EXPORTABLE_TYPES: &[&str] = &[
    "MESH",
    "CURVE",
    "SURFACE",
    "META",
    "FONT",
    "GPENCIL",
    "GREASEPENCIL",
    "ARMATURE",
];

/// Generates self-contained export programs.
///
/// The output is pure text: building never touches the filesystem and never
/// fails, not even for unknown formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportScriptBuilder;

impl ExportScriptBuilder {
    pub fn build(&self, fragment: Option<&str>, output_path: &Path, format_id: &str) -> String {
        let Some(format) = ExportFormat::from_id(format_id) else {
            return unknown_format_program(format_id);
        };

        let fragment = normalize_fragment(fragment);
        let output_path = output_path.to_string_lossy();

        let mut program = String::with_capacity(fragment.len() + 4096);
        program.push_str(PRELUDE);
        program.push_str(&format!("OUTPUT_PATH = {}\n", py_str(&output_path)));
        program.push_str(&format!("FORMAT_ID = {}\n", py_str(format.id())));
        program.push_str(&format!("USER_SCRIPT = {}\n", py_str(&fragment)));
        program.push_str(&format!(
            "EXPORTABLE_TYPES = {{{}}}\n",
            EXPORTABLE_TYPES
                .iter()
                .map(|t| py_str(t))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        program.push_str(&user_region());
        program.push_str(&scene_hygiene());
        program.push_str(&export_function(format));
        program.push_str(&export_attempts());
        program
    }
}

/// Absent scripts become empty; legacy socket names are rewritten.
pub fn normalize_fragment(fragment: Option<&str>) -> String {
    let mut text = fragment.unwrap_or_default().to_string();
    for (legacy, current) in LEGACY_SOCKET_NAMES {
        for quote in ['\'', '"'] {
            let from = format!("[{quote}{legacy}{quote}]");
            let to = format!("[{quote}{current}{quote}]");
            text = text.replace(&from, &to);
        }
    }
    text
}

/// Python string literal for arbitrary text.
///
/// JSON string syntax is a subset of Python's, so serde_json does the escaping.
fn py_str(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

const PRELUDE: &str = r#"import os
import sys
import traceback

import bpy

"#;

fn user_region() -> String {
    format!(
        r#"
print("EXPORT_PROGRAM_START", FORMAT_ID)

# Start from an empty scene regardless of the startup file.
bpy.ops.wm.read_factory_settings(use_empty=True)

try:
    exec(compile(USER_SCRIPT, "<user_script>", "exec"), {{"__name__": "__main__", "bpy": bpy}})
except (Exception, SystemExit) as exc:
    print(f"{marker}: {{type(exc).__name__}}: {{exc}}")
    traceback.print_exc(file=sys.stdout)
"#,
        marker = markers::USER_SCRIPT_ERROR
    )
}

fn scene_hygiene() -> String {
    format!(
        r#"
scene = bpy.context.scene
collection = bpy.data.collections.get("Collection")
if collection is None:
    collection = bpy.data.collections.new("Collection")
if scene.collection.children.get(collection.name) is None:
    scene.collection.children.link(collection)

active = bpy.context.view_layer.objects.active
if active is not None and active.mode != "OBJECT":
    try:
        bpy.ops.object.mode_set(mode="OBJECT")
    except Exception as exc:
        print(f"MODE_RESET_WARNING: {{exc}}")

for obj in scene.objects:
    try:
        obj.select_set(False)
    except RuntimeError:
        pass

selected = 0
for obj in scene.objects:
    if obj.type not in EXPORTABLE_TYPES:
        continue
    try:
        obj.select_set(True)
    except RuntimeError:
        continue
    bpy.context.view_layer.objects.active = obj
    selected += 1

print(f"{count}: {{selected}}")
if selected == 0:
    print("{zero}: no exportable objects in scene")
    sys.exit(3)

os.makedirs(os.path.dirname(OUTPUT_PATH) or ".", exist_ok=True)
"#,
        count = markers::SELECTED_OBJECTS,
        zero = markers::ZERO_OBJECTS_SELECTED,
    )
}

/// The format-specific exporter call, parameterised on selection mode.
fn export_call(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Glb => {
            "bpy.ops.export_scene.gltf(filepath=OUTPUT_PATH, export_format=\"GLB\", use_selection=selection_only, export_apply=True)"
        }
        ExportFormat::Fbx => {
            "bpy.ops.export_scene.fbx(filepath=OUTPUT_PATH, use_selection=selection_only, apply_scale_options=\"FBX_SCALE_ALL\")"
        }
        ExportFormat::Stl => {
            "bpy.ops.wm.stl_export(filepath=OUTPUT_PATH, export_selected_objects=selection_only)"
        }
        ExportFormat::Usd => {
            "bpy.ops.wm.usd_export(filepath=OUTPUT_PATH, selected_objects_only=selection_only)"
        }
        ExportFormat::Obj => {
            "bpy.ops.wm.obj_export(filepath=OUTPUT_PATH, export_selected_objects=selection_only)"
        }
        ExportFormat::Ply => {
            "bpy.ops.wm.ply_export(filepath=OUTPUT_PATH, export_selected_objects=selection_only)"
        }
    }
}

fn export_function(format: ExportFormat) -> String {
    format!(
        r#"

def run_export(selection_only):
    result = {call}
    if "FINISHED" not in result:
        raise RuntimeError(f"exporter returned {{result}}")
"#,
        call = export_call(format)
    )
}

fn export_attempts() -> String {
    format!(
        r#"

try:
    run_export(True)
    print("{success}: selection")
except Exception as exc:
    print(f"{error}: {{type(exc).__name__}}: {{exc}}")
    try:
        bpy.ops.object.select_all(action="SELECT")
        run_export(False)
        print("{success}: fallback")
    except Exception as exc:
        print(f"{critical}: {{type(exc).__name__}}: {{exc}}")
        traceback.print_exc(file=sys.stdout)
        sys.exit(4)
"#,
        success = markers::EXPORT_SUCCESS,
        error = markers::EXPORT_ERROR,
        critical = markers::CRITICAL_EXPORT_ERROR,
    )
}

fn unknown_format_program(format_id: &str) -> String {
    format!(
        "import sys\n\nprint(\"{marker}:\", {id})\nsys.exit(2)\n",
        marker = markers::UNKNOWN_FORMAT,
        id = py_str(format_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn out() -> PathBuf {
        PathBuf::from("/tmp/job/model.glb")
    }

    #[test]
    fn fragment_is_embedded_as_escaped_literal() {
        let fragment = "import bpy\nname = \"Cube\"\nprint('a\\b')";
        let program = ExportScriptBuilder.build(Some(fragment), &out(), "glb");
        assert!(program.contains(r#"USER_SCRIPT = "import bpy\nname = \"Cube\"\nprint('a\\b')""#));
        assert!(program.contains(r#"OUTPUT_PATH = "/tmp/job/model.glb""#));
        assert!(!program.contains("name = \"Cube\"\n"));
    }

    #[test]
    fn missing_fragment_is_empty_script() {
        let program = ExportScriptBuilder.build(None, &out(), "glb");
        assert!(program.contains("USER_SCRIPT = \"\"\n"));
    }

    #[test]
    fn legacy_socket_names_are_rewritten() {
        let fragment = "bsdf.inputs['Transmission'].default_value = 1\n\
                        bsdf.inputs[\"Clearcoat Roughness\"].default_value = 0.1\n\
                        bsdf.inputs['Clearcoat'].default_value = 0.5\n\
                        Specular = 3";
        let normalized = normalize_fragment(Some(fragment));
        assert!(normalized.contains("inputs['Transmission Weight']"));
        assert!(normalized.contains("inputs[\"Coat Roughness\"]"));
        assert!(normalized.contains("inputs['Coat Weight']"));
        assert!(normalized.ends_with("Specular = 3"));

        // independent of the target format
        for format in ["glb", "stl", "fbx"] {
            let program = ExportScriptBuilder.build(Some(fragment), &out(), format);
            assert!(program.contains("Transmission Weight"));
        }
    }

    #[test]
    fn user_error_is_contained_and_export_still_runs() {
        let program = ExportScriptBuilder.build(Some("raise ValueError('boom')"), &out(), "glb");
        let user = program.find("exec(compile(USER_SCRIPT").unwrap();
        let handler = program.find("USER_SCRIPT_ERROR").unwrap();
        let selection = program.find("SELECTED_OBJECTS").unwrap();
        let export = program.find("run_export(True)").unwrap();
        assert!(user < handler && handler < selection && selection < export);
        assert!(program.contains("except (Exception, SystemExit) as exc:"));
    }

    #[test]
    fn zero_selection_exits_before_export() {
        let program = ExportScriptBuilder.build(Some(""), &out(), "fbx");
        let zero = program.find("ZERO_OBJECTS_SELECTED").unwrap();
        let makedirs = program.find("os.makedirs").unwrap();
        let export = program.find("run_export(True)").unwrap();
        assert!(zero < makedirs && makedirs < export);
        assert!(program.contains("\"MESH\", \"CURVE\""));
        assert!(!program.contains("\"CAMERA\""));
        assert!(!program.contains("\"LIGHT\""));
    }

    #[test]
    fn export_has_selection_then_fallback_tier() {
        let program = ExportScriptBuilder.build(Some(""), &out(), "stl");
        assert!(program.contains("bpy.ops.wm.stl_export(filepath=OUTPUT_PATH"));
        let first = program.find("run_export(True)").unwrap();
        let select_all = program.find("select_all(action=\"SELECT\")").unwrap();
        let fallback = program.find("run_export(False)").unwrap();
        assert!(first < select_all && select_all < fallback);
        assert!(program.contains("EXPORT_SUCCESS: selection"));
        assert!(program.contains("EXPORT_SUCCESS: fallback"));
        assert!(program.contains("CRITICAL_EXPORT_ERROR"));
    }

    #[test]
    fn each_format_has_its_own_exporter() {
        let glb = ExportScriptBuilder.build(None, &out(), "glb");
        assert!(glb.contains("export_format=\"GLB\""));
        let usd = ExportScriptBuilder.build(None, &out(), "USD");
        assert!(usd.contains("bpy.ops.wm.usd_export"));
        assert!(usd.contains("FORMAT_ID = \"usd\""));
    }

    #[test]
    fn unknown_format_prints_marker_and_exits_nonzero() {
        let program = ExportScriptBuilder.build(Some("import bpy"), &out(), "x\"3d");
        assert!(program.contains("UNKNOWN_FORMAT"));
        assert!(program.contains(r#""x\"3d""#));
        assert!(program.contains("sys.exit(2)"));
        assert!(!program.contains("bpy"));
    }
}
