//! Reference parsers for composite 3D formats
//!
//! Each parser is a pure function from file content to the ordered list of
//! names the file structurally depends on. No path resolution happens here.

use crate::bundle::FileRole;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

/// A name referenced from inside a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    /// Role of the target when the referencing file is a bundle source
    pub role: FileRole,
}

impl Reference {
    fn new(name: impl Into<String>, role: FileRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Formats with a registered parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFormat {
    Obj,
    Mtl,
    Gltf,
}

impl ReferenceFormat {
    /// Parser for a normalized extension, if one is registered
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".obj" => Some(ReferenceFormat::Obj),
            ".mtl" => Some(ReferenceFormat::Mtl),
            ".gltf" => Some(ReferenceFormat::Gltf),
            _ => None,
        }
    }
}

/// Why a file's references could not be extracted
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("file is not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed glTF JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extract references from raw file content
pub fn parse_references(format: ReferenceFormat, content: &[u8]) -> Result<Vec<Reference>, ParseError> {
    match format {
        ReferenceFormat::Obj => Ok(parse_obj(&String::from_utf8_lossy(content))),
        ReferenceFormat::Mtl => Ok(parse_mtl(&String::from_utf8_lossy(content))),
        ReferenceFormat::Gltf => parse_gltf(std::str::from_utf8(content)?),
    }
}

/// Split a line into directive and arguments, dropping `#` comments
fn directive(line: &str) -> Option<(&str, &str)> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => Some((keyword, rest.trim())),
        None => Some((line, "")),
    }
}

fn push_unique(refs: &mut Vec<Reference>, seen: &mut HashSet<String>, name: &str, role: FileRole) {
    if !name.is_empty() && seen.insert(name.to_string()) {
        refs.push(Reference::new(name, role));
    }
}

/// Material libraries named by `mtllib` lines
pub fn parse_obj(content: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut seen = HashSet::new();

    for line in content.lines() {
        if let Some(("mtllib", args)) = directive(line) {
            for name in args.split_whitespace() {
                push_unique(&mut refs, &mut seen, name, FileRole::PrimaryDependency);
            }
        }
    }

    refs
}

/// Texture-map statements in an MTL file
const MTL_MAP_DIRECTIVES: &[&str] = &[
    "map_ka", "map_kd", "map_ks", "map_ke", "map_ns", "map_d", "map_bump", "bump", "disp",
    "decal", "refl", "norm", "map_pr", "map_pm", "map_ps", "map_pc", "map_pcr", "map_aniso",
    "map_anisor",
];

/// Number of arguments taken by a texture option; `None` for 1 to 3 numbers
fn option_arity(option: &str) -> Option<usize> {
    match option {
        "-blendu" | "-blendv" | "-bm" | "-boost" | "-cc" | "-clamp" | "-imfchan" | "-texres"
        | "-type" => Some(1),
        "-mm" => Some(2),
        _ => None,
    }
}

/// File name of a texture statement once its options are skipped
fn texture_name(args: &str) -> Option<String> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let mut idx = 0;

    while idx < tokens.len() && tokens[idx].starts_with('-') && tokens[idx].len() > 1 {
        let option = tokens[idx];
        idx += 1;
        match option_arity(option) {
            Some(n) => idx += n,
            None => {
                // -o, -s, -t and unknown options take up to three numbers
                let mut taken = 0;
                while taken < 3 && idx < tokens.len() && tokens[idx].parse::<f64>().is_ok() {
                    idx += 1;
                    taken += 1;
                }
            }
        }
    }

    if idx >= tokens.len() {
        return None;
    }
    Some(tokens[idx..].join(" "))
}

/// Image files named by texture-map directives, first-seen order, no duplicates
pub fn parse_mtl(content: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut seen = HashSet::new();

    for line in content.lines() {
        let Some((keyword, args)) = directive(line) else {
            continue;
        };
        if !MTL_MAP_DIRECTIVES.contains(&keyword.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let Some(name) = texture_name(args) {
            push_unique(&mut refs, &mut seen, &name, FileRole::SecondaryDependency);
        }
    }

    refs
}

#[derive(Debug, Deserialize)]
struct GltfDocument {
    #[serde(default)]
    buffers: Vec<GltfUriEntry>,
    #[serde(default)]
    images: Vec<GltfUriEntry>,
}

#[derive(Debug, Deserialize)]
struct GltfUriEntry {
    uri: Option<String>,
}

/// Buffers (geometry) and images (textures) named by a glTF document
pub fn parse_gltf(content: &str) -> Result<Vec<Reference>, ParseError> {
    let document: GltfDocument = serde_json::from_str(content)?;

    let mut refs = Vec::new();
    let mut seen = HashSet::new();

    let external = |entry: &GltfUriEntry| -> Option<String> {
        entry
            .uri
            .as_ref()
            .filter(|uri| !uri.starts_with("data:"))
            .cloned()
    };

    for uri in document.buffers.iter().filter_map(external) {
        push_unique(&mut refs, &mut seen, &uri, FileRole::PrimaryDependency);
    }
    for uri in document.images.iter().filter_map(external) {
        push_unique(&mut refs, &mut seen, &uri, FileRole::SecondaryDependency);
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(refs: &[Reference]) -> Vec<&str> {
        refs.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_obj_mtllib() {
        let obj = "# exported\nmtllib roman_statue.mtl\nv 0 0 0\nmtllib a.mtl b.mtl # two\nusemtl marble\n";
        let refs = parse_obj(obj);
        assert_eq!(names(&refs), vec!["roman_statue.mtl", "a.mtl", "b.mtl"]);
        assert!(refs.iter().all(|r| r.role == FileRole::PrimaryDependency));
    }

    #[test]
    fn test_obj_without_materials() {
        assert!(parse_obj("v 1 2 3\nf 1 2 3\n").is_empty());
    }

    #[test]
    fn test_mtl_maps_dedup() {
        let mtl = "newmtl marble\nKd 1 1 1\nmap_Kd marble_diffuse.jpg\nmap_Bump marble_normal.jpg\n\
                   map_Ns marble_roughness.jpg\nbump detail_bump.jpg\n\nnewmtl other\nmap_Kd marble_diffuse.jpg\n";
        let refs = parse_mtl(mtl);
        assert_eq!(
            names(&refs),
            vec![
                "marble_diffuse.jpg",
                "marble_normal.jpg",
                "marble_roughness.jpg",
                "detail_bump.jpg"
            ]
        );
        assert!(refs.iter().all(|r| r.role == FileRole::SecondaryDependency));
    }

    #[test]
    fn test_mtl_options_skipped() {
        let mtl = "map_Kd -s 1 1 1 -o 0.5 0.5 -clamp on textures/stone.png\nmap_bump -bm 0.3 stone normal.png\nmap_d -mm 0 1 alpha.png\n";
        assert_eq!(
            names(&parse_mtl(mtl)),
            vec!["textures/stone.png", "stone normal.png", "alpha.png"]
        );
    }

    #[test]
    fn test_mtl_directive_without_file() {
        assert!(parse_mtl("map_Kd -s 1 1 1\nmap_Kd\n").is_empty());
    }

    #[test]
    fn test_gltf_buffers_and_images() {
        let gltf = r#"{
            "asset": {"version": "2.0"},
            "buffers": [{"uri": "ancient_sword.bin", "byteLength": 1024}],
            "images": [{"uri": "blade_texture.jpeg"}, {"bufferView": 3, "mimeType": "image/png"}]
        }"#;
        let refs = parse_gltf(gltf).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], Reference::new("ancient_sword.bin", FileRole::PrimaryDependency));
        assert_eq!(refs[1], Reference::new("blade_texture.jpeg", FileRole::SecondaryDependency));
    }

    #[test]
    fn test_gltf_data_uri_skipped() {
        let gltf = r#"{"buffers": [{"uri": "data:application/octet-stream;base64,AAAA"}]}"#;
        assert!(parse_gltf(gltf).unwrap().is_empty());
    }

    #[test]
    fn test_gltf_malformed() {
        let err = parse_references(ReferenceFormat::Gltf, b"{ \"buffers\": [").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn test_format_registry() {
        assert_eq!(ReferenceFormat::from_extension(".obj"), Some(ReferenceFormat::Obj));
        assert_eq!(ReferenceFormat::from_extension(".gltf"), Some(ReferenceFormat::Gltf));
        assert_eq!(ReferenceFormat::from_extension(".jpg"), None);
    }
}
