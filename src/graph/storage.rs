/// Project file persistence
///
/// Reads and writes the JSON project layout and decodes the base64 image
/// blobs embedded in node data into `NodeAssets`. The raw data map is never
/// rewritten, so saving a loaded project reproduces the blobs as stored and
/// decoded images never reach the file.

use crate::graph::types::{Graph, NodeAssets};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-backed project storage
#[derive(Debug, Clone)]
pub struct ProjectStorage {
    path: PathBuf,
}

impl ProjectStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the project file and decode its image assets
    pub async fn load(&self) -> Result<Graph> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read project file {}", self.path.display()))?;
        let graph = parse_project(&text).with_context(|| format!("Invalid project file {}", self.path.display()))?;
        tracing::info!(
            "📂 Loaded project {} ({} nodes, {} links)",
            self.path.display(),
            graph.nodes.len(),
            graph.links.len()
        );
        Ok(graph)
    }

    /// Write the project file, creating parent directories as needed
    pub async fn save(&self, graph: &Graph) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let text = to_project_json(graph)?;
        tokio::fs::write(&self.path, text)
            .await
            .with_context(|| format!("Failed to write project file {}", self.path.display()))?;
        tracing::info!("💾 Saved project {}", self.path.display());
        Ok(())
    }
}

/// Parse project JSON and decode every node's image assets
pub fn parse_project(text: &str) -> Result<Graph> {
    let mut graph: Graph = serde_json::from_str(text)?;
    decode_assets(&mut graph);
    Ok(graph)
}

/// Serialize a graph in the persisted layout
pub fn to_project_json(graph: &Graph) -> Result<String> {
    Ok(serde_json::to_string_pretty(graph)?)
}

/// Decode the embedded images of every node
///
/// Blobs that fail to decode are logged and left as `None`; the node then
/// behaves as if no image had been captured.
pub fn decode_assets(graph: &mut Graph) {
    for node in graph.nodes.values_mut() {
        node.assets = NodeAssets {
            image: blob(&node.data, "b64", &node.id),
            anchors: blob_list(&node.data, "anchors", &node.id),
            images: blob_list(&node.data, "images", &node.id),
        };
    }
}

fn blob(data: &Map<String, Value>, key: &str, node_id: &str) -> Option<Arc<DynamicImage>> {
    let text = data.get(key)?.as_str()?;
    match decode_image(text) {
        Ok(image) => Some(Arc::new(image)),
        Err(e) => {
            tracing::warn!("⚠️ Node {} has an unreadable `{}` image: {:#}", node_id, key, e);
            None
        }
    }
}

fn blob_list(data: &Map<String, Value>, key: &str, node_id: &str) -> Vec<Option<Arc<DynamicImage>>> {
    match data.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_object().and_then(|entry| blob(entry, "b64", node_id)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode a base64 PNG/JPEG blob, tolerating a data-URL prefix and missing padding
pub fn decode_image(text: &str) -> Result<DynamicImage> {
    let payload = text.split_once("base64,").map(|(_, rest)| rest).unwrap_or(text).trim();
    let mut padded = payload.to_string();
    let missing = padded.len() % 4;
    if missing != 0 {
        padded.extend(std::iter::repeat('=').take(4 - missing));
    }
    let bytes = STANDARD.decode(padded.as_bytes()).context("Invalid base64 image data")?;
    let image = image::load_from_memory(&bytes).context("Unsupported image encoding")?;
    Ok(image)
}

/// Encode an image as base64 PNG, the form the editor embeds
pub fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)?;
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{Node, NodeType};
    use image::{Rgb, RgbImage};
    use serde_json::json;

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 7])))
    }

    #[test]
    fn padding_is_repaired() {
        let encoded = encode_png(&sample_image()).unwrap();
        let stripped = encoded.trim_end_matches('=');
        let decoded = decode_image(stripped).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));

        let with_prefix = format!("data:image/png;base64,{}", encoded);
        assert!(decode_image(&with_prefix).is_ok());
    }

    #[test]
    fn garbage_blobs_become_missing_assets() {
        let mut graph = Graph::new();
        graph.add_node(Node::new("a", NodeType::Image).with("b64", "not an image"));
        decode_assets(&mut graph);
        assert!(graph.nodes["a"].assets.image.is_none());
    }

    #[tokio::test]
    async fn save_then_load_keeps_blobs_and_decodes_assets() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProjectStorage::new(dir.path().join("nested").join("project.json"));
        let encoded = encode_png(&sample_image()).unwrap();

        let mut graph = Graph::new();
        graph.add_node(
            Node::new("img", NodeType::IfImg).with("images", json!([{"id": "i1", "b64": encoded}, {"id": "i2"}])),
        );
        graph.add_node(Node::new("st", NodeType::IfStatic).with("b64_preview", encoded.clone()));
        graph.add_node(Node::new("s", NodeType::Start));
        graph.connect("s", "out", "img");
        storage.save(&graph).await.unwrap();

        let loaded = storage.load().await.unwrap();
        let assets = &loaded.nodes["img"].assets;
        assert_eq!(assets.images.len(), 2);
        assert!(assets.images[0].is_some());
        assert!(assets.images[1].is_none());
        assert_eq!(loaded.nodes["img"].data["images"][0]["b64"], json!(encoded));
        assert_eq!(loaded.links.len(), 1);
        assert_eq!(loaded.nodes["st"].data["b64_preview"], json!(encoded));
        assert!(loaded.nodes["st"].assets.image.is_none());

        let text = tokio::fs::read_to_string(storage.path()).await.unwrap();
        assert!(!text.contains("assets"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProjectStorage::new(dir.path().join("absent.json"));
        assert!(storage.load().await.is_err());
    }
}
