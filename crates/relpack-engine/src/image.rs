//! Container image rewriting for deploy manifests
//!
//! For every deploy row that carries both a manifest and an image
//! reference, each container entry of the manifest gets its `image` set to
//! the reference with the old registry prefix swapped for the new one.
//!
//! A changed manifest is rendered again from its parsed form: comments are
//! dropped, and key order, quoting and indentation follow `serde_yaml`
//! output. Expect a diff well beyond the `image` lines. Unchanged manifests
//! are never rewritten.

use std::io::Write;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;

use crate::config::RegistryRewrite;
use crate::error::Result;
use crate::fsutil;
use crate::token::{MarkerMode, TokenScanner};

/// Fields holding lists of container specs
pub const CONTAINER_FIELDS: [&str; 3] = ["containers", "initContainers", "ephemeralContainers"];

pub struct ImageRewriter {
    registry: RegistryRewrite,
    scanner: TokenScanner,
}

impl ImageRewriter {
    pub fn new(registry: RegistryRewrite) -> Self {
        Self {
            registry,
            scanner: TokenScanner::new(MarkerMode::MarkersAndEscaped),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.registry.is_noop()
    }

    /// The image a reference is deployed as
    pub fn target_image(&self, reference: &str) -> String {
        let reference = reference.trim();
        if self.is_noop() {
            return reference.to_string();
        }
        reference.replacen(&self.registry.from, &self.registry.to, 1)
    }

    /// Rewrite every container image in a multi-document YAML text
    ///
    /// Returns the new text and the number of images changed, or `None`
    /// when nothing changed. Tokens left in the text survive the round trip
    /// unchanged; comments and formatting do not.
    pub fn rewrite_text(&self, text: &str, reference: &str) -> Result<Option<(String, usize)>> {
        if self.is_noop() {
            return Ok(None);
        }
        let image = self.target_image(reference);
        let masked = self.scanner.mask(text);

        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(&masked.text) {
            documents.push(Value::deserialize(document)?);
        }

        let changed: usize = documents
            .iter_mut()
            .map(|doc| set_container_images(doc, &image))
            .sum();
        if changed == 0 {
            return Ok(None);
        }

        let rendered = documents
            .iter()
            .filter(|doc| !doc.is_null())
            .map(serde_yaml::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some((masked.unmask(&rendered.join("---\n")), changed)))
    }

    /// Rewrite a manifest file in place; the file is only written on change
    ///
    /// See the module docs: a rewritten file loses its comments.
    pub fn rewrite_file(&self, path: &Path, reference: &str) -> Result<usize> {
        if self.is_noop() {
            return Ok(0);
        }
        let text = std::fs::read_to_string(path)?;
        match self.rewrite_text(&text, reference)? {
            Some((rendered, changed)) => {
                fsutil::replace_file(path, |file, _| {
                    file.write_all(rendered.as_bytes())?;
                    Ok(())
                })?;
                tracing::debug!(path = %path.display(), changed, "rewrote container images");
                Ok(changed)
            }
            None => Ok(0),
        }
    }
}

/// Set `image` on every container entry below `value`
fn set_container_images(value: &mut Value, image: &str) -> usize {
    match value {
        Value::Mapping(map) => {
            let mut changed = 0;
            for (key, child) in map.iter_mut() {
                let is_container_list = key
                    .as_str()
                    .is_some_and(|k| CONTAINER_FIELDS.contains(&k));
                if is_container_list {
                    if let Value::Sequence(entries) = child {
                        for entry in entries.iter_mut() {
                            changed += set_image(entry, image);
                        }
                    }
                } else {
                    changed += set_container_images(child, image);
                }
            }
            changed
        }
        Value::Sequence(items) => items
            .iter_mut()
            .map(|item| set_container_images(item, image))
            .sum(),
        Value::Tagged(tagged) => set_container_images(&mut tagged.value, image),
        _ => 0,
    }
}

fn set_image(entry: &mut Value, image: &str) -> usize {
    let Some(slot) = entry.as_mapping_mut().and_then(|c| c.get_mut("image")) else {
        return 0;
    };
    if slot.as_str() == Some(image) {
        return 0;
    }
    *slot = Value::String(image.to_string());
    1
}
