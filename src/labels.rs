//! Class-label vocabulary.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Ordered class names, indexed by detector class id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Load a names file with one class per line (`coco.names` style). Blank lines are
    /// ignored.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        let set = Self::parse(&raw);
        if set.is_empty() {
            bail!("labels file {} contains no class names", path.display());
        }
        log::info!("loaded {} class labels from {}", set.len(), path.display());
        Ok(set)
    }

    pub fn parse(raw: &str) -> Self {
        let names = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for `class_id`, or `class_<id>` when the vocabulary has no entry.
    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}
