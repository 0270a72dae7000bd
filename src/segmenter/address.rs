//! Structural addresses (`/html/body/div[2]/p`) used to find a segment again
//! after the document has been reloaded or rewritten.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    core::errors::AppError,
    document::tree::{DocumentTree, NodeId},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathStep {
    pub tag: String,
    /// 1-based position among preceding same-tag element siblings.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StructuralPath {
    steps: Vec<PathStep>,
}

impl StructuralPath {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when `self` addresses `other` or one of its ancestors.
    pub fn is_prefix_of(&self, other: &StructuralPath) -> bool {
        other.steps.starts_with(&self.steps)
    }
}

impl fmt::Display for StructuralPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            if step.index > 1 {
                write!(f, "/{}[{}]", step.tag, step.index)?;
            } else {
                write!(f, "/{}", step.tag)?;
            }
        }
        Ok(())
    }
}

impl FromStr for StructuralPath {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let body = trimmed
            .strip_prefix('/')
            .ok_or_else(|| AppError::InvalidInput(format!("structural path must start with '/': {raw}")))?;

        let mut steps = Vec::new();
        for part in body.split('/') {
            let (tag, index) = match part.split_once('[') {
                Some((tag, rest)) => {
                    let digits = rest.strip_suffix(']').ok_or_else(|| {
                        AppError::InvalidInput(format!("unterminated index in path step {part}"))
                    })?;
                    let index = digits.parse::<usize>().map_err(|err| {
                        AppError::InvalidInput(format!("bad index in path step {part}: {err}"))
                    })?;
                    (tag, index)
                }
                None => (part, 1),
            };
            if tag.is_empty() || index == 0 {
                return Err(AppError::InvalidInput(format!("malformed path step {part:?} in {raw}")));
            }
            steps.push(PathStep {
                tag: tag.to_ascii_lowercase(),
                index,
            });
        }
        Ok(Self { steps })
    }
}

impl Serialize for StructuralPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StructuralPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Path from the document root to `node`; only element ancestors contribute steps.
pub fn address_of(tree: &DocumentTree, node: NodeId) -> StructuralPath {
    let mut steps = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        let Some(tag) = tree.tag(id) else {
            break;
        };
        let index = match tree.parent(id) {
            Some(parent) => {
                1 + tree
                    .element_children(parent)
                    .take_while(|sibling| *sibling != id)
                    .filter(|sibling| tree.tag(*sibling) == Some(tag))
                    .count()
            }
            None => 1,
        };
        steps.push(PathStep {
            tag: tag.to_string(),
            index,
        });
        current = tree.parent(id);
    }
    steps.reverse();
    StructuralPath { steps }
}

/// First node matching `path`, or `None` when the document no longer has it.
pub fn resolve(path: &StructuralPath, tree: &DocumentTree) -> Option<NodeId> {
    if path.is_empty() {
        return None;
    }
    let mut current = tree.root();
    for step in path.steps() {
        current = tree
            .element_children(current)
            .filter(|child| {
                tree.tag(*child)
                    .is_some_and(|tag| tag.eq_ignore_ascii_case(&step.tag))
            })
            .nth(step.index.checked_sub(1)?)?;
    }
    Some(current)
}
