//! Age model: feature vectorization and a boosted tree ensemble evaluator.
//!
//! The ensemble is read from XGBoost's JSON tree dump wrapped in a small
//! envelope: `{"base_score": 0.5, "trees": [<tree>, ...]}`. A tree is the
//! nested node structure produced by `Booster.get_dump(dump_format="json")`.

use crate::error::ModelError;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::{BTreeMap, HashMap}, fs, path::Path, sync::Arc};
use tracing::{info, warn};

/// Named numeric features, the input to a [`Predictor`].
pub type Features = BTreeMap<String, f64>;

pub trait Predictor: Send + Sync {
    fn predict(&self, features: &Features) -> Result<f32, ModelError>;

    /// Short human readable description for status output.
    fn describe(&self) -> String;
}

/// Turns a JSON query object into features, one-hot encoding string values
/// as `name=value` the way a dict vectorizer does. Nulls are left out so the
/// trees route them down their missing branch.
pub fn vectorize(query: &Value) -> Result<Features, ModelError> {
    let obj = query.as_object().ok_or(ModelError::InvalidQuery)?;
    let mut out = Features::new();
    for (name, v) in obj {
        match v {
            Value::Null => {}
            Value::Bool(b) => { out.insert(name.clone(), if *b { 1.0 } else { 0.0 }); }
            Value::Number(n) => {
                let x = n.as_f64().ok_or_else(|| ModelError::InvalidFeature(name.clone()))?;
                out.insert(name.clone(), x);
            }
            Value::String(s) => { out.insert(format!("{}={}", name, s), 1.0); }
            Value::Array(_) | Value::Object(_) => return Err(ModelError::InvalidFeature(name.clone())),
        }
    }
    Ok(out)
}

// ----------------------
// Dump format
// ----------------------
#[derive(Deserialize)]
struct ModelFile {
    #[serde(default = "default_base_score")]
    base_score: f32,
    trees: Vec<DumpNode>,
}
fn default_base_score() -> f32 { 0.5 }

#[derive(Deserialize)]
#[serde(untagged)]
enum DumpNode {
    Leaf {
        nodeid: u32,
        leaf: f32,
    },
    Split {
        nodeid: u32,
        split: String,
        split_condition: f32,
        yes: u32,
        no: u32,
        missing: u32,
        #[serde(default)]
        children: Vec<DumpNode>,
    },
}

// ----------------------
// Flattened trees
// ----------------------
#[derive(Debug, Clone)]
enum Node {
    Leaf(f32),
    Split { feature: String, threshold: f32, yes: usize, no: usize, missing: usize },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn from_dump(root: DumpNode, idx: usize) -> Result<Self, ModelError> {
        let mut by_id: HashMap<u32, Node> = HashMap::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let (id, flat) = match node {
                DumpNode::Leaf { nodeid, leaf } => (nodeid, Node::Leaf(leaf)),
                DumpNode::Split { nodeid, split, split_condition, yes, no, missing, children } => {
                    let child_ids: Vec<u32> = children.iter().map(DumpNode::id).collect();
                    for target in [yes, no, missing] {
                        if !child_ids.contains(&target) {
                            return Err(ModelError::Malformed(format!(
                                "tree {}: node {} points at {} which is not one of its children",
                                idx, nodeid, target
                            )));
                        }
                    }
                    stack.extend(children);
                    let node = Node::Split {
                        feature: split,
                        threshold: split_condition,
                        yes: yes as usize,
                        no: no as usize,
                        missing: missing as usize,
                    };
                    (nodeid, node)
                }
            };
            if by_id.insert(id, flat).is_some() {
                return Err(ModelError::Malformed(format!("tree {}: duplicate node id {}", idx, id)));
            }
        }

        if !by_id.contains_key(&0) {
            return Err(ModelError::Malformed(format!("tree {}: root must have node id 0", idx)));
        }
        let len = by_id.keys().max().map(|m| *m as usize + 1).unwrap_or(0);
        let mut slots: Vec<Option<Node>> = vec![None; len];
        for (id, n) in by_id { slots[id as usize] = Some(n); }
        let nodes = slots
            .into_iter()
            .enumerate()
            .map(|(i, n)| n.ok_or_else(|| ModelError::Malformed(format!("tree {}: node ids skip {}", idx, i))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { nodes })
    }

    fn leaf_value(&self, features: &Features) -> f32 {
        let mut at = 0usize;
        loop {
            match &self.nodes[at] {
                Node::Leaf(v) => return *v,
                Node::Split { feature, threshold, yes, no, missing } => {
                    at = match features.get(feature) {
                        None => *missing,
                        Some(x) if x.is_nan() => *missing,
                        Some(x) if (*x as f32) < *threshold => *yes,
                        Some(_) => *no,
                    };
                }
            }
        }
    }
}

impl DumpNode {
    fn id(&self) -> u32 {
        match self {
            DumpNode::Leaf { nodeid, .. } | DumpNode::Split { nodeid, .. } => *nodeid,
        }
    }
}

/// Gradient-boosted regression trees summed on top of a base score.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    base_score: f32,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn from_json(s: &str) -> Result<Self, ModelError> {
        let file: ModelFile = serde_json::from_str(s).map_err(|e| ModelError::Malformed(e.to_string()))?;
        let trees = file
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_dump(t, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { base_score: file.base_score, trees })
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ModelError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn num_trees(&self) -> usize { self.trees.len() }
}

impl Predictor for TreeEnsemble {
    fn predict(&self, features: &Features) -> Result<f32, ModelError> {
        Ok(self.trees.iter().fold(self.base_score, |acc, t| acc + t.leaf_value(features)))
    }

    fn describe(&self) -> String {
        format!("tree ensemble ({} trees)", self.trees.len())
    }
}

/// Stand-in used when the model file could not be loaded; every prediction
/// reports the load failure.
#[derive(Debug, Clone)]
pub struct Unavailable {
    reason: ModelError,
}

impl Predictor for Unavailable {
    fn predict(&self, _features: &Features) -> Result<f32, ModelError> {
        Err(self.reason.clone())
    }

    fn describe(&self) -> String { format!("unavailable ({})", self.reason) }
}

/// Loads the ensemble at `path`, falling back to [`Unavailable`] so the
/// service still starts (and keeps rate limiting) without a model.
pub fn load_predictor(path: &Path) -> Arc<dyn Predictor> {
    match TreeEnsemble::load(path) {
        Ok(m) => {
            info!("loaded model from {} ({} trees)", path.display(), m.num_trees());
            Arc::new(m)
        }
        Err(e) => {
            warn!("model not loaded: {}", e);
            Arc::new(Unavailable { reason: e })
        }
    }
}
