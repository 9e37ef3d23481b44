use serde::{Deserialize, Serialize};

use crate::recognition::infrastructure::math;

/// Distance used to compare encodings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            DistanceMetric::Euclidean => math::euclidean_distance(a, b),
            DistanceMetric::Cosine => math::cosine_distance(a, b),
        }
    }
}

/// One unlabeled identity: encodings judged to belong to the same person.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub id: u32,
    pub name: String,
    pub members: Vec<Vec<f32>>,
    /// Mean of the members.
    #[serde(default)]
    pub representative: Option<Vec<f32>>,
    /// True for a noise point that joined no dense cluster.
    #[serde(default)]
    pub singleton: bool,
}

impl ClusterGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Smallest distance from `encoding` to any member.
    pub fn nearest_distance(&self, encoding: &[f32], metric: DistanceMetric) -> Option<f64> {
        self.members
            .iter()
            .map(|m| metric.distance(encoding, m))
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Turns per-point cluster labels into groups.
///
/// `labels[i]` is the dense-cluster index of `encodings[i]`, or `None` for
/// noise. Dense clusters come first, ordered by label, then one singleton
/// group per noise point in input order. Ids are positions in the result.
pub fn build_groups(labels: &[Option<usize>], encodings: &[Vec<f32>]) -> Vec<ClusterGroup> {
    let dense_count = labels.iter().flatten().map(|l| l + 1).max().unwrap_or(0);
    let mut dense: Vec<Vec<Vec<f32>>> = vec![Vec::new(); dense_count];
    let mut noise: Vec<Vec<f32>> = Vec::new();

    for (label, encoding) in labels.iter().zip(encodings) {
        match label {
            Some(l) => dense[*l].push(encoding.clone()),
            None => noise.push(encoding.clone()),
        }
    }

    let mut groups = Vec::with_capacity(dense_count + noise.len());
    for members in dense.into_iter().filter(|m| !m.is_empty()) {
        let id = groups.len() as u32;
        groups.push(group(id, format!("Group_{id}"), members, false));
    }
    for member in noise {
        let id = groups.len() as u32;
        groups.push(group(id, format!("Group_Single_{id}"), vec![member], true));
    }
    groups
}

fn group(id: u32, name: String, members: Vec<Vec<f32>>, singleton: bool) -> ClusterGroup {
    let representative = math::centroid(members.iter().map(Vec::as_slice));
    ClusterGroup {
        id,
        name,
        members,
        representative: Some(representative),
        singleton,
    }
}
