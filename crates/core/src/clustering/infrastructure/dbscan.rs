//! Density-based clustering (DBSCAN).
//!
//! A point is a core point when at least `min_samples` points, itself
//! included, lie within `eps` of it. Clusters grow from core points in input
//! order; a border point joins the first cluster that reaches it. Points
//! reached by no cluster are noise.
use std::collections::VecDeque;

use crate::clustering::domain::cluster_group::DistanceMetric;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DbscanParams {
    pub eps: f64,
    pub min_samples: usize,
    pub metric: DistanceMetric,
}

/// Returns one label per point: `Some(cluster)` or `None` for noise.
/// Cluster indices are dense, starting at 0.
pub fn dbscan(points: &[Vec<f32>], params: &DbscanParams) -> Vec<Option<usize>> {
    let n = points.len();
    let neighbors: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| params.metric.distance(&points[i], &points[j]) <= params.eps)
                .collect()
        })
        .collect();
    let is_core = |i: usize| neighbors[i].len() >= params.min_samples.max(1);

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut next_cluster = 0;

    for start in 0..n {
        if labels[start].is_some() || !is_core(start) {
            continue;
        }
        let cluster = next_cluster;
        next_cluster += 1;
        labels[start] = Some(cluster);

        let mut frontier: VecDeque<usize> = VecDeque::from([start]);
        while let Some(p) = frontier.pop_front() {
            if !is_core(p) {
                continue;
            }
            for &q in &neighbors[p] {
                if labels[q].is_none() {
                    labels[q] = Some(cluster);
                    frontier.push_back(q);
                }
            }
        }
    }
    labels
}
