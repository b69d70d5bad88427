use super::Lab;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cluster {
    pub centroid: Lab,
    pub size: usize,
}

fn nearest(point: &Lab, centroids: &[Lab]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = point.distance_sq(c);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// Seeds are spread evenly over the sorted set of distinct (rounded)
/// points, so the result only depends on the input.
fn seeds(points: &[Lab], k: usize) -> Vec<Lab> {
    let unique = points
        .iter()
        .map(|p| (p.l.round() as i32, p.a.round() as i32, p.b.round() as i32))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|(l, a, b)| Lab::new(l as f32, a as f32, b as f32))
        .collect::<Vec<_>>();
    let k = k.min(unique.len());
    match k {
        0 => Vec::new(),
        1 => vec![unique[unique.len() / 2]],
        _ => (0..k).map(|i| unique[i * (unique.len() - 1) / (k - 1)]).collect(),
    }
}

/// Lloyd's k-means; clusters come back largest first.
pub fn kmeans(points: &[Lab], k: usize, max_iterations: usize) -> Vec<Cluster> {
    let mut centroids = seeds(points, k);
    if centroids.is_empty() {
        return Vec::new();
    }
    let mut assignment = vec![usize::MAX; points.len()];
    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let n = nearest(p, &centroids);
            if assignment[i] != n {
                assignment[i] = n;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = vec![(0.0f32, 0.0f32, 0.0f32, 0usize); centroids.len()];
        for (p, a) in points.iter().zip(&assignment) {
            let s = &mut sums[*a];
            s.0 += p.l;
            s.1 += p.a;
            s.2 += p.b;
            s.3 += 1;
        }
        for (c, (l, a, b, n)) in centroids.iter_mut().zip(sums) {
            if n > 0 {
                *c = Lab::new(l / n as f32, a / n as f32, b / n as f32);
            }
        }
    }
    let mut sizes = vec![0usize; centroids.len()];
    for a in &assignment {
        sizes[*a] += 1;
    }
    let mut clusters = centroids
        .into_iter()
        .zip(sizes)
        .filter(|(_, size)| *size > 0)
        .map(|(centroid, size)| Cluster { centroid, size })
        .collect::<Vec<_>>();
    clusters.sort_by(|a, b| b.size.cmp(&a.size).then(a.centroid.l.total_cmp(&b.centroid.l)));
    clusters
}
