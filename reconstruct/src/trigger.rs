//! Triggering logic: per-frame connected component labeling and the
//! 3-D signal flood.
//!
//! A time bin triggers when its 2-D mask of hot pixels contains an
//! 8-connected component of at least the configured size. Labeling is
//! a two-pass union-find sweep; the second stage floods outward from
//! the triggered cells through the candidate-signal mask, spatially
//! within a frame and temporally to adjacent frames, and everything
//! the flood never reaches is discarded.

use ndarray::{Array2, Array3, ArrayView2};
use std::collections::VecDeque;

/// Find the root label in the union-find parent table, with path
/// compression.
fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parents[current] {
        parents[current] = parents[parents[current]];
        current = parents[current];
    }
    current
}

/// Merge two labels; the smaller root wins.
fn union_labels(parents: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a != root_b {
        if root_a < root_b {
            parents[root_b] = root_a;
        } else {
            parents[root_a] = root_b;
        }
    }
}

/// Two-pass 8-connected component labeling of a boolean frame.
/// Background cells get label 0; components are labeled 1..
pub(crate) fn label_components(mask: &ArrayView2<bool>) -> Array2<usize> {
    let (nx, ny) = mask.dim();
    let mut labels = Array2::zeros((nx, ny));
    let mut parents = vec![0usize];
    let mut next_label = 0usize;

    for x in 0..nx {
        for y in 0..ny {
            if !mask[[x, y]] {
                continue;
            }
            // Already-visited neighbors under a row-major scan: the
            // three cells in the previous row plus the left cell.
            let mut neighbor_labels = [0usize; 4];
            let mut n_neighbors = 0;
            if x > 0 {
                for dy in -1i64..=1 {
                    let yy = y as i64 + dy;
                    if yy >= 0 && (yy as usize) < ny {
                        let label = labels[[x - 1, yy as usize]];
                        if label > 0 {
                            neighbor_labels[n_neighbors] = label;
                            n_neighbors += 1;
                        }
                    }
                }
            }
            if y > 0 && labels[[x, y - 1]] > 0 {
                neighbor_labels[n_neighbors] = labels[[x, y - 1]];
                n_neighbors += 1;
            }

            if n_neighbors == 0 {
                next_label += 1;
                parents.push(next_label);
                labels[[x, y]] = next_label;
            } else {
                let min_label = *neighbor_labels[..n_neighbors].iter().min().unwrap();
                labels[[x, y]] = min_label;
                for &neighbor in &neighbor_labels[..n_neighbors] {
                    if neighbor != min_label {
                        union_labels(&mut parents, min_label, neighbor);
                    }
                }
            }
        }
    }

    // Resolve equivalences.
    for i in 1..parents.len() {
        find_root(&mut parents, i);
    }
    for label in labels.iter_mut() {
        if *label > 0 {
            *label = parents[*label];
        }
    }
    labels
}

/// Size of the largest component in a labeled frame.
pub(crate) fn largest_component(labels: &Array2<usize>) -> usize {
    let max_label = labels.iter().copied().max().unwrap_or(0);
    let mut sizes = vec![0usize; max_label + 1];
    for &label in labels.iter() {
        if label > 0 {
            sizes[label] += 1;
        }
    }
    sizes.into_iter().max().unwrap_or(0)
}

/// Whether the frame holds an 8-connected cluster of at least
/// `min_cluster` hot pixels.
pub(crate) fn frame_triggered(mask: &ArrayView2<bool>, min_cluster: usize) -> bool {
    largest_component(&label_components(mask)) >= min_cluster
}

/// Push a cell onto the flood front if it is in bounds and has not
/// been visited; marks it visited.
fn visit_push(
    x: i64,
    y: i64,
    t: i64,
    front: &mut VecDeque<(usize, usize, usize)>,
    not_visited: &mut Array3<bool>,
) {
    let (nx, ny, nt) = not_visited.dim();
    if x < 0 || y < 0 || t < 0 {
        return;
    }
    let (x, y, t) = (x as usize, y as usize, t as usize);
    if x >= nx || y >= ny || t >= nt || !not_visited[[x, y, t]] {
        return;
    }
    not_visited[[x, y, t]] = false;
    front.push_back((x, y, t));
}

/// Push the eight spatial neighbors within the same time bin.
fn visit_space_adj(
    x: usize,
    y: usize,
    t: usize,
    front: &mut VecDeque<(usize, usize, usize)>,
    not_visited: &mut Array3<bool>,
) {
    for dx in -1i64..=1 {
        for dy in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            visit_push(x as i64 + dx, y as i64 + dy, t as i64, front, not_visited);
        }
    }
}

/// Push the same pixel in the adjacent time bins.
fn visit_time_adj(
    x: usize,
    y: usize,
    t: usize,
    front: &mut VecDeque<(usize, usize, usize)>,
    not_visited: &mut Array3<bool>,
) {
    visit_push(x as i64, y as i64, t as i64 - 1, front, not_visited);
    visit_push(x as i64, y as i64, t as i64 + 1, front, not_visited);
}

/// Breadth-first flood from the seed cells through `mask`. Returns the
/// set of reached cells; each cell is visited at most once.
pub(crate) fn flood_retain(seeds: &Array3<bool>, mask: &Array3<bool>) -> Array3<bool> {
    let mut not_visited = mask.clone();
    let mut visited = Array3::from_elem(mask.dim(), false);
    let mut front = VecDeque::new();

    for ((x, y, t), &seed) in seeds.indexed_iter() {
        if seed {
            visit_push(x as i64, y as i64, t as i64, &mut front, &mut not_visited);
        }
    }
    while let Some((x, y, t)) = front.pop_front() {
        visited[[x, y, t]] = true;
        visit_space_adj(x, y, t, &mut front, &mut not_visited);
        visit_time_adj(x, y, t, &mut front, &mut not_visited);
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn mask_from(pattern: &[&[i32]]) -> Array2<bool> {
        let nx = pattern.len();
        let ny = pattern[0].len();
        Array2::from_shape_fn((nx, ny), |(x, y)| pattern[x][y] != 0)
    }

    #[test]
    fn test_diagonal_cells_connect() {
        // 8-connectivity joins diagonals into one component.
        let mask = mask_from(&[
            &[1, 0, 0, 0],
            &[0, 1, 0, 0],
            &[0, 0, 1, 0],
            &[0, 0, 0, 0],
        ]);
        let labels = label_components(&mask.view());
        assert_eq!(largest_component(&labels), 3);
    }

    #[test]
    fn test_separate_components() {
        let mask = mask_from(&[
            &[1, 1, 0, 0, 0],
            &[1, 0, 0, 0, 1],
            &[0, 0, 0, 0, 1],
            &[0, 0, 0, 0, 0],
            &[1, 0, 0, 0, 0],
        ]);
        let labels = label_components(&mask.view());
        let mut roots: Vec<usize> = labels.iter().copied().filter(|&l| l > 0).collect();
        roots.sort_unstable();
        roots.dedup();
        assert_eq!(roots.len(), 3);
        assert_eq!(largest_component(&labels), 3);
    }

    #[test]
    fn test_u_shape_merges() {
        let mask = mask_from(&[
            &[1, 0, 1],
            &[1, 0, 1],
            &[1, 1, 1],
        ]);
        let labels = label_components(&mask.view());
        assert_eq!(largest_component(&labels), 7);
    }

    #[test]
    fn test_frame_trigger_threshold() {
        let mask = mask_from(&[
            &[1, 1, 0, 0],
            &[1, 1, 0, 0],
            &[0, 1, 0, 0],
            &[0, 0, 0, 0],
        ]);
        assert!(frame_triggered(&mask.view(), 5));
        assert!(!frame_triggered(&mask.view(), 6));
    }

    #[test]
    fn test_empty_frame_does_not_trigger() {
        let mask = Array2::from_elem((4, 4), false);
        assert!(!frame_triggered(&mask.view(), 1));
    }

    #[test]
    fn test_flood_respects_mask() {
        // A seed in one corner, a mask bridging to the middle, and an
        // isolated cell that must remain unreached.
        let mut mask = Array3::from_elem((4, 4, 2), false);
        mask[[0, 0, 0]] = true;
        mask[[1, 1, 0]] = true;
        mask[[1, 1, 1]] = true;
        mask[[3, 3, 1]] = true;

        let mut seeds = Array3::from_elem((4, 4, 2), false);
        seeds[[0, 0, 0]] = true;

        let visited = flood_retain(&seeds, &mask);
        assert!(visited[[0, 0, 0]]);
        assert!(visited[[1, 1, 0]], "diagonal neighbor in the same frame");
        assert!(visited[[1, 1, 1]], "same pixel in the next frame");
        assert!(!visited[[3, 3, 1]], "disconnected cell must not be reached");
    }

    #[test]
    fn test_flood_seed_outside_mask_ignored() {
        let mask = Array3::from_elem((3, 3, 1), false);
        let mut seeds = Array3::from_elem((3, 3, 1), false);
        seeds[[1, 1, 0]] = true;
        let visited = flood_retain(&seeds, &mask);
        assert!(visited.iter().all(|&v| !v));
    }

    #[test]
    fn test_spiral_labels_as_one_component() {
        // Spiral: one long component.
        let mask = mask_from(&[
            &[0, 0, 0, 0, 0, 0, 0],
            &[0, 1, 1, 1, 1, 1, 0],
            &[0, 1, 0, 0, 0, 1, 0],
            &[0, 1, 0, 1, 1, 1, 0],
            &[0, 1, 0, 1, 0, 0, 0],
            &[0, 1, 1, 1, 0, 0, 0],
            &[0, 0, 0, 0, 0, 0, 0],
        ]);
        let labels = label_components(&mask.view());
        let count = labels.iter().filter(|&&l| l > 0).count();
        assert_eq!(largest_component(&labels), count);
    }

    #[test]
    fn test_arr2_sanity() {
        let direct = arr2(&[[true, false], [false, true]]);
        assert_eq!(largest_component(&label_components(&direct.view())), 2);
    }
}
