//! Broadcast-tree arithmetic (§4.4): "every process forwards to children at
//! relative positions `2d+1` and `2d+2`, where `d = (S + rank - R) mod S`."

/// This rank's position in the tree rooted at `root`, with `size` total
/// processes.
pub fn position_of(rank: i32, root: i32, size: i32) -> i32 {
    (size + rank - root) % size
}

/// The absolute rank occupying tree position `pos` under `root`.
fn rank_at_position(root: i32, pos: i32, size: i32) -> i32 {
    (root + pos) % size
}

/// The up-to-two ranks this `rank` forwards a broadcast rooted at `root` to.
pub fn children(rank: i32, root: i32, size: i32) -> (Option<i32>, Option<i32>) {
    let d = position_of(rank, root, size);
    let left_pos = 2 * d + 1;
    let right_pos = 2 * d + 2;
    let left = (left_pos < size).then(|| rank_at_position(root, left_pos, size));
    let right = (right_pos < size).then(|| rank_at_position(root, right_pos, size));
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_position_zero() {
        assert_eq!(position_of(3, 3, 8), 0);
    }

    #[test]
    fn root_forwards_to_first_two_positions() {
        // root=0, size=8: root forwards to ranks 1 and 2.
        assert_eq!(children(0, 0, 8), (Some(1), Some(2)));
    }

    #[test]
    fn leaf_has_no_children() {
        // root=0, size=8: rank 7 is position 7, children at 15/16, both OOB.
        assert_eq!(children(7, 0, 8), (None, None));
    }

    #[test]
    fn tree_covers_every_rank_exactly_once() {
        for size in 1..=16 {
            for root in 0..size {
                let mut reached = vec![false; size as usize];
                reached[root as usize] = true;
                let mut frontier = vec![root];
                while let Some(r) = frontier.pop() {
                    let (l, rt) = children(r, root, size);
                    for c in [l, rt].into_iter().flatten() {
                        assert!(!reached[c as usize], "rank {c} reached twice for size={size} root={root}");
                        reached[c as usize] = true;
                        frontier.push(c);
                    }
                }
                assert!(reached.iter().all(|&b| b), "size={size} root={root} did not reach every rank");
            }
        }
    }

    #[test]
    fn non_root_positions_wrap_around() {
        // root=3, size=8: rank 3 is position 0; rank 2 is position 7.
        assert_eq!(position_of(2, 3, 8), 7);
    }
}
