//! `set_box`/`commit` factorization and neighbor lookup, ported directly
//! from `Partitioning::factor`/`ijk2rank`/`rank2ijk`/`neighbor` in
//! `src/framework/Partitioning.cpp` (the "framework" variant named as
//! canonical by spec §9's Open Question over the volume-code variant).

use thiserror::Error;

use crate::geometry::{Face, Subbox, Vec3, Vec3i, FACES};

/// Sentinel rank meaning "no neighbor on this face" (an exterior face of the
/// global domain).
pub const NO_NEIGHBOR: i32 = -1;

#[derive(Debug, Error)]
pub enum PartitioningError {
    #[error("world size must be >= 1, got {0}")]
    InvalidWorldSize(i32),
    #[error("rank {rank} out of range for world size {size}")]
    RankOutOfRange { rank: i32, size: i32 },
}

/// Factor `n` into `i * j * k == n` minimizing `i + j + k`, ties broken by
/// iteration order (smallest `i`, then smallest `j`, wins — the original's
/// `mm = ijk + 3` sentinel plus strict `<` comparison).
pub fn factor(n: i32) -> Vec3i {
    if n == 1 {
        return Vec3i::new(1, 1, 1);
    }

    let mut best = Vec3i::new(1, 1, n);
    let mut best_sum = n + 3;

    let mut i = 1;
    while i <= n >> 1 {
        if n % i == 0 {
            let jk = n / i;
            let mut j = 1;
            while j <= jk >> 1 {
                if jk % j == 0 {
                    let k = jk / j;
                    let sum = i + j + k;
                    if sum < best_sum {
                        best_sum = sum;
                        best = Vec3i::new(i, j, k);
                    }
                }
                j += 1;
            }
        }
        i += 1;
    }

    best
}

/// A process's view of the global decomposition: its own subbox and its six
/// face neighbors.
pub struct Partitioning {
    world_size: i32,
    rank: i32,
    global_box: Subbox,
    gpart: Vec3i,
    psize: Vec3,
    boxes: Vec<Subbox>,
    neighbors: [i32; 6],
}

impl Partitioning {
    /// `set_box` then `commit`: compute the factorization and assign every
    /// rank's subbox by a fixed row-major i->j->k scan (§4.7).
    pub fn new(world_size: i32, rank: i32, global_box: Subbox) -> Result<Self, PartitioningError> {
        if world_size < 1 {
            return Err(PartitioningError::InvalidWorldSize(world_size));
        }
        if rank < 0 || rank >= world_size {
            return Err(PartitioningError::RankOutOfRange {
                rank,
                size: world_size,
            });
        }

        let gpart = factor(world_size);
        let gsize = global_box.hi - global_box.lo;
        let psize = Vec3::new(
            gsize.x / gpart.x as f32,
            gsize.y / gpart.y as f32,
            gsize.z / gpart.z as f32,
        );

        let mut boxes = Vec::with_capacity(world_size as usize);
        let mut oz = global_box.lo.z;
        for _k in 0..gpart.z {
            let mut oy = global_box.lo.y;
            for _j in 0..gpart.y {
                let mut ox = global_box.lo.x;
                for _i in 0..gpart.x {
                    boxes.push(Subbox::new(
                        Vec3::new(ox, oy, oz),
                        Vec3::new(ox + psize.x, oy + psize.y, oz + psize.z),
                    ));
                    ox += psize.x;
                }
                oy += psize.y;
            }
            oz += psize.z;
        }

        let mut part = Partitioning {
            world_size,
            rank,
            global_box,
            gpart,
            psize,
            boxes,
            neighbors: [NO_NEIGHBOR; 6],
        };
        part.compute_neighbors();
        Ok(part)
    }

    fn ijk2rank(&self, i: i32, j: i32, k: i32) -> i32 {
        i + (j * self.gpart.x) + (k * self.gpart.x * self.gpart.y)
    }

    fn rank2ijk(&self, r: i32) -> Vec3i {
        let i = r % self.gpart.x;
        let j = (r / self.gpart.x) % self.gpart.y;
        let k = r / (self.gpart.x * self.gpart.y);
        Vec3i::new(i, j, k)
    }

    fn compute_neighbors(&mut self) {
        let ijk = self.rank2ijk(self.rank);
        self.neighbors[Face::NegX as usize] = if ijk.x > 0 {
            self.ijk2rank(ijk.x - 1, ijk.y, ijk.z)
        } else {
            NO_NEIGHBOR
        };
        self.neighbors[Face::PosX as usize] = if ijk.x < self.gpart.x - 1 {
            self.ijk2rank(ijk.x + 1, ijk.y, ijk.z)
        } else {
            NO_NEIGHBOR
        };
        self.neighbors[Face::NegY as usize] = if ijk.y > 0 {
            self.ijk2rank(ijk.x, ijk.y - 1, ijk.z)
        } else {
            NO_NEIGHBOR
        };
        self.neighbors[Face::PosY as usize] = if ijk.y < self.gpart.y - 1 {
            self.ijk2rank(ijk.x, ijk.y + 1, ijk.z)
        } else {
            NO_NEIGHBOR
        };
        self.neighbors[Face::NegZ as usize] = if ijk.z > 0 {
            self.ijk2rank(ijk.x, ijk.y, ijk.z - 1)
        } else {
            NO_NEIGHBOR
        };
        self.neighbors[Face::PosZ as usize] = if ijk.z < self.gpart.z - 1 {
            self.ijk2rank(ijk.x, ijk.y, ijk.z + 1)
        } else {
            NO_NEIGHBOR
        };
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn world_size(&self) -> i32 {
        self.world_size
    }

    pub fn ijk(&self) -> Vec3i {
        self.rank2ijk(self.rank)
    }

    pub fn gpart(&self) -> Vec3i {
        self.gpart
    }

    pub fn local_box(&self) -> Subbox {
        self.boxes[self.rank as usize]
    }

    pub fn box_for_rank(&self, rank: i32) -> Subbox {
        self.boxes[rank as usize]
    }

    pub fn neighbor_on_face(&self, face: Face) -> i32 {
        self.neighbors[face as usize]
    }

    pub fn neighbors(&self) -> [i32; 6] {
        self.neighbors
    }

    /// Map a point in world coordinates to the owning rank, or
    /// [`NO_NEIGHBOR`] if it's outside the global domain.
    pub fn point_owner(&self, p: Vec3) -> i32 {
        let local = Vec3::new(
            (p.x - self.global_box.lo.x) / self.psize.x,
            (p.y - self.global_box.lo.y) / self.psize.y,
            (p.z - self.global_box.lo.z) / self.psize.z,
        );
        if local.x < 0.0
            || local.y < 0.0
            || local.z < 0.0
            || local.x >= self.gpart.x as f32
            || local.y >= self.gpart.y as f32
            || local.z >= self.gpart.z as f32
        {
            return NO_NEIGHBOR;
        }
        self.ijk2rank(local.x as i32, local.y as i32, local.z as i32)
    }

    /// The rank on the other side of the exit face that ray `(p, dir)`
    /// leaves this process's subbox through, or [`NO_NEIGHBOR`] at an
    /// exterior face.
    pub fn neighbor(&self, p: Vec3, dir: Vec3) -> i32 {
        let face = self.local_box().exit_face(p, dir);
        self.neighbor_on_face(face)
    }

    /// Every face index, for callers that need to enumerate (e.g. the
    /// renderer reporting which faces have no neighbor).
    pub fn faces() -> [Face; 6] {
        FACES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorization_matches_spec_s6() {
        // S=12 -> (2,2,3), sum 7, not (1,1,12) sum 14.
        let f = factor(12);
        assert_eq!(f, Vec3i::new(2, 2, 3));
    }

    #[test]
    fn factorization_optimal_for_one_to_sixty_four() {
        for s in 1..=64 {
            let f = factor(s);
            assert_eq!(f.x * f.y * f.z, s, "factors must multiply back to s={s}");
            // Brute-force the true minimum sum for comparison.
            let mut best = s + 3;
            for i in 1..=s {
                if s % i != 0 {
                    continue;
                }
                let jk = s / i;
                for j in 1..=jk {
                    if jk % j != 0 {
                        continue;
                    }
                    let k = jk / j;
                    best = best.min(i + j + k);
                }
            }
            assert_eq!(f.x + f.y + f.z, best, "s={s} should minimize i+j+k");
        }
    }

    #[test]
    fn single_process_owns_whole_box() {
        let gbox = Subbox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0));
        let part = Partitioning::new(1, 0, gbox).unwrap();
        assert_eq!(part.neighbors(), [NO_NEIGHBOR; 6]);
        assert_eq!(part.point_owner(Vec3::new(5.0, 5.0, 5.0)), 0);
    }

    #[test]
    fn two_process_split_has_mutual_neighbors() {
        // factor(2) == (1,1,2): two processes split along z.
        let gbox = Subbox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 2.0));
        let p0 = Partitioning::new(2, 0, gbox).unwrap();
        let p1 = Partitioning::new(2, 1, gbox).unwrap();
        assert_eq!(p0.gpart(), Vec3i::new(1, 1, 2));
        assert_eq!(p0.neighbor_on_face(Face::PosZ), 1);
        assert_eq!(p1.neighbor_on_face(Face::NegZ), 0);
        assert_eq!(p0.neighbor_on_face(Face::NegZ), NO_NEIGHBOR);
        assert_eq!(p1.neighbor_on_face(Face::PosZ), NO_NEIGHBOR);
    }

    #[test]
    fn partition_coverage_exactly_one_owner() {
        let gbox = Subbox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 4.0, 4.0));
        let world = 8;
        let parts: Vec<_> = (0..world)
            .map(|r| Partitioning::new(world, r, gbox).unwrap())
            .collect();

        // Sample a grid of points and check exactly one process's subbox
        // contains each one (boundaries excluded, per upper-exclusive rule;
        // skip points exactly on the outer hi boundary, which belongs to no
        // subbox under this convention and is excluded from the domain).
        let n = 9;
        for xi in 0..n {
            for yi in 0..n {
                for zi in 0..n {
                    let p = Vec3::new(
                        4.0 * xi as f32 / n as f32,
                        4.0 * yi as f32 / n as f32,
                        4.0 * zi as f32 / n as f32,
                    );
                    let owners: Vec<_> = parts
                        .iter()
                        .enumerate()
                        .filter(|(_, part)| part.local_box().contains(p))
                        .map(|(r, _)| r)
                        .collect();
                    assert_eq!(owners.len(), 1, "point {p:?} had owners {owners:?}");
                }
            }
        }
    }

    #[test]
    fn neighbor_via_exit_face() {
        let gbox = Subbox::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 2.0));
        let p0 = Partitioning::new(2, 0, gbox).unwrap();
        // Ray near the +z edge of process 0's subbox heading further +z.
        let n = p0.neighbor(Vec3::new(0.5, 0.5, 0.99), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(n, 1);
    }
}
