//! Append-only store of per-frame camera poses.

use super::pose::CameraPose;

/// Ordered sequence of camera poses indexed by fused-frame number.
///
/// Entry 0 is always the initial pose; entry g is the pose at which
/// frame g was fused.
#[derive(Debug, Clone)]
pub struct Trajectory {
    poses: Vec<CameraPose>,
}

impl Trajectory {
    /// Expected recording length, used to size the backing storage.
    const CAPACITY_HINT: usize = 30_000;

    /// Create a trajectory containing only `initial`.
    pub fn new(initial: CameraPose) -> Self {
        let mut poses = Vec::with_capacity(Self::CAPACITY_HINT);
        poses.push(initial);
        Self { poses }
    }

    /// Append the pose of a newly fused frame.
    #[inline]
    pub fn push(&mut self, pose: CameraPose) {
        self.poses.push(pose);
    }

    /// Number of stored poses (fused frames + 1).
    #[inline]
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Always false: the initial pose is never removed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Most recently stored pose.
    #[inline]
    pub fn last(&self) -> &CameraPose {
        self.poses.last().expect("trajectory holds the initial pose")
    }

    /// Pose at frame `time`, clamped: a negative or out-of-range index
    /// returns the last entry.
    pub fn at(&self, time: i32) -> &CameraPose {
        if time < 0 || time as usize >= self.poses.len() {
            self.last()
        } else {
            &self.poses[time as usize]
        }
    }

    /// Drop everything after the initial pose and replace it with `initial`.
    pub fn reset(&mut self, initial: CameraPose) {
        self.poses.clear();
        self.poses.push(initial);
    }
}
