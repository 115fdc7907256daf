use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the color-target list; keeps client-side selection bounded.
pub const MAX_COLOR_TARGETS: usize = 11;

/// One color the segmentation kernel can be asked to look for.
///
/// `difference` is the per-channel flood-fill tolerance; `blur` is the
/// smoothing kernel size applied before segmentation (0 disables it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTarget {
    pub red: i32,
    pub green: i32,
    pub blue: i32,
    pub difference: i32,
    pub blur: i32,
}

impl Default for ColorTarget {
    fn default() -> Self {
        Self {
            red: 255,
            green: 255,
            blue: 255,
            difference: 50,
            blur: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorListError {
    #[error("color list is full ({MAX_COLOR_TARGETS} entries); delete a color before adding")]
    Full,
}

/// Ordered color-target list plus the active selection.
///
/// Invariant: `active < targets.len()` always holds, and the list is never
/// empty. Every mutation re-establishes it, including deleting the active
/// entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorList {
    targets: Vec<ColorTarget>,
    active: usize,
}

impl Default for ColorList {
    fn default() -> Self {
        Self {
            targets: vec![ColorTarget::default()],
            active: 0,
        }
    }
}

impl ColorList {
    /// Build from stored targets; an empty or oversized input is repaired.
    pub fn from_targets(mut targets: Vec<ColorTarget>) -> Self {
        if targets.is_empty() {
            targets.push(ColorTarget::default());
        }
        targets.truncate(MAX_COLOR_TARGETS);
        Self { targets, active: 0 }
    }

    #[inline]
    pub fn targets(&self) -> &[ColorTarget] {
        &self.targets
    }

    #[inline]
    pub fn active_index(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn active(&self) -> &ColorTarget {
        &self.targets[self.active]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Select a new active index; out-of-range requests clamp to the ends.
    pub fn switch(&mut self, index: i64) -> usize {
        let max = self.targets.len() as i64 - 1;
        self.active = index.clamp(0, max) as usize;
        self.active
    }

    /// Overwrite the active entry.
    pub fn save_active(&mut self, target: ColorTarget) {
        self.targets[self.active] = target;
    }

    pub fn add(&mut self, target: ColorTarget) -> Result<(), ColorListError> {
        if self.targets.len() >= MAX_COLOR_TARGETS {
            return Err(ColorListError::Full);
        }
        self.targets.push(target);
        Ok(())
    }

    /// Delete the entry at `index` if it exists; the last entry is never
    /// removed. The active index is clamped down, never left dangling.
    pub fn delete(&mut self, index: i64) {
        if index < 0 || index as usize >= self.targets.len() || self.targets.len() == 1 {
            return;
        }
        self.targets.remove(index as usize);
        self.active = self.active.min(self.targets.len() - 1);
    }
}
