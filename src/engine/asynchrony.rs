use crate::engine::Timeline;
use crate::model::performance::AsynchronyMap;
use crate::model::rendered::ControlPoint;

/// Millisecond offsets by symbolic date, read from an asynchrony map.
#[derive(Debug, Clone, Default)]
pub struct Asynchrony {
    offsets: Vec<(f64, f64)>,
}

impl Asynchrony {
    pub fn from_map(map: &AsynchronyMap) -> Self {
        Self {
            offsets: map
                .scoped()
                .iter()
                .map(|s| (s.date, s.value.offset_ms))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Offset of the instruction in effect at `date`, `None` before the first one.
    pub fn offset_at(&self, date: f64) -> Option<f64> {
        let index = self.offsets.partition_point(|(d, _)| *d <= date);
        index.checked_sub(1).map(|i| self.offsets[i].1)
    }

    /// Shifts the ms dates of every slot starting in scope of an instruction. A note's end moves
    /// by the offset in effect at the note's symbolic end.
    pub fn apply(&self, timeline: &mut Timeline) {
        for slot in timeline.slots.iter_mut() {
            let Some(offset) = self.offset_at(slot.onset) else {
                continue;
            };
            if let Some(ms) = slot.ms_date.as_mut() {
                *ms += offset;
            }
            let end = slot.end();
            if let (Some(ms_end), Some(end)) = (slot.ms_end.as_mut(), end)
                && let Some(end_offset) = self.offset_at(end)
            {
                *ms_end += end_offset;
            }
        }
    }

    pub fn apply_to_curve(&self, curve: &mut [ControlPoint]) {
        for point in curve.iter_mut() {
            if let (Some(ms), Some(offset)) = (point.ms_date.as_mut(), self.offset_at(point.date)) {
                *ms += offset;
            }
        }
    }
}
