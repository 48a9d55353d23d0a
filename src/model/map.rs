use log::debug;
use serde::{Deserialize, Serialize};

/// A value positioned on the symbolic timeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dated<T> {
    pub date: f64,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Dated<T> {
    pub fn new(date: f64, value: T) -> Self {
        Self { date, value }
    }
}

/// An ordered sequence of dated entries.
///
/// Entries are kept sorted by date. An entry inserted at a date that is already taken goes after
/// the existing ones, so lookups at that date see the most recently inserted entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(
    from = "Vec<Dated<T>>",
    into = "Vec<Dated<T>>",
    bound(serialize = "T: Serialize + Clone", deserialize = "T: Deserialize<'de>")
)]
pub struct GenericMap<T> {
    entries: Vec<Dated<T>>,
}

impl<T> Default for GenericMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> From<Vec<Dated<T>>> for GenericMap<T> {
    fn from(mut entries: Vec<Dated<T>>) -> Self {
        for entry in entries.iter_mut() {
            entry.date = sanitize_date(entry.date);
        }
        // stable, so equal dates keep their document order
        entries.sort_by(|a, b| a.date.total_cmp(&b.date));
        Self { entries }
    }
}

impl<T: Clone> From<GenericMap<T>> for Vec<Dated<T>> {
    fn from(map: GenericMap<T>) -> Self {
        map.entries
    }
}

impl<T> FromIterator<Dated<T>> for GenericMap<T> {
    fn from_iter<I: IntoIterator<Item = Dated<T>>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

fn sanitize_date(date: f64) -> f64 {
    if date >= 0.0 {
        date
    } else {
        debug!("Clamping invalid map date {} to 0..!", date);
        0.0
    }
}

impl<T> GenericMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` at `date` and returns its index. Negative dates are clamped to 0.
    pub fn insert(&mut self, date: f64, value: T) -> usize {
        let date = sanitize_date(date);
        let index = self.entries.partition_point(|e| e.date <= date);
        self.entries.insert(index, Dated::new(date, value));
        index
    }

    /// Index of the last entry at or before `date`.
    pub fn index_before_at(&self, date: f64) -> Option<usize> {
        self.entries
            .partition_point(|e| e.date <= date)
            .checked_sub(1)
    }

    /// The entry in effect at `date`.
    pub fn entry_at(&self, date: f64) -> Option<&Dated<T>> {
        self.index_before_at(date).map(|i| &self.entries[i])
    }

    /// All entries in the half-open interval `[start, end)`.
    pub fn entries_in_range(&self, start: f64, end: f64) -> &[Dated<T>] {
        if end <= start {
            return &[];
        }
        let lo = self.entries.partition_point(|e| e.date < start);
        let hi = self.entries.partition_point(|e| e.date < end);
        &self.entries[lo..hi]
    }

    /// All entries exactly at `date`.
    pub fn entries_at(&self, date: f64) -> &[Dated<T>] {
        let lo = self.entries.partition_point(|e| e.date < date);
        let hi = self.entries.partition_point(|e| e.date <= date);
        &self.entries[lo..hi]
    }

    pub fn get(&self, index: usize) -> Option<&Dated<T>> {
        self.entries.get(index)
    }

    pub fn first(&self) -> Option<&Dated<T>> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Dated<T>> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dated<T>> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Dated<T>] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Dated<T>> {
        self.entries
    }
}

impl<'a, T> IntoIterator for &'a GenericMap<T> {
    type Item = &'a Dated<T>;
    type IntoIter = std::slice::Iter<'a, Dated<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Switches the style that named references in the following entries are resolved against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StyleSwitch {
    pub name_ref: String,

    /// Only meaningful in articulation maps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_articulation: Option<String>,
}

/// Performance maps interleave style switches with their actual instructions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum MapItem<T> {
    Style(StyleSwitch),
    Entry(T),
}

impl<T> MapItem<T> {
    pub fn entry(&self) -> Option<&T> {
        match self {
            MapItem::Entry(value) => Some(value),
            MapItem::Style(_) => None,
        }
    }

    pub fn style(&self) -> Option<&StyleSwitch> {
        match self {
            MapItem::Style(style) => Some(style),
            MapItem::Entry(_) => None,
        }
    }
}

/// One instruction of a performance map together with what the map says about its scope.
#[derive(Debug, Clone, Copy)]
pub struct Scoped<'a, T> {
    pub index: usize,
    pub date: f64,
    /// Date of the next instruction, `None` for the last one.
    pub end_date: Option<f64>,
    pub value: &'a T,
    pub style: Option<&'a StyleSwitch>,
}

impl<'a, T> Scoped<'a, T> {
    pub fn style_name(&self) -> &'a str {
        self.style.map(|s| s.name_ref.as_str()).unwrap_or("")
    }

    pub fn contains(&self, date: f64) -> bool {
        date >= self.date && self.end_date.is_none_or(|end| date < end)
    }
}

impl<T> GenericMap<MapItem<T>> {
    pub fn push_entry(&mut self, date: f64, value: T) -> usize {
        self.insert(date, MapItem::Entry(value))
    }

    pub fn push_style(&mut self, date: f64, name_ref: &str) -> usize {
        self.insert(
            date,
            MapItem::Style(StyleSwitch {
                name_ref: name_ref.to_string(),
                default_articulation: None,
            }),
        )
    }

    /// The last style switch at or before `index`.
    pub fn style_at_index(&self, index: usize) -> Option<&StyleSwitch> {
        let end = (index + 1).min(self.entries.len());
        self.entries[..end]
            .iter()
            .rev()
            .find_map(|e| e.value.style())
    }

    /// The style switch in effect at `date`.
    pub fn style_at(&self, date: f64) -> Option<&StyleSwitch> {
        self.index_before_at(date)
            .and_then(|index| self.style_at_index(index))
    }

    pub fn style_switches(&self) -> impl Iterator<Item = (f64, &StyleSwitch)> {
        self.entries
            .iter()
            .filter_map(|e| e.value.style().map(|s| (e.date, s)))
    }

    /// Whether the map holds any instruction besides style switches.
    pub fn has_entries(&self) -> bool {
        self.entries.iter().any(|e| e.value.entry().is_some())
    }

    /// All instructions in order, each with its scope and active style.
    pub fn scoped(&self) -> Vec<Scoped<'_, T>> {
        let mut result: Vec<Scoped<'_, T>> = Vec::new();
        let mut style: Option<&StyleSwitch> = None;

        for (index, e) in self.entries.iter().enumerate() {
            match &e.value {
                MapItem::Style(switch) => style = Some(switch),
                MapItem::Entry(value) => {
                    if let Some(prev) = result.last_mut() {
                        prev.end_date = Some(e.date);
                    }
                    result.push(Scoped {
                        index,
                        date: e.date,
                        end_date: None,
                        value,
                        style,
                    });
                }
            }
        }

        result
    }

    /// The instruction in effect at `date`, ignoring style switches.
    pub fn entry_value_at(&self, date: f64) -> Option<(f64, &T)> {
        let index = self.index_before_at(date)?;
        self.entries[..=index]
            .iter()
            .rev()
            .find_map(|e| e.value.entry().map(|v| (e.date, v)))
    }
}
