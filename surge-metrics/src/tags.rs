use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // SmallVec to avoid allocation for small tag sets (usually < 4)
    tags: SmallVec<[(Arc<str>, Arc<str>); 4]>,
}

impl TagSet {
    /// Build a normalized tag set: sorted by key, then value.
    ///
    /// Sorting here means two call sites passing the same logical tags in a
    /// different order resolve to the same series.
    pub fn normalize(tags: &[(String, String)]) -> Self {
        if tags.is_empty() {
            return Self::default();
        }

        let mut v: SmallVec<[(Arc<str>, Arc<str>); 4]> = tags
            .iter()
            .map(|(k, v)| (Arc::<str>::from(k.as_str()), Arc::<str>::from(v.as_str())))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Self { tags: v }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}
