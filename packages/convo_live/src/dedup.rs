use std::collections::HashSet;

/// Message ids already admitted into the transcript of the active conversation.
#[derive(Debug, Default, Clone)]
pub struct SeenIds {
    ids: HashSet<String>,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` and returns true the first time it is seen.
    pub fn admit(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        true
    }

    /// Marks ids that are already present elsewhere (e.g. in the snapshot).
    pub fn seed<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ids.extend(ids.into_iter().map(str::to_string));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
