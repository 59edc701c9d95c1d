use serde::Serialize;

/// A selectable digest topic.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Topic {
    pub id: &'static str,
    pub label: &'static str,
}

pub const AVAILABLE_TOPICS: &[Topic] = &[
    Topic { id: "technology", label: "Technology" },
    Topic { id: "business", label: "Business" },
    Topic { id: "sports", label: "Sports" },
    Topic { id: "entertainment", label: "Entertainment" },
    Topic { id: "science", label: "Science" },
    Topic { id: "politics", label: "Politics" },
    Topic { id: "health", label: "Health" },
    Topic { id: "world", label: "World" },
];

/// Display label for a topic id; unknown ids fall back to the id itself so
/// user-defined topics still render.
pub fn label_for(id: &str) -> &str {
    AVAILABLE_TOPICS
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.label)
        .unwrap_or(id)
}
