use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// One topic cluster produced by the caller's unsupervised model.
///
/// Labels are not predefined; they emerge after training, so `label` stays
/// `None` until the model assigns one. Keywords are ranked most
/// representative first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDescriptor {
    /// Cluster id assigned by the clustering algorithm.
    pub cluster_id: u32,
    /// Ranked representative terms, normalized and deduplicated.
    pub top_keywords: Vec<String>,
    /// Cluster coherence: 0.0 loose, 1.0 tight.
    pub coherence: f64,
    /// Emerged human-readable label, if assigned.
    pub label: Option<String>,
}

impl TopicDescriptor {
    /// Creates a descriptor, clamping coherence and normalizing keywords
    /// (trimmed, lowercased, deduplicated with rank order preserved).
    #[must_use]
    pub fn new(
        cluster_id: u32,
        top_keywords: impl IntoIterator<Item = impl Into<String>>,
        coherence: f64,
        label: Option<String>,
    ) -> Self {
        let mut normalized = IndexSet::new();
        for keyword in top_keywords {
            let keyword = keyword.into().trim().to_lowercase();
            if !keyword.is_empty() {
                normalized.insert(keyword);
            }
        }
        Self {
            cluster_id,
            top_keywords: normalized.into_iter().collect(),
            coherence: coherence.clamp(0.0, 1.0),
            label,
        }
    }

    /// True once the model has assigned a label.
    #[must_use]
    pub const fn has_label(&self) -> bool {
        self.label.is_some()
    }

    /// Most representative keyword, if any.
    #[must_use]
    pub fn top_keyword(&self) -> Option<&str> {
        self.top_keywords.first().map(String::as_str)
    }

    /// Cluster is considered coherent at a score of 0.5 or above.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.coherence >= 0.5
    }

    /// Jaccard overlap of keyword sets between two clusters.
    #[must_use]
    pub fn keyword_overlap(&self, other: &Self) -> f64 {
        let ours: IndexSet<&str> = self.top_keywords.iter().map(String::as_str).collect();
        let theirs: IndexSet<&str> = other.top_keywords.iter().map(String::as_str).collect();
        let union = ours.union(&theirs).count();
        if union == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            ours.intersection(&theirs).count() as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_normalized() {
        let topic = TopicDescriptor::new(7, ["  Rust ", "rust", "Memory", ""], 1.3, None);
        assert_eq!(topic.top_keywords, vec!["rust", "memory"]);
        assert!((topic.coherence - 1.0).abs() < f64::EPSILON);
        assert_eq!(topic.top_keyword(), Some("rust"));
        assert!(!topic.has_label());
    }

    #[test]
    fn keyword_overlap_is_jaccard() {
        let a = TopicDescriptor::new(1, ["alpha", "beta"], 0.8, None);
        let b = TopicDescriptor::new(2, ["beta", "gamma"], 0.8, None);
        assert!((a.keyword_overlap(&b) - 1.0 / 3.0).abs() < 1e-9);
        let empty = TopicDescriptor::new(3, Vec::<&str>::new(), 0.8, None);
        assert!((empty.keyword_overlap(&empty)).abs() < f64::EPSILON);
    }
}
