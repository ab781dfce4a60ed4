//! Label selectors for list operations.

use std::fmt;

use kite_core::Labels;

/// Label-equality selector with optional "key absent" requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub equals: Labels,
    pub absent: Vec<String>,
}

impl LabelSelector {
    /// Matches every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn eq(labels: &Labels) -> Self {
        Self {
            equals: labels.clone(),
            absent: Vec::new(),
        }
    }

    /// Additionally require that `key` is not set.
    pub fn without(mut self, key: &str) -> Self {
        self.absent.push(key.to_string());
        self
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        labels.is_superset_of(&self.equals) && self.absent.iter().all(|k| !labels.contains_key(k))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.equals)?;
        for (i, key) in self.absent.iter().enumerate() {
            if i > 0 || !self.equals.is_empty() {
                f.write_str(",")?;
            }
            write!(f, "!{key}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_absence() {
        let labels = Labels::new().with("service", "api").with("branch", "main");
        let sel = LabelSelector::eq(&Labels::new().with("service", "api"));
        assert!(sel.matches(&labels));
        assert!(sel.clone().without("type").matches(&labels));
        assert!(!sel.without("branch").matches(&labels));
    }

    #[test]
    fn everything_matches_all() {
        assert!(LabelSelector::everything().matches(&Labels::new()));
    }

    #[test]
    fn display() {
        let sel = LabelSelector::eq(&Labels::new().with("a", "1")).without("type");
        assert_eq!(sel.to_string(), "a=1,!type");
        assert_eq!(LabelSelector::everything().without("type").to_string(), "!type");
    }
}
