//! Ordering of interchangeable providers (connector factories, layouts,
//! metadata generators) by priority.

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::config::SessionConfig;

/// One registered provider with its resolved ordering data.
struct Entry<T: ?Sized> {
    component: Arc<T>,
    type_name: String,
    priority: f32,
    disabled: bool,
    index: usize,
}

/// A stable priority-ordered collection of pluggable components.
///
/// The effective priority is the configured override for the component's type
/// name when present, otherwise the nominal priority given at insertion. In
/// implicit mode insertion order decides, earliest first. A `NaN` priority
/// disables the component: it sorts after every enabled one and is excluded
/// from [`enabled`](Self::enabled).
pub struct PrioritizedComponents<T: ?Sized> {
    entries: Vec<Entry<T>>,
}

impl<T: ?Sized> PrioritizedComponents<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(
        &mut self,
        component: Arc<T>,
        type_name: &str,
        nominal_priority: f32,
        config: &SessionConfig,
    ) {
        let index = self.entries.len();
        let priority = if config.implicit_priorities {
            // Earlier insertions win under implicit ordering.
            -(index as f32)
        } else {
            config.priority_for(type_name).unwrap_or(nominal_priority)
        };
        self.entries.push(Entry {
            component,
            type_name: type_name.to_string(),
            priority,
            disabled: priority.is_nan(),
            index,
        });
        self.entries.sort_by(compare_entries);
    }

    /// Enabled components, highest priority first, insertion order on ties.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries
            .iter()
            .filter(|e| !e.disabled)
            .map(|e| &e.component)
    }

    /// All components including disabled ones, in sort order.
    pub fn all(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|e| &e.component)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the registration table for diagnostics.
    pub fn list(&self, out: &mut String) {
        for entry in &self.entries {
            let _ = write!(out, "{}", simple_name(&entry.type_name));
            if entry.disabled {
                let _ = writeln!(out, " (disabled)");
            } else {
                let _ = writeln!(out, " (priority {})", entry.priority);
            }
        }
    }
}

impl<T: ?Sized> Default for PrioritizedComponents<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_entries<T: ?Sized>(a: &Entry<T>, b: &Entry<T>) -> Ordering {
    match (a.disabled, b.disabled) {
        (false, true) => return Ordering::Less,
        (true, false) => return Ordering::Greater,
        _ => {}
    }
    b.priority
        .partial_cmp(&a.priority)
        .unwrap_or(Ordering::Equal)
        .then(a.index.cmp(&b.index))
}

fn simple_name(type_name: &str) -> &str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(registry: &PrioritizedComponents<str>) -> Vec<String> {
        registry.enabled().map(|s| s.to_string()).collect()
    }

    #[test]
    fn priority_ordering() {
        let config = SessionConfig::default();
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("low"), "Low", 1.0, &config);
        registry.insert(Arc::from("high"), "High", 10.0, &config);
        registry.insert(Arc::from("mid"), "Mid", 5.0, &config);
        assert_eq!(collect(&registry), vec!["high", "mid", "low"]);
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let config = SessionConfig::default();
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("first"), "A", 1.0, &config);
        registry.insert(Arc::from("second"), "B", 1.0, &config);
        registry.insert(Arc::from("third"), "C", 1.0, &config);
        assert_eq!(collect(&registry), vec!["first", "second", "third"]);
    }

    #[test]
    fn nan_disables() {
        let config = SessionConfig::default();
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("dead"), "Dead", f32::NAN, &config);
        registry.insert(Arc::from("alive"), "Alive", 0.0, &config);
        assert_eq!(collect(&registry), vec!["alive"]);
        assert_eq!(registry.all().count(), 2);

        let mut listing = String::new();
        registry.list(&mut listing);
        assert!(listing.contains("Dead (disabled)"));
        assert!(listing.contains("Alive (priority 0)"));
    }

    #[test]
    fn config_override_wins() {
        let mut config = SessionConfig::default();
        config.priorities.insert("Underdog".to_string(), 100.0);
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("favorite"), "Favorite", 50.0, &config);
        registry.insert(Arc::from("underdog"), "Underdog", 1.0, &config);
        assert_eq!(collect(&registry), vec!["underdog", "favorite"]);
    }

    #[test]
    fn config_can_disable() {
        let mut config = SessionConfig::default();
        config.priorities.insert("Gone".to_string(), f32::NAN);
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("gone"), "Gone", 50.0, &config);
        assert!(collect(&registry).is_empty());
    }

    #[test]
    fn implicit_priorities_follow_insertion() {
        let config = SessionConfig {
            implicit_priorities: true,
            ..Default::default()
        };
        let mut registry: PrioritizedComponents<str> = PrioritizedComponents::new();
        registry.insert(Arc::from("first"), "Z", 0.0, &config);
        registry.insert(Arc::from("second"), "A", 100.0, &config);
        assert_eq!(collect(&registry), vec!["first", "second"]);
    }
}
