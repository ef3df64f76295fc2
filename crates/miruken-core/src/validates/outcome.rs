use std::collections::BTreeMap;
use std::fmt;

/// Structured validation errors keyed by field path.
///
/// Paths address nested fields with `.` and collection elements with
/// either `[i]` or `.i`, so `Work[0].Street` and `Work.0.Street` name the
/// same entry. Reported paths always use the bracket form.
///
/// ```rust,ignore
/// let mut outcome = Outcome::new();
/// outcome.add_error("Home.Zip", "is required");
/// outcome.add_error("Work[0].Street", "is required");
/// assert_eq!(outcome.field_errors("Work.0.Street"), ["is required"]);
/// assert_eq!(outcome.paths(), ["Home.Zip", "Work[0].Street"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    fields: BTreeMap<String, Field>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Field {
    errors: Vec<String>,
    nested: Option<Outcome>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field below this outcome has an error.
    pub fn is_valid(&self) -> bool {
        self.fields
            .values()
            .all(|f| f.errors.is_empty() && f.nested.as_ref().is_none_or(Outcome::is_valid))
    }

    pub fn add_error(&mut self, path: &str, message: impl Into<String>) {
        let segments = segments(path);
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut outcome = self;
        for segment in parents {
            outcome = outcome.child(segment);
        }
        outcome
            .fields
            .entry((*last).to_string())
            .or_default()
            .errors
            .push(message.into());
    }

    /// Errors recorded directly on `path`.
    pub fn field_errors(&self, path: &str) -> &[String] {
        let segments = segments(path);
        let Some((last, parents)) = segments.split_last() else {
            return &[];
        };
        let mut outcome = self;
        for segment in parents {
            match outcome.fields.get(*segment).and_then(|f| f.nested.as_ref()) {
                Some(nested) => outcome = nested,
                None => return &[],
            }
        }
        outcome
            .fields
            .get(*last)
            .map(|f| f.errors.as_slice())
            .unwrap_or_default()
    }

    /// The nested outcome at `path`, if one was recorded.
    pub fn path(&self, path: &str) -> Option<&Outcome> {
        let mut outcome = self;
        for segment in segments(path) {
            outcome = outcome.fields.get(segment)?.nested.as_ref()?;
        }
        Some(outcome)
    }

    /// The nested outcome at `path`, created on demand.
    pub fn require_path(&mut self, path: &str) -> &mut Outcome {
        let mut outcome = self;
        for segment in segments(path) {
            outcome = outcome.child(segment);
        }
        outcome
    }

    /// Top-level fields with errors, in order.
    pub fn fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| !f.errors.is_empty() || f.nested.as_ref().is_some_and(|n| !n.is_valid()))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Full path of every field with errors.
    pub fn paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect("", &mut |path, _| paths.push(path.to_string()));
        paths
    }

    /// Copies every error of `other` into this outcome.
    pub fn merge(&mut self, other: &Outcome) {
        for (name, field) in &other.fields {
            let target = self.fields.entry(name.clone()).or_default();
            for error in &field.errors {
                if !target.errors.contains(error) {
                    target.errors.push(error.clone());
                }
            }
            if let Some(nested) = &field.nested {
                target.nested.get_or_insert_with(Outcome::new).merge(nested);
            }
        }
    }

    fn child(&mut self, segment: &str) -> &mut Outcome {
        self.fields
            .entry(segment.to_string())
            .or_default()
            .nested
            .get_or_insert_with(Outcome::new)
    }

    fn collect(&self, prefix: &str, visit: &mut dyn FnMut(&str, &[String])) {
        for (name, field) in &self.fields {
            let path = join(prefix, name);
            if !field.errors.is_empty() {
                visit(&path, &field.errors);
            }
            if let Some(nested) = &field.nested {
                nested.collect(&path, visit);
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut result = Ok(());
        self.collect("", &mut |path, errors| {
            if result.is_err() {
                return;
            }
            let sep = if first { "" } else { "; " };
            first = false;
            result = write!(f, "{sep}{path}: {}", errors.join(", "));
        });
        result
    }
}

impl std::error::Error for Outcome {}

fn join(prefix: &str, name: &str) -> String {
    let index = !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit());
    match (prefix.is_empty(), index) {
        (_, true) => format!("{prefix}[{name}]"),
        (true, false) => name.to_string(),
        (false, false) => format!("{prefix}.{name}"),
    }
}

/// Splits `a.b[0].c` and `a.b.0.c` into `["a", "b", "0", "c"]`.
fn segments(path: &str) -> Vec<&str> {
    path.split(['.', '[', ']'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_and_dot_paths_address_the_same_field() {
        let mut outcome = Outcome::new();
        outcome.add_error("Work[0].Street", "is required");
        outcome.add_error("Work.0.Street", "is too short");
        assert_eq!(
            outcome.field_errors("Work[0].Street"),
            ["is required", "is too short"]
        );
        assert_eq!(outcome.paths(), ["Work[0].Street"]);
        assert!(outcome.path("Work[0]").is_some());
        assert_eq!(outcome.fields(), ["Work"]);
    }

    #[test]
    fn test_display_lists_sorted_paths() {
        let mut outcome = Outcome::new();
        outcome.add_error("Name", "is required");
        outcome.add_error("Age", "must be at least 18");
        outcome.add_error("Home.Zip", "is required");
        assert_eq!(
            outcome.to_string(),
            "Age: must be at least 18; Home.Zip: is required; Name: is required"
        );
    }

    #[test]
    fn test_required_paths_without_errors_stay_valid() {
        let mut outcome = Outcome::new();
        outcome.require_path("Home");
        assert!(outcome.is_valid());
        assert!(outcome.fields().is_empty());
        outcome.require_path("Home").add_error("Street", "is required");
        assert!(!outcome.is_valid());
        assert_eq!(outcome.field_errors("Home.Street"), ["is required"]);
    }

    #[test]
    fn test_merge_keeps_distinct_errors() {
        let mut a = Outcome::new();
        a.add_error("Email", "is invalid");
        let mut b = Outcome::new();
        b.add_error("Email", "is invalid");
        b.add_error("Tags[1]", "is empty");
        a.merge(&b);
        assert_eq!(a.field_errors("Email"), ["is invalid"]);
        assert_eq!(a.paths(), ["Email", "Tags[1]"]);
    }
}
