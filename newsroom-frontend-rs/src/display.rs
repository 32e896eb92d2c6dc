use std::fmt;

use tally::MirrorValue;

/// What the page-view badge shows. Never an error state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum CounterDisplay {
    Loading,
    Count(u64),
}

impl From<MirrorValue> for CounterDisplay {
    fn from(value: MirrorValue) -> Self {
        if value.loaded {
            CounterDisplay::Count(value.count)
        } else {
            CounterDisplay::Loading
        }
    }
}

impl fmt::Display for CounterDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterDisplay::Loading => write!(f, "Loading…"),
            CounterDisplay::Count(1) => write!(f, "1 view"),
            CounterDisplay::Count(n) => write!(f, "{} views", group_thousands(*n)),
        }
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loading_until_first_snapshot() {
        assert_eq!(
            CounterDisplay::from(MirrorValue::default()),
            CounterDisplay::Loading
        );
        assert_eq!(
            CounterDisplay::from(MirrorValue {
                count: 0,
                loaded: true
            }),
            CounterDisplay::Count(0)
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(CounterDisplay::Loading.to_string(), "Loading…");
        assert_eq!(CounterDisplay::Count(0).to_string(), "0 views");
        assert_eq!(CounterDisplay::Count(1).to_string(), "1 view");
        assert_eq!(CounterDisplay::Count(42).to_string(), "42 views");
        assert_eq!(CounterDisplay::Count(1000).to_string(), "1,000 views");
        assert_eq!(CounterDisplay::Count(1234567).to_string(), "1,234,567 views");
    }

    #[test]
    fn test_serializes_for_the_page() {
        assert_eq!(
            serde_json::to_string(&CounterDisplay::Count(7)).unwrap(),
            r#"{"state":"count","count":7}"#
        );
        assert_eq!(
            serde_json::to_string(&CounterDisplay::Loading).unwrap(),
            r#"{"state":"loading"}"#
        );
    }
}
