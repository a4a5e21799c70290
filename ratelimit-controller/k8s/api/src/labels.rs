use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Expression {
    key: String,
    operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    values: Option<BTreeSet<String>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects the set of pods that receive the rate-limiting sidecar.
///
/// An empty selector matches every pod in the namespace.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_expressions: Option<Expressions>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSelector {
    #[error("selector key must not be empty")]
    EmptyKey,

    #[error("operator {operator:?} on key {key:?} requires at least one value")]
    MissingValues { key: String, operator: Operator },

    #[error("operator {operator:?} on key {key:?} must not have values")]
    UnexpectedValues { key: String, operator: Operator },
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Checks the selector against the rules the API server applies to
    /// `LabelSelector`s.
    pub fn validate(&self) -> Result<(), InvalidSelector> {
        if self.match_labels.iter().flatten().any(|(k, _)| k.is_empty()) {
            return Err(InvalidSelector::EmptyKey);
        }
        for expr in self.match_expressions.iter().flatten() {
            expr.validate()?;
        }
        Ok(())
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.0.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }
}

/// Renders the selector in the query form accepted by list requests.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| {
            if first {
                first = false;
                Ok(())
            } else {
                f.write_str(",")
            }
        };

        for (k, v) in self.match_labels.iter().flatten() {
            sep(f)?;
            write!(f, "{k}={v}")?;
        }
        for expr in self.match_expressions.iter().flatten() {
            sep(f)?;
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    pub fn new(
        key: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        Self {
            key: key.into(),
            operator,
            values: if values.is_empty() {
                None
            } else {
                Some(values)
            },
        }
    }

    fn values(&self) -> impl Iterator<Item = &String> {
        self.values.iter().flatten()
    }

    fn validate(&self) -> Result<(), InvalidSelector> {
        if self.key.is_empty() {
            return Err(InvalidSelector::EmptyKey);
        }
        let has_values = self.values().next().is_some();
        match self.operator {
            Operator::In | Operator::NotIn if !has_values => Err(InvalidSelector::MissingValues {
                key: self.key.clone(),
                operator: self.operator,
            }),
            Operator::Exists | Operator::DoesNotExist if has_values => {
                Err(InvalidSelector::UnexpectedValues {
                    key: self.key.clone(),
                    operator: self.operator,
                })
            }
            _ => Ok(()),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values().any(|x| x == v)),
            Operator::NotIn => value.is_none_or(|v| !self.values().any(|x| x == v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = || self.values().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, values()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, values()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::iter::FromIterator;

    #[test]
    fn test_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Labels::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "bar"))),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                Labels::from_iter(Some(("foo", "baz"))),
                false,
                "label value mismatch",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::from_iter(vec![("foo", "bar"), ("bah", "baz")]),
                true,
                "in expression match",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::In, ["bar"]))),
                Labels::default(),
                false,
                "in expression on missing key",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::from_iter(Some(("foo", "bar"))),
                false,
                "notin expression excludes value",
            ),
            (
                Selector::from_iter(Some(Expression::new("foo", Operator::NotIn, ["bar"]))),
                Labels::default(),
                true,
                "notin expression on missing key",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::Exists,
                    None::<String>,
                ))),
                Labels::from_iter(Some(("foo", "anything"))),
                true,
                "exists expression",
            ),
            (
                Selector::from_iter(Some(Expression::new(
                    "foo",
                    Operator::DoesNotExist,
                    None::<String>,
                ))),
                Labels::from_iter(Some(("foo", "anything"))),
                false,
                "doesnotexist expression",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn test_validate() {
        assert!(Selector::default().validate().is_ok());
        assert!(Selector::from_iter(Some(("app", "web"))).validate().is_ok());
        assert_eq!(
            Selector::from_iter(Some(Expression::new("app", Operator::In, None::<String>)))
                .validate(),
            Err(InvalidSelector::MissingValues {
                key: "app".to_string(),
                operator: Operator::In,
            })
        );
        assert_eq!(
            Selector::from_iter(Some(Expression::new("app", Operator::Exists, ["web"])))
                .validate(),
            Err(InvalidSelector::UnexpectedValues {
                key: "app".to_string(),
                operator: Operator::Exists,
            })
        );
        assert_eq!(
            Selector::from_iter(Some(("", "web"))).validate(),
            Err(InvalidSelector::EmptyKey)
        );
    }

    #[test]
    fn test_display() {
        let selector = Selector {
            match_labels: Some(maplit::btreemap! {
                "app".to_string() => "web".to_string(),
                "tier".to_string() => "front".to_string(),
            }),
            match_expressions: Some(vec![
                Expression::new("env", Operator::In, ["prod", "canary"]),
                Expression::new("legacy", Operator::DoesNotExist, None::<String>),
            ]),
        };
        assert_eq!(
            selector.to_string(),
            "app=web,tier=front,env in (canary,prod),!legacy"
        );
        assert_eq!(Selector::default().to_string(), "");
    }

    #[test]
    fn test_serialization_matches_label_selector() {
        let selector = Selector::from_iter(Some(("app", "web")));
        assert_eq!(
            serde_json::to_string(&selector).unwrap(),
            r#"{"matchLabels":{"app":"web"}}"#
        );

        let parsed: Selector = serde_json::from_str(
            r#"{"matchExpressions":[{"key":"app","operator":"In","values":["web"]}]}"#,
        )
        .unwrap();
        assert!(parsed.matches(&Labels::from_iter(Some(("app", "web")))));
    }
}
