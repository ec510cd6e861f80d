use std::{collections::HashSet, fmt};

use tracing::debug;

use crate::{
    error::{EventDbError, Result},
    event::Event,
    store::{EventFilter, EventStore},
};

/// One predicate of the query language. Conditions are evaluated against
/// decoded events; `MatchAll` is the fast path that lets the executor hand a
/// null filter to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    MatchAll,
    Tag(String),
    Col { name: String, value: String },
}

impl Condition {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Condition::MatchAll => true,
            Condition::Tag(value) => event.tags.iter().any(|tag| tag == value),
            Condition::Col { name, value } => event
                .column_value(name)
                .is_some_and(|found| found == value.as_str()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::MatchAll => write!(f, "{{match-all}}"),
            Condition::Tag(value) => write!(f, "{{tag: {value}}}"),
            Condition::Col { name, value } => write!(f, "{{col: {name}={value}}}"),
        }
    }
}

/// Compiled form of one `bucket[:predicates]` fragment: a disjunction of
/// predicate conjunctions over a single bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subquery {
    bucket: String,
    conds: Vec<Vec<Condition>>,
}

impl Subquery {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn matches(&self, event: &Event) -> bool {
        self.conds
            .iter()
            .any(|conjunction| conjunction.iter().all(|cond| cond.matches(event)))
    }

    fn match_all(&self) -> bool {
        self.conds
            .iter()
            .any(|conjunction| matches!(conjunction.as_slice(), [Condition::MatchAll]))
    }

    fn simplify(&mut self) {
        if self.match_all() && self.conds.len() > 1 {
            debug!("subquery {self} simplified to match-all");
            self.conds = vec![vec![Condition::MatchAll]];
        }
    }
}

impl fmt::Display for Subquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subquery{{bucket={}, conds=[", self.bucket)?;
        for (n, conjunction) in self.conds.iter().enumerate() {
            if n > 0 {
                write!(f, " OR ")?;
            }
            for (m, cond) in conjunction.iter().enumerate() {
                if m > 0 {
                    write!(f, " AND ")?;
                }
                write!(f, "{cond}")?;
            }
        }
        write!(f, "]}}")
    }
}

/// A parsed query: sub-queries grouped by bucket, executed independently.
#[derive(Debug, Clone)]
pub struct Query {
    raw: String,
    subqueries: Vec<Subquery>,
}

impl Query {
    /// Parses the textual form. Parsing is permissive: textually repeated
    /// fragments are dropped, malformed `key=value` pairs are ignored, and a
    /// fragment left with no usable predicate matches everything. The
    /// `Result` return is kept for stricter future grammars.
    pub fn parse(raw: &str) -> Result<Query> {
        let mut seen = HashSet::new();
        let mut subqueries: Vec<Subquery> = Vec::new();

        for fragment in raw.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() || !seen.insert(fragment) {
                continue;
            }

            let (bucket, predicates) = match fragment.split_once(':') {
                Some((bucket, predicates)) => (bucket.trim(), predicates),
                None => (fragment, ""),
            };

            let mut conds = Vec::new();
            for pair in predicates.split(',').filter(|pair| !pair.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else {
                    continue;
                };
                let key = key.trim();
                let value = value.trim();
                if key == "_tag" {
                    conds.push(Condition::Tag(value.to_owned()));
                } else {
                    conds.push(Condition::Col {
                        name: key.to_owned(),
                        value: value.to_owned(),
                    });
                }
            }
            if conds.is_empty() {
                conds.push(Condition::MatchAll);
            }

            match subqueries.iter_mut().find(|sub| sub.bucket == bucket) {
                Some(sub) => sub.conds.push(conds),
                None => subqueries.push(Subquery {
                    bucket: bucket.to_owned(),
                    conds: vec![conds],
                }),
            }
        }

        for sub in &mut subqueries {
            sub.simplify();
        }

        Ok(Query {
            raw: raw.to_owned(),
            subqueries,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Materializes matching events, per-bucket ascending by time, buckets
    /// concatenated in plan order.
    pub fn execute(&self, store: &EventStore, from: i64, to: i64) -> Result<Vec<Event>> {
        let mut result = Vec::new();
        for sub in &self.subqueries {
            let matcher = |event: &Event| sub.matches(event);
            let filter: Option<&EventFilter> = if sub.match_all() {
                None
            } else {
                Some(&matcher)
            };
            match store.get_events(&sub.bucket, from, to, filter) {
                Ok(mut events) => result.append(&mut events),
                Err(EventDbError::UnknownBucket(name)) => {
                    debug!(query = %self.raw, bucket = %name, "query references unknown bucket");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    /// Deletes matching events; returns the total removed. Each sub-query
    /// runs in its own transaction.
    pub fn execute_delete(&self, store: &EventStore, from: i64, to: i64) -> Result<usize> {
        let mut deleted = 0;
        for sub in &self.subqueries {
            let matcher = |event: &Event| sub.matches(event);
            let filter: Option<&EventFilter> = if sub.match_all() {
                None
            } else {
                Some(&matcher)
            };
            match store.delete_events(&sub.bucket, from, to, filter) {
                Ok(count) => deleted += count,
                Err(EventDbError::UnknownBucket(name)) => {
                    debug!(query = %self.raw, bucket = %name, "query references unknown bucket");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(deleted)
    }

    /// Timestamps of matching events, unsorted; callers sort before use.
    pub fn execute_count(&self, store: &EventStore, from: i64, to: i64) -> Result<Vec<i64>> {
        let mut timestamps = Vec::new();
        for sub in &self.subqueries {
            let matcher = |event: &Event| sub.matches(event);
            let filter: Option<&EventFilter> = if sub.match_all() {
                None
            } else {
                Some(&matcher)
            };
            match store.count_events(&sub.bucket, from, to, filter) {
                Ok(mut found) => timestamps.append(&mut found),
                Err(EventDbError::UnknownBucket(name)) => {
                    debug!(query = %self.raw, bucket = %name, "query references unknown bucket");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(timestamps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_bucket_matches_everything() {
        let query = Query::parse("test").unwrap();
        assert_eq!(query.subqueries.len(), 1);
        let sub = &query.subqueries[0];
        assert_eq!(sub.bucket, "test");
        assert_eq!(sub.conds, [vec![Condition::MatchAll]]);
        assert!(sub.match_all());
    }

    #[test]
    fn predicates_keep_their_order() {
        let query = Query::parse("testb:_tag=t1,_tag=t2,col2=23,col3=45").unwrap();
        assert_eq!(query.subqueries.len(), 1);
        let sub = &query.subqueries[0];
        assert_eq!(sub.bucket, "testb");
        assert_eq!(
            sub.conds,
            [vec![
                Condition::Tag("t1".into()),
                Condition::Tag("t2".into()),
                Condition::Col {
                    name: "col2".into(),
                    value: "23".into()
                },
                Condition::Col {
                    name: "col3".into(),
                    value: "45".into()
                },
            ]]
        );
    }

    #[test]
    fn semicolon_splits_subqueries_per_bucket() {
        let query = Query::parse("testb:_tag=t1,col2=23;testc:col1=12").unwrap();
        assert_eq!(query.subqueries.len(), 2);
        assert_eq!(query.subqueries[0].bucket, "testb");
        assert_eq!(query.subqueries[0].conds.len(), 1);
        assert_eq!(query.subqueries[1].bucket, "testc");
        assert_eq!(query.subqueries[1].conds.len(), 1);
    }

    #[test]
    fn same_bucket_fragments_disjoin() {
        let query = Query::parse("b:x=1;b:y=2").unwrap();
        assert_eq!(query.subqueries.len(), 1);
        assert_eq!(query.subqueries[0].conds.len(), 2);
    }

    #[test]
    fn repeated_fragments_are_dropped() {
        let query = Query::parse("b:x=1;b:x=1;b:x=1").unwrap();
        assert_eq!(query.subqueries.len(), 1);
        assert_eq!(query.subqueries[0].conds.len(), 1);
    }

    #[test]
    fn match_all_disjunct_collapses_the_subquery() {
        let query = Query::parse("b;b:x=1").unwrap();
        assert_eq!(query.subqueries.len(), 1);
        assert_eq!(query.subqueries[0].conds, [vec![Condition::MatchAll]]);
    }

    #[test]
    fn malformed_predicates_degrade_gracefully() {
        let query = Query::parse("b:garbage").unwrap();
        assert_eq!(query.subqueries[0].conds, [vec![Condition::MatchAll]]);

        let query = Query::parse("b:garbage,k=v").unwrap();
        assert_eq!(
            query.subqueries[0].conds,
            [vec![Condition::Col {
                name: "k".into(),
                value: "v".into()
            }]]
        );
    }

    #[test]
    fn empty_fragments_are_discarded() {
        let query = Query::parse(";;a;;b;").unwrap();
        assert_eq!(query.subqueries.len(), 2);
    }

    #[test]
    fn display_describes_the_plan() {
        let query = Query::parse("b:_tag=t1,k=v").unwrap();
        let described = query.subqueries[0].to_string();
        assert_eq!(
            described,
            "subquery{bucket=b, conds=[{tag: t1} AND {col: k=v}]}"
        );
    }

    #[test]
    fn condition_matching_semantics() {
        let mut event = Event {
            name: "svc".into(),
            time: 1,
            ..Event::default()
        };
        event.set_tags("a b");
        event.cols.push(crate::event::EventCol::new("k1", "v1"));

        assert!(Condition::MatchAll.matches(&event));
        assert!(Condition::Tag("a".into()).matches(&event));
        assert!(!Condition::Tag("c".into()).matches(&event));
        assert!(Condition::Col {
            name: "k1".into(),
            value: "v1".into()
        }
        .matches(&event));
        // Wrong value and absent column both fail to match.
        assert!(!Condition::Col {
            name: "k1".into(),
            value: "v2".into()
        }
        .matches(&event));
        assert!(!Condition::Col {
            name: "missing".into(),
            value: "v1".into()
        }
        .matches(&event));
    }

    #[test]
    fn conjunctions_and_then_disjunctions() {
        let query = Query::parse("b:_tag=a,k1=v1;b:_tag=z").unwrap();
        let sub = &query.subqueries[0];

        let mut both = Event::default();
        both.set_tags("a");
        both.cols.push(crate::event::EventCol::new("k1", "v1"));
        assert!(sub.matches(&both));

        let mut tag_only = Event::default();
        tag_only.set_tags("a");
        assert!(!sub.matches(&tag_only));

        let mut other_disjunct = Event::default();
        other_disjunct.set_tags("z");
        assert!(sub.matches(&other_disjunct));
    }
}
